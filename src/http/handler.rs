//! Axum router and HTTP request handlers.
//!
//! Routes:
//! - `GET  {repoPath}/info/refs?service=git-upload-pack` - ref advertisement
//! - `POST {repoPath}/git-upload-pack`                   - packfile fetch
//! - `GET  /debug/vars`                                  - counters
//! - anything else                                       - 501 Not Implemented
//!
//! `{repoPath}` is any slash-separated path; a trailing `.git` is accepted
//! but not required.

use std::io::Read;
use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use flate2::read::GzDecoder;
use tokio::io::AsyncReadExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::pktline::{first_want_capabilities, PktLine, PktLineScanner};
use crate::repo::Repository;
use crate::AppState;

/// Literal pkt-line announcing the upload-pack service, followed by a flush.
const SERVICE_ANNOUNCEMENT: &[u8] = b"001e# service=git-upload-pack\n0000";

const ADVERTISEMENT_CONTENT_TYPE: &str = "application/x-git-upload-pack-advertisement";
const RESULT_CONTENT_TYPE: &str = "application/x-git-upload-pack-result";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all routes and shared state.
///
/// Everything goes through the fallback dispatcher: the protocol endpoints
/// are suffix patterns over arbitrary repository paths, and any request
/// matching none of them must get a 501 rather than axum's default 404/405.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route requests to the two protocol endpoints by path suffix.
async fn dispatch(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    debug!(%method, %path, "incoming request");

    if method == Method::GET {
        if path == "/debug/vars" {
            return handle_debug_vars(&state);
        }
        if let Some(repo_path) = path.strip_suffix("/info/refs") {
            if has_upload_pack_service(&query) {
                if let Some(repo) = resolve_repository(&state, repo_path) {
                    return advertise_refs(&state, repo).await;
                }
            }
        }
    } else if method == Method::POST {
        if let Some(repo_path) = path.strip_suffix("/git-upload-pack") {
            if let Some(repo) = resolve_repository(&state, repo_path) {
                return upload_pack(&state, repo, req).await;
            }
        }
    }

    (StatusCode::NOT_IMPLEMENTED, "Not Implemented").into_response()
}

/// Check the raw query string for `service=git-upload-pack`.
fn has_upload_pack_service(query: &str) -> bool {
    query.split('&').any(|pair| pair == "service=git-upload-pack")
}

/// Validate a repository request path and resolve it to a handle.
///
/// Rejects empty paths, NUL bytes, and `.`/`..` segments; the registry
/// itself accepts anything it is handed.
fn resolve_repository(state: &AppState, repo_path: &str) -> Option<Arc<Repository>> {
    let trimmed = repo_path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('\0') {
        return None;
    }
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return None;
    }
    Some(state.registry.get(trimmed))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /debug/vars`
fn handle_debug_vars(state: &AppState) -> Response {
    let body = serde_json::to_string_pretty(&state.counters.snapshot())
        .unwrap_or_else(|_| String::from("{}"));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// `GET {repoPath}/info/refs?service=git-upload-pack`
///
/// Synchronizes the mirror, then streams the ref advertisement produced by
/// `git upload-pack --advertise-refs` behind the service announcement.
/// Child errors after the status line has been sent are logged only; the
/// client parses the pkt-line stream and will observe the truncation.
#[instrument(skip_all, fields(repo = %repo.path()))]
async fn advertise_refs(state: &AppState, repo: Arc<Repository>) -> Response {
    if let Err(e) = repo
        .synchronize(state.config.refs_fresh_for, &state.counters)
        .await
    {
        warn!(error = %e, "synchronization failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response();
    }

    // Readers must not observe the mirror mid-synchronization; the owned
    // guard travels with the producer task until the child exits.
    let guard = repo.read_guard().await;

    let command = repo.git(&["upload-pack", "--stateless-rpc", "--advertise-refs", "."]);
    let (mut stdout, mut child) = match command.stream() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "failed to spawn git upload-pack");
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response();
        }
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(8);
    let repo_path = repo.path().to_string();
    tokio::spawn(async move {
        let _guard = guard;

        let mut client_gone = tx
            .send(Ok(Bytes::from_static(SERVICE_ANNOUNCEMENT)))
            .await
            .is_err();

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if !client_gone
                        && tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err()
                    {
                        // Keep draining so the child can run to completion.
                        client_gone = true;
                    }
                }
                Err(e) => {
                    warn!(repo = %repo_path, error = %e, "error reading advertisement from git");
                    break;
                }
            }
        }

        match child.wait().await {
            Ok(status) if !status.success() => {
                warn!(repo = %repo_path, %status, "git upload-pack exited with non-zero status");
            }
            Err(e) => warn!(repo = %repo_path, error = %e, "failed to wait for git upload-pack"),
            _ => {}
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, ADVERTISEMENT_CONTENT_TYPE)],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// `POST {repoPath}/git-upload-pack`
///
/// Reads the whole request (the stateless-RPC exchange is single-round),
/// then serves the response from the pack cache or from a fresh
/// `git upload-pack` run whose captured output is cached for replay.
#[instrument(skip_all, fields(repo = %repo.path()))]
async fn upload_pack(state: &AppState, repo: Arc<Repository>, req: Request) -> Response {
    // Synchronize here too, not only at advertisement: behind a load
    // balancer the advertisement may have been served by another instance
    // that has objects this one lacks.
    if let Err(e) = repo
        .synchronize(state.config.refs_fresh_for, &state.counters)
        .await
    {
        warn!(error = %e, "synchronization failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response();
    }

    let gzipped = req
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    // Fingerprinting happens on the decompressed bytes, so gzipped and
    // plain encodings of the same request share a cache key.
    let client_request = if gzipped {
        match gunzip(&body) {
            Ok(decoded) => Bytes::from(decoded),
            Err(e) => {
                warn!(error = %e, "failed to decode gzip request body");
                return (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response();
            }
        }
    } else {
        body
    };

    log_client_capabilities(repo.path(), &client_request);

    let headers = [
        (header::CONTENT_TYPE, RESULT_CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache"),
    ];

    // Cache lookup and any fresh upload-pack run happen under the reader
    // lock: the mirror must not change between them.
    let _guard = repo.read_guard().await;

    if let Some(cached) = state.pack_cache.get(repo.path(), &client_request) {
        state.counters.record_pack_cache_hit();
        debug!(bytes = cached.len(), "serving upload-pack from cache");
        return (StatusCode::OK, headers, Body::from(cached)).into_response();
    }

    let output = repo
        .git(&["upload-pack", "--stateless-rpc", "."])
        .output(&client_request)
        .await;

    match output {
        Ok(captured) => {
            let response = Bytes::from(captured);
            state
                .pack_cache
                .put(repo.path(), &client_request, response.clone());
            (StatusCode::OK, headers, Body::from(response)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "git upload-pack failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Decode a gzip-compressed request body.
fn gunzip(body: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut decoded)
        .context("failed to decompress gzip request body")?;
    Ok(decoded)
}

/// Log the capability list carried on the request's first-want line.
///
/// Observability only; a malformed first frame does not affect serving.
fn log_client_capabilities(repo: &str, client_request: &[u8]) {
    let mut scanner = PktLineScanner::new(client_request);
    match scanner.next_frame() {
        Ok(Some(frame @ PktLine::Data(_))) => {
            match frame.as_str().and_then(first_want_capabilities) {
                Some(capabilities) => {
                    info!(repo = %repo, ?capabilities, "client capabilities");
                }
                None => warn!(repo = %repo, "first pkt-line is not a first-want line"),
            }
        }
        Ok(_) => warn!(repo = %repo, "request carries no pkt-line data"),
        Err(e) => warn!(repo = %repo, error = %e, "failed to scan request pkt-lines"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_query_matching() {
        assert!(has_upload_pack_service("service=git-upload-pack"));
        assert!(has_upload_pack_service("a=b&service=git-upload-pack"));
        assert!(!has_upload_pack_service(""));
        assert!(!has_upload_pack_service("service=git-receive-pack"));
        assert!(!has_upload_pack_service("service=git-upload-packs"));
    }

    #[test]
    fn service_announcement_is_a_valid_pkt_frame() {
        let frames: Vec<_> = PktLineScanner::new(SERVICE_ANNOUNCEMENT)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            frames,
            vec![
                PktLine::Data(b"# service=git-upload-pack\n".to_vec()),
                PktLine::Flush,
            ]
        );
    }

    #[test]
    fn path_validation() {
        let state = AppState::new(crate::config::Config {
            upstream: "https://git.example.com/".to_string(),
            base_path: std::env::temp_dir().join("mirrorcache-test"),
            listen: "127.0.0.1:0".to_string(),
            refs_fresh_for: std::time::Duration::from_secs(5),
            num_pack_cache: 4,
        });

        assert!(resolve_repository(&state, "/foo/bar").is_some());
        assert!(resolve_repository(&state, "/foo/bar.git").is_some());
        assert!(resolve_repository(&state, "").is_none());
        assert!(resolve_repository(&state, "/").is_none());
        assert!(resolve_repository(&state, "/../etc/passwd").is_none());
        assert!(resolve_repository(&state, "/foo/../bar").is_none());
        assert!(resolve_repository(&state, "/foo//bar").is_none());
        assert!(resolve_repository(&state, "/foo/./bar").is_none());
    }

    #[test]
    fn gunzip_round_trip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write as _;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"0009done\n").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(gunzip(&compressed).unwrap(), b"0009done\n");
        assert!(gunzip(b"definitely not gzip").is_err());
    }
}
