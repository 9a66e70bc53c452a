//! Repository handles and the upstream synchronizer.
//!
//! Each upstream repository is mirrored once under the base path. The
//! per-repository readers-writer lock serializes synchronization against
//! serving: a synchronization holds the writer half for its full duration
//! (a mirror clone can take seconds), while request handlers hold the
//! reader half for as long as a child process reads the mirror.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use crate::git::GitCommand;
use crate::metrics::Counters;

/// Synchronization state guarded by the repository lock.
#[derive(Debug, Default)]
pub struct SyncState {
    /// Set only after a successful clone or remote update.
    last_synchronized: Option<Instant>,
}

/// One mirrored upstream repository.
///
/// Instances are unique per logical path for the process lifetime; see
/// [`RepoRegistry`](crate::registry::RepoRegistry).
#[derive(Debug)]
pub struct Repository {
    path: String,
    upstream_url: String,
    local_dir: PathBuf,
    state: Arc<RwLock<SyncState>>,
}

impl Repository {
    pub fn new(path: String, upstream_url: String, local_dir: PathBuf) -> Self {
        Self {
            path,
            upstream_url,
            local_dir,
            state: Arc::new(RwLock::new(SyncState::default())),
        }
    }

    /// Logical path, unique within the process.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// A `git` invocation with the mirror as its working directory.
    pub(crate) fn git(&self, args: &[&str]) -> GitCommand {
        GitCommand::new(&self.path, &self.local_dir, args)
    }

    /// Hold the reader half of the repository lock.
    ///
    /// No synchronization can touch the mirror while the guard lives; the
    /// guard is owned so it can travel into a response-producing task.
    pub async fn read_guard(&self) -> OwnedRwLockReadGuard<SyncState> {
        Arc::clone(&self.state).read_owned().await
    }

    /// Bring the local mirror up to date with upstream.
    ///
    /// Skips (and counts the skip) when the previous synchronization is
    /// younger than `fresh_for`, so N concurrent fetchers inside one
    /// refresh window cost upstream at most one synchronization. Callers
    /// waiting on the writer lock behind an in-flight synchronization
    /// observe the fresh timestamp once they get the lock and return
    /// immediately.
    pub async fn synchronize(&self, fresh_for: Duration, counters: &Counters) -> Result<()> {
        let mut state = self.state.write().await;

        if let Some(last) = state.last_synchronized {
            let age = last.elapsed();
            if age < fresh_for {
                counters.record_sync_skipped();
                debug!(repo = %self.path, ?age, "refs still fresh, not synchronizing");
                return Ok(());
            }
        }

        match tokio::fs::metadata(&self.local_dir).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // First contact: mirror-clone into a fresh directory.
                tokio::fs::create_dir_all(&self.local_dir)
                    .await
                    .with_context(|| {
                        format!(
                            "failed to create mirror directory {}",
                            self.local_dir.display()
                        )
                    })?;

                info!(repo = %self.path, upstream = %self.upstream_url, "initializing mirror");
                let cloned = self
                    .git(&["clone", "--mirror", &self.upstream_url, "."])
                    .run()
                    .await;

                match cloned {
                    Ok(()) => {
                        state.last_synchronized = Some(Instant::now());
                        Ok(())
                    }
                    Err(e) => {
                        // Leave nothing behind that would block a retry.
                        if let Err(rm) = tokio::fs::remove_dir_all(&self.local_dir).await {
                            warn!(
                                repo = %self.path,
                                error = %rm,
                                "failed to clean up after failed clone"
                            );
                        }
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e).with_context(|| {
                format!("failed to stat mirror directory {}", self.local_dir.display())
            }),
            Ok(meta) if meta.is_dir() => {
                debug!(repo = %self.path, "updating mirror");
                self.git(&["remote", "update"]).run().await?;
                state.last_synchronized = Some(Instant::now());
                Ok(())
            }
            Ok(_) => anyhow::bail!(
                "mirror path {} is occupied by a non-directory",
                self.local_dir.display()
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
