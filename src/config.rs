//! Command-line surface and immutable process configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

/// Caching Git fetch proxy.
///
/// Mirrors upstream repositories locally and fans one upstream
/// synchronization per refresh window out to many concurrent fetchers.
#[derive(Parser, Debug)]
#[command(name = "mirrorcache", version, about = "Caching Git fetch proxy")]
pub struct Cli {
    /// Base URL for upstream repositories; the request path is appended.
    #[arg(long, value_name = "URL")]
    pub upstream: String,

    /// Base directory for locally mirrored repositories.
    #[arg(long, value_name = "DIR")]
    pub base_path: PathBuf,

    /// Address to listen on; a bare `:port` binds all interfaces.
    #[arg(long, value_name = "ADDR", default_value = ":9280")]
    pub listen: String,

    /// How long synchronized refs stay fresh (keep this very short).
    #[arg(
        long,
        value_name = "DURATION",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub refs_fresh_for: Duration,

    /// Number of pack responses kept in the in-memory cache.
    #[arg(long, value_name = "N", default_value_t = 20)]
    pub num_pack_cache: usize,
}

/// Immutable process configuration derived from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub upstream: String,
    pub base_path: PathBuf,
    pub listen: String,
    pub refs_fresh_for: Duration,
    pub num_pack_cache: usize,
}

impl Config {
    /// Validate and normalize the parsed CLI arguments.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        anyhow::ensure!(!cli.upstream.is_empty(), "upstream URL must not be empty");
        anyhow::ensure!(
            !cli.base_path.as_os_str().is_empty(),
            "base path must not be empty"
        );

        // Repository paths are appended by plain concatenation, so the
        // base URL must end with a separator.
        let mut upstream = cli.upstream;
        if !upstream.ends_with('/') {
            upstream.push('/');
        }

        Ok(Self {
            upstream,
            base_path: cli.base_path,
            listen: normalize_listen(&cli.listen),
            refs_fresh_for: cli.refs_fresh_for,
            num_pack_cache: cli.num_pack_cache,
        })
    }
}

/// Expand a bare `:port` listen address to bind all interfaces.
fn normalize_listen(listen: &str) -> String {
    match listen.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => listen.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
