//! Caching Git fetch proxy.
//!
//! Speaks the smart-HTTP upload-pack half of the Git wire protocol to
//! clients while keeping a bare mirror of each upstream repository under a
//! local base path. Concurrent fetchers inside one refresh window share a
//! single upstream synchronization, and identical upload-pack requests
//! replay a cached response.

pub mod cache;
pub mod config;
pub mod git;
pub mod http;
pub mod metrics;
pub mod pktline;
pub mod registry;
pub mod repo;

use std::sync::Arc;

use crate::cache::PackCache;
use crate::config::Config;
use crate::metrics::Counters;
use crate::registry::RepoRegistry;

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RepoRegistry>,
    pub pack_cache: Arc<PackCache>,
    pub counters: Arc<Counters>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        Self {
            registry: Arc::new(RepoRegistry::new(&config)),
            pack_cache: Arc::new(PackCache::new(config.num_pack_cache)),
            counters: Arc::new(Counters::new()),
            config,
        }
    }
}
