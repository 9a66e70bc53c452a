//! In-memory LRU cache of upload-pack responses.
//!
//! Keyed by the repository's logical path plus the SHA-1 digest of the
//! exact client request body: identical stateless-RPC requests against the
//! same (unchanged) mirror are deterministic, so the captured response can
//! be replayed byte for byte.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};

/// Bounded cache of captured `git upload-pack` responses.
pub struct PackCache {
    inner: Mutex<LruCache<Vec<u8>, Bytes>>,
}

impl PackCache {
    /// Create a cache holding at most `capacity` responses (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    // Key layout: <logical path> NUL <20-byte request digest>. The NUL
    // cannot occur in a repository path, so keys cannot collide across
    // repositories.
    fn key(repo_path: &str, client_request: &[u8]) -> Vec<u8> {
        let digest = Sha1::digest(client_request);
        let mut key = Vec::with_capacity(repo_path.len() + 1 + digest.len());
        key.extend_from_slice(repo_path.as_bytes());
        key.push(0);
        key.extend_from_slice(&digest);
        key
    }

    /// Look up the captured response for `client_request`, refreshing its
    /// recency on hit.
    pub fn get(&self, repo_path: &str, client_request: &[u8]) -> Option<Bytes> {
        self.inner
            .lock()
            .get(&Self::key(repo_path, client_request))
            .cloned()
    }

    /// Store a captured response, evicting the least recently used entry
    /// when over capacity.
    pub fn put(&self, repo_path: &str, client_request: &[u8], response: Bytes) {
        self.inner
            .lock()
            .put(Self::key(repo_path, client_request), response);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
