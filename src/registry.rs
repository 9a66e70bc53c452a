//! Process-wide repository registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::repo::Repository;

/// Maps request paths to live repository handles.
///
/// Handles are created on first reference and never dropped, so every
/// request for the same logical path shares one instance and therefore
/// one repository lock.
pub struct RepoRegistry {
    upstream: String,
    base_path: PathBuf,
    repos: Mutex<HashMap<String, Arc<Repository>>>,
}

impl RepoRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            upstream: config.upstream.clone(),
            base_path: config.base_path.clone(),
            repos: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `path` to its repository handle, creating it on first use.
    ///
    /// A trailing `.git` is accepted and stripped, so `foo/bar` and
    /// `foo/bar.git` resolve to the same mirror. The HTTP dispatcher is
    /// responsible for rejecting traversal attempts before they get here.
    pub fn get(&self, path: &str) -> Arc<Repository> {
        let logical = path.strip_suffix(".git").unwrap_or(path);

        let mut repos = self.repos.lock();
        Arc::clone(repos.entry(logical.to_string()).or_insert_with(|| {
            let upstream_url = format!("{}{}", self.upstream, logical);
            let mut local_dir = self.base_path.clone();
            for segment in logical.split('/').filter(|s| !s.is_empty()) {
                local_dir.push(segment);
            }
            Arc::new(Repository::new(
                logical.to_string(),
                upstream_url,
                local_dir,
            ))
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RepoRegistry {
        RepoRegistry {
            upstream: "https://git.example.com/".to_string(),
            base_path: PathBuf::from("/var/cache/mirrors"),
            repos: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn same_path_yields_same_instance() {
        let registry = registry();
        let a = registry.get("foo/bar");
        let b = registry.get("foo/bar");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn git_suffix_is_stripped() {
        let registry = registry();
        let plain = registry.get("foo/bar");
        let suffixed = registry.get("foo/bar.git");
        assert!(Arc::ptr_eq(&plain, &suffixed));
        assert_eq!(plain.path(), "foo/bar");
    }

    #[test]
    fn distinct_paths_yield_distinct_instances() {
        let registry = registry();
        let a = registry.get("foo/bar");
        let b = registry.get("foo/baz");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn derives_upstream_url_and_local_dir() {
        let registry = registry();
        let repo = registry.get("acme/widgets.git");
        assert_eq!(repo.upstream_url(), "https://git.example.com/acme/widgets");
        assert_eq!(
            repo.local_dir(),
            PathBuf::from("/var/cache/mirrors/acme/widgets").as_path()
        );
    }
}
