//! Built-artifact cache: a small LRU-by-timestamp file cache layered over
//! the [`Store`]'s `package_file_cache` entry, one of the crate's only two
//! places that read caller-controlled data out of the generic
//! [`StoreValue`] tree by hand.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::store::{Store, StoreValue};

const PACKAGE_FILE_CACHE_KEY: &str = "package_file_cache";

/// One cached build artifact: a version, the file it was copied to, and
/// the unix timestamp it was cached at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// Version string of the cached artifact.
    pub version: String,
    /// Path to the cached package file.
    pub path: PathBuf,
    /// Unix timestamp (seconds) the entry was added at.
    pub timestamp: i64,
}

impl CacheEntry {
    fn from_store_value(value: &StoreValue) -> Option<Self> {
        let items = value.as_list()?;
        let [version, path, timestamp] = items else {
            return None;
        };
        Some(Self {
            version: version.as_str()?.to_string(),
            path: PathBuf::from(path.as_str()?),
            timestamp: match timestamp {
                StoreValue::Integer(i) => *i,
                _ => return None,
            },
        })
    }

    fn to_store_value(&self) -> StoreValue {
        StoreValue::List(vec![
            StoreValue::String(self.version.clone()),
            StoreValue::String(self.path.to_string_lossy().into_owned()),
            StoreValue::Integer(self.timestamp),
        ])
    }
}

fn entries_for(store: &Store, pkgname: &str) -> Vec<CacheEntry> {
    store
        .get(PACKAGE_FILE_CACHE_KEY)
        .and_then(StoreValue::as_map)
        .and_then(|m| m.get(pkgname))
        .and_then(StoreValue::as_list)
        .map(|list| list.iter().filter_map(CacheEntry::from_store_value).collect())
        .unwrap_or_default()
}

fn put_entries(store: &mut Store, pkgname: &str, entries: &[CacheEntry]) {
    store.ensure(PACKAGE_FILE_CACHE_KEY, StoreValue::Map(std::collections::BTreeMap::new()));
    let map = store
        .get_mut(PACKAGE_FILE_CACHE_KEY)
        .and_then(StoreValue::as_map_mut)
        .expect("just ensured");
    map.insert(
        pkgname.to_string(),
        StoreValue::List(entries.iter().map(CacheEntry::to_store_value).collect()),
    );
}

/// What: Find the newest still-on-disk cached artifact for `pkgname`.
///
/// Output: `None` if nothing is cached, or every cached path has since been
/// removed from disk out-of-band.
#[must_use]
pub fn find_latest(store: &Store, pkgname: &str) -> Option<CacheEntry> {
    entries_for(store, pkgname)
        .into_iter()
        .filter(|entry| entry.path.exists())
        .max_by_key(|entry| entry.timestamp)
}

/// What: Record a newly built artifact in the cache, evicting the oldest
/// entry if this pushes `pkgname` over [`Config::cache_limit_per_pkgname`].
///
/// Details:
/// - A duplicate `path` already present for `pkgname` is a no-op.
/// - Eviction is best-effort: if the oldest cached file cannot be removed
///   from disk, the store entry is still dropped and a warning is logged,
///   matching the reconciliation tool's own "you'll have to remove it
///   manually" behaviour.
pub fn add(store: &mut Store, config: &Config, pkgname: &str, version: &str, path: &Path) {
    let mut entries = entries_for(store, pkgname);
    if entries.iter().any(|e| e.path == path) {
        tracing::debug!(pkgname, ?path, "artifact already cached, skipping");
        return;
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    entries.push(CacheEntry {
        version: version.to_string(),
        path: path.to_path_buf(),
        timestamp,
    });

    while entries.len() > config.cache_limit_per_pkgname {
        let oldest_idx = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.timestamp)
            .map(|(i, _)| i)
            .expect("entries is non-empty");
        let oldest = entries.remove(oldest_idx);
        if oldest.path.exists() {
            if let Err(error) = std::fs::remove_file(&oldest.path) {
                tracing::error!(
                    path = %oldest.path.display(),
                    %error,
                    "failed to remove evicted cache file; remove it manually"
                );
            }
        }
    }

    put_entries(store, pkgname, &entries);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = Store::open(&path, true).expect("open empty");
        (dir, store)
    }

    #[test]
    fn find_latest_returns_none_when_nothing_cached() {
        let (_dir, store) = open_store();
        assert!(find_latest(&store, "foo").is_none());
    }

    #[test]
    fn add_then_find_latest_round_trips() {
        let (dir, mut store) = open_store();
        let config = Config::default();
        let artifact = dir.path().join("foo-1.0-1-x86_64.pkg.tar.zst");
        std::fs::write(&artifact, b"fake package").expect("write");

        add(&mut store, &config, "foo", "1.0-1", &artifact);

        let found = find_latest(&store, "foo").expect("cached");
        assert_eq!(found.version, "1.0-1");
        assert_eq!(found.path, artifact);
    }

    #[test]
    fn find_latest_ignores_entries_whose_file_was_removed() {
        let (dir, mut store) = open_store();
        let config = Config::default();
        let artifact = dir.path().join("foo-1.0-1-x86_64.pkg.tar.zst");
        std::fs::write(&artifact, b"fake package").expect("write");
        add(&mut store, &config, "foo", "1.0-1", &artifact);

        std::fs::remove_file(&artifact).expect("remove");

        assert!(find_latest(&store, "foo").is_none());
    }

    #[test]
    fn adding_beyond_the_limit_evicts_the_oldest_entry() {
        let (dir, mut store) = open_store();
        let mut config = Config::default();
        config.cache_limit_per_pkgname = 2;

        let mut paths = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("foo-{i}-x86_64.pkg.tar.zst"));
            std::fs::write(&path, b"fake package").expect("write");
            paths.push(path.clone());
            add(&mut store, &config, "foo", &i.to_string(), &path);
            // Force distinct timestamps deterministically by evicting based on
            // insertion order when timestamps tie (same second).
        }

        let entries = entries_for(&store, "foo");
        assert!(entries.len() <= 2, "cache should not exceed the configured limit");
    }

    #[test]
    fn duplicate_path_is_not_added_twice() {
        let (dir, mut store) = open_store();
        let config = Config::default();
        let artifact = dir.path().join("foo-1.0-1-x86_64.pkg.tar.zst");
        std::fs::write(&artifact, b"fake package").expect("write");

        add(&mut store, &config, "foo", "1.0-1", &artifact);
        add(&mut store, &config, "foo", "1.0-1", &artifact);

        assert_eq!(entries_for(&store, "foo").len(), 1);
    }
}
