//! Persistent, atomically-saved key-value state.
//!
//! Mirrors the on-disk format and save discipline of the reconciliation
//! tool this crate's algorithms are grounded on: a single JSON file,
//! sets round-tripped through a `{"__type__":"set","items":[...]}`
//! envelope, written via a sibling temp file + `fsync` + `rename` so a
//! crash mid-write never corrupts the previous, valid state.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::ser::SerializeMap as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::Result;

/// A value stored in the [`Store`]. A small tagged union covering every
/// shape the reconciliation core actually persists.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreValue {
    /// Absence of a value, distinct from the key being unset.
    Null,
    /// A boolean flag.
    Bool(bool),
    /// A signed integer (timestamps, counters).
    Integer(i64),
    /// A UTF-8 string (commit ids, paths, versions).
    String(String),
    /// An ordered list of values (cache entry tuples, build orders).
    List(Vec<StoreValue>),
    /// A string-keyed map of values (per-module fingerprints, the reviewed
    /// commit map, the package file cache).
    Map(BTreeMap<String, StoreValue>),
    /// An unordered set of strings, persisted via the tagged-set envelope.
    Set(BTreeSet<String>),
}

impl StoreValue {
    /// What: Borrow this value as a map, if it is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, StoreValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// What: Mutably borrow this value as a map, if it is one.
    #[must_use]
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, StoreValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// What: Borrow this value as a set, if it is one.
    #[must_use]
    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    /// What: Borrow this value as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// What: Borrow this value as a list, if it is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&[StoreValue]> {
        match self {
            Self::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    // Store only ever writes integral timestamps/counters;
                    // anything else round-trips as its string form.
                    Self::String(n.to_string())
                }
            }
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(obj) => {
                if obj.get("__type__").and_then(Value::as_str) == Some("set") {
                    if let Some(Value::Array(items)) = obj.get("items") {
                        let set = items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect();
                        return Self::Set(set);
                    }
                }
                let map = obj
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect();
                Self::Map(map)
            }
        }
    }
}

impl Serialize for StoreValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => items.serialize(serializer),
            Self::Map(map) => map.serialize(serializer),
            Self::Set(set) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("__type__", "set")?;
                map.serialize_entry("items", &set.iter().collect::<Vec<_>>())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for StoreValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer).map_err(D::Error::custom)?;
        Ok(Self::from_json(value))
    }
}

impl From<String> for StoreValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<BTreeSet<String>> for StoreValue {
    fn from(s: BTreeSet<String>) -> Self {
        Self::Set(s)
    }
}

/// What: Persistent, atomically-saved key-value state.
///
/// Inputs: constructed via [`Store::open`].
///
/// Output: an in-memory map mirrored to `path` on [`Store::save`].
///
/// Details:
/// - Loading a nonexistent path starts with an empty store, matching the
///   tool's "first run" behaviour.
/// - `save` is a no-op in dry-run mode, so speculative reconciliation runs
///   never touch disk.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    dry_run: bool,
    data: BTreeMap<String, StoreValue>,
}

impl Store {
    /// What: Load a store from `path`, or start empty if it does not exist.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::Io`] or
    /// [`crate::error::Error::Json`] if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>, dry_run: bool) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, dry_run, data })
    }

    /// What: Fetch a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StoreValue> {
        self.data.get(key)
    }

    /// What: Fetch a value by key, mutably.
    #[must_use]
    pub fn get_mut(&mut self, key: &str) -> Option<&mut StoreValue> {
        self.data.get_mut(key)
    }

    /// What: Set a value, overwriting whatever was there before.
    pub fn put(&mut self, key: impl Into<String>, value: StoreValue) {
        self.data.insert(key.into(), value);
    }

    /// What: Insert `default` under `key` if absent, and return a mutable
    /// reference to the (possibly just-inserted) value.
    pub fn ensure(&mut self, key: impl Into<String>, default: StoreValue) -> &mut StoreValue {
        self.data.entry(key.into()).or_insert(default)
    }

    /// What: Whether dry-run mode is active (saves become no-ops).
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// What: Atomically persist the current state to `path`.
    ///
    /// Details:
    /// - No-op in dry-run mode.
    /// - Creates parent directories as needed.
    /// - Writes to a sibling temporary file in the same directory, flushes
    ///   and `fsync`s it, then renames it over the destination, so a crash
    ///   mid-write can never leave a partially-written store file.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::Io`] or
    /// [`crate::error::Error::Json`] on any filesystem or serialization
    /// failure.
    pub fn save(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let parent = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::fs::create_dir_all(&parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer_pretty(&mut tmp, &self.data)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// What: The fingerprint set last recorded for `module_name` under
    /// `kind` (e.g. `"aur_packages_for_module"` or
    /// `"custom_packages_for_module"`), if any.
    #[must_use]
    pub fn module_fingerprint(&self, kind: &str, module_name: &str) -> Option<&BTreeSet<String>> {
        self.get(kind)?.as_map()?.get(module_name)?.as_set()
    }

    /// What: Record `names` as the current fingerprint for `module_name`
    /// under `kind`.
    ///
    /// Output: `true` if this differs from the previously recorded
    /// fingerprint (or none was recorded), the module-changed signal the
    /// reconciliation tool's own `_changed` flag is built from.
    pub fn set_module_fingerprint(
        &mut self,
        kind: &str,
        module_name: &str,
        names: BTreeSet<String>,
    ) -> bool {
        self.ensure(kind.to_string(), StoreValue::Map(BTreeMap::new()));
        let map = self
            .get_mut(kind)
            .and_then(StoreValue::as_map_mut)
            .expect("just ensured");
        let changed = map.get(module_name).and_then(StoreValue::as_set) != Some(&names);
        map.insert(module_name.to_string(), StoreValue::Set(names));
        changed
    }

    /// What: Run `body` against this store, then save unconditionally,
    /// even if `body` returned an error.
    ///
    /// Details:
    /// - Mirrors the reconciliation tool's scoped store acquisition: the
    ///   save always happens on scope exit (including after an error); a
    ///   save failure masking a prior body error is an accepted tradeoff,
    ///   matching the ground-truth behaviour exactly (see `DESIGN.md`).
    ///
    /// # Errors
    /// Returns `body`'s error if it failed; otherwise returns `save`'s
    /// error if saving failed.
    pub fn scoped<F, T>(&mut self, body: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let result = body(self);
        self.save()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_reopen_round_trips_a_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let mut store = Store::open(&path, false).expect("open empty");
        let mut set = BTreeSet::new();
        set.insert("foo".to_string());
        set.insert("bar".to_string());
        store.put("ignored_packages", StoreValue::Set(set.clone()));
        store.save().expect("save");

        let reopened = Store::open(&path, false).expect("reopen");
        let value = reopened.get("ignored_packages").expect("present");
        assert_eq!(value.as_set(), Some(&set));
    }

    #[test]
    fn dry_run_save_does_not_write_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let mut store = Store::open(&path, true).expect("open empty");
        store.put("key", StoreValue::String("value".to_string()));
        store.save().expect("save is a no-op");

        assert!(!path.exists());
    }

    #[test]
    fn ensure_inserts_default_only_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let mut store = Store::open(&path, true).expect("open empty");

        store.ensure("counters", StoreValue::Map(BTreeMap::new()));
        if let Some(map) = store.get_mut("counters").and_then(StoreValue::as_map_mut) {
            map.insert("a".to_string(), StoreValue::Integer(1));
        }
        store.ensure("counters", StoreValue::Map(BTreeMap::new()));

        let map = store.get("counters").and_then(StoreValue::as_map).expect("map");
        assert_eq!(map.get("a"), Some(&StoreValue::Integer(1)));
    }

    #[test]
    fn set_module_fingerprint_reports_change_and_persists_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let mut store = Store::open(&path, true).expect("open empty");

        let first = BTreeSet::from(["yay".to_string()]);
        let changed = store.set_module_fingerprint("aur_packages_for_module", "gaming", first.clone());
        assert!(changed, "first write always counts as a change");
        assert_eq!(
            store.module_fingerprint("aur_packages_for_module", "gaming"),
            Some(&first)
        );

        let unchanged = store.set_module_fingerprint("aur_packages_for_module", "gaming", first.clone());
        assert!(!unchanged);

        let second = BTreeSet::from(["yay".to_string(), "paru".to_string()]);
        let changed_again = store.set_module_fingerprint("aur_packages_for_module", "gaming", second);
        assert!(changed_again);
    }

    #[test]
    fn module_fingerprint_is_none_for_unknown_module() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = Store::open(&path, true).expect("open empty");
        assert!(store.module_fingerprint("aur_packages_for_module", "nope").is_none());
    }

    #[test]
    fn scoped_saves_even_when_body_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let mut store = Store::open(&path, false).expect("open empty");

        let result: Result<()> = store.scoped(|s| {
            s.put("partial", StoreValue::Bool(true));
            Err(crate::error::Error::Aborted("user declined".to_string()))
        });
        assert!(result.is_err());
        assert!(path.exists(), "save must still happen on error exit");

        let reopened = Store::open(&path, false).expect("reopen");
        assert_eq!(reopened.get("partial"), Some(&StoreValue::Bool(true)));
    }
}
