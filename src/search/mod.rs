//! Foreign-package discovery: turning a bare dependency name into a fully
//! resolved [`PackageInfo`], whether that's an AUR package, a `provides`
//! match, or a user-declared custom package.

pub mod mock;
pub mod srcinfo;
pub mod transport;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::native::ProviderSelector;
use crate::types::{DependencySpec, PackageInfo};
use transport::{AurRpcPackage, AurTransport};

/// Turn one AUR RPC result entry into a [`PackageInfo`].
fn package_info_from_rpc(raw: AurRpcPackage, config: &Config) -> Result<PackageInfo> {
    let git_url = format!("{}/{}.git", config.aur_base_url, raw.package_base);
    PackageInfo::new(
        raw.name,
        raw.package_base,
        raw.version,
        Some(git_url),
        None,
        raw.provides,
        raw.depends.into_iter().map(DependencySpec::new).collect(),
        raw.make_depends.into_iter().map(DependencySpec::new).collect(),
        raw.check_depends.into_iter().map(DependencySpec::new).collect(),
    )
}

/// What: Discovers and caches foreign package metadata, mediating between
/// user-declared custom packages and the AUR.
///
/// Inputs: an [`AurTransport`] (real or fake) and a [`Config`] reference.
///
/// Output: [`PackageInfo`] values, shared via `Arc` since the same package
/// may be referenced from many places in a dependency graph.
///
/// Details:
/// - `package_cache` memoizes exact-name lookups, bounded by
///   [`Config::package_cache_capacity`].
/// - `all_providers_cache` remembers, for each dependency name a `provides`
///   search has already been run for, which package names were found to
///   provide it — so a repeated lookup for the same virtual dependency
///   never re-hits the network.
/// - `selected_providers_cache` remembers the *chosen* provider once a
///   [`ProviderSelector`] (or the single-candidate fast path) has picked
///   one, so the same dependency always resolves to the same package
///   within one run.
pub struct Search<'a> {
    transport: Box<dyn AurTransport>,
    config: &'a Config,
    package_cache: Mutex<LruCache<String, Arc<PackageInfo>>>,
    custom_packages: Vec<Arc<PackageInfo>>,
    all_providers_cache: Mutex<HashMap<String, Vec<String>>>,
    selected_providers_cache: Mutex<HashMap<String, Arc<PackageInfo>>>,
}

impl<'a> Search<'a> {
    /// What: Build a `Search` over the given transport and configuration.
    #[must_use]
    pub fn new(transport: Box<dyn AurTransport>, config: &'a Config) -> Self {
        let capacity = NonZeroUsize::new(config.package_cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero"));
        Self {
            transport,
            config,
            package_cache: Mutex::new(LruCache::new(capacity)),
            custom_packages: Vec::new(),
            all_providers_cache: Mutex::new(HashMap::new()),
            selected_providers_cache: Mutex::new(HashMap::new()),
        }
    }

    /// What: Register a user-declared custom package, taking precedence
    /// over any same-named AUR package.
    pub fn add_custom(&mut self, pkg: PackageInfo) {
        self.custom_packages.push(Arc::new(pkg));
    }

    fn find_custom(&self, name: &str) -> Option<Arc<PackageInfo>> {
        self.custom_packages
            .iter()
            .find(|p| p.pkgname == name)
            .cloned()
    }

    /// What: Resolve a package by its exact name.
    ///
    /// Details: checks the in-memory cache, then registered custom
    /// packages, then falls back to a single-name AUR RPC lookup.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no custom package or AUR package has
    /// this exact name. Propagates transport errors otherwise.
    pub async fn get(&self, name: &str) -> Result<Arc<PackageInfo>> {
        if let Some(pkg) = self
            .package_cache
            .lock()
            .expect("search cache mutex should not be poisoned")
            .get(name)
            .cloned()
        {
            return Ok(pkg);
        }
        if let Some(pkg) = self.find_custom(name) {
            return Ok(pkg);
        }

        let response = self.transport.info_one(name).await?;
        let Some(raw) = response.results.into_iter().next() else {
            return Err(Error::NotFound(name.to_string()));
        };
        let pkg = Arc::new(package_info_from_rpc(raw, self.config)?);
        self.package_cache
            .lock()
            .expect("search cache mutex should not be poisoned")
            .put(name.to_string(), pkg.clone());
        Ok(pkg)
    }

    /// What: Bulk-fetch and cache package metadata for `names`, batched to
    /// [`Config::aur_info_batch_size`] names per RPC call.
    ///
    /// Details: also populates `all_providers_cache` with each fetched
    /// package's `provides` entries, so a later [`Search::find_provider`]
    /// call for one of them is served from memory.
    ///
    /// # Errors
    /// Propagates transport errors. Names already satisfied by a custom
    /// package are skipped without a network call.
    pub async fn try_caching(&self, names: &[String]) -> Result<()> {
        let to_fetch: Vec<String> = {
            let cache = self
                .package_cache
                .lock()
                .expect("search cache mutex should not be poisoned");
            names
                .iter()
                .filter(|n| !cache.contains(n.as_str()) && self.find_custom(n).is_none())
                .cloned()
                .collect()
        };
        if to_fetch.is_empty() {
            return Ok(());
        }

        let batch_size = self.config.aur_info_batch_size.max(1);
        for chunk in to_fetch.chunks(batch_size) {
            let response = self.transport.info(chunk).await?;
            let mut cache = self
                .package_cache
                .lock()
                .expect("search cache mutex should not be poisoned");
            let mut providers = self
                .all_providers_cache
                .lock()
                .expect("providers cache mutex should not be poisoned");
            for raw in response.results {
                let pkgname = raw.name.clone();
                let provides = raw.provides.clone();
                let pkg = Arc::new(package_info_from_rpc(raw, self.config)?);
                for provided in &provides {
                    let entry = providers.entry(provided.clone()).or_default();
                    if !entry.contains(&pkgname) {
                        entry.push(pkgname.clone());
                    }
                }
                cache.put(pkgname, pkg);
            }
        }
        Ok(())
    }

    /// What: Resolve a provider for a dependency name that may be a real
    /// package name or a virtual `provides` target.
    ///
    /// Details, in order:
    /// 1. Return the previously-selected provider for this exact
    ///    dependency, if any.
    /// 2. Treat `dependency` as a package name and try an exact lookup.
    /// 3. Gather candidates from the in-memory `provides` index plus
    ///    registered custom packages, falling back to an AUR
    ///    `search?by=provides` call when nothing is known yet.
    /// 4. If more than one candidate remains, defer to `selector`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no package name or provider can be
    /// found for `dependency`. Propagates transport errors otherwise.
    pub async fn find_provider(
        &self,
        dependency: &str,
        selector: &dyn ProviderSelector,
    ) -> Result<Arc<PackageInfo>> {
        if let Some(pkg) = self
            .selected_providers_cache
            .lock()
            .expect("selected providers mutex should not be poisoned")
            .get(dependency)
            .cloned()
        {
            return Ok(pkg);
        }

        if let Ok(pkg) = self.get(dependency).await {
            self.remember_selection(dependency, pkg.clone());
            return Ok(pkg);
        }

        let mut candidates: Vec<String> = self
            .all_providers_cache
            .lock()
            .expect("providers cache mutex should not be poisoned")
            .get(dependency)
            .cloned()
            .unwrap_or_default();
        for custom in &self.custom_packages {
            if custom.provides.iter().any(|p| p == dependency) && !candidates.contains(&custom.pkgname) {
                candidates.push(custom.pkgname.clone());
            }
        }

        if candidates.is_empty() {
            let response = self.transport.search_by_provides(dependency).await?;
            let names: Vec<String> = response.results.iter().map(|r| r.name.clone()).collect();
            self.try_caching(&names).await?;
            candidates = names;
            self.all_providers_cache
                .lock()
                .expect("providers cache mutex should not be poisoned")
                .insert(dependency.to_string(), candidates.clone());
        }

        if candidates.is_empty() {
            return Err(Error::NotFound(dependency.to_string()));
        }

        let chosen_name = if candidates.len() == 1 {
            candidates[0].clone()
        } else {
            let idx = selector.select(dependency, &candidates).await?;
            candidates
                .get(idx)
                .cloned()
                .ok_or_else(|| Error::InvalidInput(format!("selector index {idx} out of range")))?
        };

        let pkg = self.get(&chosen_name).await?;
        self.remember_selection(dependency, pkg.clone());
        Ok(pkg)
    }

    fn remember_selection(&self, dependency: &str, pkg: Arc<PackageInfo>) {
        self.selected_providers_cache
            .lock()
            .expect("selected providers mutex should not be poisoned")
            .insert(dependency.to_string(), pkg);
    }
}
