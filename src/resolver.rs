//! Dependency resolution: turning a set of requested foreign packages into
//! a fully resolved, ordered build plan.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::depgraph::{DepGraph, ForeignPackage};
use crate::error::{Error, Result};
use crate::native::{NativePackageCapability, ProviderSelector};
use crate::search::Search;

/// What: The output of [`Resolver::resolve_dependencies`]: every native and
/// foreign package needed, in dependency order.
#[derive(Debug, Default)]
pub struct ResolvedDependencies {
    /// Native package names required, directly or transitively, by the
    /// resolved foreign packages.
    pub native_deps: BTreeSet<String>,
    /// Foreign packages explicitly requested.
    pub foreign_pkgs: BTreeSet<String>,
    /// Foreign packages pulled in as runtime dependencies.
    pub foreign_dep_pkgs: BTreeSet<String>,
    /// Foreign packages needed only to build other foreign packages; never
    /// installed themselves.
    pub foreign_build_dep_pkgs: BTreeSet<String>,
    /// Package names in build order: safe to build left-to-right.
    pub build_order: Vec<String>,
    /// Every resolved foreign package, keyed by name, carrying its
    /// transitive foreign dependency set.
    pub packages: HashMap<String, ForeignPackage>,
    pkgbases_to_pkgs: HashMap<String, BTreeSet<String>>,
    pkgs_to_pkgbases: HashMap<String, String>,
}

impl ResolvedDependencies {
    fn new() -> Self {
        Self::default()
    }

    /// What: Record which pkgbase a pkgname belongs to.
    pub fn add_pkgbase_info(&mut self, pkgname: String, pkgbase: String) {
        self.pkgbases_to_pkgs
            .entry(pkgbase.clone())
            .or_default()
            .insert(pkgname.clone());
        self.pkgs_to_pkgbases.insert(pkgname, pkgbase);
    }

    /// What: The pkgbase a pkgname belongs to, if known.
    #[must_use]
    pub fn get_pkgbase(&self, pkgname: &str) -> Option<&str> {
        self.pkgs_to_pkgbases.get(pkgname).map(String::as_str)
    }

    /// What: Every pkgname sharing a pkgbase with `pkgname`.
    #[must_use]
    pub fn get_pkgs_with_common_pkgbase(&self, pkgname: &str) -> BTreeSet<String> {
        self.get_pkgbase(pkgname)
            .and_then(|base| self.pkgbases_to_pkgs.get(base))
            .cloned()
            .unwrap_or_default()
    }

    /// What: Every pkgbase touched by this resolution.
    #[must_use]
    pub fn all_pkgbases(&self) -> Vec<String> {
        self.pkgbases_to_pkgs.keys().cloned().collect()
    }

    /// What: Some pkgname belonging to `pkgbase` (any one will do, since a
    /// split-package build produces them all together).
    #[must_use]
    pub fn get_some_pkgname(&self, pkgbase: &str) -> Option<String> {
        self.pkgbases_to_pkgs
            .get(pkgbase)
            .and_then(|names| names.iter().next().cloned())
    }
}

/// What: Drives [`Search`] and [`DepGraph`] together to resolve a set of
/// requested foreign packages into a [`ResolvedDependencies`] build plan.
///
/// Details:
/// - Traversal is a depth-first stack walk (`to_process` is popped from the
///   back), matching the reconciliation tool's own traversal order exactly;
///   this only affects *progress reporting* order, not the final build
///   order, which always comes from repeatedly draining the graph's
///   childless frontier.
pub struct Resolver<'a> {
    search: &'a Search<'a>,
    native: &'a dyn NativePackageCapability,
    selector: &'a dyn ProviderSelector,
}

impl<'a> Resolver<'a> {
    /// What: Build a resolver over the given search, native-package
    /// capability, and provider selector.
    #[must_use]
    pub fn new(
        search: &'a Search<'a>,
        native: &'a dyn NativePackageCapability,
        selector: &'a dyn ProviderSelector,
    ) -> Self {
        Self { search, native, selector }
    }

    /// What: Resolve `foreign_pkgs` (to be installed explicitly) and
    /// `foreign_dep_pkgs` (to be installed as dependencies) into a complete
    /// build plan.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if any requested or transitively-required
    /// package/provider cannot be found. Returns [`Error::DependencyCycle`]
    /// if the dependency graph is not a DAG. Propagates transport and
    /// native-capability errors otherwise.
    pub async fn resolve_dependencies(
        &self,
        foreign_pkgs: &[String],
        foreign_dep_pkgs: &[String],
    ) -> Result<ResolvedDependencies> {
        let mut result = ResolvedDependencies::new();
        result.foreign_pkgs = foreign_pkgs.iter().cloned().collect();
        result.foreign_dep_pkgs = foreign_dep_pkgs.iter().cloned().collect();

        let mut graph = DepGraph::new();
        let initial: Vec<String> = foreign_pkgs
            .iter()
            .chain(foreign_dep_pkgs.iter())
            .cloned()
            .collect();
        for name in &initial {
            graph.add_requirement(name, None)?;
        }

        let mut seen: HashSet<String> = initial.iter().cloned().collect();
        let mut to_process: Vec<String> = initial.clone();
        let mut total_processed = 0usize;

        self.search.try_caching(&to_process).await?;

        while let Some(pkgname) = to_process.pop() {
            let info = self.search.get(&pkgname).await?;

            result.native_deps.extend(info.native_dependencies(self.native).await?);
            result.add_pkgbase_info(pkgname.clone(), info.pkgbase.clone());

            let mut build_deps = info.foreign_make_dependencies(self.native).await?;
            build_deps.extend(info.foreign_check_dependencies(self.native).await?);
            let foreign_deps = info.foreign_dependencies(self.native).await?;

            let mut to_cache = foreign_deps.clone();
            to_cache.extend(build_deps.iter().cloned());
            self.search.try_caching(&to_cache).await?;

            for depname in &foreign_deps {
                self.process_dep(
                    &pkgname,
                    depname,
                    &mut graph,
                    &mut result.foreign_dep_pkgs,
                    &mut seen,
                    &mut to_process,
                )
                .await?;
            }
            for depname in &build_deps {
                self.process_dep(
                    &pkgname,
                    depname,
                    &mut graph,
                    &mut result.foreign_build_dep_pkgs,
                    &mut seen,
                    &mut to_process,
                )
                .await?;
            }

            total_processed += 1;
            tracing::debug!(
                total_processed,
                total_seen = seen.len(),
                "dependency resolution progress"
            );
        }

        tracing::info!("determining build order");
        loop {
            let drained = graph.drain_outer();
            if drained.is_empty() {
                break;
            }
            for pkg in drained {
                if let std::collections::hash_map::Entry::Vacant(entry) =
                    result.packages.entry(pkg.name.clone())
                {
                    result.build_order.push(pkg.name.clone());
                    entry.insert(pkg);
                }
            }
        }

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_dep(
        &self,
        pkgname: &str,
        depname: &str,
        graph: &mut DepGraph,
        add_to: &mut BTreeSet<String>,
        seen: &mut HashSet<String>,
        to_process: &mut Vec<String>,
    ) -> Result<()> {
        let dep_info = self
            .search
            .find_provider(depname, self.selector)
            .await
            .map_err(|_| Error::NotFound(depname.to_string()))?;

        add_to.insert(dep_info.pkgname.clone());
        graph.add_requirement(&dep_info.pkgname, Some(pkgname))?;
        if seen.insert(dep_info.pkgname.clone()) {
            to_process.push(dep_info.pkgname.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::native::FirstChoiceSelector;
    use crate::search::mock::{empty, success, FakeAurTransport};
    use crate::search::transport::AurRpcPackage;
    use async_trait::async_trait;
    use std::cmp::Ordering;

    /// A native capability fake for resolver tests: anything whose bare
    /// name starts with `"native-"` is treated as pacman-installable, and
    /// everything else must be built.
    struct AllForeignNative;

    #[async_trait]
    impl NativePackageCapability for AllForeignNative {
        async fn is_installable(&self, dependency: &str) -> Result<bool> {
            Ok(dependency.starts_with("native-"))
        }
        async fn installed_native_explicit(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        async fn installed_foreign_explicit(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        async fn foreign_orphans(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        async fn installed_foreign_versions(&self) -> Result<HashMap<String, String>> {
            Ok(HashMap::new())
        }
        async fn dependants(&self, _pkg: &str) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        async fn install_dependencies(&self, _names: &HashSet<String>) -> Result<()> {
            Ok(())
        }
        async fn install_files(
            &self,
            _files: &[std::path::PathBuf],
            _as_explicit: &HashSet<String>,
        ) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _names: &HashSet<String>) -> Result<()> {
            Ok(())
        }
        async fn mark_as_dependency(&self, _names: &HashSet<String>) -> Result<()> {
            Ok(())
        }
        async fn compare_versions(&self, _installed: &str, _available: &str) -> Result<Ordering> {
            Ok(Ordering::Equal)
        }
    }

    fn pkg(name: &str, pkgbase: &str, depends: Vec<&str>) -> AurRpcPackage {
        AurRpcPackage {
            name: name.to_string(),
            package_base: pkgbase.to_string(),
            version: "1.0-1".to_string(),
            depends: depends.into_iter().map(str::to_string).collect(),
            make_depends: vec![],
            check_depends: vec![],
            provides: vec![],
        }
    }

    #[tokio::test]
    async fn resolves_a_linear_dependency_chain_in_build_order() {
        let config = Config::default();
        let transport = FakeAurTransport::new()
            .with_info(&["top"], success(vec![pkg("top", "top", vec!["middle"])]))
            .with_info_one("middle", success(vec![pkg("middle", "middle", vec!["bottom"])]))
            .with_info_one("bottom", success(vec![pkg("bottom", "bottom", vec![])]))
            .with_info(&["middle"], success(vec![pkg("middle", "middle", vec!["bottom"])]))
            .with_info(&["bottom"], success(vec![pkg("bottom", "bottom", vec![])]));
        let search = Search::new(Box::new(transport), &config);
        let native = AllForeignNative;
        let selector = FirstChoiceSelector;
        let resolver = Resolver::new(&search, &native, &selector);

        let resolved = resolver
            .resolve_dependencies(&["top".to_string()], &[])
            .await
            .expect("resolves");

        assert_eq!(resolved.build_order, vec!["bottom", "middle", "top"]);
        assert!(resolved.foreign_dep_pkgs.contains("middle"));
        assert!(resolved.foreign_dep_pkgs.contains("bottom"));
        assert!(resolved.foreign_pkgs.contains("top"));
    }

    #[tokio::test]
    async fn native_dependencies_are_not_added_to_the_foreign_graph() {
        let config = Config::default();
        let transport = FakeAurTransport::new().with_info(
            &["solo"],
            success(vec![pkg("solo", "solo", vec!["native-lib"])]),
        );
        let search = Search::new(Box::new(transport), &config);
        let native = AllForeignNative;
        let selector = FirstChoiceSelector;
        let resolver = Resolver::new(&search, &native, &selector);

        let resolved = resolver
            .resolve_dependencies(&["solo".to_string()], &[])
            .await
            .expect("resolves");

        assert_eq!(resolved.build_order, vec!["solo"]);
        assert!(resolved.native_deps.contains("native-lib"));
        assert!(resolved.foreign_dep_pkgs.is_empty());
    }

    #[tokio::test]
    async fn missing_dependency_is_reported_as_not_found() {
        let config = Config::default();
        let transport = FakeAurTransport::new()
            .with_info(&["solo"], success(vec![pkg("solo", "solo", vec!["ghost"])]))
            .with_info_one("ghost", empty())
            .with_search("ghost", empty());
        let search = Search::new(Box::new(transport), &config);
        let native = AllForeignNative;
        let selector = FirstChoiceSelector;
        let resolver = Resolver::new(&search, &native, &selector);

        let err = resolver
            .resolve_dependencies(&["solo".to_string()], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
