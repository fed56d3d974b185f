//! Integration tests exercising `Resolver` against a fake AUR transport,
//! the way `tests/deps_integration.rs` exercised the dependency resolver
//! against real and fake pacman data.

use std::collections::HashSet;

use archstate_core::config::Config;
use archstate_core::error::{Error, Result};
use archstate_core::native::{FirstChoiceSelector, NativePackageCapability};
use archstate_core::resolver::Resolver;
use archstate_core::search::mock::{success, FakeAurTransport};
use archstate_core::search::transport::AurRpcPackage;
use archstate_core::search::Search;

fn pkg(name: &str, depends: &[&str]) -> AurRpcPackage {
    AurRpcPackage {
        name: name.to_string(),
        package_base: name.to_string(),
        version: "1.0-1".to_string(),
        depends: depends.iter().map(|s| (*s).to_string()).collect(),
        make_depends: vec![],
        check_depends: vec![],
        provides: vec![],
    }
}

/// Every dependency not prefixed `native-` is treated as foreign, so a test
/// can steer packages into either bucket just by naming them.
struct PrefixNative;

#[async_trait::async_trait]
impl NativePackageCapability for PrefixNative {
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
    async fn installed_foreign_versions(&self) -> Result<std::collections::HashMap<String, String>> {
        Ok(std::collections::HashMap::new())
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
    async fn compare_versions(&self, _installed: &str, _available: &str) -> Result<std::cmp::Ordering> {
        Ok(std::cmp::Ordering::Equal)
    }
}

#[tokio::test]
async fn resolves_a_chain_of_foreign_dependencies_in_build_order() {
    let config = Config::default();
    let transport = FakeAurTransport::new()
        .with_info(&["top"], success(vec![pkg("top", &["mid"])]))
        .with_info(&["mid"], success(vec![pkg("mid", &["leaf"])]))
        .with_info(&["leaf"], success(vec![pkg("leaf", &[])]));
    let search = Search::new(Box::new(transport), &config);
    let native = PrefixNative;
    let selector = FirstChoiceSelector;
    let resolver = Resolver::new(&search, &native, &selector);

    let resolved = resolver
        .resolve_dependencies(&["top".to_string()], &[])
        .await
        .expect("resolution should succeed");

    assert!(resolved.foreign_pkgs.contains("top"));
    assert!(resolved.foreign_dep_pkgs.contains("mid"));
    assert!(resolved.foreign_dep_pkgs.contains("leaf"));

    let pos = |name: &str| resolved.build_order.iter().position(|p| p == name).unwrap();
    assert!(pos("leaf") < pos("mid"), "leaf must build before mid");
    assert!(pos("mid") < pos("top"), "mid must build before top");
}

#[tokio::test]
async fn native_prefixed_dependency_is_routed_to_native_deps_not_foreign() {
    let config = Config::default();
    let transport =
        FakeAurTransport::new().with_info(&["foo"], success(vec![pkg("foo", &["native-glibc"])]));
    let search = Search::new(Box::new(transport), &config);
    let native = PrefixNative;
    let selector = FirstChoiceSelector;
    let resolver = Resolver::new(&search, &native, &selector);

    let resolved = resolver
        .resolve_dependencies(&["foo".to_string()], &[])
        .await
        .expect("resolution should succeed");

    assert!(resolved.native_deps.contains("native-glibc"));
    assert!(!resolved.foreign_dep_pkgs.contains("native-glibc"));
}

#[tokio::test]
async fn a_dependency_cycle_is_reported_as_an_error() {
    let config = Config::default();
    let transport = FakeAurTransport::new()
        .with_info(&["a"], success(vec![pkg("a", &["b"])]))
        .with_info(&["b"], success(vec![pkg("b", &["a"])]));
    let search = Search::new(Box::new(transport), &config);
    let native = PrefixNative;
    let selector = FirstChoiceSelector;
    let resolver = Resolver::new(&search, &native, &selector);

    let result = resolver.resolve_dependencies(&["a".to_string()], &[]).await;
    assert!(matches!(result, Err(Error::DependencyCycle { .. })));
}

#[tokio::test]
async fn an_unknown_package_is_reported_as_not_found() {
    let config = Config::default();
    let transport = FakeAurTransport::new();
    let search = Search::new(Box::new(transport), &config);
    let native = PrefixNative;
    let selector = FirstChoiceSelector;
    let resolver = Resolver::new(&search, &native, &selector);

    let result = resolver.resolve_dependencies(&["does-not-exist".to_string()], &[]).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}
