//! Integration tests exercising `Reconciler::apply` end-to-end (minus the
//! live system) against fakes for every capability trait, the way
//! `tests/deps_integration.rs` exercised the reconciliation tool's
//! higher-level flows against fake pacman state.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use archstate_core::config::Config;
use archstate_core::error::Result;
use archstate_core::native::{AlwaysApprove, CommandOutput, CommandRunner, FirstChoiceSelector, NativePackageCapability, RunOptions};
use archstate_core::reconciler::{ApplyOptions, DesiredState, Reconciler};
use archstate_core::search::mock::{success, FakeAurTransport};
use archstate_core::search::transport::AurRpcPackage;
use archstate_core::search::Search;
use archstate_core::store::Store;

fn pkg(name: &str, version: &str) -> AurRpcPackage {
    AurRpcPackage {
        name: name.to_string(),
        package_base: name.to_string(),
        version: version.to_string(),
        depends: vec![],
        make_depends: vec![],
        check_depends: vec![],
        provides: vec![],
    }
}

#[derive(Default)]
struct FakeNative {
    native_explicit: HashSet<String>,
    foreign_explicit: Mutex<HashSet<String>>,
    foreign_versions: Mutex<HashMap<String, String>>,
    orphans: HashSet<String>,
    dependants: HashMap<String, HashSet<String>>,
}

#[async_trait::async_trait]
impl NativePackageCapability for FakeNative {
    async fn is_installable(&self, _dependency: &str) -> Result<bool> {
        Ok(false)
    }
    async fn installed_native_explicit(&self) -> Result<HashSet<String>> {
        Ok(self.native_explicit.clone())
    }
    async fn installed_foreign_explicit(&self) -> Result<HashSet<String>> {
        Ok(self.foreign_explicit.lock().expect("lock").clone())
    }
    async fn foreign_orphans(&self) -> Result<HashSet<String>> {
        Ok(self.orphans.clone())
    }
    async fn installed_foreign_versions(&self) -> Result<HashMap<String, String>> {
        Ok(self.foreign_versions.lock().expect("lock").clone())
    }
    async fn dependants(&self, pkg: &str) -> Result<HashSet<String>> {
        Ok(self.dependants.get(pkg).cloned().unwrap_or_default())
    }
    async fn install_dependencies(&self, _names: &HashSet<String>) -> Result<()> {
        Ok(())
    }
    async fn install_files(&self, _files: &[PathBuf], _as_explicit: &HashSet<String>) -> Result<()> {
        Ok(())
    }
    async fn remove(&self, _names: &HashSet<String>) -> Result<()> {
        Ok(())
    }
    async fn mark_as_dependency(&self, _names: &HashSet<String>) -> Result<()> {
        Ok(())
    }
    async fn compare_versions(&self, installed: &str, available: &str) -> Result<Ordering> {
        Ok(installed.cmp(available))
    }
}

struct NoopRunner;

#[async_trait::async_trait]
impl CommandRunner for NoopRunner {
    async fn run(&self, _argv: &[String], _opts: RunOptions) -> Result<CommandOutput> {
        Ok(CommandOutput { status: 0, stdout_and_stderr: String::new() })
    }
}

fn open_store(name: &str) -> Store {
    let path = std::env::temp_dir().join(format!(
        "archstate-core-reconciler-integration-{name}-{}.json",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    Store::open(&path, true).expect("open fresh store")
}

#[tokio::test]
async fn dry_run_upgrade_reports_a_newer_package_without_touching_native_state() {
    let config = Config::default();
    let transport = FakeAurTransport::new().with_info(&["vim-devtools"], success(vec![pkg("vim-devtools", "2.0-1")]));
    let search = Search::new(Box::new(transport), &config);

    let native = FakeNative {
        foreign_explicit: Mutex::new(HashSet::from(["vim-devtools".to_string()])),
        foreign_versions: Mutex::new(HashMap::from([("vim-devtools".to_string(), "1.0-1".to_string())])),
        ..Default::default()
    };
    let runner = NoopRunner;
    let reviewer = AlwaysApprove;
    let selector = FirstChoiceSelector;
    let reconciler = Reconciler::new(&config, &search, &native, &runner, &reviewer, &selector);

    let mut desired = DesiredState::default();
    desired.packages.insert("vim-devtools".to_string());
    let mut store = open_store("upgrade");
    let opts = ApplyOptions { dry_run: true, ..Default::default() };

    let report = reconciler
        .apply(&desired, &mut store, opts)
        .await
        .expect("apply should not error")
        .expect("domain error should not have been caught");

    assert!(report.upgraded.contains("vim-devtools"));
    assert!(native.foreign_explicit.lock().expect("lock").contains("vim-devtools"));
}

#[tokio::test]
async fn dry_run_install_reports_a_package_not_yet_installed() {
    let config = Config::default();
    let transport = FakeAurTransport::new().with_info(&["yay"], success(vec![pkg("yay", "12.0-1")]));
    let search = Search::new(Box::new(transport), &config);

    let native = FakeNative::default();
    let runner = NoopRunner;
    let reviewer = AlwaysApprove;
    let selector = FirstChoiceSelector;
    let reconciler = Reconciler::new(&config, &search, &native, &runner, &reviewer, &selector);

    let mut desired = DesiredState::default();
    desired.packages.insert("yay".to_string());
    let mut store = open_store("install");
    let opts = ApplyOptions { dry_run: true, ..Default::default() };

    let report = reconciler
        .apply(&desired, &mut store, opts)
        .await
        .expect("apply should not error")
        .expect("domain error should not have been caught");

    assert!(report.installed.contains("yay"));
}

#[tokio::test]
async fn an_aur_rpc_failure_during_upgrade_is_caught_and_reported_as_none() {
    let config = Config::default();
    // No `with_info` configured for "broken", so the fake transport returns
    // Error::NotFound, which Reconciler::apply must catch rather than
    // propagate.
    let transport = FakeAurTransport::new();
    let search = Search::new(Box::new(transport), &config);

    let native = FakeNative {
        foreign_explicit: Mutex::new(HashSet::from(["broken".to_string()])),
        foreign_versions: Mutex::new(HashMap::from([("broken".to_string(), "1.0-1".to_string())])),
        ..Default::default()
    };
    let runner = NoopRunner;
    let reviewer = AlwaysApprove;
    let selector = FirstChoiceSelector;
    let reconciler = Reconciler::new(&config, &search, &native, &runner, &reviewer, &selector);

    let mut desired = DesiredState::default();
    desired.packages.insert("broken".to_string());
    let mut store = open_store("caught-error");
    let opts = ApplyOptions { dry_run: true, ..Default::default() };

    let outcome = reconciler.apply(&desired, &mut store, opts).await.expect("infra errors should not surface here");
    assert!(outcome.is_none(), "a NotFound lookup failure should be caught, not propagated");
}
