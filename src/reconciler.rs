//! Top-level state reconciliation: bring installed foreign packages in
//! line with what is desired, in four phases mirroring the reconciliation
//! tool's own `AUR.apply` exactly — remove/demote, upgrade, install.
//!
//! Nothing here talks to pacman or a subprocess directly; every side
//! effect goes through [`NativePackageCapability`], [`CommandRunner`], or
//! [`ReviewPrompter`], so the whole procedure can run against fakes in
//! tests.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use crate::builder::Builder;
use crate::cache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::native::{CommandRunner, NativePackageCapability, ProviderSelector, ReviewPrompter};
use crate::resolver::{ResolvedDependencies, Resolver};
use crate::search::Search;
use crate::store::Store;

/// What: Everything the caller wants reconciliation to converge on.
#[derive(Clone, Debug, Default)]
pub struct DesiredState {
    /// AUR package names to have installed explicitly.
    pub packages: BTreeSet<String>,
    /// Names of user-declared custom packages to have installed
    /// explicitly. The packages themselves must already be registered via
    /// [`Search::add_custom`].
    pub custom_package_names: BTreeSet<String>,
    /// Package names excluded from removal, demotion, and upgrade.
    pub ignored_packages: BTreeSet<String>,
}

/// Options controlling one [`Reconciler::apply`] run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyOptions {
    /// Upgrade devel packages regardless of what their version string
    /// shows, since a devel version alone can't prove staleness.
    pub upgrade_devel: bool,
    /// Install even when nothing looks new, rebuilding every package.
    pub force: bool,
    /// Compute and report what would happen without changing any state.
    pub dry_run: bool,
}

/// What happened (or, under `dry_run`, would have happened) during one
/// [`Reconciler::apply`] call.
#[derive(Clone, Debug, Default)]
pub struct ApplyReport {
    /// Foreign packages uninstalled outright.
    pub removed: BTreeSet<String>,
    /// Foreign packages kept installed but demoted to "dependency".
    pub set_as_dependencies: BTreeSet<String>,
    /// Foreign packages rebuilt and reinstalled because a newer version
    /// was available.
    pub upgraded: BTreeSet<String>,
    /// Foreign packages newly installed to satisfy the desired state.
    pub installed: BTreeSet<String>,
}

/// What: Drives [`Resolver`], [`Builder`], and [`NativePackageCapability`]
/// together to reconcile installed foreign packages against a
/// [`DesiredState`].
pub struct Reconciler<'a> {
    config: &'a Config,
    search: &'a Search<'a>,
    native: &'a dyn NativePackageCapability,
    runner: &'a dyn CommandRunner,
    reviewer: &'a dyn ReviewPrompter,
    selector: &'a dyn ProviderSelector,
}

impl<'a> Reconciler<'a> {
    /// What: Construct a reconciler over the given capabilities.
    #[must_use]
    pub fn new(
        config: &'a Config,
        search: &'a Search<'a>,
        native: &'a dyn NativePackageCapability,
        runner: &'a dyn CommandRunner,
        reviewer: &'a dyn ReviewPrompter,
        selector: &'a dyn ProviderSelector,
    ) -> Self {
        Self { config, search, native, runner, reviewer, selector }
    }

    /// What: Reconcile installed foreign packages against `desired`.
    ///
    /// Details:
    /// - Phase 1 removes or demotes anything installed but no longer
    ///   wanted, protecting packages that are still a dependant of
    ///   anything in the desired state (including ignored packages that
    ///   are themselves still installed).
    /// - Phase 2 upgrades every installed foreign package whose available
    ///   version is newer, unless it's ignored.
    /// - Phase 3 installs anything in `desired` not yet installed.
    /// - Under `opts.dry_run`, every phase is computed and reported but no
    ///   native-capability mutation, build, or install runs.
    ///
    /// # Errors
    /// Catches every error kind that reflects a failed reconciliation
    /// attempt rather than a bug or environment problem — AUR RPC
    /// failure, SRCINFO parse failure, a dependency cycle, a failed
    /// command, an aborted review, or an ambiguous build artifact —
    /// logs it via `tracing::error!`, and returns `Ok(None)`, mirroring
    /// the reconciliation tool's own `apply()` returning `bool` with
    /// those exceptions caught internally. Anything else (I/O, JSON,
    /// network-transport, or invalid-input errors) is returned as `Err`
    /// for the caller to see directly.
    pub async fn apply(
        &self,
        desired: &DesiredState,
        store: &mut Store,
        opts: ApplyOptions,
    ) -> Result<Option<ApplyReport>> {
        match self.run_phases(desired, store, opts).await {
            Ok(report) => Ok(Some(report)),
            Err(error) if Self::is_recoverable(&error) => {
                tracing::error!(%error, "reconciliation failed");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn is_recoverable(error: &Error) -> bool {
        matches!(
            error,
            Error::AurRpc { .. }
                | Error::NotFound(_)
                | Error::PkgbuildParse { .. }
                | Error::DependencyCycle { .. }
                | Error::CommandFailed { .. }
                | Error::AmbiguousArtifact { .. }
                | Error::Aborted(_)
        )
    }

    async fn run_phases(
        &self,
        desired: &DesiredState,
        store: &mut Store,
        opts: ApplyOptions,
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        let currently_installed_native = self.native.installed_native_explicit().await?;
        let currently_installed_foreign = self.native.installed_foreign_explicit().await?;
        let orphans = self.native.foreign_orphans().await?;

        let removal_candidates: HashSet<String> =
            currently_installed_foreign.union(&orphans).cloned().collect();
        let to_remove: BTreeSet<String> = removal_candidates
            .into_iter()
            .filter(|pkg| {
                !desired.packages.contains(pkg)
                    && !desired.custom_package_names.contains(pkg)
                    && !desired.ignored_packages.contains(pkg)
            })
            .collect();

        let dependants_to_keep: HashSet<String> = desired
            .packages
            .iter()
            .chain(desired.custom_package_names.iter())
            .chain(currently_installed_native.iter())
            .chain(
                desired
                    .ignored_packages
                    .iter()
                    .filter(|pkg| currently_installed_foreign.contains(*pkg)),
            )
            .cloned()
            .collect();

        for package in &to_remove {
            let dependants = self.native.dependants(package).await?;
            if dependants.iter().any(|d| dependants_to_keep.contains(d)) {
                report.set_as_dependencies.insert(package.clone());
            } else {
                report.removed.insert(package.clone());
            }
        }

        if !report.removed.is_empty() {
            tracing::info!(removed = ?report.removed, "removing foreign packages");
            if !opts.dry_run {
                let names: HashSet<String> = report.removed.iter().cloned().collect();
                self.native.remove(&names).await?;
            }
        }
        if !report.set_as_dependencies.is_empty() {
            tracing::info!(
                demoted = ?report.set_as_dependencies,
                "marking previously explicit foreign packages as dependencies"
            );
            if !opts.dry_run {
                let names: HashSet<String> = report.set_as_dependencies.iter().cloned().collect();
                self.native.mark_as_dependency(&names).await?;
            }
        }

        tracing::info!("determining foreign packages to upgrade");
        let (upgrade_explicit, upgrade_deps) =
            self.packages_to_upgrade(&desired.ignored_packages, opts.upgrade_devel).await?;
        report.upgraded = upgrade_explicit.union(&upgrade_deps).cloned().collect();
        if !opts.dry_run && (!upgrade_explicit.is_empty() || !upgrade_deps.is_empty()) {
            self.install(&upgrade_explicit, &upgrade_deps, store, opts.force).await?;
        }

        let currently_installed_foreign_after_upgrade = if opts.dry_run {
            currently_installed_foreign.clone()
        } else {
            self.native.installed_foreign_explicit().await?
        };
        let to_install: BTreeSet<String> = desired
            .packages
            .iter()
            .chain(desired.custom_package_names.iter())
            .filter(|pkg| {
                !currently_installed_foreign_after_upgrade.contains(*pkg)
                    && !desired.ignored_packages.contains(*pkg)
            })
            .cloned()
            .collect();
        report.installed = to_install.clone();

        if !opts.dry_run && !to_install.is_empty() {
            let explicit: Vec<String> = to_install.into_iter().collect();
            self.install(&explicit.into_iter().collect(), &BTreeSet::new(), store, opts.force)
                .await?;
        }

        Ok(report)
    }

    async fn packages_to_upgrade(
        &self,
        ignored: &BTreeSet<String>,
        upgrade_devel: bool,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let installed_versions = self.native.installed_foreign_versions().await?;
        let installed_explicit = self.native.installed_foreign_explicit().await?;

        let names: Vec<String> = installed_versions.keys().cloned().collect();
        self.search.try_caching(&names).await?;

        let mut as_explicit = BTreeSet::new();
        let mut as_deps = BTreeSet::new();
        for (pkg, installed_version) in &installed_versions {
            if ignored.contains(pkg) {
                continue;
            }
            let info = self.search.get(pkg).await?;
            if self.should_upgrade(pkg, installed_version, &info.version, upgrade_devel).await? {
                if installed_explicit.contains(pkg) {
                    as_explicit.insert(pkg.clone());
                } else {
                    as_deps.insert(pkg.clone());
                }
            }
        }
        Ok((as_explicit, as_deps))
    }

    /// What: Whether `pkgname` should be upgraded given its installed and
    /// available versions.
    ///
    /// Details: a devel package always upgrades when `upgrade_devel` is
    /// set, since its version string alone never proves staleness;
    /// otherwise defers to [`NativePackageCapability::compare_versions`].
    async fn should_upgrade(
        &self,
        pkgname: &str,
        installed: &str,
        available: &str,
        upgrade_devel: bool,
    ) -> Result<bool> {
        if upgrade_devel && self.config.is_devel(pkgname) {
            return Ok(true);
        }
        Ok(self.native.compare_versions(installed, available).await? == Ordering::Less)
    }

    /// What: Resolve, build, and install the given foreign packages.
    ///
    /// Details: mirrors `ForeignPackageManager.install`: resolve → install
    /// native dependencies from pacman → build every pkgbase in order →
    /// install the built/cached artifacts in one `install_files` call.
    async fn install(
        &self,
        foreign_pkgs: &BTreeSet<String>,
        foreign_dep_pkgs: &BTreeSet<String>,
        store: &mut Store,
        force: bool,
    ) -> Result<()> {
        if foreign_pkgs.is_empty() && foreign_dep_pkgs.is_empty() {
            return Ok(());
        }

        let foreign_pkgs: Vec<String> = foreign_pkgs.iter().cloned().collect();
        let foreign_dep_pkgs: Vec<String> = foreign_dep_pkgs.iter().cloned().collect();

        let resolver = Resolver::new(self.search, self.native, self.selector);
        let resolved: ResolvedDependencies =
            resolver.resolve_dependencies(&foreign_pkgs, &foreign_dep_pkgs).await?;

        tracing::info!(
            explicit = ?resolved.foreign_pkgs,
            as_deps = ?resolved.foreign_dep_pkgs,
            build_only = ?resolved.foreign_build_dep_pkgs,
            "installing foreign packages"
        );

        self.native.install_dependencies(&resolved.native_deps.iter().cloned().collect()).await?;

        let builder = Builder::new(self.config, self.search, self.native, self.runner, self.reviewer);
        builder.build_all(&resolved, store, force).await?;

        let mut packages_to_install = resolved.foreign_pkgs.clone();
        packages_to_install.extend(resolved.foreign_dep_pkgs.iter().cloned());

        let mut files: Vec<PathBuf> = Vec::new();
        for pkg in &packages_to_install {
            let entry = cache::find_latest(store, pkg).ok_or_else(|| {
                Error::NotFound(format!("no cached artifact found for {pkg} after build"))
            })?;
            files.push(entry.path);
        }

        if !files.is_empty() || force {
            self.native.install_files(&files, &resolved.foreign_pkgs).await?;
        }
        Ok(())
    }
}
