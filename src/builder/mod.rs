//! Chroot-based package building: turns a [`ResolvedDependencies`] build
//! plan into built, cached package files.
//!
//! A fresh chroot is created once per [`Builder::build_all`] call, every
//! pkgbase's `PKGBUILD` is fetched and reviewed up front, and then the
//! build order is walked package-base by package-base, installing each
//! group's build dependencies into the chroot, invoking the packaging
//! tool's chroot build mode, and extracting the resulting artifacts into
//! the cache.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::cache;
use crate::config::Config;
use crate::depgraph::ForeignPackage;
use crate::error::{Error, Result};
use crate::native::{CommandRunner, NativePackageCapability, ReviewPrompter, RunOptions};
use crate::resolver::ResolvedDependencies;
use crate::search::Search;
use crate::store::{Store, StoreValue};

/// Packages installed into every chroot regardless of what is being built.
const ALWAYS_INCLUDED_PACKAGES: [&str; 2] = ["base-devel", "git"];

/// Extensions a built package artifact may carry, checked in the order the
/// packaging tool would plausibly produce them.
const VALID_PKG_EXTENSIONS: [&str; 10] = [
    ".pkg.tar",
    ".pkg.tar.gz",
    ".pkg.tar.bz2",
    ".pkg.tar.xz",
    ".pkg.tar.zst",
    ".pkg.tar.lzo",
    ".pkg.tar.lrz",
    ".pkg.tar.lz4",
    ".pkg.tar.lz",
    ".pkg.tar.Z",
];

const REVIEWED_COMMITS_KEY: &str = "pkgbuild_latest_reviewed_commits";

async fn run_checked(runner: &dyn CommandRunner, argv: Vec<String>, opts: RunOptions) -> Result<String> {
    let output = runner.run(&argv, opts).await?;
    if !output.success() {
        return Err(Error::CommandFailed {
            command: argv.join(" "),
            status: Some(output.status),
            output: output.stdout_and_stderr,
        });
    }
    Ok(output.stdout_and_stderr)
}

fn reviewed_commit(store: &Store, pkgbase: &str) -> Option<String> {
    store
        .get(REVIEWED_COMMITS_KEY)
        .and_then(StoreValue::as_map)
        .and_then(|m| m.get(pkgbase))
        .and_then(StoreValue::as_str)
        .map(str::to_string)
}

fn set_reviewed_commit(store: &mut Store, pkgbase: &str, commit: String) {
    store.ensure(REVIEWED_COMMITS_KEY, StoreValue::Map(std::collections::BTreeMap::new()));
    store
        .get_mut(REVIEWED_COMMITS_KEY)
        .and_then(StoreValue::as_map_mut)
        .expect("just ensured")
        .insert(pkgbase.to_string(), StoreValue::String(commit));
}

/// Fetches a `PKGBUILD` into `dest_dir` and runs it past `reviewer`, then
/// records the reviewed git commit (if any) in `store`.
///
/// # Errors
/// Returns [`Error::Aborted`] if the user declines to build. Propagates
/// [`Error::CommandFailed`]/[`Error::Io`] from the underlying git/filesystem
/// operations.
async fn fetch_and_review_pkgbuild(
    runner: &dyn CommandRunner,
    reviewer: &dyn ReviewPrompter,
    store: &mut Store,
    pkgbase: &str,
    git_url: Option<&str>,
    pkgbuild_directory: Option<&str>,
    dest_dir: &Path,
) -> Result<()> {
    if let Some(git_url) = git_url {
        run_checked(
            runner,
            vec![
                "git".to_string(),
                "clone".to_string(),
                git_url.to_string(),
                dest_dir.to_string_lossy().into_owned(),
            ],
            RunOptions::default(),
        )
        .await?;
    }
    if let Some(dir) = pkgbuild_directory {
        let src = Path::new(dir).join("PKGBUILD");
        std::fs::copy(&src, dest_dir.join("PKGBUILD"))?;
    }

    let proceed = if let Some(git_url) = git_url {
        let previously_reviewed = reviewed_commit(store, pkgbase);
        let log_output = run_checked(
            runner,
            vec!["git".to_string(), "log".to_string(), "--format=format:%H".to_string()],
            RunOptions { cwd: Some(dest_dir.to_path_buf()), ..Default::default() },
        )
        .await?;
        let commit_ids: HashSet<&str> = log_output.lines().collect();

        match previously_reviewed {
            Some(commit) if commit_ids.contains(commit.as_str()) => {
                reviewer.review_diff(pkgbase, &commit, dest_dir).await?
            }
            _ => reviewer.review_files(pkgbase, dest_dir).await?,
        }
    } else {
        reviewer.review_files(pkgbase, dest_dir).await?
    };
    if !proceed {
        return Err(Error::Aborted(format!("review declined for {pkgbase}")));
    }

    if !reviewer.confirm("Build this package?", true).await? {
        return Err(Error::Aborted(format!("build declined for {pkgbase}")));
    }

    if git_url.is_some() {
        let commit_output = run_checked(
            runner,
            vec!["git".to_string(), "rev-parse".to_string(), "HEAD".to_string()],
            RunOptions { cwd: Some(dest_dir.to_path_buf()), ..Default::default() },
        )
        .await?;
        set_reviewed_commit(store, pkgbase, commit_output.trim().to_string());
    }

    Ok(())
}

/// What: A chroot and a set of fetched, reviewed `PKGBUILD` source trees,
/// torn down unconditionally once building finishes (including on error).
struct BuildEnvironment {
    chroot_wd_dir: PathBuf,
    chroot_dir: PathBuf,
    pkgbase_dir_map: HashMap<String, PathBuf>,
    pkgs_in_chroot: HashSet<String>,
}

impl BuildEnvironment {
    async fn create(
        config: &Config,
        search: &Search<'_>,
        runner: &dyn CommandRunner,
        reviewer: &dyn ReviewPrompter,
        store: &mut Store,
        resolved: &ResolvedDependencies,
    ) -> Result<Self> {
        if config.build_dir.exists() {
            std::fs::remove_dir_all(&config.build_dir)?;
        }

        let mut pkgbase_dir_map = HashMap::new();
        for pkgbase in resolved.all_pkgbases() {
            let pkgbuild_dir = config.build_dir.join(&pkgbase);
            std::fs::create_dir_all(&pkgbuild_dir)?;

            let some_pkgname = resolved
                .get_some_pkgname(&pkgbase)
                .ok_or_else(|| Error::NotFound(pkgbase.clone()))?;
            let info = search.get(&some_pkgname).await?;

            fetch_and_review_pkgbuild(
                runner,
                reviewer,
                store,
                &pkgbase,
                info.git_url.as_deref(),
                info.pkgbuild_directory.as_deref(),
                &pkgbuild_dir,
            )
            .await?;

            // Hand the fetched source tree to the unprivileged build user;
            // it's cloned/copied as root and makechrootpkg builds as
            // config.makepkg_user.
            run_checked(
                runner,
                vec![
                    "chown".to_string(),
                    config.makepkg_user.clone(),
                    pkgbuild_dir.to_string_lossy().into_owned(),
                ],
                RunOptions::default(),
            )
            .await?;

            pkgbase_dir_map.insert(pkgbase, pkgbuild_dir);
        }

        let chroot_wd_dir = config.build_dir.join("chroot");
        let chroot_dir = chroot_wd_dir.join("root");
        std::fs::create_dir_all(&chroot_wd_dir)?;

        let mut pkgs_in_chroot: HashSet<String> =
            ALWAYS_INCLUDED_PACKAGES.iter().map(|s| (*s).to_string()).collect();
        pkgs_in_chroot.extend(resolved.native_deps.iter().cloned());

        let mut mkarchroot_argv = vec!["mkarchroot".to_string(), chroot_dir.to_string_lossy().into_owned()];
        let mut sorted_pkgs: Vec<&String> = pkgs_in_chroot.iter().collect();
        sorted_pkgs.sort();
        mkarchroot_argv.extend(sorted_pkgs.into_iter().cloned());

        run_checked(
            runner,
            mkarchroot_argv,
            RunOptions {
                drop_env: vec!["GNUPGHOME".to_string()],
                ..Default::default()
            },
        )
        .await?;

        Ok(Self {
            chroot_wd_dir,
            chroot_dir,
            pkgbase_dir_map,
            pkgs_in_chroot,
        })
    }

    fn teardown(&self, config: &Config) {
        if let Err(error) = std::fs::remove_dir_all(&config.build_dir) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(%error, dir = %config.build_dir.display(), "failed to remove build environment");
            }
        }
    }
}

/// What: Builds foreign packages in a chroot, grouped by pkgbase, in the
/// order given by a [`ResolvedDependencies`] build plan.
pub struct Builder<'a> {
    config: &'a Config,
    search: &'a Search<'a>,
    native: &'a dyn NativePackageCapability,
    runner: &'a dyn CommandRunner,
    reviewer: &'a dyn ReviewPrompter,
}

impl<'a> Builder<'a> {
    /// What: Construct a builder over the given capabilities.
    #[must_use]
    pub fn new(
        config: &'a Config,
        search: &'a Search<'a>,
        native: &'a dyn NativePackageCapability,
        runner: &'a dyn CommandRunner,
        reviewer: &'a dyn ReviewPrompter,
    ) -> Self {
        Self { config, search, native, runner, reviewer }
    }

    /// What: Build every package in `resolved.build_order`, in order,
    /// grouped by pkgbase, caching each built artifact.
    ///
    /// Details:
    /// - The build environment (chroot plus fetched sources) is always
    ///   torn down on exit, whether building succeeded or failed, the same
    ///   way [`crate::store::Store::scoped`] always saves.
    /// - A group is skipped (unless `force`) if every package in it is
    ///   already cached at the exact resolved version and none of them is
    ///   a devel package.
    ///
    /// # Errors
    /// Returns [`Error::AmbiguousArtifact`] if a build does not produce
    /// exactly one matching output file. Propagates command, I/O, and
    /// capability errors otherwise.
    pub async fn build_all(
        &self,
        resolved: &ResolvedDependencies,
        store: &mut Store,
        force: bool,
    ) -> Result<()> {
        if resolved.build_order.is_empty() {
            return Ok(());
        }

        let env = BuildEnvironment::create(
            self.config,
            self.search,
            self.runner,
            self.reviewer,
            store,
            resolved,
        )
        .await?;

        let result = self.build_loop(&env, resolved, store, force).await;
        env.teardown(self.config);
        result
    }

    async fn build_loop(
        &self,
        env: &BuildEnvironment,
        resolved: &ResolvedDependencies,
        store: &mut Store,
        force: bool,
    ) -> Result<()> {
        let mut remaining: Vec<String> = resolved.build_order.clone();
        let mut built_pkgbases: HashSet<String> = HashSet::new();

        while let Some(pkgname) = remaining.first().cloned() {
            remaining.remove(0);
            let pkgbase = resolved
                .get_pkgbase(&pkgname)
                .ok_or_else(|| Error::NotFound(pkgname.clone()))?
                .to_string();
            if !built_pkgbases.insert(pkgbase.clone()) {
                continue;
            }

            let package_names = resolved.get_pkgs_with_common_pkgbase(&pkgname);
            let packages: Vec<&ForeignPackage> = package_names
                .iter()
                .filter_map(|name| resolved.packages.get(name))
                .collect();

            self.build_pkgbase(env, &pkgbase, &packages, resolved, store, force).await?;
        }
        Ok(())
    }

    async fn are_all_cached(&self, packages: &[&ForeignPackage], store: &Store) -> Result<bool> {
        for pkg in packages {
            let Some(cached) = cache::find_latest(store, &pkg.name) else {
                return Ok(false);
            };
            let info = self.search.get(&pkg.name).await?;
            if cached.version != info.version || self.config.is_devel(&pkg.name) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn chroot_build_packages(
        &self,
        packages: &[&ForeignPackage],
        resolved: &ResolvedDependencies,
        store: &Store,
    ) -> Result<(Vec<String>, Vec<PathBuf>)> {
        let mut native_build_deps: HashSet<String> = HashSet::new();
        let mut foreign_chroot_pkgs: HashSet<String> = HashSet::new();

        fn merge(deps: Vec<String>, resolved: &ResolvedDependencies, out: &mut HashSet<String>) {
            for dep in deps {
                if !resolved.native_deps.contains(&dep) {
                    out.insert(dep);
                }
            }
        }

        for pkg in packages {
            let info = self.search.get(&pkg.name).await?;
            merge(info.native_make_dependencies(self.native).await?, resolved, &mut native_build_deps);
            merge(info.native_check_dependencies(self.native).await?, resolved, &mut native_build_deps);

            let foreign_deps = pkg.all_recursive_foreign_deps();
            foreign_chroot_pkgs.extend(foreign_deps.iter().cloned());

            for dep in foreign_deps {
                let dep_info = self.search.get(dep).await?;
                merge(
                    dep_info.native_make_dependencies(self.native).await?,
                    resolved,
                    &mut native_build_deps,
                );
                merge(
                    dep_info.native_check_dependencies(self.native).await?,
                    resolved,
                    &mut native_build_deps,
                );
            }
        }

        // Packages sharing this pkgbase may depend on each other, but since
        // they are built together that is never an installation need.
        for pkg in packages {
            foreign_chroot_pkgs.remove(&pkg.name);
        }

        let mut chroot_pkg_files = Vec::with_capacity(foreign_chroot_pkgs.len());
        for foreign_pkg in &foreign_chroot_pkgs {
            let entry = cache::find_latest(store, foreign_pkg).ok_or_else(|| {
                Error::NotFound(format!(
                    "'{foreign_pkg}' should already be built and cached by build order"
                ))
            })?;
            chroot_pkg_files.push(entry.path);
        }

        let mut native_build_deps: Vec<String> = native_build_deps.into_iter().collect();
        native_build_deps.sort();
        Ok((native_build_deps, chroot_pkg_files))
    }

    fn find_pkgfile(&self, pkgname: &str, prefix: &str, dir: &Path) -> Result<PathBuf> {
        let mut matches = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && VALID_PKG_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
                matches.push(entry.path());
            }
        }
        if matches.len() != 1 {
            return Err(Error::AmbiguousArtifact {
                pkgname: pkgname.to_string(),
                version: prefix.to_string(),
                directory: dir.to_path_buf(),
                found: matches.len(),
            });
        }
        Ok(matches.remove(0))
    }

    async fn build_pkgbase(
        &self,
        env: &BuildEnvironment,
        pkgbase: &str,
        packages: &[&ForeignPackage],
        resolved: &ResolvedDependencies,
        store: &mut Store,
        force: bool,
    ) -> Result<()> {
        let package_names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();

        if !force && self.are_all_cached(packages, store).await? {
            tracing::info!(pkgbase, "already up to date, skipping build");
            return Ok(());
        }

        tracing::info!(pkgbase, packages = ?package_names, "building");

        let (native_build_deps, chroot_pkg_files) =
            self.chroot_build_packages(packages, resolved, store).await?;

        let pkgbuild_dir = env
            .pkgbase_dir_map
            .get(pkgbase)
            .ok_or_else(|| Error::NotFound(pkgbase.to_string()))?
            .clone();

        let mut install_argv = vec![
            "arch-nspawn".to_string(),
            env.chroot_dir.to_string_lossy().into_owned(),
            "pacman".to_string(),
            "-S".to_string(),
            "--needed".to_string(),
            "--noconfirm".to_string(),
        ];
        install_argv.extend(native_build_deps.iter().cloned());
        install_argv.extend(ALWAYS_INCLUDED_PACKAGES.iter().map(|s| (*s).to_string()));
        run_checked(self.runner, install_argv, RunOptions::default()).await?;

        let mut build_argv = vec![
            "makechrootpkg".to_string(),
            "-c".to_string(),
            "-r".to_string(),
            env.chroot_wd_dir.to_string_lossy().into_owned(),
            "-U".to_string(),
            self.config.makepkg_user.clone(),
        ];
        for file in &chroot_pkg_files {
            build_argv.push("-I".to_string());
            build_argv.push(file.to_string_lossy().into_owned());
        }
        run_checked(
            self.runner,
            build_argv,
            RunOptions { cwd: Some(pkgbuild_dir.clone()), ..Default::default() },
        )
        .await?;

        for pkg in packages {
            let info = self.search.get(&pkg.name).await?;
            let prefix = info.pkg_file_prefix();
            let built_file = self.find_pkgfile(&pkg.name, &prefix, &pkgbuild_dir)?;
            let dest = self.config.pkg_cache_dir.join(
                built_file
                    .file_name()
                    .ok_or_else(|| Error::InvalidInput("built artifact has no file name".to_string()))?,
            );
            std::fs::create_dir_all(&self.config.pkg_cache_dir)?;
            std::fs::copy(&built_file, &dest)?;
            cache::add(store, self.config, &pkg.name, &info.version, &dest);
        }

        if !native_build_deps.is_empty() {
            let mut to_remove = HashSet::new();
            for dep in &native_build_deps {
                if !env.pkgs_in_chroot.contains(dep) {
                    let resolve_argv = vec![
                        "arch-nspawn".to_string(),
                        env.chroot_dir.to_string_lossy().into_owned(),
                        "pacman".to_string(),
                        "-Sddp".to_string(),
                        "--print-format=%n".to_string(),
                        dep.clone(),
                    ];
                    let real_name = run_checked(self.runner, resolve_argv, RunOptions::default()).await?;
                    to_remove.insert(real_name.trim().to_string());
                }
            }
            if !to_remove.is_empty() {
                let mut remove_argv = vec![
                    "arch-nspawn".to_string(),
                    env.chroot_dir.to_string_lossy().into_owned(),
                    "pacman".to_string(),
                    "-Rsu".to_string(),
                    "--noconfirm".to_string(),
                ];
                let mut sorted: Vec<&String> = to_remove.iter().collect();
                sorted.sort();
                remove_argv.extend(sorted.into_iter().cloned());
                run_checked(self.runner, remove_argv, RunOptions::default()).await?;
            }
        }

        tracing::info!(pkgbase, "finished building");
        Ok(())
    }
}
