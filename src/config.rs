//! Runtime configuration for archstate-core.
//!
//! A single [`Config`] value is constructed once by the caller and passed by
//! reference into [`crate::search::Search`], [`crate::resolver::Resolver`],
//! [`crate::builder::Builder`], and [`crate::reconciler::Reconciler`]. There is
//! no hidden process-global configuration state.

use std::path::PathBuf;
use std::time::Duration;

/// What: Process-wide configuration for dependency resolution and building.
///
/// Inputs: None (constructed via [`Config::new`] or [`Config::from_env`]).
///
/// Output: A `Config` value to be shared (by reference) across components.
///
/// Details:
/// - Every field has a sensible default matching what a single-host Arch
///   installation would use.
/// - `from_env` overlays `ARCHSTATE_*` environment variables onto the
///   defaults, silently ignoring unset or unparsable values, the way
///   `env::env_timeout` and friends do.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target architecture used when evaluating arch-suffixed SRCINFO keys
    /// (`depends_x86_64`, ...).
    pub arch: String,
    /// Base URL of the AUR RPC endpoint.
    pub aur_base_url: String,
    /// Per-request timeout for AUR RPC calls.
    pub aur_rpc_timeout: Duration,
    /// Working directory the builder creates its chroot and per-pkgbase
    /// source directories under. Removed and recreated on every build.
    pub build_dir: PathBuf,
    /// Directory built package artifacts are copied into and cached from.
    pub pkg_cache_dir: PathBuf,
    /// Unprivileged user the chroot build runs as.
    pub makepkg_user: String,
    /// Maximum number of cached artifact entries retained per pkgname.
    pub cache_limit_per_pkgname: usize,
    /// Suffixes that mark a package name as a "devel" package, which is
    /// never considered fresh for skip-detection purposes.
    pub devel_suffixes: Vec<String>,
    /// Maximum number of package names per AUR RPC `info` batch request.
    pub aur_info_batch_size: usize,
    /// Capacity of the in-memory package-info LRU cache.
    pub package_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            arch: "x86_64".to_string(),
            aur_base_url: "https://aur.archlinux.org".to_string(),
            aur_rpc_timeout: Duration::from_secs(30),
            build_dir: PathBuf::from("/tmp/archstate-core/build"),
            pkg_cache_dir: PathBuf::from("/var/cache/archstate-core/pkg"),
            makepkg_user: "nobody".to_string(),
            cache_limit_per_pkgname: 3,
            devel_suffixes: ["-git", "-hg", "-bzr", "-svn", "-cvs", "-darcs"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            aur_info_batch_size: 200,
            package_cache_capacity: 4096,
        }
    }
}

impl Config {
    /// What: Build a `Config` with every field at its default value.
    ///
    /// Inputs: None
    ///
    /// Output: A `Config` usable as-is for a single-host reconciliation run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// What: Overlay `ARCHSTATE_*` environment variables onto the defaults.
    ///
    /// Inputs: None
    ///
    /// Output: A `Config` value with any recognized, validly-formatted
    /// environment variable applied.
    ///
    /// Details:
    /// - Unset or unparsable variables are silently ignored, leaving the
    ///   default in place, matching the `env` module's convention in the
    ///   rest of this codebase's ancestry.
    /// - Recognized variables: `ARCHSTATE_ARCH`, `ARCHSTATE_AUR_BASE_URL`,
    ///   `ARCHSTATE_AUR_RPC_TIMEOUT_SECS`, `ARCHSTATE_BUILD_DIR`,
    ///   `ARCHSTATE_PKG_CACHE_DIR`, `ARCHSTATE_MAKEPKG_USER`,
    ///   `ARCHSTATE_CACHE_LIMIT_PER_PKGNAME`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(arch) = std::env::var("ARCHSTATE_ARCH") {
            if !arch.is_empty() {
                config.arch = arch;
            }
        }
        if let Ok(url) = std::env::var("ARCHSTATE_AUR_BASE_URL") {
            if !url.is_empty() {
                config.aur_base_url = url;
            }
        }
        if let Some(secs) = std::env::var("ARCHSTATE_AUR_RPC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.aur_rpc_timeout = Duration::from_secs(secs);
        }
        if let Ok(dir) = std::env::var("ARCHSTATE_BUILD_DIR") {
            if !dir.is_empty() {
                config.build_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("ARCHSTATE_PKG_CACHE_DIR") {
            if !dir.is_empty() {
                config.pkg_cache_dir = PathBuf::from(dir);
            }
        }
        if let Ok(user) = std::env::var("ARCHSTATE_MAKEPKG_USER") {
            if !user.is_empty() {
                config.makepkg_user = user;
            }
        }
        if let Some(limit) = std::env::var("ARCHSTATE_CACHE_LIMIT_PER_PKGNAME")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.cache_limit_per_pkgname = limit;
        }

        config
    }

    /// What: Check whether a pkgname is a "devel" package by suffix.
    ///
    /// Inputs:
    /// - `pkgname`: the package name to check.
    ///
    /// Output: `true` if `pkgname` ends with one of [`Config::devel_suffixes`].
    #[must_use]
    pub fn is_devel(&self, pkgname: &str) -> bool {
        self.devel_suffixes.iter().any(|suffix| pkgname.ends_with(suffix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_arch_and_url() {
        let config = Config::default();
        assert_eq!(config.arch, "x86_64");
        assert_eq!(config.aur_base_url, "https://aur.archlinux.org");
    }

    #[test]
    fn is_devel_matches_known_suffixes() {
        let config = Config::default();
        assert!(config.is_devel("foo-git"));
        assert!(config.is_devel("bar-svn"));
        assert!(!config.is_devel("foo"));
        assert!(!config.is_devel("foo-gitlab"));
    }
}
