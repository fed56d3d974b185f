//! Package metadata types: [`PackageInfo`] and [`CustomPackage`].

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::native::NativePackageCapability;

/// What: Strip a version constraint off a dependency expression.
///
/// Inputs:
/// - `dep`: a dependency string as it appears in SRCINFO/AUR metadata, e.g.
///   `"foo>=1.2"`, `"foo=2"`, `"foo<3"`, or plain `"foo"`.
///
/// Output: the bare package/provision name with any `=`, `>`, or `<`
/// constraint removed.
///
/// Details:
/// - Takes the substring before the first occurrence of `=`, `<`, or `>`.
/// - Leaves unconstrained names untouched.
#[must_use]
pub fn strip_dependency(dep: &str) -> &str {
    dep.find(['=', '<', '>']).map_or(dep, |idx| &dep[..idx])
}

/// A single dependency expression, retaining the original constrained form
/// alongside the stripped bare name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// The raw expression, e.g. `"foo>=1.2"`.
    pub raw: String,
}

impl DependencySpec {
    /// What: Wrap a raw dependency expression.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// What: The bare package/provision name with any version constraint stripped.
    #[must_use]
    pub fn name(&self) -> &str {
        strip_dependency(&self.raw)
    }
}

impl From<String> for DependencySpec {
    fn from(raw: String) -> Self {
        Self { raw }
    }
}

impl From<&str> for DependencySpec {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Result of splitting a dependency list into what the native package
/// manager can install directly and what must be built from source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Classified {
    /// Stripped names installable via the native package database.
    native: Vec<String>,
    /// Stripped names that must be resolved as foreign packages.
    foreign: Vec<String>,
}

async fn classify(
    deps: &[DependencySpec],
    native: &dyn NativePackageCapability,
) -> Result<Classified> {
    let mut out = Classified::default();
    for dep in deps {
        let name = dep.name();
        if native.is_installable(&dep.raw).await? {
            out.native.push(name.to_string());
        } else {
            out.foreign.push(name.to_string());
        }
    }
    Ok(out)
}

/// What: Immutable, resolved metadata for one package, native or foreign.
///
/// Inputs: constructed either by [`CustomPackage::parse`] (for
/// user-declared packages) or synthesized by [`crate::search::Search`] from
/// an AUR RPC response.
///
/// Output: a `PackageInfo` with exactly one of `git_url`/`pkgbuild_directory`
/// set, and four dependency sequences (`dependencies`, `make_dependencies`,
/// `check_dependencies`, plus `provides`).
///
/// Details:
/// - Equality and hashing are structural over the public fields; the
///   classification caches are not compared so two structurally equal
///   `PackageInfo`s remain equal regardless of whether classification has
///   run yet.
/// - The native/foreign split for each dependency kind is computed lazily,
///   on first access, and memoized for the lifetime of the value.
#[derive(Debug)]
pub struct PackageInfo {
    /// Unique package name.
    pub pkgname: String,
    /// Package base; groups split packages built together.
    pub pkgbase: String,
    /// Composed version string: `[epoch:]pkgver[-pkgrel]`.
    pub version: String,
    /// Git URL to clone the PKGBUILD from, for AUR and git-sourced custom
    /// packages. Mutually exclusive with `pkgbuild_directory`.
    pub git_url: Option<String>,
    /// Local directory containing a `PKGBUILD`, for locally-sourced custom
    /// packages. Mutually exclusive with `git_url`.
    pub pkgbuild_directory: Option<String>,
    /// Virtual provisions this package satisfies.
    pub provides: Vec<String>,
    /// Runtime dependencies.
    pub dependencies: Vec<DependencySpec>,
    /// Build-time-only dependencies.
    pub make_dependencies: Vec<DependencySpec>,
    /// Test-time-only dependencies.
    pub check_dependencies: Vec<DependencySpec>,

    dependencies_classified: OnceLock<Classified>,
    make_dependencies_classified: OnceLock<Classified>,
    check_dependencies_classified: OnceLock<Classified>,
}

impl PartialEq for PackageInfo {
    fn eq(&self, other: &Self) -> bool {
        self.pkgname == other.pkgname
            && self.pkgbase == other.pkgbase
            && self.version == other.version
            && self.git_url == other.git_url
            && self.pkgbuild_directory == other.pkgbuild_directory
            && self.provides == other.provides
            && self.dependencies == other.dependencies
            && self.make_dependencies == other.make_dependencies
            && self.check_dependencies == other.check_dependencies
    }
}

impl Eq for PackageInfo {}

impl Clone for PackageInfo {
    fn clone(&self) -> Self {
        Self {
            pkgname: self.pkgname.clone(),
            pkgbase: self.pkgbase.clone(),
            version: self.version.clone(),
            git_url: self.git_url.clone(),
            pkgbuild_directory: self.pkgbuild_directory.clone(),
            provides: self.provides.clone(),
            dependencies: self.dependencies.clone(),
            make_dependencies: self.make_dependencies.clone(),
            check_dependencies: self.check_dependencies.clone(),
            dependencies_classified: self.dependencies_classified.clone(),
            make_dependencies_classified: self.make_dependencies_classified.clone(),
            check_dependencies_classified: self.check_dependencies_classified.clone(),
        }
    }
}

impl PackageInfo {
    /// What: Construct a `PackageInfo`, enforcing the `git_url` XOR
    /// `pkgbuild_directory` invariant.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if both or neither source is set.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pkgname: impl Into<String>,
        pkgbase: impl Into<String>,
        version: impl Into<String>,
        git_url: Option<String>,
        pkgbuild_directory: Option<String>,
        provides: Vec<String>,
        dependencies: Vec<DependencySpec>,
        make_dependencies: Vec<DependencySpec>,
        check_dependencies: Vec<DependencySpec>,
    ) -> Result<Self> {
        if git_url.is_some() == pkgbuild_directory.is_some() {
            return Err(Error::InvalidInput(
                "exactly one of git_url or pkgbuild_directory must be set".to_string(),
            ));
        }
        Ok(Self {
            pkgname: pkgname.into(),
            pkgbase: pkgbase.into(),
            version: version.into(),
            git_url,
            pkgbuild_directory,
            provides,
            dependencies,
            make_dependencies,
            check_dependencies,
            dependencies_classified: OnceLock::new(),
            make_dependencies_classified: OnceLock::new(),
            check_dependencies_classified: OnceLock::new(),
        })
    }

    /// What: The filename prefix a built artifact for this package carries.
    ///
    /// Output: `"{pkgname}-{version}"`, matching the naming convention the
    /// packaging tool uses for output files.
    #[must_use]
    pub fn pkg_file_prefix(&self) -> String {
        format!("{}-{}", self.pkgname, self.version)
    }

    async fn ensure_classified<'a>(
        &'a self,
        cache: &'a OnceLock<Classified>,
        deps: &'a [DependencySpec],
        native: &dyn NativePackageCapability,
    ) -> Result<&'a Classified> {
        if let Some(c) = cache.get() {
            return Ok(c);
        }
        let classified = classify(deps, native).await?;
        // Another caller may have raced us; `set` failing just means we use theirs.
        let _ = cache.set(classified);
        Ok(cache.get().expect("classification was just set"))
    }

    /// What: Native (pacman-installable) subset of `dependencies`.
    ///
    /// # Errors
    /// Propagates errors from `native.is_installable`.
    pub async fn native_dependencies(
        &self,
        native: &dyn NativePackageCapability,
    ) -> Result<Vec<String>> {
        Ok(self
            .ensure_classified(&self.dependencies_classified, &self.dependencies, native)
            .await?
            .native
            .clone())
    }

    /// What: Foreign (must-build) subset of `dependencies`.
    ///
    /// # Errors
    /// Propagates errors from `native.is_installable`.
    pub async fn foreign_dependencies(
        &self,
        native: &dyn NativePackageCapability,
    ) -> Result<Vec<String>> {
        Ok(self
            .ensure_classified(&self.dependencies_classified, &self.dependencies, native)
            .await?
            .foreign
            .clone())
    }

    /// What: Native subset of `make_dependencies`.
    ///
    /// # Errors
    /// Propagates errors from `native.is_installable`.
    pub async fn native_make_dependencies(
        &self,
        native: &dyn NativePackageCapability,
    ) -> Result<Vec<String>> {
        Ok(self
            .ensure_classified(
                &self.make_dependencies_classified,
                &self.make_dependencies,
                native,
            )
            .await?
            .native
            .clone())
    }

    /// What: Foreign subset of `make_dependencies`.
    ///
    /// # Errors
    /// Propagates errors from `native.is_installable`.
    pub async fn foreign_make_dependencies(
        &self,
        native: &dyn NativePackageCapability,
    ) -> Result<Vec<String>> {
        Ok(self
            .ensure_classified(
                &self.make_dependencies_classified,
                &self.make_dependencies,
                native,
            )
            .await?
            .foreign
            .clone())
    }

    /// What: Native subset of `check_dependencies`.
    ///
    /// # Errors
    /// Propagates errors from `native.is_installable`.
    pub async fn native_check_dependencies(
        &self,
        native: &dyn NativePackageCapability,
    ) -> Result<Vec<String>> {
        Ok(self
            .ensure_classified(
                &self.check_dependencies_classified,
                &self.check_dependencies,
                native,
            )
            .await?
            .native
            .clone())
    }

    /// What: Foreign subset of `check_dependencies`.
    ///
    /// # Errors
    /// Propagates errors from `native.is_installable`.
    pub async fn foreign_check_dependencies(
        &self,
        native: &dyn NativePackageCapability,
    ) -> Result<Vec<String>> {
        Ok(self
            .ensure_classified(
                &self.check_dependencies_classified,
                &self.check_dependencies,
                native,
            )
            .await?
            .foreign
            .clone())
    }
}

/// What: A user-declared foreign package prior to SRCINFO parsing.
///
/// Inputs: constructed via [`CustomPackage::from_git`] or
/// [`CustomPackage::from_directory`].
///
/// Output: call [`CustomPackage::parse`] to produce a [`PackageInfo`].
///
/// Details:
/// - `pkgname` disambiguates which target package to parse out of a
///   (possibly split-package) PKGBUILD.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomPackage {
    /// The target package name to extract from the PKGBUILD.
    pub pkgname: String,
    /// Git remote to clone, if this package is git-sourced.
    pub git_url: Option<String>,
    /// Local directory containing the PKGBUILD, if locally-sourced.
    pub pkgbuild_directory: Option<String>,
}

impl CustomPackage {
    /// What: Declare a custom package sourced from a git remote.
    #[must_use]
    pub fn from_git(pkgname: impl Into<String>, git_url: impl Into<String>) -> Self {
        Self {
            pkgname: pkgname.into(),
            git_url: Some(git_url.into()),
            pkgbuild_directory: None,
        }
    }

    /// What: Declare a custom package sourced from a local PKGBUILD directory.
    #[must_use]
    pub fn from_directory(pkgname: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            pkgname: pkgname.into(),
            git_url: None,
            pkgbuild_directory: Some(directory.into()),
        }
    }
}
