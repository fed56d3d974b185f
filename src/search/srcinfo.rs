//! SRCINFO grammar parsing and custom-package acquisition.
//!
//! Turns a [`CustomPackage`] into a fully resolved [`PackageInfo`] by
//! fetching (cloning or copying) its `PKGBUILD`, running the packaging
//! tool's `--printsrcinfo` mode, and parsing the resulting text per the
//! SRCINFO grammar.

use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::native::{CommandRunner, RunOptions};
use crate::types::{CustomPackage, DependencySpec, PackageInfo};

/// Fields extracted from a SRCINFO text, prior to being combined with the
/// `CustomPackage`'s source location into a full [`PackageInfo`].
struct ParsedSrcinfo {
    pkgbase: String,
    version: String,
    provides: Vec<String>,
    dependencies: Vec<DependencySpec>,
    make_dependencies: Vec<DependencySpec>,
    check_dependencies: Vec<DependencySpec>,
}

/// What: Parse SRCINFO text into the fields needed for one target pkgname.
///
/// Inputs:
/// - `srcinfo`: the full SRCINFO text.
/// - `target_pkgname`: which `pkgname` section's fields to prefer/merge.
/// - `arch`: the architecture used to select `depends_<arch>`-style keys.
///
/// # Errors
/// Returns [`Error::PkgbuildParse`] (with `source` left empty — filled in
/// by the caller) if `pkgbase`/`pkgver` is missing or `target_pkgname`
/// never appears.
fn parse_srcinfo(srcinfo: &str, target_pkgname: &str, arch: &str) -> Result<ParsedSrcinfo> {
    let mut pkgbase: Option<String> = None;
    let mut pkgver: Option<String> = None;
    let mut pkgrel: Option<String> = None;
    let mut epoch: Option<String> = None;
    let mut current_pkg: Option<String> = None;
    let mut found_pkgnames: HashSet<String> = HashSet::new();

    let mut base_provides: Vec<String> = Vec::new();
    let mut pkg_provides: Vec<String> = Vec::new();
    let mut base_depends: Vec<String> = Vec::new();
    let mut pkg_depends: Vec<String> = Vec::new();
    let mut base_make_depends: Vec<String> = Vec::new();
    let mut pkg_make_depends: Vec<String> = Vec::new();
    let mut base_check_depends: Vec<String> = Vec::new();
    let mut pkg_check_depends: Vec<String> = Vec::new();

    for line in srcinfo.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        let value = raw_value.trim().to_string();

        let is_base = current_pkg.is_none();
        let is_target = current_pkg.as_deref() == Some(target_pkgname);

        match key {
            "pkgbase" => {
                pkgbase = Some(value);
                current_pkg = None;
            }
            "pkgname" => {
                current_pkg = Some(value.clone());
                found_pkgnames.insert(value);
            }
            "pkgver" => {
                if pkgver.is_none() || is_target {
                    pkgver = Some(value);
                }
            }
            "pkgrel" => {
                if pkgrel.is_none() || is_target {
                    pkgrel = Some(value);
                }
            }
            "epoch" => {
                if epoch.is_none() || is_target {
                    epoch = Some(value);
                }
            }
            "provides" => {
                if is_target {
                    pkg_provides.push(value);
                }
            }
            "depends" => {
                if is_base {
                    base_depends.push(value);
                } else if is_target {
                    pkg_depends.push(value);
                }
            }
            "makedepends" => {
                if is_base {
                    base_make_depends.push(value);
                } else if is_target {
                    pkg_make_depends.push(value);
                }
            }
            "checkdepends" => {
                if is_base {
                    base_check_depends.push(value);
                } else if is_target {
                    pkg_check_depends.push(value);
                }
            }
            _ => {
                if let Some(suffix) = key.strip_prefix("depends_") {
                    if suffix == arch {
                        if is_base {
                            base_depends.push(value);
                        } else if is_target {
                            pkg_depends.push(value);
                        }
                    }
                } else if let Some(suffix) = key.strip_prefix("makedepends_") {
                    if suffix == arch {
                        if is_base {
                            base_make_depends.push(value);
                        } else if is_target {
                            pkg_make_depends.push(value);
                        }
                    }
                } else if let Some(suffix) = key.strip_prefix("checkdepends_") {
                    if suffix == arch {
                        if is_base {
                            base_check_depends.push(value);
                        } else if is_target {
                            pkg_check_depends.push(value);
                        }
                    }
                }
            }
        }
    }

    let Some(pkgbase) = pkgbase else {
        return Err(Error::PkgbuildParse {
            source: String::new(),
            reason: "SRCINFO is missing pkgbase".to_string(),
        });
    };
    let Some(pkgver) = pkgver else {
        return Err(Error::PkgbuildParse {
            source: String::new(),
            reason: "SRCINFO is missing pkgver".to_string(),
        });
    };
    if !found_pkgnames.contains(target_pkgname) {
        let mut names: Vec<&String> = found_pkgnames.iter().collect();
        names.sort_unstable();
        let names = names
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::PkgbuildParse {
            source: String::new(),
            reason: format!(
                "pkgname '{target_pkgname}' not found in SRCINFO; found: [{names}]"
            ),
        });
    }

    let mut version = pkgver;
    if let Some(rel) = pkgrel {
        version = format!("{version}-{rel}");
    }
    if let Some(epoch) = epoch {
        version = format!("{epoch}:{version}");
    }

    base_provides.extend(pkg_provides);
    base_depends.extend(pkg_depends);
    base_make_depends.extend(pkg_make_depends);
    base_check_depends.extend(pkg_check_depends);

    Ok(ParsedSrcinfo {
        pkgbase,
        version,
        provides: base_provides,
        dependencies: base_depends.into_iter().map(DependencySpec::new).collect(),
        make_dependencies: base_make_depends.into_iter().map(DependencySpec::new).collect(),
        check_dependencies: base_check_depends.into_iter().map(DependencySpec::new).collect(),
    })
}

async fn run_printsrcinfo(runner: &dyn CommandRunner, dir: &Path) -> Result<String> {
    let argv = vec!["makepkg".to_string(), "--printsrcinfo".to_string()];
    let output = runner
        .run(
            &argv,
            RunOptions {
                cwd: Some(dir.to_path_buf()),
                ..Default::default()
            },
        )
        .await?;
    if !output.success() {
        return Err(Error::CommandFailed {
            command: argv.join(" "),
            status: Some(output.status),
            output: output.stdout_and_stderr,
        });
    }
    Ok(output.stdout_and_stderr)
}

async fn git_clone(runner: &dyn CommandRunner, url: &str, dest: &Path) -> Result<()> {
    let argv = vec![
        "git".to_string(),
        "clone".to_string(),
        url.to_string(),
        dest.to_string_lossy().into_owned(),
    ];
    let output = runner.run(&argv, RunOptions::default()).await?;
    if !output.success() {
        return Err(Error::CommandFailed {
            command: argv.join(" "),
            status: Some(output.status),
            output: output.stdout_and_stderr,
        });
    }
    Ok(())
}

/// What: Resolve a [`CustomPackage`] into a fully parsed [`PackageInfo`].
///
/// Details:
/// - For a git-sourced package, clones into a throwaway temporary
///   directory before parsing.
/// - For a directory-sourced package, parses in place.
/// - Either way, a `PKGBUILD` file must exist in the working directory
///   before the packaging tool is invoked.
///
/// # Errors
/// Returns [`Error::PkgbuildParse`] if the source is missing a
/// `PKGBUILD`, if parsing fails, or if the target pkgname never appears in
/// the SRCINFO; returns [`Error::CommandFailed`] if `git clone` or the
/// packaging tool itself fails; returns [`Error::Io`] on filesystem
/// failures.
pub async fn parse_custom_package(
    custom: &CustomPackage,
    config: &Config,
    runner: &dyn CommandRunner,
) -> Result<PackageInfo> {
    let source_label = custom
        .git_url
        .clone()
        .or_else(|| custom.pkgbuild_directory.clone())
        .unwrap_or_default();

    let srcinfo_text = if let Some(git_url) = &custom.git_url {
        let tmp = tempfile::Builder::new()
            .prefix("archstate-core-pkgbuild-")
            .tempdir()?;
        git_clone(runner, git_url, tmp.path())
            .await
            .map_err(|e| relabel(e, &source_label))?;
        if !tmp.path().join("PKGBUILD").is_file() {
            return Err(Error::PkgbuildParse {
                source: source_label.clone(),
                reason: "cloned repository does not contain a PKGBUILD".to_string(),
            });
        }
        run_printsrcinfo(runner, tmp.path())
            .await
            .map_err(|e| relabel(e, &source_label))?
    } else if let Some(dir) = &custom.pkgbuild_directory {
        let dir_path = Path::new(dir);
        if !dir_path.is_dir() {
            return Err(Error::PkgbuildParse {
                source: source_label.clone(),
                reason: "PKGBUILD directory does not exist".to_string(),
            });
        }
        if !dir_path.join("PKGBUILD").is_file() {
            return Err(Error::PkgbuildParse {
                source: source_label.clone(),
                reason: "directory does not contain a PKGBUILD".to_string(),
            });
        }
        run_printsrcinfo(runner, dir_path)
            .await
            .map_err(|e| relabel(e, &source_label))?
    } else {
        return Err(Error::InvalidInput(
            "CustomPackage must set exactly one of git_url or pkgbuild_directory".to_string(),
        ));
    };

    let parsed = parse_srcinfo(&srcinfo_text, &custom.pkgname, &config.arch)
        .map_err(|e| relabel(e, &source_label))?;

    PackageInfo::new(
        custom.pkgname.clone(),
        parsed.pkgbase,
        parsed.version,
        custom.git_url.clone(),
        custom.pkgbuild_directory.clone(),
        parsed.provides,
        parsed.dependencies,
        parsed.make_dependencies,
        parsed.check_dependencies,
    )
}

fn relabel(err: Error, source: &str) -> Error {
    match err {
        Error::PkgbuildParse { reason, .. } => Error::PkgbuildParse {
            source: source.to_string(),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPLIT_SRCINFO: &str = "\
pkgbase = my-split-pkg
\tpkgver = 1.2.3
\tpkgrel = 2
\tdepends = base-shared-dep

pkgname = my-split-pkg-a
\tdepends = dep-for-a
\tprovides = provides-a

pkgname = my-split-pkg-b
\tdepends = dep-for-b
\tdepends_x86_64 = dep-for-b-x86_64
";

    #[test]
    fn parses_base_and_target_dependencies() {
        let parsed = parse_srcinfo(SPLIT_SRCINFO, "my-split-pkg-a", "x86_64").expect("parses");
        assert_eq!(parsed.pkgbase, "my-split-pkg");
        assert_eq!(parsed.version, "1.2.3-2");
        assert_eq!(parsed.provides, vec!["provides-a".to_string()]);
        let names: Vec<&str> = parsed.dependencies.iter().map(DependencySpec::name).collect();
        assert_eq!(names, vec!["base-shared-dep", "dep-for-a"]);
    }

    #[test]
    fn ignores_other_pkgname_sections() {
        let parsed = parse_srcinfo(SPLIT_SRCINFO, "my-split-pkg-a", "x86_64").expect("parses");
        let names: Vec<&str> = parsed.dependencies.iter().map(DependencySpec::name).collect();
        assert!(!names.contains(&"dep-for-b"));
    }

    #[test]
    fn accumulates_arch_suffixed_dependencies_for_target_arch() {
        let parsed = parse_srcinfo(SPLIT_SRCINFO, "my-split-pkg-b", "x86_64").expect("parses");
        let names: Vec<&str> = parsed.dependencies.iter().map(DependencySpec::name).collect();
        assert!(names.contains(&"dep-for-b-x86_64"));
    }

    #[test]
    fn arch_suffix_mismatch_is_ignored() {
        let parsed = parse_srcinfo(SPLIT_SRCINFO, "my-split-pkg-b", "aarch64").expect("parses");
        let names: Vec<&str> = parsed.dependencies.iter().map(DependencySpec::name).collect();
        assert!(!names.contains(&"dep-for-b-x86_64"));
    }

    #[test]
    fn missing_target_pkgname_is_an_error() {
        let err = parse_srcinfo(SPLIT_SRCINFO, "does-not-exist", "x86_64").unwrap_err();
        match err {
            Error::PkgbuildParse { reason, .. } => {
                assert!(reason.contains("my-split-pkg-a"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_pkgbase_is_an_error() {
        let err = parse_srcinfo("pkgver = 1.0\npkgname = foo\n", "foo", "x86_64").unwrap_err();
        assert!(matches!(err, Error::PkgbuildParse { .. }));
    }

    #[test]
    fn version_without_pkgrel_or_epoch_is_bare_pkgver() {
        let srcinfo = "pkgbase = foo\npkgver = 9\npkgname = foo\n";
        let parsed = parse_srcinfo(srcinfo, "foo", "x86_64").expect("parses");
        assert_eq!(parsed.version, "9");
    }

    #[test]
    fn version_with_epoch_and_pkgrel_is_fully_composed() {
        let srcinfo = "pkgbase = foo\npkgver = 9\npkgrel = 3\nepoch = 2\npkgname = foo\n";
        let parsed = parse_srcinfo(srcinfo, "foo", "x86_64").expect("parses");
        assert_eq!(parsed.version, "2:9-3");
    }
}
