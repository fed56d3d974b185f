//! Unified error type for archstate-core.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for all archstate-core operations.
///
/// This error type covers every failure mode that can occur while resolving,
/// building, and reconciling foreign packages, providing clear, actionable
/// error messages that name the offending command, URL, or source.
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP request error talking to the AUR RPC endpoint.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing error, either from the AUR RPC response or the store file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem I/O error (store save, cache file access, build tree management).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The AUR RPC endpoint reported `type: "error"`.
    #[error("AUR RPC error: {message} (url: {url})")]
    AurRpc {
        /// Server-supplied error message.
        message: String,
        /// The request URL that produced the error.
        url: String,
    },

    /// A requested package was not found in the AUR or the custom registry.
    #[error("package not found: {0}")]
    NotFound(String),

    /// A PKGBUILD/SRCINFO failed to parse.
    #[error("failed to parse PKGBUILD for {source}: {reason}")]
    PkgbuildParse {
        /// The `git_url` or `pkgbuild_directory` the PKGBUILD was read from.
        source: String,
        /// Human-readable reason for the failure.
        reason: String,
    },

    /// Two foreign packages require each other through the dependency graph.
    #[error("dependency cycle between '{package}' and '{parent}'")]
    DependencyCycle {
        /// The package being added as a dependency.
        package: String,
        /// The package that would depend on it, already an ancestor of it.
        parent: String,
    },

    /// An external command exited non-zero or could not be executed.
    #[error("command failed ({status:?}): {command}\n{output}")]
    CommandFailed {
        /// The command line that was run, joined for display.
        command: String,
        /// Process exit status, if the process ran at all.
        status: Option<i32>,
        /// Captured combined stdout/stderr.
        output: String,
    },

    /// The user declined a review or confirmation prompt.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Artifact selection found zero or more than one matching package file.
    #[error("expected exactly one artifact for {pkgname} {version} in {directory}, found {found}")]
    AmbiguousArtifact {
        /// The package name being searched for.
        pkgname: String,
        /// The expected version string.
        version: String,
        /// The directory that was searched.
        directory: PathBuf,
        /// Number of matching files actually found.
        found: usize,
    },

    /// Invalid input parameter (empty name, malformed dependency string, etc).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for archstate-core operations.
pub type Result<T> = std::result::Result<T, Error>;
