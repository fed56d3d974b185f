//! Shared data types for archstate-core.

pub mod package;

pub use package::{CustomPackage, DependencySpec, PackageInfo};
