//! Convenience re-exports of the types most callers need.
//!
//! ```no_run
//! use archstate_core::prelude::*;
//! ```

pub use crate::builder::Builder;
pub use crate::cache;
pub use crate::config::Config;
pub use crate::depgraph::{DepGraph, ForeignPackage};
pub use crate::error::{Error, Result};
pub use crate::native::{
    AlwaysApprove, CommandOutput, CommandRunner, FirstChoiceSelector, NativePackageCapability,
    ProviderSelector, ReviewPrompter, RunOptions,
};
pub use crate::reconciler::{ApplyOptions, ApplyReport, DesiredState, Reconciler};
pub use crate::resolver::{ResolvedDependencies, Resolver};
pub use crate::search::Search;
pub use crate::store::{Store, StoreValue};
pub use crate::types::{CustomPackage, DependencySpec, PackageInfo};
