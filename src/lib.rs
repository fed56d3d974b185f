//! Dependency resolution, building, and reconciliation core for a
//! declarative Arch Linux package and state manager.
//!
//! This crate owns the foreign-package (AUR/custom) reconciliation
//! pipeline: discovering package metadata, resolving a dependency graph
//! into a buildable order, building packages in a chroot, and
//! reconciling installed state against a desired set. It does not
//! implement the declarative module/config layer, a CLI, or a pacman
//! wrapper itself — those are the caller's job, mediated through the
//! capability traits in [`native`].
//!
//! # Layout
//!
//! - [`error`]: the unified [`error::Error`] type.
//! - [`config`]: [`config::Config`], shared by reference across every
//!   other module.
//! - [`types`]: [`types::PackageInfo`], [`types::CustomPackage`],
//!   [`types::DependencySpec`].
//! - [`native`]: the capability traits decoupling this crate from pacman,
//!   subprocess execution, and interactive review/confirmation.
//! - [`store`]: the persistent, atomically-saved key-value store.
//! - [`search`]: [`search::Search`], turning a bare dependency name into
//!   a resolved [`types::PackageInfo`].
//! - [`depgraph`]: [`depgraph::DepGraph`], cycle detection and
//!   topological build-order extraction.
//! - [`resolver`]: [`resolver::Resolver`], driving [`search`] and
//!   [`depgraph`] together into a [`resolver::ResolvedDependencies`] plan.
//! - [`cache`]: the built-artifact cache layered over [`store::Store`].
//! - [`builder`]: [`builder::Builder`], chroot-based package building.
//! - [`reconciler`]: [`reconciler::Reconciler`], the top-level
//!   remove/demote/upgrade/install procedure.
//!
//! # Example
//!
//! ```no_run
//! use archstate_core::config::Config;
//! use archstate_core::native::{AlwaysApprove, FirstChoiceSelector};
//! use archstate_core::reconciler::{ApplyOptions, DesiredState, Reconciler};
//! use archstate_core::search::Search;
//! use archstate_core::search::transport::ReqwestAurTransport;
//! use archstate_core::store::Store;
//! use std::collections::BTreeSet;
//!
//! # async fn example(
//! #     native: &dyn archstate_core::native::NativePackageCapability,
//! #     runner: &dyn archstate_core::native::CommandRunner,
//! # ) -> archstate_core::error::Result<()> {
//! let config = Config::default();
//! let transport = ReqwestAurTransport::new(config.aur_base_url.clone(), config.aur_rpc_timeout)?;
//! let search = Search::new(Box::new(transport), &config);
//! let reviewer = AlwaysApprove;
//! let selector = FirstChoiceSelector;
//! let reconciler = Reconciler::new(&config, &search, native, runner, &reviewer, &selector);
//!
//! let mut store = Store::open("/var/lib/archstate/store.json", false)?;
//! let desired = DesiredState {
//!     packages: BTreeSet::from(["yay".to_string()]),
//!     ..Default::default()
//! };
//! reconciler.apply(&desired, &mut store, ApplyOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod depgraph;
pub mod error;
pub mod native;
pub mod reconciler;
pub mod resolver;
pub mod search;
pub mod store;
pub mod types;

pub mod prelude;

pub use error::{Error, Result};
