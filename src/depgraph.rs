//! Dependency graph bookkeeping for foreign packages: cycle detection and
//! topological extraction of a buildable order.
//!
//! Mirrors the reconciliation tool's own dependency graph exactly: a
//! package only becomes buildable once every package that depends on it
//! has had its foreign dependencies fully resolved, and
//! [`DepGraph::drain_outer`] repeatedly peels off the current "childless"
//! frontier, propagating each peeled package's transitive foreign
//! dependency set up to its parents as it goes.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// What: A foreign package's accumulated transitive foreign dependency set,
/// built up as [`DepGraph::drain_outer`] peels its children off the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignPackage {
    /// Package name.
    pub name: String,
    all_recursive_foreign_deps: BTreeSet<String>,
}

impl ForeignPackage {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            all_recursive_foreign_deps: BTreeSet::new(),
        }
    }

    /// What: Record that `names` are (now known to be) foreign
    /// dependencies of this package, directly or transitively.
    pub fn add_foreign_dependency_packages(&mut self, names: impl IntoIterator<Item = String>) {
        self.all_recursive_foreign_deps.extend(names);
    }

    /// What: Every foreign package this one depends on, directly or
    /// transitively, as currently known.
    #[must_use]
    pub fn all_recursive_foreign_deps(&self) -> &BTreeSet<String> {
        &self.all_recursive_foreign_deps
    }
}

/// A node in the [`DepGraph`], tracking its immediate parents and children
/// by name.
#[derive(Debug)]
struct DepNode {
    pkg: ForeignPackage,
    parents: BTreeSet<String>,
    children: BTreeSet<String>,
}

impl DepNode {
    fn new(name: &str) -> Self {
        Self {
            pkg: ForeignPackage::new(name),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }
}

/// What: A dependency graph over foreign packages, supporting incremental
/// construction and repeated extraction of the current buildable frontier.
///
/// Inputs: built up via repeated [`DepGraph::add_requirement`] calls.
///
/// Output: [`ForeignPackage`] values in build order, via repeated
/// [`DepGraph::drain_outer`] calls until the graph is empty of childless
/// nodes.
///
/// Details:
/// - Node iteration order is always lexicographic by package name
///   (backed by `BTreeSet`), so the order of [`DepGraph::drain_outer`]
///   results is deterministic for a given set of requirements.
#[derive(Debug, Default)]
pub struct DepGraph {
    nodes: std::collections::BTreeMap<String, DepNode>,
    childless_names: BTreeSet<String>,
}

impl DepGraph {
    /// What: Create an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// What: Record that `child_pkgname` is a foreign dependency of
    /// `parent_pkgname`, creating either node if it does not already
    /// exist.
    ///
    /// Inputs:
    /// - `child_pkgname`: the dependency being required.
    /// - `parent_pkgname`: the package requiring it, or `None` to just
    ///   register `child_pkgname` as a root package with no dependant yet.
    ///
    /// # Errors
    /// Returns [`Error::DependencyCycle`] if `child_pkgname` is already an
    /// ancestor of `parent_pkgname` (i.e. adding this edge would create a
    /// cycle).
    pub fn add_requirement(&mut self, child_pkgname: &str, parent_pkgname: Option<&str>) -> Result<()> {
        self.nodes
            .entry(child_pkgname.to_string())
            .or_insert_with(|| DepNode::new(child_pkgname));
        if self.nodes[child_pkgname].children.is_empty() {
            self.childless_names.insert(child_pkgname.to_string());
        }

        let Some(parent_pkgname) = parent_pkgname else {
            return Ok(());
        };

        if self.nodes.contains_key(parent_pkgname)
            && self.pkgname_in_parents_recursive(parent_pkgname, child_pkgname)
        {
            return Err(Error::DependencyCycle {
                package: child_pkgname.to_string(),
                parent: parent_pkgname.to_string(),
            });
        }
        self.nodes
            .entry(parent_pkgname.to_string())
            .or_insert_with(|| DepNode::new(parent_pkgname));

        self.nodes
            .get_mut(parent_pkgname)
            .expect("just inserted")
            .children
            .insert(child_pkgname.to_string());
        self.nodes
            .get_mut(child_pkgname)
            .expect("inserted above")
            .parents
            .insert(parent_pkgname.to_string());
        self.childless_names.remove(parent_pkgname);
        Ok(())
    }

    fn pkgname_in_parents_recursive(&self, node_name: &str, target: &str) -> bool {
        let Some(node) = self.nodes.get(node_name) else {
            return false;
        };
        node.parents
            .iter()
            .any(|parent| parent == target || self.pkgname_in_parents_recursive(parent, target))
    }

    /// What: Extract and remove the current frontier of childless nodes
    /// (packages with no remaining unresolved foreign dependencies),
    /// propagating each one's transitive foreign dependency set up to its
    /// parents.
    ///
    /// Output: the peeled [`ForeignPackage`] values, in build order (each
    /// one is safe to build once every package returned by a prior call —
    /// and every other package in this same call — has been built).
    ///
    /// Details: repeated calls drain the graph's frontier layer by layer;
    /// once a call returns an empty `Vec`, every node has been peeled and
    /// the graph holds no further buildable work.
    pub fn drain_outer(&mut self) -> Vec<ForeignPackage> {
        let childless_names: Vec<String> = self.childless_names.iter().cloned().collect();
        let mut new_childless = BTreeSet::new();
        let mut result = Vec::with_capacity(childless_names.len());

        for name in &childless_names {
            let (mut deps, pkg, parents) = {
                let node = self.nodes.get(name).expect("childless node must exist");
                let deps = node.pkg.all_recursive_foreign_deps().clone();
                (deps, node.pkg.clone(), node.parents.clone())
            };
            deps.insert(pkg.name.clone());

            for parent_name in &parents {
                if let Some(parent_node) = self.nodes.get_mut(parent_name) {
                    parent_node
                        .pkg
                        .add_foreign_dependency_packages(deps.iter().cloned());
                    parent_node.children.remove(name);
                    if parent_node.children.is_empty() {
                        new_childless.insert(parent_name.clone());
                    }
                }
            }
            result.push(pkg);
        }

        self.childless_names = new_childless;
        result
    }

    /// What: Whether the graph has no more childless packages to drain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.childless_names.is_empty()
    }
}
