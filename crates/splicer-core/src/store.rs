// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Installed-spec inventory and reuse-pool snapshots.
//!
//! The concretizer never reads installed state directly; callers take a
//! [`ReusePool`] snapshot and pass it to each resolution. Two resolutions that
//! must agree on what is installed should share one snapshot.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::deptypes::DepTypes;
use crate::ident::SpecHash;
use crate::node::SpecNode;
use crate::spec::ConcreteSpec;

/// Inventory of installed concrete specs keyed by root hash.
///
/// [`get`](InstallStore::get) returns `None` for missing specs; absence is
/// not an error.
pub trait InstallStore {
    /// Records `spec` as installed and returns its hash. Idempotent.
    fn install(&mut self, spec: &ConcreteSpec) -> SpecHash;

    /// Installed spec with root hash `hash`.
    fn get(&self, hash: &SpecHash) -> Option<ConcreteSpec>;

    /// Returns `true` if `hash` is installed as a root.
    fn has(&self, hash: &SpecHash) -> bool;

    /// Removes an installed root. Returns `true` if it was present.
    fn uninstall(&mut self, hash: &SpecHash) -> bool;

    /// Point-in-time copy of every installed spec, in install order.
    fn snapshot(&self) -> ReusePool;
}

/// In-memory [`InstallStore`].
#[derive(Debug, Default)]
pub struct MemoryInstallStore {
    specs: BTreeMap<SpecHash, (u64, ConcreteSpec)>,
    next_seq: u64,
}

impl MemoryInstallStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of installed roots.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` if nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl InstallStore for MemoryInstallStore {
    fn install(&mut self, spec: &ConcreteSpec) -> SpecHash {
        let hash = spec.hash();
        if !self.specs.contains_key(&hash) {
            self.specs.insert(hash, (self.next_seq, spec.clone()));
            self.next_seq += 1;
        }
        hash
    }

    fn get(&self, hash: &SpecHash) -> Option<ConcreteSpec> {
        self.specs.get(hash).map(|(_, spec)| spec.clone())
    }

    fn has(&self, hash: &SpecHash) -> bool {
        self.specs.contains_key(hash)
    }

    fn uninstall(&mut self, hash: &SpecHash) -> bool {
        self.specs.remove(hash).is_some()
    }

    fn snapshot(&self) -> ReusePool {
        let mut ordered: Vec<&(u64, ConcreteSpec)> = self.specs.values().collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        ReusePool::from_specs(ordered.into_iter().map(|(_, spec)| spec.clone()))
    }
}

/// Explicit snapshot of installed specs offered to one resolution.
#[derive(Clone, Debug, Default)]
pub struct ReusePool {
    specs: Vec<ConcreteSpec>,
}

impl ReusePool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool over `specs` in the given order.
    pub fn from_specs(specs: impl IntoIterator<Item = ConcreteSpec>) -> Self {
        Self {
            specs: specs.into_iter().collect(),
        }
    }

    /// Appends an installed spec.
    pub fn push(&mut self, spec: ConcreteSpec) {
        self.specs.push(spec);
    }

    /// Installed roots in pool order.
    pub fn specs(&self) -> &[ConcreteSpec] {
        &self.specs
    }

    /// Number of installed roots.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` when no spec is installed.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Every node of every installed graph, de-duplicated by hash, in pool
    /// order then pre-order.
    pub fn nodes(&self) -> Vec<Arc<SpecNode>> {
        let mut seen = BTreeSet::new();
        self.specs
            .iter()
            .flat_map(|spec| spec.traverse(DepTypes::ALL))
            .filter(|node| seen.insert(node.hash()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::node::{DependencyEdge, NodeIdentity};
    use crate::version::Version;

    fn spec(name: &str, child: Option<&ConcreteSpec>) -> ConcreteSpec {
        let edges = child
            .map(|c| vec![DependencyEdge::new(Arc::clone(c.root()), DepTypes::DEFAULT)])
            .unwrap_or_default();
        ConcreteSpec::new(Arc::new(SpecNode::new(
            NodeIdentity::new(name, Version::parse("1.0").unwrap()),
            edges,
        )))
    }

    #[test]
    fn install_is_idempotent_and_ordered() {
        let mut store = MemoryInstallStore::new();
        let z = spec("z", None);
        let h = spec("h", Some(&z));
        store.install(&h);
        store.install(&z);
        store.install(&h);
        assert_eq!(store.len(), 2);
        let pool = store.snapshot();
        assert_eq!(pool.specs()[0].name(), "h");
        let names: Vec<String> = pool.nodes().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, ["h", "z"]);
    }

    #[test]
    fn uninstall_removes_roots() {
        let mut store = MemoryInstallStore::new();
        let hash = store.install(&spec("z", None));
        assert!(store.has(&hash));
        assert!(store.get(&hash).is_some());
        assert!(store.uninstall(&hash));
        assert!(!store.uninstall(&hash));
        assert!(store.snapshot().is_empty());
    }
}
