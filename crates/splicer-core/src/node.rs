// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Concrete spec nodes, dependency edges and the hash-keyed node arena.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::deptypes::DepTypes;
use crate::ident::{CanonicalHasher, SpecHash, SPEC_HASH_DOMAIN};
use crate::variant::{render_variants, VariantMap};
use crate::version::Version;

/// Namespace assigned to packages that do not name one.
pub const DEFAULT_NAMESPACE: &str = "builtin";

/// Platform and target facts of a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Arch {
    /// Operating platform, e.g. `linux`.
    pub platform: String,
    /// Microarchitecture target, e.g. `x86_64`.
    pub target: String,
}

impl Default for Arch {
    fn default() -> Self {
        Self {
            platform: "linux".to_string(),
            target: "x86_64".to_string(),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.target)
    }
}

/// Fixed identity attributes of a single package instantiation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    /// Package name.
    pub name: String,
    /// Repository namespace the package came from.
    pub namespace: String,
    /// Exact version.
    pub version: Version,
    /// Every declared variant with its assigned value.
    pub variants: VariantMap,
    /// Platform/target facts.
    pub arch: Arch,
}

impl NodeIdentity {
    /// Identity in the default namespace with default arch and no variants.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            version,
            variants: VariantMap::new(),
            arch: Arch::default(),
        }
    }

    fn hash_into(&self, hasher: &mut CanonicalHasher) {
        hasher.str(&self.name);
        hasher.str(&self.namespace);
        hasher.str(&self.version.to_string());
        hasher.length(self.variants.len());
        for (name, value) in &self.variants {
            hasher.str(name);
            value.hash_into(hasher);
        }
        hasher.str(&self.arch.platform);
        hasher.str(&self.arch.target);
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@={}{} arch={}",
            self.name,
            self.version,
            render_variants(&self.variants),
            self.arch
        )
    }
}

/// Directed relation from a consumer to one of its dependencies.
///
/// Edges are values: rewriting a graph always produces fresh edges pointing at
/// the (possibly shared) child.
#[derive(Clone, Debug)]
pub struct DependencyEdge {
    child: Arc<SpecNode>,
    deptypes: DepTypes,
    virtuals: BTreeSet<String>,
}

impl DependencyEdge {
    /// Literal edge of the given types.
    pub fn new(child: Arc<SpecNode>, deptypes: DepTypes) -> Self {
        Self {
            child,
            deptypes,
            virtuals: BTreeSet::new(),
        }
    }

    /// Marks the edge as satisfying the named virtual interfaces.
    pub fn with_virtuals<I, S>(mut self, virtuals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.virtuals.extend(virtuals.into_iter().map(Into::into));
        self
    }

    /// The dependency node.
    pub fn child(&self) -> &Arc<SpecNode> {
        &self.child
    }

    /// Why the dependency exists.
    pub fn deptypes(&self) -> DepTypes {
        self.deptypes
    }

    /// Virtual interfaces satisfied through this edge.
    pub fn virtuals(&self) -> &BTreeSet<String> {
        &self.virtuals
    }

    /// Same edge attributes pointing at a different child.
    pub fn with_child(&self, child: Arc<SpecNode>) -> Self {
        Self {
            child,
            deptypes: self.deptypes,
            virtuals: self.virtuals.clone(),
        }
    }

    /// Same edge with a different dependency-type set.
    pub fn with_deptypes(&self, deptypes: DepTypes) -> Self {
        Self {
            child: Arc::clone(&self.child),
            deptypes,
            virtuals: self.virtuals.clone(),
        }
    }

    /// Returns `true` if the edge reaches `name` literally or as a virtual.
    pub fn reaches(&self, name: &str) -> bool {
        self.child.name() == name || self.virtuals.contains(name)
    }
}

/// A fully concrete, immutable package node.
///
/// Construction is the only way to obtain one, and construction computes the
/// content hash; there is no mutating API. `build_spec` and `external` are
/// provenance and are not part of the hash.
#[derive(Debug)]
pub struct SpecNode {
    identity: NodeIdentity,
    edges: Vec<DependencyEdge>,
    hash: SpecHash,
    build_spec: Option<Arc<SpecNode>>,
    external: Option<String>,
}

impl SpecNode {
    /// Builds a node over already-concrete children.
    ///
    /// Edges to the same child are merged (dependency types OR-ed, virtuals
    /// unioned) so each (parent, child) pair appears once, then sorted by
    /// child name and hash so the hash is independent of declaration order.
    pub fn new(identity: NodeIdentity, edges: Vec<DependencyEdge>) -> Self {
        let edges = canonical_edges(edges);
        let hash = Self::compute_hash(&identity, &edges);
        Self {
            identity,
            edges,
            hash,
            build_spec: None,
            external: None,
        }
    }

    /// Records the pre-splice node this one was derived from.
    #[must_use]
    pub fn with_build_spec(mut self, build_spec: Arc<SpecNode>) -> Self {
        self.build_spec = Some(build_spec);
        self
    }

    /// Records the external prefix this node lives at.
    #[must_use]
    pub fn with_external(mut self, prefix: impl Into<String>) -> Self {
        self.external = Some(prefix.into());
        self
    }

    /// Canonical hash over `identity` and `edges`.
    pub fn compute_hash(identity: &NodeIdentity, edges: &[DependencyEdge]) -> SpecHash {
        let mut hasher = CanonicalHasher::new(SPEC_HASH_DOMAIN);
        identity.hash_into(&mut hasher);
        hasher.length(edges.len());
        for edge in edges {
            hasher.hash(&edge.child.hash);
            hasher.byte(edge.deptypes.bits());
            hasher.length(edge.virtuals.len());
            for v in &edge.virtuals {
                hasher.str(v);
            }
        }
        hasher.finish()
    }

    /// Re-derives this node's hash from its identity and children's stored hashes.
    pub fn verify_hash(&self) -> bool {
        Self::compute_hash(&self.identity, &self.edges) == self.hash
    }

    /// Content hash.
    pub fn hash(&self) -> SpecHash {
        self.hash
    }

    /// Identity attributes.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Exact version.
    pub fn version(&self) -> &Version {
        &self.identity.version
    }

    /// Variant assignments.
    pub fn variants(&self) -> &VariantMap {
        &self.identity.variants
    }

    /// All outgoing edges in canonical order.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Outgoing edges whose types intersect `filter`.
    pub fn dependencies(&self, filter: DepTypes) -> impl Iterator<Item = &DependencyEdge> {
        self.edges
            .iter()
            .filter(move |e| e.deptypes.intersects(filter))
    }

    /// The direct dependency edge reaching `name`, literally or as a virtual.
    pub fn edge_to(&self, name: &str) -> Option<&DependencyEdge> {
        self.edges.iter().find(|e| e.reaches(name))
    }

    /// What this node was resolved to before a splice, if one happened.
    pub fn build_spec(&self) -> Option<&Arc<SpecNode>> {
        self.build_spec.as_ref()
    }

    /// Returns `true` if a splice occurred on or below this node.
    pub fn is_spliced(&self) -> bool {
        self.build_spec.is_some()
    }

    /// External prefix, for nodes declared as externals.
    pub fn external(&self) -> Option<&str> {
        self.external.as_deref()
    }
}

impl fmt::Display for SpecNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.identity, self.hash.short())
    }
}

fn canonical_edges(edges: Vec<DependencyEdge>) -> Vec<DependencyEdge> {
    let mut merged: BTreeMap<(String, SpecHash), DependencyEdge> = BTreeMap::new();
    for edge in edges {
        let key = (edge.child.name().to_string(), edge.child.hash);
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.deptypes |= edge.deptypes;
                existing.virtuals.extend(edge.virtuals);
            }
            None => {
                merged.insert(key, edge);
            }
        }
    }
    merged.into_values().collect()
}

/// Hash-keyed interning table used while building graphs.
///
/// Interning a node whose hash is already present returns the existing `Arc`,
/// so identical subtrees are stored once and shared by reference.
#[derive(Debug, Default, Clone)]
pub struct NodeArena {
    nodes: BTreeMap<SpecHash, Arc<SpecNode>>,
}

impl NodeArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `node`, returning the canonical shared instance for its hash.
    ///
    /// When a node with the same hash is already present, the stored one wins
    /// unless the incoming node carries provenance the stored one lacks.
    pub fn intern(&mut self, node: SpecNode) -> Arc<SpecNode> {
        if let Some(existing) = self.nodes.get(&node.hash) {
            if existing.build_spec.is_some() || node.build_spec.is_none() {
                return Arc::clone(existing);
            }
        }
        let node = Arc::new(node);
        self.nodes.insert(node.hash, Arc::clone(&node));
        node
    }

    /// Registers an existing shared node (and its closure) without copying.
    pub fn adopt(&mut self, node: &Arc<SpecNode>) -> Arc<SpecNode> {
        let mut stack = vec![Arc::clone(node)];
        while let Some(current) = stack.pop() {
            if self.nodes.contains_key(&current.hash) {
                continue;
            }
            stack.extend(current.edges.iter().map(|e| Arc::clone(&e.child)));
            self.nodes.insert(current.hash, current);
        }
        self.nodes
            .get(&node.hash)
            .map_or_else(|| Arc::clone(node), Arc::clone)
    }

    /// Looks up a node by hash.
    pub fn get(&self, hash: &SpecHash) -> Option<&Arc<SpecNode>> {
        self.nodes.get(hash)
    }

    /// Number of distinct nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::variant::VariantValue;

    fn leaf(name: &str, version: &str) -> SpecNode {
        SpecNode::new(NodeIdentity::new(name, Version::parse(version).unwrap()), vec![])
    }

    #[test]
    fn hash_depends_on_identity_and_children() {
        let z0 = Arc::new(leaf("z", "1.0.0"));
        let z1 = Arc::new(leaf("z", "1.0.1"));
        assert_ne!(z0.hash(), z1.hash());

        let id = NodeIdentity::new("h", Version::parse("1.0").unwrap());
        let h0 = SpecNode::new(id.clone(), vec![DependencyEdge::new(z0, DepTypes::DEFAULT)]);
        let h1 = SpecNode::new(id, vec![DependencyEdge::new(z1, DepTypes::DEFAULT)]);
        assert_ne!(h0.hash(), h1.hash());
        assert!(h0.verify_hash());
    }

    #[test]
    fn provenance_is_not_hashed() {
        let plain = leaf("z", "1.0.2");
        let hash = plain.hash();
        let external = leaf("z", "1.0.2").with_external("/usr");
        let with_build = leaf("z", "1.0.2").with_build_spec(Arc::new(leaf("z", "1.0.0")));
        assert_eq!(external.hash(), hash);
        assert_eq!(with_build.hash(), hash);
        assert!(with_build.is_spliced());
    }

    #[test]
    fn duplicate_edges_merge_and_order_is_canonical() {
        let a = Arc::new(leaf("a", "1"));
        let b = Arc::new(leaf("b", "1"));
        let id = NodeIdentity::new("root", Version::parse("1").unwrap());
        let forward = SpecNode::new(
            id.clone(),
            vec![
                DependencyEdge::new(Arc::clone(&a), DepTypes::BUILD),
                DependencyEdge::new(Arc::clone(&b), DepTypes::LINK),
                DependencyEdge::new(Arc::clone(&a), DepTypes::LINK),
            ],
        );
        let backward = SpecNode::new(
            id,
            vec![
                DependencyEdge::new(Arc::clone(&b), DepTypes::LINK),
                DependencyEdge::new(a, DepTypes::DEFAULT),
            ],
        );
        assert_eq!(forward.edges().len(), 2);
        assert_eq!(forward.edges()[0].deptypes(), DepTypes::DEFAULT);
        assert_eq!(forward.hash(), backward.hash());
    }

    #[test]
    fn variants_participate_in_hash() {
        let mut id = NodeIdentity::new("m", Version::parse("2.0.0").unwrap());
        id.variants.insert("a".into(), VariantValue::Bool(true));
        let on = SpecNode::new(id.clone(), vec![]);
        id.variants.insert("a".into(), VariantValue::Bool(false));
        let off = SpecNode::new(id, vec![]);
        assert_ne!(on.hash(), off.hash());
    }

    #[test]
    fn arena_dedups_by_hash() {
        let mut arena = NodeArena::new();
        let first = arena.intern(leaf("z", "1.0.0"));
        let second = arena.intern(leaf("z", "1.0.0"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(arena.len(), 1);
    }
}
