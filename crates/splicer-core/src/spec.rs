// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rooted concrete dependency graphs.
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::deptypes::DepTypes;
use crate::error::SpecError;
use crate::ident::SpecHash;
use crate::node::{DependencyEdge, SpecNode};
use crate::request::{AbstractSpec, DependencyConstraint, NodeConstraint};
use crate::variant::render_variants;

/// A fully concrete dependency graph rooted at one node.
///
/// Cheap to clone: the graph is an immutable `Arc` DAG and clones share every
/// node.
#[derive(Clone, Debug)]
pub struct ConcreteSpec {
    root: Arc<SpecNode>,
}

impl ConcreteSpec {
    /// Wraps a root node.
    pub fn new(root: Arc<SpecNode>) -> Self {
        Self { root }
    }

    /// Root node.
    pub fn root(&self) -> &Arc<SpecNode> {
        &self.root
    }

    /// Root hash; the persisted identity of the whole graph.
    pub fn hash(&self) -> SpecHash {
        self.root.hash()
    }

    /// Root package name.
    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// Pre-splice graph, if a splice occurred on the root's path.
    pub fn build_spec(&self) -> Option<Self> {
        self.root.build_spec().map(|n| Self::new(Arc::clone(n)))
    }

    /// Deterministic pre-order walk of the closure, de-duplicated by hash,
    /// following edges whose types intersect `filter`. The root comes first.
    pub fn traverse(&self, filter: DepTypes) -> Vec<Arc<SpecNode>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut stack = vec![Arc::clone(&self.root)];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.hash()) {
                continue;
            }
            let children: Vec<_> = node
                .dependencies(filter)
                .map(|e| Arc::clone(e.child()))
                .collect();
            stack.extend(children.into_iter().rev());
            out.push(node);
        }
        out
    }

    /// Every edge in the closure together with its consumer.
    fn edges(&self) -> Vec<(Arc<SpecNode>, DependencyEdge)> {
        self.traverse(DepTypes::ALL)
            .into_iter()
            .flat_map(|node| {
                node.edges()
                    .iter()
                    .map(|e| (Arc::clone(&node), e.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// First node named `name`, searching link/run reachable nodes before
    /// build-only ones.
    pub fn node_named(&self, name: &str) -> Option<Arc<SpecNode>> {
        self.traverse(DepTypes::LINK_RUN)
            .into_iter()
            .find(|n| n.name() == name)
            .or_else(|| {
                self.traverse(DepTypes::ALL)
                    .into_iter()
                    .find(|n| n.name() == name)
            })
    }

    /// Number of distinct nodes in the closure.
    pub fn len(&self) -> usize {
        self.traverse(DepTypes::ALL).len()
    }

    /// Always `false`: a spec has at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if this graph meets every constraint of `request`.
    ///
    /// The root must match the root constraint. Each `^dependency` must be
    /// matched by some edge in the closure that reaches a node of that name
    /// (or satisfies that virtual) and carries the bracketed edge attributes.
    pub fn satisfies(&self, request: &AbstractSpec) -> bool {
        if !request.root().matches(self.root.identity()) {
            return false;
        }
        if request.dependencies().is_empty() {
            return true;
        }
        let edges = self.edges();
        request
            .dependencies()
            .iter()
            .all(|dep| edges.iter().any(|(_, edge)| edge_satisfies(edge, dep)))
    }

    /// Returns `true` if this graph contains every node of `other` exactly.
    pub fn satisfies_concrete(&self, other: &Self) -> bool {
        self.satisfies(&other.to_request())
    }

    /// Exact request matched by graphs that contain every node of this one.
    pub fn to_request(&self) -> AbstractSpec {
        let mut request = AbstractSpec::new(NodeConstraint::exact(self.root.identity()));
        let mut seen = BTreeSet::new();
        for (_, edge) in self.edges() {
            if !seen.insert((edge.child().hash(), edge.virtuals().clone())) {
                continue;
            }
            let mut dep = DependencyConstraint::new(NodeConstraint::exact(edge.child().identity()));
            dep.virtuals = edge.virtuals().clone();
            request = request.with_dependency(dep);
        }
        request
    }

    /// Re-derives every hash in the closure and its build provenance.
    ///
    /// # Errors
    ///
    /// [`SpecError::HashMismatch`] naming the first node whose stored hash
    /// differs from the recomputed one.
    pub fn verify(&self) -> Result<(), SpecError> {
        let mut pending = vec![self.clone()];
        let mut checked = BTreeSet::new();
        while let Some(spec) = pending.pop() {
            for node in spec.traverse(DepTypes::ALL) {
                if !checked.insert(node.hash()) {
                    continue;
                }
                let computed = SpecNode::compute_hash(node.identity(), node.edges());
                if computed != node.hash() {
                    return Err(SpecError::HashMismatch {
                        package: node.name().to_string(),
                        expected: node.hash(),
                        computed,
                    });
                }
                if let Some(build) = node.build_spec() {
                    pending.push(Self::new(Arc::clone(build)));
                }
            }
        }
        Ok(())
    }

    /// Indented multi-line rendering with edge types and short hashes.
    pub fn tree(&self) -> String {
        let mut out = String::new();
        let mut seen = BTreeSet::new();
        render_tree(&mut out, &self.root, None, 0, &mut seen);
        out
    }
}

fn edge_satisfies(edge: &DependencyEdge, dep: &DependencyConstraint) -> bool {
    let name = dep.name();
    let child = edge.child().identity();
    let node_ok = if child.name == name {
        dep.node.matches(child)
    } else if edge.virtuals().contains(name) {
        dep.node.matches_attributes(child)
    } else {
        false
    };
    node_ok
        && dep.virtuals.is_subset(edge.virtuals())
        && dep.deptypes.is_none_or(|d| edge.deptypes().contains(d))
}

fn render_tree(
    out: &mut String,
    node: &Arc<SpecNode>,
    via: Option<&DependencyEdge>,
    depth: usize,
    seen: &mut BTreeSet<SpecHash>,
) {
    let marker = via.map_or_else(String::new, |e| {
        let flags: String = [
            (DepTypes::BUILD, 'b'),
            (DepTypes::LINK, 'l'),
            (DepTypes::RUN, 'r'),
            (DepTypes::TEST, 't'),
        ]
        .iter()
        .map(|(ty, c)| if e.deptypes().contains(*ty) { *c } else { ' ' })
        .collect();
        format!("[{flags}] ")
    });
    let identity = node.identity();
    let _ = write!(
        out,
        "{:indent$}{marker}{}@={}{}",
        "",
        identity.name,
        identity.version,
        render_variants(&identity.variants),
        indent = depth * 4
    );
    if let Some(prefix) = node.external() {
        let _ = write!(out, " [external {prefix}]");
    }
    if node.is_spliced() {
        out.push_str(" [spliced]");
    }
    let _ = writeln!(out, " /{}", node.hash().short());
    if !seen.insert(node.hash()) {
        return;
    }
    for edge in node.edges() {
        render_tree(out, edge.child(), Some(edge), depth + 1, seen);
    }
}

impl fmt::Display for ConcreteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.traverse(DepTypes::ALL).iter().enumerate() {
            let identity = node.identity();
            if i > 0 {
                f.write_str(" ^")?;
            }
            write!(
                f,
                "{}@={}{}",
                identity.name,
                identity.version,
                render_variants(&identity.variants)
            )?;
        }
        Ok(())
    }
}
