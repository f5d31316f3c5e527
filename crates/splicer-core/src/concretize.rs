// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request-to-graph orchestration.
//!
//! [`Concretizer::concretize`] validates the request, assembles reuse
//! candidates from the pool and configured externals, runs a strict solve and,
//! when that fails and splicing is enabled, a relaxed solve whose substitutions
//! are applied by the [`SpliceEngine`].
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::deptypes::DepTypes;
use crate::error::{ConcretizeError, InvalidConstraintError, UnsatisfiableSpecError};
use crate::ident::SpecHash;
use crate::node::{Arch, DependencyEdge, NodeArena, NodeIdentity, SpecNode, DEFAULT_NAMESPACE};
use crate::policy::Policy;
use crate::repo::Repository;
use crate::request::{AbstractSpec, NodeConstraint};
use crate::solver::{
    Assignment, BacktrackingSolver, Candidate, CandidateOrigin, Choice, PinMode, Problem, Solver,
};
use crate::spec::ConcreteSpec;
use crate::splice::{SpliceEngine, SpliceReport, SpliceSite};
use crate::store::ReusePool;

/// Result of one successful concretization.
#[derive(Clone, Debug)]
pub struct Resolution {
    /// The concrete graph.
    pub spec: ConcreteSpec,
    /// Splice sites applied while producing `spec`.
    pub splices: SpliceReport,
    /// Hashes of nodes in `spec` taken unchanged from the pool or externals.
    pub reused: BTreeSet<SpecHash>,
}

impl Resolution {
    /// Returns `true` if any node was spliced.
    pub fn is_spliced(&self) -> bool {
        self.splices.spliced() > 0
    }
}

/// Turns abstract requests into concrete graphs.
pub struct Concretizer<'r> {
    repo: &'r dyn Repository,
    solver: Box<dyn Solver>,
    policy: Policy,
}

impl<'r> Concretizer<'r> {
    /// Concretizer over `repo` using the [`BacktrackingSolver`].
    pub fn new(repo: &'r dyn Repository, policy: Policy) -> Self {
        Self {
            repo,
            solver: Box::new(BacktrackingSolver::new()),
            policy,
        }
    }

    /// Replaces the solver backend.
    #[must_use]
    pub fn with_solver(mut self, solver: Box<dyn Solver>) -> Self {
        self.solver = solver;
        self
    }

    /// Active policy.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Parses `request` and concretizes it.
    ///
    /// # Errors
    ///
    /// See [`concretize`](Self::concretize); parse failures map to
    /// [`ConcretizeError::Parse`].
    pub fn concretize_str(&self, request: &str, pool: &ReusePool) -> Result<Resolution, ConcretizeError> {
        let request = AbstractSpec::parse(request)?;
        self.concretize(&request, pool)
    }

    /// Concretizes `request` against a snapshot of installed specs.
    ///
    /// # Errors
    ///
    /// - [`ConcretizeError::UnknownPackage`] / [`ConcretizeError::InvalidConstraint`]
    ///   before solving,
    /// - [`ConcretizeError::Unsatisfiable`] when no assignment exists,
    /// - [`ConcretizeError::Splice`] when a required splice is not eligible.
    #[instrument(skip_all, fields(request = %request))]
    pub fn concretize(&self, request: &AbstractSpec, pool: &ReusePool) -> Result<Resolution, ConcretizeError> {
        self.validate(request)?;

        let closure = self.closure_names(request);
        let mut candidates = Vec::new();
        if self.policy.reuse {
            candidates.extend(
                pool.nodes()
                    .into_iter()
                    .filter(|node| closure.contains(node.name()))
                    .map(|node| Candidate {
                        node,
                        origin: CandidateOrigin::Installed,
                    }),
            );
        }
        candidates.extend(self.external_candidates()?);
        debug!(candidates = candidates.len(), "assembled reuse candidates");

        let non_buildable: BTreeSet<String> = self
            .policy
            .packages
            .iter()
            .filter(|(_, p)| !p.buildable)
            .map(|(name, _)| name.clone())
            .collect();
        let engine = SpliceEngine::new(self.repo, self.policy.splice.match_variants.clone());
        let mut problem = Problem {
            request,
            candidates: &candidates,
            non_buildable: &non_buildable,
            pins: PinMode::Hard,
            splice_check: None,
        };

        let assignment = match self.solver.solve(&problem, self.repo) {
            Ok(assignment) => assignment,
            Err(strict) if self.policy.splice.automatic => {
                warn!(error = %strict, "strict solve failed; retrying with splicing");
                problem.pins = PinMode::Soft;
                problem.splice_check = Some(&engine);
                self.solver.solve(&problem, self.repo)?
            }
            Err(strict) => return Err(strict.into()),
        };

        let mut arena = NodeArena::new();
        let mut built = BTreeMap::new();
        let root = build_node(&assignment.root, &assignment, &mut built, &mut BTreeSet::new(), &mut arena)?;
        // Replacements reached only through splice sites are not under the
        // pre-splice root yet.
        for slot in assignment.choices.keys() {
            build_node(slot, &assignment, &mut built, &mut BTreeSet::new(), &mut arena)?;
        }
        let pre_splice = ConcreteSpec::new(root);

        let pool_hashes: BTreeSet<SpecHash> = pool
            .nodes()
            .iter()
            .chain(candidates.iter().map(|c| &c.node))
            .map(|n| n.hash())
            .collect();

        let (spec, splices) = if assignment.substitutions.is_empty() {
            (pre_splice, SpliceReport::default())
        } else {
            let sites = assignment
                .substitutions
                .iter()
                .map(|sub| {
                    let consumer = arena.get(&sub.consumer).cloned();
                    let replacement = built.get(&sub.replacement).cloned();
                    match (consumer, replacement) {
                        (Some(consumer), Some(replacement)) => Ok(SpliceSite::new(
                            &consumer,
                            Arc::clone(&sub.original),
                            replacement,
                            sub.goal.clone(),
                            sub.virtuals.clone(),
                        )),
                        _ => Err(UnsatisfiableSpecError {
                            package: sub.original.name().to_string(),
                            requested: sub.goal.to_string(),
                            nearest: Some(sub.replacement.clone()),
                            reason: "substitution does not appear in the solved graph".to_string(),
                        }),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            engine.apply(&pre_splice, sites, &pool_hashes)?
        };

        if !spec.satisfies(request) {
            return Err(UnsatisfiableSpecError {
                package: request.name().to_string(),
                requested: request.to_string(),
                nearest: Some(spec.root().identity().to_string()),
                reason: "solved graph does not satisfy the request".to_string(),
            }
            .into());
        }
        spec.verify()?;

        let reused: BTreeSet<SpecHash> = spec
            .traverse(DepTypes::ALL)
            .iter()
            .map(|n| n.hash())
            .filter(|h| pool_hashes.contains(h))
            .collect();
        info!(
            root = %spec.root(),
            nodes = spec.len(),
            reused = reused.len(),
            spliced = splices.spliced(),
            "concretized"
        );
        Ok(Resolution {
            spec,
            splices,
            reused,
        })
    }

    /// Rejects unknown names, undeclared variants or values, and clauses on
    /// one name that contradict each other.
    fn validate(&self, request: &AbstractSpec) -> Result<(), ConcretizeError> {
        let mut merged: BTreeMap<&str, NodeConstraint> = BTreeMap::new();
        for constraint in request.constraints() {
            if let Some(name) = constraint.name.as_deref() {
                match merged.get_mut(name) {
                    Some(existing) => existing.constrain(constraint)?,
                    None => {
                        merged.insert(name, constraint.clone());
                    }
                }
            }
        }
        for constraint in request.constraints() {
            let name = constraint.label();
            let is_package = self.repo.exists(name);
            if !is_package && !self.repo.is_virtual(name) {
                return Err(ConcretizeError::UnknownPackage(name.to_string()));
            }
            if !is_package {
                continue;
            }
            let domain = self.repo.variant_domain(name);
            for (variant, value) in &constraint.variants {
                let decl = domain.iter().find(|d| &d.name == variant).ok_or_else(|| {
                    InvalidConstraintError::new(name, format!("unknown variant `{variant}`"))
                })?;
                decl.check(name, value)?;
            }
        }
        Ok(())
    }

    /// Every package name reachable from the request through any declared
    /// dependency condition or provider.
    fn closure_names(&self, request: &AbstractSpec) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = request.constraints().map(|c| c.label().to_string()).collect();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            queue.extend(self.repo.providers(&name));
            queue.extend(
                self.repo
                    .dependency_conditions(&name)
                    .iter()
                    .map(|c| c.name().to_string()),
            );
        }
        seen
    }

    /// One candidate per configured external.
    fn external_candidates(&self) -> Result<Vec<Candidate>, ConcretizeError> {
        let mut out = Vec::new();
        for (package, decl) in self.policy.externals() {
            let constraint = NodeConstraint::parse(&decl.spec)?;
            if constraint.name.as_deref().is_some_and(|n| n != package) {
                return Err(InvalidConstraintError::new(
                    package,
                    format!("external `{}` names a different package", decl.spec),
                )
                .into());
            }
            let version = constraint.version.pinned().cloned().ok_or_else(|| {
                InvalidConstraintError::new(package, format!("external `{}` must pin a version", decl.spec))
            })?;
            let mut variants = self.repo.default_variants(package);
            variants.extend(constraint.variants.clone());
            let mut arch = Arch::default();
            if let Some(platform) = constraint.platform {
                arch.platform = platform;
            }
            if let Some(target) = constraint.target {
                arch.target = target;
            }
            let identity = NodeIdentity {
                name: package.to_string(),
                namespace: constraint
                    .namespace
                    .or_else(|| self.repo.namespace(package))
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                version,
                variants,
                arch,
            };
            debug!(package, prefix = %decl.prefix, "registered external");
            out.push(Candidate {
                node: Arc::new(SpecNode::new(identity, Vec::new()).with_external(decl.prefix.clone())),
                origin: CandidateOrigin::External,
            });
        }
        Ok(out)
    }
}

/// Materializes the node chosen for `slot` and, recursively, its children.
fn build_node(
    slot: &str,
    assignment: &Assignment,
    built: &mut BTreeMap<String, Arc<SpecNode>>,
    visiting: &mut BTreeSet<String>,
    arena: &mut NodeArena,
) -> Result<Arc<SpecNode>, UnsatisfiableSpecError> {
    if let Some(node) = built.get(slot) {
        return Ok(Arc::clone(node));
    }
    let choice = assignment.choices.get(slot).ok_or_else(|| UnsatisfiableSpecError {
        package: slot.to_string(),
        requested: slot.to_string(),
        nearest: None,
        reason: "solver left the package unassigned".to_string(),
    })?;
    let node = match choice {
        Choice::Reuse(node) => arena.adopt(node),
        Choice::Build {
            identity,
            dependencies,
        } => {
            if !visiting.insert(slot.to_string()) {
                return Err(UnsatisfiableSpecError {
                    package: slot.to_string(),
                    requested: identity.to_string(),
                    nearest: None,
                    reason: "dependency cycle".to_string(),
                });
            }
            let mut edges = Vec::with_capacity(dependencies.len());
            for planned in dependencies {
                let child = build_node(&planned.slot, assignment, built, visiting, arena)?;
                edges.push(DependencyEdge::new(child, planned.deptypes).with_virtuals(planned.virtuals.iter().cloned()));
            }
            visiting.remove(slot);
            arena.intern(SpecNode::new(identity.clone(), edges))
        }
    };
    built.insert(slot.to_string(), Arc::clone(&node));
    Ok(node)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::repo::{MemoryRepository, PackageDef, VariantDecl};

    fn repo() -> MemoryRepository {
        MemoryRepository::new()
            .with(
                PackageDef::new("z")
                    .version("1.0.0")
                    .unwrap()
                    .version("1.0.1")
                    .unwrap()
                    .variant(VariantDecl::boolean("shared", true))
                    .can_splice("z@1.0.1", "z@1.0.0", None)
                    .unwrap(),
            )
            .with(
                PackageDef::new("h")
                    .version("1.0")
                    .unwrap()
                    .depends_on("z", DepTypes::DEFAULT)
                    .unwrap(),
            )
    }

    #[test]
    fn fresh_graph_uses_defaults() {
        let repo = repo();
        let concretizer = Concretizer::new(&repo, Policy::default());
        let resolution = concretizer.concretize_str("h", &ReusePool::new()).unwrap();
        assert_eq!(resolution.spec.to_string(), "h@=1.0 ^z@=1.0.1+shared");
        assert!(resolution.reused.is_empty());
        assert!(!resolution.is_spliced());
    }

    #[test]
    fn unknown_names_and_variants_are_rejected_early() {
        let repo = repo();
        let concretizer = Concretizer::new(&repo, Policy::default());
        let err = concretizer.concretize_str("nope", &ReusePool::new()).unwrap_err();
        assert_eq!(err, ConcretizeError::UnknownPackage("nope".into()));
        let err = concretizer.concretize_str("z+static", &ReusePool::new()).unwrap_err();
        assert!(matches!(err, ConcretizeError::InvalidConstraint(_)));
    }

    #[test]
    fn clauses_on_one_package_must_agree() {
        let repo = repo();
        let concretizer = Concretizer::new(&repo, Policy::default());
        for text in ["h ^z+shared ^z~shared", "h ^z@1.0.0 ^z@1.0.1", "h ^z platform=linux ^z platform=darwin"] {
            let err = concretizer.concretize_str(text, &ReusePool::new()).unwrap_err();
            assert!(matches!(err, ConcretizeError::InvalidConstraint(ref e) if e.package == "z"), "{text}: {err}");
        }

        let resolution = concretizer
            .concretize_str("h ^z@1.0:1.0.1 ^z@1.0.0+shared", &ReusePool::new())
            .unwrap();
        assert_eq!(resolution.spec.node_named("z").unwrap().version().as_str(), "1.0.0");
    }

    #[test]
    fn externals_must_pin_a_version() {
        let repo = repo();
        let policy = Policy::default().with_external("z", "z@1.0:", "/opt/z");
        let err = Concretizer::new(&repo, policy)
            .concretize_str("h", &ReusePool::new())
            .unwrap_err();
        assert!(matches!(err, ConcretizeError::InvalidConstraint(_)));
    }

    #[test]
    fn external_is_reused_when_package_is_not_buildable() {
        let repo = repo();
        let policy = Policy::default()
            .non_buildable("z")
            .with_external("z", "z@1.0.0~shared", "/opt/z");
        let resolution = Concretizer::new(&repo, policy)
            .concretize_str("h", &ReusePool::new())
            .unwrap();
        let z = resolution.spec.node_named("z").unwrap();
        assert_eq!(z.external(), Some("/opt/z"));
        assert!(resolution.reused.contains(&z.hash()));
    }
}
