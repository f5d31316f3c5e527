// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Constraint-solver port and the reference backtracking solver.
//!
//! A [`Solver`] receives a [`Problem`] (the request, reuse candidates and
//! policy constraints) and produces an [`Assignment`]: one [`Choice`] per
//! package name plus the provider bound to every edge that consumes a virtual
//! interface. The concretizer turns the assignment into a concrete graph.
//!
//! Provider bindings are scoped to the consuming slot: two consumers of the
//! same virtual may be wired to different providers. Only a provider the
//! request names explicitly is forced on every consumer.
//!
//! [`BacktrackingSolver`] is a deterministic depth-first oracle. It unifies
//! one node per package name and explores options in a fixed order:
//!
//! 1. the node a reused consumer was built against (its pin),
//! 2. other pool candidates, in pool order,
//! 3. fresh builds, newest version first, with repository defaults
//!    overridden by constraints (only for buildable packages).
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::deptypes::DepTypes;
use crate::error::UnsatisfiableSpecError;
use crate::ident::SpecHash;
use crate::node::{Arch, NodeIdentity, SpecNode, DEFAULT_NAMESPACE};
use crate::repo::Repository;
use crate::request::{AbstractSpec, NodeConstraint};
use crate::version::Version;

/// Failure of a solve; identical in shape to the public unsatisfiable error.
pub type Unsatisfiable = UnsatisfiableSpecError;

/// Where a reuse candidate came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateOrigin {
    /// A node of an installed graph.
    Installed,
    /// A configured external.
    External,
}

/// A concrete node offered for reuse.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// The node itself.
    pub node: Arc<SpecNode>,
    /// Where it came from.
    pub origin: CandidateOrigin,
}

/// How strictly a reused node's link/run children are held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinMode {
    /// Children must be exactly the nodes the consumer was built against.
    Hard,
    /// The original child is preferred; a different one is accepted when the
    /// [`SpliceCheck`] allows it, and is recorded as a [`Substitution`].
    Soft,
}

/// Top-level splice pre-check consulted for soft pins.
pub trait SpliceCheck {
    /// Returns `true` if a node with identity `replacement` may stand in for
    /// `original` behind an edge satisfying `virtuals`.
    fn can_substitute(
        &self,
        original: &NodeIdentity,
        replacement: &NodeIdentity,
        virtuals: &BTreeSet<String>,
    ) -> bool;
}

/// Input to one solve.
#[derive(Clone, Copy)]
pub struct Problem<'a> {
    /// The abstract request.
    pub request: &'a AbstractSpec,
    /// Reuse candidates in preference order.
    pub candidates: &'a [Candidate],
    /// Packages that may only be drawn from `candidates`.
    pub non_buildable: &'a BTreeSet<String>,
    /// Pin strictness for reused nodes.
    pub pins: PinMode,
    /// Splice pre-check; required for soft pins to admit anything.
    pub splice_check: Option<&'a dyn SpliceCheck>,
}

/// Key of a provider binding: the consuming slot (`None` for the request
/// root) and the virtual it consumes.
pub type ProviderKey = (Option<String>, String);

/// A planned edge from a freshly built node to the node chosen for `slot`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedEdge {
    /// Package name of the dependency.
    pub slot: String,
    /// Edge types.
    pub deptypes: DepTypes,
    /// Virtual interfaces satisfied by the edge.
    pub virtuals: BTreeSet<String>,
}

/// What the solver decided for one package name.
#[derive(Clone, Debug)]
pub enum Choice {
    /// Use an existing node (and its whole subtree) by reference.
    Reuse(Arc<SpecNode>),
    /// Build a new node.
    Build {
        /// Identity of the new node.
        identity: NodeIdentity,
        /// Its dependencies, by slot.
        dependencies: Vec<PlannedEdge>,
    },
}

impl Choice {
    /// Identity of the chosen node.
    pub fn identity(&self) -> &NodeIdentity {
        match self {
            Self::Reuse(node) => node.identity(),
            Self::Build { identity, .. } => identity,
        }
    }

    /// Returns `true` for reuse choices.
    pub fn is_reuse(&self) -> bool {
        matches!(self, Self::Reuse(_))
    }
}

/// A soft pin that resolved to a different node than the consumer was built
/// against.
#[derive(Clone, Debug)]
pub struct Substitution {
    /// Hash of the reused consumer.
    pub consumer: SpecHash,
    /// The child the consumer was built against.
    pub original: Arc<SpecNode>,
    /// Slot (package name) of the replacement.
    pub replacement: String,
    /// Constraint the replacement had to satisfy.
    pub goal: NodeConstraint,
    /// Virtuals of the consuming edge.
    pub virtuals: BTreeSet<String>,
}

/// Output of a successful solve.
#[derive(Clone, Debug)]
pub struct Assignment {
    /// Slot of the root node.
    pub root: String,
    /// One choice per package name.
    pub choices: BTreeMap<String, Choice>,
    /// Provider chosen for each consuming edge of a virtual interface.
    pub providers: BTreeMap<ProviderKey, String>,
    /// Soft pins resolved to different nodes.
    pub substitutions: Vec<Substitution>,
}

impl Assignment {
    /// Provider bound to `virtual_name` on the edge out of `consumer`.
    pub fn provider_for(&self, consumer: Option<&str>, virtual_name: &str) -> Option<&str> {
        self.providers
            .get(&(consumer.map(str::to_string), virtual_name.to_string()))
            .map(String::as_str)
    }

    /// Every provider bound to `virtual_name` anywhere in the graph.
    pub fn providers_of(&self, virtual_name: &str) -> BTreeSet<&str> {
        self.providers
            .iter()
            .filter(|((_, v), _)| v == virtual_name)
            .map(|(_, p)| p.as_str())
            .collect()
    }
}

/// Constraint-solver port.
pub trait Solver: Send + Sync {
    /// Finds an assignment for `problem` against `repo`.
    ///
    /// # Errors
    ///
    /// [`Unsatisfiable`] naming the nearest conflict when no assignment exists.
    fn solve(&self, problem: &Problem<'_>, repo: &dyn Repository) -> Result<Assignment, Unsatisfiable>;
}

/// Deterministic depth-first reference solver.
#[derive(Clone, Debug)]
pub struct BacktrackingSolver {
    max_steps: usize,
}

impl BacktrackingSolver {
    /// Default search budget.
    pub const DEFAULT_MAX_STEPS: usize = 100_000;

    /// Solver with the default budget.
    pub fn new() -> Self {
        Self {
            max_steps: Self::DEFAULT_MAX_STEPS,
        }
    }

    /// Overrides the number of search steps before giving up.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

impl Default for BacktrackingSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for BacktrackingSolver {
    #[instrument(skip_all, fields(request = %problem.request, pins = ?problem.pins))]
    fn solve(&self, problem: &Problem<'_>, repo: &dyn Repository) -> Result<Assignment, Unsatisfiable> {
        let search = Search::new(problem, repo, self.max_steps);
        let root = problem.request.root();
        let root_name = problem.request.name().to_string();
        let target = if repo.is_virtual(&root_name) {
            Target::Virtual(root_name.clone())
        } else {
            Target::Package(root_name.clone())
        };
        let mut state = State::default();
        state.agenda.push_back(Requirement {
            consumer: None,
            consumer_node: None,
            target,
            constraint: root.clone(),
            deptypes: DepTypes::NONE,
            virtuals: BTreeSet::new(),
            pin: None,
        });
        let done = search.search(state)?;
        let root_slot = done
            .providers
            .get(&(None, root_name.clone()))
            .cloned()
            .unwrap_or(root_name);
        debug!(
            steps = search.steps.get(),
            nodes = done.chosen.len(),
            substitutions = done.substitutions.len(),
            "solve finished"
        );
        Ok(Assignment {
            root: root_slot,
            choices: done.chosen,
            providers: done.providers,
            substitutions: done.substitutions,
        })
    }
}

#[derive(Clone, Debug)]
enum Target {
    Package(String),
    Virtual(String),
}

#[derive(Clone, Debug)]
struct Requirement {
    consumer: Option<String>,
    consumer_node: Option<Arc<SpecNode>>,
    target: Target,
    constraint: NodeConstraint,
    deptypes: DepTypes,
    virtuals: BTreeSet<String>,
    pin: Option<Arc<SpecNode>>,
}

impl Requirement {
    fn virtual_name(&self) -> Option<&str> {
        match &self.target {
            Target::Virtual(v) => Some(v.as_str()),
            Target::Package(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct State {
    chosen: BTreeMap<String, Choice>,
    providers: BTreeMap<ProviderKey, String>,
    agenda: VecDeque<Requirement>,
    substitutions: Vec<Substitution>,
}

struct Search<'p, 'a> {
    problem: &'p Problem<'a>,
    repo: &'p dyn Repository,
    /// Request constraints on package names.
    seeded: BTreeMap<String, Vec<NodeConstraint>>,
    /// Request constraints on virtual names, applied to the provider.
    virtual_seeded: BTreeMap<String, Vec<NodeConstraint>>,
    /// Providers the request names explicitly.
    forced: BTreeMap<String, String>,
    steps: Cell<usize>,
    max_steps: usize,
}

impl<'p, 'a> Search<'p, 'a> {
    fn new(problem: &'p Problem<'a>, repo: &'p dyn Repository, max_steps: usize) -> Self {
        let mut seeded: BTreeMap<String, Vec<NodeConstraint>> = BTreeMap::new();
        let mut virtual_seeded: BTreeMap<String, Vec<NodeConstraint>> = BTreeMap::new();
        let mut forced = BTreeMap::new();
        for constraint in problem.request.constraints() {
            let Some(name) = constraint.name.clone() else {
                continue;
            };
            if repo.is_virtual(&name) {
                virtual_seeded.entry(name).or_default().push(constraint.clone());
            } else {
                for v in repo.provided_virtuals(&name) {
                    forced.entry(v).or_insert_with(|| name.clone());
                }
                seeded.entry(name).or_default().push(constraint.clone());
            }
        }
        for dep in problem.request.dependencies() {
            for v in &dep.virtuals {
                forced.insert(v.clone(), dep.name().to_string());
            }
        }
        Self {
            problem,
            repo,
            seeded,
            virtual_seeded,
            forced,
            steps: Cell::new(0),
            max_steps,
        }
    }

    fn exhausted(&self) -> bool {
        self.steps.get() >= self.max_steps
    }

    fn search(&self, mut state: State) -> Result<State, Unsatisfiable> {
        self.steps.set(self.steps.get() + 1);
        if self.exhausted() {
            return Err(Unsatisfiable {
                package: self.problem.request.name().to_string(),
                requested: self.problem.request.to_string(),
                nearest: None,
                reason: format!("search budget of {} steps exhausted", self.max_steps),
            });
        }
        let Some(req) = state.agenda.pop_front() else {
            return self.finish(state);
        };
        match &req.target {
            Target::Package(slot) => {
                let slot = slot.clone();
                self.resolve_package(state, &req, &slot)
            }
            Target::Virtual(v) => {
                let v = v.clone();
                self.resolve_virtual(state, &req, &v)
            }
        }
    }

    fn resolve_virtual(&self, state: State, req: &Requirement, virtual_name: &str) -> Result<State, Unsatisfiable> {
        let key: ProviderKey = (req.consumer.clone(), virtual_name.to_string());
        if let Some(provider) = state.providers.get(&key).cloned() {
            return self.resolve_package(state, req, &provider);
        }
        let options = self.provider_options(virtual_name, req);
        let mut last = Err(self.conflict(virtual_name, req, None, "no provider available"));
        for provider in options {
            let mut next = state.clone();
            next.providers.insert(key.clone(), provider.clone());
            match self.resolve_package(next, req, &provider) {
                Ok(done) => return Ok(done),
                Err(err) if self.exhausted() => return Err(err),
                Err(err) => last = Err(err),
            }
        }
        last
    }

    fn provider_options(&self, virtual_name: &str, req: &Requirement) -> Vec<String> {
        if let Some(forced) = self.forced.get(virtual_name) {
            return vec![forced.clone()];
        }
        let providers = self.repo.providers(virtual_name);
        match (&req.pin, self.problem.pins) {
            (Some(pin), PinMode::Hard) => vec![pin.name().to_string()],
            (Some(pin), PinMode::Soft) => {
                let mut ordered = vec![pin.name().to_string()];
                ordered.extend(providers.into_iter().filter(|p| p != pin.name()));
                ordered
            }
            (None, _) => providers,
        }
    }

    fn resolve_package(&self, state: State, req: &Requirement, slot: &str) -> Result<State, Unsatisfiable> {
        if let Some(existing) = state.chosen.get(slot) {
            if !self.fits(slot, existing.identity(), req) {
                let nearest = existing.identity().to_string();
                return Err(self.conflict(slot, req, Some(nearest), "conflicts with the node already chosen"));
            }
            let state = self.bind(state, req, slot)?;
            return self.search(state);
        }

        let options = self.options(slot, req);
        let nearest = req
            .pin
            .as_ref()
            .map(|p| p.identity().to_string())
            .or_else(|| {
                self.problem
                    .candidates
                    .iter()
                    .find(|c| c.node.name() == slot)
                    .map(|c| c.node.identity().to_string())
            });
        let mut last = Err(self.conflict(slot, req, nearest, self.no_option_reason(slot)));
        for choice in options {
            debug!(package = slot, candidate = %choice.identity(), reuse = choice.is_reuse(), "trying candidate");
            let mut next = state.clone();
            self.expand(&mut next, slot, &choice);
            next.chosen.insert(slot.to_string(), choice);
            match self.bind(next, req, slot).and_then(|s| self.search(s)) {
                Ok(done) => return Ok(done),
                Err(err) if self.exhausted() => return Err(err),
                Err(err) => last = Err(err),
            }
        }
        last
    }

    fn no_option_reason(&self, slot: &str) -> String {
        if self.problem.non_buildable.contains(slot) {
            "package is not buildable and no installed or external candidate matches".to_string()
        } else if !self.repo.exists(slot) {
            "unknown package".to_string()
        } else {
            "no candidate or buildable version matches".to_string()
        }
    }

    /// Every constraint that applies to the node placed in `slot` for `req`.
    fn fits(&self, slot: &str, identity: &NodeIdentity, req: &Requirement) -> bool {
        if identity.name != slot {
            return false;
        }
        let own = match req.target {
            Target::Package(_) => req.constraint.matches(identity),
            Target::Virtual(_) => req.constraint.matches_attributes(identity),
        };
        own && self
            .seeded
            .get(slot)
            .is_none_or(|cs| cs.iter().all(|c| c.matches(identity)))
            && req.virtual_name().is_none_or(|v| {
                self.virtual_seeded
                    .get(v)
                    .is_none_or(|cs| cs.iter().all(|c| c.matches_attributes(identity)))
            })
    }

    fn options(&self, slot: &str, req: &Requirement) -> Vec<Choice> {
        let mut out = Vec::new();
        if let Some(pin) = &req.pin {
            if self.fits(slot, pin.identity(), req) {
                out.push(Choice::Reuse(Arc::clone(pin)));
            }
            if self.problem.pins == PinMode::Hard {
                return out;
            }
        }
        let pinned = req.pin.as_ref().map(|p| p.hash());
        out.extend(
            self.problem
                .candidates
                .iter()
                .filter(|c| Some(c.node.hash()) != pinned)
                .filter(|c| self.fits(slot, c.node.identity(), req))
                .map(|c| Choice::Reuse(Arc::clone(&c.node))),
        );
        if !self.problem.non_buildable.contains(slot) && self.repo.exists(slot) {
            out.extend(
                self.repo
                    .versions(slot)
                    .into_iter()
                    .filter_map(|v| self.fresh_identity(slot, v, req))
                    .map(|identity| Choice::Build {
                        identity,
                        dependencies: Vec::new(),
                    }),
            );
        }
        out
    }

    fn fresh_identity(&self, slot: &str, version: Version, req: &Requirement) -> Option<NodeIdentity> {
        let mut constraints: Vec<&NodeConstraint> = vec![&req.constraint];
        if let Some(cs) = self.seeded.get(slot) {
            constraints.extend(cs);
        }
        if let Some(cs) = req.virtual_name().and_then(|v| self.virtual_seeded.get(v)) {
            constraints.extend(cs);
        }
        if !constraints.iter().all(|c| c.version.contains(&version)) {
            return None;
        }
        let mut variants = self.repo.default_variants(slot);
        let mut arch = Arch::default();
        for c in &constraints {
            for (name, value) in &c.variants {
                if let Some(slot_value) = variants.get_mut(name) {
                    *slot_value = value.clone();
                }
            }
            if let Some(platform) = &c.platform {
                arch.platform.clone_from(platform);
            }
            if let Some(target) = &c.target {
                arch.target.clone_from(target);
            }
        }
        let identity = NodeIdentity {
            name: slot.to_string(),
            namespace: self
                .repo
                .namespace(slot)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            version,
            variants,
            arch,
        };
        self.fits(slot, &identity, req).then_some(identity)
    }

    /// Queues the dependencies of a newly chosen node.
    fn expand(&self, state: &mut State, slot: &str, choice: &Choice) {
        match choice {
            Choice::Reuse(node) => {
                for edge in node.dependencies(DepTypes::LINK_RUN) {
                    let (target, constraint) = match edge.virtuals().iter().next() {
                        Some(v) => (Target::Virtual(v.clone()), NodeConstraint::named(v.clone())),
                        None => (
                            Target::Package(edge.child().name().to_string()),
                            NodeConstraint::named(edge.child().name()),
                        ),
                    };
                    state.agenda.push_back(Requirement {
                        consumer: Some(slot.to_string()),
                        consumer_node: Some(Arc::clone(node)),
                        target,
                        constraint,
                        deptypes: edge.deptypes(),
                        virtuals: edge.virtuals().clone(),
                        pin: Some(Arc::clone(edge.child())),
                    });
                }
            }
            Choice::Build { identity, .. } => {
                for condition in self.repo.active_dependencies(identity) {
                    let name = condition.name().to_string();
                    let (target, virtuals) = if self.repo.is_virtual(&name) {
                        (Target::Virtual(name.clone()), BTreeSet::from([name]))
                    } else {
                        (Target::Package(name), BTreeSet::new())
                    };
                    state.agenda.push_back(Requirement {
                        consumer: Some(slot.to_string()),
                        consumer_node: None,
                        target,
                        constraint: condition.dependency,
                        deptypes: condition.deptypes,
                        virtuals,
                        pin: None,
                    });
                }
            }
        }
    }

    /// Checks the requirement's pin against the node in `slot` and records the
    /// edge on a freshly built consumer.
    fn bind(&self, mut state: State, req: &Requirement, slot: &str) -> Result<State, Unsatisfiable> {
        let Some(choice) = state.chosen.get(slot) else {
            return Err(self.conflict(slot, req, None, "no node chosen"));
        };
        if let Some(pin) = &req.pin {
            let same = matches!(choice, Choice::Reuse(n) if n.hash() == pin.hash());
            if !same {
                let allowed = self.problem.pins == PinMode::Soft
                    && self
                        .problem
                        .splice_check
                        .is_some_and(|check| check.can_substitute(pin.identity(), choice.identity(), &req.virtuals));
                if !allowed {
                    let nearest = choice.identity().to_string();
                    return Err(self.conflict(
                        slot,
                        req,
                        Some(nearest),
                        format!("reused consumer was built against {}", pin.identity()),
                    ));
                }
                if let Some(consumer) = &req.consumer_node {
                    debug!(
                        consumer = consumer.name(),
                        original = %pin.identity(),
                        replacement = %choice.identity(),
                        "recording substitution"
                    );
                    state.substitutions.push(Substitution {
                        consumer: consumer.hash(),
                        original: Arc::clone(pin),
                        replacement: slot.to_string(),
                        goal: self.goal(slot, req),
                        virtuals: req.virtuals.clone(),
                    });
                }
            }
        }
        if let Some(consumer) = &req.consumer {
            if let Some(Choice::Build { dependencies, .. }) = state.chosen.get_mut(consumer) {
                dependencies.push(PlannedEdge {
                    slot: slot.to_string(),
                    deptypes: req.deptypes,
                    virtuals: req.virtuals.clone(),
                });
            }
        }
        Ok(state)
    }

    /// What a replacement placed in `slot` must satisfy.
    fn goal(&self, slot: &str, req: &Requirement) -> NodeConstraint {
        self.seeded
            .get(slot)
            .and_then(|cs| cs.first())
            .or_else(|| {
                req.virtual_name()
                    .and_then(|v| self.virtual_seeded.get(v))
                    .and_then(|cs| cs.first())
            })
            .unwrap_or(&req.constraint)
            .clone()
    }

    fn finish(&self, state: State) -> Result<State, Unsatisfiable> {
        for dep in self.problem.request.dependencies() {
            let name = dep.name();
            let present = if self.repo.is_virtual(name) {
                bound_providers(&state, name).next().is_some()
            } else {
                state.chosen.contains_key(name)
            };
            let providers_ok = dep.virtuals.iter().all(|v| {
                let mut providers = bound_providers(&state, v).peekable();
                providers.peek().is_some() && providers.all(|p| p == name)
            });
            if !present || !providers_ok {
                return Err(Unsatisfiable {
                    package: name.to_string(),
                    requested: dep.to_string(),
                    nearest: None,
                    reason: "not a dependency of any chosen node".to_string(),
                });
            }
        }
        Ok(state)
    }

    fn conflict(
        &self,
        slot: &str,
        req: &Requirement,
        nearest: Option<String>,
        reason: impl Into<String>,
    ) -> Unsatisfiable {
        let requested = self.seeded.get(slot).map_or_else(
            || req.constraint.to_string(),
            |cs| cs.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
        );
        Unsatisfiable {
            package: slot.to_string(),
            requested,
            nearest,
            reason: reason.into(),
        }
    }
}

/// Providers bound to `virtual_name` on any consuming edge.
fn bound_providers<'s>(state: &'s State, virtual_name: &'s str) -> impl Iterator<Item = &'s String> + 's {
    state
        .providers
        .iter()
        .filter(move |((_, v), _)| v == virtual_name)
        .map(|(_, p)| p)
}
