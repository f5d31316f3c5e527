// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! ABI splicing: eligibility of replacements and the graph rewrite.
//!
//! A splice replaces an already-built node `S` (reached from a reused
//! consumer) with a different concrete node `R` without rebuilding the
//! consumer. Eligibility is declared by [`SpliceRule`]s in the repository:
//!
//! - rules owned by `S`'s package apply; for virtual edges, rules owned by
//!   `R`'s package that name `S` apply too,
//! - `when` must match `S` and `replacement` must match `R`,
//! - the most specific selector wins (smallest explicit set, `*` last) and
//!   declaration order breaks ties,
//! - the winning selector's variants must agree between `S` and `R`,
//! - every link/run child of `S` needs a counterpart in `R`'s closure that is
//!   the same node or is itself eligible.
//!
//! The rewrite is one memoized bottom-up pass. Subtrees off the rewritten
//! paths are shared by reference and keep their hashes.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::deptypes::DepTypes;
use crate::error::SpliceError;
use crate::ident::SpecHash;
use crate::node::{NodeArena, NodeIdentity, SpecNode};
use crate::repo::{Repository, SpliceRule};
use crate::request::NodeConstraint;
use crate::solver::SpliceCheck;
use crate::spec::ConcreteSpec;
use crate::variant::VariantSelector;

/// Lifecycle of one substitution site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SiteState {
    /// Named by the request but not yet resolved.
    Requested,
    /// Resolved to a different node than the consumer was built against.
    ApproximatelyResolved,
    /// Replaced by an eligible node.
    Spliced,
    /// No eligible replacement; carries the reason.
    Failed(String),
}

impl SiteState {
    /// Returns `true` for `Spliced` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Spliced | Self::Failed(_))
    }

    fn can_advance_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::ApproximatelyResolved)
                | (Self::ApproximatelyResolved, Self::Spliced | Self::Failed(_))
        )
    }
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::ApproximatelyResolved => f.write_str("approximately-resolved"),
            Self::Spliced => f.write_str("spliced"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// A reused consumer whose child must be replaced.
#[derive(Clone, Debug)]
pub struct SpliceSite {
    /// Hash of the consumer in the pre-splice graph.
    pub consumer: SpecHash,
    /// Consumer package name, for reporting.
    pub consumer_name: String,
    /// The child the consumer was built against (`S`).
    pub original: Arc<SpecNode>,
    /// The node that should take its place (`R`).
    pub replacement: Arc<SpecNode>,
    /// Constraint `R` must satisfy.
    pub goal: NodeConstraint,
    /// Virtual interfaces of the consuming edge.
    pub virtuals: BTreeSet<String>,
    /// Current state.
    pub state: SiteState,
}

impl SpliceSite {
    /// New site in the `Requested` state.
    pub fn new(
        consumer: &SpecNode,
        original: Arc<SpecNode>,
        replacement: Arc<SpecNode>,
        goal: NodeConstraint,
        virtuals: BTreeSet<String>,
    ) -> Self {
        Self {
            consumer: consumer.hash(),
            consumer_name: consumer.name().to_string(),
            original,
            replacement,
            goal,
            virtuals,
            state: SiteState::Requested,
        }
    }

    /// Moves to `next` if the transition is legal; returns whether it moved.
    pub fn advance(&mut self, next: SiteState) -> bool {
        if self.state.can_advance_to(&next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Outcome of one site, as reported with a resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteReport {
    /// Consumer package name.
    pub consumer: String,
    /// Replaced node.
    pub original: String,
    /// Replacement node.
    pub replacement: String,
    /// Selector of the rule that admitted the splice.
    pub selector: Option<VariantSelector>,
    /// Final state.
    pub state: SiteState,
}

/// Every site resolved by one splice pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpliceReport {
    sites: Vec<SiteReport>,
}

impl SpliceReport {
    /// Reported sites in the order they were applied.
    pub fn sites(&self) -> &[SiteReport] {
        &self.sites
    }

    /// Returns `true` when nothing was spliced.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Number of sites in the `Spliced` state.
    pub fn spliced(&self) -> usize {
        self.sites
            .iter()
            .filter(|s| s.state == SiteState::Spliced)
            .count()
    }
}

/// Decides splice eligibility and rewrites graphs.
pub struct SpliceEngine<'r> {
    repo: &'r dyn Repository,
    default_selector: VariantSelector,
}

impl<'r> SpliceEngine<'r> {
    /// Engine over `repo`; `default_selector` applies to rules without one.
    pub fn new(repo: &'r dyn Repository, default_selector: VariantSelector) -> Self {
        Self {
            repo,
            default_selector,
        }
    }

    /// Highest-precedence rule admitting `replacement` for `original`, with
    /// its effective selector.
    pub fn select_rule(
        &self,
        original: &NodeIdentity,
        replacement: &NodeIdentity,
        virtuals: &BTreeSet<String>,
    ) -> Option<(SpliceRule, VariantSelector)> {
        let own = self
            .repo
            .splice_rules(&original.name)
            .into_iter()
            .filter(|rule| {
                rule.replacement
                    .name
                    .as_ref()
                    .map_or(replacement.name == original.name, |n| *n == replacement.name)
            });
        let foreign = (!virtuals.is_empty() && replacement.name != original.name)
            .then(|| self.repo.splice_rules(&replacement.name))
            .unwrap_or_default()
            .into_iter()
            .filter(|rule| rule.when.name.as_deref() == Some(original.name.as_str()));
        own.chain(foreign)
            .enumerate()
            .filter(|(_, rule)| rule.when.matches(original) && rule.replacement.matches(replacement))
            .map(|(order, rule)| {
                let selector = rule
                    .match_variants
                    .clone()
                    .unwrap_or_else(|| self.default_selector.clone());
                (selector.specificity(), order, rule, selector)
            })
            .min_by_key(|(specificity, order, ..)| (*specificity, *order))
            .map(|(_, _, rule, selector)| (rule, selector))
    }

    /// Top-level check: a rule applies and its selector's variants agree.
    ///
    /// # Errors
    ///
    /// A human-readable reason when the substitution is not allowed.
    pub fn explain(
        &self,
        original: &NodeIdentity,
        replacement: &NodeIdentity,
        virtuals: &BTreeSet<String>,
    ) -> Result<VariantSelector, String> {
        let (_, selector) = self
            .select_rule(original, replacement, virtuals)
            .ok_or_else(|| format!("no splice rule of {} admits {replacement}", original.name))?;
        if let Some(name) = selector.first_mismatch(&original.variants, &replacement.variants) {
            return Err(format!("variant `{name}` differs under selector {selector}"));
        }
        Ok(selector)
    }

    /// Full eligibility of `replacement` for `original` at a site with `goal`.
    ///
    /// # Errors
    ///
    /// A human-readable reason naming the first failed requirement.
    pub fn check_eligible(
        &self,
        original: &SpecNode,
        replacement: &Arc<SpecNode>,
        goal: &NodeConstraint,
        virtuals: &BTreeSet<String>,
    ) -> Result<VariantSelector, String> {
        if !self.satisfies_goal(replacement.identity(), goal, virtuals) {
            return Err(format!("{} does not satisfy `{goal}`", replacement.identity()));
        }
        let selector = self.explain(original.identity(), replacement.identity(), virtuals)?;

        let closure = ConcreteSpec::new(Arc::clone(replacement)).traverse(DepTypes::LINK_RUN);
        for edge in original.dependencies(DepTypes::LINK_RUN) {
            let child = edge.child();
            if closure.iter().any(|n| n.hash() == child.hash()) {
                continue;
            }
            let counterpart = if edge.virtuals().is_empty() {
                closure.iter().skip(1).find(|n| n.name() == child.name()).cloned()
            } else {
                closure.iter().find_map(|n| {
                    n.edges()
                        .iter()
                        .find(|e| !e.virtuals().is_disjoint(edge.virtuals()))
                        .map(|e| Arc::clone(e.child()))
                })
            };
            let Some(counterpart) = counterpart else {
                return Err(format!(
                    "{} has no counterpart for dependency {}",
                    replacement.name(),
                    child.name()
                ));
            };
            let child_goal = if edge.virtuals().is_empty() {
                NodeConstraint::named(child.name())
            } else {
                NodeConstraint::default()
            };
            self.check_eligible(child, &counterpart, &child_goal, edge.virtuals())
                .map_err(|reason| format!("dependency {}: {reason}", child.name()))?;
        }
        Ok(selector)
    }

    fn satisfies_goal(
        &self,
        replacement: &NodeIdentity,
        goal: &NodeConstraint,
        virtuals: &BTreeSet<String>,
    ) -> bool {
        if virtuals.is_empty() {
            return goal.matches(replacement);
        }
        let provided = self.repo.provided_virtuals(&replacement.name);
        virtuals.iter().all(|v| provided.contains(v))
            && goal.matches_attributes(replacement)
            && goal
                .name
                .as_deref()
                .is_none_or(|n| n == replacement.name || virtuals.contains(n))
    }

    /// Rewrites `pre_splice` so every site's consumer points at its
    /// replacement.
    ///
    /// `reused` holds the hashes of nodes that were already built; rewritten
    /// reused nodes lose their build-only edges and record their pre-splice
    /// node as `build_spec`.
    ///
    /// # Errors
    ///
    /// [`SpliceError`] for the first site whose replacement is not eligible.
    #[instrument(skip_all, fields(root = pre_splice.name(), sites = sites.len()))]
    pub fn apply(
        &self,
        pre_splice: &ConcreteSpec,
        mut sites: Vec<SpliceSite>,
        reused: &BTreeSet<SpecHash>,
    ) -> Result<(ConcreteSpec, SpliceReport), SpliceError> {
        for site in &mut sites {
            site.advance(SiteState::ApproximatelyResolved);
        }
        let index = sites
            .iter()
            .enumerate()
            .map(|(i, s)| ((s.consumer, s.original.hash()), i))
            .collect();
        let mut pass = RewritePass {
            engine: self,
            index,
            sites,
            selectors: BTreeMap::new(),
            order: Vec::new(),
            reused,
            memo: BTreeMap::new(),
            in_progress: BTreeSet::new(),
            arena: NodeArena::new(),
        };
        let root = pass.rewrite(pre_splice.root())?;

        let mut report = SpliceReport::default();
        for i in pass.order {
            let site = &pass.sites[i];
            report.sites.push(SiteReport {
                consumer: site.consumer_name.clone(),
                original: site.original.identity().to_string(),
                replacement: site.replacement.identity().to_string(),
                selector: pass.selectors.get(&i).cloned(),
                state: site.state.clone(),
            });
        }
        for site in pass.sites.iter().filter(|s| !s.state.is_terminal()) {
            debug!(consumer = %site.consumer_name, original = %site.original.identity(), "site not on any rewritten path");
        }
        info!(
            spliced = report.spliced(),
            root = %root.hash().short(),
            "splice pass complete"
        );
        Ok((ConcreteSpec::new(root), report))
    }
}

impl SpliceCheck for SpliceEngine<'_> {
    fn can_substitute(
        &self,
        original: &NodeIdentity,
        replacement: &NodeIdentity,
        virtuals: &BTreeSet<String>,
    ) -> bool {
        self.explain(original, replacement, virtuals).is_ok()
    }
}

struct RewritePass<'e, 'r> {
    engine: &'e SpliceEngine<'r>,
    index: BTreeMap<(SpecHash, SpecHash), usize>,
    sites: Vec<SpliceSite>,
    selectors: BTreeMap<usize, VariantSelector>,
    order: Vec<usize>,
    reused: &'e BTreeSet<SpecHash>,
    memo: BTreeMap<SpecHash, Arc<SpecNode>>,
    in_progress: BTreeSet<SpecHash>,
    arena: NodeArena,
}

impl RewritePass<'_, '_> {
    fn rewrite(&mut self, node: &Arc<SpecNode>) -> Result<Arc<SpecNode>, SpliceError> {
        if let Some(done) = self.memo.get(&node.hash()) {
            return Ok(Arc::clone(done));
        }
        if !self.in_progress.insert(node.hash()) {
            return Err(SpliceError {
                package: node.name().to_string(),
                requested: node.identity().to_string(),
                original: node.identity().to_string(),
                nearest: None,
                reason: "replacement closure contains its own consumer".to_string(),
            });
        }

        let mut changed = false;
        let mut edges = Vec::with_capacity(node.edges().len());
        for edge in node.edges() {
            let child = match self.index.get(&(node.hash(), edge.child().hash())).copied() {
                Some(i) => self.splice_site(i)?,
                None => self.rewrite(edge.child())?,
            };
            changed |= child.hash() != edge.child().hash();
            edges.push(edge.with_child(child));
        }

        let result = if changed {
            let rebuilt = if self.reused.contains(&node.hash()) {
                let edges = edges
                    .into_iter()
                    .filter_map(|e| {
                        let kept = e.deptypes().without(DepTypes::BUILD);
                        (!kept.is_empty()).then(|| e.with_deptypes(kept))
                    })
                    .collect();
                let build_spec = node.build_spec().map_or_else(|| Arc::clone(node), Arc::clone);
                SpecNode::new(node.identity().clone(), edges).with_build_spec(build_spec)
            } else {
                SpecNode::new(node.identity().clone(), edges)
            };
            let rebuilt = match node.external() {
                Some(prefix) => rebuilt.with_external(prefix),
                None => rebuilt,
            };
            debug!(package = node.name(), from = %node.hash().short(), to = %rebuilt.hash().short(), "rewrote node");
            self.arena.intern(rebuilt)
        } else {
            Arc::clone(node)
        };
        self.in_progress.remove(&node.hash());
        self.memo.insert(node.hash(), Arc::clone(&result));
        Ok(result)
    }

    fn splice_site(&mut self, i: usize) -> Result<Arc<SpecNode>, SpliceError> {
        let replacement = Arc::clone(&self.sites[i].replacement);
        let rewritten = self.rewrite(&replacement)?;
        let site = &self.sites[i];
        let verdict = self
            .engine
            .check_eligible(&site.original, &rewritten, &site.goal, &site.virtuals);
        if !self.order.contains(&i) {
            self.order.push(i);
        }
        let site = &mut self.sites[i];
        match verdict {
            Ok(selector) => {
                site.advance(SiteState::Spliced);
                debug!(
                    consumer = %site.consumer_name,
                    original = %site.original.identity(),
                    replacement = %rewritten.identity(),
                    %selector,
                    "spliced"
                );
                self.selectors.insert(i, selector);
                Ok(rewritten)
            }
            Err(reason) => {
                site.advance(SiteState::Failed(reason.clone()));
                Err(SpliceError {
                    package: site.original.name().to_string(),
                    requested: site.goal.to_string(),
                    original: site.original.identity().to_string(),
                    nearest: Some(rewritten.identity().to_string()),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::node::DependencyEdge;
    use crate::repo::{MemoryRepository, PackageDef, VariantDecl};
    use crate::variant::VariantValue;
    use crate::version::Version;

    fn repo() -> MemoryRepository {
        MemoryRepository::new()
            .with(
                PackageDef::new("z")
                    .version("1.0.0")
                    .unwrap()
                    .version("1.0.1")
                    .unwrap()
                    .variant(VariantDecl::boolean("compat", true))
                    .variant(VariantDecl::boolean("foo", false))
                    .can_splice("z@1.0.1+compat", "z@1.0.0+compat", None)
                    .unwrap()
                    .can_splice("z@1.0.1", "z@1.0.0", Some(VariantSelector::All))
                    .unwrap(),
            )
            .with(
                PackageDef::new("h")
                    .version("1.0.0")
                    .unwrap()
                    .depends_on("z", DepTypes::DEFAULT)
                    .unwrap(),
            )
    }

    fn z(version: &str, compat: bool, foo: bool) -> Arc<SpecNode> {
        let mut identity = NodeIdentity::new("z", Version::parse(version).unwrap());
        identity.variants.insert("compat".into(), VariantValue::Bool(compat));
        identity.variants.insert("foo".into(), VariantValue::Bool(foo));
        Arc::new(SpecNode::new(identity, vec![]))
    }

    fn h(child: &Arc<SpecNode>) -> Arc<SpecNode> {
        let identity = NodeIdentity::new("h", Version::parse("1.0.0").unwrap());
        Arc::new(SpecNode::new(
            identity,
            vec![DependencyEdge::new(Arc::clone(child), DepTypes::DEFAULT)],
        ))
    }

    #[test]
    fn most_specific_rule_wins() {
        let repo = repo();
        let engine = SpliceEngine::new(&repo, VariantSelector::none());
        let (rule, selector) = engine
            .select_rule(
                z("1.0.0", true, false).identity(),
                z("1.0.1", true, true).identity(),
                &BTreeSet::new(),
            )
            .unwrap();
        assert_eq!(selector, VariantSelector::none());
        assert_eq!(rule.when.variants.len(), 1);
        assert!(engine.can_substitute(
            z("1.0.0", true, false).identity(),
            z("1.0.1", true, true).identity(),
            &BTreeSet::new()
        ));
    }

    #[test]
    fn star_rule_gates_on_every_variant() {
        let repo = repo();
        let engine = SpliceEngine::new(&repo, VariantSelector::none());
        let original = z("1.0.0", false, false);
        assert!(engine
            .explain(original.identity(), z("1.0.1", false, false).identity(), &BTreeSet::new())
            .is_ok());
        let err = engine
            .explain(original.identity(), z("1.0.1", false, true).identity(), &BTreeSet::new())
            .unwrap_err();
        assert!(err.contains("foo"));
    }

    #[test]
    fn no_rule_means_ineligible() {
        let repo = repo();
        let engine = SpliceEngine::new(&repo, VariantSelector::none());
        assert!(!engine.can_substitute(
            z("1.0.1", true, false).identity(),
            z("1.0.0", true, false).identity(),
            &BTreeSet::new()
        ));
    }

    #[test]
    fn rewrite_replaces_child_and_prunes_build_bits() {
        let repo = repo();
        let engine = SpliceEngine::new(&repo, VariantSelector::none());
        let old = z("1.0.0", true, false);
        let new = z("1.0.1", true, false);
        let consumer = h(&old);
        let site = SpliceSite::new(
            &consumer,
            Arc::clone(&old),
            Arc::clone(&new),
            NodeConstraint::named("z"),
            BTreeSet::new(),
        );
        let reused = BTreeSet::from([consumer.hash(), old.hash(), new.hash()]);
        let (spliced, report) = engine
            .apply(&ConcreteSpec::new(Arc::clone(&consumer)), vec![site], &reused)
            .unwrap();

        let root = spliced.root();
        assert_ne!(root.hash(), consumer.hash());
        assert!(root.verify_hash());
        assert_eq!(root.edges().len(), 1);
        assert_eq!(root.edges()[0].deptypes(), DepTypes::LINK);
        assert!(Arc::ptr_eq(root.edges()[0].child(), &new));
        assert_eq!(root.build_spec().unwrap().hash(), consumer.hash());
        assert_eq!(report.spliced(), 1);
        assert_eq!(report.sites()[0].state, SiteState::Spliced);
    }

    #[test]
    fn ineligible_replacement_fails_the_site() {
        let repo = repo();
        let engine = SpliceEngine::new(&repo, VariantSelector::none());
        let old = z("1.0.1", true, false);
        let consumer = h(&old);
        let site = SpliceSite::new(
            &consumer,
            Arc::clone(&old),
            z("1.0.0", true, false),
            NodeConstraint::named("z"),
            BTreeSet::new(),
        );
        let err = engine
            .apply(&ConcreteSpec::new(consumer), vec![site], &BTreeSet::new())
            .unwrap_err();
        assert_eq!(err.package, "z");
        assert!(err.reason.contains("no splice rule"));
    }

    #[test]
    fn site_state_transitions_are_ordered() {
        let old = z("1.0.0", true, false);
        let mut site = SpliceSite::new(
            &h(&old),
            Arc::clone(&old),
            z("1.0.1", true, false),
            NodeConstraint::named("z"),
            BTreeSet::new(),
        );
        assert!(!site.advance(SiteState::Spliced));
        assert!(site.advance(SiteState::ApproximatelyResolved));
        assert!(site.advance(SiteState::Spliced));
        assert!(site.state.is_terminal());
        assert!(!site.advance(SiteState::Failed("late".into())));
    }
}
