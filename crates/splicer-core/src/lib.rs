// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! splicer-core: content-addressed spec graphs, concretization and ABI splicing.
//!
//! A request ([`AbstractSpec`]) names a package and partial constraints on it
//! and its dependencies. The [`Concretizer`] resolves it against a
//! [`Repository`] of package metadata and a [`ReusePool`] of installed graphs,
//! producing a [`ConcreteSpec`]: an immutable DAG of [`SpecNode`]s, each
//! identified by a BLAKE3 hash of its identity and its children.
//!
//! When splicing is enabled and exact reuse is impossible, installed
//! consumers may keep their binaries while one of their dependencies is
//! swapped for an ABI-compatible replacement. The [`SpliceEngine`] checks
//! eligibility against the repository's splice rules and rewrites the graph;
//! rewritten nodes keep the graph they were built from as their `build_spec`.
//!
//! # Hash Domain Policy
//!
//! Node hashes are domain-separated (`spec:v1`) and length-prefixed. Build
//! provenance (`build_spec`) and external prefixes are deliberately not
//! hashed: a spliced node and a freshly built node with the same identity and
//! children are the same node.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod concretize;
mod deptypes;
mod error;
mod ident;
mod node;
mod policy;
mod repo;
mod request;
/// Constraint-solver port and the reference solver.
pub mod solver;
mod spec;
/// ABI splice eligibility and graph rewriting.
pub mod splice;
mod store;
mod variant;
mod version;

pub use concretize::{Concretizer, Resolution};
pub use deptypes::DepTypes;
pub use error::{
    ConcretizeError, InvalidConstraintError, ParseError, RequestError, SpecError, SpliceError,
    UnsatisfiableSpecError,
};
pub use ident::{SpecHash, SPEC_HASH_DOMAIN};
pub use node::{Arch, DependencyEdge, NodeArena, NodeIdentity, SpecNode, DEFAULT_NAMESPACE};
pub use policy::{ExternalDecl, PackagePolicy, Policy, SplicePolicy};
pub use repo::{
    DependencyCondition, MemoryRepository, PackageDef, Repository, SpliceRule, VariantDecl,
};
pub use request::{AbstractSpec, DependencyConstraint, NodeConstraint};
pub use solver::{BacktrackingSolver, Solver};
pub use spec::ConcreteSpec;
pub use splice::{SiteReport, SiteState, SpliceEngine, SpliceReport, SpliceSite};
pub use store::{InstallStore, MemoryInstallStore, ReusePool};
pub use variant::{render_variants, VariantMap, VariantSelector, VariantValue};
pub use version::{Version, VersionConstraint, VersionRange};
