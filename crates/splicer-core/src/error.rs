// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for request parsing, concretization and splicing.
//!
//! Every failure carries enough structure to name the offending node: the
//! package, the constraint that was requested for it and, where the search
//! got that far, the nearest candidate that was considered.
use thiserror::Error;

use crate::ident::SpecHash;

/// Syntax error in a request string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[PARSE] {message} at byte {position} in `{input}`")]
pub struct ParseError {
    /// The full text being parsed.
    pub input: String,
    /// Byte offset of the offending token.
    pub position: usize,
    /// Human-readable description.
    pub message: String,
}

/// A request that is well-formed but contradictory or unknown to the repository.
///
/// Raised before the solver is ever consulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[INVALID_CONSTRAINT] {package}: {message}")]
pub struct InvalidConstraintError {
    /// Package the constraint applies to (or `<anonymous>`).
    pub package: String,
    /// Human-readable description.
    pub message: String,
}

impl InvalidConstraintError {
    pub(crate) fn new(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            message: message.into(),
        }
    }
}

/// Either failure mode of turning text into a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The text is not valid request syntax.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The text parses but the constraints contradict each other.
    #[error(transparent)]
    Invalid(#[from] InvalidConstraintError),
}

/// No assignment satisfies the request under the active policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[UNSATISFIABLE] cannot satisfy `{requested}` for {package}: {reason}{}", nearest_suffix(.nearest.as_deref()))]
pub struct UnsatisfiableSpecError {
    /// Package at which the search gave up.
    pub package: String,
    /// Constraint that could not be met.
    pub requested: String,
    /// Closest candidate considered, if any.
    pub nearest: Option<String>,
    /// Human-readable description.
    pub reason: String,
}

/// Splicing was enabled but no ABI-compatible replacement exists for a site.
///
/// A specialization of unsatisfiability: callers that only care whether the
/// request can be met treat both the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[SPLICE] cannot replace {original} with a node satisfying `{requested}` for {package}: {reason}{}", nearest_suffix(.nearest.as_deref()))]
pub struct SpliceError {
    /// Package of the approximate node.
    pub package: String,
    /// Goal constraint the replacement had to satisfy.
    pub requested: String,
    /// The approximate node that needed replacing.
    pub original: String,
    /// Replacement candidate considered, if any.
    pub nearest: Option<String>,
    /// Human-readable description.
    pub reason: String,
}

fn nearest_suffix(nearest: Option<&str>) -> String {
    nearest.map_or_else(String::new, |n| format!(" (nearest candidate: {n})"))
}

/// Re-derived hash differs from the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// A node's stored hash does not match its identity and edges.
    #[error("[SPEC_HASH_MISMATCH] {package}: expected {expected}, computed {computed}")]
    HashMismatch {
        /// Package of the corrupt node.
        package: String,
        /// Hash stored on the node.
        expected: SpecHash,
        /// Hash re-derived from identity and children.
        computed: SpecHash,
    },
}

/// Errors surfaced by [`crate::Concretizer::concretize`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcretizeError {
    /// The request text could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The request is contradictory or names undeclared variants/values.
    #[error(transparent)]
    InvalidConstraint(#[from] InvalidConstraintError),
    /// The request names a package the repository does not know.
    #[error("[UNKNOWN_PACKAGE] {0}")]
    UnknownPackage(String),
    /// No assignment exists under the active policy.
    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableSpecError),
    /// Splicing was attempted and failed.
    #[error(transparent)]
    Splice(#[from] SpliceError),
    /// A constructed spec failed hash verification.
    #[error(transparent)]
    Spec(#[from] SpecError),
}

impl ConcretizeError {
    /// Returns `true` for failures that mean "no solution exists".
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, Self::Unsatisfiable(_) | Self::Splice(_))
    }
}

impl From<RequestError> for ConcretizeError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Parse(e) => Self::Parse(e),
            RequestError::Invalid(e) => Self::InvalidConstraint(e),
        }
    }
}
