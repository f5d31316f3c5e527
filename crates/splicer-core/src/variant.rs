// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tagged variant values and splice variant selectors.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::ident::CanonicalHasher;

/// Value assigned to a named build variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantValue {
    /// Boolean toggle (`+name` / `~name`).
    Bool(bool),
    /// Single choice from an enumerated domain (`name=value`).
    Single(String),
    /// Set of choices (`name=a,b`).
    Multi(BTreeSet<String>),
}

impl VariantValue {
    /// Builds a multi-valued assignment from an iterator of values.
    pub fn multi<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Multi(values.into_iter().map(Into::into).collect())
    }

    /// Parses the right-hand side of `name=value`.
    ///
    /// `true`/`false` become booleans, comma lists become multi-valued sets
    /// and everything else is a single value.
    pub fn parse_assignment(value: &str) -> Self {
        match value {
            "true" | "True" => Self::Bool(true),
            "false" | "False" => Self::Bool(false),
            v if v.contains(',') => Self::multi(v.split(',').map(str::trim).filter(|s| !s.is_empty())),
            v => Self::Single(v.to_string()),
        }
    }

    /// Returns `true` if this (concrete) value satisfies `requested`.
    ///
    /// Booleans and single values require equality; a multi-valued concrete
    /// assignment satisfies any request whose values it contains.
    pub fn satisfies(&self, requested: &Self) -> bool {
        match (self, requested) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Single(a), Self::Single(b)) => a == b,
            (Self::Multi(have), Self::Multi(want)) => want.is_subset(have),
            (Self::Multi(have), Self::Single(want)) => have.contains(want),
            (Self::Single(have), Self::Multi(want)) => {
                want.len() == 1 && want.contains(have)
            }
            _ => false,
        }
    }

    pub(crate) fn hash_into(&self, hasher: &mut CanonicalHasher) {
        match self {
            Self::Bool(b) => {
                hasher.byte(0);
                hasher.byte(u8::from(*b));
            }
            Self::Single(s) => {
                hasher.byte(1);
                hasher.str(s);
            }
            Self::Multi(values) => {
                hasher.byte(2);
                hasher.length(values.len());
                for v in values {
                    hasher.str(v);
                }
            }
        }
    }

    /// Renders `name` with this value in request syntax.
    pub fn render(&self, name: &str) -> String {
        match self {
            Self::Bool(true) => format!("+{name}"),
            Self::Bool(false) => format!("~{name}"),
            Self::Single(v) => format!(" {name}={v}"),
            Self::Multi(values) => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                format!(" {name}={}", joined.join(","))
            }
        }
    }
}

/// Canonically ordered variant assignments of a node.
pub type VariantMap = BTreeMap<String, VariantValue>;

/// Renders a variant map in request syntax (booleans first, then key/values).
pub fn render_variants(variants: &VariantMap) -> String {
    let mut flags = String::new();
    let mut pairs = String::new();
    for (name, value) in variants {
        match value {
            VariantValue::Bool(_) => flags.push_str(&value.render(name)),
            _ => pairs.push_str(&value.render(name)),
        }
    }
    flags + &pairs
}

/// Which variants a splice rule requires to agree between the node being
/// replaced and its replacement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VariantSelector {
    /// Every variant present on the original must match (`"*"`).
    All,
    /// Only the named variants must match; others may differ freely.
    Only(BTreeSet<String>),
}

impl VariantSelector {
    /// Selector that requires no variant agreement.
    pub fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    /// Selector over an explicit list of variant names.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    /// Ordering key for rule precedence: smaller is more specific.
    pub fn specificity(&self) -> usize {
        match self {
            Self::All => usize::MAX,
            Self::Only(names) => names.len(),
        }
    }

    /// Checks agreement between `original` and `replacement`.
    ///
    /// Returns the first variant name that disagrees. A variant required by
    /// the selector but absent from both sides agrees; absent from only one
    /// side is a mismatch.
    pub fn first_mismatch<'a>(
        &'a self,
        original: &'a VariantMap,
        replacement: &VariantMap,
    ) -> Option<&'a str> {
        match self {
            Self::All => original
                .iter()
                .find(|(name, value)| replacement.get(*name) != Some(*value))
                .map(|(name, _)| name.as_str()),
            Self::Only(names) => names
                .iter()
                .find(|name| original.get(*name) != replacement.get(*name))
                .map(String::as_str),
        }
    }
}

impl Default for VariantSelector {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for VariantSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Only(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "[{}]", names.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, VariantValue)]) -> VariantMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn multi_satisfies_subset_requests() {
        let have = VariantValue::multi(["a", "b"]);
        assert!(have.satisfies(&VariantValue::multi(["a"])));
        assert!(have.satisfies(&VariantValue::Single("b".into())));
        assert!(!have.satisfies(&VariantValue::multi(["c"])));
        assert!(!VariantValue::Bool(true).satisfies(&VariantValue::Single("true".into())));
    }

    #[test]
    fn parse_assignment_picks_tag() {
        assert_eq!(VariantValue::parse_assignment("true"), VariantValue::Bool(true));
        assert_eq!(
            VariantValue::parse_assignment("v1"),
            VariantValue::Single("v1".into())
        );
        assert_eq!(
            VariantValue::parse_assignment("v1,v2"),
            VariantValue::multi(["v1", "v2"])
        );
    }

    #[test]
    fn all_selector_rejects_any_mismatch() {
        let original = map(&[
            ("a", VariantValue::Bool(true)),
            ("c", VariantValue::Single("v1".into())),
        ]);
        let same = original.clone();
        let differs = map(&[
            ("a", VariantValue::Bool(false)),
            ("c", VariantValue::Single("v1".into())),
        ]);
        assert_eq!(VariantSelector::All.first_mismatch(&original, &same), None);
        assert_eq!(
            VariantSelector::All.first_mismatch(&original, &differs),
            Some("a")
        );
    }

    #[test]
    fn explicit_selector_ignores_unlisted_variants() {
        let original = map(&[
            ("a", VariantValue::Bool(true)),
            ("b", VariantValue::Bool(false)),
            ("c", VariantValue::Single("v3".into())),
            ("d", VariantValue::Single("v2".into())),
        ]);
        let replacement = map(&[
            ("a", VariantValue::Bool(false)),
            ("b", VariantValue::Bool(true)),
            ("c", VariantValue::Single("v3".into())),
            ("d", VariantValue::Single("v2".into())),
        ]);
        let selector = VariantSelector::only(["c", "d"]);
        assert_eq!(selector.first_mismatch(&original, &replacement), None);

        let mut wrong_d = replacement;
        wrong_d.insert("d".into(), VariantValue::Single("v3".into()));
        assert_eq!(selector.first_mismatch(&original, &wrong_d), Some("d"));
    }

    #[test]
    fn render_orders_flags_before_pairs() {
        let variants = map(&[
            ("c", VariantValue::Single("v1".into())),
            ("a", VariantValue::Bool(true)),
            ("b", VariantValue::Bool(false)),
        ]);
        assert_eq!(render_variants(&variants), "+a~b c=v1");
    }
}
