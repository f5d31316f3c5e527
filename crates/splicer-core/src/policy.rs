// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Concretizer policy: reuse, buildability, externals and splicing.
use std::collections::BTreeMap;

use crate::variant::VariantSelector;

/// An installation that exists outside the store, declared by configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalDecl {
    /// Constraint text naming the package, an exact version and variants.
    pub spec: String,
    /// Where the external lives.
    pub prefix: String,
}

/// Per-package policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackagePolicy {
    /// `false` forbids building the package from source.
    pub buildable: bool,
    /// Externals offered as reuse candidates.
    pub externals: Vec<ExternalDecl>,
}

impl Default for PackagePolicy {
    fn default() -> Self {
        Self {
            buildable: true,
            externals: Vec::new(),
        }
    }
}

/// Splice options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplicePolicy {
    /// Enables the splice fallback after a strict solve fails.
    pub automatic: bool,
    /// Selector for splice rules that do not name one.
    pub match_variants: VariantSelector,
}

/// Options governing one concretizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Offer installed specs as candidates.
    pub reuse: bool,
    /// Per-package overrides keyed by package name.
    pub packages: BTreeMap<String, PackagePolicy>,
    /// Splice options.
    pub splice: SplicePolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            reuse: true,
            packages: BTreeMap::new(),
            splice: SplicePolicy::default(),
        }
    }
}

impl Policy {
    /// Sets the reuse flag.
    pub fn with_reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    /// Forbids building `package` from source.
    pub fn non_buildable(mut self, package: impl Into<String>) -> Self {
        self.packages.entry(package.into()).or_default().buildable = false;
        self
    }

    /// Declares an external for `package`.
    pub fn with_external(
        mut self,
        package: impl Into<String>,
        spec: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        self.packages
            .entry(package.into())
            .or_default()
            .externals
            .push(ExternalDecl {
                spec: spec.into(),
                prefix: prefix.into(),
            });
        self
    }

    /// Enables or disables the splice fallback.
    pub fn with_splicing(mut self, automatic: bool) -> Self {
        self.splice.automatic = automatic;
        self
    }

    /// Sets the default splice variant selector.
    pub fn with_match_variants(mut self, selector: VariantSelector) -> Self {
        self.splice.match_variants = selector;
        self
    }

    /// Returns `true` unless `package` is marked non-buildable.
    pub fn is_buildable(&self, package: &str) -> bool {
        self.packages.get(package).is_none_or(|p| p.buildable)
    }

    /// Every declared external with its package name.
    pub fn externals(&self) -> impl Iterator<Item = (&str, &ExternalDecl)> {
        self.packages
            .iter()
            .flat_map(|(name, p)| p.externals.iter().map(move |e| (name.as_str(), e)))
    }
}
