// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Concretizer options as stored on disk.
//!
//! ```json
//! {
//!   "reuse": true,
//!   "splice": { "automatic": true, "match_variants": "*" },
//!   "packages": {
//!     "splice-z": {
//!       "buildable": false,
//!       "externals": [{ "spec": "splice-z@1.0.2+compat", "prefix": "/usr" }]
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use splicer_core::{ExternalDecl, PackagePolicy, Policy, SplicePolicy, VariantSelector};

use crate::config::ConfigError;

/// Config key under which [`ConcretizerConfig`] is stored.
pub const CONCRETIZER_KEY: &str = "concretizer";

/// Variant selector in document form: `"*"` or a list of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchVariants {
    /// Must be `"*"`.
    Star(String),
    /// Explicit variant names.
    Names(Vec<String>),
}

impl Default for MatchVariants {
    fn default() -> Self {
        Self::Names(Vec::new())
    }
}

impl MatchVariants {
    /// Converts to a core selector.
    pub fn to_selector(&self) -> Result<VariantSelector, ConfigError> {
        match self {
            Self::Star(s) if s == "*" => Ok(VariantSelector::All),
            Self::Star(other) => Err(ConfigError::Other(format!(
                "match_variants must be \"*\" or a list, got {other:?}"
            ))),
            Self::Names(names) => Ok(VariantSelector::only(names.iter().cloned())),
        }
    }
}

impl From<&VariantSelector> for MatchVariants {
    fn from(selector: &VariantSelector) -> Self {
        match selector {
            VariantSelector::All => Self::Star("*".to_string()),
            VariantSelector::Only(names) => Self::Names(names.iter().cloned().collect()),
        }
    }
}

/// Splice section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpliceConfig {
    /// Enables the splice fallback.
    pub automatic: bool,
    /// Default selector for rules without one.
    pub match_variants: MatchVariants,
}

/// One external installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConfig {
    /// Constraint naming the package, an exact version and variants.
    pub spec: String,
    /// Installation prefix.
    pub prefix: String,
}

/// Per-package section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// `false` forbids source builds.
    pub buildable: bool,
    /// Known external installations.
    pub externals: Vec<ExternalConfig>,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            buildable: true,
            externals: Vec::new(),
        }
    }
}

/// Top-level concretizer document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcretizerConfig {
    /// Offer installed specs for reuse.
    pub reuse: bool,
    /// Splice options.
    pub splice: SpliceConfig,
    /// Per-package options.
    pub packages: BTreeMap<String, PackageConfig>,
}

impl Default for ConcretizerConfig {
    fn default() -> Self {
        Self {
            reuse: true,
            splice: SpliceConfig::default(),
            packages: BTreeMap::new(),
        }
    }
}

impl ConcretizerConfig {
    /// Converts the document into a core [`Policy`].
    pub fn to_policy(&self) -> Result<Policy, ConfigError> {
        let packages = self
            .packages
            .iter()
            .map(|(name, pkg)| {
                let policy = PackagePolicy {
                    buildable: pkg.buildable,
                    externals: pkg
                        .externals
                        .iter()
                        .map(|e| ExternalDecl {
                            spec: e.spec.clone(),
                            prefix: e.prefix.clone(),
                        })
                        .collect(),
                };
                (name.clone(), policy)
            })
            .collect();
        Ok(Policy {
            reuse: self.reuse,
            packages,
            splice: SplicePolicy {
                automatic: self.splice.automatic,
                match_variants: self.splice.match_variants.to_selector()?,
            },
        })
    }
}

impl From<&Policy> for ConcretizerConfig {
    fn from(policy: &Policy) -> Self {
        Self {
            reuse: policy.reuse,
            splice: SpliceConfig {
                automatic: policy.splice.automatic,
                match_variants: MatchVariants::from(&policy.splice.match_variants),
            },
            packages: policy
                .packages
                .iter()
                .map(|(name, pkg)| {
                    let doc = PackageConfig {
                        buildable: pkg.buildable,
                        externals: pkg
                            .externals
                            .iter()
                            .map(|e| ExternalConfig {
                                spec: e.spec.clone(),
                                prefix: e.prefix.clone(),
                            })
                            .collect(),
                    };
                    (name.clone(), doc)
                })
                .collect(),
        }
    }
}
