// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON package repository documents.

use serde::{Deserialize, Serialize};
use splicer_core::{DepTypes, MemoryRepository, PackageDef, ParseError, RequestError, VariantDecl};

use crate::concretizer::MatchVariants;
use crate::config::ConfigError;

/// Config key under which a [`RepositoryDocument`] is stored.
pub const REPOSITORY_KEY: &str = "repository";

/// A whole repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDocument {
    /// Package records.
    #[serde(default)]
    pub packages: Vec<PackageDocument>,
}

/// One package record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDocument {
    /// Package name.
    pub name: String,
    /// Namespace; defaults to `builtin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Known versions, any order.
    #[serde(default)]
    pub versions: Vec<String>,
    /// Variant declarations.
    #[serde(default)]
    pub variants: Vec<VariantDocument>,
    /// Dependency conditions.
    #[serde(default)]
    pub dependencies: Vec<DependencyDocument>,
    /// Virtual interfaces provided.
    #[serde(default)]
    pub provides: Vec<String>,
    /// Splice-eligibility rules.
    #[serde(default)]
    pub splice_rules: Vec<SpliceRuleDocument>,
}

/// Default value of a variant; its JSON type picks the variant kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantDefault {
    /// Boolean toggle.
    Bool(bool),
    /// Single choice.
    Single(String),
    /// Multi choice.
    Multi(Vec<String>),
}

/// One variant declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDocument {
    /// Variant name.
    pub name: String,
    /// Default value.
    pub default: VariantDefault,
    /// Allowed values for single/multi variants.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// One dependency condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDocument {
    /// Dependency constraint, e.g. `splice-z+foo`.
    pub spec: String,
    /// Anonymous constraint on the consumer, e.g. `+foo`; empty means always.
    #[serde(default)]
    pub when: String,
    /// Comma-separated types; defaults to `build,link`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deptypes: Option<String>,
}

/// One splice rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceRuleDocument {
    /// Constraint on the replacement.
    pub replacement: String,
    /// Constraint on the replaced node.
    pub when: String,
    /// Variants that must agree; defaults to the concretizer setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_variants: Option<MatchVariants>,
}

impl VariantDocument {
    fn to_decl(&self) -> VariantDecl {
        match &self.default {
            VariantDefault::Bool(b) => VariantDecl::boolean(&self.name, *b),
            VariantDefault::Single(v) => {
                let mut values = self.values.clone();
                if !values.contains(v) {
                    values.push(v.clone());
                }
                VariantDecl::single(&self.name, v, values)
            }
            VariantDefault::Multi(vs) => {
                let defaults: Vec<&str> = vs.iter().map(String::as_str).collect();
                let mut values = self.values.clone();
                values.extend(vs.iter().filter(|v| !self.values.contains(v)).cloned());
                VariantDecl::multi(&self.name, &defaults, values)
            }
        }
    }
}

impl PackageDocument {
    /// Builds the core package definition.
    pub fn to_package(&self) -> Result<PackageDef, ConfigError> {
        let mut def = PackageDef::new(&self.name);
        if let Some(ns) = &self.namespace {
            def = def.namespace(ns);
        }
        for v in &self.versions {
            def = def.version(v)?;
        }
        for variant in &self.variants {
            def = def.variant(variant.to_decl());
        }
        for dep in &self.dependencies {
            let deptypes = match &dep.deptypes {
                Some(list) => DepTypes::parse_list(list).ok_or_else(|| {
                    RequestError::Parse(ParseError {
                        input: list.clone(),
                        position: 0,
                        message: "unknown dependency type".to_string(),
                    })
                })?,
                None => DepTypes::DEFAULT,
            };
            def = def.depends_on_when(&dep.spec, &dep.when, deptypes)?;
        }
        for virtual_name in &self.provides {
            def = def.provides(virtual_name);
        }
        for rule in &self.splice_rules {
            let selector = rule
                .match_variants
                .as_ref()
                .map(MatchVariants::to_selector)
                .transpose()?;
            def = def.can_splice(&rule.replacement, &rule.when, selector)?;
        }
        Ok(def)
    }
}

impl RepositoryDocument {
    /// Builds an in-memory repository from every record.
    pub fn to_repository(&self) -> Result<MemoryRepository, ConfigError> {
        let mut repo = MemoryRepository::new();
        for package in &self.packages {
            repo.insert(package.to_package()?);
        }
        Ok(repo)
    }
}
