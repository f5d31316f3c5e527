// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Package metadata: the read-only repository port and its in-memory form.
//!
//! The concretizer never inspects package recipes directly. Everything it
//! needs (version and variant domains, conditional dependencies, virtual
//! providers and splice rules) comes through [`Repository`].
use std::collections::{BTreeMap, BTreeSet};

use crate::deptypes::DepTypes;
use crate::error::{InvalidConstraintError, RequestError};
use crate::node::{NodeIdentity, DEFAULT_NAMESPACE};
use crate::request::NodeConstraint;
use crate::variant::{VariantMap, VariantSelector, VariantValue};
use crate::version::Version;

/// Declaration of one build variant of a package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantDecl {
    /// Variant name.
    pub name: String,
    /// Value used when nothing constrains the variant.
    pub default: VariantValue,
    /// Allowed values for single/multi variants; empty for booleans.
    pub values: BTreeSet<String>,
}

impl VariantDecl {
    /// Boolean toggle.
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default: VariantValue::Bool(default),
            values: BTreeSet::new(),
        }
    }

    /// Single choice from `values`.
    pub fn single<I, S>(name: impl Into<String>, default: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            default: VariantValue::Single(default.to_string()),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Set of choices from `values`.
    pub fn multi<I, S>(name: impl Into<String>, default: &[&str], values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            default: VariantValue::multi(default.iter().copied()),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Checks a requested value against this declaration.
    ///
    /// # Errors
    ///
    /// When the value's kind or any of its values is not allowed.
    pub fn check(&self, package: &str, value: &VariantValue) -> Result<(), InvalidConstraintError> {
        let ok = match (&self.default, value) {
            (VariantValue::Bool(_), VariantValue::Bool(_)) => true,
            (VariantValue::Bool(_), _) | (_, VariantValue::Bool(_)) => false,
            (_, VariantValue::Single(v)) => self.values.contains(v),
            (VariantValue::Multi(_), VariantValue::Multi(vs)) => vs.is_subset(&self.values),
            (VariantValue::Single(_), VariantValue::Multi(_)) => false,
        };
        if ok {
            Ok(())
        } else {
            Err(InvalidConstraintError::new(
                package,
                format!(
                    "value `{}` is not allowed for variant `{}`",
                    value.render(&self.name).trim(),
                    self.name
                ),
            ))
        }
    }
}

/// A dependency that applies when the consuming node matches `when`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyCondition {
    /// Anonymous constraint on the consuming node.
    pub when: NodeConstraint,
    /// Constraint on the dependency; its name may be a virtual interface.
    pub dependency: NodeConstraint,
    /// Edge types of the dependency.
    pub deptypes: DepTypes,
}

impl DependencyCondition {
    /// Returns `true` if the condition is active for `consumer`.
    pub fn applies_to(&self, consumer: &NodeIdentity) -> bool {
        self.when.matches_attributes(consumer)
    }

    /// Name of the dependency (package or virtual).
    pub fn name(&self) -> &str {
        self.dependency.label()
    }
}

/// ABI-compatibility declaration: a node matching `when` may be replaced,
/// without rebuilding its dependents, by a node matching `replacement`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpliceRule {
    /// Constraint the replacement node must satisfy.
    pub replacement: NodeConstraint,
    /// Constraint the replaced node must satisfy.
    pub when: NodeConstraint,
    /// Variants that must agree; `None` defers to the configured default.
    pub match_variants: Option<VariantSelector>,
}

/// Declarative package record held by [`MemoryRepository`].
#[derive(Clone, Debug)]
pub struct PackageDef {
    name: String,
    namespace: String,
    versions: Vec<Version>,
    variants: Vec<VariantDecl>,
    dependencies: Vec<DependencyCondition>,
    provides: Vec<String>,
    splice_rules: Vec<SpliceRule>,
}

impl PackageDef {
    /// Empty package definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            versions: Vec::new(),
            variants: Vec::new(),
            dependencies: Vec::new(),
            provides: Vec::new(),
            splice_rules: Vec::new(),
        }
    }

    /// Overrides the namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Declares a version.
    ///
    /// # Errors
    ///
    /// When `version` is malformed.
    pub fn version(mut self, version: &str) -> Result<Self, RequestError> {
        self.versions.push(Version::parse(version)?);
        Ok(self)
    }

    /// Declares a variant.
    pub fn variant(mut self, decl: VariantDecl) -> Self {
        self.variants.push(decl);
        self
    }

    /// Declares an unconditional dependency.
    ///
    /// # Errors
    ///
    /// When `spec` does not parse as a named node constraint.
    pub fn depends_on(self, spec: &str, deptypes: DepTypes) -> Result<Self, RequestError> {
        self.depends_on_when(spec, "", deptypes)
    }

    /// Declares a dependency that applies when the package matches `when`.
    ///
    /// # Errors
    ///
    /// When either constraint fails to parse or the dependency is unnamed.
    pub fn depends_on_when(
        mut self,
        spec: &str,
        when: &str,
        deptypes: DepTypes,
    ) -> Result<Self, RequestError> {
        let dependency = NodeConstraint::parse(spec)?;
        if dependency.name.is_none() {
            return Err(InvalidConstraintError::new(&self.name, "dependency must name a package").into());
        }
        self.dependencies.push(DependencyCondition {
            when: NodeConstraint::parse(when)?,
            dependency,
            deptypes,
        });
        Ok(self)
    }

    /// Declares that this package provides a virtual interface.
    pub fn provides(mut self, virtual_name: impl Into<String>) -> Self {
        self.provides.push(virtual_name.into());
        self
    }

    /// Declares a splice rule.
    ///
    /// # Errors
    ///
    /// When either constraint fails to parse.
    pub fn can_splice(
        mut self,
        replacement: &str,
        when: &str,
        match_variants: Option<VariantSelector>,
    ) -> Result<Self, RequestError> {
        self.splice_rules.push(SpliceRule {
            replacement: NodeConstraint::parse(replacement)?,
            when: NodeConstraint::parse(when)?,
            match_variants,
        });
        Ok(self)
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Read-only queries against package metadata.
///
/// Lists are returned in declaration order except where noted; callers rely
/// on that order for deterministic tie-breaks.
pub trait Repository: Send + Sync {
    /// Returns `true` if `name` is a package (not a virtual).
    fn exists(&self, name: &str) -> bool;

    /// Returns `true` if `name` is a virtual interface with providers.
    fn is_virtual(&self, name: &str) -> bool {
        !self.providers(name).is_empty()
    }

    /// Namespace of a package.
    fn namespace(&self, name: &str) -> Option<String>;

    /// Declared versions, newest first.
    fn versions(&self, name: &str) -> Vec<Version>;

    /// Declared variants.
    fn variant_domain(&self, name: &str) -> Vec<VariantDecl>;

    /// Every declared dependency with its `when` condition.
    fn dependency_conditions(&self, name: &str) -> Vec<DependencyCondition>;

    /// Packages providing `virtual_name`.
    fn providers(&self, virtual_name: &str) -> Vec<String>;

    /// Virtual interfaces provided by `name`.
    fn provided_virtuals(&self, name: &str) -> Vec<String>;

    /// Splice rules declared by `name`.
    fn splice_rules(&self, name: &str) -> Vec<SpliceRule>;

    /// Variant defaults of `name`.
    fn default_variants(&self, name: &str) -> VariantMap {
        self.variant_domain(name)
            .into_iter()
            .map(|decl| (decl.name, decl.default))
            .collect()
    }

    /// Dependency conditions active for `consumer`.
    fn active_dependencies(&self, consumer: &NodeIdentity) -> Vec<DependencyCondition> {
        self.dependency_conditions(&consumer.name)
            .into_iter()
            .filter(|c| c.applies_to(consumer))
            .collect()
    }
}

/// [`Repository`] backed by a map of [`PackageDef`] records.
#[derive(Clone, Debug, Default)]
pub struct MemoryRepository {
    packages: BTreeMap<String, PackageDef>,
    providers: BTreeMap<String, Vec<String>>,
}

impl MemoryRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a package definition.
    pub fn insert(&mut self, def: PackageDef) {
        for v in &def.provides {
            let list = self.providers.entry(v.clone()).or_default();
            if !list.contains(&def.name) {
                list.push(def.name.clone());
            }
        }
        self.packages.insert(def.name.clone(), def);
    }

    /// Builder form of [`MemoryRepository::insert`].
    pub fn with(mut self, def: PackageDef) -> Self {
        self.insert(def);
        self
    }

    /// Package names in lexical order.
    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }
}

impl Repository for MemoryRepository {
    fn exists(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    fn namespace(&self, name: &str) -> Option<String> {
        self.packages.get(name).map(|p| p.namespace.clone())
    }

    fn versions(&self, name: &str) -> Vec<Version> {
        let mut versions = self
            .packages
            .get(name)
            .map(|p| p.versions.clone())
            .unwrap_or_default();
        versions.sort_by(|a, b| b.cmp(a));
        versions.dedup();
        versions
    }

    fn variant_domain(&self, name: &str) -> Vec<VariantDecl> {
        self.packages
            .get(name)
            .map(|p| p.variants.clone())
            .unwrap_or_default()
    }

    fn dependency_conditions(&self, name: &str) -> Vec<DependencyCondition> {
        self.packages
            .get(name)
            .map(|p| p.dependencies.clone())
            .unwrap_or_default()
    }

    fn providers(&self, virtual_name: &str) -> Vec<String> {
        self.providers.get(virtual_name).cloned().unwrap_or_default()
    }

    fn provided_virtuals(&self, name: &str) -> Vec<String> {
        self.packages
            .get(name)
            .map(|p| p.provides.clone())
            .unwrap_or_default()
    }

    fn splice_rules(&self, name: &str) -> Vec<SpliceRule> {
        self.packages
            .get(name)
            .map(|p| p.splice_rules.clone())
            .unwrap_or_default()
    }
}
