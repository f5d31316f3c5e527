// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Abstract requests: partial node constraints and the request parser.
//!
//! Grammar:
//!
//! ```text
//! request   := node ( '^' edgeattrs? node )*
//! edgeattrs := '[' attr ( ' ' attr )* ']'
//! attr      := 'virtuals=' list | 'deptypes=' list
//! node      := [namespace '.'] name ( '@' versions | '+' v | '~' v | key '=' value )*
//! ```
//!
//! `platform=` and `target=` constrain architecture facts; every other
//! `key=value` pair is a variant.
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::deptypes::DepTypes;
use crate::error::{InvalidConstraintError, ParseError, RequestError};
use crate::node::NodeIdentity;
use crate::variant::{render_variants, VariantMap, VariantValue};
use crate::version::VersionConstraint;

const ANONYMOUS: &str = "<anonymous>";

/// Partial constraint on a single node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeConstraint {
    /// Package (or virtual interface) name; `None` for anonymous constraints
    /// such as a rule's `when` clause.
    pub name: Option<String>,
    /// Required namespace.
    pub namespace: Option<String>,
    /// Version requirement.
    pub version: VersionConstraint,
    /// Required variant values; unlisted variants are unconstrained.
    pub variants: VariantMap,
    /// Required platform.
    pub platform: Option<String>,
    /// Required target.
    pub target: Option<String>,
}

impl NodeConstraint {
    /// Unconstrained node with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Constraint matched only by nodes with exactly this identity.
    pub fn exact(identity: &NodeIdentity) -> Self {
        Self {
            name: Some(identity.name.clone()),
            namespace: Some(identity.namespace.clone()),
            version: VersionConstraint::Exact(identity.version.clone()),
            variants: identity.variants.clone(),
            platform: Some(identity.arch.platform.clone()),
            target: Some(identity.arch.target.clone()),
        }
    }

    /// Parses a single node constraint; the name may be omitted.
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let mut parser = Parser::new(text);
        let node = parser.node()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing input").into());
        }
        Ok(node)
    }

    /// Name used in diagnostics.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(ANONYMOUS)
    }

    /// Returns `true` if `identity` satisfies every attribute, name included.
    pub fn matches(&self, identity: &NodeIdentity) -> bool {
        self.name.as_ref().is_none_or(|n| *n == identity.name) && self.matches_attributes(identity)
    }

    /// Like [`NodeConstraint::matches`] but ignores the name.
    ///
    /// Used where the constraint names a virtual interface and the node is a
    /// provider of it.
    pub fn matches_attributes(&self, identity: &NodeIdentity) -> bool {
        self.namespace
            .as_ref()
            .is_none_or(|ns| *ns == identity.namespace)
            && self.version.contains(&identity.version)
            && self.platform.as_ref().is_none_or(|p| *p == identity.arch.platform)
            && self.target.as_ref().is_none_or(|t| *t == identity.arch.target)
            && self.variants.iter().all(|(name, wanted)| {
                identity
                    .variants
                    .get(name)
                    .is_some_and(|have| have.satisfies(wanted))
            })
    }

    /// Sets a variant requirement, rejecting contradictions.
    pub fn constrain_variant(
        &mut self,
        name: &str,
        value: VariantValue,
    ) -> Result<(), InvalidConstraintError> {
        match self.variants.get(name) {
            Some(existing) if *existing != value => Err(InvalidConstraintError::new(
                self.label(),
                format!(
                    "contradictory values for variant `{name}`:{} vs{}",
                    existing.render(name),
                    value.render(name)
                ),
            )),
            Some(_) => Ok(()),
            None => {
                self.variants.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    /// Narrows this constraint by every attribute of `other`.
    ///
    /// # Errors
    ///
    /// [`InvalidConstraintError`] when the two disagree on a variant, the
    /// namespace or the architecture, or share no version.
    pub fn constrain(&mut self, other: &Self) -> Result<(), InvalidConstraintError> {
        let label = self.label().to_string();
        for (key, slot, value) in [
            ("namespace", &mut self.namespace, &other.namespace),
            ("platform", &mut self.platform, &other.platform),
            ("target", &mut self.target, &other.target),
        ] {
            if let Some(value) = value {
                Self::constrain_arch(slot, key, value, &label)?;
            }
        }
        for (name, value) in &other.variants {
            self.constrain_variant(name, value.clone())?;
        }
        self.version = self.version.intersection(&other.version).ok_or_else(|| {
            InvalidConstraintError::new(
                &label,
                format!("disjoint versions: `@{}` vs `@{}`", self.version, other.version),
            )
        })?;
        Ok(())
    }

    fn constrain_arch(
        slot: &mut Option<String>,
        key: &str,
        value: &str,
        label: &str,
    ) -> Result<(), InvalidConstraintError> {
        match slot {
            Some(existing) if existing != value => Err(InvalidConstraintError::new(
                label,
                format!("contradictory {key}: `{existing}` vs `{value}`"),
            )),
            _ => {
                *slot = Some(value.to_string());
                Ok(())
            }
        }
    }
}

impl fmt::Display for NodeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        if let Some(name) = &self.name {
            if let Some(ns) = &self.namespace {
                out.push_str(ns);
                out.push('.');
            }
            out.push_str(name);
        }
        if !self.version.is_any() {
            out.push('@');
            out.push_str(&self.version.to_string());
        }
        out.push_str(&render_variants(&self.variants));
        if let Some(platform) = &self.platform {
            out.push_str(" platform=");
            out.push_str(platform);
        }
        if let Some(target) = &self.target {
            out.push_str(" target=");
            out.push_str(target);
        }
        f.write_str(out.trim_start())
    }
}

impl FromStr for NodeConstraint {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A `^dependency` clause of an abstract request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyConstraint {
    /// Constraint on the dependency node.
    pub node: NodeConstraint,
    /// Required edge types, if given in brackets.
    pub deptypes: Option<DepTypes>,
    /// Virtual interfaces the reaching edge must satisfy.
    pub virtuals: BTreeSet<String>,
}

impl DependencyConstraint {
    /// Dependency clause with no edge attributes.
    pub fn new(node: NodeConstraint) -> Self {
        Self {
            node,
            deptypes: None,
            virtuals: BTreeSet::new(),
        }
    }

    /// Package (or virtual) name of the clause.
    pub fn name(&self) -> &str {
        self.node.label()
    }
}

impl fmt::Display for DependencyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("^")?;
        let mut attrs = Vec::new();
        if !self.virtuals.is_empty() {
            let names: Vec<&str> = self.virtuals.iter().map(String::as_str).collect();
            attrs.push(format!("virtuals={}", names.join(",")));
        }
        if let Some(deptypes) = self.deptypes {
            attrs.push(format!("deptypes={deptypes}"));
        }
        if !attrs.is_empty() {
            write!(f, "[{}] ", attrs.join(" "))?;
        }
        write!(f, "{}", self.node)
    }
}

/// A dependency request: a named root plus `^dependency` constraints anywhere
/// in its closure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbstractSpec {
    root: NodeConstraint,
    dependencies: Vec<DependencyConstraint>,
}

impl AbstractSpec {
    /// Request for `root` with no dependency constraints.
    pub fn new(root: NodeConstraint) -> Self {
        Self {
            root,
            dependencies: Vec::new(),
        }
    }

    /// Adds a `^dependency` clause.
    #[must_use]
    pub fn with_dependency(mut self, dependency: DependencyConstraint) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Parses request syntax.
    ///
    /// # Errors
    ///
    /// [`RequestError::Parse`] for malformed text, [`RequestError::Invalid`]
    /// for contradictory constraints (`+a~a`, two versions, unnamed nodes).
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let mut parser = Parser::new(text);
        parser.skip_ws();
        let root = parser.node()?;
        if root.name.is_none() {
            return Err(InvalidConstraintError::new(ANONYMOUS, "request root must name a package").into());
        }
        let mut spec = Self::new(root);
        loop {
            parser.skip_ws();
            if parser.at_end() {
                break;
            }
            parser.expect('^')?;
            parser.skip_ws();
            if parser.at_end() {
                return Err(parser.error("expected a dependency after `^`").into());
            }
            let (deptypes, virtuals) = if parser.peek() == Some('[') {
                parser.edge_attrs()?
            } else {
                (None, BTreeSet::new())
            };
            parser.skip_ws();
            let node = parser.node()?;
            if node.name.is_none() {
                return Err(InvalidConstraintError::new(
                    ANONYMOUS,
                    "dependency constraints must name a package",
                )
                .into());
            }
            spec.dependencies.push(DependencyConstraint {
                node,
                deptypes,
                virtuals,
            });
        }
        Ok(spec)
    }

    /// Root constraint.
    pub fn root(&self) -> &NodeConstraint {
        &self.root
    }

    /// `^dependency` clauses in request order.
    pub fn dependencies(&self) -> &[DependencyConstraint] {
        &self.dependencies
    }

    /// Root name.
    pub fn name(&self) -> &str {
        self.root.label()
    }

    /// Every node constraint in the request, root first.
    pub fn constraints(&self) -> impl Iterator<Item = &NodeConstraint> {
        std::iter::once(&self.root).chain(self.dependencies.iter().map(|d| &d.node))
    }

    /// Constraints on `name`, root included.
    pub fn constraints_on<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s NodeConstraint> {
        self.constraints().filter(move |c| c.name.as_deref() == Some(name))
    }
}

impl fmt::Display for AbstractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for dep in &self.dependencies {
            write!(f, " {dep}")?;
        }
        Ok(())
    }
}

impl FromStr for AbstractSpec {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | ',' | '=')
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            input: self.input.to_string(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == wanted => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected `{wanted}`, found `{c}`"))),
            None => Err(self.error(format!("expected `{wanted}`, found end of input"))),
        }
    }

    fn word(&mut self, what: &str) -> Result<&'a str, ParseError> {
        let word = self.take_while(is_word_char);
        if word.is_empty() {
            return Err(self.error(format!("expected {what}")));
        }
        Ok(word)
    }

    fn node(&mut self) -> Result<NodeConstraint, RequestError> {
        let mut node = NodeConstraint::default();
        let mut seen_version = false;
        let mut first = true;
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some('^') => break,
                Some('@') => {
                    self.bump();
                    let text = self.take_while(is_version_char);
                    if text.is_empty() {
                        return Err(self.error("expected version after `@`").into());
                    }
                    if seen_version {
                        return Err(InvalidConstraintError::new(
                            node.label(),
                            "more than one version constraint",
                        )
                        .into());
                    }
                    seen_version = true;
                    let label = node.label().to_string();
                    node.version = VersionConstraint::parse(text).map_err(|e| match e {
                        RequestError::Invalid(inner) => {
                            RequestError::Invalid(InvalidConstraintError::new(label, inner.message))
                        }
                        other @ RequestError::Parse(_) => other,
                    })?;
                }
                Some(sigil @ ('+' | '~')) => {
                    self.bump();
                    let name = self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
                    if name.is_empty() {
                        return Err(self.error(format!("expected variant name after `{sigil}`")).into());
                    }
                    node.constrain_variant(name, VariantValue::Bool(sigil == '+'))?;
                }
                Some(c) if is_word_char(c) => {
                    let word = self.word("a name")?;
                    if self.peek() == Some('=') {
                        self.bump();
                        let value = self.take_while(|c| is_word_char(c) || c == ',');
                        if value.is_empty() {
                            return Err(self.error(format!("expected value for `{word}`")).into());
                        }
                        self.key_value(&mut node, word, value)?;
                    } else if first {
                        match word.split_once('.') {
                            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                                node.namespace = Some(ns.to_string());
                                node.name = Some(name.to_string());
                            }
                            _ => node.name = Some(word.to_string()),
                        }
                    } else {
                        return Err(self
                            .error(format!("unexpected name `{word}`; did you mean `^{word}`?"))
                            .into());
                    }
                }
                Some(c) => return Err(self.error(format!("unexpected character `{c}`")).into()),
            }
            first = false;
        }
        Ok(node)
    }

    fn key_value(
        &self,
        node: &mut NodeConstraint,
        key: &str,
        value: &str,
    ) -> Result<(), RequestError> {
        if key.contains('.') {
            return Err(self.error(format!("malformed key `{key}`")).into());
        }
        let label = node.label().to_string();
        match key {
            "platform" => NodeConstraint::constrain_arch(&mut node.platform, key, value, &label)?,
            "target" => NodeConstraint::constrain_arch(&mut node.target, key, value, &label)?,
            _ => node.constrain_variant(key, VariantValue::parse_assignment(value))?,
        }
        Ok(())
    }

    fn edge_attrs(&mut self) -> Result<(Option<DepTypes>, BTreeSet<String>), ParseError> {
        self.expect('[')?;
        let mut deptypes = None;
        let mut virtuals = BTreeSet::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                break;
            }
            let key = self.word("an edge attribute")?;
            self.expect('=')?;
            let value = self.take_while(|c| is_word_char(c) || c == ',');
            match key {
                "virtuals" => {
                    virtuals.extend(
                        value
                            .split(',')
                            .filter(|v| !v.is_empty())
                            .map(str::to_string),
                    );
                }
                "deptypes" => {
                    deptypes = Some(
                        DepTypes::parse_list(value)
                            .ok_or_else(|| self.error(format!("unknown dependency types `{value}`")))?,
                    );
                }
                other => return Err(self.error(format!("unknown edge attribute `{other}`"))),
            }
        }
        Ok((deptypes, virtuals))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn parses_root_with_dependencies() {
        let spec = AbstractSpec::parse("splice-t@1 ^splice-h@1.0.2+compat ^splice-z@1.0.0").unwrap();
        assert_eq!(spec.name(), "splice-t");
        assert_eq!(spec.dependencies().len(), 2);
        assert_eq!(spec.dependencies()[0].name(), "splice-h");
        assert_eq!(
            spec.dependencies()[0].node.variants.get("compat"),
            Some(&VariantValue::Bool(true))
        );
    }

    #[test]
    fn parses_key_values_and_arch() {
        let node = NodeConstraint::parse("manyvariants@2.0.1~a+b c=v3 d=v2 platform=darwin").unwrap();
        assert_eq!(node.name.as_deref(), Some("manyvariants"));
        assert_eq!(node.variants.len(), 4);
        assert_eq!(node.platform.as_deref(), Some("darwin"));
        assert_eq!(node.target, None);
    }

    #[test]
    fn parses_edge_attributes() {
        let spec =
            AbstractSpec::parse("depends-on-virtual-with-abi ^[virtuals=virtual-with-abi deptypes=link] virtual-abi-1")
                .unwrap();
        let dep = &spec.dependencies()[0];
        assert!(dep.virtuals.contains("virtual-with-abi"));
        assert_eq!(dep.deptypes, Some(DepTypes::LINK));
        assert_eq!(dep.name(), "virtual-abi-1");
    }

    #[test]
    fn anonymous_constraints_parse_for_rules() {
        let when = NodeConstraint::parse("@1.0.0+compat").unwrap();
        assert_eq!(when.name, None);
        let mut identity = NodeIdentity::new("splice-z", Version::parse("1.0.0").unwrap());
        identity.variants.insert("compat".into(), VariantValue::Bool(true));
        assert!(when.matches(&identity));
        identity.variants.insert("compat".into(), VariantValue::Bool(false));
        assert!(!when.matches(&identity));
    }

    #[test]
    fn namespace_prefix_is_split() {
        let node = NodeConstraint::parse("builtin.splice-z@1.0").unwrap();
        assert_eq!(node.namespace.as_deref(), Some("builtin"));
        assert_eq!(node.name.as_deref(), Some("splice-z"));
    }

    #[test]
    fn contradictions_are_invalid_constraints() {
        for text in ["splice-z+compat~compat", "m c=v1 c=v2", "splice-z@1.0@1.1", "z platform=a platform=b"] {
            match AbstractSpec::parse(text) {
                Err(RequestError::Invalid(err)) => assert!(!err.message.is_empty()),
                other => panic!("expected invalid constraint for `{text}`, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_text_is_a_parse_error() {
        for text in ["splice-z ^", "splice-z ^[color=red] h", "splice-z %gcc", "a b"] {
            match AbstractSpec::parse(text) {
                Err(RequestError::Parse(err)) => assert_eq!(err.input, text),
                other => panic!("expected parse error for `{text}`, got {other:?}"),
            }
        }
        assert!(matches!(
            AbstractSpec::parse("+compat"),
            Err(RequestError::Invalid(_))
        ));
    }

    #[test]
    fn display_round_trips() {
        for text in [
            "splice-h@1:1.0.2+compat ^splice-z@=1.0.2",
            "manyvariants@2.0.1~a+b c=v3 d=v2",
            "d ^[virtuals=virtual-with-abi] virtual-abi-multi abi=one",
        ] {
            let spec = AbstractSpec::parse(text).unwrap();
            assert_eq!(AbstractSpec::parse(&spec.to_string()).unwrap(), spec);
        }
    }

    #[test]
    fn exact_constraint_matches_only_its_identity() {
        let identity = NodeIdentity::new("splice-z", Version::parse("1.0.1").unwrap());
        let exact = NodeConstraint::exact(&identity);
        assert!(exact.matches(&identity));
        let other = NodeIdentity::new("splice-z", Version::parse("1.0.10").unwrap());
        assert!(!exact.matches(&other));
    }
}
