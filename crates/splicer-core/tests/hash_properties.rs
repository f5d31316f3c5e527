// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use std::sync::Arc;

use proptest::prelude::*;
use splicer_core::{
    AbstractSpec, DepTypes, DependencyConstraint, DependencyEdge, NodeConstraint, NodeIdentity,
    SpecNode, VariantMap, VariantValue, Version, VersionConstraint, VersionRange,
};

fn version_text() -> impl Strategy<Value = String> {
    prop::collection::vec(0u32..20, 1..4).prop_map(|parts| {
        parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    })
}

fn package_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,5}(-[a-z0-9]{1,4})?"
}

fn variants() -> impl Strategy<Value = VariantMap> {
    prop::collection::btree_map(
        "x[a-z]{0,5}",
        prop_oneof![
            any::<bool>().prop_map(VariantValue::Bool),
            (1u8..4).prop_map(|n| VariantValue::Single(format!("v{n}"))),
        ],
        0..4,
    )
}

fn leaf(name: &str, version: &str) -> Arc<SpecNode> {
    let identity = NodeIdentity::new(name, Version::parse(version).unwrap());
    Arc::new(SpecNode::new(identity, Vec::new()))
}

fn deptypes() -> impl Strategy<Value = DepTypes> {
    prop_oneof![
        Just(DepTypes::DEFAULT),
        Just(DepTypes::BUILD),
        Just(DepTypes::LINK),
        Just(DepTypes::LINK_RUN),
    ]
}

proptest! {
    #[test]
    fn hash_ignores_edge_declaration_order(
        names in prop::collection::btree_set("[a-z]{1,6}", 1..6),
        types in prop::collection::vec(deptypes(), 6),
        seed_version in version_text(),
    ) {
        let edges: Vec<DependencyEdge> = names
            .iter()
            .zip(&types)
            .map(|(name, t)| DependencyEdge::new(leaf(name, "1.0"), *t))
            .collect();
        let mut reversed = edges.clone();
        reversed.reverse();

        let identity = NodeIdentity::new("root", Version::parse(&seed_version).unwrap());
        let a = SpecNode::new(identity.clone(), edges);
        let b = SpecNode::new(identity, reversed);
        prop_assert_eq!(a.hash(), b.hash());
        prop_assert!(a.verify_hash());
        prop_assert!(b.verify_hash());
    }

    #[test]
    fn hash_separates_identities(
        name in package_name(),
        version in version_text(),
        vars in variants(),
    ) {
        let mut identity = NodeIdentity::new(name.clone(), Version::parse(&version).unwrap());
        identity.variants = vars;
        let node = SpecNode::new(identity.clone(), Vec::new());
        prop_assert_eq!(node.hash(), SpecNode::new(identity.clone(), Vec::new()).hash());

        let mut renamed = identity.clone();
        renamed.name = format!("{name}-other");
        prop_assert_ne!(node.hash(), SpecNode::new(renamed, Vec::new()).hash());

        let with_edge = SpecNode::new(
            identity,
            vec![DependencyEdge::new(leaf("dep", "1.0"), DepTypes::DEFAULT)],
        );
        prop_assert_ne!(node.hash(), with_edge.hash());
    }

    #[test]
    fn hash_hex_round_trips(name in package_name(), version in version_text()) {
        let node = leaf(&name, &version);
        let hex = node.hash().to_hex();
        prop_assert_eq!(hex.len(), 64);
        prop_assert_eq!(splicer_core::SpecHash::from_hex(&hex), Some(node.hash()));
        prop_assert!(hex.starts_with(&node.hash().short()));
    }

    #[test]
    fn prefix_ranges_contain_their_extensions(
        base in version_text(),
        tail in prop::collection::vec(0u32..20, 0..3),
    ) {
        let base_version = Version::parse(&base).unwrap();
        let mut extended = base.clone();
        for part in &tail {
            extended.push('.');
            extended.push_str(&part.to_string());
        }
        let extended = Version::parse(&extended).unwrap();
        prop_assert!(VersionRange::prefix(base_version.clone()).contains(&extended));
        prop_assert!(base_version <= extended);
        prop_assert!(VersionConstraint::Exact(base_version.clone()).contains(&base_version));
        prop_assert_eq!(
            VersionConstraint::Exact(base_version).contains(&extended),
            tail.is_empty()
        );
    }

    #[test]
    fn version_order_is_numeric_per_segment(a in 0u32..1000, b in 0u32..1000) {
        let va = Version::parse(&format!("1.{a}")).unwrap();
        let vb = Version::parse(&format!("1.{b}")).unwrap();
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
    }

    #[test]
    fn requests_render_back_to_themselves(
        root_name in package_name(),
        root_version in proptest::option::of(version_text()),
        root_variants in variants(),
        deps in prop::collection::vec((package_name(), version_text()), 0..3),
    ) {
        let mut root = NodeConstraint::named(root_name);
        if let Some(v) = root_version {
            root.version = VersionConstraint::Ranges(vec![VersionRange::prefix(
                Version::parse(&v).unwrap(),
            )]);
        }
        root.variants = root_variants;
        let mut request = AbstractSpec::new(root);
        for (name, version) in deps {
            let mut node = NodeConstraint::named(name);
            node.version = VersionConstraint::Exact(Version::parse(&version).unwrap());
            request = request.with_dependency(DependencyConstraint::new(node));
        }

        let rendered = request.to_string();
        let reparsed = AbstractSpec::parse(&rendered).unwrap();
        prop_assert_eq!(&reparsed, &request, "{}", rendered);
        prop_assert_eq!(reparsed.to_string(), rendered);
    }
}
