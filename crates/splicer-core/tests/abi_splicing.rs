// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use splicer_core::{AbstractSpec, ConcreteSpec, ConcretizeError, DepTypes, SiteState};
use splicer_dry_tests::SpliceHarness;

fn harness(installed: &[&str]) -> SpliceHarness {
    let mut harness = SpliceHarness::new().unwrap();
    harness.install_all(installed).unwrap();
    harness
}

fn request(text: &str) -> AbstractSpec {
    AbstractSpec::parse(text).unwrap()
}

fn build_edges(spec: &ConcreteSpec) -> usize {
    spec.root().dependencies(DepTypes::BUILD).count()
}

fn assert_unsatisfiable(harness: &SpliceHarness, goal: &str) {
    let err = harness.concretize(goal).unwrap_err();
    assert!(err.is_unsatisfiable(), "{goal}: {err}");
}

#[test]
fn non_buildable_package_is_reused() {
    let mut h = harness(&["splice-z@1.0.0+compat"]);
    h.non_buildable(&["splice-z"]);
    let resolution = h.concretize("splice-z").unwrap();
    assert!(resolution.spec.satisfies(&request("splice-z")));
    assert_eq!(resolution.spec.root().version().as_str(), "1.0.0");
    assert!(resolution.reused.contains(&resolution.spec.hash()));
}

#[test]
fn non_buildable_dependency_is_reused() {
    let mut h = harness(&["splice-z@1.0.0+compat"]);
    h.non_buildable(&["splice-z"]);
    let resolution = h.concretize("splice-h@1").unwrap();
    assert!(resolution.spec.satisfies(&request("splice-h@1")));
    let z = resolution.spec.node_named("splice-z").unwrap();
    assert_eq!(z.version().as_str(), "1.0.0");
    assert!(!resolution.is_spliced());
}

#[test]
fn newer_leaf_is_spliced_under_frozen_consumer() {
    let mut h = harness(&["splice-h@1.0.0+compat ^splice-z@1.0.0", "splice-z@1.0.2"]);
    h.non_buildable(&["splice-h", "splice-z"]);
    let goal = "splice-h@1 ^splice-z@1.0.2";
    assert_unsatisfiable(&h, goal);

    h.enable_splicing();
    let resolution = h.concretize(goal).unwrap();
    assert!(resolution.spec.satisfies(&request(goal)));
    assert_eq!(resolution.splices.spliced(), 1);
    let site = &resolution.splices.sites()[0];
    assert_eq!(site.consumer, "splice-h");
    assert_eq!(site.state, SiteState::Spliced);

    let root = resolution.spec.root();
    let build_spec = root.build_spec().unwrap();
    assert_eq!(build_spec.version().as_str(), "1.0.0");
    assert_eq!(
        build_spec.edge_to("splice-z").unwrap().child().version().as_str(),
        "1.0.0"
    );
    assert_eq!(build_edges(&resolution.spec), 0);
    resolution.spec.verify().unwrap();
}

#[test]
fn installed_replacement_is_spliced_by_hash() {
    let mut h = harness(&[
        "splice-t@1 ^splice-h@1.0.0+compat ^splice-z@1.0.0",
        "splice-h@1.0.2+compat ^splice-z@1.0.0",
    ]);
    h.non_buildable(&["splice-t", "splice-h"]);
    let goal = "splice-t@1 ^splice-h@1.0.2+compat ^splice-z@1.0.0";
    assert_unsatisfiable(&h, goal);

    h.enable_splicing();
    let resolution = h.concretize(goal).unwrap();
    assert!(resolution.spec.satisfies(&request(goal)));
    let installed_h = h
        .snapshot()
        .specs()
        .iter()
        .find(|s| s.name() == "splice-h")
        .map(|s| s.hash())
        .unwrap();
    let spliced_h = resolution.spec.node_named("splice-h").unwrap();
    assert_eq!(spliced_h.hash(), installed_h);
    assert!(resolution.reused.contains(&installed_h));
}

#[test]
fn freshly_built_replacement_is_spliced() {
    let mut h = harness(&["splice-t@1 ^splice-h@1.0.0+compat ^splice-z@1.0.0+compat"]);
    h.non_buildable(&["splice-t"]);
    let goal = "splice-t@1 ^splice-h@1.0.2+compat ^splice-z@1.0.0+compat";
    assert_unsatisfiable(&h, goal);

    h.enable_splicing();
    let resolution = h.concretize(goal).unwrap();
    assert!(resolution.spec.satisfies(&request(goal)));
    let fresh_h = resolution.spec.node_named("splice-h").unwrap();
    assert!(!resolution.reused.contains(&fresh_h.hash()));
    assert!(fresh_h.build_spec().is_none());
    assert!(resolution.spec.root().is_spliced());
}

#[test]
fn two_sites_compose_into_one_rewrite() {
    let mut h = harness(&[
        "splice-t@1 ^splice-h@1.0.0+compat ^splice-z@1.0.0+compat",
        "splice-h@1.0.2+compat ^splice-z@1.0.1+compat",
        "splice-z@1.0.2+compat",
    ]);
    h.non_buildable(&["splice-t", "splice-h", "splice-z"]);
    let goal = "splice-t@1 ^splice-h@1.0.2+compat ^splice-z@1.0.2+compat";
    assert_unsatisfiable(&h, goal);

    h.enable_splicing();
    let resolution = h.concretize(goal).unwrap();
    let spec = &resolution.spec;
    assert!(spec.satisfies(&request(goal)));
    assert_eq!(resolution.splices.spliced(), 3);

    // Exactly one splice-z survives, shared by both consumers.
    let zs: Vec<_> = spec
        .traverse(DepTypes::ALL)
        .into_iter()
        .filter(|n| n.name() == "splice-z")
        .collect();
    assert_eq!(zs.len(), 1);
    assert_eq!(zs[0].version().as_str(), "1.0.2");

    let h_node = spec.node_named("splice-h").unwrap();
    assert!(h_node.is_spliced());
    assert_eq!(h_node.build_spec().unwrap().version().as_str(), "1.0.2");
    assert_eq!(h_node.dependencies(DepTypes::BUILD).count(), 0);
    spec.verify().unwrap();
}

#[test]
fn multi_abi_provider_splices_in() {
    let mut h = harness(&[
        "depends-on-virtual-with-abi ^virtual-abi-1",
        "depends-on-virtual-with-abi ^virtual-abi-2",
    ]);
    h.non_buildable(&["depends-on-virtual-with-abi"]);
    let goals = [
        "depends-on-virtual-with-abi ^virtual-abi-multi abi=one",
        "depends-on-virtual-with-abi ^virtual-abi-multi abi=two",
    ];
    for goal in goals {
        assert_unsatisfiable(&h, goal);
    }

    h.enable_splicing();
    let mut roots = Vec::new();
    for goal in goals {
        let resolution = h.concretize(goal).unwrap();
        assert!(resolution.spec.satisfies(&request(goal)), "{goal}");
        let edge = resolution.spec.root().edge_to("virtual-with-abi").unwrap();
        assert_eq!(edge.child().name(), "virtual-abi-multi");
        let original = resolution.spec.root().build_spec().unwrap();
        let original_provider = original.edge_to("virtual-with-abi").unwrap().child().name().to_string();
        roots.push((resolution.spec.hash(), original_provider));
    }
    // Each goal spliced a different install; providers were never unified.
    assert_ne!(roots[0].0, roots[1].0);
    assert_eq!(roots[0].1, "virtual-abi-1");
    assert_eq!(roots[1].1, "virtual-abi-2");
}

#[test]
fn multi_abi_provider_splices_out() {
    let mut h = harness(&[
        "depends-on-virtual-with-abi ^virtual-abi-multi abi=one",
        "depends-on-virtual-with-abi ^virtual-abi-multi abi=two",
    ]);
    h.non_buildable(&["depends-on-virtual-with-abi"]);
    let goals = [
        "depends-on-virtual-with-abi ^virtual-abi-1",
        "depends-on-virtual-with-abi ^virtual-abi-2",
    ];
    for goal in goals {
        assert_unsatisfiable(&h, goal);
    }

    h.enable_splicing();
    for goal in goals {
        let resolution = h.concretize(goal).unwrap();
        assert!(resolution.spec.satisfies(&request(goal)), "{goal}");
        assert!(resolution.is_spliced());
    }
}

#[test]
fn frozen_consumers_keep_their_own_providers() {
    let mut h = harness(&[
        "depends-on-virtual-with-abi ^virtual-abi-1",
        "also-depends-on-virtual-with-abi ^virtual-abi-2",
    ]);
    h.non_buildable(&["depends-on-virtual-with-abi", "also-depends-on-virtual-with-abi"]);
    let provider_of = |spec: &ConcreteSpec, consumer: &str| {
        let node = spec.node_named(consumer).unwrap();
        node.edge_to("virtual-with-abi").unwrap().child().name().to_string()
    };

    for splicing in [false, true] {
        if splicing {
            h.enable_splicing();
        }
        let resolution = h.concretize("depends-on-abi-consumers").unwrap();
        let spec = &resolution.spec;
        assert_eq!(provider_of(spec, "depends-on-virtual-with-abi"), "virtual-abi-1");
        assert_eq!(provider_of(spec, "also-depends-on-virtual-with-abi"), "virtual-abi-2");
        assert!(!resolution.is_spliced());
        assert_eq!(resolution.reused.len(), 4);
    }
}

#[test]
fn star_selector_requires_every_variant_to_agree() {
    let mut h = harness(&[
        "depends-on-manyvariants ^manyvariants@1.0.0+a+b c=v1 d=v2",
        "depends-on-manyvariants ^manyvariants@1.0.0~a~b c=v3 d=v3",
    ]);
    h.non_buildable(&["depends-on-manyvariants"]);
    let goals = [
        "depends-on-manyvariants ^manyvariants@1.0.1+a+b c=v1 d=v2",
        "depends-on-manyvariants ^manyvariants@1.0.1~a~b c=v3 d=v3",
    ];
    for goal in goals {
        assert_unsatisfiable(&h, goal);
    }
    h.enable_splicing();
    for goal in goals {
        let resolution = h.concretize(goal).unwrap();
        assert!(resolution.spec.satisfies(&request(goal)), "{goal}");
    }
    // Same version bump, but no install has these variants.
    assert_unsatisfiable(&h, "depends-on-manyvariants ^manyvariants@1.0.1+a~b c=v1 d=v2");
}

#[test]
fn explicit_selector_ignores_unlisted_variants() {
    let mut h = harness(&[
        "depends-on-manyvariants@2.0 ^manyvariants@2.0.0+a~b c=v3 d=v2",
        "depends-on-manyvariants@2.0 ^manyvariants@2.0.0~a~b c=v1 d=v1",
    ]);
    h.non_buildable(&["depends-on-manyvariants"]);
    let goals = [
        // `a` and `b` flip; `c` and `d` must agree.
        "depends-on-manyvariants@2.0 ^manyvariants@2.0.1~a+b c=v3 d=v2",
        // Rule without a selector: nothing has to agree.
        "depends-on-manyvariants@2.0 ^manyvariants@2.0.1+a+b c=v3 d=v3",
    ];
    for goal in goals {
        assert_unsatisfiable(&h, goal);
    }
    h.enable_splicing();
    for goal in goals {
        let resolution = h.concretize(goal).unwrap();
        assert!(resolution.spec.satisfies(&request(goal)), "{goal}");
    }
    // `c` differs from the +a~b install, and the c=v1 d=v1 rule wants +a+b.
    assert_unsatisfiable(&h, "depends-on-manyvariants@2.0 ^manyvariants@2.0.1~a+b c=v1 d=v2");
}

#[test]
fn external_with_same_name_satisfies_goals() {
    let mut h = harness(&[
        "splice-h@1.0.0 ^splice-z@1.0.0+compat",
        "splice-t@1.0 ^splice-h@1.0.1 ^splice-z@1.0.1+compat",
    ]);
    h.with_external("splice-z", "splice-z@1.0.2+compat", "/usr");
    h.enable_splicing();
    for goal in ["splice-h@1.0.0 ^splice-z@1.0.2", "splice-t@1.0 ^splice-h@1.0.1 ^splice-z@1.0.2"] {
        let resolution = h.concretize(goal).unwrap();
        assert!(resolution.spec.satisfies(&request(goal)), "{goal}");
        let z = resolution.spec.node_named("splice-z").unwrap();
        assert_eq!(z.external(), Some("/usr"));
    }
}

#[test]
fn external_is_spliced_under_frozen_consumers() {
    let mut h = harness(&["splice-t@1.0 ^splice-h@1.0.1 ^splice-z@1.0.1+compat"]);
    h.with_external("splice-z", "splice-z@1.0.2+compat", "/usr");
    h.non_buildable(&["splice-t", "splice-h"]);
    h.enable_splicing();
    let goal = "splice-t@1.0 ^splice-h@1.0.1 ^splice-z@1.0.2";
    let resolution = h.concretize(goal).unwrap();
    assert!(resolution.spec.satisfies(&request(goal)));
    assert_eq!(resolution.splices.spliced(), 2);
    let h_node = resolution.spec.node_named("splice-h").unwrap();
    assert!(h_node.is_spliced());
    assert_eq!(
        h_node.edge_to("splice-z").unwrap().child().external(),
        Some("/usr")
    );
}

#[test]
fn build_dependencies_survive_only_in_build_spec() {
    let mut h = harness(&["splice-t@1.0 ^splice-h@1.0.1 ^splice-z@1.0.0"]);
    // A buildable splice-t is rebuilt rather than spliced.
    h.non_buildable(&["splice-t"]);
    h.enable_splicing();
    let spliced = h.concretize("splice-t@1.0 ^splice-h@1.0.2 ^splice-z@1.0.0").unwrap().spec;

    let build_spec = spliced.build_spec().unwrap();
    let built_against: Vec<&str> = build_spec
        .root()
        .dependencies(DepTypes::BUILD)
        .map(|e| e.child().name())
        .collect();
    assert_eq!(built_against, ["splice-h", "splice-z"]);
    assert_eq!(build_edges(&spliced), 0);
    assert_eq!(spliced.root().dependencies(DepTypes::LINK).count(), 2);
}

#[test]
fn buildable_consumer_is_rebuilt_instead_of_spliced() {
    let mut h = harness(&["splice-t@1.0 ^splice-h@1.0.1 ^splice-z@1.0.0"]);
    h.enable_splicing();
    let goal = "splice-t@1.0 ^splice-h@1.0.2 ^splice-z@1.0.0";
    let resolution = h.concretize(goal).unwrap();
    assert!(resolution.spec.satisfies(&request(goal)));
    assert!(!resolution.is_spliced());
    assert!(resolution.spec.build_spec().is_none());
    assert!(!resolution.reused.contains(&resolution.spec.hash()));
    assert_eq!(build_edges(&resolution.spec), 2);
}

#[test]
fn transitive_splice_marks_every_rewritten_ancestor() {
    let mut h = harness(&["splice-depends-on-t@1.0 ^splice-h@1.0.1"]);
    h.non_buildable(&["splice-depends-on-t"]);
    h.enable_splicing();
    let goal = "splice-depends-on-t ^splice-h@1.0.2";
    let resolution = h.concretize(goal).unwrap();
    let spec = &resolution.spec;
    assert!(spec.satisfies(&request(goal)));
    assert!(spec.root().build_spec().is_some());
    let t = spec.node_named("splice-t").unwrap();
    assert!(t.build_spec().is_some());
    assert_eq!(build_edges(spec), 0);
    assert_eq!(t.dependencies(DepTypes::BUILD).count(), 0);
    // The leaf was off the rewritten path and keeps its installed hash.
    let z = spec.node_named("splice-z").unwrap();
    assert!(resolution.reused.contains(&z.hash()));
}

#[test]
fn exact_reuse_is_preferred_over_splicing() {
    let mut h = harness(&["splice-h@1.0.0+compat ^splice-z@1.0.0", "splice-h@1.0.0+compat ^splice-z@1.0.2"]);
    h.non_buildable(&["splice-h", "splice-z"]);
    h.enable_splicing();
    let resolution = h.concretize("splice-h@1.0.0 ^splice-z@1.0.2").unwrap();
    assert!(!resolution.is_spliced());
    assert!(resolution.splices.is_empty());
    assert!(resolution.reused.contains(&resolution.spec.hash()));
}

#[test]
fn ineligible_replacement_stays_unsatisfiable() {
    let mut h = harness(&["splice-h@1.0.0~compat ^splice-z@1.0.0~compat", "splice-z@1.0.2"]);
    h.non_buildable(&["splice-h", "splice-z"]);
    h.enable_splicing();
    let err = h.concretize("splice-h@1 ^splice-z@1.0.2").unwrap_err();
    assert!(err.is_unsatisfiable());
    assert!(matches!(err, ConcretizeError::Unsatisfiable(_)));
}

#[test]
fn second_resolution_is_idempotent() {
    let mut h = harness(&["splice-h@1.0.0+compat ^splice-z@1.0.0", "splice-z@1.0.2"]);
    h.non_buildable(&["splice-h", "splice-z"]);
    h.enable_splicing();
    let goal = "splice-h@1 ^splice-z@1.0.2";
    let first = h.concretize(goal).unwrap();
    let second = h.concretize(goal).unwrap();
    assert_eq!(first.spec.hash(), second.spec.hash());
    assert!(first.spec.satisfies_concrete(&second.spec));
}
