// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Table and JSON views of a resolution.

use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::{json, Value};
use splicer_core::{DepTypes, Resolution, SpecNode};

fn origin(node: &SpecNode, resolution: &Resolution) -> &'static str {
    if node.external().is_some() {
        "external"
    } else if node.is_spliced() {
        "spliced"
    } else if resolution.reused.contains(&node.hash()) {
        "reused"
    } else {
        "build"
    }
}

pub fn resolution_text(resolution: &Resolution) -> String {
    let spec = &resolution.spec;
    let mut out = format!("{}\n{}\n", spec.hash(), spec.tree());

    let mut nodes = Table::new();
    nodes
        .load_preset(UTF8_FULL)
        .set_header(vec!["Package", "Version", "Hash", "Origin"]);
    for node in spec.traverse(DepTypes::ALL) {
        nodes.add_row(vec![
            node.name().to_string(),
            node.version().to_string(),
            node.hash().short(),
            origin(&node, resolution).to_string(),
        ]);
    }
    out.push_str(&nodes.to_string());
    out.push('\n');

    if !resolution.splices.is_empty() {
        let mut sites = Table::new();
        sites
            .load_preset(UTF8_FULL)
            .set_header(vec!["Consumer", "Original", "Replacement", "Selector", "State"]);
        for site in resolution.splices.sites() {
            sites.add_row(vec![
                site.consumer.clone(),
                site.original.clone(),
                site.replacement.clone(),
                site.selector.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
                site.state.to_string(),
            ]);
        }
        out.push_str(&sites.to_string());
        out.push('\n');
    }
    out
}

pub fn resolution_json(resolution: &Resolution) -> Value {
    let spec = &resolution.spec;
    let nodes: Vec<Value> = spec
        .traverse(DepTypes::ALL)
        .iter()
        .map(|node| {
            json!({
                "name": node.name(),
                "version": node.version().to_string(),
                "hash": node.hash().to_hex(),
                "origin": origin(node, resolution),
                "build_spec": node.build_spec().map(|b| b.hash().to_hex()),
                "external": node.external(),
            })
        })
        .collect();
    let splices: Vec<Value> = resolution
        .splices
        .sites()
        .iter()
        .map(|site| {
            json!({
                "consumer": site.consumer,
                "original": site.original,
                "replacement": site.replacement,
                "selector": site.selector.as_ref().map(ToString::to_string),
                "state": site.state.to_string(),
            })
        })
        .collect();
    json!({
        "spec": spec.to_string(),
        "hash": spec.hash().to_hex(),
        "spliced": resolution.is_spliced(),
        "nodes": nodes,
        "splices": splices,
    })
}
