// dot.rs — Graphviz DOT output for the element dependency graph
//
// Renders the sorted element list of an assembled program, one cluster per
// domain, with an edge from every element to each of its dependents.
//
// Preconditions: `elements` were produced by `ElementGraph::sort` on `graph`.
// Postconditions: returns a valid DOT string; node ids follow list order.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::HashMap;
use std::fmt::Write;

use indexmap::IndexMap;

use crate::graph::{Element, ElementGraph, ElementId, ElementKind, InstanceKind};

/// Emit the element graph as a Graphviz DOT string. Elements without a
/// domain are drawn in the `platform` cluster.
pub fn emit_dot(graph: &ElementGraph, elements: &[ElementId], platform: &str) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph dlc {{");
    let _ = writeln!(buf, "    rankdir=LR;");
    let _ = writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];");

    let ids: HashMap<ElementId, usize> = elements
        .iter()
        .enumerate()
        .map(|(i, &id)| (graph.resolve(id), i))
        .collect();

    let mut clusters: IndexMap<String, Vec<(usize, &Element)>> = IndexMap::new();
    for (i, &id) in elements.iter().enumerate() {
        let el = graph.get(id);
        let domain = el.domain.clone().unwrap_or_else(|| platform.to_string());
        clusters.entry(domain).or_default().push((i, el));
    }

    for (domain, members) in &clusters {
        let _ = writeln!(buf);
        let _ = writeln!(buf, "    subgraph cluster_{} {{", sanitize(domain));
        let _ = writeln!(buf, "        label=\"domain: {}\";", domain);
        let _ = writeln!(buf, "        style=rounded;");
        let _ = writeln!(buf, "        color=gray50;");
        for (i, el) in members {
            let _ = writeln!(
                buf,
                "        e{} [label=\"{}\\n{}\", {}];",
                i,
                el.name.replace('"', "\\\""),
                el.kind_label(),
                node_attrs(el)
            );
        }
        let _ = writeln!(buf, "    }}");
    }

    let mut edges = Vec::new();
    for (i, &id) in elements.iter().enumerate() {
        for dep in graph.dependents(id) {
            if let Some(&j) = ids.get(&dep) {
                edges.push((i, j));
            }
        }
    }
    if !edges.is_empty() {
        let _ = writeln!(buf);
        for (i, j) in edges {
            let _ = writeln!(buf, "    e{} -> e{};", i, j);
        }
    }

    let _ = writeln!(buf, "}}");
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn node_attrs(el: &Element) -> String {
    let shape = match &el.kind {
        ElementKind::Declaration { .. } => "note",
        ElementKind::Instance(InstanceKind::Scalar { .. } | InstanceKind::Bundle { .. }) => "ellipse",
        ElementKind::Instance(InstanceKind::Module { .. } | InstanceKind::Reaction { .. }) => "component",
        ElementKind::Instance(InstanceKind::Buffer { .. }) => "cylinder",
    };
    let mut attrs = format!("shape={}", shape);
    if el.bridge {
        attrs.push_str(", color=blue");
    }
    if !el.enabled {
        attrs.push_str(", style=dotted");
    }
    attrs
}

// ── Tests ───────────────────────────────────────────────────────────────────
