use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::story::{Node, NodeId, Progression, StoryGraph};

const PREVIEW_CHARS: usize = 40;

/// Render the graph as a Mermaid flowchart for inspection.
///
/// Nodes are styled by progression, endings get a double border, nodes in
/// `visited` are highlighted and backtrack edges are dotted.
pub fn to_mermaid(graph: &StoryGraph, visited: &[NodeId]) -> String {
    let visited: HashSet<&NodeId> = visited.iter().collect();
    let aliases: HashMap<&NodeId, String> = graph
        .nodes()
        .enumerate()
        .map(|(i, node)| (&node.id, format!("n{i}")))
        .collect();

    let mut out = String::from("flowchart TD\n");
    for node in graph.nodes() {
        let alias = &aliases[&node.id];
        let text = label(node);
        if node.is_terminal {
            let _ = writeln!(out, "    {alias}((\"{text}\"))");
        } else {
            let _ = writeln!(out, "    {alias}[\"{text}\"]");
        }
        let _ = writeln!(out, "    class {alias} {}", class_for(node));
        if visited.contains(&node.id) {
            let _ = writeln!(out, "    class {alias} visited");
        }
    }

    for edge in graph.edges() {
        let (Some(from), Some(to)) = (aliases.get(&edge.from), aliases.get(&edge.to)) else {
            continue;
        };
        let arrow = if edge.backtrack { "-.->" } else { "-->" };
        let _ = writeln!(out, "    {from} {arrow} {to}");
    }

    out.push_str("    classDef beginning fill:#dff3e4\n");
    out.push_str("    classDef middle fill:#fdf1c7\n");
    out.push_str("    classDef late fill:#fbd9c4\n");
    out.push_str("    classDef conclusion fill:#f4c2c2\n");
    out.push_str("    classDef unknown fill:#e0e0e0\n");
    out.push_str("    classDef visited stroke:#32cd32,stroke-width:3px\n");
    out
}

fn class_for(node: &Node) -> &'static str {
    match Progression::from_label(&node.narrative_path_label) {
        Some(Progression::Beginning) => "beginning",
        Some(Progression::Middle) => "middle",
        Some(Progression::Late) => "late",
        Some(Progression::Conclusion) => "conclusion",
        None => "unknown",
    }
}

fn label(node: &Node) -> String {
    let mut preview: String = node.story.chars().take(PREVIEW_CHARS).collect();
    if node.story.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    let preview = preview.replace('"', "'");
    if node.is_terminal {
        format!("{preview}<br/>[{}]", node.ending_kind.or_neutral().label())
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::EndingKind;

    #[test]
    fn test_mermaid_shapes_and_edges() {
        let root = Node::new("The \"first\" scene").with_label("The Ordinary World - Beginning");
        let a = Node::new("A long corridor that goes on and on and on and on forever")
            .with_label("The Ordeal - Late");
        let b = Node::new("Home.").terminal(EndingKind::Victory);
        let ids = [root.id.clone(), a.id.clone(), b.id.clone()];
        let mut graph = StoryGraph::new(root);
        graph.add_node(a);
        graph.add_node(b);
        graph.add_edge_with(&ids[0], &ids[1], true).unwrap();
        graph.add_edge(&ids[0], &ids[2]).unwrap();

        let chart = to_mermaid(&graph, &ids[..1]);
        assert!(chart.starts_with("flowchart TD\n"));
        assert!(chart.contains("n0[\"The 'first' scene\"]"));
        assert!(chart.contains("class n0 beginning"));
        assert!(chart.contains("class n0 visited"));
        assert!(chart.contains("class n1 late"));
        assert!(chart.contains("goes on and on and ...\""));
        assert!(chart.contains("n2((\"Home.<br/>[victory]\"))"));
        assert!(chart.contains("class n2 unknown"));
        assert!(chart.contains("n0 -.-> n1"));
        assert!(chart.contains("n0 --> n2"));
    }
}
