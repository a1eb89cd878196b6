//! Mermaid rendering of workflow graphs
//!
//! Produces a `flowchart TD` block suitable for markdown embedding. Node
//! shapes encode the node type, conditional edges carry their expression as
//! an edge label, and an artificial `Start` bubble points at the entry node.

use crate::graph::{NodeType, Workflow, WorkflowNode};

/// Render a workflow as a Mermaid `flowchart TD` block
pub fn to_mermaid(workflow: &Workflow) -> String {
    let mut out = String::from("flowchart TD\n");

    if let Some(entry) = workflow.entry_node {
        out.push_str(&format!("    Start([Start]) --> N{entry}\n"));
    }

    for node in workflow.nodes() {
        out.push_str(&format!("    {}\n", node_decl(node)));
    }

    for node in workflow.nodes() {
        for (i, next) in node.next_nodes.iter().enumerate() {
            match (&node.condition_expr, i) {
                (Some(cond), 0) => {
                    out.push_str(&format!(
                        "    N{} -->|{}| N{}\n",
                        node.node_id,
                        escape_label(cond),
                        next
                    ));
                }
                _ => {
                    out.push_str(&format!("    N{} --> N{}\n", node.node_id, next));
                }
            }
        }
        if let Some(fallback) = node.fallback_node {
            out.push_str(&format!("    N{} -->|fallback| N{}\n", node.node_id, fallback));
        }
    }

    out
}

/// Declare one node with the shape for its type
fn node_decl(node: &WorkflowNode) -> String {
    let label = escape_label(&node.name);
    match node.node_type {
        NodeType::Action => format!("N{}[{}]", node.node_id, label),
        NodeType::Decision => format!("N{}{{{}}}", node.node_id, label),
        NodeType::HumanInput | NodeType::Parallel | NodeType::Converge => {
            format!("N{}([{}])", node.node_id, label)
        }
        NodeType::Subgraph => format!("N{}[[{}]]", node.node_id, label),
    }
}

/// Keep labels from breaking Mermaid syntax
fn escape_label(label: &str) -> String {
    label
        .replace('"', "'")
        .replace('[', "(")
        .replace(']', ")")
        .replace('{', "(")
        .replace('}', ")")
        .replace('|', "/")
}
