use idgraph_schemas::Node;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

const MAX_EXAMPLES: usize = 3;

/// Identifier shape summary for one declared node type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeSummary {
    pub count: usize,
    pub examples: Vec<String>,
    pub categories: BTreeSet<String>,
}

/// Summary of the identifiers currently in the store, grouped by `node_type`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternSummary {
    pub total_nodes: usize,
    pub by_type: BTreeMap<String, TypeSummary>,
}

/// Group nodes by declared type and record counts, examples and categories
pub fn analyze(nodes: &[Node]) -> PatternSummary {
    let mut summary = PatternSummary {
        total_nodes: nodes.len(),
        ..Default::default()
    };

    for node in nodes {
        let entry = summary
            .by_type
            .entry(node.type_label().to_string())
            .or_default();
        entry.count += 1;
        if entry.examples.len() < MAX_EXAMPLES {
            entry.examples.push(node.old_key().to_string());
        }
        if let Some(category) = node.category() {
            entry.categories.insert(category.to_string());
        }
    }

    info!(
        "Analyzed {} nodes across {} types",
        summary.total_nodes,
        summary.by_type.len()
    );
    summary
}

impl PatternSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for PatternSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Total nodes: {}", self.total_nodes)?;
        for (node_type, summary) in &self.by_type {
            writeln!(f, "  {} ({} nodes)", node_type, summary.count)?;
            writeln!(f, "    examples:   {}", summary.examples.join(", "))?;
            if !summary.categories.is_empty() {
                let categories: Vec<&str> = summary.categories.iter().map(String::as_str).collect();
                writeln!(f, "    categories: {}", categories.join(", "))?;
            }
        }
        Ok(())
    }
}
