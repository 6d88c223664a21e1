use serde::Serialize;
use tracing::{error, info};

use crate::database::Database;
use crate::error::{MigrationError, Result};
use crate::mapper::IdMapper;

/// A node whose identifier fails every naming grammar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatViolation {
    pub row_id: i64,
    pub id: Option<String>,
    pub node_type: String,
}

/// Post-migration integrity findings. Both checks always run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub node_count: usize,
    pub edge_count: usize,
    pub dangling_edges: usize,
    pub violations: Vec<FormatViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.dangling_edges == 0 && self.violations.is_empty()
    }

    /// Referential closure is checked first, then grammar conformance
    pub fn into_result(self) -> Result<IntegrityReport> {
        if self.dangling_edges > 0 {
            return Err(MigrationError::ReferentialIntegrity {
                dangling: self.dangling_edges,
            });
        }
        if !self.violations.is_empty() {
            return Err(MigrationError::FormatCompliance {
                count: self.violations.len(),
            });
        }
        Ok(self)
    }
}

/// Read-only integrity check of the whole store
pub fn inspect(db: &Database, mapper: &IdMapper) -> Result<IntegrityReport> {
    let dangling_edges = db.count_dangling_edges()?;
    if dangling_edges > 0 {
        error!("{} dangling edges found", dangling_edges);
    }

    let nodes = db.load_nodes()?;
    let violations: Vec<FormatViolation> = nodes
        .iter()
        .filter(|node| {
            node.raw_id
                .as_deref()
                .map(|id| !mapper.validate_new_id(id))
                .unwrap_or(true)
        })
        .map(|node| FormatViolation {
            row_id: node.row_id,
            id: node.raw_id.clone(),
            node_type: node.type_label().to_string(),
        })
        .collect();

    for violation in &violations {
        error!(
            "Non-conforming identifier '{}' ({}) at node row {}",
            violation.id.as_deref().unwrap_or("<missing>"),
            violation.node_type,
            violation.row_id
        );
    }

    let report = IntegrityReport {
        node_count: nodes.len(),
        edge_count: db.count_edges()?,
        dangling_edges,
        violations,
    };

    if report.is_clean() {
        info!(
            "Integrity verified: {} nodes, {} edges, zero dangling, all identifiers conform",
            report.node_count, report.edge_count
        );
    }
    Ok(report)
}

/// Inspect, then fail on the first class of violation found
pub fn verify(db: &Database, mapper: &IdMapper) -> Result<IntegrityReport> {
    inspect(db, mapper)?.into_result()
}
