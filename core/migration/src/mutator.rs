use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::database::{dangling_predicate, load_edges_with, Database, NODE_ID_EXPR};
use crate::error::{MigrationError, Result, Stage};
use crate::mapping::TransformationMap;

/// Rows touched by one mutation transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationStats {
    pub dangling_removed: usize,
    pub nodes_updated: usize,
    pub edges_updated: usize,
}

impl MutationStats {
    pub fn total_writes(&self) -> usize {
        self.dangling_removed + self.nodes_updated + self.edges_updated
    }
}

/// Apply a transformation map: dangling cleanup, node rewrite, edge rewrite.
/// All three stages share one transaction; any failure rolls back everything.
pub fn apply(db: &mut Database, map: &TransformationMap) -> Result<MutationStats> {
    let tx = db.transaction(Stage::Cleanup)?;

    // Cleanup first: an edge pointing at a node that does not exist cannot be
    // repaired by renaming
    let dangling_removed = delete_dangling_edges(&tx)?;
    let nodes_updated = rewrite_nodes(&tx, map)?;
    let edges_updated = rewrite_edges(&tx, map)?;

    tx.commit()
        .map_err(MigrationError::transaction(Stage::EdgeRewrite, None))?;

    let stats = MutationStats {
        dangling_removed,
        nodes_updated,
        edges_updated,
    };
    info!(
        "Mutation committed: {} dangling edges removed, {} nodes updated, {} edges updated",
        stats.dangling_removed, stats.nodes_updated, stats.edges_updated
    );
    Ok(stats)
}

/// Remove dangling edges on their own, without renaming anything
pub fn cleanup_dangling_edges(db: &mut Database) -> Result<usize> {
    let tx = db.transaction(Stage::Cleanup)?;
    let removed = delete_dangling_edges(&tx)?;
    tx.commit()
        .map_err(MigrationError::transaction(Stage::Cleanup, None))?;

    info!("Removed {} dangling edges", removed);
    Ok(removed)
}

fn delete_dangling_edges(conn: &Connection) -> Result<usize> {
    let removed = conn
        .execute(
            &format!("DELETE FROM edges WHERE {}", dangling_predicate()),
            [],
        )
        .map_err(MigrationError::transaction(Stage::Cleanup, None))?;

    debug!("Dangling cleanup deleted {} edges", removed);
    Ok(removed)
}

fn rewrite_nodes(conn: &Connection, map: &TransformationMap) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "UPDATE nodes SET body = json_set(body, '$.id', ?1)
             WHERE rowid = ?2 AND {} IS ?3",
            NODE_ID_EXPR
        ))
        .map_err(MigrationError::transaction(Stage::NodeRewrite, None))?;

    let mut updated = 0;
    for record in map.changed_records() {
        let old = record.old_id.as_deref();
        let rows = stmt
            .execute(params![record.new_id, record.row_id, old])
            .map_err(MigrationError::transaction(Stage::NodeRewrite, old))?;

        if rows == 0 {
            // Row no longer holds the identifier the map was built from
            debug!(
                "Node row {} no longer holds '{}', skipped",
                record.row_id,
                old.unwrap_or("null")
            );
        }
        updated += rows;
    }

    debug!("Rewrote {} node identifiers", updated);
    Ok(updated)
}

fn rewrite_edges(conn: &Connection, map: &TransformationMap) -> Result<usize> {
    let edges = load_edges_with(conn, Stage::EdgeRewrite)?;

    let mut stmt = conn
        .prepare_cached(
            "UPDATE edges SET source = ?1, target = ?2
             WHERE rowid = ?3 AND source = ?4 AND target = ?5",
        )
        .map_err(MigrationError::transaction(Stage::EdgeRewrite, None))?;

    let mut updated = 0;
    for edge in &edges {
        let source = map.resolve(&edge.source);
        let target = map.resolve(&edge.target);
        if source == edge.source && target == edge.target {
            continue;
        }

        let label = format!("edge {}: {} -> {}", edge.row_id, edge.source, edge.target);
        updated += stmt
            .execute(params![source, target, edge.row_id, edge.source, edge.target])
            .map_err(MigrationError::transaction(Stage::EdgeRewrite, Some(&label)))?;
    }

    debug!("Rewrote {} edges", updated);
    Ok(updated)
}
