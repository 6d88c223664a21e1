use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::database::Database;
use crate::error::{MigrationError, Result};

/// Result of copying the store aside before mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
    pub node_count: usize,
    pub edge_count: usize,
}

/// `<store>.backup-<UTC timestamp>` next to the store file
pub fn default_backup_path(store: &Path) -> PathBuf {
    let mut name = store
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "graph.db".into());
    name.push(format!(".backup-{}", Utc::now().format("%Y%m%d-%H%M%S")));
    store.with_file_name(name)
}

/// Copy the store file and check that the copy holds the same rows
pub fn backup_store(db: &Database, destination: &Path) -> Result<BackupReport> {
    let source = db.path().to_path_buf();

    if destination.exists() {
        return Err(MigrationError::Backup {
            path: destination.to_path_buf(),
            reason: "destination already exists".to_string(),
        });
    }

    info!("Creating backup at {}", destination.display());
    let bytes = std::fs::copy(&source, destination).map_err(|source_err| MigrationError::Io {
        path: destination.to_path_buf(),
        source: source_err,
    })?;

    let node_count = db.count_nodes()?;
    let edge_count = db.count_edges()?;

    let copy = Database::open_existing(destination)?;
    let copied_nodes = copy.count_nodes()?;
    let copied_edges = copy.count_edges()?;

    if copied_nodes != node_count || copied_edges != edge_count {
        return Err(MigrationError::Backup {
            path: destination.to_path_buf(),
            reason: format!(
                "row counts differ: source {} nodes / {} edges, copy {} nodes / {} edges",
                node_count, edge_count, copied_nodes, copied_edges
            ),
        });
    }

    info!(
        "✓ Backup verified: {} nodes, {} edges, {} bytes",
        node_count, edge_count, bytes
    );
    Ok(BackupReport {
        source,
        destination: destination.to_path_buf(),
        bytes,
        node_count,
        edge_count,
    })
}
