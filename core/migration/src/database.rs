use idgraph_schemas::{Edge, GraphDocument, Node};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, Transaction};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{MigrationError, Result, Stage};

/// Node identifier as stored in the JSON body. Numbers are compared as text.
pub(crate) const NODE_ID_EXPR: &str = "CAST(json_extract(body, '$.id') AS TEXT)";

/// Counts of rows written by an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub nodes_inserted: usize,
    pub edges_inserted: usize,
}

/// SQLite-backed node/edge store with JSON document bodies
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open (or create) a store and make sure the graph tables exist
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|source| MigrationError::Connection {
            path: path.clone(),
            source,
        })?;

        let db = Self { conn, path };
        db.init_schema()?;

        info!("Graph store opened: {}", db.path.display());
        Ok(db)
    }

    /// Open a store that must already exist; never creates a file
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| MigrationError::Connection {
            path: path.clone(),
            source,
        })?;

        let db = Self { conn, path };
        db.init_schema()?;

        info!("Graph store opened: {}", db.path.display());
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create graph tables and indexes
    fn init_schema(&self) -> Result<()> {
        let connection_error = |source: rusqlite::Error| MigrationError::Connection {
            path: self.path.clone(),
            source,
        };

        // Nodes: one JSON document per row, identity lives in $.id
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS nodes (
                    body TEXT NOT NULL
                )",
                [],
            )
            .map_err(connection_error)?;

        // Edges: directed, typed through properties.type
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS edges (
                    source TEXT NOT NULL,
                    target TEXT NOT NULL,
                    properties TEXT NOT NULL DEFAULT '{}'
                )",
                [],
            )
            .map_err(connection_error)?;

        self.conn
            .execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS idx_nodes_id ON nodes({});
                 CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
                 CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);",
                NODE_ID_EXPR
            ))
            .map_err(connection_error)?;

        Ok(())
    }

    /// Insert a raw node document, returning its rowid
    pub fn insert_node(&self, body: &Value) -> Result<i64> {
        insert_node_with(&self.conn, body, Stage::Import)
    }

    /// Insert an edge, returning its rowid
    pub fn insert_edge(&self, source: &str, target: &str, properties: &Value) -> Result<i64> {
        insert_edge_with(&self.conn, source, target, properties, Stage::Import)
    }

    /// Load a whole graph export in one transaction
    pub fn import_document(&mut self, document: &GraphDocument) -> Result<ImportStats> {
        let tx = self.transaction(Stage::Import)?;
        let mut stats = ImportStats::default();

        for body in &document.nodes {
            insert_node_with(&tx, body, Stage::Import)?;
            stats.nodes_inserted += 1;
        }
        for edge in &document.edges {
            insert_edge_with(&tx, &edge.source, &edge.target, &edge.properties, Stage::Import)?;
            stats.edges_inserted += 1;
        }

        tx.commit()
            .map_err(MigrationError::transaction(Stage::Import, None))?;

        info!(
            "Imported {} nodes and {} edges",
            stats.nodes_inserted, stats.edges_inserted
        );
        Ok(stats)
    }

    /// All nodes, classified by declared type, in rowid order
    pub fn load_nodes(&self) -> Result<Vec<Node>> {
        load_nodes_with(&self.conn, Stage::Analyze)
    }

    /// All edges with their extracted `properties.type`, in rowid order
    pub fn load_edges(&self) -> Result<Vec<Edge>> {
        load_edges_with(&self.conn, Stage::Analyze)
    }

    pub fn count_nodes(&self) -> Result<usize> {
        count_rows(&self.conn, "SELECT COUNT(*) FROM nodes", Stage::Verify)
    }

    pub fn count_edges(&self) -> Result<usize> {
        count_rows(&self.conn, "SELECT COUNT(*) FROM edges", Stage::Verify)
    }

    /// Edges whose source or target names no existing node
    pub fn count_dangling_edges(&self) -> Result<usize> {
        count_rows(
            &self.conn,
            &format!("SELECT COUNT(*) FROM edges WHERE {}", dangling_predicate()),
            Stage::Verify,
        )
    }

    /// Start the all-or-nothing boundary used by every mutating stage.
    /// Dropping the returned transaction without commit rolls it back.
    pub fn transaction(&mut self, stage: Stage) -> Result<Transaction<'_>> {
        self.conn
            .transaction()
            .map_err(MigrationError::transaction(stage, None))
    }
}

/// SQL predicate over `edges` matching rows with an unresolved endpoint
pub(crate) fn dangling_predicate() -> String {
    let known = format!(
        "SELECT {expr} FROM nodes WHERE {expr} IS NOT NULL",
        expr = NODE_ID_EXPR
    );
    format!(
        "source NOT IN ({known}) OR target NOT IN ({known})",
        known = known
    )
}

pub(crate) fn insert_node_with(conn: &Connection, body: &Value, stage: Stage) -> Result<i64> {
    let text = serde_json::to_string(body)?;
    conn.execute("INSERT INTO nodes (body) VALUES (?1)", params![text])
        .map_err(MigrationError::transaction(
            stage,
            body.get("id").and_then(Value::as_str),
        ))?;

    let row_id = conn.last_insert_rowid();
    debug!("Inserted node row {}", row_id);
    Ok(row_id)
}

pub(crate) fn insert_edge_with(
    conn: &Connection,
    source: &str,
    target: &str,
    properties: &Value,
    stage: Stage,
) -> Result<i64> {
    let text = serde_json::to_string(properties)?;
    conn.execute(
        "INSERT INTO edges (source, target, properties) VALUES (?1, ?2, ?3)",
        params![source, target, text],
    )
    .map_err(MigrationError::transaction(stage, Some(source)))?;

    let row_id = conn.last_insert_rowid();
    debug!("Inserted edge row {}: {} -> {}", row_id, source, target);
    Ok(row_id)
}

pub(crate) fn load_nodes_with(conn: &Connection, stage: Stage) -> Result<Vec<Node>> {
    let mut stmt = conn
        .prepare("SELECT rowid, body FROM nodes ORDER BY rowid")
        .map_err(MigrationError::store(stage))?;

    let nodes = stmt
        .query_map([], |row| {
            let row_id: i64 = row.get(0)?;
            let body: String = row.get(1)?;
            let value: Value = serde_json::from_str(&body).map_err(json_error)?;
            Ok(Node::from_document(row_id, &value))
        })
        .map_err(MigrationError::store(stage))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(MigrationError::store(stage))?;

    Ok(nodes)
}

pub(crate) fn load_edges_with(conn: &Connection, stage: Stage) -> Result<Vec<Edge>> {
    let mut stmt = conn
        .prepare(
            "SELECT rowid, source, target, CAST(json_extract(properties, '$.type') AS TEXT)
             FROM edges
             ORDER BY rowid",
        )
        .map_err(MigrationError::store(stage))?;

    let edges = stmt
        .query_map([], |row| {
            Ok(Edge {
                row_id: row.get(0)?,
                source: row.get(1)?,
                target: row.get(2)?,
                edge_type: row.get(3)?,
            })
        })
        .map_err(MigrationError::store(stage))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(MigrationError::store(stage))?;

    Ok(edges)
}

fn count_rows(conn: &Connection, sql: &str, stage: Stage) -> Result<usize> {
    let count: i64 = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(MigrationError::store(stage))?;
    Ok(count as usize)
}

fn json_error(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    #[test]
    fn test_database_creation() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        assert_eq!(db.count_nodes().unwrap(), 0);
        assert_eq!(db.count_edges().unwrap(), 0);
    }

    #[test]
    fn test_open_existing_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.db");

        match Database::open_existing(&missing) {
            Err(MigrationError::Connection { path, .. }) => assert_eq!(path, missing),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a store that does not exist"),
        }
        assert!(!missing.exists());
    }

    #[test]
    fn test_node_and_edge_roundtrip() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        db.insert_node(&json!({"id": "cip-1", "node_type": "directive", "category": "CIP"}))
            .unwrap();
        db.insert_node(&json!({"id": "mentation", "node_type": "lexicon-term"}))
            .unwrap();
        db.insert_edge("cip-1", "mentation", &json!({"type": "uses_term"}))
            .unwrap();

        let nodes = db.load_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].raw_id.as_deref(), Some("cip-1"));
        assert_eq!(nodes[1].kind.as_str(), "lexicon-term");

        let edges = db.load_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type.as_deref(), Some("uses_term"));
    }

    #[test]
    fn test_count_dangling_edges() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        db.insert_node(&json!({"id": "a", "node_type": "directive"})).unwrap();
        db.insert_node(&json!({"node_type": "directive"})).unwrap();
        db.insert_edge("a", "a", &json!({})).unwrap();
        db.insert_edge("a", "ghost-node", &json!({})).unwrap();
        db.insert_edge("null", "a", &json!({})).unwrap();

        // A node without an id never resolves an edge endpoint
        assert_eq!(db.count_dangling_edges().unwrap(), 2);
    }

    #[test]
    fn test_import_document() {
        let temp = NamedTempFile::new().unwrap();
        let mut db = Database::new(temp.path()).unwrap();

        let document: GraphDocument = serde_json::from_value(json!({
            "nodes": [
                {"id": "cda-61", "node_type": "metadata"},
                {"id": "cip-1", "node_type": "directive"}
            ],
            "edges": [
                {"source": "cip-1", "target": "cda-61", "properties": {"type": "part_of"}}
            ]
        }))
        .unwrap();

        let stats = db.import_document(&document).unwrap();
        assert_eq!(stats.nodes_inserted, 2);
        assert_eq!(stats.edges_inserted, 1);
        assert_eq!(db.count_dangling_edges().unwrap(), 0);
    }
}
