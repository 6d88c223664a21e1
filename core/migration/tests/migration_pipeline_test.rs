use anyhow::Result;
use idgraph_migration::{
    backup_store, migrate_identifiers, Database, IdMapper, MigrationConfig, MigrationError,
    MigrationMode,
};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use tempfile::NamedTempFile;

fn apply(db: &mut Database) -> Result<idgraph_migration::MigrationOutcome> {
    Ok(migrate_identifiers(
        db,
        &MigrationConfig::default(),
        MigrationMode::Apply,
    )?)
}

/// Mixed graph with every node variant and a few corrupt references
fn seed_mixed(db: &Database) -> Result<()> {
    db.insert_node(&json!({"id": "cda-61", "node_type": "metadata", "title": "CDA v61"}))?;
    db.insert_node(&json!({"id": "cl-1.76", "node_type": "metadata", "title": "Lexicon v1.76"}))?;
    db.insert_node(&json!({"id": "cip-1", "node_type": "directive", "category": "CIP"}))?;
    db.insert_node(&json!({"id": "cip-2", "node_type": "directive", "category": "CIP", "version": 61}))?;
    db.insert_node(&json!({"id": "cep-1a", "node_type": "directive", "category": "CEP", "version": "62"}))?;
    db.insert_node(&json!({"id": "mentation", "node_type": "lexicon-term", "lexicon_version": "1.76"}))?;
    db.insert_node(&json!({"id": "sequitur", "node_type": "lexicon-term"}))?;
    db.insert_node(&json!({"id": "null", "node_type": "directive", "category": "CDP", "title": "Lost key"}))?;
    db.insert_node(&json!({"id": "annotation", "node_type": "note"}))?;

    db.insert_edge("cip-1", "mentation", &json!({"type": "uses_term"}))?;
    db.insert_edge("cip-2", "cip-1", &json!({"type": "references"}))?;
    db.insert_edge("cep-1a", "cda-61", &json!({"type": "part_of"}))?;
    db.insert_edge("mentation", "cl-1.76", &json!({"type": "part_of"}))?;
    db.insert_edge("sequitur", "mentation", &json!({"type": "related"}))?;
    db.insert_edge("null", "cda-61", &json!({"type": "part_of"}))?;
    db.insert_edge("annotation", "cip-2", &json!({"type": "annotates"}))?;
    db.insert_edge("cip-1", "ghost-node", &json!({"type": "references"}))?;
    db.insert_edge("cda-61-cip-1", "cda-61", &json!({"type": "part_of"}))?;
    Ok(())
}

fn dump(path: &std::path::Path) -> Result<(Vec<String>, Vec<(String, String, String)>)> {
    let conn = Connection::open(path)?;
    let nodes = conn
        .prepare("SELECT body FROM nodes ORDER BY rowid")?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    let edges = conn
        .prepare("SELECT source, target, properties FROM edges ORDER BY rowid")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((nodes, edges))
}

#[test]
fn test_directive_and_lexicon_scenario() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    db.insert_node(&json!({"id": "cip-1", "node_type": "directive", "category": "CIP"}))?;
    db.insert_node(&json!({"id": "mentation", "node_type": "lexicon-term", "lexicon_version": "1.76"}))?;
    db.insert_edge("cip-1", "mentation", &json!({"type": "uses_term"}))?;

    let outcome = apply(&mut db)?;
    assert_eq!(outcome.map.get("cip-1"), Some("cda-61-cip-1"));

    let edges = db.load_edges()?;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source, "cda-61-cip-1");
    assert_eq!(edges[0].target, "cl-1.76-mentation");
    assert_eq!(edges[0].edge_type.as_deref(), Some("uses_term"));
    Ok(())
}

#[test]
fn test_ghost_node_edge_is_removed() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    db.insert_node(&json!({"id": "cip-1", "node_type": "directive"}))?;
    db.insert_edge("cip-1", "ghost-node", &json!({"type": "references"}))?;

    let outcome = apply(&mut db)?;
    assert!(outcome.completeness.missing.contains("ghost-node"));
    assert_eq!(outcome.mutation.as_ref().map(|m| m.dangling_removed), Some(1));
    assert_eq!(outcome.integrity.dangling_edges, 0);

    let edges = db.load_edges()?;
    assert!(edges
        .iter()
        .all(|e| e.source != "ghost-node" && e.target != "ghost-node"));
    assert!(edges.is_empty());
    Ok(())
}

#[test]
fn test_metadata_node_excluded_from_updates() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    db.insert_node(&json!({"id": "cda-61", "node_type": "metadata"}))?;
    db.insert_node(&json!({"id": "cip-1", "node_type": "directive"}))?;

    let outcome = apply(&mut db)?;
    assert_eq!(outcome.map.get("cda-61"), Some("cda-61"));
    assert_eq!(outcome.map.stats.unchanged, 1);
    assert_eq!(outcome.mutation.map(|m| m.nodes_updated), Some(1));
    Ok(())
}

#[test]
fn test_second_run_is_a_no_op() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    seed_mixed(&db)?;

    apply(&mut db)?;
    let first = dump(temp.path())?;

    let again = apply(&mut db)?;
    let stats = again.mutation.expect("apply mode records mutation stats");
    assert_eq!(stats.total_writes(), 0);
    assert_eq!(again.map.stats.transformed, 0);

    let second = dump(temp.path())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_post_migration_graph_is_closed_and_conformant() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    seed_mixed(&db)?;

    let outcome = apply(&mut db)?;
    assert!(outcome.integrity.is_clean());

    let mapper = IdMapper::new(&MigrationConfig::default())?;
    let nodes = db.load_nodes()?;
    let ids: HashSet<String> = nodes.iter().filter_map(|n| n.raw_id.clone()).collect();
    assert_eq!(ids.len(), nodes.len(), "node identifiers must stay unique");

    for node in &nodes {
        let id = node.raw_id.as_deref().unwrap_or_default();
        assert!(mapper.validate_new_id(id), "non-conforming id {:?}", id);
    }
    for edge in db.load_edges()? {
        assert!(ids.contains(&edge.source), "dangling source {}", edge.source);
        assert!(ids.contains(&edge.target), "dangling target {}", edge.target);
    }
    Ok(())
}

#[test]
fn test_changed_mappings_are_injective() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    seed_mixed(&db)?;

    let outcome = apply(&mut db)?;
    let changed: Vec<&str> = outcome
        .map
        .changed_records()
        .map(|r| r.new_id.as_str())
        .collect();
    let distinct: HashSet<&str> = changed.iter().copied().collect();
    assert_eq!(changed.len(), distinct.len());
    assert!(outcome.map.is_injective());
    Ok(())
}

#[test]
fn test_cleanup_runs_before_rewrite() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    seed_mixed(&db)?;

    // References the identifier cip-1 is about to receive; it did not exist
    // before migration, so the edge must not survive by accident
    let outcome = apply(&mut db)?;
    assert_eq!(outcome.mutation.map(|m| m.dangling_removed), Some(2));

    let edges = db.load_edges()?;
    let parts_of_cda: Vec<_> = edges
        .iter()
        .filter(|e| e.source == "cda-61-cip-1" && e.target == "cda-61")
        .collect();
    assert!(parts_of_cda.is_empty());
    Ok(())
}

#[test]
fn test_sentinel_identifier_is_followed_by_matching_edges() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    seed_mixed(&db)?;

    let outcome = apply(&mut db)?;
    let placeholder = outcome
        .map
        .get("null")
        .map(str::to_string)
        .expect("sentinel node is mapped");
    assert!(placeholder.starts_with("cda-61-unknown-"));
    assert!(!outcome.map.warnings.is_empty());

    let edges = db.load_edges()?;
    assert!(edges
        .iter()
        .any(|e| e.source == placeholder && e.target == "cda-61"));
    Ok(())
}

#[test]
fn test_versions_and_unknown_types() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    seed_mixed(&db)?;

    let outcome = apply(&mut db)?;
    assert_eq!(outcome.map.get("cip-2"), Some("cda-61-cip-2"));
    assert_eq!(outcome.map.get("cep-1a"), Some("cda-62-cep-1a"));
    assert_eq!(outcome.map.get("sequitur"), Some("cl-1.76-sequitur"));
    assert_eq!(outcome.map.get("annotation"), Some("annotation"));
    assert_eq!(outcome.map.get("cl-1.76"), Some("cl-1.76"));
    Ok(())
}

#[test]
fn test_backup_before_migration_keeps_original() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("graph.db");
    let mut db = Database::new(&store)?;
    seed_mixed(&db)?;

    let backup_path = dir.path().join("graph.db.bak");
    let backup = backup_store(&db, &backup_path)?;
    assert_eq!(backup.node_count, 9);
    assert_eq!(backup.edge_count, 9);

    apply(&mut db)?;

    let original = Database::open_existing(&backup_path)?;
    let ids: Vec<String> = original
        .load_nodes()?
        .into_iter()
        .filter_map(|n| n.raw_id)
        .collect();
    assert!(ids.contains(&"cip-1".to_string()));
    assert_eq!(original.count_dangling_edges()?, 2);
    Ok(())
}

#[test]
fn test_edge_to_excluded_node_keeps_reference_and_outcome_survives() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    db.insert_node(&json!({"id": "cip-1", "node_type": "directive"}))?;
    db.insert_node(&json!({"id": "Bad_Widget", "node_type": "widget"}))?;
    db.insert_edge("cip-1", "Bad_Widget", &json!({"type": "references"}))?;

    let outcome = match migrate_identifiers(&mut db, &MigrationConfig::default(), MigrationMode::Apply) {
        Err(MigrationError::VerificationFailed { outcome, source }) => {
            assert!(matches!(*source, MigrationError::FormatCompliance { count: 1 }));
            outcome
        }
        other => panic!("expected committed run with failed verification, got {:?}", other.err()),
    };

    // Excluded node has no mapping, the report still lists the committed change
    assert_eq!(outcome.map.get("Bad_Widget"), None);
    assert_eq!(outcome.map.stats.invalid, 1);
    assert_eq!(outcome.integrity.dangling_edges, 0);
    let changed: Vec<_> = outcome.map.changed_records().map(|r| r.new_id.clone()).collect();
    assert_eq!(changed, vec!["cda-61-cip-1".to_string()]);

    let edges = db.load_edges()?;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source, "cda-61-cip-1");
    assert_eq!(edges[0].target, "Bad_Widget");
    Ok(())
}

#[test]
fn test_shared_identifier_leaves_store_untouched() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let mut db = Database::new(temp.path())?;
    db.insert_node(&json!({"id": "mentation", "node_type": "directive"}))?;
    db.insert_node(&json!({"id": "mentation", "node_type": "lexicon-term"}))?;
    db.insert_edge("mentation", "mentation", &json!({"type": "related"}))?;
    let before = dump(temp.path())?;

    let result = migrate_identifiers(&mut db, &MigrationConfig::default(), MigrationMode::Apply);
    assert!(matches!(
        result,
        Err(MigrationError::DuplicateIdentifier { ref first, .. }) if first == "mentation"
    ));
    assert_eq!(dump(temp.path())?, before);
    Ok(())
}
