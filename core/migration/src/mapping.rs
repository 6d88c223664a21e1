use idgraph_schemas::{Edge, Node};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::error::MigrationError;
use crate::mapper::{IdMapper, MapperWarning};

/// One node's entry in the transformation map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingRecord {
    pub row_id: i64,
    /// Stored identifier, `None` when the document had no `id`
    pub old_id: Option<String>,
    pub new_id: String,
    pub node_type: String,
    pub category: Option<String>,
    pub changed: bool,
}

/// A node whose computed identifier failed every grammar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidMapping {
    pub row_id: i64,
    pub old_id: String,
    pub candidate: String,
    pub node_type: String,
}

/// Distinct nodes that would end up with the same identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub new_id: String,
    pub old_ids: Vec<String>,
    pub row_ids: Vec<i64>,
}

/// One stored identifier carried by several nodes before migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateIdentifier {
    pub old_id: String,
    pub row_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapStats {
    pub total: usize,
    pub transformed: usize,
    pub unchanged: usize,
    pub invalid: usize,
}

/// Old identifier -> new identifier for one migration run
#[derive(Debug, Clone, Default)]
pub struct TransformationMap {
    entries: BTreeMap<String, String>,
    pub records: Vec<MappingRecord>,
    pub invalid: Vec<InvalidMapping>,
    pub collisions: Vec<Collision>,
    pub duplicates: Vec<DuplicateIdentifier>,
    pub warnings: Vec<MapperWarning>,
    pub stats: MapStats,
}

impl TransformationMap {
    pub fn get(&self, old_id: &str) -> Option<&str> {
        self.entries.get(old_id).map(String::as_str)
    }

    /// Mapped value, or the identifier itself when it has no entry
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).unwrap_or(id)
    }

    pub fn contains(&self, old_id: &str) -> bool {
        self.entries.contains_key(old_id)
    }

    pub fn changed_records(&self) -> impl Iterator<Item = &MappingRecord> {
        self.records.iter().filter(|record| record.changed)
    }

    pub fn is_injective(&self) -> bool {
        self.collisions.is_empty() && self.duplicates.is_empty()
    }

    /// Error to abort on when two nodes share an identifier, before or after
    /// the run. Pre-existing duplicates are reported first.
    pub fn collision_error(&self) -> Option<MigrationError> {
        if let Some(first) = self.duplicates.first() {
            return Some(MigrationError::DuplicateIdentifier {
                count: self.duplicates.len(),
                first: first.old_id.clone(),
            });
        }
        self.collisions.first().map(|first| MigrationError::MappingCollision {
            count: self.collisions.len(),
            first: first.new_id.clone(),
        })
    }
}

/// Apply the mapper to every node. Candidates failing validation get no
/// entry and are counted as invalid. Usable identifiers held by more than one
/// node are recorded as duplicates; sentinel ids are not identifiers and only
/// warn.
pub fn build_map(mapper: &IdMapper, nodes: &[Node]) -> TransformationMap {
    let mut map = TransformationMap::default();
    map.stats.total = nodes.len();

    // Identifier each node carries after the run, for the injectivity check
    let mut final_ids: BTreeMap<String, Vec<(i64, String)>> = BTreeMap::new();
    let mut stored_ids: BTreeMap<String, Vec<i64>> = BTreeMap::new();

    for node in nodes {
        let transformation = mapper.transform(node);
        if let Some(warning) = transformation.warning.clone() {
            warn!("{}", warning);
            map.warnings.push(warning);
        }

        let old_key = node.old_key().to_string();
        if node.has_usable_id() {
            stored_ids
                .entry(old_key.clone())
                .or_default()
                .push(node.row_id);
        }

        if let Err(err) = mapper.check(node, &transformation) {
            warn!("Excluded from map: {}", err);

            map.invalid.push(InvalidMapping {
                row_id: node.row_id,
                old_id: old_key,
                candidate: transformation.new_id,
                node_type: node.type_label().to_string(),
            });
            map.stats.invalid += 1;

            // Unmapped nodes keep whatever id they already have
            if let Some(raw) = &node.raw_id {
                final_ids
                    .entry(raw.clone())
                    .or_default()
                    .push((node.row_id, raw.clone()));
            }
            continue;
        }

        let changed = node.raw_id.as_deref() != Some(transformation.new_id.as_str());
        if changed {
            map.stats.transformed += 1;
            debug!("Mapped {} -> {}", old_key, transformation.new_id);
        } else {
            map.stats.unchanged += 1;
        }

        if let Some(existing) = map.entries.get(&old_key) {
            warn!(
                "Old identifier '{}' seen again at row {}; edges resolve to '{}'",
                old_key, node.row_id, existing
            );
        } else {
            map.entries
                .insert(old_key.clone(), transformation.new_id.clone());
        }

        final_ids
            .entry(transformation.new_id.clone())
            .or_default()
            .push((node.row_id, old_key.clone()));

        map.records.push(MappingRecord {
            row_id: node.row_id,
            old_id: node.raw_id.clone(),
            new_id: transformation.new_id,
            node_type: node.type_label().to_string(),
            category: node.category().map(str::to_string),
            changed,
        });
    }

    for (old_id, row_ids) in stored_ids {
        if row_ids.len() > 1 {
            warn!(
                "Identifier '{}' is held by {} nodes (rows {:?})",
                old_id,
                row_ids.len(),
                row_ids
            );
            map.duplicates.push(DuplicateIdentifier { old_id, row_ids });
        }
    }

    for (new_id, owners) in final_ids {
        if owners.len() > 1 {
            warn!(
                "Identifier collision on '{}': {} nodes would share it",
                new_id,
                owners.len()
            );
            map.collisions.push(Collision {
                new_id,
                row_ids: owners.iter().map(|(row, _)| *row).collect(),
                old_ids: owners.into_iter().map(|(_, old)| old).collect(),
            });
        }
    }

    info!(
        "Transformation map built: {} transformed, {} unchanged, {} invalid, {} collisions, {} duplicates",
        map.stats.transformed,
        map.stats.unchanged,
        map.stats.invalid,
        map.collisions.len(),
        map.duplicates.len()
    );
    map
}

/// Edge endpoints with no entry in the transformation map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    pub referenced: usize,
    pub missing: BTreeSet<String>,
}

impl CompletenessReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Diagnostic only: flags every identifier referenced by an edge that the
/// map cannot resolve.
pub fn check_completeness(map: &TransformationMap, edges: &[Edge]) -> CompletenessReport {
    let referenced: BTreeSet<&str> = edges
        .iter()
        .flat_map(|edge| [edge.source.as_str(), edge.target.as_str()])
        .collect();

    let missing: BTreeSet<String> = referenced
        .iter()
        .filter(|id| !map.contains(id))
        .map(|id| id.to_string())
        .collect();

    if missing.is_empty() {
        info!("All {} edge-referenced identifiers are mapped", referenced.len());
    } else {
        warn!(
            "{} of {} edge-referenced identifiers have no mapping",
            missing.len(),
            referenced.len()
        );
        for id in &missing {
            warn!("  unmapped reference: {}", id);
        }
    }

    CompletenessReport {
        referenced: referenced.len(),
        missing,
    }
}
