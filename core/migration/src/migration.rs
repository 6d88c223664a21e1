use tracing::{error, info, warn};

use crate::analyzer::{analyze, PatternSummary};
use crate::config::MigrationConfig;
use crate::database::Database;
use crate::error::{MigrationError, Result};
use crate::mapper::IdMapper;
use crate::mapping::{build_map, check_completeness, CompletenessReport, TransformationMap};
use crate::mutator::{self, MutationStats};
use crate::verifier::{self, IntegrityReport};

/// Whether the pipeline stops after planning or writes to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationMode {
    DryRun,
    Apply,
}

/// Everything one pipeline run produced
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub mode: MigrationMode,
    pub summary: PatternSummary,
    pub map: TransformationMap,
    pub completeness: CompletenessReport,
    /// `None` for dry runs
    pub mutation: Option<MutationStats>,
    pub integrity: IntegrityReport,
}

/// Analyze, map, check, clean up, rewrite and verify node identifiers.
///
/// Stages run strictly in order, each on the complete output of the one
/// before it. In `Apply` mode every write happens inside one transaction.
pub fn migrate_identifiers(
    db: &mut Database,
    config: &MigrationConfig,
    mode: MigrationMode,
) -> Result<MigrationOutcome> {
    let mapper = IdMapper::new(config)?;

    info!("Starting identifier migration ({:?})", mode);

    // 1. Snapshot and summarize current identifiers
    let nodes = db.load_nodes()?;
    let summary = analyze(&nodes);
    info!("Found {} nodes in {} types", summary.total_nodes, summary.by_type.len());

    // 2. Old -> new for every node
    let map = build_map(&mapper, &nodes);

    // 3. Surface edge references the map cannot resolve before anything is written
    let edges = db.load_edges()?;
    let completeness = check_completeness(&map, &edges);
    if !completeness.is_complete() {
        warn!(
            "{} unmapped edge references; dangling ones will be removed by cleanup",
            completeness.missing.len()
        );
    }

    // 4. Refuse to merge distinct nodes into one identifier
    if let Some(err) = map.collision_error() {
        for duplicate in &map.duplicates {
            error!(
                "  '{}' already held by rows {:?}",
                duplicate.old_id, duplicate.row_ids
            );
        }
        for collision in &map.collisions {
            error!(
                "  '{}' claimed by {}",
                collision.new_id,
                collision.old_ids.join(", ")
            );
        }
        return Err(err);
    }

    // 5. Cleanup + rewrite, all or nothing
    let mutation = match mode {
        MigrationMode::DryRun => {
            info!(
                "Dry run: {} nodes would change, {} dangling edges would be removed",
                map.changed_records().count(),
                db.count_dangling_edges()?
            );
            None
        }
        MigrationMode::Apply => match mutator::apply(db, &map) {
            Ok(stats) => Some(stats),
            Err(err) => {
                error!("Mutation rolled back: {}", err);
                // Diagnostics still run against the untouched store
                match verifier::inspect(db, &mapper) {
                    Ok(report) => info!(
                        "Store after rollback: {} dangling edges, {} non-conforming identifiers",
                        report.dangling_edges,
                        report.violations.len()
                    ),
                    Err(inspect_err) => error!("Post-rollback inspection failed: {}", inspect_err),
                }
                return Err(err);
            }
        },
    };

    // 6. Referential closure and grammar conformance
    let integrity = verifier::inspect(db, &mapper)?;
    let outcome = MigrationOutcome {
        mode,
        summary,
        map,
        completeness,
        mutation,
        integrity,
    };

    if mode == MigrationMode::Apply {
        // Writes are already committed; hand the outcome back with the failure
        if let Err(err) = outcome.integrity.clone().into_result() {
            error!("Verification failed after commit: {}", err);
            return Err(MigrationError::VerificationFailed {
                outcome: Box::new(outcome),
                source: Box::new(err),
            });
        }
    }

    info!("Identifier migration complete");
    Ok(outcome)
}
