use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::io::Write;

use crate::analyzer::PatternSummary;
use crate::mapper::MapperWarning;
use crate::mapping::{Collision, CompletenessReport, InvalidMapping, MapStats, MappingRecord};
use crate::migration::{MigrationMode, MigrationOutcome};
use crate::mutator::MutationStats;
use crate::verifier::IntegrityReport;

const CSV_HEADER: &str = "row_id,old_id,new_id,node_type,category,changed";

/// Operator-facing record of one migration run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub generated_at: String, // RFC3339
    pub dry_run: bool,
    pub summary: PatternSummary,
    pub stats: MapStats,
    pub mutation: Option<MutationStats>,
    pub integrity: IntegrityReport,
    pub unmapped_references: Vec<String>,
    pub invalid: Vec<InvalidMapping>,
    pub collisions: Vec<Collision>,
    pub warnings: Vec<MapperWarning>,
    pub mappings: Vec<MappingRecord>,
}

impl MigrationReport {
    pub fn from_outcome(outcome: &MigrationOutcome) -> Self {
        let CompletenessReport { missing, .. } = &outcome.completeness;
        Self {
            generated_at: Utc::now().to_rfc3339(),
            dry_run: outcome.mode == MigrationMode::DryRun,
            summary: outcome.summary.clone(),
            stats: outcome.map.stats.clone(),
            mutation: outcome.mutation.clone(),
            integrity: outcome.integrity.clone(),
            unmapped_references: missing.iter().cloned().collect(),
            invalid: outcome.map.invalid.clone(),
            collisions: outcome.map.collisions.clone(),
            warnings: outcome.map.warnings.clone(),
            mappings: outcome.map.records.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One row per mapping: old id, new id, type, category, changed
    pub fn write_csv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "{}", CSV_HEADER)?;
        for record in &self.mappings {
            writeln!(
                writer,
                "{},{},{},{},{},{}",
                record.row_id,
                csv_field(record.old_id.as_deref().unwrap_or("")),
                csv_field(&record.new_id),
                csv_field(&record.node_type),
                csv_field(record.category.as_deref().unwrap_or("")),
                record.changed
            )?;
        }
        writer.flush()
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "Identifier migration report ({})",
            if self.dry_run { "dry run" } else { "applied" }
        )?;
        writeln!(f, "─────────────────────────────────────────────────")?;
        write!(f, "{}", self.summary)?;
        writeln!(f)?;
        writeln!(f, "Mapping:")?;
        writeln!(f, "  Transformed:          {}", self.stats.transformed)?;
        writeln!(f, "  Unchanged:            {}", self.stats.unchanged)?;
        writeln!(f, "  Invalid (unmapped):   {}", self.stats.invalid)?;
        writeln!(f, "  Collisions:           {}", self.collisions.len())?;
        writeln!(f, "  Unmapped references:  {}", self.unmapped_references.len())?;

        if let Some(mutation) = &self.mutation {
            writeln!(f)?;
            writeln!(f, "Mutation:")?;
            writeln!(f, "  Dangling removed:     {}", mutation.dangling_removed)?;
            writeln!(f, "  Nodes updated:        {}", mutation.nodes_updated)?;
            writeln!(f, "  Edges updated:        {}", mutation.edges_updated)?;
        }

        writeln!(f)?;
        writeln!(f, "Integrity:")?;
        writeln!(f, "  Nodes:                {}", self.integrity.node_count)?;
        writeln!(f, "  Edges:                {}", self.integrity.edge_count)?;
        writeln!(f, "  Dangling edges:       {}", self.integrity.dangling_edges)?;
        writeln!(f, "  Grammar violations:   {}", self.integrity.violations.len())?;

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  ⚠ {}", warning)?;
            }
        }

        if !self.invalid.is_empty() {
            writeln!(f)?;
            writeln!(f, "Excluded nodes:")?;
            for invalid in &self.invalid {
                writeln!(
                    f,
                    "  row {} '{}' ({}) -> '{}' fails the naming grammar",
                    invalid.row_id, invalid.old_id, invalid.node_type, invalid.candidate
                )?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Changes:")?;
        let mut any = false;
        for record in self.mappings.iter().filter(|r| r.changed) {
            any = true;
            writeln!(
                f,
                "  {} -> {} [{}{}]",
                record.old_id.as_deref().unwrap_or("<missing>"),
                record.new_id,
                record.node_type,
                record
                    .category
                    .as_deref()
                    .map(|c| format!(", {}", c))
                    .unwrap_or_default()
            )?;
        }
        if !any {
            writeln!(f, "  (none)")?;
        }
        Ok(())
    }
}
