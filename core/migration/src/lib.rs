pub mod analyzer;
pub mod backup;
pub mod config;
pub mod database;
pub mod error;
pub mod mapper;
pub mod mapping;
pub mod migration;
pub mod mutator;
pub mod report;
pub mod verifier;

pub use analyzer::{analyze, PatternSummary, TypeSummary};
pub use backup::{backup_store, default_backup_path, BackupReport};
pub use config::MigrationConfig;
pub use database::{Database, ImportStats};
pub use error::{MigrationError, Result, Stage};
pub use mapper::{IdGrammar, IdMapper, MapperWarning, Transformation};
pub use mapping::{
    build_map, check_completeness, Collision, CompletenessReport, DuplicateIdentifier,
    InvalidMapping, MapStats, MappingRecord, TransformationMap,
};
pub use migration::{migrate_identifiers, MigrationMode, MigrationOutcome};
pub use mutator::{cleanup_dangling_edges, MutationStats};
pub use report::MigrationReport;
pub use verifier::{inspect, verify, FormatViolation, IntegrityReport};
