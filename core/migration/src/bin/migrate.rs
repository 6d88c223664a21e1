/// Identifier Migration Binary - Renames graph nodes to versioned identifiers
///
/// Usage:
///   idgraph-migrate [--db-path <path>] <command>
///
/// Commands:
///   analyze   Summarize identifier shapes per node type
///   plan      Dry run: build the transformation map, write nothing
///   migrate   Back up the store, rewrite identifiers, verify
///   verify    Check referential closure and identifier grammar
///   repair    Remove dangling edges only
///   import    Load a JSON graph document into the store
///
/// Environment:
///   IDGRAPH_DB_PATH, IDGRAPH_DIRECTIVE_NAMESPACE, IDGRAPH_LEXICON_NAMESPACE,
///   IDGRAPH_DEFAULT_VERSION, IDGRAPH_DEFAULT_LEXICON_VERSION, RUST_LOG

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use idgraph_migration::{
    analyze, backup_store, cleanup_dangling_edges, default_backup_path, migrate_identifiers,
    verify, Database, IdMapper, MigrationConfig, MigrationError, MigrationMode, MigrationReport,
};
use idgraph_schemas::GraphDocument;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "idgraph-migrate")]
#[command(about = "Migrate graph node identifiers to the versioned naming scheme")]
struct Cli {
    /// Path to SQLite graph store
    #[arg(long, short, global = true)]
    db_path: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize identifier shapes per node type
    Analyze {
        /// Print the machine-readable JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Build the transformation map without writing to the store
    Plan(ExportArgs),
    /// Back up, rewrite identifiers and verify
    Migrate {
        #[command(flatten)]
        export: ExportArgs,

        /// Where to write the backup (defaults to <db>.backup-<timestamp>)
        #[arg(long)]
        backup_path: Option<PathBuf>,

        /// Skip the backup step
        #[arg(long)]
        no_backup: bool,
    },
    /// Check referential closure and identifier grammar
    Verify,
    /// Remove dangling edges without renaming anything
    Repair,
    /// Load a JSON document with "nodes" and "edges" arrays
    Import {
        /// Graph document to load
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[command(flatten)]
    naming: NamingArgs,

    /// Write one row per mapping as CSV
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write the full report as JSON
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct NamingArgs {
    /// Namespace prefix for directive identifiers
    #[arg(long)]
    directive_namespace: Option<String>,

    /// Namespace prefix for lexicon term identifiers
    #[arg(long)]
    lexicon_namespace: Option<String>,

    /// Version used when a directive declares none
    #[arg(long)]
    default_version: Option<String>,

    /// Version used when a lexicon term declares none
    #[arg(long)]
    default_lexicon_version: Option<String>,
}

impl NamingArgs {
    /// Environment first, flags override
    fn config(&self) -> MigrationConfig {
        let mut config = MigrationConfig::from_env();
        if let Some(ns) = &self.directive_namespace {
            config.directive_namespace = ns.clone();
        }
        if let Some(ns) = &self.lexicon_namespace {
            config.lexicon_namespace = ns.clone();
        }
        if let Some(v) = &self.default_version {
            config.default_version = v.clone();
        }
        if let Some(v) = &self.default_lexicon_version {
            config.default_lexicon_version = v.clone();
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("idgraph - Identifier Migration Tool v{}", env!("CARGO_PKG_VERSION"));

    // Determine database path
    let db_path = cli.db_path.clone().unwrap_or_else(|| {
        std::env::var("IDGRAPH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("graph.db"))
    });
    info!("Database: {}", db_path.display());

    match cli.command {
        Command::Import { file } => run_import(&db_path, &file),
        Command::Analyze { json } => run_analyze(&db_path, json),
        Command::Plan(export) => run_plan(&db_path, &export),
        Command::Migrate {
            export,
            backup_path,
            no_backup,
        } => run_migrate(&db_path, &export, backup_path, no_backup),
        Command::Verify => run_verify(&db_path),
        Command::Repair => run_repair(&db_path),
    }
}

fn open(db_path: &Path) -> Result<Database> {
    Database::open_existing(db_path)
        .with_context(|| format!("Graph store not found at {}", db_path.display()))
}

fn run_import(db_path: &Path, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document: GraphDocument = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse graph document {}", file.display()))?;

    let mut db = Database::new(db_path)?;
    let stats = db.import_document(&document)?;
    info!(
        "✓ Imported {} nodes and {} edges",
        stats.nodes_inserted, stats.edges_inserted
    );
    Ok(())
}

fn run_analyze(db_path: &Path, json: bool) -> Result<()> {
    let db = open(db_path)?;
    let summary = analyze(&db.load_nodes()?);

    if json {
        println!("{}", summary.to_json()?);
    } else {
        print!("{}", summary);
    }
    Ok(())
}

fn run_plan(db_path: &Path, export: &ExportArgs) -> Result<()> {
    let mut db = open(db_path)?;
    let outcome = migrate_identifiers(&mut db, &export.naming.config(), MigrationMode::DryRun)?;

    let report = MigrationReport::from_outcome(&outcome);
    print!("{}", report);
    write_exports(&report, export)
}

fn run_migrate(
    db_path: &Path,
    export: &ExportArgs,
    backup_path: Option<PathBuf>,
    no_backup: bool,
) -> Result<()> {
    let config = export.naming.config();
    let mut db = open(db_path)?;

    if no_backup {
        warn!("Skipping backup; a failed verification cannot be undone from a copy");
    } else {
        let destination = backup_path.unwrap_or_else(|| default_backup_path(db_path));
        let backup = backup_store(&db, &destination).context("Backup failed, store untouched")?;
        info!("Backup: {}", backup.destination.display());
    }

    info!("Starting migration...");
    info!("─────────────────────────────────────────────────");

    let outcome = match migrate_identifiers(&mut db, &config, MigrationMode::Apply) {
        Ok(outcome) => outcome,
        Err(MigrationError::VerificationFailed { outcome, source }) => {
            // Changes are on disk; the operator still needs the mapping table
            info!("─────────────────────────────────────────────────");
            let report = MigrationReport::from_outcome(&outcome);
            print!("{}", report);
            write_exports(&report, export)?;
            return Err(anyhow::Error::new(*source)
                .context("Changes committed, but the store failed verification"));
        }
        Err(err) => return Err(err).context("Identifier migration failed"),
    };

    info!("─────────────────────────────────────────────────");
    let report = MigrationReport::from_outcome(&outcome);
    print!("{}", report);
    write_exports(&report, export)?;

    info!("✓ All identifiers migrated; graph is referentially closed");
    Ok(())
}

fn run_verify(db_path: &Path) -> Result<()> {
    let db = open(db_path)?;
    let mapper = IdMapper::new(&MigrationConfig::from_env())?;

    // Each offender is logged before the error is returned
    let report = verify(&db, &mapper).context("Store failed verification")?;
    info!("Nodes:              {}", report.node_count);
    info!("Edges:              {}", report.edge_count);
    info!("✓ Store verified");
    Ok(())
}

fn run_repair(db_path: &Path) -> Result<()> {
    let mut db = open(db_path)?;
    let removed = cleanup_dangling_edges(&mut db)?;
    info!("✓ Removed {} dangling edges", removed);
    Ok(())
}

fn write_exports(report: &MigrationReport, export: &ExportArgs) -> Result<()> {
    if let Some(path) = &export.csv {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        report.write_csv(BufWriter::new(file))?;
        info!("Mapping table written to {}", path.display());
    }

    if let Some(path) = &export.json {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("JSON report written to {}", path.display());
    }
    Ok(())
}
