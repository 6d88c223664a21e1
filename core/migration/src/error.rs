use std::path::PathBuf;
use thiserror::Error;

use crate::migration::MigrationOutcome;

pub type Result<T> = std::result::Result<T, MigrationError>;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Analyze,
    Cleanup,
    NodeRewrite,
    EdgeRewrite,
    Verify,
    Import,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analyze => "analyze",
            Stage::Cleanup => "dangling-cleanup",
            Stage::NodeRewrite => "node-rewrite",
            Stage::EdgeRewrite => "edge-rewrite",
            Stage::Verify => "verify",
            Stage::Import => "import",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    /// The store file could not be opened or initialized.
    #[error("cannot open graph store at {path}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A computed identifier matched none of the naming grammars.
    #[error("identifier '{candidate}' computed for node '{old_id}' ({node_type}) fails the naming grammar")]
    InvalidIdentifier {
        old_id: String,
        candidate: String,
        node_type: String,
    },

    #[error("{dangling} dangling edge(s) remain after migration")]
    ReferentialIntegrity { dangling: usize },

    #[error("{count} node identifier(s) fail the naming grammar after migration")]
    FormatCompliance { count: usize },

    /// A write inside the mutation transaction failed; nothing was persisted.
    #[error("transaction aborted during {stage}{}: {source}", identifier_suffix(.identifier))]
    Transaction {
        stage: Stage,
        identifier: Option<String>,
        #[source]
        source: rusqlite::Error,
    },

    /// Two distinct nodes would end up sharing an identifier.
    #[error("{count} identifier collision(s) in transformation map (first: '{first}')")]
    MappingCollision { count: usize, first: String },

    /// Distinct nodes already share an identifier, so edges cannot be told apart.
    #[error("{count} identifier(s) held by more than one node before migration (first: '{first}')")]
    DuplicateIdentifier { count: usize, first: String },

    /// The mutation committed, then the store failed verification.
    #[error("changes committed but verification failed: {source}")]
    VerificationFailed {
        outcome: Box<MigrationOutcome>,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("backup verification failed for {path}: {reason}")]
    Backup { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store query failed during {stage}: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: rusqlite::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn identifier_suffix(identifier: &Option<String>) -> String {
    match identifier {
        Some(id) => format!(" (identifier '{}')", id),
        None => String::new(),
    }
}

impl MigrationError {
    pub(crate) fn store(stage: Stage) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| MigrationError::Store { stage, source }
    }

    pub(crate) fn transaction(
        stage: Stage,
        identifier: Option<&str>,
    ) -> impl FnOnce(rusqlite::Error) -> Self {
        let identifier = identifier.map(str::to_string);
        move |source| MigrationError::Transaction {
            stage,
            identifier,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_error_names_stage_and_identifier() {
        let err = MigrationError::transaction(Stage::NodeRewrite, Some("cip-1"))(
            rusqlite::Error::QueryReturnedNoRows,
        );
        let message = err.to_string();
        assert!(message.contains("node-rewrite"));
        assert!(message.contains("identifier 'cip-1'"));
    }
}
