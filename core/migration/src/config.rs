use regex::Regex;

use crate::error::{MigrationError, Result};

pub const DEFAULT_DIRECTIVE_NAMESPACE: &str = "cda";
pub const DEFAULT_LEXICON_NAMESPACE: &str = "cl";
pub const DEFAULT_VERSION: &str = "61";
pub const DEFAULT_LEXICON_VERSION: &str = "1.76";

/// Version segment accepted in identifiers, e.g. `61` or `1.76`
pub const VERSION_PATTERN: &str = r"[0-9]+(?:\.[0-9]+)*";

/// Namespaces and fallback versions used to build new identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    pub directive_namespace: String,
    pub lexicon_namespace: String,
    pub default_version: String,
    pub default_lexicon_version: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            directive_namespace: DEFAULT_DIRECTIVE_NAMESPACE.to_string(),
            lexicon_namespace: DEFAULT_LEXICON_NAMESPACE.to_string(),
            default_version: DEFAULT_VERSION.to_string(),
            default_lexicon_version: DEFAULT_LEXICON_VERSION.to_string(),
        }
    }
}

impl MigrationConfig {
    /// Build a config from `IDGRAPH_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            directive_namespace: env_or("IDGRAPH_DIRECTIVE_NAMESPACE", defaults.directive_namespace),
            lexicon_namespace: env_or("IDGRAPH_LEXICON_NAMESPACE", defaults.lexicon_namespace),
            default_version: env_or("IDGRAPH_DEFAULT_VERSION", defaults.default_version),
            default_lexicon_version: env_or(
                "IDGRAPH_DEFAULT_LEXICON_VERSION",
                defaults.default_lexicon_version,
            ),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let namespace = pattern(r"^[a-z][a-z0-9]*$")?;
        let version = pattern(&format!("^{}$", VERSION_PATTERN))?;

        for (field, value) in [
            ("directive namespace", &self.directive_namespace),
            ("lexicon namespace", &self.lexicon_namespace),
        ] {
            if !namespace.is_match(value) {
                return Err(MigrationError::Config(format!(
                    "{} '{}' must be lowercase alphanumeric",
                    field, value
                )));
            }
        }

        if self.directive_namespace == self.lexicon_namespace {
            return Err(MigrationError::Config(format!(
                "directive and lexicon namespaces must differ (both '{}')",
                self.directive_namespace
            )));
        }

        for (field, value) in [
            ("default version", &self.default_version),
            ("default lexicon version", &self.default_lexicon_version),
        ] {
            if !version.is_match(value) {
                return Err(MigrationError::Config(format!(
                    "{} '{}' must be dotted digits",
                    field, value
                )));
            }
        }

        Ok(())
    }
}

fn pattern(source: &str) -> Result<Regex> {
    Regex::new(source).map_err(|e| MigrationError::Config(e.to_string()))
}

fn env_or(key: &str, fallback: String) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
}
