use idgraph_schemas::{is_missing_identifier, Node, NodeKind};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::{MigrationConfig, VERSION_PATTERN};
use crate::error::{MigrationError, Result};

/// Hex digits of the placeholder digest kept in generated identifiers
const PLACEHOLDER_DIGEST_LEN: usize = 8;

/// Which naming grammar an identifier satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdGrammar {
    /// `namespace-version`
    Metadata,
    /// `namespace-version-category-number`
    DirectiveNumbered,
    /// `namespace-version-category`
    DirectiveBare,
    /// `namespace-version-category-alnum`
    DirectiveAlphanumeric,
    /// `lexicon-version-anything`
    LexiconTerm,
    /// bare lowercase words joined by hyphens, pre-versioning scheme
    Legacy,
}

/// Non-fatal findings recorded while transforming a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MapperWarning {
    /// The node had no usable id. Edges can only follow it if they held the
    /// same sentinel value.
    MissingIdentifier {
        row_id: i64,
        old_id: String,
        new_id: String,
        recovered_from: Option<String>,
    },
    UnknownNodeType {
        row_id: i64,
        old_id: String,
        node_type: String,
    },
}

impl fmt::Display for MapperWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MapperWarning::MissingIdentifier {
                row_id,
                old_id,
                new_id,
                recovered_from: Some(source),
            } => write!(
                f,
                "node row {} has missing id '{}'; rebuilt '{}' from directive_id '{}'",
                row_id, old_id, new_id, source
            ),
            MapperWarning::MissingIdentifier {
                row_id,
                old_id,
                new_id,
                recovered_from: None,
            } => write!(
                f,
                "node row {} has missing id '{}'; assigned placeholder '{}', edges holding the old reference cannot follow",
                row_id, old_id, new_id
            ),
            MapperWarning::UnknownNodeType {
                row_id,
                old_id,
                node_type,
            } => write!(
                f,
                "node row {} ('{}') has unrecognized type '{}'; identifier left unchanged",
                row_id, old_id, node_type
            ),
        }
    }
}

/// Result of mapping one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub new_id: String,
    pub warning: Option<MapperWarning>,
}

impl Transformation {
    fn clean(new_id: String) -> Self {
        Self {
            new_id,
            warning: None,
        }
    }
}

/// Computes canonical identifiers and checks them against the naming grammars
pub struct IdMapper {
    config: MigrationConfig,
    grammars: Vec<(IdGrammar, Regex)>,
    directive_prefix: Regex,
    lexicon_prefix: Regex,
}

impl IdMapper {
    pub fn new(config: &MigrationConfig) -> Result<Self> {
        config.validate()?;

        let ns = regex::escape(&config.directive_namespace);
        let lex = regex::escape(&config.lexicon_namespace);
        let v = VERSION_PATTERN;

        let patterns = [
            (IdGrammar::Metadata, format!(r"^[a-z][a-z0-9]*-{v}$")),
            (IdGrammar::DirectiveNumbered, format!(r"^{ns}-{v}-[a-z]+-[0-9]+$")),
            (IdGrammar::DirectiveBare, format!(r"^{ns}-{v}-[a-z]+$")),
            (
                IdGrammar::DirectiveAlphanumeric,
                format!(r"^{ns}-{v}-[a-z]+-[a-z0-9]+(?:-[a-z0-9]+)*$"),
            ),
            (IdGrammar::LexiconTerm, format!(r"^{lex}-{v}-.+$")),
            (IdGrammar::Legacy, r"^[a-z]+(?:-[a-z]+)*$".to_string()),
        ];

        let grammars = patterns
            .into_iter()
            .map(|(grammar, pattern)| Ok((grammar, compile(&pattern)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config: config.clone(),
            grammars,
            directive_prefix: compile(&format!(r"^{ns}-{v}-"))?,
            lexicon_prefix: compile(&format!(r"^{lex}-{v}-"))?,
        })
    }

    /// Compute the new identifier for a node
    pub fn transform(&self, node: &Node) -> Transformation {
        match &node.kind {
            NodeKind::Metadata { .. } => Transformation::clean(node.old_key().to_string()),
            NodeKind::Directive { directive_id, .. } => self.versioned(
                node,
                &self.config.directive_namespace,
                &self.directive_prefix,
                directive_id.as_deref(),
            ),
            NodeKind::LexiconTerm { .. } => self.versioned(
                node,
                &self.config.lexicon_namespace,
                &self.lexicon_prefix,
                None,
            ),
            NodeKind::Unknown { .. } => Transformation {
                new_id: node.old_key().to_string(),
                warning: Some(MapperWarning::UnknownNodeType {
                    row_id: node.row_id,
                    old_id: node.old_key().to_string(),
                    node_type: node.type_label().to_string(),
                }),
            },
        }
    }

    /// Version segment for a node: lexicon version, then dataset version,
    /// then the configured default for its kind.
    pub fn resolve_version<'a>(&'a self, node: &'a Node) -> &'a str {
        match &node.kind {
            NodeKind::LexiconTerm {
                lexicon_version,
                version,
            } => lexicon_version
                .as_deref()
                .or(version.as_deref())
                .unwrap_or(&self.config.default_lexicon_version),
            NodeKind::Directive { version, .. } | NodeKind::Metadata { version } => {
                version.as_deref().unwrap_or(&self.config.default_version)
            }
            NodeKind::Unknown { .. } => &self.config.default_version,
        }
    }

    fn versioned(
        &self,
        node: &Node,
        namespace: &str,
        prefix: &Regex,
        recovery: Option<&str>,
    ) -> Transformation {
        let version = self.resolve_version(node);

        if !node.has_usable_id() {
            let (suffix, recovered_from) = match recovery {
                Some(source) => (source.to_lowercase(), Some(source.to_string())),
                None => (
                    format!("unknown-{}", placeholder_digest(node)),
                    None,
                ),
            };
            let new_id = format!("{}-{}-{}", namespace, version, suffix);
            return Transformation {
                warning: Some(MapperWarning::MissingIdentifier {
                    row_id: node.row_id,
                    old_id: node.old_key().to_string(),
                    new_id: new_id.clone(),
                    recovered_from,
                }),
                new_id,
            };
        }

        let old = node.old_key();
        // Any `<ns>-V-` prefix, whatever its version; never stack a second one
        if prefix.is_match(old) {
            return Transformation::clean(old.to_string());
        }

        let local = if namespace == self.config.directive_namespace {
            old.trim().to_lowercase()
        } else {
            old.trim().to_string()
        };
        Transformation::clean(format!("{}-{}-{}", namespace, version, local))
    }

    /// Whether an identifier satisfies at least one naming grammar
    pub fn validate_new_id(&self, id: &str) -> bool {
        self.classify_id(id).is_some()
    }

    /// First grammar the identifier satisfies, if any
    pub fn classify_id(&self, id: &str) -> Option<IdGrammar> {
        if is_missing_identifier(Some(id)) {
            return None;
        }
        self.grammars
            .iter()
            .find(|(_, regex)| regex.is_match(id))
            .map(|(grammar, _)| *grammar)
    }

    /// Reject a computed identifier that fails every grammar
    pub fn check(&self, node: &Node, transformation: &Transformation) -> Result<()> {
        if self.validate_new_id(&transformation.new_id) {
            Ok(())
        } else {
            Err(MigrationError::InvalidIdentifier {
                old_id: node.old_key().to_string(),
                candidate: transformation.new_id.clone(),
                node_type: node.type_label().to_string(),
            })
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| MigrationError::Config(format!("bad identifier pattern '{}': {}", pattern, e)))
}

/// Stable digest of the fields a malformed node still carries, so the
/// placeholder is the same on every run.
fn placeholder_digest(node: &Node) -> String {
    let mut hasher = Sha256::new();
    let fields = [
        node.row_id.to_string(),
        node.type_label().to_string(),
        node.category().unwrap_or_default().to_string(),
        serde_json::to_string(&node.kind).unwrap_or_default(),
        node.title.clone().unwrap_or_default(),
        node.description.clone().unwrap_or_default(),
    ];
    for field in &fields {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
    }

    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<String>()
        .chars()
        .take(PLACEHOLDER_DIGEST_LEN)
        .collect()
}
