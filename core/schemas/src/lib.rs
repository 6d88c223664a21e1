use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Identifier Sentinels
// ============================================================================

/// Identifier values that importers emit when the source row had no id.
pub const MISSING_ID_SENTINELS: &[&str] = &["", "null", "undefined"];

/// Map key used for nodes whose document carries no identifier at all.
pub const NULL_ID_KEY: &str = "null";

pub fn is_missing_identifier(raw: Option<&str>) -> bool {
    match raw {
        None => true,
        Some(value) => MISSING_ID_SENTINELS.contains(&value.trim()),
    }
}

// ============================================================================
// Node Schema
// ============================================================================

/// A graph vertex read from the `nodes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// SQLite rowid of the backing document
    pub row_id: i64,
    /// Identifier as stored, `None` when the document has no `id`
    pub raw_id: Option<String>,
    /// `node_type` exactly as declared in the document
    pub declared_type: Option<String>,
    pub kind: NodeKind,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Closed set of node variants, each carrying only the fields its
/// identifier rule reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeKind {
    Metadata {
        version: Option<String>,
    },
    Directive {
        category: Option<String>,
        version: Option<String>,
        /// Source-system key, used when the document lost its `id`
        directive_id: Option<String>,
    },
    LexiconTerm {
        lexicon_version: Option<String>,
        version: Option<String>,
    },
    Unknown {
        category: Option<String>,
    },
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Metadata { .. } => "metadata",
            NodeKind::Directive { .. } => "directive",
            NodeKind::LexiconTerm { .. } => "lexicon-term",
            NodeKind::Unknown { .. } => "unknown",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Node {
    /// Classify a stored JSON document into a typed node.
    pub fn from_document(row_id: i64, body: &Value) -> Self {
        let raw_id = identifier_field(body, &["id"]);
        let declared_type = string_field(body, &["node_type", "type"]);
        let category = string_field(body, &["category"]);
        let version = present_field(body, &["version", "directive_version", "cda_version"]);

        let kind = match declared_type.as_deref().map(normalize_type) {
            Some(ref t) if t == "metadata" => NodeKind::Metadata { version },
            Some(ref t) if DIRECTIVE_TYPES.contains(&t.as_str()) => {
                NodeKind::Directive {
                    category,
                    version,
                    directive_id: present_field(body, &["directive_id"]),
                }
            }
            Some(ref t) if LEXICON_TYPES.contains(&t.as_str()) => NodeKind::LexiconTerm {
                lexicon_version: present_field(body, &["lexicon_version", "cl_version"]),
                version,
            },
            _ => NodeKind::Unknown { category },
        };

        Node {
            row_id,
            raw_id,
            declared_type,
            kind,
            title: string_field(body, &["title"]),
            description: string_field(body, &["description"]),
        }
    }

    /// Key under which this node appears in a transformation map.
    pub fn old_key(&self) -> &str {
        self.raw_id.as_deref().unwrap_or(NULL_ID_KEY)
    }

    pub fn has_usable_id(&self) -> bool {
        !is_missing_identifier(self.raw_id.as_deref())
    }

    pub fn category(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Directive { category, .. } | NodeKind::Unknown { category } => {
                category.as_deref()
            }
            _ => None,
        }
    }

    /// Declared type label used for grouping in reports.
    pub fn type_label(&self) -> &str {
        self.declared_type.as_deref().unwrap_or("untyped")
    }
}

const DIRECTIVE_TYPES: &[&str] = &["directive", "cip", "cep", "cdp"];
const LEXICON_TYPES: &[&str] = &["lexicon-term", "lexicon_term", "term"];

fn normalize_type(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn string_field(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| value.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn identifier_field(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn present_field(body: &Value, keys: &[&str]) -> Option<String> {
    identifier_field(body, keys)
        .map(|v| v.trim().to_string())
        .filter(|v| !is_missing_identifier(Some(v.as_str())))
}

// ============================================================================
// Edge Schema
// ============================================================================

/// A directed relation read from the `edges` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub row_id: i64,
    pub source: String,
    pub target: String,
    /// `properties.type`
    pub edge_type: Option<String>,
}

// ============================================================================
// Import Documents
// ============================================================================

/// On-disk graph export: raw node documents plus edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<EdgeDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDocument {
    pub source: String,
    pub target: String,
    #[serde(default = "empty_properties")]
    pub properties: Value,
}

fn empty_properties() -> Value {
    Value::Object(Map::new())
}
