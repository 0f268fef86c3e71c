//! Filter values: literals or deferred references to another stage's output.
//!
//! A filter string of the exact form `{source.field}` is a placeholder. It is
//! parsed once, when the plan is built, into [`FilterValue::Deferred`].
//!
//! | Placeholder | Substituted with |
//! |-------------|------------------|
//! | `{s1.ids}`, `{s1.subjects}` | `Type/id` for every record of `s1` |
//! | `{s1.references}` | `subject.reference` of every record of `s1` |
//! | `{s1.references.performer}` | `performer.reference` of every record |
//! | `{s1.code.coding.code}` | every value found at that dotted path |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sub-field read by a bare `references` placeholder.
pub const DEFAULT_REFERENCE_FIELD: &str = "subject";

/// What a placeholder extracts from the source stage's records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderField {
    /// `Type/id` of each record.
    Ids,
    /// Same as [`PlaceholderField::Ids`]; reads better for subject filters.
    Subjects,
    /// The `reference` string held by a reference-valued sub-field.
    References {
        /// Name of the reference element on each record.
        sub_field: String,
    },
    /// Literal values at a dotted path.
    Path(String),
}

impl fmt::Display for PlaceholderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderField::Ids => write!(f, "ids"),
            PlaceholderField::Subjects => write!(f, "subjects"),
            PlaceholderField::References { sub_field } => write!(f, "references.{}", sub_field),
            PlaceholderField::Path(path) => write!(f, "{}", path),
        }
    }
}

/// A reference to a value produced by another stage at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placeholder {
    /// Stage whose result feeds this filter.
    pub source: String,
    /// What to extract from that result.
    pub field: PlaceholderField,
}

impl Placeholder {
    /// Parses a `{source.field}` string.
    ///
    /// Returns `None` when the string is not exactly one placeholder.
    pub fn parse(raw: &str) -> Option<Self> {
        let inner = raw.strip_prefix('{')?.strip_suffix('}')?;
        if inner.contains(['{', '}']) || inner.chars().any(char::is_whitespace) {
            return None;
        }

        let (source, rest) = inner.split_once('.')?;
        if source.is_empty() || rest.is_empty() {
            return None;
        }

        let field = match rest {
            "ids" => PlaceholderField::Ids,
            "subjects" => PlaceholderField::Subjects,
            "references" => PlaceholderField::References {
                sub_field: DEFAULT_REFERENCE_FIELD.to_string(),
            },
            _ => match rest.strip_prefix("references.") {
                Some(sub) if !sub.is_empty() => PlaceholderField::References {
                    sub_field: sub.to_string(),
                },
                _ => PlaceholderField::Path(rest.to_string()),
            },
        };

        Some(Self {
            source: source.to_string(),
            field,
        })
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}.{}}}", self.source, self.field)
    }
}

/// A filter value as held by a query node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    /// Sent as is.
    Literal(String),
    /// Known only after the source stage has executed.
    Deferred(Placeholder),
}

impl FilterValue {
    /// Converts a specification value into a filter value.
    ///
    /// Numbers and booleans are rendered literally, arrays of scalars are
    /// comma-joined (FHIR "OR" semantics), `null` becomes an empty literal.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => match Placeholder::parse(s) {
                Some(p) => FilterValue::Deferred(p),
                None => FilterValue::Literal(s.clone()),
            },
            Value::Null => FilterValue::Literal(String::new()),
            Value::Array(items) => FilterValue::Literal(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            other => FilterValue::Literal(other.to_string()),
        }
    }

    /// Returns the placeholder if this value is deferred.
    pub fn placeholder(&self) -> Option<&Placeholder> {
        match self {
            FilterValue::Deferred(p) => Some(p),
            FilterValue::Literal(_) => None,
        }
    }

    /// Returns the literal text if this value is not deferred.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            FilterValue::Literal(s) => Some(s),
            FilterValue::Deferred(_) => None,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Literal(s) => write!(f, "{}", s),
            FilterValue::Deferred(p) => write!(f, "{}", p),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::from_json(&Value::String(s.to_string()))
    }
}
