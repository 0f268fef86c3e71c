//! Lenient decoding of search responses.

use serde::Serialize;
use serde_json::Value;

/// `search.mode` of records embedded by `_include` / `_revinclude`.
pub const INCLUDE_MODE: &str = "include";

/// One record in a search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    /// The record itself.
    pub resource: Value,
    /// `match`, `include` or `outcome`, when the service says.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_mode: Option<String>,
}

impl BundleEntry {
    /// Returns true if the record was embedded by `_include` / `_revinclude`.
    pub fn is_included(&self) -> bool {
        self.search_mode.as_deref() == Some(INCLUDE_MODE)
    }
}

/// The parts of a search response the executor relies on.
///
/// # Example
///
/// ```rust
/// use fhir_plan_executor::Bundle;
/// use serde_json::json;
///
/// let bundle = Bundle::from_value(&json!({
///     "resourceType": "Bundle",
///     "total": 2,
///     "link": [{ "relation": "next", "url": "https://fhir.example.org/Patient?page=2" }],
///     "entry": [{ "resource": { "resourceType": "Patient", "id": "a" } }]
/// }));
///
/// assert_eq!(bundle.total, Some(2));
/// assert_eq!(bundle.len(), 1);
/// assert!(bundle.next.is_some());
///
/// // Anything that is not a Bundle decodes to nothing.
/// assert!(Bundle::from_value(&json!({ "resourceType": "OperationOutcome" })).is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Bundle {
    /// Total number of matches reported by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    /// Entries in response order.
    pub entries: Vec<BundleEntry>,
    /// URL of the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl Bundle {
    /// Decodes a raw response. Never fails.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        if obj.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
            return Self::default();
        }

        let total = obj
            .get("total")
            .and_then(Value::as_u64)
            .and_then(|t| usize::try_from(t).ok());

        let entries = obj
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let resource = entry.get("resource").filter(|r| r.is_object())?;
                        let search_mode = entry
                            .pointer("/search/mode")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        Some(BundleEntry {
                            resource: resource.clone(),
                            search_mode,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let next = obj
            .get("link")
            .and_then(Value::as_array)
            .and_then(|links| {
                links.iter().find(|link| {
                    link.get("relation").and_then(Value::as_str) == Some("next")
                })
            })
            .and_then(|link| link.get("url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        Self {
            total,
            entries,
            next,
        }
    }

    /// Iterates over the records in response order.
    pub fn records(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|e| &e.resource)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the bundle holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
