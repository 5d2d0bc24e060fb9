//! Rendering of the inconsistent-object set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inconsistency::{Inconsistencies, InconsistentObject};

/// Formats one inconsistent object.
pub trait InconsistencyRenderer {
    /// The rendered form.
    type Output;

    /// Renders a single inconsistent object.
    fn render(&self, object: &InconsistentObject) -> Self::Output;
}

/// Renders a plain text line suitable for startup logging.
///
/// Produces output like:
/// ```text
/// inconsistent select_permission: select permission for role "user" on table "author" in source "default"
///   = reason: in select permission for role "user" on table "author" in source "default": column "age" does not exist
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct TextRenderer;

impl InconsistencyRenderer for TextRenderer {
    type Output = String;

    fn render(&self, object: &InconsistentObject) -> String {
        let mut out = format!("inconsistent {}: {}\n", object.id.kind_name(), object.id);
        for reason in &object.reasons {
            out.push_str(&format!("  = reason: {reason}\n"));
        }
        out
    }
}

/// Renders the entry shape of the export API.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRenderer;

/// One entry of the export API's inconsistency listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Object kind, e.g. `select_permission`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable object path.
    pub name: String,
    /// Joined reasons.
    pub reason: String,
    /// The declared definition.
    pub definition: Value,
}

impl InconsistencyRenderer for JsonRenderer {
    type Output = ReportEntry;

    fn render(&self, object: &InconsistentObject) -> ReportEntry {
        ReportEntry {
            kind: object.id.kind_name().to_string(),
            name: object.id.to_string(),
            reason: object.reason(),
            definition: object.definition.clone(),
        }
    }
}

/// A rendered view of a build's inconsistencies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InconsistencyReport {
    /// Whether the set was empty.
    pub is_consistent: bool,
    /// One entry per inconsistent object, in identifier order.
    pub inconsistent_objects: Vec<ReportEntry>,
}

impl InconsistencyReport {
    /// Builds the export view of a set.
    pub fn new(inconsistencies: &Inconsistencies) -> Self {
        Self {
            is_consistent: inconsistencies.is_empty(),
            inconsistent_objects: inconsistencies.iter().map(|o| JsonRenderer.render(o)).collect(),
        }
    }

    /// The report as a JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Renders every object as text, in identifier order.
    pub fn render_text(inconsistencies: &Inconsistencies) -> String {
        inconsistencies.iter().map(|o| TextRenderer.render(o)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_metadata::{MetadataObjId, PermissionKind};

    fn age_permission() -> InconsistentObject {
        let id = MetadataObjId::Permission {
            source: "default".into(),
            table: "author".into(),
            role: "user".into(),
            kind: PermissionKind::Select,
        };
        let reason = format!("in {id}: column \"age\" does not exist");
        InconsistentObject::new(id, reason, json!({ "columns": ["age"] }))
    }

    #[test]
    fn render_text_lists_reasons() {
        let set: Inconsistencies = std::iter::once(age_permission()).collect();
        let text = InconsistencyReport::render_text(&set);
        assert!(text.starts_with("inconsistent select_permission: select permission"));
        assert!(text.contains("= reason: in select permission"));
        assert!(text.contains("column \"age\""));
    }

    #[test]
    fn json_entry_shape() {
        let set: Inconsistencies = std::iter::once(age_permission()).collect();
        let report = InconsistencyReport::new(&set);
        assert!(!report.is_consistent);
        let value = report.to_json();
        let entry = &value["inconsistent_objects"][0];
        assert_eq!(entry["type"], "select_permission");
        assert_eq!(entry["definition"], json!({ "columns": ["age"] }));
        assert!(entry["reason"].as_str().unwrap().contains("age"));
    }

    #[test]
    fn empty_report_is_consistent() {
        let report = InconsistencyReport::new(&Inconsistencies::new());
        assert!(report.is_consistent);
        assert!(report.inconsistent_objects.is_empty());
    }
}
