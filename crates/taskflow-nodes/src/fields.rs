//! Small helpers for reading and seeding node fields

use serde_json::{Map, Value};
use taskflow_engine::NodeData;

/// Node data seeded with `defaults`, then overlaid with caller fields
pub(crate) fn seeded(defaults: Vec<(&str, Value)>, overrides: Map<String, Value>) -> NodeData {
    let mut fields: Map<String, Value> = defaults
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    fields.extend(overrides);
    NodeData::with_fields(fields)
}

/// A string field, treating a missing or blank value as absent
pub(crate) fn non_blank<'a>(data: &'a NodeData, key: &str) -> Option<&'a str> {
    data.str_field(key).filter(|s| !s.trim().is_empty())
}

/// Elements of an array field, or nothing
pub(crate) fn array_field<'a>(data: &'a NodeData, key: &str) -> &'a [Value] {
    data.field(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seeded_overrides_defaults() {
        let mut overrides = Map::new();
        overrides.insert("label".into(), json!("Custom"));
        let data = seeded(
            vec![("label", json!("Default")), ("sources", json!([]))],
            overrides,
        );
        assert_eq!(data.str_field("label"), Some("Custom"));
        assert_eq!(data.field("sources"), Some(&json!([])));
    }

    #[test]
    fn test_non_blank() {
        let mut data = NodeData::default();
        data.fields.insert("title".into(), json!("   "));
        assert_eq!(non_blank(&data, "title"), None);
        data.fields.insert("title".into(), json!("Churn"));
        assert_eq!(non_blank(&data, "title"), Some("Churn"));
        assert!(array_field(&data, "missing").is_empty());
    }
}
