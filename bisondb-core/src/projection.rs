// src/projection.rs
//! Inclusion projections
//!
//! A projection is a field map such as `{"name": 1, "qty": true}`. Entries
//! with a truthy value select a field; false, zero or null entries are
//! ignored. When nothing is selected the document is returned unchanged.
//! `_id` is kept only when it is selected like any other field.

use crate::document::Document;
use crate::error::{BisonError, Result};

/// Turn caller JSON into a projection document (`null` means none)
pub fn parse_projection(json: &serde_json::Value) -> Result<Option<Document>> {
    match json {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(_) => Document::from_json(json).map(Some),
        _ => Err(BisonError::Validation(
            "Projection must be an object".to_string(),
        )),
    }
}

/// Narrow a document to the selected fields, keeping document order.
/// Dotted selections copy the nested value under the dotted name.
pub fn apply_projection(document: &Document, projection: &Document) -> Document {
    let selected: Vec<&String> = projection
        .iter()
        .filter(|(_, flag)| flag.is_truthy())
        .map(|(field, _)| field)
        .collect();

    if selected.is_empty() {
        return document.clone();
    }

    let mut result: Document = document
        .iter()
        .filter(|(key, _)| selected.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for path in selected.iter().filter(|p| p.contains('.') && !document.contains_key(p)) {
        if let Some(value) = document.get_path(path) {
            result.insert(path, value.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(&value).unwrap()
    }

    #[test]
    fn test_inclusion_keeps_document_order() {
        let d = doc(json!({"_id": 1, "a": 1, "b": 2, "c": 3}));
        let projected = apply_projection(&d, &doc(json!({"c": 1, "a": true})));
        let keys: Vec<&String> = projected.keys().collect();
        assert_eq!(keys, ["a", "c"]);
    }

    #[test]
    fn test_false_entries_ignored() {
        let d = doc(json!({"a": 1, "b": 2}));
        let projected = apply_projection(&d, &doc(json!({"a": 1, "b": 0})));
        assert_eq!(projected.to_json(), json!({"a": 1}));
    }

    #[test]
    fn test_empty_selection_returns_document() {
        let d = doc(json!({"a": 1, "b": 2}));
        assert_eq!(apply_projection(&d, &doc(json!({}))), d);
        assert_eq!(apply_projection(&d, &doc(json!({"a": 0, "b": false}))), d);
    }

    #[test]
    fn test_id_not_auto_included() {
        let d = doc(json!({"_id": "x", "a": 1}));
        let projected = apply_projection(&d, &doc(json!({"a": 1})));
        assert!(projected.get("_id").is_none());
    }

    #[test]
    fn test_missing_field_skipped() {
        let d = doc(json!({"a": 1}));
        let projected = apply_projection(&d, &doc(json!({"zzz": 1})));
        assert!(projected.is_empty());
    }

    #[test]
    fn test_dotted_selection() {
        let d = doc(json!({"address": {"city": "Budapest", "zip": 1}}));
        let projected = apply_projection(&d, &doc(json!({"address.city": 1})));
        assert_eq!(projected.to_json(), json!({"address.city": "Budapest"}));
    }

    #[test]
    fn test_parse_projection() {
        assert!(parse_projection(&serde_json::Value::Null).unwrap().is_none());
        assert!(parse_projection(&json!({"a": 1})).unwrap().is_some());
        assert!(matches!(
            parse_projection(&json!("a")),
            Err(BisonError::Validation(_))
        ));
    }
}
