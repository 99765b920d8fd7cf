// src/query.rs
//! Filter expressions
//!
//! A filter is a [`Document`] whose keys are either field names (implicit
//! equality, or an operator sub-document such as `{"$gte": 10}`) or the
//! logical combinators `$and`, `$or` and `$not`. Matching lives in the
//! [`operators`] submodule, which dispatches through an operator registry.
//!
//! ```
//! use bisondb_core::query::{matches_filter, parse_filter};
//! use bisondb_core::Document;
//! use serde_json::json;
//!
//! let doc = Document::from_json(&json!({"name": "abc", "qty": 10})).unwrap();
//! let filter = parse_filter(&json!({"name": {"$like": "a%c"}, "qty": {"$gte": 10}})).unwrap();
//! assert!(matches_filter(&doc, &filter).unwrap());
//! ```

pub mod operators;

use crate::document::Document;
use crate::error::{BisonError, Result};
use crate::value::Value;

pub use operators::{matches_filter, OperatorMatcher, OPERATOR_REGISTRY};

/// Logical combinators accepted at the top level of a filter
pub const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$not"];

/// Turn caller JSON into a filter document
///
/// `null` is an absent filter and matches everything. Any other non-object
/// is a `Validation` error. The filter's structure is checked here, so an
/// unknown operator is reported before any file is touched.
pub fn parse_filter(json: &serde_json::Value) -> Result<Document> {
    let filter = match json {
        serde_json::Value::Null => Document::new(),
        serde_json::Value::Object(_) => Document::from_json(json)?,
        _ => {
            return Err(BisonError::Validation(
                "Filter must be an object".to_string(),
            ))
        }
    };
    validate_filter(&filter)?;
    Ok(filter)
}

/// Structural check of a filter document without evaluating it
pub fn validate_filter(filter: &Document) -> Result<()> {
    for (key, value) in filter {
        if key.starts_with('$') {
            match key.as_str() {
                "$and" | "$or" => {
                    for sub in logical_operands(key, value)? {
                        validate_filter(sub)?;
                    }
                }
                "$not" => validate_filter(not_operand(value)?)?,
                other => return Err(BisonError::UnsupportedOperator(other.to_string())),
            }
        } else if let Some(condition) = operator_condition(value)? {
            validate_condition(condition)?;
        }
    }
    Ok(())
}

fn validate_condition(condition: &Document) -> Result<()> {
    for (op_name, operand) in condition {
        match op_name.as_str() {
            "$regex" | "$options" => {}
            "$not" => match operand {
                Value::Document(inner) => validate_condition(inner)?,
                _ => {
                    return Err(BisonError::Validation(
                        "$not on a field requires an operator document".to_string(),
                    ))
                }
            },
            name if OPERATOR_REGISTRY.contains_key(name) => {}
            name => return Err(BisonError::UnsupportedOperator(name.to_string())),
        }
    }
    Ok(())
}

/// Operand of `$and` / `$or`: an array of filter documents
pub(crate) fn logical_operands<'a>(name: &str, operand: &'a Value) -> Result<Vec<&'a Document>> {
    let items = operand
        .as_array()
        .ok_or_else(|| BisonError::Validation(format!("{} requires an array", name)))?;
    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                BisonError::Validation(format!("{} entries must be filter documents", name))
            })
        })
        .collect()
}

/// Operand of top-level `$not`: a single filter document
pub(crate) fn not_operand(operand: &Value) -> Result<&Document> {
    operand
        .as_document()
        .ok_or_else(|| BisonError::Validation("$not requires a filter document".to_string()))
}

/// Returns the operator sub-document when `value` is one (`{"$gt": 5}`),
/// `None` when it is a plain value compared by equality.
///
/// Mixing operator and plain keys is rejected.
pub(crate) fn operator_condition(value: &Value) -> Result<Option<&Document>> {
    let doc = match value {
        Value::Document(doc) if !doc.is_empty() => doc,
        _ => return Ok(None),
    };
    let operators = doc.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        Ok(None)
    } else if operators == doc.len() {
        Ok(Some(doc))
    } else {
        Err(BisonError::Validation(
            "Cannot mix operators and plain fields in one condition".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_null_is_empty() {
        assert!(parse_filter(&serde_json::Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        for bad in [json!([1]), json!("x"), json!(3)] {
            assert!(matches!(parse_filter(&bad), Err(BisonError::Validation(_))));
        }
    }

    #[test]
    fn test_unknown_operator_detected_upfront() {
        let err = parse_filter(&json!({"qty": {"$between": [1, 2]}})).unwrap_err();
        assert!(matches!(err, BisonError::UnsupportedOperator(ref op) if op == "$between"));

        let err = parse_filter(&json!({"$nor": [{"a": 1}]})).unwrap_err();
        assert!(matches!(err, BisonError::UnsupportedOperator(_)));

        let err = parse_filter(&json!({"$or": [{"a": {"$bogus": 1}}]})).unwrap_err();
        assert!(matches!(err, BisonError::UnsupportedOperator(_)));
    }

    #[test]
    fn test_logical_operand_shape() {
        assert!(matches!(
            parse_filter(&json!({"$and": {"a": 1}})),
            Err(BisonError::Validation(_))
        ));
        assert!(matches!(
            parse_filter(&json!({"$not": [1]})),
            Err(BisonError::Validation(_))
        ));
        assert!(parse_filter(&json!({"$not": {"a": {"$gt": 1}}})).is_ok());
    }

    #[test]
    fn test_mixed_condition_rejected() {
        let err = parse_filter(&json!({"a": {"$gt": 1, "b": 2}})).unwrap_err();
        assert!(matches!(err, BisonError::Validation(_)));
    }

    #[test]
    fn test_embedded_document_is_plain_value() {
        let filter = parse_filter(&json!({"meta": {"v": 1}})).unwrap();
        assert!(operator_condition(filter.get("meta").unwrap()).unwrap().is_none());
    }
}
