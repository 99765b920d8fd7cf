//! Update expressions
//!
//! An update is a document of operators (`$set`, `$inc`, `$unset`, `$push`),
//! each mapping top-level field names to operands. [`apply_update`] is pure:
//! it returns a new document and never touches its input.

use crate::document::{Document, ID_FIELD};
use crate::error::{BisonError, Result};
use crate::value::{values_equal, Value};

/// Supported update operators, in no particular order
pub const UPDATE_OPERATORS: [&str; 4] = ["$set", "$inc", "$unset", "$push"];

/// Turn caller JSON into an update document and check its structure
pub fn parse_update(json: &serde_json::Value) -> Result<Document> {
    if !json.is_object() {
        return Err(BisonError::Validation(
            "Update must be an object".to_string(),
        ));
    }
    let update = Document::from_json(json)?;
    validate_update(&update)?;
    Ok(update)
}

/// Every key must be a known operator whose operand is a document
pub fn validate_update(update: &Document) -> Result<()> {
    for (op_name, operand) in update {
        if !op_name.starts_with('$') {
            return Err(BisonError::Validation(format!(
                "Update keys must be operators, found field '{}'",
                op_name
            )));
        }
        if !UPDATE_OPERATORS.contains(&op_name.as_str()) {
            return Err(BisonError::UnsupportedOperator(op_name.clone()));
        }
        if operand.as_document().is_none() {
            return Err(BisonError::Validation(format!(
                "{} requires a document operand",
                op_name
            )));
        }
    }
    Ok(())
}

/// Apply an update expression, operators in the order they appear
///
/// `{}` returns an equal copy. Changing or removing `_id` is a
/// `Validation` error.
pub fn apply_update(document: &Document, update: &Document) -> Result<Document> {
    let mut result = document.clone();

    for (op_name, operand) in update {
        let fields = operand.as_document().ok_or_else(|| {
            BisonError::Validation(format!("{} requires a document operand", op_name))
        })?;

        match op_name.as_str() {
            "$set" => apply_set(&mut result, fields)?,
            "$inc" => apply_inc(&mut result, fields)?,
            "$unset" => apply_unset(&mut result, fields)?,
            "$push" => apply_push(&mut result, fields)?,
            other => return Err(BisonError::UnsupportedOperator(other.to_string())),
        }
    }

    Ok(result)
}

fn apply_set(document: &mut Document, fields: &Document) -> Result<()> {
    for (field, value) in fields {
        if field == ID_FIELD {
            let unchanged = document
                .get(ID_FIELD)
                .map(|current| values_equal(current, value))
                .unwrap_or(false);
            if !unchanged {
                return Err(BisonError::Validation("_id cannot be modified".to_string()));
            }
            continue;
        }
        document.insert(field, value.clone());
    }
    Ok(())
}

fn apply_inc(document: &mut Document, fields: &Document) -> Result<()> {
    for (field, amount) in fields {
        if !amount.is_number() {
            return Err(BisonError::Validation(format!(
                "$inc on '{}' requires a numeric operand, got {}",
                field,
                amount.type_name()
            )));
        }
        if field == ID_FIELD {
            return Err(BisonError::Validation("_id cannot be modified".to_string()));
        }

        let next = match document.get(field) {
            Some(current) if current.is_number() => add_numbers(current, amount),
            _ => amount.clone(),
        };
        document.insert(field, next);
    }
    Ok(())
}

/// Int + Int stays Int unless it overflows; anything involving a Double is a Double
fn add_numbers(current: &Value, amount: &Value) -> Value {
    match (current, amount) {
        (Value::Int(a), Value::Int(b)) => match a.checked_add(*b) {
            Some(sum) => Value::Int(sum),
            None => Value::Double(*a as f64 + *b as f64),
        },
        _ => Value::Double(current.as_f64().unwrap_or(0.0) + amount.as_f64().unwrap_or(0.0)),
    }
}

fn apply_unset(document: &mut Document, fields: &Document) -> Result<()> {
    for field in fields.keys() {
        if field == ID_FIELD {
            return Err(BisonError::Validation("_id cannot be removed".to_string()));
        }
        document.remove(field);
    }
    Ok(())
}

fn apply_push(document: &mut Document, fields: &Document) -> Result<()> {
    for (field, operand) in fields {
        if field == ID_FIELD {
            return Err(BisonError::Validation("_id cannot be modified".to_string()));
        }

        let additions = match operand {
            Value::Document(body) if body.len() == 1 && body.contains_key("$each") => {
                match body.get("$each") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => {
                        return Err(BisonError::Validation(
                            "$each requires an array".to_string(),
                        ))
                    }
                }
            }
            value => vec![value.clone()],
        };

        match document.get_mut(field) {
            Some(Value::Array(existing)) => existing.extend(additions),
            _ => {
                document.insert(field, Value::Array(additions));
            }
        }
    }
    Ok(())
}
