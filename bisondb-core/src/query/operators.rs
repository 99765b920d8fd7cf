// src/query/operators.rs
//! Filter operators
//!
//! Each field operator is a separate type implementing [`OperatorMatcher`],
//! registered by name in [`OPERATOR_REGISTRY`]. [`matches_filter`] walks the
//! filter document, handles the logical combinators itself and dispatches
//! field conditions through the registry.
//!
//! ```text
//! matches_filter
//!     ├── $and / $or / $not ──→ recurse
//!     └── field ──→ condition ──→ OPERATOR_REGISTRY[$op].matches(..)
//!                 └── plain value ──→ EqOperator
//! ```
//!
//! Tombstoned documents never reach this module; callers filter them out.

use crate::document::Document;
use crate::error::{BisonError, Result};
use crate::query::{logical_operands, not_operand, operator_condition};
use crate::value::{compare_values, values_equal, Value};
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::NonZeroUsize;

// ============================================================================
// REGEX CACHE
// ============================================================================

const REGEX_CACHE_SIZE: usize = 128;

lazy_static! {
    /// Compiled patterns keyed by "options:pattern"
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> = Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN)
    ));
}

/// Prefix the pattern with inline flags built from `$options`
/// (`i`, `m`, `s`, `x`; anything else is ignored)
fn build_regex_pattern(pattern: &str, options: &str) -> String {
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    }
}

fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}:{}", options, pattern);
    if let Some(regex) = REGEX_CACHE.lock().get(&cache_key) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(&build_regex_pattern(pattern, options)).map_err(|e| {
        BisonError::Validation(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;
    REGEX_CACHE.lock().put(cache_key, regex.clone());
    Ok(regex)
}

/// Translate a SQL `LIKE` pattern into an anchored regex.
/// `%` matches any run of characters; everything else is literal.
fn like_to_regex(pattern: &str) -> String {
    let body: Vec<String> = pattern.split('%').map(regex::escape).collect();
    format!("^{}$", body.join(".*"))
}

/// A string field (or any string element of an array field) matches
fn any_string_matches(doc_value: Option<&Value>, regex: &Regex) -> bool {
    match doc_value {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().map(|s| regex.is_match(s)).unwrap_or(false)),
        _ => false,
    }
}

fn regex_matches(doc_value: Option<&Value>, operand: &Value, options: &str) -> Result<bool> {
    let pattern = operand
        .as_str()
        .ok_or_else(|| BisonError::Validation("$regex requires a string pattern".to_string()))?;
    let regex = get_or_compile_regex(pattern, options)?;
    Ok(any_string_matches(doc_value, &regex))
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// A field-level filter operator
///
/// ```
/// use bisondb_core::query::operators::{EqOperator, OperatorMatcher};
/// use bisondb_core::Value;
///
/// let matched = EqOperator.matches(Some(&Value::from("Alice")), &Value::from("Alice")).unwrap();
/// assert!(matched);
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Operator name as written in filters (`"$eq"`, `"$gt"`, ...)
    fn name(&self) -> &'static str;

    /// Evaluate against a field value (`None` when the field is missing)
    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// `$eq`: identity-aware equality; an array field also matches when any
/// element equals the operand
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(match doc_value {
            None => false,
            Some(v) => {
                values_equal(v, operand)
                    || matches!(v, Value::Array(items) if items.iter().any(|e| values_equal(e, operand)))
            }
        })
    }
}

/// `$ne`: negation of `$eq`; a missing field is "not equal"
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(!EqOperator.matches(doc_value, operand)?)
    }
}

pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(compare_with_predicate(doc_value, operand, |ord| {
            ord == Ordering::Greater
        }))
    }
}

pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(compare_with_predicate(doc_value, operand, |ord| {
            ord != Ordering::Less
        }))
    }
}

pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(compare_with_predicate(doc_value, operand, |ord| {
            ord == Ordering::Less
        }))
    }
}

pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(compare_with_predicate(doc_value, operand, |ord| {
            ord != Ordering::Greater
        }))
    }
}

// ============================================================================
// MEMBERSHIP OPERATORS
// ============================================================================

/// `$in`: the field (or one of its elements) equals a member of the operand
/// array. A non-array operand has no members and never matches.
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        let members = match operand {
            Value::Array(members) => members,
            _ => return Ok(false),
        };
        let Some(v) = doc_value else {
            return Ok(false);
        };
        let contains = |candidate: &Value| members.iter().any(|m| values_equal(candidate, m));
        Ok(contains(v) || matches!(v, Value::Array(items) if items.iter().any(&contains)))
    }
}

/// `$nin`: negation of `$in`; a non-array operand matches everything
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(!InOperator.matches(doc_value, operand)?)
    }
}

// ============================================================================
// PATTERN OPERATORS
// ============================================================================

/// `$like`: SQL-style pattern over the whole string, `%` is a wildcard
pub struct LikeOperator;

impl OperatorMatcher for LikeOperator {
    fn name(&self) -> &'static str {
        "$like"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        like_matches(doc_value, operand, "s")
    }
}

/// `$ilike`: case-insensitive `$like`
pub struct ILikeOperator;

impl OperatorMatcher for ILikeOperator {
    fn name(&self) -> &'static str {
        "$ilike"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        like_matches(doc_value, operand, "is")
    }
}

fn like_matches(doc_value: Option<&Value>, operand: &Value, options: &str) -> Result<bool> {
    let Some(pattern) = operand.as_str() else {
        return Ok(false);
    };
    let regex = get_or_compile_regex(&like_to_regex(pattern), options)?;
    Ok(any_string_matches(doc_value, &regex))
}

/// `$regex` without `$options`; with options the condition walker calls
/// [`regex_matches`] directly
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        regex_matches(doc_value, operand, "")
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// `$exists`: `{field: {$exists: true}}` requires presence, `false` absence
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> Result<bool> {
        Ok(doc_value.is_some() == operand.is_truthy())
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Field operators by name. Built once, immutable afterwards.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let operators: Vec<Box<dyn OperatorMatcher>> = vec![
            Box::new(EqOperator),
            Box::new(NeOperator),
            Box::new(GtOperator),
            Box::new(GteOperator),
            Box::new(LtOperator),
            Box::new(LteOperator),
            Box::new(InOperator),
            Box::new(NinOperator),
            Box::new(LikeOperator),
            Box::new(ILikeOperator),
            Box::new(RegexOperator),
            Box::new(ExistsOperator),
        ];
        operators.into_iter().map(|op| (op.name(), op)).collect()
    };
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Ordering comparison with array element matching. Values of different
/// kinds are unordered and never match.
fn compare_with_predicate<F>(doc_value: Option<&Value>, operand: &Value, predicate: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    let test = |v: &Value| compare_values(v, operand).map(&predicate).unwrap_or(false);
    match doc_value {
        None => false,
        Some(v) => test(v) || matches!(v, Value::Array(items) if items.iter().any(&test)),
    }
}

/// Every operator of a condition sub-document must match
fn matches_condition(doc_value: Option<&Value>, condition: &Document) -> Result<bool> {
    let options = condition
        .get("$options")
        .and_then(Value::as_str)
        .unwrap_or("");

    for (op_name, operand) in condition {
        let matched = match op_name.as_str() {
            // consumed together with $regex
            "$options" => continue,
            "$regex" => regex_matches(doc_value, operand, options)?,
            "$not" => {
                let inner = operand.as_document().ok_or_else(|| {
                    BisonError::Validation(
                        "$not on a field requires an operator document".to_string(),
                    )
                })?;
                !matches_condition(doc_value, inner)?
            }
            name => {
                let operator = OPERATOR_REGISTRY
                    .get(name)
                    .ok_or_else(|| BisonError::UnsupportedOperator(name.to_string()))?;
                operator.matches(doc_value, operand)?
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate a filter against a document
///
/// An empty filter matches everything. `$and` and `$or` short-circuit.
/// Field keys may use dot notation. An unknown operator fails with
/// `UnsupportedOperator`.
pub fn matches_filter(document: &Document, filter: &Document) -> Result<bool> {
    for (key, value) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in logical_operands(key, value)? {
                    if !matches_filter(document, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in logical_operands(key, value)? {
                    if matches_filter(document, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$not" => !matches_filter(document, not_operand(value)?)?,
            op if op.starts_with('$') => {
                return Err(BisonError::UnsupportedOperator(op.to_string()))
            }
            field => {
                let doc_value = document.get_path(field);
                match operator_condition(value)? {
                    Some(condition) => matches_condition(doc_value, condition)?,
                    None => EqOperator.matches(doc_value, value)?,
                }
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}
