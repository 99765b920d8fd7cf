//! Dynamically-typed document values
//!
//! [`Value`] is the tagged union stored in every document field. The filter
//! and update evaluators pattern-match on it instead of coercing types at
//! runtime. This module also owns the two comparison primitives they share:
//!
//! - [`compare_values`]: native ordering, defined only between values of the
//!   same ordered kind (numbers, strings, booleans, identities, binary)
//! - [`values_equal`]: identity-aware equality, where an [`ObjectId`] equals
//!   its 24-character hex string in both directions

use crate::document::Document;
use crate::error::{BisonError, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use uuid::Uuid;

/// A field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Document(Document),
    ObjectId(ObjectId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of `Int` and `Double`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Value::ObjectId(oid) => Some(oid),
            _ => None,
        }
    }

    /// Truthiness used by projections: `true`, non-zero numbers and
    /// non-empty strings select a field
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Double(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
            Value::ObjectId(_) => "objectId",
        }
    }

    /// Convert to JSON. Identities become `{"$oid": "<hex>"}` and binary
    /// becomes `{"$binary": "<hex>"}`; non-finite doubles become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Double(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Binary(bytes) => {
                let mut map = serde_json::Map::new();
                map.insert("$binary".to_string(), Json::String(encode_hex(bytes)));
                Json::Object(map)
            }
            Value::Array(arr) => Json::Array(arr.iter().map(Value::to_json).collect()),
            Value::Document(doc) => doc.to_json(),
            Value::ObjectId(oid) => {
                let mut map = serde_json::Map::new();
                map.insert("$oid".to_string(), Json::String(oid.to_hex()));
                Json::Object(map)
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                if map.len() == 1 {
                    if let Some(Json::String(hex)) = map.get("$oid") {
                        if let Ok(oid) = ObjectId::parse_str(hex) {
                            return Value::ObjectId(oid);
                        }
                    }
                    if let Some(Json::String(hex)) = map.get("$binary") {
                        if let Some(bytes) = decode_hex(hex) {
                            return Value::Binary(bytes);
                        }
                    }
                }
                Value::Document(Document::from_json_map(map))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Binary(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Value::Array(arr)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

impl From<ObjectId> for Value {
    fn from(oid: ObjectId) -> Self {
        Value::ObjectId(oid)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// ============================================================================
// COMPARISON
// ============================================================================

/// Native ordering between two values
///
/// Returns `None` for kinds without an ordering relation to each other
/// (e.g. string vs number, arrays, documents, null).
///
/// ```
/// use bisondb_core::value::{compare_values, Value};
/// use std::cmp::Ordering;
///
/// assert_eq!(compare_values(&Value::Int(10), &Value::Double(5.5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&Value::from("a"), &Value::from("b")), Some(Ordering::Less));
/// assert_eq!(compare_values(&Value::from("a"), &Value::Int(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::ObjectId(x), Value::ObjectId(y)) => Some(x.cmp(y)),
        (Value::Binary(x), Value::Binary(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Rank of a value's type in [`sort_order`]
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) | Value::Double(_) => 1,
        Value::String(_) => 2,
        Value::Document(_) => 3,
        Value::Array(_) => 4,
        Value::Binary(_) => 5,
        Value::ObjectId(_) => 6,
        Value::Bool(_) => 7,
    }
}

/// Total order for sorting mixed-type values
///
/// Values rank by type first (null, numbers, strings, documents, arrays,
/// binary, identities, booleans), then by content. Numbers compare as
/// `f64` with `total_cmp`, so `NaN` has a fixed place.
pub fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            let x = a.as_f64().unwrap_or(0.0);
            let y = b.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::ObjectId(x), Value::ObjectId(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| sort_order(l, r))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Document(x), Value::Document(y)) => x
            .iter()
            .zip(y.iter())
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| sort_order(lv, rv)))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Null, Value::Null) => Ordering::Equal,
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Identity-aware deep equality
///
/// Numbers compare by numeric value across `Int`/`Double`, and an
/// `ObjectId` equals a string holding its hex form (either side).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::ObjectId(oid), Value::String(s)) | (Value::String(s), Value::ObjectId(oid)) => {
            ObjectId::parse_str(s).map(|parsed| parsed == *oid).unwrap_or(false)
        }
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            compare_values(a, b) == Some(Ordering::Equal)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Document(x), Value::Document(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, l)| y.get(key).map(|r| values_equal(l, r)).unwrap_or(false))
        }
        _ => a == b,
    }
}

// ============================================================================
// OBJECT ID
// ============================================================================

lazy_static! {
    /// Per-process random component of generated identities
    static ref PROCESS_UNIQUE: [u8; 5] = {
        let seed = Uuid::new_v4();
        let mut bytes = [0u8; 5];
        bytes.copy_from_slice(&seed.as_bytes()[..5]);
        bytes
    };

    /// Monotonic counter, seeded randomly so restarts do not replay ids
    static ref OID_COUNTER: AtomicU32 = {
        let seed = Uuid::new_v4();
        let b = seed.as_bytes();
        AtomicU32::new(u32::from_be_bytes([0, b[8], b[9], b[10]]))
    };
}

/// Opaque 12-byte surrogate identity
///
/// Layout: 4-byte big-endian creation time in seconds, 5 process-unique
/// random bytes, 3-byte big-endian counter. Ordering follows creation time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh identity
    pub fn new() -> Self {
        let secs = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let counter = OID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        ObjectId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parse a 24-character hex string (case-insensitive)
    pub fn parse_str(s: &str) -> Result<Self> {
        if s.len() != 24 {
            return Err(BisonError::Validation(format!(
                "ObjectId must be 24 hex characters, got {}",
                s.len()
            )));
        }
        let bytes = decode_hex(s)
            .ok_or_else(|| BisonError::Validation(format!("Invalid ObjectId hex: {}", s)))?;
        let mut out = [0u8; 12];
        out.copy_from_slice(&bytes);
        Ok(ObjectId(out))
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    /// Creation time embedded in the identity
    pub fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        chrono::DateTime::from_timestamp(secs as i64, 0).unwrap_or_default()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = BisonError;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::parse_str(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
