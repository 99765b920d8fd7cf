// src/aggregation.rs
// Aggregation pipeline over an already materialized result set

use crate::document::{Document, ID_FIELD};
use crate::error::{BisonError, Result};
use crate::projection::apply_projection;
use crate::query::{matches_filter, validate_filter};
use crate::value::{compare_values, sort_order, values_equal, Value};
use std::cmp::Ordering;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn aggregation_error(message: impl Into<String>) -> BisonError {
    BisonError::Aggregation(message.into())
}

/// `"$field"` -> `field`
fn parse_field_reference(value: &Value, op_name: &str) -> Result<String> {
    match value.as_str() {
        Some(s) if s.starts_with('$') && s.len() > 1 => Ok(s[1..].to_string()),
        Some(_) => Err(aggregation_error(format!(
            "{} field reference must start with $",
            op_name
        ))),
        None => Err(aggregation_error(format!(
            "{} must be a field reference",
            op_name
        ))),
    }
}

/// The single `{name: body}` entry of a stage or accumulator object
fn single_entry<'a>(value: &'a Value, what: &str) -> Result<(&'a String, &'a Value)> {
    let doc = value
        .as_document()
        .ok_or_else(|| aggregation_error(format!("{} must be an object", what)))?;
    let mut entries = doc.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(aggregation_error(format!(
            "{} must have exactly one operator",
            what
        ))),
    }
}

fn non_negative(value: &Value, stage: &str) -> Result<usize> {
    match value.as_i64() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(aggregation_error(format!(
            "{} must be a non-negative integer",
            stage
        ))),
    }
}

/// Keep the first extremum the comparator prefers; unordered values are skipped
fn compute_extremum(docs: &[Document], field: &str, wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in docs.iter().filter_map(|doc| doc.get_path(field)) {
        if value.is_null() {
            continue;
        }
        best = match best {
            None => Some(value),
            Some(current) if compare_values(value, current) == Some(wanted) => Some(value),
            keep => keep,
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Parsed aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Document),
    Project(Document),
    Group(GroupStage),
    Sort(Vec<(String, SortDirection)>),
    Skip(usize),
    Limit(usize),
}

#[derive(Debug, Clone)]
pub struct GroupStage {
    id: GroupId,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum GroupId {
    /// `"$city"`
    Field(String),
    /// Any constant, `null` included: one group for everything
    Constant(Value),
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    SumConstant(Value),
    SumField(String),
    Avg(String),
    Min(String),
    Max(String),
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl Pipeline {
    /// Parse a JSON array of stages. An empty array is a no-op pipeline.
    pub fn from_json(pipeline_json: &serde_json::Value) -> Result<Self> {
        let stages_json = pipeline_json
            .as_array()
            .ok_or_else(|| aggregation_error("Pipeline must be an array"))?;

        let stages = stages_json
            .iter()
            .map(|stage| Stage::from_value(&Value::from(stage.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run the stages in order
    pub fn execute(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        for stage in &self.stages {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    fn from_value(stage: &Value) -> Result<Self> {
        let (name, body) = single_entry(stage, "Stage")?;
        match name.as_str() {
            "$match" => {
                let filter = body
                    .as_document()
                    .ok_or_else(|| aggregation_error("$match must be an object"))?;
                validate_filter(filter)?;
                Ok(Stage::Match(filter.clone()))
            }
            "$project" => body
                .as_document()
                .map(|projection| Stage::Project(projection.clone()))
                .ok_or_else(|| aggregation_error("$project must be an object")),
            "$group" => Ok(Stage::Group(GroupStage::from_value(body)?)),
            "$sort" => {
                let fields = body
                    .as_document()
                    .ok_or_else(|| aggregation_error("$sort must be an object"))?;
                let mut order = Vec::new();
                for (field, direction) in fields {
                    let direction = match direction.as_i64() {
                        Some(1) => SortDirection::Ascending,
                        Some(-1) => SortDirection::Descending,
                        _ => return Err(aggregation_error("Sort direction must be 1 or -1")),
                    };
                    order.push((field.clone(), direction));
                }
                Ok(Stage::Sort(order))
            }
            "$skip" => Ok(Stage::Skip(non_negative(body, "$skip")?)),
            "$limit" => Ok(Stage::Limit(non_negative(body, "$limit")?)),
            other => Err(aggregation_error(format!(
                "Unknown pipeline stage: {}",
                other
            ))),
        }
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        match self {
            Stage::Match(filter) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches_filter(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                Ok(kept)
            }
            Stage::Project(projection) => Ok(docs
                .iter()
                .map(|doc| apply_projection(doc, projection))
                .collect()),
            Stage::Group(group) => Ok(group.execute(docs)),
            Stage::Sort(order) => Ok(sort_documents(docs, order)),
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
        }
    }
}

/// Stable multi-key sort; missing fields sort first, mixed types rank by type
fn sort_documents(mut docs: Vec<Document>, order: &[(String, SortDirection)]) -> Vec<Document> {
    docs.sort_by(|a, b| {
        for (field, direction) in order {
            let cmp = match (a.get_path(field), b.get_path(field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => sort_order(x, y),
            };
            let cmp = match direction {
                SortDirection::Ascending => cmp,
                SortDirection::Descending => cmp.reverse(),
            };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
    docs
}

impl GroupStage {
    fn from_value(body: &Value) -> Result<Self> {
        let fields = body
            .as_document()
            .ok_or_else(|| aggregation_error("$group must be an object"))?;

        let id = match fields.get(ID_FIELD) {
            Some(Value::String(s)) if s.starts_with('$') => {
                GroupId::Field(parse_field_reference(&Value::from(s.as_str()), "$group _id")?)
            }
            Some(constant) => GroupId::Constant(constant.clone()),
            None => return Err(aggregation_error("Group stage must have an _id field")),
        };

        let mut accumulators = Vec::new();
        for (field, value) in fields {
            if field == ID_FIELD {
                continue;
            }
            accumulators.push((field.clone(), Accumulator::from_value(value)?));
        }
        Ok(GroupStage { id, accumulators })
    }

    fn key_of(&self, doc: &Document) -> Value {
        match &self.id {
            GroupId::Field(field) => doc.get_path(field).cloned().unwrap_or(Value::Null),
            GroupId::Constant(value) => value.clone(),
        }
    }

    /// Groups come out in the order their key was first seen
    fn execute(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut groups: Vec<(Value, Vec<Document>)> = Vec::new();
        for doc in docs {
            let key = self.key_of(&doc);
            match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
                Some((_, members)) => members.push(doc),
                None => groups.push((key, vec![doc])),
            }
        }

        groups
            .into_iter()
            .map(|(key, members)| {
                let mut out = Document::new().with(ID_FIELD, key);
                for (field, accumulator) in &self.accumulators {
                    out.insert(field, accumulator.compute(&members));
                }
                out
            })
            .collect()
    }
}

impl Accumulator {
    fn from_value(body: &Value) -> Result<Self> {
        let (op, value) = single_entry(body, "Accumulator")?;
        match op.as_str() {
            "$sum" => match value {
                Value::String(_) => Ok(Accumulator::SumField(parse_field_reference(value, "$sum")?)),
                v if v.is_number() => Ok(Accumulator::SumConstant(v.clone())),
                _ => Err(aggregation_error("$sum must be a number or field reference")),
            },
            "$avg" => Ok(Accumulator::Avg(parse_field_reference(value, "$avg")?)),
            "$min" => Ok(Accumulator::Min(parse_field_reference(value, "$min")?)),
            "$max" => Ok(Accumulator::Max(parse_field_reference(value, "$max")?)),
            "$count" => Ok(Accumulator::Count),
            other => Err(aggregation_error(format!("Unknown accumulator: {}", other))),
        }
    }

    fn compute(&self, docs: &[Document]) -> Value {
        match self {
            Accumulator::Count => Value::Int(docs.len() as i64),
            Accumulator::SumConstant(n) => match n {
                Value::Int(i) => Value::Int(i.saturating_mul(docs.len() as i64)),
                other => Value::Double(other.as_f64().unwrap_or(0.0) * docs.len() as f64),
            },
            Accumulator::SumField(field) => {
                let mut sum_int: i64 = 0;
                let mut sum_float = 0.0;
                let mut has_float = false;
                for value in docs.iter().filter_map(|doc| doc.get_path(field)) {
                    match value {
                        Value::Int(n) => sum_int = sum_int.saturating_add(*n),
                        Value::Double(f) => {
                            sum_float += f;
                            has_float = true;
                        }
                        _ => {}
                    }
                }
                if has_float {
                    Value::Double(sum_float + sum_int as f64)
                } else {
                    Value::Int(sum_int)
                }
            }
            Accumulator::Avg(field) => {
                let numbers: Vec<f64> = docs
                    .iter()
                    .filter_map(|doc| doc.get_path(field).and_then(Value::as_f64))
                    .collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    Value::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            Accumulator::Min(field) => compute_extremum(docs, field, Ordering::Less),
            Accumulator::Max(field) => compute_extremum(docs, field, Ordering::Greater),
        }
    }
}

/// Parse and run a pipeline in one step
pub fn aggregate(docs: Vec<Document>, pipeline_json: &serde_json::Value) -> Result<Vec<Document>> {
    Pipeline::from_json(pipeline_json)?.execute(docs)
}
