//! Model response normalizer.
//!
//! Turns raw model text into a validated task list:
//! - strips Markdown code fences and surrounding prose;
//! - parses JSON, accepting a bare array or an object wrapping it under
//!   `plan` or `tasks`;
//! - validates and coerces each task's fields;
//! - checks ids are unique, dependencies exist, and the graph is acyclic.
//!
//! Task order is preserved as the model returned it.

use serde_json::{Map, Value};
use thiserror::Error;

use smartplan_db::models::PlannedTask;

use super::graph::TaskGraph;

/// Keys under which a wrapping object may carry the task array.
const ENVELOPE_KEYS: [&str; 2] = ["plan", "tasks"];

/// Why a model response could not be turned into a plan.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("no JSON value found in model output ({0})")]
    Json(String),

    #[error("expected a JSON array of task objects, got {0}")]
    NotAnArray(&'static str),

    #[error("plan must contain at least one task")]
    NoTasks,

    #[error("task at index {index} is not an object")]
    NotAnObject { index: usize },

    #[error("task at index {index} is missing required field {field:?}")]
    MissingField { index: usize, field: &'static str },

    #[error("task at index {index} has an invalid {field:?}: {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("task {task:?} has invalid duration {value} (must be a positive number of days)")]
    InvalidDuration { task: String, value: String },

    #[error("duplicate task id: {0:?}")]
    DuplicateTaskId(String),

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),
}

/// Parse and validate raw model output.
pub fn normalize_response(raw: &str) -> Result<Vec<PlannedTask>, NormalizeError> {
    let value = extract_json(raw)?;
    let items = task_array(value)?;
    if items.is_empty() {
        return Err(NormalizeError::NoTasks);
    }

    let tasks = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(obj) => parse_task(index, &obj),
            _ => Err(NormalizeError::NotAnObject { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    TaskGraph::build(&tasks)?.topological_order()?;

    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Locating the JSON body
// ---------------------------------------------------------------------------

/// Remove a leading ```` ``` ```` / ```` ```json ```` fence and a trailing
/// ```` ``` ```` fence.
fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let rest = match rest.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
            _ => rest,
        };
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim_end();
    }
    s
}

/// Slice from the first `open` to the last `close`, inclusive.
fn delimited(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Find and parse the JSON value in `raw`.
///
/// Tries the whole fence-stripped text, then the outermost `[...]`, then the
/// outermost `{...}`; the first candidate that parses wins.
fn extract_json(raw: &str) -> Result<Value, NormalizeError> {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err(NormalizeError::Json("empty response".to_string()));
    }

    let first_error = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    [delimited(cleaned, '[', ']'), delimited(cleaned, '{', '}')]
        .into_iter()
        .flatten()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .ok_or(NormalizeError::Json(first_error))
}

/// Unwrap the task array from the top-level value.
fn task_array(value: Value) -> Result<Vec<Value>, NormalizeError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => ENVELOPE_KEYS
            .iter()
            .find_map(|key| match obj.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or(NormalizeError::NotAnArray("an object")),
        other => Err(NormalizeError::NotAnArray(type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Field coercion
// ---------------------------------------------------------------------------

/// First present, non-null value among `keys`.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Task ids may be strings or integers; integers become decimal strings.
fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty() && !has_nul(s)),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// PostgreSQL text and JSONB columns cannot hold U+0000.
fn has_nul(s: &str) -> bool {
    s.contains('\0')
}

fn nul_field(index: usize, field: &'static str) -> NormalizeError {
    NormalizeError::InvalidField {
        index,
        field,
        reason: "contains a NUL character".to_string(),
    }
}

fn parse_task(index: usize, obj: &Map<String, Value>) -> Result<PlannedTask, NormalizeError> {
    let id_value = field(obj, &["id", "task_id"]).ok_or(NormalizeError::MissingField {
        index,
        field: "id",
    })?;
    let id = coerce_id(id_value).ok_or_else(|| NormalizeError::InvalidField {
        index,
        field: "id",
        reason: format!("expected a non-empty string or integer without NUL, got {id_value}"),
    })?;

    let title = match field(obj, &["title", "task_name"]) {
        None => {
            return Err(NormalizeError::MissingField {
                index,
                field: "title",
            });
        }
        Some(Value::String(s)) if has_nul(s) => return Err(nul_field(index, "title")),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(other) => {
            return Err(NormalizeError::InvalidField {
                index,
                field: "title",
                reason: format!("expected a non-empty string, got {other}"),
            });
        }
    };

    let duration_value = field(obj, &["duration_days"]).ok_or(NormalizeError::MissingField {
        index,
        field: "duration_days",
    })?;
    let duration_days = match duration_value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|d| d.is_finite() && *d > 0.0)
    .ok_or_else(|| NormalizeError::InvalidDuration {
        task: id.clone(),
        value: duration_value.to_string(),
    })?;

    let depends_on = match field(obj, &["depends_on", "dependencies"]) {
        None => Vec::new(),
        Some(Value::Array(items)) => {
            let mut deps: Vec<String> = Vec::with_capacity(items.len());
            for item in items {
                let dep = coerce_id(item).ok_or_else(|| NormalizeError::InvalidField {
                    index,
                    field: "depends_on",
                    reason: format!("expected task ids, got {item}"),
                })?;
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
            deps
        }
        Some(other) => {
            return Err(NormalizeError::InvalidField {
                index,
                field: "depends_on",
                reason: format!("expected an array of task ids, got {other}"),
            });
        }
    };

    let description = match field(obj, &["description"]) {
        Some(Value::String(s)) if has_nul(s) => return Err(nul_field(index, "description")),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };

    Ok(PlannedTask {
        id,
        title,
        duration_days,
        depends_on,
        description,
    })
}
