//! Field path expressions
//!
//! Rule conditions and actions address context fields through an
//! explicit dot-path type resolved against the typed metadata map,
//! rather than reflective traversal of arbitrary objects.

use engram_core::{Error, Metadata, Result, Value};
use std::collections::HashMap;

/// A parsed dot-path expression, e.g. `user.settings.theme`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dot-path, rejecting empty paths and empty segments
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::RuleValidation("Empty field path".to_string()));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::RuleValidation(format!(
                "Field path has an empty segment: {}",
                path
            )));
        }
        Ok(Self { segments })
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolve the path against a context, None if any hop is missing
    pub fn resolve<'a>(&self, context: &'a Metadata) -> Option<&'a Value> {
        let mut current = context.get(&self.segments[0])?;
        for segment in &self.segments[1..] {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Set the value at the path, creating intermediate maps
    ///
    /// Non-map intermediates are replaced by maps.
    pub fn set(&self, context: &mut Metadata, value: Value) {
        let (first, rest) = (&self.segments[0], &self.segments[1..]);
        if rest.is_empty() {
            context.set(first.clone(), value);
            return;
        }

        if !matches!(context.get(first), Some(Value::Map(_))) {
            context.set(first.clone(), Value::Map(Default::default()));
        }
        if let Some(Value::Map(map)) = context.get_mut(first) {
            set_in_map(map, rest, value);
        }
    }

    /// Remove the value at the path, returning it if present
    pub fn remove(&self, context: &mut Metadata) -> Option<Value> {
        let (first, rest) = (&self.segments[0], &self.segments[1..]);
        if rest.is_empty() {
            return context.remove(first);
        }

        let mut current = context.get_mut(first)?;
        for segment in &rest[..rest.len() - 1] {
            current = match current {
                Value::Map(map) => map.get_mut(segment)?,
                _ => return None,
            };
        }

        match current {
            Value::Map(map) => map.remove(&rest[rest.len() - 1]),
            _ => None,
        }
    }
}

fn set_in_map(map: &mut HashMap<String, Value>, segments: &[String], value: Value) {
    let (first, rest) = (&segments[0], &segments[1..]);
    if rest.is_empty() {
        map.insert(first.clone(), value);
        return;
    }

    let entry = map
        .entry(first.clone())
        .or_insert_with(|| Value::Map(Default::default()));
    if !matches!(entry, Value::Map(_)) {
        *entry = Value::Map(Default::default());
    }
    if let Value::Map(inner) = entry {
        set_in_map(inner, rest, value);
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Resolve a condition field against a context, expanding reserved
/// tokens
///
/// Reserved tokens: `$now` (RFC 3339 string), `$timestamp` (millis),
/// `$random` (float in [0, 1)), `$uuid` (fresh v4 string), and
/// `$context.<path>` (explicit context path). Any other field is a
/// plain context path.
pub fn resolve_field(context: &Metadata, field: &str) -> Result<Option<Value>> {
    match field {
        "$now" => Ok(Some(Value::String(chrono::Utc::now().to_rfc3339()))),
        "$timestamp" => Ok(Some(Value::Int(chrono::Utc::now().timestamp_millis()))),
        "$random" => Ok(Some(Value::Float(rand::random::<f64>()))),
        "$uuid" => Ok(Some(Value::String(uuid::Uuid::new_v4().to_string()))),
        _ => {
            let path = if let Some(rest) = field.strip_prefix("$context.") {
                rest
            } else if field.starts_with('$') {
                return Err(Error::RuleEvaluation(format!(
                    "Unknown reserved token: {}",
                    field
                )));
            } else {
                field
            };
            Ok(FieldPath::parse(path)?.resolve(context).cloned())
        }
    }
}
