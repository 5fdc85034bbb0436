//! Flow messages and typed node properties.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Work item passed between nodes: a JSON object carrying a `_msgid`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowMessage(Map<String, Value>);

impl FlowMessage {
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert("_msgid".into(), Value::String(Uuid::new_v4().to_string()));
        Self(fields)
    }

    pub fn with_payload(payload: Value) -> Self {
        let mut msg = Self::new();
        msg.0.insert("payload".into(), payload);
        msg
    }

    /// Wraps a JSON object, generating `_msgid` when it is missing.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            bail!("flow message must be a JSON object");
        };
        if !fields.contains_key("_msgid") {
            fields.insert("_msgid".into(), Value::String(Uuid::new_v4().to_string()));
        }
        Ok(Self(fields))
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("_msgid").and_then(Value::as_str)
    }

    pub fn payload(&self) -> Option<&Value> {
        self.0.get("payload")
    }

    /// Reads a dotted path such as `payload.records` (a leading `msg.` is
    /// ignored). Array elements are addressed by index: `records.0.Id`.
    pub fn get_property(&self, path: &str) -> Option<&Value> {
        let mut parts = split_path(path)?.into_iter();
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            current = step(current, part)?;
        }
        Some(current)
    }

    /// Writes `value` at a dotted path, creating missing intermediate
    /// objects. Fails when an intermediate exists but is not an object.
    pub fn set_property(&mut self, path: &str, value: Value) -> Result<()> {
        let Some(parts) = split_path(path) else {
            bail!("invalid message property path: '{}'", path);
        };
        let (last, parents) = match parts.split_last() {
            Some(split) => split,
            None => bail!("invalid message property path: '{}'", path),
        };

        let mut target = &mut self.0;
        for part in parents {
            let entry = target
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            target = match entry {
                Value::Object(map) => map,
                _ => bail!("cannot set '{}': '{}' is not an object", path, part),
            };
        }
        target.insert(last.to_string(), value);
        Ok(())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Default for FlowMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a dotted path inside an arbitrary JSON value.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = step(current, part)?;
    }
    Some(current)
}

fn step<'a>(value: &'a Value, part: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn split_path(path: &str) -> Option<Vec<&str>> {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix("msg.").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts)
}

/// Where a node property takes its value from.
///
/// Written in configuration as `{ type = "msg", value = "payload.soql" }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum NodeProperty {
    Str(String),
    Msg(String),
    Env(String),
    Json(Value),
}

impl NodeProperty {
    /// Value of the property for `msg`; `None` when the source is missing.
    pub fn evaluate(&self, msg: &FlowMessage) -> Option<Value> {
        match self {
            NodeProperty::Str(s) => Some(Value::String(s.clone())),
            NodeProperty::Msg(path) => msg.get_property(path).cloned(),
            NodeProperty::Env(name) => std::env::var(name).ok().map(Value::String),
            NodeProperty::Json(v) => Some(v.clone()),
        }
    }

    /// Like [`Self::evaluate`] but only non-empty strings count.
    pub fn evaluate_string(&self, msg: &FlowMessage) -> Option<String> {
        match self.evaluate(msg)? {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }
}

impl Default for NodeProperty {
    fn default() -> Self {
        NodeProperty::Str(String::new())
    }
}
