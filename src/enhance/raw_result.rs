use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Null,
    Bool,
    Number,
}

impl ScalarKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Number => "number",
        }
    }
}

/// Result value as returned by a backend, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInferenceResult {
    Reference(String),
    Sequence(Vec<RawInferenceResult>),
    Record(BTreeMap<String, RawInferenceResult>),
    Scalar(ScalarKind),
}

impl RawInferenceResult {
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Reference(_) => "string",
            Self::Sequence(_) => "sequence",
            Self::Record(_) => "record",
            Self::Scalar(kind) => kind.as_str(),
        }
    }
}

impl From<Value> for RawInferenceResult {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Reference(s),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Record(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
            Value::Null => Self::Scalar(ScalarKind::Null),
            Value::Bool(_) => Self::Scalar(ScalarKind::Bool),
            Value::Number(_) => Self::Scalar(ScalarKind::Number),
        }
    }
}

impl From<&str> for RawInferenceResult {
    fn from(value: &str) -> Self {
        Self::Reference(value.to_string())
    }
}
