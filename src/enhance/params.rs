use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    String,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "an integer",
            Self::Float => "a number",
            Self::Bool => "a boolean",
            Self::String => "a string",
        }
    }
}

/// One named option a backend profile accepts, in the order the backend expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParamValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(v) => Value::from(*v),
            Self::Float(v) => Value::from(*v),
            Self::Bool(v) => Value::Bool(*v),
            Self::Text(v) => Value::String(v.clone()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParameterError {
    #[error("Field '{name}' must be {expected}")]
    InvalidType { name: String, expected: &'static str },
    #[error("Field '{name}' must be between {min} and {max}")]
    OutOfRange { name: String, min: String, max: String },
    #[error("Field '{name}' must be one of: {choices}")]
    NotAChoice { name: String, choices: String },
    #[error("parameter '{name}' has an invalid default: {message}")]
    InvalidDefault { name: String, message: String },
}

impl ParamSpec {
    pub fn default_value(&self) -> Result<ParamValue, ParameterError> {
        let value = match (self.kind, &self.default) {
            (ParamKind::Int, Value::Number(n)) => n.as_i64().map(ParamValue::Int),
            (ParamKind::Float, Value::Number(n)) => n.as_f64().map(ParamValue::Float),
            (ParamKind::Bool, Value::Bool(b)) => Some(ParamValue::Bool(*b)),
            (ParamKind::String, Value::String(s)) => Some(ParamValue::Text(s.clone())),
            _ => None,
        }
        .ok_or_else(|| ParameterError::InvalidDefault {
            name: self.name.clone(),
            message: format!("expected {}", self.kind.as_str()),
        })?;
        self.check(value).map_err(|error| ParameterError::InvalidDefault {
            name: self.name.clone(),
            message: error.to_string(),
        })
    }

    pub fn parse_form_value(&self, raw: &str) -> Result<ParamValue, ParameterError> {
        let raw = raw.trim();
        let parsed = match self.kind {
            ParamKind::Int => raw.parse::<i64>().ok().map(ParamValue::Int),
            ParamKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Float),
            ParamKind::Bool => parse_bool_flag(raw).map(ParamValue::Bool),
            ParamKind::String => Some(ParamValue::Text(raw.to_string())),
        }
        .ok_or_else(|| ParameterError::InvalidType {
            name: self.name.clone(),
            expected: self.kind.as_str(),
        })?;
        self.check(parsed)
    }

    fn check(&self, value: ParamValue) -> Result<ParamValue, ParameterError> {
        if let Some(number) = value.as_f64() {
            let below = self.min.is_some_and(|min| number < min);
            let above = self.max.is_some_and(|max| number > max);
            if below || above {
                return Err(ParameterError::OutOfRange {
                    name: self.name.clone(),
                    min: self.min.map_or_else(|| String::from("-inf"), |v| v.to_string()),
                    max: self.max.map_or_else(|| String::from("inf"), |v| v.to_string()),
                });
            }
        }
        if let (ParamValue::Text(text), Some(choices)) = (&value, self.choices.as_ref()) {
            if !choices.iter().any(|choice| choice == text) {
                return Err(ParameterError::NotAChoice {
                    name: self.name.clone(),
                    choices: choices.join(", "),
                });
            }
        }
        Ok(value)
    }
}

pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Fully resolved options for one invocation; every declared parameter is present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnhancementParameters {
    values: Vec<(String, ParamValue)>,
}

impl EnhancementParameters {
    /// Caller values win over defaults. Blank values count as not supplied and
    /// names outside the schema are ignored.
    pub fn resolve(
        schema: &[ParamSpec],
        overrides: &HashMap<String, String>,
    ) -> Result<Self, ParameterError> {
        let mut values = Vec::with_capacity(schema.len());
        for spec in schema {
            let supplied = overrides
                .get(spec.name.as_str())
                .map(String::as_str)
                .filter(|v| !v.trim().is_empty());
            let value = match supplied {
                Some(raw) => spec.parse_form_value(raw)?,
                None => spec.default_value()?,
            };
            values.push((spec.name.clone(), value));
        }
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn positional(&self) -> Vec<Value> {
        self.values.iter().map(|(_, v)| v.to_json()).collect()
    }

    pub fn named(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, kind: ParamKind, default: Value) -> ParamSpec {
        ParamSpec {
            name: name.to_string(),
            kind,
            default,
            min: None,
            max: None,
            choices: None,
            description: None,
        }
    }

    fn codeformer_schema() -> Vec<ParamSpec> {
        vec![
            spec("face_align", ParamKind::Bool, json!(true)),
            spec("background_enhance", ParamKind::Bool, json!(true)),
            spec("face_upsample", ParamKind::Bool, json!(true)),
            ParamSpec {
                min: Some(1.0),
                max: Some(4.0),
                ..spec("upscale", ParamKind::Int, json!(2))
            },
            ParamSpec {
                min: Some(0.0),
                max: Some(1.0),
                ..spec("codeformer_fidelity", ParamKind::Float, json!(0.5))
            },
        ]
    }

    #[test]
    fn defaults_fill_every_declared_parameter_in_order() {
        let params = EnhancementParameters::resolve(&codeformer_schema(), &HashMap::new())
            .expect("defaults should resolve");
        assert_eq!(params.len(), 5);
        assert_eq!(
            params.positional(),
            vec![json!(true), json!(true), json!(true), json!(2), json!(0.5)]
        );
    }

    #[test]
    fn overrides_are_parsed_per_kind_and_unknown_fields_ignored() {
        let overrides = HashMap::from([
            (String::from("face_align"), String::from("off")),
            (String::from("upscale"), String::from("4")),
            (String::from("codeformer_fidelity"), String::from(" 0.9 ")),
            (String::from("background_enhance"), String::from("")),
            (String::from("unrelated"), String::from("whatever")),
        ]);
        let params = EnhancementParameters::resolve(&codeformer_schema(), &overrides)
            .expect("overrides should resolve");
        let named = params.named();
        assert_eq!(named["face_align"], json!(false));
        assert_eq!(named["background_enhance"], json!(true));
        assert_eq!(named["upscale"], json!(4));
        assert_eq!(named["codeformer_fidelity"], json!(0.9));
        assert!(!named.contains_key("unrelated"));
    }

    #[test]
    fn out_of_range_and_bad_types_are_rejected() {
        let schema = codeformer_schema();
        let too_high = HashMap::from([(String::from("codeformer_fidelity"), String::from("1.5"))]);
        let err = EnhancementParameters::resolve(&schema, &too_high).expect_err("range check");
        assert_eq!(
            err.to_string(),
            "Field 'codeformer_fidelity' must be between 0 and 1"
        );

        let not_int = HashMap::from([(String::from("upscale"), String::from("2.5"))]);
        let err = EnhancementParameters::resolve(&schema, &not_int).expect_err("type check");
        assert_eq!(err.to_string(), "Field 'upscale' must be an integer");

        let not_bool = HashMap::from([(String::from("face_upsample"), String::from("maybe"))]);
        assert!(matches!(
            EnhancementParameters::resolve(&schema, &not_bool),
            Err(ParameterError::InvalidType { .. })
        ));
    }

    #[test]
    fn string_choices_are_enforced() {
        let schema = vec![ParamSpec {
            choices: Some(vec![String::from("v1.3"), String::from("v1.4")]),
            ..spec("version", ParamKind::String, json!("v1.4"))
        }];
        let bad = HashMap::from([(String::from("version"), String::from("v2"))]);
        let err = EnhancementParameters::resolve(&schema, &bad).expect_err("choice check");
        assert_eq!(err.to_string(), "Field 'version' must be one of: v1.3, v1.4");
    }

    #[test]
    fn float_parameters_accept_integer_defaults() {
        let guidance = spec("guidance_scale", ParamKind::Float, json!(3));
        assert_eq!(guidance.default_value(), Ok(ParamValue::Float(3.0)));

        let wrong = spec("steps", ParamKind::Int, json!("twenty"));
        assert!(matches!(
            wrong.default_value(),
            Err(ParameterError::InvalidDefault { .. })
        ));
    }
}
