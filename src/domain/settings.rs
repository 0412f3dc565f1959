//! Declarative driver settings
//!
//! Each driver publishes the connection parameters it understands so that a
//! registry or UI layer can present and validate configuration without
//! driver-specific code. Raw parameter maps are checked against these fields
//! once, when a driver is constructed.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value type of a setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "choices")]
pub enum SettingKind {
    String,
    Password,
    Integer,
    Boolean,
    Choice(Vec<String>),
}

/// Whether a setting belongs to the pod or to one composed machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingScope {
    Pod,
    Machine,
}

/// One configurable parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingField {
    pub name: String,
    pub label: String,
    pub kind: SettingKind,
    pub scope: SettingScope,
    pub required: bool,
    pub default: Option<String>,
}

impl SettingField {
    pub fn new(name: &str, label: &str, kind: SettingKind, scope: SettingScope) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            scope,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    fn check(&self, value: &str) -> Result<()> {
        let valid = match &self.kind {
            SettingKind::String | SettingKind::Password => true,
            SettingKind::Integer => value.parse::<i64>().is_ok(),
            SettingKind::Boolean => parse_bool(value).is_some(),
            SettingKind::Choice(choices) => choices.iter().any(|c| c == value),
        };
        if valid {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "invalid value '{}' for {} ({})",
                value, self.name, self.label
            )))
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Parameters that passed validation against a settings list
#[derive(Debug, Clone, Default)]
pub struct ValidatedParameters {
    values: BTreeMap<String, String>,
}

impl ValidatedParameters {
    /// Validate `raw` against `fields` for the given scope.
    ///
    /// Unknown keys, missing required keys and malformed values are all
    /// configuration errors. Defaults fill in absent optional values.
    pub fn validate(
        fields: &[SettingField],
        scope: SettingScope,
        raw: &BTreeMap<String, String>,
    ) -> Result<Self> {
        for key in raw.keys() {
            if !fields.iter().any(|f| &f.name == key) {
                return Err(Error::Configuration(format!("unknown parameter '{}'", key)));
            }
        }

        let mut values = BTreeMap::new();
        for field in fields.iter().filter(|f| f.scope == scope) {
            match raw.get(&field.name).filter(|v| !v.is_empty()) {
                Some(value) => {
                    field.check(value)?;
                    values.insert(field.name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &field.default {
                        values.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        return Err(Error::Configuration(format!(
                            "missing required parameter '{}' ({})",
                            field.name, field.label
                        )));
                    }
                }
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Fetch a value validation guaranteed to be present
    pub fn require(&self, name: &str) -> Result<String> {
        self.get(name)
            .map(str::to_string)
            .ok_or_else(|| Error::Configuration(format!("missing parameter '{}'", name)))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(parse_bool)
    }
}
