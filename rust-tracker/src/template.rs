//! Placeholder substitution for subject and body templates.
//!
//! Templates use `{{field}}` tokens. Unknown fields are left verbatim so a
//! malformed template never blocks a send.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A recipient record: field name to string value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    #[serde(deserialize_with = "lenient_fields")]
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// The `email` field, if present and not blank.
    pub fn email(&self) -> Option<&str> {
        self.get("email").map(str::trim).filter(|e| !e.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Accept JSON objects whose values are strings, numbers, booleans or null.
fn lenient_fields<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        })
        .collect())
}

/// Substitute every `{{field}}` whose field exists in `record`.
///
/// Present fields with empty values render as the empty string. Anything
/// else starting with `{{` is copied through one brace at a time, so a stray
/// `{{` or a run of braces never hides a placeholder that follows it.
pub fn render(template: &str, record: &Record) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];

        match field_at(candidate).and_then(|field| record.get(field).map(|v| (field, v))) {
            Some((field, value)) => {
                out.push_str(value);
                rest = &candidate[OPEN.len() + field.len() + CLOSE.len()..];
            }
            None => {
                out.push('{');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Distinct placeholder names used by a template, in first-seen order.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let candidate = &rest[start..];
        match field_at(candidate) {
            Some(field) => {
                if !names.iter().any(|n| n == field) {
                    names.push(field.to_string());
                }
                rest = &candidate[OPEN.len() + field.len() + CLOSE.len()..];
            }
            None => rest = &candidate[1..],
        }
    }

    names
}

/// Field name of the placeholder at the start of `text`, if it is one.
///
/// `text` starts with `{{`. Names never contain braces.
fn field_at(text: &str) -> Option<&str> {
    let inner = &text[OPEN.len()..];
    let end = inner.find(CLOSE)?;
    let field = &inner[..end];
    (!field.contains('{') && !field.contains('}')).then_some(field)
}
