//! Extra access-log fields attached to a request by handlers

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A single structured log field
#[derive(Debug, Clone, PartialEq)]
pub struct LogField {
    pub key: String,
    pub value: Value,
}

impl LogField {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered list of extra fields merged into the request's access log record.
///
/// `add` always appends, so a key may repeat. `set` replaces the first field
/// with the same key in place, keeping its position.
#[derive(Debug, Clone, Default)]
pub struct ExtraLogFields {
    fields: Vec<LogField>,
}

impl ExtraLogFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, even if the key is already present
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.push(LogField::new(key, value));
    }

    /// Replace the first field with the same key, or append
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let field = LogField::new(key, value);
        match self.fields.iter_mut().find(|f| f.key == field.key) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// First value logged under `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Extend<LogField> for ExtraLogFields {
    fn extend<I: IntoIterator<Item = LogField>>(&mut self, iter: I) {
        self.fields.extend(iter);
    }
}

// Serialized as a map; repeated keys are emitted as repeated entries.
impl Serialize for ExtraLogFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.key, &field.value)?;
        }
        map.end()
    }
}
