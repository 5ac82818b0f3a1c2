use crate::error::ConfigError;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label keys the exporter writes itself. A probe may not override them.
pub const RESERVED_LABELS: &[&str] = &[
    "target",
    "probe",
    "hop",
    "host",
    "port",
    "status",
    "responding",
];

/// Probe-supplied labels, kept sorted by key so rendering is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "BTreeMap<String, String>")]
pub struct LabelSet {
    entries: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        validate_label_name(key)?;
        if self.entries.contains_key(key) {
            return Err(ConfigError::DuplicateLabel(key.to_string()));
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|value| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Entries go through `insert` one by one so a key repeated in the source
// document is an error instead of silently overwriting the first value.
impl<'de> Deserialize<'de> for LabelSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(LabelSetVisitor)
    }
}

struct LabelSetVisitor;

impl<'de> Visitor<'de> for LabelSetVisitor {
    type Value = LabelSet;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of label names to string values")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut labels = LabelSet::new();
        while let Some((key, value)) = map.next_entry::<String, String>()? {
            labels.insert(&key, &value).map_err(de::Error::custom)?;
        }
        Ok(labels)
    }
}

impl From<LabelSet> for BTreeMap<String, String> {
    fn from(labels: LabelSet) -> Self {
        labels.entries
    }
}

impl TryFrom<Vec<(String, String)>> for LabelSet {
    type Error = ConfigError;

    fn try_from(pairs: Vec<(String, String)>) -> Result<Self, Self::Error> {
        let mut labels = LabelSet::new();
        for (key, value) in pairs {
            labels.insert(&key, &value)?;
        }
        Ok(labels)
    }
}

fn validate_label_name(key: &str) -> Result<(), ConfigError> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || key.starts_with("__") {
        return Err(ConfigError::InvalidLabelName(key.to_string()));
    }
    if RESERVED_LABELS.contains(&key) {
        return Err(ConfigError::ReservedLabel(key.to_string()));
    }
    Ok(())
}
