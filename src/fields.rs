use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HEADER_KEY: &str = "header";
pub const COST_KEY: &str = "cost";
pub const QTY_PRICE_KEY: &str = "qtyPrice";

/// Labels the broker order export prints on a line of their own, with the
/// value on the following line.
pub const STACKED_LABELS: [&str; 12] = [
    "Type",
    "Position effect",
    "Time in force",
    "Submitted",
    "Quantity",
    "Account",
    "Status",
    "Filled quantity",
    "Filled",
    "Limit price",
    "Est cost",
    "Est regulatory fees",
];

// Older JSON exports spell the positional fields out.
const POSITIONAL_KEYS: [(&str, Option<&str>); 3] = [
    (HEADER_KEY, None),
    (COST_KEY, Some("Total Cost")),
    (QTY_PRICE_KEY, Some("Quantity + Price")),
];

pub fn is_stacked_label(line: &str) -> bool {
    STACKED_LABELS.contains(&line)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
}

impl FieldValue {
    /// Scalar JSON values only. `null`, arrays and objects have no field form.
    pub fn from_json(v: &serde_json::Value) -> Option<FieldValue> {
        match v {
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Number(n) => Some(FieldValue::Number(n.clone())),
            serde_json::Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::Number(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

/// Ordered label -> value mapping for one trade.
///
/// Inserting a label that is already present replaces the value but keeps
/// the label's original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeFields {
    entries: Vec<(String, FieldValue)>,
}

impl TradeFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<FieldValue>) {
        let label = label.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == label) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == label)
            .map(|(_, v)| v)
    }

    pub fn get_text(&self, label: &str) -> Option<&str> {
        self.get(label).and_then(FieldValue::as_text)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `self` with every label of `edits` written over it. Edited labels keep
    /// their position; labels only present in `edits` are appended.
    pub fn merged(&self, edits: &TradeFields) -> TradeFields {
        let mut out = self.clone();
        for (label, value) in edits.iter() {
            out.insert(label, value.clone());
        }
        out
    }

    /// Expected labels this trade lacks. Informational; nothing rejects a
    /// trade for missing fields.
    pub fn missing_expected(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (key, alias) in POSITIONAL_KEYS {
            let present = self.contains(key) || alias.map(|a| self.contains(a)).unwrap_or(false);
            if !present {
                missing.push(key);
            }
        }
        for label in STACKED_LABELS {
            if !self.contains(label) {
                missing.push(label);
            }
        }
        missing
    }

    /// Builds fields from a JSON object. Returns the labels whose values had
    /// no field form (arrays, objects); `null` values are dropped quietly.
    pub fn from_json_object(
        obj: &serde_json::Map<String, serde_json::Value>,
    ) -> (TradeFields, Vec<String>) {
        let mut fields = TradeFields::new();
        let mut unsupported = Vec::new();
        for (label, v) in obj {
            if v.is_null() {
                continue;
            }
            match FieldValue::from_json(v) {
                Some(value) => fields.insert(label.clone(), value),
                None => unsupported.push(label.clone()),
            }
        }
        (fields, unsupported)
    }
}

impl Serialize for TradeFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TradeFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let obj = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let (fields, unsupported) = TradeFields::from_json_object(&obj);
        if let Some(label) = unsupported.first() {
            return Err(de::Error::custom(format!(
                "field {label:?} must be a string or number"
            )));
        }
        Ok(fields)
    }
}
