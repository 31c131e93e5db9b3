use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ProviderId;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Typed value of one semantic field in a normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    /// Unix milliseconds.
    Timestamp(i64),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Provider-agnostic representation of one fetched entity.
///
/// Records are immutable after creation; a refresh produces a new record
/// rather than mutating the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Asset id, protocol slug, pool id, or sector id.
    pub entity: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub source: ProviderId,
    pub fetched_at_ms: i64,
}

impl NormalizedRecord {
    pub fn new(entity: impl Into<String>, source: ProviderId) -> Result<Self, ValidationError> {
        let entity = entity.into();
        if entity.trim().is_empty() {
            return Err(ValidationError::EmptyEntity);
        }
        Ok(Self {
            entity,
            fields: BTreeMap::new(),
            source,
            fetched_at_ms: now_ms(),
        })
    }

    pub fn with_fetched_at(mut self, fetched_at_ms: i64) -> Self {
        self.fetched_at_ms = fetched_at_ms;
        self
    }

    pub fn with_number(
        mut self,
        name: impl Into<String>,
        value: f64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: name });
        }
        self.fields.insert(name, FieldValue::Number(value));
        Ok(self)
    }

    pub fn with_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldValue::Text(value.into()));
        self
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(FieldValue::as_number)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    /// Age relative to `now_ms`, saturating at zero for clock skew.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.fetched_at_ms).max(0)
    }
}
