//! Source events delivered to dispatchers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use oap_common::{Result, TimeBucket, Value};

/// One telemetry event of a registered scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEvent {
    /// Scope name, e.g. `Service`
    pub scope: String,
    /// Minute bucket the event belongs to
    pub time_bucket: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl SourceEvent {
    pub fn new(scope: impl Into<String>, time_bucket: TimeBucket) -> Self {
        Self {
            scope: scope.into(),
            time_bucket: time_bucket.value(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Minute bucket of the event
    pub fn bucket(&self) -> Result<TimeBucket> {
        TimeBucket::minute(self.time_bucket)
    }
}
