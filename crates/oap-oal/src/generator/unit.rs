//! Executable metric units
//!
//! A [`MetricUnitType`] is generated once per metric definition and shared
//! behind an `Arc`. A [`MetricUnit`] is one (entity, time bucket) instance
//! holding the accumulator state.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use xxhash_rust::xxh3::xxh3_64;

use oap_common::{DispatchError, DownSampling, TimeBucket, Value};

use crate::functions::{Accumulator, ArgValue, FunctionContext, FunctionKind, MetricValue};
use crate::model::CodeGenModel;
use crate::schema::SourceField;
use crate::wire::{encode_entity, RemoteData, RemoteReader};

/// Generated type of one metric
#[derive(Debug)]
pub struct MetricUnitType {
    metric_name: String,
    unit_name: String,
    table_name: String,
    scope_id: u32,
    function: FunctionKind,
    entity_fields: Vec<Arc<SourceField>>,
    ctx: Arc<FunctionContext>,
}

impl MetricUnitType {
    pub fn new(model: &CodeGenModel, ctx: Arc<FunctionContext>) -> Self {
        Self {
            metric_name: model.metric_name.clone(),
            unit_name: model.unit_name.clone(),
            table_name: model.table_name.clone(),
            scope_id: model.scope.id,
            function: model.function,
            entity_fields: model.entity_fields.clone(),
            ctx,
        }
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn scope_id(&self) -> u32 {
        self.scope_id
    }

    pub fn function(&self) -> FunctionKind {
        self.function
    }

    /// Entity fields in scope order
    pub fn entity_fields(&self) -> &[Arc<SourceField>] {
        &self.entity_fields
    }

    /// Entity id of an entity value list. One id field is used as is,
    /// several are base64-encoded and joined by `.`.
    pub fn entity_id(&self, entity: &[Value]) -> String {
        let ids: Vec<String> = self
            .entity_fields
            .iter()
            .zip(entity)
            .filter(|(field, _)| field.is_id)
            .map(|(_, value)| value.to_string())
            .collect();
        match ids.as_slice() {
            [single] => single.clone(),
            many => many
                .iter()
                .map(|id| STANDARD.encode(id.as_bytes()))
                .collect::<Vec<_>>()
                .join("."),
        }
    }

    /// `"{timeBucket}_{entityId}"`
    pub fn unit_id(&self, time_bucket: TimeBucket, entity: &[Value]) -> String {
        format!("{}_{}", time_bucket.value(), self.entity_id(entity))
    }

    /// Empty unit for an entity and bucket
    pub fn create(self: &Arc<Self>, time_bucket: TimeBucket, entity: Vec<Value>) -> MetricUnit {
        let id = self.unit_id(time_bucket, &entity);
        MetricUnit {
            unit_type: Arc::clone(self),
            time_bucket,
            entity,
            accumulator: Accumulator::new(self.function),
            id,
        }
    }

    /// Rebuild a unit from its wire form
    pub fn deserialize(self: &Arc<Self>, data: &RemoteData) -> Result<MetricUnit, DispatchError> {
        let mut reader = RemoteReader::new(data);
        let entity = self
            .entity_fields
            .iter()
            .map(|_| reader.entity())
            .collect::<Result<Vec<_>, _>>()?;

        let time_bucket = TimeBucket::infer(reader.long()?)
            .map_err(|e| DispatchError::Remote(e.to_string()))?;

        let state = self
            .function
            .state_fields()
            .iter()
            .map(|(_, ty)| reader.state(*ty))
            .collect::<Result<Vec<_>, _>>()?;
        reader.finish()?;

        let accumulator = Accumulator::from_state(self.function, state)
            .map_err(|reason| self.merge_error(reason))?;

        let mut unit = self.create(time_bucket, entity);
        unit.accumulator = accumulator;
        Ok(unit)
    }

    fn extraction_error(&self, reason: String) -> DispatchError {
        DispatchError::Extraction {
            metric: self.metric_name.clone(),
            reason,
        }
    }

    fn merge_error(&self, reason: String) -> DispatchError {
        DispatchError::Merge {
            metric: self.metric_name.clone(),
            reason,
        }
    }
}

/// One (entity, time bucket) aggregation instance
#[derive(Debug, Clone)]
pub struct MetricUnit {
    unit_type: Arc<MetricUnitType>,
    time_bucket: TimeBucket,
    entity: Vec<Value>,
    accumulator: Accumulator,
    id: String,
}

impl MetricUnit {
    pub fn unit_type(&self) -> &Arc<MetricUnitType> {
        &self.unit_type
    }

    pub fn metric_name(&self) -> &str {
        &self.unit_type.metric_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn time_bucket(&self) -> TimeBucket {
        self.time_bucket
    }

    /// Entity values, parallel to [`MetricUnitType::entity_fields`]
    pub fn entity(&self) -> &[Value] {
        &self.entity
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub(crate) fn set_accumulator(&mut self, accumulator: Accumulator) {
        self.accumulator = accumulator;
    }

    /// Apply one event's entrance arguments
    pub fn combine(&mut self, args: &[ArgValue]) -> Result<(), DispatchError> {
        let unit_type = &self.unit_type;
        self.accumulator
            .combine(args, &unit_type.ctx)
            .map_err(|reason| unit_type.extraction_error(reason))
    }

    /// Merge another instance of the same metric and id
    pub fn merge(&mut self, other: &MetricUnit) -> Result<(), DispatchError> {
        if self.metric_name() != other.metric_name() || self.id != other.id {
            return Err(self.unit_type.merge_error(format!(
                "cannot merge {}/{} into {}/{}",
                other.metric_name(),
                other.id,
                self.metric_name(),
                self.id
            )));
        }
        let unit_type = &self.unit_type;
        self.accumulator
            .merge(&other.accumulator)
            .map_err(|reason| unit_type.merge_error(reason))
    }

    /// New hour instance with identical state
    pub fn to_hour(&self) -> MetricUnit {
        self.rollup(self.time_bucket.to_hour())
    }

    /// New day instance with identical state
    pub fn to_day(&self) -> MetricUnit {
        self.rollup(self.time_bucket.to_day())
    }

    fn rollup(&self, time_bucket: TimeBucket) -> MetricUnit {
        let mut unit = self.unit_type.create(time_bucket, self.entity.clone());
        unit.accumulator = self.accumulator.clone();
        unit
    }

    pub fn downsampling(&self) -> DownSampling {
        self.time_bucket.downsampling()
    }

    /// Reported value at this unit's granularity
    pub fn value(&self) -> MetricValue {
        self.accumulator.value(self.downsampling())
    }

    /// Routing hash, independent of the time bucket
    pub fn remote_hash(&self) -> u64 {
        xxh3_64(self.unit_type.entity_id(&self.entity).as_bytes())
    }

    /// Wire form: entity fields, time bucket, then state fields
    pub fn serialize(&self) -> RemoteData {
        let mut data = RemoteData::default();
        data.strings.extend(self.entity.iter().map(encode_entity));
        data.longs.push(self.time_bucket.value());
        for value in self.accumulator.state() {
            data.push_state(value);
        }
        data
    }
}

impl PartialEq for MetricUnit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.metric_name() == other.metric_name()
    }
}

impl Eq for MetricUnit {}

impl Hash for MetricUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.metric_name().hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.metric_name(), self.id)
    }
}

/// Everything a sink needs to obtain or create the target unit
#[derive(Debug, Clone)]
pub struct UnitSeed {
    pub unit_type: Arc<MetricUnitType>,
    pub time_bucket: TimeBucket,
    pub entity: Vec<Value>,
}

impl UnitSeed {
    pub fn id(&self) -> String {
        self.unit_type.unit_id(self.time_bucket, &self.entity)
    }

    pub fn into_unit(self) -> MetricUnit {
        self.unit_type.create(self.time_bucket, self.entity)
    }
}

/// Receiver of dispatcher output, usually the runtime cache
pub trait MetricsSink: Send + Sync {
    /// Combine `args` into the unit `seed` identifies, creating it if absent
    fn combine(&self, seed: UnitSeed, args: &[ArgValue]) -> Result<(), DispatchError>;
}
