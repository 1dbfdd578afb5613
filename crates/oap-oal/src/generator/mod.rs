//! Unit and dispatcher generation
//!
//! Turns enriched models into executable artifacts:
//! - one [`MetricUnitType`] per metric
//! - one [`Dispatcher`] per scope, steps in model order
//!
//! Accessors, filters and accumulators are interpreted from the models, so
//! generation never produces code at runtime.

mod dispatcher;
mod eval;
mod storage;
mod unit;

pub mod source_emitter;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use oap_common::{Error, Result};

use crate::functions::FunctionContext;
use crate::model::CodeGenModel;
use crate::schema::SchemaRegistry;

pub use dispatcher::{DispatchOutcome, DispatchStep, Dispatcher};
pub use storage::{StorageBuilder, StorageRow, ID_COLUMN, TIME_BUCKET_COLUMN, VALUE_COLUMN};
pub use unit::{MetricUnit, MetricUnitType, MetricsSink, UnitSeed};

/// Output of one generation pass
#[derive(Debug, Default)]
pub struct Generated {
    pub unit_types: BTreeMap<String, Arc<MetricUnitType>>,
    pub dispatchers: BTreeMap<String, Dispatcher>,
}

/// Build unit types and dispatchers from enriched models
pub fn generate(
    models: &[CodeGenModel],
    registry: &SchemaRegistry,
    ctx: &Arc<FunctionContext>,
) -> Result<Generated> {
    let mut generated = Generated::default();

    for model in models {
        let unit_type = Arc::new(MetricUnitType::new(model, Arc::clone(ctx)));
        if generated
            .unit_types
            .insert(model.metric_name.clone(), Arc::clone(&unit_type))
            .is_some()
        {
            return Err(Error::Internal(format!(
                "metric {} generated twice",
                model.metric_name
            )));
        }

        let decorator = match &model.decorator {
            Some(name) => Some(Arc::clone(registry.decorator(name).ok_or_else(|| {
                Error::Internal(format!("decorator {name} vanished after enrichment"))
            })?)),
            None => None,
        };

        generated
            .dispatchers
            .entry(model.scope.name.clone())
            .or_insert_with(|| Dispatcher::new(model.scope.name.clone()))
            .push(DispatchStep::new(model, unit_type, decorator));

        debug!(
            metric = %model.metric_name,
            unit = %model.unit_name,
            scope = %model.scope.name,
            "Generated metric unit"
        );
    }

    Ok(generated)
}
