//! Per-scope dispatchers
//!
//! A dispatcher runs every metric step of its scope against an event. Steps
//! are isolated: a failing step is logged and counted, the rest still run.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use oap_common::{metrics, DispatchError, TimeBucket, Value};

use crate::functions::ArgValue;
use crate::model::{CodeGenModel, EntranceArg, ResolvedFilter};
use crate::schema::SourceDecorator;
use crate::source::SourceEvent;

use super::eval;
use super::unit::{MetricUnitType, MetricsSink, UnitSeed};

/// Routing of one metric inside a dispatcher
pub struct DispatchStep {
    unit_type: Arc<MetricUnitType>,
    decorator: Option<Arc<dyn SourceDecorator>>,
    filters: Vec<ResolvedFilter>,
    entrance: Vec<EntranceArg>,
}

impl DispatchStep {
    pub fn new(
        model: &CodeGenModel,
        unit_type: Arc<MetricUnitType>,
        decorator: Option<Arc<dyn SourceDecorator>>,
    ) -> Self {
        Self {
            unit_type,
            decorator,
            filters: model.filters.clone(),
            entrance: model.entrance.clone(),
        }
    }

    pub fn unit_type(&self) -> &Arc<MetricUnitType> {
        &self.unit_type
    }

    /// `Ok(None)` when a filter rejects the event
    fn evaluate(
        &self,
        event: &SourceEvent,
        time_bucket: TimeBucket,
    ) -> Result<Option<(UnitSeed, Vec<ArgValue>)>, DispatchError> {
        let fail = |reason: String| DispatchError::Extraction {
            metric: self.unit_type.metric_name().to_string(),
            reason,
        };

        let decorated;
        let event = match &self.decorator {
            Some(decorator) => {
                let mut copy = event.clone();
                decorator.decorate(&mut copy);
                decorated = copy;
                &decorated
            }
            None => event,
        };

        for filter in &self.filters {
            if !eval::matches(filter, event).map_err(fail)? {
                return Ok(None);
            }
        }

        let mut entity = Vec::with_capacity(self.unit_type.entity_fields().len());
        for field in self.unit_type.entity_fields() {
            let value = event.get(&field.field_name).cloned().unwrap_or(Value::Null);
            if field.is_id && value.is_null() {
                return Err(fail(format!("id field {} is not set", field.field_name)));
            }
            entity.push(value);
        }

        let args = self
            .entrance
            .iter()
            .map(|arg| eval::entrance_value(arg, event))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;

        let seed = UnitSeed {
            unit_type: Arc::clone(&self.unit_type),
            time_bucket,
            entity,
        };
        Ok(Some((seed, args)))
    }
}

impl fmt::Debug for DispatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchStep")
            .field("metric", &self.unit_type.metric_name())
            .field("decorator", &self.decorator.as_ref().map(|d| d.name().to_string()))
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Result of dispatching one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Steps whose unit received the event
    pub matched: usize,
    /// Steps rejected by a filter
    pub filtered: usize,
    /// Steps that failed extraction or combine
    pub failed: usize,
}

impl DispatchOutcome {
    pub fn absorb(&mut self, other: DispatchOutcome) {
        self.matched += other.matched;
        self.filtered += other.filtered;
        self.failed += other.failed;
    }
}

/// Every metric of one scope, declaration order
#[derive(Debug)]
pub struct Dispatcher {
    scope: String,
    steps: Vec<DispatchStep>,
}

impl Dispatcher {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, step: DispatchStep) {
        self.steps.push(step);
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn steps(&self) -> &[DispatchStep] {
        &self.steps
    }

    /// Run every step against `event`
    pub fn dispatch(&self, event: &SourceEvent, sink: &dyn MetricsSink) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let time_bucket = match event.bucket() {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!(scope = %self.scope, error = %e, "Event has an invalid time bucket");
                for step in &self.steps {
                    metrics::record_dispatch_failure(step.unit_type.metric_name());
                }
                outcome.failed = self.steps.len();
                return outcome;
            }
        };

        for step in &self.steps {
            let metric = step.unit_type.metric_name();
            let result = step
                .evaluate(event, time_bucket)
                .and_then(|found| match found {
                    Some((seed, args)) => sink.combine(seed, &args).map(|()| true),
                    None => Ok(false),
                });

            match result {
                Ok(true) => outcome.matched += 1,
                Ok(false) => {
                    trace!(metric, "Event filtered out");
                    outcome.filtered += 1;
                }
                Err(e) => {
                    warn!(metric, error = %e, "Dispatch step failed");
                    metrics::record_dispatch_failure(metric);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}
