//! Analysis engine
//!
//! Entry point of the runtime: routes events to the compiled dispatchers and
//! drives the periodic flush.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use oap_common::config::AnalysisConfig;
use oap_common::{metrics, DispatchError, Result};
use oap_oal::{CompiledOal, DispatchOutcome, SourceEvent};

use crate::processor::{FlushReport, MetricsStreamProcessor};
use crate::storage::StorageWriter;

pub struct AnalysisEngine {
    /// Configuration
    config: AnalysisConfig,
    /// Compiled scripts
    compiled: Arc<CompiledOal>,
    /// Cache and persistence pipeline
    processor: Arc<MetricsStreamProcessor>,
    /// Running state
    running: Arc<RwLock<bool>>,
    stop: Arc<Notify>,
}

impl AnalysisEngine {
    pub fn new(
        config: &AnalysisConfig,
        compiled: Arc<CompiledOal>,
        storage: Arc<dyn StorageWriter>,
    ) -> Self {
        info!(
            metrics = compiled.unit_types().count(),
            dispatchers = compiled.dispatchers().count(),
            "Initializing analysis engine"
        );

        Self {
            config: config.clone(),
            compiled,
            processor: Arc::new(MetricsStreamProcessor::new(config.clone(), storage)),
            running: Arc::new(RwLock::new(true)),
            stop: Arc::new(Notify::new()),
        }
    }

    pub fn compiled(&self) -> &Arc<CompiledOal> {
        &self.compiled
    }

    pub fn processor(&self) -> &Arc<MetricsStreamProcessor> {
        &self.processor
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch an event to the dispatcher of its own scope
    pub fn dispatch(&self, event: &SourceEvent) -> std::result::Result<DispatchOutcome, DispatchError> {
        self.dispatch_to(event, &event.scope)
    }

    /// Dispatch an event to the dispatcher of `scope`.
    ///
    /// Events of disabled scopes and of scopes without metrics are dropped
    /// with an empty outcome; unregistered scopes are an error.
    pub fn dispatch_to(
        &self,
        event: &SourceEvent,
        scope: &str,
    ) -> std::result::Result<DispatchOutcome, DispatchError> {
        if self.compiled.is_disabled(scope) {
            metrics::record_event_dropped(scope, "disabled");
            return Ok(DispatchOutcome::default());
        }
        if self.compiled.registry().scope(scope).is_none() {
            metrics::record_event_dropped(scope, "unknown_scope");
            return Err(DispatchError::UnknownScope(scope.to_string()));
        }
        let Some(dispatcher) = self.compiled.dispatcher(scope) else {
            metrics::record_event_dropped(scope, "no_metrics");
            return Ok(DispatchOutcome::default());
        };

        metrics::record_event_dispatched(scope);
        let outcome = dispatcher.dispatch(event, self.processor.as_ref());
        metrics::set_cache_size(self.processor.cache().len());
        Ok(outcome)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn flush(&self) -> Result<FlushReport> {
        self.processor.flush().await
    }

    /// Merge a pre-aggregated batch from another node
    pub fn receive_remote(&self, bytes: &[u8]) -> Result<usize> {
        self.processor.receive_remote(bytes, &self.compiled)
    }

    /// Flush on the configured interval until shutdown
    pub async fn run(&self) -> Result<()> {
        let period = Duration::from_millis(self.config.flush_interval_ms.max(1));
        info!(interval_ms = self.config.flush_interval_ms, "Starting analysis engine...");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        while self.is_running() {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.stop.notified() => break,
            }
            if !self.is_running() {
                break;
            }
            match self.flush().await {
                Ok(report) => debug!(units = report.total(), "Periodic flush done"),
                Err(e) => warn!(error = %e, "Periodic flush failed, retrying next tick"),
            }
        }

        Ok(())
    }

    /// Stop the flush loop and persist what is left
    pub async fn shutdown(&self) -> Result<FlushReport> {
        info!("Shutting down analysis engine...");
        *self.running.write() = false;
        self.stop.notify_one();
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    use oap_common::{DownSampling, TimeBucket, Value};
    use oap_oal::{default_registry, FunctionContext, OalCompiler, ScriptSource};

    fn engine(storage: Arc<InMemoryStorage>, flush_interval_ms: u64) -> Arc<AnalysisEngine> {
        let compiled = OalCompiler::new(Arc::new(default_registry().unwrap()), FunctionContext::default())
            .compile(&[ScriptSource::new(
                "engine.oal",
                "svc_count = from(Service.*).count();\ndisable(ServiceInstance);",
            )])
            .unwrap();
        let config = AnalysisConfig {
            flush_interval_ms,
            ..AnalysisConfig::default()
        };
        Arc::new(AnalysisEngine::new(&config, Arc::new(compiled), storage))
    }

    fn event(scope: &str) -> SourceEvent {
        SourceEvent::new(scope, TimeBucket::minute(202_401_011_230).unwrap()).with("entityId", "svc")
    }

    #[tokio::test]
    async fn test_dispatch_routing() {
        let engine = engine(Arc::new(InMemoryStorage::new()), 1000);

        assert_eq!(engine.dispatch(&event("Service")).unwrap().matched, 1);
        assert_eq!(engine.dispatch(&event("ServiceInstance")).unwrap(), DispatchOutcome::default());
        assert_eq!(engine.dispatch(&event("Endpoint")).unwrap(), DispatchOutcome::default());
        assert_eq!(
            engine.dispatch(&event("Nope")).unwrap_err(),
            DispatchError::UnknownScope("Nope".into())
        );
        assert_eq!(engine.dispatch_to(&event("Endpoint"), "Service").unwrap().matched, 1);
        assert_eq!(engine.processor().cache().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let storage = Arc::new(InMemoryStorage::new());
        let engine = engine(Arc::clone(&storage), 60_000);
        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run().await })
        };

        engine.dispatch(&event("Service")).unwrap();
        tokio::task::yield_now().await;
        let report = engine.shutdown().await.unwrap();
        assert_eq!(report.minute, 1);
        runner.await.unwrap().unwrap();
        assert!(!engine.is_running());

        let row = storage
            .row("svc_count", DownSampling::Minute, "202401011230_svc")
            .unwrap();
        assert_eq!(row["value"], Value::Long(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let storage = Arc::new(InMemoryStorage::new());
        let engine = engine(Arc::clone(&storage), 1000);
        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run().await })
        };

        engine.dispatch(&event("Service")).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(engine.processor().cache().is_empty());
        assert_eq!(storage.rows("svc_count", DownSampling::Day).len(), 1);

        engine.shutdown().await.unwrap();
        runner.await.unwrap().unwrap();
    }
}
