//! Metrics stream processor
//!
//! Owns the minute cache and the persistence pipeline. A flush:
//! 1. drains the minute cache
//! 2. per table, persists the minute units
//! 3. rolls them up into hour and day units and persists those
//!
//! Persisting loads the stored rows by id, merges and writes back. Nothing
//! drained is lost on a failed write: minute units go back into the cache,
//! rolled up units wait in a retry list until the next flush.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use oap_common::config::AnalysisConfig;
use oap_common::{metrics, DispatchError, DownSampling, Error, Result};
use oap_oal::{ArgValue, CompiledOal, MetricUnit, MetricsSink, StorageBuilder, UnitSeed};

use crate::cache::MetricsCache;
use crate::remote;
use crate::storage::StorageWriter;

/// Units persisted by one flush, per granularity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub minute: usize,
    pub hour: usize,
    pub day: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.minute + self.hour + self.day
    }

    fn add(&mut self, downsampling: DownSampling, units: usize) {
        match downsampling {
            DownSampling::Minute => self.minute += units,
            DownSampling::Hour => self.hour += units,
            DownSampling::Day => self.day += units,
        }
    }
}

/// Units of one table taken by a flush
#[derive(Default)]
struct TableBatch {
    minute: Vec<MetricUnit>,
    /// Hour and day units left over by a failed write
    retry: Vec<MetricUnit>,
}

pub struct MetricsStreamProcessor {
    config: AnalysisConfig,
    cache: MetricsCache,
    /// Rolled up units whose write failed
    pending: Mutex<Vec<MetricUnit>>,
    storage: Arc<dyn StorageWriter>,
}

impl MetricsStreamProcessor {
    pub fn new(config: AnalysisConfig, storage: Arc<dyn StorageWriter>) -> Self {
        Self {
            config,
            cache: MetricsCache::new(),
            pending: Mutex::new(Vec::new()),
            storage,
        }
    }

    pub fn cache(&self) -> &MetricsCache {
        &self.cache
    }

    /// Hour and day units waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Persist every cached unit.
    ///
    /// Tables are written independently; a failed table does not stop the
    /// others. The first failure is returned after every table was tried.
    pub async fn flush(&self) -> Result<FlushReport> {
        let minute = self.cache.drain();
        let retry = std::mem::take(&mut *self.pending.lock());
        if minute.is_empty() && retry.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut tables: BTreeMap<String, TableBatch> = BTreeMap::new();
        for unit in minute {
            tables
                .entry(unit.unit_type().table_name().to_string())
                .or_default()
                .minute
                .push(unit);
        }
        for unit in retry {
            tables
                .entry(unit.unit_type().table_name().to_string())
                .or_default()
                .retry
                .push(unit);
        }

        let mut report = FlushReport::default();
        let mut failure: Option<Error> = None;
        for (table, batch) in tables {
            if let Err(e) = self.flush_table(&table, batch, &mut report).await {
                warn!(table = %table, error = %e, "Flush failed, units kept for the next flush");
                failure.get_or_insert(e);
            }
        }
        metrics::set_cache_size(self.cache.len());

        info!(
            minute = report.minute,
            hour = report.hour,
            day = report.day,
            pending = self.pending_len(),
            "Flushed metric units"
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn flush_table(
        &self,
        table: &str,
        batch: TableBatch,
        report: &mut FlushReport,
    ) -> Result<()> {
        let TableBatch { minute, retry } = batch;

        if !minute.is_empty() {
            if let Err(e) = self.persist(table, DownSampling::Minute, &minute).await {
                // Roll ups are rebuilt from the restored units next time
                self.restore(minute);
                self.pending.lock().extend(retry);
                return Err(e);
            }
            report.add(DownSampling::Minute, minute.len());
        }

        let (retry_hour, retry_day): (Vec<_>, Vec<_>) = retry
            .into_iter()
            .partition(|unit| unit.downsampling() == DownSampling::Hour);

        let mut failure = None;
        for (downsampling, enabled, retry) in [
            (DownSampling::Hour, self.config.should_to_hour(), retry_hour),
            (DownSampling::Day, self.config.should_to_day(), retry_day),
        ] {
            let mut units = retry;
            if enabled {
                units.extend(minute.iter().map(|unit| match downsampling {
                    DownSampling::Day => unit.to_day(),
                    _ => unit.to_hour(),
                }));
            }
            let units = rollup(units);
            if units.is_empty() {
                continue;
            }

            match self.persist(table, downsampling, &units).await {
                Ok(()) => report.add(downsampling, units.len()),
                Err(e) => {
                    self.pending.lock().extend(units);
                    failure.get_or_insert(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Load the stored rows, merge the units into them and write back
    async fn persist(
        &self,
        table: &str,
        downsampling: DownSampling,
        units: &[MetricUnit],
    ) -> Result<()> {
        let started = Instant::now();
        let ids: Vec<String> = units.iter().map(|u| u.id().to_string()).collect();
        let existing = match self.storage.load(table, downsampling, &ids).await {
            Ok(rows) => rows,
            Err(e) => {
                metrics::record_flush_failure(table, downsampling.as_str());
                return Err(e);
            }
        };

        let mut persisted: BTreeMap<String, MetricUnit> = BTreeMap::new();
        if let Some(builder) = units.first().map(|u| Arc::clone(u.unit_type())) {
            for row in &existing {
                let unit = builder.storage_to_entity(row)?;
                persisted.insert(unit.id().to_string(), unit);
            }
        }

        let mut rows = Vec::with_capacity(units.len());
        for unit in units {
            let row = match persisted.get(unit.id()) {
                Some(previous) => {
                    let mut merged = unit.clone();
                    merged.merge(previous)?;
                    merged.unit_type().entity_to_storage(&merged)
                }
                None => unit.unit_type().entity_to_storage(unit),
            };
            rows.push(row);
        }

        debug!(
            table = %table,
            downsampling = %downsampling,
            rows = rows.len(),
            merged = persisted.len(),
            "Writing metric rows"
        );
        if let Err(e) = self.storage.write(table, downsampling, rows).await {
            metrics::record_flush_failure(table, downsampling.as_str());
            return Err(e);
        }

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_flush(downsampling.as_str(), units.len(), elapsed);
        Ok(())
    }

    /// Put units back into the cache, merging with anything combined since
    fn restore(&self, units: impl IntoIterator<Item = MetricUnit>) {
        for unit in units {
            let metric = unit.metric_name().to_string();
            if let Err(e) = self.cache.merge(unit) {
                warn!(metric = %metric, error = %e, "Dropping unit that could not be restored");
                metrics::record_dispatch_failure(&metric);
            }
        }
    }

    // ========================================================================
    // Remote pre-aggregation
    // ========================================================================

    /// Drain the cache into one encoded batch per node, `remote_nodes` wide.
    /// Empty groups are skipped. On failure every drained unit is restored.
    pub fn take_remote_batches(&self) -> Result<Vec<(usize, Vec<u8>)>> {
        let groups = remote::partition(self.cache.drain(), self.config.remote_nodes);
        let batches: Result<Vec<(usize, Vec<u8>)>> = groups
            .iter()
            .enumerate()
            .filter(|(_, group)| !group.is_empty())
            .map(|(node, group)| remote::encode_units(group).map(|bytes| (node, bytes)))
            .collect();
        if batches.is_err() {
            self.restore(groups.into_iter().flatten());
        }
        batches
    }

    /// Merge a batch received from another node into the cache
    pub fn receive_remote(&self, bytes: &[u8], compiled: &CompiledOal) -> Result<usize> {
        let units = remote::decode_units(bytes, compiled)?;
        let count = units.len();
        for unit in units {
            self.cache.merge(unit)?;
        }
        metrics::record_remote_received(count);
        metrics::set_cache_size(self.cache.len());
        Ok(count)
    }
}

impl MetricsSink for MetricsStreamProcessor {
    fn combine(&self, seed: UnitSeed, args: &[ArgValue]) -> std::result::Result<(), DispatchError> {
        self.cache.combine(seed, args)
    }
}

/// Merge rolled up units landing on the same key, key order.
/// A unit that cannot merge is dropped; retrying would fail the same way.
fn rollup(units: Vec<MetricUnit>) -> Vec<MetricUnit> {
    let mut merged: BTreeMap<(String, String), MetricUnit> = BTreeMap::new();
    for unit in units {
        let key = (unit.metric_name().to_string(), unit.id().to_string());
        match merged.get_mut(&key) {
            Some(existing) => {
                if let Err(e) = existing.merge(&unit) {
                    warn!(metric = %key.0, id = %key.1, error = %e, "Dropping unit that failed to roll up");
                    metrics::record_dispatch_failure(&key.0);
                }
            }
            None => {
                merged.insert(key, unit);
            }
        }
    }
    merged.into_values().collect()
}
