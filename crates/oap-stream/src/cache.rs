//! Concurrent metric unit cache
//!
//! Units are keyed by (metric, id) in a sharded map. Combine and merge run
//! under the entry guard, so each key has at most one live unit and every
//! mutation of it is exclusive.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use oap_common::{metrics, DispatchError};
use oap_oal::{ArgValue, MetricUnit, MetricsSink, UnitSeed};

type UnitKey = (String, String);

/// Minute-granularity units awaiting flush
#[derive(Debug, Default)]
pub struct MetricsCache {
    units: DashMap<UnitKey, MetricUnit>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine into the seed's unit, creating it on first use.
    /// A failed combine on a new unit leaves nothing behind.
    pub fn combine(&self, seed: UnitSeed, args: &[ArgValue]) -> Result<(), DispatchError> {
        let key = (seed.unit_type.metric_name().to_string(), seed.id());
        match self.units.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().combine(args),
            Entry::Vacant(entry) => {
                let mut unit = seed.into_unit();
                unit.combine(args)?;
                entry.insert(unit);
                Ok(())
            }
        }
    }

    /// Merge a whole unit, e.g. one received from a remote node
    pub fn merge(&self, unit: MetricUnit) -> Result<(), DispatchError> {
        let key = (unit.metric_name().to_string(), unit.id().to_string());
        match self.units.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(&unit),
            Entry::Vacant(entry) => {
                entry.insert(unit);
                Ok(())
            }
        }
    }

    /// Remove every unit present now, sorted by metric then id.
    /// Units combined concurrently land in the next drain.
    pub fn drain(&self) -> Vec<MetricUnit> {
        let keys: Vec<UnitKey> = self.units.iter().map(|e| e.key().clone()).collect();
        let mut drained: Vec<(UnitKey, MetricUnit)> = keys
            .into_iter()
            .filter_map(|key| self.units.remove(&key))
            .collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        metrics::set_cache_size(self.units.len());
        drained.into_iter().map(|(_, unit)| unit).collect()
    }

    pub fn get(&self, metric: &str, id: &str) -> Option<MetricUnit> {
        self.units
            .get(&(metric.to_string(), id.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl MetricsSink for MetricsCache {
    fn combine(&self, seed: UnitSeed, args: &[ArgValue]) -> Result<(), DispatchError> {
        MetricsCache::combine(self, seed, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use oap_common::{TimeBucket, Value};
    use oap_oal::{default_registry, FunctionContext, MetricValue, OalCompiler, ScriptSource};

    fn seed(metric: &str, entity: &str) -> UnitSeed {
        let compiled = OalCompiler::new(Arc::new(default_registry().unwrap()), FunctionContext::default())
            .compile(&[ScriptSource::new(
                "cache.oal",
                "svc_count = from(Service.*).count();\nsvc_sum = from(Service.latency).sum();",
            )])
            .unwrap();
        UnitSeed {
            unit_type: Arc::clone(compiled.unit_type(metric).unwrap()),
            time_bucket: TimeBucket::minute(202_401_011_230).unwrap(),
            entity: vec![Value::from(entity)],
        }
    }

    #[test]
    fn test_combine_creates_once() {
        let cache = MetricsCache::new();
        for _ in 0..3 {
            cache.combine(seed("svc_count", "a"), &[ArgValue::Long(1)]).unwrap();
        }
        cache.combine(seed("svc_count", "b"), &[ArgValue::Long(1)]).unwrap();
        assert_eq!(cache.len(), 2);
        let unit = cache.get("svc_count", "202401011230_a").unwrap();
        assert_eq!(unit.value(), MetricValue::Long(3));
    }

    #[test]
    fn test_failed_first_combine_leaves_no_unit() {
        let cache = MetricsCache::new();
        assert!(cache.combine(seed("svc_sum", "a"), &[ArgValue::Bool(true)]).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_merge_and_drain() {
        let cache = MetricsCache::new();
        cache.combine(seed("svc_sum", "b"), &[ArgValue::Long(2)]).unwrap();

        let mut remote = seed("svc_sum", "b").into_unit();
        remote.combine(&[ArgValue::Long(5)]).unwrap();
        cache.merge(remote).unwrap();
        cache.merge(seed("svc_count", "a").into_unit()).unwrap();

        let drained = cache.drain();
        assert!(cache.is_empty());
        let names: Vec<_> = drained.iter().map(|u| u.metric_name().to_string()).collect();
        assert_eq!(names, vec!["svc_count", "svc_sum"]);
        assert_eq!(drained[1].value(), MetricValue::Long(7));
    }

    #[test]
    fn test_concurrent_combine() {
        let cache = Arc::new(MetricsCache::new());
        let seed = seed("svc_count", "a");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let seed = seed.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        cache.combine(seed.clone(), &[ArgValue::Long(1)]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
        let unit = cache.get("svc_count", "202401011230_a").unwrap();
        assert_eq!(unit.value(), MetricValue::Long(8000));
    }
}
