//! Remote pre-aggregation codec and routing
//!
//! Units bound for another analysis node are grouped by
//! `remote_hash % nodes` and shipped as a versioned bincode envelope of
//! (metric name, wire form) pairs.

use serde::{Deserialize, Serialize};

use oap_common::{DispatchError, Error, Result};
use oap_oal::{CompiledOal, MetricUnit, RemoteData, WIRE_VERSION};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u16,
    units: Vec<RemoteUnit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RemoteUnit {
    metric: String,
    data: RemoteData,
}

/// Encode a batch of units
pub fn encode_units(units: &[MetricUnit]) -> Result<Vec<u8>> {
    let envelope = Envelope {
        version: WIRE_VERSION,
        units: units
            .iter()
            .map(|unit| RemoteUnit {
                metric: unit.metric_name().to_string(),
                data: unit.serialize(),
            })
            .collect(),
    };
    bincode::serialize(&envelope).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a batch against the locally compiled unit types
pub fn decode_units(bytes: &[u8], compiled: &CompiledOal) -> std::result::Result<Vec<MetricUnit>, DispatchError> {
    let envelope: Envelope =
        bincode::deserialize(bytes).map_err(|e| DispatchError::Remote(e.to_string()))?;
    if envelope.version != WIRE_VERSION {
        return Err(DispatchError::Remote(format!(
            "unsupported wire version {}, expected {WIRE_VERSION}",
            envelope.version
        )));
    }

    envelope
        .units
        .iter()
        .map(|remote| {
            compiled
                .unit_type(&remote.metric)
                .ok_or_else(|| DispatchError::UnknownMetric(remote.metric.clone()))?
                .deserialize(&remote.data)
        })
        .collect()
}

/// Group units by target node
pub fn partition(units: Vec<MetricUnit>, nodes: usize) -> Vec<Vec<MetricUnit>> {
    let nodes = nodes.max(1);
    let mut groups: Vec<Vec<MetricUnit>> = (0..nodes).map(|_| Vec::new()).collect();
    for unit in units {
        #[allow(clippy::cast_possible_truncation)]
        let node = (unit.remote_hash() % nodes as u64) as usize;
        groups[node].push(unit);
    }
    groups
}
