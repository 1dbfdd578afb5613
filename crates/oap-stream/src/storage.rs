//! Storage writer seam
//!
//! Concrete backends live outside the analysis core. The processor only
//! loads rows by id and writes rows back, one table and granularity at a
//! time.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;

use oap_common::{DownSampling, Result, Value};
use oap_oal::generator::ID_COLUMN;
use oap_oal::StorageRow;

#[async_trait]
pub trait StorageWriter: Send + Sync {
    /// Rows with the given ids; missing ids are simply absent
    async fn load(
        &self,
        table: &str,
        downsampling: DownSampling,
        ids: &[String],
    ) -> Result<Vec<StorageRow>>;

    /// Insert or replace rows by id
    async fn write(&self, table: &str, downsampling: DownSampling, rows: Vec<StorageRow>)
        -> Result<()>;
}

/// Rows of one table and granularity, keyed by id
type TableRows = BTreeMap<String, StorageRow>;

/// In-process writer for replay, tests and single-node runs
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: DashMap<(String, DownSampling), TableRows>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, table: &str, downsampling: DownSampling, id: &str) -> Option<StorageRow> {
        self.tables
            .get(&(table.to_string(), downsampling))
            .and_then(|rows| rows.get(id).cloned())
    }

    /// Every row of a table, id order
    pub fn rows(&self, table: &str, downsampling: DownSampling) -> Vec<StorageRow> {
        self.tables
            .get(&(table.to_string(), downsampling))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Table names with at least one row, sorted
    pub fn tables(&self) -> Vec<(String, DownSampling)> {
        let mut names: Vec<_> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StorageWriter for InMemoryStorage {
    async fn load(
        &self,
        table: &str,
        downsampling: DownSampling,
        ids: &[String],
    ) -> Result<Vec<StorageRow>> {
        let Some(rows) = self.tables.get(&(table.to_string(), downsampling)) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn write(
        &self,
        table: &str,
        downsampling: DownSampling,
        rows: Vec<StorageRow>,
    ) -> Result<()> {
        let mut table_rows = self
            .tables
            .entry((table.to_string(), downsampling))
            .or_default();
        for row in rows {
            let id = match row.get(ID_COLUMN) {
                Some(Value::String(id)) => id.clone(),
                _ => {
                    return Err(oap_common::Error::Storage(format!(
                        "row without {ID_COLUMN} written to {table}"
                    )))
                }
            };
            table_rows.insert(id, row);
        }
        Ok(())
    }
}
