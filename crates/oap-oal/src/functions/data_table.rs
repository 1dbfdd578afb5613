use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Keyed long counters used by histogram, percentile and labeled functions.
///
/// Stored as `key,value|key,value` with `%`, `,` and `|` in keys escaped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataTable(BTreeMap<String, i64>);

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the counter at `key`
    pub fn accumulate(&mut self, key: &str, value: i64) {
        let slot = self.0.entry(key.to_string()).or_insert(0);
        *slot = slot.wrapping_add(value);
    }

    pub fn get(&self, key: &str) -> i64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    /// Per-key sum, union of keys
    pub fn merge(&mut self, other: &DataTable) {
        for (key, value) in &other.0 {
            self.accumulate(key, *value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> i64 {
        self.0.values().fold(0i64, |acc, v| acc.saturating_add(*v))
    }

    /// Entries whose keys are integers, sorted numerically
    pub fn numeric_entries(&self) -> Vec<(i64, i64)> {
        let mut entries: Vec<_> = self
            .0
            .iter()
            .filter_map(|(k, v)| k.parse::<i64>().ok().map(|k| (k, *v)))
            .collect();
        entries.sort_unstable();
        entries
    }

    pub fn into_inner(self) -> BTreeMap<String, i64> {
        self.0
    }

    pub fn to_storage(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{},{}", escape(k), v))
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut table = Self::new();
        if text.is_empty() {
            return Ok(table);
        }
        for entry in text.split('|') {
            let (key, value) = entry
                .rsplit_once(',')
                .ok_or_else(|| format!("malformed data table entry '{entry}'"))?;
            let value = value
                .parse::<i64>()
                .map_err(|e| format!("malformed data table value '{value}': {e}"))?;
            table.accumulate(&unescape(key)?, value);
        }
        Ok(table)
    }
}

impl FromIterator<(String, i64)> for DataTable {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.accumulate(&k, v);
        }
        table
    }
}

fn escape(key: &str) -> String {
    key.replace('%', "%25").replace(',', "%2C").replace('|', "%7C")
}

fn unescape(key: &str) -> Result<String, String> {
    let mut out = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3).ok_or_else(|| format!("bad escape in '{key}'"))?;
        out.push(match code {
            "25" => '%',
            "2C" => ',',
            "7C" => '|',
            _ => return Err(format!("bad escape in '{key}'")),
        });
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}
