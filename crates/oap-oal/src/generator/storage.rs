//! Storage builder contract
//!
//! Converts metric units to and from flat storage rows. A row holds:
//! - `id` and `time_bucket`
//! - every entity column of the scope
//! - every state field, data tables in their `key,value|...` form
//! - the computed `value`, written for readers and ignored on load

use std::collections::BTreeMap;
use std::sync::Arc;

use oap_common::{Error, Result, TimeBucket, Value};

use crate::functions::{Accumulator, DataTable, MetricValue, StateType, StateValue};

use super::unit::{MetricUnit, MetricUnitType};

pub type StorageRow = BTreeMap<String, Value>;

pub const ID_COLUMN: &str = "id";
pub const TIME_BUCKET_COLUMN: &str = "time_bucket";
pub const VALUE_COLUMN: &str = "value";

pub trait StorageBuilder: Send + Sync {
    fn entity_to_storage(&self, unit: &MetricUnit) -> StorageRow;

    fn storage_to_entity(&self, row: &StorageRow) -> Result<MetricUnit>;
}

impl StorageBuilder for Arc<MetricUnitType> {
    fn entity_to_storage(&self, unit: &MetricUnit) -> StorageRow {
        let mut row = StorageRow::new();
        row.insert(ID_COLUMN.to_string(), Value::from(unit.id()));
        row.insert(
            TIME_BUCKET_COLUMN.to_string(),
            Value::Long(unit.time_bucket().value()),
        );

        for (field, value) in self.entity_fields().iter().zip(unit.entity()) {
            row.insert(field.column_name.clone(), value.clone());
        }

        let fields = self.function().state_fields();
        for ((name, _), state) in fields.iter().zip(unit.accumulator().state()) {
            let value = match state {
                StateValue::Long(v) => Value::Long(v),
                StateValue::Double(v) => Value::Double(v),
                StateValue::Table(t) => Value::String(t.to_storage()),
            };
            row.insert((*name).to_string(), value);
        }

        // a state field named `value` keeps its stored form
        row.entry(VALUE_COLUMN.to_string())
            .or_insert_with(|| match unit.value() {
                MetricValue::Long(v) => Value::Long(v),
                MetricValue::Double(v) => Value::Double(v),
                MetricValue::Table(t) => {
                    Value::String(t.into_iter().collect::<DataTable>().to_storage())
                }
            });
        row
    }

    fn storage_to_entity(&self, row: &StorageRow) -> Result<MetricUnit> {
        let metric = self.metric_name();
        let bad = |column: &str, reason: &str| {
            Error::Storage(format!("{metric}: column {column}: {reason}"))
        };

        let bucket = row
            .get(TIME_BUCKET_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| bad(TIME_BUCKET_COLUMN, "missing or not a long"))?;
        let time_bucket = TimeBucket::infer(bucket)?;

        let entity = self
            .entity_fields()
            .iter()
            .map(|field| row.get(&field.column_name).cloned().unwrap_or(Value::Null))
            .collect::<Vec<_>>();

        let mut state = Vec::new();
        for (name, ty) in self.function().state_fields() {
            let value = row.get(*name).ok_or_else(|| bad(name, "missing"))?;
            state.push(match ty {
                StateType::Long => StateValue::Long(
                    value.as_i64().ok_or_else(|| bad(name, "not a long"))?,
                ),
                StateType::Double => StateValue::Double(
                    value.as_f64().ok_or_else(|| bad(name, "not a number"))?,
                ),
                StateType::Table => {
                    let text = value.as_str().ok_or_else(|| bad(name, "not a string"))?;
                    StateValue::Table(DataTable::parse(text).map_err(|e| bad(name, &e))?)
                }
            });
        }

        let accumulator = Accumulator::from_state(self.function(), state)
            .map_err(|e| Error::Storage(format!("{metric}: {e}")))?;
        let mut unit = self.create(time_bucket, entity);
        unit.set_accumulator(accumulator);

        if let Some(id) = row.get(ID_COLUMN).and_then(Value::as_str) {
            if id != unit.id() {
                return Err(bad(ID_COLUMN, &format!("expected {}, found {id}", unit.id())));
            }
        }
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::Enricher;
    use crate::functions::{ArgValue, FunctionContext};
    use crate::parser::parse_script;
    use crate::schema::default_registry;

    fn unit_type(text: &str) -> Arc<MetricUnitType> {
        let registry = default_registry().unwrap();
        let script = parse_script("storage.oal", text).unwrap();
        let model = Enricher::new(&registry).enrich(&script.metrics[0]).unwrap();
        Arc::new(MetricUnitType::new(&model, Arc::new(FunctionContext::default())))
    }

    fn minute() -> TimeBucket {
        TimeBucket::minute(202_401_011_230).unwrap()
    }

    #[test]
    fn test_row_layout() {
        let ty = unit_type("endpoint_avg = from(Endpoint.latency).longAvg();");
        let mut unit = ty.create(minute(), vec![Value::from("ep"), Value::from("svc")]);
        for v in [100, 200, 300] {
            unit.combine(&[ArgValue::Long(v), ArgValue::Long(1)]).unwrap();
        }
        let row = ty.entity_to_storage(&unit);
        assert_eq!(row["id"], Value::from("202401011230_ep"));
        assert_eq!(row["time_bucket"], Value::Long(202_401_011_230));
        assert_eq!(row["entity_id"], Value::from("ep"));
        assert_eq!(row["service_id"], Value::from("svc"));
        assert_eq!(row["summation"], Value::Long(600));
        assert_eq!(row["count"], Value::Long(3));
        assert_eq!(row["value"], Value::Long(200));

        let back = ty.storage_to_entity(&row).unwrap();
        assert_eq!(back, unit);
        assert_eq!(back.accumulator(), unit.accumulator());
        assert_eq!(back.entity(), unit.entity());
    }

    #[test]
    fn test_tables_and_hour_rows() {
        let ty = unit_type("a = from(Service.*).labelCount(rpcStatusCode);");
        let mut unit = ty.create(minute(), vec![Value::from("svc")]);
        unit.combine(&[ArgValue::Str("OK".into()), ArgValue::Long(1)]).unwrap();
        unit.combine(&[ArgValue::Str("a,b".into()), ArgValue::Long(1)]).unwrap();
        let hour = unit.to_hour();

        let row = ty.entity_to_storage(&hour);
        assert_eq!(row["dataset"], Value::from("OK,1|a%2Cb,1"));
        let back = ty.storage_to_entity(&row).unwrap();
        assert_eq!(back.time_bucket(), hour.time_bucket());
        assert_eq!(back.accumulator(), hour.accumulator());
    }

    #[test]
    fn test_value_state_field_is_kept() {
        let ty = unit_type("a = from(Service.*).cpm();");
        let mut unit = ty.create(minute(), vec![Value::from("svc")]);
        unit.combine(&[ArgValue::Long(1)]).unwrap();
        let row = ty.entity_to_storage(&unit.to_hour());
        assert_eq!(row["total"], Value::Long(1));
        assert_eq!(row["value"], Value::Long(0));

        let ty = unit_type("b = from(Service.latency).sum();");
        let mut unit = ty.create(minute(), vec![Value::from("svc")]);
        unit.combine(&[ArgValue::Long(9)]).unwrap();
        let row = ty.entity_to_storage(&unit);
        assert_eq!(row["value"], Value::Long(9));
    }

    #[test]
    fn test_bad_rows() {
        let ty = unit_type("a = from(Service.latency).sum();");
        let unit = ty.create(minute(), vec![Value::from("svc")]);
        let row = ty.entity_to_storage(&unit);

        let mut missing = row.clone();
        missing.remove("value");
        assert!(matches!(ty.storage_to_entity(&missing), Err(Error::Storage(_))));

        let mut wrong_id = row.clone();
        wrong_id.insert("id".into(), Value::from("202401011230_other"));
        assert!(ty.storage_to_entity(&wrong_id).is_err());

        let mut bad_bucket = row;
        bad_bucket.insert("time_bucket".into(), Value::Long(12));
        assert!(ty.storage_to_entity(&bad_bucket).is_err());
    }
}
