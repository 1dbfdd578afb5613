//! Wire form of metric units
//!
//! A unit travels as ordered typed lists. Entity fields come first in
//! scope declaration order, then the time bucket, then the state fields in
//! function declaration order. The order is part of the contract.

use serde::{Deserialize, Serialize};

use oap_common::{DispatchError, Value};

use crate::functions::{DataTable, StateType, StateValue};

/// Version written in front of every encoded unit batch
pub const WIRE_VERSION: u16 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteData {
    pub strings: Vec<String>,
    pub longs: Vec<i64>,
    pub doubles: Vec<f64>,
    pub tables: Vec<DataTable>,
}

impl RemoteData {
    pub fn push_state(&mut self, value: StateValue) {
        match value {
            StateValue::Long(v) => self.longs.push(v),
            StateValue::Double(v) => self.doubles.push(v),
            StateValue::Table(t) => self.tables.push(t),
        }
    }
}

/// Sequential reader over a [`RemoteData`]
pub struct RemoteReader<'a> {
    data: &'a RemoteData,
    string: usize,
    long: usize,
    double: usize,
    table: usize,
}

impl<'a> RemoteReader<'a> {
    pub fn new(data: &'a RemoteData) -> Self {
        Self {
            data,
            string: 0,
            long: 0,
            double: 0,
            table: 0,
        }
    }

    pub fn string(&mut self) -> Result<String, DispatchError> {
        let value = self
            .data
            .strings
            .get(self.string)
            .cloned()
            .ok_or_else(|| truncated("string"))?;
        self.string += 1;
        Ok(value)
    }

    pub fn long(&mut self) -> Result<i64, DispatchError> {
        let value = *self.data.longs.get(self.long).ok_or_else(|| truncated("long"))?;
        self.long += 1;
        Ok(value)
    }

    pub fn double(&mut self) -> Result<f64, DispatchError> {
        let value = *self
            .data
            .doubles
            .get(self.double)
            .ok_or_else(|| truncated("double"))?;
        self.double += 1;
        Ok(value)
    }

    pub fn table(&mut self) -> Result<DataTable, DispatchError> {
        let value = self
            .data
            .tables
            .get(self.table)
            .cloned()
            .ok_or_else(|| truncated("table"))?;
        self.table += 1;
        Ok(value)
    }

    pub fn state(&mut self, ty: StateType) -> Result<StateValue, DispatchError> {
        Ok(match ty {
            StateType::Long => StateValue::Long(self.long()?),
            StateType::Double => StateValue::Double(self.double()?),
            StateType::Table => StateValue::Table(self.table()?),
        })
    }

    /// Entity values are written as strings, tagged by their first byte
    pub fn entity(&mut self) -> Result<Value, DispatchError> {
        decode_entity(&self.string()?)
    }

    /// Fail when fields were left unread
    pub fn finish(self) -> Result<(), DispatchError> {
        let unread = self.data.strings.len() - self.string
            + self.data.longs.len() - self.long
            + self.data.doubles.len() - self.double
            + self.data.tables.len() - self.table;
        if unread == 0 {
            Ok(())
        } else {
            Err(DispatchError::Remote(format!("{unread} trailing fields")))
        }
    }
}

fn truncated(kind: &str) -> DispatchError {
    DispatchError::Remote(format!("missing {kind} field"))
}

/// Entity values keep their type on the wire: `s:` string, `l:` long,
/// `d:` double, `b:` bool, `n:` null. Lists and maps travel as `j:` JSON.
pub fn encode_entity(value: &Value) -> String {
    match value {
        Value::Null => "n:".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Long(v) => format!("l:{v}"),
        Value::Double(v) => format!("d:{v}"),
        Value::String(s) => format!("s:{s}"),
        Value::List(_) | Value::Map(_) | Value::Struct(_) => {
            // Leaves an empty body that fails to decode
            format!("j:{}", serde_json::to_string(value).unwrap_or_default())
        }
    }
}

pub fn decode_entity(text: &str) -> Result<Value, DispatchError> {
    let bad = || DispatchError::Remote(format!("malformed entity value '{text}'"));
    let (tag, body) = text.split_once(':').ok_or_else(bad)?;
    match tag {
        "n" => Ok(Value::Null),
        "b" => body.parse().map(Value::Bool).map_err(|_| bad()),
        "l" => body.parse().map(Value::Long).map_err(|_| bad()),
        "d" => body.parse().map(Value::Double).map_err(|_| bad()),
        "s" => Ok(Value::String(body.to_string())),
        "j" => serde_json::from_str(body).map_err(|_| bad()),
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_order_and_trailing() {
        let data = RemoteData {
            strings: vec![encode_entity(&Value::from("svc")), encode_entity(&Value::Long(7))],
            longs: vec![202_401_011_230, 5],
            doubles: vec![],
            tables: vec![],
        };

        let mut reader = RemoteReader::new(&data);
        assert_eq!(reader.entity().unwrap(), Value::from("svc"));
        assert_eq!(reader.entity().unwrap(), Value::Long(7));
        assert_eq!(reader.long().unwrap(), 202_401_011_230);
        assert!(reader.double().is_err());

        let mut reader = RemoteReader::new(&data);
        reader.long().unwrap();
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_entity_encoding() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Long(-3),
            Value::Double(1.0),
            Value::Double(-0.25),
            Value::from("a:b"),
            Value::from("1.5"),
            Value::List(vec!["a".to_string(), "b,c".to_string()]),
        ] {
            assert_eq!(decode_entity(&encode_entity(&value)).unwrap(), value);
        }
        assert_eq!(encode_entity(&Value::Double(1.0)), "d:1");
        assert!(decode_entity("x:1").is_err());
        assert!(decode_entity("d:one").is_err());
        assert!(decode_entity("nocolon").is_err());
    }
}
