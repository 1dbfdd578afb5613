//! Per-event evaluation of resolved accessors, filters and entrance args

use std::cmp::Ordering;

use oap_common::Value;

use crate::functions::{ArgType, ArgValue, NumericWidth};
use crate::model::{Accessor, Coercion, EntranceArg, Matcher, NumericSource, Operand, ResolvedFilter};
use crate::ast::CastType;
use crate::source::SourceEvent;

pub(crate) type EvalResult<T> = std::result::Result<T, String>;

/// Read the value an accessor points at. Missing values read as null.
pub(crate) fn read(accessor: &Accessor, event: &SourceEvent) -> Value {
    let mut current: Option<Value> = None;
    for (i, step) in accessor.steps.iter().enumerate() {
        let name = step.field.field_name.as_str();
        let next = if i == 0 {
            event.get(name).cloned()
        } else {
            current.as_ref().and_then(|v| v.get(name))
        };
        current = match (&step.map_key, next) {
            (Some(key), Some(map)) => map.get(key),
            (_, next) => next,
        };
        if current.is_none() {
            return Value::Null;
        }
    }
    current.unwrap_or(Value::Null)
}

// ============================================================================
// Filters
// ============================================================================

/// Evaluate one filter against an event
pub(crate) fn matches(filter: &ResolvedFilter, event: &SourceEvent) -> EvalResult<bool> {
    let value = read(&filter.accessor, event);
    let operand = &filter.operand;

    Ok(match filter.matcher {
        Matcher::IsNull => value.is_null(),
        Matcher::NotNull => !value.is_null(),
        Matcher::Equal => !value.is_null() && equals(&value, operand)?,
        Matcher::NotEqual => value.is_null() || !equals(&value, operand)?,
        Matcher::Greater => compare(&value, operand)? == Some(Ordering::Greater),
        Matcher::Less => compare(&value, operand)? == Some(Ordering::Less),
        Matcher::GreaterOrEqual => matches!(
            compare(&value, operand)?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Matcher::LessOrEqual => matches!(
            compare(&value, operand)?,
            Some(Ordering::Less | Ordering::Equal)
        ),
        Matcher::InSet => match operand {
            Operand::Set(items) if !value.is_null() => {
                let mut hit = false;
                for item in items {
                    if equals(&value, item)? {
                        hit = true;
                        break;
                    }
                }
                hit
            }
            _ => false,
        },
        Matcher::Like => match (&value, operand) {
            (Value::String(s), Operand::String(pattern)) => like(s, pattern),
            (Value::Null, _) => false,
            (other, _) => return Err(mismatch(&filter.accessor, other)),
        },
        Matcher::Contain | Matcher::NotContain => {
            let found = match (&value, operand) {
                (Value::List(items), Operand::String(s)) => items.iter().any(|i| i == s),
                (Value::Null, _) => false,
                (other, _) => return Err(mismatch(&filter.accessor, other)),
            };
            (filter.matcher == Matcher::Contain) == found
        }
    })
}

fn mismatch(accessor: &Accessor, value: &Value) -> String {
    format!(
        "attribute {} holds a {} value, expected {}",
        accessor.path,
        value.type_name(),
        accessor.value_type
    )
}

fn equals(value: &Value, operand: &Operand) -> EvalResult<bool> {
    Ok(match (value, operand) {
        (Value::Bool(a), Operand::Bool(b)) => a == b,
        (Value::String(a), Operand::String(b) | Operand::Enum(b)) => a == b,
        (Value::Long(_) | Value::Double(_), Operand::Long(_) | Operand::Double(_)) => {
            compare(value, operand)? == Some(Ordering::Equal)
        }
        (value, operand) => {
            return Err(format!(
                "cannot compare a {} value with {operand}",
                value.type_name()
            ))
        }
    })
}

#[allow(clippy::cast_precision_loss)]
fn compare(value: &Value, operand: &Operand) -> EvalResult<Option<Ordering>> {
    Ok(match (value, operand) {
        (Value::Null, _) => None,
        (Value::Long(a), Operand::Long(b)) => Some(a.cmp(b)),
        (Value::Long(a), Operand::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Operand::Long(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Double(a), Operand::Double(b)) => a.partial_cmp(b),
        (value, operand) => {
            return Err(format!(
                "cannot order a {} value against {operand}",
                value.type_name()
            ))
        }
    })
}

/// `%` wildcards at either end, otherwise exact match
fn like(value: &str, pattern: &str) -> bool {
    let leading = pattern.starts_with('%');
    let trailing = pattern.len() > 1 && pattern.ends_with('%');
    let core = &pattern[usize::from(leading)..pattern.len() - usize::from(trailing)];
    match (leading, trailing) {
        (true, true) => value.contains(core),
        (true, false) => value.ends_with(core),
        (false, true) => value.starts_with(core),
        (false, false) => value == pattern,
    }
}

// ============================================================================
// Entrance arguments
// ============================================================================

/// Produce the `combine` argument for one entrance parameter
pub(crate) fn entrance_value(arg: &EntranceArg, event: &SourceEvent) -> EvalResult<ArgValue> {
    match arg {
        EntranceArg::ConstOne => Ok(ArgValue::Long(1)),
        EntranceArg::Literal(value) => Ok(value.clone()),
        EntranceArg::Expression(filter) => matches(filter, event).map(ArgValue::Bool),
        EntranceArg::Source { accessor, coercion } => {
            let value = read(accessor, event);
            coerce(&value, coercion).map_err(|reason| format!("{}: {reason}", accessor.path))
        }
        EntranceArg::Attribute { accessor, target } => {
            let value = read(accessor, event);
            let bad = || mismatch(accessor, &value);
            match target {
                ArgType::Int => {
                    let v = value.as_i64().ok_or_else(bad)?;
                    i32::try_from(v)
                        .map(ArgValue::Int)
                        .map_err(|_| format!("{}: {v} does not fit an int", accessor.path))
                }
                ArgType::Bool => value.as_bool().map(ArgValue::Bool).ok_or_else(bad),
                ArgType::String => value
                    .as_str()
                    .map(|s| ArgValue::Str(s.to_string()))
                    .ok_or_else(bad),
                ArgType::Label => match &value {
                    Value::Null => Err(format!("{} is not set", accessor.path)),
                    v => Ok(ArgValue::Str(v.to_string())),
                },
            }
        }
    }
}

/// Apply a compile-time coercion to the `from()` value.
/// Narrowing to int wraps, doubles truncate toward zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(crate) fn coerce(value: &Value, coercion: &Coercion) -> EvalResult<ArgValue> {
    let widened: Number = match (coercion.source, value) {
        (_, Value::Null) => return Err("value is not set".to_string()),
        (NumericSource::String, Value::String(s)) => {
            let s = s.trim();
            match coercion.cast {
                Some(CastType::StrToInt) => s
                    .parse::<i32>()
                    .map(|v| Number::Long(i64::from(v)))
                    .map_err(|_| format!("'{s}' is not an int"))?,
                _ => s
                    .parse::<i64>()
                    .map(Number::Long)
                    .map_err(|_| format!("'{s}' is not a long"))?,
            }
        }
        (NumericSource::Int | NumericSource::Long, Value::Long(v)) => Number::Long(*v),
        (NumericSource::Double, Value::Double(v)) => Number::Double(*v),
        (NumericSource::Double, Value::Long(v)) => Number::Double(*v as f64),
        (_, other) => return Err(format!("unexpected {} value", other.type_name())),
    };

    let cast = match (coercion.cast, widened) {
        (Some(CastType::Long | CastType::Int), Number::Double(v)) => Number::Long(v as i64),
        (Some(CastType::Int), Number::Long(v)) => Number::Long(i64::from(v as i32)),
        (_, n) => n,
    };

    Ok(match (coercion.target, cast) {
        (NumericWidth::Int, Number::Long(v)) => ArgValue::Int(v as i32),
        (NumericWidth::Int, Number::Double(v)) => ArgValue::Int(v as i32),
        (NumericWidth::Long, Number::Long(v)) => ArgValue::Long(v),
        (NumericWidth::Long, Number::Double(v)) => ArgValue::Long(v as i64),
        (NumericWidth::Double, Number::Long(v)) => ArgValue::Double(v as f64),
        (NumericWidth::Double, Number::Double(v)) => ArgValue::Double(v),
    })
}

#[derive(Clone, Copy)]
enum Number {
    Long(i64),
    Double(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::Enricher;
    use crate::parser::parse_script;
    use crate::schema::default_registry;
    use crate::model::CodeGenModel;
    use oap_common::TimeBucket;
    use std::collections::BTreeMap;

    fn model(text: &str) -> CodeGenModel {
        let registry = default_registry().unwrap();
        let script = parse_script("eval.oal", text).unwrap();
        Enricher::new(&registry).enrich(&script.metrics[0]).unwrap()
    }

    fn event() -> SourceEvent {
        let mut tag = BTreeMap::new();
        tag.insert("region".to_string(), "eu-west".to_string());
        let mut side_car = BTreeMap::new();
        side_car.insert("internalErrorCode".to_string(), Value::from("E42"));
        SourceEvent::new("Service", TimeBucket::minute(202_401_011_230).unwrap())
            .with("entityId", "svc")
            .with("latency", 120)
            .with("status", true)
            .with("httpResponseStatusCode", 404)
            .with("name", "checkout")
            .with("type", "HTTP")
            .with("tags", Value::List(vec!["a".into(), "b".into()]))
            .with("tag", Value::Map(tag))
            .with("sideCar", Value::Struct(side_car))
    }

    fn first_filter(text: &str) -> bool {
        matches(&model(text).filters[0], &event()).unwrap()
    }

    #[test]
    fn test_read_paths() {
        let m = model(r#"a = from(Service.*).filter(tag["region"] == "x").filter(sideCar.internalErrorCode == "y").filter(tag["nope"] == null).count();"#);
        let e = event();
        assert_eq!(read(&m.filters[0].accessor, &e), Value::from("eu-west"));
        assert_eq!(read(&m.filters[1].accessor, &e), Value::from("E42"));
        assert_eq!(read(&m.filters[2].accessor, &e), Value::Null);
    }

    #[test]
    fn test_filter_matching() {
        assert!(first_filter("a = from(Service.*).filter(status == true).count();"));
        assert!(!first_filter("a = from(Service.*).filter(status == false).count();"));
        assert!(first_filter("a = from(Service.*).filter(latency > 100).count();"));
        assert!(first_filter("a = from(Service.*).filter(latency <= 120).count();"));
        assert!(!first_filter("a = from(Service.*).filter(latency < 120).count();"));
        assert!(first_filter("a = from(Service.*).filter(httpResponseStatusCode in [500, 404]).count();"));
        assert!(!first_filter("a = from(Service.*).filter(httpResponseStatusCode in [500, 503]).count();"));
        assert!(first_filter("a = from(Service.*).filter(type == RequestType.HTTP).count();"));
        assert!(first_filter("a = from(Service.*).filter(name like \"check%\").count();"));
        assert!(first_filter("a = from(Service.*).filter(name like \"%out\").count();"));
        assert!(first_filter("a = from(Service.*).filter(name like \"%eck%\").count();"));
        assert!(!first_filter("a = from(Service.*).filter(name like \"check\").count();"));
        assert!(first_filter("a = from(Service.*).filter(tags contain \"a\").count();"));
        assert!(first_filter("a = from(Service.*).filter(tags not contain \"z\").count();"));
    }

    #[test]
    fn test_null_semantics() {
        assert!(first_filter("a = from(Service.*).filter(rpcStatusCode == null).count();"));
        assert!(!first_filter("a = from(Service.*).filter(rpcStatusCode == \"OK\").count();"));
        assert!(first_filter("a = from(Service.*).filter(rpcStatusCode != \"OK\").count();"));
        assert!(!first_filter("a = from(Service.*).filter(endpointName in [\"x\"]).count();"));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let m = model("a = from(Service.*).filter(latency > 10).count();");
        let e = event().with("latency", "slow");
        assert!(matches(&m.filters[0], &e).is_err());
    }

    #[test]
    fn test_like_patterns() {
        assert!(like("abc", "%"));
        assert!(like("abc", "a%"));
        assert!(like("abc", "%c"));
        assert!(like("abc", "%b%"));
        assert!(like("abc", "abc"));
        assert!(!like("abc", "ab"));
    }

    #[test]
    fn test_entrance_values() {
        let m = model("a = from(Service.latency).longAvg();");
        let e = event();
        assert_eq!(entrance_value(&m.entrance[0], &e).unwrap(), ArgValue::Long(120));
        assert_eq!(entrance_value(&m.entrance[1], &e).unwrap(), ArgValue::Long(1));

        let m = model("a = from(Service.latency).apdex(name, status);");
        assert_eq!(entrance_value(&m.entrance[0], &e).unwrap(), ArgValue::Int(120));
        assert_eq!(entrance_value(&m.entrance[1], &e).unwrap(), ArgValue::Str("checkout".into()));
        assert_eq!(entrance_value(&m.entrance[2], &e).unwrap(), ArgValue::Bool(true));

        let m = model("a = from(Service.*).labelCount(httpResponseStatusCode);");
        assert_eq!(entrance_value(&m.entrance[0], &e).unwrap(), ArgValue::Str("404".into()));

        let m = model("a = from(Service.*).percent(status == true);");
        assert_eq!(entrance_value(&m.entrance[0], &e).unwrap(), ArgValue::Bool(true));
    }

    #[test]
    fn test_missing_source_is_error() {
        let m = model("a = from(Service.latency).sum();");
        let e = SourceEvent::new("Service", TimeBucket::minute(202_401_011_230).unwrap());
        assert!(entrance_value(&m.entrance[0], &e).is_err());
    }

    #[test]
    fn test_string_casts() {
        let m = model(r#"a = from((str->long)Service.tag["size"]).sum();"#);
        let mut tag = BTreeMap::new();
        tag.insert("size".to_string(), " 2048 ".to_string());
        let e = event().with("tag", Value::Map(tag.clone()));
        assert_eq!(entrance_value(&m.entrance[0], &e).unwrap(), ArgValue::Long(2048));

        tag.insert("size".to_string(), "big".to_string());
        let e = event().with("tag", Value::Map(tag));
        assert!(entrance_value(&m.entrance[0], &e).is_err());
    }

    #[test]
    fn test_numeric_coercions() {
        let c = |source, cast, target| Coercion {
            source,
            cast,
            target,
        };
        assert_eq!(
            coerce(&Value::Long(7), &c(NumericSource::Int, None, NumericWidth::Double)).unwrap(),
            ArgValue::Double(7.0)
        );
        assert_eq!(
            coerce(&Value::Double(7.9), &c(NumericSource::Double, Some(CastType::Long), NumericWidth::Long)).unwrap(),
            ArgValue::Long(7)
        );
        assert_eq!(
            coerce(&Value::Long(1 << 32 | 5), &c(NumericSource::Long, None, NumericWidth::Int)).unwrap(),
            ArgValue::Int(5)
        );
    }
}
