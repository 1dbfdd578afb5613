//! Accumulator state and its combine/merge/value semantics
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use oap_common::DownSampling;

use super::{ArgValue, DataTable, FunctionContext, FunctionKind, StateType};

/// Ranks reported by `percentile2`
pub const PERCENTILE_RANKS: [i64; 5] = [50, 75, 90, 95, 99];

/// Reported value of a metric unit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Long(i64),
    Double(f64),
    Table(BTreeMap<String, i64>),
}

/// One state field value, see [`FunctionKind::state_fields`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    Long(i64),
    Double(f64),
    Table(DataTable),
}

impl StateValue {
    pub fn state_type(&self) -> StateType {
        match self {
            Self::Long(_) => StateType::Long,
            Self::Double(_) => StateType::Double,
            Self::Table(_) => StateType::Table,
        }
    }
}

/// Aggregation state of one metric unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Accumulator {
    Count { value: i64 },
    Cpm { total: i64 },
    Sum { value: i64 },
    DoubleSum { value: f64 },
    LongAvg { summation: i64, count: i64 },
    DoubleAvg { summation: f64, count: i64 },
    Max { value: i64 },
    Min { value: i64 },
    MaxDouble { value: f64 },
    MinDouble { value: f64 },
    Percent { total: i64, matched: i64 },
    Rate { numerator: i64, denominator: i64 },
    Apdex { satisfied: i64, tolerating: i64, total: i64 },
    /// `step` is 0 until the first combine
    Histogram { step: i64, dataset: DataTable },
    /// `precision` is 0 until the first combine
    Percentile2 { precision: i64, dataset: DataTable },
    LabelCount { dataset: DataTable },
    LabelSum { summation: DataTable },
    LabelAvg { summation: DataTable, count: DataTable },
}

type StepResult = std::result::Result<(), String>;

impl Accumulator {
    /// Empty state for a function
    pub fn new(kind: FunctionKind) -> Self {
        match kind {
            FunctionKind::Count => Self::Count { value: 0 },
            FunctionKind::Cpm => Self::Cpm { total: 0 },
            FunctionKind::Sum => Self::Sum { value: 0 },
            FunctionKind::DoubleSum => Self::DoubleSum { value: 0.0 },
            FunctionKind::LongAvg => Self::LongAvg {
                summation: 0,
                count: 0,
            },
            FunctionKind::DoubleAvg => Self::DoubleAvg {
                summation: 0.0,
                count: 0,
            },
            FunctionKind::Max => Self::Max { value: i64::MIN },
            FunctionKind::Min => Self::Min { value: i64::MAX },
            FunctionKind::MaxDouble => Self::MaxDouble {
                value: f64::NEG_INFINITY,
            },
            FunctionKind::MinDouble => Self::MinDouble {
                value: f64::INFINITY,
            },
            FunctionKind::Percent => Self::Percent {
                total: 0,
                matched: 0,
            },
            FunctionKind::Rate => Self::Rate {
                numerator: 0,
                denominator: 0,
            },
            FunctionKind::Apdex => Self::Apdex {
                satisfied: 0,
                tolerating: 0,
                total: 0,
            },
            FunctionKind::Histogram => Self::Histogram {
                step: 0,
                dataset: DataTable::new(),
            },
            FunctionKind::Percentile2 => Self::Percentile2 {
                precision: 0,
                dataset: DataTable::new(),
            },
            FunctionKind::LabelCount => Self::LabelCount {
                dataset: DataTable::new(),
            },
            FunctionKind::LabelSum => Self::LabelSum {
                summation: DataTable::new(),
            },
            FunctionKind::LabelAvg => Self::LabelAvg {
                summation: DataTable::new(),
                count: DataTable::new(),
            },
        }
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Self::Count { .. } => FunctionKind::Count,
            Self::Cpm { .. } => FunctionKind::Cpm,
            Self::Sum { .. } => FunctionKind::Sum,
            Self::DoubleSum { .. } => FunctionKind::DoubleSum,
            Self::LongAvg { .. } => FunctionKind::LongAvg,
            Self::DoubleAvg { .. } => FunctionKind::DoubleAvg,
            Self::Max { .. } => FunctionKind::Max,
            Self::Min { .. } => FunctionKind::Min,
            Self::MaxDouble { .. } => FunctionKind::MaxDouble,
            Self::MinDouble { .. } => FunctionKind::MinDouble,
            Self::Percent { .. } => FunctionKind::Percent,
            Self::Rate { .. } => FunctionKind::Rate,
            Self::Apdex { .. } => FunctionKind::Apdex,
            Self::Histogram { .. } => FunctionKind::Histogram,
            Self::Percentile2 { .. } => FunctionKind::Percentile2,
            Self::LabelCount { .. } => FunctionKind::LabelCount,
            Self::LabelSum { .. } => FunctionKind::LabelSum,
            Self::LabelAvg { .. } => FunctionKind::LabelAvg,
        }
    }

    // ========================================================================
    // Per-event combine
    // ========================================================================

    /// Fold one event's entrance arguments into the state.
    ///
    /// Arguments are validated before anything is mutated, so a failed
    /// combine leaves the state untouched.
    pub fn combine(&mut self, args: &[ArgValue], ctx: &FunctionContext) -> StepResult {
        let kind = self.kind();
        if args.len() != kind.entrance().len() {
            return Err(format!(
                "{kind} expects {} arguments, got {}",
                kind.entrance().len(),
                args.len()
            ));
        }

        match self {
            Self::Count { value } | Self::Cpm { total: value } => {
                *value = value.wrapping_add(long(args, 0)?);
            }
            Self::Sum { value } => *value = value.wrapping_add(long(args, 0)?),
            Self::DoubleSum { value } => *value += double(args, 0)?,
            Self::LongAvg { summation, count } => {
                let (v, n) = (long(args, 0)?, long(args, 1)?);
                *summation = summation.wrapping_add(v);
                *count = count.wrapping_add(n);
            }
            Self::DoubleAvg { summation, count } => {
                let (v, n) = (double(args, 0)?, long(args, 1)?);
                *summation += v;
                *count = count.wrapping_add(n);
            }
            Self::Max { value } => *value = (*value).max(long(args, 0)?),
            Self::Min { value } => *value = (*value).min(long(args, 0)?),
            Self::MaxDouble { value } => *value = value.max(double(args, 0)?),
            Self::MinDouble { value } => *value = value.min(double(args, 0)?),
            Self::Percent { total, matched } => {
                let hit = boolean(args, 0)?;
                *total = total.wrapping_add(1);
                if hit {
                    *matched = matched.wrapping_add(1);
                }
            }
            Self::Rate {
                numerator,
                denominator,
            } => {
                let (num, den) = (boolean(args, 0)?, boolean(args, 1)?);
                if num {
                    *numerator = numerator.wrapping_add(1);
                }
                if den {
                    *denominator = denominator.wrapping_add(1);
                }
            }
            Self::Apdex {
                satisfied,
                tolerating,
                total,
            } => {
                let latency = long(args, 0)?;
                let service = string(args, 1)?;
                let status = boolean(args, 2)?;
                let threshold = ctx.apdex.threshold(service);
                *total = total.wrapping_add(1);
                if status {
                    if latency <= threshold {
                        *satisfied = satisfied.wrapping_add(1);
                    } else if latency <= threshold.saturating_mul(4) {
                        *tolerating = tolerating.wrapping_add(1);
                    }
                }
            }
            Self::Histogram { step, dataset } => {
                let value = long(args, 0)?;
                let new_step = long(args, 1)?;
                let max_steps = long(args, 2)?;
                if new_step <= 0 || max_steps <= 0 {
                    return Err(format!(
                        "histogram step and bucket count must be positive, got {new_step} and {max_steps}"
                    ));
                }
                if *step != 0 && *step != new_step {
                    return Err(format!("histogram step changed from {step} to {new_step}"));
                }
                let index = (value.max(0) / new_step).min(max_steps - 1);
                *step = new_step;
                dataset.accumulate(&(index * new_step).to_string(), 1);
            }
            Self::Percentile2 { precision, dataset } => {
                let value = long(args, 0)?;
                let new_precision = long(args, 1)?;
                if new_precision <= 0 {
                    return Err(format!("percentile precision must be positive, got {new_precision}"));
                }
                if *precision != 0 && *precision != new_precision {
                    return Err(format!(
                        "percentile precision changed from {precision} to {new_precision}"
                    ));
                }
                *precision = new_precision;
                dataset.accumulate(&(value / new_precision).to_string(), 1);
            }
            Self::LabelCount { dataset } => {
                let (label, n) = (string(args, 0)?, long(args, 1)?);
                dataset.accumulate(label, n);
            }
            Self::LabelSum { summation } => {
                let (value, label) = (long(args, 0)?, string(args, 1)?);
                summation.accumulate(label, value);
            }
            Self::LabelAvg { summation, count } => {
                let value = long(args, 0)?;
                let label = string(args, 1)?;
                let n = long(args, 2)?;
                summation.accumulate(label, value);
                count.accumulate(label, n);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Cross-instance merge
    // ========================================================================

    /// Merge another instance of the same function into this one.
    ///
    /// Commutative and associative for every function.
    pub fn merge(&mut self, other: &Accumulator) -> StepResult {
        match (self, other) {
            (Self::Count { value: a }, Self::Count { value: b })
            | (Self::Cpm { total: a }, Self::Cpm { total: b })
            | (Self::Sum { value: a }, Self::Sum { value: b }) => *a = a.wrapping_add(*b),
            (Self::DoubleSum { value: a }, Self::DoubleSum { value: b }) => *a += b,
            (
                Self::LongAvg { summation, count },
                Self::LongAvg {
                    summation: s,
                    count: c,
                },
            ) => {
                *summation = summation.wrapping_add(*s);
                *count = count.wrapping_add(*c);
            }
            (
                Self::DoubleAvg { summation, count },
                Self::DoubleAvg {
                    summation: s,
                    count: c,
                },
            ) => {
                *summation += s;
                *count = count.wrapping_add(*c);
            }
            (Self::Max { value: a }, Self::Max { value: b }) => *a = (*a).max(*b),
            (Self::Min { value: a }, Self::Min { value: b }) => *a = (*a).min(*b),
            (Self::MaxDouble { value: a }, Self::MaxDouble { value: b }) => *a = a.max(*b),
            (Self::MinDouble { value: a }, Self::MinDouble { value: b }) => *a = a.min(*b),
            (
                Self::Percent { total, matched },
                Self::Percent {
                    total: t,
                    matched: m,
                },
            ) => {
                *total = total.wrapping_add(*t);
                *matched = matched.wrapping_add(*m);
            }
            (
                Self::Rate {
                    numerator,
                    denominator,
                },
                Self::Rate {
                    numerator: n,
                    denominator: d,
                },
            ) => {
                *numerator = numerator.wrapping_add(*n);
                *denominator = denominator.wrapping_add(*d);
            }
            (
                Self::Apdex {
                    satisfied,
                    tolerating,
                    total,
                },
                Self::Apdex {
                    satisfied: s,
                    tolerating: t,
                    total: n,
                },
            ) => {
                *satisfied = satisfied.wrapping_add(*s);
                *tolerating = tolerating.wrapping_add(*t);
                *total = total.wrapping_add(*n);
            }
            (
                Self::Histogram { step, dataset },
                Self::Histogram {
                    step: other_step,
                    dataset: other_dataset,
                },
            ) => {
                *step = merge_setting("histogram step", *step, *other_step)?;
                dataset.merge(other_dataset);
            }
            (
                Self::Percentile2 { precision, dataset },
                Self::Percentile2 {
                    precision: other_precision,
                    dataset: other_dataset,
                },
            ) => {
                *precision = merge_setting("percentile precision", *precision, *other_precision)?;
                dataset.merge(other_dataset);
            }
            (Self::LabelCount { dataset: a }, Self::LabelCount { dataset: b })
            | (Self::LabelSum { summation: a }, Self::LabelSum { summation: b }) => a.merge(b),
            (
                Self::LabelAvg { summation, count },
                Self::LabelAvg {
                    summation: s,
                    count: c,
                },
            ) => {
                summation.merge(s);
                count.merge(c);
            }
            (this, other) => {
                return Err(format!(
                    "cannot merge {} state into {}",
                    other.kind(),
                    this.kind()
                ))
            }
        }
        Ok(())
    }

    // ========================================================================
    // Reported value
    // ========================================================================

    /// Value computed on read. Zero denominators report 0.
    pub fn value(&self, downsampling: DownSampling) -> MetricValue {
        match self {
            Self::Count { value } | Self::Sum { value } | Self::Max { value } | Self::Min { value } => {
                MetricValue::Long(*value)
            }
            Self::Cpm { total } => MetricValue::Long(total / downsampling.minutes()),
            Self::DoubleSum { value } | Self::MaxDouble { value } | Self::MinDouble { value } => {
                MetricValue::Double(*value)
            }
            Self::LongAvg { summation, count } => MetricValue::Long(ratio(*summation, *count, 1)),
            Self::DoubleAvg { summation, count } => MetricValue::Double(if *count == 0 {
                0.0
            } else {
                summation / *count as f64
            }),
            Self::Percent { total, matched } => MetricValue::Long(ratio(*matched, *total, 10_000)),
            Self::Rate {
                numerator,
                denominator,
            } => MetricValue::Long(ratio(*numerator, *denominator, 10_000)),
            Self::Apdex {
                satisfied,
                tolerating,
                total,
            } => {
                let score = satisfied
                    .saturating_mul(10_000)
                    .saturating_add(tolerating.saturating_mul(5_000));
                MetricValue::Long(if *total == 0 { 0 } else { score / total })
            }
            Self::Histogram { dataset, .. } | Self::LabelCount { dataset } => {
                MetricValue::Table(dataset.clone().into_inner())
            }
            Self::LabelSum { summation } => MetricValue::Table(summation.clone().into_inner()),
            Self::Percentile2 { precision, dataset } => {
                MetricValue::Table(percentiles(*precision, dataset))
            }
            Self::LabelAvg { summation, count } => MetricValue::Table(
                summation
                    .iter()
                    .map(|(label, sum)| (label.clone(), ratio(*sum, count.get(label), 1)))
                    .collect(),
            ),
        }
    }

    // ========================================================================
    // State fields
    // ========================================================================

    /// State field values in [`FunctionKind::state_fields`] order
    pub fn state(&self) -> Vec<StateValue> {
        use StateValue::{Double, Long, Table};
        match self {
            Self::Count { value }
            | Self::Cpm { total: value }
            | Self::Sum { value }
            | Self::Max { value }
            | Self::Min { value } => vec![Long(*value)],
            Self::DoubleSum { value } | Self::MaxDouble { value } | Self::MinDouble { value } => {
                vec![Double(*value)]
            }
            Self::LongAvg { summation, count } => vec![Long(*summation), Long(*count)],
            Self::DoubleAvg { summation, count } => vec![Double(*summation), Long(*count)],
            Self::Percent { total, matched } => vec![Long(*total), Long(*matched)],
            Self::Rate {
                numerator,
                denominator,
            } => vec![Long(*numerator), Long(*denominator)],
            Self::Apdex {
                satisfied,
                tolerating,
                total,
            } => vec![Long(*satisfied), Long(*tolerating), Long(*total)],
            Self::Histogram { step, dataset } => vec![Long(*step), Table(dataset.clone())],
            Self::Percentile2 { precision, dataset } => {
                vec![Long(*precision), Table(dataset.clone())]
            }
            Self::LabelCount { dataset } => vec![Table(dataset.clone())],
            Self::LabelSum { summation } => vec![Table(summation.clone())],
            Self::LabelAvg { summation, count } => {
                vec![Table(summation.clone()), Table(count.clone())]
            }
        }
    }

    /// Rebuild state from values in [`FunctionKind::state_fields`] order
    pub fn from_state(kind: FunctionKind, values: Vec<StateValue>) -> Result<Self, String> {
        use StateValue::{Double, Long, Table};
        let expected = kind.state_fields().len();
        if values.len() != expected {
            return Err(format!(
                "{kind} state has {expected} fields, got {}",
                values.len()
            ));
        }

        let mut values = values.into_iter();
        let mut next = || values.next().ok_or_else(|| format!("{kind} state is truncated"));
        let mismatch = |field: &StateValue| {
            format!("{kind} state field has unexpected type {:?}", field.state_type())
        };

        let state = match kind {
            FunctionKind::Count
            | FunctionKind::Cpm
            | FunctionKind::Sum
            | FunctionKind::Max
            | FunctionKind::Min => match next()? {
                Long(v) => {
                    let mut acc = Self::new(kind);
                    acc.set_single_long(v);
                    acc
                }
                other => return Err(mismatch(&other)),
            },
            FunctionKind::DoubleSum | FunctionKind::MaxDouble | FunctionKind::MinDouble => {
                match next()? {
                    Double(v) => match kind {
                        FunctionKind::DoubleSum => Self::DoubleSum { value: v },
                        FunctionKind::MaxDouble => Self::MaxDouble { value: v },
                        _ => Self::MinDouble { value: v },
                    },
                    other => return Err(mismatch(&other)),
                }
            }
            FunctionKind::LongAvg => match (next()?, next()?) {
                (Long(summation), Long(count)) => Self::LongAvg { summation, count },
                (other, _) => return Err(mismatch(&other)),
            },
            FunctionKind::DoubleAvg => match (next()?, next()?) {
                (Double(summation), Long(count)) => Self::DoubleAvg { summation, count },
                (other, _) => return Err(mismatch(&other)),
            },
            FunctionKind::Percent => match (next()?, next()?) {
                (Long(total), Long(matched)) => Self::Percent { total, matched },
                (other, _) => return Err(mismatch(&other)),
            },
            FunctionKind::Rate => match (next()?, next()?) {
                (Long(numerator), Long(denominator)) => Self::Rate {
                    numerator,
                    denominator,
                },
                (other, _) => return Err(mismatch(&other)),
            },
            FunctionKind::Apdex => match (next()?, next()?, next()?) {
                (Long(satisfied), Long(tolerating), Long(total)) => Self::Apdex {
                    satisfied,
                    tolerating,
                    total,
                },
                (other, _, _) => return Err(mismatch(&other)),
            },
            FunctionKind::Histogram => match (next()?, next()?) {
                (Long(step), Table(dataset)) => Self::Histogram { step, dataset },
                (other, _) => return Err(mismatch(&other)),
            },
            FunctionKind::Percentile2 => match (next()?, next()?) {
                (Long(precision), Table(dataset)) => Self::Percentile2 { precision, dataset },
                (other, _) => return Err(mismatch(&other)),
            },
            FunctionKind::LabelCount => match next()? {
                Table(dataset) => Self::LabelCount { dataset },
                other => return Err(mismatch(&other)),
            },
            FunctionKind::LabelSum => match next()? {
                Table(summation) => Self::LabelSum { summation },
                other => return Err(mismatch(&other)),
            },
            FunctionKind::LabelAvg => match (next()?, next()?) {
                (Table(summation), Table(count)) => Self::LabelAvg { summation, count },
                (other, _) => return Err(mismatch(&other)),
            },
        };
        Ok(state)
    }

    fn set_single_long(&mut self, v: i64) {
        match self {
            Self::Count { value }
            | Self::Cpm { total: value }
            | Self::Sum { value }
            | Self::Max { value }
            | Self::Min { value } => *value = v,
            _ => {}
        }
    }
}

fn ratio(numerator: i64, denominator: i64, scale: i64) -> i64 {
    if denominator == 0 {
        0
    } else {
        numerator.saturating_mul(scale) / denominator
    }
}

/// Settings such as the histogram step must agree; 0 means not yet set
fn merge_setting(name: &str, a: i64, b: i64) -> Result<i64, String> {
    match (a, b) {
        (0, v) | (v, 0) => Ok(v),
        (a, b) if a == b => Ok(a),
        (a, b) => Err(format!("{name} mismatch: {a} vs {b}")),
    }
}

fn percentiles(precision: i64, dataset: &DataTable) -> BTreeMap<String, i64> {
    let total = dataset.sum();
    let entries = dataset.numeric_entries();
    let mut result = BTreeMap::new();
    if total == 0 {
        return result;
    }

    for rank in PERCENTILE_RANKS {
        let roof = total.saturating_mul(rank).saturating_add(50) / 100;
        let mut count = 0;
        for (index, n) in &entries {
            count = n.saturating_add(count);
            if count >= roof {
                result.insert(rank.to_string(), index.saturating_mul(precision));
                break;
            }
        }
    }
    result
}

fn arg<'a>(args: &'a [ArgValue], index: usize) -> Result<&'a ArgValue, String> {
    args.get(index)
        .ok_or_else(|| format!("missing argument #{index}"))
}

fn long(args: &[ArgValue], index: usize) -> Result<i64, String> {
    let value = arg(args, index)?;
    value
        .as_i64()
        .ok_or_else(|| format!("argument #{index} is not an integer: {value:?}"))
}

fn double(args: &[ArgValue], index: usize) -> Result<f64, String> {
    let value = arg(args, index)?;
    value
        .as_f64()
        .ok_or_else(|| format!("argument #{index} is not a number: {value:?}"))
}

fn boolean(args: &[ArgValue], index: usize) -> Result<bool, String> {
    let value = arg(args, index)?;
    value
        .as_bool()
        .ok_or_else(|| format!("argument #{index} is not a boolean: {value:?}"))
}

fn string<'a>(args: &'a [ArgValue], index: usize) -> Result<&'a str, String> {
    let value = arg(args, index)?;
    value
        .as_str()
        .ok_or_else(|| format!("argument #{index} is not a string: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oap_common::config::ApdexConfig;

    fn ctx() -> FunctionContext {
        FunctionContext::default()
    }

    fn combined(kind: FunctionKind, events: &[Vec<ArgValue>]) -> Accumulator {
        let mut acc = Accumulator::new(kind);
        for args in events {
            acc.combine(args, &ctx()).unwrap();
        }
        acc
    }

    #[test]
    fn test_long_avg() {
        let acc = combined(
            FunctionKind::LongAvg,
            &[
                vec![ArgValue::Long(100), ArgValue::Long(1)],
                vec![ArgValue::Long(200), ArgValue::Long(1)],
                vec![ArgValue::Long(300), ArgValue::Long(1)],
            ],
        );
        assert_eq!(
            acc,
            Accumulator::LongAvg {
                summation: 600,
                count: 3
            }
        );
        assert_eq!(acc.value(DownSampling::Minute), MetricValue::Long(200));
    }

    #[test]
    fn test_average_of_nothing_is_zero() {
        assert_eq!(
            Accumulator::new(FunctionKind::LongAvg).value(DownSampling::Minute),
            MetricValue::Long(0)
        );
        assert_eq!(
            Accumulator::new(FunctionKind::DoubleAvg).value(DownSampling::Minute),
            MetricValue::Double(0.0)
        );
        assert_eq!(
            Accumulator::new(FunctionKind::Percent).value(DownSampling::Minute),
            MetricValue::Long(0)
        );
    }

    #[test]
    fn test_cpm_per_granularity() {
        let mut acc = Accumulator::new(FunctionKind::Cpm);
        for _ in 0..120 {
            acc.combine(&[ArgValue::Long(1)], &ctx()).unwrap();
        }
        assert_eq!(acc.value(DownSampling::Minute), MetricValue::Long(120));
        assert_eq!(acc.value(DownSampling::Hour), MetricValue::Long(2));
    }

    #[test]
    fn test_percent() {
        let acc = combined(
            FunctionKind::Percent,
            &[
                vec![ArgValue::Bool(true)],
                vec![ArgValue::Bool(false)],
                vec![ArgValue::Bool(true)],
                vec![ArgValue::Bool(true)],
            ],
        );
        assert_eq!(acc.value(DownSampling::Minute), MetricValue::Long(7500));
    }

    #[test]
    fn test_apdex_uses_service_threshold() {
        let mut apdex = ApdexConfig::default();
        apdex.services.insert("slow".to_string(), 1000);
        let ctx = FunctionContext::new(apdex);

        let mut acc = Accumulator::new(FunctionKind::Apdex);
        let event = |latency: i64, service: &str, ok: bool| {
            vec![
                ArgValue::Int(i32::try_from(latency).unwrap()),
                ArgValue::Str(service.to_string()),
                ArgValue::Bool(ok),
            ]
        };
        acc.combine(&event(400, "fast", true), &ctx).unwrap(); // satisfied
        acc.combine(&event(1500, "fast", true), &ctx).unwrap(); // tolerating
        acc.combine(&event(2500, "fast", true), &ctx).unwrap(); // frustrated
        acc.combine(&event(900, "slow", true), &ctx).unwrap(); // satisfied
        acc.combine(&event(10, "fast", false), &ctx).unwrap(); // error

        assert_eq!(
            acc,
            Accumulator::Apdex {
                satisfied: 2,
                tolerating: 1,
                total: 5
            }
        );
        assert_eq!(acc.value(DownSampling::Minute), MetricValue::Long(5000));
    }

    #[test]
    fn test_histogram_buckets() {
        let event = |v: i32| vec![ArgValue::Int(v), ArgValue::Int(100), ArgValue::Long(3)];
        let acc = combined(
            FunctionKind::Histogram,
            &[event(50), event(150), event(199), event(5000), event(-3)],
        );
        let MetricValue::Table(table) = acc.value(DownSampling::Minute) else {
            panic!("histogram reports a table");
        };
        assert_eq!(table.get("0"), Some(&2));
        assert_eq!(table.get("100"), Some(&2));
        assert_eq!(table.get("200"), Some(&1));
    }

    #[test]
    fn test_histogram_step_must_agree() {
        let mut acc = Accumulator::new(FunctionKind::Histogram);
        acc.combine(&[ArgValue::Int(1), ArgValue::Int(100), ArgValue::Long(20)], &ctx())
            .unwrap();
        let before = acc.clone();
        assert!(acc
            .combine(&[ArgValue::Int(1), ArgValue::Int(50), ArgValue::Long(20)], &ctx())
            .is_err());
        assert_eq!(acc, before);
    }

    #[test]
    fn test_percentile_ranks() {
        let events: Vec<_> = (1..=100)
            .map(|v| vec![ArgValue::Int(v), ArgValue::Int(10)])
            .collect();
        let acc = combined(FunctionKind::Percentile2, &events);
        let MetricValue::Table(table) = acc.value(DownSampling::Minute) else {
            panic!("percentile reports a table");
        };
        assert_eq!(table.get("50"), Some(&50));
        assert_eq!(table.get("90"), Some(&90));
        assert_eq!(table.get("99"), Some(&90));
        assert_eq!(table.len(), PERCENTILE_RANKS.len());
    }

    #[test]
    fn test_label_avg() {
        let acc = combined(
            FunctionKind::LabelAvg,
            &[
                vec![ArgValue::Long(10), ArgValue::Str("a".into()), ArgValue::Long(1)],
                vec![ArgValue::Long(30), ArgValue::Str("a".into()), ArgValue::Long(1)],
                vec![ArgValue::Long(7), ArgValue::Str("b".into()), ArgValue::Long(1)],
            ],
        );
        let MetricValue::Table(table) = acc.value(DownSampling::Minute) else {
            panic!("labelAvg reports a table");
        };
        assert_eq!(table.get("a"), Some(&20));
        assert_eq!(table.get("b"), Some(&7));
    }

    #[test]
    fn test_merge_matches_sequential_combine() {
        let a = combined(FunctionKind::Max, &[vec![ArgValue::Long(3)], vec![ArgValue::Long(9)]]);
        let b = combined(FunctionKind::Max, &[vec![ArgValue::Long(5)]]);
        let mut merged = a.clone();
        merged.merge(&b).unwrap();
        assert_eq!(merged, Accumulator::Max { value: 9 });

        let mut reversed = b;
        reversed.merge(&a).unwrap();
        assert_eq!(merged, reversed);
    }

    #[test]
    fn test_overflow_wraps_in_combine_and_merge() {
        let sum = |v: i64| combined(FunctionKind::Sum, &[vec![ArgValue::Long(v)]]);
        let label_sum = |v: i64| {
            combined(
                FunctionKind::LabelSum,
                &[vec![ArgValue::Long(v), ArgValue::Str("a".into())]],
            )
        };

        for (a, b, c, sequential) in [
            (
                sum(i64::MAX),
                sum(1),
                sum(-1),
                combined(
                    FunctionKind::Sum,
                    &[vec![ArgValue::Long(i64::MAX)], vec![ArgValue::Long(1)], vec![ArgValue::Long(-1)]],
                ),
            ),
            (
                label_sum(i64::MIN),
                label_sum(-1),
                label_sum(1),
                combined(
                    FunctionKind::LabelSum,
                    &[
                        vec![ArgValue::Long(i64::MIN), ArgValue::Str("a".into())],
                        vec![ArgValue::Long(-1), ArgValue::Str("a".into())],
                        vec![ArgValue::Long(1), ArgValue::Str("a".into())],
                    ],
                ),
            ),
        ] {
            let mut left = a.clone();
            left.merge(&b).unwrap();
            left.merge(&c).unwrap();

            let mut right = b.clone();
            right.merge(&c).unwrap();
            let mut grouped = a.clone();
            grouped.merge(&right).unwrap();

            let mut reversed = c.clone();
            reversed.merge(&b).unwrap();
            reversed.merge(&a).unwrap();

            assert_eq!(left, grouped);
            assert_eq!(left, reversed);
            assert_eq!(left, sequential);
        }

        let mut percent = Accumulator::Percent {
            total: i64::MAX,
            matched: i64::MAX,
        };
        percent.combine(&[ArgValue::Bool(true)], &ctx()).unwrap();
        percent
            .merge(&Accumulator::Percent { total: 1, matched: 0 })
            .unwrap();
        assert_eq!(
            percent,
            Accumulator::Percent {
                total: i64::MIN + 1,
                matched: i64::MIN
            }
        );
    }

    #[test]
    fn test_merge_rejects_other_function() {
        let mut count = Accumulator::new(FunctionKind::Count);
        assert!(count.merge(&Accumulator::new(FunctionKind::Sum)).is_err());
    }

    #[test]
    fn test_combine_rejects_wrong_arity() {
        let mut count = Accumulator::new(FunctionKind::Count);
        assert!(count.combine(&[], &ctx()).is_err());
        assert!(count
            .combine(&[ArgValue::Str("x".into())], &ctx())
            .is_err());
        assert_eq!(count, Accumulator::Count { value: 0 });
    }

    #[test]
    fn test_state_round_trip_every_function() {
        for kind in FunctionKind::all() {
            let acc = Accumulator::new(kind);
            assert_eq!(Accumulator::from_state(kind, acc.state()).unwrap(), acc);
        }
        assert!(Accumulator::from_state(FunctionKind::LongAvg, vec![StateValue::Long(1)]).is_err());
        assert!(Accumulator::from_state(
            FunctionKind::Count,
            vec![StateValue::Double(1.0)]
        )
        .is_err());
    }
}
