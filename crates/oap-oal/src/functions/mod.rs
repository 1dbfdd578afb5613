//! Aggregation function catalog
//!
//! The closed set of functions an OAL metric can aggregate with. Each one
//! declares:
//! - its entrance parameters, resolved by the enricher
//! - its state fields, in wire and storage order
//! - per-event combine, cross-instance merge and the reported value
//!   (see [`Accumulator`])

mod accumulator;
mod data_table;

use std::fmt;

use serde::Serialize;

use oap_common::config::ApdexConfig;

pub use accumulator::{Accumulator, MetricValue, StateValue, PERCENTILE_RANKS};
pub use data_table::DataTable;

/// Numeric width of a value taken from the `from()` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NumericWidth {
    Int,
    Long,
    Double,
}

impl fmt::Display for NumericWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
        })
    }
}

/// Expected type of a function argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArgType {
    Int,
    Bool,
    String,
    /// Any scalar, rendered as a label
    Label,
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Label => "label",
        })
    }
}

/// How an entrance parameter gets its value for each event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntranceParam {
    /// The `from()` attribute, coerced to the width
    SourceFrom(NumericWidth),
    /// The constant 1
    ConstOne,
    /// A boolean expression argument
    Expression,
    /// A literal or attribute argument
    Arg(ArgType),
    /// An optional int argument with a default
    DefaultValue(i64),
}

/// Shape of one state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateType {
    Long,
    Double,
    Table,
}

/// Built-in aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FunctionKind {
    Count,
    Cpm,
    Sum,
    DoubleSum,
    LongAvg,
    DoubleAvg,
    Max,
    Min,
    MaxDouble,
    MinDouble,
    Percent,
    Rate,
    Apdex,
    Histogram,
    Percentile2,
    LabelCount,
    LabelSum,
    LabelAvg,
}

const ALL: [FunctionKind; 18] = [
    FunctionKind::Count,
    FunctionKind::Cpm,
    FunctionKind::Sum,
    FunctionKind::DoubleSum,
    FunctionKind::LongAvg,
    FunctionKind::DoubleAvg,
    FunctionKind::Max,
    FunctionKind::Min,
    FunctionKind::MaxDouble,
    FunctionKind::MinDouble,
    FunctionKind::Percent,
    FunctionKind::Rate,
    FunctionKind::Apdex,
    FunctionKind::Histogram,
    FunctionKind::Percentile2,
    FunctionKind::LabelCount,
    FunctionKind::LabelSum,
    FunctionKind::LabelAvg,
];

impl FunctionKind {
    /// Resolve a function by its OAL name
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Every function in the catalog
    pub fn all() -> impl Iterator<Item = Self> {
        ALL.into_iter()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Cpm => "cpm",
            Self::Sum => "sum",
            Self::DoubleSum => "doubleSum",
            Self::LongAvg => "longAvg",
            Self::DoubleAvg => "doubleAvg",
            Self::Max => "max",
            Self::Min => "min",
            Self::MaxDouble => "maxDouble",
            Self::MinDouble => "minDouble",
            Self::Percent => "percent",
            Self::Rate => "rate",
            Self::Apdex => "apdex",
            Self::Histogram => "histogram",
            Self::Percentile2 => "percentile2",
            Self::LabelCount => "labelCount",
            Self::LabelSum => "labelSum",
            Self::LabelAvg => "labelAvg",
        }
    }

    /// Entrance parameters in argument order
    pub fn entrance(self) -> &'static [EntranceParam] {
        use EntranceParam::{Arg, ConstOne, DefaultValue, Expression, SourceFrom};
        match self {
            Self::Count | Self::Cpm => &[ConstOne],
            Self::Sum | Self::Max | Self::Min => &[SourceFrom(NumericWidth::Long)],
            Self::DoubleSum | Self::MaxDouble | Self::MinDouble => {
                &[SourceFrom(NumericWidth::Double)]
            }
            Self::LongAvg => &[SourceFrom(NumericWidth::Long), ConstOne],
            Self::DoubleAvg => &[SourceFrom(NumericWidth::Double), ConstOne],
            Self::Percent => &[Expression],
            Self::Rate => &[Expression, Expression],
            Self::Apdex => &[
                SourceFrom(NumericWidth::Int),
                Arg(ArgType::String),
                Arg(ArgType::Bool),
            ],
            Self::Histogram => &[
                SourceFrom(NumericWidth::Int),
                Arg(ArgType::Int),
                DefaultValue(20),
            ],
            Self::Percentile2 => &[SourceFrom(NumericWidth::Int), Arg(ArgType::Int)],
            Self::LabelCount => &[Arg(ArgType::Label), ConstOne],
            Self::LabelSum => &[SourceFrom(NumericWidth::Long), Arg(ArgType::Label)],
            Self::LabelAvg => &[
                SourceFrom(NumericWidth::Long),
                Arg(ArgType::Label),
                ConstOne,
            ],
        }
    }

    /// Whether the `from()` clause must name an attribute
    pub fn requires_source(self) -> bool {
        self.entrance()
            .iter()
            .any(|p| matches!(p, EntranceParam::SourceFrom(_)))
    }

    /// State fields in wire and storage order
    pub fn state_fields(self) -> &'static [(&'static str, StateType)] {
        use StateType::{Double, Long, Table};
        match self {
            Self::Count | Self::Sum | Self::Max | Self::Min => &[("value", Long)],
            Self::Cpm => &[("total", Long)],
            Self::DoubleSum | Self::MaxDouble | Self::MinDouble => &[("value", Double)],
            Self::LongAvg => &[("summation", Long), ("count", Long)],
            Self::DoubleAvg => &[("summation", Double), ("count", Long)],
            Self::Percent => &[("total", Long), ("match", Long)],
            Self::Rate => &[("numerator", Long), ("denominator", Long)],
            Self::Apdex => &[("s_num", Long), ("t_num", Long), ("total_num", Long)],
            Self::Histogram => &[("step", Long), ("dataset", Table)],
            Self::Percentile2 => &[("precision", Long), ("dataset", Table)],
            Self::LabelCount => &[("dataset", Table)],
            Self::LabelSum => &[("summation", Table)],
            Self::LabelAvg => &[("summation", Table), ("count", Table)],
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value handed to `combine` for one entrance parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ArgValue {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl ArgValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(f64::from(*v)),
            Self::Long(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Runtime settings some functions consult while combining
#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    pub apdex: ApdexConfig,
}

impl FunctionContext {
    pub fn new(apdex: ApdexConfig) -> Self {
        Self { apdex }
    }
}
