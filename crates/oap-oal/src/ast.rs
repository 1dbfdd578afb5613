//! Abstract syntax of OAL scripts
//!
//! Produced by the parser, consumed read-only by the enricher.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use oap_common::ScriptLocation;

/// A parsed script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OalScript {
    /// Script name used in error reports
    pub name: String,
    /// Metric definitions in source order
    pub metrics: Vec<MetricDefinition>,
    /// Scopes switched off with `disable(...)`
    pub disabled_sources: Vec<String>,
}

/// One `name = from(...)...;` statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDefinition {
    pub name: String,
    pub location: ScriptLocation,
    pub source: SourceReference,
    /// AND-composed, evaluated left to right
    pub filters: Vec<FilterExpr>,
    pub function: FunctionCall,
    pub decorator: Option<String>,
}

/// The `from(...)` clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReference {
    pub scope: String,
    /// `None` for `Scope.*`
    pub attribute: Option<AttrPath>,
    pub cast: Option<CastType>,
}

impl SourceReference {
    pub fn is_wildcard(&self) -> bool {
        self.attribute.is_none()
    }
}

/// Dotted attribute path with optional map keys, e.g. `sideCar.internalErrorCode`
/// or `tag["http.method"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AttrPath {
    pub segments: Vec<PathSegment>,
}

impl AttrPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Single field path
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Field(name.into())],
        }
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Field(name) => f.write_str(name)?,
                PathSegment::MapKey { field, key } => write!(f, "{field}[\"{key}\"]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum PathSegment {
    Field(String),
    MapKey { field: String, key: String },
}

impl PathSegment {
    pub fn field_name(&self) -> &str {
        match self {
            Self::Field(name) | Self::MapKey { field: name, .. } => name,
        }
    }
}

/// Explicit conversion of the `from()` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CastType {
    StrToLong,
    StrToInt,
    Long,
    Int,
}

impl FromStr for CastType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str->long" => Ok(Self::StrToLong),
            "str->int" => Ok(Self::StrToInt),
            "long" => Ok(Self::Long),
            "int" => Ok(Self::Int),
            other => Err(format!("unknown cast type '{other}'")),
        }
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StrToLong => "str->long",
            Self::StrToInt => "str->int",
            Self::Long => "long",
            Self::Int => "int",
        })
    }
}

/// `left op right` inside `.filter(...)` or a function argument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterExpr {
    pub left: AttrPath,
    pub op: FilterOp,
    pub right: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FilterOp {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    In,
    Like,
    Contain,
    NotContain,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::Less => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::In => "in",
            Self::Like => "like",
            Self::Contain => "contain",
            Self::NotContain => "not contain",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FilterValue {
    Null,
    Literal(Literal),
    Array(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    /// Qualified enum constant such as `RequestType.RPC`
    Enum { type_name: String, constant: String },
}

impl Literal {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Enum { .. } => "enum",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Enum {
                type_name,
                constant,
            } => write!(f, "{type_name}.{constant}"),
        }
    }
}

/// The aggregation call, e.g. `longAvg()` or `percent(status == true)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<FunctionArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FunctionArg {
    Literal(Literal),
    Attribute(AttrPath),
    Expression(FilterExpr),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_path_display() {
        let path = AttrPath::new(vec![
            PathSegment::Field("sideCar".into()),
            PathSegment::MapKey {
                field: "tag".into(),
                key: "http.method".into(),
            },
        ]);
        assert_eq!(path.to_string(), "sideCar.tag[\"http.method\"]");
    }

    #[test]
    fn test_cast_type_round_trip() {
        for text in ["str->long", "str->int", "long", "int"] {
            assert_eq!(text.parse::<CastType>().unwrap().to_string(), text);
        }
        assert!("float".parse::<CastType>().is_err());
    }
}
