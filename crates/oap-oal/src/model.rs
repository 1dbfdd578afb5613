//! Code generation model
//!
//! The fully resolved, validated description of one metric. Both the
//! executable unit generator and the debug source emitter read it, so it
//! must stay free of runtime state.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use oap_common::ScriptLocation;

use crate::ast::CastType;
use crate::functions::{ArgType, ArgValue, FunctionKind, NumericWidth};
use crate::schema::{FieldType, SourceField};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeGenModel {
    /// Name from the script, e.g. `service_resp_time`
    pub metric_name: String,
    /// PascalCase name, e.g. `ServiceRespTime`
    pub unit_name: String,
    pub table_name: String,
    pub location: ScriptLocation,
    pub scope: ScopeRef,
    pub function: FunctionKind,
    pub decorator: Option<String>,
    /// Fields copied from the event into the unit, scope order
    pub entity_fields: Vec<Arc<SourceField>>,
    /// The `from()` attribute, when one is named
    pub source_attribute: Option<Accessor>,
    pub filters: Vec<ResolvedFilter>,
    /// One entry per entrance parameter of the function
    pub entrance: Vec<EntranceArg>,
}

impl CodeGenModel {
    /// Identity fields, scope order
    pub fn id_fields(&self) -> impl Iterator<Item = &Arc<SourceField>> {
        self.entity_fields.iter().filter(|f| f.is_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeRef {
    pub id: u32,
    pub name: String,
    pub catalog: Option<String>,
}

// ============================================================================
// Accessors
// ============================================================================

/// How the final value of a path is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessStrategy {
    /// Plain getter
    Getter,
    /// `is`-style predicate for boolean fields
    Predicate,
    /// Keyed lookup into a map field
    MapLookup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessStep {
    pub field: Arc<SourceField>,
    pub map_key: Option<String>,
}

/// A resolved attribute path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accessor {
    /// Path as written in the script
    pub path: String,
    pub steps: Vec<AccessStep>,
    pub strategy: AccessStrategy,
    /// Type of the value read
    pub value_type: FieldType,
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Matcher {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    InSet,
    IsNull,
    NotNull,
    Like,
    Contain,
    NotContain,
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equal => "EqualMatch",
            Self::NotEqual => "NotEqualMatch",
            Self::Greater => "GreaterMatch",
            Self::Less => "LessMatch",
            Self::GreaterOrEqual => "GreaterEqualMatch",
            Self::LessOrEqual => "LessEqualMatch",
            Self::InSet => "InMatch",
            Self::IsNull => "IsNullMatch",
            Self::NotNull => "NotNullMatch",
            Self::Like => "LikeMatch",
            Self::Contain => "ContainMatch",
            Self::NotContain => "NotContainMatch",
        })
    }
}

/// Right-hand side of a resolved filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    None,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    /// Enum constant name
    Enum(String),
    /// Ordered, de-duplicated literal collection
    Set(Vec<Operand>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Enum(c) => write!(f, "{c}"),
            Self::Set(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedFilter {
    pub accessor: Accessor,
    pub matcher: Matcher,
    pub operand: Operand,
}

// ============================================================================
// Entrance arguments
// ============================================================================

/// Numeric shape of a `from()` attribute before conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumericSource {
    Int,
    Long,
    Double,
    String,
}

/// Deterministic conversion of the `from()` attribute to an entrance width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coercion {
    pub source: NumericSource,
    pub cast: Option<CastType>,
    pub target: NumericWidth,
}

impl Coercion {
    /// Short description used in rendered sources
    pub fn describe(&self) -> &'static str {
        let after_cast = match self.cast {
            Some(CastType::StrToLong | CastType::Long) => NumericSource::Long,
            Some(CastType::StrToInt | CastType::Int) => NumericSource::Int,
            None => self.source,
        };
        match (after_cast, self.target) {
            (NumericSource::Int, NumericWidth::Int)
            | (NumericSource::Long, NumericWidth::Long)
            | (NumericSource::Double, NumericWidth::Double) => "identity",
            (NumericSource::Int, _) | (NumericSource::Long, NumericWidth::Double) => "widen",
            (NumericSource::Long, NumericWidth::Int) => "narrow",
            (NumericSource::Double, _) => "truncate",
            (NumericSource::String, _) => "parse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EntranceArg {
    Source { accessor: Accessor, coercion: Coercion },
    ConstOne,
    Literal(ArgValue),
    Attribute { accessor: Accessor, target: ArgType },
    Expression(ResolvedFilter),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercion_description() {
        let c = |source, cast, target| Coercion {
            source,
            cast,
            target,
        };
        assert_eq!(c(NumericSource::Int, None, NumericWidth::Int).describe(), "identity");
        assert_eq!(c(NumericSource::Int, None, NumericWidth::Long).describe(), "widen");
        assert_eq!(c(NumericSource::Long, None, NumericWidth::Int).describe(), "narrow");
        assert_eq!(c(NumericSource::Double, None, NumericWidth::Long).describe(), "truncate");
        assert_eq!(
            c(NumericSource::String, Some(CastType::StrToLong), NumericWidth::Long).describe(),
            "identity"
        );
    }

    #[test]
    fn test_operand_display() {
        let set = Operand::Set(vec![Operand::Long(1), Operand::String("a".into())]);
        assert_eq!(set.to_string(), "[1, \"a\"]");
    }
}
