//! Metric definition enrichment
//!
//! Resolves every symbolic reference of a [`MetricDefinition`] against the
//! schema registry and the function catalog, producing a [`CodeGenModel`].
//! All type checking happens here; the generator never rejects a model.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use oap_common::{CompileError, ScriptLocation};

use crate::ast::{
    AttrPath, CastType, FilterExpr, FilterOp, FilterValue, FunctionArg, Literal,
    MetricDefinition, PathSegment,
};
use crate::functions::{ArgType, ArgValue, EntranceParam, FunctionKind, NumericWidth};
use crate::model::{
    AccessStep, AccessStrategy, Accessor, CodeGenModel, Coercion, EntranceArg, Matcher,
    NumericSource, Operand, ResolvedFilter, ScopeRef,
};
use crate::schema::{FieldType, SchemaRegistry, ScopeDefinition};

type EnrichResult<T> = std::result::Result<T, CompileError>;

/// Resolves definitions against a registry
pub struct Enricher<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> Enricher<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Build the model of one definition
    pub fn enrich(&self, def: &MetricDefinition) -> EnrichResult<CodeGenModel> {
        let loc = &def.location;
        let scope = self
            .registry
            .scope(&def.source.scope)
            .ok_or_else(|| CompileError::UnknownScope {
                location: loc.clone(),
                scope: def.source.scope.clone(),
            })?;

        let function = FunctionKind::from_name(&def.function.name).ok_or_else(|| {
            CompileError::UnknownFunction {
                location: loc.clone(),
                function: def.function.name.clone(),
            }
        })?;

        if let Some(decorator) = &def.decorator {
            if self.registry.decorator(decorator).is_none() {
                return Err(CompileError::UnknownDecorator {
                    location: loc.clone(),
                    decorator: decorator.clone(),
                });
            }
        }

        let source_attribute = def
            .source
            .attribute
            .as_ref()
            .map(|path| self.resolve_path(scope, path, loc))
            .transpose()?;

        if def.source.cast.is_some() && !function.requires_source() {
            return Err(CompileError::InvalidArgument {
                location: loc.clone(),
                function: function.name().to_string(),
                message: "a cast only applies to a function reading the from() attribute"
                    .to_string(),
            });
        }

        let filters = def
            .filters
            .iter()
            .map(|f| self.resolve_filter(scope, f, loc))
            .collect::<EnrichResult<Vec<_>>>()?;

        let entrance = self.resolve_entrance(def, scope, function, source_attribute.as_ref())?;

        debug!(
            metric = %def.name,
            scope = %scope.name,
            function = %function,
            filters = filters.len(),
            "Enriched metric definition"
        );

        Ok(CodeGenModel {
            metric_name: def.name.clone(),
            unit_name: pascal_case(&def.name),
            table_name: table_name(&def.name),
            location: loc.clone(),
            scope: ScopeRef {
                id: scope.id,
                name: scope.name.clone(),
                catalog: scope.catalog.clone(),
            },
            function,
            decorator: def.decorator.clone(),
            entity_fields: scope.entity_fields().cloned().collect(),
            source_attribute,
            filters,
            entrance,
        })
    }

    // ========================================================================
    // Attribute paths
    // ========================================================================

    fn resolve_path(
        &self,
        scope: &ScopeDefinition,
        path: &AttrPath,
        loc: &ScriptLocation,
    ) -> EnrichResult<Accessor> {
        let unknown = || CompileError::UnknownAttribute {
            location: loc.clone(),
            scope: scope.name.clone(),
            attribute: path.to_string(),
        };

        let mut steps: Vec<AccessStep> = Vec::with_capacity(path.segments.len());
        for segment in &path.segments {
            let field = match steps.last() {
                None => scope.get(segment.field_name()),
                Some(prev) if prev.map_key.is_none() => {
                    prev.field.field_type.nested_field(segment.field_name())
                }
                Some(_) => None,
            }
            .map(Arc::clone)
            .ok_or_else(unknown)?;

            let map_key = match segment {
                PathSegment::Field(_) => None,
                PathSegment::MapKey { key, .. } if field.is_map() => Some(key.clone()),
                PathSegment::MapKey { .. } => return Err(unknown()),
            };

            steps.push(AccessStep { field, map_key });
        }

        let last = steps.last().ok_or_else(unknown)?;
        let (strategy, value_type) = if last.map_key.is_some() {
            (AccessStrategy::MapLookup, FieldType::String)
        } else if last.field.is_bool() {
            (AccessStrategy::Predicate, FieldType::Bool)
        } else {
            (AccessStrategy::Getter, last.field.field_type.clone())
        };

        Ok(Accessor {
            path: path.to_string(),
            steps,
            strategy,
            value_type,
        })
    }

    // ========================================================================
    // Filters
    // ========================================================================

    fn resolve_filter(
        &self,
        scope: &ScopeDefinition,
        expr: &FilterExpr,
        loc: &ScriptLocation,
    ) -> EnrichResult<ResolvedFilter> {
        let accessor = self.resolve_path(scope, &expr.left, loc)?;
        let invalid = |message: String| CompileError::InvalidFilter {
            location: loc.clone(),
            attribute: expr.left.to_string(),
            message,
        };

        let ty = &accessor.value_type;
        if matches!(ty, FieldType::Struct(_) | FieldType::Map) {
            return Err(invalid(format!("cannot compare a {ty} value")));
        }

        let (matcher, operand) = match (&expr.op, &expr.right) {
            (FilterOp::Equal, FilterValue::Null) => (Matcher::IsNull, Operand::None),
            (FilterOp::NotEqual, FilterValue::Null) => (Matcher::NotNull, Operand::None),
            (op, FilterValue::Null) => {
                return Err(invalid(format!("'{op}' cannot be used with null")));
            }
            (FilterOp::In, FilterValue::Array(items)) => {
                if matches!(ty, FieldType::Bool | FieldType::StringList) {
                    return Err(invalid(format!("'in' cannot be used with a {ty} value")));
                }
                let mut seen = Vec::new();
                for item in items {
                    let operand = operand_for(ty, item).map_err(&invalid)?;
                    if !seen.contains(&operand) {
                        seen.push(operand);
                    }
                }
                (Matcher::InSet, Operand::Set(seen))
            }
            (op, FilterValue::Array(_)) => {
                return Err(invalid(format!("'{op}' cannot take a list")));
            }
            (op, FilterValue::Literal(literal)) => {
                let matcher = matcher_for(*op, ty).map_err(&invalid)?;
                let operand = match matcher {
                    Matcher::Contain | Matcher::NotContain => match literal {
                        Literal::String(s) => Operand::String(s.clone()),
                        other => {
                            return Err(invalid(format!(
                                "'{op}' needs a string, got {}",
                                other.kind()
                            )))
                        }
                    },
                    _ => operand_for(ty, literal).map_err(&invalid)?,
                };
                (matcher, operand)
            }
        };

        Ok(ResolvedFilter {
            accessor,
            matcher,
            operand,
        })
    }

    // ========================================================================
    // Entrance arguments
    // ========================================================================

    fn resolve_entrance(
        &self,
        def: &MetricDefinition,
        scope: &ScopeDefinition,
        function: FunctionKind,
        source: Option<&Accessor>,
    ) -> EnrichResult<Vec<EntranceArg>> {
        let loc = &def.location;
        let invalid = |message: String| CompileError::InvalidArgument {
            location: loc.clone(),
            function: function.name().to_string(),
            message,
        };

        let mut args = def.function.args.iter();
        let mut entrance = Vec::with_capacity(function.entrance().len());

        for (position, param) in function.entrance().iter().enumerate() {
            let resolved = match *param {
                EntranceParam::SourceFrom(width) => {
                    let accessor = source.ok_or_else(|| {
                        invalid(format!(
                            "needs a source attribute, got {}.*",
                            def.source.scope
                        ))
                    })?;
                    let coercion = coerce(&accessor.value_type, def.source.cast, width)
                        .ok_or_else(|| CompileError::TypeCoercion {
                            location: loc.clone(),
                            from: match def.source.cast {
                                Some(cast) => format!("({cast}){}", accessor.value_type),
                                None => accessor.value_type.to_string(),
                            },
                            to: width.to_string(),
                        })?;
                    EntranceArg::Source {
                        accessor: accessor.clone(),
                        coercion,
                    }
                }
                EntranceParam::ConstOne => EntranceArg::ConstOne,
                EntranceParam::Expression => match args.next() {
                    Some(FunctionArg::Expression(expr)) => {
                        EntranceArg::Expression(self.resolve_filter(scope, expr, loc)?)
                    }
                    Some(_) => {
                        return Err(invalid(format!(
                            "argument #{position} must be a boolean expression"
                        )))
                    }
                    None => return Err(invalid(format!("missing argument #{position}"))),
                },
                EntranceParam::Arg(ty) => match args.next() {
                    Some(FunctionArg::Literal(literal)) => {
                        EntranceArg::Literal(literal_arg(ty, literal).map_err(&invalid)?)
                    }
                    Some(FunctionArg::Attribute(path)) => {
                        let accessor = self.resolve_path(scope, path, loc)?;
                        if !attribute_fits(ty, &accessor.value_type) {
                            return Err(invalid(format!(
                                "attribute {} is {}, expected {ty}",
                                accessor.path, accessor.value_type
                            )));
                        }
                        EntranceArg::Attribute {
                            accessor,
                            target: ty,
                        }
                    }
                    Some(FunctionArg::Expression(_)) => {
                        return Err(invalid(format!(
                            "argument #{position} must be a {ty} literal or attribute"
                        )))
                    }
                    None => return Err(invalid(format!("missing argument #{position}"))),
                },
                EntranceParam::DefaultValue(default) => match args.next() {
                    Some(FunctionArg::Literal(Literal::Long(v))) if *v > 0 => {
                        EntranceArg::Literal(ArgValue::Long(*v))
                    }
                    Some(_) => {
                        return Err(invalid(format!(
                            "argument #{position} must be a positive integer"
                        )))
                    }
                    None => EntranceArg::Literal(ArgValue::Long(default)),
                },
            };
            entrance.push(resolved);
        }

        let extra = args.count();
        if extra > 0 {
            return Err(invalid(format!("{extra} unexpected argument(s)")));
        }

        Ok(entrance)
    }
}

/// Choose the matcher for an operator against a field type
fn matcher_for(op: FilterOp, ty: &FieldType) -> Result<Matcher, String> {
    let matcher = match op {
        FilterOp::Equal => Matcher::Equal,
        FilterOp::NotEqual => Matcher::NotEqual,
        FilterOp::Greater => Matcher::Greater,
        FilterOp::Less => Matcher::Less,
        FilterOp::GreaterOrEqual => Matcher::GreaterOrEqual,
        FilterOp::LessOrEqual => Matcher::LessOrEqual,
        FilterOp::Like => Matcher::Like,
        FilterOp::Contain => Matcher::Contain,
        FilterOp::NotContain => Matcher::NotContain,
        FilterOp::In => return Err("'in' needs a list".to_string()),
    };

    let allowed = match matcher {
        Matcher::Equal | Matcher::NotEqual => !matches!(ty, FieldType::StringList),
        Matcher::Greater | Matcher::Less | Matcher::GreaterOrEqual | Matcher::LessOrEqual => {
            ty.is_numeric()
        }
        Matcher::Like => matches!(ty, FieldType::String),
        Matcher::Contain | Matcher::NotContain => matches!(ty, FieldType::StringList),
        Matcher::InSet | Matcher::IsNull | Matcher::NotNull => true,
    };

    if allowed {
        Ok(matcher)
    } else {
        Err(format!("'{op}' cannot be used with a {ty} value"))
    }
}

/// Type check a literal against the compared field
fn operand_for(ty: &FieldType, literal: &Literal) -> Result<Operand, String> {
    match (ty, literal) {
        (FieldType::Bool, Literal::Bool(b)) => Ok(Operand::Bool(*b)),
        (FieldType::Int | FieldType::Long, Literal::Long(v)) => Ok(Operand::Long(*v)),
        (FieldType::Int | FieldType::Long | FieldType::Double, Literal::Double(v)) => {
            Ok(Operand::Double(*v))
        }
        #[allow(clippy::cast_precision_loss)]
        (FieldType::Double, Literal::Long(v)) => Ok(Operand::Double(*v as f64)),
        (FieldType::String, Literal::String(s)) => Ok(Operand::String(s.clone())),
        (
            FieldType::Enum { name, constants },
            Literal::Enum {
                type_name,
                constant,
            },
        ) => {
            if type_name != name {
                Err(format!("expected a {name} constant, got {type_name}.{constant}"))
            } else if !constants.contains(constant) {
                Err(format!("{name} has no constant {constant}"))
            } else {
                Ok(Operand::Enum(constant.clone()))
            }
        }
        (ty, literal) => Err(format!("cannot compare a {ty} value with a {} literal", literal.kind())),
    }
}

fn literal_arg(ty: ArgType, literal: &Literal) -> Result<ArgValue, String> {
    match (ty, literal) {
        (ArgType::Int, Literal::Long(v)) => i32::try_from(*v)
            .map(ArgValue::Int)
            .map_err(|_| format!("{v} does not fit an int")),
        (ArgType::Bool, Literal::Bool(b)) => Ok(ArgValue::Bool(*b)),
        (ArgType::String | ArgType::Label, Literal::String(s)) => Ok(ArgValue::Str(s.clone())),
        (ArgType::Label, Literal::Long(v)) => Ok(ArgValue::Str(v.to_string())),
        (ArgType::Label, Literal::Bool(b)) => Ok(ArgValue::Str(b.to_string())),
        (ty, literal) => Err(format!("expected a {ty} literal, got {}", literal.kind())),
    }
}

fn attribute_fits(ty: ArgType, field: &FieldType) -> bool {
    match ty {
        ArgType::Int => matches!(field, FieldType::Int | FieldType::Long),
        ArgType::Bool => matches!(field, FieldType::Bool),
        ArgType::String => matches!(field, FieldType::String | FieldType::Enum { .. }),
        ArgType::Label => !matches!(
            field,
            FieldType::Struct(_) | FieldType::Map | FieldType::StringList
        ),
    }
}

/// Deterministic conversion from a field type to an entrance width.
/// Strings need an explicit `str->` cast; numeric casts need a numeric field.
fn coerce(ty: &FieldType, cast: Option<CastType>, target: NumericWidth) -> Option<Coercion> {
    let source = match ty {
        FieldType::Int => NumericSource::Int,
        FieldType::Long => NumericSource::Long,
        FieldType::Double => NumericSource::Double,
        FieldType::String => NumericSource::String,
        _ => return None,
    };

    let valid = match cast {
        None => source != NumericSource::String,
        Some(CastType::StrToLong | CastType::StrToInt) => source == NumericSource::String,
        Some(CastType::Long | CastType::Int) => source != NumericSource::String,
    };

    valid.then_some(Coercion {
        source,
        cast,
        target,
    })
}

/// `service_resp_time` -> `ServiceRespTime`
pub fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Storage table of a metric
pub fn table_name(name: &str) -> String {
    name.to_lowercase()
}

/// Names must be unique within one compilation batch, and so must the
/// table and unit names derived from them.
pub(crate) fn check_unique<'a>(
    defs: impl Iterator<Item = &'a MetricDefinition>,
) -> EnrichResult<()> {
    let mut tables: HashMap<String, &ScriptLocation> = HashMap::new();
    let mut units: HashMap<String, &ScriptLocation> = HashMap::new();
    for def in defs {
        let by_table = tables.insert(table_name(&def.name), &def.location);
        let by_unit = units.insert(pascal_case(&def.name), &def.location);
        if let Some(first) = by_table.or(by_unit) {
            return Err(CompileError::DuplicateMetric {
                name: def.name.clone(),
                first: first.clone(),
                second: def.location.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_script;
    use crate::schema::{default_registry, SourceField};

    fn enrich(text: &str) -> EnrichResult<CodeGenModel> {
        let registry = default_registry().unwrap();
        let script = parse_script("test.oal", text).unwrap();
        Enricher::new(&registry).enrich(&script.metrics[0])
    }

    fn model(text: &str) -> CodeGenModel {
        enrich(text).unwrap()
    }

    #[test]
    fn test_basic_model() {
        let m = model("service_resp_time = from(Service.latency).longAvg();");
        assert_eq!(m.unit_name, "ServiceRespTime");
        assert_eq!(m.table_name, "service_resp_time");
        assert_eq!(m.scope.id, 1);
        assert_eq!(m.function, FunctionKind::LongAvg);
        assert_eq!(m.id_fields().count(), 1);
        assert_eq!(m.entrance.len(), 2);

        let EntranceArg::Source { coercion, .. } = &m.entrance[0] else {
            panic!("first entrance is the source");
        };
        assert_eq!(coercion.source, NumericSource::Int);
        assert_eq!(coercion.target, NumericWidth::Long);
        assert_eq!(coercion.describe(), "widen");
        assert_eq!(m.entrance[1], EntranceArg::ConstOne);
    }

    #[test]
    fn test_boolean_filter_uses_predicate() {
        let m = model("service_sla = from(Service.*).filter(status == true).count();");
        let filter = &m.filters[0];
        assert_eq!(filter.accessor.strategy, AccessStrategy::Predicate);
        assert_eq!(filter.matcher, Matcher::Equal);
        assert_eq!(filter.operand, Operand::Bool(true));
    }

    #[test]
    fn test_map_lookup_and_nested() {
        let m = model(
            r#"a = from(Service.*).filter(tag["region"] == "eu").filter(sideCar.internalErrorCode != null).count();"#,
        );
        assert_eq!(m.filters[0].accessor.strategy, AccessStrategy::MapLookup);
        assert_eq!(m.filters[0].accessor.steps[0].map_key.as_deref(), Some("region"));
        assert_eq!(m.filters[1].accessor.steps.len(), 2);
        assert_eq!(m.filters[1].matcher, Matcher::NotNull);
    }

    #[test]
    fn test_in_set_is_normalized() {
        let m = model("a = from(Service.*).filter(httpResponseStatusCode in [500, 404, 500]).count();");
        assert_eq!(m.filters[0].matcher, Matcher::InSet);
        assert_eq!(
            m.filters[0].operand,
            Operand::Set(vec![Operand::Long(500), Operand::Long(404)])
        );
    }

    #[test]
    fn test_enum_filter() {
        let m = model("a = from(Service.*).filter(type == RequestType.HTTP).count();");
        assert_eq!(m.filters[0].operand, Operand::Enum("HTTP".into()));

        assert!(matches!(
            enrich("a = from(Service.*).filter(type == RequestType.SOAP).count();"),
            Err(CompileError::InvalidFilter { .. })
        ));
        assert!(matches!(
            enrich("a = from(Service.*).filter(type == DetectPoint.CLIENT).count();"),
            Err(CompileError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_references() {
        assert!(matches!(
            enrich("a = from(Nope.latency).count();"),
            Err(CompileError::UnknownScope { .. })
        ));
        assert!(matches!(
            enrich("a = from(Service.nope).count();"),
            Err(CompileError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            enrich("a = from(Service.latency.nested).count();"),
            Err(CompileError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            enrich("a = from(Service.latency).median();"),
            Err(CompileError::UnknownFunction { .. })
        ));
        assert!(matches!(
            enrich("a = from(Service.*).count().decorator(\"Missing\");"),
            Err(CompileError::UnknownDecorator { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_filters() {
        for text in [
            "a = from(Service.*).filter(status > 1).count();",
            "a = from(Service.*).filter(name > \"a\").count();",
            "a = from(Service.*).filter(latency == \"a\").count();",
            "a = from(Service.*).filter(status == 1).count();",
            "a = from(Service.*).filter(tag == \"a\").count();",
            "a = from(Service.*).filter(latency like \"a%\").count();",
            "a = from(Service.*).filter(name contain \"a\").count();",
            "a = from(Service.*).filter(latency > null).count();",
        ] {
            assert!(
                matches!(enrich(text), Err(CompileError::InvalidFilter { .. })),
                "{text}"
            );
        }
    }

    #[test]
    fn test_wildcard_requires_source_free_function() {
        assert!(matches!(
            enrich("a = from(Service.*).longAvg();"),
            Err(CompileError::InvalidArgument { .. })
        ));
        assert!(enrich("a = from(Service.*).cpm();").is_ok());
    }

    #[test]
    fn test_coercion_rules() {
        assert!(matches!(
            enrich("a = from(Service.name).sum();"),
            Err(CompileError::TypeCoercion { .. })
        ));
        assert!(matches!(
            enrich("a = from(Service.status).sum();"),
            Err(CompileError::TypeCoercion { .. })
        ));
        assert!(matches!(
            enrich("a = from((str->long)Service.latency).sum();"),
            Err(CompileError::TypeCoercion { .. })
        ));

        let m = model(r#"a = from((str->long)Service.tag["size"]).sum();"#);
        let EntranceArg::Source { coercion, .. } = &m.entrance[0] else {
            panic!("source entrance");
        };
        assert_eq!(coercion.cast, Some(CastType::StrToLong));
        assert_eq!(coercion.describe(), "identity");

        let m = model("a = from(ServiceInstanceJVMMemory.used).apdex(name, heapStatus);");
        let EntranceArg::Source { coercion, .. } = &m.entrance[0] else {
            panic!("source entrance");
        };
        assert_eq!(coercion.describe(), "narrow");
    }

    #[test]
    fn test_function_arguments() {
        let m = model("a = from(Service.latency).apdex(name, status);");
        assert!(matches!(
            &m.entrance[1],
            EntranceArg::Attribute { target: ArgType::String, .. }
        ));
        assert!(matches!(
            &m.entrance[2],
            EntranceArg::Attribute { target: ArgType::Bool, .. }
        ));

        let m = model("a = from(Service.latency).histogram(100);");
        assert_eq!(m.entrance[1], EntranceArg::Literal(ArgValue::Int(100)));
        assert_eq!(m.entrance[2], EntranceArg::Literal(ArgValue::Long(20)));

        let m = model("a = from(Service.*).rate(status == true, latency > 0);");
        assert!(matches!(m.entrance[0], EntranceArg::Expression(_)));
        assert!(matches!(m.entrance[1], EntranceArg::Expression(_)));

        for text in [
            "a = from(Service.latency).percentile2();",
            "a = from(Service.latency).percentile2(\"ten\");",
            "a = from(Service.latency).percentile2(10, 20);",
            "a = from(Service.*).percent(status);",
            "a = from(Service.latency).apdex(latency, status);",
            "a = from(Service.latency).histogram(100, 0);",
        ] {
            assert!(
                matches!(enrich(text), Err(CompileError::InvalidArgument { .. })),
                "{text}"
            );
        }
    }

    #[test]
    fn test_cast_needs_source_function() {
        assert!(matches!(
            enrich("a = from((long)Service.latency).count();"),
            Err(CompileError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_model_is_deterministic() {
        let text = "a = from(Service.latency).filter(name in [\"x\", \"y\"]).longAvg();";
        assert_eq!(model(text), model(text));
        assert_eq!(
            serde_json::to_string(&model(text)).unwrap(),
            serde_json::to_string(&model(text)).unwrap()
        );
    }

    #[test]
    fn test_custom_scope() {
        let mut registry = SchemaRegistry::new();
        registry
            .register_scope(
                ScopeDefinition::new(900, "Canary")
                    .field(SourceField::new("entityId", FieldType::String).id())
                    .field(SourceField::new("ratio", FieldType::Double)),
            )
            .unwrap();
        let script = parse_script("p.oal", "canary_ratio = from(Canary.ratio).doubleAvg();").unwrap();
        let m = Enricher::new(&registry).enrich(&script.metrics[0]).unwrap();
        assert_eq!(m.scope.id, 900);
    }

    #[test]
    fn test_duplicates_detected() {
        let a = parse_script("a.oal", "x = from(Service.*).count();").unwrap();
        let b = parse_script("b.oal", "y = from(Service.*).count();\nx = from(Endpoint.*).count();")
            .unwrap();
        let err = check_unique(a.metrics.iter().chain(b.metrics.iter())).unwrap_err();
        match err {
            CompileError::DuplicateMetric {
                name,
                first,
                second,
            } => {
                assert_eq!(name, "x");
                assert_eq!(first.script, "a.oal");
                assert_eq!(second.script, "b.oal");
                assert_eq!(second.line, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_derived_name_collisions_detected() {
        for text in [
            "Svc_A = from(Service.*).count();\nsvc_a = from(Service.latency).longAvg();",
            "svc_a = from(Service.*).count();\nsvcA = from(Service.*).cpm();",
            "svc__a = from(Service.*).count();\nsvc_a = from(Service.*).cpm();",
        ] {
            let script = parse_script("c.oal", text).unwrap();
            match check_unique(script.metrics.iter()).unwrap_err() {
                CompileError::DuplicateMetric { first, second, .. } => {
                    assert_eq!(first.statement, 0);
                    assert_eq!(second.statement, 1);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        let script = parse_script("c.oal", "svc_a = from(Service.*).count();\nsvc_b = from(Service.*).cpm();")
            .unwrap();
        assert!(check_unique(script.metrics.iter()).is_ok());
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("service_resp_time"), "ServiceRespTime");
        assert_eq!(pascal_case("endpoint_cpm"), "EndpointCpm");
        assert_eq!(pascal_case("a__b_"), "AB");
    }
}
