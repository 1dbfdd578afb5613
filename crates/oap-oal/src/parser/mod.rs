//! OAL script parser
//!
//! Turns script text into an [`OalScript`] using a PEG grammar:
//! - `name = from(Scope.attr).filter(...).function(...).decorator("..");`
//! - `disable(scope);`
//! - `//` and `/* */` comments
//!
//! Parsing is pure. On failure nothing is returned and the error carries
//! the script name, line and column.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use oap_common::{CompileError, ScriptLocation};

use crate::ast::{
    AttrPath, CastType, FilterExpr, FilterOp, FilterValue, FunctionArg, FunctionCall, Literal,
    MetricDefinition, OalScript, PathSegment, SourceReference,
};

#[derive(Parser)]
#[grammar = "parser/oal.pest"]
struct OalGrammar;

type ParseResult<T> = std::result::Result<T, CompileError>;

/// Parse one script
pub fn parse_script(name: &str, text: &str) -> ParseResult<OalScript> {
    let mut pairs = OalGrammar::parse(Rule::script, text).map_err(|e| syntax_error(name, e))?;
    let ctx = Context { script: name };
    let script = ctx.next(&mut pairs, "script")?;

    let mut metrics = Vec::new();
    let mut disabled_sources = Vec::new();

    let statements = script.into_inner().filter(|p| p.as_rule() != Rule::EOI);
    for (index, pair) in statements.enumerate() {
        match pair.as_rule() {
            Rule::disable_statement => {
                let scope = ctx.single(pair, "disabled scope")?;
                disabled_sources.push(scope.as_str().to_string());
            }
            Rule::metric_statement => metrics.push(ctx.metric(pair, index)?),
            _ => return Err(ctx.error(&pair, "unexpected statement")),
        }
    }

    Ok(OalScript {
        name: name.to_string(),
        metrics,
        disabled_sources,
    })
}

fn syntax_error(script: &str, err: pest::error::Error<Rule>) -> CompileError {
    let (line, column) = match err.line_col {
        pest::error::LineColLocation::Pos(pos) | pest::error::LineColLocation::Span(pos, _) => pos,
    };
    let err = err.renamed_rules(rule_name);
    CompileError::Syntax {
        script: script.to_string(),
        line,
        column,
        message: err.variant.message().into_owned(),
    }
}

fn rule_name(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of script",
        Rule::metric_statement => "metric definition",
        Rule::disable_statement => "disable statement",
        Rule::identifier | Rule::scope_name | Rule::function_name => "identifier",
        Rule::from_clause => "from(...)",
        Rule::source_expr => "source expression",
        Rule::cast | Rule::cast_type => "cast",
        Rule::wildcard => "*",
        Rule::attr_path | Rule::attr_segment => "attribute",
        Rule::map_key => "map key",
        Rule::filter_clause => "filter(...)",
        Rule::condition => "condition",
        Rule::compare_op => "comparison operator",
        Rule::in_match | Rule::like_match | Rule::contain_match | Rule::not_contain_match => {
            "operator"
        }
        Rule::compare_match => "comparison",
        Rule::aggregate_call => "aggregation function",
        Rule::function_arg => "function argument",
        Rule::decorator_clause => "decorator(...)",
        Rule::null_literal => "null",
        Rule::bool_literal => "boolean",
        Rule::number_literal => "number",
        Rule::string_literal | Rule::string_inner => "string",
        Rule::enum_literal => "enum constant",
        _ => "input",
    }
    .to_string()
}

struct Context<'s> {
    script: &'s str,
}

impl<'s> Context<'s> {
    fn error(&self, pair: &Pair<'_, Rule>, message: impl Into<String>) -> CompileError {
        let (line, column) = pair.as_span().start_pos().line_col();
        CompileError::Syntax {
            script: self.script.to_string(),
            line,
            column,
            message: message.into(),
        }
    }

    fn next<'i>(&self, pairs: &mut Pairs<'i, Rule>, what: &str) -> ParseResult<Pair<'i, Rule>> {
        pairs.next().ok_or_else(|| CompileError::Syntax {
            script: self.script.to_string(),
            line: 0,
            column: 0,
            message: format!("missing {what}"),
        })
    }

    fn single<'i>(&self, pair: Pair<'i, Rule>, what: &str) -> ParseResult<Pair<'i, Rule>> {
        let outer = pair.clone();
        pair.into_inner()
            .next()
            .ok_or_else(|| self.error(&outer, format!("missing {what}")))
    }

    fn metric(&self, pair: Pair<'_, Rule>, index: usize) -> ParseResult<MetricDefinition> {
        let (line, column) = pair.as_span().start_pos().line_col();
        let location = ScriptLocation::new(self.script, index, line, column);
        let outer = pair.clone();
        let mut inner = pair.into_inner();

        let name = self.next(&mut inner, "metric name")?.as_str().to_string();
        let from = self.next(&mut inner, "from clause")?;
        let source = self.source(self.single(from, "source")?)?;

        let mut filters = Vec::new();
        let mut function = None;
        let mut decorator = None;
        for part in inner {
            match part.as_rule() {
                Rule::filter_clause => {
                    filters.push(self.condition(self.single(part, "condition")?)?);
                }
                Rule::aggregate_call => function = Some(self.function(part)?),
                Rule::decorator_clause => {
                    let literal = self.single(part, "decorator name")?;
                    decorator = Some(self.string(self.single(literal, "decorator name")?));
                }
                _ => return Err(self.error(&part, "unexpected clause")),
            }
        }

        let function =
            function.ok_or_else(|| self.error(&outer, "missing aggregation function"))?;

        Ok(MetricDefinition {
            name,
            location,
            source,
            filters,
            function,
            decorator,
        })
    }

    fn source(&self, pair: Pair<'_, Rule>) -> ParseResult<SourceReference> {
        let mut cast = None;
        let mut scope = None;
        let mut attribute = None;

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::cast => {
                    let ty = self.single(part, "cast type")?;
                    cast = Some(
                        ty.as_str()
                            .parse::<CastType>()
                            .map_err(|msg| self.error(&ty, msg))?,
                    );
                }
                Rule::scope_name => scope = Some(part.as_str().to_string()),
                Rule::wildcard => attribute = None,
                Rule::attr_path => attribute = Some(self.attr_path(part)?),
                _ => return Err(self.error(&part, "unexpected source element")),
            }
        }

        Ok(SourceReference {
            scope: scope.unwrap_or_default(),
            attribute,
            cast,
        })
    }

    fn attr_path(&self, pair: Pair<'_, Rule>) -> ParseResult<AttrPath> {
        let mut segments = Vec::new();
        for segment in pair.into_inner() {
            let mut parts = segment.into_inner();
            let field = self.next(&mut parts, "attribute name")?.as_str().to_string();
            match parts.next() {
                Some(key) => {
                    let literal = self.single(key, "map key")?;
                    let key = self.string(self.single(literal, "map key")?);
                    segments.push(PathSegment::MapKey { field, key });
                }
                None => segments.push(PathSegment::Field(field)),
            }
        }
        Ok(AttrPath::new(segments))
    }

    fn condition(&self, pair: Pair<'_, Rule>) -> ParseResult<FilterExpr> {
        let mut inner = pair.into_inner();
        let left = self.attr_path(self.next(&mut inner, "attribute")?)?;
        let matcher = self.next(&mut inner, "operator")?;

        let (op, right) = match matcher.as_rule() {
            Rule::in_match => {
                let values = matcher
                    .into_inner()
                    .map(|p| self.literal(p))
                    .collect::<ParseResult<Vec<_>>>()?;
                (FilterOp::In, FilterValue::Array(values))
            }
            Rule::like_match => (FilterOp::Like, self.string_operand(matcher)?),
            Rule::contain_match => (FilterOp::Contain, self.string_operand(matcher)?),
            Rule::not_contain_match => (FilterOp::NotContain, self.string_operand(matcher)?),
            Rule::compare_match => {
                let mut parts = matcher.into_inner();
                let op = match self.next(&mut parts, "operator")?.as_str() {
                    "==" => FilterOp::Equal,
                    "!=" => FilterOp::NotEqual,
                    ">=" => FilterOp::GreaterOrEqual,
                    "<=" => FilterOp::LessOrEqual,
                    ">" => FilterOp::Greater,
                    _ => FilterOp::Less,
                };
                let operand = self.next(&mut parts, "operand")?;
                let right = if operand.as_rule() == Rule::null_literal {
                    FilterValue::Null
                } else {
                    FilterValue::Literal(self.literal(operand)?)
                };
                (op, right)
            }
            _ => return Err(self.error(&matcher, "unknown operator")),
        };

        Ok(FilterExpr { left, op, right })
    }

    fn string_operand(&self, pair: Pair<'_, Rule>) -> ParseResult<FilterValue> {
        let literal = self.single(pair, "string")?;
        Ok(FilterValue::Literal(Literal::String(
            self.string(self.single(literal, "string")?),
        )))
    }

    fn function(&self, pair: Pair<'_, Rule>) -> ParseResult<FunctionCall> {
        let mut inner = pair.into_inner();
        let name = self.next(&mut inner, "function name")?.as_str().to_string();

        let mut args = Vec::new();
        for arg in inner {
            let value = self.single(arg, "argument")?;
            args.push(match value.as_rule() {
                Rule::condition => FunctionArg::Expression(self.condition(value)?),
                Rule::attr_path => FunctionArg::Attribute(self.attr_path(value)?),
                _ => FunctionArg::Literal(self.literal(value)?),
            });
        }

        Ok(FunctionCall { name, args })
    }

    fn literal(&self, pair: Pair<'_, Rule>) -> ParseResult<Literal> {
        match pair.as_rule() {
            Rule::bool_literal => Ok(Literal::Bool(pair.as_str() == "true")),
            Rule::number_literal => {
                let text = pair.as_str();
                if text.contains('.') {
                    text.parse::<f64>()
                        .map(Literal::Double)
                        .map_err(|e| self.error(&pair, format!("invalid number: {e}")))
                } else {
                    text.parse::<i64>()
                        .map(Literal::Long)
                        .map_err(|e| self.error(&pair, format!("invalid number: {e}")))
                }
            }
            Rule::string_literal => Ok(Literal::String(
                self.string(self.single(pair, "string")?),
            )),
            Rule::enum_literal => {
                let (type_name, constant) = pair
                    .as_str()
                    .split_once('.')
                    .ok_or_else(|| self.error(&pair, "invalid enum constant"))?;
                Ok(Literal::Enum {
                    type_name: type_name.to_string(),
                    constant: constant.to_string(),
                })
            }
            _ => Err(self.error(&pair, "expected literal")),
        }
    }

    /// Unescape the body of a string literal
    fn string(&self, pair: Pair<'_, Rule>) -> String {
        let mut out = String::with_capacity(pair.as_str().len());
        let mut chars = pair.as_str().chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        }
        out
    }
}
