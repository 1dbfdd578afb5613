//! Debug source rendering
//!
//! Renders a readable description of every generated unit and dispatcher.
//! Output depends only on the models, so identical scripts always render
//! byte-identical files.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use oap_common::Result;

use crate::model::{AccessStrategy, Accessor, CodeGenModel, EntranceArg, ResolvedFilter};

const INDENT: &str = "    ";

/// Render the unit type generated for one metric
pub fn render_unit(model: &CodeGenModel) -> String {
    UnitSource(model).to_string()
}

/// Render the dispatcher of one scope from its models, in step order
pub fn render_dispatcher(scope: &str, models: &[&CodeGenModel]) -> String {
    DispatcherSource { scope, models }.to_string()
}

struct UnitSource<'a>(&'a CodeGenModel);

impl fmt::Display for UnitSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        writeln!(f, "// {}", model.location)?;
        writeln!(f, "metric {} {{", model.unit_name)?;
        writeln!(f, "{INDENT}name = {:?}", model.metric_name)?;
        writeln!(f, "{INDENT}table = {:?}", model.table_name)?;
        writeln!(f, "{INDENT}scope = {} ({})", model.scope.name, model.scope.id)?;
        if let Some(catalog) = &model.scope.catalog {
            writeln!(f, "{INDENT}catalog = {catalog}")?;
        }
        writeln!(f, "{INDENT}function = {}", model.function)?;

        writeln!(f, "{INDENT}entity {{")?;
        for field in &model.entity_fields {
            let mut flags = Vec::new();
            if field.is_id {
                flags.push("id".to_string());
            }
            if let Some(index) = field.sharding_key {
                flags.push(format!("sharding_key = {index}"));
            }
            write!(
                f,
                "{INDENT}{INDENT}{}: {} -> {}",
                field.field_name, field.field_type, field.column_name
            )?;
            if !flags.is_empty() {
                write!(f, " [{}]", flags.join(", "))?;
            }
            writeln!(f)?;
        }
        writeln!(f, "{INDENT}}}")?;

        writeln!(f, "{INDENT}state {{")?;
        for (name, ty) in model.function.state_fields() {
            writeln!(f, "{INDENT}{INDENT}{name}: {ty:?}")?;
        }
        writeln!(f, "{INDENT}}}")?;
        writeln!(f, "}}")
    }
}

struct DispatcherSource<'a> {
    scope: &'a str,
    models: &'a [&'a CodeGenModel],
}

impl fmt::Display for DispatcherSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dispatcher {}Dispatcher {{", self.scope)?;
        for model in self.models {
            writeln!(f, "{INDENT}// {}", model.location)?;
            writeln!(f, "{INDENT}step {} {{", model.unit_name)?;
            if let Some(decorator) = &model.decorator {
                writeln!(f, "{INDENT}{INDENT}decorate {decorator}")?;
            }
            for filter in &model.filters {
                writeln!(f, "{INDENT}{INDENT}filter {}", filter_text(filter))?;
            }
            for arg in &model.entrance {
                writeln!(f, "{INDENT}{INDENT}arg {}", entrance_text(arg))?;
            }
            writeln!(f, "{INDENT}{INDENT}combine {}", model.function)?;
            writeln!(f, "{INDENT}}}")?;
        }
        writeln!(f, "}}")
    }
}

fn accessor_text(accessor: &Accessor) -> String {
    let strategy = match accessor.strategy {
        AccessStrategy::Getter => "get",
        AccessStrategy::Predicate => "is",
        AccessStrategy::MapLookup => "lookup",
    };
    format!("{strategy}({}): {}", accessor.path, accessor.value_type)
}

fn filter_text(filter: &ResolvedFilter) -> String {
    format!(
        "{}({}, {})",
        filter.matcher,
        accessor_text(&filter.accessor),
        filter.operand
    )
}

fn entrance_text(arg: &EntranceArg) -> String {
    match arg {
        EntranceArg::Source { accessor, coercion } => {
            let cast = coercion.cast.map(|c| format!("({c})")).unwrap_or_default();
            format!(
                "source {cast}{} as {} [{}]",
                accessor_text(accessor),
                coercion.target,
                coercion.describe()
            )
        }
        EntranceArg::ConstOne => "const 1".to_string(),
        EntranceArg::Literal(value) => format!("literal {value:?}"),
        EntranceArg::Attribute { accessor, target } => {
            format!("attribute {} as {target}", accessor_text(accessor))
        }
        EntranceArg::Expression(filter) => format!("expression {}", filter_text(filter)),
    }
}

/// Write every rendered unit and dispatcher under `dir`
pub fn emit(dir: &Path, models: &[CodeGenModel]) -> Result<Vec<PathBuf>> {
    let units_dir = dir.join("metrics");
    let dispatchers_dir = dir.join("dispatchers");
    fs::create_dir_all(&units_dir)?;
    fs::create_dir_all(&dispatchers_dir)?;

    let mut written = Vec::with_capacity(models.len());
    for model in models {
        let path = units_dir.join(format!("{}.oal.txt", model.unit_name));
        fs::write(&path, render_unit(model))?;
        debug!(path = %path.display(), "Rendered metric unit source");
        written.push(path);
    }

    let mut scopes: Vec<&str> = models.iter().map(|m| m.scope.name.as_str()).collect();
    scopes.sort_unstable();
    scopes.dedup();
    for scope in scopes {
        let steps: Vec<&CodeGenModel> = models.iter().filter(|m| m.scope.name == scope).collect();
        let path = dispatchers_dir.join(format!("{scope}Dispatcher.oal.txt"));
        fs::write(&path, render_dispatcher(scope, &steps))?;
        written.push(path);
    }

    info!(dir = %dir.display(), files = written.len(), "Emitted debug sources");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::Enricher;
    use crate::parser::parse_script;
    use crate::schema::default_registry;

    fn models(text: &str) -> Vec<CodeGenModel> {
        let registry = default_registry().unwrap();
        let script = parse_script("core.oal", text).unwrap();
        let enricher = Enricher::new(&registry);
        script.metrics.iter().map(|d| enricher.enrich(d).unwrap()).collect()
    }

    const SCRIPT: &str = "service_resp_time = from(Service.latency).filter(status == true).longAvg();\n\
                          endpoint_cpm = from(Endpoint.*).cpm();\n\
                          service_sla = from(Service.*).percent(status == true);";

    #[test]
    fn test_render_unit() {
        let m = models(SCRIPT);
        let text = render_unit(&m[0]);
        assert!(text.starts_with("// core.oal:1:1 (statement #0)\nmetric ServiceRespTime {\n"));
        assert!(text.contains("entityId: string -> entity_id [id, sharding_key = 0]"));
        assert!(text.contains("summation: Long"));
    }

    #[test]
    fn test_render_dispatcher() {
        let m = models(SCRIPT);
        let steps: Vec<&CodeGenModel> = m.iter().filter(|m| m.scope.name == "Service").collect();
        let text = render_dispatcher("Service", &steps);
        assert!(text.contains("filter EqualMatch(is(status): bool, true)"));
        assert!(text.contains("arg source get(latency): int as long [widen]"));
        assert!(text.contains("arg const 1"));
        assert!(text.contains("arg expression EqualMatch(is(status): bool, true)"));
        assert!(text.find("ServiceRespTime").unwrap() < text.find("ServiceSla").unwrap());
    }

    #[test]
    fn test_rendered_blocks_are_closed() {
        let m = models(SCRIPT);
        let steps: Vec<&CodeGenModel> = m.iter().collect();
        let texts = m
            .iter()
            .map(render_unit)
            .chain([render_dispatcher("Service", &steps)]);
        for text in texts {
            assert!(text.ends_with("    }\n}\n"), "{text}");
            assert_eq!(text.matches('{').count(), text.matches('}').count());
            assert!(text.lines().all(|line| !line.ends_with(' ')));
        }
    }

    #[test]
    fn test_emit_is_deterministic() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let a = emit(first.path(), &models(SCRIPT)).unwrap();
        let b = emit(second.path(), &models(SCRIPT)).unwrap();
        assert_eq!(a.len(), 5);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.file_name(), y.file_name());
            assert_eq!(fs::read(x).unwrap(), fs::read(y).unwrap());
        }
    }
}
