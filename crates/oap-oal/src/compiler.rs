//! OAL compilation pipeline
//!
//! Parse, enrich and generate a batch of scripts. The batch is atomic: any
//! error rejects every script and nothing is returned.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use oap_common::{metrics, Result};

use crate::ast::OalScript;
use crate::enricher::{check_unique, Enricher};
use crate::functions::FunctionContext;
use crate::generator::{self, source_emitter, Dispatcher, MetricUnitType};
use crate::model::CodeGenModel;
use crate::parser::parse_script;
use crate::schema::SchemaRegistry;

/// Script text with the name used in error locations
#[derive(Debug, Clone)]
pub struct ScriptSource {
    pub name: String,
    pub text: String,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Compiles script batches against one registry
pub struct OalCompiler {
    registry: Arc<SchemaRegistry>,
    ctx: Arc<FunctionContext>,
    debug_dir: Option<PathBuf>,
}

impl OalCompiler {
    pub fn new(registry: Arc<SchemaRegistry>, ctx: FunctionContext) -> Self {
        Self {
            registry,
            ctx: Arc::new(ctx),
            debug_dir: None,
        }
    }

    /// Render generated sources into `dir` after every successful compile
    #[must_use]
    pub fn with_debug_dir(mut self, dir: Option<impl Into<PathBuf>>) -> Self {
        self.debug_dir = dir.map(Into::into);
        self
    }

    /// Compile every script as one batch
    pub fn compile(&self, scripts: &[ScriptSource]) -> Result<CompiledOal> {
        let started = Instant::now();
        match self.compile_batch(scripts) {
            Ok(compiled) => {
                let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                metrics::record_compile(
                    scripts.len(),
                    compiled.unit_types.len(),
                    compiled.dispatchers.len(),
                    elapsed,
                );
                info!(
                    scripts = scripts.len(),
                    metrics = compiled.unit_types.len(),
                    dispatchers = compiled.dispatchers.len(),
                    elapsed_ms = elapsed,
                    "OAL scripts compiled"
                );
                Ok(compiled)
            }
            Err(e) => {
                metrics::record_compile_failure();
                error!(error = %e, "OAL compilation failed");
                Err(e)
            }
        }
    }

    fn compile_batch(&self, scripts: &[ScriptSource]) -> Result<CompiledOal> {
        let parsed = scripts
            .iter()
            .map(|s| parse_script(&s.name, &s.text))
            .collect::<std::result::Result<Vec<OalScript>, _>>()?;

        check_unique(parsed.iter().flat_map(|s| s.metrics.iter()))?;

        let enricher = Enricher::new(&self.registry);
        let models = parsed
            .iter()
            .flat_map(|s| s.metrics.iter())
            .map(|def| enricher.enrich(def))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let generated = generator::generate(&models, &self.registry, &self.ctx)?;

        let disabled_sources = parsed
            .iter()
            .flat_map(|s| s.disabled_sources.iter())
            .map(|scope| scope.to_lowercase())
            .collect();

        let compiled = CompiledOal {
            models,
            unit_types: generated.unit_types,
            dispatchers: generated
                .dispatchers
                .into_iter()
                .map(|(scope, d)| (scope, Arc::new(d)))
                .collect(),
            disabled_sources,
            registry: Arc::clone(&self.registry),
        };

        if let Some(dir) = &self.debug_dir {
            compiled.emit_sources(dir)?;
        }
        Ok(compiled)
    }
}

/// Immutable result of a successful compilation
#[derive(Debug)]
pub struct CompiledOal {
    models: Vec<CodeGenModel>,
    unit_types: BTreeMap<String, Arc<MetricUnitType>>,
    dispatchers: BTreeMap<String, Arc<Dispatcher>>,
    disabled_sources: BTreeSet<String>,
    registry: Arc<SchemaRegistry>,
}

impl CompiledOal {
    /// Models in script order
    pub fn models(&self) -> &[CodeGenModel] {
        &self.models
    }

    pub fn unit_type(&self, metric: &str) -> Option<&Arc<MetricUnitType>> {
        self.unit_types.get(metric)
    }

    pub fn unit_types(&self) -> impl Iterator<Item = &Arc<MetricUnitType>> {
        self.unit_types.values()
    }

    pub fn dispatcher(&self, scope: &str) -> Option<&Arc<Dispatcher>> {
        self.dispatchers.get(scope)
    }

    pub fn dispatchers(&self) -> impl Iterator<Item = &Arc<Dispatcher>> {
        self.dispatchers.values()
    }

    /// Whether a `disable(...)` statement named the scope, ignoring case
    pub fn is_disabled(&self, scope: &str) -> bool {
        self.disabled_sources.contains(&scope.to_lowercase())
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Render every unit and dispatcher under `dir`
    pub fn emit_sources(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        source_emitter::emit(dir, &self.models)
    }
}
