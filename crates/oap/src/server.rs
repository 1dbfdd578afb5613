//! Server orchestration

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use oap_common::config::{ApdexConfig, Config};
use oap_oal::{
    default_registry, CompiledOal, DispatchOutcome, FunctionContext, OalCompiler, ScriptSource,
    SourceEvent,
};
use oap_stream::{AnalysisEngine, FlushReport, InMemoryStorage, StorageWriter};

/// Counters of one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Lines parsed into events
    pub events: usize,
    /// Lines that were not valid events, or named an unknown scope
    pub rejected: usize,
    pub matched: usize,
    pub filtered: usize,
    pub failed: usize,
}

impl IngestSummary {
    fn absorb(&mut self, outcome: DispatchOutcome) {
        self.matched += outcome.matched;
        self.filtered += outcome.filtered;
        self.failed += outcome.failed;
    }
}

/// Read and compile scripts as one batch
pub async fn compile_scripts(
    paths: &[String],
    debug_dir: Option<String>,
    apdex: &ApdexConfig,
) -> Result<CompiledOal> {
    let mut scripts = Vec::with_capacity(paths.len());
    for path in paths {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read OAL script {path}"))?;
        scripts.push(ScriptSource::new(path.clone(), text));
    }

    let registry = Arc::new(default_registry()?);
    let compiled = OalCompiler::new(registry, FunctionContext::new(apdex.clone()))
        .with_debug_dir(debug_dir)
        .compile(&scripts)?;
    Ok(compiled)
}

/// Analysis server wiring the compiled scripts to the engine
pub struct AnalysisServer {
    engine: Arc<AnalysisEngine>,
    storage: Arc<InMemoryStorage>,
}

impl AnalysisServer {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing OAP components...");

        let compiled = compile_scripts(
            &config.oal.scripts,
            config.oal.debug_dir(),
            &config.analysis.apdex,
        )
        .await?;

        let storage = Arc::new(InMemoryStorage::new());
        let engine = Arc::new(AnalysisEngine::new(
            &config.analysis,
            Arc::new(compiled),
            Arc::clone(&storage) as Arc<dyn StorageWriter>,
        ));

        info!("OAP initialization complete");
        Ok(Self { engine, storage })
    }

    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        &self.storage
    }

    /// Flush periodically while ingesting events from stdin until EOF
    pub async fn run(&self) -> Result<()> {
        info!("Reading source events from stdin");
        let ingest = self.ingest(BufReader::new(tokio::io::stdin()));

        tokio::select! {
            result = self.engine.run() => result?,
            result = ingest => {
                let summary = result?;
                info!(
                    events = summary.events,
                    rejected = summary.rejected,
                    "Input closed"
                );
            }
        }
        Ok(())
    }

    /// Dispatch every event of a JSON lines file
    pub async fn replay(&self, path: &str) -> Result<IngestSummary> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open event file {path}"))?;
        let summary = self.ingest(BufReader::new(file)).await?;
        info!(
            events = summary.events,
            matched = summary.matched,
            rejected = summary.rejected,
            "Replay complete"
        );
        Ok(summary)
    }

    /// Dispatch one JSON event per line; blank lines are skipped
    pub async fn ingest<R: AsyncBufRead + Unpin>(&self, reader: R) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut lines = reader.lines();
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event: SourceEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping malformed event");
                    summary.rejected += 1;
                    continue;
                }
            };

            summary.events += 1;
            match self.engine.dispatch(&event) {
                Ok(outcome) => summary.absorb(outcome),
                Err(e) => {
                    warn!(line = line_no, error = %e, "Event rejected");
                    summary.rejected += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Stop the engine and flush what is left
    pub async fn shutdown(&self) -> Result<FlushReport> {
        info!("Shutting down OAP...");
        Ok(self.engine.shutdown().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use oap_common::{DownSampling, Value};

    fn script(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".oal").tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn config(script: &tempfile::NamedTempFile) -> Config {
        let mut config = Config::default();
        config.oal.scripts = vec![script.path().to_string_lossy().into_owned()];
        config
    }

    #[tokio::test]
    async fn test_compile_missing_script() {
        let err = compile_scripts(&["/nonexistent.oal".to_string()], None, &ApdexConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent.oal"));
    }

    #[tokio::test]
    async fn test_compile_emits_debug_sources() {
        let script = script("svc_count = from(Service.*).count();");
        let dir = tempfile::tempdir().unwrap();
        compile_scripts(
            &[script.path().to_string_lossy().into_owned()],
            Some(dir.path().to_string_lossy().into_owned()),
            &ApdexConfig::default(),
        )
        .await
        .unwrap();

        assert!(dir.path().join("metrics/SvcCount.oal.txt").exists());
        assert!(dir.path().join("dispatchers/ServiceDispatcher.oal.txt").exists());
    }

    #[tokio::test]
    async fn test_ingest_and_flush() {
        let script = script(
            "svc_avg = from(Service.latency).longAvg();\nsvc_ok = from(Service.*).filter(status == true).count();",
        );
        let server = AnalysisServer::new(config(&script)).await.unwrap();

        let input = concat!(
            r#"{"scope": "Service", "timeBucket": 202401011230, "fields": {"entityId": "svc", "latency": 100, "status": true}}"#,
            "\n\n",
            r#"{"scope": "Service", "timeBucket": 202401011230, "fields": {"entityId": "svc", "latency": 300, "status": false}}"#,
            "\nnot json\n",
            r#"{"scope": "Nope", "timeBucket": 202401011230}"#,
            "\n",
        );
        let summary = server.ingest(input.as_bytes()).await.unwrap();
        assert_eq!(summary.events, 3);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.filtered, 1);

        let report = server.shutdown().await.unwrap();
        assert_eq!(report.minute, 2);

        let row = server
            .storage()
            .row("svc_avg", DownSampling::Minute, "202401011230_svc")
            .unwrap();
        assert_eq!(row["value"], Value::Long(200));
        let row = server
            .storage()
            .row("svc_ok", DownSampling::Hour, "2024010112_svc")
            .unwrap();
        assert_eq!(row["value"], Value::Long(1));
    }
}
