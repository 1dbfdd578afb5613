//! CLI output

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::Serialize;

use oap_oal::{CompiledOal, StorageRow};
use oap_stream::{FlushReport, InMemoryStorage};

use crate::server::IngestSummary;

/// Print generated metrics grouped by dispatcher
pub fn print_compile_summary(compiled: &CompiledOal) {
    for dispatcher in compiled.dispatchers() {
        println!("{}Dispatcher", dispatcher.scope());
        for step in dispatcher.steps() {
            let unit = step.unit_type();
            println!(
                "  {:<48} {:<14} table={}",
                unit.metric_name(),
                unit.function().to_string(),
                unit.table_name()
            );
        }
    }
    println!(
        "{} metrics, {} dispatchers",
        compiled.unit_types().count(),
        compiled.dispatchers().count()
    );
}

#[derive(Serialize)]
struct ReplayOutput<'a> {
    summary: &'a IngestSummary,
    flushed: usize,
    /// `table@downsampling` to rows, id order
    tables: BTreeMap<String, Vec<StorageRow>>,
}

/// Print replay counters and every persisted row
pub fn print_replay(
    summary: &IngestSummary,
    report: &FlushReport,
    storage: &InMemoryStorage,
    format: &str,
) -> Result<()> {
    let tables: BTreeMap<String, Vec<StorageRow>> = storage
        .tables()
        .into_iter()
        .map(|(table, downsampling)| {
            let rows = storage.rows(&table, downsampling);
            (format!("{table}@{downsampling}"), rows)
        })
        .collect();

    match format {
        "json" => {
            let output = ReplayOutput {
                summary,
                flushed: report.total(),
                tables,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "table" => {
            println!(
                "events={} rejected={} matched={} filtered={} failed={}",
                summary.events, summary.rejected, summary.matched, summary.filtered, summary.failed
            );
            println!(
                "flushed minute={} hour={} day={}",
                report.minute, report.hour, report.day
            );
            for (table, rows) in &tables {
                println!("{table}");
                for row in rows {
                    let cells: Vec<String> = row.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    println!("  {}", cells.join(" "));
                }
            }
        }
        other => bail!("Unknown output format: {other}"),
    }
    Ok(())
}
