use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use vecdiff_analysis::{
    ComparisonOrchestrator, ComparisonOutcome, ComparisonRequest, FileReportWriter,
    SimilarityOutcome, similarity_percent,
};
use vecdiff_config::{load_config, resolve_settings, validate_config, write_default_config};
use vecdiff_infer::load_generator;
use vecdiff_store::ConnectionStringConnector;

use crate::cli::CompareArgs;

/// Resolves settings for `workspace`, runs one comparison and returns its
/// outcome. The request must already carry both values.
pub async fn run_compare(
    workspace: &Path,
    config_path: &Path,
    args: &CompareArgs,
    request: &ComparisonRequest,
) -> Result<ComparisonOutcome> {
    let config = load_config(config_path)
        .with_context(|| format!("failed to load config at {}", config_path.display()))?;
    for warning in validate_config(&config) {
        eprintln!("vecdiff config warning [{}]: {}", warning.code, warning.message);
    }

    let settings = resolve_settings(workspace, &config, args.overrides())
        .context("failed to resolve comparison settings")?;
    let loaded = load_generator(&settings);
    tracing::info!(
        provider = %loaded.provider_name,
        model = %loaded.model_name,
        report = %settings.report_path.display(),
        "comparison settings resolved"
    );

    let orchestrator = ComparisonOrchestrator::new(
        settings,
        Arc::new(ConnectionStringConnector),
        Arc::from(loaded.generator),
        Arc::new(FileReportWriter),
    );
    orchestrator
        .run(request)
        .await
        .context("comparison run failed")
}

pub fn print_summary<W: Write>(outcome: &ComparisonOutcome, out: &mut W) -> Result<()> {
    let report = &outcome.report;
    writeln!(
        out,
        "Compared {} {}={} ({})",
        report.namespace,
        report.field_name,
        report.identifier,
        outcome.state.as_str()
    )?;
    for store in &report.stores {
        let selected = store
            .selected
            .as_ref()
            .map(|selected| selected.id.as_str())
            .unwrap_or("none");
        writeln!(
            out,
            "  {}: {} match(es), selected {selected}",
            store.label, store.match_count
        )?;
    }
    match &report.similarity {
        SimilarityOutcome::Score(score) => {
            writeln!(out, "Similarity: {}", similarity_percent(*score))?;
        }
        SimilarityOutcome::Unavailable { reason } => {
            writeln!(out, "Similarity unavailable: {reason}")?;
        }
        SimilarityOutcome::NotComputed => {}
    }
    writeln!(out, "Description saved to {}", outcome.report_path.display())?;
    Ok(())
}

pub fn run_init_config<W: Write>(config_path: &Path, force: bool, out: &mut W) -> Result<()> {
    write_default_config(config_path, force)
        .with_context(|| format!("failed to write config at {}", config_path.display()))?;
    writeln!(out, "Wrote default config to {}", config_path.display())?;
    Ok(())
}
