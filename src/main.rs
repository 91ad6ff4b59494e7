use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use case_reconciler::app::ports::TimeSeriesSourcePort;
use case_reconciler::app::{ReconcileUseCase, RunManifest, RunMode};
use case_reconciler::config::Config;
use case_reconciler::infra::{CsvSheetSource, FileTimeSeriesSource, FsSnapshotOutput, HttpTimeSeriesSource};
use case_reconciler::logging;
use case_reconciler::observability;
use case_reconciler::pipeline::processing::GeocodeTable;

#[derive(Parser)]
#[command(name = "case_reconciler")]
#[command(about = "Reconcile line-list sheets and cumulative time series into map aggregates")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: clean, expand, geocode, aggregate and write every output
    Run,
    /// Clean the sheets only: write the cleaned dataset and the error reports
    Clean,
    /// Validate the configuration and the geocode table, then exit
    CheckConfig,
}

fn time_series_source(config: &Config) -> Option<Box<dyn TimeSeriesSourcePort>> {
    let ts = config.time_series.as_ref()?;
    match (&ts.url, &ts.path) {
        (Some(url), _) => Some(Box::new(HttpTimeSeriesSource::new(
            ts.tag.clone(),
            url.clone(),
            config.files.time_series_cache.clone(),
        ))),
        (None, Some(path)) => Some(Box::new(FileTimeSeriesSource::new(ts.tag.clone(), path.clone()))),
        (None, None) => None,
    }
}

fn load_geocodes(config: &Config) -> Result<Arc<GeocodeTable>> {
    let table = GeocodeTable::load(&config.files.geocode_tsv).with_context(|| {
        format!(
            "Failed to load geocode table '{}'",
            config.files.geocode_tsv.display()
        )
    })?;
    Ok(Arc::new(table))
}

fn print_manifest(manifest: &RunManifest) {
    let summary = &manifest.summary;
    println!("\nRun {} committed", manifest.run_id);
    for sheet in &summary.sheets {
        println!(
            "   {}: {} rows -> {} expanded, {} clean, {} rejected",
            sheet.source_name, sheet.input_rows, sheet.expanded_rows, sheet.clean_rows, sheet.rejected_rows
        );
    }
    if let Some(ts) = &summary.time_series {
        println!(
            "   {}: {} locations -> {} cases, {} anomalies",
            ts.source_tag, ts.locations, ts.rows_emitted, ts.anomalies.len()
        );
    }
    println!(
        "   Geocode matched {}/{}",
        summary.geocode.matched, summary.geocode.total
    );
    if let Some(aggregation) = &summary.aggregation {
        println!("   Aggregates: {}", aggregation.aggregates);
    }
    println!("   Outputs: {}", manifest.outputs.len());
}

async fn reconcile(config: Config, mode: RunMode) -> Result<()> {
    let geocodes = load_geocodes(&config)?;
    let time_series = time_series_source(&config);
    let output = FsSnapshotOutput::new(
        config.files.output_dir.clone(),
        config.files.publish_dir.clone(),
    );
    let use_case = ReconcileUseCase::new(
        config,
        Box::new(CsvSheetSource),
        time_series,
        geocodes,
        Box::new(output),
    );

    let result = use_case.run(mode).await;
    observability::push_all_metrics(&format!("{:?}", mode).to_lowercase()).await;

    match result {
        Ok(manifest) => {
            print_manifest(&manifest);
            Ok(())
        }
        Err(e) => {
            error!(kind = ?e.kind(), "Reconciliation aborted: {}", e);
            Err(anyhow::Error::new(e).context("Reconciliation aborted, no outputs were written"))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config '{}'", cli.config.display()))?;
    let _log_guard = logging::init_logging(&config.files.log_dir);

    if let Err(e) = observability::init() {
        warn!("Metrics disabled: {}", e);
    }

    match cli.command {
        Commands::Run => {
            info!("Running full reconciliation");
            reconcile(config, RunMode::Full).await
        }
        Commands::Clean => {
            info!("Running sheet cleaning");
            reconcile(config, RunMode::SheetsOnly).await
        }
        Commands::CheckConfig => {
            let geocodes = load_geocodes(&config)?;
            println!("Configuration OK: {}", cli.config.display());
            println!("   Sheets: {}", config.sheets.len());
            if let Some(ts) = &config.time_series {
                let origin = ts
                    .url
                    .clone()
                    .or_else(|| ts.path.as_ref().map(|p| p.display().to_string()))
                    .unwrap_or_default();
                println!("   Time series: {} ({})", ts.tag, origin);
            }
            println!("   Geocode entries: {}", geocodes.len());
            println!("   Precision: {}", config.aggregation.precision);
            Ok(())
        }
    }
}
