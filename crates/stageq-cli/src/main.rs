mod config;
mod logging;
mod query;

use anyhow::Context;
use clap::Parser;
use config::Config;
use stageq_engine::{Executor, PipelineError};
use stageq_render::render;
use std::path::PathBuf;

/// Run a pipeline over JSON relations: print the derived query text, then
/// the result document.
#[derive(Debug, Parser)]
#[command(name = "stageq", version)]
struct Args {
    /// JSON object mapping relation name to an array of rows
    #[arg(long, env = "STAGEQ_RELATIONS")]
    relations: PathBuf,

    /// Query document (JSON, or YAML by extension)
    #[arg(long, required_unless_present = "presets", conflicts_with = "presets")]
    query: Option<PathBuf>,

    /// Map of preset name to query document
    #[arg(long, requires = "preset")]
    presets: Option<PathBuf>,

    /// Preset to run from --presets
    #[arg(long, requires = "presets")]
    preset: Option<String>,

    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print the query text only
    #[arg(long)]
    sql_only: bool,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::load_or_default(&args.config).context("loading configuration")?;
    config.apply_logging_env();
    logging::init()?;

    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("run", run_id = %run_id);
    let _guard = span.enter();

    let store = query::load_relations(&args.relations)?;
    let pipeline = match (&args.query, &args.presets, &args.preset) {
        (Some(path), _, _) => query::load_pipeline(path)?,
        (None, Some(path), Some(name)) => query::load_preset(path, name)?,
        _ => anyhow::bail!("either --query or --presets with --preset is required"),
    };

    let fingerprint = pipeline.fingerprint()?;
    tracing::info!(
        "Running pipeline over {} ({} steps, fingerprint {})",
        pipeline.dataset,
        pipeline.steps.len(),
        &fingerprint[..12.min(fingerprint.len())]
    );

    let snapshot = store.snapshot();
    match render(&pipeline, &snapshot, &config.render) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            tracing::warn!("Query text unavailable: {}", e);
            println!("-- {}", e);
        }
    }
    if args.sql_only {
        return Ok(());
    }

    let executor = Executor::new(config.executor_options());
    match executor.execute(&snapshot, &pipeline) {
        Ok(result) => {
            tracing::info!("Pipeline produced {} rows", result.row_count());
            println!("{}", serde_json::to_string_pretty(&query::result_to_json(&result)?)?);
            Ok(())
        }
        Err(PipelineError::StepFailed {
            index,
            kind,
            source,
            partial,
        }) => {
            tracing::error!("Step {} ({}) failed: {}", index, kind, source);
            let mut output = query::result_to_json(&partial)?;
            output["error"] = serde_json::json!({
                "step": index,
                "kind": kind,
                "message": source.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Err(anyhow::anyhow!("step {} ({}) failed: {}", index, kind, source))
        }
        Err(e) => Err(e.into()),
    }
}
