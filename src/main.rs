// src/main.rs

mod allocator;
mod analysis;
mod caption;
mod clean_names;
mod cli;
mod error;
mod group;
mod index;
mod model;
mod parser;
mod table;

use analysis::{run_analysis, AnalysisConfig};
use anyhow::{Context, Result};
use caption::{GeminiCaptioner, GenerationConfig, KNOWN_MODELS};
use clap::Parser;
use cli::{AnalyzeArgs, Args, Command, IndexArgs};
use group::GroupMapping;
use index::{build_index, PostIndex};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let start_time = Instant::now();

    match args.command {
        Command::Index(index_args) => run_index(&index_args)?,
        Command::Analyze(analyze_args) => run_analyze(&analyze_args)?,
        Command::CleanNames { directory } => {
            let summary = clean_names::rename_spaces(&directory)?;
            info!(
                "Renamed {} entries ({} failed)",
                summary.renamed, summary.failed
            );
        }
    }

    info!("Total time: {:.2?}", start_time.elapsed());
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_index(args: &IndexArgs) -> Result<()> {
    let mapping = match &args.mapping {
        Some(path) => GroupMapping::load(path)?,
        None => GroupMapping::default(),
    };
    if mapping.is_empty() {
        warn!("Group mapping is empty, every file will be filed under MISC");
    } else {
        info!("Using {} group mappings", mapping.len());
    }

    let (index, summary) = build_index(&args.directory, &args.index_file, &mapping)?;
    for skipped in &summary.skipped {
        warn!("Not indexed: {} ({})", skipped.path, skipped.reason);
    }
    if index.is_empty() {
        warn!("No images found under {}", args.directory.display());
    }
    for (code, posts) in index.by_group() {
        info!("{}: {} posts", code, posts.len());
    }
    info!(
        "Finished processing files: {} qualifying, {} new, {} already indexed, {} skipped, {} total entries",
        summary.qualifying,
        summary.assigned,
        summary.already_indexed,
        summary.skipped.len(),
        index.len()
    );
    Ok(())
}

fn run_analyze(args: &AnalyzeArgs) -> Result<()> {
    let instructions = load_text_file(&args.instructions_file)?;
    let prompt = load_text_file(&args.prompt_file)?;

    if !KNOWN_MODELS.contains(&args.model.as_str()) {
        warn!("Model '{}' is not in the known model list", args.model);
    }

    let index = match &args.index_file {
        Some(path) => Some(PostIndex::load(path)?),
        None => None,
    };
    let output = args.output.clone().unwrap_or_else(|| {
        chrono::Local::now()
            .format("analysis_%Y%m%d_%H%M%S.csv")
            .to_string()
            .into()
    });

    let captioner = GeminiCaptioner::new(
        &args.endpoint,
        &args.model,
        &args.api_key,
        Duration::from_secs(args.timeout_secs),
    )
    .context("Failed to build HTTP client")?
    .with_config(GenerationConfig {
        temperature: args.temperature,
        ..GenerationConfig::default()
    });

    let config = AnalysisConfig {
        image_folder: args.image_folder.clone(),
        instructions,
        prompt,
        output,
        workers: args.workers,
        retries: args.retries,
        retry_backoff: Duration::from_secs(2),
        index,
    };

    let summary = run_analysis(&config, &captioner)?;
    for failure in &summary.failures {
        warn!("No record for {}: {}", failure.path.display(), failure.reason);
    }
    info!(
        "Analysis finished: {} images, {} rows, {} failed, {} duplicates dropped -> {}",
        summary.images,
        summary.records,
        summary.failures.len(),
        summary.duplicates_dropped,
        summary.output.display()
    );
    Ok(())
}

fn load_text_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Error loading file {}", path.display()))
}
