//! Harvest subcommand - fetch a posted-date range into NDJSON

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use crossharvest_core::{
    NdjsonSink, ProgressContext, ProvenanceLog, RecordSink, cleanup_tmp_files,
    install_signal_handlers, shutdown_flag, write_snapshot,
};
use crossharvest_crossref::{HarvestConfig, Harvester};
use serde_json::Value;

use super::WindowArgs;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct HarvestArgs {
    #[command(flatten)]
    pub window: WindowArgs,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output file stem (default: crossref_posted_<from>_<to>)
    #[arg(long)]
    pub name: Option<String>,

    /// Rows per page (1-1000)
    #[arg(long)]
    pub rows: Option<u32>,

    /// Maximum pages per cursor-paginated window
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Never switch to DOI-first harvesting for dense days
    #[arg(long)]
    pub no_fallback: bool,

    /// Do not write the raw provenance log
    #[arg(long)]
    pub no_provenance: bool,

    /// Write plain NDJSON instead of gzip
    #[arg(long)]
    pub no_gzip: bool,
}

pub fn run(args: HarvestArgs, config: &Config, progress: &ProgressContext) -> Result<ExitCode> {
    let mut range = args.window.range_args(&config.harvest);
    if let Some(rows) = args.rows {
        range.rows_per_call = rows;
    }
    if let Some(max_pages) = args.max_pages {
        range.max_pages_per_window = max_pages;
    }
    if args.no_fallback {
        range.fallback_enabled = false;
    }
    let harvest_config = HarvestConfig::try_from(range).context("Invalid harvest settings")?;
    let client = super::connect(config, args.window.mailto.as_deref())?;

    let output_dir = args
        .output
        .unwrap_or_else(|| config.output.default_dir.clone());
    std::fs::create_dir_all(&output_dir).context("Cannot create output directory")?;
    cleanup_tmp_files(&output_dir).context("Failed to clean stale tmp files")?;

    let stem = args.name.unwrap_or_else(|| {
        format!(
            "crossref_posted_{}_{}",
            harvest_config.date_start, harvest_config.date_end
        )
    });
    let ext = if config.output.gzip && !args.no_gzip {
        "ndjson.gz"
    } else {
        "ndjson"
    };
    let stream_path = output_dir.join(format!("{stem}.{ext}"));
    let raw_path = output_dir.join(format!("{stem}_raw.{ext}"));
    let final_path = output_dir.join(format!("{stem}_final.{ext}"));

    log::info!("Harvesting Crossref posted content");
    log::info!("  Range: {}..{}", harvest_config.date_start, harvest_config.date_end);
    log::info!("  Contact: {}", client.identity().contact());
    log::info!("  Output: {}", output_dir.display());

    install_signal_handlers().context("Failed to install signal handlers")?;

    let mut stream = NdjsonSink::create(&stream_path)
        .with_context(|| format!("Cannot create {}", stream_path.display()))?;
    let mut raw = if config.output.provenance && !args.no_provenance {
        Some(
            ProvenanceLog::open(&raw_path)
                .with_context(|| format!("Cannot open {}", raw_path.display()))?,
        )
    } else {
        None
    };

    let harvester = Harvester::new(client, harvest_config);
    let outcome = harvester.run(
        &mut stream,
        raw.as_mut().map(|r| r as &mut dyn RecordSink<Value>),
        shutdown_flag(),
        progress,
    )?;

    let streamed = stream.finish().context("Failed to finish record stream")?;
    if let Some(raw) = raw {
        let lines = raw.finish().context("Failed to finish provenance log")?;
        log::info!("Provenance: {} raw items -> {}", lines, raw_path.display());
    }
    let written = write_snapshot(&final_path, &outcome.records)
        .with_context(|| format!("Cannot write {}", final_path.display()))?;
    log::info!("Stream: {} rows -> {}", streamed, stream_path.display());
    log::info!("Final: {} records -> {}", written, final_path.display());

    let summary = &outcome.summary;
    if progress.is_tty() {
        eprintln!("\n{}", summary.format_table());
        if let Some(table) = summary.format_abandoned() {
            eprintln!("{table}");
        }
    } else {
        summary.log();
    }

    if summary.cancelled {
        log::warn!("Interrupted; partial results written");
        return Ok(ExitCode::from(130));
    }
    if !summary.abandoned.is_empty() {
        log::error!(
            "{} windows could not be harvested completely",
            summary.abandoned.len()
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
