//! crossharvest - Crossref posted-content harvester
//!
//! Harvests preprint metadata for a posted-date range from the Crossref
//! works API into deduplicated NDJSON.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "crossharvest")]
#[command(about = "Harvest Crossref posted-content metadata by posted date")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./crossharvest.toml or ~/.config/crossharvest/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest a posted-date range into NDJSON
    Harvest(cmd::harvest::HarvestArgs),
    /// Show how a range would be split, without fetching records
    Plan(cmd::plan::PlanArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let progress = crossharvest_core::ProgressContext::new();

    // Logging:
    //   TTY:     warn unless --debug  — progress bars show activity
    //   non-TTY: info unless -q/--debug — logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = cli.quiet || (is_tty && !cli.debug);
    crossharvest_core::init_logging(
        crossharvest_core::Verbosity::from_flags(quiet, cli.debug),
        multi,
    );

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Harvest(args) => cmd::harvest::run(args, &config, &progress),
        Command::Plan(args) => cmd::plan::run(args, &config),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let client = config.client.to_client_config();
    let contact = config
        .client
        .contact()
        .unwrap_or_else(|| format!("not set (use --mailto or {})", config::CONTACT_ENV));
    let harvest = &config.harvest;
    let rows: Vec<(&str, String)> = vec![
        ("API base URL", client.base_url.clone()),
        ("Client identifier", client.client_identifier.clone()),
        ("Contact", contact),
        (
            "Retries",
            format!(
                "{} attempts, {}ms..{}ms backoff (+{}ms jitter)",
                client.retry.max_attempts,
                client.retry.base_delay.as_millis(),
                client.retry.max_delay.as_millis(),
                client.retry.max_jitter.as_millis()
            ),
        ),
        ("Request spacing", format!("{}ms", client.min_interval.as_millis())),
        ("Request timeout", format!("{}s", client.request_timeout.as_secs())),
        ("Window threshold", harvest.per_window_threshold.to_string()),
        ("Rows per call", harvest.rows_per_call.to_string()),
        ("Sort key", harvest.sort_key.clone()),
        ("Batch days", harvest.batch_days.to_string()),
        (
            "Prefixes",
            if harvest.prefixes.is_empty() {
                "all".to_string()
            } else {
                harvest.prefixes.join(", ")
            },
        ),
        (
            "Page limits",
            format!(
                "{} per window, {} DOI-first, {} cursor repeats",
                harvest.max_pages_per_window, harvest.max_fallback_pages, harvest.max_cursor_repeats
            ),
        ),
        ("DOI-first fallback", harvest.fallback_enabled.to_string()),
        ("Output directory", config.output.default_dir.display().to_string()),
        ("Gzip", config.output.gzip.to_string()),
        ("Provenance log", config.output.provenance.to_string()),
    ];
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }

    eprintln!("\n{table}");
}
