//! Subcommands and the arguments they share

pub mod harvest;
pub mod plan;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use crossharvest_crossref::{CrossrefClient, HarvestArgs as RangeArgs};

use crate::config::{Config, HarvestSection};

/// Date range and splitting options common to `harvest` and `plan`
#[derive(Args, Debug)]
pub struct WindowArgs {
    /// First posted date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub from: NaiveDate,

    /// Last posted date, inclusive (YYYY-MM-DD, default: today)
    #[arg(long, value_parser = parse_date)]
    pub to: Option<NaiveDate>,

    /// Split windows whose count exceeds this
    #[arg(long)]
    pub threshold: Option<u64>,

    /// Days per top-level batch
    #[arg(long)]
    pub batch_days: Option<u32>,

    /// DOI prefixes to harvest separately (comma-separated, e.g. 10.1101)
    #[arg(long, value_delimiter = ',')]
    pub prefix: Option<Vec<String>>,

    /// Sort key: deposited, created or indexed
    #[arg(long)]
    pub sort: Option<String>,

    /// Contact address sent with every request (overrides config and CROSSREF_MAILTO)
    #[arg(long)]
    pub mailto: Option<String>,
}

impl WindowArgs {
    /// Config-file values with CLI overrides applied
    pub fn range_args(&self, section: &HarvestSection) -> RangeArgs {
        let mut args = RangeArgs::new(self.from, self.to);
        args.per_window_threshold = self.threshold.unwrap_or(section.per_window_threshold);
        args.rows_per_call = section.rows_per_call;
        args.sort_key = self.sort.clone().unwrap_or_else(|| section.sort_key.clone());
        args.batch_days = self.batch_days.unwrap_or(section.batch_days);
        args.prefixes = self.prefix.clone().unwrap_or_else(|| section.prefixes.clone());
        args.max_cursor_repeats = section.max_cursor_repeats;
        args.max_pages_per_window = section.max_pages_per_window;
        args.max_fallback_pages = section.max_fallback_pages;
        args.fallback_enabled = section.fallback_enabled;
        args
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

/// Build the API client, `mailto` taking precedence over the configured contact
pub fn connect(config: &Config, mailto: Option<&str>) -> Result<CrossrefClient> {
    let mut client = config.client.to_client_config();
    if let Some(m) = mailto {
        client.contact = m.to_string();
    }
    CrossrefClient::connect(&client).context("Invalid client configuration")
}
