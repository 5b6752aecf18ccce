//! Harvest configuration

use chrono::NaiveDate;
use crossharvest_core::ConfigError;
use rustc_hash::FxHashSet;

use crate::api::{MAX_ROWS, SortKey};
use crate::paginator::PageLimits;
use crate::window::QueryWindow;

pub const DEFAULT_THRESHOLD: u64 = 1500;
pub const DEFAULT_BATCH_DAYS: u32 = 7;
pub const DEFAULT_MAX_CURSOR_REPEATS: u32 = 3;
pub const DEFAULT_MAX_PAGES_PER_WINDOW: u32 = 50;
pub const DEFAULT_MAX_FALLBACK_PAGES: u32 = 500;

/// Harvest arguments as collected from CLI and config file (plain struct, no clap derive).
#[derive(Debug, Clone)]
pub struct HarvestArgs {
    pub date_start: NaiveDate,
    /// `None` = today
    pub date_end: Option<NaiveDate>,
    pub per_window_threshold: u64,
    pub rows_per_call: u32,
    pub sort_key: String,
    pub batch_days: u32,
    /// Empty = no prefix restriction
    pub prefixes: Vec<String>,
    pub max_cursor_repeats: u32,
    pub max_pages_per_window: u32,
    pub max_fallback_pages: u32,
    pub fallback_enabled: bool,
}

impl HarvestArgs {
    pub fn new(date_start: NaiveDate, date_end: Option<NaiveDate>) -> Self {
        Self {
            date_start,
            date_end,
            per_window_threshold: DEFAULT_THRESHOLD,
            rows_per_call: MAX_ROWS,
            sort_key: SortKey::default().to_string(),
            batch_days: DEFAULT_BATCH_DAYS,
            prefixes: Vec::new(),
            max_cursor_repeats: DEFAULT_MAX_CURSOR_REPEATS,
            max_pages_per_window: DEFAULT_MAX_PAGES_PER_WINDOW,
            max_fallback_pages: DEFAULT_MAX_FALLBACK_PAGES,
            fallback_enabled: true,
        }
    }
}

/// Validated runtime configuration for one harvest
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub per_window_threshold: u64,
    pub sort: SortKey,
    pub batch_days: u32,
    pub prefixes: Vec<String>,
    /// Full-record pagination
    pub page_limits: PageLimits,
    /// Identifier-only enumeration
    pub fallback_limits: PageLimits,
    pub fallback_enabled: bool,
}

impl TryFrom<HarvestArgs> for HarvestConfig {
    type Error = ConfigError;

    fn try_from(args: HarvestArgs) -> Result<Self, Self::Error> {
        let date_end = args
            .date_end
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        // Rejects inverted ranges
        QueryWindow::new(args.date_start, date_end)?;

        if args.per_window_threshold == 0 {
            return Err(ConfigError::invalid("per_window_threshold", "must be at least 1"));
        }
        if !(1..=MAX_ROWS).contains(&args.rows_per_call) {
            return Err(ConfigError::invalid(
                "rows_per_call",
                format!("{} is outside 1..={MAX_ROWS}", args.rows_per_call),
            ));
        }
        if args.batch_days == 0 {
            return Err(ConfigError::invalid("batch_days", "must be at least 1"));
        }
        if args.max_pages_per_window == 0 || args.max_fallback_pages == 0 {
            return Err(ConfigError::invalid("page limits", "must be at least 1"));
        }
        let sort = args.sort_key.parse::<SortKey>()?;

        let mut prefixes: Vec<String> = args
            .prefixes
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        // First occurrence wins, order kept
        let mut seen = FxHashSet::default();
        prefixes.retain(|p| seen.insert(p.clone()));
        if let Some(bad) = prefixes.iter().find(|p| !p.starts_with("10.")) {
            return Err(ConfigError::invalid(
                "prefixes",
                format!("{bad:?} is not a DOI prefix (expected 10.xxxx)"),
            ));
        }

        let page_limits = PageLimits {
            rows: args.rows_per_call,
            max_cursor_repeats: args.max_cursor_repeats,
            max_pages: args.max_pages_per_window,
        };
        Ok(Self {
            date_start: args.date_start,
            date_end,
            per_window_threshold: args.per_window_threshold,
            sort,
            batch_days: args.batch_days,
            prefixes,
            page_limits,
            fallback_limits: PageLimits {
                max_pages: args.max_fallback_pages,
                ..page_limits
            },
            fallback_enabled: args.fallback_enabled,
        })
    }
}

impl HarvestConfig {
    /// Top-level work units: `batch_days` batches × each prefix (or no prefix)
    pub fn batches(&self) -> Result<Vec<QueryWindow>, ConfigError> {
        let dated = QueryWindow::batches(self.date_start, self.date_end, self.batch_days)?;
        if self.prefixes.is_empty() {
            return Ok(dated);
        }
        Ok(dated
            .iter()
            .flat_map(|w| {
                self.prefixes
                    .iter()
                    .map(move |p| w.clone().with_prefix(Some(p.clone())))
            })
            .collect())
    }
}
