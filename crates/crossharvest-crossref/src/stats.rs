//! Run-level counters and the end-of-run report.

use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use crossharvest_core::fmt_num;

/// A window the run could not cover completely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedWindow {
    /// `Display` form of the window, e.g. `2024-01-03 [10.1101]`
    pub window: String,
    pub reason: String,
}

/// Counters for one harvest, returned by `Harvester::run`.
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    /// Top-level date batches (× prefixes) processed
    pub batches: usize,
    pub batches_planned: usize,
    pub probes: u64,
    /// Leaves produced by the splitter, including re-split children
    pub windows_planned: usize,
    pub windows_completed: usize,
    /// Windows that failed pagination and were bisected again
    pub windows_split: usize,
    /// Windows harvested DOI-first
    pub windows_fallback: usize,
    pub abandoned: Vec<AbandonedWindow>,
    pub failed_dois: Vec<String>,
    /// Raw items received (before dedup)
    pub records_observed: u64,
    pub records_without_doi: u64,
    pub unique_records: usize,
    pub requests: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
    /// Leaves still queued for the interrupted batch
    pub windows_pending: usize,
}

impl HarvestSummary {
    /// Every planned window completed and every identifier hydrated
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty() && self.failed_dois.is_empty() && !self.cancelled
    }

    /// Batches not finished, the interrupted one included
    pub fn batches_unfinished(&self) -> usize {
        self.batches_planned.saturating_sub(self.batches)
    }

    /// Log run completion (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "Harvest {}: {} unique records ({} observed) from {}/{} windows [{} split, {} DOI-first, {} abandoned], {} requests [{:.1}s]",
            if self.cancelled { "cancelled" } else { "complete" },
            fmt_num(self.unique_records as u64),
            fmt_num(self.records_observed),
            self.windows_completed,
            self.windows_planned,
            self.windows_split,
            self.windows_fallback,
            self.abandoned.len(),
            fmt_num(self.requests),
            self.elapsed.as_secs_f64()
        );
        for a in &self.abandoned {
            log::warn!("abandoned {}: {}", a.window, a.reason);
        }
        if !self.failed_dois.is_empty() {
            log::warn!(
                "{} identifiers could not be fetched",
                self.failed_dois.len()
            );
        }
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Harvest")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        let rows: [(&str, String); 12] = [
            (
                "Batches",
                format!("{}/{}", self.batches, self.batches_planned),
            ),
            ("Count probes", fmt_num(self.probes)),
            (
                "Windows",
                format!("{}/{}", self.windows_completed, self.windows_planned),
            ),
            ("Re-split", fmt_num(self.windows_split as u64)),
            ("DOI-first", fmt_num(self.windows_fallback as u64)),
            ("Abandoned", fmt_num(self.abandoned.len() as u64)),
            ("Records observed", fmt_num(self.records_observed)),
            ("Without DOI", fmt_num(self.records_without_doi)),
            ("Unique records", fmt_num(self.unique_records as u64)),
            ("Failed DOIs", fmt_num(self.failed_dois.len() as u64)),
            ("Requests", fmt_num(self.requests)),
            ("Elapsed", format!("{:.1}s", self.elapsed.as_secs_f64())),
        ];
        for (label, value) in rows {
            table.add_row(vec![Cell::new(label), Cell::new(value)]);
        }
        if self.cancelled {
            table.add_row(vec![
                Cell::new("Status"),
                Cell::new("cancelled").fg(Color::Yellow),
            ]);
        }
        table.to_string()
    }

    /// Table of abandoned windows, `None` when there are none.
    pub fn format_abandoned(&self) -> Option<String> {
        if self.abandoned.is_empty() {
            return None;
        }
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Abandoned window").fg(Color::Yellow),
                Cell::new("Reason").fg(Color::Yellow),
            ]);
        for a in &self.abandoned {
            table.add_row(vec![Cell::new(&a.window), Cell::new(&a.reason)]);
        }
        Some(table.to_string())
    }
}
