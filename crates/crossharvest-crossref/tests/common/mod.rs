//! Simulated Crossref works API for integration tests

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use crossharvest_core::FetchError;
use crossharvest_crossref::{
    HarvestArgs, HarvestConfig, Projection, WorksApi, WorksPage, WorksQuery,
};
use serde_json::{Value, json};

pub const PREFIX: &str = "10.5555";

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn config(start: &str, end: &str, threshold: u64, rows: u32) -> HarvestConfig {
    let mut args = HarvestArgs::new(day(start), Some(day(end)));
    args.per_window_threshold = threshold;
    args.rows_per_call = rows;
    args.batch_days = 31;
    HarvestConfig::try_from(args).unwrap()
}

/// Works published per posted day, served through `c<offset>` cursors.
pub struct SimulatedApi {
    days: BTreeMap<NaiveDate, u64>,
    /// `total-results` never exceeds this
    pub declared_cap: Option<u64>,
    /// Multi-day windows containing one of these days get a stuck cursor
    pub stuck_days: BTreeSet<NaiveDate>,
    /// Full-record paging over any window containing one of these days,
    /// single days included, gets a stuck cursor; DOI-only paging is unaffected
    pub stuck_full_days: BTreeSet<NaiveDate>,
    /// Page requests (not count probes) over any window containing one of
    /// these days fail with a fatal status
    pub fatal_days: BTreeSet<NaiveDate>,
    pub failing_lookups: HashSet<String>,
    /// Raise `flag` once this many requests have been made
    pub cancel_after: Option<(u64, Arc<AtomicBool>)>,
    requests: Cell<u64>,
}

impl SimulatedApi {
    pub fn uniform(start: &str, end: &str, per_day: u64) -> Self {
        let days = day(start)
            .iter_days()
            .take_while(|d| *d <= day(end))
            .map(|d| (d, per_day))
            .collect();
        Self {
            days,
            declared_cap: None,
            stuck_days: BTreeSet::new(),
            stuck_full_days: BTreeSet::new(),
            fatal_days: BTreeSet::new(),
            failing_lookups: HashSet::new(),
            cancel_after: None,
            requests: Cell::new(0),
        }
    }

    pub fn set_day(&mut self, date: &str, n: u64) {
        self.days.insert(day(date), n);
    }

    pub fn doi(date: NaiveDate, i: u64) -> String {
        format!("{PREFIX}/{}.{i:05}", date.format("%Y%m%d"))
    }

    pub fn total(&self) -> u64 {
        self.days.values().sum()
    }

    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    fn tick(&self) {
        let n = self.requests.get() + 1;
        self.requests.set(n);
        if let Some((limit, flag)) = &self.cancel_after {
            if n >= *limit {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }

    fn record(doi: &str, posted: NaiveDate) -> Value {
        json!({
            "DOI": doi,
            "URL": format!("https://doi.org/{doi}"),
            "title": [format!("Preprint {doi}")],
            "type": "posted-content",
            "subtype": "preprint",
            "prefix": PREFIX,
            "member": "246",
            "publisher": "Cold Spring Harbor Laboratory",
            "posted": {"date-parts": [[posted.year(), posted.month(), posted.day()]]},
            "deposited": {"date-parts": [[posted.year(), posted.month(), posted.day()]]},
        })
    }

    fn in_window(&self, query: &WorksQuery<'_>) -> Vec<(String, NaiveDate)> {
        if query.window.prefix.as_deref().is_some_and(|p| p != PREFIX) {
            return Vec::new();
        }
        self.days
            .range(query.window.start..=query.window.end)
            .flat_map(|(d, n)| (0..*n).map(move |i| (Self::doi(*d, i), *d)))
            .collect()
    }
}

impl WorksApi for SimulatedApi {
    fn works(&self, query: &WorksQuery<'_>) -> Result<WorksPage, FetchError> {
        self.tick();
        let all = self.in_window(query);
        let total = all.len() as u64;
        let declared = self.declared_cap.map_or(total, |cap| total.min(cap));
        let render = |(doi, d): &(String, NaiveDate)| match query.projection {
            Projection::Full => Self::record(doi, *d),
            Projection::DoiOnly => json!({ "DOI": doi }),
        };

        let touches = |days: &BTreeSet<NaiveDate>| {
            days.range(query.window.start..=query.window.end)
                .next()
                .is_some()
        };
        let paging = query.rows > 1;
        if paging && touches(&self.fatal_days) {
            return Err(FetchError::from_status(400, "Invalid cursor"));
        }
        let stuck = (!query.window.is_single_day() && touches(&self.stuck_days))
            || (query.projection == Projection::Full && touches(&self.stuck_full_days));
        if stuck && paging {
            // First page, then the same cursor forever
            let items = all.iter().take(query.rows as usize).map(render).collect();
            return Ok(WorksPage {
                total_results: declared,
                next_cursor: Some("abc".to_string()),
                items,
            });
        }

        let offset = query
            .cursor
            .strip_prefix('c')
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0)
            .min(all.len());
        let end = (offset + query.rows as usize).min(all.len());
        Ok(WorksPage {
            total_results: declared,
            next_cursor: Some(format!("c{end}")),
            items: all[offset..end].iter().map(render).collect(),
        })
    }

    fn work(&self, doi: &str) -> Result<Value, FetchError> {
        self.tick();
        if self.failing_lookups.contains(doi) {
            return Err(FetchError::from_status(404, "Resource not found."));
        }
        let posted = doi
            .strip_prefix(PREFIX)
            .and_then(|s| s.strip_prefix('/'))
            .and_then(|s| s.split('.').next())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok());
        match posted {
            Some(d) if self.days.contains_key(&d) => Ok(Self::record(doi, d)),
            _ => Err(FetchError::from_status(404, "Resource not found.")),
        }
    }

    fn requests_issued(&self) -> u64 {
        self.requests.get()
    }
}
