//! In-memory stand-ins for the works API
//!
//! Kept to what the unit tests exercise; whole-run scenarios use the fuller
//! simulation under `tests/common`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};

use chrono::{Datelike, NaiveDate};
use crossharvest_core::FetchError;
use rustc_hash::FxHashSet;
use serde_json::{Value, json};

use crate::api::{Projection, WorksApi, WorksPage, WorksQuery};

const PREFIX: &str = "10.5555";

pub(crate) fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn work_record(doi: &str, posted: NaiveDate) -> Value {
    json!({
        "DOI": doi,
        "URL": format!("https://doi.org/{doi}"),
        "title": [format!("Preprint {doi}")],
        "type": "posted-content",
        "subtype": "preprint",
        "prefix": PREFIX,
        "publisher": "Cold Spring Harbor Laboratory",
        "institution": [{"name": "bioRxiv"}],
        "posted": {"date-parts": [[posted.year(), posted.month(), posted.day()]]},
        "deposited": {"date-parts": [[posted.year(), posted.month(), posted.day()]]},
    })
}

/// Publishes `n` works per posted day, served through `c<offset>` cursors.
pub(crate) struct DailyVolumeApi {
    days: BTreeMap<NaiveDate, u64>,
    /// Both count probes fail
    pub fail_probes: bool,
    pub failing_lookups: FxHashSet<String>,
    pub requests: Cell<u64>,
}

impl DailyVolumeApi {
    pub(crate) fn uniform(start: NaiveDate, end: NaiveDate, per_day: u64) -> Self {
        let days = start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|d| (d, per_day))
            .collect();
        Self {
            days,
            fail_probes: false,
            failing_lookups: FxHashSet::default(),
            requests: Cell::new(0),
        }
    }

    pub(crate) fn set_day(&mut self, date: NaiveDate, n: u64) {
        self.days.insert(date, n);
    }

    pub(crate) fn doi(date: NaiveDate, i: u64) -> String {
        format!("{PREFIX}/{}.{i:05}", date.format("%Y%m%d"))
    }

    fn posted_of(doi: &str) -> Option<NaiveDate> {
        let stem = doi.strip_prefix(PREFIX)?.strip_prefix('/')?;
        NaiveDate::parse_from_str(stem.split('.').next()?, "%Y%m%d").ok()
    }

    /// All DOIs in the window, in posted order
    fn dois_in(&self, query: &WorksQuery<'_>) -> Vec<(String, NaiveDate)> {
        if query.window.prefix.as_deref().is_some_and(|p| p != PREFIX) {
            return Vec::new();
        }
        self.days
            .range(query.window.start..=query.window.end)
            .flat_map(|(d, n)| (0..*n).map(move |i| (Self::doi(*d, i), *d)))
            .collect()
    }
}

fn cursor_offset(cursor: &str) -> usize {
    cursor
        .strip_prefix('c')
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

impl WorksApi for DailyVolumeApi {
    fn works(&self, query: &WorksQuery<'_>) -> Result<WorksPage, FetchError> {
        self.requests.set(self.requests.get() + 1);
        if self.fail_probes && query.rows <= 1 {
            return Err(FetchError::from_status(400, "probe refused"));
        }
        let all = self.dois_in(query);
        let offset = cursor_offset(query.cursor).min(all.len());
        let end = (offset + query.rows as usize).min(all.len());
        let items = all[offset..end]
            .iter()
            .map(|(doi, d)| match query.projection {
                Projection::Full => work_record(doi, *d),
                Projection::DoiOnly => json!({ "DOI": doi }),
            })
            .collect();
        Ok(WorksPage {
            total_results: all.len() as u64,
            next_cursor: Some(format!("c{end}")),
            items,
        })
    }

    fn work(&self, doi: &str) -> Result<Value, FetchError> {
        self.requests.set(self.requests.get() + 1);
        if self.failing_lookups.contains(doi) {
            return Err(FetchError::from_status(404, "Resource not found."));
        }
        match Self::posted_of(doi) {
            Some(d) if self.days.contains_key(&d) => Ok(work_record(doi, d)),
            _ => Err(FetchError::from_status(404, "Resource not found.")),
        }
    }

    fn requests_issued(&self) -> u64 {
        self.requests.get()
    }
}

/// Replays a fixed sequence of pages and records the cursors sent.
pub(crate) struct ScriptedApi {
    pages: RefCell<VecDeque<Result<WorksPage, FetchError>>>,
    pub cursors: RefCell<Vec<String>>,
}

impl ScriptedApi {
    pub(crate) fn new(pages: Vec<Result<WorksPage, FetchError>>) -> Self {
        Self {
            pages: RefCell::new(pages.into()),
            cursors: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> usize {
        self.cursors.borrow().len()
    }
}

impl WorksApi for ScriptedApi {
    fn works(&self, query: &WorksQuery<'_>) -> Result<WorksPage, FetchError> {
        self.cursors.borrow_mut().push(query.cursor.to_string());
        self.pages
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(WorksPage::default()))
    }

    fn work(&self, doi: &str) -> Result<Value, FetchError> {
        Ok(work_record(doi, day("2024-01-01")))
    }
}

pub(crate) fn page(total: u64, next: Option<&str>, dois: &[&str]) -> Result<WorksPage, FetchError> {
    Ok(WorksPage {
        total_results: total,
        next_cursor: next.map(str::to_string),
        items: dois.iter().map(|d| json!({ "DOI": d })).collect(),
    })
}
