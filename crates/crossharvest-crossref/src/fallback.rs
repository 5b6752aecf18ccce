//! DOI-first harvesting for windows too dense to paginate reliably.
//!
//! Enumerate identifiers with a `select=DOI` cursor chain (cheap pages that
//! do not depend on the declared total), then fetch each work directly.

use crossharvest_core::FetchError;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::api::{Projection, SortKey, WorksApi};
use crate::normalize::{NormalizedRecord, doi_key, normalize};
use crate::paginator::{PageError, PageLimits, Paginator};
use crate::window::QueryWindow;

/// A work fetched by DOI
#[derive(Debug, Clone)]
pub struct Hydrated {
    pub raw: Value,
    pub record: NormalizedRecord,
}

/// One identifier that could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrateFailure {
    pub doi: String,
    pub error: FetchError,
}

impl std::fmt::Display for HydrateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.doi, self.error)
    }
}

impl std::error::Error for HydrateFailure {}

/// Identifiers enumerated for one window, hydrated lazily.
pub struct DenseHarvest<'a, A: WorksApi + ?Sized> {
    api: &'a A,
    window: QueryWindow,
    dois: std::vec::IntoIter<String>,
    enumerated: usize,
    declared_total: Option<u64>,
    enumeration_error: Option<PageError>,
}

impl<'a, A: WorksApi + ?Sized> DenseHarvest<'a, A> {
    /// Run the identifier-only chain to completion (or to its first error).
    pub fn enumerate(api: &'a A, window: QueryWindow, sort: SortKey, limits: PageLimits) -> Self {
        // Force paging: a dense window's estimate is exactly what is distrusted
        let mut chain_window = window.clone();
        chain_window.estimated_total = None;

        let mut pager = Paginator::new(api, chain_window, sort, Projection::DoiOnly, limits);
        let mut seen = FxHashSet::default();
        let mut dois = Vec::new();
        let mut enumeration_error = None;
        for item in pager.by_ref() {
            match item {
                Ok(v) => {
                    if let Some(doi) = v.get("DOI").and_then(Value::as_str) {
                        if seen.insert(doi_key(doi)) {
                            dois.push(doi.trim().to_string());
                        }
                    }
                }
                Err(e) => enumeration_error = Some(e),
            }
        }

        log::info!(
            "[DOI-first] {window}: {} identifiers (declared {})",
            dois.len(),
            pager
                .declared_total()
                .map_or_else(|| "?".to_string(), |t| t.to_string())
        );
        if let Some(e) = &enumeration_error {
            log::warn!("[DOI-first] {window}: enumeration stopped early: {e}");
        }

        Self {
            api,
            declared_total: pager.declared_total(),
            window,
            enumerated: dois.len(),
            dois: dois.into_iter(),
            enumeration_error,
        }
    }

    pub fn window(&self) -> &QueryWindow {
        &self.window
    }

    /// Distinct identifiers found
    pub fn enumerated(&self) -> usize {
        self.enumerated
    }

    pub fn declared_total(&self) -> Option<u64> {
        self.declared_total
    }

    /// Identifiers not yet hydrated
    pub fn remaining(&self) -> usize {
        self.dois.len()
    }

    /// Set when the identifier chain did not finish cleanly
    pub fn enumeration_error(&self) -> Option<&PageError> {
        self.enumeration_error.as_ref()
    }
}

impl<A: WorksApi + ?Sized> Iterator for DenseHarvest<'_, A> {
    type Item = Result<Hydrated, HydrateFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let doi = self.dois.next()?;
            match self.api.work(&doi) {
                Ok(raw) => match normalize(&raw) {
                    Some(record) => return Some(Ok(Hydrated { raw, record })),
                    None => log::warn!("[DOI-first] {doi}: lookup returned no DOI, skipping"),
                },
                Err(error) => return Some(Err(HydrateFailure { doi, error })),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.dois.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DailyVolumeApi, ScriptedApi, day, page};

    fn limits() -> PageLimits {
        PageLimits {
            rows: 100,
            max_cursor_repeats: 3,
            max_pages: 100,
        }
    }

    #[test]
    fn hydrates_every_enumerated_doi_despite_low_declared_total() {
        let api = ScriptedApi::new(vec![
            page(2, Some("n1"), &["10.1/a", "10.1/b"]),
            page(2, Some("n2"), &["10.1/c", "10.1/d"]),
            page(2, Some("n3"), &["10.1/e"]),
            page(2, Some("n3"), &[]),
        ]);
        let w = QueryWindow::new(day("2024-01-03"), day("2024-01-03")).unwrap();

        let dense = DenseHarvest::enumerate(&api, w, SortKey::Deposited, limits());
        assert_eq!(dense.enumerated(), 5);
        assert_eq!(dense.declared_total(), Some(2));
        assert!(dense.enumeration_error().is_none());

        let hydrated: Vec<_> = dense.map(Result::unwrap).collect();
        assert_eq!(hydrated.len(), 5);
        let distinct: FxHashSet<_> = hydrated.iter().map(|h| h.record.doi.clone()).collect();
        assert_eq!(distinct.len(), 5);
    }

    #[test]
    fn single_failure_does_not_stop_iteration() {
        let mut api = DailyVolumeApi::uniform(day("2024-01-03"), day("2024-01-03"), 5);
        let bad = DailyVolumeApi::doi(day("2024-01-03"), 2);
        api.failing_lookups.insert(bad.clone());
        let w = QueryWindow::new(day("2024-01-03"), day("2024-01-03")).unwrap();

        let results: Vec<_> = DenseHarvest::enumerate(&api, w, SortKey::Deposited, limits()).collect();
        assert_eq!(results.len(), 5);
        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].doi, bad);
        assert_eq!(failures[0].error.status(), Some(404));
    }

    #[test]
    fn enumeration_deduplicates_in_order() {
        let api = ScriptedApi::new(vec![
            page(0, Some("n1"), &["10.1/b", "10.1/a"]),
            page(0, Some("n2"), &["10.1/B", "10.1/c"]),
            page(0, Some("n2"), &[]),
        ]);
        let w = QueryWindow::new(day("2024-01-01"), day("2024-01-01")).unwrap();
        let dense = DenseHarvest::enumerate(&api, w, SortKey::Deposited, limits());
        let dois: Vec<_> = dense.map(|h| h.unwrap().record.doi).collect();
        assert_eq!(dois, vec!["10.1/b", "10.1/a", "10.1/c"]);
    }

    #[test]
    fn enumeration_error_kept_after_partial_listing() {
        let mut pages = vec![page(0, Some("abc"), &["10.1/a"])];
        pages.extend((0..5).map(|_| page(0, Some("abc"), &["10.1/b"])));
        let api = ScriptedApi::new(pages);
        let w = QueryWindow::new(day("2024-01-01"), day("2024-01-01")).unwrap();

        let dense = DenseHarvest::enumerate(&api, w, SortKey::Deposited, limits());
        assert!(matches!(
            dense.enumeration_error(),
            Some(PageError::Anomaly { .. })
        ));
        assert_eq!(dense.enumerated(), 2);
        assert_eq!(dense.count(), 2);
    }

    #[test]
    fn zero_estimate_still_enumerates() {
        let api = DailyVolumeApi::uniform(day("2024-01-03"), day("2024-01-03"), 4);
        let mut w = QueryWindow::new(day("2024-01-03"), day("2024-01-03")).unwrap();
        w.estimated_total = Some(0);
        let dense = DenseHarvest::enumerate(&api, w, SortKey::Deposited, limits());
        assert_eq!(dense.enumerated(), 4);
    }
}
