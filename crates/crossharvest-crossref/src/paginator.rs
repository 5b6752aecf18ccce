//! Cursor pagination for one query window.
//!
//! Crossref deep paging hands back an opaque `next-cursor` per page. The
//! chain occasionally misbehaves: the same cursor comes back again, pages
//! come back empty while the declared total is not yet reached, or the
//! declared total is larger than anything a sane number of pages can cover.
//! [`Paginator`] detects all three and always terminates.

use std::collections::VecDeque;
use std::iter::FusedIterator;

use crossharvest_core::FetchError;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::api::{MAX_ROWS, Projection, SortKey, WorksApi, WorksQuery};
use crate::normalize::doi_key;
use crate::window::QueryWindow;

/// Cursor that starts every chain
pub const INITIAL_CURSOR: &str = "*";

/// Position in a cursor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub token: String,
    pub previous_token: Option<String>,
    /// Distinct DOIs seen in this window
    pub items_seen: u64,
    pub pages_fetched: u32,
    /// Consecutive pages that returned the token just sent
    pub repeats: u32,
}

/// Result of feeding a page's `next-cursor` into [`PageCursor::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    Advanced,
    /// Same token again; carries the consecutive repeat count
    Repeated(u32),
    /// No further cursor
    Ended,
}

impl PageCursor {
    pub fn start() -> Self {
        Self {
            token: INITIAL_CURSOR.to_string(),
            previous_token: None,
            items_seen: 0,
            pages_fetched: 0,
            repeats: 0,
        }
    }

    pub fn advance(&mut self, next: Option<&str>) -> CursorStep {
        match next.filter(|t| !t.is_empty()) {
            None => CursorStep::Ended,
            Some(t) if t == self.token => {
                self.repeats += 1;
                CursorStep::Repeated(self.repeats)
            }
            Some(t) => {
                let prev = std::mem::replace(&mut self.token, t.to_string());
                self.previous_token = Some(prev);
                self.repeats = 0;
                CursorStep::Advanced
            }
        }
    }
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::start()
    }
}

/// Why a window could not be paginated to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Cursor kept coming back unchanged
    Anomaly { cursor: String, repeats: u32 },
    /// Declared total (or page count) exceeds what the page budget can cover
    TruncationRisk { declared: Option<u64>, max_pages: u32 },
    /// Page request failed after client retries
    Fetch(FetchError),
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anomaly { cursor, repeats } => {
                write!(f, "cursor {cursor:?} repeated {repeats} times")
            }
            Self::TruncationRisk {
                declared: Some(total),
                max_pages,
            } => write!(
                f,
                "{total} declared results cannot be covered in {max_pages} pages"
            ),
            Self::TruncationRisk {
                declared: None,
                max_pages,
            } => write!(f, "page limit {max_pages} reached before completion"),
            Self::Fetch(e) => write!(f, "page request failed: {e}"),
        }
    }
}

impl std::error::Error for PageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

/// Page size and safety bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub rows: u32,
    /// Re-requests of a repeated cursor before giving up
    pub max_cursor_repeats: u32,
    pub max_pages: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            rows: MAX_ROWS,
            max_cursor_repeats: 3,
            max_pages: 50,
        }
    }
}

/// Lazily pages through one window, yielding raw work items.
///
/// Finite and fused: after the first `Err` the iterator only returns `None`.
/// Not restartable; a new paginator starts again from [`INITIAL_CURSOR`].
pub struct Paginator<'a, A: WorksApi + ?Sized> {
    api: &'a A,
    window: QueryWindow,
    sort: SortKey,
    projection: Projection,
    limits: PageLimits,
    cursor: PageCursor,
    declared_total: Option<u64>,
    seen: FxHashSet<String>,
    buffer: VecDeque<Value>,
    nudged: bool,
    finished: bool,
    failure: Option<PageError>,
}

impl<'a, A: WorksApi + ?Sized> Paginator<'a, A> {
    pub fn new(
        api: &'a A,
        window: QueryWindow,
        sort: SortKey,
        projection: Projection,
        limits: PageLimits,
    ) -> Self {
        let finished = window.estimated_total == Some(0);
        if finished {
            log::debug!("{window}: no records, skipping");
        }
        Self {
            api,
            window,
            sort,
            projection,
            limits,
            cursor: PageCursor::start(),
            declared_total: None,
            seen: FxHashSet::default(),
            buffer: VecDeque::new(),
            nudged: false,
            finished,
            failure: None,
        }
    }

    pub fn window(&self) -> &QueryWindow {
        &self.window
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// `total-results` of the first page, once fetched
    pub fn declared_total(&self) -> Option<u64> {
        self.declared_total
    }

    /// Identifier-only pages routinely under-declare; only full pages are trusted.
    fn trusts_total(&self) -> bool {
        self.projection == Projection::Full
    }

    fn fetch_page(&mut self) -> Result<(), PageError> {
        let max_pages = self.limits.max_pages;
        if self.cursor.pages_fetched >= max_pages {
            return Err(PageError::TruncationRisk {
                declared: self.declared_total.filter(|_| self.trusts_total()),
                max_pages,
            });
        }

        let query = WorksQuery {
            window: &self.window,
            rows: self.limits.rows,
            cursor: &self.cursor.token,
            sort: self.sort,
            projection: self.projection,
        };
        let page = self.api.works(&query).map_err(PageError::Fetch)?;
        self.cursor.pages_fetched += 1;
        let total = *self.declared_total.get_or_insert(page.total_results);

        if self.trusts_total() && self.cursor.pages_fetched == 1 {
            let needed = total.div_ceil(u64::from(self.limits.rows.max(1)));
            if needed > u64::from(max_pages) {
                return Err(PageError::TruncationRisk {
                    declared: Some(total),
                    max_pages,
                });
            }
        }

        let received = page.items.len();
        for item in page.items {
            if let Some(doi) = item.get("DOI").and_then(Value::as_str) {
                self.seen.insert(doi_key(doi));
            }
            self.buffer.push_back(item);
        }
        self.cursor.items_seen = self.seen.len() as u64;

        if received == 0 {
            let more_expected = !self.trusts_total() || self.cursor.items_seen < total;
            if more_expected && !self.nudged {
                self.nudged = true;
                if self.cursor.advance(page.next_cursor.as_deref()) == CursorStep::Advanced {
                    log::debug!(
                        "{}: empty page at {}/{total}, nudging cursor",
                        self.window,
                        self.cursor.items_seen
                    );
                    return Ok(());
                }
            }
            self.finished = true;
            return Ok(());
        }

        if self.trusts_total() && total > 0 && self.cursor.items_seen >= total {
            self.finished = true;
            return Ok(());
        }

        match self.cursor.advance(page.next_cursor.as_deref()) {
            CursorStep::Advanced => {}
            CursorStep::Ended => self.finished = true,
            CursorStep::Repeated(n) if n > self.limits.max_cursor_repeats => {
                return Err(PageError::Anomaly {
                    cursor: self.cursor.token.clone(),
                    repeats: n,
                });
            }
            CursorStep::Repeated(n) => {
                log::debug!(
                    "{}: cursor repeated ({n}/{}), re-requesting",
                    self.window,
                    self.limits.max_cursor_repeats
                );
            }
        }
        Ok(())
    }
}

impl<A: WorksApi + ?Sized> Iterator for Paginator<'_, A> {
    type Item = Result<Value, PageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if let Some(err) = self.failure.take() {
                return Some(Err(err));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.finished = true;
                self.failure = Some(e);
            }
        }
    }
}

impl<A: WorksApi + ?Sized> FusedIterator for Paginator<'_, A> {}
