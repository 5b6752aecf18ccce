//! Query windows over posted dates, and the splitter that sizes them.

use chrono::{Duration, NaiveDate};
use crossharvest_core::ConfigError;

use crate::api::{SortKey, WorksApi, probe_total};

/// Inclusive posted-date range, optionally restricted to one DOI prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub prefix: Option<String>,
    /// Declared result count from the last probe, if any
    pub estimated_total: Option<u64>,
}

impl QueryWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::invalid(
                "date range",
                format!("start {start} is after end {end}"),
            ));
        }
        Ok(Self {
            start,
            end,
            prefix: None,
            estimated_total: None,
        })
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix;
        self
    }

    /// Days covered, both ends included
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    /// Split into `[start, mid]` and `[mid+1, end]` with
    /// `mid = start + (span-1)/2`. `None` for a single day.
    pub fn bisect(&self) -> Option<(Self, Self)> {
        if self.is_single_day() {
            return None;
        }
        let mid = self.start + Duration::days((self.span_days() - 1) / 2);
        let left = Self {
            start: self.start,
            end: mid,
            prefix: self.prefix.clone(),
            estimated_total: None,
        };
        let right = Self {
            start: mid + Duration::days(1),
            end: self.end,
            prefix: self.prefix.clone(),
            estimated_total: None,
        };
        Some((left, right))
    }

    /// Consecutive windows of at most `batch_days` days covering `[start, end]`.
    pub fn batches(
        start: NaiveDate,
        end: NaiveDate,
        batch_days: u32,
    ) -> Result<Vec<Self>, ConfigError> {
        if batch_days == 0 {
            return Err(ConfigError::invalid("batch_days", "must be at least 1"));
        }
        let first = Self::new(start, end)?;
        let step = Duration::days(i64::from(batch_days));
        let mut out = Vec::new();
        let mut cursor = first.start;
        while cursor <= end {
            let batch_end = (cursor + step - Duration::days(1)).min(end);
            out.push(Self::new(cursor, batch_end)?);
            cursor = batch_end + Duration::days(1);
        }
        Ok(out)
    }
}

impl std::fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single_day() {
            write!(f, "{}", self.start)?;
        } else {
            write!(f, "{}..{}", self.start, self.end)?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, " [{prefix}]")?;
        }
        Ok(())
    }
}

/// Outcome of splitting for one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitLeaf {
    /// Under the threshold (or count unknown): cursor-paginate it
    Paginate(QueryWindow),
    /// Single day still over the threshold: DOI-first fallback
    Dense(QueryWindow),
}

impl SplitLeaf {
    pub fn window(&self) -> &QueryWindow {
        match self {
            Self::Paginate(w) | Self::Dense(w) => w,
        }
    }

    pub fn into_window(self) -> QueryWindow {
        match self {
            Self::Paginate(w) | Self::Dense(w) => w,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Paginate(_) => "cursor",
            Self::Dense(_) => "doi-first",
        }
    }
}

/// Leaves for one input window plus probe bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct SplitPlan {
    /// Chronological, non-overlapping, exactly covering the input
    pub leaves: Vec<SplitLeaf>,
    pub probes: u64,
    /// Windows whose count probe failed twice (kept as `Paginate` with unknown total)
    pub probe_failures: u64,
}

/// Bisects windows by calendar day until every leaf is under `threshold`.
pub struct Splitter<'a, A: WorksApi + ?Sized> {
    api: &'a A,
    threshold: u64,
    sort: SortKey,
}

impl<'a, A: WorksApi + ?Sized> Splitter<'a, A> {
    pub fn new(api: &'a A, threshold: u64, sort: SortKey) -> Self {
        Self {
            api,
            threshold,
            sort,
        }
    }

    /// Explicit LIFO worklist; right half is pushed first so leaves come out
    /// in chronological order. At most `2*days - 1` probes.
    pub fn split(&self, window: QueryWindow) -> SplitPlan {
        let mut plan = SplitPlan::default();
        let mut stack = vec![window];

        while let Some(mut w) = stack.pop() {
            plan.probes += 1;
            let total = match probe_total(self.api, &w, self.sort) {
                Ok(total) => total,
                Err(e) => {
                    log::warn!("{w}: count probe failed twice ({e}), paginating with unknown total");
                    plan.probe_failures += 1;
                    w.estimated_total = None;
                    plan.leaves.push(SplitLeaf::Paginate(w));
                    continue;
                }
            };
            w.estimated_total = Some(total);

            if total <= self.threshold {
                log::debug!("{w}: {total} records");
                plan.leaves.push(SplitLeaf::Paginate(w));
            } else if let Some((left, right)) = w.bisect() {
                log::debug!("{w}: {total} > {}, bisecting", self.threshold);
                stack.push(right);
                stack.push(left);
            } else {
                log::info!(
                    "{w}: {total} records on a single day exceed {}, using DOI-first",
                    self.threshold
                );
                plan.leaves.push(SplitLeaf::Dense(w));
            }
        }
        plan
    }
}
