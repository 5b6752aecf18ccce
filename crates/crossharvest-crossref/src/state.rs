//! In-memory harvest state: deduplicated records plus the window worklist.

use std::cmp::Ordering;
use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::normalize::{NormalizedRecord, doi_key, merge};
use crate::window::SplitLeaf;

/// What `insert` did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    New,
    Merged,
}

/// Owned exclusively by the orchestrator; grows monotonically.
#[derive(Debug, Default)]
pub struct HarvestState {
    records: FxHashMap<String, NormalizedRecord>,
    pending: VecDeque<SplitLeaf>,
}

impl HarvestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or merge a record; returns its key and whether it was new.
    pub fn insert(&mut self, record: NormalizedRecord) -> (String, Insertion) {
        let key = doi_key(&record.doi);
        let outcome = match self.records.remove(&key) {
            Some(existing) => {
                self.records.insert(key.clone(), merge(existing, record));
                Insertion::Merged
            }
            None => {
                self.records.insert(key.clone(), record);
                Insertion::New
            }
        };
        (key, outcome)
    }

    pub fn get(&self, key: &str) -> Option<&NormalizedRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Queue leaves at the back (planned order)
    pub fn enqueue(&mut self, leaves: impl IntoIterator<Item = SplitLeaf>) {
        self.pending.extend(leaves);
    }

    /// Queue leaves at the front, keeping their order (re-split children run next)
    pub fn enqueue_front(&mut self, leaves: Vec<SplitLeaf>) {
        for leaf in leaves.into_iter().rev() {
            self.pending.push_front(leaf);
        }
    }

    pub fn next_pending(&mut self) -> Option<SplitLeaf> {
        self.pending.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Final record list ordered by posted, deposited, indexed, created
    /// (missing dates last), DOI as tiebreak.
    pub fn freeze(self) -> Vec<NormalizedRecord> {
        let mut records: Vec<_> = self.records.into_values().collect();
        records.sort_by(chronological);
        records
    }
}

fn missing_last(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn chronological(a: &NormalizedRecord, b: &NormalizedRecord) -> Ordering {
    missing_last(&a.posted_date, &b.posted_date)
        .then_with(|| missing_last(&a.deposited_date, &b.deposited_date))
        .then_with(|| missing_last(&a.indexed_date, &b.indexed_date))
        .then_with(|| missing_last(&a.created_date, &b.created_date))
        .then_with(|| doi_key(&a.doi).cmp(&doi_key(&b.doi)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::day;
    use crate::window::QueryWindow;

    fn rec(doi: &str, posted: Option<&str>) -> NormalizedRecord {
        NormalizedRecord {
            doi: doi.to_string(),
            posted_date: posted.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn insert_dedups_case_insensitively() {
        let mut state = HarvestState::new();
        assert_eq!(state.insert(rec("10.1/ABC", None)).1, Insertion::New);
        let (key, outcome) = state.insert(rec("https://doi.org/10.1/abc", Some("2024-01-02")));
        assert_eq!(outcome, Insertion::Merged);
        assert_eq!(key, "10.1/abc");
        assert_eq!(state.len(), 1);
        assert_eq!(
            state.get("10.1/abc").unwrap().posted_date.as_deref(),
            Some("2024-01-02")
        );
    }

    #[test]
    fn freeze_orders_by_dates_then_doi() {
        let mut state = HarvestState::new();
        state.insert(rec("10.1/c", None));
        state.insert(rec("10.1/b", Some("2024-01-02")));
        state.insert(rec("10.1/a", Some("2024-01-02")));
        state.insert(rec("10.1/z", Some("2024-01-01")));
        let order: Vec<_> = state.freeze().into_iter().map(|r| r.doi).collect();
        assert_eq!(order, vec!["10.1/z", "10.1/a", "10.1/b", "10.1/c"]);
    }

    #[test]
    fn freeze_falls_back_to_deposited() {
        let mut state = HarvestState::new();
        let mut late = rec("10.1/a", None);
        late.deposited_date = Some("2024-02-01".into());
        let mut early = rec("10.1/b", None);
        early.deposited_date = Some("2024-01-01".into());
        state.insert(late);
        state.insert(early);
        let order: Vec<_> = state.freeze().into_iter().map(|r| r.doi).collect();
        assert_eq!(order, vec!["10.1/b", "10.1/a"]);
    }

    #[test]
    fn enqueue_front_keeps_order() {
        let w = |a: &str| SplitLeaf::Paginate(QueryWindow::new(day(a), day(a)).unwrap());
        let mut state = HarvestState::new();
        state.enqueue([w("2024-01-09")]);
        state.enqueue_front(vec![w("2024-01-01"), w("2024-01-02")]);
        let order: Vec<_> = std::iter::from_fn(|| state.next_pending())
            .map(|l| l.window().start)
            .collect();
        assert_eq!(
            order,
            vec![day("2024-01-01"), day("2024-01-02"), day("2024-01-09")]
        );
    }
}
