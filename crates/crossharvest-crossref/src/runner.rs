//! Harvest orchestration: batches → split → paginate or DOI-first → sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Context;
use crossharvest_core::{ConfigError, ProgressContext, RecordSink, fmt_num};
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::api::{Projection, WorksApi};
use crate::config::HarvestConfig;
use crate::fallback::{DenseHarvest, Hydrated};
use crate::normalize::{NormalizedRecord, normalize};
use crate::paginator::{PageError, Paginator};
use crate::state::HarvestState;
use crate::stats::{AbandonedWindow, HarvestSummary};
use crate::window::{QueryWindow, SplitLeaf, SplitPlan, Splitter};

/// Everything a finished (or cancelled) run produced
#[derive(Debug)]
pub struct HarvestOutcome {
    pub summary: HarvestSummary,
    /// Deduplicated, chronologically ordered
    pub records: Vec<NormalizedRecord>,
}

pub struct Harvester<A: WorksApi> {
    api: A,
    config: HarvestConfig,
}

impl<A: WorksApi> Harvester<A> {
    pub fn new(api: A, config: HarvestConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Split every batch without harvesting (count probes only).
    pub fn plan(&self) -> Result<Vec<(QueryWindow, SplitPlan)>, ConfigError> {
        let splitter = Splitter::new(&self.api, self.config.per_window_threshold, self.config.sort);
        Ok(self
            .config
            .batches()?
            .into_iter()
            .map(|batch| {
                let plan = splitter.split(batch.clone());
                (batch, plan)
            })
            .collect())
    }

    /// Harvest the configured range.
    ///
    /// Records touched by each finished window are emitted to `sink` (and
    /// flushed) before the next window starts; a record merged later is
    /// emitted again. Raw items are mirrored to `provenance`. `stop` is
    /// checked between windows; a cancelled run returns normally with
    /// `summary.cancelled` set.
    pub fn run<'r>(
        &'r self,
        sink: &'r mut dyn RecordSink<NormalizedRecord>,
        provenance: Option<&'r mut dyn RecordSink<Value>>,
        stop: &AtomicBool,
        progress: &ProgressContext,
    ) -> anyhow::Result<HarvestOutcome> {
        let started = Instant::now();
        let batches = self.config.batches()?;
        log::info!(
            "harvest starting: {}..{}, {} batches, threshold={}, sort={}, prefixes={:?}",
            self.config.date_start,
            self.config.date_end,
            batches.len(),
            self.config.per_window_threshold,
            self.config.sort,
            self.config.prefixes
        );

        let mut run = HarvestRun {
            api: &self.api,
            config: &self.config,
            state: HarvestState::new(),
            summary: HarvestSummary {
                batches_planned: batches.len(),
                ..Default::default()
            },
            sink,
            provenance,
            touched: Vec::new(),
            touched_set: FxHashSet::default(),
        };

        let batch_bar = progress.batch_bar("batches", batches.len() as u64);
        let window_line = progress.window_line("window");
        let splitter = Splitter::new(&self.api, self.config.per_window_threshold, self.config.sort);

        'batches: for batch in batches {
            if stop.load(Ordering::Relaxed) {
                run.summary.cancelled = true;
                break;
            }
            let plan = splitter.split(batch.clone());
            run.summary.probes += plan.probes;
            run.summary.windows_planned += plan.leaves.len();
            log::debug!("{batch}: {} windows from {} probes", plan.leaves.len(), plan.probes);
            run.state.enqueue(plan.leaves);

            while let Some(leaf) = run.state.next_pending() {
                if stop.load(Ordering::Relaxed) {
                    run.summary.cancelled = true;
                    break 'batches;
                }
                window_line.set_message(format!(
                    "{} ({}) {} records",
                    leaf.window(),
                    leaf.kind(),
                    fmt_num(run.state.len() as u64)
                ));
                run.process(leaf)?;
            }

            run.summary.batches += 1;
            batch_bar.inc(1);
            if !progress.is_tty() {
                log::info!(
                    "{batch}: done, {} unique records so far",
                    fmt_num(run.state.len() as u64)
                );
            }
        }
        window_line.finish_and_clear();
        batch_bar.finish_and_clear();

        if run.summary.cancelled {
            run.summary.windows_pending = run.state.pending_len();
            log::warn!(
                "harvest cancelled: {} of {} batches unfinished, {} windows of the current batch pending",
                run.summary.batches_unfinished(),
                run.summary.batches_planned,
                run.summary.windows_pending
            );
        }
        run.sink.flush().context("Failed to flush record sink")?;
        if let Some(p) = run.provenance.as_deref_mut() {
            p.flush().context("Failed to flush provenance log")?;
        }

        let mut summary = run.summary;
        summary.unique_records = run.state.len();
        summary.requests = self.api.requests_issued();
        summary.elapsed = started.elapsed();
        Ok(HarvestOutcome {
            summary,
            records: run.state.freeze(),
        })
    }
}

/// Mutable state of one `run` call
struct HarvestRun<'r, A: WorksApi> {
    api: &'r A,
    config: &'r HarvestConfig,
    state: HarvestState,
    summary: HarvestSummary,
    sink: &'r mut dyn RecordSink<NormalizedRecord>,
    provenance: Option<&'r mut dyn RecordSink<Value>>,
    /// Keys touched by the current window, in first-touch order
    touched: Vec<String>,
    touched_set: FxHashSet<String>,
}

impl<A: WorksApi> HarvestRun<'_, A> {
    fn process(&mut self, leaf: SplitLeaf) -> anyhow::Result<()> {
        match leaf {
            SplitLeaf::Dense(w) if self.config.fallback_enabled => self.fallback(w),
            // Without DOI-first a dense day still gets a pagination attempt
            leaf => self.paginate(leaf.into_window()),
        }
    }

    fn paginate(&mut self, window: QueryWindow) -> anyhow::Result<()> {
        let api = self.api;
        let mut pager = Paginator::new(
            api,
            window.clone(),
            self.config.sort,
            Projection::Full,
            self.config.page_limits,
        );
        let mut failure = None;
        for item in pager.by_ref() {
            match item {
                Ok(raw) => self.observe(raw)?,
                Err(e) => failure = Some(e),
            }
        }
        self.emit_touched()?;

        match failure {
            None => {
                self.summary.windows_completed += 1;
                log::debug!(
                    "{window}: complete, {} items in {} pages",
                    pager.cursor().items_seen,
                    pager.cursor().pages_fetched
                );
                Ok(())
            }
            Some(e) => self.escalate(window, e),
        }
    }

    /// A window that could not be paginated: bisect and re-probe, else
    /// DOI-first, else give up on it.
    fn escalate(&mut self, window: QueryWindow, error: PageError) -> anyhow::Result<()> {
        if let Some((left, right)) = window.bisect() {
            log::warn!("{window}: {error}, re-splitting");
            self.summary.windows_split += 1;
            let splitter = Splitter::new(self.api, self.config.per_window_threshold, self.config.sort);
            let mut leaves = Vec::new();
            for half in [left, right] {
                let plan = splitter.split(half);
                self.summary.probes += plan.probes;
                leaves.extend(plan.leaves);
            }
            self.summary.windows_planned += leaves.len();
            self.state.enqueue_front(leaves);
            Ok(())
        } else if self.config.fallback_enabled {
            log::warn!("{window}: {error}, switching to DOI-first");
            self.fallback(window)
        } else {
            self.abandon(&window, error.to_string());
            Ok(())
        }
    }

    fn fallback(&mut self, window: QueryWindow) -> anyhow::Result<()> {
        self.summary.windows_fallback += 1;
        let api = self.api;
        let mut dense =
            DenseHarvest::enumerate(api, window, self.config.sort, self.config.fallback_limits);
        for item in dense.by_ref() {
            match item {
                Ok(Hydrated { raw, record }) => {
                    self.summary.records_observed += 1;
                    self.mirror(&raw)?;
                    self.absorb(record);
                }
                Err(failure) => {
                    log::warn!("[DOI-first] {failure}");
                    self.summary.failed_dois.push(failure.doi);
                }
            }
        }
        self.emit_touched()?;

        match dense.enumeration_error() {
            None => self.summary.windows_completed += 1,
            Some(e) => {
                let reason = format!("DOI enumeration incomplete: {e}");
                self.abandon(dense.window(), reason);
            }
        }
        Ok(())
    }

    fn abandon(&mut self, window: &QueryWindow, reason: String) {
        log::warn!("{window}: abandoned ({reason})");
        self.summary.abandoned.push(AbandonedWindow {
            window: window.to_string(),
            reason,
        });
    }

    fn observe(&mut self, raw: Value) -> anyhow::Result<()> {
        self.summary.records_observed += 1;
        self.mirror(&raw)?;
        match normalize(&raw) {
            Some(record) => self.absorb(record),
            None => {
                self.summary.records_without_doi += 1;
                log::debug!("item without DOI skipped");
            }
        }
        Ok(())
    }

    fn mirror(&mut self, raw: &Value) -> anyhow::Result<()> {
        if let Some(p) = self.provenance.as_deref_mut() {
            p.emit(raw).context("Failed to write provenance log")?;
        }
        Ok(())
    }

    fn absorb(&mut self, record: NormalizedRecord) {
        let (key, _) = self.state.insert(record);
        if self.touched_set.insert(key.clone()) {
            self.touched.push(key);
        }
    }

    /// Emit the current window's records and flush the sink
    fn emit_touched(&mut self) -> anyhow::Result<()> {
        if self.touched.is_empty() {
            return Ok(());
        }
        for key in self.touched.drain(..) {
            if let Some(record) = self.state.get(&key) {
                self.sink.emit(record).context("Failed to write record")?;
            }
        }
        self.touched_set.clear();
        self.sink.flush().context("Failed to flush record sink")?;
        if let Some(p) = self.provenance.as_deref_mut() {
            p.flush().context("Failed to flush provenance log")?;
        }
        Ok(())
    }
}
