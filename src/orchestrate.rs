//! Run orchestration: plan → concurrent fetch → ordered merge.
//!
//! Units are fetched on a bounded worker pool (a [`JoinSet`] gated by a
//! [`Semaphore`]). Workers share nothing mutable; each returns its own
//! [`FetchResult`] through `join_next` to the single collecting task,
//! which restores plan order and then performs every global-id rewrite in
//! [`merge`]. No counter is ever touched from a worker.
//!
//! ```text
//! plan ─▶ [unit 0] ─┐
//!         [unit 1] ─┼─▶ worker pool (N permits) ─▶ collector ─▶ merge ─▶ Timeline
//!         [unit k] ─┘
//! ```

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::AnswerService;
use crate::config::{Config, QueryConfig};
use crate::error::TimelineError;
use crate::fetch::UnitFetcher;
use crate::models::{DegradedUnit, FetchResult, QueryUnit, Timeline};
use crate::planner::plan_with;
use crate::progress::{FetchProgressEvent, FetchProgressReporter, NoProgress};

/// Drives a full timeline run against one [`AnswerService`].
pub struct Orchestrator {
    fetcher: UnitFetcher,
    workers: usize,
    templates: QueryConfig,
    progress: Box<dyn FetchProgressReporter>,
}

impl Orchestrator {
    pub fn new(service: Arc<dyn AnswerService>, config: &Config) -> Self {
        Self {
            fetcher: UnitFetcher::new(service, &config.fetch),
            workers: config.fetch.workers.max(1),
            templates: config.query.clone(),
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn FetchProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Build the timeline for `topic` over `start..=end`.
    ///
    /// Waits for every unit. Units that exhaust their retries contribute
    /// nothing and are listed in [`Timeline::degraded_units`].
    ///
    /// # Errors
    ///
    /// Only [`TimelineError::DateFormat`], raised while planning.
    pub async fn run(&self, topic: &str, start: &str, end: &str) -> Result<Timeline, TimelineError> {
        let units = plan_with(&self.templates, topic, start, end)?;
        tracing::info!(topic, units = units.len(), workers = self.workers, "starting run");

        let results = self.fetch_all(units).await;
        let timeline = merge(results);

        tracing::info!(
            events = timeline.events.len(),
            references = timeline.references.len(),
            degraded = timeline.degraded_units.len(),
            "run complete"
        );
        Ok(timeline)
    }

    /// Fetch every unit concurrently and return the results in plan order.
    pub async fn fetch_all(&self, units: Vec<QueryUnit>) -> Vec<FetchResult> {
        let total = units.len();
        let periods: Vec<String> = units.iter().map(|u| u.period_prefix.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let mut tasks = JoinSet::new();
        for unit in units {
            let fetcher = self.fetcher.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                fetcher.fetch(&unit).await
            });
        }
        self.progress.report(FetchProgressEvent::Dispatched {
            total: total as u64,
        });

        let mut slots: Vec<Option<FetchResult>> = (0..total).map(|_| None).collect();
        let mut finished = 0u64;
        while let Some(joined) = tasks.join_next().await {
            finished += 1;
            match joined {
                Ok(result) => {
                    self.progress.report(FetchProgressEvent::UnitFinished {
                        period: result.period_prefix.clone(),
                        degraded: result.degraded,
                        n: finished,
                        total: total as u64,
                    });
                    if let Some(slot) = slots.get_mut(result.index) {
                        *slot = Some(result);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "fetch task aborted");
                }
            }
        }

        // A slot left empty belongs to a task that panicked.
        slots
            .into_iter()
            .zip(periods)
            .enumerate()
            .map(|(index, (slot, period))| {
                slot.unwrap_or_else(|| FetchResult::degraded(index, period, 0))
            })
            .collect()
    }
}

/// Merge per-unit results into one timeline with global reference ids.
///
/// Results are walked in ascending `index` order. Each unit's reference
/// ids and the ids its events cite are shifted by the number of references
/// already appended; the offset then advances by this unit's reference
/// count. Citations of ids a unit never listed are shifted too but not
/// validated. An id that cannot be shifted without overflowing `u64` is
/// dropped; the fetcher bounds local ids so this does not happen in a run.
pub fn merge(mut results: Vec<FetchResult>) -> Timeline {
    results.sort_by_key(|r| r.index);

    let mut timeline = Timeline::default();
    let mut offset = 0u64;
    for result in results {
        if result.degraded {
            timeline.degraded_units.push(DegradedUnit {
                index: result.index,
                period_prefix: result.period_prefix.clone(),
            });
        }

        let appended = result.references.len() as u64;
        timeline
            .references
            .extend(result.references.into_iter().filter_map(|mut reference| {
                reference.id = reference.id.checked_add(offset)?;
                Some(reference)
            }));
        timeline
            .events
            .extend(result.records.into_iter().map(|mut record| {
                record.offset_references(offset);
                record
            }));
        offset = offset.saturating_add(appended);
    }
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventRecord, Reference};

    fn unit_result(index: usize, refs: u64, cites: Vec<u64>) -> FetchResult {
        FetchResult {
            index,
            period_prefix: format!("2012年0{}月", index + 1),
            records: vec![EventRecord {
                time: format!("2012-0{}-01", index + 1),
                event: format!("event {}", index),
                summary: String::new(),
                reference_ids: cites,
            }],
            references: (0..refs)
                .map(|id| Reference::new(id, format!("https://u{}/{}", index, id)))
                .collect(),
            attempts: 1,
            degraded: false,
        }
    }

    #[test]
    fn merge_offsets_by_reference_count() {
        let a = unit_result(0, 2, vec![0, 1]);
        let b = unit_result(1, 3, vec![1]);
        let timeline = merge(vec![a, b]);

        let ids: Vec<u64> = timeline.references.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(timeline.references[3].url, "https://u1/1");
        assert_eq!(timeline.events[0].reference_ids, vec![0, 1]);
        assert_eq!(timeline.events[1].reference_ids, vec![3]);
    }

    #[test]
    fn merge_restores_plan_order() {
        let timeline = merge(vec![
            unit_result(2, 1, vec![0]),
            unit_result(0, 1, vec![0]),
            unit_result(1, 1, vec![0]),
        ]);
        let events: Vec<&str> = timeline.events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(events, vec!["event 0", "event 1", "event 2"]);
        let cites: Vec<u64> = timeline
            .events
            .iter()
            .flat_map(|e| e.reference_ids.clone())
            .collect();
        assert_eq!(cites, vec![0, 1, 2]);
    }

    #[test]
    fn degraded_units_add_no_offset() {
        let timeline = merge(vec![
            unit_result(0, 2, vec![]),
            FetchResult::degraded(1, "2012年02月", 5),
            unit_result(2, 1, vec![0]),
        ]);
        assert_eq!(timeline.references.len(), 3);
        assert_eq!(timeline.events[1].reference_ids, vec![2]);
        assert_eq!(
            timeline.degraded_units,
            vec![DegradedUnit {
                index: 1,
                period_prefix: "2012年02月".to_string()
            }]
        );
    }

    #[test]
    fn dangling_citations_are_shifted_not_validated() {
        let timeline = merge(vec![unit_result(0, 1, vec![]), unit_result(1, 1, vec![7])]);
        assert_eq!(timeline.events[1].reference_ids, vec![8]);
    }

    #[test]
    fn merge_never_wraps_ids() {
        let mut b = unit_result(1, 0, vec![u64::MAX, 0]);
        b.references.push(Reference::new(u64::MAX, "https://huge"));
        let timeline = merge(vec![unit_result(0, 1, vec![0]), b]);

        assert_eq!(timeline.events[1].reference_ids, vec![1]);
        assert_eq!(
            timeline.references.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![0]
        );
    }

    #[test]
    fn empty_input_gives_empty_timeline() {
        assert_eq!(merge(Vec::new()), Timeline::default());
    }
}
