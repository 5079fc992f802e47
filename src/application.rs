//! Application layer: the control surface over the crawling pipeline.
//!
//! Every trigger publishes `start` on the run's channel, then `complete`
//! with the run totals or `error` with the failure.

#![allow(clippy::uninlined_format_args)]

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::crawling::{CrawlOrchestrator, PhaseOneSummary, PhaseTwoSummary, ReconcileMode};
use crate::domain::{PipelineError, RunEvent, RunId, RunTotals};
use crate::infrastructure::{RunBroadcaster, RunEventSink, RunSubscription};

pub const PHASE_ONE_PERIOD: &str = "1-20";
pub const PHASE_TWO_PERIOD: &str = "21-30";

/// Both phases of one area, on one run channel.
#[derive(Debug, Clone)]
pub struct CombinedSummary {
    pub phase_one: PhaseOneSummary,
    pub phase_two: PhaseTwoSummary,
}

pub struct CrawlerService {
    orchestrator: CrawlOrchestrator,
    broadcaster: Arc<RunBroadcaster>,
}

impl CrawlerService {
    pub const fn new(orchestrator: CrawlOrchestrator, broadcaster: Arc<RunBroadcaster>) -> Self {
        Self {
            orchestrator,
            broadcaster,
        }
    }

    pub const fn broadcaster(&self) -> &Arc<RunBroadcaster> {
        &self.broadcaster
    }

    /// Observes a run. The first event received is `connected`.
    pub fn subscribe(&self, run_id: &RunId) -> RunSubscription {
        self.broadcaster.subscribe(run_id)
    }

    fn sink(&self, run_id: &RunId) -> RunEventSink {
        RunEventSink::new(run_id.clone(), Arc::clone(&self.broadcaster))
    }

    pub async fn trigger_phase_one(&self, area: &str, run_id: Option<RunId>) -> Result<PhaseOneSummary, PipelineError> {
        let run_id = run_id.unwrap_or_else(RunId::generate);
        let sink = self.sink(&run_id);
        self.tracked(
            &sink,
            area,
            PHASE_ONE_PERIOD,
            self.orchestrator.run_phase_one(area, sink.clone()),
            PhaseOneSummary::totals,
        )
        .await
    }

    pub async fn trigger_phase_two(
        &self,
        area: &str,
        only_unapproved: bool,
        run_id: Option<RunId>,
    ) -> Result<PhaseTwoSummary, PipelineError> {
        let run_id = run_id.unwrap_or_else(RunId::generate);
        let sink = self.sink(&run_id);
        let mode = ReconcileMode::from_only_unapproved(only_unapproved);
        self.tracked(
            &sink,
            area,
            PHASE_TWO_PERIOD,
            self.orchestrator.run_phase_two(area, mode, sink.clone()),
            PhaseTwoSummary::totals,
        )
        .await
    }

    /// Phase 1 then phase 2 on the same run id; phase 2 is not started when
    /// phase 1 fails.
    pub async fn trigger_both(
        &self,
        area: &str,
        only_unapproved: bool,
        run_id: Option<RunId>,
    ) -> Result<CombinedSummary, PipelineError> {
        let run_id = run_id.unwrap_or_else(RunId::generate);
        let phase_one = self.trigger_phase_one(area, Some(run_id.clone())).await?;
        let phase_two = self.trigger_phase_two(area, only_unapproved, Some(run_id)).await?;
        Ok(CombinedSummary { phase_one, phase_two })
    }

    /// Phase 1 for every configured area in turn, each on its own run id
    /// derived from `base` (see [`RunId::for_area`]).
    /// A failing area does not stop the others.
    pub async fn trigger_all_areas_phase_one(
        &self,
        base: Option<RunId>,
    ) -> Vec<(String, Result<PhaseOneSummary, PipelineError>)> {
        let base = base.unwrap_or_else(RunId::generate);
        let areas = self.orchestrator.config().app.areas.clone();
        info!("🌏 Crawling {} areas: {}", areas.len(), areas.join(", "));

        let mut results = Vec::with_capacity(areas.len());
        for area in areas {
            let result = self.trigger_phase_one(&area, Some(base.for_area(&area))).await;
            if let Err(e) = &result {
                error!("❌ Area {} failed: {}", area, e);
            }
            results.push((area, result));
        }
        results
    }

    async fn tracked<T, F>(
        &self,
        sink: &RunEventSink,
        area: &str,
        period: &str,
        run: F,
        totals: fn(&T) -> RunTotals,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        info!("▶️ Run {} started: {} days {}", sink.run_id(), area, period);
        sink.emit(RunEvent::Start {
            area: area.to_string(),
            period: period.to_string(),
        });

        match run.await {
            Ok(summary) => {
                sink.emit(RunEvent::Complete {
                    success: true,
                    totals: totals(&summary),
                });
                Ok(summary)
            }
            Err(e) => {
                error!("❌ Run {} failed: {}", sink.run_id(), e);
                sink.emit(RunEvent::Error { error: e.to_string() });
                Err(e)
            }
        }
    }
}
