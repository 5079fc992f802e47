//! # Run orchestration
//!
//! Drives one phase for one area end to end: credentials check, browser
//! launch, session preparation, the phase's work loop, logout and the
//! end-of-run report. Everything runs sequentially on a single page; the
//! page is closed on every exit path.

#![allow(clippy::uninlined_format_args)]

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::crawling::delivery_client::{DeliveryClient, RetryPolicy};
use crate::crawling::list_harvester::{HarvestPass, ListHarvester};
use crate::crawling::reconciliation::{ReconcileMode, Reconciler, group_by_month, select_work};
use crate::crawling::record_aggregator::RecordAggregator;
use crate::crawling::session::RemoteSession;
use crate::crawling::sync_gate::SyncGate;
use crate::domain::{
    ApprovedSource, BatchLedger, BatchMetadata, BatchTransport, DeliveryOutcome, PhaseOneStatus, PipelineError,
    RunId, RunState, RunTotals, SessionResult, SkipRecord, UpdateMode, WireRow,
};
use crate::infrastructure::browser::{BrowserLauncher, LaunchPlan, PageSession};
use crate::infrastructure::config::{AppConfig, AreaCredentials};
use crate::infrastructure::csv_backup;
use crate::infrastructure::run_broadcaster::RunEventSink;

const RELOGIN_SETTLE: Duration = Duration::from_secs(2);

/// Result of a phase-1 run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseOneSummary {
    pub run_id: RunId,
    pub total_crawled: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub ledger: BatchLedger,
    pub skips: Vec<SkipRecord>,
}

impl PhaseOneSummary {
    pub const fn totals(&self) -> RunTotals {
        RunTotals {
            total_crawled: Some(self.total_crawled),
            total_sent: Some(self.total_sent),
            total_failed: Some(self.total_failed),
            total_checked: None,
            total_updated: None,
            total_skipped: None,
        }
    }
}

/// Result of a phase-2 run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTwoSummary {
    pub run_id: RunId,
    pub total_checked: u64,
    pub total_updated: u64,
    pub total_skipped: u64,
    pub mode: ReconcileMode,
    pub skips: Vec<SkipRecord>,
}

impl PhaseTwoSummary {
    pub const fn totals(&self) -> RunTotals {
        RunTotals {
            total_crawled: None,
            total_sent: None,
            total_failed: None,
            total_checked: Some(self.total_checked),
            total_updated: Some(self.total_updated),
            total_skipped: Some(self.total_skipped),
        }
    }
}

/// Shared collaborators of every run.
#[derive(Clone)]
pub struct CrawlOrchestrator {
    config: Arc<AppConfig>,
    launcher: Arc<dyn BrowserLauncher>,
    transport: Arc<dyn BatchTransport>,
    approved: Arc<dyn ApprovedSource>,
}

impl CrawlOrchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        launcher: Arc<dyn BrowserLauncher>,
        transport: Arc<dyn BatchTransport>,
        approved: Arc<dyn ApprovedSource>,
    ) -> Self {
        Self {
            config,
            launcher,
            transport,
            approved,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Crawls every (status, month) facet of `area` and delivers the
    /// aggregate in verified batches.
    pub async fn run_phase_one(&self, area: &str, sink: RunEventSink) -> Result<PhaseOneSummary, PipelineError> {
        let statuses = self.phase_one_statuses()?;
        let (credentials, plan) = self.preflight(area)?;
        sink.log(format!("🚀 Starting crawl for area: {} (days 1-20)", area));

        let page = self.launcher.launch(&plan).await?;
        let result = self.phase_one_on(page.as_ref(), area, &credentials, &statuses, sink).await;
        close_page(page.as_ref()).await;
        result
    }

    /// Re-checks approved records of `area` for their days 21-30 status.
    pub async fn run_phase_two(
        &self,
        area: &str,
        mode: ReconcileMode,
        sink: RunEventSink,
    ) -> Result<PhaseTwoSummary, PipelineError> {
        let (credentials, plan) = self.preflight(area)?;
        sink.log(format!("🚀 Starting days 21-30 check for area: {} ({} mode)", area, mode.as_str()));

        let page = self.launcher.launch(&plan).await?;
        let result = self.phase_two_on(page.as_ref(), area, &credentials, mode, sink).await;
        close_page(page.as_ref()).await;
        result
    }

    /// Everything that must hold before the browser is touched.
    fn preflight(&self, area: &str) -> Result<(AreaCredentials, LaunchPlan), PipelineError> {
        let credentials = self
            .config
            .app
            .credentials_for(area)
            .ok_or_else(|| PipelineError::FatalConfig(format!("credentials not found for area: {}", area)))?;
        let plan = LaunchPlan::from_config(&self.config.browser)?;
        info!("🖥️ Launch strategy: {:?} (headless: {})", plan.strategy, plan.headless);
        Ok((credentials, plan))
    }

    fn phase_one_statuses(&self) -> Result<Vec<PhaseOneStatus>, PipelineError> {
        self.config
            .harvest
            .statuses
            .iter()
            .map(|name| name.parse().map_err(PipelineError::FatalConfig))
            .collect()
    }

    async fn phase_one_on(
        &self,
        page: &dyn PageSession,
        area: &str,
        credentials: &AreaCredentials,
        statuses: &[PhaseOneStatus],
        sink: RunEventSink,
    ) -> Result<PhaseOneSummary, PipelineError> {
        let config = &*self.config;
        let mut session = RemoteSession::new(page, &config.app);
        session.open().await?;

        if session.is_logged_in().await {
            info!("⚠️ Existing session detected, logging out first...");
            session.logout().await;
            sleep(RELOGIN_SETTLE).await;
            session.reload().await?;
        }
        session.login(area, credentials).await?;
        self.prepare_checklist(&session).await?;

        let batch_size = config.api.batch_size;
        let metadata = BatchMetadata {
            area: area.to_string(),
            update_mode: UpdateMode::PhaseOneOnly,
            month: None,
            year: config.reporting_year(),
        };
        let mut delivery = DeliveryClient::new(Arc::clone(&self.transport), RetryPolicy::from_config(&config.api), sink);
        let mut aggregator = RecordAggregator::new();
        let harvester = ListHarvester::new(page, &config.harvest);

        for &status in statuses {
            for month in &config.harvest.months {
                info!("📊 Processing: {} - {}", status, month);
                match Self::harvest_facet(&mut session, &harvester, area, status, month).await {
                    Ok(pass) => {
                        let new = aggregator.absorb_pass(pass.records, status);
                        delivery.sink().log(format!(
                            "📦 {} - {}: {} new, {} total, {} pending",
                            status,
                            month,
                            new,
                            aggregator.len(),
                            aggregator.pending_len()
                        ));
                        if let Some(reason) = pass.interrupted {
                            delivery.state_mut().skip(format!("{} / {} (partial)", status, month), reason);
                        }
                    }
                    Err(e) => {
                        warn!("❌ Error processing {} - {}: {}", status, month, e);
                        delivery.state_mut().skip(format!("{} / {}", status, month), e.to_string());
                    }
                }

                while aggregator.pending_len() >= batch_size {
                    let rows = aggregator.take_batch(batch_size);
                    deliver(&mut delivery, rows, metadata.clone()).await?;
                }
                sleep(config.harvest.action_delay()).await;
            }
        }

        while aggregator.pending_len() > 0 {
            let rows = aggregator.take_batch(batch_size);
            deliver(&mut delivery, rows, metadata.clone()).await?;
        }

        session.logout().await;
        info!("⏳ Waiting {}s for the application to flush...", config.browser.post_logout_wait_secs);
        sleep(config.browser.post_logout_wait()).await;

        if config.output.csv_backup {
            if let Err(e) = csv_backup::write_backup(&config.output.backup_dir, area, aggregator.records()).await {
                warn!("⚠️ CSV backup failed: {}", e);
            }
        }

        let total_crawled = aggregator.len() as u64;
        let state = delivery.into_state();
        log_report(&state);
        info!("✅ Crawl complete for {}: {} records", area, total_crawled);

        Ok(PhaseOneSummary {
            run_id: state.run_id,
            total_crawled,
            total_sent: state.total_sent,
            total_failed: state.total_failed,
            ledger: state.ledger,
            skips: state.skips,
        })
    }

    async fn harvest_facet(
        session: &mut RemoteSession<'_>,
        harvester: &ListHarvester<'_>,
        area: &str,
        status: PhaseOneStatus,
        month: &str,
    ) -> SessionResult<HarvestPass> {
        session.apply_filter(status.as_str(), month).await?;
        harvester.harvest(area, month).await
    }

    async fn phase_two_on(
        &self,
        page: &dyn PageSession,
        area: &str,
        credentials: &AreaCredentials,
        mode: ReconcileMode,
        sink: RunEventSink,
    ) -> Result<PhaseTwoSummary, PipelineError> {
        let config = &*self.config;
        let mut session = RemoteSession::new(page, &config.app);
        session.open().await?;

        if session.is_logged_in().await {
            info!("✅ Already logged in");
        } else {
            session.login(area, credentials).await?;
        }
        self.prepare_checklist(&session).await?;

        let approved = match self.approved.fetch_approved(area).await {
            Ok(items) => items,
            Err(e) => {
                error!("❌ Error fetching approved data: {}", e);
                Vec::new()
            }
        };
        let fetched = approved.len();
        let (work, skipped) = select_work(approved, mode);
        sink.log(format!(
            "📋 {} approved records, {} to check, {} already APPROVED",
            fetched,
            work.len(),
            skipped
        ));

        let mut delivery = DeliveryClient::new(Arc::clone(&self.transport), RetryPolicy::from_config(&config.api), sink);
        let reconciler = Reconciler::new(page, &config.harvest, &config.reconcile);
        let mut total_checked = 0u64;
        let mut total_updated = 0u64;

        for (month, items) in group_by_month(work) {
            delivery.sink().log(format!("📅 Processing month: {} ({} items)", month, items.len()));
            let scan = match reconciler.scan_group(&mut session, &month, &items).await {
                Ok(scan) => scan,
                Err(e) => {
                    warn!("❌ Error processing month {}: {}", month, e);
                    delivery.state_mut().skip(month.clone(), e.to_string());
                    continue;
                }
            };

            total_checked += scan.checked as u64;
            if scan.rows.is_empty() {
                continue;
            }
            let metadata = BatchMetadata {
                area: area.to_string(),
                update_mode: UpdateMode::PhaseTwoOnly,
                month: Some(month.clone()),
                year: config.reporting_year(),
            };
            let outcome = deliver(&mut delivery, scan.rows, metadata).await?;
            total_updated += outcome.saved_count;
        }

        session.logout().await;
        info!("⏳ Waiting {}s for the application to flush...", config.browser.post_logout_wait_secs);
        sleep(config.browser.post_logout_wait()).await;

        let state = delivery.into_state();
        log_report(&state);
        info!(
            "✅ Check complete for {}: {} checked, {} updated, {} skipped",
            area, total_checked, total_updated, skipped
        );

        Ok(PhaseTwoSummary {
            run_id: state.run_id,
            total_checked,
            total_updated,
            total_skipped: skipped as u64,
            mode,
            skips: state.skips,
        })
    }

    /// Sync, open the checklist, sync again. A gate timeout only warns.
    async fn prepare_checklist(&self, session: &RemoteSession<'_>) -> SessionResult<()> {
        let gate = SyncGate::new(session.page(), &self.config.sync);
        if !gate.wait().await {
            warn!("⚠️ Proceeding without a settled sync");
        }
        session.navigate_to_checklist().await?;
        if !gate.wait().await {
            warn!("⚠️ Proceeding without a settled sync");
        }
        Ok(())
    }
}

/// A failed batch aborts the run; its report is still logged on the way out.
async fn deliver(
    delivery: &mut DeliveryClient,
    rows: Vec<WireRow>,
    metadata: BatchMetadata,
) -> Result<DeliveryOutcome, PipelineError> {
    let result = delivery.verify_and_send(rows, metadata).await;
    if result.is_err() {
        log_report(delivery.state());
    }
    result
}

async fn close_page(page: &dyn PageSession) {
    if let Err(e) = page.close().await {
        warn!("⚠️ Failed to close browser session: {}", e);
    }
}

/// One line per delivered batch, then the skip list.
pub fn log_report(state: &RunState) {
    info!("📊 Batch report for {}:", state.run_id);
    for entry in state.ledger.entries() {
        match &entry.error {
            Some(err) => info!(
                "   Batch #{}: {} sent {} saved {} ({}ms) - {}",
                entry.sequence, entry.status, entry.sent_count, entry.saved_count, entry.duration_ms, err
            ),
            None => info!(
                "   Batch #{}: {} sent {} saved {} ({}ms)",
                entry.sequence, entry.status, entry.sent_count, entry.saved_count, entry.duration_ms
            ),
        }
    }
    info!(
        "   Total sent: {}, total failed: {}",
        state.total_sent, state.total_failed
    );
    if !state.skips.is_empty() {
        warn!("⚠️ {} skipped:", state.skips.len());
        for skip in &state.skips {
            warn!("   - {}: {}", skip.scope, skip.reason);
        }
    }
}
