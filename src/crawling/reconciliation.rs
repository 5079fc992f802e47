//! Phase-2 reconciliation
//!
//! Re-checks records already approved in phase 1 against their days 21-30
//! state. Work is grouped by month; each group scans the live table and
//! matches rows against the group's outstanding items as they scroll past.

#![allow(clippy::uninlined_format_args)]

use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::crawling::session::RemoteSession;
use crate::domain::{ApprovedItem, PhaseOneStatus, PhaseTwoStatus, SessionError, SessionResult, WireRow, parse_row_label};
use crate::infrastructure::browser::{Locator, PageSession};
use crate::infrastructure::config::{HarvestConfig, ReconcileConfig, selectors};

const FILTER_SETTLE: Duration = Duration::from_secs(2);
const SCROLL_RESET_SETTLE: Duration = Duration::from_millis(1500);
const DETAIL_OPEN_SETTLE: Duration = Duration::from_secs(2);
const DETAIL_CLOSE_SETTLE: Duration = Duration::from_millis(800);
const ERROR_CLOSE_SETTLE: Duration = Duration::from_millis(500);
const DETAIL_WAIT: Duration = Duration::from_secs(10);
const DETAIL_RENDER_SETTLE: Duration = Duration::from_millis(1500);
const CONTROL_WAIT: Duration = Duration::from_secs(5);
const SCROLL_INTO_VIEW_SETTLE: Duration = Duration::from_millis(500);
const SHORT_SETTLE: Duration = Duration::from_millis(300);
const DROPDOWN_OPEN_SETTLE: Duration = Duration::from_millis(800);
const OPTION_PICK_SETTLE: Duration = Duration::from_secs(1);
const MONTH_VERIFY_SETTLE: Duration = Duration::from_secs(1);
const MONTH_CHANGED_SETTLE: Duration = Duration::from_millis(1500);
const PERIOD_SELECT_SETTLE: Duration = Duration::from_secs(2);
const PROGRESS_EVERY: u32 = 10;

/// Which approved records a phase-2 run re-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Skip records whose days 21-30 status is already APPROVED
    Optimized,
    /// Re-check everything
    Full,
}

impl ReconcileMode {
    pub const fn from_only_unapproved(only_unapproved: bool) -> Self {
        if only_unapproved { Self::Optimized } else { Self::Full }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Optimized => "optimized",
            Self::Full => "full",
        }
    }
}

/// Narrows the approved set to the items this run must check.
/// Returns the work set and the number of items skipped.
pub fn select_work(items: Vec<ApprovedItem>, mode: ReconcileMode) -> (Vec<ApprovedItem>, usize) {
    match mode {
        ReconcileMode::Full => (items, 0),
        ReconcileMode::Optimized => {
            let total = items.len();
            let work: Vec<_> = items.into_iter().filter(|i| !i.phase_two().is_terminal()).collect();
            let skipped = total - work.len();
            (work, skipped)
        }
    }
}

/// Groups items by month, months in first-appearance order.
pub fn group_by_month(items: Vec<ApprovedItem>) -> Vec<(String, Vec<ApprovedItem>)> {
    let mut groups: Vec<(String, Vec<ApprovedItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(month, _)| *month == item.month) {
            Some((_, group)) => group.push(item),
            None => groups.push((item.month.clone(), vec![item])),
        }
    }
    groups
}

/// Outcome of scanning one month group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupScan {
    /// One row per item, matched or NOT FOUND
    pub rows: Vec<WireRow>,
    pub checked: usize,
    pub not_found: usize,
    pub iterations: u32,
    pub stalled: bool,
}

pub struct Reconciler<'a> {
    page: &'a dyn PageSession,
    harvest: &'a HarvestConfig,
    config: &'a ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    pub const fn new(page: &'a dyn PageSession, harvest: &'a HarvestConfig, config: &'a ReconcileConfig) -> Self {
        Self { page, harvest, config }
    }

    /// Applies the (APPROVED, month) facet and scans for `items`.
    ///
    /// Errors only when the facet cannot be applied or the table cannot be
    /// reset; item-level failures become ERROR rows.
    pub async fn scan_group(
        &self,
        session: &mut RemoteSession<'_>,
        month: &str,
        items: &[ApprovedItem],
    ) -> SessionResult<GroupScan> {
        session.apply_filter(PhaseOneStatus::Approved.as_str(), month).await?;
        sleep(FILTER_SETTLE).await;
        self.page.set_scroll_top(selectors::TABLE_LIST, 0.0).await?;
        sleep(SCROLL_RESET_SETTLE).await;

        info!("  📋 Searching for {} APPROVED items in table...", items.len());
        let wanted: HashSet<&str> = items.iter().map(|i| i.id_gedung.as_str()).collect();
        let mut processed: HashSet<String> = HashSet::new();
        let mut scan = GroupScan::default();
        let mut stall = 0u32;

        while scan.iterations < self.config.max_scroll_iterations && processed.len() < wanted.len() {
            let mut matched_this_pass = false;

            for id in self.visible_ids().await {
                if processed.contains(&id) || !wanted.contains(id.as_str()) {
                    continue;
                }
                matched_this_pass = true;
                stall = 0;

                info!("  🔍 [{}/{}] Found: {}", processed.len() + 1, wanted.len(), id);
                let status = self.inspect_row(&id, month).await;
                info!("  ✅ {}: {}", id, status);

                for item in items.iter().filter(|i| i.id_gedung == id) {
                    scan.rows.push(item.with_phase_two(status));
                    scan.checked += 1;
                }
                processed.insert(id);
            }

            if !matched_this_pass {
                stall += 1;
                if stall >= self.config.stall_threshold {
                    warn!("  ⚠️ No matches found in last {} scrolls", self.config.stall_threshold);
                    scan.stalled = true;
                    break;
                }
            }

            if let Err(e) = self.page.scroll_by(selectors::TABLE_LIST, self.harvest.scroll_step_px).await {
                warn!("  ⚠️ Scrolling stopped: {}", e);
                break;
            }
            sleep(self.harvest.scroll_delay() + Duration::from_millis(self.config.extra_scroll_delay_ms)).await;
            scan.iterations += 1;

            if scan.iterations % PROGRESS_EVERY == 0 && processed.len() < wanted.len() {
                info!("  📊 Scroll #{}: Found {}/{}", scan.iterations, processed.len(), wanted.len());
            }
        }

        for item in items.iter().filter(|i| !processed.contains(&i.id_gedung)) {
            info!("     - {} NOT FOUND", item.id_gedung);
            scan.rows.push(item.with_phase_two(PhaseTwoStatus::NotFound));
            scan.not_found += 1;
        }

        info!(
            "  📊 Summary for {}: checked {}, not found {}",
            month, scan.checked, scan.not_found
        );
        Ok(scan)
    }

    /// Ids of the currently visible rows, in display order.
    async fn visible_ids(&self) -> Vec<String> {
        match self.page.sample_rows(selectors::TABLE_ROW, selectors::ROW_LABEL).await {
            Ok(rows) => rows
                .into_iter()
                .flatten()
                .filter_map(|text| parse_row_label(&text).map(|l| l.id))
                .collect(),
            Err(e) => {
                debug!("Row sample failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Opens the row showing `id`, classifies it and closes the detail view.
    async fn inspect_row(&self, id: &str, month: &str) -> PhaseTwoStatus {
        match self.open_row(id).await {
            Ok(()) => {
                sleep(DETAIL_OPEN_SETTLE).await;
                let status = DetailInspector::new(self.page, self.config).check(month).await;
                if let Err(e) = self.page.press_key(selectors::ESCAPE_KEY).await {
                    warn!("  ⚠️ Could not close detail view: {}", e);
                }
                sleep(DETAIL_CLOSE_SETTLE).await;
                status
            }
            Err(e) => {
                warn!("  ❌ {}: ERROR - {}", id, e);
                let _ = self.page.press_key(selectors::ESCAPE_KEY).await;
                sleep(ERROR_CLOSE_SETTLE).await;
                PhaseTwoStatus::Error
            }
        }
    }

    /// Clicks the row whose label id is `id`, located on a fresh sample
    /// since earlier clicks may have re-rendered the list.
    async fn open_row(&self, id: &str) -> SessionResult<()> {
        let rows = self.page.sample_rows(selectors::TABLE_ROW, selectors::ROW_LABEL).await?;
        let position = rows
            .iter()
            .position(|text| {
                text.as_deref()
                    .and_then(parse_row_label)
                    .is_some_and(|l| l.id == id)
            })
            .ok_or_else(|| SessionError::ElementNotFound(format!("row {}", id)))?;
        self.page.click(&Locator::css(selectors::TABLE_ROW), position).await
    }
}

/// Reads the days 21-30 status from an open detail view.
pub struct DetailInspector<'a> {
    page: &'a dyn PageSession,
    config: &'a ReconcileConfig,
}

impl<'a> DetailInspector<'a> {
    pub const fn new(page: &'a dyn PageSession, config: &'a ReconcileConfig) -> Self {
        Self { page, config }
    }

    /// APPROVED or NOT APPROVED; any failure is ERROR.
    pub async fn check(&self, month: &str) -> PhaseTwoStatus {
        match self.try_check(month).await {
            Ok(status) => status,
            Err(e) => {
                warn!("    ❌ Error: {}", e);
                PhaseTwoStatus::Error
            }
        }
    }

    async fn try_check(&self, month: &str) -> SessionResult<PhaseTwoStatus> {
        self.page
            .wait_for_visible(&Locator::css(selectors::DETAIL_MAIN), DETAIL_WAIT)
            .await?;
        if let Ok(header) = self.page.text_of(&Locator::css(selectors::DETAIL_HEADER), 0).await {
            info!("    📋 Dialog opened: {}", header);
        }
        sleep(DETAIL_RENDER_SETTLE).await;

        self.ensure_month(month).await?;

        let period = Locator::with_exact_text(selectors::SELECT_BUTTON, selectors::PERIOD_OPTION_LABEL);
        self.page.wait_for_visible(&period, CONTROL_WAIT).await?;
        if !self.page.has_class(&period, 0, selectors::SELECTED_CLASS).await? {
            info!("    📌 Selecting period {}", selectors::PERIOD_OPTION_LABEL);
            self.page.click(&period, 0).await?;
            sleep(PERIOD_SELECT_SETTLE).await;
        }

        let pending_approval = self
            .page
            .count(&Locator::css(selectors::SECONDARY_APPROVAL_BUTTON))
            .await?
            > 0;
        Ok(if pending_approval {
            PhaseTwoStatus::NotApproved
        } else {
            PhaseTwoStatus::Approved
        })
    }

    /// Makes the detail view's month selector show `month`.
    async fn ensure_month(&self, month: &str) -> SessionResult<()> {
        let input = Locator::css(selectors::MONTH_INPUT);
        self.page.wait_for_visible(&input, CONTROL_WAIT).await?;
        self.page.scroll_into_view(&input, 0).await?;
        sleep(SCROLL_INTO_VIEW_SETTLE).await;

        let current = self.page.input_value(&input).await?;
        if current == month {
            return Ok(());
        }
        info!("    📅 Changing month from {} to {}", current, month);

        for attempt in 1..=self.config.month_change_attempts {
            match self.try_change_month(&input, month).await {
                Ok(true) => {
                    info!("    ✅ Month changed to {}", month);
                    sleep(MONTH_CHANGED_SETTLE).await;
                    return Ok(());
                }
                Ok(false) => info!("    ⚠️ Attempt {}: month still not {}", attempt, month),
                Err(e) => {
                    info!("    ⚠️ Attempt {} failed: {}", attempt, e);
                    let _ = self.page.press_key(selectors::ESCAPE_KEY).await;
                    sleep(ERROR_CLOSE_SETTLE).await;
                }
            }
        }

        Err(SessionError::InteractionTimeout {
            what: format!(
                "month selector did not change to {} after {} attempts",
                month, self.config.month_change_attempts
            ),
            timeout_ms: 0,
        })
    }

    /// One open-pick-verify cycle; `Ok(false)` when the value did not stick.
    async fn try_change_month(&self, input: &Locator, month: &str) -> SessionResult<bool> {
        self.page.scroll_into_view(input, 0).await?;
        sleep(SHORT_SETTLE).await;
        self.page.click(input, 0).await?;
        sleep(DROPDOWN_OPEN_SETTLE).await;

        let options = Locator::css(selectors::DROPDOWN_OPTION);
        let texts = self.page.texts_of(&options).await?;
        if texts.is_empty() {
            return Ok(false);
        }

        let Some(position) = texts.iter().position(|t| t.contains(month)) else {
            let _ = self.page.press_key(selectors::ESCAPE_KEY).await;
            sleep(ERROR_CLOSE_SETTLE).await;
            return Ok(false);
        };

        self.page.scroll_into_view(&options, position).await?;
        sleep(SHORT_SETTLE).await;
        self.page.click(&options, position).await?;
        sleep(OPTION_PICK_SETTLE).await;

        sleep(MONTH_VERIFY_SETTLE).await;
        Ok(self.page.input_value(input).await? == month)
    }
}
