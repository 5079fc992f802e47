//! Incremental extraction from the virtualized checklist table
//!
//! The table only renders the rows near the viewport, so a pass samples the
//! visible rows, scrolls a fixed step, and repeats until the container has
//! stayed at its bottom for a few consecutive iterations.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::{HarvestedRecord, SessionResult, parse_row_label};
use crate::infrastructure::browser::{Locator, PageSession};
use crate::infrastructure::config::{HarvestConfig, selectors};

const TABLE_WAIT: Duration = Duration::from_secs(10);
const SCROLL_RESET_SETTLE: Duration = Duration::from_secs(1);
const PROGRESS_EVERY: u32 = 5;

/// Result of one facet pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestPass {
    /// First sighting of every id, in sighting order
    pub records: Vec<HarvestedRecord>,
    pub iterations: u32,
    pub reached_bottom: bool,
    /// Set when scrolling failed mid-pass; `records` holds what was read before.
    pub interrupted: Option<String>,
}

pub struct ListHarvester<'a> {
    page: &'a dyn PageSession,
    config: &'a HarvestConfig,
}

impl<'a> ListHarvester<'a> {
    pub const fn new(page: &'a dyn PageSession, config: &'a HarvestConfig) -> Self {
        Self { page, config }
    }

    /// Reads every row of the currently filtered table.
    ///
    /// Fails only when the table never becomes visible; row-level read
    /// failures are skipped.
    pub async fn harvest(&self, area: &str, month: &str) -> SessionResult<HarvestPass> {
        info!("📋 Extracting table data ({} / {})", area, month);
        self.page
            .wait_for_visible(&Locator::css(selectors::TABLE_LIST), TABLE_WAIT)
            .await?;

        self.page.set_scroll_top(selectors::TABLE_LIST, 0.0).await?;
        sleep(SCROLL_RESET_SETTLE).await;

        let mut pass = HarvestPass::default();
        let mut seen = HashSet::new();
        let mut at_bottom_streak = 0u32;

        while pass.iterations < self.config.max_scroll_iterations {
            self.sample(area, month, &mut seen, &mut pass.records).await;

            if pass.iterations % PROGRESS_EVERY == 0 {
                info!("  📊 Scroll #{}: Extracted {} unique data", pass.iterations, pass.records.len());
            }

            if let Err(e) = self.page.scroll_by(selectors::TABLE_LIST, self.config.scroll_step_px).await {
                warn!("⚠️ Scrolling stopped: {}", e);
                pass.interrupted = Some(e.to_string());
                break;
            }
            sleep(self.config.scroll_delay()).await;

            let at_bottom = match self.page.scroll_metrics(selectors::TABLE_LIST).await {
                Ok(metrics) => metrics.at_bottom(self.config.bottom_tolerance_px),
                Err(e) => {
                    warn!("⚠️ Scroll position unreadable: {}", e);
                    pass.interrupted = Some(e.to_string());
                    break;
                }
            };

            if at_bottom {
                at_bottom_streak += 1;
                if at_bottom_streak >= self.config.stability_threshold {
                    self.sample(area, month, &mut seen, &mut pass.records).await;
                    pass.reached_bottom = true;
                    break;
                }
            } else {
                at_bottom_streak = 0;
            }

            pass.iterations += 1;
        }

        info!("  ✅ Extracted {} unique data", pass.records.len());
        Ok(pass)
    }

    /// Adds the not-yet-seen visible rows to `out`.
    async fn sample(&self, area: &str, month: &str, seen: &mut HashSet<String>, out: &mut Vec<HarvestedRecord>) {
        let rows = match self.page.sample_rows(selectors::TABLE_ROW, selectors::ROW_LABEL).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!("Row sample failed: {}", e);
                return;
            }
        };

        for text in rows.into_iter().flatten() {
            let Some(label) = parse_row_label(&text) else {
                continue;
            };
            if seen.insert(label.id.clone()) {
                out.push(HarvestedRecord::from_label(area, month, label));
            }
        }
    }
}
