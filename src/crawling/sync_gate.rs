//! Waits for the remote application's background replication to settle.
//!
//! The gate is advisory: timing out or failing to read the indicators never
//! aborts a run. It returns `false` only on timeout.

#![allow(clippy::uninlined_format_args)]

use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::domain::SessionResult;
use crate::infrastructure::browser::{Locator, PageSession};
use crate::infrastructure::config::{SyncConfig, selectors};

/// What the indicators currently report.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SyncState {
    Idle,
    Unsynced(String),
    Syncing(String),
    ButtonDisabled,
}

pub struct SyncGate<'a> {
    page: &'a dyn PageSession,
    config: &'a SyncConfig,
}

impl<'a> SyncGate<'a> {
    pub const fn new(page: &'a dyn PageSession, config: &'a SyncConfig) -> Self {
        Self { page, config }
    }

    /// `true` once all three indicators are idle, `false` on timeout.
    /// A failing indicator read is treated as settled.
    pub async fn wait(&self) -> bool {
        info!("🔄 Checking sync status...");
        sleep(self.config.initial_settle()).await;

        let started = Instant::now();
        let mut checks = 0u32;
        while started.elapsed() < self.config.timeout() {
            checks += 1;
            match self.probe().await {
                Ok(SyncState::Idle) => {
                    info!("  ✅ Sync complete! (Checked {} times)", checks);
                    return true;
                }
                Ok(state) => {
                    info!("  ⏳ Waiting for sync: {:?}", state);
                    sleep(self.config.poll_interval()).await;
                }
                Err(e) => {
                    warn!("  ⚠️ Error checking sync: {} (assuming sync complete)", e);
                    return true;
                }
            }
        }

        warn!("  ⚠️ Sync did not settle within {}s", self.config.timeout_secs);
        false
    }

    async fn probe(&self) -> SessionResult<SyncState> {
        let badge = Locator::css(selectors::UNSYNCED_BADGE);
        if self.page.count(&badge).await? > 0 {
            let text = self.page.text_of(&badge, 0).await.unwrap_or_default();
            return Ok(SyncState::Unsynced(text));
        }

        let status = Locator::css(selectors::SYNC_STATUS_TEXT);
        if self.page.count(&status).await? > 0 {
            let text = self.page.text_of(&status, 0).await?;
            if text.contains(selectors::SYNCING_MARKER) {
                return Ok(SyncState::Syncing(text));
            }
        }

        let button = Locator::css(selectors::SYNC_BUTTON);
        if self.page.count(&button).await? > 0 && self.page.is_disabled(&button).await? {
            return Ok(SyncState::ButtonDisabled);
        }

        Ok(SyncState::Idle)
    }
}
