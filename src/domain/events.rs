//! Progress events published on a run's channel.
//!
//! The wire shape is `{ "type": "<snake_case>", ...camelCase fields }`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Totals reported with the `complete` event. Phase 1 fills the crawl/send
/// counters, phase 2 the check/update counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_crawled: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_checked: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_updated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_skipped: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RunEvent {
    Connected {
        run_id: String,
    },
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },
    BatchStart {
        batch_number: u32,
        record_count: usize,
        message: String,
    },
    BatchComplete {
        batch_number: u32,
        saved_count: u64,
        expected_count: u64,
        duration: String,
        message: String,
    },
    BatchPartial {
        batch_number: u32,
        saved_count: u64,
        expected_count: u64,
        failed: u64,
        duration: String,
        message: String,
    },
    BatchFailed {
        batch_number: u32,
        error: String,
    },
    Start {
        area: String,
        period: String,
    },
    Complete {
        success: bool,
        #[serde(flatten)]
        totals: RunTotals,
    },
    Error {
        error: String,
    },
}

impl RunEvent {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Value of the `type` tag.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Log { .. } => "log",
            Self::BatchStart { .. } => "batch_start",
            Self::BatchComplete { .. } => "batch_complete",
            Self::BatchPartial { .. } => "batch_partial",
            Self::BatchFailed { .. } => "batch_failed",
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}
