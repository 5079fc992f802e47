//! Delivery batches, their outcomes and the per-run ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::records::WireRow;

/// How the ingest endpoint should merge a batch into stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    #[serde(rename = "period_1_20_only")]
    PhaseOneOnly,
    #[serde(rename = "period_21_30_only")]
    PhaseTwoOnly,
}

impl UpdateMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PhaseOneOnly => "period_1_20_only",
            Self::PhaseTwoOnly => "period_21_30_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchMetadata {
    pub area: String,
    pub update_mode: UpdateMode,
    pub month: Option<String>,
    pub year: i32,
}

/// Immutable unit of delivery. Sequence numbers come from [`RunState::next_sequence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    sequence: u32,
    rows: Vec<WireRow>,
    metadata: BatchMetadata,
}

impl Batch {
    pub(crate) const fn new(sequence: u32, rows: Vec<WireRow>, metadata: BatchMetadata) -> Self {
        Self { sequence, rows, metadata }
    }

    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn rows(&self) -> &[WireRow] {
        &self.rows
    }

    pub const fn metadata(&self) -> &BatchMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn payload(&self) -> BatchPayload<'_> {
        BatchPayload {
            data: &self.rows,
            area: &self.metadata.area,
            update_mode: self.metadata.update_mode,
            month: self.metadata.month.as_deref(),
            year: self.metadata.year,
        }
    }
}

/// JSON body of `POST` to the ingest endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload<'a> {
    pub data: &'a [WireRow],
    pub area: &'a str,
    pub update_mode: UpdateMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<&'a str>,
    pub year: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IngestSummary {
    #[serde(default)]
    pub berhasil: u64,
}

/// Response of the ingest endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub summary: Option<IngestSummary>,
    #[serde(default)]
    pub error: Option<String>,
}

impl IngestResponse {
    /// Server-reported number of rows saved; absent summary means zero.
    pub fn saved_count(&self) -> u64 {
        self.summary.as_ref().map_or(0, |s| s.berhasil)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::Partial => f.write_str("PARTIAL"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Classifies a delivery from the sent and server-saved counts alone.
///
/// | saved            | status  |
/// |------------------|---------|
/// | `>= sent`        | SUCCESS |
/// | `1 ..< sent`     | PARTIAL |
/// | `0` (sent > 0)   | FAILED  |
pub const fn classify_outcome(sent: u64, saved: u64) -> DeliveryStatus {
    if saved >= sent {
        DeliveryStatus::Success
    } else if saved == 0 {
        DeliveryStatus::Failed
    } else {
        DeliveryStatus::Partial
    }
}

/// Ledger entry for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub sequence: u32,
    pub status: DeliveryStatus,
    pub sent_count: u64,
    pub saved_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryOutcome {
    pub const fn deficit(&self) -> u64 {
        self.sent_count.saturating_sub(self.saved_count)
    }
}

/// Append-only record of every batch outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchLedger {
    entries: Vec<DeliveryOutcome>,
}

impl BatchLedger {
    pub fn append(&mut self, outcome: DeliveryOutcome) {
        self.entries.push(outcome);
    }

    pub fn entries(&self) -> &[DeliveryOutcome] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&DeliveryOutcome> {
        self.entries.last()
    }
}

/// Run identifier of the form `run_<epoch_ms>_<9 base36 chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let suffix: String = (0..9)
            .map(|_| char::from(ALPHABET[fastrand::usize(..ALPHABET.len())]))
            .collect();
        Self(format!("run_{}_{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of one area's run within a multi-area sweep.
    pub fn for_area(&self, area: &str) -> Self {
        Self(format!("{}_{}", self.0, area.to_ascii_lowercase()))
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A facet pass, month group or item that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    pub scope: String,
    pub reason: String,
}

/// Per-invocation counters and ledger. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: RunId,
    pub total_sent: u64,
    pub total_failed: u64,
    pub ledger: BatchLedger,
    pub skips: Vec<SkipRecord>,
    #[serde(skip)]
    last_sequence: u32,
}

impl RunState {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            total_sent: 0,
            total_failed: 0,
            ledger: BatchLedger::default(),
            skips: Vec::new(),
            last_sequence: 0,
        }
    }

    /// Strictly increasing, starting at 1, never reused within the run.
    pub(crate) const fn next_sequence(&mut self) -> u32 {
        self.last_sequence += 1;
        self.last_sequence
    }

    /// Folds an outcome into the totals and appends it to the ledger.
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome.status {
            DeliveryStatus::Success => self.total_sent += outcome.saved_count,
            DeliveryStatus::Partial => {
                self.total_sent += outcome.saved_count;
                self.total_failed += outcome.deficit();
            }
            DeliveryStatus::Failed => self.total_failed += outcome.sent_count,
        }
        self.ledger.append(outcome);
    }

    pub fn skip(&mut self, scope: impl Into<String>, reason: impl Into<String>) {
        self.skips.push(SkipRecord {
            scope: scope.into(),
            reason: reason.into(),
        });
    }
}
