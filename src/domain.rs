//! Domain layer: checklist records, delivery batches, run state and progress events.
//!
//! Nothing in here touches the browser or the network; the rules that decide
//! what a run keeps and how a delivery is classified live here as pure functions.

pub mod batch;
pub mod errors;
pub mod events;
pub mod records;
pub mod services;

pub use batch::{
    Batch, BatchLedger, BatchMetadata, BatchPayload, DeliveryOutcome, DeliveryStatus,
    IngestResponse, RunId, RunState, SkipRecord, UpdateMode, classify_outcome,
};
pub use errors::{DeliveryError, PipelineError, SessionError, SessionResult};
pub use events::{RunEvent, RunTotals};
pub use records::{
    AggregatedRecord, ApprovedItem, HarvestedRecord, PhaseOneStatus, PhaseTwoStatus, RecordKey,
    RowLabel, WireRow, parse_row_label, resolve_phase_one,
};
pub use services::{ApprovedSource, BatchTransport};
