//! # Crawling pipeline
//!
//! The stateful pieces of a run, leaves first:
//! - [`list_harvester`]: incremental extraction from the virtualized table
//! - [`sync_gate`]: waits for the remote application's replication
//! - [`delivery_client`]: verified, strictly sequential batch delivery
//! - [`record_aggregator`]: phase-1 aggregation and batch cutting
//! - [`reconciliation`]: phase-2 re-check of approved records
//! - [`session`]: login, navigation, facet selection, logout
//! - [`orchestrator`]: one phase for one area, end to end

pub mod delivery_client;
pub mod list_harvester;
pub mod orchestrator;
pub mod reconciliation;
pub mod record_aggregator;
pub mod session;
pub mod sync_gate;

pub use delivery_client::{DeliveryClient, RetryPolicy};
pub use list_harvester::{HarvestPass, ListHarvester};
pub use orchestrator::{CrawlOrchestrator, PhaseOneSummary, PhaseTwoSummary};
pub use reconciliation::{DetailInspector, GroupScan, ReconcileMode, Reconciler, group_by_month, select_work};
pub use record_aggregator::{RecordAggregator, Sighting};
pub use session::{Facet, RemoteSession};
pub use sync_gate::SyncGate;
