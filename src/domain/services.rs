//! Service traits at the datastore seam.
//!
//! The crawling layer depends only on these; the HTTP client in
//! `infrastructure::api_client` implements both.

use async_trait::async_trait;

use crate::domain::batch::{BatchPayload, IngestResponse};
use crate::domain::errors::DeliveryError;
use crate::domain::records::ApprovedItem;

/// Ingest endpoint for delivery batches.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// One attempt; retries and classification belong to the caller.
    async fn post_batch(&self, payload: &BatchPayload<'_>) -> Result<IngestResponse, DeliveryError>;
}

/// Read endpoint for records already approved in phase 1.
#[async_trait]
pub trait ApprovedSource: Send + Sync {
    async fn fetch_approved(&self, area: &str) -> Result<Vec<ApprovedItem>, DeliveryError>;
}
