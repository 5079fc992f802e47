//! HTTP client for the central datastore API
//!
//! One request per call: retry, backoff and saved-count verification are
//! done by the delivery client above it.

#![allow(clippy::uninlined_format_args)]

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::domain::{ApprovedItem, ApprovedSource, BatchPayload, BatchTransport, DeliveryError, IngestResponse};
use crate::infrastructure::config::ApiConfig;

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApprovedResponse {
    #[serde(default)]
    records: Option<Vec<ApprovedItem>>,
}

/// Datastore client shared by both phases.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    ingest_url: Url,
    approved_url: Url,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, DeliveryError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| DeliveryError::Transport(format!("invalid base url {}: {}", config.base_url, e)))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| DeliveryError::Transport(format!("invalid endpoint path {}: {}", path, e)))
        };

        // Per-attempt timeout is applied by the delivery client.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("checklist-crawler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            ingest_url: join(&config.ingest_path)?,
            approved_url: join(&config.approved_path)?,
            api_key: config.api_key.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Non-2xx responses become `Rejected` with the body's `error` field.
    async fn reject(response: Response) -> DeliveryError {
        let status = response.status().as_u16();
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| "Unknown".to_string());
        DeliveryError::Rejected { status, message }
    }
}

fn transport_error(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout(Duration::ZERO)
    } else {
        DeliveryError::Transport(err.to_string())
    }
}

#[async_trait]
impl BatchTransport for ApiClient {
    async fn post_batch(&self, payload: &BatchPayload<'_>) -> Result<IngestResponse, DeliveryError> {
        debug!("POST {} ({} rows)", self.ingest_url, payload.data.len());
        let response = self
            .authorize(self.client.post(self.ingest_url.clone()).json(payload))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let body: IngestResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Decode(e.to_string()))?;
        if !body.success {
            return Err(DeliveryError::Unsuccessful(
                body.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl ApprovedSource for ApiClient {
    async fn fetch_approved(&self, area: &str) -> Result<Vec<ApprovedItem>, DeliveryError> {
        info!("📥 Fetching APPROVED data from API for {}...", area);
        let mut url = self.approved_url.clone();
        url.query_pairs_mut().append_pair("area", area);

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let body: ApprovedResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Decode(e.to_string()))?;
        let records = body.records.unwrap_or_default();
        info!("✅ Fetched {} APPROVED records", records.len());
        Ok(records)
    }
}
