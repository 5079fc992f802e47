//! Verified batch delivery
//!
//! The producing loop hands rows to [`DeliveryClient::verify_and_send`] and
//! does not continue until the batch has been classified. Every method that
//! sends takes `&mut self`, so a run never has two batches in flight.

#![allow(clippy::uninlined_format_args)]

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{error, info, warn};

use crate::domain::{
    Batch, BatchMetadata, BatchTransport, DeliveryError, DeliveryOutcome, DeliveryStatus, IngestResponse,
    PipelineError, RunEvent, RunState, WireRow, classify_outcome,
};
use crate::infrastructure::config::ApiConfig;
use crate::infrastructure::run_broadcaster::RunEventSink;

/// Per-attempt timeout and the delays before each retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub request_timeout: Duration,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            delays: config
                .retry_delays()
                .into_iter()
                .take(config.max_retries as usize)
                .collect(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.delays.len()).unwrap_or(u32::MAX).saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

pub struct DeliveryClient {
    transport: Arc<dyn BatchTransport>,
    policy: RetryPolicy,
    state: RunState,
    sink: RunEventSink,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn BatchTransport>, policy: RetryPolicy, sink: RunEventSink) -> Self {
        Self {
            transport,
            policy,
            state: RunState::new(sink.run_id().clone()),
            sink,
        }
    }

    pub const fn state(&self) -> &RunState {
        &self.state
    }

    pub const fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    pub const fn sink(&self) -> &RunEventSink {
        &self.sink
    }

    fn next_batch(&mut self, rows: Vec<WireRow>, metadata: BatchMetadata) -> Batch {
        Batch::new(self.state.next_sequence(), rows, metadata)
    }

    /// One initial attempt plus the policy's retries. Returns the last result
    /// and the number of attempts made.
    async fn send_with_retry(&self, batch: &Batch) -> (Result<IngestResponse, DeliveryError>, u32) {
        let payload = batch.payload();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match timeout(self.policy.request_timeout, self.transport.post_batch(&payload)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(self.policy.request_timeout)),
            };

            let err = match result {
                Ok(response) => return (Ok(response), attempts),
                Err(err) => err,
            };

            let Some(delay) = self.policy.delays.get(attempts as usize - 1).copied() else {
                return (Err(err), attempts);
            };
            warn!("   ⚠️ Failed: {}", err);
            warn!(
                "   🔄 Retry {}/{} in {}s...",
                attempts,
                self.policy.delays.len(),
                delay.as_secs_f64()
            );
            sleep(delay).await;
        }
    }

    /// Sends `rows` as the run's next batch and blocks until it is classified.
    ///
    /// SUCCESS and PARTIAL return the outcome; FAILED is recorded and then
    /// returned as [`PipelineError::BatchFailed`], which aborts the run.
    pub async fn verify_and_send(
        &mut self,
        rows: Vec<WireRow>,
        metadata: BatchMetadata,
    ) -> Result<DeliveryOutcome, PipelineError> {
        let batch = self.next_batch(rows, metadata);
        let sequence = batch.sequence();
        let sent = batch.len() as u64;
        let started = Instant::now();

        self.sink.log(format!(
            "🔒 HALTING CRAWLER: Sending batch #{} ({} records)...",
            sequence, sent
        ));
        self.sink.emit(RunEvent::BatchStart {
            batch_number: sequence,
            record_count: batch.len(),
            message: format!("Sending batch #{} ({} records)", sequence, sent),
        });

        let (result, attempts) = self.send_with_retry(&batch).await;
        let elapsed = started.elapsed();
        let duration = format!("{:.2}s", elapsed.as_secs_f64());

        let (saved, failure) = match result {
            Ok(response) => {
                let saved = response.saved_count();
                let failure = (classify_outcome(sent, saved) == DeliveryStatus::Failed)
                    .then(|| DeliveryError::Unsuccessful(format!("server saved 0 of {} records", sent)));
                (saved, failure)
            }
            Err(err) => (0, Some(err)),
        };

        let status = if failure.is_some() {
            DeliveryStatus::Failed
        } else {
            classify_outcome(sent, saved)
        };
        let outcome = DeliveryOutcome {
            sequence,
            status,
            sent_count: sent,
            saved_count: saved,
            error: failure.as_ref().map(ToString::to_string),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        };
        self.state.record(outcome.clone());

        match (status, failure) {
            (_, Some(err)) => {
                error!("   ❌ BATCH #{} FAILED: {}", sequence, err);
                error!("   ⚠️ {} records NOT saved - Manual intervention required", sent);
                self.sink.emit(RunEvent::BatchFailed {
                    batch_number: sequence,
                    error: err.to_string(),
                });
                Err(PipelineError::BatchFailed {
                    sequence,
                    attempts,
                    source: err,
                    state: Box::new(self.state.clone()),
                })
            }
            (DeliveryStatus::Partial, None) => {
                let failed = outcome.deficit();
                self.sink.log(format!(
                    "⚠️ BATCH #{} PARTIALLY SENT: {}/{} records saved ({} failed, {})",
                    sequence, saved, sent, failed, duration
                ));
                self.sink.emit(RunEvent::BatchPartial {
                    batch_number: sequence,
                    saved_count: saved,
                    expected_count: sent,
                    failed,
                    duration,
                    message: format!("Batch #{} partially sent: {}/{}", sequence, saved, sent),
                });
                Ok(outcome)
            }
            (_, None) => {
                if saved > sent {
                    warn!("   ⚠️ Server reported {} saved for {} sent records", saved, sent);
                }
                info!("   ⏱️  Duration: {}", duration);
                self.sink.log(format!(
                    "✅ BATCH #{} FULLY SENT: {}/{} records saved",
                    sequence, saved, sent
                ));
                self.sink.emit(RunEvent::BatchComplete {
                    batch_number: sequence,
                    saved_count: saved,
                    expected_count: sent,
                    duration,
                    message: format!("Batch #{} fully sent: {}/{}", sequence, saved, sent),
                });
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchPayload, PhaseOneStatus, PhaseTwoStatus, RunId, UpdateMode};
    use crate::domain::batch::IngestSummary;
    use crate::infrastructure::run_broadcaster::RunBroadcaster;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses and records when each call arrived.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<IngestResponse, DeliveryError>>>,
        calls: Mutex<Vec<Instant>>,
        hang: bool,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<IngestResponse, DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
                hang: false,
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                hang: true,
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchTransport for ScriptedTransport {
        async fn post_batch(&self, _payload: &BatchPayload<'_>) -> Result<IngestResponse, DeliveryError> {
            self.calls.lock().unwrap().push(Instant::now());
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(DeliveryError::Transport("no scripted response".into())))
        }
    }

    fn saved(n: u64) -> Result<IngestResponse, DeliveryError> {
        Ok(IngestResponse {
            success: true,
            summary: Some(IngestSummary { berhasil: n }),
            error: None,
        })
    }

    fn rows(n: usize) -> Vec<WireRow> {
        (0..n)
            .map(|i| WireRow {
                area: "BANDUNG".into(),
                month: "JUL".into(),
                id: i.to_string(),
                name: format!("B{i}"),
                kind: "T".into(),
                period_1_20: PhaseOneStatus::Open,
                period_21_30: PhaseTwoStatus::Unchecked,
            })
            .collect()
    }

    fn metadata() -> BatchMetadata {
        BatchMetadata {
            area: "BANDUNG".into(),
            update_mode: UpdateMode::PhaseOneOnly,
            month: None,
            year: 2025,
        }
    }

    fn client(transport: Arc<dyn BatchTransport>) -> (DeliveryClient, crate::infrastructure::RunSubscription) {
        let broadcaster = RunBroadcaster::new();
        let run = RunId::from("run_delivery");
        let sub = broadcaster.subscribe(&run);
        let sink = RunEventSink::new(run, broadcaster);
        (DeliveryClient::new(transport, RetryPolicy::default(), sink), sub)
    }

    fn drain(sub: &mut crate::infrastructure::RunSubscription) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Some(event) = sub.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[test]
    fn default_policy_is_one_plus_three() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn full_save_is_success() {
        let transport = ScriptedTransport::new(vec![saved(50)]);
        let (mut client, mut sub) = client(transport.clone());

        let outcome = client.verify_and_send(rows(50), metadata()).await.unwrap();

        assert_eq!(outcome.status, DeliveryStatus::Success);
        assert_eq!(client.state().total_sent, 50);
        assert_eq!(transport.call_times().len(), 1);
        let kinds = drain(&mut sub);
        assert!(kinds.contains(&"batch_start"));
        assert!(kinds.contains(&"batch_complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_save_continues_and_counts_deficit() {
        let (mut client, mut sub) = client(ScriptedTransport::new(vec![saved(30)]));

        let outcome = client.verify_and_send(rows(50), metadata()).await.unwrap();

        assert_eq!(outcome.status, DeliveryStatus::Partial);
        assert_eq!(client.state().total_sent, 30);
        assert_eq!(client.state().total_failed, 20);
        assert!(drain(&mut sub).contains(&"batch_partial"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_follow_backoff_schedule_then_fail() {
        let transport = ScriptedTransport::new(vec![
            Err(DeliveryError::Rejected { status: 500, message: "a".into() }),
            Err(DeliveryError::Rejected { status: 500, message: "b".into() }),
            Err(DeliveryError::Rejected { status: 500, message: "c".into() }),
            Err(DeliveryError::Rejected { status: 500, message: "d".into() }),
        ]);
        let (mut client, mut sub) = client(transport.clone());

        let err = client.verify_and_send(rows(10), metadata()).await.unwrap_err();

        assert!(matches!(err, PipelineError::BatchFailed { sequence: 1, attempts: 4, .. }));
        let calls = transport.call_times();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(4));
        assert_eq!(calls[3] - calls[2], Duration::from_secs(8));

        let state = client.state();
        assert_eq!(state.total_failed, 10);
        assert_eq!(state.ledger.last().unwrap().status, DeliveryStatus::Failed);
        assert!(drain(&mut sub).contains(&"batch_failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_success() {
        let transport = ScriptedTransport::new(vec![
            Err(DeliveryError::Transport("reset".into())),
            saved(5),
        ]);
        let (mut client, _sub) = client(transport.clone());

        let outcome = client.verify_and_send(rows(5), metadata()).await.unwrap();

        assert_eq!(outcome.status, DeliveryStatus::Success);
        assert_eq!(transport.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out_per_attempt() {
        let transport = ScriptedTransport::hanging();
        let (mut client, _sub) = client(transport.clone());

        let started = Instant::now();
        let err = client.verify_and_send(rows(3), metadata()).await.unwrap_err();

        match err {
            PipelineError::BatchFailed { source, .. } => {
                assert_eq!(source, DeliveryError::Timeout(Duration::from_secs(30)));
            }
            other => panic!("unexpected {other:?}"),
        }
        // 4 x 30s timeouts + 2s + 4s + 8s backoff
        assert_eq!(started.elapsed().as_secs(), 134);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_saved_on_success_response_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![saved(0)]);
        let (mut client, _sub) = client(transport.clone());

        let err = client.verify_and_send(rows(4), metadata()).await.unwrap_err();

        assert!(err.is_delivery_failure());
        assert_eq!(transport.call_times().len(), 1);
        assert_eq!(client.state().total_failed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn sequences_increase_across_batches() {
        let (mut client, _sub) = client(ScriptedTransport::new(vec![saved(2), saved(2), saved(1)]));

        let a = client.verify_and_send(rows(2), metadata()).await.unwrap();
        let b = client.verify_and_send(rows(2), metadata()).await.unwrap();
        let c = client.verify_and_send(rows(1), metadata()).await.unwrap();

        assert_eq!((a.sequence, b.sequence, c.sequence), (1, 2, 3));
        assert_eq!(client.state().ledger.len(), 3);
    }
}
