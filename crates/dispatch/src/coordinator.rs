//! Dispatch coordinator: validates a request, starts one worker per
//! sending account and folds their results into a [`DispatchSummary`].

use crate::control::DispatchControl;
use crate::partition::partition;
use crate::rate::{DelaySchedule, RateLimiter};
use crate::reporter::ProgressReporter;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::test_email::TestEmailTrigger;
use crate::worker::{AccountWorker, WorkerEvent, CANCELLED_ERROR};
use campaign_core::config::DispatchConfig;
use campaign_core::{
    CampaignError, CampaignResult, CampaignRunState, CampaignStatus, DispatchRequest,
    DispatchSummary, ProgressStore, RateUnit, SendResult,
};
use campaign_transport::TransportRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const MS_PER_HOUR: u128 = 3_600_000;

/// Runs bulk dispatches against a fixed set of transports.
pub struct Dispatcher {
    registry: Arc<TransportRegistry>,
    store: Arc<dyn ProgressStore>,
    scheduler: Arc<dyn Scheduler>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TransportRegistry>,
        store: Arc<dyn ProgressStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            store,
            scheduler: Arc::new(TokioScheduler),
            config,
        }
    }

    /// Replace the timer, e.g. with a `RecordingScheduler` in tests.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> CampaignResult<DispatchSummary> {
        self.dispatch_with_control(request, DispatchControl::new())
            .await
    }

    /// Send every prepared email of `request` and report the outcome.
    ///
    /// Only request validation fails the call. Per-email problems end up
    /// as failed results, and progress writes are best effort. `control`
    /// pauses the run between batches or cancels it; cancelled emails are
    /// reported as failures.
    ///
    /// The run lives on its own task. Dropping the returned future does not
    /// abandon it: every result is still counted and the final progress is
    /// still written.
    pub async fn dispatch_with_control(
        &self,
        request: DispatchRequest,
        control: DispatchControl,
    ) -> CampaignResult<DispatchSummary> {
        request.validate(&self.config)?;

        let campaign_id = request.campaign_id.clone();
        let run = DispatchRun {
            registry: self.registry.clone(),
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            config: self.config.clone(),
        };
        tokio::spawn(run.execute(request, control))
            .await
            .map_err(|e| {
                error!(campaign_id = %campaign_id, error = %e, "Dispatch task failed");
                CampaignError::Internal(e.into())
            })
    }
}

/// Everything one validated dispatch needs, owned so it can run detached.
struct DispatchRun {
    registry: Arc<TransportRegistry>,
    store: Arc<dyn ProgressStore>,
    scheduler: Arc<dyn Scheduler>,
    config: DispatchConfig,
}

impl DispatchRun {
    async fn execute(self, request: DispatchRequest, control: DispatchControl) -> DispatchSummary {
        let started = self.scheduler.now();
        let rate = request.rate_limit_or_default(&self.config);
        let target_rate = request.target_emails_per_hour(&self.config);
        let batch_size = request.batch_size_or_default(&self.config);
        let total_emails = request.prepared_emails.len() as u64;
        let DispatchRequest {
            campaign_id,
            prepared_emails,
            rate_unit,
            test_email,
            ..
        } = request;

        if prepared_emails.is_empty() {
            info!(campaign_id = %campaign_id, "Dispatch requested with no emails");
            return DispatchSummary {
                success: true,
                campaign_id,
                total_sent: 0,
                total_failed: 0,
                total_emails: 0,
                success_rate: 0.0,
                actual_emails_per_hour: 0,
                target_emails_per_hour: target_rate,
                accounts_used: 0,
                execution_time_ms: 0,
                sample_results: Vec::new(),
            };
        }

        let limiter = RateLimiter::from_config(&self.config);
        let rate_delay = match rate_unit {
            RateUnit::Hour => limiter.delay_per_hour(rate),
            RateUnit::Second => limiter.delay_per_second(rate),
        };
        let schedule = DelaySchedule::new(
            rate_delay,
            batch_size,
            Duration::from_millis(self.config.worker_stagger_ms),
        );
        let test_email = test_email.and_then(TestEmailTrigger::new).map(Arc::new);
        let buckets = partition(prepared_emails);
        let accounts_used = buckets.len();

        info!(
            campaign_id = %campaign_id,
            emails = total_emails,
            accounts = accounts_used,
            target_per_hour = target_rate,
            batch_size,
            delay_ms = rate_delay.as_millis() as u64,
            "Starting dispatch"
        );

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handles: Vec<_> = buckets
            .into_iter()
            .enumerate()
            .map(|(worker_index, bucket)| {
                let transport = self.registry.get(&bucket.account_type);
                AccountWorker::new(
                    worker_index,
                    bucket,
                    schedule,
                    transport,
                    self.scheduler.clone(),
                    control.clone(),
                    tx.clone(),
                )
                .with_test_email(test_email.clone())
                .spawn()
            })
            .collect();
        drop(tx);

        let mut state = CampaignRunState::new(campaign_id.clone(), total_emails);
        let mut skipped: u64 = 0;
        let mut samples: Vec<SendResult> = Vec::with_capacity(self.config.sample_size);
        let mut reporter = ProgressReporter::new(
            self.store.clone(),
            campaign_id.clone(),
            self.config.progress_every_batches,
            Duration::from_millis(self.config.progress_write_timeout_ms),
        );

        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Result(result) => {
                    state.record(&result);
                    if result.error.as_deref() == Some(CANCELLED_ERROR) {
                        skipped += 1;
                    }
                    if samples.len() < self.config.sample_size {
                        samples.push(result);
                    }
                }
                WorkerEvent::BatchComplete { .. } => {
                    reporter.batch_completed(state.total_sent).await;
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(campaign_id = %campaign_id, error = %e, "Account worker task failed");
            }
        }
        if state.processed() != total_emails {
            error!(
                campaign_id = %campaign_id,
                processed = state.processed(),
                expected = total_emails,
                "Dispatch finished with missing results"
            );
        }

        let status = CampaignStatus::terminal(state.total_sent, state.total_failed, skipped > 0);
        reporter
            .finalize(state.total_sent, state.total_failed, status)
            .await;

        let elapsed = self.scheduler.now().saturating_duration_since(started);
        let elapsed_ms = elapsed.as_millis().max(1);
        let actual_per_hour = u128::from(state.processed()) * MS_PER_HOUR / elapsed_ms;
        metrics::histogram!("dispatch.duration_ms").record(elapsed_ms as f64);

        info!(
            campaign_id = %campaign_id,
            sent = state.total_sent,
            failed = state.total_failed,
            skipped,
            status = ?status,
            elapsed_ms = elapsed_ms as u64,
            "Dispatch finished"
        );

        DispatchSummary {
            success: true,
            success_rate: state.success_rate(),
            total_sent: state.total_sent,
            total_failed: state.total_failed,
            total_emails,
            actual_emails_per_hour: u64::try_from(actual_per_hour).unwrap_or(u64::MAX),
            target_emails_per_hour: target_rate,
            accounts_used,
            execution_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            sample_results: samples,
            campaign_id,
        }
    }
}
