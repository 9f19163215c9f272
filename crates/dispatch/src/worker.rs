//! Per-account worker: drains one bucket in sequential batches with the
//! sends of a batch running concurrently.

use crate::control::DispatchControl;
use crate::partition::AccountBucket;
use crate::rate::DelaySchedule;
use crate::scheduler::Scheduler;
use crate::test_email::TestEmailTrigger;
use campaign_core::{AccountKey, PreparedEmail, SendResult};
use campaign_transport::Transport;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const CANCELLED_ERROR: &str = "Dispatch cancelled before send";

/// Message from a worker to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Result(SendResult),
    BatchComplete {
        account_key: AccountKey,
        batch_index: usize,
    },
}

pub struct AccountWorker {
    worker_index: usize,
    bucket: AccountBucket,
    schedule: DelaySchedule,
    /// `None` when no transport is registered for the bucket's type.
    transport: Option<Arc<dyn Transport>>,
    scheduler: Arc<dyn Scheduler>,
    control: DispatchControl,
    events: mpsc::Sender<WorkerEvent>,
    test_email: Option<Arc<TestEmailTrigger>>,
}

impl AccountWorker {
    pub fn new(
        worker_index: usize,
        bucket: AccountBucket,
        schedule: DelaySchedule,
        transport: Option<Arc<dyn Transport>>,
        scheduler: Arc<dyn Scheduler>,
        control: DispatchControl,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            worker_index,
            bucket,
            schedule,
            transport,
            scheduler,
            control,
            events,
            test_email: None,
        }
    }

    /// Share the run's monitoring-copy counter with this worker.
    pub fn with_test_email(mut self, trigger: Option<Arc<TestEmailTrigger>>) -> Self {
        self.test_email = trigger;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process every email of the bucket, emitting one result per email
    /// and one `BatchComplete` per finished batch.
    pub async fn run(self) {
        let batch_size = self.schedule.batch_size();
        let emails = &self.bucket.emails;

        if self.transport.is_none() {
            warn!(
                account_key = %self.bucket.key,
                account_type = %self.bucket.account_type,
                "No transport registered for account type"
            );
        }
        info!(
            account_key = %self.bucket.key,
            worker_index = self.worker_index,
            emails = emails.len(),
            "Account worker started"
        );

        for (batch_index, batch) in emails.chunks(batch_size).enumerate() {
            if self.control.is_paused() && !self.control.is_cancelled() {
                info!(
                    account_key = %self.bucket.key,
                    batch_index,
                    "Dispatch paused, holding next batch"
                );
            }
            if !self.control.proceed().await {
                let remaining = &emails[batch_index * batch_size..];
                info!(
                    account_key = %self.bucket.key,
                    batch_index,
                    remaining = remaining.len(),
                    "Dispatch cancelled, skipping remaining emails"
                );
                for email in remaining {
                    let skipped = SendResult::failed(email, CANCELLED_ERROR);
                    if !self.emit(WorkerEvent::Result(skipped)).await {
                        return;
                    }
                }
                return;
            }

            let sends = batch
                .iter()
                .enumerate()
                .map(|(index_in_batch, email)| self.send_one(index_in_batch, email));
            let results = join_all(sends).await;
            let test_copies_due = self.test_copies_due(batch, &results);

            for result in results {
                if !self.emit(WorkerEvent::Result(result)).await {
                    return;
                }
            }
            for email in test_copies_due {
                self.send_test_copy(email).await;
            }
            let tick = WorkerEvent::BatchComplete {
                account_key: self.bucket.key.clone(),
                batch_index,
            };
            if !self.emit(tick).await {
                return;
            }
            debug!(account_key = %self.bucket.key, batch_index, "Batch complete");
        }

        info!(account_key = %self.bucket.key, "Account worker finished");
    }

    async fn send_one(&self, index_in_batch: usize, email: &PreparedEmail) -> SendResult {
        let Some(transport) = &self.transport else {
            return SendResult::failed(
                email,
                format!("Unsupported account type: {}", email.account_type),
            );
        };

        self.scheduler
            .sleep(self.schedule.send_delay(self.worker_index, index_in_batch))
            .await;

        let account_type = email.account_type.clone();
        let outcome = AssertUnwindSafe(transport.send(email)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {
                metrics::counter!("dispatch.emails_sent", "account_type" => account_type)
                    .increment(1);
                SendResult::sent(email)
            }
            Ok(Err(e)) => {
                metrics::counter!("dispatch.emails_failed", "account_type" => account_type)
                    .increment(1);
                debug!(
                    account_key = %self.bucket.key,
                    to = %email.recipient,
                    error = %e,
                    "Send failed"
                );
                SendResult::failed(email, e.to_string())
            }
            Err(panic) => {
                metrics::counter!("dispatch.emails_failed", "account_type" => account_type)
                    .increment(1);
                let message = panic_message(panic.as_ref());
                warn!(
                    account_key = %self.bucket.key,
                    to = %email.recipient,
                    error = %message,
                    "Transport panicked"
                );
                SendResult::failed(email, format!("Transport panicked: {message}"))
            }
        }
    }

    fn test_copies_due<'b>(
        &self,
        batch: &'b [PreparedEmail],
        results: &[SendResult],
    ) -> Vec<&'b PreparedEmail> {
        let Some(trigger) = &self.test_email else {
            return Vec::new();
        };
        let mut due = Vec::new();
        for (email, result) in batch.iter().zip(results) {
            if result.success && trigger.record_success() {
                due.push(email);
            }
        }
        due
    }

    /// Send a monitoring copy of `email`. The outcome is logged only and
    /// never counted as a campaign result.
    async fn send_test_copy(&self, email: &PreparedEmail) {
        let (Some(trigger), Some(transport)) = (&self.test_email, &self.transport) else {
            return;
        };
        let copy = trigger.test_copy(email);
        let outcome = AssertUnwindSafe(transport.send(&copy)).catch_unwind().await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("Transport panicked: {}", panic_message(panic.as_ref()))),
        };
        match error {
            None => {
                metrics::counter!("dispatch.test_emails", "outcome" => "sent").increment(1);
                info!(
                    account_key = %self.bucket.key,
                    to = %trigger.recipient(),
                    based_on = %email.recipient,
                    "Test email sent"
                );
            }
            Some(error) => {
                metrics::counter!("dispatch.test_emails", "outcome" => "failed").increment(1);
                warn!(
                    account_key = %self.bucket.key,
                    to = %trigger.recipient(),
                    error = %error,
                    "Test email failed"
                );
            }
        }
    }

    /// Returns `false` once the coordinator has gone away.
    async fn emit(&self, event: WorkerEvent) -> bool {
        if self.events.send(event).await.is_err() {
            warn!(account_key = %self.bucket.key, "Result channel closed, stopping worker");
            return false;
        }
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
