//! End-to-end dispatch runs against in-memory transports and stores.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use campaign_core::config::DispatchConfig;
use campaign_core::{
    CampaignError, CampaignProgress, CampaignResult, CampaignStatus, DispatchRequest,
    InMemoryProgressStore, PreparedEmail, ProgressStore, RateUnit, TestEmailSettings,
};
use campaign_dispatch::{DispatchControl, Dispatcher, RecordingScheduler, CANCELLED_ERROR};
use campaign_transport::testing::RecordingTransport;
use campaign_transport::{Transport, TransportError, TransportRegistry};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn email(account_type: &str, account_id: &str, recipient: &str) -> PreparedEmail {
    PreparedEmail {
        account_type: account_type.into(),
        account_id: account_id.into(),
        account_config: serde_json::Value::Null,
        recipient: recipient.into(),
        from_email: "news@example.com".into(),
        from_name: Some("News".into()),
        subject: "Spring sale".into(),
        html_content: Some("<p>Sale</p>".into()),
        text_content: None,
        headers: BTreeMap::new(),
    }
}

fn request(emails: Vec<PreparedEmail>, batch_size: usize) -> DispatchRequest {
    DispatchRequest {
        campaign_id: "spring-sale".into(),
        prepared_emails: emails,
        rate_limit: Some(3600),
        rate_unit: RateUnit::Hour,
        batch_size: Some(batch_size),
        test_email: None,
    }
}

fn numbered(n: usize) -> Vec<PreparedEmail> {
    (0..n)
        .map(|i| email("smtp", "A", &format!("user{i}@example.com")))
        .collect()
}

fn single_transport_dispatcher(
    transport: Arc<dyn Transport>,
    store: Arc<dyn ProgressStore>,
    config: DispatchConfig,
) -> Dispatcher {
    let registry = TransportRegistry::new().with(transport);
    Dispatcher::new(Arc::new(registry), store, config)
        .with_scheduler(Arc::new(RecordingScheduler::new()))
}

struct Harness {
    smtp: Arc<RecordingTransport>,
    apps_script: Arc<RecordingTransport>,
    store: Arc<InMemoryProgressStore>,
    scheduler: Arc<RecordingScheduler>,
    dispatcher: Dispatcher,
}

fn harness(smtp: RecordingTransport) -> Harness {
    let smtp = Arc::new(smtp);
    let apps_script = Arc::new(RecordingTransport::new("apps-script"));
    let registry = TransportRegistry::new()
        .with(smtp.clone())
        .with(apps_script.clone());
    let store = Arc::new(InMemoryProgressStore::new());
    let scheduler = Arc::new(RecordingScheduler::new());
    let dispatcher = Dispatcher::new(Arc::new(registry), store.clone(), DispatchConfig::default())
        .with_scheduler(scheduler.clone());
    Harness {
        smtp,
        apps_script,
        store,
        scheduler,
        dispatcher,
    }
}

fn three_emails() -> Vec<PreparedEmail> {
    vec![
        email("smtp", "A", "a1@example.com"),
        email("apps-script", "B", "b1@example.com"),
        email("smtp", "A", "a2@example.com"),
    ]
}

#[tokio::test]
async fn test_two_accounts_all_succeed() {
    let h = harness(RecordingTransport::new("smtp"));

    let summary = h.dispatcher.dispatch(request(three_emails(), 10)).await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.campaign_id, "spring-sale");
    assert_eq!(summary.total_sent, 3);
    assert_eq!(summary.total_failed, 0);
    assert_eq!(summary.total_emails, 3);
    assert_eq!(summary.success_rate, 100.0);
    assert_eq!(summary.accounts_used, 2);
    assert_eq!(summary.sample_results.len(), 3);

    assert_eq!(h.smtp.recipients(), vec!["a1@example.com", "a2@example.com"]);
    assert_eq!(h.apps_script.recipients(), vec!["b1@example.com"]);

    let keys: Vec<&str> = summary
        .sample_results
        .iter()
        .map(|r| r.account_key.as_str())
        .collect();
    assert!(keys.contains(&"smtp-A"));
    assert!(keys.contains(&"apps-script-B"));
}

#[tokio::test]
async fn test_failing_recipient_is_reported() {
    let h = harness(RecordingTransport::new("smtp").failing_for("a2@example.com", "550 mailbox unavailable"));

    let summary = h.dispatcher.dispatch(request(three_emails(), 10)).await.unwrap();

    assert_eq!(summary.total_sent, 2);
    assert_eq!(summary.total_failed, 1);
    assert_eq!(summary.success_rate, 66.67);

    let failed: Vec<_> = summary.sample_results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].email, "a2@example.com");
    assert_eq!(failed[0].error.as_deref(), Some("Rejected: 550 mailbox unavailable"));
    assert_eq!(
        h.store.get("spring-sale").unwrap().status,
        CampaignStatus::Completed
    );
}

#[tokio::test]
async fn test_unsupported_account_type_fails_only_its_emails() {
    let h = harness(RecordingTransport::new("smtp"));
    let mut emails = three_emails();
    emails.push(email("carrier-pigeon", "P", "p1@example.com"));

    let summary = h.dispatcher.dispatch(request(emails, 10)).await.unwrap();

    assert_eq!(summary.total_sent, 3);
    assert_eq!(summary.total_failed, 1);
    assert_eq!(summary.accounts_used, 3);
    let failed = summary.sample_results.iter().find(|r| !r.success).unwrap();
    assert_eq!(
        failed.error.as_deref(),
        Some("Unsupported account type: carrier-pigeon")
    );
}

#[tokio::test]
async fn test_empty_request() {
    let h = harness(RecordingTransport::new("smtp"));

    let summary = h.dispatcher.dispatch(request(Vec::new(), 10)).await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.total_sent, 0);
    assert_eq!(summary.total_failed, 0);
    assert_eq!(summary.accounts_used, 0);
    assert_eq!(summary.success_rate, 0.0);
    assert!(summary.sample_results.is_empty());
    assert_eq!(h.smtp.call_count(), 0);
    assert_eq!(h.apps_script.call_count(), 0);
    assert!(h.scheduler.delays().is_empty());
}

#[tokio::test]
async fn test_every_email_gets_exactly_one_result() {
    let h = harness(RecordingTransport::new("smtp").failing_for("user7@example.com", "boom"));
    let emails: Vec<PreparedEmail> = (0..40)
        .map(|i| {
            let (t, id) = if i % 3 == 0 { ("apps-script", "B") } else { ("smtp", "A") };
            email(t, id, &format!("user{i}@example.com"))
        })
        .collect();

    let summary = h.dispatcher.dispatch(request(emails, 4)).await.unwrap();

    assert_eq!(summary.total_sent + summary.total_failed, 40);
    assert_eq!(summary.total_failed, 1);
    assert_eq!(h.smtp.call_count() + h.apps_script.call_count(), 40);
    assert_eq!(h.smtp.unique_recipients().len(), h.smtp.call_count());
    assert!(h.smtp.max_in_flight() <= 4);
    assert!(h.apps_script.max_in_flight() <= 4);
}

#[tokio::test]
async fn test_stagger_delays_follow_schedule() {
    let h = harness(RecordingTransport::new("smtp"));
    let emails = vec![
        email("smtp", "A", "a1@example.com"),
        email("smtp", "A", "a2@example.com"),
        email("smtp", "A", "a3@example.com"),
        email("apps-script", "B", "b1@example.com"),
        email("apps-script", "B", "b2@example.com"),
    ];

    // rate 3600/h -> 1000ms per batch of 2 -> 500ms slots; worker B starts 200ms late
    h.dispatcher.dispatch(request(emails, 2)).await.unwrap();

    let ms = Duration::from_millis;
    assert_eq!(
        h.scheduler.sorted_delays(),
        vec![ms(0), ms(0), ms(200), ms(500), ms(700)]
    );
}

#[tokio::test]
async fn test_progress_written_every_five_batches() {
    let h = harness(RecordingTransport::new("smtp"));
    let emails = (0..12)
        .map(|i| email("smtp", "A", &format!("user{i}@example.com")))
        .collect();

    // 12 batches of one email
    h.dispatcher.dispatch(request(emails, 1)).await.unwrap();

    assert_eq!(h.store.incremental_writes("spring-sale"), 2);
    let progress = h.store.get("spring-sale").unwrap();
    assert_eq!(progress.sent_count, 12);
    assert_eq!(progress.status, CampaignStatus::Completed);
}

#[derive(Default)]
struct FailingStore {
    attempts: AtomicU64,
}

#[async_trait]
impl ProgressStore for FailingStore {
    async fn update_sent_count(&self, _campaign_id: &str, _sent_count: u64) -> CampaignResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CampaignError::Persistence("connection refused".into()))
    }

    async fn finalize(
        &self,
        _campaign_id: &str,
        _sent_count: u64,
        _failed_count: u64,
        _status: CampaignStatus,
    ) -> CampaignResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CampaignError::Persistence("connection refused".into()))
    }
}

#[tokio::test]
async fn test_failing_store_does_not_change_summary() {
    let store = Arc::new(FailingStore::default());
    let registry = TransportRegistry::new().with(Arc::new(RecordingTransport::new("smtp")));
    let dispatcher = Dispatcher::new(Arc::new(registry), store.clone(), DispatchConfig::default())
        .with_scheduler(Arc::new(RecordingScheduler::new()));
    let emails = (0..10)
        .map(|i| email("smtp", "A", &format!("user{i}@example.com")))
        .collect();

    let summary = dispatcher.dispatch(request(emails, 1)).await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.total_sent, 10);
    assert_eq!(summary.total_failed, 0);
    // two incremental writes plus the final one
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_cancelled_dispatch() {
    let h = harness(RecordingTransport::new("smtp"));
    let control = DispatchControl::new();
    control.cancel();

    let summary = h
        .dispatcher
        .dispatch_with_control(request(three_emails(), 10), control)
        .await
        .unwrap();

    assert_eq!(summary.total_sent, 0);
    assert_eq!(summary.total_failed, 3);
    assert!(summary
        .sample_results
        .iter()
        .all(|r| r.error.as_deref() == Some(CANCELLED_ERROR)));
    assert_eq!(h.smtp.call_count(), 0);
    assert_eq!(
        h.store.get("spring-sale").unwrap().status,
        CampaignStatus::Cancelled
    );
}

/// Trips the run's control when the `trip_on`-th send starts.
struct CancellingTransport {
    control: DispatchControl,
    trip_on: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for CancellingTransport {
    fn account_type(&self) -> &str {
        "smtp"
    }

    async fn send(&self, _email: &PreparedEmail) -> Result<(), TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.trip_on {
            self.control.cancel();
        }
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_cancel_mid_run_skips_later_batches() {
    let control = DispatchControl::new();
    let transport = Arc::new(CancellingTransport {
        control: control.clone(),
        trip_on: 1,
        calls: AtomicUsize::new(0),
    });
    let store = Arc::new(InMemoryProgressStore::new());
    let dispatcher =
        single_transport_dispatcher(transport.clone(), store.clone(), DispatchConfig::default());

    let summary = dispatcher
        .dispatch_with_control(request(numbered(6), 2), control)
        .await
        .unwrap();

    // batch 0 was already issued and completes; batches 1 and 2 are skipped
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.total_sent, 2);
    assert_eq!(summary.total_failed, 4);
    assert_eq!(summary.total_sent + summary.total_failed, 6);
    let cancelled = summary
        .sample_results
        .iter()
        .filter(|r| r.error.as_deref() == Some(CANCELLED_ERROR))
        .count();
    assert_eq!(cancelled, 3);
    assert_eq!(store.get("spring-sale").unwrap().status, CampaignStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_after_last_batch_still_completes() {
    let control = DispatchControl::new();
    let transport = Arc::new(CancellingTransport {
        control: control.clone(),
        trip_on: 3,
        calls: AtomicUsize::new(0),
    });
    let store = Arc::new(InMemoryProgressStore::new());
    let dispatcher =
        single_transport_dispatcher(transport, store.clone(), DispatchConfig::default());

    let summary = dispatcher
        .dispatch_with_control(request(numbered(4), 2), control)
        .await
        .unwrap();

    assert_eq!(summary.total_sent, 4);
    assert_eq!(summary.total_failed, 0);
    assert_eq!(store.get("spring-sale").unwrap().status, CampaignStatus::Completed);
}

/// Records when each send starts and finishes.
#[derive(Default)]
struct TimelineTransport {
    timeline: Mutex<Vec<(usize, &'static str)>>,
}

impl TimelineTransport {
    fn mark(&self, email: &PreparedEmail, what: &'static str) {
        let index = email
            .recipient
            .trim_start_matches("user")
            .split('@')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap();
        self.timeline.lock().unwrap().push((index, what));
    }
}

#[async_trait]
impl Transport for TimelineTransport {
    fn account_type(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &PreparedEmail) -> Result<(), TransportError> {
        self.mark(email, "start");
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.mark(email, "end");
        Ok(())
    }
}

#[tokio::test]
async fn test_batches_of_one_account_never_overlap() {
    let transport = Arc::new(TimelineTransport::default());
    let store = Arc::new(InMemoryProgressStore::new());
    let dispatcher =
        single_transport_dispatcher(transport.clone(), store, DispatchConfig::default());

    dispatcher.dispatch(request(numbered(9), 3)).await.unwrap();

    let timeline = transport.timeline.lock().unwrap().clone();
    assert_eq!(timeline.len(), 18);
    let position = |index: usize, what: &str| {
        timeline
            .iter()
            .position(|&(i, w)| i == index && w == what)
            .unwrap()
    };
    for batch in 0..3 {
        let members = batch * 3..batch * 3 + 3;
        let last_end = members.clone().map(|i| position(i, "end")).max().unwrap();
        let first_end = members.clone().map(|i| position(i, "end")).min().unwrap();
        let last_start = members.clone().map(|i| position(i, "start")).max().unwrap();
        // sends of a batch are in flight together
        assert!(last_start < first_end);
        if batch < 2 {
            let next_first_start = (batch * 3 + 3..batch * 3 + 6)
                .map(|i| position(i, "start"))
                .min()
                .unwrap();
            assert!(last_end < next_first_start, "batch {batch} overlaps the next one");
        }
    }
}

#[tokio::test]
async fn test_dropped_caller_does_not_abandon_the_run() {
    let smtp = Arc::new(RecordingTransport::new("smtp").with_latency(Duration::from_millis(20)));
    let store = Arc::new(InMemoryProgressStore::new());
    let dispatcher =
        single_transport_dispatcher(smtp.clone(), store.clone(), DispatchConfig::default());

    let call = dispatcher.dispatch(request(numbered(20), 5));
    let abandoned = tokio::time::timeout(Duration::from_millis(30), call).await;
    assert!(abandoned.is_err());

    let progress = wait_for_final(&store, "spring-sale").await;
    assert_eq!(progress.sent_count, 20);
    assert_eq!(progress.failed_count, 0);
    assert_eq!(progress.status, CampaignStatus::Completed);
    assert_eq!(smtp.call_count(), 20);
}

async fn wait_for_final(store: &InMemoryProgressStore, campaign_id: &str) -> CampaignProgress {
    for _ in 0..300 {
        if let Some(progress) = store.get(campaign_id) {
            if progress.status.is_terminal() {
                return progress;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("campaign {campaign_id} was never finalized");
}

struct StalledStore;

#[async_trait]
impl ProgressStore for StalledStore {
    async fn update_sent_count(&self, _campaign_id: &str, _sent_count: u64) -> CampaignResult<()> {
        std::future::pending().await
    }

    async fn finalize(
        &self,
        _campaign_id: &str,
        _sent_count: u64,
        _failed_count: u64,
        _status: CampaignStatus,
    ) -> CampaignResult<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_store_does_not_block_dispatch() {
    let config = DispatchConfig {
        progress_write_timeout_ms: 20,
        ..DispatchConfig::default()
    };
    let dispatcher = single_transport_dispatcher(
        Arc::new(RecordingTransport::new("smtp")),
        Arc::new(StalledStore),
        config,
    );

    let summary = tokio::time::timeout(
        Duration::from_secs(3),
        dispatcher.dispatch(request(numbered(10), 1)),
    )
    .await
    .expect("dispatch should finish despite the stalled store")
    .unwrap();

    assert_eq!(summary.total_sent, 10);
    assert_eq!(summary.total_failed, 0);
}

#[tokio::test]
async fn test_paused_dispatch_resumes() {
    let smtp = Arc::new(RecordingTransport::new("smtp"));
    let store = Arc::new(InMemoryProgressStore::new());
    let dispatcher =
        single_transport_dispatcher(smtp.clone(), store.clone(), DispatchConfig::default());
    let control = DispatchControl::new();
    control.pause();

    let run = tokio::spawn({
        let control = control.clone();
        async move {
            dispatcher
                .dispatch_with_control(request(numbered(4), 2), control)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(smtp.call_count(), 0);
    assert!(!run.is_finished());

    control.resume();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.total_sent, 4);
    assert_eq!(smtp.call_count(), 4);
    assert_eq!(store.get("spring-sale").unwrap().status, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_monitoring_copies_are_not_counted_as_results() {
    let h = harness(RecordingTransport::new("smtp"));
    let mut emails = three_emails();
    emails.extend([
        email("smtp", "A", "a3@example.com"),
        email("apps-script", "B", "b2@example.com"),
        email("apps-script", "B", "b3@example.com"),
    ]);
    let mut req = request(emails, 10);
    req.test_email = Some(TestEmailSettings {
        recipient: "qa@example.com".into(),
        after_every: 2,
    });

    let summary = h.dispatcher.dispatch(req).await.unwrap();

    assert_eq!(summary.total_sent, 6);
    assert_eq!(summary.total_emails, 6);
    let copies: usize = [&h.smtp, &h.apps_script]
        .iter()
        .map(|t| t.recipients().iter().filter(|r| *r == "qa@example.com").count())
        .sum();
    assert_eq!(copies, 3);
    assert_eq!(h.smtp.call_count() + h.apps_script.call_count(), 9);
}
