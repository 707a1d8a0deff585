// tests/node_upload_job.rs

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use snapd::config::{NodeSpec, NotificationConfig, NotificationTarget};
use snapd::errors::StoreResult;
use snapd::jobs::{JobOutcome, NodeUploadJob, NotificationDispatcher};
use snapd::notification::{NotificationPayload, NotificationRegistry};
use snapd::protocol::ProtocolRegistry;
use snapd::store::{ProgressPoint, SqliteStore, Store};
use snapd::types::{NotificationEvent, TriggerType};
use snapd::upload::{NewUpload, UploadManager, UploadPatch, UploadRecord};
use snapd_test_utils::builders::{InfoOutput, NodeSpecBuilder};
use snapd_test_utils::fake_runner::{Reply, ScriptedRunner};
use snapd_test_utils::fakes::{FailingMetrics, RecordingNotifier, StaticMetrics};
use snapd_test_utils::{init_tracing, memory_store};

type TestResult = Result<(), Box<dyn Error>>;

const HOOK: &str = "https://hooks.example/discord";

struct Harness {
    runner: Arc<ScriptedRunner>,
    store: Arc<SqliteStore>,
    recorder: Arc<RecordingNotifier>,
    protocols: Arc<ProtocolRegistry>,
    dispatcher: NotificationDispatcher,
}

impl Harness {
    fn job(&self, node: NodeSpec, store: Arc<dyn Store>) -> NodeUploadJob {
        let manager = UploadManager::new(self.runner.clone(), store, "bv");
        NodeUploadJob::new(
            node,
            Arc::new(manager),
            self.protocols.clone(),
            self.dispatcher.clone(),
        )
    }

    fn job_for(&self, node: NodeSpec) -> NodeUploadJob {
        self.job(node, self.store.clone())
    }
}

async fn harness(protocols: ProtocolRegistry) -> Result<Harness, Box<dyn Error>> {
    init_tracing();
    let recorder = Arc::new(RecordingNotifier::new("discord"));
    let mut notifiers = NotificationRegistry::new();
    notifiers.register(recorder.clone())?;
    Ok(Harness {
        runner: Arc::new(ScriptedRunner::new()),
        store: memory_store().await,
        recorder,
        protocols: Arc::new(protocols),
        dispatcher: NotificationDispatcher::new(Arc::new(notifiers)),
    })
}

fn ethereum_metrics() -> Result<ProtocolRegistry, Box<dyn Error>> {
    let mut protocols = ProtocolRegistry::new();
    protocols.register(Arc::new(
        StaticMetrics::new("ethereum")
            .with("latest_block", 21_000_000)
            .with("latest_slot", 9_300_000),
    ))?;
    Ok(protocols)
}

fn node(name: &str) -> NodeSpec {
    NodeSpecBuilder::new(name)
        .schedule("0 0 3 * * *")
        .notify_all("discord", HOOK)
        .build()
}

#[tokio::test]
async fn scheduled_tick_starts_upload_with_metrics() -> TestResult {
    let h = harness(ethereum_metrics()?).await?;
    h.runner.on_info("ethereum-mainnet", Reply::no_job());
    h.runner.on_start("ethereum-mainnet", Reply::stdout(""));

    let job = h.job_for(node("ethereum-mainnet"));
    let outcome = job.execute(&CancellationToken::new()).await?;
    let JobOutcome::Initiated(id) = outcome else {
        return Err(format!("expected an upload, got {outcome:?}").into());
    };

    let row = h.store.get_upload(id).await?.ok_or("row missing")?;
    assert_eq!(row.trigger_type, TriggerType::Scheduled);
    assert_eq!(
        serde_json::Value::Object(row.protocol_data),
        json!({"latest_block": 21_000_000, "latest_slot": 9_300_000})
    );
    assert_eq!(
        h.runner.calls(),
        vec![
            "bv node job ethereum-mainnet info upload".to_string(),
            "bv node run upload ethereum-mainnet".to_string(),
        ]
    );
    // Completion is reported by the monitor, not here.
    assert!(h.recorder.payloads().is_empty());
    Ok(())
}

#[tokio::test]
async fn running_row_means_skip_without_tool_calls() -> TestResult {
    let mut protocols = ProtocolRegistry::new();
    protocols.register(Arc::new(StaticMetrics::new("arbitrum")))?;
    let h = harness(protocols).await?;
    let spec = NodeSpecBuilder::new("arbitrum-one")
        .protocol("arbitrum")
        .notify_all("discord", HOOK)
        .build();

    h.runner.on_info("arbitrum-one", Reply::no_job());
    h.runner.on_start("arbitrum-one", Reply::stdout(""));
    let first = h.job_for(spec.clone()).with_trigger(TriggerType::Manual);
    first.execute(&CancellationToken::new()).await?;
    let calls_before = h.runner.calls().len();

    let outcome = h.job_for(spec).execute(&CancellationToken::new()).await?;
    assert_eq!(outcome, JobOutcome::Skipped);
    assert_eq!(h.runner.calls().len(), calls_before);
    assert_eq!(h.store.get_all_running().await?.len(), 1);

    assert_eq!(h.recorder.events(), vec![NotificationEvent::Skip]);
    assert_eq!(h.recorder.urls(), vec![HOOK.to_string()]);
    assert_eq!(h.recorder.payloads()[0].node_name, "arbitrum-one");
    Ok(())
}

#[tokio::test]
async fn manual_trigger_is_recorded() -> TestResult {
    let h = harness(ethereum_metrics()?).await?;
    h.runner.on_info("ethereum-mainnet", Reply::stdout(InfoOutput::finished(0, 10)));
    h.runner.on_start("ethereum-mainnet", Reply::stdout(""));

    let job = h
        .job_for(node("ethereum-mainnet"))
        .with_trigger(TriggerType::Manual);
    let JobOutcome::Initiated(id) = job.execute(&CancellationToken::new()).await? else {
        return Err("expected an upload".into());
    };
    let row = h.store.get_upload(id).await?.ok_or("row missing")?;
    assert_eq!(row.trigger_type, TriggerType::Manual);
    Ok(())
}

#[tokio::test]
async fn metric_failure_is_recorded_not_fatal() -> TestResult {
    let mut protocols = ProtocolRegistry::new();
    protocols.register(Arc::new(FailingMetrics::new("ethereum")))?;
    let h = harness(protocols).await?;
    h.runner.on_info("ethereum-mainnet", Reply::no_job());
    h.runner.on_start("ethereum-mainnet", Reply::stdout(""));

    let JobOutcome::Initiated(id) = h
        .job_for(node("ethereum-mainnet"))
        .execute(&CancellationToken::new())
        .await?
    else {
        return Err("expected an upload".into());
    };

    let row = h.store.get_upload(id).await?.ok_or("row missing")?;
    let error = row
        .protocol_data
        .get("error")
        .and_then(|v| v.as_str())
        .ok_or("error key missing")?;
    assert!(error.contains("connection refused"), "{error}");
    Ok(())
}

#[tokio::test]
async fn unknown_protocol_still_uploads() -> TestResult {
    let h = harness(ProtocolRegistry::new()).await?;
    h.runner.on_info("ethereum-mainnet", Reply::no_job());
    h.runner.on_start("ethereum-mainnet", Reply::stdout(""));

    let outcome = h
        .job_for(node("ethereum-mainnet"))
        .execute(&CancellationToken::new())
        .await?;
    let JobOutcome::Initiated(id) = outcome else {
        return Err("expected an upload".into());
    };
    let row = h.store.get_upload(id).await?.ok_or("row missing")?;
    assert!(row.protocol_data.contains_key("error"));
    Ok(())
}

#[tokio::test]
async fn start_failure_notifies_and_fails() -> TestResult {
    let h = harness(ethereum_metrics()?).await?;
    h.runner.on_info("ethereum-mainnet", Reply::no_job());
    h.runner.on_start("ethereum-mainnet", Reply::exit(1, "disk full"));

    let err = h
        .job_for(node("ethereum-mainnet"))
        .execute(&CancellationToken::new())
        .await
        .expect_err("start failed");
    assert!(err.to_string().contains("disk full"));
    assert!(h.store.get_all_running().await?.is_empty());

    let payloads = h.recorder.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].event, NotificationEvent::Failure);
    let detail = payloads[0]
        .details
        .get("error")
        .and_then(|v| v.as_str())
        .ok_or("error detail missing")?;
    assert!(detail.contains("disk full"));
    Ok(())
}

#[tokio::test]
async fn skip_check_failure_notifies_and_fails() -> TestResult {
    let h = harness(ethereum_metrics()?).await?;
    h.runner.on_info("ethereum-mainnet", Reply::exit(2, "permission denied"));

    assert!(
        h.job_for(node("ethereum-mainnet"))
            .execute(&CancellationToken::new())
            .await
            .is_err()
    );
    assert_eq!(h.runner.start_count("ethereum-mainnet"), 0);
    assert_eq!(h.recorder.events(), vec![NotificationEvent::Failure]);
    Ok(())
}

#[tokio::test]
async fn cancelled_tick_is_silent() -> TestResult {
    let h = harness(ethereum_metrics()?).await?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .job_for(node("ethereum-mainnet"))
        .execute(&cancel)
        .await
        .expect_err("cancelled");
    assert!(err.is_cancelled());
    assert!(h.recorder.payloads().is_empty());
    Ok(())
}

/// Store whose running-row lookup never sees anything, so two actors can
/// both get past the skip check.
struct BlindStore(Arc<SqliteStore>);

#[async_trait]
impl Store for BlindStore {
    async fn create_upload(&self, upload: &NewUpload) -> StoreResult<i64> {
        self.0.create_upload(upload).await
    }

    async fn update_upload(&self, patch: &UploadPatch) -> StoreResult<bool> {
        self.0.update_upload(patch).await
    }

    async fn get_upload(&self, id: i64) -> StoreResult<Option<UploadRecord>> {
        self.0.get_upload(id).await
    }

    async fn get_running_for_node(&self, _node_name: &str) -> StoreResult<Option<UploadRecord>> {
        Ok(None)
    }

    async fn get_all_running(&self) -> StoreResult<Vec<UploadRecord>> {
        self.0.get_all_running().await
    }

    async fn get_latest_completed_for_node(
        &self,
        node_name: &str,
    ) -> StoreResult<Option<UploadRecord>> {
        self.0.get_latest_completed_for_node(node_name).await
    }

    async fn progress_history(&self, upload_id: i64) -> StoreResult<Vec<ProgressPoint>> {
        self.0.progress_history(upload_id).await
    }
}

#[tokio::test]
async fn losing_the_race_is_a_skip() -> TestResult {
    let h = harness(ethereum_metrics()?).await?;
    h.runner.on_info("node-x", Reply::no_job());
    h.runner.on_start("node-x", Reply::stdout(""));
    let blind: Arc<dyn Store> = Arc::new(BlindStore(h.store.clone()));

    let first = h.job(node("node-x"), blind.clone());
    let second = h.job(node("node-x"), blind);
    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(first.execute(&cancel), second.execute(&cancel));

    let mut outcomes = vec![a?, b?];
    outcomes.sort_by_key(|o| matches!(o, JobOutcome::Skipped));
    assert!(matches!(outcomes[0], JobOutcome::Initiated(_)));
    assert_eq!(outcomes[1], JobOutcome::Skipped);

    assert_eq!(h.runner.start_count("node-x"), 2);
    assert_eq!(h.store.get_all_running().await?.len(), 1);
    assert_eq!(h.recorder.events(), vec![NotificationEvent::Skip]);
    Ok(())
}

#[tokio::test]
async fn one_failing_transport_does_not_block_others() -> TestResult {
    init_tracing();
    let broken = Arc::new(RecordingNotifier::failing("discord"));
    let working = Arc::new(RecordingNotifier::new("slack"));
    let mut registry = NotificationRegistry::new();
    registry.register(broken.clone())?;
    registry.register(working.clone())?;
    let dispatcher = NotificationDispatcher::new(Arc::new(registry));

    let mut config = NotificationConfig {
        skip: true,
        ..NotificationConfig::default()
    };
    for (kind, url) in [("discord", "https://a"), ("slack", "https://b")] {
        config.types.insert(
            kind.to_string(),
            NotificationTarget {
                url: url.to_string(),
            },
        );
    }

    let cancel = CancellationToken::new();
    let skip = NotificationPayload::new(NotificationEvent::Skip, "node-x", "skipped");
    assert_eq!(dispatcher.dispatch(&cancel, Some(&config), &skip).await, 1);
    assert_eq!(broken.payloads().len(), 1);
    assert_eq!(working.urls(), vec!["https://b".to_string()]);

    // Disabled events and missing config send nothing.
    let done = NotificationPayload::new(NotificationEvent::Complete, "node-x", "done");
    assert_eq!(dispatcher.dispatch(&cancel, Some(&config), &done).await, 0);
    assert_eq!(dispatcher.dispatch(&cancel, None, &skip).await, 0);
    assert_eq!(working.payloads().len(), 1);
    Ok(())
}
