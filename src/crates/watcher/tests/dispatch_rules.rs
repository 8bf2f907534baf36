//! End-to-end scheduling rules, driven through fake subscriptions and a
//! gated fake runner on a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use knowmarket_mirror::TopicMessage;
use knowmarket_protocol::AgentRole;
use knowmarket_watcher::{
    AgentRunner, SubscriptionEvent, TopicSubscriber, TopicWatcher, WatcherConfig, WatcherError,
    WatcherResult,
};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

/// Hands out pre-built receivers, one per subscribe call.
#[derive(Clone)]
struct QueueSubscriber {
    receivers: Arc<Mutex<VecDeque<mpsc::Receiver<SubscriptionEvent>>>>,
    subscribe_count: Arc<AtomicUsize>,
}

impl QueueSubscriber {
    fn new(receivers: Vec<mpsc::Receiver<SubscriptionEvent>>) -> Self {
        Self {
            receivers: Arc::new(Mutex::new(receivers.into_iter().collect())),
            subscribe_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicSubscriber for QueueSubscriber {
    async fn subscribe(
        &self,
        _topic_id: &str,
        _after: Option<u64>,
    ) -> WatcherResult<mpsc::Receiver<SubscriptionEvent>> {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        self.receivers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| WatcherError::Subscribe("no further subscriptions scripted".into()))
    }
}

/// Records every invocation, then blocks until the test grants a permit.
#[derive(Clone)]
struct GateRunner {
    calls: Arc<Mutex<Vec<(AgentRole, String)>>>,
    gate: Arc<Semaphore>,
}

impl GateRunner {
    fn new(permits: usize) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    fn calls(&self) -> Vec<(AgentRole, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for GateRunner {
    async fn invoke(&self, role: AgentRole, prompt: &str) -> WatcherResult<()> {
        self.calls.lock().unwrap().push((role, prompt.to_string()));
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| WatcherError::Invoke("gate closed".into()))?;
        Ok(())
    }
}

fn topic_message(seq: u64, payload: serde_json::Value) -> SubscriptionEvent {
    SubscriptionEvent::Message(TopicMessage {
        sequence_number: seq,
        consensus_timestamp: format!("1700000000.{seq:09}"),
        text: payload.to_string(),
    })
}

fn course_request(seq: u64) -> SubscriptionEvent {
    topic_message(
        seq,
        json!({
            "type": "course_request",
            "requestId": "req-1",
            "sender": "client",
            "paperUrl": "https://example.org/paper.pdf",
            "budget": 100,
            "description": "course from paper",
            "timestamp": "2026-01-01T00:00:00Z",
        }),
    )
}

fn bid_accepted_for_analyst(seq: u64) -> SubscriptionEvent {
    topic_message(
        seq,
        json!({
            "type": "bid_accepted",
            "requestId": "req-1",
            "sender": "server",
            "bidderAccountId": "0.0.7",
            "role": "analyst",
            "price": 40,
            "timestamp": "2026-01-01T00:00:00Z",
        }),
    )
}

fn config() -> WatcherConfig {
    let mut config = WatcherConfig::new("0.0.1234");
    config.cooldown = Duration::ZERO;
    config
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn replayed_sequence_numbers_dispatch_once() {
    let (tx, rx) = mpsc::channel(16);
    let runner = GateRunner::new(100);
    let watcher = TopicWatcher::new(config(), QueueSubscriber::new(vec![rx]), runner.clone());
    let cancel = watcher.cancellation_token();
    let handle = tokio::spawn(async move { watcher.run().await });

    tx.send(course_request(5)).await.unwrap();
    // The mirror replays the same record on a later poll.
    tx.send(course_request(5)).await.unwrap();
    // Orchestrator fact: routed nowhere.
    tx.send(topic_message(
        6,
        json!({
            "type": "escrow_release",
            "requestId": "req-1",
            "sender": "server",
            "toAccountId": "0.0.7",
            "role": "analyst",
            "amount": 40,
            "txId": "tx",
            "timestamp": "t",
        }),
    ))
    .await
    .unwrap();
    settle().await;

    let calls = runner.calls();
    assert_eq!(calls.len(), 2, "one dispatch per routed agent, no replays");
    assert!(calls.iter().any(|(role, _)| *role == AgentRole::Analyst));
    assert!(calls.iter().any(|(role, _)| *role == AgentRole::Architect));

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn parked_message_is_latest_wins() {
    let (tx, rx) = mpsc::channel(16);
    let runner = GateRunner::new(0);
    let watcher = TopicWatcher::new(config(), QueueSubscriber::new(vec![rx]), runner.clone());
    let cancel = watcher.cancellation_token();
    let handle = tokio::spawn(async move { watcher.run().await });

    tx.send(bid_accepted_for_analyst(10)).await.unwrap();
    settle().await;
    assert_eq!(runner.calls().len(), 1, "first message goes straight out");

    // Both arrive while the analyst is busy; only the newer one survives.
    tx.send(bid_accepted_for_analyst(11)).await.unwrap();
    tx.send(bid_accepted_for_analyst(12)).await.unwrap();
    settle().await;
    assert_eq!(runner.calls().len(), 1);

    runner.release();
    settle().await;

    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].1.contains("seq:12"), "seq 11 was replaced, not queued");

    runner.release();
    settle().await;
    assert_eq!(runner.calls().len(), 2, "nothing left in the slot");

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn fresh_trigger_inside_cooldown_is_dropped_not_parked() {
    let (tx, rx) = mpsc::channel(16);
    let runner = GateRunner::new(100);
    let mut config = config();
    config.cooldown = Duration::from_secs(30);
    let watcher = TopicWatcher::new(config, QueueSubscriber::new(vec![rx]), runner.clone());
    let cancel = watcher.cancellation_token();
    let handle = tokio::spawn(async move { watcher.run().await });

    tx.send(bid_accepted_for_analyst(1)).await.unwrap();
    settle().await;
    assert_eq!(runner.calls().len(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    tx.send(bid_accepted_for_analyst(2)).await.unwrap();
    settle().await;
    assert_eq!(runner.calls().len(), 1, "inside the cooldown window");

    // A dropped message stays dropped once the window passes.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(runner.calls().len(), 1);

    tx.send(bid_accepted_for_analyst(3)).await.unwrap();
    settle().await;

    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].1.contains("seq:3"));

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn resubscribes_after_the_error_threshold() {
    let (tx1, rx1) = mpsc::channel(16);
    let (tx2, rx2) = mpsc::channel(16);
    let runner = GateRunner::new(100);
    let subscriber = QueueSubscriber::new(vec![rx1, rx2]);
    let mut config = config();
    config.error_threshold = 3;
    let watcher = TopicWatcher::new(config, subscriber.clone(), runner.clone());
    let cancel = watcher.cancellation_token();
    let handle = tokio::spawn(async move { watcher.run().await });

    for _ in 0..3 {
        tx1.send(SubscriptionEvent::Error("stream reset".into()))
            .await
            .unwrap();
    }
    settle().await;
    // Past the reconnect delay, the second scripted subscription is live.
    tokio::time::sleep(Duration::from_secs(31)).await;

    tx2.send(bid_accepted_for_analyst(7)).await.unwrap();
    settle().await;

    assert_eq!(subscriber.subscribe_count(), 2);
    assert_eq!(runner.calls().len(), 1);

    cancel.cancel();
    handle.await.unwrap().unwrap();
    drop((tx1, tx2));
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_in_flight_work_after_the_grace_period() {
    let (tx, rx) = mpsc::channel(16);
    let runner = GateRunner::new(0);
    let watcher = TopicWatcher::new(config(), QueueSubscriber::new(vec![rx]), runner.clone());
    let cancel = watcher.cancellation_token();
    let handle = tokio::spawn(async move { watcher.run().await });

    tx.send(bid_accepted_for_analyst(1)).await.unwrap();
    settle().await;
    assert_eq!(runner.calls().len(), 1);

    // The invocation never completes; run() must still return once the
    // grace period expires.
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(30), handle).await;
    result.unwrap().unwrap().unwrap();
}
