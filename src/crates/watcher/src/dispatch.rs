//! Streaming dispatcher.
//!
//! One event loop per watcher instance, fed by a topic subscription and a
//! completion channel. All scheduling state lives in [`DispatcherState`],
//! owned by the loop; invocations run in spawned tasks and report back over
//! the channel, so the loop itself never blocks on an agent.
//!
//! Per-agent rules, in the order they are checked:
//!   1. duplicate sequence numbers are dropped before routing;
//!   2. an agent with an invocation in flight gets the message parked in a
//!      single latest-wins slot instead;
//!   3. a fresh trigger inside the cooldown window is dropped outright -
//!      queued messages draining after a completion skip this check.

use crate::config::WatcherConfig;
use crate::error::{WatcherError, WatcherResult};
use crate::routing::RoutingTable;
use crate::runner::AgentRunner;
use crate::subscription::{SubscriptionEvent, TopicSubscriber};
use knowmarket_mirror::TopicMessage;
use knowmarket_protocol::{AgentRole, MarketplaceMessage};
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sequence numbers this far behind the newest seen one are pruned from the
/// dedup set; anything older than the window would have been dropped by the
/// subscription watermark anyway.
const SEEN_RETENTION: u64 = 10_000;

#[derive(Debug, Clone)]
struct PendingDispatch {
    sequence_number: u64,
    message_json: String,
}

#[derive(Debug, Default)]
struct AgentSchedule {
    last_dispatch: Option<Instant>,
    in_flight: bool,
    /// Latest-wins: a newer message parked while in flight replaces an
    /// older one.
    pending: Option<PendingDispatch>,
}

/// All mutable scheduling state, owned by the event loop.
struct DispatcherState {
    seen: BTreeSet<u64>,
    schedules: HashMap<AgentRole, AgentSchedule>,
}

impl DispatcherState {
    fn new() -> Self {
        Self {
            seen: BTreeSet::new(),
            schedules: HashMap::new(),
        }
    }

    /// Records `seq`; false means it was already seen. Prunes entries that
    /// fall behind the retention window so the set cannot grow unbounded.
    fn mark_seen(&mut self, seq: u64) -> bool {
        if !self.seen.insert(seq) {
            return false;
        }
        if let Some(&newest) = self.seen.iter().next_back() {
            if newest > SEEN_RETENTION {
                self.seen = self.seen.split_off(&(newest - SEEN_RETENTION));
            }
        }
        true
    }

    fn schedule_mut(&mut self, role: AgentRole) -> &mut AgentSchedule {
        self.schedules.entry(role).or_default()
    }

    fn in_flight_roles(&self) -> Vec<AgentRole> {
        self.schedules
            .iter()
            .filter(|(_, s)| s.in_flight)
            .map(|(role, _)| *role)
            .collect()
    }
}

struct Completion {
    role: AgentRole,
    sequence_number: u64,
    result: WatcherResult<()>,
}

pub struct TopicWatcher<S, R> {
    config: WatcherConfig,
    routing: RoutingTable,
    subscriber: S,
    runner: Arc<R>,
    cancel: CancellationToken,
}

impl<S, R> TopicWatcher<S, R>
where
    S: TopicSubscriber,
    R: AgentRunner + 'static,
{
    pub fn new(config: WatcherConfig, subscriber: S, runner: R) -> Self {
        Self {
            config,
            routing: RoutingTable::default(),
            subscriber,
            runner: Arc::new(runner),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    /// Clone this and cancel it to shut the watcher down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs until cancelled. Subscription failures and error streaks are
    /// absorbed by resubscribing after a delay; the loop only exits on
    /// cancellation, after giving in-flight invocations a grace period.
    pub async fn run(&self) -> WatcherResult<()> {
        let mut state = DispatcherState::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut resume_after = self.config.start_after;

        info!(
            "watching topic {}: cooldown={}s, exec_timeout={}s",
            self.config.topic_id,
            self.config.cooldown.as_secs(),
            self.config.exec_timeout.as_secs()
        );

        'subscription: loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut rx = match self
                .subscriber
                .subscribe(&self.config.topic_id, resume_after)
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    warn!("subscribe failed: {e}");
                    if !self.wait_before_resubscribe().await {
                        break;
                    }
                    continue;
                }
            };
            info!(
                "subscribed to topic {} after seq {:?}",
                self.config.topic_id, resume_after
            );
            let mut consecutive_errors: u32 = 0;

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break 'subscription,

                    completion = done_rx.recv() => {
                        // The loop holds a sender, so recv never yields None.
                        if let Some(completion) = completion {
                            self.on_complete(&mut state, completion, &done_tx);
                        }
                    }

                    event = rx.recv() => match event {
                        Some(SubscriptionEvent::Message(message)) => {
                            consecutive_errors = 0;
                            resume_after = Some(
                                resume_after
                                    .unwrap_or(0)
                                    .max(message.sequence_number),
                            );
                            self.route_message(&mut state, &message, &done_tx);
                        }
                        Some(SubscriptionEvent::Error(e)) => {
                            consecutive_errors += 1;
                            error!(
                                "subscription error ({}/{}): {e}",
                                consecutive_errors, self.config.error_threshold
                            );
                            if consecutive_errors >= self.config.error_threshold {
                                warn!("error threshold reached, tearing down subscription");
                                drop(rx);
                                if !self.wait_before_resubscribe().await {
                                    break 'subscription;
                                }
                                continue 'subscription;
                            }
                        }
                        None => {
                            warn!("subscription stream closed");
                            if !self.wait_before_resubscribe().await {
                                break 'subscription;
                            }
                            continue 'subscription;
                        }
                    },
                }
            }
        }

        self.drain_in_flight(&mut state, &mut done_rx).await;
        info!("watcher stopped: topic={}", self.config.topic_id);
        Ok(())
    }

    fn route_message(
        &self,
        state: &mut DispatcherState,
        message: &TopicMessage,
        done_tx: &mpsc::UnboundedSender<Completion>,
    ) {
        let seq = message.sequence_number;
        if !state.mark_seen(seq) {
            debug!("dropping replayed topic message: seq={seq}");
            return;
        }
        if self.config.start_after.is_some_and(|after| seq <= after) {
            return;
        }

        let parsed = match MarketplaceMessage::from_json(&message.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("skipping unparseable topic message: seq={seq}, error={e}");
                return;
            }
        };

        let targets = self.routing.targets(&parsed);
        if targets.is_empty() {
            return;
        }
        info!("topic message: seq={seq}, kind={}", parsed.kind());

        for role in targets {
            self.try_dispatch(state, role, seq, &message.text, false, done_tx);
        }
    }

    /// `from_queue` marks a parked message draining after a completion: it
    /// still respects the in-flight check but skips the cooldown.
    fn try_dispatch(
        &self,
        state: &mut DispatcherState,
        role: AgentRole,
        seq: u64,
        message_json: &str,
        from_queue: bool,
        done_tx: &mpsc::UnboundedSender<Completion>,
    ) {
        let now = Instant::now();
        let schedule = state.schedule_mut(role);

        if schedule.in_flight {
            info!("parking message for busy {role}: seq={seq}");
            schedule.pending = Some(PendingDispatch {
                sequence_number: seq,
                message_json: message_json.to_string(),
            });
            return;
        }

        if !from_queue {
            if let Some(last) = schedule.last_dispatch {
                let elapsed = now.duration_since(last);
                if elapsed < self.config.cooldown {
                    info!(
                        "cooling down {role}: {}s remaining, dropping seq={seq}",
                        (self.config.cooldown - elapsed).as_secs()
                    );
                    return;
                }
            }
        }

        schedule.in_flight = true;
        schedule.last_dispatch = Some(now);
        schedule.pending = None;
        info!("dispatching {role}: seq={seq}");

        let prompt = build_prompt(seq, message_json);
        let runner = Arc::clone(&self.runner);
        let exec_timeout = self.config.exec_timeout;
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(exec_timeout, runner.invoke(role, &prompt))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(WatcherError::Invoke(format!(
                    "invocation exceeded {}s",
                    exec_timeout.as_secs()
                ))),
            };
            // Send can only fail after the loop has shut down.
            let _ = done_tx.send(Completion {
                role,
                sequence_number: seq,
                result,
            });
        });
    }

    fn on_complete(
        &self,
        state: &mut DispatcherState,
        completion: Completion,
        done_tx: &mpsc::UnboundedSender<Completion>,
    ) {
        let schedule = state.schedule_mut(completion.role);
        schedule.in_flight = false;
        match &completion.result {
            Ok(()) => info!(
                "{} finished: seq={}",
                completion.role, completion.sequence_number
            ),
            Err(e) => error!(
                "{} failed on seq={}: {e}",
                completion.role, completion.sequence_number
            ),
        }

        // Drain the latest-wins slot. Parked work continues a reaction the
        // scheduler already approved, so it bypasses the cooldown.
        if let Some(parked) = state.schedule_mut(completion.role).pending.take() {
            info!(
                "dispatching parked message for {}: seq={}",
                completion.role, parked.sequence_number
            );
            self.try_dispatch(
                state,
                completion.role,
                parked.sequence_number,
                &parked.message_json,
                true,
                done_tx,
            );
        }
    }

    async fn wait_before_resubscribe(&self) -> bool {
        info!(
            "resubscribing in {}s",
            self.config.reconnect_delay.as_secs()
        );
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.reconnect_delay) => true,
        }
    }

    async fn drain_in_flight(
        &self,
        state: &mut DispatcherState,
        done_rx: &mut mpsc::UnboundedReceiver<Completion>,
    ) {
        let active = state.in_flight_roles();
        if active.is_empty() {
            return;
        }
        info!(
            "shutdown: waiting up to {}s for in-flight agents: {active:?}",
            self.config.shutdown_grace.as_secs()
        );

        let deadline = Instant::now() + self.config.shutdown_grace;
        while !state.in_flight_roles().is_empty() {
            tokio::select! {
                completion = done_rx.recv() => {
                    if let Some(completion) = completion {
                        state.schedule_mut(completion.role).in_flight = false;
                        debug!("{} settled during shutdown", completion.role);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        "grace period expired, abandoning in-flight agents: {:?}",
                        state.in_flight_roles()
                    );
                    break;
                }
            }
        }
    }
}

fn build_prompt(seq: u64, message_json: &str) -> String {
    format!(
        "A topic message arrived (seq:{seq}):\n{message_json}\n\
         React according to your role instructions. Publish any response as \
         a new topic message."
    )
}
