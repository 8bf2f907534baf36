//! Blocking collector.
//!
//! Pull-based wait-for-N primitive used by synchronous orchestration steps:
//! poll the mirror on a fixed interval, keep messages matching a filter and
//! return once `expected_count` is reached or the deadline passes. Timing
//! out is not an error - the caller sees the shortfall in the result length.

use crate::client::MirrorClient;
use knowmarket_protocol::{AgentRole, MarketplaceMessage, MessageKind};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Mirror node ingest typically lags consensus by a few seconds, so polling
/// faster than this buys nothing.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub kind: Option<MessageKind>,
    /// Matches the `role` field; variants without one never match.
    pub role: Option<AgentRole>,
    pub request_id: Option<String>,
    /// Only consider records with a strictly greater sequence number.
    pub after_sequence: Option<u64>,
}

impl MessageFilter {
    fn matches(&self, msg: &MarketplaceMessage) -> bool {
        if let Some(kind) = self.kind {
            if msg.kind() != kind {
                return false;
            }
        }
        if let Some(request_id) = &self.request_id {
            if msg.request_id() != request_id {
                return false;
            }
        }
        if let Some(role) = self.role {
            if msg.role() != Some(role) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct CollectedMessage {
    pub sequence_number: u64,
    pub consensus_timestamp: String,
    /// Original message text, as published.
    pub raw: String,
    pub message: MarketplaceMessage,
}

pub struct MessageCollector {
    client: MirrorClient,
    poll_interval: Duration,
}

impl MessageCollector {
    pub fn new(client: MirrorClient) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Collects up to `expected_count` filter matches within `timeout`.
    /// Always returns what was gathered; a short result means the deadline
    /// passed first. Malformed records are marked consumed and never
    /// retried.
    pub async fn collect(
        &self,
        topic_id: &str,
        filter: &MessageFilter,
        expected_count: usize,
        timeout: Duration,
    ) -> Vec<CollectedMessage> {
        let deadline = Instant::now() + timeout;
        let mut collected: Vec<CollectedMessage> = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();

        info!(
            "collecting topic messages: topic={}, kind={}, role={}, expected={}, timeout={}s",
            topic_id,
            filter.kind.map(|k| k.as_str()).unwrap_or("*"),
            filter.role.map(|r| r.as_str()).unwrap_or("*"),
            expected_count,
            timeout.as_secs()
        );

        while collected.len() < expected_count && Instant::now() < deadline {
            let messages = self
                .client
                .topic_messages(topic_id, filter.after_sequence)
                .await;

            for msg in messages {
                if seen.contains(&msg.sequence_number) {
                    continue;
                }
                if let Some(after) = filter.after_sequence {
                    if msg.sequence_number <= after {
                        continue;
                    }
                }

                let parsed = match MarketplaceMessage::from_json(&msg.text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        // Agents do publish garbage occasionally; consume
                        // and move on.
                        seen.insert(msg.sequence_number);
                        debug!(
                            "discarding malformed topic message: seq={}, error={}",
                            msg.sequence_number, e
                        );
                        continue;
                    }
                };

                if !filter.matches(&parsed) {
                    continue;
                }

                seen.insert(msg.sequence_number);
                info!(
                    "collected topic message: seq={}, kind={} ({}/{})",
                    msg.sequence_number,
                    parsed.kind(),
                    collected.len() + 1,
                    expected_count
                );
                collected.push(CollectedMessage {
                    sequence_number: msg.sequence_number,
                    consensus_timestamp: msg.consensus_timestamp,
                    raw: msg.text,
                    message: parsed,
                });

                if collected.len() >= expected_count {
                    break;
                }
            }

            if collected.len() >= expected_count {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        if collected.len() < expected_count {
            warn!(
                "collection deadline passed: {}/{} matching messages",
                collected.len(),
                expected_count
            );
        }
        collected
    }
}
