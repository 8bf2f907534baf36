//! Chunk reassembly.
//!
//! The submission side splits any payload above the single-record size limit
//! and the mirror node returns the individual chunks, so reads have to put
//! them back together. Parts are bucketed by the chunk-set key (payer account
//! + first-chunk submission timestamp) and a logical message is emitted only
//! once every declared part has arrived.

use crate::types::{MirrorRecord, TopicMessage};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

struct Part {
    sequence_number: u64,
    consensus_timestamp: String,
    text: String,
}

struct Bucket {
    total: u16,
    parts: BTreeMap<u16, Part>,
}

/// Stateful reassembler. Ownership decides the retry window: a one-shot
/// caller drops it at the end of a fetch (incomplete buckets are lost with
/// it), while the streaming subscriber keeps one across polls so a chunk set
/// split over two polling windows still completes.
#[derive(Default)]
pub struct Reassembler {
    buckets: HashMap<String, Bucket>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw record. Returns a logical message when the record
    /// stands alone or completes its chunk set. Undecodable payloads are
    /// skipped and can never complete their set.
    pub fn push(&mut self, record: &MirrorRecord) -> Option<TopicMessage> {
        let text = match decode_payload(&record.message) {
            Some(text) => text,
            None => {
                warn!(
                    "skipping undecodable topic record: seq={}",
                    record.sequence_number
                );
                return None;
            }
        };

        let info = match &record.chunk_info {
            Some(info) if info.total > 1 => info,
            _ => {
                return Some(TopicMessage {
                    sequence_number: record.sequence_number,
                    consensus_timestamp: record.consensus_timestamp.clone(),
                    text,
                });
            }
        };

        let key = info.set_key();
        let bucket = self.buckets.entry(key.clone()).or_insert_with(|| Bucket {
            total: info.total,
            parts: BTreeMap::new(),
        });
        bucket.parts.insert(
            info.number,
            Part {
                sequence_number: record.sequence_number,
                consensus_timestamp: record.consensus_timestamp.clone(),
                text,
            },
        );

        if (bucket.parts.len() as u16) < bucket.total {
            debug!(
                "buffering chunk {}/{} of set {}: seq={}",
                info.number, info.total, key, record.sequence_number
            );
            return None;
        }

        let bucket = self.buckets.remove(&key)?;
        let mut parts = bucket.parts.into_values();
        let first = parts.next()?;
        let mut text = first.text;
        for part in parts {
            text.push_str(&part.text);
        }
        Some(TopicMessage {
            sequence_number: first.sequence_number,
            consensus_timestamp: first.consensus_timestamp,
            text,
        })
    }

    /// Number of chunk sets still waiting for parts.
    pub fn pending_sets(&self) -> usize {
        self.buckets.len()
    }
}

fn decode_payload(message: &str) -> Option<String> {
    let bytes = BASE64.decode(message).ok()?;
    String::from_utf8(bytes).ok()
}

/// One-shot reassembly of a fetched page: standalone records plus completed
/// chunk sets, sorted ascending by sequence number. Incomplete sets present
/// at the end of the page are dropped.
pub fn reassemble(records: &[MirrorRecord]) -> Vec<TopicMessage> {
    let mut assembler = Reassembler::new();
    let mut out: Vec<TopicMessage> = records
        .iter()
        .filter_map(|record| assembler.push(record))
        .collect();
    out.sort_by_key(|m| m.sequence_number);
    out
}
