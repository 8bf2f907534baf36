//! Wire types for the mirror node REST API and the reassembled unit
//! consumers operate on.

use serde::{Deserialize, Serialize};

/// One page of `GET /api/v1/topics/{id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorMessagesPage {
    #[serde(default)]
    pub messages: Vec<MirrorRecord>,
}

/// One raw record as returned by the mirror node. `message` is base64;
/// records larger than the single-submission limit arrive split, each part
/// carrying `chunk_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub sequence_number: u64,
    pub consensus_timestamp: String,
    pub message: String,
    #[serde(default)]
    pub chunk_info: Option<ChunkInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub initial_transaction_id: InitialTransactionId,
    pub total: u16,
    /// 1-based chunk index.
    pub number: u16,
}

/// Identifies which chunk set a part belongs to: the submitting payer plus
/// the first chunk's submission timestamp, not the message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialTransactionId {
    pub transaction_valid_start: String,
    pub account_id: String,
}

impl ChunkInfo {
    /// Bucket key for reassembly.
    pub fn set_key(&self) -> String {
        format!(
            "{}@{}",
            self.initial_transaction_id.account_id,
            self.initial_transaction_id.transaction_valid_start
        )
    }
}

/// A fully reassembled, decoded logical message. For chunked submissions the
/// sequence number and timestamp are those of the first chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub sequence_number: u64,
    pub consensus_timestamp: String,
    pub text: String,
}
