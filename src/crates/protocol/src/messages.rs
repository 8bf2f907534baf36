//! Marketplace message protocol.
//!
//! Every message on the topic is a JSON object tagged by `type` and
//! correlated to one work request by `requestId`. Messages are immutable
//! facts; corrections are published as new messages, never rewrites.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid marketplace message: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Worker/consultant identity on the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Analyst,
    Architect,
    Scholar,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Analyst => "analyst",
            AgentRole::Architect => "architect",
            AgentRole::Scholar => "scholar",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fieldless mirror of the message tag set, used by routing tables and
/// collector filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    CourseRequest,
    Bid,
    BidAccepted,
    EscrowLock,
    Deliverable,
    ClientReview,
    EscrowRelease,
    CourseComplete,
    ConsultationRequest,
    ConsultationResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::CourseRequest => "course_request",
            MessageKind::Bid => "bid",
            MessageKind::BidAccepted => "bid_accepted",
            MessageKind::EscrowLock => "escrow_lock",
            MessageKind::Deliverable => "deliverable",
            MessageKind::ClientReview => "client_review",
            MessageKind::EscrowRelease => "escrow_release",
            MessageKind::CourseComplete => "course_complete",
            MessageKind::ConsultationRequest => "consultation_request",
            MessageKind::ConsultationResponse => "consultation_response",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRequest {
    pub request_id: String,
    /// Requesting client (published on their behalf by the orchestrator).
    pub sender: String,
    pub paper_url: String,
    /// Total escrow budget (KNOW).
    pub budget: u64,
    pub description: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub request_id: String,
    /// Bidding agent account id.
    pub sender: String,
    pub role: AgentRole,
    /// Asking price (KNOW).
    pub price: u64,
    pub pitch: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidAccepted {
    pub request_id: String,
    pub sender: String,
    pub bidder_account_id: String,
    pub role: AgentRole,
    pub price: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowLock {
    pub request_id: String,
    pub sender: String,
    pub escrow_account_id: String,
    pub token_id: String,
    pub amount: u64,
    pub tx_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub request_id: String,
    pub sender: String,
    pub role: AgentRole,
    /// Work product; structure is agent-defined.
    pub content: serde_json::Value,
    pub timestamp: String,
}

/// Review performed directly by the human client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientReview {
    pub request_id: String,
    pub sender: String,
    pub target_role: AgentRole,
    pub target_account_id: String,
    pub approved: bool,
    /// 0-100
    pub score: u8,
    pub feedback: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRelease {
    pub request_id: String,
    pub sender: String,
    pub to_account_id: String,
    pub role: AgentRole,
    pub amount: u64,
    pub tx_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseComplete {
    pub request_id: String,
    pub sender: String,
    pub course_title: String,
    pub modules: Vec<String>,
    pub timestamp: String,
}

/// Consultation ask from a worker agent to the scholar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationRequest {
    pub request_id: String,
    pub sender: String,
    pub question: String,
    /// Consultation fee offered (KNOW).
    pub offered_fee: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationResponse {
    pub request_id: String,
    pub sender: String,
    pub answer: String,
    /// Fee actually charged (KNOW).
    pub fee: u64,
    pub timestamp: String,
}

/// Union of all topic message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketplaceMessage {
    CourseRequest(CourseRequest),
    Bid(Bid),
    BidAccepted(BidAccepted),
    EscrowLock(EscrowLock),
    Deliverable(Deliverable),
    ClientReview(ClientReview),
    EscrowRelease(EscrowRelease),
    CourseComplete(CourseComplete),
    ConsultationRequest(ConsultationRequest),
    ConsultationResponse(ConsultationResponse),
}

impl MarketplaceMessage {
    /// Parses one reassembled topic message. Unknown `type` tags, missing
    /// fields and malformed JSON all fail here; callers mark the record
    /// consumed and skip it.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MarketplaceMessage::CourseRequest(_) => MessageKind::CourseRequest,
            MarketplaceMessage::Bid(_) => MessageKind::Bid,
            MarketplaceMessage::BidAccepted(_) => MessageKind::BidAccepted,
            MarketplaceMessage::EscrowLock(_) => MessageKind::EscrowLock,
            MarketplaceMessage::Deliverable(_) => MessageKind::Deliverable,
            MarketplaceMessage::ClientReview(_) => MessageKind::ClientReview,
            MarketplaceMessage::EscrowRelease(_) => MessageKind::EscrowRelease,
            MarketplaceMessage::CourseComplete(_) => MessageKind::CourseComplete,
            MarketplaceMessage::ConsultationRequest(_) => MessageKind::ConsultationRequest,
            MarketplaceMessage::ConsultationResponse(_) => MessageKind::ConsultationResponse,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            MarketplaceMessage::CourseRequest(m) => &m.request_id,
            MarketplaceMessage::Bid(m) => &m.request_id,
            MarketplaceMessage::BidAccepted(m) => &m.request_id,
            MarketplaceMessage::EscrowLock(m) => &m.request_id,
            MarketplaceMessage::Deliverable(m) => &m.request_id,
            MarketplaceMessage::ClientReview(m) => &m.request_id,
            MarketplaceMessage::EscrowRelease(m) => &m.request_id,
            MarketplaceMessage::CourseComplete(m) => &m.request_id,
            MarketplaceMessage::ConsultationRequest(m) => &m.request_id,
            MarketplaceMessage::ConsultationResponse(m) => &m.request_id,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            MarketplaceMessage::CourseRequest(m) => &m.sender,
            MarketplaceMessage::Bid(m) => &m.sender,
            MarketplaceMessage::BidAccepted(m) => &m.sender,
            MarketplaceMessage::EscrowLock(m) => &m.sender,
            MarketplaceMessage::Deliverable(m) => &m.sender,
            MarketplaceMessage::ClientReview(m) => &m.sender,
            MarketplaceMessage::EscrowRelease(m) => &m.sender,
            MarketplaceMessage::CourseComplete(m) => &m.sender,
            MarketplaceMessage::ConsultationRequest(m) => &m.sender,
            MarketplaceMessage::ConsultationResponse(m) => &m.sender,
        }
    }

    /// The `role` field of role-bearing variants. `client_review` carries a
    /// `targetRole` instead, which deliberately does not answer here: role
    /// filters match the `role` field only.
    pub fn role(&self) -> Option<AgentRole> {
        match self {
            MarketplaceMessage::Bid(m) => Some(m.role),
            MarketplaceMessage::BidAccepted(m) => Some(m.role),
            MarketplaceMessage::Deliverable(m) => Some(m.role),
            MarketplaceMessage::EscrowRelease(m) => Some(m.role),
            _ => None,
        }
    }
}
