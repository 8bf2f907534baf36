//! Per-request session aggregate.
//!
//! A `CourseSession` is the fold of every topic message observed for one
//! `requestId`. The state machine only ever moves forward: message kinds map
//! to target states and a target below the current rank is ignored, so log
//! replays and stale deliveries can never regress a session. `Complete` and
//! `Error` are terminal sinks.

use crate::messages::{
    AgentRole, Bid, ClientReview, Deliverable, EscrowRelease, MarketplaceMessage,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Worker stages in execution order. The scholar consults on demand and has
/// no stage of its own.
pub const WORKER_STAGES: [AgentRole; 2] = [AgentRole::Analyst, AgentRole::Architect];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Request,
    Bidding,
    AwaitingBidApproval,
    AnalystWorking,
    ArchitectWorking,
    AwaitingReview,
    Releasing,
    Complete,
    Error,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Request => 1,
            SessionState::Bidding => 2,
            SessionState::AwaitingBidApproval => 3,
            SessionState::AnalystWorking => 4,
            SessionState::ArchitectWorking => 5,
            SessionState::AwaitingReview => 6,
            SessionState::Releasing => 7,
            SessionState::Complete => 8,
            SessionState::Error => 9,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Error)
    }
}

fn working_state(role: AgentRole) -> Option<SessionState> {
    match role {
        AgentRole::Analyst => Some(SessionState::AnalystWorking),
        AgentRole::Architect => Some(SessionState::ArchitectWorking),
        AgentRole::Scholar => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedBid {
    pub account_id: String,
    pub price: u64,
}

/// Aggregate state for one work request. History lists are append-only;
/// corrections arrive as new messages, never as mutations of prior entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSession {
    pub request_id: String,
    pub state: SessionState,
    pub paper_url: String,
    pub budget: u64,
    pub description: String,

    pub escrow_locked: u64,
    pub escrow_released: u64,

    pub bids: Vec<Bid>,
    pub accepted: BTreeMap<AgentRole, AcceptedBid>,
    pub deliverables: BTreeMap<AgentRole, Deliverable>,
    pub client_reviews: Vec<ClientReview>,
    pub releases: Vec<EscrowRelease>,
}

impl CourseSession {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: SessionState::Idle,
            paper_url: String::new(),
            budget: 0,
            description: String::new(),
            escrow_locked: 0,
            escrow_released: 0,
            bids: Vec::new(),
            accepted: BTreeMap::new(),
            deliverables: BTreeMap::new(),
            client_reviews: Vec::new(),
            releases: Vec::new(),
        }
    }

    /// Folds one observed message into the aggregate. Messages for other
    /// requests are ignored; terminal sessions accept nothing further.
    pub fn apply(&mut self, msg: &MarketplaceMessage) {
        if msg.request_id() != self.request_id || self.state.is_terminal() {
            return;
        }

        match msg {
            MarketplaceMessage::CourseRequest(m) => {
                self.paper_url = m.paper_url.clone();
                self.budget = m.budget;
                self.description = m.description.clone();
                self.advance(SessionState::Request);
            }
            MarketplaceMessage::EscrowLock(m) => {
                self.escrow_locked += m.amount;
            }
            MarketplaceMessage::Bid(m) => {
                self.bids.push(m.clone());
                self.advance(SessionState::Bidding);
                let bid_roles: BTreeSet<AgentRole> = self.bids.iter().map(|b| b.role).collect();
                if WORKER_STAGES.iter().all(|r| bid_roles.contains(r)) {
                    self.advance(SessionState::AwaitingBidApproval);
                }
            }
            MarketplaceMessage::BidAccepted(m) => {
                self.accepted.insert(
                    m.role,
                    AcceptedBid {
                        account_id: m.bidder_account_id.clone(),
                        price: m.price,
                    },
                );
                if WORKER_STAGES.iter().all(|r| self.accepted.contains_key(r)) {
                    if let Some(state) = working_state(WORKER_STAGES[0]) {
                        self.advance(state);
                    }
                }
            }
            MarketplaceMessage::Deliverable(m) => {
                self.deliverables.insert(m.role, m.clone());
                self.advance(self.stage_after_deliverables());
            }
            MarketplaceMessage::ClientReview(m) => {
                self.client_reviews.push(m.clone());
                let reviewed: BTreeSet<AgentRole> =
                    self.client_reviews.iter().map(|r| r.target_role).collect();
                if WORKER_STAGES.iter().all(|r| reviewed.contains(r)) {
                    self.advance(SessionState::Releasing);
                }
            }
            MarketplaceMessage::EscrowRelease(m) => {
                self.releases.push(m.clone());
                self.escrow_released += m.amount;
                if self.escrow_released > self.escrow_locked {
                    // Paid out more than was ever locked - unrecoverable.
                    self.state = SessionState::Error;
                    return;
                }
                let approved: BTreeSet<AgentRole> = self
                    .client_reviews
                    .iter()
                    .filter(|r| r.approved)
                    .map(|r| r.target_role)
                    .collect();
                let released: BTreeSet<AgentRole> =
                    self.releases.iter().map(|r| r.role).collect();
                if !approved.is_empty() && approved.iter().all(|r| released.contains(r)) {
                    self.advance(SessionState::Complete);
                }
            }
            MarketplaceMessage::CourseComplete(_) => {
                self.advance(SessionState::Complete);
            }
            // Consultations run beside the main workflow and do not move it.
            MarketplaceMessage::ConsultationRequest(_)
            | MarketplaceMessage::ConsultationResponse(_) => {}
        }
    }

    /// Marks the session failed. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Error;
        }
    }

    fn stage_after_deliverables(&self) -> SessionState {
        for role in WORKER_STAGES {
            if !self.deliverables.contains_key(&role) {
                return working_state(role).unwrap_or(SessionState::AwaitingReview);
            }
        }
        SessionState::AwaitingReview
    }

    fn advance(&mut self, target: SessionState) {
        if !self.state.is_terminal() && target.rank() > self.state.rank() {
            self.state = target;
        }
    }
}
