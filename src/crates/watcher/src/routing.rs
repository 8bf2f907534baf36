//! Routing table.
//!
//! Decides which agents react to a logical message. Most kinds map straight
//! through a per-agent trigger set; two need a closer look at the payload:
//! `bid_accepted` only wakes the agent whose role was accepted, and
//! `deliverable` only wakes the agent downstream of the role that produced
//! it (so an agent never re-triggers on its own output).

use knowmarket_protocol::{AgentRole, MarketplaceMessage, MessageKind};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Orchestrator facts: recorded in the session, never dispatched.
pub const IGNORED_KINDS: [MessageKind; 5] = [
    MessageKind::Bid,
    MessageKind::EscrowLock,
    MessageKind::EscrowRelease,
    MessageKind::ClientReview,
    MessageKind::CourseComplete,
];

#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: BTreeMap<AgentRole, BTreeSet<MessageKind>>,
    /// For `deliverable`: which producing role wakes this agent.
    upstream: BTreeMap<AgentRole, AgentRole>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        let mut routes = BTreeMap::new();
        routes.insert(
            AgentRole::Analyst,
            BTreeSet::from([
                MessageKind::CourseRequest,
                MessageKind::BidAccepted,
                MessageKind::ConsultationResponse,
            ]),
        );
        routes.insert(
            AgentRole::Architect,
            BTreeSet::from([
                MessageKind::CourseRequest,
                MessageKind::BidAccepted,
                MessageKind::Deliverable,
                MessageKind::ConsultationResponse,
            ]),
        );
        routes.insert(
            AgentRole::Scholar,
            BTreeSet::from([MessageKind::ConsultationRequest]),
        );

        let mut upstream = BTreeMap::new();
        upstream.insert(AgentRole::Architect, AgentRole::Analyst);

        Self { routes, upstream }
    }
}

impl RoutingTable {
    /// All agents that must react to `msg`. Empty is the common case.
    pub fn targets(&self, msg: &MarketplaceMessage) -> Vec<AgentRole> {
        let kind = msg.kind();
        if IGNORED_KINDS.contains(&kind) {
            debug!("ignoring orchestrator fact: kind={kind}");
            return Vec::new();
        }

        let mut targets = Vec::new();
        for (agent, kinds) in &self.routes {
            if !kinds.contains(&kind) {
                continue;
            }
            match kind {
                // Only the accepted role reacts; a missing role field falls
                // back to broadcast.
                MessageKind::BidAccepted => {
                    if msg.role().is_some_and(|role| role != *agent) {
                        continue;
                    }
                }
                // Only the stage directly downstream of the producer.
                MessageKind::Deliverable => {
                    let produced_by = msg.role();
                    if self.upstream.get(agent).copied() != produced_by {
                        continue;
                    }
                }
                _ => {}
            }
            targets.push(*agent);
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowmarket_protocol::MarketplaceMessage;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> MarketplaceMessage {
        MarketplaceMessage::from_json(&value.to_string()).unwrap()
    }

    #[test]
    fn course_request_wakes_both_builders() {
        let msg = parse(json!({
            "type": "course_request",
            "requestId": "req-1",
            "sender": "client",
            "paperUrl": "u",
            "budget": 100,
            "description": "d",
            "timestamp": "t",
        }));
        assert_eq!(
            RoutingTable::default().targets(&msg),
            vec![AgentRole::Analyst, AgentRole::Architect]
        );
    }

    #[test]
    fn orchestrator_facts_are_ignored() {
        let msg = parse(json!({
            "type": "bid",
            "requestId": "req-1",
            "sender": "0.0.7",
            "role": "analyst",
            "price": 40,
            "pitch": "p",
            "timestamp": "t",
        }));
        assert!(RoutingTable::default().targets(&msg).is_empty());
    }

    #[test]
    fn bid_accepted_only_wakes_the_accepted_role() {
        let msg = parse(json!({
            "type": "bid_accepted",
            "requestId": "req-1",
            "sender": "server",
            "bidderAccountId": "0.0.7",
            "role": "architect",
            "price": 40,
            "timestamp": "t",
        }));
        assert_eq!(
            RoutingTable::default().targets(&msg),
            vec![AgentRole::Architect]
        );
    }

    #[test]
    fn deliverable_wakes_the_downstream_stage_only() {
        let table = RoutingTable::default();

        let from_analyst = parse(json!({
            "type": "deliverable",
            "requestId": "req-1",
            "sender": "0.0.7",
            "role": "analyst",
            "content": {"modules": []},
            "timestamp": "t",
        }));
        assert_eq!(table.targets(&from_analyst), vec![AgentRole::Architect]);

        // The architect never re-triggers on its own deliverable.
        let from_architect = parse(json!({
            "type": "deliverable",
            "requestId": "req-1",
            "sender": "0.0.8",
            "role": "architect",
            "content": {},
            "timestamp": "t",
        }));
        assert!(table.targets(&from_architect).is_empty());
    }

    #[test]
    fn consultation_request_goes_to_the_scholar() {
        let msg = parse(json!({
            "type": "consultation_request",
            "requestId": "req-1",
            "sender": "0.0.7",
            "question": "q",
            "offeredFee": 5,
            "timestamp": "t",
        }));
        assert_eq!(
            RoutingTable::default().targets(&msg),
            vec![AgentRole::Scholar]
        );
    }
}
