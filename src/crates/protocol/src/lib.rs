// Knowmarket protocol - message vocabulary and session fold
// Every agent interaction is recorded as one of these messages on the
// consensus topic; a session is the fold of all messages for one requestId.

pub mod messages;
pub mod session;

pub use messages::{
    AgentRole, Bid, BidAccepted, ClientReview, ConsultationRequest, ConsultationResponse,
    CourseComplete, CourseRequest, Deliverable, EscrowLock, EscrowRelease, MarketplaceMessage,
    MessageKind, ProtocolError,
};
pub use session::{AcceptedBid, CourseSession, SessionState, WORKER_STAGES};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
