// Knowmarket mirror reader - pull side of the topic.
// Fetches raw records from the mirror node REST API, reassembles chunked
// submissions into logical messages and offers a bounded wait-for-N
// collection primitive on top.

pub mod chunk;
pub mod client;
pub mod collector;
pub mod error;
pub mod types;

pub use chunk::{reassemble, Reassembler};
pub use client::{MirrorClient, DEFAULT_MIRROR_BASE_URL};
pub use collector::{CollectedMessage, MessageCollector, MessageFilter, DEFAULT_POLL_INTERVAL};
pub use error::{MirrorError, MirrorResult};
pub use types::{ChunkInfo, InitialTransactionId, MirrorMessagesPage, MirrorRecord, TopicMessage};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
