// Knowmarket watcher - push side of the topic.
// A long-lived subscription feeds one dispatcher event loop per watcher
// instance; each incoming logical message is routed to the agents that must
// react, under per-agent scheduling rules (dedup, cooldown, single-flight,
// latest-wins queueing).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod routing;
pub mod runner;
pub mod subscription;

pub use config::WatcherConfig;
pub use dispatch::TopicWatcher;
pub use error::{WatcherError, WatcherResult};
pub use routing::{RoutingTable, IGNORED_KINDS};
pub use runner::{AgentRunner, ProcessRunner};
pub use subscription::{MirrorSubscriber, SubscriptionEvent, TopicSubscriber};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
