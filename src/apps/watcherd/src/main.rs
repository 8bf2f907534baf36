//! Knowmarket watcher daemon.
//!
//! Subscribes to one marketplace topic and dispatches incoming messages to
//! local agent processes until interrupted.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use knowmarket_mirror::{MirrorClient, DEFAULT_MIRROR_BASE_URL};
use knowmarket_watcher::{MirrorSubscriber, ProcessRunner, TopicWatcher, WatcherConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "knowmarket-watcherd", version, about)]
struct Args {
    /// Topic to watch, e.g. 0.0.12345
    topic_id: String,

    /// Ignore records at or below this sequence number
    #[arg(long)]
    after: Option<u64>,

    /// Mirror node REST base URL
    #[arg(long, default_value = DEFAULT_MIRROR_BASE_URL)]
    mirror_url: String,

    /// Command invoked per dispatch as `<command> agent --agent <role> --message <prompt>`
    #[arg(long, default_value = "openclaw")]
    agent_command: String,

    /// Minimum gap in seconds between fresh dispatches to the same agent
    #[arg(long, default_value_t = 30)]
    cooldown_secs: u64,

    /// Hard ceiling in seconds on a single agent invocation
    #[arg(long, default_value_t = 120)]
    exec_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = WatcherConfig::new(&args.topic_id);
    config.start_after = args.after;
    config.cooldown = Duration::from_secs(args.cooldown_secs);
    config.exec_timeout = Duration::from_secs(args.exec_timeout_secs);

    let subscriber = MirrorSubscriber::new(MirrorClient::new(&args.mirror_url));
    let runner = ProcessRunner::new(&args.agent_command);
    let watcher = TopicWatcher::new(config, subscriber, runner);

    let cancel = watcher.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });

    info!(
        "knowmarket-watcherd {} watching topic {}",
        knowmarket_watcher::VERSION,
        args.topic_id
    );
    watcher.run().await.context("watcher terminated abnormally")
}
