use thiserror::Error;

pub type WatcherResult<T> = Result<T, WatcherError>;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("subscription failed: {0}")]
    Subscribe(String),
    #[error("agent invocation failed: {0}")]
    Invoke(String),
}
