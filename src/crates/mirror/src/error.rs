use thiserror::Error;

pub type MirrorResult<T> = Result<T, MirrorError>;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror node request failed: {0}")]
    Http(#[from] reqwest::Error),
}
