use crate::docker;

/// Errors that abort construction or startup of a [`super::Watcher`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Docker(#[from] docker::Error),
    #[error("failed to list running containers: {0}")]
    InitialList(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("watcher already started")]
    AlreadyStarted,
    #[error("invalid value `{value}` for environment variable `{name}`")]
    InvalidEnv { name: &'static str, value: String },
    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
