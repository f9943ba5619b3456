use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtdError {
    #[error("RTD server is not running")]
    NotRunning,

    #[error("failed to spawn RTD thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RtdError>;
