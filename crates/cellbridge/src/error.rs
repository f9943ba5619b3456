use cellbridge_cache::CacheError;
use cellbridge_rtd::RtdError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Rtd(#[from] RtdError),
}

pub type Result<T> = std::result::Result<T, ContextError>;
