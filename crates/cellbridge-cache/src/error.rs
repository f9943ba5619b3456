//! Error types for the object cache.

use cellbridge_common::CallerAddressError;
use thiserror::Error;

/// Failures minting a handle. Lookups never fail: an unknown or malformed
/// handle is just "not found".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("no calling cell: insert must run inside a worksheet evaluation")]
    NoCaller,

    #[error("caller must be a worksheet address: {0}")]
    NotWorksheetAddress(#[from] CallerAddressError),
}

pub type Result<T> = std::result::Result<T, CacheError>;
