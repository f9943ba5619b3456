//! Address-scoped caches that let spreadsheet cells return native objects
//! by handle.

pub mod arena;
pub mod cache;
pub mod error;
pub mod generation;
pub mod handle;
pub mod slot;
pub mod value_cache;

pub use arena::ObjectId;
pub use cache::{CacheConfig, CallerSource, DEFAULT_UNIQUIFIER, ObjectCache};
pub use cellbridge_common::WorkbookScoped;
pub use error::{CacheError, Result};
pub use generation::GenerationClock;
pub use value_cache::{VALUE_CACHE_UNIQUIFIER, ValueCache, value_cache};
