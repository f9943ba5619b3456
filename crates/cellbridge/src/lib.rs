//! Lets spreadsheet cells return native objects by handle and values that
//! are computed asynchronously.
//!
//! [`Context`] is the entry point: build one per host session, passing the
//! host's [`Host`] implementation. The underlying crates are re-exported for
//! lower-level use.

pub mod config;
pub mod context;
pub mod error;
pub mod host;

pub use cellbridge_cache as cache;
pub use cellbridge_common as common;
pub use cellbridge_rtd as rtd;

pub use cellbridge_common::{CallerAddress, CellValue, ExcelError, ExcelErrorKind};
pub use cellbridge_rtd::{ArgsTask, RtdNotifier, RtdTask, SubscriberId};

pub use config::ContextConfig;
pub use context::{Context, Object};
pub use error::{ContextError, Result};
pub use host::{CalculationEndHandler, Host, WorkbookClosedHandler};
