//! Publish/subscribe bridge delivering asynchronously computed values to
//! spreadsheet cells through the host's real-time-data (RTD) mechanism.

pub mod bridge;
pub mod error;
pub mod publisher;
pub mod server;
pub mod task;
pub mod topic;
pub mod value;

pub use bridge::AsyncTaskBridge;
pub use error::{Result, RtdError};
pub use publisher::{CancelToken, RtdNotifier, RtdPublisher};
pub use server::{RtdConfig, RtdServer};
pub use task::{ArgsTask, AsAny, RtdTask, TaskPublisher};
pub use topic::{SubscriberId, TopicState};
pub use value::TopicValue;
