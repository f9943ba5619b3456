use cellbridge_common::{CellValue, ExcelError};

/// A value that can flow through a topic.
///
/// Task failures are published as values, so every topic value must be
/// constructible from an [`ExcelError`].
pub trait TopicValue: From<ExcelError> + Send + Sync + 'static {
    /// What a cell shows while its task has not published yet.
    fn pending() -> Self;
}

impl TopicValue for CellValue {
    fn pending() -> Self {
        CellValue::Pending
    }
}
