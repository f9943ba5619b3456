//! Spreadsheet-style error values.
//!
//! - **`ExcelErrorKind`** : the canonical set of error codes a host cell can show
//! - **`ExcelError`**     : a kind plus an optional human explanation
//!
//! These are *values*, not failures of this library: a producer that fails
//! publishes an `ExcelError` on its topic exactly as it would publish a
//! number.

use std::{error::Error, fmt};

use crate::CellValue;

/// All recognised error codes.
///
/// **Note:** names are CamelCase (idiomatic Rust) while `Display`
/// renders them exactly as the host shows them (`#DIV/0!`, …).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExcelErrorKind {
    Null,
    Ref,
    Name,
    Value,
    Div,
    Na,
    Num,
    Error,
    Calc,
    Busy,
    Cancelled,
}

impl fmt::Display for ExcelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "#NULL!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Value => "#VALUE!",
            Self::Div => "#DIV/0!",
            Self::Na => "#N/A",
            Self::Num => "#NUM!",
            Self::Error => "#ERROR!",
            Self::Calc => "#CALC!",
            Self::Busy => "#BUSY!",
            Self::Cancelled => "#CANCELLED!",
        })
    }
}

/// The single error struct passed around as a cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExcelError {
    pub kind: ExcelErrorKind,
    pub message: Option<String>,
}

impl From<ExcelErrorKind> for ExcelError {
    fn from(kind: ExcelErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

impl ExcelError {
    /// Basic constructor (no message).
    pub fn new(kind: ExcelErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl fmt::Display for ExcelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl Error for ExcelError {}

impl From<ExcelError> for CellValue {
    fn from(error: ExcelError) -> Self {
        CellValue::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_render_as_the_host_shows_them() {
        assert_eq!(ExcelErrorKind::Na.to_string(), "#N/A");
        assert_eq!(ExcelErrorKind::Div.to_string(), "#DIV/0!");
        assert_eq!(ExcelErrorKind::Cancelled.to_string(), "#CANCELLED!");
    }

    #[test]
    fn message_rendering() {
        let err = ExcelError::new(ExcelErrorKind::Value).with_message("boom");
        assert_eq!(err.to_string(), "#VALUE!: boom");
        assert_eq!(ExcelError::from(ExcelErrorKind::Value).to_string(), "#VALUE!");
    }
}
