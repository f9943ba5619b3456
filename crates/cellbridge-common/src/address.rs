//! Caller addresses: the workbook-qualified cell a formula is executing in.

use std::error::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors that can occur while constructing caller addresses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallerAddressError {
    /// Text did not have the `[workbook]reference` shape.
    MissingWorkbook,
    /// The reference part after the workbook was empty.
    EmptyReference,
}

impl fmt::Display for CallerAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerAddressError::MissingWorkbook => {
                write!(f, "caller must have the form [workbook]reference")
            }
            CallerAddressError::EmptyReference => {
                write!(f, "caller reference is empty")
            }
        }
    }
}

impl Error for CallerAddressError {}

/// Workbook-qualified address of a calling cell.
///
/// `reference` is normally `sheet!cell` (e.g. `Sheet1!A1`) but may be an
/// arbitrary tag for manually keyed entries.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CallerAddress {
    workbook: String,
    reference: String,
}

impl CallerAddress {
    /// Build from the three parts the host reports for the calling cell.
    pub fn new(workbook: impl Into<String>, sheet: &str, cell: &str) -> Self {
        Self {
            workbook: workbook.into(),
            reference: format!("{sheet}!{cell}"),
        }
    }

    /// Build from a workbook and a free-form reference (tag).
    pub fn tagged(
        workbook: impl Into<String>,
        reference: impl Into<String>,
    ) -> Result<Self, CallerAddressError> {
        let reference = reference.into();
        if reference.is_empty() {
            return Err(CallerAddressError::EmptyReference);
        }
        Ok(Self {
            workbook: workbook.into(),
            reference,
        })
    }

    /// Parse `[workbook]reference`.
    ///
    /// The *last* `]` ends the workbook name, since workbook names may
    /// themselves contain brackets.
    pub fn parse(text: &str) -> Result<Self, CallerAddressError> {
        let rest = text
            .strip_prefix('[')
            .ok_or(CallerAddressError::MissingWorkbook)?;
        let close = rest.rfind(']').ok_or(CallerAddressError::MissingWorkbook)?;
        Self::tagged(&rest[..close], &rest[close + 1..])
    }

    pub fn workbook(&self) -> &str {
        &self.workbook
    }

    /// `sheet!cell` (or the tag).
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for CallerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.workbook, self.reference)
    }
}
