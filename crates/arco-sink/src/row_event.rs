//! Row event classification.
//!
//! Upstream rows arrive annotated with a change-kind marker (`+I`, `-D`, `-U`,
//! `+U`). Classification turns the marker into a [`RowKind`] and fails fast on
//! anything else; rows are never silently dropped.

use std::fmt;
use std::str::FromStr;

use arco_core::Row;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};

/// Change kind of a row event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    /// A new row (`+I`).
    Insert,
    /// The old image of an updated row (`-U`).
    UpdateBefore,
    /// The new image of an updated row (`+U`).
    UpdateAfter,
    /// A removed row (`-D`).
    Delete,
}

impl RowKind {
    /// Parses a change-kind marker.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::UnrecognizedRowKind` for anything other than
    /// `+I`, `-U`, `+U` or `-D`.
    pub fn from_marker(marker: &str) -> Result<Self> {
        match marker {
            "+I" => Ok(Self::Insert),
            "-U" => Ok(Self::UpdateBefore),
            "+U" => Ok(Self::UpdateAfter),
            "-D" => Ok(Self::Delete),
            other => Err(SinkError::UnrecognizedRowKind {
                marker: other.to_string(),
            }),
        }
    }

    /// Parses the compact byte encoding used on the wire.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::UnrecognizedRowKind` for values above 3.
    pub fn from_byte_value(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Insert),
            1 => Ok(Self::UpdateBefore),
            2 => Ok(Self::UpdateAfter),
            3 => Ok(Self::Delete),
            other => Err(SinkError::UnrecognizedRowKind {
                marker: format!("byte value {other}"),
            }),
        }
    }

    /// Returns the marker string (`+I`, `-U`, `+U`, `-D`).
    #[must_use]
    pub const fn short_string(self) -> &'static str {
        match self {
            Self::Insert => "+I",
            Self::UpdateBefore => "-U",
            Self::UpdateAfter => "+U",
            Self::Delete => "-D",
        }
    }

    /// Returns the compact byte encoding.
    #[must_use]
    pub const fn byte_value(self) -> u8 {
        match self {
            Self::Insert => 0,
            Self::UpdateBefore => 1,
            Self::UpdateAfter => 2,
            Self::Delete => 3,
        }
    }

    /// Returns true for kinds that remove a row (`-D`, `-U`).
    #[must_use]
    pub const fn is_retraction(self) -> bool {
        matches!(self, Self::Delete | Self::UpdateBefore)
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_string())
    }
}

impl FromStr for RowKind {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_marker(s)
    }
}

/// A row as delivered by the stream runtime, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// External change-kind marker.
    pub marker: String,
    /// Row values in table schema order.
    pub row: Row,
}

impl RawRow {
    /// Creates a raw row.
    #[must_use]
    pub fn new(marker: impl Into<String>, row: Row) -> Self {
        Self {
            marker: marker.into(),
            row,
        }
    }
}

/// A classified row event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowEvent {
    kind: RowKind,
    row: Row,
}

impl RowEvent {
    /// Creates an event of a known kind.
    #[must_use]
    pub fn new(kind: RowKind, row: Row) -> Self {
        Self { kind, row }
    }

    /// Returns the change kind.
    #[must_use]
    pub fn kind(&self) -> RowKind {
        self.kind
    }

    /// Returns the row payload.
    #[must_use]
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Consumes the event, returning its row payload.
    #[must_use]
    pub fn into_row(self) -> Row {
        self.row
    }
}

/// Classifies a raw row into a [`RowEvent`].
///
/// # Errors
///
/// Returns `SinkError::UnrecognizedRowKind` if the marker is not recognized.
pub fn classify(raw: RawRow) -> Result<RowEvent> {
    let kind = RowKind::from_marker(&raw.marker)?;
    Ok(RowEvent::new(kind, raw.row))
}
