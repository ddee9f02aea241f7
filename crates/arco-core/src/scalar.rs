//! Typed cell values with a cross-process canonical encoding.
//!
//! Equality keys are hashed and compared across independently running writer
//! tasks, so every value must have exactly one byte representation.
//!
//! # Canonical Encoding
//!
//! ```text
//!   typed_value ::= type_tag ":" encoded_value
//!
//!   type_tag ::=
//!     "s" (string)  | "i" (int64)    | "b" (bool)
//!     "d" (date)    | "t" (timestamp) | "n" (null)
//!
//!   encoded_value ::=
//!     For "s": base64url_no_pad(utf8_bytes)
//!     For "i": decimal integer (no leading zeros except "0")
//!     For "b": "true" | "false"
//!     For "d": "YYYY-MM-DD"
//!     For "t": "YYYY-MM-DDTHH:MM:SS.ffffffZ"
//!     For "n": "null"
//! ```
//!
//! # Examples
//!
//! ```rust
//! use arco_core::scalar::ScalarValue;
//!
//! assert_eq!(ScalarValue::Int64(42).canonical_repr(), "i:42");
//! assert_eq!(ScalarValue::from("us-east").canonical_repr(), "s:dXMtZWFzdA");
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar value types allowed in rows.
///
/// Floats are intentionally excluded: equality deletes must match exactly,
/// and float equality does not survive serialization round trips.
///
/// The derived ordering sorts by variant first, then by value. It is only used
/// to give equality keys a deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalarValue {
    /// Explicit null value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// Arbitrary string (base64url encoded in canonical form).
    String(String),
    /// Date in YYYY-MM-DD format.
    Date(String),
    /// Timestamp in ISO 8601 format with microseconds, UTC.
    Timestamp(String),
}

impl ScalarValue {
    /// Returns the canonical representation with type tag.
    ///
    /// String values are base64url encoded (no padding) so the separator
    /// characters used by [`crate::Row::canonical_string`] never appear inside a value.
    #[must_use]
    pub fn canonical_repr(&self) -> String {
        let tag = self.type_tag();
        match self {
            Self::String(s) => format!("{tag}:{}", URL_SAFE_NO_PAD.encode(s.as_bytes())),
            Self::Int64(n) => format!("{tag}:{n}"),
            Self::Boolean(b) => format!("{tag}:{b}"),
            Self::Date(v) | Self::Timestamp(v) => format!("{tag}:{v}"),
            Self::Null => format!("{tag}:null"),
        }
    }

    /// Returns the type tag character.
    #[must_use]
    pub const fn type_tag(&self) -> char {
        match self {
            Self::String(_) => 's',
            Self::Int64(_) => 'i',
            Self::Boolean(_) => 'b',
            Self::Date(_) => 'd',
            Self::Timestamp(_) => 't',
            Self::Null => 'n',
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Int64(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(d) | Self::Timestamp(d) => f.write_str(d),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        Self::Int64(i64::from(value))
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_repr_all_types() {
        assert_eq!(ScalarValue::Boolean(true).canonical_repr(), "b:true");
        assert_eq!(ScalarValue::Int64(-7).canonical_repr(), "i:-7");
        assert_eq!(
            ScalarValue::Date("2025-01-15".into()).canonical_repr(),
            "d:2025-01-15"
        );
        assert_eq!(
            ScalarValue::Timestamp("2025-01-15T10:30:00.000000Z".into()).canonical_repr(),
            "t:2025-01-15T10:30:00.000000Z"
        );
        assert_eq!(ScalarValue::Null.canonical_repr(), "n:null");
        // "test" base64url = "dGVzdA"
        assert_eq!(ScalarValue::from("test").canonical_repr(), "s:dGVzdA");
    }

    #[test]
    fn test_canonical_repr_escapes_separators() {
        let value = ScalarValue::from("a,b:c=d");
        let repr = value.canonical_repr();
        let encoded = repr.strip_prefix("s:").unwrap();
        assert!(!encoded.contains(','));
        assert!(!encoded.contains(':'));
    }

    #[test]
    fn test_string_and_int_with_same_text_differ() {
        assert_ne!(
            ScalarValue::from("1").canonical_repr(),
            ScalarValue::Int64(1).canonical_repr()
        );
    }

    #[test]
    fn test_scalar_value_type_tags() {
        assert_eq!(ScalarValue::String("test".into()).type_tag(), 's');
        assert_eq!(ScalarValue::Int64(42).type_tag(), 'i');
        assert_eq!(ScalarValue::Boolean(true).type_tag(), 'b');
        assert_eq!(ScalarValue::Date("2025-01-15".into()).type_tag(), 'd');
        assert_eq!(
            ScalarValue::Timestamp("2025-01-15T10:30:00.000000Z".into()).type_tag(),
            't'
        );
        assert_eq!(ScalarValue::Null.type_tag(), 'n');
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(ScalarValue::from(None::<i64>), ScalarValue::Null);
        assert_eq!(ScalarValue::from(Some(3_i64)), ScalarValue::Int64(3));
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&ScalarValue::Int64(5)).unwrap();
        assert_eq!(json, r#"{"int64":5}"#);
    }
}
