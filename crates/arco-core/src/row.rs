//! Positional row payloads.
//!
//! A [`Row`] is the value tuple of one change event, ordered like the table
//! schema. Rows compare structurally, never by identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};
use crate::scalar::ScalarValue;

/// Ordered field values of one table row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<ScalarValue>);

impl Row {
    /// Creates a row from its values in schema order.
    #[must_use]
    pub fn new(values: Vec<ScalarValue>) -> Self {
        Self(values)
    }

    /// Creates a row from anything yielding values in schema order.
    pub fn from_values(values: impl IntoIterator<Item = ScalarValue>) -> Self {
        Self(values.into_iter().collect())
    }

    /// Returns the values in schema order.
    #[must_use]
    pub fn values(&self) -> &[ScalarValue] {
        &self.0
    }

    /// Returns the value at `position`, if present.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&ScalarValue> {
        self.0.get(position)
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the row carries no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Projects the row onto `positions`, in the given order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if any position is out of range.
    pub fn project(&self, positions: &[usize]) -> Result<Vec<ScalarValue>> {
        positions
            .iter()
            .map(|&pos| {
                self.0.get(pos).cloned().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "column position {pos} out of range for row of {} values",
                        self.0.len()
                    ))
                })
            })
            .collect()
    }

    /// Verifies the row carries exactly `expected` values.
    ///
    /// # Errors
    ///
    /// Returns `Error::ArityMismatch` otherwise.
    pub fn check_arity(&self, expected: usize) -> Result<()> {
        if self.0.len() == expected {
            Ok(())
        } else {
            Err(Error::ArityMismatch {
                expected,
                actual: self.0.len(),
            })
        }
    }

    /// Returns the canonical string of the row: canonical values joined by `,`.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        canonical_join(&self.0)
    }
}

impl From<Vec<ScalarValue>> for Row {
    fn from(values: Vec<ScalarValue>) -> Self {
        Self(values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// Joins canonical value representations with `,`.
#[must_use]
pub fn canonical_join(values: &[ScalarValue]) -> String {
    values
        .iter()
        .map(ScalarValue::canonical_repr)
        .collect::<Vec<_>>()
        .join(",")
}

/// Hashes bytes to a `u64` that is identical in every process and build.
///
/// Uses the first 8 bytes of SHA-256. Task routing depends on this being
/// stable, so the std `Hasher` (randomly seeded per process) is not used.
#[must_use]
pub fn stable_hash64(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, data: &str) -> Row {
        Row::from_values([ScalarValue::Int64(id), ScalarValue::from(data)])
    }

    #[test]
    fn test_project_preserves_requested_order() {
        let r = row(1, "aaa");
        let projected = r.project(&[1, 0]).unwrap();
        assert_eq!(
            projected,
            vec![ScalarValue::from("aaa"), ScalarValue::Int64(1)]
        );
    }

    #[test]
    fn test_project_out_of_range() {
        let r = row(1, "aaa");
        assert!(matches!(r.project(&[2]), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_check_arity() {
        let r = row(1, "aaa");
        assert!(r.check_arity(2).is_ok());
        assert!(matches!(
            r.check_arity(3),
            Err(Error::ArityMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(row(1, "aaa"), row(1, "aaa"));
        assert_ne!(row(1, "aaa"), row(1, "bbb"));
    }

    #[test]
    fn test_stable_hash_is_deterministic() {
        let a = stable_hash64(row(1, "aaa").canonical_string().as_bytes());
        let b = stable_hash64(row(1, "aaa").canonical_string().as_bytes());
        let c = stable_hash64(row(2, "aaa").canonical_string().as_bytes());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        assert_eq!(row(1, "aaa").to_string(), r#"(1, "aaa")"#);
    }
}
