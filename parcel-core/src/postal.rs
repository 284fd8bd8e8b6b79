//! Canonical forms for country and postal codes.
//!
//! Range bounds and queried codes go through [`PostalKey::parse`] so that the
//! string ordering used for containment is identical at index-build time and
//! at query time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

/// Width every postal key is padded to. Matches the `VARCHAR(10)` range columns.
pub const POSTAL_CODE_WIDTH: usize = 10;

/// Sorts below every ASCII digit and letter and cannot survive normalization,
/// so padding never reorders two distinct codes.
const PAD: char = ' ';

/// ISO 3166-1 alpha-2 country code, always upper case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode([u8; 2]);

impl CountryCode {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let trimmed = raw.trim();
        let bytes = trimmed.as_bytes();
        if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(CoreError::ValidationError(format!(
                "country must be a two-letter code, got '{}'",
                raw
            )));
        }
        Ok(Self([bytes[0].to_ascii_uppercase(), bytes[1].to_ascii_uppercase()]))
    }

    pub fn as_str(&self) -> &str {
        // Both bytes are ASCII letters by construction.
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountryCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CountryCode {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CountryCode> for String {
    fn from(value: CountryCode) -> Self {
        value.as_str().to_string()
    }
}

/// A postal code in its fixed-width comparison form.
///
/// Normalization: trim, drop interior whitespace and `-`, upper-case, require
/// 1..=10 ASCII alphanumerics, then right-pad with a space to
/// [`POSTAL_CODE_WIDTH`]. A shorter code therefore sorts before every longer
/// code it is a prefix of (`"123" < "1230"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostalKey(String);

impl PostalKey {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.is_empty() {
            return Err(CoreError::ValidationError("postal code is empty".to_string()));
        }
        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::ValidationError(format!(
                "postal code '{}' contains invalid characters",
                raw
            )));
        }
        if normalized.len() > POSTAL_CODE_WIDTH {
            return Err(CoreError::ValidationError(format!(
                "postal code '{}' exceeds {} characters",
                raw, POSTAL_CODE_WIDTH
            )));
        }

        let mut padded = normalized;
        while padded.len() < POSTAL_CODE_WIDTH {
            padded.push(PAD);
        }
        Ok(Self(padded))
    }

    /// The padded comparison form.
    pub fn as_padded(&self) -> &str {
        &self.0
    }

    /// The normalized code without padding.
    pub fn code(&self) -> &str {
        self.0.trim_end_matches(PAD)
    }
}

impl fmt::Display for PostalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
