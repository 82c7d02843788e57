// src/identifier.rs

//! Canonical identifiers and identifier normalization
//!
//! A canonical identifier is reverse-DNS style: dot-separated alphanumeric
//! segments (`com.acme.app`). Component identifiers declared inside an
//! archive are additionally allowed hyphens, which distribution services
//! accept in bundle identifiers.

use crate::error::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static CANONICAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+(\.[A-Za-z0-9]+)*$").expect("valid regex"));

static DECLARED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*$").expect("valid regex"));

/// The authoritative root identifier every component derives from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalIdentifier(String);

impl CanonicalIdentifier {
    /// Validate and wrap a canonical identifier
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::InvalidInput(
                "canonical identifier must not be empty".to_string(),
            ));
        }
        if !CANONICAL_RE.is_match(value) {
            return Err(Error::InvalidInput(format!(
                "malformed canonical identifier: {:?}",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build `<canonical>.<suffix>`
    pub fn derive(&self, suffix: &str) -> String {
        format!("{}.{}", self.0, suffix)
    }

    /// Whether `identifier` is exactly the canonical identifier
    pub fn is_exact(&self, identifier: &str) -> bool {
        identifier == self.0
    }

    /// Whether `identifier` is strictly nested under the canonical identifier
    pub fn is_parent_of(&self, identifier: &str) -> bool {
        identifier
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|rest| !rest.is_empty())
    }

    /// Normalized form used for collision comparisons
    pub fn normalized(&self) -> String {
        normalize(&self.0)
    }
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CanonicalIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Normalize an identifier for comparison (trimmed, ASCII-lowercased)
///
/// Distribution services compare bundle identifiers case-insensitively, so
/// `com.Acme.App` and `com.acme.app` collide.
pub fn normalize(identifier: &str) -> String {
    identifier.trim().to_ascii_lowercase()
}

/// Whether a declared component identifier is syntactically valid
pub fn is_well_formed(identifier: &str) -> bool {
    DECLARED_RE.is_match(identifier)
}
