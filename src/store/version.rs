//! Store version compatibility gate.
//!
//! The beads database records the version of the tool that last migrated it
//! under `metadata.bd_version`. Claiming against a store older than
//! [`MIN_COMPATIBLE_VERSION`] is refused.

use std::fmt;

use crate::error::{Error, Result};

/// Oldest store layout the claim algorithm understands.
pub const MIN_COMPATIBLE_VERSION: &str = "0.20.0";

/// Metadata key holding the store version.
pub const VERSION_KEY: &str = "bd_version";

/// A `major.minor.patch` triple, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl StoreVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Lenient parse: optional leading `v`, missing components are 0, and
    /// each component uses its leading digits (`2-beta` reads as 2).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        let mut parts = raw.split('.').map(leading_number);
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

impl fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn leading_number(part: &str) -> u64 {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().unwrap_or(0)
}

/// `found >= minimum`, compared as version triples.
pub fn is_compatible(found: &str, minimum: &str) -> bool {
    StoreVersion::parse(found) >= StoreVersion::parse(minimum)
}

/// Gate a stored marker. A missing or blank marker is treated as a legacy
/// store and accepted.
pub fn check(found: Option<&str>, minimum: &str) -> Result<()> {
    match found.map(str::trim).filter(|v| !v.is_empty()) {
        Some(found) if !is_compatible(found, minimum) => Err(Error::SchemaIncompatible {
            found: found.to_string(),
            minimum: minimum.to_string(),
        }),
        _ => Ok(()),
    }
}
