//! Module versions and dependency version requirements.
//!
//! Versions are one to four dot-separated unsigned integers (`1`, `1.2`, `1.2.3`, `1.2.3.4`).
//! Missing components compare as zero, so `1.2` and `1.2.0` are equal.
//!
//! Requirements accept:
//! - `*` or an empty string: any version
//! - `1.2.3`: exactly this version
//! - `^1.2.3`: at least `1.2.3`, below `2.0.0`
//! - `~1.2.3`: at least `1.2.3`, below `1.3.0`
//! - `>=1.2`, `>1.2`, `<=1.2`, `<1.2`: one-sided bounds
//! - `1.0 - 2.0`: inclusive range

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

const MAX_COMPONENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{input}': {reason}")]
pub struct VersionError {
    pub input: String,
    pub reason: &'static str,
}

impl VersionError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_owned(),
            reason,
        }
    }
}

/// Dotted numeric version.
#[derive(Debug, Clone, Copy, Default)]
pub struct Version {
    parts: [u64; MAX_COMPONENTS],
    len: usize,
}

impl Version {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            parts: [major, minor, patch, 0],
            len: 3,
        }
    }

    #[must_use]
    pub const fn major(&self) -> u64 {
        self.parts[0]
    }

    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.parts[1]
    }

    #[must_use]
    pub const fn patch(&self) -> u64 {
        self.parts[2]
    }

    fn next_major(&self) -> Self {
        Self::new(self.major().saturating_add(1), 0, 0)
    }

    fn next_minor(&self) -> Self {
        Self::new(self.major(), self.minor().saturating_add(1), 0)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::new(s, "empty version"));
        }

        let mut parts = [0u64; MAX_COMPONENTS];
        let mut len = 0;
        for component in trimmed.split('.') {
            if len == MAX_COMPONENTS {
                return Err(VersionError::new(s, "more than four components"));
            }
            parts[len] = component
                .parse()
                .map_err(|_| VersionError::new(s, "components must be unsigned integers"))?;
            len += 1;
        }

        Ok(Self { parts, len })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.len.max(1);
        for (i, part) in self.parts[..shown].iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

/// A version requirement attached to a dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReq {
    lower: Bound<Version>,
    upper: Bound<Version>,
    raw: String,
}

impl VersionReq {
    /// Requirement satisfied by every version.
    #[must_use]
    pub fn any() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            raw: "*".to_owned(),
        }
    }

    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(
            (&self.lower, &self.upper),
            (Bound::Unbounded, Bound::Unbounded)
        )
    }

    /// Check whether `version` falls inside this requirement.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        let above_lower = match &self.lower {
            Bound::Included(min) => version >= min,
            Bound::Excluded(min) => version > min,
            Bound::Unbounded => true,
        };
        let below_upper = match &self.upper {
            Bound::Included(max) => version <= max,
            Bound::Excluded(max) => version < max,
            Bound::Unbounded => true,
        };
        above_lower && below_upper
    }

    fn bounded(lower: Bound<Version>, upper: Bound<Version>, raw: &str) -> Self {
        Self {
            lower,
            upper,
            raw: raw.to_owned(),
        }
    }
}

impl FromStr for VersionReq {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let req = s.trim();
        if req.is_empty() || req == "*" {
            return Ok(Self::any());
        }

        // Two-character operators must be checked before their one-character prefixes.
        if let Some(rest) = req.strip_prefix(">=") {
            let v: Version = rest.parse()?;
            return Ok(Self::bounded(Bound::Included(v), Bound::Unbounded, req));
        }
        if let Some(rest) = req.strip_prefix("<=") {
            let v: Version = rest.parse()?;
            return Ok(Self::bounded(Bound::Unbounded, Bound::Included(v), req));
        }
        if let Some(rest) = req.strip_prefix('>') {
            let v: Version = rest.parse()?;
            return Ok(Self::bounded(Bound::Excluded(v), Bound::Unbounded, req));
        }
        if let Some(rest) = req.strip_prefix('<') {
            let v: Version = rest.parse()?;
            return Ok(Self::bounded(Bound::Unbounded, Bound::Excluded(v), req));
        }
        if let Some(rest) = req.strip_prefix('^') {
            let v: Version = rest.parse()?;
            return Ok(Self::bounded(
                Bound::Included(v),
                Bound::Excluded(v.next_major()),
                req,
            ));
        }
        if let Some(rest) = req.strip_prefix('~') {
            let v: Version = rest.parse()?;
            return Ok(Self::bounded(
                Bound::Included(v),
                Bound::Excluded(v.next_minor()),
                req,
            ));
        }
        if let Some((min, max)) = req.split_once('-') {
            let min: Version = min.parse()?;
            let max: Version = max.parse()?;
            if min > max {
                return Err(VersionError::new(s, "range lower bound exceeds upper bound"));
            }
            return Ok(Self::bounded(Bound::Included(min), Bound::Included(max), req));
        }

        let exact: Version = req.parse()?;
        Ok(Self::bounded(
            Bound::Included(exact),
            Bound::Included(exact),
            req,
        ))
    }
}

impl Default for VersionReq {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
