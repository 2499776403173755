//! VCF version parsing and ordering.

use std::cmp::Ordering;
use std::fmt;

use crate::error::VuoError;

/// One segment of a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Num(u64),
    Text(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            // Numeric segments sort before textual ones
            (Self::Num(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A version normalized to four segments, e.g. `5.2.1` → `(5, 2, 1, 0)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version([Segment; 4]);

impl Version {
    /// Parse a dotted version string with 1 to 4 segments.
    ///
    /// A build suffix after `-` (e.g. `5.2.0.0-24108943`) is dropped.
    pub fn parse(version: &str) -> Result<Self, VuoError> {
        let core = version.trim().split('-').next().unwrap_or_default();
        if core.is_empty() {
            return Err(VuoError::InvalidVersion(version.to_string()));
        }

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(VuoError::InvalidVersion(version.to_string()));
        }

        let mut segments = [
            Segment::Num(0),
            Segment::Num(0),
            Segment::Num(0),
            Segment::Num(0),
        ];
        for (slot, part) in segments.iter_mut().zip(parts) {
            *slot = part
                .parse::<u64>()
                .map_or_else(|_| Segment::Text(part.to_string()), Segment::Num);
        }
        Ok(Self(segments))
    }

    pub const fn segments(&self) -> &[Segment; 4] {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = &self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl std::str::FromStr for Version {
    type Err = VuoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
