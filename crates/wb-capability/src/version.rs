//! Semantic versions and version ranges for capabilities
//!
//! Ranges are comma-separated comparators, all of which must hold:
//! `>=1.0, <2`, `=1.2.3`, `^1.2`, `~1.2`, `*`. Partial versions are
//! zero-filled. A bare version is read as a caret range.

use crate::error::CapabilityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `MAJOR.MINOR.PATCH` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a full `MAJOR.MINOR.PATCH` version
    ///
    /// # Errors
    /// `InvalidVersion` unless exactly three numeric parts are present.
    pub fn parse(s: &str) -> Result<Self, CapabilityError> {
        let partial = Partial::parse(s)?;
        if partial.parts != 3 {
            return Err(CapabilityError::invalid_version(
                s,
                "expected MAJOR.MINOR.PATCH",
            ));
        }
        Ok(partial.version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = CapabilityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// A possibly partial version with the number of parts actually written
#[derive(Debug, Clone, Copy)]
struct Partial {
    version: Version,
    parts: usize,
}

impl Partial {
    fn parse(s: &str) -> Result<Self, CapabilityError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CapabilityError::invalid_version(s, "empty version"));
        }
        let mut nums = [0u32; 3];
        let mut parts = 0;
        for piece in trimmed.split('.') {
            if parts == 3 {
                return Err(CapabilityError::invalid_version(s, "too many components"));
            }
            nums[parts] = piece
                .parse::<u32>()
                .map_err(|_| CapabilityError::invalid_version(s, "non-numeric component"))?;
            parts += 1;
        }
        Ok(Self {
            version: Version::new(nums[0], nums[1], nums[2]),
            parts,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Caret,
    Tilde,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Exact => "=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
            Op::Caret => "^",
            Op::Tilde => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
    parts: usize,
}

impl Comparator {
    fn parse(s: &str) -> Result<Self, CapabilityError> {
        let s = s.trim();
        let (op, rest) = [
            (">=", Op::GreaterEq),
            ("<=", Op::LessEq),
            (">", Op::Greater),
            ("<", Op::Less),
            ("=", Op::Exact),
            ("^", Op::Caret),
            ("~", Op::Tilde),
        ]
        .iter()
        .find_map(|(prefix, op)| s.strip_prefix(*prefix).map(|rest| (*op, rest)))
        .unwrap_or((Op::Caret, s));

        let partial = Partial::parse(rest)?;
        Ok(Self {
            op,
            version: partial.version,
            parts: partial.parts,
        })
    }

    fn matches(&self, v: &Version) -> bool {
        let base = self.version;
        match self.op {
            Op::Exact => *v == base,
            Op::Greater => *v > base,
            Op::GreaterEq => *v >= base,
            Op::Less => *v < base,
            Op::LessEq => *v <= base,
            Op::Tilde => *v >= base && self.tilde_upper().map_or(true, |upper| *v < upper),
            Op::Caret => *v >= base && self.caret_upper().map_or(true, |upper| *v < upper),
        }
    }

    /// Exclusive upper bound; `None` when the bumped component overflows
    fn tilde_upper(&self) -> Option<Version> {
        let b = self.version;
        if self.parts == 1 {
            Some(Version::new(b.major.checked_add(1)?, 0, 0))
        } else {
            Some(Version::new(b.major, b.minor.checked_add(1)?, 0))
        }
    }

    fn caret_upper(&self) -> Option<Version> {
        let b = self.version;
        if b.major > 0 || self.parts == 1 {
            Some(Version::new(b.major.checked_add(1)?, 0, 0))
        } else if b.minor > 0 || self.parts == 2 {
            Some(Version::new(0, b.minor.checked_add(1)?, 0))
        } else {
            Some(Version::new(0, 0, b.patch.checked_add(1)?))
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.version;
        let written = match self.parts {
            1 => v.major.to_string(),
            2 => format!("{}.{}", v.major, v.minor),
            _ => v.to_string(),
        };
        write!(f, "{}{written}", self.op.symbol())
    }
}

/// A set of comparators a version must all satisfy
///
/// The empty set (`*`) matches every version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionReq {
    comparators: Vec<Comparator>,
}

impl VersionReq {
    /// Matches any version
    #[must_use]
    pub const fn any() -> Self {
        Self {
            comparators: Vec::new(),
        }
    }

    /// Matches exactly `version`
    #[must_use]
    pub fn exact(version: Version) -> Self {
        Self {
            comparators: vec![Comparator {
                op: Op::Exact,
                version,
                parts: 3,
            }],
        }
    }

    /// Parse a comma-separated range expression
    ///
    /// # Errors
    /// `InvalidVersion` on a malformed comparator.
    pub fn parse(s: &str) -> Result<Self, CapabilityError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::any());
        }
        let comparators = trimmed
            .split(',')
            .map(str::trim)
            .filter(|c| *c != "*")
            .map(Comparator::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { comparators })
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.comparators.iter().all(|c| c.matches(version))
    }

    /// Whether this range accepts every version
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.comparators.is_empty()
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comparators.is_empty() {
            return f.write_str("*");
        }
        for (i, c) in self.comparators.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionReq {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionReq {
    type Error = CapabilityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VersionReq> for String {
    fn from(r: VersionReq) -> Self {
        r.to_string()
    }
}
