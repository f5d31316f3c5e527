// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Package versions, ranges and version constraints.
//!
//! Versions are dot-separated segments. Numeric segments compare numerically,
//! alphabetic segments compare lexically and sort before numeric ones, and a
//! version that is a strict prefix of another sorts first (`1.0 < 1.0.1`).
//!
//! Range bounds are prefix-inclusive: `@1.2` matches `1.2`, `1.2.0` and
//! `1.2.7`, and `@1.0:1.2` matches everything from `1.0` up to any `1.2.x`.
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{InvalidConstraintError, RequestError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Segment {
    Num(u64),
    Alpha(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.cmp(b),
            (Self::Alpha(a), Self::Alpha(b)) => a.cmp(b),
            (Self::Alpha(_), Self::Num(_)) => Ordering::Less,
            (Self::Num(_), Self::Alpha(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single exact package version such as `1.0.2`.
///
/// Equality and ordering are defined on the parsed segments, so `1.00` and
/// `1.0` are the same version; the original text is kept for display.
#[derive(Clone, Debug)]
pub struct Version {
    segments: Vec<Segment>,
    text: String,
}

impl Version {
    /// Parses a version string.
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InvalidConstraintError::new("<version>", "empty version").into());
        }
        let mut segments = Vec::new();
        for part in text.split(['.', '-', '_']) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(InvalidConstraintError::new(
                    "<version>",
                    format!("malformed version `{text}`"),
                )
                .into());
            }
            segments.push(part.parse::<u64>().map_or_else(
                |_| Segment::Alpha(part.to_ascii_lowercase()),
                Segment::Num,
            ));
        }
        Ok(Self {
            segments,
            text: text.to_string(),
        })
    }

    /// The version as originally written.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns `true` if `self`'s segments are a prefix of `other`'s.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Closed or half-open interval of versions with a prefix-inclusive upper bound.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VersionRange {
    /// Inclusive lower bound; `None` is unbounded.
    pub lo: Option<Version>,
    /// Prefix-inclusive upper bound; `None` is unbounded.
    pub hi: Option<Version>,
}

impl VersionRange {
    /// Range matching exactly the versions that start with `v`.
    pub fn prefix(v: Version) -> Self {
        Self {
            lo: Some(v.clone()),
            hi: Some(v),
        }
    }

    /// Returns `true` when `v` falls inside the range.
    pub fn contains(&self, v: &Version) -> bool {
        let above = self.lo.as_ref().is_none_or(|lo| v >= lo);
        let below = self
            .hi
            .as_ref()
            .is_none_or(|hi| v <= hi || hi.is_prefix_of(v));
        above && below
    }

    /// The versions both ranges contain, or `None` when they are disjoint.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let lo = match (&self.lo, &other.lo) {
            (Some(a), Some(b)) => Some(a.max(b).clone()),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let hi = match (&self.hi, &other.hi) {
            (Some(a), Some(b)) if a.is_prefix_of(b) => Some(b.clone()),
            (Some(a), Some(b)) if b.is_prefix_of(a) => Some(a.clone()),
            (Some(a), Some(b)) => Some(a.min(b).clone()),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let range = Self { lo, hi };
        range.lo.as_ref().is_none_or(|lo| range.contains(lo)).then_some(range)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) if lo == hi => write!(f, "{lo}"),
            (Some(lo), Some(hi)) => write!(f, "{lo}:{hi}"),
            (Some(lo), None) => write!(f, "{lo}:"),
            (None, Some(hi)) => write!(f, ":{hi}"),
            (None, None) => f.write_str(":"),
        }
    }
}

/// Version requirement attached to an abstract node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum VersionConstraint {
    /// Any version.
    #[default]
    Any,
    /// Exactly this version (`@=1.0`), no prefix matching.
    Exact(Version),
    /// Union of ranges (`@1.0:1.2,2.1`).
    Ranges(Vec<VersionRange>),
}

impl VersionConstraint {
    /// Parses the text following `@`.
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let text = text.trim();
        if let Some(exact) = text.strip_prefix('=') {
            return Ok(Self::Exact(Version::parse(exact)?));
        }
        if text.is_empty() {
            return Err(InvalidConstraintError::new("<version>", "empty version constraint").into());
        }
        let mut ranges = Vec::new();
        for part in text.split(',') {
            let range = match part.split_once(':') {
                None => VersionRange::prefix(Version::parse(part)?),
                Some((lo, hi)) => VersionRange {
                    lo: (!lo.trim().is_empty())
                        .then(|| Version::parse(lo))
                        .transpose()?,
                    hi: (!hi.trim().is_empty())
                        .then(|| Version::parse(hi))
                        .transpose()?,
                },
            };
            ranges.push(range);
        }
        Ok(Self::Ranges(ranges))
    }

    /// Returns `true` when `v` satisfies the constraint.
    pub fn contains(&self, v: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == v,
            Self::Ranges(ranges) => ranges.iter().any(|r| r.contains(v)),
        }
    }

    /// Narrows `self` by `other`; `None` when no version satisfies both.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, c) | (c, Self::Any) => Some(c.clone()),
            (Self::Exact(v), c) | (c, Self::Exact(v)) => c.contains(v).then(|| Self::Exact(v.clone())),
            (Self::Ranges(a), Self::Ranges(b)) => {
                let ranges: Vec<VersionRange> = a
                    .iter()
                    .flat_map(|x| b.iter().filter_map(move |y| x.intersection(y)))
                    .collect();
                (!ranges.is_empty()).then_some(Self::Ranges(ranges))
            }
        }
    }

    /// Returns `true` for [`VersionConstraint::Any`].
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// The single version this constraint pins, if it pins exactly one.
    ///
    /// `@=1.0` and the single-point form `@1.0` both pin `1.0`.
    pub fn pinned(&self) -> Option<&Version> {
        match self {
            Self::Exact(v) => Some(v),
            Self::Ranges(ranges) => match ranges.as_slice() {
                [VersionRange {
                    lo: Some(lo),
                    hi: Some(hi),
                }] if lo == hi => Some(lo),
                _ => None,
            },
            Self::Any => None,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => Ok(()),
            Self::Exact(v) => write!(f, "={v}"),
            Self::Ranges(ranges) => {
                for (i, range) in ranges.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{range}")?;
                }
                Ok(())
            }
        }
    }
}
