// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dependency-type sets carried on edges.
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Subset of `{build, link, run, test}` describing why an edge exists.
///
/// Packed into the low four bits of a `u8`; the packed value is committed into
/// node hashes, so bit assignments are part of the persisted identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DepTypes(u8);

impl DepTypes {
    /// Empty set.
    pub const NONE: Self = Self(0);
    /// Needed only while building the consumer.
    pub const BUILD: Self = Self(0b0001);
    /// Linked into the consumer's artifact.
    pub const LINK: Self = Self(0b0010);
    /// Needed when the consumer runs.
    pub const RUN: Self = Self(0b0100);
    /// Needed only for the consumer's test suite.
    pub const TEST: Self = Self(0b1000);
    /// Every dependency type.
    pub const ALL: Self = Self(0b1111);
    /// Link and run: what an already-built artifact still needs.
    pub const LINK_RUN: Self = Self(0b0110);
    /// Default for dependency declarations that do not name a type.
    pub const DEFAULT: Self = Self(0b0011);

    const NAMES: [(&'static str, Self); 4] = [
        ("build", Self::BUILD),
        ("link", Self::LINK),
        ("run", Self::RUN),
        ("test", Self::TEST),
    ];

    /// Raw packed bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` when no type is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when every bit of `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when the sets share at least one type.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Set difference.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns `true` for edges that exist only to build the consumer.
    pub const fn is_build_only(self) -> bool {
        self.0 == Self::BUILD.0
    }

    /// Parses a single type name (`build`, `link`, `run`, `test`).
    pub fn parse_one(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(label, _)| *label == name)
            .map(|(_, ty)| *ty)
    }

    /// Parses a comma-separated list such as `build,link`.
    pub fn parse_list(list: &str) -> Option<Self> {
        let mut out = Self::NONE;
        for part in list.split(',') {
            out |= Self::parse_one(part.trim())?;
        }
        (!out.is_empty()).then_some(out)
    }

    /// Names of the set types in canonical order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, ty)| self.contains(*ty))
            .map(|(label, _)| *label)
            .collect()
    }
}

impl BitOr for DepTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DepTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

impl fmt::Debug for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DepTypes({self})")
    }
}
