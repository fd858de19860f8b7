//! Life-like rule notation: parsing, canonical form, mutation and distance.
//!
//! A rule is a pair of neighbor-count sets over the Moore neighborhood
//! (0..=8 live neighbors). `B3/S23` is Conway's Game of Life: a dead cell with
//! exactly three live neighbors is born, a live cell with two or three
//! survives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Largest neighbor count in a Moore neighborhood.
pub const MAX_NEIGHBORS: u8 = 8;

const FULL_MASK: u16 = (1 << (MAX_NEIGHBORS as u16 + 1)) - 1;

/// A set of neighbor counts in `0..=8`, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NeighborSet(u16);

impl NeighborSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every count from 0 through 8.
    pub const fn full() -> Self {
        Self(FULL_MASK)
    }

    /// Build a set from counts, rejecting anything above 8.
    pub fn from_counts<I: IntoIterator<Item = u8>>(counts: I) -> Result<Self, RuleError> {
        let mut set = Self::empty();
        for count in counts {
            if count > MAX_NEIGHBORS {
                return Err(RuleError::CountOutOfRange(count));
            }
            set.insert(count);
        }
        Ok(set)
    }

    /// Whether `count` is in the set. Counts above 8 never are.
    #[inline]
    pub fn contains(self, count: u8) -> bool {
        count <= MAX_NEIGHBORS && self.0 & (1 << count) != 0
    }

    /// Insert a count. Returns false if it was already present.
    #[inline]
    pub fn insert(&mut self, count: u8) -> bool {
        debug_assert!(count <= MAX_NEIGHBORS);
        let had = self.contains(count);
        self.0 |= 1 << count;
        !had
    }

    /// Remove a count. Returns false if it was absent.
    #[inline]
    pub fn remove(&mut self, count: u8) -> bool {
        let had = self.contains(count);
        self.0 &= !(1 << count);
        had
    }

    /// Number of counts in the set.
    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether no count is present.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Counts in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..=MAX_NEIGHBORS).filter(move |&c| self.contains(c))
    }

    /// Counts as a sorted vector.
    pub fn to_vec(self) -> Vec<u8> {
        self.iter().collect()
    }

    /// Smallest count, if any.
    pub fn min(self) -> Option<u8> {
        self.iter().next()
    }

    /// Largest count, if any.
    pub fn max(self) -> Option<u8> {
        self.iter().last()
    }

    /// Size of the symmetric difference.
    #[inline]
    pub fn symmetric_difference_len(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Number of counts present in both sets.
    #[inline]
    pub fn intersection_len(self, other: Self) -> usize {
        (self.0 & other.0).count_ones() as usize
    }

    /// Counts not in this set.
    pub fn inverted(self) -> Self {
        Self(!self.0 & FULL_MASK)
    }

    /// Mirror every count `n` to `8 - n`.
    pub fn mirrored(self) -> Self {
        let mut out = Self::empty();
        for c in self.iter() {
            out.insert(MAX_NEIGHBORS - c);
        }
        out
    }
}

impl fmt::Display for NeighborSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.iter() {
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// A Life-like rule: birth counts and survival counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RuleNotation {
    pub born: NeighborSet,
    pub survive: NeighborSet,
}

impl RuleNotation {
    /// Rule from birth and survival sets.
    pub const fn new(born: NeighborSet, survive: NeighborSet) -> Self {
        Self { born, survive }
    }

    /// Build from raw counts.
    pub fn from_counts(born: &[u8], survive: &[u8]) -> Result<Self, RuleError> {
        Ok(Self {
            born: NeighborSet::from_counts(born.iter().copied())?,
            survive: NeighborSet::from_counts(survive.iter().copied())?,
        })
    }

    /// Conway's Game of Life, `B3/S23`.
    pub fn life() -> Self {
        let mut born = NeighborSet::empty();
        born.insert(3);
        let mut survive = NeighborSet::empty();
        survive.insert(2);
        survive.insert(3);
        Self { born, survive }
    }

    /// Canonical `B{born}/S{survive}` string.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Number of single-count edits separating two rules.
    ///
    /// Symmetric, non-negative, and zero exactly when the rules are equal.
    pub fn distance(&self, other: &Self) -> u32 {
        self.born.symmetric_difference_len(other.born)
            + self.survive.symmetric_difference_len(other.survive)
    }

    /// Every rule at distance one: add or remove a single count in either set.
    ///
    /// Removing the last element of a set is skipped so the neighborhood
    /// stays local and non-degenerate. The rule itself is never included.
    pub fn neighbors(&self) -> Vec<RuleNotation> {
        let mut out = Vec::with_capacity(2 * (MAX_NEIGHBORS as usize + 1));

        for c in 0..=MAX_NEIGHBORS {
            let mut born = self.born;
            if born.contains(c) {
                if born.len() > 1 {
                    born.remove(c);
                    out.push(Self::new(born, self.survive));
                }
            } else {
                born.insert(c);
                out.push(Self::new(born, self.survive));
            }
        }

        for c in 0..=MAX_NEIGHBORS {
            let mut survive = self.survive;
            if survive.contains(c) {
                if survive.len() > 1 {
                    survive.remove(c);
                    out.push(Self::new(self.born, survive));
                }
            } else {
                survive.insert(c);
                out.push(Self::new(self.born, survive));
            }
        }

        out
    }

    /// Rule that behaves identically on the inverted grid.
    ///
    /// A dead cell of the inverted grid with `n` live neighbors is a live cell
    /// of the original with `8 - n`, so it is born exactly when the original
    /// would not survive.
    pub fn complement(&self) -> Self {
        Self {
            born: self.survive.inverted().mirrored(),
            survive: self.born.inverted().mirrored(),
        }
    }

    /// Whether the rule equals its own complement, as `B3678/S34678` does.
    pub fn is_self_complementary(&self) -> bool {
        *self == self.complement()
    }
}

impl fmt::Display for RuleNotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}/S{}", self.born, self.survive)
    }
}

impl FromStr for RuleNotation {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (born_part, survive_part) = s
            .split_once('/')
            .ok_or_else(|| RuleError::MissingSeparator(s.to_string()))?;

        Ok(Self {
            born: parse_counts(born_part, 'B', s)?,
            survive: parse_counts(survive_part, 'S', s)?,
        })
    }
}

fn parse_counts(part: &str, prefix: char, whole: &str) -> Result<NeighborSet, RuleError> {
    let digits = part
        .strip_prefix(prefix)
        .or_else(|| part.strip_prefix(prefix.to_ascii_lowercase()))
        .unwrap_or(part);

    let mut set = NeighborSet::empty();
    for ch in digits.chars() {
        let count = ch
            .to_digit(10)
            .ok_or_else(|| RuleError::InvalidCharacter {
                notation: whole.to_string(),
                ch,
            })? as u8;
        if count > MAX_NEIGHBORS {
            return Err(RuleError::CountOutOfRange(count));
        }
        if !set.insert(count) {
            return Err(RuleError::DuplicateCount {
                notation: whole.to_string(),
                count,
            });
        }
    }
    Ok(set)
}

/// Parse any accepted spelling and return the canonical string.
pub fn normalize(notation: &str) -> Result<String, RuleError> {
    Ok(notation.parse::<RuleNotation>()?.canonical())
}

impl Serialize for RuleNotation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RuleNotation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Malformed rule notation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("Malformed notation '{0}': expected B<digits>/S<digits>")]
    MissingSeparator(String),
    #[error("Malformed notation '{notation}': unexpected character '{ch}'")]
    InvalidCharacter { notation: String, ch: char },
    #[error("Malformed notation '{notation}': count {count} listed twice")]
    DuplicateCount { notation: String, count: u8 },
    #[error("Neighbor count {0} is outside 0..=8")]
    CountOutOfRange(u8),
}
