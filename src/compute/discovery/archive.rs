//! Bounded Hall of Fame archive of promoted rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{HallOfFameEntry, ModuleProfile, RuleNotation};

/// Outcome of offering an entry to the archive.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// New rule added with room to spare.
    Inserted,
    /// Existing entry for the same rule replaced.
    Replaced,
    /// Added after evicting the lowest-composite member.
    Evicted(RuleNotation),
    /// Archive full and the entry does not beat its weakest member.
    Rejected,
}

impl Admission {
    pub fn admitted(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Persisted archive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallOfFameMeta {
    pub updated: DateTime<Utc>,
    pub count: usize,
    pub max_size: usize,
}

/// On-disk form of the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallOfFameDocument {
    pub meta: HallOfFameMeta,
    #[serde(default)]
    pub rules: Vec<HallOfFameEntry>,
}

/// Archive for promoted rules, keyed by notation, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HallOfFame {
    entries: Vec<HallOfFameEntry>,
    /// Maximum archive size.
    max_size: usize,
}

impl HallOfFame {
    /// Create an empty archive.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    /// Rebuild from persisted entries. Duplicate notations keep the last entry.
    pub fn from_entries(max_size: usize, entries: Vec<HallOfFameEntry>) -> Self {
        let mut hof = Self::new(max_size);
        for entry in entries {
            match hof.position(&entry.notation) {
                Some(i) => hof.entries[i] = entry,
                None => hof.entries.push(entry),
            }
        }
        if hof.entries.len() > max_size {
            log::warn!(
                "persisted Hall of Fame holds {} entries, above max size {max_size}",
                hof.entries.len()
            );
        }
        hof
    }

    pub fn from_document(max_size: usize, doc: HallOfFameDocument) -> Self {
        Self::from_entries(max_size, doc.rules)
    }

    pub fn to_document(&self) -> HallOfFameDocument {
        HallOfFameDocument {
            meta: HallOfFameMeta {
                updated: Utc::now(),
                count: self.entries.len(),
                max_size: self.max_size,
            },
            rules: self.entries.clone(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HallOfFameEntry] {
        &self.entries
    }

    fn position(&self, rule: &RuleNotation) -> Option<usize> {
        self.entries.iter().position(|e| &e.notation == rule)
    }

    pub fn get(&self, rule: &RuleNotation) -> Option<&HallOfFameEntry> {
        self.position(rule).map(|i| &self.entries[i])
    }

    pub fn contains(&self, rule: &RuleNotation) -> bool {
        self.position(rule).is_some()
    }

    /// Members with the given module profile.
    pub fn profile_count(&self, profile: ModuleProfile) -> usize {
        self.entries
            .iter()
            .filter(|e| e.module_profile == profile)
            .count()
    }

    /// Closest member to `rule`, ignoring an entry for `rule` itself.
    pub fn nearest(&self, rule: &RuleNotation) -> Option<(&HallOfFameEntry, u32)> {
        self.entries
            .iter()
            .filter(|e| &e.notation != rule)
            .map(|e| (e, e.notation.distance(rule)))
            .min_by_key(|(_, d)| *d)
    }

    /// Add or replace an entry, evicting the weakest member when full.
    pub fn add(&mut self, entry: HallOfFameEntry) -> Admission {
        if let Some(i) = self.position(&entry.notation) {
            self.entries[i] = entry;
            return Admission::Replaced;
        }

        if self.entries.len() < self.max_size {
            self.entries.push(entry);
            return Admission::Inserted;
        }

        // Remove lowest composite only if the new entry is better.
        let weakest = self
            .entries
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.composite_score.total_cmp(&b.1.composite_score))
            .map(|(i, e)| (i, e.composite_score));

        match weakest {
            Some((i, score)) if entry.composite_score > score => {
                let evicted = self.entries.remove(i).notation;
                self.entries.push(entry);
                Admission::Evicted(evicted)
            }
            _ => Admission::Rejected,
        }
    }

    pub fn remove(&mut self, rule: &RuleNotation) -> Option<HallOfFameEntry> {
        self.position(rule).map(|i| self.entries.remove(i))
    }

    /// Replace the whole membership, as the Pareto policy does.
    pub fn replace_all(&mut self, entries: Vec<HallOfFameEntry>) {
        self.entries = entries;
    }

    /// Top N entries by composite score.
    pub fn top_n(&self, n: usize) -> Vec<&HallOfFameEntry> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
        entries.into_iter().take(n).collect()
    }
}
