//! Per-scope version and section bookkeeping.
//!
//! Each versioned table (NIT, SDT, EIT, BAT) keeps one [`VersionTracker`]
//! keyed by its scope. The tracker decides whether an incoming section is a
//! repeat of one already processed.

use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of [`VersionTracker::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitResult {
    /// Section already processed for this version.
    Skip,
    /// New section; process it.
    Accept,
    /// New section of a known version, and every section `0..=last` of that
    /// version is now seen.
    AcceptAndComplete,
}

impl AdmitResult {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, AdmitResult::Skip)
    }
}

/// 256-bit set of observed section numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SectionSet([u64; 4]);

impl SectionSet {
    fn insert(&mut self, section: u8) -> bool {
        let (word, bit) = (section as usize / 64, section as usize % 64);
        let mask = 1u64 << bit;
        let fresh = self.0[word] & mask == 0;
        self.0[word] |= mask;
        fresh
    }

    fn contains_all_up_to(&self, last: u8) -> bool {
        (0..=last).all(|s| self.0[s as usize / 64] & (1u64 << (s as usize % 64)) != 0)
    }
}

/// Header state of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTableHeader {
    pub version: u8,
    pub last_section_number: u8,
    /// Most recently admitted section number.
    pub section_number: u8,
    seen: SectionSet,
}

impl SectionTableHeader {
    fn new(version: u8, section_number: u8, last_section_number: u8) -> Self {
        let mut seen = SectionSet::default();
        seen.insert(section_number);
        Self {
            version,
            last_section_number,
            section_number,
            seen,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.seen.contains_all_up_to(self.last_section_number)
    }
}

fn completion(section_number: u8, entry: &SectionTableHeader) -> AdmitResult {
    if section_number <= entry.last_section_number && entry.is_complete() {
        AdmitResult::AcceptAndComplete
    } else {
        AdmitResult::Accept
    }
}

/// Version tracker for one table type.
#[derive(Debug)]
pub struct VersionTracker<K> {
    entries: HashMap<K, SectionTableHeader>,
}

impl<K> Default for VersionTracker<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy> VersionTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a section has to be processed and record it.
    pub fn admit(
        &mut self,
        scope: K,
        version: u8,
        section_number: u8,
        last_section_number: u8,
    ) -> AdmitResult {
        if let Some(entry) = self.entries.get_mut(&scope) {
            if entry.version == version {
                if !entry.seen.insert(section_number) {
                    return AdmitResult::Skip;
                }
                entry.section_number = section_number;
                return completion(section_number, entry);
            }
        }

        // Unknown scope or a new version: start over.
        self.entries.insert(
            scope,
            SectionTableHeader::new(version, section_number, last_section_number),
        );
        AdmitResult::Accept
    }

    pub fn get(&self, scope: &K) -> Option<&SectionTableHeader> {
        self.entries.get(scope)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
