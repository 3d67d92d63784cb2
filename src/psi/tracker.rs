// psi/tracker.rs
//! Collects the sections of multi-part (long-form) tables.
//!
//! Sections are indexed by (version, sub-identity) and then by section
//! number. Several versions of one sub-identity may coexist while a version
//! rollover is in flight; deciding which one is current is up to the caller
//! through [`TableTracker::promote`].

use std::collections::{BTreeMap, HashMap};

use crate::psi::section::Section;

/// Identity of one table snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub version:      u8,
    pub sub_identity: u16,
}

/// Sections of one (version, sub-identity), keyed by section number.
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    sections: BTreeMap<u8, Section>,
}

impl TableSnapshot {
    /// `last_section_number` as announced by the members.
    pub fn last_section_number(&self) -> Option<u8> {
        self.sections.values().next().map(Section::last_section_number)
    }

    pub fn is_complete(&self) -> bool {
        self.last_section_number()
            .is_some_and(|last| self.sections.len() == last as usize + 1)
    }

    pub fn get(&self, section_number: u8) -> Option<&Section> {
        self.sections.get(&section_number)
    }

    /// Member sections in section-number order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TableTracker {
    snapshots: BTreeMap<TableKey, TableSnapshot>,
    current:   HashMap<u16, u8>, // sub_identity -> promoted version
}

impl TableTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True unless this exact section was already recorded.
    pub fn needs(&self, version: u8, sub_identity: u16, section_number: u8) -> bool {
        self.snapshots
            .get(&TableKey { version, sub_identity })
            .is_none_or(|snap| !snap.sections.contains_key(&section_number))
    }

    /// Records a long-form section. Re-adding a known
    /// (version, sub-identity, section number) leaves the tracker untouched.
    ///
    /// Returns whether the section was inserted.
    pub fn add(&mut self, section: Section) -> bool {
        let Some(sub_identity) = section.sub_identity() else {
            return false;
        };
        let key = TableKey { version: section.version(), sub_identity };
        let number = section.section_number();
        let snap = self.snapshots.entry(key).or_default();
        if snap.sections.contains_key(&number) {
            return false;
        }
        snap.sections.insert(number, section);
        true
    }

    pub fn is_complete(&self, version: u8, sub_identity: u16) -> bool {
        self.snapshot(version, sub_identity)
            .is_some_and(TableSnapshot::is_complete)
    }

    pub fn snapshot(&self, version: u8, sub_identity: u16) -> Option<&TableSnapshot> {
        self.snapshots.get(&TableKey { version, sub_identity })
    }

    pub fn snapshots(&self) -> impl Iterator<Item = (&TableKey, &TableSnapshot)> {
        self.snapshots.iter()
    }

    pub fn complete_snapshots(&self) -> impl Iterator<Item = (&TableKey, &TableSnapshot)> {
        self.snapshots.iter().filter(|(_, snap)| snap.is_complete())
    }

    /// Makes `version` the current one for `sub_identity` and discards every
    /// other version held for it. Returns false when that version was never
    /// seen.
    pub fn promote(&mut self, version: u8, sub_identity: u16) -> bool {
        if !self.snapshots.contains_key(&TableKey { version, sub_identity }) {
            return false;
        }
        self.snapshots
            .retain(|key, _| key.sub_identity != sub_identity || key.version == version);
        self.current.insert(sub_identity, version);
        true
    }

    /// Snapshot of the promoted version, if any.
    pub fn current(&self, sub_identity: u16) -> Option<&TableSnapshot> {
        let version = *self.current.get(&sub_identity)?;
        self.snapshot(version, sub_identity)
    }

    /// Forgets everything held for `sub_identity`.
    pub fn prune(&mut self, sub_identity: u16) {
        self.snapshots.retain(|key, _| key.sub_identity != sub_identity);
        self.current.remove(&sub_identity);
    }

    /// Number of (version, sub-identity) snapshots held.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
