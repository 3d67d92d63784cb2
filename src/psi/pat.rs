// psi/pat.rs
use serde::Serialize;

use super::{expect_table, pid13, Section};
use crate::constants::table_id;

/// ─────────── PAT ───────────
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatSection {
    pub transport_stream_id: u16,
    pub version:             u8,
    pub current_next:        bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_pid:         Option<u16>,
    pub programs:            Vec<PatEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid:        u16,
}

impl PatSection {
    pub fn pmt_pids(&self) -> impl Iterator<Item = u16> + '_ {
        self.programs.iter().map(|p| p.pmt_pid)
    }

    /// Folds another section of the same table into this one.
    pub fn merge(&mut self, other: PatSection) {
        if self.network_pid.is_none() {
            self.network_pid = other.network_pid;
        }
        for entry in other.programs {
            if !self.programs.contains(&entry) {
                self.programs.push(entry);
            }
        }
    }
}

pub fn parse_pat(sec: &Section) -> anyhow::Result<PatSection> {
    expect_table(sec, &[table_id::PAT], "PAT")?;
    let body = sec.payload();
    if body.len() % 4 != 0 {
        anyhow::bail!("PAT body is not a whole number of entries");
    }

    let mut network_pid = None;
    let mut programs = Vec::new();
    for entry in body.chunks_exact(4) {
        let program_number = u16::from_be_bytes([entry[0], entry[1]]);
        let pid = pid13(&entry[2..4]);
        if program_number == 0 {
            network_pid = Some(pid);
        } else {
            programs.push(PatEntry { program_number, pmt_pid: pid });
        }
    }

    Ok(PatSection {
        transport_stream_id: sec.sub_identity().unwrap_or_default(),
        version: sec.version(),
        current_next: sec.current_next(),
        network_pid,
        programs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::test_support::long_section;

    #[test]
    fn programs_and_network_pid() {
        let body = [0x00, 0x00, 0xE0, 0x10, 0x00, 0x01, 0xE1, 0x00, 0x00, 0x02, 0xE1, 0x10];
        let pat = parse_pat(&Section::construct(&long_section(0x00, 0x0421, 3, 0, 0, &body))).unwrap();
        assert_eq!(pat.transport_stream_id, 0x0421);
        assert_eq!(pat.version, 3);
        assert_eq!(pat.network_pid, Some(0x0010));
        assert_eq!(pat.pmt_pids().collect::<Vec<_>>(), vec![0x0100, 0x0110]);
    }

    #[test]
    fn rejects_other_tables() {
        let sec = Section::construct(&long_section(0x02, 1, 0, 0, 0, &[0xE1, 0x00, 0xF0, 0x00]));
        assert!(parse_pat(&sec).is_err());
    }

    #[test]
    fn merge_keeps_entries_unique() {
        let one = |pn: u16, pid: u8| [0x00, pn as u8, 0xE1, pid];
        let a = parse_pat(&Section::construct(&long_section(0, 1, 0, 0, 1, &one(1, 0x00)))).unwrap();
        let b = parse_pat(&Section::construct(&long_section(0, 1, 0, 1, 1, &one(2, 0x10)))).unwrap();
        let mut merged = a.clone();
        merged.merge(b);
        merged.merge(a);
        assert_eq!(merged.programs.len(), 2);
    }
}
