// psi/pmt.rs
use serde::Serialize;

use super::{expect_table, len12, pid13, Section};
use crate::constants::table_id;
use crate::descriptors::{conditional_access, Descriptor, DescriptorRegistry};

/// ─────────── PMT ───────────
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PmtSection {
    pub program_number: u16,
    pub version:        u8,
    pub pcr_pid:        u16,
    pub descriptors:    Vec<Descriptor>,
    pub streams:        Vec<StreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub stream_type:    u8,
    pub elementary_pid: u16,
    pub descriptors:    Vec<Descriptor>,
}

impl StreamInfo {
    pub fn stream_type_name(&self) -> &'static str {
        stream_type_name(self.stream_type)
    }
}

impl PmtSection {
    /// Elementary stream PIDs in loop order.
    pub fn pids(&self) -> Vec<u16> {
        self.streams.iter().map(|s| s.elementary_pid).collect()
    }

    /// ECM PIDs announced at program or stream level.
    pub fn ca_pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = conditional_access(&self.descriptors)
            .chain(self.streams.iter().flat_map(|s| conditional_access(&s.descriptors)))
            .map(|ca| ca.ca_pid)
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    /// PCR, elementary and CA PIDs, sorted and deduplicated.
    pub fn all_pids(&self) -> Vec<u16> {
        let mut pids = self.pids();
        pids.push(self.pcr_pid);
        pids.extend(self.ca_pids());
        pids.sort_unstable();
        pids.dedup();
        pids
    }
}

pub fn parse_pmt(sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<PmtSection> {
    expect_table(sec, &[table_id::PMT], "PMT")?;
    let b = sec.payload();
    if b.len() < 4 {
        anyhow::bail!("PMT body too short");
    }

    let pcr_pid = pid13(&b[0..2]);
    let prog_info_len = len12(&b[2..4]);
    let mut idx = 4 + prog_info_len;
    let Some(prog_info) = b.get(4..idx) else {
        anyhow::bail!("truncated program descriptors");
    };
    let descriptors = registry.decode_all(prog_info)?;

    let mut streams = Vec::new();
    while idx + 5 <= b.len() {
        let stream_type = b[idx];
        let elementary_pid = pid13(&b[idx + 1..idx + 3]);
        let es_info_len = len12(&b[idx + 3..idx + 5]);
        let Some(es_info) = b.get(idx + 5..idx + 5 + es_info_len) else {
            anyhow::bail!("truncated ES descriptors for PID 0x{elementary_pid:04X}");
        };
        streams.push(StreamInfo {
            stream_type,
            elementary_pid,
            descriptors: registry.decode_all(es_info)?,
        });
        idx += 5 + es_info_len;
    }

    Ok(PmtSection {
        program_number: sec.sub_identity().unwrap_or_default(),
        version: sec.version(),
        pcr_pid,
        descriptors,
        streams,
    })
}

pub fn stream_type_name(stream_type: u8) -> &'static str {
    match stream_type {
        0x01 => "MPEG-1 video",
        0x02 => "MPEG-2 video",
        0x03 => "MPEG-1 audio",
        0x04 => "MPEG-2 audio",
        0x05 => "private sections",
        0x06 => "PES private data",
        0x0B => "DSM-CC",
        0x0F => "AAC audio",
        0x11 => "LATM AAC audio",
        0x1B => "H.264 video",
        0x24 => "H.265 video",
        0x81 => "AC-3 audio",
        0x87 => "E-AC-3 audio",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::test_support::long_section;

    fn sample() -> Vec<u8> {
        let mut body = vec![0xE1, 0x00, 0xF0, 0x06];
        // program CA descriptor: system 0x0500, ECM PID 0x0200
        body.extend_from_slice(&[0x09, 0x04, 0x05, 0x00, 0xE2, 0x00]);
        // video, no descriptors
        body.extend_from_slice(&[0x1B, 0xE1, 0x00, 0xF0, 0x00]);
        // audio with a language and a second CA descriptor
        body.extend_from_slice(&[0x03, 0xE1, 0x01, 0xF0, 0x0C]);
        body.extend_from_slice(&[0x0A, 0x04, b'e', b'n', b'g', 0x00]);
        body.extend_from_slice(&[0x09, 0x04, 0x05, 0x00, 0xE2, 0x01]);
        long_section(0x02, 0x0065, 2, 0, 0, &body)
    }

    #[test]
    fn streams_and_pids() {
        let pmt = parse_pmt(&Section::construct(&sample()), &DescriptorRegistry::standard()).unwrap();
        assert_eq!(pmt.program_number, 0x65);
        assert_eq!(pmt.pcr_pid, 0x0100);
        assert_eq!(pmt.pids(), vec![0x0100, 0x0101]);
        assert_eq!(pmt.ca_pids(), vec![0x0200, 0x0201]);
        assert_eq!(pmt.all_pids(), vec![0x0100, 0x0101, 0x0200, 0x0201]);
        assert_eq!(pmt.streams[0].stream_type_name(), "H.264 video");
        assert_eq!(pmt.streams[1].descriptors.len(), 2);
    }

    #[test]
    fn truncated_program_info_is_an_error() {
        let raw = long_section(0x02, 1, 0, 0, 0, &[0xE1, 0x00, 0xF0, 0x20, 0x09]);
        assert!(parse_pmt(&Section::construct(&raw), &DescriptorRegistry::standard()).is_err());
    }
}
