// psi/section.rs
//! Incrementally built PSI / SI section with CRC-32 (MPEG-2) validation.

use crc::{Crc, CRC_32_MPEG_2};

use crate::constants::{
    table_id, CRC_SIZE, LONG_HEADER_SIZE, MAX_SECTION_LENGTH, SECTION_HEADER_SIZE,
};
use crate::error::SiError;

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Header fields readable from the first bytes of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub table_id:       u8,
    pub long_form:      bool,
    pub section_length: usize,
    pub sub_identity:   Option<u16>,
    pub version:        u8,
    pub current_next:   bool,
    pub section_number: u8,
    pub last_section:   u8,
}

impl SectionHeader {
    /// Reads the header from raw section bytes (starting at `table_id`).
    ///
    /// Returns `None` until enough bytes are present: 3 for a short-form
    /// section, 8 for a long-form one.
    pub fn peek(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SECTION_HEADER_SIZE {
            return None;
        }
        let table_id       = bytes[0];
        let long_form      = bytes[1] & 0x80 != 0;
        let section_length = (((bytes[1] & 0x0F) as usize) << 8) | bytes[2] as usize;

        if !long_form {
            return Some(Self {
                table_id,
                long_form,
                section_length,
                sub_identity: None,
                version: 0,
                current_next: true,
                section_number: 0,
                last_section: 0,
            });
        }
        if bytes.len() < LONG_HEADER_SIZE {
            return None;
        }
        Some(Self {
            table_id,
            long_form,
            section_length,
            sub_identity:   Some(u16::from_be_bytes([bytes[3], bytes[4]])),
            version:        (bytes[5] & 0x3E) >> 1,
            current_next:   bytes[5] & 0x01 != 0,
            section_number: bytes[6],
            last_section:   bytes[7],
        })
    }

    /// Total size of the section on the wire, header included.
    pub fn total_len(&self) -> usize {
        SECTION_HEADER_SIZE + self.section_length
    }
}

/// A section being reassembled from one or more packet payloads.
///
/// The declared length is fixed as soon as the first three bytes are known;
/// once `is_complete` turns true no further bytes are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    raw:       Vec<u8>,
    total_len: Option<usize>,
    complete:  bool,
}

impl Section {
    /// Starts a section from `bytes`, consuming as many as it needs.
    pub fn construct(bytes: &[u8]) -> Self {
        let mut sec = Self { raw: Vec::new(), total_len: None, complete: false };
        sec.append(bytes);
        sec
    }

    /// Adds bytes, returning how many were used. Fewer than `bytes.len()`
    /// are used when the section completes mid-buffer.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        if self.complete {
            return 0;
        }
        let mut used = 0;

        if self.total_len.is_none() {
            let take = (SECTION_HEADER_SIZE - self.raw.len()).min(bytes.len());
            self.raw.extend_from_slice(&bytes[..take]);
            used = take;
            if self.raw.len() < SECTION_HEADER_SIZE {
                return used;
            }
            let section_length = (((self.raw[1] & 0x0F) as usize) << 8) | self.raw[2] as usize;
            self.total_len = Some(SECTION_HEADER_SIZE + section_length);
            self.raw.reserve(section_length);
        }

        let Some(total) = self.total_len else { return used };
        let take = (total - self.raw.len()).min(bytes.len() - used);
        self.raw.extend_from_slice(&bytes[used..used + take]);
        used += take;
        if self.raw.len() == total {
            self.complete = true;
        }
        used
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Total length promised by the header, once known.
    pub fn declared_len(&self) -> Option<usize> {
        self.total_len
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.raw.len()
    }

    pub fn header(&self) -> Option<SectionHeader> {
        SectionHeader::peek(&self.raw)
    }

    pub fn table_id(&self) -> u8 {
        self.raw.first().copied().unwrap_or(0xFF)
    }

    pub fn is_long_form(&self) -> bool {
        self.raw.get(1).is_some_and(|b| b & 0x80 != 0)
    }

    /// Table id extension of a long-form section: program number, network
    /// id, bouquet id or transport stream id depending on the table.
    pub fn sub_identity(&self) -> Option<u16> {
        self.header().and_then(|h| h.sub_identity)
    }

    pub fn version(&self) -> u8 {
        self.header().map_or(0, |h| h.version)
    }

    pub fn current_next(&self) -> bool {
        self.header().is_none_or(|h| h.current_next)
    }

    pub fn section_number(&self) -> u8 {
        self.header().map_or(0, |h| h.section_number)
    }

    pub fn last_section_number(&self) -> u8 {
        self.header().map_or(0, |h| h.last_section)
    }

    /// Whether this table carries a trailing CRC-32. Every long-form section
    /// does; among short-form tables only the TDT goes without.
    pub fn has_crc(&self) -> bool {
        self.is_long_form() || self.table_id() != table_id::TDT
    }

    /// CRC-32 as transmitted, available once complete.
    pub fn crc32(&self) -> Option<u32> {
        if !self.complete || !self.has_crc() || self.raw.len() < SECTION_HEADER_SIZE + CRC_SIZE {
            return None;
        }
        let end = self.raw.len();
        Some(u32::from_be_bytes(self.raw[end - CRC_SIZE..end].try_into().ok()?))
    }

    /// The whole section as received, header and CRC included.
    pub fn bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Table body: bytes between the fixed header and the CRC.
    pub fn payload(&self) -> &[u8] {
        let start = if self.is_long_form() { LONG_HEADER_SIZE } else { SECTION_HEADER_SIZE };
        let end = if self.has_crc() {
            self.raw.len().saturating_sub(CRC_SIZE)
        } else {
            self.raw.len()
        };
        self.raw.get(start..end).unwrap_or(&[])
    }

    /// Checks header consistency and the CRC of a complete section.
    pub fn validate(&self) -> Result<(), SiError> {
        let tid = self.table_id();
        if !self.complete {
            return Err(SiError::section(tid, "incomplete section"));
        }
        let hdr = self
            .header()
            .ok_or(SiError::section(tid, "section shorter than its header"))?;
        check_header(&hdr)?;

        if self.has_crc() {
            let end = self.raw.len();
            let crc_calc = CRC_MPEG.checksum(&self.raw[..end - CRC_SIZE]);
            if Some(crc_calc) != self.crc32() {
                return Err(SiError::section(tid, "CRC-32 mismatch"));
            }
        }
        Ok(())
    }
}

/// Structural checks that need only the header.
pub(crate) fn check_header(hdr: &SectionHeader) -> Result<(), SiError> {
    let tid = hdr.table_id;
    if hdr.section_length > MAX_SECTION_LENGTH {
        return Err(SiError::section(tid, "section_length exceeds 4093"));
    }
    let crc_len = if hdr.long_form || tid != table_id::TDT { CRC_SIZE } else { 0 };
    let min_len = if hdr.long_form { LONG_HEADER_SIZE - SECTION_HEADER_SIZE } else { 0 } + crc_len;
    if hdr.section_length < min_len {
        return Err(SiError::section(tid, "section_length too small"));
    }
    if hdr.long_form && hdr.section_number > hdr.last_section {
        return Err(SiError::section(tid, "section_number beyond last_section_number"));
    }
    Ok(())
}

/// Appends the CRC-32 over `bytes` to `bytes`.
pub fn seal_crc(bytes: &mut Vec<u8>) {
    let crc = CRC_MPEG.checksum(bytes);
    bytes.extend_from_slice(&crc.to_be_bytes());
}
