//! Transport-packet header and adaptation-field extraction.

use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::constants::{TS_HEADER_SIZE, TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::error::SiError;

/// Fixed 4-byte transport packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error:          bool,
    pub payload_unit_start:       bool,
    pub transport_priority:       bool,
    pub pid:                      u16,
    pub scrambling_control:       u8,
    pub adaptation_field_control: u8,
    pub continuity_counter:       u8,
}

impl TsHeader {
    pub fn parse(packet: &[u8]) -> Result<Self, SiError> {
        if packet.len() < TS_PACKET_SIZE {
            return Err(SiError::MalformedPacket("short packet"));
        }
        if packet[0] != TS_SYNC_BYTE {
            return Err(SiError::MalformedPacket("bad sync byte"));
        }

        let truncated = |_| SiError::MalformedPacket("truncated header");
        let mut br = BitReader::endian(&packet[1..TS_HEADER_SIZE], BigEndian);
        Ok(Self {
            transport_error:          br.read_bit().map_err(truncated)?,
            payload_unit_start:       br.read_bit().map_err(truncated)?,
            transport_priority:       br.read_bit().map_err(truncated)?,
            pid:                      br.read::<13, u16>().map_err(truncated)?,
            scrambling_control:       br.read::<2, u8>().map_err(truncated)?,
            adaptation_field_control: br.read::<2, u8>().map_err(truncated)?,
            continuity_counter:       br.read::<4, u8>().map_err(truncated)?,
        })
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0b10 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0b01 != 0
    }
}

/// Payload bytes of a packet, skipping the adaptation field if present.
///
/// Returns `None` for adaptation-only packets and for adaptation fields that
/// swallow the whole packet.
pub fn payload<'a>(header: &TsHeader, packet: &'a [u8]) -> Option<&'a [u8]> {
    if !header.has_payload() {
        return None;
    }
    let mut offset = TS_HEADER_SIZE;
    if header.has_adaptation_field() {
        offset += 1 + *packet.get(TS_HEADER_SIZE)? as usize;
    }
    if offset >= TS_PACKET_SIZE {
        return None;
    }
    packet.get(offset..TS_PACKET_SIZE)
}

/// Program clock reference: 33-bit base at 90 kHz, 9-bit extension at 27 MHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcr {
    pub base:      u64,
    pub extension: u16,
}

impl Pcr {
    fn parse(bytes: &[u8]) -> Option<Self> {
        let mut br = BitReader::endian(bytes.get(..6)?, BigEndian);
        let base = br.read::<33, u64>().ok()?;
        br.skip(6).ok()?;
        let extension = br.read::<9, u16>().ok()?;
        Some(Self { base, extension })
    }

    pub fn as_micros(&self) -> u64 {
        self.base * 100 / 9 + self.extension as u64 / 27
    }
}

/// Adaptation field flags plus the clock references it may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdaptationField {
    pub length:           u8,
    pub discontinuity:    bool,
    pub random_access:    bool,
    pub es_priority:      bool,
    pub pcr:              Option<Pcr>,
    pub opcr:             Option<Pcr>,
    pub splice_countdown: Option<i8>,
}

impl AdaptationField {
    pub fn parse(header: &TsHeader, packet: &[u8]) -> Result<Option<Self>, SiError> {
        if !header.has_adaptation_field() {
            return Ok(None);
        }
        let length = *packet
            .get(TS_HEADER_SIZE)
            .ok_or(SiError::MalformedPacket("short packet"))?;
        if length == 0 {
            return Ok(Some(Self::default()));
        }
        let start = TS_HEADER_SIZE + 1;
        let field = packet
            .get(start..start + length as usize)
            .ok_or(SiError::MalformedPacket("adaptation field overruns packet"))?;

        let flags = field[0];
        let mut af = Self {
            length,
            discontinuity: flags & 0x80 != 0,
            random_access: flags & 0x40 != 0,
            es_priority:   flags & 0x20 != 0,
            ..Default::default()
        };
        let mut idx = 1;
        if flags & 0x10 != 0 {
            af.pcr = field.get(idx..).and_then(Pcr::parse);
            idx += 6;
        }
        if flags & 0x08 != 0 {
            af.opcr = field.get(idx..).and_then(Pcr::parse);
            idx += 6;
        }
        if flags & 0x04 != 0 {
            af.splice_countdown = field.get(idx).map(|b| *b as i8);
        }
        Ok(Some(af))
    }
}
