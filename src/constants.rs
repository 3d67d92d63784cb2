//! Constants for MPEG-TS packets and PSI/SI tables

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const TS_HEADER_SIZE: usize = 4;

/// Filler after the last section in a packet payload
pub const STUFFING_BYTE: u8 = 0xFF;

/// Section layout
pub const SECTION_HEADER_SIZE: usize = 3; // table_id + flags/section_length
pub const LONG_HEADER_SIZE: usize = 8; // ... + extension, version, numbers
pub const CRC_SIZE: usize = 4;
pub const MAX_SECTION_LENGTH: usize = 4093; // 12-bit section_length upper bound

/// Well-known PIDs
pub const PAT_PID: u16 = 0x0000;
pub const CAT_PID: u16 = 0x0001;
pub const NIT_PID: u16 = 0x0010;
pub const SDT_BAT_PID: u16 = 0x0011;
pub const TDT_TOT_PID: u16 = 0x0014;
pub const NULL_PID: u16 = 0x1FFF;

/// Table ids
pub mod table_id {
    pub const PAT: u8 = 0x00;
    pub const CAT: u8 = 0x01;
    pub const PMT: u8 = 0x02;
    pub const NIT_ACTUAL: u8 = 0x40;
    pub const NIT_OTHER: u8 = 0x41;
    pub const SDT_ACTUAL: u8 = 0x42;
    pub const SDT_OTHER: u8 = 0x46;
    pub const BAT: u8 = 0x4A;
    pub const TDT: u8 = 0x70;
    pub const TOT: u8 = 0x73;
}

/// Default depth of each per-worker fragment queue
pub const DEFAULT_QUEUE_DEPTH: usize = 10_000;
