//! Error taxonomy for packet, section and descriptor decoding.

use thiserror::Error;

/// Errors raised while turning packets into sections and sections into records.
///
/// None of these stop a reader: a malformed section or record is dropped and
/// decoding carries on with the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SiError {
    /// Packet shorter than 188 bytes, bad sync byte or an adaptation field
    /// running past the end of the packet.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// Declared length exceeds the available bytes or header fields disagree.
    #[error("malformed section (table_id 0x{table_id:02X}): {reason}")]
    MalformedSection { table_id: u8, reason: &'static str },

    /// A descriptor's declared length overruns its buffer, or a decoder did
    /// not consume exactly its record.
    #[error("malformed descriptor 0x{tag:02X}: {reason}")]
    MalformedRecord { tag: u8, reason: &'static str },

    /// A new section started before the previous one reached its length.
    #[error("section 0x{table_id:02X} interrupted after {received} of {expected} bytes")]
    ProtocolAnomaly { table_id: u8, received: usize, expected: usize },

    /// The payload feed has been closed by its producer.
    #[error("payload feed closed")]
    FeedClosed,
}

impl SiError {
    pub(crate) fn section(table_id: u8, reason: &'static str) -> Self {
        SiError::MalformedSection { table_id, reason }
    }

    pub(crate) fn record(tag: u8, reason: &'static str) -> Self {
        SiError::MalformedRecord { tag, reason }
    }
}
