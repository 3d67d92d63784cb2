// descriptors/mpeg.rs
//! ISO/IEC 13818-1 descriptors carried in the PMT and CAT.

use serde::Serialize;

use super::{be16, need, DescriptorKind, DescriptorRegistry};
use crate::error::SiError;

pub const CA_DESCRIPTOR:    u8 = 0x09;
pub const ISO_639_LANGUAGE: u8 = 0x0A;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionalAccess {
    pub ca_system_id: u16,
    pub ca_pid:       u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub private_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageEntry {
    pub language:   String,
    pub audio_type: u8,
}

pub fn register(registry: &mut DescriptorRegistry) {
    registry.register_fn(CA_DESCRIPTOR, conditional_access);
    registry.register_fn(ISO_639_LANGUAGE, iso_639_language);
}

fn conditional_access(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 4)?;
    Ok(DescriptorKind::ConditionalAccess(ConditionalAccess {
        ca_system_id: be16(&body[0..2]),
        ca_pid:       be16(&body[2..4]) & 0x1FFF,
        private_data: body[4..].to_vec(),
    }))
}

fn iso_639_language(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    if body.len() % 4 != 0 {
        return Err(SiError::record(tag, "language entries are 4 bytes each"));
    }
    let entries = body
        .chunks_exact(4)
        .map(|c| LanguageEntry {
            language:   lang_code(&c[..3]),
            audio_type: c[3],
        })
        .collect();
    Ok(DescriptorKind::Iso639Language(entries))
}

/// Three-letter ISO 639 / ISO 3166 code.
pub(crate) fn lang_code(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_descriptor_masks_reserved_bits() {
        let kind = conditional_access(0x09, &[0x05, 0x00, 0xE1, 0xF4, 0xAB]).unwrap();
        assert_eq!(
            kind,
            DescriptorKind::ConditionalAccess(ConditionalAccess {
                ca_system_id: 0x0500,
                ca_pid:       0x01F4,
                private_data: vec![0xAB],
            })
        );
        assert!(conditional_access(0x09, &[0x05, 0x00, 0xE1]).is_err());
    }

    #[test]
    fn language_entries() {
        let kind = iso_639_language(0x0A, b"eng\x00deu\x03").unwrap();
        let DescriptorKind::Iso639Language(entries) = kind else {
            panic!("wrong kind");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].language, "eng");
        assert_eq!(entries[1].language, "deu");
        assert_eq!(entries[1].audio_type, 3);
        assert!(iso_639_language(0x0A, b"eng").is_err());
    }
}
