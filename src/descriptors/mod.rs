//! Descriptor (tag-length-value) decoding.
//!
//! A [`DescriptorRegistry`] maps descriptor tags to decoders. Each table
//! family registers its decoders once at start-up; tags nobody registered
//! decode to [`DescriptorKind::Raw`], keeping the bytes verbatim.
//!
//! Every decoder only ever sees its own record, `[tag][length][body]`, so the
//! same registry serves a table's descriptor block, one entry of a stream or
//! service loop, or any other descriptor run.

pub mod dvb;
pub mod mpeg;

use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use crate::error::SiError;

pub use dvb::{
    ChannelMapping, Linkage, MobileHandover, MuxTransportList, SatelliteDelivery, ServiceDescriptor,
    ServiceListEntry,
};
pub use mpeg::{ConditionalAccess, LanguageEntry};

/// One decoded descriptor record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub tag:    u8,
    pub length: u8,
    pub kind:   DescriptorKind,
}

/// Typed descriptor payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DescriptorKind {
    ConditionalAccess(ConditionalAccess),
    Iso639Language(Vec<LanguageEntry>),
    NetworkName(String),
    ServiceList(Vec<ServiceListEntry>),
    SatelliteDelivery(SatelliteDelivery),
    BouquetName(String),
    Service(ServiceDescriptor),
    CountryAvailability { available: bool, countries: Vec<String> },
    Linkage(Linkage),
    MultilingualNetworkName(Vec<(String, String)>),
    PrivateDataSpecifier(u32),
    BouquetList(Vec<u16>),
    ChannelListMapping(Vec<ChannelMapping>),
    MuxTransportList(MuxTransportList),
    MuxSignature { version: u8, signature: Vec<u8> },
    /// Tag without a registered decoder.
    Raw(Vec<u8>),
}

/// Decodes one whole descriptor record.
pub trait DescriptorDecoder: Send + Sync {
    /// `record` is exactly `2 + record[1]` bytes long. Returns the payload
    /// and the number of bytes consumed, which must be the whole record.
    fn decode(&self, record: &[u8]) -> Result<(DescriptorKind, usize), SiError>;
}

/// Decoder written against the body only (bytes after the length field).
pub type BodyDecoder = fn(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError>;

struct FnDecoder(BodyDecoder);

impl DescriptorDecoder for FnDecoder {
    fn decode(&self, record: &[u8]) -> Result<(DescriptorKind, usize), SiError> {
        let kind = (self.0)(record[0], &record[2..])?;
        Ok((kind, record.len()))
    }
}

#[derive(Default)]
pub struct DescriptorRegistry {
    decoders: HashMap<u8, Box<dyn DescriptorDecoder>>,
}

impl DescriptorRegistry {
    /// Registry without any decoder: everything decodes to `Raw`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the MPEG-2 and DVB descriptor families.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        mpeg::register(&mut registry);
        dvb::register(&mut registry);
        registry
    }

    /// Adds a decoder for `tag`. The first registration of a tag wins; later
    /// ones are ignored and `false` is returned.
    pub fn register(&mut self, tag: u8, decoder: Box<dyn DescriptorDecoder>) -> bool {
        if self.decoders.contains_key(&tag) {
            return false;
        }
        self.decoders.insert(tag, decoder);
        true
    }

    pub fn register_fn(&mut self, tag: u8, decoder: BodyDecoder) -> bool {
        self.register(tag, Box::new(FnDecoder(decoder)))
    }

    pub fn is_registered(&self, tag: u8) -> bool {
        self.decoders.contains_key(&tag)
    }

    /// Decodes every record in `buffer`.
    ///
    /// A record whose length runs past the buffer, or a decoder that does not
    /// consume exactly its record, fails the whole run. A record whose body a
    /// typed decoder rejects is kept as [`DescriptorKind::Raw`].
    pub fn decode_all(&self, buffer: &[u8]) -> Result<Vec<Descriptor>, SiError> {
        let mut out = Vec::new();
        let mut offset = 0;

        while offset < buffer.len() {
            let rest = &buffer[offset..];
            let tag = rest[0];
            let length = *rest
                .get(1)
                .ok_or(SiError::record(tag, "missing length byte"))?;
            let size = 2 + length as usize;
            let record = rest
                .get(..size)
                .ok_or(SiError::record(tag, "length overruns buffer"))?;

            let decoded = match self.decoders.get(&tag) {
                Some(decoder) => decoder.decode(record),
                None => Ok((DescriptorKind::Raw(record[2..].to_vec()), size)),
            };
            match decoded {
                Ok((_, 0)) => return Err(SiError::record(tag, "decoder consumed no bytes")),
                Ok((_, used)) if used != size => {
                    return Err(SiError::record(tag, "decoder consumed a different size than declared"));
                }
                Ok((kind, _)) => out.push(Descriptor { tag, length, kind }),
                Err(e) => {
                    debug!("keeping descriptor as raw bytes: {e}");
                    out.push(Descriptor { tag, length, kind: DescriptorKind::Raw(record[2..].to_vec()) });
                }
            }
            offset += size;
        }
        Ok(out)
    }
}

/// Fails with `MalformedRecord` when `body` is shorter than `n`.
pub(crate) fn need(tag: u8, body: &[u8], n: usize) -> Result<(), SiError> {
    if body.len() < n {
        Err(SiError::record(tag, "body too short"))
    } else {
        Ok(())
    }
}

pub(crate) fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

/// First conditional-access descriptor's CA PID.
pub fn find_ca_pid(descriptors: &[Descriptor]) -> Option<u16> {
    descriptors.iter().find_map(|d| match &d.kind {
        DescriptorKind::ConditionalAccess(ca) => Some(ca.ca_pid),
        _ => None,
    })
}

/// All conditional-access descriptors in a run.
pub fn conditional_access(descriptors: &[Descriptor]) -> impl Iterator<Item = &ConditionalAccess> {
    descriptors.iter().filter_map(|d| match &d.kind {
        DescriptorKind::ConditionalAccess(ca) => Some(ca),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(records: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (tag, body) in records {
            buf.push(*tag);
            buf.push(body.len() as u8);
            buf.extend_from_slice(body);
        }
        buf
    }

    #[test]
    fn unknown_tags_round_trip_as_raw() {
        let records = vec![
            (0xC0, vec![1, 2, 3]),
            (0xC1, vec![]),
            (0xFE, vec![0xAA; 255]),
        ];
        let decoded = DescriptorRegistry::new().decode_all(&encode(&records)).unwrap();
        assert_eq!(decoded.len(), 3);
        for (d, (tag, body)) in decoded.iter().zip(&records) {
            assert_eq!(d.tag, *tag);
            assert_eq!(d.length as usize, body.len());
            assert_eq!(d.kind, DescriptorKind::Raw(body.clone()));
        }
    }

    #[test]
    fn known_and_unknown_tags_keep_order() {
        let records = vec![
            (0x40, b"Net".to_vec()),
            (0xC0, vec![9]),
            (0x5F, vec![0x00, 0x00, 0x00, 0x28]),
        ];
        let decoded = DescriptorRegistry::standard().decode_all(&encode(&records)).unwrap();
        let tags: Vec<u8> = decoded.iter().map(|d| d.tag).collect();
        assert_eq!(tags, vec![0x40, 0xC0, 0x5F]);
        assert_eq!(decoded[0].kind, DescriptorKind::NetworkName("Net".into()));
        assert_eq!(decoded[1].kind, DescriptorKind::Raw(vec![9]));
        assert_eq!(decoded[2].kind, DescriptorKind::PrivateDataSpecifier(0x28));
    }

    #[test]
    fn overrun_is_malformed() {
        let buf = [0x40, 0x05, b'a', b'b'];
        assert_eq!(
            DescriptorRegistry::standard().decode_all(&buf),
            Err(SiError::MalformedRecord { tag: 0x40, reason: "length overruns buffer" })
        );
        assert!(DescriptorRegistry::new().decode_all(&[0x40]).is_err());
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        assert!(DescriptorRegistry::standard().decode_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn first_registration_wins() {
        fn shadow(_: u8, _: &[u8]) -> Result<DescriptorKind, SiError> {
            Ok(DescriptorKind::BouquetName("shadow".into()))
        }
        let mut registry = DescriptorRegistry::standard();
        assert!(!registry.register_fn(0x40, shadow));
        assert!(registry.register_fn(0xC0, shadow));

        let decoded = registry.decode_all(&encode(&[(0x40, b"x".to_vec()), (0xC0, vec![])])).unwrap();
        assert_eq!(decoded[0].kind, DescriptorKind::NetworkName("x".into()));
        assert_eq!(decoded[1].kind, DescriptorKind::BouquetName("shadow".into()));
    }

    struct Stalls;
    impl DescriptorDecoder for Stalls {
        fn decode(&self, _record: &[u8]) -> Result<(DescriptorKind, usize), SiError> {
            Ok((DescriptorKind::Raw(Vec::new()), 0))
        }
    }

    struct Overreads;
    impl DescriptorDecoder for Overreads {
        fn decode(&self, record: &[u8]) -> Result<(DescriptorKind, usize), SiError> {
            Ok((DescriptorKind::Raw(Vec::new()), record.len() + 1))
        }
    }

    #[test]
    fn decoder_must_consume_its_record() {
        let mut registry = DescriptorRegistry::new();
        registry.register(0xD0, Box::new(Stalls));
        registry.register(0xD1, Box::new(Overreads));
        assert!(matches!(
            registry.decode_all(&[0xD0, 0x00]),
            Err(SiError::MalformedRecord { tag: 0xD0, .. })
        ));
        assert!(matches!(
            registry.decode_all(&[0xD1, 0x01, 0x00]),
            Err(SiError::MalformedRecord { tag: 0xD1, .. })
        ));
    }

    #[test]
    fn rejected_body_falls_back_to_raw() {
        // CA descriptor needs 4 body bytes
        let buf = encode(&[(0x09, vec![0x01]), (0x40, b"ok".to_vec())]);
        let decoded = DescriptorRegistry::standard().decode_all(&buf).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].tag, 0x09);
        assert_eq!(decoded[0].length, 1);
        assert_eq!(decoded[0].kind, DescriptorKind::Raw(vec![0x01]));
        assert_eq!(decoded[1].kind, DescriptorKind::NetworkName("ok".into()));
    }
}
