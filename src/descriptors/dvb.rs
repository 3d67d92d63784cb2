// descriptors/dvb.rs
//! ETSI EN 300 468 descriptors found in the NIT, BAT and SDT, plus a few
//! widely deployed private ones (0x80, 0x91, 0x93, 0x95, 0x96).

use bitstream_io::{BigEndian, BitRead, BitReader};
use serde::Serialize;

use super::mpeg::lang_code;
use super::{be16, need, DescriptorKind, DescriptorRegistry};
use crate::error::SiError;

pub const NETWORK_NAME:              u8 = 0x40;
pub const SERVICE_LIST:              u8 = 0x41;
pub const SATELLITE_DELIVERY:        u8 = 0x43;
pub const BOUQUET_NAME:              u8 = 0x47;
pub const SERVICE:                   u8 = 0x48;
pub const COUNTRY_AVAILABILITY:      u8 = 0x49;
pub const LINKAGE:                   u8 = 0x4A;
pub const MULTILINGUAL_NETWORK_NAME: u8 = 0x5B;
pub const PRIVATE_DATA_SPECIFIER:    u8 = 0x5F;
pub const PRIVATE_DATA_SPECIFIER_ALT: u8 = 0x80;
pub const BOUQUET_LIST:              u8 = 0x91;
pub const CHANNEL_LIST_MAPPING:      u8 = 0x93;
pub const MUX_TRANSPORT_LIST:        u8 = 0x95;
pub const MUX_SIGNATURE:             u8 = 0x96;

/// Linkage type announcing a mobile hand-over.
const LINKAGE_MOBILE_HAND_OVER: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceListEntry {
    pub service_id:   u16,
    pub service_type: u8,
}

/// Satellite delivery system parameters. BCD fields are converted to plain
/// integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SatelliteDelivery {
    pub frequency_khz:     u32,
    /// Tenths of a degree.
    pub orbital_position:  u16,
    pub east:              bool,
    pub polarization:      u8,
    pub roll_off:          u8,
    pub modulation_system: u8,
    pub modulation_type:   u8,
    /// Symbols per second.
    pub symbol_rate:       u32,
    pub fec_inner:         u8,
}

impl SatelliteDelivery {
    pub fn polarization_name(&self) -> &'static str {
        match self.polarization {
            0 => "linear horizontal",
            1 => "linear vertical",
            2 => "circular left",
            _ => "circular right",
        }
    }

    pub fn is_dvb_s2(&self) -> bool {
        self.modulation_system == 1
    }

    pub fn fec_name(&self) -> &'static str {
        match self.fec_inner {
            1 => "1/2",
            2 => "2/3",
            3 => "3/4",
            4 => "5/6",
            5 => "7/8",
            6 => "8/9",
            7 => "3/5",
            8 => "4/5",
            9 => "9/10",
            15 => "none",
            _ => "not defined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub service_type:  u8,
    pub provider_name: String,
    pub service_name:  String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MobileHandover {
    pub hand_over_type:     u8,
    pub origin_type:        u8,
    pub network_id:         Option<u16>,
    pub initial_service_id: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Linkage {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub service_id:          u16,
    pub linkage_type:        u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hand_over:           Option<MobileHandover>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub private_data:        Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelMapping {
    pub service_id:     u16,
    pub channel_number: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MuxTransportList {
    pub version:   u8,
    pub behaviour: u8,
    pub duration:  u16,
    /// (network id, transport stream ids)
    pub networks:  Vec<(u16, Vec<u16>)>,
}

pub fn register(registry: &mut DescriptorRegistry) {
    registry.register_fn(NETWORK_NAME, network_name);
    registry.register_fn(SERVICE_LIST, service_list);
    registry.register_fn(SATELLITE_DELIVERY, satellite_delivery);
    registry.register_fn(BOUQUET_NAME, bouquet_name);
    registry.register_fn(SERVICE, service);
    registry.register_fn(COUNTRY_AVAILABILITY, country_availability);
    registry.register_fn(LINKAGE, linkage);
    registry.register_fn(MULTILINGUAL_NETWORK_NAME, multilingual_network_name);
    registry.register_fn(PRIVATE_DATA_SPECIFIER, private_data_specifier);
    registry.register_fn(PRIVATE_DATA_SPECIFIER_ALT, private_data_specifier);
    registry.register_fn(BOUQUET_LIST, bouquet_list);
    registry.register_fn(CHANNEL_LIST_MAPPING, channel_list_mapping);
    registry.register_fn(MUX_TRANSPORT_LIST, mux_transport_list);
    registry.register_fn(MUX_SIGNATURE, mux_signature);
}

fn network_name(_tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    Ok(DescriptorKind::NetworkName(dvb_text(body)))
}

fn bouquet_name(_tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    Ok(DescriptorKind::BouquetName(dvb_text(body)))
}

fn service_list(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    if body.len() % 3 != 0 {
        return Err(SiError::record(tag, "service list entries are 3 bytes each"));
    }
    let entries = body
        .chunks_exact(3)
        .map(|c| ServiceListEntry { service_id: be16(c), service_type: c[2] })
        .collect();
    Ok(DescriptorKind::ServiceList(entries))
}

fn satellite_delivery(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 11)?;
    let short = |_| SiError::record(tag, "body too short");
    let mut br = BitReader::endian(&body[..11], BigEndian);

    let frequency = read_bcd(&mut br, 8).map_err(short)?;
    let orbital_position = read_bcd(&mut br, 4).map_err(short)? as u16;
    let east = br.read_bit().map_err(short)?;
    let polarization = br.read::<2, u8>().map_err(short)?;
    let roll_off = br.read::<2, u8>().map_err(short)?;
    let modulation_system = br.read::<1, u8>().map_err(short)?;
    let modulation_type = br.read::<2, u8>().map_err(short)?;
    let symbol_rate = read_bcd(&mut br, 7).map_err(short)?;
    let fec_inner = br.read::<4, u8>().map_err(short)?;

    Ok(DescriptorKind::SatelliteDelivery(SatelliteDelivery {
        // 8 digits in units of 10 kHz
        frequency_khz: frequency * 10,
        orbital_position,
        east,
        polarization,
        roll_off,
        modulation_system,
        modulation_type,
        // 7 digits in units of 100 symbol/s
        symbol_rate: symbol_rate * 100,
        fec_inner,
    }))
}

fn service(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 2)?;
    let service_type = body[0];
    let (provider, rest) = length_prefixed(tag, &body[1..])?;
    let (name, _) = length_prefixed(tag, rest)?;
    Ok(DescriptorKind::Service(ServiceDescriptor {
        service_type,
        provider_name: dvb_text(provider),
        service_name:  dvb_text(name),
    }))
}

fn country_availability(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 1)?;
    let codes = &body[1..];
    if codes.len() % 3 != 0 {
        return Err(SiError::record(tag, "country codes are 3 bytes each"));
    }
    Ok(DescriptorKind::CountryAvailability {
        available: body[0] & 0x80 != 0,
        countries: codes.chunks_exact(3).map(lang_code).collect(),
    })
}

fn linkage(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 7)?;
    let linkage_type = body[6];
    let mut rest = &body[7..];
    let mut hand_over = None;

    if linkage_type == LINKAGE_MOBILE_HAND_OVER {
        need(tag, rest, 1)?;
        let flags = rest[0];
        let hand_over_type = flags >> 4;
        let origin_type = flags & 0x01;
        rest = &rest[1..];

        let mut network_id = None;
        if (1..=3).contains(&hand_over_type) {
            need(tag, rest, 2)?;
            network_id = Some(be16(rest));
            rest = &rest[2..];
        }
        let mut initial_service_id = None;
        if origin_type == 0 {
            need(tag, rest, 2)?;
            initial_service_id = Some(be16(rest));
            rest = &rest[2..];
        }
        hand_over = Some(MobileHandover { hand_over_type, origin_type, network_id, initial_service_id });
    }

    Ok(DescriptorKind::Linkage(Linkage {
        transport_stream_id: be16(&body[0..2]),
        original_network_id: be16(&body[2..4]),
        service_id:          be16(&body[4..6]),
        linkage_type,
        hand_over,
        private_data:        rest.to_vec(),
    }))
}

fn multilingual_network_name(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    let mut names = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        need(tag, rest, 4)?;
        let language = lang_code(&rest[..3]);
        let (name, tail) = length_prefixed(tag, &rest[3..])?;
        names.push((language, dvb_text(name)));
        rest = tail;
    }
    Ok(DescriptorKind::MultilingualNetworkName(names))
}

fn private_data_specifier(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 4)?;
    Ok(DescriptorKind::PrivateDataSpecifier(u32::from_be_bytes([body[0], body[1], body[2], body[3]])))
}

fn bouquet_list(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    if body.len() % 2 != 0 {
        return Err(SiError::record(tag, "odd bouquet list length"));
    }
    Ok(DescriptorKind::BouquetList(body.chunks_exact(2).map(be16).collect()))
}

fn channel_list_mapping(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    if body.len() % 4 != 0 {
        return Err(SiError::record(tag, "channel mappings are 4 bytes each"));
    }
    let mappings = body
        .chunks_exact(4)
        .map(|c| ChannelMapping { service_id: be16(&c[0..2]), channel_number: be16(&c[2..4]) })
        .collect();
    Ok(DescriptorKind::ChannelListMapping(mappings))
}

fn mux_transport_list(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 4)?;
    let mut networks = Vec::new();
    let mut rest = &body[4..];
    while !rest.is_empty() {
        need(tag, rest, 3)?;
        let network_id = be16(rest);
        let loop_len = rest[2] as usize;
        let ids = rest
            .get(3..3 + loop_len)
            .ok_or(SiError::record(tag, "transport loop overruns body"))?;
        if loop_len % 2 != 0 {
            return Err(SiError::record(tag, "odd transport loop length"));
        }
        networks.push((network_id, ids.chunks_exact(2).map(be16).collect()));
        rest = &rest[3 + loop_len..];
    }
    Ok(DescriptorKind::MuxTransportList(MuxTransportList {
        version:   body[0],
        behaviour: body[1],
        duration:  be16(&body[2..4]),
        networks,
    }))
}

fn mux_signature(tag: u8, body: &[u8]) -> Result<DescriptorKind, SiError> {
    need(tag, body, 1)?;
    Ok(DescriptorKind::MuxSignature { version: body[0], signature: body[1..].to_vec() })
}

/// Splits `[len][len bytes]` off the front of `bytes`.
fn length_prefixed(tag: u8, bytes: &[u8]) -> Result<(&[u8], &[u8]), SiError> {
    let len = *bytes.first().ok_or(SiError::record(tag, "missing length byte"))? as usize;
    let field = bytes
        .get(1..1 + len)
        .ok_or(SiError::record(tag, "text overruns body"))?;
    Ok((field, &bytes[1 + len..]))
}

fn read_bcd<R: BitRead>(br: &mut R, digits: usize) -> std::io::Result<u32> {
    let mut value = 0u32;
    for _ in 0..digits {
        value = value * 10 + br.read::<4, u32>()?;
    }
    Ok(value)
}

/// Decodes a DVB text field (EN 300 468 annex A).
///
/// A leading character-table selector is honoured for UTF-8 (0x15) and
/// UCS-2 (0x11); every other table is read as ISO 8859-1. Emphasis control
/// codes are dropped and the CR/LF code becomes a newline.
pub fn dvb_text(bytes: &[u8]) -> String {
    let text = match bytes.first() {
        Some(0x15) => return String::from_utf8_lossy(&bytes[1..]).into_owned(),
        Some(0x11) => {
            let units: Vec<u16> = bytes[1..].chunks_exact(2).map(be16).collect();
            return String::from_utf16_lossy(&units);
        }
        Some(0x10) => bytes.get(3..).unwrap_or(&[]),
        Some(0x1F) => bytes.get(2..).unwrap_or(&[]),
        Some(&b) if b < 0x20 => &bytes[1..],
        _ => bytes,
    };
    text.iter()
        .filter_map(|&b| match b {
            0x8A => Some('\n'),
            0x80..=0x9F => None,
            _ => Some(b as char),
        })
        .collect()
}

/// Human-readable service type (EN 300 468 table 87).
pub fn service_type_name(service_type: u8) -> &'static str {
    match service_type {
        0x01 => "digital television",
        0x02 => "digital radio sound",
        0x03 => "teletext",
        0x04 => "NVOD reference",
        0x05 => "NVOD time-shifted",
        0x06 => "mosaic",
        0x07 => "FM radio",
        0x0A => "advanced codec digital radio sound",
        0x0C => "data broadcast",
        0x10 => "DVB MHP",
        0x11 => "MPEG-2 HD digital television",
        0x16 => "advanced codec SD digital television",
        0x19 => "advanced codec HD digital television",
        0x1F => "HEVC digital television",
        0x80..=0xFE => "user defined",
        _ => "reserved",
    }
}
