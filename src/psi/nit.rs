// psi/nit.rs
//! NIT (0x40 actual / 0x41 other) and the layout it shares with the BAT.
//!
//! Both tables carry a block of table-level descriptors followed by a loop of
//! transport streams, each with its own descriptors. The sub-identity is the
//! network id for a NIT and the bouquet id for a BAT.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{expect_table, len12, Section};
use crate::constants::table_id;
use crate::descriptors::{Descriptor, DescriptorKind, DescriptorRegistry, SatelliteDelivery};
use crate::service_list::Service;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkTable {
    pub table_id:       u8,
    /// Network id (NIT) or bouquet id (BAT).
    pub id:             u16,
    pub version:        u8,
    pub section_number: u8,
    pub last_section:   u8,
    pub descriptors:    Vec<Descriptor>,
    pub transports:     Vec<TransportEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportEntry {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub descriptors:         Vec<Descriptor>,
}

impl TransportEntry {
    /// (original network id, transport stream id)
    pub fn double(&self) -> (u16, u16) {
        (self.original_network_id, self.transport_stream_id)
    }

    pub fn channel_number(&self, service_id: u16) -> Option<u16> {
        self.descriptors.iter().find_map(|d| match &d.kind {
            DescriptorKind::ChannelListMapping(map) => map
                .iter()
                .find(|m| m.service_id == service_id)
                .map(|m| m.channel_number),
            _ => None,
        })
    }

    pub fn satellite_delivery(&self) -> Option<&SatelliteDelivery> {
        self.descriptors.iter().find_map(|d| match &d.kind {
            DescriptorKind::SatelliteDelivery(sd) => Some(sd),
            _ => None,
        })
    }

    /// Services announced for this transport stream, built from the service
    /// list and channel list mapping descriptors. `None` when neither is
    /// present.
    pub fn services(&self) -> Option<Vec<Service>> {
        let mut types = None;
        let mut channels = None;
        for d in &self.descriptors {
            match &d.kind {
                DescriptorKind::ServiceList(list) => types = Some(list),
                DescriptorKind::ChannelListMapping(map) => channels = Some(map),
                _ => {}
            }
        }

        let (network_id, transport_stream_id) = self.double();
        let make = |service_id: u16| Service {
            network_id,
            transport_stream_id,
            service_id,
            channel: channels
                .and_then(|map| map.iter().find(|m| m.service_id == service_id))
                .map(|m| m.channel_number),
            service_type: types
                .and_then(|list| list.iter().find(|e| e.service_id == service_id))
                .map(|e| e.service_type),
            ..Service::default()
        };

        match (types, channels) {
            (Some(list), _) if !list.is_empty() => Some(list.iter().map(|e| make(e.service_id)).collect()),
            (_, Some(map)) if !map.is_empty() => Some(map.iter().map(|m| make(m.service_id)).collect()),
            _ => None,
        }
    }
}

impl NetworkTable {
    /// Network name (NIT) or bouquet name (BAT).
    pub fn name(&self) -> Option<&str> {
        self.descriptors.iter().find_map(|d| match &d.kind {
            DescriptorKind::NetworkName(name) | DescriptorKind::BouquetName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn transport_stream_ids(&self) -> Vec<u16> {
        self.transports.iter().map(|t| t.transport_stream_id).collect()
    }

    pub fn transport(&self, transport_stream_id: u16) -> Option<&TransportEntry> {
        self.transports
            .iter()
            .find(|t| t.transport_stream_id == transport_stream_id)
    }

    /// Service lists of every transport stream that announces one, keyed by
    /// (original network id, transport stream id).
    pub fn service_lists(&self) -> BTreeMap<(u16, u16), Vec<Service>> {
        self.transports
            .iter()
            .filter_map(|t| Some((t.double(), t.services()?)))
            .collect()
    }

    pub fn channel_number(&self, transport_stream_id: u16, service_id: u16) -> Option<u16> {
        self.transport(transport_stream_id)?.channel_number(service_id)
    }

    pub fn satellite_delivery(&self, transport_stream_id: u16) -> Option<&SatelliteDelivery> {
        self.transport(transport_stream_id)?.satellite_delivery()
    }
}

pub fn parse_nit(sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<NetworkTable> {
    expect_table(sec, &[table_id::NIT_ACTUAL, table_id::NIT_OTHER], "NIT")?;
    parse_network_table(sec, registry)
}

/// Decodes the NIT/BAT body. The table id is not checked here.
pub(crate) fn parse_network_table(sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<NetworkTable> {
    let b = sec.payload();
    if b.len() < 4 {
        anyhow::bail!("NIT/BAT body too short");
    }

    let desc_len = len12(&b[0..2]);
    let Some(table_desc) = b.get(2..2 + desc_len) else {
        anyhow::bail!("truncated table descriptors");
    };
    let descriptors = registry.decode_all(table_desc)?;

    let mut idx = 2 + desc_len;
    let Some(loop_len_bytes) = b.get(idx..idx + 2) else {
        anyhow::bail!("missing transport stream loop length");
    };
    let loop_end = idx + 2 + len12(loop_len_bytes);
    if loop_end > b.len() {
        anyhow::bail!("transport stream loop overruns section");
    }
    idx += 2;

    let mut transports = Vec::new();
    while idx + 6 <= loop_end {
        let transport_stream_id = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let original_network_id = u16::from_be_bytes([b[idx + 2], b[idx + 3]]);
        let ts_desc_len = len12(&b[idx + 4..idx + 6]);
        let end = idx + 6 + ts_desc_len;
        if end > loop_end {
            anyhow::bail!("truncated descriptors for TS 0x{transport_stream_id:04X}");
        }
        transports.push(TransportEntry {
            transport_stream_id,
            original_network_id,
            descriptors: registry.decode_all(&b[idx + 6..end])?,
        });
        idx = end;
    }

    Ok(NetworkTable {
        table_id: sec.table_id(),
        id: sec.sub_identity().unwrap_or_default(),
        version: sec.version(),
        section_number: sec.section_number(),
        last_section: sec.last_section_number(),
        descriptors,
        transports,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::network_body;
    use super::*;
    use crate::psi::section::test_support::long_section;

    fn sample() -> NetworkTable {
        let mut ts1 = vec![0x41, 0x06, 0x00, 0x65, 0x01, 0x00, 0x66, 0x02];
        ts1.extend_from_slice(&[0x93, 0x04, 0x00, 0x65, 0x00, 0x07]);
        let ts2 = vec![0x43, 0x0B, 0x01, 0x17, 0x28, 0x00, 0x01, 0x92, 0x81, 0x02, 0x75, 0x00, 0x03];

        let mut name = vec![0x40, 0x05];
        name.extend_from_slice(b"Astra");
        let body = network_body(&name, &[(0x0001, 0x0002, ts1), (0x0003, 0x0002, ts2)]);
        let raw = long_section(0x40, 6144, 1, 0, 0, &body);
        parse_nit(&Section::construct(&raw), &DescriptorRegistry::standard()).unwrap()
    }

    #[test]
    fn network_name_and_transports() {
        let nit = sample();
        assert_eq!(nit.id, 6144);
        assert_eq!(nit.name(), Some("Astra"));
        assert_eq!(nit.transport_stream_ids(), vec![1, 3]);
        assert_eq!(nit.satellite_delivery(3).map(|sd| sd.frequency_khz), Some(11_728_000));
        assert!(nit.satellite_delivery(1).is_none());
    }

    #[test]
    fn service_lists_from_descriptors() {
        let nit = sample();
        assert_eq!(nit.channel_number(1, 0x65), Some(7));
        assert_eq!(nit.channel_number(1, 0x66), None);

        let lists = nit.service_lists();
        // TS 3 carries no service information
        assert_eq!(lists.len(), 1);
        let services = &lists[&(2, 1)];
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].channel, Some(7));
        assert_eq!(services[1].service_type, Some(2));
        assert_eq!(services[1].triplet(), (2, 1, 0x66));
    }

    #[test]
    fn overrunning_loop_is_an_error() {
        let mut body = network_body(&[], &[(1, 2, vec![])]);
        body[3] += 10;
        let raw = long_section(0x40, 1, 0, 0, 0, &body);
        assert!(parse_nit(&Section::construct(&raw), &DescriptorRegistry::standard()).is_err());
    }

    #[test]
    fn rejects_bat() {
        let raw = long_section(0x4A, 1, 0, 0, 0, &network_body(&[], &[]));
        assert!(parse_nit(&Section::construct(&raw), &DescriptorRegistry::standard()).is_err());
    }
}
