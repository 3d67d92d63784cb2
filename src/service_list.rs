//! Services collected from the NIT, BAT and SDT.
//!
//! The NIT is the authoritative list: it defines which services exist on each
//! (network, transport stream) pair. BAT and SDT only fill in details such as
//! channel numbers and names for services the NIT already announced.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::descriptors::dvb::service_type_name;
use crate::psi::{NetworkTable, SdtSection};

/// (original network id, transport stream id, service id)
pub type Triplet = (u16, u16, u16);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Service {
    pub network_id:          u16,
    pub transport_stream_id: u16,
    pub service_id:          u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel:             Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name:                Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type:        Option<u8>,
}

impl Service {
    pub fn triplet(&self) -> Triplet {
        (self.network_id, self.transport_stream_id, self.service_id)
    }

    /// Takes every field `other` knows about; unknown ones stay as they are.
    pub fn update(&mut self, other: &Service) {
        if other.channel.is_some() {
            self.channel = other.channel;
        }
        if other.name.is_some() {
            self.name.clone_from(&other.name);
        }
        if other.service_type.is_some() {
            self.service_type = other.service_type;
        }
    }

    pub fn type_name(&self) -> Option<&'static str> {
        self.service_type.map(service_type_name)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ServiceList {
    services: BTreeMap<Triplet, Service>,
}

impl ServiceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronises with a NIT: services of each announced (network, TS)
    /// pair are added or updated, and services of that pair the NIT no longer
    /// lists are removed.
    pub fn update_nit(&mut self, nit: &NetworkTable) {
        for ((network_id, transport_stream_id), services) in nit.service_lists() {
            let incoming: BTreeMap<Triplet, &Service> = services.iter().map(|s| (s.triplet(), s)).collect();

            self.services.retain(|triplet, _| {
                (triplet.0, triplet.1) != (network_id, transport_stream_id) || incoming.contains_key(triplet)
            });
            for (triplet, service) in incoming {
                self.services
                    .entry(triplet)
                    .and_modify(|known| known.update(service))
                    .or_insert_with(|| service.clone());
            }
        }
    }

    /// Updates known services from a BAT. Never adds or removes.
    pub fn update_bat(&mut self, bat: &NetworkTable) {
        for services in bat.service_lists().values() {
            self.update_known(services);
        }
    }

    /// Updates known services from an SDT. Never adds or removes.
    pub fn update_sdt(&mut self, sdt: &SdtSection) {
        self.update_known(&sdt.service_list());
    }

    fn update_known(&mut self, services: &[Service]) {
        for service in services {
            if let Some(known) = self.services.get_mut(&service.triplet()) {
                known.update(service);
            }
        }
    }

    pub fn get(&self, triplet: Triplet) -> Option<&Service> {
        self.services.get(&triplet)
    }

    /// Every service carrying `service_id`, whatever its network and TS.
    pub fn by_service_id(&self, service_id: u16) -> Vec<&Service> {
        self.services.values().filter(|s| s.service_id == service_id).collect()
    }

    pub fn services_for(&self, network_id: u16, transport_stream_id: u16) -> Vec<&Service> {
        self.services
            .range((network_id, transport_stream_id, 0)..=(network_id, transport_stream_id, u16::MAX))
            .map(|(_, s)| s)
            .collect()
    }

    /// Distinct (network id, transport stream id) pairs in the list.
    pub fn doubles(&self) -> BTreeSet<(u16, u16)> {
        self.services.keys().map(|t| (t.0, t.1)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::DescriptorRegistry;
    use crate::psi::nit::test_support::network_body;
    use crate::psi::sdt::test_support::sdt_body;
    use crate::psi::section::test_support::long_section;
    use crate::psi::{parse_bat, parse_nit, parse_sdt, Section};

    fn service_list_desc(ids: &[(u16, u8)]) -> Vec<u8> {
        let mut d = vec![0x41, (ids.len() * 3) as u8];
        for (sid, stype) in ids {
            d.extend_from_slice(&sid.to_be_bytes());
            d.push(*stype);
        }
        d
    }

    fn nit(ts: &[(u16, u16, Vec<u8>)]) -> NetworkTable {
        let raw = long_section(0x40, 1, 0, 0, 0, &network_body(&[], ts));
        parse_nit(&Section::construct(&raw), &DescriptorRegistry::standard()).unwrap()
    }

    #[test]
    fn nit_defines_existence() {
        let mut list = ServiceList::new();
        list.update_nit(&nit(&[(1, 2, service_list_desc(&[(10, 1), (11, 1)])), (3, 2, service_list_desc(&[(10, 2)]))]));
        assert_eq!(list.len(), 3);
        assert_eq!(list.doubles(), BTreeSet::from([(2, 1), (2, 3)]));
        assert_eq!(list.by_service_id(10).len(), 2);

        // service 11 vanishes from TS 1; TS 3 is not mentioned and stays
        list.update_nit(&nit(&[(1, 2, service_list_desc(&[(10, 1), (12, 2)]))]));
        assert!(list.get((2, 1, 11)).is_none());
        assert!(list.get((2, 1, 12)).is_some());
        assert!(list.get((2, 3, 10)).is_some());
        assert_eq!(list.services_for(2, 1).len(), 2);
    }

    #[test]
    fn sdt_and_bat_only_update() {
        let mut list = ServiceList::new();
        list.update_nit(&nit(&[(1, 2, service_list_desc(&[(10, 1)]))]));

        let raw = long_section(0x42, 1, 0, 0, 0, &sdt_body(2, &[(10, 0x19, "HD One"), (99, 1, "Ghost")]));
        let sdt = parse_sdt(&Section::construct(&raw), &DescriptorRegistry::standard()).unwrap();
        list.update_sdt(&sdt);
        assert_eq!(list.len(), 1);
        let svc = list.get((2, 1, 10)).unwrap();
        assert_eq!(svc.name.as_deref(), Some("HD One"));
        assert_eq!(svc.type_name(), Some("advanced codec HD digital television"));

        let ts = vec![0x93, 0x08, 0x00, 0x0A, 0x00, 0x05, 0x00, 0x63, 0x00, 0x06];
        let raw = long_section(0x4A, 0x1000, 0, 0, 0, &network_body(&[], &[(1, 2, ts)]));
        let bat = parse_bat(&Section::construct(&raw), &DescriptorRegistry::standard()).unwrap();
        list.update_bat(&bat);
        assert_eq!(list.len(), 1);
        let svc = list.get((2, 1, 10)).unwrap();
        assert_eq!(svc.channel, Some(5));
        // BAT carries no name, so the SDT one survives
        assert_eq!(svc.name.as_deref(), Some("HD One"));
    }

    #[test]
    fn update_keeps_unknown_fields() {
        let mut a = Service { network_id: 1, transport_stream_id: 2, service_id: 3, channel: Some(4), ..Service::default() };
        a.update(&Service { name: Some("x".into()), ..Service::default() });
        assert_eq!(a.channel, Some(4));
        assert_eq!(a.name.as_deref(), Some("x"));
    }
}
