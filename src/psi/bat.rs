// psi/bat.rs
//! Bouquet Association Table (0x4A). Same body layout as the NIT; the
//! sub-identity is the bouquet id.

use super::nit::{parse_network_table, NetworkTable};
use super::{expect_table, Section};
use crate::constants::table_id;
use crate::descriptors::{DescriptorKind, DescriptorRegistry};

pub fn parse_bat(sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<NetworkTable> {
    expect_table(sec, &[table_id::BAT], "BAT")?;
    parse_network_table(sec, registry)
}

/// Bouquet ids listed in a bouquet list descriptor of the table loop.
pub fn bouquet_list(bat: &NetworkTable) -> Vec<u16> {
    bat.descriptors
        .iter()
        .filter_map(|d| match &d.kind {
            DescriptorKind::BouquetList(ids) => Some(ids.iter().copied()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::nit::test_support::network_body;
    use crate::psi::section::test_support::long_section;

    #[test]
    fn bouquet_name_and_channels() {
        let mut desc = vec![0x47, 0x03];
        desc.extend_from_slice(b"Sky");
        desc.extend_from_slice(&[0x91, 0x02, 0x10, 0x01]);
        let ts = vec![0x93, 0x08, 0x00, 0x65, 0x00, 0x65, 0x00, 0x66, 0x00, 0x01];
        let raw = long_section(0x4A, 0x1001, 4, 0, 0, &network_body(&desc, &[(7, 2, ts)]));

        let bat = parse_bat(&Section::construct(&raw), &DescriptorRegistry::standard()).unwrap();
        assert_eq!(bat.id, 0x1001);
        assert_eq!(bat.name(), Some("Sky"));
        assert_eq!(bouquet_list(&bat), vec![0x1001]);
        assert_eq!(bat.channel_number(7, 0x66), Some(1));

        // channel mapping alone still yields services, without a type
        let services = &bat.service_lists()[&(2, 7)];
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].channel, Some(0x65));
        assert_eq!(services[0].service_type, None);
    }

    #[test]
    fn rejects_nit() {
        let raw = long_section(0x40, 1, 0, 0, 0, &network_body(&[], &[]));
        assert!(parse_bat(&Section::construct(&raw), &DescriptorRegistry::standard()).is_err());
    }
}
