// psi/sdt.rs
use serde::Serialize;

use super::{expect_table, len12, Section};
use crate::constants::table_id;
use crate::descriptors::{Descriptor, DescriptorKind, DescriptorRegistry, ServiceDescriptor};
use crate::service_list::Service;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SdtSection {
    pub table_id:            u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version:             u8,
    pub services:            Vec<SdtService>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SdtService {
    pub service_id:     u16,
    pub eit_schedule:   bool,
    pub eit_present:    bool,
    pub running_status: u8,
    pub free_ca:        bool,
    pub descriptors:    Vec<Descriptor>,
}

impl SdtService {
    fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        self.descriptors.iter().find_map(|d| match &d.kind {
            DescriptorKind::Service(sd) => Some(sd),
            _ => None,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.service_descriptor().map(|sd| sd.service_name.as_str())
    }

    pub fn provider(&self) -> Option<&str> {
        self.service_descriptor().map(|sd| sd.provider_name.as_str())
    }

    pub fn service_type(&self) -> Option<u8> {
        self.service_descriptor().map(|sd| sd.service_type)
    }
}

impl SdtSection {
    pub fn is_actual(&self) -> bool {
        self.table_id == table_id::SDT_ACTUAL
    }

    pub fn service(&self, service_id: u16) -> Option<&SdtService> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    /// Services keyed by their triplet, carrying name and type.
    pub fn service_list(&self) -> Vec<Service> {
        self.services
            .iter()
            .map(|s| Service {
                network_id:          self.original_network_id,
                transport_stream_id: self.transport_stream_id,
                service_id:          s.service_id,
                name:                s.name().map(str::to_owned),
                service_type:        s.service_type(),
                ..Service::default()
            })
            .collect()
    }
}

/// SDT (table_id 0x42 actual / 0x46 other-TS).
pub fn parse_sdt(sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<SdtSection> {
    expect_table(sec, &[table_id::SDT_ACTUAL, table_id::SDT_OTHER], "SDT")?;
    let b = sec.payload();
    if b.len() < 3 {
        anyhow::bail!("SDT body too short");
    }
    let original_network_id = u16::from_be_bytes([b[0], b[1]]);

    let mut idx = 3; // onid + reserved byte
    let mut services = Vec::new();
    while idx + 5 <= b.len() {
        let service_id = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let flags = b[idx + 2];
        let status = b[idx + 3];
        let desc_len = len12(&b[idx + 3..idx + 5]);
        let Some(desc) = b.get(idx + 5..idx + 5 + desc_len) else {
            anyhow::bail!("truncated descriptors for service 0x{service_id:04X}");
        };
        services.push(SdtService {
            service_id,
            eit_schedule: flags & 0x02 != 0,
            eit_present: flags & 0x01 != 0,
            running_status: status >> 5,
            free_ca: status & 0x10 != 0,
            descriptors: registry.decode_all(desc)?,
        });
        idx += 5 + desc_len;
    }

    Ok(SdtSection {
        table_id: sec.table_id(),
        transport_stream_id: sec.sub_identity().unwrap_or_default(),
        original_network_id,
        version: sec.version(),
        services,
    })
}
