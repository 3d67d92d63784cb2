// psi/cat.rs
use std::collections::BTreeMap;

use serde::Serialize;

use super::{expect_table, Section};
use crate::constants::table_id;
use crate::descriptors::{conditional_access, find_ca_pid, Descriptor, DescriptorRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatSection {
    pub version:     u8,
    pub descriptors: Vec<Descriptor>,
}

impl CatSection {
    /// EMM PID of the first CA descriptor.
    pub fn ca_pid(&self) -> Option<u16> {
        find_ca_pid(&self.descriptors)
    }

    /// CA system id → EMM PID.
    pub fn ca_pids(&self) -> BTreeMap<u16, u16> {
        conditional_access(&self.descriptors)
            .map(|ca| (ca.ca_system_id, ca.ca_pid))
            .collect()
    }
}

pub fn parse_cat(sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<CatSection> {
    expect_table(sec, &[table_id::CAT], "CAT")?;
    Ok(CatSection {
        version:     sec.version(),
        descriptors: registry.decode_all(sec.payload())?,
    })
}
