// src/psi/mod.rs
//! Section reassembly, table tracking and the table schemas built on top.

pub mod bat;
pub mod builder;
pub mod cat;
pub mod nit;
pub mod pat;
pub mod pmt;
pub mod sdt;
pub mod section;
pub mod tdt;
pub mod tracker;

pub use bat::parse_bat;
pub use builder::{BuilderStats, SectionBuilder};
pub use cat::{parse_cat, CatSection};
pub use nit::{parse_nit, NetworkTable, TransportEntry};
pub use pat::{parse_pat, PatEntry, PatSection};
pub use pmt::{parse_pmt, PmtSection, StreamInfo};
pub use sdt::{parse_sdt, SdtSection, SdtService};
pub use section::{Section, SectionHeader};
pub use tdt::{parse_tdt_tot, TimeTable};
pub use tracker::{TableKey, TableSnapshot, TableTracker};

/// 12-bit length field (4 reserved bits + 12 bits).
pub(crate) fn len12(b: &[u8]) -> usize {
    (((b[0] & 0x0F) as usize) << 8) | b[1] as usize
}

/// 13-bit PID field (3 reserved bits + 13 bits).
pub(crate) fn pid13(b: &[u8]) -> u16 {
    (((b[0] & 0x1F) as u16) << 8) | b[1] as u16
}

pub(crate) fn expect_table(sec: &Section, accepted: &[u8], name: &str) -> anyhow::Result<()> {
    if !accepted.contains(&sec.table_id()) {
        anyhow::bail!("not {name} (table_id 0x{:02X})", sec.table_id());
    }
    Ok(())
}
