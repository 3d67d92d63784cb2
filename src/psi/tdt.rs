// psi/tdt.rs
//! TDT (0x70, no CRC) & TOT (0x73, CRC present).

use anyhow::{bail, Context};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use super::{len12, Section};
use crate::constants::table_id;
use crate::descriptors::{Descriptor, DescriptorRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "table", rename_all = "lowercase")]
pub enum TimeTable {
    Tdt { utc: DateTime<Utc> },
    Tot { utc: DateTime<Utc>, descriptors: Vec<Descriptor> },
}

impl TimeTable {
    pub fn utc(&self) -> DateTime<Utc> {
        match self {
            TimeTable::Tdt { utc } | TimeTable::Tot { utc, .. } => *utc,
        }
    }
}

pub fn parse_tdt_tot(sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<TimeTable> {
    let b = sec.payload();
    if b.len() < 5 {
        bail!("short TDT/TOT");
    }
    let utc = decode_utc(&b[..5])?;

    match sec.table_id() {
        table_id::TDT => Ok(TimeTable::Tdt { utc }),
        table_id::TOT => {
            let Some(len_bytes) = b.get(5..7) else {
                bail!("TOT without descriptor loop length");
            };
            let Some(desc) = b.get(7..7 + len12(len_bytes)) else {
                bail!("TOT descriptor loop overruns section");
            };
            Ok(TimeTable::Tot { utc, descriptors: registry.decode_all(desc)? })
        }
        other => bail!("not TDT/TOT (table_id 0x{other:02X})"),
    }
}

/// 16-bit Modified Julian Date followed by hh:mm:ss in BCD.
pub fn decode_utc(b: &[u8]) -> anyhow::Result<DateTime<Utc>> {
    let mjd = u16::from_be_bytes([b[0], b[1]]);
    let epoch = NaiveDate::from_ymd_opt(1858, 11, 17).context("MJD epoch")?;
    let date = epoch
        .checked_add_days(Days::new(mjd as u64))
        .context("MJD out of range")?;
    let (h, m, s) = (bcd(b[2])?, bcd(b[3])?, bcd(b[4])?);
    let time = NaiveTime::from_hms_opt(h, m, s).context("invalid BCD time")?;
    Ok(date.and_time(time).and_utc())
}

fn bcd(byte: u8) -> anyhow::Result<u32> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    if hi > 9 || lo > 9 {
        bail!("invalid BCD digit in 0x{byte:02X}");
    }
    Ok((hi * 10 + lo) as u32)
}
