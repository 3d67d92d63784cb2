//! Report generation for SI reading results

use std::collections::BTreeMap;
use std::path::Path;

use log::warn;
use serde::Serialize;

use crate::constants::table_id;
use crate::descriptors::DescriptorRegistry;
use crate::packet::AdaptationField;
use crate::psi::{
    parse_bat, parse_cat, parse_nit, parse_pat, parse_pmt, parse_sdt, parse_tdt_tot, BuilderStats, CatSection,
    NetworkTable, PatSection, PmtSection, SdtSection, Section, SectionBuilder, TimeTable,
};
use crate::service_list::{Service, ServiceList};

/// Transport-level counters kept by the reader loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketCounters {
    pub packets:          u64,
    pub malformed:        u64,
    pub transport_errors: u64,
    pub null_packets:     u64,
    pub pcr_packets:      u64,
    pub discontinuities:  u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_pcr_us:     Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pcr_us:      Option<u64>,
}

impl PacketCounters {
    pub fn record_adaptation(&mut self, af: &AdaptationField) {
        if af.discontinuity {
            self.discontinuities += 1;
        }
        if let Some(pcr) = af.pcr {
            self.pcr_packets += 1;
            let us = pcr.as_micros();
            self.first_pcr_us.get_or_insert(us);
            self.last_pcr_us = Some(us);
        }
    }

    /// Time covered by the PCRs seen, ignoring wrap-around.
    pub fn pcr_span_ms(&self) -> Option<u64> {
        Some(self.last_pcr_us?.saturating_sub(self.first_pcr_us?) / 1000)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub pid:             u16,
    pub table_id:        u8,
    pub stats:           BuilderStats,
    pub tables_complete: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiReport {
    pub timestamp: String,
    pub input:     String,
    pub packets:   PacketCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcr_span_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pat:       Option<PatSection>,
    pub pmts:      Vec<PmtSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cat:       Option<CatSection>,
    pub nit:       Vec<NetworkTable>,
    pub bat:       Vec<NetworkTable>,
    pub sdt:       Vec<SdtSection>,
    pub time:      Vec<TimeTable>,
    pub services:  Vec<Service>,
    pub workers:   Vec<WorkerReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors:    Vec<String>,
}

impl SiReport {
    fn empty(input: &Path, packets: PacketCounters) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            input: input.display().to_string(),
            packets,
            pcr_span_ms: packets.pcr_span_ms(),
            pat: None,
            pmts: Vec::new(),
            cat: None,
            nit: Vec::new(),
            bat: Vec::new(),
            sdt: Vec::new(),
            time: Vec::new(),
            services: Vec::new(),
            workers: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Report generator for SI reading results
pub struct Reporter;

impl Reporter {
    /// Decodes the tables collected by `builders` into an [`SiReport`].
    pub fn create_report(
        input: &Path,
        packets: PacketCounters,
        mut builders: Vec<SectionBuilder>,
        registry: &DescriptorRegistry,
    ) -> SiReport {
        let mut report = SiReport::empty(input, packets);
        builders.sort_by_key(|b| (b.pid(), b.table_id()));

        for builder in &mut builders {
            let sections = current_sections(builder);
            report.workers.push(WorkerReport {
                pid:             builder.pid(),
                table_id:        builder.table_id(),
                stats:           builder.stats(),
                tables_complete: builder.tracker().complete_snapshots().count(),
            });
            for sec in &sections {
                if let Err(e) = report.add_section(sec, registry) {
                    warn!("PID 0x{:04X}: {e:#}", builder.pid());
                    report.errors.push(format!("PID 0x{:04X}: {e:#}", builder.pid()));
                }
            }
        }

        let mut services = ServiceList::new();
        for nit in &report.nit {
            services.update_nit(nit);
        }
        for bat in &report.bat {
            services.update_bat(bat);
        }
        for sdt in &report.sdt {
            services.update_sdt(sdt);
        }
        report.services = services.iter().cloned().collect();
        report
    }

    /// Generate pretty-printed JSON string for CLI output
    pub fn generate_json_report(report: &SiReport) -> String {
        serde_json::to_string_pretty(report)
            .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }
}

impl SiReport {
    fn add_section(&mut self, sec: &Section, registry: &DescriptorRegistry) -> anyhow::Result<()> {
        match sec.table_id() {
            table_id::PAT => {
                let pat = parse_pat(sec)?;
                match &mut self.pat {
                    Some(known) => known.merge(pat),
                    None => self.pat = Some(pat),
                }
            }
            table_id::CAT => {
                let cat = parse_cat(sec, registry)?;
                match &mut self.cat {
                    Some(known) => known.descriptors.extend(cat.descriptors),
                    None => self.cat = Some(cat),
                }
            }
            table_id::PMT => self.pmts.push(parse_pmt(sec, registry)?),
            table_id::NIT_ACTUAL | table_id::NIT_OTHER => self.nit.push(parse_nit(sec, registry)?),
            table_id::BAT => self.bat.push(parse_bat(sec, registry)?),
            table_id::SDT_ACTUAL | table_id::SDT_OTHER => self.sdt.push(parse_sdt(sec, registry)?),
            table_id::TDT | table_id::TOT => self.time.push(parse_tdt_tot(sec, registry)?),
            other => anyhow::bail!("no decoder for table 0x{other:02X}"),
        }
        Ok(())
    }
}

/// Sections worth reporting from one builder: for each sub-identity the
/// highest complete version (promoted, older ones discarded), plus the
/// short-form sections in arrival order.
fn current_sections(builder: &mut SectionBuilder) -> Vec<Section> {
    let mut newest: BTreeMap<u16, u8> = BTreeMap::new();
    for (key, _) in builder.tracker().complete_snapshots() {
        let version = newest.entry(key.sub_identity).or_insert(key.version);
        *version = (*version).max(key.version);
    }

    let tracker = builder.tracker_mut();
    let mut out = Vec::new();
    for (sub_identity, version) in newest {
        tracker.promote(version, sub_identity);
        if let Some(snap) = tracker.current(sub_identity) {
            out.extend(snap.sections().cloned());
        }
    }
    out.extend(builder.take_sections());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::nit::test_support::network_body;
    use crate::psi::sdt::test_support::sdt_body;
    use crate::psi::section::test_support::long_section;

    fn feed(builder: &mut SectionBuilder, section: &[u8]) {
        let mut p = vec![0u8];
        p.extend_from_slice(section);
        p.resize(184, 0xFF);
        builder.push_payload(&p, true);
    }

    #[test]
    fn newest_complete_version_wins() {
        let mut b = SectionBuilder::new(0x11, 0x42);
        feed(&mut b, &long_section(0x42, 1, 3, 0, 0, &sdt_body(2, &[(10, 1, "Old")])));
        feed(&mut b, &long_section(0x42, 1, 4, 0, 0, &sdt_body(2, &[(10, 1, "New")])));
        // incomplete v5 is not reported
        feed(&mut b, &long_section(0x42, 1, 5, 0, 1, &sdt_body(2, &[(10, 1, "Next")])));

        let sections = current_sections(&mut b);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].version(), 4);
        assert!(b.tracker().snapshot(3, 1).is_none());
    }

    #[test]
    fn report_joins_nit_and_sdt() {
        let mut nit_b = SectionBuilder::new(0x10, 0x40);
        let ts = vec![0x41, 0x03, 0x00, 0x0A, 0x01];
        feed(&mut nit_b, &long_section(0x40, 1, 0, 0, 0, &network_body(&[], &[(1, 2, ts)])));
        let mut sdt_b = SectionBuilder::new(0x11, 0x42);
        feed(&mut sdt_b, &long_section(0x42, 1, 0, 0, 0, &sdt_body(2, &[(10, 1, "One")])));

        let report = Reporter::create_report(
            Path::new("test.ts"),
            PacketCounters::default(),
            vec![sdt_b, nit_b],
            &DescriptorRegistry::standard(),
        );
        assert_eq!(report.nit.len(), 1);
        assert_eq!(report.services.len(), 1);
        assert_eq!(report.services[0].name.as_deref(), Some("One"));
        assert_eq!(report.workers[0].pid, 0x10);
        assert!(report.errors.is_empty());

        let json = Reporter::generate_json_report(&report);
        assert!(json.contains("\"service_id\": 10"));
    }

    #[test]
    fn pcr_span() {
        let mut c = PacketCounters::default();
        assert_eq!(c.pcr_span_ms(), None);
        c.first_pcr_us = Some(1_000);
        c.last_pcr_us = Some(2_501_000);
        assert_eq!(c.pcr_span_ms(), Some(2_500));
    }
}
