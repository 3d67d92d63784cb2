// psi/builder.rs
//! Per-PID section reassembly.
//!
//! A [`SectionBuilder`] is fed packet payloads of one PID in stream order and
//! rebuilds the sections of a single table id. Short-form sections are kept
//! in arrival order; long-form ones go to the builder's [`TableTracker`].

use log::{debug, trace, warn};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::constants::STUFFING_BYTE;
use crate::error::SiError;
use crate::feed::{FeedItem, Fragment};
use crate::psi::section::{check_header, Section, SectionHeader};
use crate::psi::tracker::TableTracker;

#[derive(Debug, Default)]
enum State {
    #[default]
    WaitingForStart,
    Accumulating(Section),
}

/// Counters kept by one builder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuilderStats {
    pub fragments:  u64,
    pub delivered:  u64,
    pub duplicates: u64,
    pub malformed:  u64,
    pub crc_errors: u64,
    pub anomalies:  u64,
}

pub struct SectionBuilder {
    pid:      u16,
    table_id: u8,
    state:    State,
    halted:   bool,
    tracker:  TableTracker,
    sections: Vec<Section>,
    listener: Option<UnboundedSender<Section>>,
    stats:    BuilderStats,
}

impl SectionBuilder {
    pub fn new(pid: u16, table_id: u8) -> Self {
        Self {
            pid,
            table_id,
            state: State::WaitingForStart,
            halted: false,
            tracker: TableTracker::new(),
            sections: Vec::new(),
            listener: None,
            stats: BuilderStats::default(),
        }
    }

    /// Sends a copy of every delivered section to `tx`.
    pub fn with_listener(mut self, tx: UnboundedSender<Section>) -> Self {
        self.listener = Some(tx);
        self
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn table_id(&self) -> u8 {
        self.table_id
    }

    pub fn stats(&self) -> BuilderStats {
        self.stats
    }

    pub fn tracker(&self) -> &TableTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TableTracker {
        &mut self.tracker
    }

    /// Completed short-form sections, oldest first.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn take_sections(&mut self) -> Vec<Section> {
        std::mem::take(&mut self.sections)
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, State::Accumulating(_))
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Handles one item from the payload feed.
    ///
    /// `Empty` is a no-op; `Closed` halts the builder for good and is
    /// reported back as [`SiError::FeedClosed`].
    pub fn on_feed(&mut self, item: FeedItem) -> Result<(), SiError> {
        if self.halted {
            return Err(SiError::FeedClosed);
        }
        match item {
            FeedItem::Fragment(frag) => {
                self.push(&frag);
                Ok(())
            }
            FeedItem::Empty => Ok(()),
            FeedItem::Closed => {
                self.halt();
                Err(SiError::FeedClosed)
            }
        }
    }

    /// Stops the builder, dropping any section still in progress.
    pub fn halt(&mut self) {
        if let State::Accumulating(sec) = std::mem::take(&mut self.state) {
            debug!(
                "PID 0x{:04X}: dropping unfinished table 0x{:02X} section ({} bytes)",
                self.pid,
                sec.table_id(),
                sec.received()
            );
        }
        self.halted = true;
    }

    pub fn push(&mut self, frag: &Fragment) {
        self.push_payload(&frag.payload, frag.start);
    }

    /// Processes one packet payload.
    pub fn push_payload(&mut self, payload: &[u8], start: bool) {
        if self.halted {
            return;
        }
        self.stats.fragments += 1;

        let mut next_start = match (std::mem::take(&mut self.state), start) {
            (State::WaitingForStart, false) => None,
            (State::WaitingForStart, true) => self.after_pointer(payload),
            (State::Accumulating(mut sec), false) => {
                let used = sec.append(payload);
                if sec.is_complete() {
                    self.hand_off(sec);
                    residual(&payload[used..])
                } else {
                    self.state = State::Accumulating(sec);
                    None
                }
            }
            (State::Accumulating(mut sec), true) => {
                let Some(pointer) = payload.first().map(|p| *p as usize) else {
                    self.state = State::Accumulating(sec);
                    return;
                };
                let tail = payload.get(1..1 + pointer).unwrap_or(&payload[1..]);
                sec.append(tail);
                if sec.is_complete() {
                    self.hand_off(sec);
                } else {
                    let anomaly = SiError::ProtocolAnomaly {
                        table_id: sec.table_id(),
                        received: sec.received(),
                        expected: sec.declared_len().unwrap_or(0),
                    };
                    warn!("PID 0x{:04X}: {anomaly}", self.pid);
                    self.stats.anomalies += 1;
                }
                self.after_pointer(payload)
            }
        };

        // sections that start behind another one in the same payload
        while let Some(bytes) = next_start.take() {
            next_start = self.start_section(bytes);
        }
    }

    fn after_pointer<'a>(&mut self, payload: &'a [u8]) -> Option<&'a [u8]> {
        let pointer = *payload.first()? as usize;
        match payload.get(1 + pointer..) {
            Some(rest) if !rest.is_empty() => Some(rest),
            Some(_) => None,
            None => {
                debug!("PID 0x{:04X}: pointer field {pointer} overruns payload", self.pid);
                self.stats.malformed += 1;
                None
            }
        }
    }

    /// Begins a section at `bytes[0]`. Returns the bytes left over when the
    /// section completed inside `bytes` and more data follows it.
    fn start_section<'a>(&mut self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        if bytes.first() == Some(&STUFFING_BYTE) {
            return None;
        }
        if bytes[0] != self.table_id {
            trace!("PID 0x{:04X}: skipping table 0x{:02X}", self.pid, bytes[0]);
            // a section of another table may be followed by one of ours
            let hdr = SectionHeader::peek(bytes)?;
            return bytes.get(hdr.total_len()..).and_then(residual);
        }

        if let Some(hdr) = SectionHeader::peek(bytes) {
            if let Err(e) = check_header(&hdr) {
                debug!("PID 0x{:04X}: {e}", self.pid);
                self.stats.malformed += 1;
                return None;
            }
            if let Some(sub_identity) = hdr.sub_identity {
                if !self.tracker.needs(hdr.version, sub_identity, hdr.section_number) {
                    self.stats.duplicates += 1;
                    // the retransmission still occupies its bytes
                    return bytes.get(hdr.total_len()..).and_then(residual);
                }
            }
        }

        let sec = Section::construct(bytes);
        if !sec.is_complete() {
            self.state = State::Accumulating(sec);
            return None;
        }
        let used = sec.received();
        self.hand_off(sec);
        residual(&bytes[used..])
    }

    fn hand_off(&mut self, sec: Section) {
        if let Err(e) = sec.validate() {
            debug!("PID 0x{:04X}: {e}", self.pid);
            match e {
                SiError::MalformedSection { reason: "CRC-32 mismatch", .. } => self.stats.crc_errors += 1,
                _ => self.stats.malformed += 1,
            }
            return;
        }

        if sec.is_long_form() {
            let (version, number) = (sec.version(), sec.section_number());
            let copy = self.listener.as_ref().map(|_| sec.clone());
            if !self.tracker.add(sec) {
                self.stats.duplicates += 1;
                return;
            }
            trace!("PID 0x{:04X}: table 0x{:02X} v{version} section {number}", self.pid, self.table_id);
            self.stats.delivered += 1;
            self.notify(copy);
        } else {
            self.stats.delivered += 1;
            let copy = self.listener.as_ref().map(|_| sec.clone());
            self.sections.push(sec);
            self.notify(copy);
        }
    }

    fn notify(&self, sec: Option<Section>) {
        if let (Some(tx), Some(sec)) = (&self.listener, sec) {
            // the receiving side may have gone away; that's fine
            let _ = tx.send(sec);
        }
    }
}

/// Bytes after a finished section that may hold another one.
fn residual(rest: &[u8]) -> Option<&[u8]> {
    match rest.first() {
        None | Some(&STUFFING_BYTE) => None,
        Some(_) => Some(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::test_support::{long_section, short_section};

    fn pat(version: u8, number: u8, last: u8) -> Vec<u8> {
        long_section(0x00, 0x0001, version, number, last, &[0x00, 0x01, 0xE1, 0x00])
    }

    /// Packet payload: pointer field, `data`, 0xFF up to 184 bytes.
    fn start_payload(pointer_fill: &[u8], data: &[u8]) -> Vec<u8> {
        let mut p = vec![pointer_fill.len() as u8];
        p.extend_from_slice(pointer_fill);
        p.extend_from_slice(data);
        p.resize(184, 0xFF);
        p
    }

    #[test]
    fn single_packet_section() {
        let mut b = SectionBuilder::new(0x0000, 0x00);
        b.push_payload(&start_payload(&[], &pat(0, 0, 0)), true);
        assert!(b.tracker().is_complete(0, 1));
        assert!(!b.is_accumulating());
        assert_eq!(b.stats().delivered, 1);
    }

    #[test]
    fn stuffing_yields_exactly_one_section() {
        let mut b = SectionBuilder::new(0x0000, 0x00);
        b.push_payload(&start_payload(&[], &pat(0, 0, 0)), true);
        assert_eq!(b.stats().delivered, 1);
        assert_eq!(b.stats().malformed, 0);
        assert_eq!(b.tracker().snapshots().count(), 1);
    }

    #[test]
    fn cross_fragment_reassembly_is_byte_identical() {
        let body: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let whole = long_section(0x42, 16, 4, 0, 0, &body);

        let mut first = vec![0u8];
        first.extend_from_slice(&whole[..183]);
        let mut second = whole[183..].to_vec();
        second.resize(184, 0xFF);

        let mut b = SectionBuilder::new(0x0011, 0x42);
        b.push_payload(&first, true);
        assert!(b.is_accumulating());
        b.push_payload(&second, false);
        assert!(!b.is_accumulating());

        let sec = b.tracker().snapshot(4, 16).and_then(|s| s.get(0)).unwrap();
        assert_eq!(sec.bytes(), &whole[..]);
    }

    #[test]
    fn residual_section_starts_accumulating() {
        let a = short_section(0x73, &[0x01, 0x02, 0x03, 0x04, 0x05, 0xF0], true);
        assert_eq!(a.len(), 13);
        let b_whole = short_section(0x73, &[0xAA; 200], true);

        let mut payload = vec![0u8];
        payload.extend_from_slice(&a);
        payload.extend_from_slice(&b_whole[..184 - payload.len()]);
        let sent = payload.len() - 1 - a.len();

        let mut b = SectionBuilder::new(0x0014, 0x73);
        b.push_payload(&payload, true);
        assert_eq!(b.sections().len(), 1);
        assert_eq!(b.sections()[0].bytes(), &a[..]);
        assert!(b.is_accumulating());

        let mut rest = b_whole[sent..].to_vec();
        rest.resize(184, 0xFF);
        b.push_payload(&rest, false);
        assert_eq!(b.sections().len(), 2);
        assert_eq!(b.sections()[1].bytes(), &b_whole[..]);
    }

    #[test]
    fn two_sections_in_one_payload() {
        let s0 = pat(3, 0, 1);
        let s1 = pat(3, 1, 1);
        let mut data = s0.clone();
        data.extend_from_slice(&s1);

        let mut b = SectionBuilder::new(0, 0);
        b.push_payload(&start_payload(&[], &data), true);
        assert!(b.tracker().is_complete(3, 1));
        assert_eq!(b.stats().delivered, 2);
    }

    #[test]
    fn retransmissions_are_suppressed() {
        let mut b = SectionBuilder::new(0, 0);
        let p = start_payload(&[], &pat(5, 0, 0));
        b.push_payload(&p, true);
        b.push_payload(&p, true);
        b.push_payload(&p, true);
        assert_eq!(b.stats().delivered, 1);
        assert_eq!(b.stats().duplicates, 2);
        assert_eq!(b.tracker().snapshot(5, 1).map(|s| s.len()), Some(1));
    }

    #[test]
    fn other_table_ids_and_orphan_fragments_are_ignored() {
        let mut b = SectionBuilder::new(0x11, 0x4A);
        b.push_payload(&[0x00; 184], false);
        b.push_payload(&start_payload(&[], &long_section(0x42, 1, 0, 0, 0, &[0; 8])), true);
        assert!(b.tracker().is_empty());
        assert!(!b.is_accumulating());
    }

    #[test]
    fn interrupted_section_is_finished_from_pointer_bytes() {
        let body: Vec<u8> = vec![0x5A; 250];
        let first_sec = long_section(0x42, 7, 1, 0, 1, &body);
        let next_sec = long_section(0x42, 7, 1, 1, 1, &[0x01, 0x02]);

        let mut p1 = vec![0u8];
        p1.extend_from_slice(&first_sec[..183]);
        // the tail of the first section arrives behind the pointer of a start packet
        let tail = &first_sec[183..];
        let p2 = start_payload(tail, &next_sec);

        let mut b = SectionBuilder::new(0x11, 0x42);
        b.push_payload(&p1, true);
        b.push_payload(&p2, true);
        assert!(b.tracker().is_complete(1, 7));
        assert_eq!(b.stats().anomalies, 0);
    }

    #[test]
    fn short_interrupted_section_is_dropped_as_anomaly() {
        let first_sec = long_section(0x42, 7, 1, 0, 0, &[0x5A; 250]);
        let next_sec = long_section(0x42, 8, 1, 0, 0, &[0x01, 0x02]);

        let mut p1 = vec![0u8];
        p1.extend_from_slice(&first_sec[..183]);
        let p2 = start_payload(&[], &next_sec);

        let mut b = SectionBuilder::new(0x11, 0x42);
        b.push_payload(&p1, true);
        b.push_payload(&p2, true);
        assert_eq!(b.stats().anomalies, 1);
        assert!(!b.tracker().is_complete(1, 7));
        assert!(b.tracker().is_complete(1, 8));
    }

    #[test]
    fn corrupt_section_does_not_stop_decoding() {
        let mut bad = pat(0, 0, 0);
        let n = bad.len();
        bad[n - 2] ^= 0xFF;

        let mut b = SectionBuilder::new(0, 0);
        b.push_payload(&start_payload(&[], &bad), true);
        assert_eq!(b.stats().crc_errors, 1);
        assert!(b.tracker().is_empty());

        b.push_payload(&start_payload(&[], &pat(0, 0, 0)), true);
        assert!(b.tracker().is_complete(0, 1));
    }

    #[test]
    fn closed_feed_halts_permanently() {
        let mut b = SectionBuilder::new(0, 0);
        assert_eq!(b.on_feed(FeedItem::Empty), Ok(()));
        assert_eq!(b.on_feed(FeedItem::Closed), Err(SiError::FeedClosed));
        assert!(b.is_halted());
        b.push_payload(&start_payload(&[], &pat(0, 0, 0)), true);
        assert!(b.tracker().is_empty());
    }

    #[test]
    fn section_behind_another_table_is_found() {
        let sdt = long_section(0x42, 1, 0, 0, 0, &[0; 8]);
        let bat = long_section(0x4A, 0x0101, 2, 0, 0, &[0xF0, 0x00, 0xF0, 0x00]);
        let mut data = sdt.clone();
        data.extend_from_slice(&bat);

        let mut b = SectionBuilder::new(0x11, 0x4A);
        b.push_payload(&start_payload(&[], &data), true);
        assert!(b.tracker().is_complete(2, 0x0101));
        assert_eq!(b.stats().delivered, 1);

        let mut b = SectionBuilder::new(0x11, 0x42);
        b.push_payload(&start_payload(&[], &data), true);
        assert!(b.tracker().is_complete(0, 1));
        assert_eq!(b.stats().delivered, 1);
    }

    #[test]
    fn listener_skips_duplicates_with_split_header() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut b = SectionBuilder::new(0, 0).with_listener(tx);
        let whole = pat(2, 0, 0);
        b.push_payload(&start_payload(&[], &whole), true);

        // same section again, starting three bytes before the payload ends
        let mut p1 = vec![180u8];
        p1.extend_from_slice(&[0xAA; 180]);
        p1.extend_from_slice(&whole[..3]);
        let mut p2 = whole[3..].to_vec();
        p2.resize(184, 0xFF);
        b.push_payload(&p1, true);
        assert!(b.is_accumulating());
        b.push_payload(&p2, false);

        assert_eq!(b.stats().delivered, 1);
        assert_eq!(b.stats().duplicates, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn listener_sees_delivered_sections() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut b = SectionBuilder::new(0, 0).with_listener(tx);
        b.push_payload(&start_payload(&[], &pat(2, 0, 0)), true);
        let sec = rx.recv().await.unwrap();
        assert_eq!(sec.version(), 2);
    }
}
