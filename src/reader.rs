//! File-driven SI reader: splits a transport stream into per-PID payload
//! feeds, runs one section builder per (PID, table id) and gathers the
//! results into a report.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::constants::{
    table_id, CAT_PID, DEFAULT_QUEUE_DEPTH, NIT_PID, NULL_PID, PAT_PID, SDT_BAT_PID, TDT_TOT_PID,
    TS_PACKET_SIZE,
};
use crate::descriptors::DescriptorRegistry;
use crate::feed::{run_worker, ChannelFeed, Fragment};
use crate::packet::{self, AdaptationField, TsHeader};
use crate::psi::{parse_pat, Section, SectionBuilder};
use crate::report::{PacketCounters, Reporter, SiReport};

/// SI tables followed on every stream, besides the PAT.
const SI_TABLES: [(u16, u8); 8] = [
    (CAT_PID, table_id::CAT),
    (NIT_PID, table_id::NIT_ACTUAL),
    (NIT_PID, table_id::NIT_OTHER),
    (SDT_BAT_PID, table_id::SDT_ACTUAL),
    (SDT_BAT_PID, table_id::SDT_OTHER),
    (SDT_BAT_PID, table_id::BAT),
    (TDT_TOT_PID, table_id::TDT),
    (TDT_TOT_PID, table_id::TOT),
];

pub struct Options {
    pub input:       PathBuf,
    /// PMT PIDs followed from the start.
    pub pmt_pids:    Vec<u16>,
    /// Subscribe the PMT PIDs announced in the PAT as they show up.
    pub follow_pat:  bool,
    pub queue_depth: usize,
}

impl Options {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input:       input.into(),
            pmt_pids:    Vec::new(),
            follow_pat:  true,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Fans packet payloads out to the workers subscribed to their PID.
struct Router {
    queue_depth: usize,
    stop:        watch::Receiver<bool>,
    routes:      HashMap<u16, Vec<mpsc::Sender<Fragment>>>,
    subscribed:  HashSet<(u16, u8)>,
    workers:     Vec<JoinHandle<SectionBuilder>>,
}

impl Router {
    fn new(queue_depth: usize, stop: watch::Receiver<bool>) -> Self {
        Self {
            queue_depth,
            stop,
            routes: HashMap::new(),
            subscribed: HashSet::new(),
            workers: Vec::new(),
        }
    }

    /// Spawns a worker for the builder's (PID, table id) unless one runs
    /// already.
    fn subscribe(&mut self, builder: SectionBuilder) -> bool {
        let (pid, tid) = (builder.pid(), builder.table_id());
        if !self.subscribed.insert((pid, tid)) {
            return false;
        }
        let (tx, feed) = ChannelFeed::bounded(self.queue_depth);
        self.routes.entry(pid).or_default().push(tx);
        self.workers
            .push(tokio::spawn(run_worker(builder, feed, self.stop.clone())));
        debug!("following table 0x{tid:02X} on PID 0x{pid:04X}");
        true
    }

    fn wants(&self, pid: u16) -> bool {
        self.routes.contains_key(&pid)
    }

    async fn dispatch(&self, frag: Fragment) {
        let Some(senders) = self.routes.get(&frag.pid) else {
            return;
        };
        for tx in senders {
            // a halted worker has dropped its end
            let _ = tx.send(frag.clone()).await;
        }
    }

    /// Closes every feed and waits for the workers to hand back their
    /// builders.
    async fn finish(self) -> anyhow::Result<Vec<SectionBuilder>> {
        let Router { routes, workers, .. } = self;
        drop(routes);
        let mut builders = Vec::with_capacity(workers.len());
        for handle in workers {
            builders.push(handle.await.context("section worker panicked")?);
        }
        Ok(builders)
    }
}

/// Reads `opts.input` to the end (or until `stop` turns true) and returns
/// the report of every table collected.
pub async fn run(opts: Options, stop: watch::Receiver<bool>) -> anyhow::Result<SiReport> {
    let registry = DescriptorRegistry::standard();
    let file = File::open(&opts.input)
        .await
        .with_context(|| format!("cannot open {}", opts.input.display()))?;
    let mut input = BufReader::new(file);

    let mut router = Router::new(opts.queue_depth, stop.clone());
    // the PAT is built in line so its PMT PIDs are subscribed before the
    // next packet is read
    let mut pat_rx = None;
    let mut pat_builder = SectionBuilder::new(PAT_PID, table_id::PAT);
    if opts.follow_pat {
        let (tx, rx) = mpsc::unbounded_channel();
        pat_builder = pat_builder.with_listener(tx);
        pat_rx = Some(rx);
    }
    for (pid, tid) in SI_TABLES {
        router.subscribe(SectionBuilder::new(pid, tid));
    }
    for &pid in &opts.pmt_pids {
        router.subscribe(SectionBuilder::new(pid, table_id::PMT));
    }
    info!("reading {}", opts.input.display());

    let mut counters = PacketCounters::default();
    let mut buf = [0u8; TS_PACKET_SIZE];
    loop {
        if *stop.borrow() {
            info!("stop requested after {} packets", counters.packets);
            break;
        }
        match input.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("reading transport stream"),
        }
        counters.packets += 1;

        let header = match TsHeader::parse(&buf) {
            Ok(h) => h,
            Err(e) => {
                trace!("packet {}: {e}", counters.packets);
                counters.malformed += 1;
                continue;
            }
        };
        if header.transport_error {
            counters.transport_errors += 1;
            continue;
        }
        if header.pid == NULL_PID {
            counters.null_packets += 1;
            continue;
        }
        match AdaptationField::parse(&header, &buf) {
            Ok(Some(af)) => counters.record_adaptation(&af),
            Ok(None) => {}
            Err(e) => {
                trace!("packet {}: {e}", counters.packets);
                counters.malformed += 1;
                continue;
            }
        }

        let Some(payload) = packet::payload(&header, &buf) else {
            continue;
        };
        if header.pid == PAT_PID {
            pat_builder.push_payload(payload, header.payload_unit_start);
            if let Some(rx) = pat_rx.as_mut() {
                follow_pat(&mut router, rx);
            }
        }
        if router.wants(header.pid) {
            router
                .dispatch(Fragment {
                    pid:     header.pid,
                    payload: Bytes::copy_from_slice(payload),
                    start:   header.payload_unit_start,
                })
                .await;
        }
    }

    let mut builders = router.finish().await?;
    pat_builder.halt();
    builders.push(pat_builder);
    info!("{} packets read, {} workers done", counters.packets, builders.len());
    Ok(Reporter::create_report(&opts.input, counters, builders, &registry))
}

/// Subscribes PMT (and non-default NIT) PIDs from the PAT sections just
/// delivered.
fn follow_pat(router: &mut Router, rx: &mut UnboundedReceiver<Section>) {
    while let Ok(sec) = rx.try_recv() {
        let pat = match parse_pat(&sec) {
            Ok(pat) => pat,
            Err(e) => {
                warn!("PAT: {e:#}");
                continue;
            }
        };
        for pid in pat.pmt_pids() {
            router.subscribe(SectionBuilder::new(pid, table_id::PMT));
        }
        if let Some(pid) = pat.network_pid.filter(|&pid| pid != NIT_PID) {
            router.subscribe(SectionBuilder::new(pid, table_id::NIT_ACTUAL));
        }
    }
}
