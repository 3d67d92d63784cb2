//! Per-PID payload feeds and the worker loop draining them.

use bytes::Bytes;
use log::debug;
use tokio::sync::{mpsc, watch};

use crate::psi::builder::SectionBuilder;

/// One packet payload of a PID. When `start` is set the payload begins with
/// the pointer field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub pid:     u16,
    pub payload: Bytes,
    pub start:   bool,
}

/// What a feed hands out on each pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Fragment(Fragment),
    /// Nothing queued right now, producer still running.
    Empty,
    /// Nothing queued and nothing will ever be.
    Closed,
}

pub trait PayloadFeed {
    fn next(&mut self) -> FeedItem;
}

/// Feed backed by a bounded queue filled by the demultiplexer.
pub struct ChannelFeed {
    rx: mpsc::Receiver<Fragment>,
}

impl ChannelFeed {
    pub fn new(rx: mpsc::Receiver<Fragment>) -> Self {
        Self { rx }
    }

    /// Bounded sender/feed pair.
    pub fn bounded(depth: usize) -> (mpsc::Sender<Fragment>, Self) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (tx, Self::new(rx))
    }

    /// Waits for the next fragment; yields `Closed` once the producer has
    /// dropped its sender and the queue is drained.
    pub async fn recv(&mut self) -> FeedItem {
        match self.rx.recv().await {
            Some(frag) => FeedItem::Fragment(frag),
            None => FeedItem::Closed,
        }
    }
}

impl PayloadFeed for ChannelFeed {
    fn next(&mut self) -> FeedItem {
        match self.rx.try_recv() {
            Ok(frag) => FeedItem::Fragment(frag),
            Err(mpsc::error::TryRecvError::Empty) => FeedItem::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => FeedItem::Closed,
        }
    }
}

/// Drains `feed` into `builder` until the feed closes or `stop` flips to
/// true. The stop signal is only looked at between fragments.
pub async fn run_worker(
    mut builder: SectionBuilder,
    mut feed: ChannelFeed,
    mut stop: watch::Receiver<bool>,
) -> SectionBuilder {
    loop {
        if *stop.borrow() {
            builder.halt();
            break;
        }
        let item = tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    // stop handle dropped: keep draining until the feed closes
                    feed.recv().await
                } else {
                    continue;
                }
            }
            item = feed.recv() => item,
        };
        if builder.on_feed(item).is_err() {
            break;
        }
    }
    debug!(
        "worker PID 0x{:04X} table 0x{:02X} done: {:?}",
        builder.pid(),
        builder.table_id(),
        builder.stats()
    );
    builder
}
