use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use crate::config::WindowConfig;
use crate::protocol::packet::DataPacket;
use crate::protocol::seq_no::SeqNo;

/// Called with the highest delivered sequence number whenever a loss-free batch was
///  delivered - this is the trigger for acknowledging.
pub type NoLossAction = Arc<dyn Fn(SeqNo) + Send + Sync>;

/// a contiguous span of missing sequence numbers, both ends inclusive
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LossRange {
    pub start: SeqNo,
    pub end: SeqNo,
}

/// the receiving ends of a window's output
pub struct WindowStreams {
    /// in-order, gap-free runs of data packets
    pub batches: mpsc::Receiver<Vec<DataPacket>>,
    /// outstanding loss ranges, reported periodically while gaps exist
    pub losses: mpsc::Receiver<Vec<LossRange>>,
}

enum Slot {
    Present(DataPacket),
    Missing { since: Instant },
}

struct WindowInner {
    capacity: usize,

    /// sequence number of `slots[0]`
    base: SeqNo,
    /// The next expected sequence number while the window is empty: the first packet after
    ///  a delivered batch is positioned relative to it so that gaps spanning batches are
    ///  detected. `None` until the first packet or an explicit anchor.
    anchor: Option<SeqNo>,

    /// One slot per sequence number from `base` up to the highest received packet. Every
    ///  slot is either present or missing, and `missing` holds exactly the positions of
    ///  the missing slots.
    slots: Vec<Slot>,
    missing: BTreeSet<usize>,

    opened_at: Option<Instant>,
    num_appended: u64,

    batch_sender: mpsc::Sender<Vec<DataPacket>>,
    loss_sender: mpsc::Sender<Vec<LossRange>>,
}

impl WindowInner {
    fn append(&mut self, packet: DataPacket, now: Instant) -> bool {
        if self.slots.is_empty() {
            self.base = match self.anchor {
                None => packet.seq,
                Some(anchor) => {
                    let offset = packet.seq.offset_from(anchor);
                    if offset < 0 {
                        debug!("packet #{} precedes next expected #{} - ignoring", packet.seq, anchor);
                        return true;
                    }
                    if offset as usize >= self.capacity {
                        debug!("packet #{} is beyond the window starting at #{} - re-anchoring", packet.seq, anchor);
                        packet.seq
                    }
                    else {
                        anchor
                    }
                }
            };
            self.opened_at = Some(now);
        }

        let pos = packet.seq.offset_from(self.base);
        if pos < 0 {
            debug!("packet #{} was already delivered or given up on - ignoring", packet.seq);
            return true;
        }
        let pos = pos as usize;

        if pos < self.slots.len() {
            match self.slots[pos] {
                Slot::Missing { .. } => {
                    trace!("packet #{} fills a gap", packet.seq);
                    self.slots[pos] = Slot::Present(packet);
                    self.missing.remove(&pos);
                    self.num_appended += 1;
                }
                Slot::Present(_) => {
                    trace!("duplicate packet #{} - ignoring", packet.seq);
                }
            }
            return true;
        }

        if pos >= self.capacity {
            debug!("packet #{} does not fit into the window (base #{}, capacity {})", packet.seq, self.base, self.capacity);
            return false;
        }

        if pos > self.slots.len() {
            debug!("packets #{} to #{} are missing", self.base.add(self.slots.len() as u32), packet.seq.prev());
        }
        for gap in self.slots.len()..pos {
            self.slots.push(Slot::Missing { since: now });
            self.missing.insert(gap);
        }
        self.slots.push(Slot::Present(packet));
        self.num_appended += 1;
        true
    }

    fn is_full(&self) -> bool {
        self.slots.len() == self.capacity && self.missing.is_empty()
    }

    fn loss(&self) -> Vec<LossRange> {
        let mut result = Vec::new();

        let mut positions = self.missing.iter().copied();
        let Some(first) = positions.next() else {
            return result;
        };

        let (mut start, mut end) = (first, first);
        for pos in positions {
            if pos == end + 1 {
                end = pos;
            }
            else {
                result.push(self.loss_range(start, end));
                start = pos;
                end = pos;
            }
        }
        result.push(self.loss_range(start, end));
        result
    }

    fn loss_range(&self, start: usize, end: usize) -> LossRange {
        LossRange {
            start: self.base.add(start as u32),
            end: self.base.add(end as u32),
        }
    }

    fn report_loss(&self) {
        let loss = self.loss();
        if loss.is_empty() {
            return;
        }
        trace!("reporting loss {:?}", loss);
        if let Err(TrySendError::Full(_)) = self.loss_sender.try_send(loss) {
            debug!("loss channel is full - skipping loss report");
        }
    }

    /// Gives up on gaps older than `loss_timeout` and delivers the buffered packets if no gap
    ///  remains. Returns the highest delivered sequence number if a batch was delivered.
    fn evaluate(&mut self, now: Instant, loss_timeout: std::time::Duration) -> Option<SeqNo> {
        let newest_expired = self.missing.iter()
            .copied()
            .filter(|&pos| match self.slots[pos] {
                Slot::Missing { since } => now.saturating_duration_since(since) >= loss_timeout,
                Slot::Present(_) => false,
            })
            .max();

        if let Some(pos) = newest_expired {
            let num_discarded = self.slots.drain(..=pos)
                .filter(|slot| matches!(slot, Slot::Present(_)))
                .count();
            let last_given_up = self.base.add(pos as u32);
            warn!("giving up on #{} to #{} ({} sequence numbers) - discarding {} buffered packets",
                self.base, last_given_up, SeqNo::length(self.base, last_given_up), num_discarded);

            self.base = self.base.add(pos as u32 + 1);
            self.missing = self.slots.iter()
                .enumerate()
                .filter(|(_, slot)| matches!(slot, Slot::Missing { .. }))
                .map(|(i, _)| i)
                .collect();
            if self.slots.is_empty() {
                self.reset(self.base);
            }
        }

        if !self.missing.is_empty() || self.slots.is_empty() {
            return None;
        }

        // a batch is only taken out of the window once there is room for it downstream, so
        //  everything that is acknowledged was actually handed on
        let permit = match self.batch_sender.try_reserve() {
            Ok(permit) => Some(permit),
            Err(TrySendError::Full(())) => {
                debug!("batch channel is full - holding back {} packets", self.slots.len());
                return None;
            }
            Err(TrySendError::Closed(())) => None,
        };

        let batch = self.slots.drain(..)
            .filter_map(|slot| match slot {
                Slot::Present(packet) => Some(packet),
                Slot::Missing { .. } => None,
            })
            .collect::<Vec<_>>();
        let last = self.base.add(batch.len() as u32 - 1);

        let delivered = match { permit } {
            Some(permit) => {
                trace!("delivering batch of {} packets up to #{}", batch.len(), last);
                permit.send(batch);
                true
            }
            None => {
                debug!("no batch consumer - dropping {} packets", batch.len());
                false
            }
        };
        self.reset(last.next());
        delivered.then_some(last)
    }

    fn reset(&mut self, next_expected: SeqNo) {
        self.slots.clear();
        self.missing.clear();
        self.base = next_expected;
        self.anchor = Some(next_expected);
        self.opened_at = None;
    }
}

/// The receive window buffers a peer's data packets, tracking which sequence numbers are
///  missing, and emits them as in-order batches once there are no gaps.
///
/// Gaps do not block forever: a background monitor gives up on packets that are missing for
///  longer than the configured loss timeout, skipping them (and the packets buffered before
///  them). The same monitor delivers batches and reports loss ranges; there is at most one
///  monitor per window.
pub struct ReceiveWindow {
    config: Arc<WindowConfig>,
    inner: Arc<Mutex<WindowInner>>,
    events: Arc<Notify>,
    on_no_loss: NoLossAction,
    monitor_handle: Option<JoinHandle<()>>,
}

impl Drop for ReceiveWindow {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
        }
    }
}

impl ReceiveWindow {
    pub fn new(config: Arc<WindowConfig>, on_no_loss: NoLossAction) -> (ReceiveWindow, WindowStreams) {
        let (batch_sender, batches) = mpsc::channel(config.batch_channel_capacity);
        let (loss_sender, losses) = mpsc::channel(config.loss_channel_capacity);

        let inner = WindowInner {
            capacity: config.capacity,
            base: SeqNo::ZERO,
            anchor: None,
            slots: Vec::with_capacity(config.capacity),
            missing: BTreeSet::new(),
            opened_at: None,
            num_appended: 0,
            batch_sender,
            loss_sender,
        };

        let window = ReceiveWindow {
            config,
            inner: Arc::new(Mutex::new(inner)),
            events: Arc::new(Notify::new()),
            on_no_loss,
            monitor_handle: None,
        };
        (window, WindowStreams { batches, losses })
    }

    pub fn spawn_monitor(&mut self) {
        if self.monitor_handle.is_some() {
            warn!("loss monitor already spawned");
            return;
        }
        self.monitor_handle = Some(tokio::spawn(Self::run_monitor(
            self.config.clone(),
            self.inner.clone(),
            self.events.clone(),
            self.on_no_loss.clone(),
        )));
    }

    /// Adds a packet to the window. Returns `false` if the packet needs a new slot but the
    ///  window has no more room; filling a gap is always possible. Packets that were already
    ///  delivered (or skipped) and duplicates are accepted and ignored.
    pub async fn append(&self, packet: DataPacket) -> bool {
        let accepted = self.inner.lock().await
            .append(packet, Instant::now());
        if accepted {
            self.events.notify_one();
        }
        accepted
    }

    /// sets the next expected sequence number if the window is empty
    pub async fn anchor(&self, next_expected: SeqNo) {
        let mut inner = self.inner.lock().await;
        if inner.slots.is_empty() {
            debug!("anchoring receive window at #{}", next_expected);
            inner.reset(next_expected);
        }
    }

    /// outstanding loss as maximal contiguous ranges in ascending order
    pub async fn loss(&self) -> Vec<LossRange> {
        self.inner.lock().await.loss()
    }

    /// `true` if every slot is occupied by a received packet
    pub async fn is_full(&self) -> bool {
        self.inner.lock().await.is_full()
    }

    pub async fn used(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub async fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().await.opened_at
    }

    pub async fn num_appended(&self) -> u64 {
        self.inner.lock().await.num_appended
    }

    /// runs a single evaluation immediately rather than waiting for the monitor
    pub async fn flush(&self) {
        let delivered = self.inner.lock().await
            .evaluate(Instant::now(), self.config.loss_timeout);
        if let Some(last) = delivered {
            (self.on_no_loss)(last);
        }
    }

    async fn run_monitor(config: Arc<WindowConfig>, inner: Arc<Mutex<WindowInner>>, events: Arc<Notify>, on_no_loss: NoLossAction) {
        let mut flush_interval = interval(config.flush_interval);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut loss_report_interval = interval(config.loss_report_interval);
        loss_report_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = flush_interval.tick() => {}
                _ = events.notified() => {
                    // a full window can not accept more packets, so it is flushed right away
                    if !inner.lock().await.is_full() {
                        continue;
                    }
                    trace!("receive window is full - flushing early");
                }
                _ = loss_report_interval.tick() => {
                    inner.lock().await.report_loss();
                    continue;
                }
            }

            let delivered = inner.lock().await
                .evaluate(Instant::now(), config.loss_timeout);
            if let Some(last) = delivered {
                on_no_loss(last);
            }
        }
    }
}
