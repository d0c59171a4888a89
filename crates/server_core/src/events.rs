//! Time-ordered queue of deferred callbacks (decay, condition ticks, respawns).
//!
//! Entries live in a min-heap keyed on `(fire time, sequence)`, so equal fire
//! times pop in insertion order. Cancelling removes the entry's payload and
//! leaves its heap key behind as a tombstone that is skipped when popped. The
//! heap is compacted once tombstones clearly outnumber live entries.
//!
//! The queue is generic over the context its callbacks mutate. When the queue
//! lives inside that context (the world owns its own queue), pop entries with
//! [`EventQueue::pop_due`] and fire them yourself; otherwise
//! [`EventQueue::drain_due`] does both.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use anyhow::{Context, Result};

use crate::ids::EntityId;

/// Below this many heap entries tombstones are never compacted.
const COMPACT_FLOOR: usize = 64;

pub type Callback<C> = Box<dyn FnOnce(&mut C) -> Result<()> + Send>;

/// Opaque handle returned by `schedule`; used only to cancel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

/// What an event is about, for logs and fault reports.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EventContext {
    pub entity: Option<EntityId>,
    pub label: &'static str,
}

impl EventContext {
    #[must_use]
    pub const fn new(label: &'static str) -> Self {
        Self {
            entity: None,
            label,
        }
    }

    #[must_use]
    pub const fn for_entity(entity: EntityId, label: &'static str) -> Self {
        Self {
            entity: Some(entity),
            label,
        }
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            Some(e) => write!(f, "{}[{e}]", self.label),
            None => f.write_str(self.label),
        }
    }
}

struct Pending<C> {
    at_ms: u64,
    ctx: EventContext,
    callback: Callback<C>,
}

/// An entry popped from the queue, ready to fire.
pub struct DueEvent<C> {
    pub handle: EventHandle,
    pub at_ms: u64,
    pub ctx: EventContext,
    callback: Callback<C>,
}

impl<C> DueEvent<C> {
    pub fn fire(self, target: &mut C) -> Result<()> {
        let ctx = self.ctx;
        (self.callback)(target).with_context(|| format!("event {ctx}"))
    }

    /// Fire under fault isolation; `false` if the callback failed.
    pub fn fire_isolated(self, target: &mut C) -> bool {
        crate::fault::isolate("event", || self.fire(target)).is_some()
    }
}

impl<C> fmt::Debug for DueEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DueEvent")
            .field("handle", &self.handle)
            .field("at_ms", &self.at_ms)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks invoked (including failed ones).
    pub fired: usize,
    pub failed: usize,
    /// The per-drain cap was hit with due entries left over.
    pub capped: bool,
}

pub struct EventQueue<C> {
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    live: HashMap<u64, Pending<C>>,
    next_seq: u64,
    now_ms: u64,
}

impl<C> Default for EventQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("now_ms", &self.now_ms)
            .field("live", &self.live.len())
            .field("heap", &self.heap.len())
            .finish()
    }
}

impl<C> EventQueue<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_seq: 0,
            now_ms: 0,
        }
    }

    /// Current queue time; `schedule` delays are relative to it.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Advance queue time. Never moves backwards.
    pub fn set_now(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub fn schedule(
        &mut self,
        delay_ms: u64,
        ctx: EventContext,
        callback: impl FnOnce(&mut C) -> Result<()> + Send + 'static,
    ) -> EventHandle {
        self.schedule_at(self.now_ms.saturating_add(delay_ms), ctx, callback)
    }

    pub fn schedule_at(
        &mut self,
        at_ms: u64,
        ctx: EventContext,
        callback: impl FnOnce(&mut C) -> Result<()> + Send + 'static,
    ) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((at_ms, seq)));
        self.live.insert(
            seq,
            Pending {
                at_ms,
                ctx,
                callback: Box::new(callback),
            },
        );
        EventHandle(seq)
    }

    /// Cancel a pending entry. Returns `false` if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        if self.live.remove(&handle.0).is_none() {
            return false;
        }
        metrics::counter!("events.cancelled_total").increment(1);
        self.maybe_compact();
        true
    }

    #[must_use]
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.live.contains_key(&handle.0)
    }

    /// Live (not cancelled, not fired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Heap entries including tombstones.
    #[must_use]
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Fire time of the earliest live entry.
    pub fn next_due(&mut self) -> Option<u64> {
        while let Some(&Reverse((at, seq))) = self.heap.peek() {
            if self.live.contains_key(&seq) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop the earliest live entry due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<DueEvent<C>> {
        while let Some(&Reverse((at, seq))) = self.heap.peek() {
            if at > now_ms {
                return None;
            }
            self.heap.pop();
            if let Some(p) = self.live.remove(&seq) {
                return Some(DueEvent {
                    handle: EventHandle(seq),
                    at_ms: p.at_ms,
                    ctx: p.ctx,
                    callback: p.callback,
                });
            }
        }
        None
    }

    /// Fire every entry due at or before `now_ms` against `target`, at most
    /// `cap` of them. Leftovers stay queued for the next drain.
    pub fn drain_due(&mut self, target: &mut C, now_ms: u64, cap: usize) -> DrainReport {
        self.set_now(now_ms);
        let mut report = DrainReport::default();
        while report.fired < cap {
            let Some(ev) = self.pop_due(now_ms) else {
                return report;
            };
            report.fired += 1;
            if !ev.fire_isolated(target) {
                report.failed += 1;
            }
        }
        if self.next_due().is_some_and(|at| at <= now_ms) {
            report.capped = true;
            log::warn!("events: drain cap {cap} hit at {now_ms} ms; remainder deferred");
            metrics::counter!("events.drain_capped_total").increment(1);
        }
        report
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() > COMPACT_FLOOR && self.heap.len() > 2 * self.live.len() {
            let live = &self.live;
            self.heap.retain(|Reverse((_, seq))| live.contains_key(seq));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Vec<&'static str>;

    fn push(tag: &'static str) -> impl FnOnce(&mut Log) -> Result<()> + Send + 'static {
        move |log: &mut Log| {
            log.push(tag);
            Ok(())
        }
    }

    #[test]
    fn fires_in_time_then_insertion_order() {
        let mut q = EventQueue::<Log>::new();
        q.schedule(20, EventContext::new("c"), push("c"));
        q.schedule(10, EventContext::new("a"), push("a"));
        q.schedule(10, EventContext::new("b"), push("b"));
        let mut log = Log::new();
        let r = q.drain_due(&mut log, 15, usize::MAX);
        assert_eq!(r.fired, 2);
        assert_eq!(log, vec!["a", "b"]);
        q.drain_due(&mut log, 20, usize::MAX);
        assert_eq!(log, vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn cancel_is_idempotent_and_skips_tombstone() {
        let mut q = EventQueue::<Log>::new();
        let h = q.schedule(5, EventContext::new("x"), push("x"));
        assert!(q.is_pending(h));
        assert!(q.cancel(h));
        assert!(!q.cancel(h));
        assert_eq!(q.heap_len(), 1);
        let mut log = Log::new();
        assert_eq!(q.drain_due(&mut log, 100, usize::MAX).fired, 0);
        assert!(log.is_empty());
        assert_eq!(q.heap_len(), 0);
    }

    #[test]
    fn cancelling_a_fired_handle_is_a_noop() {
        let mut q = EventQueue::<Log>::new();
        let h = q.schedule(0, EventContext::new("x"), push("x"));
        let mut log = Log::new();
        q.drain_due(&mut log, 0, usize::MAX);
        assert!(!q.cancel(h));
        assert_eq!(log, vec!["x"]);
    }

    #[test]
    fn decay_fires_exactly_once() {
        let mut q = EventQueue::<Log>::new();
        let t = 1_000;
        q.set_now(t);
        let h = q.schedule(300_000, EventContext::new("decay"), push("decay"));
        let mut log = Log::new();
        q.drain_due(&mut log, t + 299_999, usize::MAX);
        assert!(log.is_empty());
        q.drain_due(&mut log, t + 300_000, usize::MAX);
        assert_eq!(log, vec!["decay"]);
        q.drain_due(&mut log, t + 300_001, usize::MAX);
        assert_eq!(log, vec!["decay"]);
        assert!(!q.is_pending(h));
    }

    #[test]
    fn heavy_cancellation_compacts_heap() {
        let mut q = EventQueue::<Log>::new();
        let handles: Vec<_> = (0..200)
            .map(|i| q.schedule(i, EventContext::new("n"), push("n")))
            .collect();
        for h in &handles[..190] {
            q.cancel(*h);
        }
        assert_eq!(q.len(), 10);
        assert!(q.heap_len() <= 2 * q.len().max(COMPACT_FLOOR));
        let mut log = Log::new();
        assert_eq!(q.drain_due(&mut log, 1_000, usize::MAX).fired, 10);
    }

    #[test]
    fn cap_defers_remainder() {
        let mut q = EventQueue::<Log>::new();
        for _ in 0..5 {
            q.schedule(0, EventContext::new("n"), push("n"));
        }
        let mut log = Log::new();
        let r = q.drain_due(&mut log, 0, 3);
        assert_eq!(r.fired, 3);
        assert!(r.capped);
        let r = q.drain_due(&mut log, 0, 3);
        assert_eq!(r.fired, 2);
        assert!(!r.capped);
    }

    #[test]
    fn failing_callback_does_not_stop_drain() {
        let mut q = EventQueue::<Log>::new();
        q.schedule(0, EventContext::new("bad"), |_: &mut Log| anyhow::bail!("bad"));
        q.schedule(0, EventContext::new("boom"), |_: &mut Log| panic!("boom"));
        q.schedule(0, EventContext::new("ok"), push("ok"));
        let mut log = Log::new();
        let r = q.drain_due(&mut log, 0, usize::MAX);
        assert_eq!(r.fired, 3);
        assert_eq!(r.failed, 2);
        assert_eq!(log, vec!["ok"]);
    }

    #[test]
    fn time_never_moves_backwards() {
        let mut q = EventQueue::<Log>::new();
        q.set_now(50);
        q.set_now(10);
        assert_eq!(q.now_ms(), 50);
    }
}
