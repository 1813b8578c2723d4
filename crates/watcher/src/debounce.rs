//! Emission queue with coalescing
//!
//! Reconciliation runs ahead of delivery: emissions are queued here and a
//! flush cycle hands them to subscribers in order. While they wait, redundant
//! pairs for the same path are collapsed:
//! - create after a queued delete  -> both cancelled, one update queued
//! - update after a queued create/update -> stats refreshed in place
//! - delete after a queued create  -> both cancelled
//! - delete after a queued update  -> update cancelled, delete queued
//!
//! Nothing is coalesced or flushed while the initial crawl is running; that
//! population is delivered entry by entry once the gate opens.

use crate::event::Event;
use ahash::AHashMap;
use std::time::{Duration, Instant};

/// Flush cycles yield after spending this long dispatching
pub const FLUSH_BUDGET: Duration = Duration::from_millis(100);

/// A queued emission
#[derive(Debug, Clone)]
pub struct PendingEmission {
    pub event: Event,
    pub queued_at: Instant,
}

#[derive(Debug)]
struct Slot {
    emission: PendingEmission,
    cancelled: bool,
}

/// FIFO of pending emissions with stable slot indices
#[derive(Debug)]
pub struct EventDebouncer {
    /// True until the initial crawl (and snapshot replay) has settled
    crawling: bool,

    /// True while a flush cycle is running
    draining: bool,

    slots: Vec<Slot>,

    /// Next slot to hand out
    head: usize,

    /// Latest undelivered file emission per path
    latest: AHashMap<String, usize>,
}

impl Default for EventDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDebouncer {
    pub fn new() -> Self {
        Self {
            crawling: true,
            draining: false,
            slots: Vec::new(),
            head: 0,
            latest: AHashMap::new(),
        }
    }

    /// Queue an emission, coalescing once the crawl gate is open
    ///
    /// Returns true if a flush cycle should be started.
    pub fn push(&mut self, event: Event) -> bool {
        if self.crawling {
            self.enqueue(event);
            return false;
        }

        let previous = event.path().and_then(|p| self.pending_index(p));
        match (event, previous) {
            (Event::Create { path, stats }, Some(idx)) if self.is_kind(idx, KindTag::Delete) => {
                self.slots[idx].cancelled = true;
                self.latest.remove(&path);
                self.enqueue(Event::Update { path, stats });
            }
            (Event::Update { stats, .. }, Some(idx))
                if self.is_kind(idx, KindTag::Create) || self.is_kind(idx, KindTag::Update) =>
            {
                match &mut self.slots[idx].emission.event {
                    Event::Create { stats: queued, .. } | Event::Update { stats: queued, .. } => {
                        *queued = stats;
                    }
                    _ => {}
                }
            }
            (Event::Delete { path }, Some(idx)) if self.is_kind(idx, KindTag::Create) => {
                self.slots[idx].cancelled = true;
                self.latest.remove(&path);
            }
            (event @ Event::Delete { .. }, Some(idx)) if self.is_kind(idx, KindTag::Update) => {
                self.slots[idx].cancelled = true;
                self.enqueue(event);
            }
            (event, _) => self.enqueue(event),
        }

        self.start_cycle()
    }

    /// Queue several emissions under one call
    pub fn push_all(&mut self, events: impl IntoIterator<Item = Event>) -> bool {
        let mut start = false;
        for event in events {
            start |= self.push(event);
        }
        start
    }

    /// Open the crawl gate; returns true if a flush cycle should be started
    pub fn finish_crawl(&mut self) -> bool {
        self.crawling = false;
        self.start_cycle()
    }

    /// Next emission of the current cycle
    ///
    /// Returns `None` when the cycle reaches the end of the queue, which
    /// clears the queue and marks the debouncer idle.
    pub fn next(&mut self) -> Option<PendingEmission> {
        if self.crawling {
            return None;
        }

        while self.head < self.slots.len() {
            let idx = self.head;
            self.head += 1;

            let slot = &self.slots[idx];
            if slot.cancelled {
                continue;
            }
            if let Some(path) = slot.emission.event.path() {
                if self.latest.get(path) == Some(&idx) {
                    self.latest.remove(path);
                }
            }
            return Some(self.slots[idx].emission.clone());
        }

        self.slots.clear();
        self.latest.clear();
        self.head = 0;
        self.draining = false;
        None
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.slots.clear();
        self.latest.clear();
        self.head = 0;
        self.draining = false;
    }

    pub fn is_crawling(&self) -> bool {
        self.crawling
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Number of queued, non-cancelled emissions
    pub fn pending(&self) -> usize {
        self.slots[self.head..]
            .iter()
            .filter(|slot| !slot.cancelled)
            .count()
    }

    fn enqueue(&mut self, event: Event) {
        let idx = self.slots.len();
        if event.kind().is_some() {
            if let Some(path) = event.path() {
                self.latest.insert(path.to_string(), idx);
            }
        }
        self.slots.push(Slot {
            emission: PendingEmission {
                event,
                queued_at: Instant::now(),
            },
            cancelled: false,
        });
    }

    fn pending_index(&self, path: &str) -> Option<usize> {
        self.latest
            .get(path)
            .copied()
            .filter(|&idx| idx >= self.head && !self.slots[idx].cancelled)
    }

    fn is_kind(&self, idx: usize, tag: KindTag) -> bool {
        matches!(
            (&self.slots[idx].emission.event, tag),
            (Event::Create { .. }, KindTag::Create)
                | (Event::Update { .. }, KindTag::Update)
                | (Event::Delete { .. }, KindTag::Delete)
        )
    }

    fn start_cycle(&mut self) -> bool {
        if self.crawling || self.draining || self.head >= self.slots.len() {
            return false;
        }
        self.draining = true;
        true
    }
}

#[derive(Debug, Clone, Copy)]
enum KindTag {
    Create,
    Update,
    Delete,
}
