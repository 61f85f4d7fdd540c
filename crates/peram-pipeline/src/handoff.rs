//! Barrier handoff between the producer and the consumer threads.
//!
//! One pipeline step for `(t, e)`:
//!
//! ```text
//! producer:  create+solve ─▶ A ─▶ swap, send ─▶ B ─▶ create+solve (next) ─▶ A ...
//! consumer:  (idle/accum) ─▶ A ───────────────▶ B ─▶ recv, accumulate   ─▶ A ...
//! ```
//!
//! Barrier A guarantees the producer has finished writing `front` and every
//! consumer has dropped its handle to `back`. Barrier B guarantees the swapped
//! handle has been sent before any consumer looks for it. After the last pair
//! one more Barrier A (the drain) waits for the final accumulation.
//!
//! Consumers split the `d` indices of a pair between them but take turns on
//! the accumulator: the call for `(t, e, d)` is issued only after the call for
//! its predecessor in dilution order has returned. The accumulator therefore
//! sees the same call sequence whatever the pool size.
//!
//! Errors and panics never make a thread leave the protocol early: the failing
//! thread raises the abort flag, which also releases every consumer waiting for
//! its turn, and every thread keeps meeting the barriers while skipping its
//! work, so nobody is left waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::{Condvar, Mutex};

use peram_types::{DilutionCoord, DilutionPair, DilutionSpace};

use crate::buffers::BufferSet;

// ── Handoff ──────────────────────────────────────────────────────────────────

/// The two per-step barriers, the accumulation turn and the shared abort flag.
#[derive(Debug)]
pub struct Handoff {
    ready: Barrier,
    published: Barrier,
    aborted: AtomicBool,
    /// Flat index of the next coordinate allowed to accumulate.
    next_turn: Mutex<usize>,
    turn_taken: Condvar,
}

impl Handoff {
    /// Handoff for a pool of `threads` workers (producer included).
    pub fn new(threads: usize) -> Self {
        Self {
            ready: Barrier::new(threads),
            published: Barrier::new(threads),
            aborted: AtomicBool::new(false),
            next_turn: Mutex::new(0),
            turn_taken: Condvar::new(),
        }
    }

    /// Barrier A: writes to `front` and reads of `back` are complete.
    pub fn wait_ready(&self) {
        self.ready.wait();
    }

    /// Barrier B: the swapped generation has been handed out.
    pub fn wait_published(&self) {
        self.published.wait();
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        // Taking the lock orders the store before any waiter's re-check.
        drop(self.next_turn.lock());
        self.turn_taken.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Block until `turn` is next in dilution order.
    ///
    /// Returns `false` if the pass was aborted first; the caller must then
    /// skip its call and not end the turn.
    pub fn begin_turn(&self, turn: usize) -> bool {
        let mut next = self.next_turn.lock();
        while *next != turn {
            if self.is_aborted() {
                return false;
            }
            self.turn_taken.wait(&mut next);
        }
        true
    }

    /// Hand the accumulator to the coordinate after `turn`.
    pub fn end_turn(&self, turn: usize) {
        *self.next_turn.lock() = turn + 1;
        self.turn_taken.notify_all();
    }
}

// ── Generation Handle ────────────────────────────────────────────────────────

/// A completed generation on its way to one consumer.
#[derive(Debug)]
pub struct GenerationHandle {
    pub pair: DilutionPair,
    pub generation: Arc<BufferSet>,
}

// ── Consumer Slot ────────────────────────────────────────────────────────────

/// Position of a consumer among `of` consumers.
///
/// Consumer `index` accumulates the full-dilution indices `d ≡ index (mod of)`,
/// so the consumers of one step cover every `d` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSlot {
    pub index: usize,
    pub of: usize,
}

impl ConsumerSlot {
    /// The sole consumer of a single-threaded pool.
    pub fn sole() -> Self {
        Self { index: 0, of: 1 }
    }

    /// Coordinates of `pair` this consumer accumulates, `d` ascending.
    pub fn coords(
        self,
        pair: DilutionPair,
        space: &DilutionSpace,
    ) -> impl Iterator<Item = DilutionCoord> {
        (self.index..space.dirac)
            .step_by(self.of.max(1))
            .map(move |d| pair.at(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_follow_dilution_order_across_threads() {
        let handoff = Handoff::new(1);
        let order = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for first in [3, 1, 2, 0] {
                let handoff = &handoff;
                let order = &order;
                scope.spawn(move || {
                    for turn in (first..8).step_by(4) {
                        assert!(handoff.begin_turn(turn));
                        order.lock().push(turn);
                        handoff.end_turn(turn);
                    }
                });
            }
        });

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn abort_releases_a_waiting_turn() {
        let handoff = Handoff::new(1);
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| handoff.begin_turn(5));
            handoff.abort();
            assert!(!waiter.join().unwrap());
        });
        assert!(handoff.begin_turn(0));
    }

    #[test]
    fn slots_partition_dirac_indices() {
        let space = DilutionSpace::new(1, 1, 7).unwrap();
        let pair = DilutionPair::new(0, 0);
        let mut seen: Vec<usize> = (0..3)
            .flat_map(|index| ConsumerSlot { index, of: 3 }.coords(pair, &space))
            .map(|c| c.d)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn sole_slot_covers_everything_in_order() {
        let space = DilutionSpace::new(1, 1, 4).unwrap();
        let ds: Vec<usize> = ConsumerSlot::sole()
            .coords(DilutionPair::new(0, 0), &space)
            .map(|c| c.d)
            .collect();
        assert_eq!(ds, vec![0, 1, 2, 3]);
    }

    #[test]
    fn more_consumers_than_indices() {
        let space = DilutionSpace::new(1, 1, 2).unwrap();
        let pair = DilutionPair::new(0, 0);
        assert_eq!(ConsumerSlot { index: 3, of: 4 }.coords(pair, &space).count(), 0);
        assert_eq!(ConsumerSlot { index: 1, of: 4 }.coords(pair, &space).count(), 1);
    }

    #[test]
    fn abort_flag() {
        let handoff = Handoff::new(1);
        assert!(!handoff.is_aborted());
        handoff.wait_ready();
        handoff.wait_published();
        handoff.abort();
        assert!(handoff.is_aborted());
    }
}
