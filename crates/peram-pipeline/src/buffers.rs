//! Source and propagator buffer sets and their per-sample lifecycle.
//!
//! A [`WorkingSet`] holds the three sets one random-vector sample needs:
//! the sources and two propagator generations. Every set is `D` buffers of
//! `L` complex entries. Sets are freed when dropped, so a working set that
//! goes out of scope on an error path is still released.
//!
//! ```text
//!              producer writes          consumers read
//!                    │                        │
//!   sources ──solve──▶ front   ◀──swap──▶   back
//! ```

use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use peram_types::Complex64;
use tracing::debug;

use crate::error::{PipelineError, Result};

// ── Accounting ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PoolCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
    releases: AtomicUsize,
}

/// Snapshot of a pool's buffer-set accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffer sets currently alive.
    pub live_sets: usize,
    /// Highest number of buffer sets alive at the same time.
    pub peak_live_sets: usize,
    /// Calls to [`BufferPool::allocate`] that succeeded.
    pub allocations: usize,
    /// Calls to [`BufferPool::release`].
    pub releases: usize,
}

/// Decrements the live count when its buffer set is freed.
struct SetLease(Arc<PoolCounters>);

impl SetLease {
    fn register(counters: &Arc<PoolCounters>) -> Self {
        let live = counters.live.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak.fetch_max(live, Ordering::AcqRel);
        Self(Arc::clone(counters))
    }
}

impl Drop for SetLease {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

// ── Buffer Set ───────────────────────────────────────────────────────────────

/// `D` complex buffers of equal length, one per full-dilution index.
pub struct BufferSet {
    buffers: Vec<Box<[Complex64]>>,
    _lease: SetLease,
}

impl BufferSet {
    /// Allocate a zeroed set outside of any pool.
    pub fn zeroed(count: usize, len: usize) -> Result<Self> {
        Self::allocate_in(&Arc::new(PoolCounters::default()), count, len)
    }

    fn allocate_in(counters: &Arc<PoolCounters>, count: usize, len: usize) -> Result<Self> {
        let failed = || PipelineError::Allocation {
            bytes: count * len * mem::size_of::<Complex64>(),
            buffers: count,
        };

        let mut buffers = Vec::new();
        buffers.try_reserve_exact(count).map_err(|_| failed())?;
        for _ in 0..count {
            let mut buffer: Vec<Complex64> = Vec::new();
            buffer.try_reserve_exact(len).map_err(|_| failed())?;
            buffer.resize(len, Complex64::default());
            buffers.push(buffer.into_boxed_slice());
        }

        Ok(Self {
            buffers,
            _lease: SetLease::register(counters),
        })
    }

    /// Number of buffers (the full-dilution extent).
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Entries per buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffers.first().map_or(0, |b| b.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Complex64]> {
        self.buffers.iter().map(|b| &b[..])
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [Complex64]> {
        self.buffers.iter_mut().map(|b| &mut b[..])
    }
}

impl Index<usize> for BufferSet {
    type Output = [Complex64];

    fn index(&self, d: usize) -> &Self::Output {
        &self.buffers[d]
    }
}

impl IndexMut<usize> for BufferSet {
    fn index_mut(&mut self, d: usize) -> &mut Self::Output {
        &mut self.buffers[d]
    }
}

impl fmt::Debug for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSet")
            .field("buffers", &self.len())
            .field("buffer_len", &self.buffer_len())
            .finish()
    }
}

// ── Generations ──────────────────────────────────────────────────────────────

/// The two propagator generations.
///
/// `front` is written by the producer, `back` is read by the consumers. The
/// producer only gets write access while no consumer still holds a handle to
/// `front`; [`Generations::writable`] reports a violation instead of aliasing.
#[derive(Debug)]
pub struct Generations {
    front: Arc<BufferSet>,
    back: Arc<BufferSet>,
}

impl Generations {
    /// Exclusive access to the generation the producer fills next.
    pub fn writable(&mut self) -> Result<&mut BufferSet> {
        Arc::get_mut(&mut self.front).ok_or(PipelineError::GenerationAliased)
    }

    /// Exchange the roles of the two generations. Handles only, no data moves.
    pub fn swap(&mut self) {
        mem::swap(&mut self.front, &mut self.back);
    }

    /// The most recently completed generation.
    pub fn completed(&self) -> &BufferSet {
        &self.back
    }

    /// A handle to the completed generation for a consumer thread.
    pub fn share_completed(&self) -> Arc<BufferSet> {
        Arc::clone(&self.back)
    }
}

// ── Working Set ──────────────────────────────────────────────────────────────

/// Everything one sample's pipeline pass writes to.
#[derive(Debug)]
pub struct WorkingSet {
    sources: BufferSet,
    generations: Generations,
}

impl WorkingSet {
    pub fn sources(&self) -> &BufferSet {
        &self.sources
    }

    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    /// Split borrow for the producer, which writes both at once.
    pub fn parts_mut(&mut self) -> (&mut BufferSet, &mut Generations) {
        (&mut self.sources, &mut self.generations)
    }
}

// ── Buffer Pool ──────────────────────────────────────────────────────────────

/// Allocates and frees [`WorkingSet`]s of a fixed shape.
#[derive(Debug)]
pub struct BufferPool {
    inversions: usize,
    buffer_len: usize,
    counters: Arc<PoolCounters>,
}

impl BufferPool {
    /// `inversions` buffers of `buffer_len` entries per set.
    pub fn new(inversions: usize, buffer_len: usize) -> Self {
        Self {
            inversions,
            buffer_len,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Bytes held by one buffer set.
    pub fn bytes_per_set(&self) -> usize {
        self.inversions * self.buffer_len * mem::size_of::<Complex64>()
    }

    /// Allocate sources and both propagator generations.
    ///
    /// There is no retry: a failed allocation is fatal to the run.
    pub fn allocate(&self) -> Result<WorkingSet> {
        let sources = BufferSet::allocate_in(&self.counters, self.inversions, self.buffer_len)?;
        let front = BufferSet::allocate_in(&self.counters, self.inversions, self.buffer_len)?;
        let back = BufferSet::allocate_in(&self.counters, self.inversions, self.buffer_len)?;

        self.counters.allocations.fetch_add(1, Ordering::AcqRel);
        debug!(
            inversions = self.inversions,
            buffer_len = self.buffer_len,
            bytes = 3 * self.bytes_per_set(),
            "allocated working set"
        );

        Ok(WorkingSet {
            sources,
            generations: Generations {
                front: Arc::new(front),
                back: Arc::new(back),
            },
        })
    }

    /// Free a working set obtained from [`BufferPool::allocate`].
    pub fn release(&self, working: WorkingSet) {
        drop(working);
        self.counters.releases.fetch_add(1, Ordering::AcqRel);
        debug!(bytes = 3 * self.bytes_per_set(), "released working set");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live_sets: self.counters.live.load(Ordering::Acquire),
            peak_live_sets: self.counters.peak.load(Ordering::Acquire),
            allocations: self.counters.allocations.load(Ordering::Acquire),
            releases: self.counters.releases.load(Ordering::Acquire),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
