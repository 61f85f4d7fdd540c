//! Collective synchronization between the ranks of a run.
//!
//! Ranks only ever meet at named phase barriers; no data is exchanged. Rank 0
//! is the coordinator and the only rank that logs at `info`.
//!
//! A rank that hits a fatal error calls [`ProcessGroup::abort`] with its exit
//! code. Peers waiting in (or later entering) a barrier then fail with
//! [`PipelineError::GroupAborted`] carrying the same code, so the whole group
//! terminates with one status.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::{PipelineError, Result};

// ── Phases ───────────────────────────────────────────────────────────────────

/// The collective barriers of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PostInit,
    PreGaugeLoad,
    PostGaugeLoad,
    PostSetup,
    PostSolverTeardown,
    PrePersist,
    PostWrite,
    PostReset,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostInit => write!(f, "post-init"),
            Self::PreGaugeLoad => write!(f, "pre-gauge-load"),
            Self::PostGaugeLoad => write!(f, "post-gauge-load"),
            Self::PostSetup => write!(f, "post-setup"),
            Self::PostSolverTeardown => write!(f, "post-solver-teardown"),
            Self::PrePersist => write!(f, "pre-persist"),
            Self::PostWrite => write!(f, "post-write"),
            Self::PostReset => write!(f, "post-reset"),
        }
    }
}

// ── Process Group ────────────────────────────────────────────────────────────

/// A fixed group of cooperating ranks.
pub trait ProcessGroup: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Terminate the group with `code`. The first abort wins.
    fn abort(&self, code: u8);

    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }
}

/// Enter the barrier for `phase`.
pub fn sync<G: ProcessGroup + ?Sized>(group: &G, phase: Phase) -> Result<()> {
    debug!(rank = group.rank(), %phase, "entering barrier");
    group.barrier()
}

// ── Solo ─────────────────────────────────────────────────────────────────────

/// A group of one. Barriers return immediately until aborted.
#[derive(Debug, Default)]
pub struct SoloGroup {
    aborted: Mutex<Option<u8>>,
}

impl SoloGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort_code(&self) -> Option<u8> {
        *self.aborted.lock()
    }
}

impl ProcessGroup for SoloGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        match *self.aborted.lock() {
            Some(code) => Err(PipelineError::GroupAborted { code }),
            None => Ok(()),
        }
    }

    fn abort(&self, code: u8) {
        self.aborted.lock().get_or_insert(code);
    }
}

// ── Local (in-process ranks) ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: Option<u8>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

/// One rank of a group whose ranks are threads of the same process.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Create the `size` ranks of a new group, rank order preserved.
    pub fn spawn(size: usize) -> Vec<LocalGroup> {
        let shared = Arc::new(Shared {
            size: size.max(1),
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        });
        (0..size.max(1))
            .map(|rank| LocalGroup {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    pub fn abort_code(&self) -> Option<u8> {
        self.shared.state.lock().aborted
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if let Some(code) = state.aborted {
            return Err(PipelineError::GroupAborted { code });
        }

        state.arrived += 1;
        if state.arrived == self.shared.size {
            state.arrived = 0;
            state.generation += 1;
            self.shared.released.notify_all();
            return Ok(());
        }

        let generation = state.generation;
        while state.generation == generation && state.aborted.is_none() {
            self.shared.released.wait(&mut state);
        }

        match state.aborted {
            Some(code) if state.generation == generation => Err(PipelineError::GroupAborted { code }),
            _ => Ok(()),
        }
    }

    fn abort(&self, code: u8) {
        let mut state = self.shared.state.lock();
        if state.aborted.is_none() {
            error!(rank = self.rank, code, "aborting process group");
            state.aborted = Some(code);
        }
        self.shared.released.notify_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
