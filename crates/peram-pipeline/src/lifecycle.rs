use std::fmt;

use crate::error::{PipelineError, Result};

// ── Run State Machine ────────────────────────────────────────────────────────

/// Configured → SolverReady → GaugeLoaded → Accumulating(0) → Drained(0) →
/// Persisted(0) → Accumulating(1) → … → Finished | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Configuration validated; no collaborator has been called.
    Configured,
    /// Solver initialized.
    SolverReady,
    /// Gauge configuration loaded; accumulator prepared for sample 0.
    GaugeLoaded,
    /// A pipeline pass for the sample is running.
    Accumulating { sample: usize },
    /// Every coordinate of the sample is accumulated and its buffers freed.
    Drained { sample: usize },
    /// The sample's perambulator has been written.
    Persisted { sample: usize },
    /// All samples persisted, collaborators shut down.
    Finished,
    /// A fatal error ended the run.
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => write!(f, "Configured"),
            Self::SolverReady => write!(f, "SolverReady"),
            Self::GaugeLoaded => write!(f, "GaugeLoaded"),
            Self::Accumulating { sample } => write!(f, "Accumulating({sample})"),
            Self::Drained { sample } => write!(f, "Drained({sample})"),
            Self::Persisted { sample } => write!(f, "Persisted({sample})"),
            Self::Finished => write!(f, "Finished"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ── Run Lifecycle ────────────────────────────────────────────────────────────

/// Tracks where a run is and rejects out-of-order steps.
#[derive(Debug)]
pub struct RunLifecycle {
    samples: usize,
    state: RunState,
    failure_reason: Option<String>,
}

impl RunLifecycle {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            state: RunState::Configured,
            failure_reason: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// `Configured → SolverReady`.
    pub fn solver_ready(&mut self) -> Result<()> {
        self.advance(RunState::Configured, RunState::SolverReady)
    }

    /// `SolverReady → GaugeLoaded`.
    pub fn gauge_loaded(&mut self) -> Result<()> {
        self.advance(RunState::SolverReady, RunState::GaugeLoaded)
    }

    /// Start the pass of `sample`. Sample 0 follows the gauge load, every
    /// later sample follows the persistence of its predecessor.
    pub fn begin_sample(&mut self, sample: usize) -> Result<()> {
        let next = RunState::Accumulating { sample };
        let legal = sample < self.samples
            && match self.state {
                RunState::GaugeLoaded => sample == 0,
                RunState::Persisted { sample: done } => sample == done + 1,
                _ => false,
            };
        self.transition(legal, next)
    }

    /// `Accumulating(s) → Drained(s)`.
    pub fn drained(&mut self, sample: usize) -> Result<()> {
        self.advance(RunState::Accumulating { sample }, RunState::Drained { sample })
    }

    /// `Drained(s) → Persisted(s)`.
    pub fn persisted(&mut self, sample: usize) -> Result<()> {
        self.advance(RunState::Drained { sample }, RunState::Persisted { sample })
    }

    /// `Persisted(R-1) → Finished`.
    pub fn finish(&mut self) -> Result<()> {
        let last = self.samples.checked_sub(1);
        let legal = matches!(self.state, RunState::Persisted { sample } if Some(sample) == last);
        self.transition(legal, RunState::Finished)
    }

    /// Any state → `Failed`.
    pub fn fail(&mut self, reason: &str) {
        self.state = RunState::Failed;
        self.failure_reason = Some(reason.to_string());
    }

    fn advance(&mut self, from: RunState, to: RunState) -> Result<()> {
        self.transition(self.state == from, to)
    }

    fn transition(&mut self, legal: bool, to: RunState) -> Result<()> {
        if !legal {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_two_samples() {
        let mut run = RunLifecycle::new(2);
        assert_eq!(run.state(), RunState::Configured);

        run.solver_ready().unwrap();
        run.gauge_loaded().unwrap();
        for sample in 0..2 {
            run.begin_sample(sample).unwrap();
            run.drained(sample).unwrap();
            run.persisted(sample).unwrap();
        }
        run.finish().unwrap();
        assert_eq!(run.state(), RunState::Finished);
    }

    #[test]
    fn persist_before_drain_rejected() {
        let mut run = RunLifecycle::new(1);
        run.solver_ready().unwrap();
        run.gauge_loaded().unwrap();
        run.begin_sample(0).unwrap();

        let err = run.persisted(0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition: Accumulating(0) → Persisted(0)"
        );
    }

    #[test]
    fn samples_in_order_only() {
        let mut run = RunLifecycle::new(3);
        run.solver_ready().unwrap();
        run.gauge_loaded().unwrap();
        assert!(run.begin_sample(1).is_err());
        run.begin_sample(0).unwrap();
        run.drained(0).unwrap();
        run.persisted(0).unwrap();
        assert!(run.begin_sample(2).is_err());
        assert!(run.finish().is_err());
    }

    #[test]
    fn no_sample_beyond_count() {
        let mut run = RunLifecycle::new(1);
        run.solver_ready().unwrap();
        run.gauge_loaded().unwrap();
        run.begin_sample(0).unwrap();
        run.drained(0).unwrap();
        run.persisted(0).unwrap();
        assert!(run.begin_sample(1).is_err());
    }

    #[test]
    fn gauge_before_solver_rejected() {
        let mut run = RunLifecycle::new(1);
        assert!(run.gauge_loaded().is_err());
    }

    #[test]
    fn fail_sets_reason() {
        let mut run = RunLifecycle::new(1);
        run.fail("gauge configuration 1000 could not be read");
        assert_eq!(run.state(), RunState::Failed);
        assert!(run.failure_reason().unwrap().contains("1000"));
    }
}
