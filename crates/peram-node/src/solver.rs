//! A site-diagonal stand-in for the lattice Dirac operator.
//!
//! The operator is `M = (4 + m_op) + i·φ(x)` per entry, so a solve is an
//! element-wise division. It keeps the two entry points honest: the standard
//! one reshuffles the field into a spin-major solver layout and back, the
//! direct one works in place on the caller's layout. Both give the same
//! propagator.

use num_complex::Complex64;
use tracing::{debug, info};

use peram_pipeline::SolverBackend;
use peram_types::lattice::{COLORS, SPINS};

/// Bare mass shift added per operator index.
const MASS_STEP: f64 = 0.05;

struct State {
    /// Diagonal in solver (spin-major) layout.
    diagonal: Vec<Complex64>,
    scratch: Vec<Complex64>,
    /// `layout[i]` is the solver-layout position of caller entry `i`.
    layout: Vec<usize>,
}

pub struct DiagonalSolver {
    len: usize,
    state: Option<State>,
    cycles: usize,
}

impl DiagonalSolver {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            state: None,
            cycles: 0,
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.state.is_some()
    }

    /// Completed `init` calls.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Position of caller-layout entry `i` in solver layout.
    fn solver_index(&self, i: usize) -> usize {
        let sites = self.len / (COLORS * SPINS);
        let site = i / (COLORS * SPINS);
        let colour = (i / SPINS) % COLORS;
        let spin = i % SPINS;
        (spin * sites + site) * COLORS + colour
    }

    fn state(&mut self) -> anyhow::Result<&mut State> {
        self.state
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("solver used before init or after finalize"))
    }

    fn check_lengths(&self, out: &[Complex64], src: &[Complex64]) -> anyhow::Result<()> {
        anyhow::ensure!(
            out.len() == self.len && src.len() == self.len,
            "field length mismatch: out {}, src {}, solver {}",
            out.len(),
            src.len(),
            self.len
        );
        Ok(())
    }
}

fn mass(op_id: u32) -> f64 {
    4.0 + MASS_STEP * f64::from(op_id)
}

impl SolverBackend for DiagonalSolver {
    fn init(&mut self) -> anyhow::Result<()> {
        let diagonal = (0..self.len)
            .map(|j| Complex64::new(0.0, ((j % 7) as f64 - 3.0) * 0.25))
            .collect();
        let layout = (0..self.len).map(|i| self.solver_index(i)).collect();
        self.state = Some(State {
            diagonal,
            scratch: vec![Complex64::default(); self.len],
            layout,
        });
        self.cycles += 1;
        info!(entries = self.len, cycle = self.cycles, "solver initialised");
        Ok(())
    }

    fn invert(&mut self, out: &mut [Complex64], src: &[Complex64], op_id: u32) -> anyhow::Result<()> {
        self.check_lengths(out, src)?;
        let state = self.state()?;

        for (z, &j) in src.iter().zip(&state.layout) {
            state.scratch[j] = *z;
        }
        for (z, m) in state.scratch.iter_mut().zip(&state.diagonal) {
            *z /= *m + mass(op_id);
        }
        for (z, &j) in out.iter_mut().zip(&state.layout) {
            *z = state.scratch[j];
        }
        Ok(())
    }

    fn supports_direct(&self) -> bool {
        true
    }

    fn invert_direct(&mut self, out: &mut [Complex64], src: &[Complex64], op_id: u32) -> anyhow::Result<()> {
        self.check_lengths(out, src)?;
        let state = self.state()?;

        for ((o, z), &j) in out.iter_mut().zip(src).zip(&state.layout) {
            *o = *z / (state.diagonal[j] + mass(op_id));
        }
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        if self.state.take().is_some() {
            debug!(entries = self.len, "solver state released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(len: usize) -> Vec<Complex64> {
        (0..len).map(|i| Complex64::new(i as f64, 1.0 - i as f64)).collect()
    }

    #[test]
    fn standard_and_direct_agree() {
        let len = COLORS * SPINS * 4;
        let mut solver = DiagonalSolver::new(len);
        solver.init().unwrap();
        let src = field(len);

        let mut standard = vec![Complex64::default(); len];
        let mut direct = vec![Complex64::default(); len];
        solver.invert(&mut standard, &src, 1).unwrap();
        solver.invert_direct(&mut direct, &src, 1).unwrap();

        for (a, b) in standard.iter().zip(&direct) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn solve_inverts_the_operator() {
        let len = COLORS * SPINS;
        let mut solver = DiagonalSolver::new(len);
        solver.init().unwrap();
        let src = field(len);
        let mut out = vec![Complex64::default(); len];
        solver.invert(&mut out, &src, 0).unwrap();

        let diagonal = solver.state.as_ref().unwrap().diagonal.clone();
        for i in 0..len {
            let m = diagonal[solver.solver_index(i)] + mass(0);
            assert!((out[i] * m - src[i]).norm() < 1e-12);
        }
    }

    #[test]
    fn layout_is_a_permutation() {
        let len = COLORS * SPINS * 3;
        let solver = DiagonalSolver::new(len);
        let mut seen: Vec<usize> = (0..len).map(|i| solver.solver_index(i)).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..len).collect::<Vec<_>>());
    }

    #[test]
    fn finalize_then_init_cycle() {
        let mut solver = DiagonalSolver::new(COLORS * SPINS);
        let mut out = vec![Complex64::default(); COLORS * SPINS];
        let src = field(COLORS * SPINS);
        assert!(solver.invert(&mut out, &src, 0).is_err());

        solver.init().unwrap();
        solver.finalize().unwrap();
        assert!(!solver.is_initialised());
        assert!(solver.invert(&mut out, &src, 0).is_err());

        solver.init().unwrap();
        solver.invert(&mut out, &src, 0).unwrap();
        assert_eq!(solver.cycles(), 2);
    }

    #[test]
    fn wrong_length_rejected() {
        let mut solver = DiagonalSolver::new(COLORS * SPINS);
        solver.init().unwrap();
        let mut out = vec![Complex64::default(); 3];
        assert!(solver.invert(&mut out, &field(3), 0).is_err());
    }
}
