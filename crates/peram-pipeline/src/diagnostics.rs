// Advisory timing output. Never feeds back into control flow.
//
// Rank 0 reports at `info`; other ranks at `debug` so a many-rank job does not
// repeat every line.

use std::time::Instant;

use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    coordinator: bool,
}

impl Diagnostics {
    pub fn new(coordinator: bool) -> Self {
        Self { coordinator }
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator
    }

    /// Report how long `what` took since `started`.
    pub fn elapsed(&self, what: &'static str, started: Instant) {
        let seconds = started.elapsed().as_secs_f64();
        if self.coordinator {
            info!(seconds, "{what} took {seconds:.6} s");
        } else {
            debug!(seconds, "{what} took {seconds:.6} s");
        }
    }
}
