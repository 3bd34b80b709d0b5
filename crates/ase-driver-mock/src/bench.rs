//! Shared state of the simulated optical bench.
//!
//! The mock pulser and mock spectrometer are physically coupled in the
//! real setup: what the detector sees depends on whether the excitation
//! trigger is running. [`SimulatedBench`] is that coupling — the pulser
//! writes the trigger line, the spectrometer reads it when synthesizing a
//! frame. Tests can also inspect how often the line was toggled.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Shared bench state linking the simulated devices.
#[derive(Debug, Default)]
pub struct SimulatedBench {
    trigger_on: AtomicBool,
    trigger_transitions: AtomicU32,
}

impl SimulatedBench {
    /// Create a bench with the trigger line off.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current trigger line state.
    pub fn trigger_on(&self) -> bool {
        self.trigger_on.load(Ordering::SeqCst)
    }

    /// Drive the trigger line. Counts only actual transitions, so
    /// redundant off-commands (the quiesce path) don't inflate the tally.
    pub fn set_trigger(&self, on: bool) {
        let previous = self.trigger_on.swap(on, Ordering::SeqCst);
        if previous != on {
            self.trigger_transitions.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Number of trigger line transitions since bench creation.
    pub fn trigger_transitions(&self) -> u32 {
        self.trigger_transitions.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_count_only_changes() {
        let bench = SimulatedBench::new();
        assert!(!bench.trigger_on());

        bench.set_trigger(true);
        bench.set_trigger(true); // redundant, not a transition
        bench.set_trigger(false);
        bench.set_trigger(false);

        assert_eq!(bench.trigger_transitions(), 2);
        assert!(!bench.trigger_on());
    }
}
