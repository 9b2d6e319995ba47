//! Invocation gate for one module
//!
//! Every call, construction or surfacing into a module holds a [`GatePass`]
//! for its duration. Unload closes the gate, then waits for the passes
//! already handed out to come back.

use crate::anchor::ModuleId;
use crate::error::{BridgeError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct GateState {
    accepting: bool,
    in_flight: usize,
}

#[derive(Debug)]
pub struct ModuleGate {
    module: ModuleId,
    state: Mutex<GateState>,
    drained: Condvar,
}

impl ModuleGate {
    pub fn new(module: ModuleId) -> Arc<Self> {
        Arc::new(Self {
            module,
            state: Mutex::new(GateState {
                accepting: true,
                in_flight: 0,
            }),
            drained: Condvar::new(),
        })
    }

    /// Admit one invocation; `ModuleUnavailable` once the gate is closed
    pub fn enter(self: &Arc<Self>) -> Result<GatePass> {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(BridgeError::ModuleUnavailable { module: self.module });
        }
        state.in_flight += 1;
        Ok(GatePass { gate: Some(self.clone()) })
    }

    /// Stop admitting and wait for in-flight invocations to finish.
    ///
    /// On timeout the gate stays closed and `DrainTimeout` reports how many
    /// calls were still running.
    pub fn close_and_drain(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.accepting = false;

        while state.in_flight > 0 {
            if self.drained.wait_until(&mut state, deadline).timed_out() && state.in_flight > 0 {
                return Err(BridgeError::DrainTimeout {
                    module: self.module,
                    in_flight: state.in_flight,
                });
            }
        }
        Ok(())
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    fn leave(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

/// Held for the duration of one invocation into a module
#[must_use]
pub struct GatePass {
    gate: Option<Arc<ModuleGate>>,
}

impl GatePass {
    /// Pass for host code, which has no gate
    pub(crate) fn host() -> Self {
        Self { gate: None }
    }
}

impl Drop for GatePass {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.leave();
        }
    }
}
