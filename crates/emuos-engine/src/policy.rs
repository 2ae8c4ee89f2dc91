//! Scheduling policies.
//!
//! FCFS and round-robin share the dispatcher skeleton; all that differs is
//! the worker body and whether a quantum bounds it. A [`Policy`] runs one
//! *slice* (everything that happens on a core between binding and release)
//! and reports why the slice ended. The dispatcher stays policy-agnostic.

use crate::config::SchedulerKind;
use crate::process::{Lifecycle, Process};
use emuos::CoreClock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Poll interval while the bound process is sleeping.
const SLEEP_POLL: Duration = Duration::from_millis(10);
/// One unit of simulated per-instruction delay.
const DELAY_UNIT: Duration = Duration::from_millis(1);

/// Why a worker slice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// The process ran out of instructions.
    Finished,
    /// The process used up its quantum (round-robin only).
    QuantumExpired,
    /// The engine is shutting down; the process is left as-is.
    Stopped,
}

/// Everything a worker slice needs from its core.
pub struct WorkerContext<'a> {
    /// Core index the slice runs on.
    pub core: usize,
    /// That core's logical clock.
    pub clock: &'a CoreClock,
    /// Simulated per-instruction delay in milliseconds.
    pub delays_per_exec: u64,
    /// Engine shutdown flag, checked at every suspension point.
    pub running: &'a AtomicBool,
}

impl WorkerContext<'_> {
    /// Impose the per-instruction delay, ticking the core once per
    /// millisecond slept, and exactly once when the delay is zero.
    fn delay(&self) {
        if self.delays_per_exec == 0 {
            self.clock.advance();
            return;
        }
        for _ in 0..self.delays_per_exec {
            thread::sleep(DELAY_UNIT);
            self.clock.advance();
        }
    }

    fn stopped(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }
}

/// A scheduling policy: the worker body plus an optional quantum.
pub trait Policy: Send + Sync {
    /// Short label for diagnostics.
    fn label(&self) -> &'static str;

    /// Quantum in non-sleep steps, or `None` when slices are unbounded.
    fn quantum(&self) -> Option<u64> {
        None
    }

    /// Drive `process` on the context's core until the slice ends.
    fn run_slice(&self, process: &Arc<Process>, ctx: &WorkerContext<'_>) -> SliceOutcome;
}

/// First-come-first-served: one slice runs the process to completion.
#[derive(Debug, Default)]
pub struct Fcfs;

impl Policy for Fcfs {
    fn label(&self) -> &'static str {
        "fcfs"
    }

    fn run_slice(&self, process: &Arc<Process>, ctx: &WorkerContext<'_>) -> SliceOutcome {
        loop {
            if ctx.stopped() {
                return SliceOutcome::Stopped;
            }
            if process.is_finished() {
                return SliceOutcome::Finished;
            }
            let tick = ctx.clock.now();
            if process.is_sleeping(tick) {
                process.set_state(Lifecycle::Waiting);
                ctx.clock.advance();
                thread::sleep(SLEEP_POLL);
                continue;
            }
            process.set_state(Lifecycle::Running);
            process.execute_one(ctx.core, tick);
            ctx.delay();
        }
    }
}

/// Round-robin: a slice ends after `quantum` non-sleep steps.
///
/// Sleeping polls park the worker without consuming quantum; executing the
/// SLEEP instruction itself is a step like any other.
#[derive(Debug)]
pub struct RoundRobin {
    pub quantum: u64,
}

impl Policy for RoundRobin {
    fn label(&self) -> &'static str {
        "rr"
    }

    fn quantum(&self) -> Option<u64> {
        Some(self.quantum)
    }

    fn run_slice(&self, process: &Arc<Process>, ctx: &WorkerContext<'_>) -> SliceOutcome {
        let mut steps = 0;
        loop {
            if ctx.stopped() {
                return SliceOutcome::Stopped;
            }
            if process.is_finished() {
                return SliceOutcome::Finished;
            }
            if steps >= self.quantum {
                return SliceOutcome::QuantumExpired;
            }
            let tick = ctx.clock.now();
            if process.is_sleeping(tick) {
                process.set_state(Lifecycle::Waiting);
                ctx.clock.advance();
                thread::sleep(SLEEP_POLL);
                continue;
            }
            process.set_state(Lifecycle::Running);
            process.execute_one(ctx.core, tick);
            process.note_quantum_step();
            steps += 1;
            ctx.delay();
        }
    }
}

/// Build the policy for a configured scheduler kind.
pub(crate) fn policy_for(kind: SchedulerKind, quantum_cycles: u64) -> Box<dyn Policy> {
    match kind {
        SchedulerKind::Fcfs => Box::new(Fcfs),
        SchedulerKind::RoundRobin => Box::new(RoundRobin {
            quantum: quantum_cycles,
        }),
    }
}
