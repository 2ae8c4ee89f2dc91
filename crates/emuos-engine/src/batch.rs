//! Batch process producer.
//!
//! A single task wakes every millisecond; every `batch-process-freq` wakeups
//! it synthesizes a new process named `pNN` and pushes it at the dispatcher.
//! Instruction-stream *generation* is a collaborator concern: the producer
//! only samples a target count and a memory size, then asks a
//! [`ProgramSource`] for the finished stream.

use crate::process::Process;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Interval between producer wakeups; one wakeup is one producer tick.
const PRODUCER_TICK: Duration = Duration::from_millis(1);

/// Supplies a finished instruction stream for a freshly synthesized process.
pub trait ProgramSource: Send {
    /// Produce a stream whose expanded count should be `target`.
    fn generate(&mut self, target: u64, process_name: &str) -> Vec<emuos::Instruction>;
}

/// Minimal built-in source: `target` greeting PRINTs.
#[derive(Debug, Default)]
pub struct GreetingSource;

impl ProgramSource for GreetingSource {
    fn generate(&mut self, target: u64, _process_name: &str) -> Vec<emuos::Instruction> {
        (0..target)
            .map(|_| emuos::Instruction::Print { var: None })
            .collect()
    }
}

/// Sampling bounds for synthesized processes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchSpec {
    pub freq: u64,
    pub min_ins: u64,
    pub max_ins: u64,
    pub min_mem: u64,
    pub max_mem: u64,
}

/// Handle to the producer task; joined on stop.
pub(crate) struct BatchProducer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BatchProducer {
    /// Spawn the producer. `submit` hands each new process to the engine.
    pub(crate) fn start<F>(spec: BatchSpec, mut source: Box<dyn ProgramSource>, mut submit: F) -> Self
    where
        F: FnMut(Arc<Process>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("batch-producer".into())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let mut counter = 0u64;
                let mut produced = 0u64;
                while flag.load(Ordering::Acquire) {
                    thread::sleep(PRODUCER_TICK);
                    counter += 1;
                    if counter < spec.freq {
                        continue;
                    }
                    counter = 0;
                    produced += 1;
                    let name = format!("p{produced:02}");
                    let total = rng.gen_range(spec.min_ins..=spec.max_ins);
                    let mem = rng.gen_range(spec.min_mem..=spec.max_mem);
                    let program = source.generate(total, &name);
                    submit(Arc::new(Process::with_program(name, program, mem)));
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("failed to spawn batch producer: {err}");
                None
            }
        };
        Self { running, handle }
    }

    /// Stop and join the producer task.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BatchProducer {
    fn drop(&mut self) {
        self.stop();
    }
}
