//! The engine: dispatcher, core slots, tickers, and the public API surface.
//!
//! One [`Engine`] value owns everything the simulation needs: the ready
//! queue, the allocator, the per-core slots and clocks, the dispatch thread,
//! and (optionally) the batch producer. Teardown is the engine's job:
//! [`Engine::stop`] returns only after every thread it started has been
//! joined.
//!
//! Each dispatch pass visits the cores in index order and handles, in this
//! order: a finished binding (deallocate and release), an expired quantum
//! (requeue at the tail), and admission (pop the ready queue, consult the
//! allocator, bind, spawn a worker slice).

use crate::alloc::FlatAllocator;
use crate::batch::{BatchProducer, BatchSpec, GreetingSource, ProgramSource};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::policy::{policy_for, Policy, WorkerContext};
use crate::process::{Lifecycle, Process, ProcessView};
use crate::queue::ReadyQueue;
use emuos::CoreClock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a dispatch pass waits on the ready-queue condition. Purely a
/// responsiveness bound; it never influences scheduling decisions.
const DISPATCH_WAIT: Duration = Duration::from_millis(1);
/// Wall-clock interval between ticker increments.
const TICK_INTERVAL: Duration = Duration::from_millis(1);
/// A memory-map artifact is written every this many quantum expiries.
const MEMORY_SNAPSHOT_EVERY: u64 = 4;

#[derive(Default)]
struct SlotState {
    busy: bool,
    assigned: Option<Arc<Process>>,
    worker: Option<JoinHandle<()>>,
}

/// One CPU core's current binding.
#[derive(Default)]
struct CoreSlot {
    state: Mutex<SlotState>,
}

impl CoreSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the slot idle and take whatever was bound to it.
    fn clear(&self) -> (Option<Arc<Process>>, Option<JoinHandle<()>>) {
        let mut state = self.lock();
        state.busy = false;
        (state.assigned.take(), state.worker.take())
    }
}

/// State shared between the engine value and the threads it spawns.
struct Shared {
    running: AtomicBool,
    queue: ReadyQueue,
    slots: Vec<CoreSlot>,
    clocks: Vec<CoreClock>,
    allocator: FlatAllocator,
    policy: Box<dyn Policy>,
    registry: Mutex<Vec<Arc<Process>>>,
    delays_per_exec: u64,
}

impl Shared {
    fn submit(&self, process: Arc<Process>) {
        process.set_state(Lifecycle::Ready);
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&process));
        self.queue.push(process);
    }
}

/// The concurrent execution engine.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use emuos::Instruction;
/// use emuos_engine::{Engine, EngineConfig};
/// use emuos_engine::process::Process;
///
/// let mut engine = Engine::start(EngineConfig::default()).unwrap();
///
/// let p = Process::with_program("p01", vec![Instruction::Print { var: None }], 4096);
/// engine.submit(Arc::new(p));
///
/// // ... observe running_processes(), busy_cores() ...
/// engine.stop();
/// ```
pub struct Engine {
    shared: Arc<Shared>,
    config: EngineConfig,
    dispatcher: Option<JoinHandle<()>>,
    tickers: Vec<JoinHandle<()>>,
    batch: Option<BatchProducer>,
}

impl Engine {
    /// Validate `config`, then spawn the tickers and the dispatch thread.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            queue: ReadyQueue::new(),
            slots: (0..config.num_cpu).map(|_| CoreSlot::default()).collect(),
            clocks: (0..config.num_cpu).map(|_| CoreClock::new()).collect(),
            allocator: FlatAllocator::new(
                config.max_overall_mem,
                config.mem_per_proc(),
                config.memory_log_dir.clone(),
            ),
            policy: policy_for(config.scheduler, config.quantum_cycles),
            registry: Mutex::new(Vec::new()),
            delays_per_exec: config.delays_per_exec,
        });

        let mut tickers = Vec::with_capacity(config.num_cpu);
        for core in 0..config.num_cpu {
            let shared = Arc::clone(&shared);
            let ticker = thread::Builder::new()
                .name(format!("ticker-{core}"))
                .spawn(move || {
                    while shared.running.load(Ordering::Acquire) {
                        shared.clocks[core].advance();
                        thread::sleep(TICK_INTERVAL);
                    }
                });
            match ticker {
                Ok(handle) => tickers.push(handle),
                Err(err) => log::error!("failed to spawn ticker for core {core}: {err}"),
            }
        }

        let dispatcher = {
            let shared = Arc::clone(&shared);
            match thread::Builder::new()
                .name("dispatcher".into())
                .spawn(move || dispatch_loop(&shared))
            {
                Ok(handle) => Some(handle),
                Err(err) => {
                    log::error!("failed to spawn dispatcher: {err}");
                    None
                }
            }
        };

        Ok(Self {
            shared,
            config,
            dispatcher,
            tickers,
            batch: None,
        })
    }

    /// Enqueue a collaborator-created process. Admission to a core is gated
    /// by the allocator; admission to the queue never is.
    pub fn submit(&self, process: Arc<Process>) {
        self.shared.submit(process);
    }

    /// Start the batch producer with the built-in greeting source.
    pub fn start_batch(&mut self) {
        self.start_batch_with(Box::new(GreetingSource));
    }

    /// Start the batch producer with a collaborator-supplied stream source.
    pub fn start_batch_with(&mut self, source: Box<dyn ProgramSource>) {
        if self.batch.is_some() {
            log::debug!("batch producer already running");
            return;
        }
        let spec = BatchSpec {
            freq: self.config.batch_process_freq,
            min_ins: self.config.min_ins,
            max_ins: self.config.max_ins,
            min_mem: self.config.min_mem_per_proc,
            max_mem: self.config.max_mem_per_proc,
        };
        let shared = Arc::clone(&self.shared);
        self.batch = Some(BatchProducer::start(spec, source, move |process| {
            shared.submit(process);
        }));
    }

    /// Stop and join the batch producer, if running.
    pub fn stop_batch(&mut self) {
        if let Some(mut producer) = self.batch.take() {
            producer.stop();
        }
    }

    /// Stop the engine and join every thread it started. Idempotent.
    pub fn stop(&mut self) {
        self.stop_batch();
        self.shared.running.store(false, Ordering::Release);
        self.shared.queue.notify_all();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        for handle in self.tickers.drain(..) {
            let _ = handle.join();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The memory allocator (for status printers and memory reports).
    #[must_use]
    pub fn allocator(&self) -> &FlatAllocator {
        &self.shared.allocator
    }

    /// Snapshots of the processes currently bound to cores and unfinished.
    #[must_use]
    pub fn running_processes(&self) -> Vec<ProcessView> {
        self.shared
            .slots
            .iter()
            .filter_map(|slot| slot.lock().assigned.clone())
            .filter(|p| !p.is_finished())
            .map(|p| p.snapshot())
            .collect()
    }

    /// Snapshots of every process ever submitted, in submission order.
    #[must_use]
    pub fn processes(&self) -> Vec<ProcessView> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.snapshot())
            .collect()
    }

    /// Find a submitted process by name.
    pub fn process_by_name(&self, name: &str) -> Result<Arc<Process>, EngineError> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchProcess(name.to_owned()))
    }

    /// Number of cores bound to an unfinished process.
    #[must_use]
    pub fn busy_cores(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|slot| {
                slot.lock()
                    .assigned
                    .as_ref()
                    .is_some_and(|p| !p.is_finished())
            })
            .count()
    }

    #[must_use]
    pub fn available_cores(&self) -> usize {
        self.config.num_cpu - self.busy_cores()
    }

    /// Number of processes waiting in the ready queue.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether `process` is currently in the ready queue.
    #[must_use]
    pub fn is_queued(&self, process: &Arc<Process>) -> bool {
        self.shared.queue.contains(process)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(shared: &Arc<Shared>) {
    let mut expiries = 0u64;
    let mut snapshots = 0u64;

    while shared.running.load(Ordering::Acquire) {
        shared.queue.wait_for_work(DISPATCH_WAIT);
        for core in 0..shared.slots.len() {
            service_core(shared, core, &mut expiries, &mut snapshots);
        }
    }

    // Final sweep: nullify every slot and join abandoned workers.
    for slot in &shared.slots {
        let (process, worker) = slot.clear();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
        if let Some(process) = process {
            process.release_core();
        }
    }
}

/// One dispatch step for one core: finish check, quantum check, admission.
fn service_core(shared: &Arc<Shared>, core: usize, expiries: &mut u64, snapshots: &mut u64) {
    let slot = &shared.slots[core];
    let bound = slot.lock().assigned.clone();

    if let Some(process) = bound {
        if process.is_finished() {
            let (_, worker) = slot.clear();
            if let Some(handle) = worker {
                let _ = handle.join();
            }
            shared.allocator.deallocate(&process);
            process.release_core();
            // Fall through: the freed slot admits in this same pass.
        } else if shared
            .policy
            .quantum()
            .is_some_and(|quantum| process.quantum_used() >= quantum)
        {
            let (_, worker) = slot.clear();
            if let Some(handle) = worker {
                let _ = handle.join();
            }
            // The slice may have finished on its very last quantum step;
            // with the worker joined the flag is now stable, so re-check
            // before requeueing.
            if process.is_finished() {
                shared.allocator.deallocate(&process);
                process.release_core();
            } else {
                process.release_to_ready();
                shared.queue.push(process);

                *expiries += 1;
                if *expiries % MEMORY_SNAPSHOT_EVERY == 0 {
                    *snapshots += 1;
                    if let Err(err) = shared.allocator.snapshot(*snapshots) {
                        log::warn!("memory snapshot {snapshots} failed: {err}");
                    }
                }
            }
        } else {
            return; // Within its slice; nothing to do for this core.
        }
    }

    // Admission: dequeue and bind atomically under the slot lock.
    let mut state = slot.lock();
    if state.assigned.is_some() {
        return;
    }
    if state.busy {
        log::warn!("core {core} marked busy with nothing bound; releasing slot");
        state.busy = false;
    }
    let Some(process) = shared.queue.pop() else {
        return;
    };
    if !shared.allocator.is_allocated(&process) && !shared.allocator.allocate(&process) {
        log::debug!("memory admission denied for {}; requeued", process.name());
        drop(state);
        shared.queue.push(process);
        return;
    }

    process.bind_to_core(core);
    match spawn_worker(shared, core, Arc::clone(&process)) {
        Ok(handle) => {
            state.busy = true;
            state.assigned = Some(process);
            state.worker = Some(handle);
        }
        Err(err) => {
            log::error!("failed to spawn worker on core {core}: {err}");
            process.release_to_ready();
            drop(state);
            shared.queue.push(process);
        }
    }
}

fn spawn_worker(
    shared: &Arc<Shared>,
    core: usize,
    process: Arc<Process>,
) -> io::Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("core-{core}"))
        .spawn(move || {
            let ctx = WorkerContext {
                core,
                clock: &shared.clocks[core],
                delays_per_exec: shared.delays_per_exec,
                running: &shared.running,
            };
            let outcome = shared.policy.run_slice(&process, &ctx);
            log::trace!(
                "core {core}: slice for {} ended with {outcome:?}",
                process.name()
            );
        })
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::config::{EngineConfig, SchedulerKind};
    use crate::process::Process;
    use emuos::{Instruction, Word};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn config(cores: usize) -> EngineConfig {
        EngineConfig {
            num_cpu: cores,
            scheduler: SchedulerKind::Fcfs,
            delays_per_exec: 0,
            memory_log_dir: tempfile::tempdir().unwrap().keep(),
            ..EngineConfig::default()
        }
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    fn declares(n: usize) -> Vec<Instruction> {
        (0..n)
            .map(|i| Instruction::Declare {
                name: format!("v{i}"),
                value: Word(1),
            })
            .collect()
    }

    #[test]
    fn submitted_process_runs_to_completion() {
        let mut engine = Engine::start(config(1)).unwrap();
        let p = Arc::new(Process::with_program("solo", declares(4), 512));
        engine.submit(Arc::clone(&p));

        assert!(
            wait_until(Duration::from_secs(5), || p.is_finished()),
            "process never finished"
        );
        assert_eq!(p.completed(), 4);
        engine.stop();
        assert_eq!(engine.busy_cores(), 0);
    }

    #[test]
    fn finished_process_releases_its_memory() {
        let mut engine = Engine::start(config(1)).unwrap();
        let p = Arc::new(Process::with_program("freed", declares(2), 512));
        engine.submit(Arc::clone(&p));

        assert!(wait_until(Duration::from_secs(5), || p.is_finished()));
        assert!(wait_until(Duration::from_secs(1), || {
            !engine.allocator().is_allocated(&p)
        }));
        engine.stop();
    }

    #[test]
    fn lookup_by_name() {
        let mut engine = Engine::start(config(1)).unwrap();
        let p = Arc::new(Process::with_program("needle", declares(1), 512));
        engine.submit(Arc::clone(&p));

        assert!(Arc::ptr_eq(&engine.process_by_name("needle").unwrap(), &p));
        assert!(engine.process_by_name("haystack").is_err());
        engine.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = Engine::start(config(2)).unwrap();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
        assert_eq!(engine.busy_cores(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = EngineConfig {
            num_cpu: 0,
            ..EngineConfig::default()
        };
        assert!(Engine::start(bad).is_err());
    }
}
