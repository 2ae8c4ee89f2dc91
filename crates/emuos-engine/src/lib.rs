//! A multi-core scheduler and process execution engine for the emuos
//! instructional OS emulator.
//!
//! `emuos-engine` models a small operating system: synthetic processes built
//! from a seven-kind instruction set execute on a fixed set of cores under a
//! pluggable scheduling policy (FCFS or round-robin), gated by a flat
//! first-fit memory allocator. A periodic batch producer can feed the ready
//! queue to exercise the back-pressure between producer and scheduler.
//!
//! # Architecture
//!
//! The engine is built around three seams:
//!
//! - **[`Policy`]**: the worker body that drives one process on one core
//!   between binding and release. The dispatcher is policy-agnostic.
//! - **[`ProgramSource`]**: supplies finished instruction streams for batch
//!   processes; stream generation itself is a collaborator concern.
//! - **[`Engine`]**: the single value owning every thread, queue, slot, and
//!   the allocator. Collaborators (a REPL, status printers) hold exactly one.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use emuos::{Instruction, Word};
//! use emuos_engine::{Engine, EngineConfig};
//! use emuos_engine::process::Process;
//!
//! let mut config = EngineConfig::default();
//! config.apply("num-cpu", "2").unwrap();
//! config.apply("scheduler", "rr").unwrap();
//! config.apply("quantum-cycles", "4").unwrap();
//!
//! let mut engine = Engine::start(config).unwrap();
//! engine.submit(Arc::new(Process::with_program(
//!     "p01",
//!     vec![Instruction::Declare { name: "x".into(), value: Word(7) }],
//!     4096,
//! )));
//! engine.stop(); // joins every thread the engine started
//! ```

pub mod alloc;
pub use alloc::FlatAllocator;
pub mod batch;
pub use batch::{GreetingSource, ProgramSource};
pub mod config;
pub use config::{EngineConfig, SchedulerKind};
pub mod engine;
pub use engine::Engine;
pub mod error;
pub use error::{ConfigError, EngineError};
pub mod policy;
pub use policy::{Fcfs, Policy, RoundRobin, SliceOutcome};
pub mod process;
pub use process::{Lifecycle, Process, ProcessView};

mod queue;
