//! Core primitives for the emuos instructional OS emulator.
//!
//! `emuos` holds the vocabulary types shared between the execution engine
//! (`emuos-engine`) and its external collaborators (a REPL, instruction
//! generators, status renderers):
//!
//! - [`Word`]: 16-bit value with wrapping arithmetic, used for process
//!   variables and memory words.
//! - [`Instruction`] / [`Operand`]: the tagged instruction union a process
//!   executes, including nested FOR bodies, and
//!   [`expanded_count`](instruction::expanded_count) for sizing a stream.
//! - [`MemoryImage`]: a process's flat byte image with silent out-of-range
//!   semantics.
//! - [`CoreClock`]: the per-core monotonic logical tick counter.
//! - [`stamp`]: the `(MM/DD/YYYY HH:MM:SS AM/PM)` timestamp format.

pub mod clock;
pub use clock::CoreClock;
pub mod instruction;
pub use instruction::{expanded_count, Instruction, Operand};
pub mod memory;
pub use memory::MemoryImage;
pub mod stamp;
pub mod word;
pub use word::Word;
