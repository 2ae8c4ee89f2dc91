//! Engine configuration.
//!
//! The configuration-file *parser* lives with the REPL; its contract with the
//! engine is the set of recognized keys below. [`EngineConfig::apply`] takes
//! one `key value` pair at a time, ignores unknown keys, and leaves
//! unmentioned fields at their defaults.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;

/// Scheduling policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    /// First-come-first-served: a dispatched process runs to completion.
    #[default]
    Fcfs,
    /// Round-robin: a dispatched process runs for at most `quantum-cycles`
    /// non-sleep steps before being requeued.
    RoundRobin,
}

impl FromStr for SchedulerKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcfs" => Ok(SchedulerKind::Fcfs),
            "rr" => Ok(SchedulerKind::RoundRobin),
            _ => Err(()),
        }
    }
}

/// Engine configuration with the recognized key set.
///
/// # Examples
///
/// ```
/// use emuos_engine::EngineConfig;
///
/// let mut config = EngineConfig::default();
/// assert!(config.apply("num-cpu", "2").unwrap());
/// assert!(config.apply("scheduler", "rr").unwrap());
/// assert!(!config.apply("no-such-key", "1").unwrap());
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of cores (`num-cpu`, >= 1).
    pub num_cpu: usize,
    /// Scheduling policy (`scheduler`).
    pub scheduler: SchedulerKind,
    /// Round-robin quantum in non-sleep steps (`quantum-cycles`, positive).
    pub quantum_cycles: u64,
    /// Ticks between batch-producer spawns (`batch-process-freq`).
    pub batch_process_freq: u64,
    /// Inclusive lower bound for generated instruction counts (`min-ins`).
    pub min_ins: u64,
    /// Inclusive upper bound for generated instruction counts (`max-ins`).
    pub max_ins: u64,
    /// Simulated per-instruction delay in milliseconds (`delays-per-exec`).
    pub delays_per_exec: u64,
    /// Total memory managed by the allocator (`max-overall-mem`).
    pub max_overall_mem: u64,
    /// Frame size, reserved for a paged allocator (`mem-per-frame`).
    pub mem_per_frame: u64,
    /// Lower bound for a generated process's memory (`min-mem-per-proc`).
    pub min_mem_per_proc: u64,
    /// Upper bound for a generated process's memory (`max-mem-per-proc`).
    pub max_mem_per_proc: u64,
    /// Directory receiving `memory_stamp_<N>.txt` artifacts.
    pub memory_log_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_cpu: 4,
            scheduler: SchedulerKind::default(),
            quantum_cycles: 5,
            batch_process_freq: 1,
            min_ins: 1000,
            max_ins: 2000,
            delays_per_exec: 0,
            max_overall_mem: 16384,
            mem_per_frame: 16,
            min_mem_per_proc: 4096,
            max_mem_per_proc: 4096,
            memory_log_dir: PathBuf::from("Memory_Logs"),
        }
    }
}

impl EngineConfig {
    /// Apply one recognized `key value` pair.
    ///
    /// Returns `Ok(true)` when the key was recognized and applied,
    /// `Ok(false)` when the key is unknown (and ignored), and an error when
    /// a recognized key's value fails to parse.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "num-cpu" => self.num_cpu = parse("num-cpu", value)?,
            "scheduler" => {
                self.scheduler =
                    value
                        .parse()
                        .map_err(|()| ConfigError::Unparseable {
                            key: "scheduler",
                            value: value.to_owned(),
                        })?;
            }
            "quantum-cycles" => self.quantum_cycles = parse("quantum-cycles", value)?,
            "batch-process-freq" => {
                self.batch_process_freq = parse("batch-process-freq", value)?;
            }
            "min-ins" => self.min_ins = parse("min-ins", value)?,
            "max-ins" => self.max_ins = parse("max-ins", value)?,
            "delays-per-exec" => self.delays_per_exec = parse("delays-per-exec", value)?,
            "max-overall-mem" => self.max_overall_mem = parse("max-overall-mem", value)?,
            "mem-per-frame" => self.mem_per_frame = parse("mem-per-frame", value)?,
            "min-mem-per-proc" => self.min_mem_per_proc = parse("min-mem-per-proc", value)?,
            "max-mem-per-proc" => self.max_mem_per_proc = parse("max-mem-per-proc", value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Check that the configuration can drive an engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cpu < 1 {
            return Err(invalid("num-cpu", "at least 1", self.num_cpu));
        }
        if self.scheduler == SchedulerKind::RoundRobin && self.quantum_cycles == 0 {
            return Err(invalid("quantum-cycles", "positive", self.quantum_cycles));
        }
        if self.min_ins == 0 || self.min_ins > self.max_ins {
            return Err(invalid("min-ins", "positive and <= max-ins", self.min_ins));
        }
        if self.max_mem_per_proc == 0 || self.min_mem_per_proc > self.max_mem_per_proc {
            return Err(invalid(
                "max-mem-per-proc",
                "positive and >= min-mem-per-proc",
                self.max_mem_per_proc,
            ));
        }
        if self.max_overall_mem < self.mem_per_proc() {
            return Err(invalid(
                "max-overall-mem",
                "at least one partition",
                self.max_overall_mem,
            ));
        }
        Ok(())
    }

    /// Partition size used by the flat allocator.
    ///
    /// Partitions are equal-sized; the upper process-memory bound is used so
    /// every admitted process fits. `mem-per-frame` stays unused here.
    #[must_use]
    pub fn mem_per_proc(&self) -> u64 {
        self.max_mem_per_proc
    }

    /// Number of equal partitions the allocator will manage.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        (self.max_overall_mem / self.mem_per_proc()) as usize
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Unparseable {
        key,
        value: value.to_owned(),
    })
}

fn invalid(
    key: &'static str,
    requirement: &'static str,
    value: impl ToString,
) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        requirement,
        value: value.to_string(),
    }
}
