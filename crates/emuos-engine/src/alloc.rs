//! Flat first-fit memory allocator.
//!
//! Main memory is divided into equal partitions of `mem_per_proc` bytes; a
//! process occupies at most one partition, and admission to a core is gated
//! on holding one. The partition table is internally synchronized, so every
//! operation is atomic with respect to the others.

use crate::process::{Lifecycle, Process};
use emuos::stamp;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct Partition {
    slot: usize,
    owner: Option<Arc<Process>>,
}

/// Equal-partition first-fit allocator with a textual memory-map artifact.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use emuos_engine::alloc::FlatAllocator;
/// use emuos_engine::process::Process;
///
/// let allocator = FlatAllocator::new(1024, 512, "Memory_Logs");
/// let p = Arc::new(Process::new("p01", 512));
///
/// assert!(allocator.allocate(&p));
/// assert!(!allocator.allocate(&p), "admission is idempotent");
/// assert_eq!(allocator.fragmentation(), 512);
///
/// allocator.deallocate(&p);
/// assert!(!allocator.is_allocated(&p));
/// ```
#[derive(Debug)]
pub struct FlatAllocator {
    partitions: Mutex<Vec<Partition>>,
    max_overall_mem: u64,
    mem_per_proc: u64,
    log_dir: PathBuf,
}

impl FlatAllocator {
    /// Create an allocator with `max_overall_mem / mem_per_proc` partitions.
    ///
    /// Memory-map artifacts are written under `log_dir`.
    #[must_use]
    pub fn new(max_overall_mem: u64, mem_per_proc: u64, log_dir: impl Into<PathBuf>) -> Self {
        let count = (max_overall_mem / mem_per_proc) as usize;
        let partitions = (0..count).map(|slot| Partition { slot, owner: None }).collect();
        Self {
            partitions: Mutex::new(partitions),
            max_overall_mem,
            mem_per_proc,
            log_dir: log_dir.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Partition>> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `process` into the first free partition, scanning low to high.
    ///
    /// Returns `false` when the process already holds a partition or no
    /// partition is free.
    pub fn allocate(&self, process: &Arc<Process>) -> bool {
        let mut partitions = self.lock();
        if partitions
            .iter()
            .any(|p| p.owner.as_ref().is_some_and(|o| Arc::ptr_eq(o, process)))
        {
            return false;
        }
        match partitions.iter_mut().find(|p| p.owner.is_none()) {
            Some(free) => {
                free.owner = Some(Arc::clone(process));
                true
            }
            None => false,
        }
    }

    /// Free every partition owned by `process`. A no-op when it owns none.
    pub fn deallocate(&self, process: &Arc<Process>) {
        for partition in self.lock().iter_mut() {
            if partition.owner.as_ref().is_some_and(|o| Arc::ptr_eq(o, process)) {
                partition.owner = None;
            }
        }
    }

    #[must_use]
    pub fn is_allocated(&self, process: &Arc<Process>) -> bool {
        self.lock()
            .iter()
            .any(|p| p.owner.as_ref().is_some_and(|o| Arc::ptr_eq(o, process)))
    }

    /// Number of occupied partitions.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.lock().iter().filter(|p| p.owner.is_some()).count()
    }

    /// Total number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.lock().len()
    }

    /// Sum of free-partition sizes.
    #[must_use]
    pub fn fragmentation(&self) -> u64 {
        let free = self.lock().iter().filter(|p| p.owner.is_none()).count();
        free as u64 * self.mem_per_proc
    }

    /// Directory receiving `memory_stamp_<N>.txt` artifacts.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Write the current memory map to `<log_dir>/memory_stamp_<counter>.txt`
    /// and return the path.
    ///
    /// The map lists occupied partitions from the top of memory down; a
    /// sleeping owner is marked with a trailing `*`.
    pub fn snapshot(&self, counter: u64) -> io::Result<PathBuf> {
        let mut buffer = String::new();
        {
            let partitions = self.lock();
            let occupied = partitions.iter().filter(|p| p.owner.is_some()).count();
            let free = partitions.len() - occupied;

            let _ = writeln!(buffer, "Timestamp: {}", stamp::now());
            let _ = writeln!(buffer, "Number of processes in memory: {occupied}");
            let _ = writeln!(
                buffer,
                "Total external fragmentation in KB: {}",
                free as u64 * self.mem_per_proc
            );
            let _ = writeln!(buffer, "----end---- = {}", self.max_overall_mem);

            for partition in partitions.iter() {
                let upper = self.max_overall_mem - partition.slot as u64 * self.mem_per_proc;
                let lower = upper - self.mem_per_proc;
                if let Some(owner) = &partition.owner {
                    let marker = if owner.state() == Lifecycle::Waiting {
                        " *"
                    } else {
                        ""
                    };
                    let _ = writeln!(buffer, "{upper}");
                    let _ = writeln!(buffer, "{}{marker}", owner.name());
                    let _ = writeln!(buffer, "{lower}\n");
                }
            }
            let _ = writeln!(buffer, "----start---- = 0");
        }

        fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(format!("memory_stamp_{counter}.txt"));
        fs::write(&path, buffer)?;
        Ok(path)
    }
}
