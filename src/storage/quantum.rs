//! Quantum allocator
//!
//! Hands out fixed-size byte buffers ("quanta") and keeps the bookkeeping
//! needed to enforce an optional memory budget shared by every device.

use crate::error::{Error, Result};
use crate::metrics;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Identity of an allocated quantum, stable for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuantumId(u64);

impl QuantumId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for QuantumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q#{:08x}", self.0)
    }
}

/// One quantum buffer, exclusively owned by a single slot
#[derive(Debug)]
pub struct Quantum {
    id: QuantumId,
    data: Box<[u8]>,
    /// End of the furthest byte ever stored
    filled: usize,
}

impl Quantum {
    pub fn id(&self) -> QuantumId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Length of the prefix that reads may observe
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Copy `src` in at byte `at`, extending the filled prefix
    pub fn store(&mut self, at: usize, src: &[u8]) {
        let end = at + src.len();
        self.data[at..end].copy_from_slice(src);
        self.filled = self.filled.max(end);
    }
}

/// Allocator for quantum buffers
///
/// Shared by all devices. Everything a device chain holds, quanta as well as
/// segment nodes and slot arrays, is charged against `memory_limit`; a
/// failed allocation is never retried.
#[derive(Debug)]
pub struct QuantumAllocator {
    /// Budget for charged bytes (None = unbounded)
    memory_limit: Option<u64>,
    /// Bytes counted against the budget
    charged: AtomicU64,
    /// Bytes currently held by live quanta
    live_bytes: AtomicU64,
    /// Number of live quanta
    live_quanta: AtomicU64,
    /// Next quantum identity
    next_id: AtomicU64,
}

impl QuantumAllocator {
    /// Create a new allocator, optionally bounded by `memory_limit` bytes
    pub fn new(memory_limit: Option<u64>) -> Self {
        Self {
            memory_limit,
            charged: AtomicU64::new(0),
            live_bytes: AtomicU64::new(0),
            live_quanta: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Allocate a quantum of `size` bytes
    pub fn allocate(&self, size: usize) -> Result<Quantum> {
        self.reserve_budget(size as u64)?;

        let mut data = Vec::new();
        if data.try_reserve_exact(size).is_err() {
            self.release_budget(size as u64);
            warn!(size, "Quantum allocation failed");
            return Err(Error::Allocation(format!(
                "Out of memory allocating {}-byte quantum",
                size
            )));
        }
        data.resize(size, 0);

        self.live_bytes.fetch_add(size as u64, Ordering::AcqRel);
        let id = QuantumId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.live_quanta.fetch_add(1, Ordering::Relaxed);
        metrics::QUANTUM_BYTES.add(size as i64);
        debug!(%id, size, "Allocated quantum");

        Ok(Quantum {
            id,
            data: data.into_boxed_slice(),
            filled: 0,
        })
    }

    /// Release a quantum back to the allocator
    pub fn free(&self, quantum: Quantum) {
        let size = quantum.len() as u64;
        self.release_budget(size);
        self.live_bytes.fetch_sub(size, Ordering::AcqRel);
        self.live_quanta.fetch_sub(1, Ordering::Relaxed);
        metrics::QUANTUM_BYTES.sub(size as i64);
        debug!(id = %quantum.id, size, "Freed quantum");
    }

    /// Charge chain bookkeeping (segment nodes, slot arrays) to the budget
    pub fn charge(&self, bytes: u64) -> Result<()> {
        self.reserve_budget(bytes)
    }

    /// Return bytes taken by `charge`
    pub fn discharge(&self, bytes: u64) {
        self.release_budget(bytes);
    }

    fn reserve_budget(&self, size: u64) -> Result<()> {
        let Some(limit) = self.memory_limit else {
            self.charged.fetch_add(size, Ordering::AcqRel);
            return Ok(());
        };

        self.charged
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |charged| {
                charged.checked_add(size).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|charged| {
                warn!(size, charged, limit, "Allocation exceeds memory limit");
                Error::Allocation(format!(
                    "Memory limit of {} bytes reached ({} in use, {} requested)",
                    limit, charged, size
                ))
            })
    }

    fn release_budget(&self, size: u64) {
        self.charged.fetch_sub(size, Ordering::AcqRel);
    }

    /// Get statistics about the allocator
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            charged_bytes: self.charged.load(Ordering::Acquire),
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            live_quanta: self.live_quanta.load(Ordering::Relaxed),
            memory_limit: self.memory_limit,
        }
    }
}

impl Default for QuantumAllocator {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Statistics for the quantum allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Quanta plus chain bookkeeping, as counted against the limit
    pub charged_bytes: u64,
    pub live_bytes: u64,
    pub live_quanta: u64,
    pub memory_limit: Option<u64>,
}
