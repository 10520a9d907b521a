//! Segment chain ("qset list")
//!
//! # Architecture
//!
//! ```text
//! SegmentList
//!   head ─→ Segment#0 ─→ Segment#1 ─→ Segment#2 ─→ (tail)
//!             │             │             │
//!             ▼             ▼             ▼
//!          [q, q, -]      (unset)      [-, q, -]
//! ```
//!
//! Segments live in an arena and link to their successor by index. Each
//! segment's slot array is allocated on first write into it, and each slot
//! owns at most one quantum. Segment nodes and slot arrays are charged to
//! the allocator's budget just like quanta.

use super::quantum::{Quantum, QuantumAllocator};
use crate::error::{Error, Result};
use std::mem;
use tracing::debug;

/// Arena index of a segment
pub type SegmentId = usize;

/// Budget charge for one segment node
pub fn segment_cost() -> u64 {
    mem::size_of::<Segment>() as u64
}

/// Budget charge for a slot array of `qset` entries
pub fn slot_array_cost(qset: usize) -> u64 {
    (qset as u64).saturating_mul(mem::size_of::<Option<Quantum>>() as u64)
}

/// One node in the segment chain
#[derive(Debug, Default)]
pub struct Segment {
    /// Quantum ownership slots (None until first written)
    slots: Option<Vec<Option<Quantum>>>,
    /// Successor in the chain
    next: Option<SegmentId>,
}

impl Segment {
    pub fn next(&self) -> Option<SegmentId> {
        self.next
    }

    pub fn is_tail(&self) -> bool {
        self.next.is_none()
    }

    /// Slot array, if any slot in this segment was ever written
    pub fn slots(&self) -> Option<&[Option<Quantum>]> {
        self.slots.as_deref()
    }

    /// Quantum at `slot`, if allocated
    pub fn quantum(&self, slot: usize) -> Option<&Quantum> {
        self.slots.as_ref()?.get(slot)?.as_ref()
    }

    /// Quantum at `slot`, materializing the slot array and the quantum if
    /// they do not exist yet
    pub fn quantum_or_allocate(
        &mut self,
        slot: usize,
        qset: usize,
        quantum_size: usize,
        allocator: &QuantumAllocator,
    ) -> Result<&mut Quantum> {
        if self.slots.is_none() {
            let cost = slot_array_cost(qset);
            allocator.charge(cost)?;
            let mut slots = Vec::new();
            if slots.try_reserve_exact(qset).is_err() {
                allocator.discharge(cost);
                return Err(Error::Allocation(format!(
                    "Out of memory allocating {}-slot array",
                    qset
                )));
            }
            slots.resize_with(qset, || None);
            self.slots = Some(slots);
        }

        let entry = self
            .slots
            .as_mut()
            .and_then(|slots| slots.get_mut(slot))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("Slot {} outside a {}-slot segment", slot, qset))
            })?;

        if entry.is_none() {
            *entry = Some(allocator.allocate(quantum_size)?);
        }
        entry
            .as_mut()
            .ok_or_else(|| Error::Allocation("Quantum missing after allocation".to_string()))
    }

    fn release(&mut self, allocator: &QuantumAllocator) {
        if let Some(slots) = self.slots.take() {
            allocator.discharge(slot_array_cost(slots.len()));
            for quantum in slots.into_iter().flatten() {
                allocator.free(quantum);
            }
        }
    }
}

/// Singly-linked chain of segments backed by an arena
#[derive(Debug, Default)]
pub struct SegmentList {
    arena: Vec<Segment>,
    head: Option<SegmentId>,
}

impl SegmentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments in the chain
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Walk to the `index`-th segment without creating anything
    pub fn locate(&self, index: usize) -> Option<&Segment> {
        let mut current = self.head?;
        for _ in 0..index {
            current = self.arena[current].next?;
        }
        Some(&self.arena[current])
    }

    /// Walk to the `index`-th segment, appending empty segments as needed
    ///
    /// Segments appended before an allocation failure stay in the chain.
    pub fn locate_or_create(
        &mut self,
        index: usize,
        allocator: &QuantumAllocator,
    ) -> Result<&mut Segment> {
        let mut current = match self.head {
            Some(id) => id,
            None => {
                let id = self.push(allocator)?;
                self.head = Some(id);
                id
            }
        };

        for _ in 0..index {
            current = match self.arena[current].next {
                Some(next) => next,
                None => {
                    let next = self.push(allocator)?;
                    self.arena[current].next = Some(next);
                    next
                }
            };
        }

        Ok(&mut self.arena[current])
    }

    fn push(&mut self, allocator: &QuantumAllocator) -> Result<SegmentId> {
        allocator.charge(segment_cost())?;
        if self.arena.try_reserve(1).is_err() {
            allocator.discharge(segment_cost());
            return Err(Error::Allocation("Out of memory allocating segment".to_string()));
        }
        self.arena.push(Segment::default());
        let id = self.arena.len() - 1;
        debug!(segment = id, "Created segment");
        Ok(id)
    }

    /// Iterate segments in chain order
    pub fn iter(&self) -> SegmentIter<'_> {
        SegmentIter {
            list: self,
            current: self.head,
        }
    }

    /// Release every quantum, then every segment
    pub fn free_all(&mut self, allocator: &QuantumAllocator) {
        if self.is_empty() {
            return;
        }
        let segments = self.arena.len();
        for segment in &mut self.arena {
            segment.release(allocator);
            allocator.discharge(segment_cost());
        }
        self.arena.clear();
        self.head = None;
        debug!(segments, "Freed segment chain");
    }
}

/// Chain-order iterator yielding each segment with its arena id
pub struct SegmentIter<'a> {
    list: &'a SegmentList,
    current: Option<SegmentId>,
}

impl<'a> Iterator for SegmentIter<'a> {
    type Item = (SegmentId, &'a Segment);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let segment = &self.list.arena[id];
        self.current = segment.next;
        Some((id, segment))
    }
}
