//! Storage layer
//!
//! # Architecture
//!
//! A device's content is a chain of segments, each referencing `qset`
//! quanta of `quantum` bytes:
//!
//! ```text
//! ScullDevice (size, quantum, qset, serializer)
//!   └─→ SegmentList
//!        ├─→ Segment#0 → [Quantum, Quantum, ..., -]
//!        ├─→ Segment#1 → (slot array not yet allocated)
//!        └─→ Segment#2 → [-, Quantum, ..., -]
//! ```
//!
//! Byte offsets are split into (segment, slot, byte) by [`translate`].
//! Segments, slot arrays and quanta are allocated on first write and only
//! released by a trim.

pub mod device;
pub mod file;
pub mod position;
pub mod quantum;
pub mod registry;
pub mod segment;
pub mod serializer;

pub use device::{DeviceState, DeviceStats, ScullDevice};
pub use file::{OpenMode, ScullFile};
pub use position::{translate, Position};
pub use quantum::{AllocatorStats, Quantum, QuantumAllocator, QuantumId};
pub use registry::ScullDevices;
pub use segment::{segment_cost, slot_array_cost, Segment, SegmentId, SegmentList};
pub use serializer::{AccessSerializer, Interrupt};
