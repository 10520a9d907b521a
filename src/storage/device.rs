//! Storage engine for a single scull device
//!
//! Combines SegmentList + QuantumAllocator + position translation behind
//! the device's access serializer. Every call transfers at most the span
//! left in one quantum; callers loop for larger transfers.

use super::position::translate;
use super::quantum::QuantumAllocator;
use super::segment::SegmentList;
use super::serializer::{AccessSerializer, Interrupt};
use crate::config::{Sizing, SizingDefaults};
use crate::error::{Error, Result};
use crate::metrics;
use bytes::BufMut;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::MutexGuard;
use tracing::{debug, info, instrument};

/// Mutable state of a device, only reachable through its serializer
#[derive(Debug)]
pub struct DeviceState {
    /// Logical length in bytes
    size: u64,
    /// Layout used by the current chain
    sizing: Sizing,
    chain: SegmentList,
}

impl DeviceState {
    fn new(sizing: Sizing) -> Self {
        Self {
            size: 0,
            sizing,
            chain: SegmentList::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sizing(&self) -> Sizing {
        self.sizing
    }

    pub fn chain(&self) -> &SegmentList {
        &self.chain
    }

    /// Free the chain and adopt `sizing`. Caller must hold the serializer.
    fn trim(&mut self, allocator: &QuantumAllocator, sizing: Sizing) {
        self.chain.free_all(allocator);
        self.size = 0;
        self.sizing = sizing;
    }
}

/// Point-in-time description of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub index: usize,
    pub size: u64,
    pub quantum: usize,
    pub qset: usize,
    pub segments: usize,
    pub quanta: usize,
}

/// One independently addressable storage instance
#[derive(Debug)]
pub struct ScullDevice {
    index: usize,
    label: String,
    state: AccessSerializer<DeviceState>,
    allocator: Arc<QuantumAllocator>,
    defaults: SizingDefaults,
}

impl ScullDevice {
    /// Create an empty device laid out with the current defaults
    pub fn new(index: usize, allocator: Arc<QuantumAllocator>, defaults: SizingDefaults) -> Self {
        let sizing = defaults.get();
        debug!(index, quantum = sizing.quantum, qset = sizing.qset, "Created device");
        Self {
            index,
            label: index.to_string(),
            state: AccessSerializer::new(DeviceState::new(sizing)),
            allocator,
            defaults,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Lock the device state, e.g. for a consistent multi-field view
    pub async fn lock(&self, interrupt: &Interrupt) -> Result<MutexGuard<'_, DeviceState>> {
        self.state.acquire(interrupt).await
    }

    /// Read up to `max_len` bytes at `offset` into `dst`
    ///
    /// Returns 0 at or past the end of the device and for never-written gaps
    /// below the end. Fails with `Error::Transfer` if `dst` cannot take the
    /// bytes that would be copied.
    #[instrument(skip(self, dst, interrupt), fields(device = self.index))]
    pub async fn read<B: BufMut + Send>(
        &self,
        offset: u64,
        max_len: usize,
        dst: &mut B,
        interrupt: &Interrupt,
    ) -> Result<usize> {
        let state = self.state.acquire(interrupt).await?;

        if offset >= state.size {
            return Ok(0);
        }
        let count = (max_len as u64).min(state.size - offset) as usize;

        let Sizing { quantum, qset } = state.sizing;
        let pos = translate(offset, quantum, qset);
        let Some(buffer) = state
            .chain
            .locate(pos.segment)
            .and_then(|segment| segment.quantum(pos.slot))
        else {
            debug!(offset, %pos, "Read landed in an unwritten gap");
            return Ok(0);
        };

        if pos.byte >= buffer.filled() {
            debug!(offset, %pos, "Read past the written part of a quantum");
            return Ok(0);
        }

        let count = count.min(buffer.filled() - pos.byte);
        if dst.remaining_mut() < count {
            return Err(Error::Transfer(format!(
                "Destination holds {} bytes, {} needed",
                dst.remaining_mut(),
                count
            )));
        }
        dst.put_slice(&buffer.as_slice()[pos.byte..pos.byte + count]);

        metrics::BYTES_READ.with_label_values(&[&self.label]).inc_by(count as u64);
        debug!(offset, count, "Read bytes");
        Ok(count)
    }

    /// Write `data` at `offset`, clamped to the end of the target quantum
    ///
    /// Returns the number of bytes stored, which is short whenever `data`
    /// crosses a quantum boundary.
    #[instrument(skip(self, data, interrupt), fields(device = self.index, len = data.len()))]
    pub async fn write(&self, offset: u64, data: &[u8], interrupt: &Interrupt) -> Result<usize> {
        let mut state = self.state.acquire(interrupt).await?;
        let DeviceState { size, sizing, chain } = &mut *state;
        let Sizing { quantum, qset } = *sizing;

        let pos = translate(offset, quantum, qset);
        let buffer = chain
            .locate_or_create(pos.segment, &self.allocator)?
            .quantum_or_allocate(pos.slot, qset, quantum, &self.allocator)?;

        let count = data.len().min(buffer.len() - pos.byte);
        buffer.store(pos.byte, &data[..count]);

        let end = offset.saturating_add(count as u64);
        if end > *size {
            *size = end;
        }

        metrics::BYTES_WRITTEN.with_label_values(&[&self.label]).inc_by(count as u64);
        debug!(offset, count, size = *size, "Wrote bytes");
        Ok(count)
    }

    /// Free all content and pick up the current sizing defaults
    #[instrument(skip(self, interrupt), fields(device = self.index))]
    pub async fn trim(&self, interrupt: &Interrupt) -> Result<()> {
        let mut state = self.state.acquire(interrupt).await?;
        self.trim_locked(&mut state);
        Ok(())
    }

    /// Trim without honoring interrupts (teardown path)
    pub async fn trim_uninterruptible(&self) {
        let mut state = self.state.acquire_uninterruptible().await;
        self.trim_locked(&mut state);
    }

    fn trim_locked(&self, state: &mut DeviceState) {
        let sizing = self.defaults.get();
        state.trim(&self.allocator, sizing);
        metrics::TRIMS.with_label_values(&[&self.label]).inc();
        info!(
            device = self.index,
            quantum = sizing.quantum,
            qset = sizing.qset,
            "Device trimmed"
        );
    }

    /// Current logical length
    pub async fn size(&self, interrupt: &Interrupt) -> Result<u64> {
        Ok(self.state.acquire(interrupt).await?.size)
    }

    /// Snapshot of size, sizing and allocation counts
    pub async fn stats(&self, interrupt: &Interrupt) -> Result<DeviceStats> {
        let state = self.state.acquire(interrupt).await?;
        let quanta = state
            .chain
            .iter()
            .filter_map(|(_, segment)| segment.slots())
            .map(|slots| slots.iter().filter(|slot| slot.is_some()).count())
            .sum();

        Ok(DeviceStats {
            index: self.index,
            size: state.size,
            quantum: state.sizing.quantum,
            qset: state.sizing.qset,
            segments: state.chain.len(),
            quanta,
        })
    }
}

impl Drop for ScullDevice {
    fn drop(&mut self) {
        let allocator = self.allocator.clone();
        self.state.get_mut().chain.free_all(&allocator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::segment::{segment_cost, slot_array_cost};
    use bytes::BytesMut;

    fn device(quantum: usize, qset: usize) -> ScullDevice {
        ScullDevice::new(
            0,
            Arc::new(QuantumAllocator::unbounded()),
            SizingDefaults::new(Sizing { quantum, qset }),
        )
    }

    async fn read_vec(dev: &ScullDevice, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        dev.read(offset, len, &mut buf, &Interrupt::new()).await?;
        Ok(buf.to_vec())
    }

    #[tokio::test]
    async fn test_write_then_read_small_layout() -> Result<()> {
        let dev = device(4, 2);
        let intr = Interrupt::new();

        // First call stops at the quantum boundary
        assert_eq!(dev.write(0, b"ABCDEF", &intr).await?, 4);
        assert_eq!(dev.write(4, b"EF", &intr).await?, 2);
        assert_eq!(dev.size(&intr).await?, 6);

        assert_eq!(read_vec(&dev, 0, 6).await?, b"ABCD");
        assert_eq!(read_vec(&dev, 4, 6).await?, b"EF");
        assert_eq!(read_vec(&dev, 6, 2).await?, b"");

        let stats = dev.stats(&intr).await?;
        assert_eq!(stats.segments, 1);
        assert_eq!(stats.quanta, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_sparse_gap_reads_nothing() -> Result<()> {
        let dev = device(4, 2);
        let intr = Interrupt::new();

        dev.write(0, b"ABCD", &intr).await?;
        dev.write(4, b"EF", &intr).await?;
        assert_eq!(dev.write(8, b"WXYZ", &intr).await?, 4);
        assert_eq!(dev.size(&intr).await?, 12);
        assert_eq!(dev.stats(&intr).await?.segments, 2);

        // Offsets 6..8 sit inside the size but were never written
        assert!(read_vec(&dev, 6, 2).await?.is_empty());
        assert_eq!(read_vec(&dev, 8, 4).await?, b"WXYZ");

        // A slot that was never allocated reads as nothing at all
        let dev = device(4, 4);
        dev.write(0, b"AB", &intr).await?;
        dev.write(12, b"CD", &intr).await?;
        assert_eq!(dev.size(&intr).await?, 14);
        assert!(read_vec(&dev, 4, 4).await?.is_empty());
        assert_eq!(read_vec(&dev, 12, 4).await?, b"CD");

        // Holes below the furthest written byte of a quantum read as zeros
        let dev = device(8, 1);
        dev.write(4, b"ZZ", &intr).await?;
        assert_eq!(read_vec(&dev, 0, 8).await?, vec![0, 0, 0, 0, b'Z', b'Z']);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_clamps_to_size_and_quantum() -> Result<()> {
        let dev = device(8, 2);
        let intr = Interrupt::new();

        dev.write(0, b"01234567", &intr).await?;
        dev.write(8, b"89", &intr).await?;

        assert_eq!(read_vec(&dev, 6, 100).await?, b"67");
        assert_eq!(read_vec(&dev, 8, 100).await?, b"89");
        assert_eq!(read_vec(&dev, 100, 4).await?, b"");
        Ok(())
    }

    #[tokio::test]
    async fn test_read_into_small_destination_fails() -> Result<()> {
        let dev = device(8, 2);
        let intr = Interrupt::new();
        dev.write(0, b"abcdefgh", &intr).await?;

        let mut storage = [0u8; 2];
        let mut dst: &mut [u8] = &mut storage;
        let err = dev.read(0, 8, &mut dst, &intr).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_size_never_decreases_on_write() -> Result<()> {
        let dev = device(4, 4);
        let intr = Interrupt::new();

        dev.write(8, b"xy", &intr).await?;
        assert_eq!(dev.size(&intr).await?, 10);
        dev.write(0, b"ab", &intr).await?;
        assert_eq!(dev.size(&intr).await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_trim_resets_to_current_defaults() -> Result<()> {
        let defaults = SizingDefaults::new(Sizing { quantum: 4, qset: 2 });
        let allocator = Arc::new(QuantumAllocator::unbounded());
        let dev = ScullDevice::new(1, allocator.clone(), defaults.clone());
        let intr = Interrupt::new();

        dev.write(0, b"data", &intr).await?;
        dev.write(20, b"more", &intr).await?;
        assert!(allocator.stats().live_bytes > 0);

        defaults.replace_quantum(16)?;
        // Existing layout is untouched until the next trim
        assert_eq!(dev.stats(&intr).await?.quantum, 4);

        dev.trim(&intr).await?;
        let stats = dev.stats(&intr).await?;
        assert_eq!(stats.size, 0);
        assert_eq!(stats.segments, 0);
        assert_eq!(stats.quantum, 16);
        assert_eq!(stats.qset, 2);
        assert_eq!(allocator.stats().live_bytes, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_allocation_failure_leaves_size() -> Result<()> {
        let budget = segment_cost() + slot_array_cost(2) + 4;
        let dev = ScullDevice::new(
            0,
            Arc::new(QuantumAllocator::new(Some(budget))),
            SizingDefaults::new(Sizing { quantum: 4, qset: 2 }),
        );
        let intr = Interrupt::new();

        dev.write(0, b"ABCD", &intr).await?;
        let err = dev.write(4, b"EF", &intr).await.unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
        assert_eq!(dev.size(&intr).await?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_far_write_fails_within_budget() -> Result<()> {
        let allocator = Arc::new(QuantumAllocator::new(Some(8)));
        let dev = ScullDevice::new(
            0,
            allocator.clone(),
            SizingDefaults::new(Sizing { quantum: 4, qset: 2 }),
        );
        let intr = Interrupt::new();

        let err = dev.write(40_000_000, b"abcd", &intr).await.unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
        assert_eq!(dev.size(&intr).await?, 0);
        assert!(allocator.stats().charged_bytes <= 8);
        assert!(dev.stats(&intr).await?.segments <= 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_length_write_extends_size() -> Result<()> {
        let allocator = Arc::new(QuantumAllocator::unbounded());
        let dev = ScullDevice::new(
            0,
            allocator.clone(),
            SizingDefaults::new(Sizing { quantum: 4, qset: 2 }),
        );
        let intr = Interrupt::new();

        assert_eq!(dev.write(100, b"", &intr).await?, 0);
        let stats = dev.stats(&intr).await?;
        assert_eq!(stats.size, 100);
        assert_eq!(stats.quanta, 1);
        assert_eq!(allocator.stats().live_quanta, 1);

        // Nothing was stored there
        assert!(read_vec(&dev, 96, 4).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_releases_quanta() -> Result<()> {
        let allocator = Arc::new(QuantumAllocator::unbounded());
        {
            let dev = ScullDevice::new(0, allocator.clone(), SizingDefaults::default());
            dev.write(0, b"hello", &Interrupt::new()).await?;
            assert_eq!(allocator.stats().live_quanta, 1);
        }
        assert_eq!(allocator.stats().live_quanta, 0);
        Ok(())
    }
}
