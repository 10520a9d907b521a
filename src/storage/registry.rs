//! The fixed set of devices created at startup

use super::device::{DeviceStats, ScullDevice};
use super::file::{OpenMode, ScullFile};
use super::quantum::{AllocatorStats, QuantumAllocator};
use super::serializer::Interrupt;
use crate::config::{ScullSettings, SizingDefaults};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// All scull devices plus the state they share
#[derive(Debug)]
pub struct ScullDevices {
    devices: Vec<Arc<ScullDevice>>,
    allocator: Arc<QuantumAllocator>,
    defaults: SizingDefaults,
}

impl ScullDevices {
    /// Create `settings.nr_devs` empty devices
    pub fn new(settings: &ScullSettings) -> Result<Self> {
        settings.validate()?;
        let devices = Self::build(settings);
        info!(
            nr_devs = settings.nr_devs,
            quantum = settings.quantum,
            qset = settings.qset,
            "scull: initialized"
        );
        Ok(devices)
    }

    /// Create devices with the built-in settings
    pub fn with_defaults() -> Self {
        Self::build(&ScullSettings::default())
    }

    fn build(settings: &ScullSettings) -> Self {
        let allocator = Arc::new(QuantumAllocator::new(settings.memory_limit));
        let defaults = SizingDefaults::from_settings(settings);
        let devices = (0..settings.nr_devs)
            .map(|index| Arc::new(ScullDevice::new(index, allocator.clone(), defaults.clone())))
            .collect();
        Self {
            devices,
            allocator,
            defaults,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Arc<ScullDevice>> {
        self.devices.get(index).ok_or(Error::NoDevice(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ScullDevice>> {
        self.devices.iter()
    }

    /// Sizing defaults shared with the control interface
    pub fn defaults(&self) -> &SizingDefaults {
        &self.defaults
    }

    pub fn allocator_stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }

    /// Open device `index` for sequential access
    pub async fn open(&self, index: usize, mode: OpenMode, interrupt: &Interrupt) -> Result<ScullFile> {
        let device = self.get(index)?.clone();
        ScullFile::open(device, mode, interrupt.clone()).await
    }

    /// Stats for every device, in index order
    pub async fn stats(&self, interrupt: &Interrupt) -> Result<Vec<DeviceStats>> {
        let mut all = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            all.push(device.stats(interrupt).await?);
        }
        Ok(all)
    }

    /// Release every device's storage (module teardown)
    pub async fn shutdown(&self) {
        info!("scull: uninitializing ...");
        for device in &self.devices {
            device.trim_uninterruptible().await;
        }
        info!("scull: uninitialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_settings() -> ScullSettings {
        ScullSettings {
            nr_devs: 2,
            quantum: 4,
            qset: 2,
            memory_limit: None,
        }
    }

    #[tokio::test]
    async fn test_devices_created() -> Result<()> {
        let devices = ScullDevices::new(&small_settings())?;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices.get(1)?.index(), 1);
        assert_eq!(devices.get(2).unwrap_err(), Error::NoDevice(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_devices_are_independent() -> Result<()> {
        let devices = ScullDevices::new(&small_settings())?;
        let intr = Interrupt::new();

        let mut a = devices.open(0, OpenMode::ReadWrite, &intr).await?;
        a.write_all(b"first").await?;
        let mut b = devices.open(1, OpenMode::ReadWrite, &intr).await?;
        b.write_all(b"xy").await?;

        let stats = devices.stats(&intr).await?;
        assert_eq!(stats[0].size, 5);
        assert_eq!(stats[1].size, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_frees_all() -> Result<()> {
        let devices = ScullDevices::new(&small_settings())?;
        let intr = Interrupt::new();
        for index in 0..devices.len() {
            let mut file = devices.open(index, OpenMode::ReadWrite, &intr).await?;
            file.write_all(b"payload").await?;
        }
        assert!(devices.allocator_stats().live_bytes > 0);

        devices.shutdown().await;
        assert_eq!(devices.allocator_stats().live_bytes, 0);
        for stats in devices.stats(&intr).await? {
            assert_eq!(stats.size, 0);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = ScullSettings {
            nr_devs: 0,
            ..small_settings()
        };
        assert!(matches!(ScullDevices::new(&settings), Err(Error::Config(_))));
    }
}
