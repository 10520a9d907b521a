//! Device settings and runtime sizing defaults
//!
//! `ScullSettings` is the static configuration read at startup (file + env).
//! `SizingDefaults` is the live, process-wide quantum/qset pair that the
//! control interface mutates and that `trim` copies into a device.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of devices created at startup
pub const SCULL_NR_DEVS: usize = 4;
/// Built-in bytes per quantum
pub const SCULL_QUANTUM: usize = 4000;
/// Built-in quanta per segment
pub const SCULL_QSET: usize = 1000;

/// Startup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScullSettings {
    /// Number of devices
    pub nr_devs: usize,
    /// Initial quantum size in bytes
    pub quantum: usize,
    /// Initial quanta per segment
    pub qset: usize,
    /// Upper bound on live quantum bytes across all devices
    pub memory_limit: Option<u64>,
}

impl Default for ScullSettings {
    fn default() -> Self {
        Self {
            nr_devs: SCULL_NR_DEVS,
            quantum: SCULL_QUANTUM,
            qset: SCULL_QSET,
            memory_limit: None,
        }
    }
}

impl ScullSettings {
    /// Load settings from an optional TOML file, overridden by `SCULL_*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix("SCULL").try_parsing(true));

        let settings: ScullSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load settings: {}", e)))?;

        settings.validate()?;
        info!(
            nr_devs = settings.nr_devs,
            quantum = settings.quantum,
            qset = settings.qset,
            "Loaded scull settings"
        );
        Ok(settings)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: ScullSettings = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render the effective settings as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to render settings: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.nr_devs == 0 {
            return Err(Error::Config("nr_devs must be positive".to_string()));
        }
        if self.quantum == 0 || self.qset == 0 {
            return Err(Error::Config(format!(
                "quantum ({}) and qset ({}) must be positive",
                self.quantum, self.qset
            )));
        }
        let sizing = Sizing {
            quantum: self.quantum,
            qset: self.qset,
        };
        if sizing.item_size().is_none() {
            return Err(Error::Config(format!(
                "quantum ({}) times qset ({}) overflows a device offset",
                self.quantum, self.qset
            )));
        }
        Ok(())
    }
}

/// Quantum size and segment width used to lay out a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sizing {
    pub quantum: usize,
    pub qset: usize,
}

impl Sizing {
    /// Bytes covered by one segment, if the pair is addressable
    pub fn item_size(&self) -> Option<u64> {
        let quantum = u64::try_from(self.quantum).ok()?;
        let qset = u64::try_from(self.qset).ok()?;
        quantum.checked_mul(qset)
    }

    fn check(&self) -> Result<()> {
        self.item_size().map(|_| ()).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "quantum {} times qset {} overflows a device offset",
                self.quantum, self.qset
            ))
        })
    }
}

impl Default for Sizing {
    fn default() -> Self {
        Self {
            quantum: SCULL_QUANTUM,
            qset: SCULL_QSET,
        }
    }
}

/// Shared, lock-protected sizing defaults
///
/// Reads and writes of the pair never tear. Read-modify-write sequences done
/// by separate callers are last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct SizingDefaults {
    inner: Arc<RwLock<Sizing>>,
}

impl SizingDefaults {
    pub fn new(sizing: Sizing) -> Self {
        Self {
            inner: Arc::new(RwLock::new(sizing)),
        }
    }

    pub fn from_settings(settings: &ScullSettings) -> Self {
        Self::new(Sizing {
            quantum: settings.quantum,
            qset: settings.qset,
        })
    }

    /// Snapshot of the current defaults
    pub fn get(&self) -> Sizing {
        *self.inner.read()
    }

    pub fn quantum(&self) -> usize {
        self.inner.read().quantum
    }

    pub fn qset(&self) -> usize {
        self.inner.read().qset
    }

    /// Replace the quantum default, returning the previous value
    ///
    /// Rejected, leaving the defaults as they were, if the new quantum and
    /// the current qset cannot address a segment.
    pub fn replace_quantum(&self, quantum: usize) -> Result<usize> {
        let mut sizing = self.inner.write();
        Sizing { quantum, ..*sizing }.check()?;
        debug!(old = sizing.quantum, new = quantum, "Quantum default changed");
        Ok(std::mem::replace(&mut sizing.quantum, quantum))
    }

    /// Replace the qset default, returning the previous value
    pub fn replace_qset(&self, qset: usize) -> Result<usize> {
        let mut sizing = self.inner.write();
        Sizing { qset, ..*sizing }.check()?;
        debug!(old = sizing.qset, new = qset, "Qset default changed");
        Ok(std::mem::replace(&mut sizing.qset, qset))
    }

    /// Restore the built-in constants
    pub fn reset(&self) {
        *self.inner.write() = Sizing::default();
    }
}
