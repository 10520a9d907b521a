// Scull - Rust Implementation
// A quantum-segmented in-memory character device

#![warn(rust_2018_idioms)]

pub mod config;
pub mod control;
pub mod metrics;
pub mod report;
pub mod storage;

// Re-exports for convenience
pub use config::{ScullSettings, Sizing, SizingDefaults};
pub use control::{Caller, Command, Permission, RawCommand};
pub use report::{report, ReportReader};
pub use storage::{Interrupt, OpenMode, ScullDevice, ScullDevices, ScullFile};

/// Scull error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Allocation failed: {0}")]
        Allocation(String),

        #[error("Transfer failed: {0}")]
        Transfer(String),

        #[error("Interrupted while waiting for device")]
        Interrupted,

        #[error("Unsupported operation: {0}")]
        Unsupported(String),

        #[error("Permission denied: {0}")]
        PermissionDenied(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("No such device: {0}")]
        NoDevice(usize),

        #[error("Bad file mode: {0}")]
        BadMode(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        /// Negative errno a character device would hand back for this error
        pub fn errno(&self) -> i32 {
            match self {
                Error::Allocation(_) => -12,
                Error::Transfer(_) => -14,
                Error::Interrupted => -512,
                Error::Unsupported(_) => -25,
                Error::PermissionDenied(_) => -1,
                Error::InvalidArgument(_) | Error::Config(_) => -22,
                Error::NoDevice(_) => -19,
                Error::BadMode(_) => -9,
            }
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
