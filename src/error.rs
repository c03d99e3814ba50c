//! Error types for the dump subsystem

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for exception capture and ring-buffer decoding
#[derive(Error, Debug)]
pub enum DumpError {
    /// A device driver call failed
    #[error("Driver error: {0}")]
    Driver(String),

    /// Device address could not be read
    #[error("Invalid device address {addr:#x} ({size} bytes)")]
    InvalidAddress {
        /// Device address
        addr: u64,
        /// Requested byte count
        size: u64,
    },

    /// Host staging memory could not be allocated
    #[error("Host memory allocation of {size} bytes failed")]
    HostAlloc {
        /// Requested byte count
        size: u64,
    },

    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Dump file was not opened before writing
    #[error("Dump file is not open: {0}")]
    FileNotOpen(PathBuf),

    /// Header encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Ring-buffer control block failed validation
    #[error("Invalid ring buffer control block: {0}")]
    InvalidControlBlock(String),

    /// Ring buffer holds no pending records
    #[error("Ring buffer has no data")]
    NoData,

    /// Requested entity was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Kernel object collection failed
    #[error("Kernel file error: {0}")]
    KernelFile(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation is not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for dump operations
pub type Result<T> = std::result::Result<T, DumpError>;

impl DumpError {
    /// Create a driver error from a status code
    pub fn from_driver_status(op: &str, code: i32) -> Self {
        Self::Driver(format!("{} failed with status {}", op, code))
    }

    /// Check if the pipeline can continue with degraded data
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            Self::InvalidAddress { .. } |
            Self::NoData |
            Self::NotFound(_)
        )
    }

    /// Check if this error aborts only the current dump attempt
    pub fn is_local_abort(&self) -> bool {
        matches!(self,
            Self::Io(_) |
            Self::FileNotOpen(_) |
            Self::Serialize(_) |
            Self::InvalidControlBlock(_)
        )
    }

    /// Check if no further fallback exists for this device
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HostAlloc { .. })
    }
}
