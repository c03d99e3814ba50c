//! npu-dump - exception dump capture for AI accelerator runtimes
//!
//! When a device kernel faults, this crate correlates the hardware error
//! record with the captured operator, stages its tensors from device memory
//! and writes a self-describing dump file. It also owns the per-device error
//! ring buffer the scheduler reports faults through, and decodes its records
//! into diagnostics.

#![warn(missing_docs)]

/// Error handling and result types
pub mod error;
/// Dump and ring buffer configuration
pub mod config;
/// Scope guards and device memory staging
pub mod core;
/// Device driver seam and an in-process simulator
pub mod driver;
/// In-flight task bookkeeping
pub mod task;
/// Operator capture and the dump file format
pub mod dump;
/// Device error ring buffer decoding
pub mod ringbuf;
/// Exception dump orchestration
pub mod manager;

pub use config::{DumpConfig, DumpMode, Platform};
pub use driver::{DeviceAddr, DeviceDriver, Feature};
pub use dump::{DumpFile, DumpFileReader, DumpHeader, DumpOperator, ExceptionArgs, OpIdentity, OperatorInfo};
pub use error::{DumpError, Result};
pub use manager::{DumpManager, DumpState, ExceptionInfo};
pub use ringbuf::{DeviceErrorProc, DrainReport, ErrorRecord, ErrorType};
pub use task::{InMemoryTaskRegistry, MemoryFault, TaskKind, TaskRecord, TaskRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
