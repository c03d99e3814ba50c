//! Dump configuration
//!
//! The configuration is produced by an outer loader (CLI flags or a JSON
//! file) and handed to [`crate::manager::DumpManager`] already validated.

use crate::error::{DumpError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Capture mode selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpMode {
    /// Plain tensor dump on hardware exceptions
    Exception,
    /// Exception dump that also logs the argument table
    ArgsException,
    /// Detailed capture including the exception register snapshot
    CoreDump,
    /// Only explicit on-demand tensor dumps
    Operator,
}

/// Payload kind recorded in dump files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Raw tensor bytes
    Tensor,
    /// Statistics only
    Stats,
}

/// Where the dump code runs relative to the accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Host side process; collective contexts are not reachable
    Host,
    /// On-device process; collective contexts are dumped
    Device,
}

/// Ring buffer drain tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufferConfig {
    /// Wall-clock budget for one drain wait
    pub drain_budget_ms: u64,
    /// Sleep between two polls of the control block
    pub poll_interval_ms: u64,
    /// Maximum number of polls in one drain
    pub max_poll_cycles: u32,
    /// Element slots in the ring
    pub max_element_num: u32,
    /// Slot size used by firmware that does not report one
    pub default_element_size: u32,
    /// Device reports exceptions without waiting (millisecond op timeout)
    pub op_timeout_ms_supported: bool,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            drain_budget_ms: 12_000,
            poll_interval_ms: 1,
            max_poll_cycles: 50_000,
            max_element_num: 1024,
            default_element_size: 4096,
            op_timeout_ms_supported: false,
        }
    }
}

/// RAS alarm probe tuning for memory fault classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasProbeConfig {
    /// Sleep between alarm polls
    pub poll_interval_ms: u64,
    /// Poll count on the regular path (1.2s)
    pub poll_count: u32,
    /// Poll count when fast recovery is supported (0.2s)
    pub short_poll_count: u32,
}

impl Default for RasProbeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            poll_count: 120,
            short_poll_count: 20,
        }
    }
}

/// Top-level dump configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Root directory for dump files
    pub dump_path: PathBuf,
    /// Master switch
    pub enabled: bool,
    /// Capture mode
    pub mode: DumpMode,
    /// Payload kind
    pub data_kind: DataKind,
    /// Host or device build
    pub platform: Platform,
    /// Ring buffer tuning
    pub ring_buffer: RingBufferConfig,
    /// RAS probe tuning
    pub ras_probe: RasProbeConfig,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            dump_path: PathBuf::from("."),
            enabled: false,
            mode: DumpMode::Exception,
            data_kind: DataKind::Tensor,
            platform: Platform::Host,
            ring_buffer: RingBufferConfig::default(),
            ras_probe: RasProbeConfig::default(),
        }
    }
}

impl DumpConfig {
    /// Enabled exception dump rooted at `path`
    pub fn exception(path: impl Into<PathBuf>) -> Self {
        Self {
            dump_path: path.into(),
            enabled: true,
            ..Self::default()
        }
    }

    /// Parse a JSON document
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| DumpError::Config(e.to_string()))
    }

    /// Load a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
