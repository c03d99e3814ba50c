//! Device driver interface
//!
//! Everything this crate needs from the accelerator driver goes through
//! [`DeviceDriver`]. Production builds plug in the vendor binding; tests and
//! the CLI use the in-process [`sim::SimDevice`].

pub mod sim;

use crate::error::{DumpError, Result};

/// Device virtual address; `0` is the null address
pub type DeviceAddr = u64;

/// Upper bound on devices queried when locating an address owner
pub const MAX_DEVICE_NUM: usize = 64;

/// Map a raw driver status code to a result; `0` is success
pub fn check_driver_status(op: &str, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(DumpError::from_driver_status(op, code))
    }
}

/// Result of an address validity query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInfo {
    /// Address is a genuine device allocation on the queried device
    pub valid: bool,
    /// Device that owns the allocation, when known
    pub owner_device: Option<u32>,
}

/// One entry of the device fault event list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultEvent {
    /// Event identifier reported by the device manager
    pub event_id: u32,
    /// Human readable event name
    pub name: String,
}

/// Optional device capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Exceptions are reported without waiting for the ring buffer
    OpTimeoutMs,
    /// Fast recovery of MTE errors; enables the short RAS probe
    FastRecoverMteError,
    /// Detailed core dump capture is available
    CoreDump,
    /// SDMA records use the per-channel layout of newer schedulers
    StreamPoolTasks,
}

/// Control notices sent to the device scheduler for the error ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBufferNotice {
    /// Start producing into the buffer at `addr`
    Attach {
        /// Device address of the ring buffer
        addr: DeviceAddr,
        /// Total ring buffer bytes
        len: u64,
    },
    /// Stop using the buffer before it is released
    Detach {
        /// Device address of the ring buffer
        addr: DeviceAddr,
    },
}

/// Driver calls consumed by the dump pipeline
pub trait DeviceDriver: Send + Sync {
    /// Check whether `addr` is a valid device address on `device_id`
    fn validate_address(&self, device_id: u32, addr: DeviceAddr) -> Result<AddressInfo>;

    /// Copy `dst.len()` bytes from device memory into `dst`
    fn copy_device_to_host(&self, device_id: u32, addr: DeviceAddr, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` into device memory
    fn copy_host_to_device(&self, device_id: u32, addr: DeviceAddr, src: &[u8]) -> Result<()>;

    /// Allocate device memory
    fn alloc_device(&self, device_id: u32, size: u64) -> Result<DeviceAddr>;

    /// Release device memory
    fn free_device(&self, device_id: u32, addr: DeviceAddr) -> Result<()>;

    /// Ids of all visible devices
    fn device_ids(&self) -> Vec<u32>;

    /// Query an optional capability
    fn is_feature_supported(&self, device_id: u32, feature: Feature) -> bool;

    /// Scheduler firmware version of the device
    fn scheduler_version(&self, device_id: u32) -> u32;

    /// Whether HBM RAS alarms are reported at all
    fn hbm_ras_supported(&self) -> bool;

    /// Whether a RAS alarm is currently raised on the device
    fn has_ras_alarm(&self, device_id: u32) -> bool;

    /// Current fault events of the device
    fn fault_events(&self, device_id: u32) -> Result<Vec<FaultEvent>>;

    /// Deliver a ring buffer control notice to the device scheduler
    fn notify_ring_buffer(&self, device_id: u32, notice: RingBufferNotice) -> Result<()>;
}
