//! Device memory staging
//!
//! Device buffers are copied into scope-bound host buffers before they are
//! parsed or written out. Addresses are validated first; an address that
//! cannot be trusted is never read, and the caller receives zero-filled
//! memory of the requested size instead.

use crate::driver::{DeviceAddr, DeviceDriver, MAX_DEVICE_NUM};
use crate::error::{DumpError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Host buffers currently alive across the process
static LIVE_HOST_BUFFERS: AtomicUsize = AtomicUsize::new(0);

/// Host copy of a device region, released when dropped
#[derive(Debug)]
pub struct HostBuffer {
    data: Vec<u8>,
    zero_filled: bool,
}

impl HostBuffer {
    /// Allocate a zeroed buffer, failing instead of aborting on exhaustion
    pub fn zeroed(size: u64) -> Result<Self> {
        let len = usize::try_from(size).map_err(|_| DumpError::HostAlloc { size })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DumpError::HostAlloc { size })?;
        data.resize(len, 0);
        LIVE_HOST_BUFFERS.fetch_add(1, Ordering::Relaxed);
        Ok(Self { data, zero_filled: true })
    }

    fn empty() -> Self {
        LIVE_HOST_BUFFERS.fetch_add(1, Ordering::Relaxed);
        Self { data: Vec::new(), zero_filled: false }
    }

    /// Staged bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of staged bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing was staged
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when the content is placeholder zeros rather than device data
    pub fn is_zero_filled(&self) -> bool {
        self.zero_filled
    }

    /// Interpret the buffer as little-endian 64-bit words
    pub fn to_u64_words(&self) -> Vec<u64> {
        self.data
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        LIVE_HOST_BUFFERS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Number of host buffers not yet released
pub fn live_host_buffers() -> usize {
    LIVE_HOST_BUFFERS.load(Ordering::Relaxed)
}

/// Copy a device region to host without any fallback
///
/// Used where placeholder data would be misleading, such as argument
/// tables that are parsed as pointers. The address is validated first and
/// an invalid one is never read.
pub fn copy_to_host(
    driver: &dyn DeviceDriver,
    device_id: u32,
    addr: DeviceAddr,
    size: u64,
) -> Result<HostBuffer> {
    if size == 0 {
        return Ok(HostBuffer::empty());
    }
    if addr == 0 {
        return Err(DumpError::InvalidAddress { addr, size });
    }
    let valid = match driver.validate_address(device_id, addr) {
        Ok(info) => info.valid,
        Err(e) => {
            tracing::error!("[Dump][Exception] check addr info failed: {}", e);
            false
        }
    };
    if !valid {
        tracing::error!("[Dump][Exception] refusing to copy invalid address {:#x};{}.", addr, size);
        log_other_device_owner(driver, device_id, addr);
        return Err(DumpError::InvalidAddress { addr, size });
    }
    let mut buffer = HostBuffer::zeroed(size)?;
    driver.copy_device_to_host(device_id, addr, &mut buffer.data)?;
    buffer.zero_filled = false;
    Ok(buffer)
}

/// Stage a device region to host, degrading to zeros on invalid memory
///
/// Only host allocation failure is returned as an error.
pub fn stage_to_host(
    driver: &dyn DeviceDriver,
    device_id: u32,
    addr: DeviceAddr,
    size: u64,
) -> Result<HostBuffer> {
    if size == 0 {
        return Ok(HostBuffer::empty());
    }
    if addr == 0 {
        tracing::error!("[Dump][Exception] the address maybe invalid, addr info: {:#x};{}.", addr, size);
        return HostBuffer::zeroed(size);
    }

    let valid = match driver.validate_address(device_id, addr) {
        Ok(info) => info.valid,
        Err(e) => {
            tracing::error!("[Dump][Exception] check addr info failed: {}", e);
            false
        }
    };
    if !valid {
        tracing::error!(
            "[Dump][Exception] the address maybe invalid, check addr info failed, addr info: {:#x};{}.",
            addr, size
        );
        log_other_device_owner(driver, device_id, addr);
        return HostBuffer::zeroed(size);
    }

    let mut buffer = HostBuffer::zeroed(size)?;
    match driver.copy_device_to_host(device_id, addr, &mut buffer.data) {
        Ok(()) => {
            buffer.zero_filled = false;
            Ok(buffer)
        }
        Err(e) => {
            tracing::error!(
                "[Dump][Exception] the address maybe invalid, D2H failed, addr info: {:#x};{}: {}",
                addr, size, e
            );
            buffer.data.iter_mut().for_each(|b| *b = 0);
            Ok(buffer)
        }
    }
}

/// Log which other device, if any, owns `addr`
pub fn log_other_device_owner(driver: &dyn DeviceDriver, device_id: u32, addr: DeviceAddr) -> Option<u32> {
    let owner = driver
        .device_ids()
        .into_iter()
        .take(MAX_DEVICE_NUM)
        .filter(|&id| id != device_id)
        .find(|&id| matches!(driver.validate_address(id, addr), Ok(info) if info.valid));
    if let Some(id) = owner {
        tracing::error!("[Dump][Exception] the address[{:#x}] is the valid address of device[{}]", addr, id);
    }
    owner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimDevice;

    #[test]
    fn test_zero_size_is_noop() {
        let sim = SimDevice::new(&[0]);
        let buf = stage_to_host(&sim, 0, 0, 0).expect("zero size");
        assert!(buf.is_empty());
        let buf = copy_to_host(&sim, 0, 0xdead, 0).expect("zero size");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stage_valid_region() {
        let sim = SimDevice::new(&[0]);
        let addr = sim.alloc_with(0, &[1, 2, 3, 4]);
        let buf = stage_to_host(&sim, 0, addr, 4).expect("stage");
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        assert!(!buf.is_zero_filled());
    }

    #[test]
    fn test_invalid_address_falls_back_to_zeros() {
        let sim = SimDevice::new(&[0, 1]);
        let addr = sim.alloc_with(1, &[9u8; 16]);
        let buf = stage_to_host(&sim, 0, addr, 16).expect("fallback");
        assert_eq!(buf.len(), 16);
        assert!(buf.is_zero_filled());
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert_eq!(log_other_device_owner(&sim, 0, addr), Some(1));
    }

    #[test]
    fn test_copy_failure_falls_back_to_zeros() {
        let sim = SimDevice::new(&[0]);
        let addr = sim.alloc_with(0, &[7u8; 8]);
        sim.fail_copies_at(addr);
        let buf = stage_to_host(&sim, 0, addr, 8).expect("fallback");
        assert_eq!(buf.as_slice(), &[0u8; 8]);
        assert!(copy_to_host(&sim, 0, addr, 8).is_err());
    }

    #[test]
    fn test_copy_refuses_invalid_address() {
        let sim = SimDevice::new(&[0, 1]);
        let stale = sim.alloc_with(0, &[5u8; 16]);
        sim.invalidate(stale);
        assert!(matches!(
            copy_to_host(&sim, 0, stale, 16),
            Err(DumpError::InvalidAddress { .. })
        ));

        let foreign = sim.alloc_with(1, &[6u8; 16]);
        assert!(matches!(
            copy_to_host(&sim, 0, foreign, 16),
            Err(DumpError::InvalidAddress { .. })
        ));
        assert_eq!(copy_to_host(&sim, 1, foreign, 16).expect("owner").as_slice(), &[6u8; 16]);
    }

    #[test]
    fn test_null_address() {
        let sim = SimDevice::new(&[0]);
        let buf = stage_to_host(&sim, 0, 0, 12).expect("fallback");
        assert_eq!(buf.len(), 12);
        assert!(matches!(
            copy_to_host(&sim, 0, 0, 12),
            Err(DumpError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_words() {
        let sim = SimDevice::new(&[0]);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x1234u64.to_le_bytes());
        bytes.extend_from_slice(&0x4321u64.to_le_bytes());
        let addr = sim.alloc_with(0, &bytes);
        let buf = copy_to_host(&sim, 0, addr, 16).expect("copy");
        assert_eq!(buf.to_u64_words(), vec![0x1234, 0x4321]);
    }
}
