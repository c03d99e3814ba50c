//! In-process device model
//!
//! [`SimDevice`] keeps device memory as host vectors and lets callers inject
//! the failure modes the dump pipeline has to survive: stale addresses,
//! failing copies, RAS alarms and fault events.

use super::{AddressInfo, DeviceAddr, DeviceDriver, FaultEvent, Feature, RingBufferNotice};
use crate::error::{DumpError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Driver status returned for reads outside any allocation
const STATUS_INVALID_ADDR: i32 = 507_899;
/// Driver status returned for injected copy failures
const STATUS_COPY_FAILED: i32 = 507_033;
/// Status returned by injected allocation failures
const STATUS_OUT_OF_MEMORY: i32 = 207_001;

const SIM_BASE_ADDR: DeviceAddr = 0x1000_0000;
const SIM_ALIGN: u64 = 0x100;
const SIM_DEFAULT_SCHED_VERSION: u32 = 8;

#[derive(Debug, Default)]
struct SimState {
    devices: Vec<u32>,
    regions: BTreeMap<DeviceAddr, (u32, Vec<u8>)>,
    next_addr: DeviceAddr,
    invalidated: HashSet<DeviceAddr>,
    failing: HashSet<DeviceAddr>,
    features: HashSet<(u32, Feature)>,
    sched_versions: HashMap<u32, u32>,
    ras_supported: bool,
    ras_alarms: HashSet<u32>,
    fault_events: HashMap<u32, Vec<FaultEvent>>,
    notices: Vec<(u32, RingBufferNotice)>,
    alloc_failures: HashMap<u32, u32>,
}

impl SimState {
    /// Allocation containing `[addr, addr + len)`, as (base, device)
    fn locate(&self, addr: DeviceAddr, len: u64) -> Option<(DeviceAddr, u32)> {
        let (&base, (dev, data)) = self.regions.range(..=addr).next_back()?;
        let end = base + data.len() as u64;
        if addr >= base && addr.checked_add(len)? <= end && (len > 0 || addr < end) {
            Some((base, *dev))
        } else {
            None
        }
    }
}

/// Simulated accelerator devices sharing one address space
#[derive(Debug)]
pub struct SimDevice {
    state: Mutex<SimState>,
}

impl SimDevice {
    /// Create devices with the given ids
    pub fn new(device_ids: &[u32]) -> Self {
        let state = SimState {
            devices: device_ids.to_vec(),
            next_addr: SIM_BASE_ADDR,
            ras_supported: true,
            ..SimState::default()
        };
        Self { state: Mutex::new(state) }
    }

    /// Allocate a region on `device_id` initialised with `bytes`
    pub fn alloc_with(&self, device_id: u32, bytes: &[u8]) -> DeviceAddr {
        let mut state = self.state.lock();
        let addr = state.next_addr;
        let span = (bytes.len() as u64).max(1);
        state.next_addr = (addr + span + SIM_ALIGN - 1) / SIM_ALIGN * SIM_ALIGN + SIM_ALIGN;
        state.regions.insert(addr, (device_id, bytes.to_vec()));
        addr
    }

    /// Overwrite device memory in place
    pub fn write(&self, device_id: u32, addr: DeviceAddr, bytes: &[u8]) -> Result<()> {
        self.copy_host_to_device(device_id, addr, bytes)
    }

    /// Read device memory, ignoring validity and failure injection
    pub fn read(&self, device_id: u32, addr: DeviceAddr, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let (base, dev) = state
            .locate(addr, len as u64)
            .ok_or(DumpError::InvalidAddress { addr, size: len as u64 })?;
        if dev != device_id {
            return Err(DumpError::InvalidAddress { addr, size: len as u64 });
        }
        let offset = (addr - base) as usize;
        Ok(state.regions[&base].1[offset..offset + len].to_vec())
    }

    /// Make address validation report `addr` as invalid
    pub fn invalidate(&self, addr: DeviceAddr) {
        self.state.lock().invalidated.insert(addr);
    }

    /// Make the next `count` device allocations on `device_id` fail
    pub fn fail_next_allocs(&self, device_id: u32, count: u32) {
        self.state.lock().alloc_failures.insert(device_id, count);
    }

    /// Make every copy starting at `addr` fail
    pub fn fail_copies_at(&self, addr: DeviceAddr) {
        self.state.lock().failing.insert(addr);
    }

    /// Toggle a capability
    pub fn set_feature(&self, device_id: u32, feature: Feature, enabled: bool) {
        let mut state = self.state.lock();
        if enabled {
            state.features.insert((device_id, feature));
        } else {
            state.features.remove(&(device_id, feature));
        }
    }

    /// Set the scheduler firmware version
    pub fn set_scheduler_version(&self, device_id: u32, version: u32) {
        self.state.lock().sched_versions.insert(device_id, version);
    }

    /// Enable or disable RAS alarm reporting
    pub fn set_ras_supported(&self, supported: bool) {
        self.state.lock().ras_supported = supported;
    }

    /// Raise a RAS alarm on a device
    pub fn raise_ras_alarm(&self, device_id: u32) {
        self.state.lock().ras_alarms.insert(device_id);
    }

    /// Append a fault event to a device
    pub fn push_fault_event(&self, device_id: u32, event_id: u32, name: &str) {
        self.state
            .lock()
            .fault_events
            .entry(device_id)
            .or_default()
            .push(FaultEvent { event_id, name: name.to_string() });
    }

    /// Ring buffer notices received so far
    pub fn notices(&self) -> Vec<(u32, RingBufferNotice)> {
        self.state.lock().notices.clone()
    }

    /// Number of live allocations on a device
    pub fn allocation_count(&self, device_id: u32) -> usize {
        self.state.lock().regions.values().filter(|(dev, _)| *dev == device_id).count()
    }
}

impl DeviceDriver for SimDevice {
    fn validate_address(&self, device_id: u32, addr: DeviceAddr) -> Result<AddressInfo> {
        let state = self.state.lock();
        if state.invalidated.contains(&addr) {
            return Ok(AddressInfo { valid: false, owner_device: None });
        }
        let owner = state.locate(addr, 0).map(|(_, dev)| dev);
        Ok(AddressInfo {
            valid: owner == Some(device_id),
            owner_device: owner,
        })
    }

    fn copy_device_to_host(&self, device_id: u32, addr: DeviceAddr, dst: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        if state.failing.contains(&addr) {
            return super::check_driver_status("memcpy device to host", STATUS_COPY_FAILED);
        }
        match state.locate(addr, dst.len() as u64) {
            Some((base, dev)) if dev == device_id => {
                let offset = (addr - base) as usize;
                dst.copy_from_slice(&state.regions[&base].1[offset..offset + dst.len()]);
                Ok(())
            }
            _ => super::check_driver_status("memcpy device to host", STATUS_INVALID_ADDR),
        }
    }

    fn copy_host_to_device(&self, device_id: u32, addr: DeviceAddr, src: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing.contains(&addr) {
            return super::check_driver_status("memcpy host to device", STATUS_COPY_FAILED);
        }
        match state.locate(addr, src.len() as u64) {
            Some((base, dev)) if dev == device_id => {
                let offset = (addr - base) as usize;
                if let Some((_, data)) = state.regions.get_mut(&base) {
                    data[offset..offset + src.len()].copy_from_slice(src);
                }
                Ok(())
            }
            _ => super::check_driver_status("memcpy host to device", STATUS_INVALID_ADDR),
        }
    }

    fn alloc_device(&self, device_id: u32, size: u64) -> Result<DeviceAddr> {
        let len = usize::try_from(size).map_err(|_| DumpError::HostAlloc { size })?;
        {
            let mut state = self.state.lock();
            if let Some(left) = state.alloc_failures.get_mut(&device_id).filter(|n| **n > 0) {
                *left -= 1;
                return Err(DumpError::from_driver_status("malloc device memory", STATUS_OUT_OF_MEMORY));
            }
        }
        Ok(self.alloc_with(device_id, &vec![0u8; len]))
    }

    fn free_device(&self, device_id: u32, addr: DeviceAddr) -> Result<()> {
        let mut state = self.state.lock();
        match state.regions.get(&addr) {
            Some((dev, _)) if *dev == device_id => {
                state.regions.remove(&addr);
                Ok(())
            }
            _ => super::check_driver_status("free device memory", STATUS_INVALID_ADDR),
        }
    }

    fn device_ids(&self) -> Vec<u32> {
        self.state.lock().devices.clone()
    }

    fn is_feature_supported(&self, device_id: u32, feature: Feature) -> bool {
        self.state.lock().features.contains(&(device_id, feature))
    }

    fn scheduler_version(&self, device_id: u32) -> u32 {
        self.state
            .lock()
            .sched_versions
            .get(&device_id)
            .copied()
            .unwrap_or(SIM_DEFAULT_SCHED_VERSION)
    }

    fn hbm_ras_supported(&self) -> bool {
        self.state.lock().ras_supported
    }

    fn has_ras_alarm(&self, device_id: u32) -> bool {
        self.state.lock().ras_alarms.contains(&device_id)
    }

    fn fault_events(&self, device_id: u32) -> Result<Vec<FaultEvent>> {
        Ok(self.state.lock().fault_events.get(&device_id).cloned().unwrap_or_default())
    }

    fn notify_ring_buffer(&self, device_id: u32, notice: RingBufferNotice) -> Result<()> {
        self.state.lock().notices.push((device_id, notice));
        Ok(())
    }
}
