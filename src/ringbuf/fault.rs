//! Memory fault classification
//!
//! A single SDMA completion status or AI core MTE flag cannot tell a local
//! memory fault from a remote link fault. The probe polls the device RAS
//! alarm for a bounded time, then falls back to the device fault event list
//! before settling on a classification.

use super::tables::{
    blocklist_hit, LOCAL_UCE_BLOCKLIST, REMOTE_UCE_BLOCKLIST, SDMA_STATUS_DDRC_ERROR, SDMA_STATUS_LINK_ERROR,
    SDMA_STATUS_POISON_ERROR,
};
use crate::config::RasProbeConfig;
use crate::driver::{DeviceDriver, Feature};
use crate::task::MemoryFault;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fault events fetched per query
pub const MAX_FAULT_EVENTS: usize = 128;

/// RAS alarm probe bound to one device
pub struct RasProbe<'a> {
    driver: &'a dyn DeviceDriver,
    device_id: u32,
    config: &'a RasProbeConfig,
    op_timeout_ms: bool,
}

impl<'a> RasProbe<'a> {
    /// Create a probe; `op_timeout_ms` disables every wait
    pub fn new(driver: &'a dyn DeviceDriver, device_id: u32, config: &'a RasProbeConfig, op_timeout_ms: bool) -> Self {
        Self {
            driver,
            device_id,
            config,
            op_timeout_ms,
        }
    }

    /// Whether the device raises a RAS alarm within the probe window
    pub fn has_mte_error(&self) -> bool {
        let mut alarm = self.driver.has_ras_alarm(self.device_id);
        if alarm || self.op_timeout_ms {
            return alarm;
        }
        let polls = if self.driver.is_feature_supported(self.device_id, Feature::FastRecoverMteError) {
            self.config.short_poll_count
        } else {
            self.config.poll_count
        };
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        for _ in 0..polls {
            std::thread::sleep(interval);
            alarm = self.driver.has_ras_alarm(self.device_id);
            if alarm {
                break;
            }
        }
        alarm
    }

    fn blocklist_hit(&self, blocklist: &[(u32, &'static str)]) -> bool {
        let events = match self.driver.fault_events(self.device_id) {
            Ok(events) => events,
            Err(e) => {
                debug!("Get fault event failed, device_id={}: {}", self.device_id, e);
                return false;
            }
        };
        let ids: Vec<u32> = events.iter().take(MAX_FAULT_EVENTS).map(|e| e.event_id).collect();
        match blocklist_hit(blocklist, &ids) {
            Some((id, name)) => {
                info!("Fault message is: [[{:#x}]{}].", id, name);
                true
            }
            None => false,
        }
    }

    /// Whether a local uncorrectable memory error was reported
    pub fn has_mem_uce_error(&self) -> bool {
        self.blocklist_hit(LOCAL_UCE_BLOCKLIST)
    }

    /// Whether a poisoned collective transfer points at the remote peer
    ///
    /// True when the device raised no alarm and reported none of the
    /// events that would make the fault local.
    pub fn is_remote_memory_fault(&self) -> bool {
        !self.has_mte_error() && !self.blocklist_hit(REMOTE_UCE_BLOCKLIST)
    }

    /// Classify an SDMA completion status
    ///
    /// Returns `None` for statuses that do not concern memory.
    pub fn classify_sdma_cqe(&self, cqe_status: u32) -> Option<MemoryFault> {
        if !matches!(
            cqe_status,
            SDMA_STATUS_DDRC_ERROR | SDMA_STATUS_LINK_ERROR | SDMA_STATUS_POISON_ERROR
        ) {
            return None;
        }
        Some(self.classify(MemoryFault::SdmaPoison))
    }

    /// Classify an AI core record flagged as a memory fault
    pub fn classify_core_flag(&self) -> MemoryFault {
        self.classify(MemoryFault::AicoreMte)
    }

    fn classify(&self, local: MemoryFault) -> MemoryFault {
        if !self.driver.hbm_ras_supported() {
            warn!("Task Hbm Ras reporting is not supported.");
            return local;
        }
        if self.has_mte_error() {
            local
        } else if self.has_mem_uce_error() {
            MemoryFault::None
        } else {
            MemoryFault::SdmaLink
        }
    }
}
