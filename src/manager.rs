//! Exception dump orchestration
//!
//! [`DumpManager`] keeps the table of captured operators, owns one error
//! ring buffer per device and turns hardware exception callbacks into dump
//! files.

use crate::config::{DumpConfig, DumpMode};
use crate::core::ScopeGuard;
use crate::driver::DeviceDriver;
use crate::dump::operator::{DumpOperator, ExceptionArgs, OpIdentity, OperatorInfo};
use crate::dump::tensor::{DumpTensor, TensorInfo, TensorPlacement, TensorType};
use crate::dump::{file_name_part, unique_timestamp, DumpFile};
use crate::error::{DumpError, Result};
use crate::ringbuf::DeviceErrorProc;
use crate::task::TaskRegistry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Return codes of operator overflow, handled outside the dump path
pub const OVERFLOW_RETCODES: [u32; 2] = [207_003, 207_016];

/// Directory under the dump root receiving exception dumps
pub const EXCEPTION_DUMP_SUBDIR: &str = "extra-info/data-dump";

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
    /// Dumping is off
    Disabled,
    /// Dumping in the configured mode
    Enabled,
    /// Detailed capture was requested but is unsupported; plain exception dumps are written
    Degraded,
}

/// Hardware exception as reported by the runtime fault callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExceptionInfo {
    /// Device id
    pub device_id: u32,
    /// Task id
    pub task_id: u32,
    /// Stream id
    pub stream_id: u32,
    /// FFTS+ context id, 0 otherwise
    pub context_id: u32,
    /// Runtime return code
    pub retcode: u32,
    /// Post-execution argument table
    pub args: ExceptionArgs,
}

impl ExceptionInfo {
    /// Identity of the faulting operator
    pub fn identity(&self) -> OpIdentity {
        OpIdentity::new(self.device_id, self.task_id, self.stream_id, self.context_id)
    }
}

/// Exception dump orchestrator
pub struct DumpManager {
    config: DumpConfig,
    state: DumpState,
    driver: Arc<dyn DeviceDriver>,
    tasks: Arc<dyn TaskRegistry>,
    operators: Mutex<Vec<DumpOperator>>,
    ring_buffers: DashMap<u32, Arc<DeviceErrorProc>>,
    pending_log: Mutex<Vec<String>>,
}

impl DumpManager {
    /// Build a manager for `config`
    ///
    /// Core dump mode falls back to plain exception dumps when any device
    /// lacks the capability.
    pub fn new(config: DumpConfig, driver: Arc<dyn DeviceDriver>, tasks: Arc<dyn TaskRegistry>) -> Self {
        let state = if !config.enabled {
            DumpState::Disabled
        } else if config.mode == DumpMode::CoreDump
            && !driver
                .device_ids()
                .iter()
                .all(|&dev| driver.is_feature_supported(dev, crate::driver::Feature::CoreDump))
        {
            warn!("[Dump][Exception] detail exception dump mode not support, switch to lite exception dump");
            DumpState::Degraded
        } else {
            DumpState::Enabled
        };
        info!(
            "[Dump][Exception] dump manager state {:?}, mode {:?}, path {}",
            state,
            config.mode,
            config.dump_path.display()
        );
        Self {
            config,
            state,
            driver,
            tasks,
            operators: Mutex::new(Vec::new()),
            ring_buffers: DashMap::new(),
            pending_log: Mutex::new(Vec::new()),
        }
    }

    /// Current state
    pub fn state(&self) -> DumpState {
        self.state
    }

    /// Active configuration
    pub fn config(&self) -> &DumpConfig {
        &self.config
    }

    /// Whether exception dumps are written
    pub fn is_enabled(&self) -> bool {
        self.state != DumpState::Disabled
    }

    /// Mode actually in effect after any downgrade
    pub fn effective_mode(&self) -> DumpMode {
        match (self.state, self.config.mode) {
            (DumpState::Degraded, DumpMode::CoreDump) => DumpMode::Exception,
            (_, mode) => mode,
        }
    }

    /// Capture an operator before it is launched
    pub fn register_operator(&self, info: &OperatorInfo) -> OpIdentity {
        let identity = info.identity();
        if !self.is_enabled() {
            debug!("[Dump][Exception] dump disabled, operator {} not captured", info.op_name);
            return identity;
        }
        let op = DumpOperator::new(info, self.driver.as_ref());
        self.operators.lock().push(op);
        identity
    }

    /// Drop every operator captured on `device_id` and `stream_id`
    pub fn deregister_operator(&self, device_id: u32, stream_id: u32) -> usize {
        let mut ops = self.operators.lock();
        let before = ops.len();
        ops.retain(|op| {
            let id = op.identity();
            id.device_id != device_id || id.stream_id != stream_id
        });
        before - ops.len()
    }

    /// Number of captured operators
    pub fn operator_count(&self) -> usize {
        self.operators.lock().len()
    }

    /// Forget every captured operator
    pub fn reset(&self) {
        self.operators.lock().clear();
    }

    /// Error ring buffer of `device_id`, created on first use
    ///
    /// A buffer whose creation failed earlier is created again.
    pub fn ring_buffer(&self, device_id: u32) -> Result<Arc<DeviceErrorProc>> {
        if let Some(existing) = self.ring_buffers.get(&device_id).map(|p| p.clone()) {
            existing.create()?;
            return Ok(existing);
        }
        let proc = self
            .ring_buffers
            .entry(device_id)
            .or_insert_with(|| {
                Arc::new(DeviceErrorProc::new(
                    device_id,
                    self.driver.clone(),
                    self.tasks.clone(),
                    self.config.ring_buffer.clone(),
                    self.config.ras_probe.clone(),
                ))
            })
            .clone();
        proc.create()?;
        Ok(proc)
    }

    /// Tear down every ring buffer
    pub fn destroy_ring_buffers(&self) {
        for entry in self.ring_buffers.iter() {
            if let Err(e) = entry.value().destroy() {
                warn!("[RingBuffer] destroy ring buffer of device {} failed: {}", entry.key(), e);
            }
        }
        self.ring_buffers.clear();
    }

    /// Queue a line for the next [`DumpManager::flush_diagnostics`]
    pub fn push_diagnostic(&self, line: impl Into<String>) {
        self.pending_log.lock().push(line.into());
    }

    /// Emit queued diagnostic lines
    pub fn flush_diagnostics(&self) {
        let lines = std::mem::take(&mut *self.pending_log.lock());
        for line in lines {
            error!("{}", line);
        }
    }

    fn drain_device_errors(&self, info: &ExceptionInfo) {
        let Some(proc) = self.ring_buffers.get(&info.device_id).map(|p| p.clone()) else {
            return;
        };
        if !proc.is_active() {
            warn!("[RingBuffer] device {} has no active ring buffer, drain skipped.", info.device_id);
            return;
        }
        let task = self
            .tasks
            .lookup_task(info.device_id, info.stream_id, info.task_id);
        match proc.proc_task_error(task.as_ref()) {
            Ok(report) => {
                debug!(
                    "[RingBuffer] {} records decoded, {} skipped",
                    report.records.len(),
                    report.skipped
                );
            }
            Err(e) if e.is_recoverable() => debug!("[RingBuffer] {}", e),
            Err(e) => warn!("[RingBuffer] drain of device {} failed: {}", info.device_id, e),
        }
    }

    /// Fault callback entry point
    ///
    /// Returns the written dump file, or `None` when nothing was dumped:
    /// dumping is off, the fault is an overflow, or no captured operator
    /// matches.
    pub fn on_hardware_exception(&self, info: &ExceptionInfo) -> Result<Option<PathBuf>> {
        let _flush = ScopeGuard::new(|| self.flush_diagnostics());
        if !self.is_enabled() {
            debug!("[Dump][Exception] dump disabled, exception ignored");
            return Ok(None);
        }
        if OVERFLOW_RETCODES.contains(&info.retcode) {
            info!("[Dump][Exception] Ignore exception dump request, retcode {}", info.retcode);
            return Ok(None);
        }

        self.drain_device_errors(info);

        let identity = info.identity();
        let found = self
            .operators
            .lock()
            .iter()
            .find(|op| op.is_belong_to(&identity))
            .cloned();
        let Some(mut op) = found else {
            self.push_diagnostic(format!(
                "[Dump][Exception] operator not found, device_id={}, stream_id={}, task_id={}, context_id={}",
                info.device_id, info.stream_id, info.task_id, info.context_id
            ));
            return Ok(None);
        };

        let result = self.dump_operator(&mut op, info);
        if op.is_aging() {
            self.operators
                .lock()
                .retain(|o| !(o.is_aging() && o.is_belong_to(&identity)));
        }
        result.map(Some)
    }

    fn dump_operator(&self, op: &mut DumpOperator, info: &ExceptionInfo) -> Result<PathBuf> {
        let driver = self.driver.as_ref();
        let dir = self
            .config
            .dump_path
            .join(EXCEPTION_DUMP_SUBDIR)
            .join(info.device_id.to_string());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!("[Dump][Exception] create dump directory {} failed: {}", dir.display(), e);
            return Err(e.into());
        }
        op.set_work_dir(dir.clone());

        if info.args.arg_addr != 0 {
            if let Err(e) = op.refresh_addrs(driver, &info.args) {
                warn!("[Dump][Exception] refresh tensor addresses failed: {}", e);
            }
        }
        if let Err(e) = op.log_exception_info(driver, &info.args) {
            warn!("[Dump][Exception] log exception info failed: {}", e);
        }

        if self.effective_mode() == DumpMode::CoreDump {
            if let Some(proc) = self.ring_buffers.get(&info.device_id) {
                for regs in proc.exception_registers(info.stream_id, info.task_id) {
                    op.push_log(format!("[Dump][Exception] exception register {}", regs.describe()));
                }
            }
        }

        op.dump_exception(driver, &dir, self.config.platform)
    }

    /// Dump device tensors right away, outside any fault
    ///
    /// A tensor with a null address or no bytes fails the call. Tensors not
    /// resident on the device are skipped.
    pub fn dump_tensors_now(
        &self,
        op_type: &str,
        op_name: &str,
        tensors: &[TensorInfo],
        device_id: u32,
        stream_id: u32,
    ) -> Result<Option<PathBuf>> {
        if !self.is_enabled() && self.config.mode != DumpMode::Operator {
            warn!("[Dump][Operator] dump is not enabled, skip dump of {}", op_name);
            return Ok(None);
        }

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for tensor in tensors {
            if tensor.addr == 0 || tensor.size == 0 {
                error!(
                    "[Dump][Operator] invalid tensor of {}, addr {:#x}, size {}",
                    op_name, tensor.addr, tensor.size
                );
                return Err(DumpError::InvalidAddress {
                    addr: tensor.addr,
                    size: tensor.size,
                });
            }
            if tensor.placement != TensorPlacement::OnDevice {
                continue;
            }
            match tensor.tensor_type {
                TensorType::Input => inputs.push(DumpTensor::new(tensor)),
                TensorType::Output => outputs.push(DumpTensor::new(tensor)),
                TensorType::Workspace => {}
            }
        }

        let dir = self.config.dump_path.join(device_id.to_string());
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "{}.{}.{}.{}",
            file_name_part(op_type),
            file_name_part(op_name),
            stream_id,
            unique_timestamp()
        ));
        self.write_tensor_file(device_id, &path, op_name, &inputs, &outputs)?;
        Ok(Some(path))
    }

    fn write_tensor_file(
        &self,
        device_id: u32,
        path: &Path,
        op_name: &str,
        inputs: &[DumpTensor],
        outputs: &[DumpTensor],
    ) -> Result<()> {
        let mut file = DumpFile::create(self.driver.as_ref(), device_id, self.config.platform, path);
        file.set_header(op_name);
        file.set_input_tensors(inputs);
        file.set_output_tensors(outputs);
        let mut record = Vec::new();
        file.dump(&mut record)?;
        info!("[Dump][Operator] dump {} to {}", op_name, path.display());
        Ok(())
    }
}

impl Drop for DumpManager {
    fn drop(&mut self) {
        self.destroy_ring_buffers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimDevice;
    use crate::driver::Feature;
    use crate::task::InMemoryTaskRegistry;
    use tempfile::TempDir;

    fn manager(sim: &Arc<SimDevice>, config: DumpConfig) -> DumpManager {
        let driver: Arc<dyn DeviceDriver> = sim.clone();
        DumpManager::new(config, driver, Arc::new(InMemoryTaskRegistry::new()))
    }

    #[test]
    fn test_states() {
        let dir = TempDir::new().expect("tempdir");
        let sim = Arc::new(SimDevice::new(&[0, 1]));
        assert_eq!(manager(&sim, DumpConfig::default()).state(), DumpState::Disabled);
        assert_eq!(manager(&sim, DumpConfig::exception(dir.path())).state(), DumpState::Enabled);

        let mut config = DumpConfig::exception(dir.path());
        config.mode = DumpMode::CoreDump;
        sim.set_feature(0, Feature::CoreDump, true);
        let degraded = manager(&sim, config.clone());
        assert_eq!(degraded.state(), DumpState::Degraded);
        assert_eq!(degraded.effective_mode(), DumpMode::Exception);

        sim.set_feature(1, Feature::CoreDump, true);
        let full = manager(&sim, config);
        assert_eq!(full.state(), DumpState::Enabled);
        assert_eq!(full.effective_mode(), DumpMode::CoreDump);
    }

    #[test]
    fn test_operator_table() {
        let dir = TempDir::new().expect("tempdir");
        let sim = Arc::new(SimDevice::new(&[0]));
        let mgr = manager(&sim, DumpConfig::exception(dir.path()));
        mgr.register_operator(&OperatorInfo::new("Add", "a", OpIdentity::new(0, 1, 5, 0)));
        mgr.register_operator(&OperatorInfo::new("Add", "b", OpIdentity::new(0, 2, 5, 0)));
        mgr.register_operator(&OperatorInfo::new("Mul", "c", OpIdentity::new(0, 3, 6, 0)));
        assert_eq!(mgr.operator_count(), 3);
        assert_eq!(mgr.deregister_operator(0, 5), 2);
        assert_eq!(mgr.operator_count(), 1);
        mgr.reset();
        assert_eq!(mgr.operator_count(), 0);
    }

    #[test]
    fn test_disabled_captures_nothing() {
        let sim = Arc::new(SimDevice::new(&[0]));
        let mgr = manager(&sim, DumpConfig::default());
        mgr.register_operator(&OperatorInfo::new("Add", "a", OpIdentity::new(0, 1, 5, 0)));
        assert_eq!(mgr.operator_count(), 0);
        let info = ExceptionInfo { task_id: 1, stream_id: 5, ..Default::default() };
        assert_eq!(mgr.on_hardware_exception(&info).expect("ignored"), None);
    }

    #[test]
    fn test_overflow_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let sim = Arc::new(SimDevice::new(&[0]));
        let mgr = manager(&sim, DumpConfig::exception(dir.path()));
        mgr.register_operator(&OperatorInfo::new("Add", "a", OpIdentity::new(0, 1, 5, 0)));
        let info = ExceptionInfo { task_id: 1, stream_id: 5, retcode: 207_003, ..Default::default() };
        assert_eq!(mgr.on_hardware_exception(&info).expect("ignored"), None);
        assert!(!dir.path().join(EXCEPTION_DUMP_SUBDIR).exists());
    }

    #[test]
    fn test_ring_buffer_created_once() {
        let sim = Arc::new(SimDevice::new(&[0]));
        let mut config = DumpConfig::exception(".");
        config.ring_buffer.max_element_num = 4;
        config.ring_buffer.default_element_size = 256;
        let mgr = manager(&sim, config);
        let a = mgr.ring_buffer(0).expect("create");
        let b = mgr.ring_buffer(0).expect("reuse");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(sim.allocation_count(0), 1);
        mgr.destroy_ring_buffers();
        assert_eq!(sim.allocation_count(0), 0);
    }

    #[test]
    fn test_ring_buffer_retried_after_failed_create() {
        let sim = Arc::new(SimDevice::new(&[0]));
        let mut config = DumpConfig::exception(".");
        config.ring_buffer.max_element_num = 4;
        config.ring_buffer.default_element_size = 256;
        let mgr = manager(&sim, config);
        sim.fail_next_allocs(0, 1);
        assert!(matches!(mgr.ring_buffer(0), Err(DumpError::Driver(_))));
        assert_eq!(sim.allocation_count(0), 0);

        let ring = mgr.ring_buffer(0).expect("second attempt");
        assert!(ring.is_active());
        assert_eq!(sim.allocation_count(0), 1);
        assert!(Arc::ptr_eq(&ring, &mgr.ring_buffer(0).expect("reuse")));
        assert_eq!(sim.allocation_count(0), 1);
    }

    #[test]
    fn test_flush_diagnostics_drains() {
        let sim = Arc::new(SimDevice::new(&[0]));
        let mgr = manager(&sim, DumpConfig::default());
        mgr.push_diagnostic("line");
        mgr.flush_diagnostics();
        assert!(mgr.pending_log.lock().is_empty());
    }
}
