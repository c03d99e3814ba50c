//! Device error ring buffer
//!
//! The device scheduler appends one element per hardware error into a ring
//! buffer allocated by the host. [`DeviceErrorProc`] owns that buffer for one
//! device: it creates and tears it down, drains pending elements, publishes
//! the consumer cursor back to the device and decodes every element into
//! diagnostics, cross-referencing the in-flight task registry.

pub mod control;
pub mod fault;
pub mod record;
pub mod tables;

pub use control::{ControlBlock, ElementLayout, CONTROL_BLOCK_LEN, RINGBUFFER_MAGIC};
pub use fault::RasProbe;
pub use record::{CommonInfo, ErrorRecord, ErrorType, RawElement};

use crate::config::{RasProbeConfig, RingBufferConfig};
use crate::core::ScopeGuard;
use crate::driver::{DeviceAddr, DeviceDriver, Feature, RingBufferNotice};
use crate::error::{DumpError, Result};
use crate::task::{ContextErrorInfo, MemoryFault, TaskKind, TaskRecord, TaskRegistry};
use control::ELEMENT_PREFIX_LEN;
use parking_lot::Mutex;
use record::{
    AicpuCoreEntry, CoreDfx, CoreErrorEntry, DsaChannelEntry, NotifyContext, SdmaChannelEntry, SdmaStatus, SlotDfx,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tables::{
    aicpu_error_message, channel_error_message, core_error_message, cqe_status_message, ERRCODE0_OFFSET,
    ERRCODE2_OFFSET, ERRCODE4_OFFSET, ERROR_MSG_MAX_LEN, SDMA_STATUS_POISON_ERROR,
};
use tracing::{debug, error, info, warn};

/// Wait kind of a notify wait timeout
pub const WAIT_TYPE_NOTIFY: u8 = 7;
/// Wait kind of an event wait timeout
pub const WAIT_TYPE_EVENT: u8 = 5;
/// Collective FFTS+ timeout applied when the user configured none, seconds
pub const HCCL_DEFAULT_TIMEOUT_S: u32 = 1800;
/// MTE error code reported when a write lands on an unreachable peer
const REMOTE_MTE_ERROR_CODE: u64 = 0x80_0000;
/// Registers kept per faulting core in the exception register map
pub const EXCEPTION_REG_NUM: usize = 18;

/// Register snapshot of one faulting core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegisters {
    /// Core id
    pub core_id: u32,
    /// `Aicore` or `Aivector`
    pub core_type: ErrorType,
    /// Kernel start program counter
    pub start_pc: u64,
    /// Program counter at the fault
    pub current_pc: u64,
    /// Error registers split into 32-bit halves: error code words, then
    /// BIU, CCU, cube, IFU, MTE and vector info, then the fixpipe words
    pub err_regs: [u32; EXCEPTION_REG_NUM],
}

impl ExceptionRegisters {
    fn from_core(kind: ErrorType, core: &CoreErrorEntry) -> Self {
        let core_type = match kind {
            ErrorType::Aicore | ErrorType::FftsPlusAicore => ErrorType::Aicore,
            _ => ErrorType::Aivector,
        };
        let wide = [
            core.aic_error[0],
            core.aic_error[1],
            core.aic_error[2],
            core.biu_err,
            core.ccu_err,
            core.cube_err,
            core.ifu_err,
            core.mte_err,
            core.vec_err,
        ];
        let mut err_regs = [0u32; EXCEPTION_REG_NUM];
        for (i, value) in wide.iter().enumerate() {
            err_regs[i * 2] = *value as u32;
            err_regs[i * 2 + 1] = (*value >> 32) as u32;
        }
        err_regs[16] = core.fixp_error0;
        err_regs[17] = core.fixp_error1;
        Self {
            core_id: core.core_id as u32,
            core_type,
            start_pc: core.pc_start,
            current_pc: core.current_pc,
            err_regs,
        }
    }

    /// One-line rendering for dump diagnostics
    pub fn describe(&self) -> String {
        let regs: Vec<String> = self.err_regs.iter().map(|r| format!("{:#x}", r)).collect();
        format!(
            "core_id={}, core_type={:?}, start_pc={:#x}, current_pc={:#x}, err_regs=[{}]",
            self.core_id,
            self.core_type,
            self.start_pc,
            self.current_pc,
            regs.join(", ")
        )
    }
}

/// One decoded element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// Serial number assigned by the device
    pub error_number: u64,
    /// Decoded payload
    pub record: ErrorRecord,
}

/// Outcome of one or more drain passes
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// Records in ring order
    pub records: Vec<DecodedRecord>,
    /// Diagnostic lines, also emitted through `tracing`
    pub diagnostics: Vec<String>,
    /// Elements skipped as unknown or undecodable
    pub skipped: usize,
}

impl DrainReport {
    /// True when nothing was decoded or skipped
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.skipped == 0
    }

    fn merge(&mut self, other: DrainReport) {
        self.records.extend(other.records);
        self.diagnostics.extend(other.diagnostics);
        self.skipped += other.skipped;
    }
}

fn emit(out: &mut Vec<String>, line: String) {
    error!("{}", line);
    out.push(line);
}

fn origin(common: &CommonInfo, error_number: u64) -> String {
    format!(
        "The error from device(chipId:{}, dieId:{}), serial number is {}",
        common.chip_id, common.die_id, error_number
    )
}

/// Named fault conditions of one core, concatenated
///
/// Bits of the three error words are scanned low to high; the third word
/// carries its upper half shifted down next to its low 17 bits. A core with
/// no error bit at all stopped on a timeout or a trap.
pub fn core_error_string(core: &CoreErrorEntry) -> String {
    let w2 = core.aic_error[2];
    let words = [
        (core.aic_error[0], ERRCODE0_OFFSET),
        (core.aic_error[1], ERRCODE2_OFFSET),
        (((w2 >> 32) << 17) | (w2 & 0x1FFFF), ERRCODE4_OFFSET),
    ];
    let mut out = String::new();
    let mut any = false;
    for (word, offset) in words {
        if word == 0 {
            continue;
        }
        any = true;
        debug!("core errorCode:{:x}", word);
        let mut bits = word;
        while bits != 0 {
            let bit = bits.trailing_zeros();
            bits &= bits - 1;
            if let Some(msg) = core_error_message(bit + offset) {
                if msg.len() + out.len() > ERROR_MSG_MAX_LEN {
                    warn!("The error info is too long.");
                    break;
                }
                out.push_str(msg);
            }
        }
    }
    if any {
        out
    } else {
        "timeout or trap error.".to_string()
    }
}

fn is_remote_mte(mte_err: u64) -> bool {
    // bits 26:24: read or write bus/decode error
    matches!((mte_err >> 24) & 0x7, 0b110 | 0b111 | 0b11 | 0b10)
}

#[derive(Debug, Default)]
struct RingState {
    addr: Option<DeviceAddr>,
    size: u64,
}

/// Error ring buffer of one device
pub struct DeviceErrorProc {
    device_id: u32,
    driver: Arc<dyn DeviceDriver>,
    tasks: Arc<dyn TaskRegistry>,
    config: RingBufferConfig,
    ras: RasProbeConfig,
    state: Mutex<RingState>,
    task_error_lock: Mutex<()>,
    exception_regs: Mutex<HashMap<(u32, u32), Vec<ExceptionRegisters>>>,
    consumed: AtomicU64,
}

impl DeviceErrorProc {
    /// Create an inactive processor; call [`DeviceErrorProc::create`] to
    /// allocate the device buffer
    pub fn new(
        device_id: u32,
        driver: Arc<dyn DeviceDriver>,
        tasks: Arc<dyn TaskRegistry>,
        config: RingBufferConfig,
        ras: RasProbeConfig,
    ) -> Self {
        Self {
            device_id,
            driver,
            tasks,
            config,
            ras,
            state: Mutex::new(RingState::default()),
            task_error_lock: Mutex::new(()),
            exception_regs: Mutex::new(HashMap::new()),
            consumed: AtomicU64::new(0),
        }
    }

    /// Device this processor serves
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Total ring buffer bytes for the configured geometry
    pub fn buffer_size(&self) -> u64 {
        CONTROL_BLOCK_LEN as u64
            + u64::from(self.config.max_element_num) * u64::from(self.config.default_element_size)
    }

    /// Allocate, initialise and announce the device ring buffer
    ///
    /// Calling it on an active processor is a no-op.
    pub fn create(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.addr.is_some() {
            return Ok(());
        }
        let size = self.buffer_size();
        let len = usize::try_from(size).map_err(|_| DumpError::HostAlloc { size })?;
        let addr = self.driver.alloc_device(self.device_id, size)?;
        let release = ScopeGuard::new(|| {
            if let Err(e) = self.driver.free_device(self.device_id, addr) {
                warn!("[RingBuffer] free ring buffer {:#x} failed: {}", addr, e);
            }
        });

        let mut init = vec![0u8; len];
        let block = ControlBlock::new(self.config.max_element_num, self.config.default_element_size);
        init[..CONTROL_BLOCK_LEN].copy_from_slice(&block.to_bytes());
        self.driver.copy_host_to_device(self.device_id, addr, &init)?;
        self.driver
            .notify_ring_buffer(self.device_id, RingBufferNotice::Attach { addr, len: size })?;
        release.dismiss();

        state.addr = Some(addr);
        state.size = size;
        info!(
            "[RingBuffer] device {} ring buffer created at {:#x}, {} bytes",
            self.device_id, addr, size
        );
        Ok(())
    }

    /// Adopt a ring buffer that already lives in device memory
    pub fn attach(&self, addr: DeviceAddr, size: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.addr.is_some() {
            return Err(DumpError::InvalidState(format!(
                "device {} already owns a ring buffer",
                self.device_id
            )));
        }
        state.addr = Some(addr);
        state.size = size;
        Ok(())
    }

    /// Tell the device to stop producing and release the buffer
    ///
    /// Calling it on an inactive processor is a no-op.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(addr) = state.addr.take() else {
            return Ok(());
        };
        state.size = 0;
        if let Err(e) = self
            .driver
            .notify_ring_buffer(self.device_id, RingBufferNotice::Detach { addr })
        {
            warn!("[RingBuffer] stop using ring buffer notice failed on device {}: {}", self.device_id, e);
        }
        self.driver.free_device(self.device_id, addr)?;
        info!("[RingBuffer] device {} ring buffer destroyed", self.device_id);
        Ok(())
    }

    /// Whether a device buffer is owned
    pub fn is_active(&self) -> bool {
        self.state.lock().addr.is_some()
    }

    /// Device address of the buffer, when active
    pub fn buffer_addr(&self) -> Option<DeviceAddr> {
        self.state.lock().addr
    }

    /// Elements consumed since creation
    pub fn consumed_count(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Register snapshots recorded for a stream and task
    pub fn exception_registers(&self, stream_id: u32, task_id: u32) -> Vec<ExceptionRegisters> {
        self.exception_regs
            .lock()
            .get(&(stream_id, task_id))
            .cloned()
            .unwrap_or_default()
    }

    fn op_timeout_active(&self) -> bool {
        self.config.op_timeout_ms_supported || self.driver.is_feature_supported(self.device_id, Feature::OpTimeoutMs)
    }

    fn probe(&self) -> RasProbe<'_> {
        RasProbe::new(self.driver.as_ref(), self.device_id, &self.ras, self.op_timeout_active())
    }

    fn lookup(&self, stream_id: u16, task_id: u16) -> Option<Arc<TaskRecord>> {
        let task = self
            .tasks
            .lookup_task(self.device_id, u32::from(stream_id), u32::from(task_id))?;
        task.mark_ring_buffer_received();
        Some(task)
    }

    /// Drain every pending element once
    ///
    /// Polls the device until new elements appear, the wall-clock budget is
    /// spent or `fault_task` reports its record as received. The ring is
    /// always read at least once so records queued for other tasks are not
    /// left behind. A single poll
    /// is made when the task's stream was force-recycled and no wait at all
    /// when the device reports exceptions without the ring buffer. Returns
    /// [`DumpError::NoData`] when nothing arrived.
    pub fn drain_once(&self, fault_task: Option<&Arc<TaskRecord>>) -> Result<DrainReport> {
        let state = self.state.lock();
        let addr = state
            .addr
            .ok_or_else(|| DumpError::InvalidState(format!("device {} has no ring buffer", self.device_id)))?;
        let len = usize::try_from(state.size).map_err(|_| DumpError::HostAlloc { size: state.size })?;

        let op_timeout = self.op_timeout_active();
        let cycles = if fault_task.map_or(false, |t| t.force_recycled) {
            1
        } else {
            self.config.max_poll_cycles.max(1)
        };
        let budget = Duration::from_millis(self.config.drain_budget_ms);
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let start = Instant::now();

        let mut snapshot = vec![0u8; len];
        let mut polls = 0u32;
        let mut block = loop {
            self.driver.copy_device_to_host(self.device_id, addr, &mut snapshot)?;
            let block = ControlBlock::parse(&snapshot)?;
            polls += 1;
            if block.head != block.tail || op_timeout || polls >= cycles || start.elapsed() >= budget {
                break block;
            }
            if fault_task.map_or(false, |t| t.ring_buffer_received()) {
                return Ok(DrainReport::default());
            }
            std::thread::sleep(interval);
        };

        block.validate(self.config.max_element_num)?;
        if block.head == block.tail {
            info!("There isn't errInfo of device.");
            return Err(DumpError::NoData);
        }

        let sched_version = self.driver.scheduler_version(self.device_id);
        let layout = ElementLayout::for_version(sched_version, &block, self.config.default_element_size);
        if layout.element_size < ELEMENT_PREFIX_LEN {
            error!("The elementSize({}) of ringbuffer is invalid.", layout.element_size);
            return Err(DumpError::InvalidControlBlock(format!(
                "element size {}",
                layout.element_size
            )));
        }

        let pending = block.pending();
        let mut head = block.head;
        block.head = block.tail;
        self.driver
            .copy_host_to_device(self.device_id, addr, &block.cursor_bytes())?;
        self.consumed.fetch_add(u64::from(pending), Ordering::Relaxed);
        drop(state);

        info!(
            "it need to process {} errMessages, headSize={}, elementSize={}.",
            pending, layout.header_len, layout.element_size
        );
        let mut report = DrainReport::default();
        for _ in 0..pending {
            let range = layout.slot(head);
            head = (head + 1) % block.len;
            let Some(slot) = snapshot.get(range.clone()) else {
                warn!("Element at {:?} lies outside the ring buffer snapshot.", range);
                report.skipped += 1;
                continue;
            };
            if let Err(e) = self.decode_element(slot, fault_task, &mut report) {
                warn!("Failed to get error information from device. {}", e);
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    /// Decode one element slot into `report`
    ///
    /// Unknown error types are logged and counted as skipped.
    pub fn decode_element(
        &self,
        slot: &[u8],
        fault_task: Option<&Arc<TaskRecord>>,
        report: &mut DrainReport,
    ) -> Result<()> {
        let raw = RawElement::parse(slot)?;
        let Some(kind) = ErrorType::from_u32(raw.error_type) else {
            warn!("Failed to get error information from device, error type={}.", raw.error_type);
            report.skipped += 1;
            return Ok(());
        };
        let record = ErrorRecord::parse(kind, raw.payload)?;
        let n = raw.error_number;
        let out = &mut report.diagnostics;
        match &record {
            ErrorRecord::Core { kind, common, cores } => self.decode_core(*kind, common, cores, n, out),
            ErrorRecord::Sdma { kind, common, status, channels } => {
                self.decode_sdma(*kind, common, status, channels, n, out)
            }
            ErrorRecord::Aicpu { kind, common, errcode, rsp_stream_id, rsp_task_id, cores } => {
                self.decode_aicpu(*kind, common, *errcode, (*rsp_stream_id, *rsp_task_id), cores, n, out)
            }
            ErrorRecord::Dvpp { common, exception_type, sqe_type } => {
                self.lookup(common.stream_id, common.task_id);
                emit(
                    out,
                    format!(
                        "{}, an exception occurred during DVPP task execution, stream_id:{}, task_id:{}, \
                         errcode:{}, sqe_type={}",
                        origin(common, n),
                        common.stream_id,
                        common.task_id,
                        exception_type,
                        sqe_type
                    ),
                );
            }
            ErrorRecord::Dsa { kind, common, sqe_stream_id, sqe_task_id, channels } => {
                self.decode_dsa(*kind, common, (*sqe_stream_id, *sqe_task_id), channels, fault_task, n, out)
            }
            ErrorRecord::Sqe { common, sq_head, sqe } => {
                self.lookup(common.stream_id, common.task_id);
                emit(
                    out,
                    format!(
                        "{}, sqe error occurred during task execution, stream_id:{}, task_id:{}, sq_id:{}, sq_head:{}.",
                        origin(common, n),
                        common.stream_id,
                        common.task_id,
                        common.sq_id,
                        sq_head
                    ),
                );
                for (i, word) in sqe.iter().enumerate() {
                    emit(out, format!("sqe[{}]=0x{:08x}.", i, word));
                }
            }
            ErrorRecord::WaitTimeout { common, wait_id } => self.decode_wait_timeout(common, *wait_id, n, out),
            ErrorRecord::HcclTimeout { common, contexts } => self.decode_hccl_timeout(common, contexts, n, out),
            ErrorRecord::TimeoutDfx { common, slots, cores } => self.decode_timeout_dfx(common, slots, cores, n, out),
        }
        report.records.push(DecodedRecord { error_number: n, record });
        Ok(())
    }

    fn decode_core(
        &self,
        kind: ErrorType,
        common: &CommonInfo,
        cores: &[CoreErrorEntry],
        n: u64,
        out: &mut Vec<String>,
    ) {
        let task = self.lookup(common.stream_id, common.task_id);
        let ffts = task.as_ref().map_or(false, |t| t.kind == TaskKind::FftsPlus)
            && matches!(kind, ErrorType::FftsPlusAicore | ErrorType::FftsPlusAivector);
        if let Some(task) = &task {
            if common.flag == 1 {
                task.set_memory_fault(self.probe().classify_core_flag());
            }
        }

        let fast_recover = self
            .driver
            .is_feature_supported(self.device_id, Feature::FastRecoverMteError);
        let mut remote_suspect = !cores.is_empty() && common.flag != 1 && fast_recover;
        let keeps_registers = matches!(
            kind,
            ErrorType::Aicore | ErrorType::Aivector | ErrorType::FftsPlusAicore | ErrorType::FftsPlusAivector
        );
        for core in cores {
            if let Some(task) = &task {
                if !ffts && task.kernel_name.is_none() {
                    error!(
                        "stream_id={}, task_id={} not with kernel info.",
                        common.stream_id, common.task_id
                    );
                }
            }
            let error_string = core_error_string(core);
            if keeps_registers && task.is_some() {
                error!(
                    "add error register: core_id={}, stream_id={}, task_id={}",
                    core.core_id, common.stream_id, common.task_id
                );
                self.exception_regs
                    .lock()
                    .entry((u32::from(common.stream_id), u32::from(common.task_id)))
                    .or_default()
                    .push(ExceptionRegisters::from_core(kind, core));
            }
            emit(
                out,
                format!(
                    "{}, there is an exception of {}, core id is {}, error code = {:#x}, dump info: \
                     pc start: {:#x}, current: {:#x}, vec error info: {:#x}, mte error info: {:#x}, \
                     ifu error info: {:#x}, ccu error info: {:#x}, cube error info: {:#x}, \
                     biu error info: {:#x}, aic error mask: {:#x}, para base: {:#x}.",
                    origin(common, n),
                    kind.head_msg(),
                    core.core_id,
                    core.aic_error[0],
                    core.pc_start,
                    core.current_pc,
                    core.vec_err,
                    core.mte_err,
                    core.ifu_err,
                    core.ccu_err,
                    core.cube_err,
                    core.biu_err,
                    core.aic_error_mask,
                    core.para_base
                ),
            );
            emit(
                out,
                format!(
                    "The extend info: errcode:({:#x}, {:#x}, {:#x}) errorStr: {} \
                     fixp_error0 info: {:#x}, fixp_error1 info: {:#x}, \
                     fsmId:{}, tslot:{}, thread:{}, ctxid:{}, blk:{}, sublk:{}, subErrType:{}.",
                    core.aic_error[0],
                    core.aic_error[1],
                    core.aic_error[2],
                    error_string,
                    core.fixp_error0,
                    core.fixp_error1,
                    core.fsm_id,
                    core.fsm_tslot_id,
                    core.fsm_thread_id,
                    core.fsm_cxt_id,
                    core.fsm_blk_id,
                    core.fsm_sublk_id,
                    core.sub_err_type
                ),
            );

            if core.aic_error[0] != REMOTE_MTE_ERROR_CODE || !is_remote_mte(core.mte_err) || !fast_recover {
                remote_suspect = false;
            }
            if ffts {
                if let Some(task) = &task {
                    task.push_error_context(ContextErrorInfo {
                        error_type: kind as u32,
                        context_id: core.fsm_cxt_id,
                        thread_id: u16::from(core.fsm_thread_id),
                        pc_start: core.pc_start,
                    });
                }
            }
        }

        if let Some(task) = &task {
            if remote_suspect {
                let probe = self.probe();
                if !probe.has_mte_error() && !probe.has_mem_uce_error() {
                    task.set_memory_fault(MemoryFault::SdmaLink);
                }
            }
            error!(
                "devId={}, streamId={}, taskId={}, MTE errorCode={:?}.",
                self.device_id,
                common.stream_id,
                common.task_id,
                task.memory_fault()
            );
        }
    }

    fn decode_sdma(
        &self,
        kind: ErrorType,
        common: &CommonInfo,
        status: &SdmaStatus,
        channels: &[SdmaChannelEntry],
        n: u64,
        out: &mut Vec<String>,
    ) {
        let task = self.lookup(common.stream_id, common.task_id);

        if kind == ErrorType::Sdma {
            let mut reasons = String::new();
            for bit in 0..u64::BITS {
                if status.channel_status & (1u64 << bit) == 0 {
                    continue;
                }
                if let Some(msg) = channel_error_message(bit).filter(|m| !m.is_empty()) {
                    reasons.push_str(msg);
                    reasons.push(' ');
                }
            }
            if let Some(msg) = cqe_status_message(status.cqe_status) {
                reasons.push_str(&format!("cqe status={:#x}: {} ", status.cqe_status, msg));
            }
            emit(
                out,
                format!(
                    "{}. there is a sdma error, sdma channel is {:#x}, {}it's config include: \
                     setting1={:#x}, setting2={:#x}, setting3={:#x}, sq base addr={:#x}.",
                    origin(common, n),
                    status.channel,
                    reasons,
                    status.settings[0],
                    status.settings[1],
                    status.settings[2],
                    status.sq_base_addr
                ),
            );

            let stream_pool = self
                .driver
                .is_feature_supported(self.device_id, Feature::StreamPoolTasks);
            for ch in channels {
                if stream_pool {
                    emit(
                        out,
                        format!(
                            "{}.there is a sdma error, sdma channel is {}, sdmaChFsmState={:#x}, \
                             sdmaChFree={:#x}, irqStatus={:#x}, cqeStatus={:#x} ",
                            origin(common, n),
                            ch.channel_id,
                            ch.fsm_state,
                            ch.ch_free,
                            ch.irq_status,
                            ch.cqe_status
                        ),
                    );
                    if ch.cqe_status == SDMA_STATUS_POISON_ERROR {
                        if let Some(task) = &task {
                            task.set_memory_fault(MemoryFault::SdmaPoison);
                        }
                    }
                } else {
                    emit(
                        out,
                        format!(
                            "{}. there is a sdma error, sdma channel is {}, sdmaBlkFsmState={:#x}, \
                             dfxSdmaBlkFsmOstCnt={:#x}, sdmaChFree={:#x}, irqStatus={:#x}, cqeStatus={:#x} ",
                            origin(common, n),
                            ch.channel_id,
                            ch.fsm_state,
                            ch.ost_count,
                            ch.ch_free,
                            ch.irq_status,
                            ch.cqe_status
                        ),
                    );
                    if let Some(task) = &task {
                        if let Some(fault) = self.probe().classify_sdma_cqe(ch.cqe_status) {
                            task.set_memory_fault(fault);
                        }
                        error!(
                            "Get sdma mte error, stream_id={}, task_id={}, errorCode={:?}",
                            common.stream_id,
                            common.task_id,
                            task.memory_fault()
                        );
                    }
                }
            }
            if task.is_none() {
                emit(out, "Error task from the device stream.".to_string());
            }
            return;
        }

        let ffts = task.as_ref().map_or(false, |t| t.kind == TaskKind::FftsPlus);
        for ch in channels {
            emit(
                out,
                format!(
                    "{}. there is a fftsplus sdma error, sdma channel is {}, sdmaState={:#x}, sdmaTslotid={:#x}, \
                     sdmaCxtid={:#x}, sdmaThreadid={:#x}, irqStatus={:#x}, cqeStatus={:#x}.",
                    origin(common, n),
                    ch.channel_id,
                    ch.fsm_state,
                    ch.tslot_id,
                    ch.context_id,
                    ch.thread_id,
                    ch.irq_status,
                    ch.cqe_status
                ),
            );
            let cqe = (ch.cqe_status >> 17) & 0x1F;
            if let Some(task) = &task {
                if let Some(fault) = self.probe().classify_sdma_cqe(cqe) {
                    task.set_memory_fault(fault);
                }
                error!("Get sdma mte error={:?}, cqeStatus={:#x}.", task.memory_fault(), cqe);
                if ffts {
                    task.push_error_context(ContextErrorInfo {
                        error_type: kind as u32,
                        context_id: ch.context_id,
                        thread_id: ch.thread_id,
                        pc_start: 0,
                    });
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_aicpu(
        &self,
        kind: ErrorType,
        common: &CommonInfo,
        errcode: u64,
        rsp: (u32, u32),
        cores: &[AicpuCoreEntry],
        n: u64,
        out: &mut Vec<String>,
    ) {
        if common.core_num == 0 {
            return;
        }
        let task = self.lookup(common.stream_id, common.task_id);
        if kind == ErrorType::Aicpu {
            emit(
                out,
                format!(
                    "{}, an exception occurred during AICPU execution, stream_id:{}, task_id:{}, errcode:{}, msg:{}.",
                    origin(common, n),
                    rsp.0,
                    rsp.1,
                    errcode,
                    aicpu_error_message(errcode)
                ),
            );
            return;
        }
        let ffts = task.as_ref().filter(|t| t.kind == TaskKind::FftsPlus);
        for core in cores {
            emit(
                out,
                format!(
                    "{}, an exception occurred during fftsplus AICPU execution, aicpuId:{}, aicpuState:{}, \
                     aicpuTslotid:{}, aicpuCxtid:{}, aicpuThreadid:{}.",
                    origin(common, n),
                    core.aicpu_id,
                    core.state,
                    core.tslot_id,
                    core.context_id,
                    core.thread_id
                ),
            );
            if let Some(task) = ffts {
                task.push_error_context(ContextErrorInfo {
                    error_type: kind as u32,
                    context_id: core.context_id,
                    thread_id: core.thread_id,
                    pc_start: 0,
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_dsa(
        &self,
        kind: ErrorType,
        common: &CommonInfo,
        sqe_ids: (u16, u16),
        channels: &[DsaChannelEntry],
        fault_task: Option<&Arc<TaskRecord>>,
        n: u64,
        out: &mut Vec<String>,
    ) {
        if kind == ErrorType::Dsa {
            for ch in channels {
                emit(
                    out,
                    format!(
                        "{}. there is a dsa error, dsa channel is {}, error intr status={:#x}.",
                        origin(common, n),
                        ch.chan_id,
                        ch.chan_err
                    ),
                );
            }
            self.lookup(sqe_ids.0, sqe_ids.1);
            return;
        }

        // The record may not name the faulting task; fall back to the one being waited on.
        let ffts = fault_task.filter(|t| t.kind == TaskKind::FftsPlus);
        if let Some(task) = ffts {
            task.mark_ring_buffer_received();
        }
        for ch in channels {
            emit(
                out,
                format!(
                    "{}. there is a fftsplus dsa error, dsa channel is {}, error intr status={:#x}, \
                     dsaCtxid={:#x}, dsaThreadid={:#x}.",
                    origin(common, n),
                    ch.chan_id,
                    ch.chan_err,
                    ch.context_id,
                    ch.thread_id
                ),
            );
            if let Some(task) = ffts {
                task.push_error_context(ContextErrorInfo {
                    error_type: kind as u32,
                    context_id: ch.context_id,
                    thread_id: ch.thread_id,
                    pc_start: 0,
                });
            }
        }
    }

    fn decode_wait_timeout(&self, common: &CommonInfo, wait_id: u32, n: u64, out: &mut Vec<String>) {
        let task = self.lookup(common.stream_id, common.task_id);
        let line = match common.wait_type {
            WAIT_TYPE_NOTIFY => format!(
                "{}, notify wait timeout occurred during task execution, stream_id:{}, sq_id:{}, task_id:{}, \
                 notify_id={}, timeout={}s.",
                origin(common, n),
                common.stream_id,
                common.sq_id,
                common.task_id,
                wait_id,
                common.timeout
            ),
            WAIT_TYPE_EVENT => format!(
                "{}, event wait timeout occurred during task execution, stream_id:{}, sq_id:{}, task_id:{}, \
                 event_id={}, timeout={}s.",
                origin(common, n),
                common.stream_id,
                common.sq_id,
                common.task_id,
                wait_id,
                common.timeout
            ),
            other => format!(
                "type = {},{}, event wait timeout occurred during task execution, stream_id:{}, sq_id:{}, task_id:{}.",
                other,
                origin(common, n),
                common.stream_id,
                common.sq_id,
                common.task_id
            ),
        };
        emit(out, line);
        if task.is_none() {
            emit(out, "Error task from the device stream.".to_string());
        }
    }

    fn decode_hccl_timeout(&self, common: &CommonInfo, contexts: &[NotifyContext], n: u64, out: &mut Vec<String>) {
        let task = self.lookup(common.stream_id, common.task_id);
        let timeout = if common.timeout == HCCL_DEFAULT_TIMEOUT_S {
            "30min(default)".to_string()
        } else {
            format!("{}s", common.timeout)
        };
        emit(
            out,
            format!(
                "{}, hccl fftsplus task timeout occurred during task execution, stream_id:{}, sq_id:{}, \
                 task_id:{}, stuck notify num:{}, timeout={}.",
                origin(common, n),
                common.stream_id,
                common.sq_id,
                common.task_id,
                contexts.len(),
                timeout
            ),
        );
        for (i, ctx) in contexts.iter().enumerate() {
            emit(
                out,
                format!(
                    "The {} stuck notify wait context info:(context_id={}, notify_id={}).",
                    i, ctx.context_id, ctx.notify_id
                ),
            );
            if let Some(task) = &task {
                task.push_error_context(ContextErrorInfo {
                    error_type: ErrorType::HcclFftsPlusTimeout as u32,
                    context_id: u16::try_from(ctx.context_id).unwrap_or(u16::MAX),
                    thread_id: 0,
                    pc_start: 0,
                });
            }
        }
    }

    fn decode_timeout_dfx(
        &self,
        common: &CommonInfo,
        slots: &[SlotDfx],
        cores: &[CoreDfx],
        n: u64,
        out: &mut Vec<String>,
    ) {
        emit(
            out,
            format!(
                "{}, aicore task timeout dfx, fault_stream_id={}, fault_task_id={}, fault_slot_id={}, \
                 timeout and own_bitmap=0",
                origin(common, n),
                common.stream_id,
                common.task_id,
                common.exception_slot_id
            ),
        );
        self.lookup(common.stream_id, common.task_id);

        for slot in slots {
            let Some(task) = self
                .tasks
                .lookup_task(self.device_id, u32::from(slot.stream_id), u32::from(slot.task_id))
            else {
                emit(
                    out,
                    format!(
                        "task info is null, device_id={}, stream_id={}, task_id={}, slot_id={}",
                        self.device_id, slot.stream_id, slot.task_id, slot.slot_id
                    ),
                );
                continue;
            };
            let prefix = if slot.ffts_type == SlotDfx::FFTS_PLUS_TYPE {
                "fftsplus aicore"
            } else {
                "aicore"
            };
            emit(
                out,
                format!(
                    "{} task timeout dfx, show slot info, slot_id={}, device_id={}, stream_id={}, task_id={}, \
                     aic_own_bitmap={:#x}, aiv_own_bitmap0={:#x}, aiv_own_bitmap1={:#x}, kernel_name={}, \
                     pc_start={:#x}.",
                    prefix,
                    slot.slot_id,
                    self.device_id,
                    slot.stream_id,
                    slot.task_id,
                    slot.aic_own_bitmap,
                    slot.aiv_own_bitmap0,
                    slot.aiv_own_bitmap1,
                    task.kernel_name.as_deref().unwrap_or("none"),
                    slot.pc_start
                ),
            );
        }

        for core in cores.iter().filter(|c| c.sub_error != 0) {
            emit(
                out,
                format!(
                    "aicore task timeout dfx, show core info, core_id={}, core_type={}, sub_error={}, \
                     current_pc={:#x}, slot_id={}.",
                    core.core_id, core.core_type, core.sub_error, core.current_pc, core.slot_id
                ),
            );
        }
    }

    /// Wait for the error record of `task`
    ///
    /// Drains repeatedly until the task is flagged as received, the drain
    /// budget is spent, the drain finds nothing, or waiting cannot help:
    /// no task, an AICPU task, a force-recycled stream, or a device that
    /// reports exceptions without the ring buffer.
    pub fn proc_task_error(&self, task: Option<&Arc<TaskRecord>>) -> Result<DrainReport> {
        let _serial = self.task_error_lock.lock();
        let start = Instant::now();
        let budget = Duration::from_millis(self.config.drain_budget_ms);
        let op_timeout = self.op_timeout_active();
        let need_check = task.map_or(false, |t| t.kind != TaskKind::Aicpu && !t.force_recycled);

        let mut merged = DrainReport::default();
        loop {
            match self.drain_once(task) {
                Ok(report) => merged.merge(report),
                Err(DumpError::NoData) => break,
                Err(e) => return Err(e),
            }
            let received = task.map_or(true, |t| t.ring_buffer_received());
            if !need_check || received || op_timeout || start.elapsed() >= budget {
                break;
            }
        }
        Ok(merged)
    }
}

impl std::fmt::Debug for DeviceErrorProc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceErrorProc")
            .field("device_id", &self.device_id)
            .field("state", &*self.state.lock())
            .field("consumed", &self.consumed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimDevice;
    use crate::task::InMemoryTaskRegistry;
    use pretty_assertions::assert_eq;
    use record::encode_element;

    const ELEMENT_SIZE: u32 = 1024;

    fn fixture(len: u32) -> (Arc<SimDevice>, Arc<InMemoryTaskRegistry>, DeviceErrorProc) {
        let sim = Arc::new(SimDevice::new(&[0]));
        let tasks = Arc::new(InMemoryTaskRegistry::new());
        let config = RingBufferConfig {
            drain_budget_ms: 20,
            poll_interval_ms: 1,
            max_poll_cycles: 5,
            max_element_num: len,
            default_element_size: ELEMENT_SIZE,
            op_timeout_ms_supported: false,
        };
        let ras = RasProbeConfig {
            poll_interval_ms: 1,
            poll_count: 2,
            short_poll_count: 1,
        };
        let driver: Arc<dyn DeviceDriver> = sim.clone();
        let registry: Arc<dyn TaskRegistry> = tasks.clone();
        let proc = DeviceErrorProc::new(0, driver, registry, config, ras);
        (sim, tasks, proc)
    }

    fn publish(sim: &SimDevice, proc: &DeviceErrorProc, head: u32, tail: u32, slots: &[(u32, Vec<u8>)]) {
        let addr = proc.buffer_addr().expect("created");
        let mut block = ControlBlock::parse(&sim.read(0, addr, CONTROL_BLOCK_LEN).expect("read")).expect("block");
        block.head = head;
        block.tail = tail;
        sim.write(0, addr, &block.to_bytes()).expect("write block");
        for (index, slot) in slots {
            let off = CONTROL_BLOCK_LEN as u64 + u64::from(*index) * u64::from(ELEMENT_SIZE);
            sim.write(0, addr + off, slot).expect("write slot");
        }
    }

    fn core_slot(stream: u16, task: u16, serial: u64) -> Vec<u8> {
        let record = ErrorRecord::Core {
            kind: ErrorType::Aicore,
            common: CommonInfo { stream_id: stream, task_id: task, core_num: 1, ..Default::default() },
            cores: vec![CoreErrorEntry { core_id: 3, aic_error: [0b101, 0, 0], pc_start: 0x1000, ..Default::default() }],
        };
        encode_element(ErrorType::Aicore as u32, serial, &record.encode(), ELEMENT_SIZE as usize).expect("slot")
    }

    #[test]
    fn test_create_destroy() {
        let (sim, _, proc) = fixture(4);
        proc.create().expect("create");
        proc.create().expect("second create is a no-op");
        assert_eq!(sim.allocation_count(0), 1);
        let addr = proc.buffer_addr().expect("active");
        let block = ControlBlock::parse(&sim.read(0, addr, CONTROL_BLOCK_LEN).expect("read")).expect("block");
        assert_eq!(block.magic, RINGBUFFER_MAGIC);
        assert_eq!(block.len, 4);

        proc.destroy().expect("destroy");
        proc.destroy().expect("second destroy is a no-op");
        assert!(!proc.is_active());
        assert_eq!(sim.allocation_count(0), 0);
        let notices = sim.notices();
        assert_eq!(notices.len(), 2);
        assert!(matches!(notices[1].1, RingBufferNotice::Detach { addr: a } if a == addr));
    }

    #[test]
    fn test_empty_ring_reports_no_data() {
        let (_, _, proc) = fixture(4);
        proc.create().expect("create");
        assert!(matches!(proc.drain_once(None), Err(DumpError::NoData)));
    }

    #[test]
    fn test_drain_publishes_cursor() {
        let (sim, tasks, proc) = fixture(4);
        proc.create().expect("create");
        let task = tasks.insert(TaskRecord::new(0, 5, 6, TaskKind::Kernel));
        publish(&sim, &proc, 0, 1, &[(0, core_slot(5, 6, 77))]);

        let report = proc.drain_once(None).expect("drain");
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].error_number, 77);
        assert!(task.ring_buffer_received());
        assert_eq!(proc.consumed_count(), 1);
        assert_eq!(proc.exception_registers(5, 6).len(), 1);

        let addr = proc.buffer_addr().expect("active");
        let block = ControlBlock::parse(&sim.read(0, addr, CONTROL_BLOCK_LEN).expect("read")).expect("block");
        assert_eq!(block.head, 1);
        assert!(matches!(proc.drain_once(None), Err(DumpError::NoData)));
    }

    #[test]
    fn test_received_task_skips_wait() {
        let (_, tasks, proc) = fixture(4);
        proc.create().expect("create");
        let task = tasks.insert(TaskRecord::new(0, 1, 1, TaskKind::Kernel));
        task.mark_ring_buffer_received();
        assert!(proc.drain_once(Some(&task)).expect("early return").is_empty());
    }

    #[test]
    fn test_core_error_string() {
        let core = CoreErrorEntry::default();
        assert_eq!(core_error_string(&core), "timeout or trap error.");
        let core = CoreErrorEntry { aic_error: [1, 0, 0], ..Default::default() };
        assert_eq!(core_error_string(&core), core_error_message(0).expect("bit 0").to_string());
    }

    #[test]
    fn test_exception_registers_split() {
        let core = CoreErrorEntry {
            core_id: 9,
            aic_error: [0x1_0000_0002, 0, 0],
            fixp_error1: 7,
            ..Default::default()
        };
        let regs = ExceptionRegisters::from_core(ErrorType::FftsPlusAivector, &core);
        assert_eq!(regs.core_type, ErrorType::Aivector);
        assert_eq!(regs.err_regs[0], 2);
        assert_eq!(regs.err_regs[1], 1);
        assert_eq!(regs.err_regs[17], 7);
        assert!(regs.describe().starts_with("core_id=9"));
    }
}
