//! Error ring buffer draining and decoding against the simulated device

use npu_dump::config::{RasProbeConfig, RingBufferConfig};
use npu_dump::driver::sim::SimDevice;
use npu_dump::driver::{DeviceDriver, Feature};
use npu_dump::ringbuf::control::{ControlBlock, CONTROL_BLOCK_LEN, LEGACY_CONTROL_BLOCK_LEN};
use npu_dump::ringbuf::record::{
    encode_element, CommonInfo, CoreErrorEntry, NotifyContext, SdmaChannelEntry, SdmaStatus, SlotDfx,
};
use npu_dump::ringbuf::tables::SDMA_STATUS_POISON_ERROR;
use npu_dump::ringbuf::{DeviceErrorProc, ErrorRecord, ErrorType, WAIT_TYPE_NOTIFY};
use npu_dump::{DumpError, InMemoryTaskRegistry, MemoryFault, TaskKind, TaskRecord, TaskRegistry};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LEN: u32 = 8;
const ELEMENT_SIZE: u32 = 512;

struct Ring {
    sim: Arc<SimDevice>,
    tasks: Arc<InMemoryTaskRegistry>,
    proc: DeviceErrorProc,
}

fn ring_with(configure: impl FnOnce(&mut RingBufferConfig)) -> Ring {
    let sim = Arc::new(SimDevice::new(&[0]));
    let tasks = Arc::new(InMemoryTaskRegistry::new());
    let mut config = RingBufferConfig {
        drain_budget_ms: 50,
        poll_interval_ms: 1,
        max_poll_cycles: 10,
        max_element_num: LEN,
        default_element_size: ELEMENT_SIZE,
        op_timeout_ms_supported: false,
    };
    configure(&mut config);
    let ras = RasProbeConfig { poll_interval_ms: 1, poll_count: 2, short_poll_count: 1 };
    let driver: Arc<dyn DeviceDriver> = sim.clone();
    let registry: Arc<dyn TaskRegistry> = tasks.clone();
    let proc = DeviceErrorProc::new(0, driver, registry, config, ras);
    proc.create().expect("create ring buffer");
    Ring { sim, tasks, proc }
}

fn ring() -> Ring {
    ring_with(|_| {})
}

impl Ring {
    fn addr(&self) -> u64 {
        self.proc.buffer_addr().expect("active")
    }

    fn block(&self) -> ControlBlock {
        let raw = self.sim.read(0, self.addr(), CONTROL_BLOCK_LEN).expect("read block");
        ControlBlock::parse(&raw).expect("parse block")
    }

    fn set_cursors(&self, head: u32, tail: u32) {
        let mut block = self.block();
        block.head = head;
        block.tail = tail;
        self.sim.write(0, self.addr(), &block.to_bytes()).expect("write block");
    }

    fn put_slot(&self, index: u32, slot: &[u8]) {
        let off = CONTROL_BLOCK_LEN as u64 + u64::from(index) * u64::from(ELEMENT_SIZE);
        self.sim.write(0, self.addr() + off, slot).expect("write slot");
    }

    fn put_record(&self, index: u32, serial: u64, record: &ErrorRecord) {
        let slot = encode_element(record.kind() as u32, serial, &record.encode(), ELEMENT_SIZE as usize)
            .expect("encode element");
        self.put_slot(index, &slot);
    }
}

fn common(stream: u16, task: u16, core_num: u16) -> CommonInfo {
    CommonInfo { chip_id: 1, die_id: 0, stream_id: stream, task_id: task, core_num, ..CommonInfo::default() }
}

fn core_record(stream: u16, task: u16) -> ErrorRecord {
    ErrorRecord::Core {
        kind: ErrorType::Aicore,
        common: common(stream, task, 1),
        cores: vec![CoreErrorEntry { core_id: 2, aic_error: [0x10, 0, 0], ..CoreErrorEntry::default() }],
    }
}

fn serials(proc: &DeviceErrorProc) -> Vec<u64> {
    proc.drain_once(None)
        .expect("drain")
        .records
        .iter()
        .map(|r| r.error_number)
        .collect()
}

#[test]
fn test_wraparound_visits_each_element_once() {
    let r = ring();
    let head = LEN - 2;
    let tail = 1;
    for (serial, index) in [head, head + 1, 0].into_iter().enumerate() {
        r.put_record(index, serial as u64 + 100, &core_record(1, index as u16));
    }
    r.set_cursors(head, tail);

    assert_eq!(serials(&r.proc), vec![100, 101, 102]);
    assert_eq!(r.proc.consumed_count(), u64::from((tail + LEN - head) % LEN));
    assert_eq!(r.block().head, tail);
    assert!(matches!(r.proc.drain_once(None), Err(DumpError::NoData)));
}

#[test]
fn test_unknown_error_type_skipped() {
    let r = ring();
    r.put_record(0, 1, &core_record(1, 1));
    let unknown = encode_element(ErrorType::MAX + 7, 2, &[0u8; 64], ELEMENT_SIZE as usize).expect("slot");
    r.put_slot(1, &unknown);
    r.put_record(2, 3, &core_record(1, 3));
    r.set_cursors(0, 3);

    let report = r.proc.drain_once(None).expect("drain");
    assert_eq!(report.skipped, 1);
    let serials: Vec<u64> = report.records.iter().map(|d| d.error_number).collect();
    assert_eq!(serials, vec![1, 3]);
}

#[test]
fn test_corrupt_magic_rejected() {
    let r = ring();
    r.put_record(0, 1, &core_record(1, 1));
    let mut block = r.block();
    block.magic = 0xDEAD_BEEF;
    block.tail = 1;
    r.sim.write(0, r.addr(), &block.to_bytes()).expect("write block");

    assert!(matches!(r.proc.drain_once(None), Err(DumpError::InvalidControlBlock(_))));
    assert_eq!(r.block().head, 0);
    assert_eq!(r.proc.consumed_count(), 0);
}

#[test]
fn test_cursor_beyond_ring_rejected() {
    let r = ring();
    r.set_cursors(0, LEN + 1);
    assert!(matches!(r.proc.drain_once(None), Err(DumpError::InvalidControlBlock(_))));
}

#[test]
fn test_cursor_beyond_reported_length_rejected() {
    let r = ring();
    let mut block = r.block();
    block.len = 2;
    block.head = 0;
    block.tail = 5;
    r.sim.write(0, r.addr(), &block.to_bytes()).expect("write block");

    let start = Instant::now();
    assert!(matches!(r.proc.drain_once(None), Err(DumpError::InvalidControlBlock(_))));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(r.proc.consumed_count(), 0);
    assert_eq!(r.block().head, 0);
}

#[test]
fn test_length_beyond_allocation_rejected() {
    let r = ring();
    let mut block = r.block();
    block.len = LEN * 2;
    block.tail = LEN + 1;
    r.sim.write(0, r.addr(), &block.to_bytes()).expect("write block");
    assert!(matches!(r.proc.drain_once(None), Err(DumpError::InvalidControlBlock(_))));
}

#[test]
fn test_received_task_still_drains_queued_records() {
    let r = ring();
    let task = r.tasks.insert(TaskRecord::new(0, 1, 1, TaskKind::Kernel));
    task.mark_ring_buffer_received();
    r.put_record(0, 11, &core_record(3, 9));
    r.set_cursors(0, 1);

    let report = r.proc.drain_once(Some(&task)).expect("drain");
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].error_number, 11);
    assert_eq!(r.block().head, 1);
}

#[test]
fn test_legacy_layout() {
    let r = ring();
    r.sim.set_scheduler_version(0, 6);
    let slot = encode_element(ErrorType::Aicore as u32, 42, &core_record(4, 4).encode(), ELEMENT_SIZE as usize)
        .expect("slot");
    r.set_cursors(0, 1);
    let base = r.addr() + LEGACY_CONTROL_BLOCK_LEN as u64;
    r.sim.write(0, base, &slot).expect("legacy slot");

    assert_eq!(serials(&r.proc), vec![42]);
}

#[test]
fn test_force_recycled_polls_once() {
    let r = ring_with(|c| {
        c.drain_budget_ms = 5_000;
        c.max_poll_cycles = 5_000;
    });
    let task = r
        .tasks
        .insert(TaskRecord::new(0, 1, 1, TaskKind::Kernel).with_force_recycled(true));
    let start = Instant::now();
    assert!(matches!(r.proc.drain_once(Some(&task)), Err(DumpError::NoData)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_op_timeout_does_not_wait() {
    let r = ring_with(|c| {
        c.drain_budget_ms = 5_000;
        c.max_poll_cycles = 5_000;
        c.op_timeout_ms_supported = true;
    });
    let task = r.tasks.insert(TaskRecord::new(0, 1, 1, TaskKind::Kernel));
    let start = Instant::now();
    let report = r.proc.proc_task_error(Some(&task)).expect("no data is not an error");
    assert!(report.is_empty());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_proc_task_error_marks_task() {
    let r = ring();
    let task = r.tasks.insert(TaskRecord::new(0, 7, 9, TaskKind::Kernel).with_kernel_name("k"));
    r.put_record(0, 1, &core_record(7, 9));
    r.set_cursors(0, 1);

    let report = r.proc.proc_task_error(Some(&task)).expect("drain");
    assert_eq!(report.records.len(), 1);
    assert!(task.ring_buffer_received());
    assert_eq!(r.proc.exception_registers(7, 9).len(), 1);
    assert!(report.diagnostics[0].contains("core id is 2"));
}

#[test]
fn test_ffts_plus_core_records_context() {
    let r = ring();
    let task = r.tasks.insert(TaskRecord::new(0, 3, 4, TaskKind::FftsPlus));
    let record = ErrorRecord::Core {
        kind: ErrorType::FftsPlusAivector,
        common: common(3, 4, 1),
        cores: vec![CoreErrorEntry {
            core_id: 1,
            fsm_cxt_id: 17,
            fsm_thread_id: 2,
            pc_start: 0x8000,
            ..CoreErrorEntry::default()
        }],
    };
    r.put_record(0, 1, &record);
    r.set_cursors(0, 1);
    r.proc.drain_once(None).expect("drain");

    let contexts = task.error_contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].error_type, ErrorType::FftsPlusAivector as u32);
    assert_eq!(contexts[0].context_id, 17);
    assert_eq!(contexts[0].thread_id, 2);
    assert_eq!(contexts[0].pc_start, 0x8000);
}

#[test]
fn test_sdma_poison_with_stream_pool() {
    let r = ring();
    r.sim.set_feature(0, Feature::StreamPoolTasks, true);
    let task = r.tasks.insert(TaskRecord::new(0, 2, 5, TaskKind::Kernel));
    let record = ErrorRecord::Sdma {
        kind: ErrorType::Sdma,
        common: common(2, 5, 1),
        status: SdmaStatus { channel: 3, ..SdmaStatus::default() },
        channels: vec![SdmaChannelEntry {
            channel_id: 3,
            cqe_status: SDMA_STATUS_POISON_ERROR,
            ..SdmaChannelEntry::default()
        }],
    };
    r.put_record(0, 1, &record);
    r.set_cursors(0, 1);

    let report = r.proc.drain_once(None).expect("drain");
    assert_eq!(task.memory_fault(), MemoryFault::SdmaPoison);
    assert!(report.diagnostics.iter().any(|l| l.contains("sdma channel is 3, sdmaChFsmState")));
}

#[test]
fn test_sdma_link_error_without_alarm() {
    let r = ring();
    let task = r.tasks.insert(TaskRecord::new(0, 2, 5, TaskKind::Kernel));
    let record = ErrorRecord::Sdma {
        kind: ErrorType::Sdma,
        common: common(2, 5, 1),
        status: SdmaStatus::default(),
        channels: vec![SdmaChannelEntry { channel_id: 1, cqe_status: 0x9, ..SdmaChannelEntry::default() }],
    };
    r.put_record(0, 1, &record);
    r.set_cursors(0, 1);
    r.proc.drain_once(None).expect("drain");
    assert_eq!(task.memory_fault(), MemoryFault::SdmaLink);
}

#[test]
fn test_wait_timeout_without_task() {
    let r = ring();
    let mut c = common(8, 8, 0);
    c.wait_type = WAIT_TYPE_NOTIFY;
    c.timeout = 30;
    r.put_record(0, 1, &ErrorRecord::WaitTimeout { common: c, wait_id: 77 });
    r.set_cursors(0, 1);

    let report = r.proc.drain_once(None).expect("drain");
    assert!(report.diagnostics[0].contains("notify wait timeout"));
    assert!(report.diagnostics[0].contains("notify_id=77, timeout=30s."));
    assert_eq!(report.diagnostics[1], "Error task from the device stream.");
}

#[test]
fn test_hccl_timeout_contexts() {
    let r = ring();
    let task = r.tasks.insert(TaskRecord::new(0, 5, 6, TaskKind::FftsPlus));
    let mut c = common(5, 6, 0);
    c.timeout = 1800;
    let contexts = vec![
        NotifyContext { context_id: 3, notify_id: 30 },
        NotifyContext { context_id: 4, notify_id: 40 },
    ];
    r.put_record(0, 1, &ErrorRecord::HcclTimeout { common: c, contexts });
    r.set_cursors(0, 1);

    let report = r.proc.drain_once(None).expect("drain");
    assert!(report.diagnostics[0].contains("stuck notify num:2, timeout=30min(default)."));
    assert_eq!(
        report.diagnostics[2],
        "The 1 stuck notify wait context info:(context_id=4, notify_id=40)."
    );
    let ids: Vec<u16> = task.error_contexts().iter().map(|c| c.context_id).collect();
    assert_eq!(ids, vec![3, 4]);
}

#[test]
fn test_timeout_dfx_slots() {
    let r = ring();
    r.tasks
        .insert(TaskRecord::new(0, 1, 2, TaskKind::Kernel).with_kernel_name("matmul_kernel"));
    let mut c = common(1, 2, 0);
    c.slot_num = 2;
    let slots = vec![
        SlotDfx { slot_id: 0, stream_id: 1, task_id: 2, pc_start: 0x100, ..SlotDfx::default() },
        SlotDfx { slot_id: 1, stream_id: 9, task_id: 9, ..SlotDfx::default() },
    ];
    r.put_record(0, 1, &ErrorRecord::TimeoutDfx { common: c, slots, cores: Vec::new() });
    r.set_cursors(0, 1);

    let report = r.proc.drain_once(None).expect("drain");
    assert!(report.diagnostics.iter().any(|l| l.contains("kernel_name=matmul_kernel")));
    assert!(report
        .diagnostics
        .iter()
        .any(|l| l.starts_with("task info is null") && l.contains("slot_id=1")));
}

#[test]
fn test_destroy_stops_draining() {
    let r = ring();
    r.proc.destroy().expect("destroy");
    assert!(matches!(r.proc.drain_once(None), Err(DumpError::InvalidState(_))));
    assert_eq!(r.sim.allocation_count(0), 0);
}
