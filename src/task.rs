//! Task bookkeeping seam
//!
//! The ring-buffer decoder only needs a narrow view of in-flight tasks: find
//! one by device, stream and task id, flag it once its error record arrived,
//! and record how its memory fault was classified.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coarse memory fault classification reported to the failing task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryFault {
    /// No memory fault attributed
    #[default]
    None,
    /// Local multi-bit ECC / poisoned memory seen by SDMA
    SdmaPoison,
    /// Remote or link fault seen by SDMA
    SdmaLink,
    /// Local memory fault seen by an AI core MTE unit
    AicoreMte,
}

/// Task category as far as error handling cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Plain AI core kernel
    Kernel,
    /// FFTS+ graph task made of contexts
    FftsPlus,
    /// AICPU kernel
    Aicpu,
    /// Anything else
    Other,
}

/// Error details collected for one FFTS+ context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextErrorInfo {
    /// Ring buffer error type that produced the entry
    pub error_type: u32,
    /// Context id inside the FFTS+ task
    pub context_id: u16,
    /// Thread id inside the context
    pub thread_id: u16,
    /// Program counter start of the failing core
    pub pc_start: u64,
}

/// One in-flight task
#[derive(Debug)]
pub struct TaskRecord {
    /// Device id
    pub device_id: u32,
    /// Stream id
    pub stream_id: u32,
    /// Task id
    pub task_id: u32,
    /// Category
    pub kind: TaskKind,
    /// Kernel symbol, when the task runs a kernel
    pub kernel_name: Option<String>,
    /// Owning stream has been force-recycled
    pub force_recycled: bool,
    ring_buffer_received: AtomicBool,
    memory_fault: Mutex<MemoryFault>,
    error_contexts: Mutex<Vec<ContextErrorInfo>>,
}

impl TaskRecord {
    /// Create a record for a kernel task
    pub fn new(device_id: u32, stream_id: u32, task_id: u32, kind: TaskKind) -> Self {
        Self {
            device_id,
            stream_id,
            task_id,
            kind,
            kernel_name: None,
            force_recycled: false,
            ring_buffer_received: AtomicBool::new(false),
            memory_fault: Mutex::new(MemoryFault::None),
            error_contexts: Mutex::new(Vec::new()),
        }
    }

    /// Attach a kernel symbol
    pub fn with_kernel_name(mut self, name: impl Into<String>) -> Self {
        self.kernel_name = Some(name.into());
        self
    }

    /// Mark the owning stream as force-recycled
    pub fn with_force_recycled(mut self, recycled: bool) -> Self {
        self.force_recycled = recycled;
        self
    }

    /// Whether the error record for this task has been decoded
    pub fn ring_buffer_received(&self) -> bool {
        self.ring_buffer_received.load(Ordering::Acquire)
    }

    /// Flag the error record as decoded
    pub fn mark_ring_buffer_received(&self) {
        self.ring_buffer_received.store(true, Ordering::Release);
    }

    /// Current memory fault classification
    pub fn memory_fault(&self) -> MemoryFault {
        *self.memory_fault.lock()
    }

    /// Set the memory fault classification
    pub fn set_memory_fault(&self, fault: MemoryFault) {
        *self.memory_fault.lock() = fault;
    }

    /// Record error details of one FFTS+ context
    pub fn push_error_context(&self, info: ContextErrorInfo) {
        self.error_contexts.lock().push(info);
    }

    /// Collected FFTS+ context errors
    pub fn error_contexts(&self) -> Vec<ContextErrorInfo> {
        self.error_contexts.lock().clone()
    }
}

/// Lookup service for in-flight tasks
pub trait TaskRegistry: Send + Sync {
    /// Find a task by device, stream and task id
    fn lookup_task(&self, device_id: u32, stream_id: u32, task_id: u32) -> Option<Arc<TaskRecord>>;
}

/// Concurrent in-memory registry
#[derive(Debug, Default)]
pub struct InMemoryTaskRegistry {
    tasks: DashMap<(u32, u32, u32), Arc<TaskRecord>>,
}

impl InMemoryTaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task, returning the shared handle
    pub fn insert(&self, record: TaskRecord) -> Arc<TaskRecord> {
        let key = (record.device_id, record.stream_id, record.task_id);
        let record = Arc::new(record);
        self.tasks.insert(key, Arc::clone(&record));
        record
    }

    /// Remove a task
    pub fn remove(&self, device_id: u32, stream_id: u32, task_id: u32) -> Option<Arc<TaskRecord>> {
        self.tasks.remove(&(device_id, stream_id, task_id)).map(|(_, v)| v)
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task is registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskRegistry for InMemoryTaskRegistry {
    fn lookup_task(&self, device_id: u32, stream_id: u32, task_id: u32) -> Option<Arc<TaskRecord>> {
        self.tasks
            .get(&(device_id, stream_id, task_id))
            .map(|entry| Arc::clone(entry.value()))
    }
}
