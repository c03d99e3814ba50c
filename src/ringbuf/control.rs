//! Ring buffer control block
//!
//! Layout (little endian):
//!
//! | offset | field          |
//! |--------|----------------|
//! | 0      | head `u32`     |
//! | 4      | tail `u32`     |
//! | 8      | magic `u32`    |
//! | 12     | length `u32`   |
//! | 16     | pid `u32`      |
//! | 20     | element size   |
//! | 24     | reserved `u64` |
//!
//! Schedulers older than [`SCHED_VERSION_ERR_REG_EXT`] omit the reserved word,
//! so elements start at byte 24 and use the default slot size.

use crate::error::{DumpError, Result};

/// Magic written by the host when the buffer is created
pub const RINGBUFFER_MAGIC: u32 = 0x5A5A_A5A5;

/// Control block size on current schedulers
pub const CONTROL_BLOCK_LEN: usize = 32;

/// Control block size on schedulers before the extended register layout
pub const LEGACY_CONTROL_BLOCK_LEN: usize = 24;

/// First scheduler version reporting its own element size
pub const SCHED_VERSION_ERR_REG_EXT: u32 = 7;

/// Bytes of the consumer cursor pair written back to the device
pub const CURSOR_LEN: usize = 8;

/// Prefix of every element: error type, reserved, serial number
pub const ELEMENT_PREFIX_LEN: usize = 16;

/// Host view of the shared control block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlBlock {
    /// Consumer cursor
    pub head: u32,
    /// Producer cursor
    pub tail: u32,
    /// Must equal [`RINGBUFFER_MAGIC`]
    pub magic: u32,
    /// Ring length in elements
    pub len: u32,
    /// Producer process id
    pub pid: u32,
    /// Bytes per element slot
    pub element_size: u32,
}

fn le_u32(raw: &[u8], off: usize) -> Result<u32> {
    raw.get(off..off + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| DumpError::InvalidControlBlock(format!("truncated at offset {}", off)))
}

impl ControlBlock {
    /// Fresh block for a ring of `len` slots
    pub fn new(len: u32, element_size: u32) -> Self {
        Self {
            head: 0,
            tail: 0,
            magic: RINGBUFFER_MAGIC,
            len,
            pid: std::process::id(),
            element_size,
        }
    }

    /// Parse the block at the start of a ring buffer snapshot
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < LEGACY_CONTROL_BLOCK_LEN {
            return Err(DumpError::InvalidControlBlock(format!(
                "snapshot of {} bytes is shorter than the control block",
                raw.len()
            )));
        }
        Ok(Self {
            head: le_u32(raw, 0)?,
            tail: le_u32(raw, 4)?,
            magic: le_u32(raw, 8)?,
            len: le_u32(raw, 12)?,
            pid: le_u32(raw, 16)?,
            element_size: le_u32(raw, 20)?,
        })
    }

    /// Serialized block, padded to [`CONTROL_BLOCK_LEN`]
    pub fn to_bytes(&self) -> [u8; CONTROL_BLOCK_LEN] {
        let mut out = [0u8; CONTROL_BLOCK_LEN];
        let fields = [self.head, self.tail, self.magic, self.len, self.pid, self.element_size];
        for (i, v) in fields.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Head and tail as written back to the device
    pub fn cursor_bytes(&self) -> [u8; CURSOR_LEN] {
        let mut out = [0u8; CURSOR_LEN];
        out[..4].copy_from_slice(&self.head.to_le_bytes());
        out[4..].copy_from_slice(&self.tail.to_le_bytes());
        out
    }

    /// Reject blocks that cannot be trusted
    ///
    /// `max_elements` is the slot count the host allocated. The device
    /// reported length must fit in it and both cursors must lie inside it.
    pub fn validate(&self, max_elements: u32) -> Result<()> {
        if self.len == 0 {
            tracing::error!("The length of ringbuffer is invalid.");
            self.log_state();
            return Err(DumpError::InvalidControlBlock("zero length".into()));
        }
        if self.magic != RINGBUFFER_MAGIC {
            tracing::error!("The magic({}) of ringbuffer is invalid.", self.magic);
            self.log_state();
            return Err(DumpError::InvalidControlBlock(format!("magic {:#x}", self.magic)));
        }
        if self.len > max_elements {
            tracing::error!("The length({}) of ringbuffer exceeds {} elements.", self.len, max_elements);
            self.log_state();
            return Err(DumpError::InvalidControlBlock(format!(
                "length {} beyond {} elements",
                self.len, max_elements
            )));
        }
        if self.head >= self.len || self.tail >= self.len {
            tracing::error!("The head({}) or tail({}) of ringbuffer is invalid.", self.head, self.tail);
            self.log_state();
            return Err(DumpError::InvalidControlBlock(format!(
                "head {} tail {} beyond {} elements",
                self.head, self.tail, self.len
            )));
        }
        Ok(())
    }

    fn log_state(&self) {
        tracing::error!(
            "the ringbuffer magic is {}, the ringBufferLen is {}, the head of ringbuffer is {}, \
             the tail of ringbuffer is {}, the pid of ringbuffer is {}, the elementSize of ringbuffer is {}",
            self.magic, self.len, self.head, self.tail, self.pid, self.element_size
        );
    }

    /// Number of pending elements, wraparound included
    pub fn pending(&self) -> u32 {
        if self.len == 0 {
            return 0;
        }
        (self.tail.wrapping_sub(self.head).wrapping_add(self.len)) % self.len
    }
}

/// Where elements live inside a snapshot for a given scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementLayout {
    /// Offset of slot 0
    pub header_len: usize,
    /// Bytes per slot
    pub element_size: usize,
}

impl ElementLayout {
    /// Layout for `sched_version`, falling back to `default_element_size`
    /// when the scheduler does not report its own
    pub fn for_version(sched_version: u32, block: &ControlBlock, default_element_size: u32) -> Self {
        if sched_version < SCHED_VERSION_ERR_REG_EXT {
            Self {
                header_len: LEGACY_CONTROL_BLOCK_LEN,
                element_size: default_element_size as usize,
            }
        } else {
            Self {
                header_len: CONTROL_BLOCK_LEN,
                element_size: block.element_size as usize,
            }
        }
    }

    /// Byte range of slot `index`
    pub fn slot(&self, index: u32) -> std::ops::Range<usize> {
        let start = self.header_len + index as usize * self.element_size;
        start..start + self.element_size
    }
}
