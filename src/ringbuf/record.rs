//! Error records carried in ring buffer elements
//!
//! Every element starts with a 16 byte prefix (error type `u32`, reserved
//! `u32`, serial number `u64`). The payload that follows opens with a
//! 24 byte [`CommonInfo`] block and continues with a layout selected by the
//! error type. All fields are little endian; variable length tables are
//! clamped to what fits in the slot.

use super::control::ELEMENT_PREFIX_LEN;
use crate::error::{DumpError, Result};

/// Stream or task id reported when a record carries none
pub const UNKNOWN_ID: u16 = 0xFFFF;

/// Size of [`CommonInfo`]
pub const COMMON_LEN: usize = 24;
/// Size of one [`CoreErrorEntry`]
pub const CORE_ENTRY_LEN: usize = 128;
/// Offset of the SDMA channel table
pub const SDMA_CHANNELS_OFFSET: usize = 80;
/// Size of one [`SdmaChannelEntry`]
pub const SDMA_CHANNEL_LEN: usize = 32;
/// Offset of the AICPU core table
pub const AICPU_CORES_OFFSET: usize = 40;
/// Size of one [`AicpuCoreEntry`]
pub const AICPU_CORE_LEN: usize = 8;
/// Offset of the DSA channel table
pub const DSA_CHANNELS_OFFSET: usize = 32;
/// Size of one [`DsaChannelEntry`]
pub const DSA_CHANNEL_LEN: usize = 16;
/// Offset of the SQE words
pub const SQE_OFFSET: usize = 32;
/// Words in one submission queue entry
pub const SQE_WORDS: usize = 16;
/// Offset of the stuck notify table
pub const HCCL_CONTEXTS_OFFSET: usize = 32;
/// Size of one [`NotifyContext`]
pub const HCCL_CONTEXT_LEN: usize = 8;
/// Most stuck notify contexts reported in one record
pub const HCCL_MAX_CONTEXT_NUM: usize = 64;
/// Slots in a timeout snapshot
pub const DFX_SLOT_NUM: usize = 8;
/// Size of one [`SlotDfx`]
pub const DFX_SLOT_LEN: usize = 40;
/// Offset of the core table in a timeout snapshot
pub const DFX_CORES_OFFSET: usize = COMMON_LEN + DFX_SLOT_NUM * DFX_SLOT_LEN;
/// Size of one [`CoreDfx`]
pub const DFX_CORE_LEN: usize = 16;

/// Error record discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorType {
    /// AI core fault
    Aicore = 0,
    /// AI vector core fault
    Aivector = 1,
    /// SDMA channel fault
    Sdma = 2,
    /// AICPU kernel fault
    Aicpu = 3,
    /// AI core fault inside an FFTS+ graph
    FftsPlusAicore = 4,
    /// AI vector fault inside an FFTS+ graph
    FftsPlusAivector = 5,
    /// SDMA fault inside an FFTS+ graph
    FftsPlusSdma = 6,
    /// AICPU fault inside an FFTS+ graph
    FftsPlusAicpu = 7,
    /// Media processing fault
    Dvpp = 8,
    /// DSA fault
    Dsa = 9,
    /// DSA fault inside an FFTS+ graph
    FftsPlusDsa = 10,
    /// Malformed submission queue entry
    Sqe = 11,
    /// Notify or event wait timeout
    WaitTimeout = 12,
    /// Collective FFTS+ task timeout
    HcclFftsPlusTimeout = 13,
    /// AI core timeout snapshot
    AicoreTimeoutDfx = 14,
    /// Fused kernel fault
    FusionKernel = 15,
}

impl ErrorType {
    /// Largest known discriminant
    pub const MAX: u32 = 15;

    /// Map a raw discriminant
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Aicore,
            1 => Self::Aivector,
            2 => Self::Sdma,
            3 => Self::Aicpu,
            4 => Self::FftsPlusAicore,
            5 => Self::FftsPlusAivector,
            6 => Self::FftsPlusSdma,
            7 => Self::FftsPlusAicpu,
            8 => Self::Dvpp,
            9 => Self::Dsa,
            10 => Self::FftsPlusDsa,
            11 => Self::Sqe,
            12 => Self::WaitTimeout,
            13 => Self::HcclFftsPlusTimeout,
            14 => Self::AicoreTimeoutDfx,
            15 => Self::FusionKernel,
            _ => return None,
        })
    }

    /// Short description used at the start of core fault lines
    pub fn head_msg(self) -> &'static str {
        match self {
            Self::Aicore => "aicore error",
            Self::Aivector => "aivec error",
            Self::FftsPlusAicore => "fftsplus aicore error",
            Self::FftsPlusAivector => "fftsplus aivector error",
            Self::FftsPlusSdma => "fftsplus sdma error",
            Self::FftsPlusAicpu => "fftsplus aicpu error",
            Self::FftsPlusDsa => "fftsplus dsa error",
            Self::HcclFftsPlusTimeout => "hccl fftsplus timeout",
            Self::FusionKernel => "fusion kernel error",
            _ => "undefine errType",
        }
    }

    /// Record originates from an FFTS+ context
    pub fn is_ffts_plus(self) -> bool {
        matches!(
            self,
            Self::FftsPlusAicore
                | Self::FftsPlusAivector
                | Self::FftsPlusSdma
                | Self::FftsPlusAicpu
                | Self::FftsPlusDsa
        )
    }
}

struct Le<'a> {
    raw: &'a [u8],
}

impl<'a> Le<'a> {
    fn array<const N: usize>(&self, off: usize) -> Result<[u8; N]> {
        self.raw
            .get(off..off + N)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| DumpError::Serialize(format!("error record truncated at offset {}", off)))
    }

    fn u8(&self, off: usize) -> Result<u8> {
        Ok(self.array::<1>(off)?[0])
    }

    fn u16(&self, off: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array(off)?))
    }

    fn u32(&self, off: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(off)?))
    }

    fn u64(&self, off: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array(off)?))
    }

    /// Declared table length clamped to the entries present
    fn count(&self, base: usize, entry_len: usize, declared: usize) -> usize {
        declared.min(self.raw.len().saturating_sub(base) / entry_len)
    }
}

#[derive(Default)]
struct LeMut {
    raw: Vec<u8>,
}

impl LeMut {
    fn put(&mut self, off: usize, bytes: &[u8]) {
        if self.raw.len() < off + bytes.len() {
            self.raw.resize(off + bytes.len(), 0);
        }
        self.raw[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn u8(&mut self, off: usize, v: u8) {
        self.put(off, &[v]);
    }

    fn u16(&mut self, off: usize, v: u16) {
        self.put(off, &v.to_le_bytes());
    }

    fn u32(&mut self, off: usize, v: u32) {
        self.put(off, &v.to_le_bytes());
    }

    fn u64(&mut self, off: usize, v: u64) {
        self.put(off, &v.to_le_bytes());
    }
}

/// Fields shared by every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommonInfo {
    /// Chip id
    pub chip_id: u16,
    /// Die id
    pub die_id: u16,
    /// Stream id
    pub stream_id: u16,
    /// Task id
    pub task_id: u16,
    /// Submission queue id
    pub sq_id: u16,
    /// Entries in the variant's core or channel table
    pub core_num: u16,
    /// Variant specific flag; `1` on core records marks a memory fault
    pub flag: u8,
    /// Valid slots of a timeout snapshot
    pub slot_num: u8,
    /// Slot that raised a timeout snapshot
    pub exception_slot_id: u8,
    /// Wait kind of a wait timeout
    pub wait_type: u8,
    /// Timeout in seconds
    pub timeout: u32,
}

impl CommonInfo {
    fn parse(r: &Le<'_>) -> Result<Self> {
        Ok(Self {
            chip_id: r.u16(0)?,
            die_id: r.u16(2)?,
            stream_id: r.u16(4)?,
            task_id: r.u16(6)?,
            sq_id: r.u16(8)?,
            core_num: r.u16(10)?,
            flag: r.u8(12)?,
            slot_num: r.u8(13)?,
            exception_slot_id: r.u8(14)?,
            wait_type: r.u8(15)?,
            timeout: r.u32(16)?,
        })
    }

    fn write(&self, w: &mut LeMut) {
        w.u16(0, self.chip_id);
        w.u16(2, self.die_id);
        w.u16(4, self.stream_id);
        w.u16(6, self.task_id);
        w.u16(8, self.sq_id);
        w.u16(10, self.core_num);
        w.u8(12, self.flag);
        w.u8(13, self.slot_num);
        w.u8(14, self.exception_slot_id);
        w.u8(15, self.wait_type);
        w.u32(16, self.timeout);
        w.u32(20, 0);
    }
}

/// Register snapshot of one faulting core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreErrorEntry {
    /// Core id
    pub core_id: u64,
    /// Error code words
    pub aic_error: [u64; 3],
    /// Kernel start program counter
    pub pc_start: u64,
    /// Program counter at the fault
    pub current_pc: u64,
    /// Vector unit error info
    pub vec_err: u64,
    /// MTE error info
    pub mte_err: u64,
    /// Instruction fetch error info
    pub ifu_err: u64,
    /// Scalar unit error info
    pub ccu_err: u64,
    /// Cube unit error info
    pub cube_err: u64,
    /// Bus interface error info
    pub biu_err: u64,
    /// Error mask
    pub aic_error_mask: u64,
    /// Argument base address
    pub para_base: u64,
    /// Fixpipe error word 0
    pub fixp_error0: u32,
    /// Fixpipe error word 1
    pub fixp_error1: u32,
    /// FFTS+ context id
    pub fsm_cxt_id: u16,
    /// FFTS+ thread id
    pub fsm_thread_id: u8,
    /// FSM id
    pub fsm_id: u8,
    /// FSM slot id
    pub fsm_tslot_id: u8,
    /// FSM block id
    pub fsm_blk_id: u8,
    /// FSM sub block id
    pub fsm_sublk_id: u8,
    /// Sub error type
    pub sub_err_type: u8,
}

impl CoreErrorEntry {
    fn parse(r: &Le<'_>, b: usize) -> Result<Self> {
        Ok(Self {
            core_id: r.u64(b)?,
            aic_error: [r.u64(b + 8)?, r.u64(b + 16)?, r.u64(b + 24)?],
            pc_start: r.u64(b + 32)?,
            current_pc: r.u64(b + 40)?,
            vec_err: r.u64(b + 48)?,
            mte_err: r.u64(b + 56)?,
            ifu_err: r.u64(b + 64)?,
            ccu_err: r.u64(b + 72)?,
            cube_err: r.u64(b + 80)?,
            biu_err: r.u64(b + 88)?,
            aic_error_mask: r.u64(b + 96)?,
            para_base: r.u64(b + 104)?,
            fixp_error0: r.u32(b + 112)?,
            fixp_error1: r.u32(b + 116)?,
            fsm_cxt_id: r.u16(b + 120)?,
            fsm_thread_id: r.u8(b + 122)?,
            fsm_id: r.u8(b + 123)?,
            fsm_tslot_id: r.u8(b + 124)?,
            fsm_blk_id: r.u8(b + 125)?,
            fsm_sublk_id: r.u8(b + 126)?,
            sub_err_type: r.u8(b + 127)?,
        })
    }

    fn write(&self, w: &mut LeMut, b: usize) {
        let words = [
            self.core_id,
            self.aic_error[0],
            self.aic_error[1],
            self.aic_error[2],
            self.pc_start,
            self.current_pc,
            self.vec_err,
            self.mte_err,
            self.ifu_err,
            self.ccu_err,
            self.cube_err,
            self.biu_err,
            self.aic_error_mask,
            self.para_base,
        ];
        for (i, v) in words.iter().enumerate() {
            w.u64(b + i * 8, *v);
        }
        w.u32(b + 112, self.fixp_error0);
        w.u32(b + 116, self.fixp_error1);
        w.u16(b + 120, self.fsm_cxt_id);
        w.u8(b + 122, self.fsm_thread_id);
        w.u8(b + 123, self.fsm_id);
        w.u8(b + 124, self.fsm_tslot_id);
        w.u8(b + 125, self.fsm_blk_id);
        w.u8(b + 126, self.fsm_sublk_id);
        w.u8(b + 127, self.sub_err_type);
    }
}

/// Channel level SDMA status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdmaStatus {
    /// Channel id
    pub channel: u64,
    /// Channel status bitmask
    pub channel_status: u64,
    /// Completion status code
    pub cqe_status: u32,
    /// Channel configuration words
    pub settings: [u64; 3],
    /// Submission queue base address
    pub sq_base_addr: u64,
}

/// Per channel SDMA snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdmaChannelEntry {
    /// Channel id
    pub channel_id: u8,
    /// FFTS+ slot id
    pub tslot_id: u8,
    /// FFTS+ context id
    pub context_id: u16,
    /// FFTS+ thread id
    pub thread_id: u16,
    /// Channel or block FSM state
    pub fsm_state: u32,
    /// Outstanding transfer count
    pub ost_count: u32,
    /// Channel free flag
    pub ch_free: u32,
    /// Interrupt status
    pub irq_status: u32,
    /// Completion status; FFTS+ records carry it in bits 17..22
    pub cqe_status: u32,
}

impl SdmaChannelEntry {
    fn parse(r: &Le<'_>, b: usize) -> Result<Self> {
        Ok(Self {
            channel_id: r.u8(b)?,
            tslot_id: r.u8(b + 1)?,
            context_id: r.u16(b + 2)?,
            thread_id: r.u16(b + 4)?,
            fsm_state: r.u32(b + 8)?,
            ost_count: r.u32(b + 12)?,
            ch_free: r.u32(b + 16)?,
            irq_status: r.u32(b + 20)?,
            cqe_status: r.u32(b + 24)?,
        })
    }

    fn write(&self, w: &mut LeMut, b: usize) {
        w.u8(b, self.channel_id);
        w.u8(b + 1, self.tslot_id);
        w.u16(b + 2, self.context_id);
        w.u16(b + 4, self.thread_id);
        w.u32(b + 8, self.fsm_state);
        w.u32(b + 12, self.ost_count);
        w.u32(b + 16, self.ch_free);
        w.u32(b + 20, self.irq_status);
        w.u32(b + 24, self.cqe_status);
        w.u32(b + 28, 0);
    }
}

/// One AICPU worker of an FFTS+ AICPU fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AicpuCoreEntry {
    /// AICPU id
    pub aicpu_id: u8,
    /// Worker state
    pub state: u8,
    /// FFTS+ slot id
    pub tslot_id: u8,
    /// FFTS+ context id
    pub context_id: u16,
    /// FFTS+ thread id
    pub thread_id: u16,
}

/// One DSA channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DsaChannelEntry {
    /// Channel id
    pub chan_id: u8,
    /// FFTS+ context id
    pub context_id: u16,
    /// FFTS+ thread id
    pub thread_id: u16,
    /// Error interrupt status
    pub chan_err: u32,
}

/// A notify wait stuck in a collective task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifyContext {
    /// FFTS+ context id
    pub context_id: u32,
    /// Notify id
    pub notify_id: u32,
}

/// One slot of an AI core timeout snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotDfx {
    /// Slot id
    pub slot_id: u8,
    /// Task flavour; [`SlotDfx::FFTS_PLUS_TYPE`] for FFTS+ contexts
    pub ffts_type: u8,
    /// FFTS+ context id
    pub context_id: u16,
    /// Stream id
    pub stream_id: u16,
    /// Task id
    pub task_id: u16,
    /// AI cores owned by the slot
    pub aic_own_bitmap: u64,
    /// Vector cores owned by the slot, low word
    pub aiv_own_bitmap0: u64,
    /// Vector cores owned by the slot, high word
    pub aiv_own_bitmap1: u64,
    /// Kernel start program counter
    pub pc_start: u64,
}

impl SlotDfx {
    /// `ffts_type` of FFTS+ slots
    pub const FFTS_PLUS_TYPE: u8 = 4;
}

/// One core of an AI core timeout snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreDfx {
    /// Core id
    pub core_id: u16,
    /// Core type
    pub core_type: u8,
    /// Sub error; zero means nothing to report
    pub sub_error: u8,
    /// Owning slot
    pub slot_id: u8,
    /// Program counter at the snapshot
    pub current_pc: u64,
}

/// Decoded error record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorRecord {
    /// AI core, vector core and fused kernel faults
    Core {
        /// Discriminant
        kind: ErrorType,
        /// Shared fields
        common: CommonInfo,
        /// Faulting cores
        cores: Vec<CoreErrorEntry>,
    },
    /// SDMA faults
    Sdma {
        /// Discriminant
        kind: ErrorType,
        /// Shared fields
        common: CommonInfo,
        /// Channel status
        status: SdmaStatus,
        /// Channel snapshots
        channels: Vec<SdmaChannelEntry>,
    },
    /// AICPU faults
    Aicpu {
        /// Discriminant
        kind: ErrorType,
        /// Shared fields
        common: CommonInfo,
        /// Kernel error code
        errcode: u64,
        /// Stream id from the kernel response
        rsp_stream_id: u32,
        /// Task id from the kernel response
        rsp_task_id: u32,
        /// Worker snapshots of FFTS+ faults
        cores: Vec<AicpuCoreEntry>,
    },
    /// Media processing fault
    Dvpp {
        /// Shared fields
        common: CommonInfo,
        /// Exception type
        exception_type: u16,
        /// Submission entry type
        sqe_type: u16,
    },
    /// DSA faults
    Dsa {
        /// Discriminant
        kind: ErrorType,
        /// Shared fields
        common: CommonInfo,
        /// Stream id from the SQE header
        sqe_stream_id: u16,
        /// Task id from the SQE header
        sqe_task_id: u16,
        /// Channel snapshots
        channels: Vec<DsaChannelEntry>,
    },
    /// Malformed submission entry
    Sqe {
        /// Shared fields
        common: CommonInfo,
        /// Queue head at the fault
        sq_head: u16,
        /// Raw entry
        sqe: [u32; SQE_WORDS],
    },
    /// Notify or event wait timeout
    WaitTimeout {
        /// Shared fields
        common: CommonInfo,
        /// Notify or event id
        wait_id: u32,
    },
    /// Collective task timeout
    HcclTimeout {
        /// Shared fields
        common: CommonInfo,
        /// Stuck notify waits
        contexts: Vec<NotifyContext>,
    },
    /// AI core timeout snapshot
    TimeoutDfx {
        /// Shared fields
        common: CommonInfo,
        /// Active slots
        slots: Vec<SlotDfx>,
        /// Cores
        cores: Vec<CoreDfx>,
    },
}

/// Raw element: discriminant, serial number and payload
#[derive(Debug, Clone, Copy)]
pub struct RawElement<'a> {
    /// Error type as reported
    pub error_type: u32,
    /// Serial number of the record
    pub error_number: u64,
    /// Bytes after the prefix
    pub payload: &'a [u8],
}

impl<'a> RawElement<'a> {
    /// Split an element slot into prefix fields and payload
    pub fn parse(slot: &'a [u8]) -> Result<Self> {
        let r = Le { raw: slot };
        Ok(Self {
            error_type: r.u32(0)?,
            error_number: r.u64(8)?,
            payload: &slot[ELEMENT_PREFIX_LEN..],
        })
    }
}

impl ErrorRecord {
    /// Decode the payload of a `kind` element
    pub fn parse(kind: ErrorType, payload: &[u8]) -> Result<Self> {
        let r = Le { raw: payload };
        let common = CommonInfo::parse(&r)?;
        let declared = common.core_num as usize;
        let record = match kind {
            ErrorType::Aicore
            | ErrorType::Aivector
            | ErrorType::FftsPlusAicore
            | ErrorType::FftsPlusAivector
            | ErrorType::FusionKernel => {
                let n = r.count(COMMON_LEN, CORE_ENTRY_LEN, declared);
                let cores = (0..n)
                    .map(|i| CoreErrorEntry::parse(&r, COMMON_LEN + i * CORE_ENTRY_LEN))
                    .collect::<Result<_>>()?;
                Self::Core { kind, common, cores }
            }
            ErrorType::Sdma | ErrorType::FftsPlusSdma => {
                let status = SdmaStatus {
                    channel: r.u64(24)?,
                    channel_status: r.u64(32)?,
                    cqe_status: r.u32(40)?,
                    settings: [r.u64(48)?, r.u64(56)?, r.u64(64)?],
                    sq_base_addr: r.u64(72)?,
                };
                let n = r.count(SDMA_CHANNELS_OFFSET, SDMA_CHANNEL_LEN, declared);
                let channels = (0..n)
                    .map(|i| SdmaChannelEntry::parse(&r, SDMA_CHANNELS_OFFSET + i * SDMA_CHANNEL_LEN))
                    .collect::<Result<_>>()?;
                Self::Sdma { kind, common, status, channels }
            }
            ErrorType::Aicpu | ErrorType::FftsPlusAicpu => {
                let n = r.count(AICPU_CORES_OFFSET, AICPU_CORE_LEN, declared);
                let cores = (0..n)
                    .map(|i| -> Result<AicpuCoreEntry> {
                        let b = AICPU_CORES_OFFSET + i * AICPU_CORE_LEN;
                        Ok(AicpuCoreEntry {
                            aicpu_id: r.u8(b)?,
                            state: r.u8(b + 1)?,
                            tslot_id: r.u8(b + 2)?,
                            context_id: r.u16(b + 4)?,
                            thread_id: r.u16(b + 6)?,
                        })
                    })
                    .collect::<Result<_>>()?;
                Self::Aicpu {
                    kind,
                    common,
                    errcode: r.u64(24)?,
                    rsp_stream_id: r.u32(32)?,
                    rsp_task_id: r.u32(36)?,
                    cores,
                }
            }
            ErrorType::Dvpp => Self::Dvpp {
                common,
                exception_type: r.u16(24)?,
                sqe_type: r.u16(26)?,
            },
            ErrorType::Dsa | ErrorType::FftsPlusDsa => {
                let n = r.count(DSA_CHANNELS_OFFSET, DSA_CHANNEL_LEN, declared);
                let channels = (0..n)
                    .map(|i| -> Result<DsaChannelEntry> {
                        let b = DSA_CHANNELS_OFFSET + i * DSA_CHANNEL_LEN;
                        Ok(DsaChannelEntry {
                            chan_id: r.u8(b)?,
                            context_id: r.u16(b + 2)?,
                            thread_id: r.u16(b + 4)?,
                            chan_err: r.u32(b + 8)?,
                        })
                    })
                    .collect::<Result<_>>()?;
                Self::Dsa {
                    kind,
                    common,
                    sqe_stream_id: r.u16(24)?,
                    sqe_task_id: r.u16(26)?,
                    channels,
                }
            }
            ErrorType::Sqe => {
                let mut sqe = [0u32; SQE_WORDS];
                for (i, word) in sqe.iter_mut().enumerate() {
                    *word = r.u32(SQE_OFFSET + i * 4)?;
                }
                Self::Sqe { common, sq_head: r.u16(24)?, sqe }
            }
            ErrorType::WaitTimeout => Self::WaitTimeout { common, wait_id: r.u32(24)? },
            ErrorType::HcclFftsPlusTimeout => {
                let declared = (r.u32(24)? as usize).min(HCCL_MAX_CONTEXT_NUM);
                let n = r.count(HCCL_CONTEXTS_OFFSET, HCCL_CONTEXT_LEN, declared);
                let contexts = (0..n)
                    .map(|i| -> Result<NotifyContext> {
                        let b = HCCL_CONTEXTS_OFFSET + i * HCCL_CONTEXT_LEN;
                        Ok(NotifyContext { context_id: r.u32(b)?, notify_id: r.u32(b + 4)? })
                    })
                    .collect::<Result<_>>()?;
                Self::HcclTimeout { common, contexts }
            }
            ErrorType::AicoreTimeoutDfx => {
                let slot_num = (common.slot_num as usize).min(DFX_SLOT_NUM);
                let slots = (0..slot_num)
                    .map(|i| -> Result<SlotDfx> {
                        let b = COMMON_LEN + i * DFX_SLOT_LEN;
                        Ok(SlotDfx {
                            slot_id: r.u8(b)?,
                            ffts_type: r.u8(b + 1)?,
                            context_id: r.u16(b + 2)?,
                            stream_id: r.u16(b + 4)?,
                            task_id: r.u16(b + 6)?,
                            aic_own_bitmap: r.u64(b + 8)?,
                            aiv_own_bitmap0: r.u64(b + 16)?,
                            aiv_own_bitmap1: r.u64(b + 24)?,
                            pc_start: r.u64(b + 32)?,
                        })
                    })
                    .collect::<Result<_>>()?;
                let n = r.count(DFX_CORES_OFFSET, DFX_CORE_LEN, declared);
                let cores = (0..n)
                    .map(|i| -> Result<CoreDfx> {
                        let b = DFX_CORES_OFFSET + i * DFX_CORE_LEN;
                        Ok(CoreDfx {
                            core_id: r.u16(b)?,
                            core_type: r.u8(b + 2)?,
                            sub_error: r.u8(b + 3)?,
                            slot_id: r.u8(b + 4)?,
                            current_pc: r.u64(b + 8)?,
                        })
                    })
                    .collect::<Result<_>>()?;
                Self::TimeoutDfx { common, slots, cores }
            }
        };
        Ok(record)
    }

    /// Discriminant of the record
    pub fn kind(&self) -> ErrorType {
        match self {
            Self::Core { kind, .. }
            | Self::Sdma { kind, .. }
            | Self::Aicpu { kind, .. }
            | Self::Dsa { kind, .. } => *kind,
            Self::Dvpp { .. } => ErrorType::Dvpp,
            Self::Sqe { .. } => ErrorType::Sqe,
            Self::WaitTimeout { .. } => ErrorType::WaitTimeout,
            Self::HcclTimeout { .. } => ErrorType::HcclFftsPlusTimeout,
            Self::TimeoutDfx { .. } => ErrorType::AicoreTimeoutDfx,
        }
    }

    /// Shared fields
    pub fn common(&self) -> &CommonInfo {
        match self {
            Self::Core { common, .. }
            | Self::Sdma { common, .. }
            | Self::Aicpu { common, .. }
            | Self::Dvpp { common, .. }
            | Self::Dsa { common, .. }
            | Self::Sqe { common, .. }
            | Self::WaitTimeout { common, .. }
            | Self::HcclTimeout { common, .. }
            | Self::TimeoutDfx { common, .. } => common,
        }
    }

    /// Stream and task the record refers to
    ///
    /// DSA records carry them in the SQE header; timeout snapshots span
    /// several tasks and report [`UNKNOWN_ID`].
    pub fn stream_task(&self) -> (u16, u16) {
        match self {
            Self::Dsa { sqe_stream_id, sqe_task_id, .. } => (*sqe_stream_id, *sqe_task_id),
            Self::TimeoutDfx { .. } => (UNKNOWN_ID, UNKNOWN_ID),
            other => {
                let c = other.common();
                (c.stream_id, c.task_id)
            }
        }
    }

    /// Encode the payload as a device would produce it
    pub fn encode(&self) -> Vec<u8> {
        let mut w = LeMut::default();
        self.common().write(&mut w);
        match self {
            Self::Core { cores, .. } => {
                for (i, core) in cores.iter().enumerate() {
                    core.write(&mut w, COMMON_LEN + i * CORE_ENTRY_LEN);
                }
            }
            Self::Sdma { status, channels, .. } => {
                w.u64(24, status.channel);
                w.u64(32, status.channel_status);
                w.u32(40, status.cqe_status);
                w.u32(44, 0);
                for (i, s) in status.settings.iter().enumerate() {
                    w.u64(48 + i * 8, *s);
                }
                w.u64(72, status.sq_base_addr);
                for (i, ch) in channels.iter().enumerate() {
                    ch.write(&mut w, SDMA_CHANNELS_OFFSET + i * SDMA_CHANNEL_LEN);
                }
            }
            Self::Aicpu { errcode, rsp_stream_id, rsp_task_id, cores, .. } => {
                w.u64(24, *errcode);
                w.u32(32, *rsp_stream_id);
                w.u32(36, *rsp_task_id);
                for (i, core) in cores.iter().enumerate() {
                    let b = AICPU_CORES_OFFSET + i * AICPU_CORE_LEN;
                    w.u8(b, core.aicpu_id);
                    w.u8(b + 1, core.state);
                    w.u8(b + 2, core.tslot_id);
                    w.u16(b + 4, core.context_id);
                    w.u16(b + 6, core.thread_id);
                }
            }
            Self::Dvpp { exception_type, sqe_type, .. } => {
                w.u16(24, *exception_type);
                w.u16(26, *sqe_type);
            }
            Self::Dsa { sqe_stream_id, sqe_task_id, channels, .. } => {
                w.u16(24, *sqe_stream_id);
                w.u16(26, *sqe_task_id);
                w.u32(28, 0);
                for (i, ch) in channels.iter().enumerate() {
                    let b = DSA_CHANNELS_OFFSET + i * DSA_CHANNEL_LEN;
                    w.u8(b, ch.chan_id);
                    w.u16(b + 2, ch.context_id);
                    w.u16(b + 4, ch.thread_id);
                    w.u32(b + 8, ch.chan_err);
                    w.u32(b + 12, 0);
                }
            }
            Self::Sqe { sq_head, sqe, .. } => {
                w.u16(24, *sq_head);
                for (i, word) in sqe.iter().enumerate() {
                    w.u32(SQE_OFFSET + i * 4, *word);
                }
            }
            Self::WaitTimeout { wait_id, .. } => w.u32(24, *wait_id),
            Self::HcclTimeout { contexts, .. } => {
                w.u32(24, contexts.len() as u32);
                for (i, ctx) in contexts.iter().enumerate() {
                    let b = HCCL_CONTEXTS_OFFSET + i * HCCL_CONTEXT_LEN;
                    w.u32(b, ctx.context_id);
                    w.u32(b + 4, ctx.notify_id);
                }
            }
            Self::TimeoutDfx { slots, cores, .. } => {
                for (i, slot) in slots.iter().take(DFX_SLOT_NUM).enumerate() {
                    let b = COMMON_LEN + i * DFX_SLOT_LEN;
                    w.u8(b, slot.slot_id);
                    w.u8(b + 1, slot.ffts_type);
                    w.u16(b + 2, slot.context_id);
                    w.u16(b + 4, slot.stream_id);
                    w.u16(b + 6, slot.task_id);
                    w.u64(b + 8, slot.aic_own_bitmap);
                    w.u64(b + 16, slot.aiv_own_bitmap0);
                    w.u64(b + 24, slot.aiv_own_bitmap1);
                    w.u64(b + 32, slot.pc_start);
                }
                w.put(DFX_CORES_OFFSET, &[]);
                for (i, core) in cores.iter().enumerate() {
                    let b = DFX_CORES_OFFSET + i * DFX_CORE_LEN;
                    w.u16(b, core.core_id);
                    w.u8(b + 2, core.core_type);
                    w.u8(b + 3, core.sub_error);
                    w.u8(b + 4, core.slot_id);
                    w.u64(b + 8, core.current_pc);
                }
            }
        }
        w.raw
    }
}

/// Build a full element slot of `element_size` bytes
pub fn encode_element(error_type: u32, error_number: u64, payload: &[u8], element_size: usize) -> Result<Vec<u8>> {
    if ELEMENT_PREFIX_LEN + payload.len() > element_size {
        return Err(DumpError::Serialize(format!(
            "record of {} bytes does not fit a {} byte element",
            payload.len(),
            element_size
        )));
    }
    let mut slot = vec![0u8; element_size];
    slot[..4].copy_from_slice(&error_type.to_le_bytes());
    slot[8..16].copy_from_slice(&error_number.to_le_bytes());
    slot[ELEMENT_PREFIX_LEN..ELEMENT_PREFIX_LEN + payload.len()].copy_from_slice(payload);
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn common(stream: u16, task: u16, core_num: u16) -> CommonInfo {
        CommonInfo { stream_id: stream, task_id: task, core_num, ..CommonInfo::default() }
    }

    #[test]
    fn test_error_type_bounds() {
        assert_eq!(ErrorType::from_u32(15), Some(ErrorType::FusionKernel));
        assert_eq!(ErrorType::from_u32(ErrorType::MAX + 1), None);
        assert!(ErrorType::FftsPlusDsa.is_ffts_plus());
        assert!(!ErrorType::Sdma.is_ffts_plus());
        assert_eq!(ErrorType::Aivector.head_msg(), "aivec error");
        assert_eq!(ErrorType::Dvpp.head_msg(), "undefine errType");
    }

    #[test]
    fn test_core_record_in_slot() {
        let record = ErrorRecord::Core {
            kind: ErrorType::Aicore,
            common: common(3, 9, 2),
            cores: vec![
                CoreErrorEntry { core_id: 1, aic_error: [0x1, 0, 0], pc_start: 0x4000, ..Default::default() },
                CoreErrorEntry { core_id: 2, fsm_cxt_id: 5, ..Default::default() },
            ],
        };
        let slot = encode_element(0, 42, &record.encode(), 512).expect("fits");
        let raw = RawElement::parse(&slot).expect("prefix");
        assert_eq!(raw.error_type, 0);
        assert_eq!(raw.error_number, 42);
        let parsed = ErrorRecord::parse(ErrorType::Aicore, raw.payload).expect("decode");
        assert_eq!(parsed, record);
        assert_eq!(parsed.stream_task(), (3, 9));
    }

    #[test]
    fn test_declared_count_clamped_to_slot() {
        let record = ErrorRecord::Core {
            kind: ErrorType::Aivector,
            common: common(1, 1, 1),
            cores: vec![CoreErrorEntry::default()],
        };
        let mut payload = record.encode();
        payload[10..12].copy_from_slice(&40u16.to_le_bytes());
        match ErrorRecord::parse(ErrorType::Aivector, &payload).expect("decode") {
            ErrorRecord::Core { cores, .. } => assert_eq!(cores.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stream_task_per_variant() {
        let dsa = ErrorRecord::Dsa {
            kind: ErrorType::Dsa,
            common: common(1, 2, 0),
            sqe_stream_id: 7,
            sqe_task_id: 8,
            channels: Vec::new(),
        };
        assert_eq!(dsa.stream_task(), (7, 8));

        let dfx = ErrorRecord::TimeoutDfx { common: common(1, 2, 0), slots: Vec::new(), cores: Vec::new() };
        assert_eq!(dfx.stream_task(), (UNKNOWN_ID, UNKNOWN_ID));
    }

    #[test]
    fn test_truncated_payload() {
        let err = ErrorRecord::parse(ErrorType::Sdma, &[0u8; 30]).unwrap_err();
        assert!(matches!(err, DumpError::Serialize(_)));
    }

    #[test]
    fn test_element_too_small() {
        assert!(encode_element(2, 1, &[0u8; 100], 64).is_err());
    }

    #[test]
    fn test_hccl_contexts_clamped() {
        let record = ErrorRecord::HcclTimeout {
            common: common(4, 5, 0),
            contexts: (0..70).map(|i| NotifyContext { context_id: i, notify_id: i * 2 }).collect(),
        };
        match ErrorRecord::parse(ErrorType::HcclFftsPlusTimeout, &record.encode()).expect("decode") {
            ErrorRecord::HcclTimeout { contexts, .. } => {
                assert_eq!(contexts.len(), HCCL_MAX_CONTEXT_NUM);
                assert_eq!(contexts[3], NotifyContext { context_id: 3, notify_id: 6 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
