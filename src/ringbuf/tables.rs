//! Static decoding tables for device error records
//!
//! Bit positions of the core error table follow the register layout: the
//! first error word covers bits 0..64, the second word 64..128 and the folded
//! third word starts at 128.

/// Maximum length of an assembled diagnostic string
pub const ERROR_MSG_MAX_LEN: usize = 400;

/// Core error conditions, indexed by global bit position
pub static CORE_ERROR_TABLE: [(&str, &str); 176] = [
    ("BIU_L2_READ_OOB", "Bus read access error. You are advised to check the L2 code."),
    ("BIU_L2_WRITE_OOB", "Bus write access error. You are advised to check the L2 code."),
    ("CCU_CALL_DEPTH_OVRFLW", "The number of nesting times of call the function is greater than CTRL[5:2]."),
    ("CCU_DIV0", "divide by zero."),
    ("CCU_ILLEGAL_INSTR", "Illegal instruction, which is usually caused by unaligned UUB addresses."),
    ("CCU_LOOP_CNT_ERR", "The lpcont of the loop instruction is 0."),
    ("CCU_LOOP_ERR", "It is found that the loopend instruction is executed before executing loop instruction.The lcnt value is 0 when the loopend instruction is executed."),
    ("CCU_NEG_SQRT", "The number of roots is negative. "),
    ("CCU_UB_ECC", "ECC verification failed when UB read/write."),
    ("CUBE_INVLD_INPUT", "the data of L0a and L0b read back is the INF or NAN data."),
    ("CUBE_L0A_ECC", "ECC verification failed when L0A read/write."),
    ("CUBE_L0A_RDWR_CFLT", "L0A read/write conflict."),
    ("CUBE_L0A_WRAP_AROUND", "The operation address of L0A exceeds the maximum range of L0A."),
    ("CUBE_L0B_ECC", "ECC verification failed when L0B read/write."),
    ("CUBE_L0B_RDWR_CFLT", "L0B read/write conflict."),
    ("CUBE_L0B_WRAP_AROUND", "The operation address of L0B exceeds the maximum range of L0B."),
    ("CUBE_L0C_ECC", "ECC verification failed when L0C read/write."),
    ("CUBE_L0C_RDWR_CFLT", "L0C read/write conflict(vec read operation or cube write operation)."),
    ("CUBE_L0C_SELF_RDWR_CFLT", "L0C read/write conflict(cube read operation or cube write operation)."),
    ("CUBE_L0C_WRAP_AROUND", "The operation address of L0C exceeds the maximum range of L0C."),
    ("IFU_BUS_ERR", "it is usually instruction errors. The probability is low."),
    ("MTE_AIPP_ILLEGAL_PARAM", "The configuration of AIPP is incorrect."),
    ("MTE_BAS_RADDR_OBOUND", "The base address of the mte load3d instruction is out of boundary."),
    ("MTE_BIU_RDWR_RESP", "The DDR address of the MTE instruction is out of range."),
    ("MTE_CIDX_OVERFLOW", "The C0 index of the mte load3d instruction overflows."),
    ("MTE_DECOMP", "The number of load index entries is different from the number of data blocks to be decompressed in the latest load decompressed data."),
    ("MTE_F1WPOS_LARGER_FSIZE", "The 1st filter window position of the mte load3d instruction is greater than (Feature map size - Filter size)."),
    ("MTE_FMAP_LESS_KERNEL", "The feature map size of the mte load3d instruction is less than the kernel size."),
    ("MTE_FMAPWH_LARGER_L1SIZE", "FeatureMapW * FeatureMapH * (CIndex + 1) of the mte load3d instruction is greater than L1 buffer size/32."),
    ("MTE_FPOS_LARGER_FSIZE", "The fetch position in filter of the mte load3d instruction is greater than the filter size."),
    ("MTE_GDMA_ILLEGAL_BURST_LEN", "The burst length of the mte instruction is incorrect."),
    ("MTE_GDMA_ILLEGAL_BURST_NUM", "The burst num of the mte command is incorrect."),
    ("MTE_GDMA_READ_OVERFLOW", "The read address of the MTE instruction is out of range."),
    ("MTE_GDMA_WRITE_OVERFLOW", "The write address of the MTE instruction is out of range."),
    ("MTE_COMP", "A new index table is delivered before the current index is completed."),
    ("MTE_ILLEGAL_FM_SIZE", "The feature map size of the mte load3d instruction is illegal(size = 0)."),
    ("MTE_ILLEGAL_L1_3D_SIZE", "The set l1 3D size of the mte load3d instruction is illegal."),
    ("MTE_ILLEGAL_STRIDE", "The stride size of the mte load3d instruction is illegal."),
    ("MTE_L0A_RDWR_CFLT", "L0A read/write conflict in the MTE (same address)."),
    ("MTE_L0B_RDWR_CFLT", "L0B read/write conflict in the MTE (same address)."),
    ("MTE_L1_ECC", "ECC verification failed when L1 read/write."),
    ("MTE_PADDING_CFG", "The error in mte load3d padding configuration."),
    ("MTE_READ_OVERFLOW", "The read address of the mte load2d instruction is greater than the maximum address of the source (L1)."),
    ("MTE_ROB_ECC", "An error occurs in the mte ROB ECC check."),
    ("MTE_TLU_ECC", "An error occurred during the ECC check of the MTE TLU."),
    ("MTE_UB_ECC", "The ECC verification of the UB in the VEC failed."),
    ("MTE_UNZIP", "Decompression exception: length check or parity check or empty FIFO read or full FIFO write."),
    ("MTE_WRITE_3D_OVERFLOW", "The write address of the mte load3d instruction is out of range."),
    ("MTE_WRITE_OVERFLOW", "The write address of the mte load2d instruction is greater than the maximum destination address."),
    ("VEC_DATA_EXCP_CCU", "Data from the CCU is abnormal."),
    ("VEC_DATA_EXCP_MTE", "Data from the MTE is abnormal."),
    ("VEC_DATA_EXCP_VEC", "Data from the VEC is abnormal."),
    ("VEC_DIV0", "VEC instruction error: reciprocal division by 0 error."),
    ("VEC_ILLEGAL_MASK", "VEC instruction error: the MASK instruction is all 0."),
    ("VEC_INF_NAN", "VEC instruction error: the data is inf and nan."),
    ("VEC_L0C_ECC", "VEC instruction error: ECC verification failed when the loc is read."),
    ("VEC_L0C_RDWR_CFLT", "VEC read/write L0C and cube read/write L0C addresses are the same."),
    ("VEC_NEG_LN", "VEC instruction error: the value of ln is a negative number."),
    ("VEC_NEG_SQRT", "VEC instruction error: the reciprocal of the square root is a negative number."),
    ("VEC_SAME_BLK_ADDR", "VEC instruction error: the destination blocks have the same address."),
    ("VEC_UB_ECC", "VEC instruction error: ECC verification failed when the UB is read."),
    ("VEC_UB_SELF_RDWR_CFLT", "The UB read address is same as the UB write address."),
    ("VEC_UB_WRAP_AROUND", "VEC instruction error: the ub address out of bounds."),
    ("BIU_DFX_ERR", "BIU error types, which need to be further read from BIU_STATUS1 bit 15:11."),
    ("CCU_SBUF_ECC", "ECC is reported in the CCU Scalar buffer."),
    ("VEC_COL2IMG_RD_FM_ADDR_OVFLOW", "The value of col2img is illegal."),
    ("VEC_COL2IMG_RD_DFM_ADDR_OVFFLOW", "The value of col2img is illegal."),
    ("VEC_COL2IMG_ILLEGAL_FM_SIZE", "The value of col2img is illegal."),
    ("VEC_COL2IMG_ILLEGAL_STRIDE", "The value of col2img is illegal."),
    ("VEC_COL2IMG_ILLEGAL_1ST_WIN_POS", "The value of col2img is illegal."),
    ("VEC_COL2IMG_ILLEGAL_FETCH_POS", "The value of col2img is illegal."),
    ("VEC_COL2IMG_ILLEGAL_K_SIZE", "The value of col2img is illegal."),
    ("CCU_INF_NAN", "The input of the floating-point instruction run by the CCU is nan/inf."),
    ("MTE_ILLEGAL_SCHN_CFG", "The small_channal enable flag is valid but does not meet the conditions for small_channal."),
    ("MTE_ATM_ADDR_MISALG", "MTE atomic add addresses are not aligned (AIC, AIV1, and AIV2)."),
    ("VEC_INSTR_ADDR_MISALIGN", "The UB address accessed by the VEC instruction is not aligned."),
    ("VEC_INSTR_ILLEGAL_CFG", "VEC supports illegal configurations in commands."),
    ("VEC_INSTR_UNDEF", "Commands not supported by the current VEC version."),
    ("CCU_ADDR_ERR", "CCU instruction address check error."),
    ("CCU_BUS_ERR", "When the D-cache reads and writes data to the UB, the response value returned by the bus is a non-zero value."),
    ("MTE_ERR_ADDR_MISALIGN", "instruction address misalign(ADDR_MISALIGN)."),
    ("MTE_ERR_DW_PAD_CONF_ERR", "DEPTHWIS PADDING is incorrectly configured."),
    ("MTE_ERR_DW_FMAP_H_ILLEGAL", "The value of H configured on the DEPTHWISE FMAP is less than 3."),
    ("MTE_ERR_WINO_L0B_WRITE_OVERFLOW", "L0B address overflow occurs when the WINOB writes to the L0B address."),
    ("MTE_ERR_WINO_L0B_READ_OVERFLOW", "The L1 address read by the WINOB overflows, and the loop occurs."),
    ("MTE_ERR_ILLEGAL_V_COV_PAD_CTL", "The value of WINOA V padding is illegal."),
    ("MTE_ERR_ILLEGAL_H_COV_PAD_CTL", "The value of WINOA H padding is illegal."),
    ("MTE_ERR_ILLEGAL_W_SIZE", "The value of WINOA fmap W is illegal."),
    ("MTE_ERR_ILLEGAL_H_SIZE", "The value of WINOA fmap H is illegal."),
    ("MTE_ERR_ILLEGAL_CHN_SIZE", "The value of CHN_SIZE is illegal."),
    ("MTE_ERR_ILLEGAL_K_M_EXT_STEP", "The value of K_M_EXT_STEP is illegal."),
    ("MTE_ERR_ILLEGAL_K_M_START_POS", "The value of K_M_START_POS is illegal."),
    ("MTE_ERR_ILLEGAL_SMALLK_CFG", "The small K configuration of the MTE load3d instruction is incorrect."),
    ("MTE_ERR_READ_3D_OVERFLOW", "The read address of the MTE load3d instruction is out of range."),
    ("CCU_VECIQ_ECC", "A 2-bit ECC error occurs in the VEC issue queue."),
    ("CCU_DC_DATA_ECC", "A 2-bit ECC error occurs in the data-cache data-ram."),
    ("CCU_DC_TAG_ECC", "A 2-bit ECC error occurs in the data-cache tag-ram."),
    ("CCU_DIV0_FP", "A error occurs in the FP32 DIV0."),
    ("CCU_NEG_SQRT_FP", "The input of the FP SQRT calculation unit is a negative number."),
    ("CNT_SW_BUS_ERR", "During the slow context switch, the SC transfers data through the AXI bus, and the AXI returns an error."),
    ("FIXP_ERR_INSTR_ADDR_MISAL", "Read L0C, read L1, and write FIXP buffer addresses are not aligned."),
    ("FIXP_ERR_ILLEGAL_CFG", "The configuration of FIXP is illegal."),
    ("FIXP_ERR_READ_L0C_OVFLW", "The read address of the L0C is out of range."),
    ("FIXP_ERR_READ_L1_OVFLW", "The read address of the L1 is out of range."),
    ("FIXP_ERR_READ_UB_OVFLW", "The read address of the UB is out of range."),
    ("FIXP_ERR_WRITE_L1_OVFLW", "The write address of the L1 is out of range."),
    ("FIXP_ERR_WRITE_UB_OVFLW", "The write address of the UB is out of range."),
    ("FIXP_ERR_FBUF_WRITE_OVFLW", "The write address of the FBUF is out of range."),
    ("FIXP_ERR_FBUF_READ_OVFLW", "The read address of the FBUF is out of range."),
    ("SC_REG_PARITY_ERR", "During safety check, parity errors occur in the registers in the nManager."),
    ("MTE_ERR_FIFO_PARITY", "The data read from the MTE internal FIFO is incorrect."),
    ("MTE_ERR_WAITSET", "The configuration of HWATI/HSET is incorrect."),
    ("CCU_ERR_PARITY_ERR", "A parity check error occurs in the SU internal buffer during the safety feature."),
    ("MTE_ERR_CACHE_ECC", "The MTE internal MVF cache fails."),
    ("CUBE_ERR_HSET_CNT_UNF", "A underflow error occurs in the CUBE HSET counter."),
    ("CUBE_ERR_HSET_CNT_OVF", "A overflow error occurs in the CUBE HSET counter."),
    ("MTE_ERR_INSTR_ILLEGAL_CFG", "The instruction configuration of MTE is illegal."),
    ("MTE_ERR_HEBCD", "The instruction configuration of HEBCD is illegal."),
    ("MTE_ERR_HEBCE", "The instruction configuration of HEBCE is illegal."),
    ("MTE_ERR_WAIPP", "The instruction configuration of WAIPP is illegal."),
    ("CCU_SEQ_ERR", "The SEQ command sequence is incorrect."),
    ("CCU_MPU_ERR", "The MPU address access is invalid."),
    ("CCU_LSU_ERR", "When the buffer is enabled, the stack access instruction cache is miss."),
    ("CCU_PB_ECC_ERR", "A 2-bit ECC error occurs in the parameter buffer."),
    ("MTE_UB_WR_OVFLW", "The address overflow occurs when the MTE writes to the UB address."),
    ("MTE_UB_RD_OVFLW", "The address overflow occurs when the MTE reads to the UB address."),
    ("CUBE_ILLEGAL_INSTR", "The instruction configuration of CUBE is illegal."),
    ("CCU_SAFETY_CRC_ERR", "MTE CRC error."),
    ("MTE_TIMEOUT", "Lite Only Error, an exception is reported when the MTE instruction or data times out."),
    ("MTE_UB_RD_CFLT", "Lite Only Error. When the MTE reads the ub, the ub read/write conflict occurs and an exception is reported."),
    ("MTE_UB_WR_CFLT", "Lite Only Error. When the MTE writes to the UB, the UB read/write conflict is reported."),
    ("MTE_KTABLE_WR_ADDR_OVERFLOW", "An exception is reported when a write address conflict occurs when the MTE is full."),
    ("MTE_KTABLE_RD_ADDR_OVERFLOW", "An exception is reported when a read address conflict occurs when the MTE is empty."),
    ("CCU_UB_RD_CFLT", "Lite Only Error. When the CCU reads the UB, the UB read and write conflict is reported."),
    ("CCU_UB_WR_CFLT", "Lite Only Error. When the CCU writes data to the UB, the UB read and write conflict occurs."),
    ("CCU_UB_OVERFLOW_ERR", "When AIC and AIV share the UB, LS/ST access overwriting occurs."),
    ("BIU_UNSPLIT_ERR", "An exception occurs on the BIU, for example, tag_id error or FIFO overflow."),
    ("MTE_STB_ECC_ERR", "Multi-bit ECC error occurs in the MTE STB."),
    ("MTE_AIPP_ECC_ERR", "Multi-bit ECC error occurs in the MTE AIPP."),
    ("CCU_LSU_ATOMIC_ERR", "Failed to execute atomic on the Scalar LSU."),
    ("CCU_CROSS_CORE_SET_OVFL_ERR", "The value of the flag counter for inter-core communication exceeds the maximum value 15."),
    ("FIXP_ERR_OUT_WRITE_OVERFLOW", "A overflow error occurs when the FIXP write."),
    ("CUBE_ERR_PBUF_WRAP_AROUND", "A round error occurs in the CUBE FIXP_BUFFER."),
    ("FIXP_L0C_ECC", "FIXP instruction error: ECC verification failed when the l0c is read."),
    ("MTE_ERR_L0C_RDWR_CFLT", "When the FIXP reads l0c, the read and write operations occur at the same address."),
    ("VEC_DATA_EXCPT_MTE", "An data_exception is reported when the MTE writes/reads."),
    ("VEC_DATA_EXCPT_SU", "An data_exception is reported when the SU writes/reads."),
    ("VEC_DATA_EXCPT_VEC", "An data_exception is reported when the VECTOR writes/reads."),
    ("VEC_INSTR_TIMEOUT", "The instruction running timeout."),
    ("VEC_INSTRS_UNDEF", "The instruction is not defined in ISA."),
    ("VEC_INSTR_ILL_CFG", "The instruction configuration of VEC is illegal."),
    ("VEC_INSTR_MISALIGN", "The instruction access UB address is not aligned."),
    ("VEC_INSTR_ILL_MASK", "The mask value is invalid."),
    ("VEC_INSTR_ILL_SQZN", "The sqzn value is invalid."),
    ("VEC_UB_ADDR_WRAP_AROUND", "The access address of the UB is out of range."),
    ("VEC_UB_ECC_MBERR", "Multi-bit ECC error occurs when access UB."),
    ("VEC_IDATA_INF_NAN", "The input data of the instruction operation is INF/NAN."),
    ("VEC_DIV_BY_ZERO", "The instruction of VEC divide-by-zero error."),
    ("VEC_VALU_NEG_LN", "The input data of the VALU lN operation is a negative number."),
    ("VEC_VALU_NEG_SQRT", "The input data of the VALU squart operation is a negative number."),
    ("VEC_VCI_IDATA_OUT_RANGE", "The input data of the VCI instruction is out of range."),
    ("VEC_ILL_VLOOP_OP", "A opcode error occurs in the VLOOP instruction."),
    ("VEC_ILL_VLOOP_SREG", "The number of VLOOP loop times at layer 4 is all 0."),
    ("VEC_LD_NUM_MISMATCH", "The code segment where the ld instruction resides contains a non-ld instruction."),
    ("VEC_ST_NUM_MISMATCH", "The code segment where the st instruction resides contains a non-st instruction."),
    ("VEC_EX_NUM_MISMATCH", "The code segment where the ex instruction resides contains a non-ex instruction."),
    ("VEC_LD_NUM_EXCEED_LIMIT", "The number of ld instructions exceeds the maximum specified in the ISA."),
    ("VEC_ST_NUM_EXCEED_LIMIT", "The number of st instructions exceeds the maximum specified in the ISA."),
    ("VEC_ILL_INSTR_PADDING", "The PADDING instruction of the VGA and VPD is not a VNOP."),
    ("VEC_ILL_VGA_VPD_ORDER", "The order of the VGA and VPD commands violates IAS constraints."),
    ("VEC_IC_ECC_ERR", "An ECC error occurs in the instruction fetched from the VEC ICACHE."),
    ("VEC_BIU_RESP_ERR", "The data returned by the BIU to the VEC is incorrect."),
    ("VEC_PB_ECC_MBERR", "The PB data returned by the SU to the VEC contains ECC errors."),
    ("VEC_PB_READ_NO_RESP", "The SU does not respond for a long time after receiving a PB read request from the VEC."),
    ("VEC_VALU_ILL_ISSUE", "VALU instruction transmit order violates ISA constraints."),
    ("VEC_ERR_PARITY_ERR", "A parity check error occurs in the VEC."),
];

/// Bit offset of the first core error word
pub const ERRCODE0_OFFSET: u32 = 0;
/// Bit offset of the second core error word
pub const ERRCODE2_OFFSET: u32 = 64;
/// Bit offset of the folded third core error word
pub const ERRCODE4_OFFSET: u32 = 128;

/// Message for a core error bit, if the bit is catalogued
pub fn core_error_message(bit: u32) -> Option<&'static str> {
    CORE_ERROR_TABLE.get(bit as usize).map(|(_, msg)| *msg)
}

/// Symbolic name for a core error bit
pub fn core_error_name(bit: u32) -> Option<&'static str> {
    CORE_ERROR_TABLE.get(bit as usize).map(|(name, _)| *name)
}

static CQE_STATUS_TABLE: [&str; 16] = [
    "SUCCESS",
    "One of the following errors may occur: 1)Submission Descriptor read response error, \
     2)Invalid OPCODE in the SQE.",
    "When the SQE translates a page table, the SMMU returns a Terminate error.",
    "Reserved.",
    "An error reported by the SDMA: can't access the DDR space.",
    "An error is reported by the SDMA: the transfer address delivered by the SDMA is not mapped in the DAW.",
    "An error is reported by the SDMA: the operation type is incorrect.",
    "An error is reported by the SDMA: a DDRC error occurs during the SDMA transfer.",
    "An error is reported by the SDMA: an ECC error occurs during the SDMA transfer.",
    "An error is reported by the SDMA: a COMPERR error occurs during the SDMA transfer.",
    "An error is reported by the SDMA: a COMPDATAERR error occurs during the SDMA transfer.",
    "An error is reported by the SDMA: an overflow error occurs during the reduce operation.",
    "An error is reported by the SDMA: an underflow error occurs during the reduce operation.",
    "An error is reported by the SDMA: the format of the reduce source data does not meet requirements.",
    "An error is reported by the SDMA: the format of the reduce destination data does not meet requirements.",
    "An error is reported by the SDMA: \
     the formats of the reduce source and destination data do not meet requirements.",
];

/// Description of an SDMA completion status
pub fn cqe_status_message(status: u32) -> Option<&'static str> {
    CQE_STATUS_TABLE.get(status as usize).copied()
}

/// SDMA channel status bit signalling a timeout
pub const SDMA_ERROR_TIMEOUT_BIT: u32 = 7;

static CHANNEL_ERROR_TABLE: [&str; 8] = [
    "Submission Descriptor read response error.",
    "The SMMU returns a Terminate error during page table translation.",
    "DMAA Error",
    "Reserved",
    "Reserved",
    "AXIM Berr.",
    "",
    "time out",
];

/// Description of an SDMA channel status bit
pub fn channel_error_message(bit: u32) -> Option<&'static str> {
    CHANNEL_ERROR_TABLE.get(bit as usize).copied()
}

/// SDMA completion status: DDRC error
pub const SDMA_STATUS_DDRC_ERROR: u32 = 0x8;
/// SDMA completion status: link error
pub const SDMA_STATUS_LINK_ERROR: u32 = 0x9;
/// SDMA completion status: poisoned data
pub const SDMA_STATUS_POISON_ERROR: u32 = 0xA;

/// Default AICPU failure description
pub const AICPU_DEFAULT_MSG: &str = "aicpu execute failed";

static AICPU_ERROR_TABLE: &[(u64, &str)] = &[
    (1, "execute kernel param invalid"),
    (2, "execute kernel inner error"),
    (3, "execute kernel timeout"),
    (201, "end of sequence"),
    (202, "convergence sensitivity feature abnormal"),
    (203, "stress detect feature abnormal"),
    (204, "The AICPU operator detects that the low-bit precision is abnormal"),
    (205, "The AICPU operator detects that the low-bit precision is abnormal for offline scenarios "),
    (206, "stress detect feature abnormal noras"),
    (207, "task wait for aicpu super task"),
    (10001, "bad param"),
    (10002, "open so failed"),
    (10003, "get kernel failed"),
    (10004, "execute kernel api param invalid"),
    (10005, "execute kernel api failed"),
    (10006, "inner error"),
    (21001, "param invalid"),
    (21002, "dump failed"),
    (21003, "drv error"),
    (21004, "tool error"),
    (21005, "logical task not found"),
    (21006, "task execute failed"),
    (21007, "task execute timeout"),
    (21008, "inner error"),
    (21009, "current resource or model is working"),
    (21010, "model not found"),
    (21011, "stream not found"),
    (21012, "operate not allowed with current model status"),
    (21013, "model exit error"),
    (21014, "reserved: inner error"),
    (22001, "param invalid"),
    (22002, "driver error"),
    (22003, "tool error"),
    (22004, "custom task execute failed"),
    (22005, "custom task execute timeout"),
    (22006, "custom task execute param invalid"),
    (22007, "inner error"),
    (22008, "reserved: inner error"),
];

/// Description of an AICPU error code, with the generic fallback
pub fn aicpu_error_message(errcode: u64) -> &'static str {
    AICPU_ERROR_TABLE
        .iter()
        .find(|(code, _)| *code == errcode)
        .map_or(AICPU_DEFAULT_MSG, |(_, msg)| *msg)
}

/// Fault events that prove a local multi-bit ECC / uncorrectable memory error
pub static LOCAL_UCE_BLOCKLIST: &[(u32, &str)] = &[
    (0x80CD_8008, "L2BUFF multi bit Err."),
    (0x80F2_180D, "HBMA/MATA Os Err."),
    (0x80F3_8008, "HBMA Multi Bit Ecc."),
    (0x8133_8002, "TS Dispatch Input Err."),
    (0x8133_8004, "TS Dispatch Config Err."),
    (0x813B_8002, "AIC Dispatch Input Error."),
    (0x813B_8004, "AIC Dispatch Config Error."),
    (0x8147_8002, "DVPP Dispatch Input Error."),
    (0x8147_8004, "DVPP Dispatch Config Error."),
    (0x815F_8002, "PERI Dispatch Input Error."),
    (0x815F_8004, "PERI Dispatch Config Error."),
    (0x8197_8002, "PCIE Dispatch Input Error."),
    (0x8197_8004, "PCIE Dispatch Config Error."),
    (0x81B5_8002, "UB Dispatch Input Error."),
    (0x81B5_8004, "UB Dispatch Config Error."),
    (0x813D_8009, "AIC AA Bus Error."),
    (0x81AF_8008, "UB multiple bit ecc error."),
    (0x81B1_8008, "UB PORT multiple bit ecc error."),
];

/// Fault events that rule out a remote link fault for collective traffic
pub static REMOTE_UCE_BLOCKLIST: &[(u32, &str)] = &[
    (0x80CD_8008, "L2BUFF multi bit Err."),
    (0x80F2_180D, "HBMA/MATA Os Err."),
    (0x80F3_8008, "HBMA Multi Bit Ecc."),
    (0x8133_8002, "TS Dispatch Input Err."),
    (0x8133_8004, "TS Dispatch Config Err."),
    (0x813B_8002, "AIC Dispatch Input Error."),
    (0x813B_8004, "AIC Dispatch Config Error."),
    (0x8147_8002, "DVPP Dispatch Input Error."),
    (0x8147_8004, "DVPP Dispatch Config Error."),
    (0x815F_8002, "PERI Dispatch Input Error."),
    (0x815F_8004, "PERI Dispatch Config Error."),
    (0x8197_8002, "PCIE Dispatch Input Error."),
    (0x8197_8004, "PCIE Dispatch Config Error."),
    (0x81B5_8002, "UB Dispatch Input Error."),
    (0x81B5_8004, "UB Dispatch Config Error."),
    (0x813D_8009, "AIC AA Bus Error."),
    (0x81B7_8009, "UB AA bus error."),
    (0x81AF_8000, "UB Module error."),
    (0x81AF_8004, "UB software configuration error."),
    (0x81AF_8008, "UB Multi Bit Ecc."),
    (0x81B1_8008, "UB_PORT Multi Bit Ecc."),
    (0x81B1_800D, "UB_PORT link error."),
];

/// Name of the first blocklisted event in `event_ids`
pub fn blocklist_hit(blocklist: &[(u32, &'static str)], event_ids: &[u32]) -> Option<(u32, &'static str)> {
    event_ids
        .iter()
        .find_map(|id| blocklist.iter().find(|(blocked, _)| blocked == id).copied())
}
