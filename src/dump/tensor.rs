//! Tensor descriptors captured at launch time

use crate::driver::DeviceAddr;
use serde::{Deserialize, Serialize};

/// Role of a tensor in an operator snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorType {
    /// Operator input
    Input,
    /// Operator output
    Output,
    /// Scratch workspace
    Workspace,
}

/// Where the tensor memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorPlacement {
    /// Device HBM
    OnDevice,
    /// Host memory
    OnHost,
    /// Stored right after the argument table
    Following,
}

/// How the address slot was filled by the launch path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// Plain device pointer
    #[default]
    Traditional,
    /// Non-tiling kernel; address is patched at run time
    Notiling,
    /// Raw argument word
    Raw,
}

/// Tensor entry of an operator snapshot, as supplied by the launch path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Role
    pub tensor_type: TensorType,
    /// Internal element type
    pub data_type: u32,
    /// Packed format
    pub format: u32,
    /// Runtime shape
    pub shape: Vec<i64>,
    /// Shape before format transformation
    #[serde(default)]
    pub origin_shape: Vec<i64>,
    /// Byte size
    pub size: u64,
    /// Device or host address
    pub addr: DeviceAddr,
    /// Memory placement
    pub placement: TensorPlacement,
    /// Address slot kind
    #[serde(default)]
    pub address_type: AddressType,
    /// Index of the tensor's slot in the argument table
    #[serde(default)]
    pub args_offset: u32,
}

/// Non-owning view of one input or output tensor
#[derive(Debug, Clone, PartialEq)]
pub struct DumpTensor {
    data_type: u32,
    format: u32,
    shape: Vec<i64>,
    origin_shape: Vec<i64>,
    size: u64,
    address: DeviceAddr,
    address_type: AddressType,
    args_offset: u32,
}

impl DumpTensor {
    /// Build a descriptor from a snapshot entry
    pub fn new(info: &TensorInfo) -> Self {
        Self {
            data_type: info.data_type,
            format: info.format,
            shape: info.shape.clone(),
            origin_shape: info.origin_shape.clone(),
            size: info.size,
            address: info.addr,
            address_type: info.address_type,
            args_offset: info.args_offset,
        }
    }

    /// Internal element type
    pub fn data_type(&self) -> u32 {
        self.data_type
    }

    /// Packed format
    pub fn format(&self) -> u32 {
        self.format
    }

    /// Runtime shape
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Original shape
    pub fn origin_shape(&self) -> &[i64] {
        &self.origin_shape
    }

    /// Byte size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current address
    pub fn address(&self) -> DeviceAddr {
        self.address
    }

    /// Replace the address after the argument table was re-read
    pub fn set_address(&mut self, addr: DeviceAddr) {
        self.address = addr;
    }

    /// Address slot kind
    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// Argument table index
    pub fn args_offset(&self) -> u32 {
        self.args_offset
    }

    /// Shape rendered as `[a,b,c]`
    pub fn shape_string(&self) -> String {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        format!("[{}]", dims.join(","))
    }
}

/// Workspace region of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpWorkspace {
    /// Device address
    pub addr: DeviceAddr,
    /// Byte size
    pub bytes: u64,
    /// Argument table index
    pub args_offset: u32,
}

/// Untyped input buffer (argument table copy, raw inputs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBuffer {
    /// Device address
    pub addr: DeviceAddr,
    /// Byte size
    pub length: u64,
    /// Argument table index
    pub arg_index: u32,
}

/// Tensor classes reported by the DFX argument parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum DfxTensorType {
    /// Operator input
    InputTensor = 0,
    /// Operator output
    OutputTensor = 1,
    /// Workspace
    WorkspaceTensor = 2,
    /// Shape output written by the kernel
    ShapeTensor = 3,
    /// Tiling data block
    TilingData = 4,
    /// Untyped input buffer
    GeneralTensor = 5,
}

/// Tensor described by the DFX argument parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBuffer {
    /// Tensor class
    pub tensor_type: DfxTensorType,
    /// Device address
    pub addr: DeviceAddr,
    /// Byte size of the data
    pub size: u64,
    /// Dimensions
    pub shape: Vec<u64>,
    /// Argument table index
    pub arg_index: u32,
}

impl TensorBuffer {
    /// Number of bytes written to the dump for this buffer
    pub fn total_byte_size(&self) -> u64 {
        self.size
    }
}
