//! Dump file header and framing
//!
//! A dump file is an 8-byte little-endian header length, the encoded
//! [`DumpHeader`], then the raw section bytes in header order. The header
//! uses a versioned little-endian struct-pack layout: strings and lists are
//! prefixed with a `u32` length.

use super::datatype::OutputDataType;
use super::tensor::DfxTensorType;
use crate::error::{DumpError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::Path;

/// Version string stored in every header
pub const DUMP_FILE_VERSION: &str = "2.0";

/// Layout revision of the struct-pack encoding
const HEADER_LAYOUT: u16 = 1;

/// Width of the header length prefix
pub const HEADER_SIZE_PREFIX: usize = 8;

/// Input entry of a dump header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpInput {
    /// Wire element type
    pub data_type: OutputDataType,
    /// Packed format
    pub format: u32,
    /// Dimensions
    pub shape: Vec<u64>,
    /// Byte size of the section
    pub size: u64,
    /// Argument table index
    pub arg_index: u32,
    /// DFX tensor class
    pub input_type: u32,
}

/// Output entry of a dump header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpOutput {
    /// Wire element type
    pub data_type: OutputDataType,
    /// Packed format
    pub format: u32,
    /// Dimensions
    pub shape: Vec<u64>,
    /// Byte size of the section
    pub size: u64,
    /// Argument table index
    pub arg_index: u32,
}

/// Kind of a workspace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkspaceKind {
    /// Log / scratch space
    Log = 0,
}

/// Workspace entry of a dump header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Kind
    pub kind: WorkspaceKind,
    /// Byte size of the section
    pub size: u64,
    /// Argument table index
    pub arg_index: u32,
}

/// Metadata block at the start of a dump file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpHeader {
    /// Header version string
    pub version: String,
    /// Capture time, microseconds since the epoch
    pub dump_time: u64,
    /// Operator name
    pub op_name: String,
    /// Input entries
    pub inputs: Vec<OpInput>,
    /// Output entries
    pub outputs: Vec<OpOutput>,
    /// Workspace entries
    pub spaces: Vec<Workspace>,
    /// Accumulated diagnostic text
    pub dfx_message: String,
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_shape(buf: &mut BytesMut, shape: &[u64]) {
    buf.put_u32_le(shape.len() as u32);
    for dim in shape {
        buf.put_u64_le(*dim);
    }
}

/// Bounds-checked reader over an encoded header
struct Cursor {
    buf: Bytes,
}

impl Cursor {
    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(DumpError::Serialize(format!(
                "header truncated while reading {} ({} bytes left, {} needed)",
                what,
                self.buf.remaining(),
                n
            )));
        }
        Ok(())
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64_le())
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u32(what)? as usize;
        self.need(len, what)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|e| DumpError::Serialize(format!("{} is not utf-8: {}", what, e)))
    }

    fn count(&mut self, what: &str, min_item: usize) -> Result<usize> {
        let n = self.u32(what)? as usize;
        self.need(n.saturating_mul(min_item), what)?;
        Ok(n)
    }

    fn shape(&mut self) -> Result<Vec<u64>> {
        let n = self.count("shape", 8)?;
        (0..n).map(|_| self.u64("dim")).collect()
    }

    fn data_type(&mut self) -> Result<OutputDataType> {
        let raw = self.u32("data_type")?;
        OutputDataType::from_u32(raw)
            .ok_or_else(|| DumpError::Serialize(format!("unknown data type {}", raw)))
    }
}

impl DumpHeader {
    /// Encode the header body without the length prefix
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(256 + self.dfx_message.len());
        buf.put_u16_le(HEADER_LAYOUT);
        put_str(&mut buf, &self.version);
        buf.put_u64_le(self.dump_time);
        put_str(&mut buf, &self.op_name);

        buf.put_u32_le(self.inputs.len() as u32);
        for input in &self.inputs {
            buf.put_u32_le(input.data_type.as_u32());
            buf.put_u32_le(input.format);
            put_shape(&mut buf, &input.shape);
            buf.put_u64_le(input.size);
            buf.put_u32_le(input.arg_index);
            buf.put_u32_le(input.input_type);
        }

        buf.put_u32_le(self.outputs.len() as u32);
        for output in &self.outputs {
            buf.put_u32_le(output.data_type.as_u32());
            buf.put_u32_le(output.format);
            put_shape(&mut buf, &output.shape);
            buf.put_u64_le(output.size);
            buf.put_u32_le(output.arg_index);
        }

        buf.put_u32_le(self.spaces.len() as u32);
        for space in &self.spaces {
            buf.put_u32_le(space.kind as u32);
            buf.put_u64_le(space.size);
            buf.put_u32_le(space.arg_index);
        }

        put_str(&mut buf, &self.dfx_message);

        if buf.is_empty() {
            return Err(DumpError::Serialize("encoded header is empty".into()));
        }
        Ok(buf.freeze())
    }

    /// Decode a header body
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut cur = Cursor { buf: data };
        let layout = cur.u16("layout")?;
        if layout != HEADER_LAYOUT {
            return Err(DumpError::Serialize(format!("unsupported header layout {}", layout)));
        }
        let version = cur.string("version")?;
        let dump_time = cur.u64("dump_time")?;
        let op_name = cur.string("op_name")?;

        let n = cur.count("inputs", 28)?;
        let mut inputs = Vec::with_capacity(n);
        for _ in 0..n {
            inputs.push(OpInput {
                data_type: cur.data_type()?,
                format: cur.u32("format")?,
                shape: cur.shape()?,
                size: cur.u64("size")?,
                arg_index: cur.u32("arg_index")?,
                input_type: cur.u32("input_type")?,
            });
        }

        let n = cur.count("outputs", 24)?;
        let mut outputs = Vec::with_capacity(n);
        for _ in 0..n {
            outputs.push(OpOutput {
                data_type: cur.data_type()?,
                format: cur.u32("format")?,
                shape: cur.shape()?,
                size: cur.u64("size")?,
                arg_index: cur.u32("arg_index")?,
            });
        }

        let n = cur.count("spaces", 16)?;
        let mut spaces = Vec::with_capacity(n);
        for _ in 0..n {
            let kind = cur.u32("space type")?;
            if kind != WorkspaceKind::Log as u32 {
                return Err(DumpError::Serialize(format!("unknown workspace type {}", kind)));
            }
            spaces.push(Workspace {
                kind: WorkspaceKind::Log,
                size: cur.u64("size")?,
                arg_index: cur.u32("arg_index")?,
            });
        }

        let dfx_message = cur.string("dfx_message")?;
        if cur.buf.has_remaining() {
            return Err(DumpError::Serialize(format!(
                "{} trailing bytes after header",
                cur.buf.remaining()
            )));
        }

        Ok(Self { version, dump_time, op_name, inputs, outputs, spaces, dfx_message })
    }
}

/// Raw section bytes of a parsed dump file
#[derive(Debug, Clone, Default)]
pub struct DumpSections {
    /// Input sections, in header order, excluding general input buffers
    pub inputs: Vec<Bytes>,
    /// Output sections
    pub outputs: Vec<Bytes>,
    /// Workspace and collective-context sections
    pub spaces: Vec<Bytes>,
    /// General input buffers written at the end of the file
    pub input_buffers: Vec<Bytes>,
}

/// Parser for dump files
#[derive(Debug, Clone)]
pub struct DumpFileReader {
    header: DumpHeader,
    header_size: u64,
    sections: DumpSections,
}

impl DumpFileReader {
    /// Read and parse a dump file
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(Bytes::from(data))
    }

    /// Parse dump file bytes
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < HEADER_SIZE_PREFIX {
            return Err(DumpError::Serialize("file shorter than header size prefix".into()));
        }
        let header_size = data.get_u64_le();
        let header_len = usize::try_from(header_size)
            .ok()
            .filter(|len| *len <= data.len())
            .ok_or_else(|| DumpError::Serialize(format!("header size {} exceeds file", header_size)))?;
        let header = DumpHeader::decode(data.split_to(header_len))?;

        let mut take = |size: u64| -> Result<Bytes> {
            let len = usize::try_from(size)
                .ok()
                .filter(|len| *len <= data.len())
                .ok_or_else(|| DumpError::Serialize(format!("section of {} bytes truncated", size)))?;
            Ok(data.split_to(len))
        };

        let general = DfxTensorType::GeneralTensor as u32;
        let mut sections = DumpSections::default();
        for input in header.inputs.iter().filter(|i| i.input_type != general) {
            sections.inputs.push(take(input.size)?);
        }
        for output in &header.outputs {
            sections.outputs.push(take(output.size)?);
        }
        for space in &header.spaces {
            sections.spaces.push(take(space.size)?);
        }
        for input in header.inputs.iter().filter(|i| i.input_type == general) {
            sections.input_buffers.push(take(input.size)?);
        }
        if !data.is_empty() {
            return Err(DumpError::Serialize(format!("{} trailing bytes after sections", data.len())));
        }

        Ok(Self { header, header_size, sections })
    }

    /// Parsed header
    pub fn header(&self) -> &DumpHeader {
        &self.header
    }

    /// Encoded header length from the prefix
    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    /// Section bytes
    pub fn sections(&self) -> &DumpSections {
        &self.sections
    }
}
