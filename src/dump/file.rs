//! Binary dump writer
//!
//! A [`DumpFile`] accumulates header entries and device regions, then writes
//! them in one fail-fast pass. Each instance makes exactly one attempt.

use super::datatype::{ir_data_type_raw, OutputDataType};
use super::header::{DumpHeader, OpInput, OpOutput, Workspace, WorkspaceKind, DUMP_FILE_VERSION};
use super::tensor::{DfxTensorType, DumpTensor, DumpWorkspace, InputBuffer, TensorBuffer};
use crate::config::Platform;
use crate::core::staging::{copy_to_host, stage_to_host};
use crate::driver::{DeviceAddr, DeviceDriver};
use crate::error::{DumpError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Size of the collective (MC2) context block staged from the device
pub const MC2_CONTEXT_SIZE: u64 = 32;

/// Device region awaiting staging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceData {
    /// Device address
    pub addr: DeviceAddr,
    /// Byte count
    pub bytes: u64,
}

impl DeviceData {
    /// Describe a region
    pub fn new(addr: DeviceAddr, bytes: u64) -> Self {
        Self { addr, bytes }
    }
}

/// Collective communication context referenced by an MC2 workspace slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mc2Context {
    /// Communication workspace
    pub workspace_addr: DeviceAddr,
    /// Workspace byte size
    pub workspace_size: u64,
    /// Local exchange window
    pub window_addr: DeviceAddr,
    /// Window byte size
    pub window_size: u64,
}

impl Mc2Context {
    /// Parse the little-endian context block
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < MC2_CONTEXT_SIZE as usize {
            return None;
        }
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&raw[i * 8..i * 8 + 8]);
            u64::from_le_bytes(w)
        };
        Some(Self {
            workspace_addr: word(0),
            workspace_size: word(1),
            window_addr: word(2),
            window_size: word(3),
        })
    }

    /// Encode as the device stores it
    pub fn to_bytes(&self) -> [u8; MC2_CONTEXT_SIZE as usize] {
        let mut out = [0u8; MC2_CONTEXT_SIZE as usize];
        for (i, v) in [self.workspace_addr, self.workspace_size, self.window_addr, self.window_size]
            .iter()
            .enumerate()
        {
            out[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Lifecycle of a [`DumpFile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFileState {
    /// Nothing set yet
    Empty,
    /// Header populated, ready to write
    HeaderPopulated,
    /// Dump completed
    Written,
    /// Dump attempted and failed
    Failed,
}

/// Stage one device region and append it to `out`
///
/// Zero-sized regions write nothing. Regions that fail validation or the
/// device copy are written as zeros of the declared size. Returns the
/// number of bytes written.
pub fn write_device_data<W: Write>(
    out: &mut W,
    driver: &dyn DeviceDriver,
    device_id: u32,
    data: &DeviceData,
) -> Result<u64> {
    if data.bytes == 0 {
        tracing::warn!("Skip dump addr {:#x} because size is 0", data.addr);
        return Ok(0);
    }
    let staged = stage_to_host(driver, device_id, data.addr, data.bytes)?;
    out.write_all(staged.as_slice())?;
    Ok(staged.len() as u64)
}

/// Single-use dump file writer
pub struct DumpFile<'a> {
    driver: &'a dyn DeviceDriver,
    device_id: u32,
    platform: Platform,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    state: DumpFileState,
    header: DumpHeader,
    inputs: Vec<DeviceData>,
    outputs: Vec<DeviceData>,
    workspaces: Vec<DeviceData>,
    mc2_spaces: Vec<Vec<DeviceData>>,
    input_buffer: Vec<DeviceData>,
    log_record: Vec<String>,
}

impl<'a> DumpFile<'a> {
    /// Create the file at `path`; an open failure surfaces on [`DumpFile::dump`]
    pub fn create(driver: &'a dyn DeviceDriver, device_id: u32, platform: Platform, path: &Path) -> Self {
        let writer = match File::create(path) {
            Ok(f) => Some(BufWriter::new(f)),
            Err(e) => {
                tracing::error!("[Dump][Exception] open dump file {} failed: {}", path.display(), e);
                None
            }
        };
        Self {
            driver,
            device_id,
            platform,
            path: path.to_path_buf(),
            writer,
            state: DumpFileState::Empty,
            header: DumpHeader::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            workspaces: Vec::new(),
            mc2_spaces: Vec::new(),
            input_buffer: Vec::new(),
            log_record: Vec::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DumpFileState {
        self.state
    }

    /// Header accumulated so far
    pub fn header(&self) -> &DumpHeader {
        &self.header
    }

    /// Lines logged by the setters, pending embedding into the header
    pub fn log_record(&self) -> &[String] {
        &self.log_record
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set version, capture time and operator name
    pub fn set_header(&mut self, op_name: &str) {
        self.header.version = DUMP_FILE_VERSION.to_string();
        self.header.dump_time = chrono::Utc::now().timestamp_micros().max(0) as u64;
        self.header.op_name = op_name.to_string();
        if self.state == DumpFileState::Empty {
            self.state = DumpFileState::HeaderPopulated;
        }
    }

    /// Add input tensors; entries without an address are skipped
    pub fn set_input_tensors(&mut self, tensors: &[DumpTensor]) {
        for tensor in tensors.iter().filter(|t| t.address() != 0) {
            tracing::info!("[Set][DumpData] The input size exception is {} bytes.", tensor.size());
            self.header.inputs.push(OpInput {
                data_type: ir_data_type_raw(tensor.data_type()),
                format: tensor.format(),
                shape: tensor.shape().iter().map(|d| *d as u64).collect(),
                size: tensor.size(),
                arg_index: tensor.args_offset(),
                input_type: DfxTensorType::InputTensor as u32,
            });
            self.inputs.push(DeviceData::new(tensor.address(), tensor.size()));
        }
    }

    /// Add output tensors; entries without an address are skipped
    pub fn set_output_tensors(&mut self, tensors: &[DumpTensor]) {
        for tensor in tensors.iter().filter(|t| t.address() != 0) {
            tracing::info!("[Set][DumpData] The output size exception is {} bytes.", tensor.size());
            self.header.outputs.push(OpOutput {
                data_type: ir_data_type_raw(tensor.data_type()),
                format: tensor.format(),
                shape: tensor.shape().iter().map(|d| *d as u64).collect(),
                size: tensor.size(),
                arg_index: tensor.args_offset(),
            });
            self.outputs.push(DeviceData::new(tensor.address(), tensor.size()));
        }
    }

    /// Add workspaces; entries without an address are skipped
    pub fn set_workspaces(&mut self, workspaces: &[DumpWorkspace]) {
        tracing::info!("[Set][DumpData] Workspace count is {}", workspaces.len());
        for ws in workspaces.iter().filter(|w| w.addr != 0) {
            self.header.spaces.push(Workspace {
                kind: WorkspaceKind::Log,
                size: ws.bytes,
                arg_index: ws.args_offset,
            });
            self.workspaces.push(DeviceData::new(ws.addr, ws.bytes));
        }
    }

    /// Add collective contexts; only dumped on device builds
    pub fn set_mc2_spaces(&mut self, spaces: &[DumpWorkspace]) {
        if self.platform != Platform::Device {
            tracing::debug!("[Set][DumpData] mc2 spaces are not dumped on host");
            return;
        }
        tracing::info!("[Set][DumpData] mc2 space count is {}", spaces.len());
        for (index, space) in spaces.iter().enumerate() {
            if space.addr == 0 {
                tracing::warn!("The addr from index {} is null, nothing need to do.", index);
                continue;
            }
            let ctx = match self.read_mc2_context(space.addr) {
                Some(ctx) => ctx,
                None => continue,
            };
            tracing::info!(
                "[Dump][Exception] MC2 workspace addr {:#x} and size {} bytes, window addr {:#x} and size {} bytes",
                ctx.workspace_addr, ctx.workspace_size, ctx.window_addr, ctx.window_size
            );
            let total = MC2_CONTEXT_SIZE + ctx.workspace_size + ctx.window_size;
            self.header.spaces.push(Workspace {
                kind: WorkspaceKind::Log,
                size: total,
                arg_index: space.args_offset,
            });
            self.mc2_spaces.push(vec![
                DeviceData::new(space.addr, MC2_CONTEXT_SIZE),
                DeviceData::new(ctx.workspace_addr, ctx.workspace_size),
                DeviceData::new(ctx.window_addr, ctx.window_size),
            ]);
        }
    }

    fn read_mc2_context(&self, addr: DeviceAddr) -> Option<Mc2Context> {
        let valid = matches!(self.driver.validate_address(self.device_id, addr), Ok(info) if info.valid);
        if !valid {
            tracing::error!("[Dump][Exception] mc2 context address {:#x} is not a device address", addr);
            return None;
        }
        match copy_to_host(self.driver, self.device_id, addr, MC2_CONTEXT_SIZE) {
            Ok(raw) => Mc2Context::parse(raw.as_slice()),
            Err(e) => {
                tracing::error!(
                    "[Dump][Exception] the address maybe invalid, D2H failed, addr info: {:#x};{}: {}",
                    addr, MC2_CONTEXT_SIZE, e
                );
                None
            }
        }
    }

    fn record_invalid(&mut self, addr: DeviceAddr, size: u64) {
        let line = format!("[Dump][Exception] the address maybe invalid, addr info: {:#x};{}.", addr, size);
        tracing::error!("{}", line);
        self.log_record.push(format!("{}\n", line));
    }

    /// Add untyped input buffers
    pub fn set_input_buffer(&mut self, buffers: &[InputBuffer]) {
        tracing::info!("[Set][DumpData] input buffer count is {}", buffers.len());
        for buf in buffers {
            if buf.addr == 0 {
                if buf.length != 0 {
                    self.record_invalid(buf.addr, buf.length);
                }
                continue;
            }
            self.header.inputs.push(OpInput {
                data_type: OutputDataType::Undefined,
                format: 0,
                shape: Vec::new(),
                size: buf.length,
                arg_index: buf.arg_index,
                input_type: DfxTensorType::GeneralTensor as u32,
            });
            self.input_buffer.push(DeviceData::new(buf.addr, buf.length));
        }
    }

    /// Route DFX tensor buffers into inputs or outputs by class
    pub fn set_tensor_buffer(&mut self, buffers: &[TensorBuffer]) {
        for buf in buffers {
            if buf.addr == 0 {
                if buf.size != 0 {
                    self.record_invalid(buf.addr, buf.size);
                }
                continue;
            }
            let size = buf.total_byte_size();
            match buf.tensor_type {
                t if t <= DfxTensorType::InputTensor => {
                    self.header.inputs.push(OpInput {
                        data_type: OutputDataType::Undefined,
                        format: 0,
                        shape: buf.shape.clone(),
                        size,
                        arg_index: buf.arg_index,
                        input_type: t as u32,
                    });
                    self.inputs.push(DeviceData::new(buf.addr, size));
                }
                DfxTensorType::OutputTensor | DfxTensorType::ShapeTensor => {
                    self.header.outputs.push(OpOutput {
                        data_type: OutputDataType::Undefined,
                        format: 0,
                        shape: buf.shape.clone(),
                        size,
                        arg_index: buf.arg_index,
                    });
                    self.outputs.push(DeviceData::new(buf.addr, size));
                }
                DfxTensorType::TilingData => {
                    tracing::info!("[Set][DumpData] The tiling size exception is {}", size);
                    self.header.inputs.push(OpInput {
                        data_type: OutputDataType::Undefined,
                        format: 0,
                        shape: Vec::new(),
                        size,
                        arg_index: buf.arg_index,
                        input_type: DfxTensorType::TilingData as u32,
                    });
                    self.inputs.push(DeviceData::new(buf.addr, size));
                }
                other => tracing::debug!("[Set][DumpData] tensor buffer of class {:?} not dumped", other),
            }
        }
    }

    /// Move the caller record and the setter log into the header message
    fn set_aic_info(&mut self, record: &mut Vec<String>) {
        let mut message = String::new();
        for line in record.iter().chain(self.log_record.iter()) {
            message.push_str(line);
        }
        self.header.dfx_message = message;
        record.clear();
        self.log_record.clear();
    }

    /// Write the file; any stage failure aborts the whole dump
    pub fn dump(&mut self, record: &mut Vec<String>) -> Result<()> {
        match self.state {
            DumpFileState::HeaderPopulated => {}
            DumpFileState::Empty => {
                return Err(DumpError::InvalidState("dump header is not set".into()));
            }
            DumpFileState::Written | DumpFileState::Failed => {
                return Err(DumpError::InvalidState("dump file already used".into()));
            }
        }
        let result = self.write_all(record);
        self.state = if result.is_ok() { DumpFileState::Written } else { DumpFileState::Failed };
        result
    }

    fn write_all(&mut self, record: &mut Vec<String>) -> Result<()> {
        if self.writer.is_none() {
            return Err(DumpError::FileNotOpen(self.path.clone()));
        }
        self.set_aic_info(record);
        let header = self.header.encode().map_err(|e| {
            tracing::error!("Serialize dump header failed: {}", e);
            e
        })?;

        let driver = self.driver;
        let device_id = self.device_id;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DumpError::FileNotOpen(self.path.clone()))?;

        writer.write_all(&(header.len() as u64).to_le_bytes())?;
        writer.write_all(&header)?;

        let stages: [(&str, &[DeviceData]); 3] = [
            ("ExceptionInput", &self.inputs),
            ("ExceptionOutput", &self.outputs),
            ("ExceptionWorkspace", &self.workspaces),
        ];
        for (stage, entries) in stages {
            tracing::info!("[Dump][{}] Start to dump {} entries", stage, entries.len());
            for (i, data) in entries.iter().enumerate() {
                write_device_data(writer, driver, device_id, data).map_err(|e| {
                    tracing::error!("[Dump][{}] Dump {} device data failed: {}", stage, i, e);
                    e
                })?;
            }
        }

        for (i, pieces) in self.mc2_spaces.iter().enumerate() {
            for data in pieces {
                write_device_data(writer, driver, device_id, data).map_err(|e| {
                    tracing::error!("[Dump][ExceptionMc2Space] Dump {} mc2 space failed: {}", i, e);
                    e
                })?;
            }
        }

        for (i, data) in self.input_buffer.iter().enumerate() {
            write_device_data(writer, driver, device_id, data).map_err(|e| {
                tracing::error!("[Dump][ExceptionInputBuffer] Dump {} input args failed: {}", i, e);
                e
            })?;
        }

        writer.flush()?;
        tracing::info!("[Dump][Exception] dump file {} written", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimDevice;
    use crate::dump::header::DumpFileReader;
    use crate::dump::tensor::{AddressType, TensorInfo, TensorPlacement, TensorType};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn tensor(addr: DeviceAddr, size: u64, offset: u32) -> DumpTensor {
        DumpTensor::new(&TensorInfo {
            tensor_type: TensorType::Input,
            data_type: 3,
            format: 2,
            shape: vec![size as i64 / 4],
            origin_shape: vec![],
            size,
            addr,
            placement: TensorPlacement::OnDevice,
            address_type: AddressType::Traditional,
            args_offset: offset,
        })
    }

    #[test]
    fn test_zero_size_writes_nothing() {
        let sim = SimDevice::new(&[0]);
        let mut out = Vec::new();
        for addr in [0, 0xdead_beef] {
            let n = write_device_data(&mut out, &sim, 0, &DeviceData::new(addr, 0)).expect("skip");
            assert_eq!(n, 0);
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_sections_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let sim = SimDevice::new(&[0]);
        let a = sim.alloc_with(0, &[1u8; 8]);
        let b = sim.alloc_with(0, &[2u8; 4]);
        let ws = sim.alloc_with(0, &[3u8; 6]);
        let args = sim.alloc_with(0, &[4u8; 16]);
        let path = dir.path().join("op.dump");

        let mut file = DumpFile::create(&sim, 0, Platform::Host, &path);
        file.set_header("Add");
        file.set_input_tensors(&[tensor(a, 8, 0), tensor(0, 8, 1)]);
        file.set_output_tensors(&[tensor(b, 4, 2)]);
        file.set_workspaces(&[DumpWorkspace { addr: ws, bytes: 6, args_offset: 3 }]);
        file.set_input_buffer(&[InputBuffer { addr: args, length: 16, arg_index: 0 }]);
        let mut record = vec!["line one\n".to_string()];
        file.dump(&mut record).expect("dump");
        assert!(record.is_empty());
        assert_eq!(file.state(), DumpFileState::Written);

        let reader = DumpFileReader::open(&path).expect("parse");
        let header = reader.header();
        assert_eq!(header.version, "2.0");
        assert_eq!(header.inputs.len(), 2);
        assert_eq!(header.inputs[0].data_type, OutputDataType::Int32);
        assert_eq!(header.inputs[1].input_type, 5);
        assert_eq!(header.dfx_message, "line one\n");
        let sections = reader.sections();
        assert_eq!(sections.inputs[0].as_ref(), &[1u8; 8]);
        assert_eq!(sections.outputs[0].as_ref(), &[2u8; 4]);
        assert_eq!(sections.spaces[0].as_ref(), &[3u8; 6]);
        assert_eq!(sections.input_buffers[0].as_ref(), &[4u8; 16]);
    }

    #[test]
    fn test_single_use() {
        let dir = TempDir::new().expect("tempdir");
        let sim = SimDevice::new(&[0]);
        let mut file = DumpFile::create(&sim, 0, Platform::Host, &dir.path().join("x"));
        assert!(matches!(file.dump(&mut Vec::new()), Err(DumpError::InvalidState(_))));
        file.set_header("X");
        file.dump(&mut Vec::new()).expect("dump");
        assert!(matches!(file.dump(&mut Vec::new()), Err(DumpError::InvalidState(_))));
    }

    #[test]
    fn test_unopenable_file() {
        let dir = TempDir::new().expect("tempdir");
        let sim = SimDevice::new(&[0]);
        let path = dir.path().join("missing").join("x");
        let mut file = DumpFile::create(&sim, 0, Platform::Host, &path);
        file.set_header("X");
        assert!(matches!(file.dump(&mut Vec::new()), Err(DumpError::FileNotOpen(_))));
        assert_eq!(file.state(), DumpFileState::Failed);
    }

    #[test]
    fn test_null_buffers_logged() {
        let dir = TempDir::new().expect("tempdir");
        let sim = SimDevice::new(&[0]);
        let mut file = DumpFile::create(&sim, 0, Platform::Host, &dir.path().join("x"));
        file.set_input_buffer(&[
            InputBuffer { addr: 0, length: 0, arg_index: 0 },
            InputBuffer { addr: 0, length: 8, arg_index: 1 },
        ]);
        file.set_tensor_buffer(&[TensorBuffer {
            tensor_type: DfxTensorType::OutputTensor,
            addr: 0,
            size: 4,
            shape: vec![1],
            arg_index: 2,
        }]);
        assert_eq!(file.log_record().len(), 2);
        assert!(file.log_record()[0].contains("addr info: 0x0;8."));
        assert!(file.header().inputs.is_empty());
    }

    #[test]
    fn test_tensor_buffer_routing() {
        let dir = TempDir::new().expect("tempdir");
        let sim = SimDevice::new(&[0]);
        let mut file = DumpFile::create(&sim, 0, Platform::Host, &dir.path().join("x"));
        let make = |t, addr| TensorBuffer { tensor_type: t, addr, size: 4, shape: vec![2, 2], arg_index: 0 };
        file.set_tensor_buffer(&[
            make(DfxTensorType::InputTensor, 0x10),
            make(DfxTensorType::ShapeTensor, 0x20),
            make(DfxTensorType::TilingData, 0x30),
            make(DfxTensorType::WorkspaceTensor, 0x40),
        ]);
        assert_eq!(file.header().inputs.len(), 2);
        assert_eq!(file.header().outputs.len(), 1);
        assert!(file.header().inputs[1].shape.is_empty());
        assert_eq!(file.header().inputs[1].input_type, DfxTensorType::TilingData as u32);
    }

    #[test]
    fn test_mc2_only_on_device() {
        let dir = TempDir::new().expect("tempdir");
        let sim = SimDevice::new(&[0]);
        let ws = sim.alloc_with(0, &[5u8; 16]);
        let win = sim.alloc_with(0, &[6u8; 8]);
        let ctx = Mc2Context { workspace_addr: ws, workspace_size: 16, window_addr: win, window_size: 8 };
        let ctx_addr = sim.alloc_with(0, &ctx.to_bytes());
        let slot = [DumpWorkspace { addr: ctx_addr, bytes: 0, args_offset: 4 }];

        let mut host = DumpFile::create(&sim, 0, Platform::Host, &dir.path().join("h"));
        host.set_mc2_spaces(&slot);
        assert!(host.header().spaces.is_empty());

        let path = dir.path().join("d");
        let mut dev = DumpFile::create(&sim, 0, Platform::Device, &path);
        dev.set_header("AllGatherMatmul");
        dev.set_mc2_spaces(&slot);
        assert_eq!(dev.header().spaces[0].size, 32 + 16 + 8);
        dev.dump(&mut Vec::new()).expect("dump");

        let reader = DumpFileReader::open(&path).expect("parse");
        let space = &reader.sections().spaces[0];
        assert_eq!(&space[..32], &ctx.to_bytes());
        assert_eq!(&space[32..48], &[5u8; 16]);
        assert_eq!(&space[48..], &[6u8; 8]);
    }
}
