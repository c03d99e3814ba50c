//! Captured operator and exception correlation
//!
//! A [`DumpOperator`] is built from the snapshot the launch path records
//! before a kernel runs. When the device reports an exception, the manager
//! finds the operator by [`OpIdentity`], refreshes tensor addresses from the
//! post-execution argument table, logs what it knows and writes the dump.

use super::datatype::{format_name, ge_data_type_name};
use super::file::DumpFile;
use super::tensor::{DumpTensor, DumpWorkspace, InputBuffer, TensorInfo, TensorPlacement, TensorType};
use super::{file_name_part, unique_timestamp};
use crate::config::Platform;
use crate::core::staging::{copy_to_host, stage_to_host};
use crate::driver::{DeviceAddr, DeviceDriver};
use crate::error::{DumpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Implementation type, `"1"` for TVM operators
pub const ADDITIONAL_IMPLY_TYPE: &str = "imply_type";
/// Tiling data blob
pub const ADDITIONAL_TILING_DATA: &str = "tiling_data";
/// Launch block dimension
pub const ADDITIONAL_BLOCK_DIM: &str = "block_dim";
/// Workspace sizes
pub const ADDITIONAL_WORKSPACE_BYTES: &str = "workspace_bytes";
/// Workspace addresses
pub const ADDITIONAL_WORKSPACE_ADDRS: &str = "workspace_addrs";
/// Operator attributes
pub const ADDITIONAL_ALL_ATTRS: &str = "all_attrs";
/// Tiling key
pub const ADDITIONAL_TILING_KEY: &str = "tiling_key";
/// Device function symbol
pub const ADDITIONAL_DEV_FUNC: &str = "dev_func";
/// Directory holding compiled kernel objects
pub const ADDITIONAL_OP_FILE_PATH: &str = "op_file_path";
/// Whether the argument table is already host memory
pub const ADDITIONAL_IS_HOST_ARGS: &str = "is_host_args";

/// Device info entry holding the pre-execution argument table
pub const DEVICE_INFO_NAME_ARGS: &str = "args_before_execute";
/// Device info entries holding collective (MC2) contexts
pub const DEVICE_INFO_NAME_MC2_CTX: &str = "mc2_context";

/// TVM implementation type
const IMPLY_TYPE_TVM: &str = "1";
/// Argument words printed per log line
const ARGS_PER_LINE: usize = 20;

/// Fields logged for TVM operators, in order
const TVM_LOG_KEYS: &[(&str, &str)] = &[
    (ADDITIONAL_BLOCK_DIM, "block dim"),
    (ADDITIONAL_TILING_KEY, "tiling key"),
    (ADDITIONAL_TILING_DATA, "tiling data"),
    (ADDITIONAL_WORKSPACE_BYTES, "workspace bytes"),
    (ADDITIONAL_WORKSPACE_ADDRS, "workspace addrs"),
    (ADDITIONAL_ALL_ATTRS, "op attrs"),
    (ADDITIONAL_DEV_FUNC, "dev func"),
];

/// Correlation key between a hardware report and a captured operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpIdentity {
    /// Device id
    pub device_id: u32,
    /// Task id
    pub task_id: u32,
    /// Stream id
    pub stream_id: u32,
    /// FFTS+ context id
    pub context_id: u32,
}

impl OpIdentity {
    /// Build an identity
    pub fn new(device_id: u32, task_id: u32, stream_id: u32, context_id: u32) -> Self {
        Self { device_id, task_id, stream_id, context_id }
    }
}

/// Named auxiliary region of an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Entry name
    pub name: String,
    /// Address; device memory unless the operator declares host args
    pub addr: DeviceAddr,
    /// Byte length
    pub length: u64,
    /// Host copy of the region, for host-resident argument tables
    #[serde(default)]
    pub host_data: Option<Vec<u8>>,
}

/// Launch-time snapshot of an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorInfo {
    /// Operator type
    pub op_type: String,
    /// Operator name
    pub op_name: String,
    /// Device id
    pub device_id: u32,
    /// Task id
    pub task_id: u32,
    /// Stream id
    pub stream_id: u32,
    /// FFTS+ context id
    #[serde(default)]
    pub context_id: u32,
    /// Transient operators are dropped after their first exception
    #[serde(default)]
    pub aging: bool,
    /// Tensor list
    #[serde(default)]
    pub tensors: Vec<TensorInfo>,
    /// Auxiliary regions
    #[serde(default)]
    pub device_info: Vec<DeviceInfo>,
    /// Free-form key/value pairs
    #[serde(default)]
    pub additional_info: BTreeMap<String, String>,
}

impl OperatorInfo {
    /// Minimal snapshot for the given identity
    pub fn new(op_type: &str, op_name: &str, identity: OpIdentity) -> Self {
        Self {
            op_type: op_type.to_string(),
            op_name: op_name.to_string(),
            device_id: identity.device_id,
            task_id: identity.task_id,
            stream_id: identity.stream_id,
            context_id: identity.context_id,
            aging: false,
            tensors: Vec::new(),
            device_info: Vec::new(),
            additional_info: BTreeMap::new(),
        }
    }

    /// Identity of the launch
    pub fn identity(&self) -> OpIdentity {
        OpIdentity::new(self.device_id, self.task_id, self.stream_id, self.context_id)
    }

    /// Only a literal `true` marks the argument table as host memory
    pub fn is_host_args(&self) -> bool {
        self.additional_info
            .get(ADDITIONAL_IS_HOST_ARGS)
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("true"))
    }
}

/// Post-execution argument table reported with an exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExceptionArgs {
    /// Device address of the argument table
    pub arg_addr: DeviceAddr,
    /// Byte size of the argument table
    pub arg_size: u64,
}

fn words_from_le(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|c| {
            let mut w = [0u8; 8];
            w.copy_from_slice(c);
            u64::from_le_bytes(w)
        })
        .collect()
}

/// One captured operator
#[derive(Debug, Clone)]
pub struct DumpOperator {
    op_type: String,
    op_name: String,
    identity: OpIdentity,
    aging: bool,
    is_host_args: bool,
    device_info: Vec<DeviceInfo>,
    additional_info: BTreeMap<String, String>,
    input_tensors: Vec<DumpTensor>,
    output_tensors: Vec<DumpTensor>,
    workspaces: Vec<DumpWorkspace>,
    pre_exec_args: Vec<u64>,
    log_record: Vec<String>,
    work_dir: Option<PathBuf>,
}

impl DumpOperator {
    /// Capture an operator snapshot
    ///
    /// Only device-resident tensors with an address and a size are kept. The
    /// pre-execution argument table, when present, is read right away.
    pub fn new(info: &OperatorInfo, driver: &dyn DeviceDriver) -> Self {
        let mut op = Self {
            op_type: info.op_type.clone(),
            op_name: info.op_name.clone(),
            identity: info.identity(),
            aging: info.aging,
            is_host_args: info.is_host_args(),
            device_info: info.device_info.clone(),
            additional_info: info.additional_info.clone(),
            input_tensors: Vec::new(),
            output_tensors: Vec::new(),
            workspaces: Vec::new(),
            pre_exec_args: Vec::new(),
            log_record: Vec::new(),
            work_dir: None,
        };

        for tensor in &info.tensors {
            if tensor.placement != TensorPlacement::OnDevice || tensor.addr == 0 || tensor.size == 0 {
                continue;
            }
            match tensor.tensor_type {
                TensorType::Input => op.input_tensors.push(DumpTensor::new(tensor)),
                TensorType::Output => op.output_tensors.push(DumpTensor::new(tensor)),
                TensorType::Workspace => op.workspaces.push(DumpWorkspace {
                    addr: tensor.addr,
                    bytes: tensor.size,
                    args_offset: tensor.args_offset,
                }),
            }
        }

        op.pre_exec_args = op.load_pre_exec_args(driver);
        op
    }

    fn load_pre_exec_args(&self, driver: &dyn DeviceDriver) -> Vec<u64> {
        let Some(entry) = self.device_info.iter().find(|d| d.name == DEVICE_INFO_NAME_ARGS) else {
            return Vec::new();
        };
        if entry.addr == 0 || entry.length == 0 {
            return Vec::new();
        }
        if self.is_host_args {
            return entry.host_data.as_deref().map(words_from_le).unwrap_or_default();
        }
        match stage_to_host(driver, self.identity.device_id, entry.addr, entry.length) {
            Ok(buf) => buf.to_u64_words(),
            Err(e) => {
                tracing::error!("[Dump][Exception] stage pre-execution args failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Operator type
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Operator name
    pub fn op_name(&self) -> &str {
        &self.op_name
    }

    /// Identity recorded at launch
    pub fn identity(&self) -> OpIdentity {
        self.identity
    }

    /// Transient operators are dropped after their first exception
    pub fn is_aging(&self) -> bool {
        self.aging
    }

    /// Device-resident inputs
    pub fn input_tensors(&self) -> &[DumpTensor] {
        &self.input_tensors
    }

    /// Device-resident outputs
    pub fn output_tensors(&self) -> &[DumpTensor] {
        &self.output_tensors
    }

    /// Workspaces
    pub fn workspaces(&self) -> &[DumpWorkspace] {
        &self.workspaces
    }

    /// Pre-execution argument words read at capture time
    pub fn pre_exec_args(&self) -> &[u64] {
        &self.pre_exec_args
    }

    /// Diagnostic lines pending embedding into the next dump
    pub fn log_record(&self) -> &[String] {
        &self.log_record
    }

    /// Append a diagnostic line for the next dump
    pub fn push_log(&mut self, line: impl Into<String>) {
        let mut line = line.into();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.log_record.push(line);
    }

    /// Directory kernel objects are copied to, instead of the process cwd
    pub fn set_work_dir(&mut self, dir: impl Into<PathBuf>) {
        self.work_dir = Some(dir.into());
    }

    /// Value of an additional info key
    pub fn additional(&self, key: &str) -> Option<&str> {
        self.additional_info.get(key).map(String::as_str)
    }

    /// Exact identity match
    pub fn is_belong_to(&self, identity: &OpIdentity) -> bool {
        self.identity == *identity
    }

    /// Post-execution argument words
    ///
    /// Host-resident tables are read from the host copy captured at launch.
    fn exception_arg_words(&self, driver: &dyn DeviceDriver, args: &ExceptionArgs) -> Result<Vec<u64>> {
        if !self.is_host_args {
            let staged = copy_to_host(driver, self.identity.device_id, args.arg_addr, args.arg_size)?;
            return Ok(staged.to_u64_words());
        }
        let host = self
            .device_info
            .iter()
            .find(|d| d.name == DEVICE_INFO_NAME_ARGS && d.addr == args.arg_addr)
            .and_then(|d| d.host_data.as_deref())
            .ok_or_else(|| DumpError::NotFound(format!("host args at {:#x}", args.arg_addr)))?;
        let len = usize::try_from(args.arg_size).map_or(host.len(), |n| n.min(host.len()));
        Ok(words_from_le(&host[..len]))
    }

    /// Re-read tensor addresses from the post-execution argument table
    ///
    /// Tensors whose offset lies outside the table keep their address.
    pub fn refresh_addrs(&mut self, driver: &dyn DeviceDriver, args: &ExceptionArgs) -> Result<()> {
        if args.arg_addr == 0 {
            tracing::error!("[Dump][Exception] exception args addr is null, refresh skipped.");
            return Err(DumpError::InvalidAddress { addr: 0, size: args.arg_size });
        }
        let words = self.exception_arg_words(driver, args).map_err(|e| {
            tracing::error!(
                "[Dump][Exception] copy exception args {:#x};{} failed: {}",
                args.arg_addr, args.arg_size, e
            );
            e
        })?;

        let refresh = |kind: &str, tensors: &mut [DumpTensor]| {
            for (i, tensor) in tensors.iter_mut().enumerate() {
                let offset = tensor.args_offset() as usize;
                match words.get(offset) {
                    Some(&addr) => {
                        tracing::debug!(
                            "[Dump][Exception] {}[{}] addr {:#x} -> {:#x}",
                            kind, i, tensor.address(), addr
                        );
                        tensor.set_address(addr);
                    }
                    None => tracing::warn!(
                        "[Dump][Exception] {}[{}] args offset {} out of range {}, address kept.",
                        kind, i, offset, words.len()
                    ),
                }
            }
        };
        refresh("input", &mut self.input_tensors);
        refresh("output", &mut self.output_tensors);
        Ok(())
    }

    fn log_line(&mut self, line: String) {
        tracing::error!("{}", line);
        self.push_log(line);
    }

    fn tensor_line(kind: &str, index: usize, tensor: &DumpTensor) -> String {
        format!(
            "[Dump][Exception] {}[{}] shape: {}, format: {}, dtype: {}, addr: {:#x}, size: {}",
            kind,
            index,
            tensor.shape_string(),
            format_name(tensor.format()),
            ge_data_type_name(tensor.data_type()),
            tensor.address(),
            tensor.size()
        )
    }

    /// Log tensors, TVM launch fields and the argument table
    pub fn log_exception_info(&mut self, driver: &dyn DeviceDriver, args: &ExceptionArgs) -> Result<()> {
        let mut lines = Vec::new();
        lines.push(format!(
            "[Dump][Exception] op type: {}, op name: {}, device {}, stream {}, task {}, context {}",
            self.op_type,
            self.op_name,
            self.identity.device_id,
            self.identity.stream_id,
            self.identity.task_id,
            self.identity.context_id
        ));
        for (i, t) in self.input_tensors.iter().enumerate() {
            lines.push(Self::tensor_line("input", i, t));
        }
        for (i, t) in self.output_tensors.iter().enumerate() {
            lines.push(Self::tensor_line("output", i, t));
        }
        for (i, ws) in self.workspaces.iter().enumerate() {
            lines.push(format!(
                "[Dump][Exception] workspace[{}] addr: {:#x}, size: {}",
                i, ws.addr, ws.bytes
            ));
        }

        if self.additional(ADDITIONAL_IMPLY_TYPE) == Some(IMPLY_TYPE_TVM) {
            for (key, label) in TVM_LOG_KEYS {
                if let Some(value) = self.additional(key) {
                    lines.push(format!("[Dump][Exception] {}: {}", label, value));
                }
            }
        }

        if !self.pre_exec_args.is_empty() {
            lines.extend(Self::args_lines("pre-execution args", &self.pre_exec_args));
        }
        for line in lines {
            self.log_line(line);
        }

        if args.arg_addr == 0 || args.arg_size == 0 {
            tracing::warn!("[Dump][Exception] no exception args reported.");
            return Ok(());
        }
        let words = self.exception_arg_words(driver, args).map_err(|e| {
            tracing::error!("[Dump][Exception] copy exception args failed: {}", e);
            e
        })?;
        for line in Self::args_lines("exception args", &words) {
            self.log_line(line);
        }
        Ok(())
    }

    fn args_lines(label: &str, words: &[u64]) -> Vec<String> {
        words
            .chunks(ARGS_PER_LINE)
            .enumerate()
            .map(|(n, chunk)| {
                let start = n * ARGS_PER_LINE;
                let values: Vec<String> = chunk.iter().map(|w| format!("{:#x}", w)).collect();
                format!(
                    "[Dump][Exception] {}[{}-{}]: {}",
                    label,
                    start,
                    start + chunk.len() - 1,
                    values.join(" ")
                )
            })
            .collect()
    }

    /// Kernel object name derived from the device function symbol
    fn kernel_object_name(dev_func: &str) -> String {
        let stem = dev_func.rfind("__").map_or(dev_func, |pos| &dev_func[..pos]);
        format!("{}.o", stem)
    }

    /// Copy the compiled kernel object next to the dump
    pub fn copy_op_kernel_file(&self) -> Result<PathBuf> {
        let dev_func = self
            .additional(ADDITIONAL_DEV_FUNC)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DumpError::KernelFile("device function symbol is not recorded".into()))?;
        let op_dir = self
            .additional(ADDITIONAL_OP_FILE_PATH)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DumpError::KernelFile("kernel object directory is not recorded".into()))?;

        let object = Self::kernel_object_name(dev_func);
        let src = Path::new(op_dir).join(&object);
        let src = src.canonicalize().map_err(|e| {
            DumpError::KernelFile(format!("kernel object {} not found: {}", src.display(), e))
        })?;

        let cwd = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| DumpError::KernelFile(format!("current work dir unavailable: {}", e)))?,
        };
        if cwd.as_os_str().is_empty() {
            return Err(DumpError::KernelFile("current work dir is empty".into()));
        }

        let dst = cwd.join(&object);
        std::fs::copy(&src, &dst).map_err(|e| {
            DumpError::KernelFile(format!("copy {} to {} failed: {}", src.display(), dst.display(), e))
        })?;
        tracing::info!("[Dump][Exception] kernel object copied to {}", dst.display());
        Ok(dst)
    }

    /// Write the dump file into `dump_dir` and collect the kernel object
    ///
    /// Both steps always run; the first failure is returned.
    pub fn dump_exception(
        &mut self,
        driver: &dyn DeviceDriver,
        dump_dir: &Path,
        platform: Platform,
    ) -> Result<PathBuf> {
        let file_name = format!(
            "{}.{}.{}.{}",
            file_name_part(&self.op_type),
            file_name_part(&self.op_name),
            self.identity.task_id,
            unique_timestamp()
        );
        let path = dump_dir.join(file_name);
        tracing::info!("[Dump][Exception] dump exception to {}", path.display());

        let dump_result = {
            let mut file = DumpFile::create(driver, self.identity.device_id, platform, &path);
            file.set_header(&self.op_name);
            file.set_input_tensors(&self.input_tensors);
            file.set_output_tensors(&self.output_tensors);
            file.set_workspaces(&self.workspaces);
            file.set_mc2_spaces(&self.mc2_slots());
            file.set_input_buffer(&self.args_input_buffer());
            file.dump(&mut self.log_record)
        };
        if let Err(e) = &dump_result {
            tracing::error!("[Dump][Exception] dump {} failed: {}", path.display(), e);
        }

        let kernel_result = if self.additional(ADDITIONAL_DEV_FUNC).is_some() {
            self.copy_op_kernel_file().map(|_| ())
        } else {
            tracing::debug!("[Dump][Exception] no device function symbol, kernel object not collected");
            Ok(())
        };
        if let Err(e) = &kernel_result {
            tracing::error!("[Dump][Exception] collect kernel object failed: {}", e);
        }

        dump_result?;
        kernel_result?;
        Ok(path)
    }

    fn mc2_slots(&self) -> Vec<DumpWorkspace> {
        self.device_info
            .iter()
            .filter(|d| d.name == DEVICE_INFO_NAME_MC2_CTX)
            .map(|d| DumpWorkspace { addr: d.addr, bytes: d.length, args_offset: 0 })
            .collect()
    }

    fn args_input_buffer(&self) -> Vec<InputBuffer> {
        if self.is_host_args {
            return Vec::new();
        }
        self.device_info
            .iter()
            .filter(|d| d.name == DEVICE_INFO_NAME_ARGS)
            .map(|d| InputBuffer { addr: d.addr, length: d.length, arg_index: 0 })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimDevice;
    use crate::dump::tensor::AddressType;
    use tempfile::TempDir;

    fn tensor(tensor_type: TensorType, addr: DeviceAddr, args_offset: u32) -> TensorInfo {
        TensorInfo {
            tensor_type,
            data_type: 3,
            format: 2,
            shape: vec![4, 2],
            origin_shape: vec![4, 2],
            size: 32,
            addr,
            placement: TensorPlacement::OnDevice,
            address_type: AddressType::Traditional,
            args_offset,
        }
    }

    fn args_bytes(words: &[u64]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_identity() {
        let sim = SimDevice::new(&[1]);
        let info = OperatorInfo::new("CONV2D", "TestName", OpIdentity::new(1, 2, 3, 4));
        let op = DumpOperator::new(&info, &sim);
        assert!(op.is_belong_to(&OpIdentity::new(1, 2, 3, 4)));
        assert!(!op.is_belong_to(&OpIdentity::new(2, 2, 3, 4)));
        assert!(!op.is_belong_to(&OpIdentity::new(1, 3, 3, 4)));
        assert!(!op.is_belong_to(&OpIdentity::new(1, 2, 4, 4)));
        assert!(!op.is_belong_to(&OpIdentity::new(1, 2, 3, 5)));
    }

    #[test]
    fn test_placement_filter() {
        let sim = SimDevice::new(&[0]);
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.tensors.push(tensor(TensorType::Input, 0x10, 0));
        info.tensors.push(tensor(TensorType::Input, 0, 1));
        let mut host = tensor(TensorType::Output, 0x20, 2);
        host.placement = TensorPlacement::OnHost;
        info.tensors.push(host);
        let mut empty = tensor(TensorType::Output, 0x30, 3);
        empty.size = 0;
        info.tensors.push(empty);
        info.tensors.push(tensor(TensorType::Workspace, 0x40, 4));
        let op = DumpOperator::new(&info, &sim);
        assert_eq!(op.input_tensors().len(), 1);
        assert!(op.output_tensors().is_empty());
        assert_eq!(op.workspaces().len(), 1);
    }

    #[test]
    fn test_is_host_args_parsing() {
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        assert!(!info.is_host_args());
        for (value, expected) in [("true", true), (" TRUE ", true), ("false", false), ("1", false), ("", false)] {
            info.additional_info.insert(ADDITIONAL_IS_HOST_ARGS.into(), value.into());
            assert_eq!(info.is_host_args(), expected, "value {:?}", value);
        }
    }

    #[test]
    fn test_refresh_null_args_fails() {
        let sim = SimDevice::new(&[0]);
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.tensors.push(tensor(TensorType::Input, 0x10, 0));
        let mut op = DumpOperator::new(&info, &sim);
        let args = ExceptionArgs { arg_addr: 0, arg_size: 16 };
        assert!(op.refresh_addrs(&sim, &args).is_err());
    }

    #[test]
    fn test_partial_refresh() {
        let sim = SimDevice::new(&[0]);
        let args_addr = sim.alloc_with(0, &args_bytes(&[0x1234, 0x4321]));
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.tensors.push(tensor(TensorType::Input, 0x10, 1));
        info.tensors.push(tensor(TensorType::Output, 0x20, 3));
        let mut op = DumpOperator::new(&info, &sim);
        let args = ExceptionArgs { arg_addr: args_addr, arg_size: 16 };
        op.refresh_addrs(&sim, &args).expect("partial refresh succeeds");
        assert_eq!(op.input_tensors()[0].address(), 0x4321);
        assert_eq!(op.output_tensors()[0].address(), 0x20);
    }

    #[test]
    fn test_refresh_rejects_invalidated_args() {
        let sim = SimDevice::new(&[0]);
        let args_addr = sim.alloc_with(0, &args_bytes(&[0x1234, 0x4321]));
        sim.invalidate(args_addr);
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.tensors.push(tensor(TensorType::Input, 0x10, 1));
        let mut op = DumpOperator::new(&info, &sim);
        let args = ExceptionArgs { arg_addr: args_addr, arg_size: 16 };
        assert!(matches!(
            op.refresh_addrs(&sim, &args),
            Err(DumpError::InvalidAddress { .. })
        ));
        assert_eq!(op.input_tensors()[0].address(), 0x10);
        assert!(op.log_exception_info(&sim, &args).is_err());
        assert!(!op.log_record().concat().contains("exception args[0"));
    }

    #[test]
    fn test_refresh_from_host_args() {
        let sim = SimDevice::new(&[0]);
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.additional_info.insert(ADDITIONAL_IS_HOST_ARGS.into(), "true".into());
        info.device_info.push(DeviceInfo {
            name: DEVICE_INFO_NAME_ARGS.into(),
            addr: 0x7fff_0000,
            length: 16,
            host_data: Some(args_bytes(&[0xAAAA, 0xBBBB])),
        });
        info.tensors.push(tensor(TensorType::Input, 0x10, 1));
        let mut op = DumpOperator::new(&info, &sim);

        let args = ExceptionArgs { arg_addr: 0x7fff_0000, arg_size: 16 };
        op.refresh_addrs(&sim, &args).expect("host table");
        assert_eq!(op.input_tensors()[0].address(), 0xBBBB);

        let unknown = ExceptionArgs { arg_addr: 0x5000, arg_size: 16 };
        assert!(matches!(op.refresh_addrs(&sim, &unknown), Err(DumpError::NotFound(_))));
    }

    #[test]
    fn test_host_args_not_staged() {
        let sim = SimDevice::new(&[0]);
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.additional_info.insert(ADDITIONAL_IS_HOST_ARGS.into(), "true".into());
        info.device_info.push(DeviceInfo {
            name: DEVICE_INFO_NAME_ARGS.into(),
            addr: 0x7fff_0000,
            length: 16,
            host_data: Some(args_bytes(&[1, 2])),
        });
        let op = DumpOperator::new(&info, &sim);
        assert_eq!(op.pre_exec_args(), &[1, 2]);
        assert!(op.args_input_buffer().is_empty());
    }

    #[test]
    fn test_log_exception_info() {
        let sim = SimDevice::new(&[0]);
        let words: Vec<u64> = (0..25).collect();
        let args_addr = sim.alloc_with(0, &args_bytes(&words));
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.additional_info.insert(ADDITIONAL_IMPLY_TYPE.into(), "1".into());
        info.additional_info.insert(ADDITIONAL_BLOCK_DIM.into(), "32".into());
        let mut op = DumpOperator::new(&info, &sim);
        op.log_exception_info(&sim, &ExceptionArgs { arg_addr: args_addr, arg_size: 200 })
            .expect("logged");
        let log = op.log_record().concat();
        assert!(log.contains("block dim: 32"));
        assert!(log.contains("exception args[0-19]"));
        assert!(log.contains("exception args[20-24]"));

        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        info.additional_info.insert(ADDITIONAL_IMPLY_TYPE.into(), "abc".into());
        info.additional_info.insert(ADDITIONAL_BLOCK_DIM.into(), "32".into());
        let mut op = DumpOperator::new(&info, &sim);
        op.log_exception_info(&sim, &ExceptionArgs::default()).expect("logged");
        assert!(!op.log_record().concat().contains("block dim"));
    }

    #[test]
    fn test_log_exception_info_copy_failure() {
        let sim = SimDevice::new(&[0]);
        let args_addr = sim.alloc_with(0, &[0u8; 32]);
        sim.fail_copies_at(args_addr);
        let info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        let mut op = DumpOperator::new(&info, &sim);
        let args = ExceptionArgs { arg_addr: args_addr, arg_size: 32 };
        assert!(op.log_exception_info(&sim, &args).is_err());
    }

    #[test]
    fn test_copy_op_kernel_file() {
        let dir = TempDir::new().expect("tempdir");
        let meta = dir.path().join("kernel_meta");
        std::fs::create_dir_all(&meta).expect("mkdir");
        std::fs::write(meta.join("te_add_1a2b.o"), b"ELF").expect("write");
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).expect("mkdir");

        let sim = SimDevice::new(&[0]);
        let mut info = OperatorInfo::new("Add", "add", OpIdentity::new(0, 1, 1, 0));
        let mut op = DumpOperator::new(&info, &sim);
        assert!(matches!(op.copy_op_kernel_file(), Err(DumpError::KernelFile(_))));

        info.additional_info.insert(ADDITIONAL_DEV_FUNC.into(), "te_add_1a2b__kernel0".into());
        info.additional_info.insert(ADDITIONAL_OP_FILE_PATH.into(), meta.display().to_string());
        op = DumpOperator::new(&info, &sim);
        op.set_work_dir(&work);
        let dst = op.copy_op_kernel_file().expect("copied");
        assert_eq!(dst, work.join("te_add_1a2b.o"));
        assert_eq!(std::fs::read(dst).expect("read"), b"ELF");

        info.additional_info.insert(ADDITIONAL_DEV_FUNC.into(), "missing__kernel0".into());
        op = DumpOperator::new(&info, &sim);
        op.set_work_dir(&work);
        assert!(op.copy_op_kernel_file().is_err());

        info.additional_info.insert(ADDITIONAL_DEV_FUNC.into(), "te_add_1a2b__kernel0".into());
        op = DumpOperator::new(&info, &sim);
        op.set_work_dir("");
        assert!(op.copy_op_kernel_file().is_err());
    }

    #[test]
    fn test_dump_exception_runs_both_steps() {
        let dir = TempDir::new().expect("tempdir");
        let sim = SimDevice::new(&[0]);
        let input = sim.alloc_with(0, &[7u8; 32]);
        let mut info = OperatorInfo::new("CONV2D", "TestName", OpIdentity::new(0, 2, 3, 4));
        info.tensors.push(tensor(TensorType::Input, input, 0));
        info.additional_info.insert(ADDITIONAL_DEV_FUNC.into(), "absent__kernel0".into());
        info.additional_info.insert(ADDITIONAL_OP_FILE_PATH.into(), dir.path().display().to_string());
        let mut op = DumpOperator::new(&info, &sim);
        op.set_work_dir(dir.path());

        assert!(op.dump_exception(&sim, dir.path(), Platform::Host).is_err());
        let dumps: Vec<_> = std::fs::read_dir(dir.path())
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("CONV2D.TestName.2."))
            .collect();
        assert_eq!(dumps.len(), 1);
    }
}
