//! Dump file writing, staging fallbacks and re-parsing

use npu_dump::config::Platform;
use npu_dump::core::stage_to_host;
use npu_dump::driver::sim::SimDevice;
use npu_dump::driver::DeviceAddr;
use npu_dump::dump::datatype::OutputDataType;
use npu_dump::dump::file::{write_device_data, DeviceData, Mc2Context};
use npu_dump::dump::tensor::{AddressType, DumpWorkspace, TensorInfo, TensorPlacement, TensorType};
use npu_dump::dump::{DumpFile, DumpFileReader, DumpFileState, DumpTensor};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn tensor(tensor_type: TensorType, data_type: u32, shape: Vec<i64>, addr: DeviceAddr, size: u64) -> DumpTensor {
    DumpTensor::new(&TensorInfo {
        tensor_type,
        data_type,
        format: 2,
        origin_shape: shape.clone(),
        shape,
        size,
        addr,
        placement: TensorPlacement::OnDevice,
        address_type: AddressType::Traditional,
        args_offset: 0,
    })
}

#[test]
fn test_zero_size_is_noop() {
    let sim = SimDevice::new(&[0]);
    for addr in [0, 0x1234, 0xFFFF_FFFF_0000] {
        let staged = stage_to_host(&sim, 0, addr, 0).expect("zero size succeeds");
        assert!(staged.is_empty());

        let mut out = Vec::new();
        let written = write_device_data(&mut out, &sim, 0, &DeviceData::new(addr, 0)).expect("skip");
        assert_eq!(written, 0);
        assert!(out.is_empty());
    }
}

#[test]
fn test_fallback_keeps_declared_size() {
    let sim = SimDevice::new(&[0, 1]);
    let foreign = sim.alloc_with(1, &[0x55; 48]);
    let stale = sim.alloc_with(0, &[0x66; 24]);
    sim.invalidate(stale);
    let failing = sim.alloc_with(0, &[0x77; 16]);
    sim.fail_copies_at(failing);

    for (addr, size) in [(foreign, 48u64), (stale, 24), (failing, 16), (0, 8)] {
        let staged = stage_to_host(&sim, 0, addr, size).expect("fallback");
        assert_eq!(staged.len() as u64, size);
        assert!(staged.as_slice().iter().all(|b| *b == 0));
    }

    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("fallback.dump");
    let mut file = DumpFile::create(&sim, 0, Platform::Host, &path);
    file.set_header("Fallback");
    file.set_input_tensors(&[tensor(TensorType::Input, 0, vec![12], foreign, 48)]);
    file.dump(&mut Vec::new()).expect("dump");

    let reader = DumpFileReader::open(&path).expect("parse");
    assert_eq!(reader.header().inputs[0].size, 48);
    assert_eq!(reader.sections().inputs[0].len(), 48);
}

#[test]
fn test_dump_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let sim = SimDevice::new(&[0]);
    let input0: Vec<u8> = (0..32).collect();
    let input1: Vec<u8> = (0..16).map(|i| 0xF0 | i).collect();
    let output: Vec<u8> = vec![0xAA; 8];
    let workspace: Vec<u8> = vec![0x0F; 20];
    let a = sim.alloc_with(0, &input0);
    let b = sim.alloc_with(0, &input1);
    let c = sim.alloc_with(0, &output);
    let w = sim.alloc_with(0, &workspace);

    let path = dir.path().join("Add.add.1.20260101000000000");
    let mut file = DumpFile::create(&sim, 0, Platform::Host, &path);
    file.set_header("add");
    file.set_input_tensors(&[
        tensor(TensorType::Input, 3, vec![4, 2], a, 32),
        tensor(TensorType::Input, 1, vec![8], b, 16),
    ]);
    file.set_output_tensors(&[tensor(TensorType::Output, 0, vec![2], c, 8)]);
    file.set_workspaces(&[DumpWorkspace { addr: w, bytes: 20, args_offset: 4 }]);
    let mut record = vec!["first line\n".to_string()];
    file.dump(&mut record).expect("dump");
    assert_eq!(file.state(), DumpFileState::Written);

    let reader = DumpFileReader::open(&path).expect("parse");
    let header = reader.header();
    assert_eq!(header.op_name, "add");
    assert_eq!(header.inputs.len(), 2);
    assert_eq!(header.outputs.len(), 1);
    assert_eq!(header.spaces.len(), 1);
    assert_eq!(header.inputs[0].data_type, OutputDataType::Int32);
    assert_eq!(header.inputs[0].shape, vec![4, 2]);
    assert_eq!(header.inputs[1].data_type, OutputDataType::Float16);
    assert_eq!(header.outputs[0].data_type, OutputDataType::Float);
    assert_eq!(header.spaces[0].arg_index, 4);
    assert!(header.dfx_message.starts_with("first line\n"));

    let sections = reader.sections();
    assert_eq!(sections.inputs[0].as_ref(), input0.as_slice());
    assert_eq!(sections.inputs[1].as_ref(), input1.as_slice());
    assert_eq!(sections.outputs[0].as_ref(), output.as_slice());
    assert_eq!(sections.spaces[0].as_ref(), workspace.as_slice());
}

#[test]
fn test_mc2_section_on_device_only() {
    let sim = SimDevice::new(&[0]);
    let ws = sim.alloc_with(0, &[1u8; 8]);
    let window = sim.alloc_with(0, &[2u8; 4]);
    let ctx = Mc2Context { workspace_addr: ws, workspace_size: 8, window_addr: window, window_size: 4 };
    let ctx_addr = sim.alloc_with(0, &ctx.to_bytes());
    let space = DumpWorkspace { addr: ctx_addr, bytes: 32, args_offset: 0 };

    let dir = TempDir::new().expect("tempdir");
    for (platform, expected) in [(Platform::Device, 1usize), (Platform::Host, 0)] {
        let path = dir.path().join(format!("{:?}", platform));
        let mut file = DumpFile::create(&sim, 0, platform, &path);
        file.set_header("AllGather");
        file.set_mc2_spaces(&[space]);
        file.dump(&mut Vec::new()).expect("dump");

        let reader = DumpFileReader::open(&path).expect("parse");
        assert_eq!(reader.header().spaces.len(), expected);
        if expected == 1 {
            let bytes = reader.sections().spaces[0].as_ref();
            assert_eq!(bytes.len(), 32 + 8 + 4);
            assert_eq!(&bytes[..32], &ctx.to_bytes()[..]);
            assert_eq!(&bytes[32..40], &[1u8; 8]);
            assert_eq!(&bytes[40..], &[2u8; 4]);
        }
    }
}
