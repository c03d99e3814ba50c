//! npu-dump command line tool
//!
//! Inspects exception dump files and replays raw error ring buffer
//! snapshots through the decoder.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use npu_dump::config::{RasProbeConfig, RingBufferConfig};
use npu_dump::driver::sim::SimDevice;
use npu_dump::dump::datatype::{data_type_name, format_name};
use npu_dump::ringbuf::control::CONTROL_BLOCK_LEN;
use npu_dump::ringbuf::{ControlBlock, DeviceErrorProc};
use npu_dump::{DeviceDriver, DumpError, DumpFileReader, InMemoryTaskRegistry, TaskRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Legacy scheduler version used by `ringbuf --legacy`
const LEGACY_SCHED_VERSION: u32 = 6;

/// Exception dump inspection tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header and section sizes of a dump file
    Inspect {
        /// Dump file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Decode a raw error ring buffer snapshot
    Ringbuf {
        /// Snapshot: control block followed by the element slots
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,

        /// Snapshot comes from a scheduler without the extended control block
        #[arg(long)]
        legacy: bool,

        /// Element size used with --legacy
        #[arg(long, default_value = "4096")]
        element_size: u32,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose)?;

    match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::Ringbuf {
            snapshot,
            legacy,
            element_size,
        } => replay_ring_buffer(&snapshot, legacy, element_size),
    }
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();

    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let reader = DumpFileReader::open(path).with_context(|| format!("Failed to read dump file {:?}", path))?;
    let header = reader.header();
    let sections = reader.sections();

    println!("{} {}", "Dump file:".bold().cyan(), path.display());
    println!("  {} {}", "Version:".green(), header.version);
    println!("  {} {}", "Operator:".green(), header.op_name);
    println!("  {} {} us", "Dump time:".green(), header.dump_time);
    println!("  {} {} bytes", "Header size:".green(), reader.header_size());

    println!("\n{} {}", "Inputs:".bold(), header.inputs.len());
    for (i, input) in header.inputs.iter().enumerate() {
        println!(
            "  [{}] {} {} shape={:?} size={} arg_index={} input_type={}",
            i,
            data_type_name(input.data_type),
            format_name(input.format),
            input.shape,
            input.size,
            input.arg_index,
            input.input_type
        );
    }
    println!("{} {}", "Outputs:".bold(), header.outputs.len());
    for (i, output) in header.outputs.iter().enumerate() {
        println!(
            "  [{}] {} {} shape={:?} size={} arg_index={}",
            i,
            data_type_name(output.data_type),
            format_name(output.format),
            output.shape,
            output.size,
            output.arg_index
        );
    }
    println!("{} {}", "Workspaces:".bold(), header.spaces.len());
    for (i, space) in header.spaces.iter().enumerate() {
        println!("  [{}] {:?} size={} arg_index={}", i, space.kind, space.size, space.arg_index);
    }

    println!("\n{}", "Sections:".bold());
    println!("  inputs        {} bytes", total(&sections.inputs));
    println!("  outputs       {} bytes", total(&sections.outputs));
    println!("  workspaces    {} bytes", total(&sections.spaces));
    println!("  input buffers {} bytes", total(&sections.input_buffers));

    if !header.dfx_message.is_empty() {
        println!("\n{}", "Diagnostics:".bold().yellow());
        for line in header.dfx_message.lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}

fn total(parts: &[bytes::Bytes]) -> usize {
    parts.iter().map(|b| b.len()).sum()
}

fn replay_ring_buffer(path: &Path, legacy: bool, element_size: u32) -> Result<()> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read snapshot {:?}", path))?;
    let block = ControlBlock::parse(&raw).context("Snapshot has no control block")?;
    if block.len == 0 {
        bail!("Snapshot control block reports an empty ring");
    }

    let sim = Arc::new(SimDevice::new(&[0]));
    if legacy {
        sim.set_scheduler_version(0, LEGACY_SCHED_VERSION);
    }
    // Pad the snapshot so a truncated capture still covers every slot.
    let slot_size = if legacy { element_size } else { block.element_size };
    let needed = CONTROL_BLOCK_LEN + block.len as usize * slot_size as usize;
    let mut image = raw;
    if image.len() < needed {
        image.resize(needed, 0);
    }
    let addr = sim.alloc_with(0, &image);

    let config = RingBufferConfig {
        max_element_num: block.len,
        default_element_size: element_size,
        op_timeout_ms_supported: true,
        ..RingBufferConfig::default()
    };
    let ras = RasProbeConfig {
        poll_count: 0,
        short_poll_count: 0,
        ..RasProbeConfig::default()
    };
    let driver: Arc<dyn DeviceDriver> = sim.clone();
    let tasks: Arc<dyn TaskRegistry> = Arc::new(InMemoryTaskRegistry::new());
    let proc = DeviceErrorProc::new(0, driver, tasks, config, ras);
    proc.attach(addr, image.len() as u64)?;

    println!(
        "{} head={} tail={} len={} element_size={} pending={}",
        "Ring buffer:".bold().cyan(),
        block.head,
        block.tail,
        block.len,
        block.element_size,
        block.pending()
    );
    let report = match proc.drain_once(None) {
        Ok(report) => report,
        Err(DumpError::NoData) => {
            println!("{}", "No pending records".yellow());
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to decode ring buffer"),
    };

    for record in &report.records {
        println!(
            "{} #{} {:?}",
            "Record".green(),
            record.error_number,
            record.record.kind()
        );
    }
    for line in &report.diagnostics {
        println!("  {}", line);
    }
    if report.skipped > 0 {
        println!("{} {} elements skipped", "Warning:".yellow(), report.skipped);
    }
    Ok(())
}
