//! Exception dump: operator capture, codec tables and the binary writer

pub mod datatype;
pub mod file;
pub mod header;
pub mod operator;
pub mod tensor;

pub use file::{DeviceData, DumpFile, DumpFileState};
pub use header::{DumpFileReader, DumpHeader};
pub use operator::{DeviceInfo, DumpOperator, ExceptionArgs, OpIdentity, OperatorInfo};
pub use tensor::{DumpTensor, TensorInfo, TensorPlacement, TensorType};

use chrono::{DateTime, Duration, Local};
use parking_lot::Mutex;

static LAST_TIMESTAMP: Mutex<Option<DateTime<Local>>> = Mutex::new(None);

/// Local time as `%Y%m%d%H%M%S%3f`, never repeating within the process
///
/// Two dumps of the same operator within one millisecond would otherwise
/// share a file name, so a repeat is bumped to the next millisecond. The
/// caller then waits outside the lock until the clock reaches that stamp.
pub fn unique_timestamp() -> String {
    let now = Local::now();
    let stamp = {
        let mut last = LAST_TIMESTAMP.lock();
        let stamp = match *last {
            Some(prev) if truncate_ms(now) <= truncate_ms(prev) => truncate_ms(prev) + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    };
    if let Ok(ahead) = (stamp - now).to_std() {
        std::thread::sleep(ahead);
    }
    stamp.format("%Y%m%d%H%M%S%3f").to_string()
}

fn truncate_ms(t: DateTime<Local>) -> DateTime<Local> {
    t - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos() % 1_000_000))
}

/// Replace path separators so operator names are safe file name parts
pub(crate) fn file_name_part(s: &str) -> String {
    s.chars().map(|c| if c == '/' || c == '\\' { '_' } else { c }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_distinct() {
        let a = unique_timestamp();
        let b = unique_timestamp();
        assert_ne!(a, b);
        assert_eq!(a.len(), 17);
    }

    #[test]
    fn test_concurrent_timestamps_distinct() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..20).map(|_| unique_timestamp()).collect::<Vec<_>>()))
            .collect();
        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread"))
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn test_file_name_part() {
        assert_eq!(file_name_part("scope/Add_1"), "scope_Add_1");
    }
}
