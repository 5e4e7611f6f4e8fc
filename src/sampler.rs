//! Per-process metric extraction from the proc filesystem
//!
//! All reads here are synchronous and stateless. One call to
//! [`Sampler::sample`] produces the full sample batch for one process in
//! canonical order: the CPU aggregate, memory, disk, then the four CPU
//! sub-metrics (utime, stime, cutime, cstime).
//!
//! ## Partial-failure policy
//!
//! A failed read of `/proc/<pid>/stat` means the process has exited, so the
//! whole batch fails with [`SampleError`] and the caller abandons this
//! process's round. Failed reads of `/proc/<pid>/status` (memory) or
//! `/proc/<pid>/fd` (disk) zero-fill that metric instead.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::{CpuSubtype, MetricSample, MetricType};

/// Result type alias for sampling operations
pub type SampleResult<T> = Result<T, SampleError>;

/// Errors that abort the sample batch for one process
#[derive(Debug)]
pub enum SampleError {
    /// `/proc/<pid>/stat` is missing or unreadable - the process has exited
    ProcessGone { pid: i32, source: std::io::Error },

    /// `/proc/<pid>/stat` did not have the expected shape
    MalformedStat { pid: i32, reason: String },
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::ProcessGone { pid, source } => {
                write!(f, "process {} does not exist or has terminated: {}", pid, source)
            }
            SampleError::MalformedStat { pid, reason } => {
                write!(f, "malformed stat line for process {}: {}", pid, reason)
            }
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::ProcessGone { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// CPU time counters for one process, in clock ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTicks {
    pub utime: u64,
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
}

impl CpuTicks {
    /// Sum of user, system, child-user and child-system time
    pub fn total(&self) -> f64 {
        (self.utime + self.stime + self.cutime + self.cstime) as f64
    }
}

/// Reads the current metric values for one monitored process.
///
/// Implementations must be `Send + Sync`; the scheduler shares one sampler
/// across all per-process tasks.
pub trait Sampler: Send + Sync {
    fn sample(&self, pid: i32) -> SampleResult<Vec<MetricSample>>;
}

/// Production sampler backed by `/proc`
#[derive(Debug, Clone, Default)]
pub struct ProcSampler;

impl Sampler for ProcSampler {
    fn sample(&self, pid: i32) -> SampleResult<Vec<MetricSample>> {
        let stat_path = format!("/proc/{pid}/stat");
        let stat = std::fs::read_to_string(&stat_path)
            .map_err(|source| SampleError::ProcessGone { pid, source })?;

        let ticks = parse_stat_cpu_ticks(&stat).map_err(|reason| SampleError::MalformedStat {
            pid,
            reason,
        })?;

        let rss_kb = std::fs::read_to_string(format!("/proc/{pid}/status"))
            .ok()
            .and_then(|status| parse_vm_rss_kb(&status))
            .unwrap_or(0.0);

        let disk_bytes = read_open_file_bytes(Path::new(&format!("/proc/{pid}/fd")));

        trace!("sampled pid {pid}: cpu={} rss={rss_kb}kB disk={disk_bytes}B", ticks.total());

        Ok(build_samples(pid, ticks, rss_kb, disk_bytes, Utc::now()))
    }
}

/// Extract the utime/stime/cutime/cstime counters from a `/proc/<pid>/stat`
/// line. The comm field (field 2) may contain spaces and parentheses, so
/// fields are counted from the last closing parenthesis.
pub fn parse_stat_cpu_ticks(stat: &str) -> Result<CpuTicks, String> {
    let after_comm = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| "missing comm field".to_string())?;

    let fields: Vec<&str> = after_comm.split_whitespace().collect();

    // After the comm field, the state field is index 0, which makes utime
    // (field 14 of the full line) index 11.
    let tick_field = |index: usize, name: &str| -> Result<u64, String> {
        fields
            .get(index)
            .ok_or_else(|| format!("missing {name} field"))?
            .parse::<u64>()
            .map_err(|_| format!("unparseable {name} field"))
    };

    Ok(CpuTicks {
        utime: tick_field(11, "utime")?,
        stime: tick_field(12, "stime")?,
        cutime: tick_field(13, "cutime")?,
        cstime: tick_field(14, "cstime")?,
    })
}

/// Extract the resident set size (in kB) from `/proc/<pid>/status` content.
/// Returns `None` when the field is missing or unparseable; the caller
/// zero-fills.
pub fn parse_vm_rss_kb(status: &str) -> Option<f64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse::<f64>().ok())
}

/// Sum the sizes of all regular files a process holds open, by following the
/// symlinks under its fd directory. Unreadable entries are skipped; an
/// unreadable directory yields zero.
fn read_open_file_bytes(fd_dir: &Path) -> f64 {
    let entries = match std::fs::read_dir(fd_dir) {
        Ok(entries) => entries,
        Err(_) => return 0.0,
    };

    let mut total: u64 = 0;
    for entry in entries.flatten() {
        let Ok(target) = std::fs::read_link(entry.path()) else {
            continue;
        };
        // Only follow real paths; pipes and sockets read as "pipe:[...]".
        if !target.is_absolute() {
            continue;
        }
        if let Ok(meta) = std::fs::metadata(&target) {
            total += meta.len();
        }
    }

    total as f64
}

/// Assemble the canonical sample batch for one process. The aggregate CPU
/// sample comes first, then memory and disk, then the CPU breakdown, each
/// CPU sample tagged with its subtype at creation.
pub fn build_samples(
    pid: i32,
    ticks: CpuTicks,
    rss_kb: f64,
    disk_bytes: f64,
    timestamp: DateTime<Utc>,
) -> Vec<MetricSample> {
    vec![
        MetricSample {
            pid,
            metric_type: MetricType::Cpu,
            value: ticks.total(),
            subtype: Some(CpuSubtype::Total),
            timestamp,
        },
        MetricSample {
            pid,
            metric_type: MetricType::Memory,
            value: rss_kb,
            subtype: None,
            timestamp,
        },
        MetricSample {
            pid,
            metric_type: MetricType::Disk,
            value: disk_bytes,
            subtype: None,
            timestamp,
        },
        MetricSample {
            pid,
            metric_type: MetricType::Cpu,
            value: ticks.utime as f64,
            subtype: Some(CpuSubtype::Utime),
            timestamp,
        },
        MetricSample {
            pid,
            metric_type: MetricType::Cpu,
            value: ticks.stime as f64,
            subtype: Some(CpuSubtype::Stime),
            timestamp,
        },
        MetricSample {
            pid,
            metric_type: MetricType::Cpu,
            value: ticks.cutime as f64,
            subtype: Some(CpuSubtype::Cutime),
            timestamp,
        },
        MetricSample {
            pid,
            metric_type: MetricType::Cpu,
            value: ticks.cstime as f64,
            subtype: Some(CpuSubtype::Cstime),
            timestamp,
        },
    ]
}
