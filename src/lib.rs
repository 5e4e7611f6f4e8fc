pub mod actors;
pub mod assemble;
pub mod config;
pub mod detect;
pub mod discovery;
pub mod sampler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A process under observation, resolved once at startup from the configured
/// port list. The set of monitored processes is fixed for the lifetime of
/// the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredProcess {
    pub port: u16,
    pub pid: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    Cpu,
    Memory,
    Disk,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Cpu => "CPU",
            MetricType::Memory => "MEMORY",
            MetricType::Disk => "DISK",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label for one component of a process's CPU time breakdown.
///
/// Every CPU-typed sample carries its label from the point of creation, so
/// two sub-metrics that happen to share a numeric value can never be
/// confused downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuSubtype {
    Utime,
    Stime,
    Cutime,
    Cstime,
    Total,
}

impl CpuSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuSubtype::Utime => "utime",
            CpuSubtype::Stime => "stime",
            CpuSubtype::Cutime => "cutime",
            CpuSubtype::Cstime => "cstime",
            CpuSubtype::Total => "total",
        }
    }
}

/// One metric reading for one process, produced fresh every round and
/// consumed within it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub pid: i32,
    pub metric_type: MetricType,
    pub value: f64,
    /// Set for every CPU-typed sample (the aggregate carries `Total`),
    /// `None` for all other metric types.
    pub subtype: Option<CpuSubtype>,
    pub timestamp: DateTime<Utc>,
}

/// The wire-ready unit handed to the forwarder. Serialized as one JSON text
/// frame; optional fields are omitted, not null, when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub pid: i32,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<CpuSubtype>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<i32>,
}
