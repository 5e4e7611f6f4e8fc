use tracing::trace;

/// Free-form project metadata carried in the config file. Not interpreted by
/// the agent, only logged at startup.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProjectConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProcessConfig {
    /// TCP ports whose owning processes should be monitored.
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MetricsConfig {
    /// When false, no sampling rounds run at all, but the agent stays up.
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DetectionConfig {
    /// Base URL of the anomaly-detection service, e.g. `http://localhost:9999`.
    pub url: String,
    #[serde(default = "default_detection_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SinkConfig {
    /// WebSocket URL of the live-viewing sink, e.g. `ws://localhost:8765`.
    pub url: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_reconnect_min")]
    pub reconnect_min_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    pub process: ProcessConfig,
    pub metrics: MetricsConfig,
    pub detection: DetectionConfig,
    pub sink: SinkConfig,
}

fn default_interval() -> u64 {
    15
}

fn default_detection_timeout() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    100
}

fn default_reconnect_min() -> u64 {
    1
}

fn default_reconnect_max() -> u64 {
    30
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))?;

    validate(&config)?;
    trace!("loaded config: {config:?}");

    Ok(config)
}

/// Reject configurations the pipeline cannot run with. Called by
/// [`read_config_file`]; exposed for tests building configs by hand.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    if config.metrics.enabled && config.metrics.interval == 0 {
        anyhow::bail!("metrics.interval must be at least 1 second");
    }

    if config.sink.queue_capacity == 0 {
        anyhow::bail!("sink.queue_capacity must be at least 1");
    }

    if config.sink.reconnect_min_secs > config.sink.reconnect_max_secs {
        anyhow::bail!("sink.reconnect_min_secs must not exceed sink.reconnect_max_secs");
    }

    if !config.sink.url.starts_with("ws://") && !config.sink.url.starts_with("wss://") {
        anyhow::bail!("sink.url must be a ws:// or wss:// URL");
    }

    Ok(())
}
