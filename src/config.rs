use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Lowest (most favourable) nice value accepted for a task priority.
pub const MIN_NICE: i32 = -20;

/// Highest (least favourable) nice value accepted for a task priority.
pub const MAX_NICE: i32 = 19;

/// Top-level configuration for the telemetry pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Frame aggregation configuration.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Sample production configuration.
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Per-task scheduling priorities.
    #[serde(default)]
    pub priorities: PriorityConfig,

    /// Synthetic CPU load configuration.
    #[serde(default)]
    pub load: LoadConfig,

    /// Frame output configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// How often the monitor prints a status line. Default: 10s.
    #[serde(default = "default_status_interval", with = "humantime_serde")]
    pub status_interval: Duration,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Frame aggregation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Period between frames. Default: 200ms.
    #[serde(default = "default_frame_interval", with = "humantime_serde")]
    pub frame_interval: Duration,

    /// Slack added to the frame period and source rates before a wake or
    /// sample counts as late. Default: 10ms.
    #[serde(default = "default_deadline_tolerance", with = "humantime_serde")]
    pub deadline_tolerance: Duration,

    /// Trailing window covered by the sensor average. Default: 200ms.
    #[serde(default = "default_average_window", with = "humantime_serde")]
    pub average_window: Duration,

    /// Number of sensor samples retained for averaging. Default: 20.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
}

/// Sample production configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Synthetic sensor sampling period. Default: 50ms.
    #[serde(default = "default_sensor_interval", with = "humantime_serde")]
    pub sensor_interval: Duration,

    /// Uptime sampling period. Default: 1s.
    #[serde(default = "default_uptime_interval", with = "humantime_serde")]
    pub uptime_interval: Duration,

    /// Sensor queue capacity (dropped if full). Default: 10.
    #[serde(default = "default_sensor_queue_depth")]
    pub sensor_queue_depth: usize,

    /// Uptime queue capacity (dropped if full). Default: 2.
    #[serde(default = "default_uptime_queue_depth")]
    pub uptime_queue_depth: usize,

    /// Seed for sensor noise. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Per-task priorities as Linux nice values (lower runs first).
#[derive(Debug, Clone, Deserialize)]
pub struct PriorityConfig {
    /// Default: 0.
    #[serde(default = "default_aggregator_priority")]
    pub aggregator: i32,

    /// Default: 5.
    #[serde(default = "default_producer_priority")]
    pub producer: i32,

    /// Default: 15.
    #[serde(default = "default_load_generator_priority")]
    pub load_generator: i32,
}

/// Synthetic CPU load configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    /// Run the load generator. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shortest idle time between bursts. Default: 500ms.
    #[serde(default = "default_load_interval_min", with = "humantime_serde")]
    pub interval_min: Duration,

    /// Longest idle time between bursts. Default: 3s.
    #[serde(default = "default_load_interval_max", with = "humantime_serde")]
    pub interval_max: Duration,

    /// Shortest busy burst. Default: 20ms.
    #[serde(default = "default_load_burst_min", with = "humantime_serde")]
    pub burst_min: Duration,

    /// Longest busy burst. Default: 150ms.
    #[serde(default = "default_load_burst_max", with = "humantime_serde")]
    pub burst_max: Duration,

    /// Busy-loop iterations between clock checks. Default: 1000.
    #[serde(default = "default_spin_batch")]
    pub spin_batch: u32,
}

/// Frame output configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SinkConfig {
    /// Frame line format. Default: text.
    #[serde(default)]
    pub format: FrameFormat,
}

/// Output encoding for emitted frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    #[default]
    Text,
    Json,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_status_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_frame_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_deadline_tolerance() -> Duration {
    Duration::from_millis(10)
}

fn default_average_window() -> Duration {
    Duration::from_millis(200)
}

fn default_window_capacity() -> usize {
    20
}

fn default_sensor_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_uptime_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_sensor_queue_depth() -> usize {
    10
}

fn default_uptime_queue_depth() -> usize {
    2
}

fn default_aggregator_priority() -> i32 {
    0
}

fn default_producer_priority() -> i32 {
    5
}

fn default_load_generator_priority() -> i32 {
    15
}

fn default_load_interval_min() -> Duration {
    Duration::from_millis(500)
}

fn default_load_interval_max() -> Duration {
    Duration::from_secs(3)
}

fn default_load_burst_min() -> Duration {
    Duration::from_millis(20)
}

fn default_load_burst_max() -> Duration {
    Duration::from_millis(150)
}

fn default_spin_batch() -> u32 {
    1000
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait implementations ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            aggregator: AggregatorConfig::default(),
            producer: ProducerConfig::default(),
            priorities: PriorityConfig::default(),
            load: LoadConfig::default(),
            sink: SinkConfig::default(),
            status_interval: default_status_interval(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            frame_interval: default_frame_interval(),
            deadline_tolerance: default_deadline_tolerance(),
            average_window: default_average_window(),
            window_capacity: default_window_capacity(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            sensor_interval: default_sensor_interval(),
            uptime_interval: default_uptime_interval(),
            sensor_queue_depth: default_sensor_queue_depth(),
            uptime_queue_depth: default_uptime_queue_depth(),
            seed: None,
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            aggregator: default_aggregator_priority(),
            producer: default_producer_priority(),
            load_generator: default_load_generator_priority(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_min: default_load_interval_min(),
            interval_max: default_load_interval_max(),
            burst_min: default_load_burst_min(),
            burst_max: default_load_burst_max(),
            spin_batch: default_spin_batch(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

// --- Derived timing ---

impl Config {
    /// Oldest sensor sample age still considered fresh.
    pub fn sensor_timeout(&self) -> Duration {
        self.producer.sensor_interval + self.aggregator.deadline_tolerance
    }

    /// Oldest uptime sample age still considered fresh.
    ///
    /// Two uptime periods are allowed so a single late sample does not
    /// degrade a frame.
    pub fn uptime_timeout(&self) -> Duration {
        self.producer.uptime_interval * 2 + self.aggregator.deadline_tolerance
    }

    /// Capacity of the trigger channel feeding the producer.
    pub fn trigger_queue_depth(&self) -> usize {
        self.producer.sensor_queue_depth + self.producer.uptime_queue_depth
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        let agg = &self.aggregator;
        if agg.frame_interval.as_millis() == 0 {
            bail!("aggregator.frame_interval must be at least 1ms");
        }
        if agg.average_window.is_zero() {
            bail!("aggregator.average_window must be positive");
        }
        if agg.window_capacity == 0 {
            bail!("aggregator.window_capacity must be positive");
        }

        let prod = &self.producer;
        if prod.sensor_interval.as_millis() == 0 {
            bail!("producer.sensor_interval must be at least 1ms");
        }
        if prod.uptime_interval.as_millis() == 0 {
            bail!("producer.uptime_interval must be at least 1ms");
        }
        if prod.sensor_queue_depth == 0 {
            bail!("producer.sensor_queue_depth must be positive");
        }
        if prod.uptime_queue_depth == 0 {
            bail!("producer.uptime_queue_depth must be positive");
        }

        for (name, nice) in [
            ("aggregator", self.priorities.aggregator),
            ("producer", self.priorities.producer),
            ("load_generator", self.priorities.load_generator),
        ] {
            if !(MIN_NICE..=MAX_NICE).contains(&nice) {
                bail!("priorities.{name} must be within {MIN_NICE}..={MAX_NICE}, got {nice}");
            }
        }

        if self.load.enabled {
            if self.load.interval_min > self.load.interval_max {
                bail!(
                    "load.interval_min {:?} must not exceed load.interval_max {:?}",
                    self.load.interval_min,
                    self.load.interval_max
                );
            }
            if self.load.burst_min > self.load.burst_max {
                bail!(
                    "load.burst_min {:?} must not exceed load.burst_max {:?}",
                    self.load.burst_min,
                    self.load.burst_max
                );
            }
            if self.load.spin_batch == 0 {
                bail!("load.spin_batch must be positive");
            }
        }

        if self.status_interval.is_zero() {
            bail!("status_interval must be positive");
        }

        if self.health.enabled && self.health.addr.is_empty() {
            bail!("health.addr is required when enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.aggregator.frame_interval, Duration::from_millis(200));
        assert_eq!(cfg.aggregator.deadline_tolerance, Duration::from_millis(10));
        assert_eq!(cfg.aggregator.average_window, Duration::from_millis(200));
        assert_eq!(cfg.aggregator.window_capacity, 20);
        assert_eq!(cfg.producer.sensor_interval, Duration::from_millis(50));
        assert_eq!(cfg.producer.uptime_interval, Duration::from_secs(1));
        assert_eq!(cfg.producer.sensor_queue_depth, 10);
        assert_eq!(cfg.producer.uptime_queue_depth, 2);
        assert_eq!(cfg.status_interval, Duration::from_secs(10));
        assert_eq!(cfg.sink.format, FrameFormat::Text);
        assert!(!cfg.health.enabled);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn test_derived_timeouts() {
        let cfg = Config::default();
        assert_eq!(cfg.sensor_timeout(), Duration::from_millis(60));
        assert_eq!(cfg.uptime_timeout(), Duration::from_millis(2010));
        assert_eq!(cfg.trigger_queue_depth(), 12);
    }

    #[test]
    fn test_priorities_order_aggregator_first() {
        let cfg = Config::default();
        assert!(cfg.priorities.aggregator < cfg.priorities.producer);
        assert!(cfg.priorities.producer < cfg.priorities.load_generator);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
aggregator:
  frame_interval: 100ms
producer:
  sensor_queue_depth: 4
  seed: 42
load:
  enabled: false
sink:
  format: json
status_interval: 5s
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cfg.aggregator.frame_interval, Duration::from_millis(100));
        assert_eq!(cfg.aggregator.window_capacity, 20);
        assert_eq!(cfg.producer.sensor_queue_depth, 4);
        assert_eq!(cfg.producer.uptime_queue_depth, 2);
        assert_eq!(cfg.producer.seed, Some(42));
        assert!(!cfg.load.enabled);
        assert_eq!(cfg.sink.format, FrameFormat::Json);
        assert_eq!(cfg.status_interval, Duration::from_secs(5));
        cfg.validate().expect("valid");
    }

    #[test]
    fn test_parse_empty_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.priorities.load_generator, 15);
        assert!(cfg.load.enabled);
    }

    #[test]
    fn test_parse_rejects_unknown_format() {
        let result: Result<Config, _> = serde_yaml::from_str("sink:\n  format: xml\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_zero_frame_interval() {
        let mut cfg = Config::default();
        cfg.aggregator.frame_interval = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("aggregator.frame_interval"));
    }

    #[test]
    fn test_validation_sub_millisecond_sensor_interval() {
        let mut cfg = Config::default();
        cfg.producer.sensor_interval = Duration::from_micros(300);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("producer.sensor_interval"));
    }

    #[test]
    fn test_validation_zero_queue_depth() {
        let mut cfg = Config::default();
        cfg.producer.uptime_queue_depth = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("producer.uptime_queue_depth"));
    }

    #[test]
    fn test_validation_zero_window_capacity() {
        let mut cfg = Config::default();
        cfg.aggregator.window_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("aggregator.window_capacity"));
    }

    #[test]
    fn test_validation_priority_out_of_range() {
        let mut cfg = Config::default();
        cfg.priorities.producer = 25;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("priorities.producer"));
    }

    #[test]
    fn test_validation_inverted_load_ranges() {
        let mut cfg = Config::default();
        cfg.load.burst_min = Duration::from_millis(300);
        cfg.load.burst_max = Duration::from_millis(100);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("load.burst_min"));

        let mut cfg = Config::default();
        cfg.load.interval_min = Duration::from_secs(5);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("load.interval_min"));
    }

    #[test]
    fn test_validation_inverted_load_ranges_ignored_when_disabled() {
        let mut cfg = Config::default();
        cfg.load.enabled = false;
        cfg.load.burst_min = Duration::from_millis(300);
        cfg.load.burst_max = Duration::from_millis(100);
        cfg.validate().expect("disabled load is not validated");
    }

    #[test]
    fn test_validation_health_addr_required() {
        let mut cfg = Config::default();
        cfg.health.enabled = true;
        cfg.health.addr = String::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("health.addr"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/telemetryd.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }
}
