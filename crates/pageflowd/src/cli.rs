//! CLI argument parsing for the pageflow producer.

use clap::{Parser, ValueEnum};
use pageflow_producer::{BatchMode, BatcherConfig, Dispatcher, GeneratorMode, PipelineConfig, PlacementMode};
use std::time::Duration;

/// pageflow - synthetic page-view load producer
///
/// Generates a tunable stream of page-view events and delivers it to a
/// partitioned log broker with batching, partition selection, backoff retry
/// and per-message acknowledgement.
#[derive(Parser, Debug)]
#[command(name = "pageflowd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    // ============ Observability ============
    /// HTTP port for pull metrics
    #[arg(long, default_value = "8090", env = "PAGEFLOW_METRICS_PORT")]
    pub metrics_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    // ============ Broker ============
    /// Broker bootstrap endpoint
    #[arg(long, default_value = "localhost:9092", env = "PAGEFLOW_BROKER_ADDR")]
    pub broker_addr: String,

    /// Target topic
    #[arg(long, default_value = "events", env = "PAGEFLOW_BROKER_TOPIC")]
    pub broker_topic: String,

    /// Number of partitions to produce into
    #[arg(long, default_value = "5", env = "PAGEFLOW_PARTITION_COUNT")]
    pub partition_count: usize,

    /// Partition placement policy
    #[arg(long, default_value = "round_robin", env = "PAGEFLOW_PARTITION_MODE")]
    pub partition_mode: PlacementModeArg,

    // ============ Publisher ============
    /// Concurrent write workers
    #[arg(long, default_value = "8", env = "PAGEFLOW_PUBLISHER_WORKERS")]
    pub publisher_workers: usize,

    /// Async submit queue capacity
    #[arg(long, default_value = "4096", env = "PAGEFLOW_PUBLISHER_BUFFER")]
    pub publisher_buffer: usize,

    // ============ Batching ============
    /// Flush trigger per partition
    #[arg(long, default_value = "time", env = "PAGEFLOW_BATCHER_MODE")]
    pub batcher_mode: BatchModeArg,

    /// Size trigger per partition
    #[arg(long, default_value = "300", env = "PAGEFLOW_BATCHER_FLUSH_SIZE")]
    pub batcher_flush_size: usize,

    /// Time trigger per partition, in milliseconds
    #[arg(long, default_value = "2000", env = "PAGEFLOW_BATCHER_FLUSH_PERIOD_MS")]
    pub batcher_flush_period_ms: u64,

    // ============ Generator ============
    /// Load profile
    #[arg(long, default_value = "regular", env = "PAGEFLOW_GENERATOR_MODE")]
    pub generator_mode: GeneratorModeArg,

    /// Upper bound for view_duration, in milliseconds
    #[arg(long, default_value = "30000", env = "PAGEFLOW_GENERATOR_DURATION_MAX")]
    pub generator_duration_max: i32,

    /// Bounce probability for views of at least five seconds
    #[arg(long, default_value = "0.3", env = "PAGEFLOW_GENERATOR_BOUNCE_RATE")]
    pub generator_bounce_rate: f32,

    /// Probability of injecting a defective event
    #[arg(long, default_value = "0.05", env = "PAGEFLOW_GENERATOR_INVALID_RATE")]
    pub generator_invalid_rate: f32,

    // ============ Retry ============
    /// Write attempts before giving a batch up
    #[arg(long, default_value = "5", env = "PAGEFLOW_DISPATCHER_ATTEMPTS")]
    pub dispatcher_attempts: u32,

    /// First attempt's timeout, in milliseconds
    #[arg(long, default_value = "1000", env = "PAGEFLOW_DISPATCHER_INITIAL_TIMEOUT_MS")]
    pub dispatcher_initial_timeout_ms: u64,

    /// Growth factor of the per-attempt timeout
    #[arg(long, default_value = "1.2", env = "PAGEFLOW_DISPATCHER_MULTIPLIER")]
    pub dispatcher_multiplier: f64,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum PlacementModeArg {
    #[value(name = "round_robin")]
    RoundRobin,
    #[value(name = "random")]
    Random,
    #[value(name = "key")]
    Key,
}

impl From<PlacementModeArg> for PlacementMode {
    fn from(arg: PlacementModeArg) -> Self {
        match arg {
            PlacementModeArg::RoundRobin => PlacementMode::RoundRobin,
            PlacementModeArg::Random => PlacementMode::Random,
            PlacementModeArg::Key => PlacementMode::Key,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BatchModeArg {
    #[value(name = "size")]
    Size,
    #[value(name = "time")]
    Time,
    #[value(name = "hybrid")]
    Hybrid,
}

impl From<BatchModeArg> for BatchMode {
    fn from(arg: BatchModeArg) -> Self {
        match arg {
            BatchModeArg::Size => BatchMode::Size,
            BatchModeArg::Time => BatchMode::Time,
            BatchModeArg::Hybrid => BatchMode::Hybrid,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum GeneratorModeArg {
    #[value(name = "regular")]
    Regular,
    #[value(name = "peak")]
    Peak,
    #[value(name = "night")]
    Night,
}

impl From<GeneratorModeArg> for GeneratorMode {
    fn from(arg: GeneratorModeArg) -> Self {
        match arg {
            GeneratorModeArg::Regular => GeneratorMode::Regular,
            GeneratorModeArg::Peak => GeneratorMode::Peak,
            GeneratorModeArg::Night => GeneratorMode::Night,
        }
    }
}

impl Cli {
    /// Reject configurations the pipeline cannot run with. Fatal at
    /// bootstrap.
    pub fn validate(&self) -> Result<(), String> {
        if self.partition_count == 0 {
            return Err("partition-count must be at least 1".to_string());
        }
        if self.publisher_workers == 0 {
            return Err("publisher-workers must be at least 1".to_string());
        }
        if self.publisher_buffer == 0 {
            return Err("publisher-buffer must be at least 1".to_string());
        }
        if self.batcher_flush_size == 0 {
            return Err("batcher-flush-size must be at least 1".to_string());
        }
        if self.batcher_flush_period_ms == 0 {
            return Err("batcher-flush-period-ms must be positive".to_string());
        }
        if self.generator_duration_max < 1 {
            return Err("generator-duration-max must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.generator_bounce_rate) {
            return Err("generator-bounce-rate must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.generator_invalid_rate) {
            return Err("generator-invalid-rate must be within [0, 1]".to_string());
        }
        if self.dispatcher_attempts == 0 {
            return Err("dispatcher-attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            publisher_workers: self.publisher_workers,
            publisher_buffer: self.publisher_buffer,
            placement: self.partition_mode.into(),
            batch: BatcherConfig {
                mode: self.batcher_mode.into(),
                flush_size: self.batcher_flush_size,
                flush_period: Duration::from_millis(self.batcher_flush_period_ms),
            },
            dispatcher: Dispatcher::new()
                .with_attempts(self.dispatcher_attempts)
                .with_initial_timeout(Duration::from_millis(self.dispatcher_initial_timeout_ms))
                .with_multiplier(self.dispatcher_multiplier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Cli {
        Cli::parse_from(["pageflowd"])
    }

    #[test]
    fn defaults_match_the_shipped_configuration() {
        let cli = defaults();
        assert_eq!(cli.metrics_port, 8090);
        assert_eq!(cli.publisher_workers, 8);
        assert_eq!(cli.publisher_buffer, 4096);
        assert_eq!(cli.broker_addr, "localhost:9092");
        assert_eq!(cli.broker_topic, "events");
        assert_eq!(cli.partition_count, 5);
        assert_eq!(cli.batcher_flush_size, 300);
        assert_eq!(cli.batcher_flush_period_ms, 2000);
        assert_eq!(cli.generator_duration_max, 30_000);
        assert_eq!(cli.generator_bounce_rate, 0.3);
        assert_eq!(cli.generator_invalid_rate, 0.05);
        assert_eq!(cli.dispatcher_attempts, 5);
        assert_eq!(cli.dispatcher_initial_timeout_ms, 1000);
        assert_eq!(cli.dispatcher_multiplier, 1.2);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut cli = defaults();
        cli.partition_count = 0;
        assert!(cli.validate().is_err());

        let mut cli = defaults();
        cli.generator_invalid_rate = 1.5;
        assert!(cli.validate().is_err());

        let mut cli = defaults();
        cli.dispatcher_attempts = 0;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn mode_names_parse() {
        let cli = Cli::parse_from([
            "pageflowd",
            "--partition-mode",
            "key",
            "--batcher-mode",
            "hybrid",
            "--generator-mode",
            "peak",
        ]);
        assert!(matches!(cli.partition_mode, PlacementModeArg::Key));
        assert!(matches!(cli.batcher_mode, BatchModeArg::Hybrid));
        assert!(matches!(cli.generator_mode, GeneratorModeArg::Peak));
    }
}
