use clap::{Parser, ValueEnum};
use lib_stream::{BackpressureStrategy, ErrorHandlingFlag};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which provider endpoint to consume.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EndpointKind {
    Observable,
    Flowable,
    Single,
    Maybe,
    Calibrate,
    Backpressure,
    ErrorHandling,
}

/// Client-side reaction to an upstream failure.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PolicyKind {
    Propagate,
    Substitute,
    Resume,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Sensor event stream consumer", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "STREAM_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STREAM_PROVIDER_URL", help = "Base URL of the sensor provider, e.g. http://localhost:8080/api.")]
    pub provider_url: Option<String>,

    #[clap(long, env = "STREAM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STREAM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STREAM_ENDPOINT", value_enum, help = "Endpoint to consume.")]
    pub endpoint: Option<EndpointKind>,

    #[clap(long, env = "STREAM_STRATEGY", help = "Backpressure strategy (BUFFER, DROP, LATEST, ERROR, MISSING).")]
    pub strategy: Option<BackpressureStrategy>,

    #[clap(long, env = "STREAM_FAST_PRODUCER", help = "Ask the provider for its fast producer (backpressure endpoint).")]
    pub fast_producer: Option<bool>,

    #[clap(long, env = "STREAM_DATA_SIZE", help = "Number of records the provider should emit (backpressure endpoint).")]
    pub data_size: Option<u32>,

    #[clap(long, env = "STREAM_ERROR_FLAG", help = "Provider-side error flag (onErrorReturn, doOnError, onErrorResumeNext).")]
    pub error_flag: Option<ErrorHandlingFlag>,

    #[clap(long, env = "STREAM_MAYBE_FLAG", help = "Whether the maybe endpoint should return a record.")]
    pub maybe_flag: Option<bool>,

    #[clap(long, env = "STREAM_POLICY", value_enum, help = "Client-side error policy.")]
    pub policy: Option<PolicyKind>,

    #[clap(long, env = "STREAM_DELAY_MS", help = "Processing delay per record in milliseconds.")]
    pub delay_ms: Option<u64>,

    #[clap(long, env = "STREAM_SUBSCRIBERS", help = "Number of local subscribers sharing the stream.")]
    pub subscribers: Option<usize>,

    #[clap(long, env = "STREAM_TAKE", help = "Stop each subscriber after this many records.")]
    pub take: Option<usize>,

    #[clap(long, env = "STREAM_CAPACITY", help = "Demand window per subscriber for bounded strategies.")]
    pub capacity: Option<usize>,

    #[clap(long, env = "STREAM_MAX_RETRIES", help = "Retries for transient connection failures.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "STREAM_CONNECT_TIMEOUT_MS", help = "Connect timeout in milliseconds.")]
    pub connect_timeout_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            provider_url: other.provider_url.or(self.provider_url),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            endpoint: other.endpoint.or(self.endpoint),
            strategy: other.strategy.or(self.strategy),
            fast_producer: other.fast_producer.or(self.fast_producer),
            data_size: other.data_size.or(self.data_size),
            error_flag: other.error_flag.or(self.error_flag),
            maybe_flag: other.maybe_flag.or(self.maybe_flag),
            policy: other.policy.or(self.policy),
            delay_ms: other.delay_ms.or(self.delay_ms),
            subscribers: other.subscribers.or(self.subscribers),
            take: other.take.or(self.take),
            capacity: other.capacity.or(self.capacity),
            max_retries: other.max_retries.or(self.max_retries),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            provider_url: Some("http://localhost:8080/api".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            endpoint: Some(EndpointKind::Flowable),
            strategy: Some(BackpressureStrategy::Buffer),
            fast_producer: Some(false),
            data_size: Some(10),
            error_flag: Some(ErrorHandlingFlag::DoOnError),
            maybe_flag: Some(true),
            policy: Some(PolicyKind::Propagate),
            delay_ms: Some(0),
            subscribers: Some(1),
            capacity: Some(1),
            max_retries: Some(0),
            connect_timeout_ms: Some(10_000),
            ..Default::default()
        }
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let Ok(config_str) = fs::read_to_string(path) else {
        log::warn!("Failed to read config file: {}. Falling back to other sources.", path.display());
        return None;
    };
    match serde_json::from_str::<Config>(&config_str) {
        Ok(file_config) => Some(file_config),
        Err(e) => {
            log::warn!("Failed to parse config file: {} ({}). Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, then the JSON file, then environment and CLI values.
pub fn load_config_from(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("stream_consumer.conf"));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli_args)
}

pub fn load_config() -> Config {
    // clap::Parser handles both env vars and CLI args.
    load_config_from(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_every_runtime_field() {
        let config = load_config_from(Config {
            config_path: Some(PathBuf::from("/nonexistent/stream_consumer.conf")),
            ..Default::default()
        });
        assert_eq!(config.provider_url.as_deref(), Some("http://localhost:8080/api"));
        assert_eq!(config.endpoint, Some(EndpointKind::Flowable));
        assert_eq!(config.strategy, Some(BackpressureStrategy::Buffer));
        assert_eq!(config.subscribers, Some(1));
        assert_eq!(config.take, None);
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"providerUrl":"http://sensors:9000/api","strategy":"DROP","delayMs":250,"endpoint":"errorHandling","errorFlag":"onErrorReturn"}}"#
        )
        .unwrap();

        let config = load_config_from(Config {
            config_path: Some(file.path().to_path_buf()),
            delay_ms: Some(5),
            ..Default::default()
        });
        assert_eq!(config.provider_url.as_deref(), Some("http://sensors:9000/api"));
        assert_eq!(config.strategy, Some(BackpressureStrategy::Drop));
        assert_eq!(config.endpoint, Some(EndpointKind::ErrorHandling));
        assert_eq!(config.error_flag, Some(ErrorHandlingFlag::OnErrorReturn));
        assert_eq!(config.delay_ms, Some(5));
        assert_eq!(config.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let config = load_config_from(Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(config.strategy, Some(BackpressureStrategy::Buffer));
    }

    #[test]
    fn cli_parses_strategy_and_policy() {
        let config = Config::parse_from([
            "stream_consumer",
            "--strategy",
            "latest",
            "--policy",
            "resume",
            "--endpoint",
            "backpressure",
            "--take",
            "5",
        ]);
        assert_eq!(config.strategy, Some(BackpressureStrategy::Latest));
        assert_eq!(config.policy, Some(PolicyKind::Resume));
        assert_eq!(config.endpoint, Some(EndpointKind::Backpressure));
        assert_eq!(config.take, Some(5));
    }
}
