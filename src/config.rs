use crate::error::ConfigError;
use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    // --- 本地队列 ---
    /// 队列最多保留的回答数
    pub max_queue_size: usize,
    /// 队列项最长保留时间（小时）
    pub max_queue_age_hours: i64,
    /// 队列在本地存储中的键
    pub queue_storage_key: String,
    // --- 提交 ---
    /// 每个原子批次包含的回答数
    pub batch_size: usize,
    // --- 重试 ---
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    // --- 指标 ---
    /// 热力图边长
    pub metrics_grid_size: usize,
    /// 判定一次移动方向的最小位移
    pub metrics_move_threshold: f64,
    /// 热力图 Y 轴是否翻转（第 0 行为顶部）
    pub metrics_invert_grid_y: bool,
    // --- 错误上报 ---
    pub max_error_reports: usize,
    pub error_storage_key: String,
    // --- 运行 ---
    /// 本地键值存储目录
    pub storage_dir: String,
    /// 待导入回答文件目录
    pub input_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_queue_age_hours: 24 * 7,
            queue_storage_key: "pending_responses".to_string(),
            batch_size: 250,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            retry_backoff_multiplier: 2.0,
            metrics_grid_size: 10,
            metrics_move_threshold: 0.1,
            metrics_invert_grid_y: true,
            max_error_reports: 50,
            error_storage_key: "error_reports".to_string(),
            storage_dir: ".response_storage".to_string(),
            input_folder: "pending_responses".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_queue_size: env_parse("MAX_QUEUE_SIZE").unwrap_or(default.max_queue_size),
            max_queue_age_hours: env_parse("MAX_QUEUE_AGE_HOURS").unwrap_or(default.max_queue_age_hours),
            queue_storage_key: std::env::var("QUEUE_STORAGE_KEY").unwrap_or(default.queue_storage_key),
            batch_size: env_parse("BATCH_SIZE").unwrap_or(default.batch_size),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS").unwrap_or(default.retry_max_attempts),
            retry_initial_delay_ms: env_parse("RETRY_INITIAL_DELAY_MS").unwrap_or(default.retry_initial_delay_ms),
            retry_max_delay_ms: env_parse("RETRY_MAX_DELAY_MS").unwrap_or(default.retry_max_delay_ms),
            retry_backoff_multiplier: env_parse("RETRY_BACKOFF_MULTIPLIER").unwrap_or(default.retry_backoff_multiplier),
            metrics_grid_size: env_parse("METRICS_GRID_SIZE").unwrap_or(default.metrics_grid_size),
            metrics_move_threshold: env_parse("METRICS_MOVE_THRESHOLD").unwrap_or(default.metrics_move_threshold),
            metrics_invert_grid_y: env_parse("METRICS_INVERT_GRID_Y").unwrap_or(default.metrics_invert_grid_y),
            max_error_reports: env_parse("MAX_ERROR_REPORTS").unwrap_or(default.max_error_reports),
            error_storage_key: std::env::var("ERROR_STORAGE_KEY").unwrap_or(default.error_storage_key),
            storage_dir: std::env::var("STORAGE_DIR").unwrap_or(default.storage_dir),
            input_folder: std::env::var("INPUT_FOLDER").unwrap_or(default.input_folder),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        }
    }

    /// 检查配置项之间的约束
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(invalid("MAX_QUEUE_SIZE", self.max_queue_size, "大于 0 的整数"));
        }
        if self.batch_size == 0 {
            return Err(invalid("BATCH_SIZE", self.batch_size, "大于 0 的整数"));
        }
        if self.retry_max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", self.retry_max_attempts, "大于 0 的整数"));
        }
        if !(self.retry_backoff_multiplier >= 1.0) {
            return Err(invalid(
                "RETRY_BACKOFF_MULTIPLIER",
                self.retry_backoff_multiplier,
                "不小于 1.0 的数",
            ));
        }
        if self.metrics_grid_size == 0 {
            return Err(invalid("METRICS_GRID_SIZE", self.metrics_grid_size, "大于 0 的整数"));
        }
        if !(0.0..=1.0).contains(&self.metrics_move_threshold) {
            return Err(invalid(
                "METRICS_MOVE_THRESHOLD",
                self.metrics_move_threshold,
                "[0, 1] 之间的数",
            ));
        }
        Ok(())
    }

    pub fn max_queue_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_queue_age_hours)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn invalid(name: &str, value: impl ToString, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_attempts_and_shrinking_backoff() {
        let config = Config {
            retry_max_attempts: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "RETRY_MAX_ATTEMPTS"
        ));

        let config = Config {
            retry_backoff_multiplier: 0.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
