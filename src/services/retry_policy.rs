//! 重试策略 - 业务能力层
//!
//! 指数退避重试，区分可重试 / 不可重试错误。
//! 只在两次尝试之间挂起；不内置取消，需要超时的调用方自行用
//! `tokio::time::timeout` 包一层。

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// 重试参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            initial_delay: config.retry_initial_delay(),
            max_delay: config.retry_max_delay(),
            backoff_multiplier: config.retry_backoff_multiplier,
        }
    }

    /// 第 `retry` 次重试前的等待时间（从 0 开始）
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// 重试执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// 执行操作，失败时按策略重试
    pub async fn run<T, F, Fut>(&self, operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.run_with_notify(operation, |_, _| {}).await
    }

    /// 同 `run`，每次等待前回调 `(失败的尝试序号, 等待时间)`
    pub async fn run_with_notify<T, F, Fut, N>(&self, mut operation: F, mut notify: N) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
        N: FnMut(u32, Duration),
    {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= max_attempts {
                return Err(AppError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.options.delay_for(attempt - 1);
            warn!(
                "⚠️ 第 {}/{} 次尝试失败: {}，{}ms 后重试",
                attempt,
                max_attempts,
                error,
                delay.as_millis()
            );
            notify(attempt, delay);
            sleep(delay).await;
        }
    }
}
