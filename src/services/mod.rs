//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，依赖通过 `Arc` 注入

pub mod error_reporter;
pub mod guess_service;
pub mod metrics_calculator;
pub mod response_service;
pub mod retry_policy;
pub mod validation_service;

pub use error_reporter::ErrorReporter;
pub use guess_service::{calculate_accuracy, GuessService};
pub use metrics_calculator::{MetricsCalculator, MetricsOptions};
pub use response_service::{MetricsWatcher, ResponseService};
pub use retry_policy::{RetryOptions, RetryPolicy};
pub use validation_service::ValidationService;
