//! # Response Submit
//!
//! 回答采集管线：校验、离线排队、分块提交、聚合指标、猜测打分和错误上报
//!
//! ## 架构设计
//!
//! 本系统采用三层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `TransactionalStore` - 文档存储：点查、原子批量写、事务、变更订阅
//! - `KeyValueStore` - 本地键值存储，离线队列和错误报告都存在这里
//! - `Connectivity` - 在线状态信号
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `ValidationService` - 回答校验
//! - `RetryPolicy` - 指数退避重试
//! - `MetricsCalculator` - 单题指标聚合
//! - `ResponseService` - 回答与指标的事务提交
//! - `GuessService` - 猜测打分与揭晓
//! - `ErrorReporter` - 错误记录
//!
//! ### ③ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 离线队列，负责持久化和重新提交
//! - `orchestrator/app` - 程序入口，加载回答文件并输出统计
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, BatchSubmitError};
pub use infrastructure::{
    Connectivity, ConnectivityMonitor, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore,
    MemoryStore, TransactionalStore,
};
pub use models::{Guess, QuestionMetrics, Response, ResponseCandidate, ResponseValue};
pub use orchestrator::{App, BatchProcessor, ProcessOutcome};
pub use services::{
    ErrorReporter, GuessService, MetricsCalculator, ResponseService, RetryPolicy,
    ValidationService,
};
