//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责离线队列和程序生命周期，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 离线队列处理器
//! - 校验并缓存回答，队列持久化到本地键值存储
//! - 在线时分块提交，离线时保留，网络恢复后自动重试
//!
//! ### `app` - 应用入口
//! - 组装基础设施和各个服务
//! - 批量加载回答文件并入队
//! - 输出每道题的指标和全局统计
//!
//! ## 层次关系
//!
//! ```text
//! app (处理 Vec<ResponseFile>)
//!     ↓
//! batch_processor (处理 Vec<QueueEntry>)
//!     ↓
//! services (能力层：validation / retry / response / guess / metrics / report)
//!     ↓
//! infrastructure (基础设施：TransactionalStore / KeyValueStore / Connectivity)
//! ```

pub mod app;
pub mod batch_processor;

// 重新导出主要类型
pub use app::App;
pub use batch_processor::{BatchProcessor, FailedEntry, ProcessOutcome, QueueOptions};
