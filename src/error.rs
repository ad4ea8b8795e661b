use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 输入校验错误
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 本地队列错误
    #[error("队列错误: {0}")]
    Batch(#[from] BatchProcessingError),
    /// 文档存储错误
    #[error("文档存储错误: {0}")]
    Store(#[from] StoreError),
    /// 本地键值存储错误
    #[error("本地存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 业务逻辑错误
    #[error("业务错误: {0}")]
    Business(#[from] BusinessError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 重试次数耗尽
    #[error("重试耗尽: {attempts} attempts 均失败, 最后错误: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },
    /// JSON 序列化失败
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 校验错误，携带出错字段的路径（例如 `value.x`）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("字段 {field} 不合法: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 队列准入 / 离线相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchProcessingError {
    /// 队列已满
    #[error("队列已满 (上限: {max})")]
    QueueFull { max: usize },
    /// 当前离线
    #[error("当前处于离线状态")]
    Offline,
    /// 本地存储空间不足，已清空队列仍无法写入
    #[error("本地存储空间不足")]
    StorageFull,
    /// 入队前校验失败
    #[error("入队校验失败: 字段 {field}")]
    ValidationFailed { field: String },
}

impl BatchProcessingError {
    pub fn code(&self) -> &'static str {
        match self {
            BatchProcessingError::QueueFull { .. } => "QUEUE_FULL",
            BatchProcessingError::Offline => "OFFLINE",
            BatchProcessingError::StorageFull => "STORAGE_FULL",
            BatchProcessingError::ValidationFailed { .. } => "VALIDATION_FAILED",
        }
    }
}

/// 文档存储错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// 存储暂不可用（网络抖动等）
    #[error("存储不可用: {0}")]
    Unavailable(String),
    /// 事务冲突，存储自身重试后仍失败
    #[error("事务冲突 ({collection}/{key})")]
    Conflict { collection: String, key: String },
    /// 单次批量写入超过上限
    #[error("批量写入过大: {size} > {max}")]
    BatchTooLarge { size: usize, max: usize },
    /// 文档内容无法解析
    #[error("文档损坏 ({collection}/{key}): {message}")]
    Corrupted {
        collection: String,
        key: String,
        message: String,
    },
    /// 文档编码失败
    #[error("文档编码失败: {0}")]
    Encoding(String),
}

impl StoreError {
    /// 是否为瞬时错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict { .. })
    }
}

/// 本地键值存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 写入超出容量
    #[error("存储容量不足 (键: {key}, 大小: {bytes} 字节)")]
    CapacityExceeded { key: String, bytes: usize },
    /// 读写文件失败
    #[error("读写失败 (键: {key}): {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// 业务逻辑错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    /// 被猜测的用户还没有作答
    #[error("用户 {target_user_id} 尚未回答题目 {question_id}")]
    TargetNotResponded {
        target_user_id: String,
        question_id: String,
    },
    /// 不能猜自己的答案
    #[error("不能猜测自己的答案")]
    SelfGuess,
    /// 猜测记录不存在
    #[error("猜测记录不存在: {guess_id}")]
    GuessNotFound { guess_id: String },
    /// 猜测记录的目标用户不一致
    #[error("猜测 {guess_id} 的目标用户不是 {target_user_id}")]
    TargetMismatch {
        guess_id: String,
        target_user_id: String,
    },
    /// 猜测与答案类型不一致
    #[error("答案类型不一致: 猜测为 {guess}, 实际为 {actual}")]
    ValueTypeMismatch {
        guess: &'static str,
        actual: &'static str,
    },
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// 配置值不合法
    #[error("配置项 {name} 的值 '{value}' 不合法, 期望: {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: String,
    },
}

impl AppError {
    /// 是否值得重试
    ///
    /// 只有存储层的瞬时错误可以重试；重试耗尽后的包装错误不再重试
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 结构化错误码，用于错误上报
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Batch(e) => e.code(),
            AppError::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
            AppError::Store(StoreError::Conflict { .. }) => "STORE_CONFLICT",
            AppError::Store(StoreError::BatchTooLarge { .. }) => "BATCH_TOO_LARGE",
            AppError::Store(StoreError::Corrupted { .. }) => "DOCUMENT_CORRUPTED",
            AppError::Store(StoreError::Encoding(_)) => "ENCODING_FAILED",
            AppError::Storage(StorageError::CapacityExceeded { .. }) => "STORAGE_FULL",
            AppError::Storage(StorageError::Io { .. }) => "STORAGE_IO",
            AppError::Business(BusinessError::TargetNotResponded { .. }) => "TARGET_NOT_RESPONDED",
            AppError::Business(BusinessError::SelfGuess) => "SELF_GUESS",
            AppError::Business(BusinessError::GuessNotFound { .. }) => "GUESS_NOT_FOUND",
            AppError::Business(BusinessError::TargetMismatch { .. }) => "TARGET_MISMATCH",
            AppError::Business(BusinessError::ValueTypeMismatch { .. }) => "TYPE_MISMATCH",
            AppError::Config(_) => "CONFIG_INVALID",
            AppError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            AppError::Serialization(_) => "SERIALIZATION_FAILED",
        }
    }
}

/// 分块提交中途失败
///
/// 之前的分块已经持久化，`committed` 记录这些回答的 id，调用方按 id 做差集
#[derive(Debug, Error)]
#[error("批量提交中断 (已提交 {} 条): {}", .committed.len(), .source)]
pub struct BatchSubmitError {
    pub committed: Vec<String>,
    #[source]
    pub source: AppError,
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建校验错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(ValidationError::new(field, message))
    }

    /// 创建存储不可用错误
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        AppError::Store(StoreError::Unavailable(message.into()))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

/// 文档存储结果类型
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_store_errors_are_retryable() {
        assert!(AppError::store_unavailable("network").is_retryable());
        assert!(AppError::Store(StoreError::Conflict {
            collection: "questionMetrics".into(),
            key: "q1".into(),
        })
        .is_retryable());
        assert!(!AppError::validation("userId", "empty").is_retryable());
        assert!(!AppError::Business(BusinessError::SelfGuess).is_retryable());

        let exhausted = AppError::RetryExhausted {
            attempts: 3,
            source: Box::new(AppError::store_unavailable("network")),
        };
        assert!(!exhausted.is_retryable());
        assert!(exhausted.to_string().contains("3 attempts"));
    }

    #[test]
    fn batch_errors_expose_codes() {
        assert_eq!(
            AppError::from(BatchProcessingError::QueueFull { max: 10 }).code(),
            "QUEUE_FULL"
        );
        assert_eq!(AppError::from(BatchProcessingError::Offline).code(), "OFFLINE");
        assert_eq!(AppError::validation("value", "missing").code(), "VALIDATION_FAILED");
    }
}
