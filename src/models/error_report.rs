use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 持久化的错误记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub code: String,
    pub message: String,
    pub context: JsonValue,
}

/// 错误来源分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Validation,
    Queue,
    Submission,
    Guess,
    Storage,
}

impl ErrorType {
    pub fn name(self) -> &'static str {
        match self {
            ErrorType::Validation => "validation",
            ErrorType::Queue => "queue",
            ErrorType::Submission => "submission",
            ErrorType::Guess => "guess",
            ErrorType::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
