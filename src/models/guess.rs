use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::response::{ResponseMetadata, ResponseValue};

/// 对其他用户回答的猜测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub id: String,
    pub user_id: String,
    pub target_user_id: String,
    pub question_id: String,
    pub value: ResponseValue,
    pub metadata: ResponseMetadata,
    pub timestamp: DateTime<Utc>,
    /// 只有在目标用户已作答后才会被打分
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<GuessAccuracy>,
}

/// 猜测得分
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuessAccuracy {
    /// 空间题：与真实答案的欧氏距离
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// 选择题：是否猜中
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    /// 归一化得分，范围 [0, 1]
    pub score: f64,
}

impl Guess {
    pub fn score(&self) -> Option<f64> {
        self.accuracy.map(|a| a.score)
    }
}
