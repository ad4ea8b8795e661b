use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::response::Response;

/// 待提交队列中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(flatten)]
    pub response: Response,
    /// 批量提交失败的次数
    #[serde(default)]
    pub retry_count: u32,
}

impl QueueEntry {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            retry_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.response.id
    }

    /// 是否已超过最大保留时长
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.response.timestamp > max_age
    }
}
