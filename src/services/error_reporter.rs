//! 错误上报 - 业务能力层
//!
//! 把各服务的失败记录成结构化报告，写入本地键值存储，供之后排查。
//! 上报本身绝不失败：存储出问题只打 warn 日志。

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::infrastructure::{Connectivity, KeyValueStore};
use crate::models::error_report::{ErrorReport, ErrorType};

pub struct ErrorReporter {
    storage: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn Connectivity>,
    storage_key: String,
    max_reports: usize,
    /// 读-改-写持久化列表时串行化
    write_lock: Mutex<()>,
}

impl ErrorReporter {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        connectivity: Arc<dyn Connectivity>,
        storage_key: impl Into<String>,
        max_reports: usize,
    ) -> Self {
        Self {
            storage,
            connectivity,
            storage_key: storage_key.into(),
            max_reports: max_reports.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// 记录一条错误
    pub fn report_error(&self, error: &AppError, error_type: ErrorType, context: JsonValue) {
        let report = ErrorReport {
            timestamp: Utc::now(),
            error_type,
            code: error.code().to_string(),
            message: error.to_string(),
            context: self.with_device_context(context),
        };
        debug!("📝 记录错误 [{}] {}: {}", report.error_type, report.code, report.message);

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reports = self.load();
        reports.insert(0, report);
        reports.truncate(self.max_reports);
        self.persist(&reports);
    }

    /// 已保存的报告，最新的在前
    pub fn reports(&self) -> Vec<ErrorReport> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load()
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.storage.remove(&self.storage_key) {
            warn!("⚠️ 清空错误报告失败: {}", e);
        }
    }

    fn with_device_context(&self, context: JsonValue) -> JsonValue {
        let mut merged = match context {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("detail".to_string(), other);
                map
            }
        };
        merged.insert(
            "device".to_string(),
            json!({
                "online": self.connectivity.is_online(),
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
        JsonValue::Object(merged)
    }

    fn load(&self) -> Vec<ErrorReport> {
        let raw = match self.storage.get(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("⚠️ 读取错误报告失败: {}", e);
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("⚠️ 错误报告已损坏，重新开始记录: {}", e);
            Vec::new()
        })
    }

    fn persist(&self, reports: &[ErrorReport]) {
        let payload = match serde_json::to_string(reports) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("⚠️ 序列化错误报告失败: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.storage_key, &payload) {
            warn!("⚠️ 保存错误报告失败: {}", e);
        }
    }
}
