//! 离线队列处理器 - 编排层
//!
//! ## 职责
//!
//! 1. **准入**：校验回答、检查队列上限，写入本地存储后才返回
//! 2. **持久化**：每次变更都把整个队列写回键值存储；空间不足时从最早的回答开始丢弃
//! 3. **提交**：在线时调用 `ResponseService` 分块提交，按 id 移除已提交的回答
//! 4. **恢复**：启动时读回上次的队列；网络恢复时自动重新提交
//!
//! ## 并发
//!
//! - 队列在 `tokio::sync::Mutex` 之后，提交期间不持锁，新回答可以继续入队
//! - 同一时刻只有一个 `process_queue` 在跑，重复调用直接返回空结果

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, BatchProcessingError, StorageError};
use crate::infrastructure::{Connectivity, KeyValueStore};
use crate::models::error_report::ErrorType;
use crate::models::queue::QueueEntry;
use crate::models::response::{Response, ResponseCandidate};
use crate::services::{ErrorReporter, ResponseService, ValidationService};

/// 队列参数
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_queue_size: usize,
    pub max_age: chrono::Duration,
    pub storage_key: String,
}

impl QueueOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            max_age: config.max_queue_age(),
            storage_key: config.queue_storage_key.clone(),
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 一次 `process_queue` 的结果
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// 已提交并移出队列的回答 id
    pub successful: Vec<String>,
    /// 仍留在队列中的回答
    pub failed: Vec<FailedEntry>,
}

#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub entry: QueueEntry,
    pub error: Arc<AppError>,
}

/// 离线队列处理器
pub struct BatchProcessor {
    options: QueueOptions,
    queue: Mutex<Vec<QueueEntry>>,
    processing: AtomicBool,
    validator: Arc<ValidationService>,
    responses: Arc<ResponseService>,
    storage: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn Connectivity>,
    reporter: Arc<ErrorReporter>,
}

/// 离开作用域时清除处理中标记
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BatchProcessor {
    /// 创建处理器并恢复上次保存的队列
    pub fn new(
        options: QueueOptions,
        validator: Arc<ValidationService>,
        responses: Arc<ResponseService>,
        storage: Arc<dyn KeyValueStore>,
        connectivity: Arc<dyn Connectivity>,
        reporter: Arc<ErrorReporter>,
    ) -> Arc<Self> {
        let restored = restore_queue(storage.as_ref(), &options.storage_key, &reporter);
        if !restored.is_empty() {
            info!("📂 恢复离线队列: {} 条待提交回答", restored.len());
        }

        Arc::new(Self {
            options,
            queue: Mutex::new(restored),
            processing: AtomicBool::new(false),
            validator,
            responses,
            storage,
            connectivity,
            reporter,
        })
    }

    /// 校验并加入队列，返回回答 id
    ///
    /// 在线时会在后台触发一次提交，提交结果不影响本次返回
    pub async fn queue_response(self: &Arc<Self>, candidate: &ResponseCandidate) -> AppResult<String> {
        let response = match self.validator.validate(candidate) {
            Ok(response) => response,
            Err(e) => {
                self.reporter.report_error(
                    &AppError::Batch(BatchProcessingError::ValidationFailed {
                        field: e.field.clone(),
                    }),
                    ErrorType::Validation,
                    json!({
                        "userId": candidate.user_id,
                        "questionId": candidate.question_id,
                        "message": e.message,
                    }),
                );
                return Err(e.into());
            }
        };
        let id = response.id.clone();

        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.options.max_queue_size {
                let e = AppError::Batch(BatchProcessingError::QueueFull {
                    max: self.options.max_queue_size,
                });
                self.reporter.report_error(
                    &e,
                    ErrorType::Queue,
                    json!({ "responseId": id, "queueLength": queue.len() }),
                );
                return Err(e);
            }

            queue.push(QueueEntry::new(response));
            if let Err(e) = self.persist(&mut queue) {
                // 没写进本地存储就不算入队
                if queue.last().is_some_and(|entry| entry.id() == id) {
                    queue.pop();
                }
                return Err(e);
            }
            debug!("📥 回答 {} 已入队 (队列长度 {})", id, queue.len());
        }

        if self.connectivity.is_online() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = this.process_queue().await;
                if !outcome.failed.is_empty() {
                    warn!("⚠️ 后台提交未完成: {} 条回答留在队列中", outcome.failed.len());
                }
            });
        }

        Ok(id)
    }

    /// 提交当前队列
    pub async fn process_queue(&self) -> ProcessOutcome {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("队列正在提交中，跳过本次调用");
            return ProcessOutcome::default();
        }
        let _guard = ProcessingGuard(&self.processing);

        if !self.connectivity.is_online() {
            let mut queue = self.queue.lock().await;
            self.persist_quietly(&mut queue);
            let error = Arc::new(AppError::Batch(BatchProcessingError::Offline));
            let failed = queue
                .iter()
                .map(|entry| FailedEntry {
                    entry: entry.clone(),
                    error: Arc::clone(&error),
                })
                .collect();
            return ProcessOutcome {
                successful: Vec::new(),
                failed,
            };
        }

        let snapshot: Vec<QueueEntry> = self.queue.lock().await.clone();
        if snapshot.is_empty() {
            return ProcessOutcome::default();
        }
        info!("🚀 开始提交离线队列: {} 条回答", snapshot.len());

        let responses: Vec<Response> = snapshot.iter().map(|e| e.response.clone()).collect();
        let (committed, failure) = match self.responses.submit_batch_responses(&responses).await {
            Ok(ids) => (ids, None),
            Err(e) => (e.committed, Some(Arc::new(e.source))),
        };

        let mut queue = self.queue.lock().await;
        let committed_ids: HashSet<&str> = committed.iter().map(String::as_str).collect();
        queue.retain(|entry| !committed_ids.contains(entry.id()));

        let mut failed = Vec::new();
        if let Some(error) = failure {
            let attempted: HashSet<&str> = snapshot
                .iter()
                .map(QueueEntry::id)
                .filter(|id| !committed_ids.contains(id))
                .collect();
            for entry in queue.iter_mut().filter(|e| attempted.contains(e.id())) {
                entry.retry_count += 1;
                failed.push(FailedEntry {
                    entry: entry.clone(),
                    error: Arc::clone(&error),
                });
            }
            warn!(
                "⚠️ 队列提交部分失败: 成功 {}, 失败 {} ({})",
                committed.len(),
                failed.len(),
                error
            );
        } else {
            info!("✅ 队列提交完成: {} 条回答", committed.len());
        }

        self.persist_quietly(&mut queue);

        ProcessOutcome {
            successful: committed,
            failed,
        }
    }

    /// 监听网络状态，恢复在线时自动提交
    ///
    /// 只持有弱引用，处理器被释放后任务自行结束
    pub fn spawn_online_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut online = self.connectivity.subscribe();

        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                if !*online.borrow_and_update() {
                    continue;
                }
                let Some(processor) = weak.upgrade() else {
                    break;
                };
                info!("🌐 网络已恢复，提交离线队列");
                let outcome = processor.process_queue().await;
                debug!(
                    "网络恢复后的提交: 成功 {}, 失败 {}",
                    outcome.successful.len(),
                    outcome.failed.len()
                );
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// 当前队列快照
    pub async fn entries(&self) -> Vec<QueueEntry> {
        self.queue.lock().await.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    fn evict_expired(&self, queue: &mut Vec<QueueEntry>) {
        let now = Utc::now();
        let before = queue.len();
        queue.retain(|entry| !entry.is_expired(now, self.options.max_age));
        let evicted = before - queue.len();
        if evicted > 0 {
            warn!("🗑️ 丢弃 {} 条超过保留时长的回答", evicted);
        }
    }

    /// 丢弃过期回答后写回本地存储；空间不足时从队首逐条丢弃，直到写得下
    fn persist(&self, queue: &mut Vec<QueueEntry>) -> AppResult<()> {
        self.evict_expired(queue);
        loop {
            let payload = serde_json::to_string(&*queue)?;
            match self.storage.set(&self.options.storage_key, &payload) {
                Ok(()) => return Ok(()),
                Err(StorageError::CapacityExceeded { bytes, .. }) => {
                    if queue.is_empty() {
                        let e = AppError::Batch(BatchProcessingError::StorageFull);
                        self.reporter
                            .report_error(&e, ErrorType::Storage, json!({ "bytes": bytes }));
                        return Err(e);
                    }
                    let evicted = queue.remove(0);
                    warn!("🗑️ 本地存储空间不足，丢弃最早的回答 {}", evicted.id());
                    self.reporter.report_error(
                        &AppError::Batch(BatchProcessingError::StorageFull),
                        ErrorType::Storage,
                        json!({
                            "evictedId": evicted.id(),
                            "bytes": bytes,
                            "remaining": queue.len(),
                        }),
                    );
                }
                Err(e) => {
                    let e = AppError::from(e);
                    self.reporter.report_error(&e, ErrorType::Storage, json!({}));
                    return Err(e);
                }
            }
        }
    }

    fn persist_quietly(&self, queue: &mut Vec<QueueEntry>) {
        if let Err(e) = self.persist(queue) {
            error!("❌ 保存离线队列失败: {}", e);
        }
    }
}

fn restore_queue(storage: &dyn KeyValueStore, key: &str, reporter: &ErrorReporter) -> Vec<QueueEntry> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("⚠️ 读取离线队列失败，从空队列开始: {}", e);
            reporter.report_error(&AppError::from(e), ErrorType::Storage, json!({ "key": key }));
            return Vec::new();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("⚠️ 离线队列数据已损坏，丢弃: {}", e);
            reporter.report_error(&AppError::from(e), ErrorType::Storage, json!({ "key": key }));
            if let Err(e) = storage.remove(key) {
                warn!("⚠️ 删除损坏的队列数据失败: {}", e);
            }
            Vec::new()
        }
    }
}
