//! 回答提交 - 业务能力层
//!
//! 回答文档和所属题目的聚合指标在同一个事务里写入，二者不会出现一边有一边没有。
//! 批量提交按块切分，块内原子，块之间不保证。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, BatchSubmitError, StoreError, StoreResult};
use crate::infrastructure::{DocRef, DocumentChange, TransactionalStore, WriteOp};
use crate::models::error_report::ErrorType;
use crate::models::metrics::QuestionMetrics;
use crate::models::response::Response;
use crate::services::error_reporter::ErrorReporter;
use crate::services::metrics_calculator::MetricsCalculator;
use crate::services::retry_policy::RetryPolicy;

// ========== 集合名 ==========

pub const RESPONSES: &str = "responses";
pub const QUESTION_METRICS: &str = "questionMetrics";
pub const GUESSES: &str = "guesses";
pub const USERS: &str = "users";

/// 回答文档键：每个用户每道题一份，重复作答覆盖旧值
pub fn response_key(user_id: &str, question_id: &str) -> String {
    format!("{}_{}", user_id, question_id)
}

pub fn response_doc(user_id: &str, question_id: &str) -> DocRef {
    DocRef::new(RESPONSES, response_key(user_id, question_id))
}

pub fn metrics_doc(question_id: &str) -> DocRef {
    DocRef::new(QUESTION_METRICS, question_id)
}

pub fn user_doc(user_id: &str) -> DocRef {
    DocRef::new(USERS, user_id)
}

// ========== 文档编解码 ==========

pub(crate) fn encode_doc<T: Serialize>(value: &T) -> StoreResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| StoreError::Encoding(e.to_string()))
}

pub(crate) fn decode_doc<T: DeserializeOwned>(doc: &DocRef, value: JsonValue) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupted {
        collection: doc.collection.clone(),
        key: doc.key.clone(),
        message: e.to_string(),
    })
}

/// 读出已有指标，没有则新建
pub(crate) fn metrics_or_empty(
    doc: &DocRef,
    question_id: &str,
    existing: Option<&JsonValue>,
) -> StoreResult<QuestionMetrics> {
    match existing {
        Some(value) => decode_doc(doc, value.clone()),
        None => Ok(QuestionMetrics::empty(question_id)),
    }
}

/// 回答提交服务
pub struct ResponseService {
    store: Arc<dyn TransactionalStore>,
    calculator: Arc<MetricsCalculator>,
    retry: RetryPolicy,
    reporter: Arc<ErrorReporter>,
    batch_size: usize,
}

impl ResponseService {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        calculator: Arc<MetricsCalculator>,
        retry: RetryPolicy,
        reporter: Arc<ErrorReporter>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            calculator,
            retry,
            reporter,
            batch_size: batch_size.max(1),
        }
    }

    /// 提交单条回答，返回回答 id
    pub async fn submit_response(&self, response: &Response) -> AppResult<String> {
        let chunk = std::slice::from_ref(response);
        if let Err(e) = self.retry.run(|| self.commit_chunk(chunk)).await {
            self.reporter.report_error(
                &e,
                ErrorType::Submission,
                json!({
                    "responseId": response.id,
                    "userId": response.user_id,
                    "questionId": response.question_id,
                }),
            );
            return Err(e);
        }

        debug!("✓ 回答 {} 已提交 (题目 {})", response.id, response.question_id);
        self.bump_response_counts(chunk).await;
        Ok(response.id.clone())
    }

    /// 分块批量提交，返回已提交的回答 id（保持输入顺序）
    ///
    /// 某一块失败时立即停止，`BatchSubmitError::committed` 给出之前已持久化的 id
    pub async fn submit_batch_responses(
        &self,
        responses: &[Response],
    ) -> Result<Vec<String>, BatchSubmitError> {
        let chunk_size = self.chunk_size();
        let total_chunks = responses.len().div_ceil(chunk_size);
        let mut committed = Vec::with_capacity(responses.len());

        for (index, chunk) in responses.chunks(chunk_size).enumerate() {
            debug!("📦 提交第 {}/{} 块 ({} 条)", index + 1, total_chunks, chunk.len());

            if let Err(source) = self.retry.run(|| self.commit_chunk(chunk)).await {
                warn!(
                    "❌ 第 {}/{} 块提交失败，已提交 {} 条: {}",
                    index + 1,
                    total_chunks,
                    committed.len(),
                    source
                );
                self.reporter.report_error(
                    &source,
                    ErrorType::Submission,
                    json!({
                        "chunk": index,
                        "chunkSize": chunk.len(),
                        "committed": committed.len(),
                        "total": responses.len(),
                    }),
                );
                return Err(BatchSubmitError { committed, source });
            }

            committed.extend(chunk.iter().map(|r| r.id.clone()));
            self.bump_response_counts(chunk).await;
        }

        if !responses.is_empty() {
            info!("✅ 批量提交完成: {} 条回答, {} 块", committed.len(), total_chunks);
        }
        Ok(committed)
    }

    /// 读取某个用户对某道题的回答
    pub async fn get_response(&self, user_id: &str, question_id: &str) -> AppResult<Option<Response>> {
        self.fetch(&response_doc(user_id, question_id)).await
    }

    /// 读取题目的聚合指标
    pub async fn get_question_metrics(&self, question_id: &str) -> AppResult<Option<QuestionMetrics>> {
        self.fetch(&metrics_doc(question_id)).await
    }

    /// 订阅题目指标的后续变化
    pub fn watch_question_metrics(&self, question_id: &str) -> MetricsWatcher {
        MetricsWatcher {
            doc: metrics_doc(question_id),
            changes: self.store.watch(),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, doc: &DocRef) -> AppResult<Option<T>> {
        let raw = self
            .retry
            .run(|| async { self.store.get(doc).await.map_err(AppError::from) })
            .await?;
        match raw {
            Some(value) => Ok(Some(decode_doc(doc, value)?)),
            None => Ok(None),
        }
    }

    /// 单块事务：写入回答，并把它们计入各自题目的指标
    async fn commit_chunk(&self, chunk: &[Response]) -> AppResult<()> {
        let mut question_ids: Vec<&str> = chunk.iter().map(|r| r.question_id.as_str()).collect();
        question_ids.sort_unstable();
        question_ids.dedup();
        let reads: Vec<DocRef> = question_ids.iter().map(|q| metrics_doc(q)).collect();
        let now = Utc::now();

        let apply = |existing: &[Option<JsonValue>]| -> StoreResult<Vec<WriteOp>> {
            let mut metrics = Vec::with_capacity(reads.len());
            for ((doc, question_id), current) in reads.iter().zip(&question_ids).zip(existing) {
                metrics.push(metrics_or_empty(doc, question_id, current.as_ref())?);
            }

            let mut ops = Vec::with_capacity(chunk.len() + metrics.len());
            for response in chunk {
                let slot = question_ids
                    .binary_search(&response.question_id.as_str())
                    .map_err(|_| StoreError::Encoding(format!("未知题目 {}", response.question_id)))?;
                self.calculator.apply_response(&mut metrics[slot], response, now);
                ops.push(WriteOp::set(
                    response_doc(&response.user_id, &response.question_id),
                    encode_doc(response)?,
                ));
            }
            for (doc, updated) in reads.iter().zip(&metrics) {
                ops.push(WriteOp::set(doc.clone(), encode_doc(updated)?));
            }
            Ok(ops)
        };

        self.store.transaction(&reads, &apply).await?;
        Ok(())
    }

    /// 回答 + 指标各占一个写操作，块大小不能让事务超过存储的批量上限
    fn chunk_size(&self) -> usize {
        let store_limit = (self.store.max_batch_size() / 2).max(1);
        self.batch_size.min(store_limit)
    }

    /// 用户回答计数，尽力而为
    async fn bump_response_counts(&self, chunk: &[Response]) {
        let mut per_user: BTreeMap<&str, u64> = BTreeMap::new();
        for response in chunk {
            *per_user.entry(response.user_id.as_str()).or_insert(0) += 1;
        }
        let ops: Vec<WriteOp> = per_user
            .into_iter()
            .map(|(user_id, n)| WriteOp::increment(user_doc(user_id), "responseCount", n as f64))
            .collect();

        if let Err(e) = self.store.commit(ops).await {
            warn!("⚠️ 更新用户回答计数失败: {}", e);
            self.reporter.report_error(
                &AppError::Store(e),
                ErrorType::Submission,
                json!({ "operation": "responseCount" }),
            );
        }
    }
}

/// 题目指标订阅
pub struct MetricsWatcher {
    doc: DocRef,
    changes: broadcast::Receiver<DocumentChange>,
}

impl MetricsWatcher {
    /// 等待下一次指标变化；存储关闭时返回 `None`
    pub async fn next(&mut self) -> Option<QuestionMetrics> {
        loop {
            match self.changes.recv().await {
                Ok(change) if change.doc == self.doc => match decode_doc(&self.doc, change.value) {
                    Ok(metrics) => return Some(metrics),
                    Err(e) => warn!("⚠️ 忽略无法解析的指标更新: {}", e),
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("⚠️ 指标订阅落后，跳过 {} 条变更", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{ConnectivityMonitor, MemoryKeyValueStore, MemoryStore};
    use crate::models::response::{
        Device, DeviceClass, InputMethod, ResponseMetadata, ResponseValue, SpatialValue,
    };
    use crate::services::retry_policy::RetryOptions;
    use std::time::Duration;

    fn response(user: &str, question: &str, x: f64, y: f64) -> Response {
        Response {
            id: format!("{}-{}", user, question),
            user_id: user.into(),
            question_id: question.into(),
            value: ResponseValue::Spatial(SpatialValue {
                x,
                y,
                interactions: Vec::new(),
            }),
            metadata: ResponseMetadata {
                time_to_answer_ms: 1500.0,
                interaction_count: 0,
                confidence: 0.8,
                device: Device {
                    class: DeviceClass::Mobile,
                    input: InputMethod::Touch,
                },
            },
            timestamp: Utc::now(),
        }
    }

    fn service(store: Arc<MemoryStore>, batch_size: usize) -> (ResponseService, Arc<ErrorReporter>) {
        let reporter = Arc::new(ErrorReporter::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(ConnectivityMonitor::new(true)),
            "error_reports",
            50,
        ));
        let retry = RetryPolicy::new(RetryOptions {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 1.0,
        });
        let service = ResponseService::new(
            store,
            Arc::new(MetricsCalculator::default()),
            retry,
            reporter.clone(),
            batch_size,
        );
        (service, reporter)
    }

    #[tokio::test]
    async fn submit_writes_response_metrics_and_user_count() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store.clone(), 250);

        let id = service.submit_response(&response("u1", "q1", 0.2, 0.8)).await.unwrap();
        assert_eq!(id, "u1-q1");

        let stored = service.get_response("u1", "q1").await.unwrap().unwrap();
        assert_eq!(stored.id, "u1-q1");

        let metrics = service.get_question_metrics("q1").await.unwrap().unwrap();
        assert_eq!(metrics.question_id, "q1");
        assert_eq!(metrics.total_responses, 1);
        assert_eq!(metrics.distribution.as_spatial().unwrap().quadrants.top_left, 1);

        let user = store.get(&user_doc("u1")).await.unwrap().unwrap();
        assert_eq!(user["responseCount"], 1);
    }

    #[tokio::test]
    async fn batch_is_chunked_and_updates_every_question() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store.clone(), 2);
        let responses = vec![
            response("u1", "q1", 0.1, 0.1),
            response("u2", "q1", 0.9, 0.9),
            response("u3", "q2", 0.4, 0.6),
            response("u4", "q1", 0.6, 0.4),
            response("u5", "q2", 0.3, 0.3),
        ];

        let ids = service.submit_batch_responses(&responses).await.unwrap();
        assert_eq!(ids, responses.iter().map(|r| r.id.clone()).collect::<Vec<_>>());
        assert_eq!(store.documents(RESPONSES).len(), 5);

        let q1 = service.get_question_metrics("q1").await.unwrap().unwrap();
        let q2 = service.get_question_metrics("q2").await.unwrap().unwrap();
        assert_eq!(q1.total_responses, 3);
        assert_eq!(q2.total_responses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_reports_committed_prefix() {
        let store = Arc::new(MemoryStore::new());
        let (service, reporter) = service(store.clone(), 2);
        let responses = vec![
            response("u1", "q1", 0.1, 0.1),
            response("u2", "q1", 0.2, 0.2),
            response("u3", "q1", 0.3, 0.3),
        ];

        // 第一块的事务和用户计数成功，之后全部失败
        store.fail_writes_after(2);
        let err = service.submit_batch_responses(&responses).await.unwrap_err();
        assert_eq!(err.committed, vec!["u1-q1".to_string(), "u2-q1".to_string()]);
        assert!(matches!(err.source, AppError::RetryExhausted { attempts: 2, .. }));
        assert_eq!(store.documents(RESPONSES).len(), 2);

        let metrics = service.get_question_metrics("q1").await.unwrap().unwrap();
        assert_eq!(metrics.total_responses, 2);
        assert_eq!(reporter.reports()[0].code, "RETRY_EXHAUSTED");
    }

    #[tokio::test]
    async fn chunk_size_respects_store_batch_limit() {
        let store = Arc::new(MemoryStore::with_max_batch_size(4));
        let (service, _) = service(store.clone(), 250);
        let responses: Vec<Response> = (0..5)
            .map(|i| response(&format!("u{}", i), &format!("q{}", i), 0.5, 0.5))
            .collect();

        let ids = service.submit_batch_responses(&responses).await.unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(store.documents(QUESTION_METRICS).len(), 5);
    }

    #[tokio::test]
    async fn watcher_sees_metrics_for_its_question_only() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store, 250);
        let mut watcher = service.watch_question_metrics("q2");

        service.submit_response(&response("u1", "q1", 0.5, 0.5)).await.unwrap();
        service.submit_response(&response("u1", "q2", 0.5, 0.5)).await.unwrap();

        let metrics = watcher.next().await.unwrap();
        assert_eq!(metrics.question_id, "q2");
        assert_eq!(metrics.total_responses, 1);
    }

    #[tokio::test]
    async fn corrupted_metrics_document_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        store.set(metrics_doc("q1"), json!({"totalResponses": "many"})).await.unwrap();
        let (service, _) = service(store.clone(), 250);

        let err = service.submit_response(&response("u1", "q1", 0.5, 0.5)).await.unwrap_err();
        assert_eq!(err.code(), "DOCUMENT_CORRUPTED");
        assert!(store.documents(RESPONSES).is_empty());
    }
}
