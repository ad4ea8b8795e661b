//! 文档存储 - 基础设施层
//!
//! 持久化文档库是外部协作者，这里只定义它需要提供的能力：
//! 点查、有界的原子批量写、多文档读改写事务、数值自增和变更订阅。
//! `MemoryStore` 是进程内实现，供命令行工具和测试使用。

use async_trait::async_trait;
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// 文档地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    pub collection: String,
    pub key: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for DocRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// 一次写操作
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// 整体覆盖文档
    Set { doc: DocRef, value: JsonValue },
    /// 对顶层数值字段做原子自增，文档不存在时创建
    Increment {
        doc: DocRef,
        field: String,
        delta: f64,
    },
}

impl WriteOp {
    pub fn set(doc: DocRef, value: JsonValue) -> Self {
        WriteOp::Set { doc, value }
    }

    pub fn increment(doc: DocRef, field: impl Into<String>, delta: f64) -> Self {
        WriteOp::Increment {
            doc,
            field: field.into(),
            delta,
        }
    }

    pub fn target(&self) -> &DocRef {
        match self {
            WriteOp::Set { doc, .. } | WriteOp::Increment { doc, .. } => doc,
        }
    }
}

/// 订阅收到的文档变更
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub doc: DocRef,
    pub value: JsonValue,
}

/// 事务函数：读到的文档（与 `reads` 一一对应）→ 要原子提交的写操作
///
/// 存储在冲突时可能多次调用它，因此必须是 `Fn` 且无副作用
pub type TransactionFn<'a> =
    dyn Fn(&[Option<JsonValue>]) -> StoreResult<Vec<WriteOp>> + Send + Sync + 'a;

/// 单文档读改写函数
pub type ReadModifyWriteFn<'a> =
    dyn Fn(Option<&JsonValue>) -> StoreResult<Vec<WriteOp>> + Send + Sync + 'a;

/// 事务型文档存储
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// 读取单个文档
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<JsonValue>>;

    /// 原子批量写，操作数不能超过 `max_batch_size`
    async fn commit(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// 读取 `reads` 后调用 `apply`，并原子提交它返回的写操作
    async fn transaction(&self, reads: &[DocRef], apply: &TransactionFn<'_>) -> StoreResult<()>;

    /// 单次提交允许的最大写操作数
    fn max_batch_size(&self) -> usize;

    /// 订阅所有文档变更
    fn watch(&self) -> broadcast::Receiver<DocumentChange>;

    async fn set(&self, doc: DocRef, value: JsonValue) -> StoreResult<()> {
        self.commit(vec![WriteOp::set(doc, value)]).await
    }

    async fn increment(&self, doc: DocRef, field: &str, delta: f64) -> StoreResult<()> {
        self.commit(vec![WriteOp::increment(doc, field, delta)]).await
    }

    async fn read_modify_write(
        &self,
        doc: &DocRef,
        apply: &ReadModifyWriteFn<'_>,
    ) -> StoreResult<()> {
        let single = |docs: &[Option<JsonValue>]| apply(docs.first().and_then(|d| d.as_ref()));
        self.transaction(std::slice::from_ref(doc), &single).await
    }
}

/// Firestore 单批次写入上限
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

const CHANGE_FEED_CAPACITY: usize = 256;

/// 进程内文档存储
///
/// 所有写入在同一把锁下完成，天然串行化；支持注入故障以模拟网络抖动
pub struct MemoryStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<DocumentChange>,
    max_batch_size: usize,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<DocRef, JsonValue>,
    /// 接下来 N 次写入失败
    fail_next: usize,
    /// 再成功 N 次写入后一直失败
    healthy_writes_left: Option<usize>,
    committed_writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_batch_size(DEFAULT_MAX_BATCH_SIZE)
    }

    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
            max_batch_size,
        }
    }

    /// 接下来 `n` 次写入返回 `Unavailable`
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// 再允许 `n` 次写入成功，之后的写入全部失败，直到 `heal`
    pub fn fail_writes_after(&self, n: usize) {
        self.lock().healthy_writes_left = Some(n);
    }

    /// 清除所有注入的故障
    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.fail_next = 0;
        inner.healthy_writes_left = None;
    }

    /// 成功提交的写入次数（commit / transaction 各算一次）
    pub fn committed_writes(&self) -> usize {
        self.lock().committed_writes
    }

    /// 某个集合下的全部文档
    pub fn documents(&self, collection: &str) -> Vec<(String, JsonValue)> {
        self.lock()
            .docs
            .iter()
            .filter(|(doc, _)| doc.collection == collection)
            .map(|(doc, value)| (doc.key.clone(), value.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_locked(&self, inner: &mut Inner, ops: Vec<WriteOp>) -> StoreResult<()> {
        if ops.len() > self.max_batch_size {
            return Err(StoreError::BatchTooLarge {
                size: ops.len(),
                max: self.max_batch_size,
            });
        }
        inner.check_fault()?;

        // 先在暂存区算出所有结果，全部成功后再落盘
        let mut staged: BTreeMap<DocRef, JsonValue> = BTreeMap::new();
        for op in ops {
            match op {
                WriteOp::Set { doc, value } => {
                    staged.insert(doc, value);
                }
                WriteOp::Increment { doc, field, delta } => {
                    let current = staged
                        .get(&doc)
                        .or_else(|| inner.docs.get(&doc))
                        .cloned()
                        .unwrap_or_else(|| JsonValue::Object(Map::new()));
                    let updated = increment_field(&doc, current, &field, delta)?;
                    staged.insert(doc, updated);
                }
            }
        }

        for (doc, value) in staged {
            inner.docs.insert(doc.clone(), value.clone());
            // 没有订阅者时发送失败，忽略即可
            let _ = self.changes.send(DocumentChange { doc, value });
        }
        inner.committed_writes += 1;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn check_fault(&mut self) -> StoreResult<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StoreError::Unavailable("模拟的网络故障".to_string()));
        }
        match self.healthy_writes_left.as_mut() {
            Some(0) => Err(StoreError::Unavailable("模拟的网络中断".to_string())),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn increment_field(doc: &DocRef, current: JsonValue, field: &str, delta: f64) -> StoreResult<JsonValue> {
    let JsonValue::Object(mut map) = current else {
        return Err(StoreError::Corrupted {
            collection: doc.collection.clone(),
            key: doc.key.clone(),
            message: "自增目标不是对象".to_string(),
        });
    };
    let base = map.get(field).and_then(JsonValue::as_f64).unwrap_or(0.0);
    let sum = base + delta;
    let number = if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Number::from(sum as i64)
    } else {
        Number::from_f64(sum).ok_or_else(|| StoreError::Encoding(format!("非法数值: {}", sum)))?
    };
    map.insert(field.to_string(), JsonValue::Number(number));
    Ok(JsonValue::Object(map))
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<JsonValue>> {
        Ok(self.lock().docs.get(doc).cloned())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        debug!("批量写入 {} 个操作", ops.len());
        let mut inner = self.lock();
        self.apply_locked(&mut inner, ops)
    }

    async fn transaction(&self, reads: &[DocRef], apply: &TransactionFn<'_>) -> StoreResult<()> {
        let mut inner = self.lock();
        let snapshot: Vec<Option<JsonValue>> =
            reads.iter().map(|doc| inner.docs.get(doc).cloned()).collect();
        let ops = apply(&snapshot)?;
        debug!("事务读取 {} 个文档, 写入 {} 个操作", reads.len(), ops.len());
        self.apply_locked(&mut inner, ops)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn watch(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}
