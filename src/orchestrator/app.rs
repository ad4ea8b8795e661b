//! 应用入口 - 编排层
//!
//! 1. **初始化**：校验配置、打开本地存储、组装各服务
//! 2. **加载**：扫描输入目录下的 TOML / JSON 回答文件
//! 3. **入队**：逐个文件把回答放进离线队列，队列满时先提交再继续
//! 4. **统计**：提交完成后输出每道题的聚合指标

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, BatchProcessingError};
use crate::infrastructure::{
    ConnectivityMonitor, FileKeyValueStore, KeyValueStore, MemoryStore, TransactionalStore,
};
use crate::models::loaders::{load_all_response_files, ResponseFile};
use crate::orchestrator::batch_processor::{BatchProcessor, QueueOptions};
use crate::services::{
    ErrorReporter, GuessService, MetricsCalculator, MetricsOptions, ResponseService, RetryOptions,
    RetryPolicy, ValidationService,
};
use crate::utils::logging::{self, RunStats};

/// 队列清空时最多等待后台提交的轮数
const DRAIN_MAX_ROUNDS: usize = 100;
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 应用主结构
pub struct App {
    config: Config,
    connectivity: Arc<ConnectivityMonitor>,
    reporter: Arc<ErrorReporter>,
    responses: Arc<ResponseService>,
    guesses: Arc<GuessService>,
    processor: Arc<BatchProcessor>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;
        logging::init_log_file(&config.output_log_file)?;
        logging::log_startup(&config);

        let storage: Arc<dyn KeyValueStore> = Arc::new(
            FileKeyValueStore::open(&config.storage_dir)
                .with_context(|| format!("无法打开本地存储: {}", config.storage_dir))?,
        );
        let store: Arc<dyn TransactionalStore> = Arc::new(MemoryStore::new());
        Self::with_backends(config, store, storage)
    }

    /// 使用给定的存储后端组装应用
    pub fn with_backends(
        config: Config,
        store: Arc<dyn TransactionalStore>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        let reporter = Arc::new(ErrorReporter::new(
            storage.clone(),
            connectivity.clone(),
            config.error_storage_key.clone(),
            config.max_error_reports,
        ));
        let validator = Arc::new(ValidationService::new()?);
        let calculator = Arc::new(MetricsCalculator::new(MetricsOptions::from_config(&config)));
        let retry = RetryPolicy::new(RetryOptions::from_config(&config));

        let responses = Arc::new(ResponseService::new(
            store.clone(),
            calculator.clone(),
            retry,
            reporter.clone(),
            config.batch_size,
        ));
        let guesses = Arc::new(GuessService::new(
            store,
            validator.clone(),
            calculator,
            retry,
            reporter.clone(),
        ));
        let processor = BatchProcessor::new(
            QueueOptions::from_config(&config),
            validator,
            responses.clone(),
            storage,
            connectivity.clone(),
            reporter.clone(),
        );

        Ok(Self {
            config,
            connectivity,
            reporter,
            responses,
            guesses,
            processor,
        })
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn responses(&self) -> &Arc<ResponseService> {
        &self.responses
    }

    pub fn guesses(&self) -> &Arc<GuessService> {
        &self.guesses
    }

    pub fn processor(&self) -> &Arc<BatchProcessor> {
        &self.processor
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        let listener = self.processor.spawn_online_listener();

        // 上次没提交完的先提交
        if !self.processor.is_empty().await {
            info!("📂 发现上次遗留的 {} 条回答", self.processor.len().await);
            self.drain().await;
        }

        let files = self.load_files().await?;
        if files.is_empty() {
            warn!("⚠️ 没有找到待处理的回答文件，程序结束");
            listener.abort();
            return Ok(RunStats::default());
        }

        let mut stats = RunStats::default();
        let mut question_ids = BTreeSet::new();
        let total_batches = files.len();

        for (index, file) in files.iter().enumerate() {
            let file_path = file.file_path.as_deref().unwrap_or("<unknown>");
            logging::log_batch_start(index + 1, total_batches, file_path, file.responses.len());

            let queued = self.queue_file(file, &mut stats, &mut question_ids).await;
            self.drain().await;

            logging::log_batch_complete(index + 1, queued, file.responses.len());
        }

        stats.pending = self.processor.len().await;
        stats.submitted = (stats.loaded - stats.rejected).saturating_sub(stats.pending);

        for question_id in &question_ids {
            match self.responses.get_question_metrics(question_id).await {
                Ok(Some(metrics)) => logging::log_question_metrics(&metrics),
                Ok(None) => info!("📈 题目 {}: 暂无已提交的回答", question_id),
                Err(e) => error!("❌ 读取题目 {} 的指标失败: {}", question_id, e),
            }
        }

        let reports = self.reporter.reports();
        if !reports.is_empty() {
            warn!("⚠️ 本地记录了 {} 条错误报告", reports.len());
        }

        logging::print_final_stats(&stats, &self.config.output_log_file);
        listener.abort();
        Ok(stats)
    }

    async fn load_files(&self) -> Result<Vec<ResponseFile>> {
        info!("\n📁 正在扫描待处理的回答文件...");
        load_all_response_files(&self.config.input_folder).await
    }

    /// 把一个文件的回答全部入队，返回成功入队的条数
    async fn queue_file(
        &self,
        file: &ResponseFile,
        stats: &mut RunStats,
        question_ids: &mut BTreeSet<String>,
    ) -> usize {
        let mut queued = 0;
        for candidate in &file.responses {
            stats.loaded += 1;
            let mut result = self.processor.queue_response(candidate).await;

            if matches!(result, Err(AppError::Batch(BatchProcessingError::QueueFull { .. }))) {
                self.drain().await;
                result = self.processor.queue_response(candidate).await;
            }

            match result {
                Ok(_) => {
                    queued += 1;
                    question_ids.insert(candidate.question_id.clone());
                }
                Err(e @ AppError::Validation(_)) => {
                    stats.rejected += 1;
                    warn!(
                        "⚠️ 跳过无效回答 (用户 {}, 题目 {}): {}",
                        logging::truncate_text(&candidate.user_id, 32),
                        logging::truncate_text(&candidate.question_id, 32),
                        e
                    );
                }
                Err(e) => {
                    stats.rejected += 1;
                    error!("❌ 回答入队失败: {}", e);
                }
            }
        }
        queued
    }

    /// 提交队列直到清空、失败或后台提交长时间不结束
    async fn drain(&self) {
        for _ in 0..DRAIN_MAX_ROUNDS {
            if self.processor.is_empty().await {
                return;
            }
            let outcome = self.processor.process_queue().await;
            if !outcome.failed.is_empty() {
                warn!(
                    "⚠️ {} 条回答提交失败，保留在队列中等待下次运行",
                    outcome.failed.len()
                );
                return;
            }
            if outcome.successful.is_empty() {
                // 后台任务正在提交
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }
        warn!("⚠️ 等待队列提交超时，剩余 {} 条", self.processor.len().await);
    }
}
