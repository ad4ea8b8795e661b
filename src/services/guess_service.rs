//! 猜测服务 - 业务能力层
//!
//! 用户猜测其他人的答案。只有目标用户已经作答才能打分和揭晓。

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, BusinessError, StoreResult};
use crate::infrastructure::{DocRef, TransactionalStore, WriteOp};
use crate::models::error_report::ErrorType;
use crate::models::guess::{Guess, GuessAccuracy};
use crate::models::response::{Response, ResponseMetadata, ResponseValue};
use crate::services::error_reporter::ErrorReporter;
use crate::services::metrics_calculator::MetricsCalculator;
use crate::services::response_service::{
    decode_doc, encode_doc, metrics_doc, metrics_or_empty, response_doc, user_doc, GUESSES,
};
use crate::services::retry_policy::RetryPolicy;
use crate::services::validation_service::ValidationService;

/// 单位正方形内两点的最大距离
const MAX_SPATIAL_DISTANCE: f64 = std::f64::consts::SQRT_2;

pub fn guess_doc(guess_id: &str) -> DocRef {
    DocRef::new(GUESSES, guess_id)
}

/// 计算猜测得分
///
/// 空间题按欧氏距离线性折算，选择题猜中得 1 分，否则 0 分
pub fn calculate_accuracy(guess: &ResponseValue, actual: &ResponseValue) -> AppResult<GuessAccuracy> {
    match (guess, actual) {
        (ResponseValue::Spatial(g), ResponseValue::Spatial(a)) => {
            let distance = ((g.x - a.x).powi(2) + (g.y - a.y).powi(2)).sqrt();
            Ok(GuessAccuracy {
                distance: Some(distance),
                correct: None,
                score: (1.0 - distance / MAX_SPATIAL_DISTANCE).max(0.0),
            })
        }
        (
            ResponseValue::Categorical { selected_option: g },
            ResponseValue::Categorical { selected_option: a },
        ) => {
            let correct = g == a;
            Ok(GuessAccuracy {
                distance: None,
                correct: Some(correct),
                score: if correct { 1.0 } else { 0.0 },
            })
        }
        _ => Err(BusinessError::ValueTypeMismatch {
            guess: guess.kind(),
            actual: actual.kind(),
        }
        .into()),
    }
}

pub struct GuessService {
    store: Arc<dyn TransactionalStore>,
    validator: Arc<ValidationService>,
    calculator: Arc<MetricsCalculator>,
    retry: RetryPolicy,
    reporter: Arc<ErrorReporter>,
}

impl GuessService {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        validator: Arc<ValidationService>,
        calculator: Arc<MetricsCalculator>,
        retry: RetryPolicy,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            store,
            validator,
            calculator,
            retry,
            reporter,
        }
    }

    /// 提交猜测
    ///
    /// 目标用户还没作答时返回 `TargetNotResponded`，不写入任何数据
    pub async fn submit_guess(
        &self,
        user_id: &str,
        target_user_id: &str,
        question_id: &str,
        value: ResponseValue,
        metadata: ResponseMetadata,
    ) -> AppResult<Guess> {
        let context = json!({
            "userId": user_id,
            "targetUserId": target_user_id,
            "questionId": question_id,
        });
        self.try_submit(user_id, target_user_id, question_id, value, metadata)
            .await
            .inspect_err(|e| self.report(e, context))
    }

    async fn try_submit(
        &self,
        user_id: &str,
        target_user_id: &str,
        question_id: &str,
        value: ResponseValue,
        metadata: ResponseMetadata,
    ) -> AppResult<Guess> {
        self.validator.validate_id("userId", user_id)?;
        self.validator.validate_id("targetUserId", target_user_id)?;
        self.validator.validate_id("questionId", question_id)?;
        self.validator.validate_value(&value)?;
        self.validator.validate_metadata(&metadata)?;
        if user_id == target_user_id {
            return Err(BusinessError::SelfGuess.into());
        }

        let actual = self.target_response(target_user_id, question_id).await?;
        let accuracy = calculate_accuracy(&value, &actual.value)?;

        let guess = Guess {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            target_user_id: target_user_id.to_string(),
            question_id: question_id.to_string(),
            value,
            metadata,
            timestamp: Utc::now(),
            accuracy: Some(accuracy),
        };

        self.retry.run(|| self.commit_guess(&guess)).await?;
        info!(
            "🎯 猜测 {} 已提交: {} → {} (题目 {}, 得分 {:.2})",
            guess.id, guess.user_id, guess.target_user_id, guess.question_id, accuracy.score
        );

        if let Err(e) = self.store.increment(user_doc(user_id), "guessCount", 1.0).await {
            warn!("⚠️ 更新用户猜测计数失败: {}", e);
            self.report(&AppError::Store(e), json!({ "operation": "guessCount" }));
        }
        Ok(guess)
    }

    /// 揭晓猜测：重新确认目标用户已作答且猜测确实指向该用户
    pub async fn reveal_guess(&self, guess_id: &str, target_user_id: &str) -> AppResult<Guess> {
        let context = json!({ "guessId": guess_id, "targetUserId": target_user_id });
        self.try_reveal(guess_id, target_user_id)
            .await
            .inspect_err(|e| self.report(e, context))
    }

    async fn try_reveal(&self, guess_id: &str, target_user_id: &str) -> AppResult<Guess> {
        let doc = guess_doc(guess_id);
        let guess: Guess = match self.fetch(&doc).await? {
            Some(value) => decode_doc(&doc, value)?,
            None => {
                return Err(BusinessError::GuessNotFound {
                    guess_id: guess_id.to_string(),
                }
                .into())
            }
        };
        if guess.target_user_id != target_user_id {
            return Err(BusinessError::TargetMismatch {
                guess_id: guess_id.to_string(),
                target_user_id: target_user_id.to_string(),
            }
            .into());
        }

        self.target_response(target_user_id, &guess.question_id).await?;
        Ok(guess)
    }

    async fn target_response(&self, target_user_id: &str, question_id: &str) -> AppResult<Response> {
        let doc = response_doc(target_user_id, question_id);
        match self.fetch(&doc).await? {
            Some(value) => Ok(decode_doc(&doc, value)?),
            None => Err(BusinessError::TargetNotResponded {
                target_user_id: target_user_id.to_string(),
                question_id: question_id.to_string(),
            }
            .into()),
        }
    }

    async fn fetch(&self, doc: &DocRef) -> AppResult<Option<JsonValue>> {
        self.retry
            .run(|| async { self.store.get(doc).await.map_err(AppError::from) })
            .await
    }

    /// 猜测文档和题目指标在同一事务里写入
    async fn commit_guess(&self, guess: &Guess) -> AppResult<()> {
        let metrics_ref = metrics_doc(&guess.question_id);
        let now = Utc::now();
        let apply = |existing: &[Option<JsonValue>]| -> StoreResult<Vec<WriteOp>> {
            let current = existing.first().and_then(|d| d.as_ref());
            let mut metrics = metrics_or_empty(&metrics_ref, &guess.question_id, current)?;
            self.calculator.apply_guess(&mut metrics, guess, now);
            Ok(vec![
                WriteOp::set(guess_doc(&guess.id), encode_doc(guess)?),
                WriteOp::set(metrics_ref.clone(), encode_doc(&metrics)?),
            ])
        };
        self.store
            .transaction(std::slice::from_ref(&metrics_ref), &apply)
            .await?;
        Ok(())
    }

    fn report(&self, error: &AppError, context: JsonValue) {
        let error_type = match error {
            AppError::Validation(_) => ErrorType::Validation,
            _ => ErrorType::Guess,
        };
        self.reporter.report_error(error, error_type, context);
    }
}
