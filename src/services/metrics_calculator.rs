//! 指标计算 - 业务能力层
//!
//! 纯函数：把一组回答 / 猜测聚合成单题指标。
//! `apply_response` / `apply_guess` 是增量版本，提交事务里用它们更新已有文档，
//! 全量计算就是对它们的折叠，两条路径的分类规则因此始终一致。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::guess::Guess;
use crate::models::metrics::{Distribution, QuestionMetrics, SpatialDistribution};
use crate::models::response::{InteractionKind, Position, Response, ResponseValue, SpatialValue};

/// 聚合参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsOptions {
    /// 热力图边长 N
    pub grid_size: usize,
    /// 相邻两次移动在某个轴上的位移超过该值才计入该方向
    pub move_threshold: f64,
    /// 为 true 时第 0 行对应 y = 1（顶部）
    pub invert_grid_y: bool,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            grid_size: 10,
            move_threshold: 0.1,
            invert_grid_y: true,
        }
    }
}

impl MetricsOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            grid_size: config.metrics_grid_size.max(1),
            move_threshold: config.metrics_move_threshold,
            invert_grid_y: config.metrics_invert_grid_y,
        }
    }
}

/// 单题指标计算器
#[derive(Debug, Clone, Default)]
pub struct MetricsCalculator {
    options: MetricsOptions,
}

impl MetricsCalculator {
    /// 热力图边长至少为 1
    pub fn new(options: MetricsOptions) -> Self {
        Self {
            options: MetricsOptions {
                grid_size: options.grid_size.max(1),
                ..options
            },
        }
    }

    pub fn options(&self) -> &MetricsOptions {
        &self.options
    }

    /// 全量计算
    ///
    /// 没有回答时返回全零指标，这是"还没有数据"的标准表示
    pub fn calculate_question_metrics(&self, responses: &[Response], guesses: &[Guess]) -> QuestionMetrics {
        let Some(first) = responses.first() else {
            return QuestionMetrics::empty("");
        };

        let mut metrics = QuestionMetrics::empty(first.question_id.clone());
        for response in responses {
            self.fold_response(&mut metrics, response);
        }
        for guess in guesses {
            self.fold_guess(&mut metrics, guess);
        }
        metrics.last_updated = responses
            .iter()
            .map(|r| r.timestamp)
            .chain(guesses.iter().map(|g| g.timestamp))
            .max();
        metrics
    }

    /// 把一条新回答计入已有指标
    pub fn apply_response(&self, metrics: &mut QuestionMetrics, response: &Response, now: DateTime<Utc>) {
        self.fold_response(metrics, response);
        metrics.last_updated = Some(now);
    }

    /// 把一条新猜测计入已有指标
    pub fn apply_guess(&self, metrics: &mut QuestionMetrics, guess: &Guess, now: DateTime<Utc>) {
        self.fold_guess(metrics, guess);
        metrics.last_updated = Some(now);
    }

    fn fold_response(&self, metrics: &mut QuestionMetrics, response: &Response) {
        let previous = metrics.total_responses;
        metrics.total_responses += 1;
        metrics.time_stats.average_response_time = running_mean(
            metrics.time_stats.average_response_time,
            previous,
            response.metadata.time_to_answer_ms,
        );

        // 题型由第一条回答决定；同题混入其他题型时只计总数
        if metrics.distribution == Distribution::Empty {
            metrics.distribution = match &response.value {
                ResponseValue::Spatial(_) => {
                    Distribution::Spatial(SpatialDistribution::new(self.options.grid_size))
                }
                ResponseValue::Categorical { .. } => Distribution::Categorical {
                    counts: BTreeMap::new(),
                },
            };
        }

        match (&mut metrics.distribution, &response.value) {
            (Distribution::Spatial(distribution), ResponseValue::Spatial(spatial)) => {
                self.add_spatial(distribution, spatial);
            }
            (Distribution::Categorical { counts }, ResponseValue::Categorical { selected_option }) => {
                *counts.entry(selected_option.clone()).or_insert(0) += 1;
            }
            _ => {
                tracing::warn!(
                    "题目 {} 混入了 {} 类型的回答 {}，不计入分布",
                    metrics.question_id,
                    response.value.kind(),
                    response.id
                );
            }
        }
    }

    fn fold_guess(&self, metrics: &mut QuestionMetrics, guess: &Guess) {
        let previous = metrics.total_guesses;
        metrics.total_guesses += 1;
        metrics.time_stats.average_guess_time = running_mean(
            metrics.time_stats.average_guess_time,
            previous,
            guess.metadata.time_to_answer_ms,
        );

        if let Some(score) = guess.score() {
            let accuracy = &mut metrics.guess_accuracy;
            let scored = accuracy.samples();
            accuracy.average_score = running_mean(accuracy.average_score, scored, score);
            *accuracy.distribution.entry(score_bucket(score)).or_insert(0) += 1;
        }
    }

    fn add_spatial(&self, distribution: &mut SpatialDistribution, spatial: &SpatialValue) {
        let samples = distribution.samples();

        let quadrants = &mut distribution.quadrants;
        match (spatial.x < 0.5, spatial.y < 0.5) {
            (true, false) => quadrants.top_left += 1,
            (false, false) => quadrants.top_right += 1,
            (true, true) => quadrants.bottom_left += 1,
            (false, true) => quadrants.bottom_right += 1,
        }

        let (row, col) = self.grid_cell(spatial.x, spatial.y);
        if let Some(cell) = distribution.grid.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell += 1;
        }

        distribution.average_position = Position {
            x: running_mean(distribution.average_position.x, samples, spatial.x),
            y: running_mean(distribution.average_position.y, samples, spatial.y),
        };

        self.count_interactions(distribution, spatial);
    }

    /// 坐标落在哪个格子，返回 `(row, col)`
    fn grid_cell(&self, x: f64, y: f64) -> (usize, usize) {
        let n = self.options.grid_size;
        let bucket = |coord: f64| ((coord * n as f64).floor().max(0.0) as usize).min(n - 1);
        let col = bucket(x);
        let row = if self.options.invert_grid_y {
            n - 1 - bucket(y)
        } else {
            bucket(y)
        };
        (row, col)
    }

    fn count_interactions(&self, distribution: &mut SpatialDistribution, spatial: &SpatialValue) {
        let threshold = self.options.move_threshold;
        let patterns = &mut distribution.interaction_patterns;
        let mut last_move: Option<Position> = None;

        for interaction in &spatial.interactions {
            match interaction.kind {
                InteractionKind::Click => patterns.clicks += 1,
                InteractionKind::Move => {
                    if let Some(prev) = last_move {
                        let dx = (interaction.position.x - prev.x).abs();
                        let dy = (interaction.position.y - prev.y).abs();
                        match (dx > threshold, dy > threshold) {
                            (true, true) => patterns.diagonal_moves += 1,
                            (true, false) => patterns.horizontal_moves += 1,
                            (false, true) => patterns.vertical_moves += 1,
                            (false, false) => {}
                        }
                    }
                    last_move = Some(interaction.position);
                }
            }
        }
    }
}

fn running_mean(mean: f64, count: u64, value: f64) -> f64 {
    mean + (value - mean) / (count + 1) as f64
}

/// 0.1 宽度的得分桶，键为桶下界
fn score_bucket(score: f64) -> String {
    // 加一个极小量，避免 0.7 * 10 = 6.999… 落进错误的桶
    let bucket = ((score.clamp(0.0, 1.0) * 10.0 + 1e-9).floor() / 10.0).min(1.0);
    format!("{:.1}", bucket)
}
