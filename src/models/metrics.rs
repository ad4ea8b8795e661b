use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::response::Position;

/// 单题聚合指标
///
/// 首次写入时创建，之后每次提交都会更新，本模块不会删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetrics {
    pub question_id: String,
    pub total_responses: u64,
    pub total_guesses: u64,
    pub distribution: Distribution,
    pub guess_accuracy: GuessAccuracyStats,
    pub time_stats: TimeStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl QuestionMetrics {
    /// "还没有数据" 的标准表示
    pub fn empty(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            total_responses: 0,
            total_guesses: 0,
            distribution: Distribution::Empty,
            guess_accuracy: GuessAccuracyStats::default(),
            time_stats: TimeStats::default(),
            last_updated: None,
        }
    }
}

/// 回答分布，按题型区分
///
/// 存储形式：还没有数据时为 `{}`，否则带 `kind` 标签
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "DistributionRepr", into = "DistributionRepr")]
pub enum Distribution {
    #[default]
    Empty,
    Spatial(SpatialDistribution),
    Categorical { counts: BTreeMap<String, u64> },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DistributionRepr {
    Tagged(TaggedDistribution),
    Empty(EmptyDistribution),
}

/// 只接受 `{}`，带标签但内容损坏的文档不会被当成空分布
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyDistribution {}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum TaggedDistribution {
    Spatial(SpatialDistribution),
    Categorical { counts: BTreeMap<String, u64> },
}

impl From<DistributionRepr> for Distribution {
    fn from(repr: DistributionRepr) -> Self {
        match repr {
            DistributionRepr::Empty(_) => Distribution::Empty,
            DistributionRepr::Tagged(TaggedDistribution::Spatial(spatial)) => {
                Distribution::Spatial(spatial)
            }
            DistributionRepr::Tagged(TaggedDistribution::Categorical { counts }) => {
                Distribution::Categorical { counts }
            }
        }
    }
}

impl From<Distribution> for DistributionRepr {
    fn from(distribution: Distribution) -> Self {
        match distribution {
            Distribution::Empty => DistributionRepr::Empty(EmptyDistribution {}),
            Distribution::Spatial(spatial) => {
                DistributionRepr::Tagged(TaggedDistribution::Spatial(spatial))
            }
            Distribution::Categorical { counts } => {
                DistributionRepr::Tagged(TaggedDistribution::Categorical { counts })
            }
        }
    }
}

impl Distribution {
    pub fn as_spatial(&self) -> Option<&SpatialDistribution> {
        match self {
            Distribution::Spatial(spatial) => Some(spatial),
            _ => None,
        }
    }

    pub fn categorical_counts(&self) -> Option<&BTreeMap<String, u64>> {
        match self {
            Distribution::Categorical { counts } => Some(counts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialDistribution {
    pub quadrants: Quadrants,
    /// 热力图，`grid[row][col]`
    pub grid: Vec<Vec<u64>>,
    pub average_position: Position,
    pub interaction_patterns: InteractionPatterns,
}

impl SpatialDistribution {
    pub fn new(grid_size: usize) -> Self {
        Self {
            quadrants: Quadrants::default(),
            grid: vec![vec![0; grid_size]; grid_size],
            average_position: Position { x: 0.0, y: 0.0 },
            interaction_patterns: InteractionPatterns::default(),
        }
    }

    /// 参与统计的空间回答数
    pub fn samples(&self) -> u64 {
        self.quadrants.total()
    }
}

/// 四象限计数，`y >= 0.5` 为上半区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Quadrants {
    pub top_left: u64,
    pub top_right: u64,
    pub bottom_left: u64,
    pub bottom_right: u64,
}

impl Quadrants {
    pub fn total(&self) -> u64 {
        self.top_left + self.top_right + self.bottom_left + self.bottom_right
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPatterns {
    pub horizontal_moves: u64,
    pub vertical_moves: u64,
    pub diagonal_moves: u64,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessAccuracyStats {
    pub average_score: f64,
    /// 以 0.1 为宽度的得分直方图，键为桶下界（如 `"0.9"`）
    pub distribution: BTreeMap<String, u64>,
}

impl GuessAccuracyStats {
    /// 已打分的猜测数
    pub fn samples(&self) -> u64 {
        self.distribution.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeStats {
    pub average_response_time: f64,
    pub average_guess_time: f64,
}
