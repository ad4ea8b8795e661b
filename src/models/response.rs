use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 已通过校验的回答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub user_id: String,
    pub question_id: String,
    pub value: ResponseValue,
    pub metadata: ResponseMetadata,
    pub timestamp: DateTime<Utc>,
}

/// 回答内容（带标签的联合类型）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseValue {
    /// 在单位正方形内选一个点
    Spatial(SpatialValue),
    /// 从固定选项中选一个
    #[serde(rename_all = "camelCase")]
    Categorical { selected_option: String },
}

impl ResponseValue {
    /// 标签名，与序列化时的 `type` 字段一致
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseValue::Spatial(_) => "spatial",
            ResponseValue::Categorical { .. } => "categorical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialValue {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// 一次指针交互
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub position: Position,
    /// 相对作答开始的毫秒数
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Move,
    Click,
}

impl InteractionKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "move" => Some(InteractionKind::Move),
            "click" => Some(InteractionKind::Click),
            _ => None,
        }
    }
}

/// 作答元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub time_to_answer_ms: f64,
    pub interaction_count: u32,
    pub confidence: f64,
    pub device: Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub class: DeviceClass,
    pub input: InputMethod,
}

/// 设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceClass {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "desktop" => Some(DeviceClass::Desktop),
            "mobile" => Some(DeviceClass::Mobile),
            "tablet" => Some(DeviceClass::Tablet),
            _ => None,
        }
    }
}

/// 输入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMethod {
    Mouse,
    Touch,
    Keyboard,
}

impl InputMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mouse" => Some(InputMethod::Mouse),
            "touch" => Some(InputMethod::Touch),
            "keyboard" => Some(InputMethod::Keyboard),
            _ => None,
        }
    }
}

/// 未经校验的回答输入
///
/// `value` 和 `metadata` 保留原始 JSON，交给 `ValidationService` 逐字段检查
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

// 时间戳既可以是 RFC 3339 字符串，也可以是毫秒级 Unix 时间
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;
    use std::fmt;

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = Option<DateTime<Utc>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an RFC 3339 string or epoch milliseconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(E::custom)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Utc.timestamp_millis_opt(value)
                .single()
                .map(Some)
                .ok_or_else(|| E::custom(format!("timestamp out of range: {}", value)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let millis = i64::try_from(value).map_err(E::custom)?;
            self.visit_i64(millis)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}
