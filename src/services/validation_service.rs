//! 校验服务 - 业务能力层
//!
//! 只负责"这条回答能不能进系统"，不关心队列和提交

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::response::{
    Device, DeviceClass, InputMethod, Interaction, InteractionKind, Position, Response,
    ResponseCandidate, ResponseMetadata, ResponseValue, SpatialValue,
};

/// 作答时长上限（毫秒，不含）
pub const MAX_TIME_TO_ANSWER_MS: f64 = 300_000.0;

/// 可以安全用作文档键的 id：非空，不含 `/` 和控制字符
const DOCUMENT_ID_PATTERN: &str = r"^[^/\x00-\x1f\x7f]+$";

type ValidationResult<T> = Result<T, ValidationError>;

/// 回答校验服务
pub struct ValidationService {
    id_pattern: Regex,
}

impl ValidationService {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            id_pattern: Regex::new(DOCUMENT_ID_PATTERN)?,
        })
    }

    /// 校验原始输入并转换为 `Response`
    ///
    /// 缺少 id 时生成 UUID，缺少时间戳时使用当前时间
    pub fn validate(&self, candidate: &ResponseCandidate) -> ValidationResult<Response> {
        self.validate_id("userId", &candidate.user_id)?;
        self.validate_id("questionId", &candidate.question_id)?;
        let id = match &candidate.id {
            Some(id) => {
                self.validate_id("id", id)?;
                id.clone()
            }
            None => Uuid::new_v4().to_string(),
        };

        let raw_value = candidate
            .value
            .as_ref()
            .ok_or_else(|| ValidationError::new("value", "缺少回答内容"))?;
        let value = parse_value(raw_value)?;
        self.validate_value(&value)?;

        let raw_metadata = candidate
            .metadata
            .as_ref()
            .ok_or_else(|| ValidationError::new("metadata", "缺少作答元数据"))?;
        let metadata = parse_metadata(raw_metadata)?;
        self.validate_metadata(&metadata)?;

        Ok(Response {
            id,
            user_id: candidate.user_id.clone(),
            question_id: candidate.question_id.clone(),
            value,
            metadata,
            timestamp: candidate.timestamp.unwrap_or_else(Utc::now),
        })
    }

    /// 检查已是强类型的回答内容
    pub fn validate_value(&self, value: &ResponseValue) -> ValidationResult<()> {
        match value {
            ResponseValue::Spatial(spatial) => {
                check_unit("value.x", spatial.x)?;
                check_unit("value.y", spatial.y)?;
                for (i, interaction) in spatial.interactions.iter().enumerate() {
                    check_unit(
                        &format!("value.interactions[{}].position.x", i),
                        interaction.position.x,
                    )?;
                    check_unit(
                        &format!("value.interactions[{}].position.y", i),
                        interaction.position.y,
                    )?;
                }
                Ok(())
            }
            ResponseValue::Categorical { selected_option } => {
                if selected_option.trim().is_empty() {
                    return Err(ValidationError::new("value.selectedOption", "不能为空"));
                }
                Ok(())
            }
        }
    }

    /// 检查已是强类型的作答元数据
    pub fn validate_metadata(&self, metadata: &ResponseMetadata) -> ValidationResult<()> {
        let time = metadata.time_to_answer_ms;
        if !(time > 0.0 && time < MAX_TIME_TO_ANSWER_MS) {
            return Err(ValidationError::new(
                "metadata.timeToAnswerMs",
                format!("必须在 (0, {}) 之间", MAX_TIME_TO_ANSWER_MS),
            ));
        }
        check_unit("metadata.confidence", metadata.confidence)
    }

    /// 检查用户 / 题目 id
    pub fn validate_id(&self, field: &str, id: &str) -> ValidationResult<()> {
        if id.trim().is_empty() {
            return Err(ValidationError::new(field, "不能为空"));
        }
        if !self.id_pattern.is_match(id) {
            return Err(ValidationError::new(field, "不能包含 '/' 或控制字符"));
        }
        Ok(())
    }
}

fn check_unit(field: &str, v: f64) -> ValidationResult<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{} 不在 [0, 1] 范围内", v)))
    }
}

fn as_object<'a>(field: &str, value: &'a JsonValue) -> ValidationResult<&'a Map<String, JsonValue>> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::new(field, "必须是对象"))
}

fn require_f64(obj: &Map<String, JsonValue>, field: &str, key: &str) -> ValidationResult<f64> {
    obj.get(key)
        .ok_or_else(|| ValidationError::new(field, "缺少字段"))?
        .as_f64()
        .ok_or_else(|| ValidationError::new(field, "必须是数字"))
}

fn require_str<'a>(obj: &'a Map<String, JsonValue>, field: &str, key: &str) -> ValidationResult<&'a str> {
    obj.get(key)
        .ok_or_else(|| ValidationError::new(field, "缺少字段"))?
        .as_str()
        .ok_or_else(|| ValidationError::new(field, "必须是字符串"))
}

fn parse_value(raw: &JsonValue) -> ValidationResult<ResponseValue> {
    let obj = as_object("value", raw)?;
    let tag = require_str(obj, "value.type", "type")?;
    match tag {
        "spatial" => {
            let x = require_f64(obj, "value.x", "x")?;
            let y = require_f64(obj, "value.y", "y")?;
            let interactions = match obj.get("interactions") {
                None | Some(JsonValue::Null) => Vec::new(),
                Some(JsonValue::Array(items)) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| parse_interaction(i, item))
                    .collect::<ValidationResult<Vec<_>>>()?,
                Some(_) => {
                    return Err(ValidationError::new("value.interactions", "必须是数组"));
                }
            };
            Ok(ResponseValue::Spatial(SpatialValue { x, y, interactions }))
        }
        "categorical" => {
            let selected_option = require_str(obj, "value.selectedOption", "selectedOption")?;
            Ok(ResponseValue::Categorical {
                selected_option: selected_option.to_string(),
            })
        }
        other => Err(ValidationError::new(
            "value.type",
            format!("未知的回答类型: {}", other),
        )),
    }
}

fn parse_interaction(index: usize, raw: &JsonValue) -> ValidationResult<Interaction> {
    let prefix = format!("value.interactions[{}]", index);
    let obj = as_object(&prefix, raw)?;

    let kind_field = format!("{}.kind", prefix);
    let kind_str = require_str(obj, &kind_field, "kind")?;
    let kind = InteractionKind::from_str(kind_str)
        .ok_or_else(|| ValidationError::new(&kind_field, format!("未知的交互类型: {}", kind_str)))?;

    let position_field = format!("{}.position", prefix);
    let position_obj = as_object(
        &position_field,
        obj.get("position")
            .ok_or_else(|| ValidationError::new(&position_field, "缺少字段"))?,
    )?;
    let position = Position {
        x: require_f64(position_obj, &format!("{}.x", position_field), "x")?,
        y: require_f64(position_obj, &format!("{}.y", position_field), "y")?,
    };

    let timestamp = match obj.get("timestamp") {
        None => 0,
        Some(ts) => ts.as_i64().filter(|t| *t >= 0).ok_or_else(|| {
            ValidationError::new(format!("{}.timestamp", prefix), "必须是非负整数")
        })?,
    };

    Ok(Interaction {
        kind,
        position,
        timestamp,
    })
}

fn parse_metadata(raw: &JsonValue) -> ValidationResult<ResponseMetadata> {
    let obj = as_object("metadata", raw)?;

    let time_to_answer_ms = require_f64(obj, "metadata.timeToAnswerMs", "timeToAnswerMs")?;

    let interaction_count = match obj.get("interactionCount") {
        None => 0,
        Some(count) => count
            .as_i64()
            .filter(|c| *c >= 0)
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| ValidationError::new("metadata.interactionCount", "必须是非负整数"))?,
    };

    let confidence = require_f64(obj, "metadata.confidence", "confidence")?;

    let device_obj = as_object(
        "metadata.device",
        obj.get("device")
            .ok_or_else(|| ValidationError::new("metadata.device", "缺少字段"))?,
    )?;
    let class_str = require_str(device_obj, "metadata.device.class", "class")?;
    let class = DeviceClass::from_str(class_str).ok_or_else(|| {
        ValidationError::new("metadata.device.class", format!("未知的设备类型: {}", class_str))
    })?;
    let input_str = require_str(device_obj, "metadata.device.input", "input")?;
    let input = InputMethod::from_str(input_str).ok_or_else(|| {
        ValidationError::new("metadata.device.input", format!("未知的输入方式: {}", input_str))
    })?;

    Ok(ResponseMetadata {
        time_to_answer_ms,
        interaction_count,
        confidence,
        device: Device { class, input },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> JsonValue {
        json!({
            "timeToAnswerMs": 2500,
            "interactionCount": 3,
            "confidence": 0.8,
            "device": {"class": "mobile", "input": "touch"}
        })
    }

    fn spatial(x: f64, y: f64) -> ResponseCandidate {
        ResponseCandidate {
            user_id: "alice".into(),
            question_id: "q1".into(),
            value: Some(json!({"type": "spatial", "x": x, "y": y})),
            metadata: Some(metadata()),
            ..Default::default()
        }
    }

    fn field_of(result: ValidationResult<Response>) -> String {
        result.unwrap_err().field
    }

    #[test]
    fn accepts_points_inside_the_unit_square() {
        let service = ValidationService::new().unwrap();
        for (x, y) in [(0.0, 0.0), (1.0, 1.0), (0.5, 0.25)] {
            let response = service.validate(&spatial(x, y)).unwrap();
            assert_eq!(response.user_id, "alice");
            assert!(!response.id.is_empty());
        }
    }

    #[test]
    fn rejects_points_outside_the_unit_square() {
        let service = ValidationService::new().unwrap();
        assert_eq!(field_of(service.validate(&spatial(1.5, 0.5))), "value.x");
        assert_eq!(field_of(service.validate(&spatial(0.5, -0.1))), "value.y");
    }

    #[test]
    fn rejects_empty_ids_and_document_unsafe_ids() {
        let service = ValidationService::new().unwrap();
        let mut candidate = spatial(0.5, 0.5);
        candidate.user_id = "  ".into();
        assert_eq!(field_of(service.validate(&candidate)), "userId");

        let mut candidate = spatial(0.5, 0.5);
        candidate.question_id = "q1/../q2".into();
        assert_eq!(field_of(service.validate(&candidate)), "questionId");
    }

    #[test]
    fn rejects_unknown_tags_and_interaction_kinds() {
        let service = ValidationService::new().unwrap();
        let mut candidate = spatial(0.5, 0.5);
        candidate.value = Some(json!({"type": "ranking", "order": []}));
        assert_eq!(field_of(service.validate(&candidate)), "value.type");

        candidate.value = Some(json!({
            "type": "spatial", "x": 0.5, "y": 0.5,
            "interactions": [
                {"kind": "move", "position": {"x": 0.1, "y": 0.1}, "timestamp": 10},
                {"kind": "hover", "position": {"x": 0.2, "y": 0.2}, "timestamp": 20}
            ]
        }));
        assert_eq!(
            field_of(service.validate(&candidate)),
            "value.interactions[1].kind"
        );

        candidate.value = Some(json!({
            "type": "spatial", "x": 0.5, "y": 0.5,
            "interactions": [{"kind": "click", "position": {"x": 1.2, "y": 0.1}}]
        }));
        assert_eq!(
            field_of(service.validate(&candidate)),
            "value.interactions[0].position.x"
        );
    }

    #[test]
    fn categorical_requires_an_option() {
        let service = ValidationService::new().unwrap();
        let mut candidate = spatial(0.5, 0.5);
        candidate.value = Some(json!({"type": "categorical", "selectedOption": ""}));
        assert_eq!(field_of(service.validate(&candidate)), "value.selectedOption");

        candidate.value = Some(json!({"type": "categorical", "selectedOption": "tea"}));
        let response = service.validate(&candidate).unwrap();
        assert_eq!(
            response.value,
            ResponseValue::Categorical {
                selected_option: "tea".into()
            }
        );
    }

    #[test]
    fn metadata_bounds_and_device_enums() {
        let service = ValidationService::new().unwrap();
        let mut candidate = spatial(0.5, 0.5);

        candidate.metadata = Some(json!({
            "timeToAnswerMs": 300000, "confidence": 0.5,
            "device": {"class": "desktop", "input": "mouse"}
        }));
        assert_eq!(field_of(service.validate(&candidate)), "metadata.timeToAnswerMs");

        candidate.metadata = Some(json!({
            "timeToAnswerMs": 100, "confidence": 0.5,
            "device": {"class": "watch", "input": "mouse"}
        }));
        assert_eq!(field_of(service.validate(&candidate)), "metadata.device.class");

        candidate.metadata = Some(json!({
            "timeToAnswerMs": 100, "interactionCount": -1, "confidence": 0.5,
            "device": {"class": "tablet", "input": "keyboard"}
        }));
        assert_eq!(field_of(service.validate(&candidate)), "metadata.interactionCount");

        candidate.metadata = None;
        assert_eq!(field_of(service.validate(&candidate)), "metadata");
    }

    #[test]
    fn fractional_answer_times_inside_bounds_are_kept() {
        let service = ValidationService::new().unwrap();
        let mut candidate = spatial(0.5, 0.5);

        for ms in [0.4, 299_999.6] {
            candidate.metadata = Some(json!({
                "timeToAnswerMs": ms, "confidence": 0.5,
                "device": {"class": "desktop", "input": "mouse"}
            }));
            let response = service.validate(&candidate).unwrap();
            assert_eq!(response.metadata.time_to_answer_ms, ms);
        }

        for ms in [0.0, -0.5, 300_000.0] {
            candidate.metadata = Some(json!({
                "timeToAnswerMs": ms, "confidence": 0.5,
                "device": {"class": "desktop", "input": "mouse"}
            }));
            assert_eq!(field_of(service.validate(&candidate)), "metadata.timeToAnswerMs");
        }
    }

    #[test]
    fn keeps_caller_supplied_id_and_timestamp() {
        let service = ValidationService::new().unwrap();
        let mut candidate = spatial(0.5, 0.5);
        let ts = Utc::now() - chrono::Duration::hours(1);
        candidate.id = Some("r-1".into());
        candidate.timestamp = Some(ts);
        let response = service.validate(&candidate).unwrap();
        assert_eq!(response.id, "r-1");
        assert_eq!(response.timestamp, ts);
    }
}
