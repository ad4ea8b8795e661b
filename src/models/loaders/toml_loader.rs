use crate::models::response::ResponseCandidate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 一个待导入的回答文件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseFile {
    #[serde(default)]
    pub responses: Vec<ResponseCandidate>,
    #[serde(skip_serializing, skip_deserializing)]
    pub file_path: Option<String>,
}

/// 从 TOML / JSON 文件加载待提交的回答
pub async fn load_response_file(file_path: &Path) -> Result<ResponseFile> {
    let content = fs::read_to_string(file_path)
        .await
        .with_context(|| format!("无法读取文件: {}", file_path.display()))?;

    let mut file: ResponseFile = match extension(file_path) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("无法解析JSON文件: {}", file_path.display()))?,
        _ => toml::from_str(&content)
            .with_context(|| format!("无法解析TOML文件: {}", file_path.display()))?,
    };

    // 设置文件路径
    file.file_path = Some(file_path.to_string_lossy().to_string());

    Ok(file)
}

/// 从文件夹中加载所有回答文件
///
/// 解析失败的文件只记录警告并跳过
pub async fn load_all_response_files(folder_path: &str) -> Result<Vec<ResponseFile>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if matches!(extension(&path), Some("toml") | Some("json")) {
            paths.push(path);
        }
    }
    // 按文件名排序，保证入队顺序稳定
    paths.sort();

    let mut files = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_response_file(&path).await {
            Ok(file) => {
                tracing::info!("成功加载 {} 条回答", file.responses.len());
                files.push(file);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(files)
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|s| s.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_toml_and_json_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.toml"),
            r#"
[[responses]]
userId = "alice"
questionId = "q1"
value = { type = "spatial", x = 0.2, y = 0.8 }
metadata = { timeToAnswerMs = 1200, interactionCount = 2, confidence = 0.5, device = { class = "desktop", input = "mouse" } }
"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"responses":[{"userId":"bob","questionId":"q2","value":{"type":"categorical","selectedOption":"tea"}}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "responses = 3").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = load_all_response_files(dir.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].responses[0].user_id, "alice");
        assert_eq!(files[1].responses[0].question_id, "q2");
        assert!(files[0].file_path.as_deref().unwrap().ends_with("a.toml"));
    }

    #[tokio::test]
    async fn missing_folder_is_an_error() {
        assert!(load_all_response_files("/definitely/not/here").await.is_err());
    }
}
