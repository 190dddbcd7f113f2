//! 伴随元数据文件
//!
//! 部分下载器会在下载文件旁写入 `.meta` / `.info` 等小文件，其中记录了文件总大小。
//! 本模块负责：
//! - 伴随文件名 -> 下载文件路径的映射
//! - 下载文件 -> 可能存在的伴随文件路径
//! - 从伴随文件内容中提取预期大小（JSON 字段或纯文本模式）
//!
//! 无法识别的内容一律视为“没有预期大小”，不会中断追踪

use super::classifier::PatternClassifier;
use super::error::{AccessFailure, DetectError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// JSON 中可能表示总大小的字段（按优先级）
const SIZE_KEYS: [&str; 5] = ["size", "total_size", "content_length", "filesize", "length"];

/// 纯文本中的大小模式（大小写不敏感），首次使用时编译
static SIZE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)size[:=\s"]*(\d+)"#,
        r#"(?i)length[:=\s"]*(\d+)"#,
        r#"(?i)bytes[:=\s"]*(\d+)"#,
        r#"(?i)total[:=\s"]*(\d+)"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// 伴随文件对应的下载文件路径
pub fn base_path_for(classifier: &PatternClassifier, companion_path: &Path) -> Option<PathBuf> {
    let name = companion_path.file_name()?.to_str()?;
    let base = classifier.companion_base(name)?;
    Some(companion_path.with_file_name(base))
}

/// 下载文件可能存在的伴随文件路径
///
/// 依次为 `<name>.<ext>`、`.<name>.<ext>`、`<stem>.<ext>`、`.<stem>.<ext>`
pub fn candidate_companions(classifier: &PatternClassifier, base_path: &Path) -> Vec<PathBuf> {
    let name = match base_path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Vec::new(),
    };
    let stem = base_path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| *s != name);

    let mut paths = Vec::new();
    for suffix in classifier.companion_suffixes() {
        paths.push(base_path.with_file_name(format!("{}{}", name, suffix)));
        paths.push(base_path.with_file_name(format!(".{}{}", name, suffix)));
        if let Some(stem) = stem {
            paths.push(base_path.with_file_name(format!("{}{}", stem, suffix)));
            paths.push(base_path.with_file_name(format!(".{}{}", stem, suffix)));
        }
    }
    paths
}

/// 从伴随文件内容中解析预期大小
///
/// 依次尝试 JSON 对象字段、JSON 顶层数值、纯文本模式。大小为 0 视为无效
pub fn parse_expected_size(content: &str) -> Result<u64, String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
        if let Some(size) = json_size(&value) {
            return Ok(size);
        }
    }

    for re in SIZE_PATTERNS.iter() {
        let found = re
            .captures_iter(content)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().parse::<u64>().ok())
            .find(|s| *s > 0);
        if let Some(size) = found {
            return Ok(size);
        }
    }

    Err("未找到大小信息".to_string())
}

fn json_size(value: &serde_json::Value) -> Option<u64> {
    use serde_json::Value;

    let as_size = |v: &Value| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match value {
        Value::Object(obj) => SIZE_KEYS
            .iter()
            .filter_map(|key| obj.get(*key))
            .filter_map(as_size)
            .find(|s| *s > 0),
        other => as_size(other).filter(|s| *s > 0),
    }
}

/// 读取伴随文件并解析预期大小
///
/// 最多读取 `max_bytes` 字节，整个读取过程受 `io_timeout` 限制
pub async fn read_expected_size(
    path: &Path,
    max_bytes: u64,
    io_timeout: Duration,
) -> Result<u64, DetectError> {
    let read = async {
        let file = tokio::fs::File::open(path).await?;
        let mut buf = Vec::new();
        file.take(max_bytes).read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };

    let bytes = match tokio::time::timeout(io_timeout, read).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return Err(DetectError::not_accessible(path, AccessFailure::from(&e))),
        Err(_) => return Err(DetectError::not_accessible(path, AccessFailure::TimedOut)),
    };

    let content = String::from_utf8_lossy(&bytes);
    parse_expected_size(&content).map_err(|reason| DetectError::MalformedCompanion {
        path: path.to_path_buf(),
        reason,
    })
}

/// 在下载文件所在目录中查找伴随文件并读取预期大小
///
/// 返回第一个能成功解析的伴随文件。存在性检查同样受 `io_timeout` 限制，
/// 超时说明所在设备无响应，直接放弃剩余候选
pub async fn probe_expected_size(
    classifier: &PatternClassifier,
    base_path: &Path,
    max_bytes: u64,
    io_timeout: Duration,
) -> Option<(PathBuf, u64)> {
    for candidate in candidate_companions(classifier, base_path) {
        match tokio::time::timeout(io_timeout, tokio::fs::try_exists(&candidate)).await {
            Ok(Ok(true)) => {}
            Ok(_) => continue,
            Err(_) => {
                debug!("检查伴随文件超时，放弃查找: {:?}", candidate);
                return None;
            }
        }
        match read_expected_size(&candidate, max_bytes, io_timeout).await {
            Ok(size) => return Some((candidate, size)),
            Err(e) => debug!("伴随文件无效，忽略: {}", e),
        }
    }
    None
}
