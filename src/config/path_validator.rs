// 监控目录验证模块

use crate::detector::DetectError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 路径验证结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathValidationResult {
    /// 路径是否完全可用
    pub valid: bool,
    /// 路径是否存在
    pub exists: bool,
    /// 是否是目录
    pub is_directory: bool,
    /// 目录是否可读
    pub is_readable: bool,
    /// 验证消息
    pub message: String,
    /// 详细错误信息（如果有）
    pub details: Option<String>,
}

impl PathValidationResult {
    /// 创建一个成功的验证结果
    pub fn success() -> Self {
        Self {
            valid: true,
            exists: true,
            is_directory: true,
            is_readable: true,
            message: "路径验证通过".to_string(),
            details: None,
        }
    }

    /// 创建一个失败的验证结果
    pub fn failure(message: String, details: Option<String>) -> Self {
        Self {
            valid: false,
            exists: false,
            is_directory: false,
            is_readable: false,
            message,
            details,
        }
    }

    /// 失败原因（消息 + 详情）
    pub fn reason(&self) -> String {
        match &self.details {
            Some(details) => format!("{}: {}", self.message, details),
            None => self.message.clone(),
        }
    }
}

/// 路径验证器
pub struct PathValidator;

impl PathValidator {
    /// 验证路径是否可作为监控目录
    ///
    /// 执行以下检查：
    /// 1. 路径是否存在
    /// 2. 路径是否为目录
    /// 3. 目录是否可读（能否列出内容）
    pub fn validate(path: &Path) -> PathValidationResult {
        // 1. 检查路径是否存在
        if !path.exists() {
            return PathValidationResult::failure(
                "路径不存在".to_string(),
                Some(format!("监控目录 {:?} 不存在", path)),
            );
        }

        // 2. 检查是否是目录
        if !path.is_dir() {
            return PathValidationResult {
                valid: false,
                exists: true,
                is_directory: false,
                is_readable: false,
                message: "路径不是目录".to_string(),
                details: Some(format!("路径 {:?} 不是一个目录，请指定目录路径", path)),
            };
        }

        // 3. 检查是否可读
        if let Err(e) = fs::read_dir(path) {
            return PathValidationResult {
                valid: false,
                exists: true,
                is_directory: true,
                is_readable: false,
                message: "路径不可读".to_string(),
                details: Some(format!("无法读取目录 {:?}: {}", path, e)),
            };
        }

        PathValidationResult::success()
    }

    /// 验证监控目录并返回规范化路径
    ///
    /// 规范化使用 dunce，Windows 下不会产生 `\\?\` 前缀
    pub fn validate_root(path: &Path) -> Result<PathBuf, DetectError> {
        let result = Self::validate(path);
        if !result.valid {
            return Err(DetectError::RootUnavailable {
                root: path.to_path_buf(),
                reason: result.reason(),
            });
        }

        dunce::canonicalize(path).map_err(|e| DetectError::RootUnavailable {
            root: path.to_path_buf(),
            reason: format!("无法规范化路径: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_validate_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = PathValidator::validate(temp_dir.path());

        assert!(result.valid, "验证应该通过");
        assert!(result.exists, "路径应该存在");
        assert!(result.is_directory, "路径应该是目录");
        assert!(result.is_readable, "路径应该可读");
    }

    #[test]
    fn test_validate_non_existing_path() {
        let path = Path::new("/non/existing/path/12345");
        let result = PathValidator::validate(path);

        assert!(!result.valid, "验证应该失败");
        assert!(!result.exists, "路径不应该存在");
        assert_eq!(result.message, "路径不存在");
    }

    #[test]
    fn test_validate_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test_file.txt");
        fs::write(&file_path, "test").unwrap();

        let result = PathValidator::validate(&file_path);

        assert!(!result.valid, "验证应该失败");
        assert!(result.exists, "路径应该存在");
        assert!(!result.is_directory, "路径不应该是目录");
        assert_eq!(result.message, "路径不是目录");
    }

    #[test]
    fn test_validate_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = PathValidator::validate_root(temp_dir.path()).unwrap();
        assert!(root.is_absolute());
        assert_eq!(root, dunce::canonicalize(temp_dir.path()).unwrap());

        let err = PathValidator::validate_root(&temp_dir.path().join("missing")).unwrap_err();
        match err {
            DetectError::RootUnavailable { reason, .. } => assert!(reason.contains("路径不存在")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
