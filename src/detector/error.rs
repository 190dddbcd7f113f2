//! 检测错误类型
//!
//! 所有错误都在产生它的组件边界被吸收，转换为状态迁移或日志事件，
//! 不会向上冒泡到事件/轮询循环之外

use std::path::PathBuf;
use thiserror::Error;

/// 文件访问失败的具体原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessFailure {
    /// 文件不存在
    Missing,
    /// 权限不足（可能被其他程序锁定）
    PermissionDenied,
    /// I/O 超时（慢速存储）
    TimedOut,
    /// 路径不是普通文件
    NotAFile,
    /// 其他 I/O 错误
    Other(String),
}

impl std::fmt::Display for AccessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessFailure::Missing => write!(f, "文件不存在"),
            AccessFailure::PermissionDenied => write!(f, "权限不足"),
            AccessFailure::TimedOut => write!(f, "I/O 超时"),
            AccessFailure::NotAFile => write!(f, "不是普通文件"),
            AccessFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<&std::io::Error> for AccessFailure {
    fn from(e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => AccessFailure::Missing,
            std::io::ErrorKind::PermissionDenied => AccessFailure::PermissionDenied,
            std::io::ErrorKind::TimedOut => AccessFailure::TimedOut,
            _ => AccessFailure::Other(e.to_string()),
        }
    }
}

/// 检测错误
#[derive(Debug, Error)]
pub enum DetectError {
    /// 采样失败（暂时性，下一轮重试）
    #[error("文件不可访问: {path:?} ({kind})")]
    NotAccessible { path: PathBuf, kind: AccessFailure },

    /// 监控目录缺失或不可读
    #[error("监控目录不可用: {root:?}: {reason}")]
    RootUnavailable { root: PathBuf, reason: String },

    /// 伴随元数据无法解析
    #[error("伴随元数据无法解析: {path:?}: {reason}")]
    MalformedCompanion { path: PathBuf, reason: String },
}

impl DetectError {
    pub fn not_accessible(path: impl Into<PathBuf>, kind: AccessFailure) -> Self {
        DetectError::NotAccessible {
            path: path.into(),
            kind,
        }
    }

    /// 是否表示文件已消失
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            DetectError::NotAccessible {
                kind: AccessFailure::Missing,
                ..
            }
        )
    }

    /// 路径存在但不是普通文件（目录、设备等）
    pub fn is_not_a_file(&self) -> bool {
        matches!(
            self,
            DetectError::NotAccessible {
                kind: AccessFailure::NotAFile,
                ..
            }
        )
    }
}
