//! 检测模块数据类型定义
//!
//! 包含文件分类、追踪状态、下载结果以及对外推送的检测事件

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

/// 文件名分类结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    /// 下载中的临时文件（.crdownload / .part 等）
    Temporary,
    /// 伴随元数据文件（记录预期大小）
    CompanionMetadata,
    /// 可追踪的候选文件
    Candidate,
}

impl FileClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileClass::Temporary => "temporary",
            FileClass::CompanionMetadata => "companion_metadata",
            FileClass::Candidate => "candidate",
        }
    }
}

/// 追踪状态
///
/// Completed / Abandoned / Ignored 为终态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackerState {
    /// 刚发现，样本不足
    Pending,
    /// 大小仍在增长
    Growing,
    /// 大小未变化，稳定计时中
    Stabilizing,
    /// 已完成
    Completed,
    /// 已放弃（消失或超时）
    Abandoned,
    /// 已忽略（临时文件或低于最小大小）
    Ignored,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Pending => "pending",
            TrackerState::Growing => "growing",
            TrackerState::Stabilizing => "stabilizing",
            TrackerState::Completed => "completed",
            TrackerState::Abandoned => "abandoned",
            TrackerState::Ignored => "ignored",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackerState::Completed | TrackerState::Abandoned | TrackerState::Ignored
        )
    }
}

impl std::fmt::Display for TrackerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 放弃原因
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// 文件在追踪过程中消失
    Disappeared,
    /// 超过绝对处理超时
    Timeout,
    /// 所在监控目录不可用
    RootLost,
}

impl AbandonReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbandonReason::Disappeared => "disappeared",
            AbandonReason::Timeout => "timeout",
            AbandonReason::RootLost => "root_lost",
        }
    }
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文件元信息（采样器返回值）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// 文件大小（字节）
    pub size: u64,
    /// 修改时间（部分平台可能不可用）
    pub modified: Option<SystemTime>,
}

/// 单次大小采样
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSample {
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// 采样时刻
    pub at: Instant,
}

impl SizeSample {
    pub fn new(stat: FileStat, at: Instant) -> Self {
        Self {
            size: stat.size,
            modified: stat.modified,
            at,
        }
    }
}

/// 下载结果（进入 Completed 或 Abandoned 时产生一次）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// 结果 ID
    pub id: String,
    /// 文件路径
    pub path: PathBuf,
    /// 最终大小（字节）
    pub size: u64,
    /// 从首次发现到结束的耗时（秒）
    pub duration_secs: f64,
    /// 文件分类
    pub classification: FileClass,
    /// 伴随文件中的预期大小
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
    /// 最终大小是否与预期大小匹配
    pub matched_expected_size: bool,
    /// 结束时间 (Unix timestamp)
    pub finished_at: i64,
}

impl DownloadOutcome {
    pub fn new(
        path: PathBuf,
        size: u64,
        duration: Duration,
        classification: FileClass,
        expected_size: Option<u64>,
        matched_expected_size: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path,
            size,
            duration_secs: duration.as_secs_f64(),
            classification,
            expected_size,
            matched_expected_size,
            finished_at: chrono::Utc::now().timestamp(),
        }
    }

    /// 文件名（用于日志）
    pub fn file_name(&self) -> String {
        display_name(&self.path)
    }
}

/// 检测事件
///
/// 推送给外部消费者（通知、活动日志、统计）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DetectionEvent {
    /// 下载完成
    DownloadCompleted { outcome: DownloadOutcome },
    /// 下载放弃
    DownloadAbandoned {
        outcome: DownloadOutcome,
        reason: AbandonReason,
    },
    /// 状态变化（活动日志）
    StateChanged {
        path: PathBuf,
        from: TrackerState,
        to: TrackerState,
        detail: String,
    },
    /// 监控目录降级
    RootDegraded { root: PathBuf, reason: String },
    /// 监控目录恢复
    RootRecovered { root: PathBuf },
}

impl DetectionEvent {
    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            DetectionEvent::DownloadCompleted { .. } => "download_completed",
            DetectionEvent::DownloadAbandoned { .. } => "download_abandoned",
            DetectionEvent::StateChanged { .. } => "state_changed",
            DetectionEvent::RootDegraded { .. } => "root_degraded",
            DetectionEvent::RootRecovered { .. } => "root_recovered",
        }
    }

    /// 获取事件关联的路径
    pub fn path(&self) -> &Path {
        match self {
            DetectionEvent::DownloadCompleted { outcome } => &outcome.path,
            DetectionEvent::DownloadAbandoned { outcome, .. } => &outcome.path,
            DetectionEvent::StateChanged { path, .. } => path,
            DetectionEvent::RootDegraded { root, .. } => root,
            DetectionEvent::RootRecovered { root } => root,
        }
    }

    /// 是否为终态结果事件
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            DetectionEvent::DownloadCompleted { .. } | DetectionEvent::DownloadAbandoned { .. }
        )
    }
}

/// 取路径的文件名部分，失败时返回完整路径
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// 格式化字节数
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{} bytes", bytes)
    }
}
