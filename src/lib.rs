// Download Notifier Rust Library
// 下载完成检测核心库

// 配置管理模块
pub mod config;

// 检测领域模型（分类、采样、追踪状态机）
pub mod detector;

// 检测引擎与后台服务
pub mod engine;

// 日志系统
pub mod logging;

// 目录监控模块
pub mod watcher;

// 导出常用类型
pub use config::{AppConfig, LogConfig, MonitorConfig};
pub use detector::{
    AbandonReason, DetectError, DetectionEvent, DownloadOutcome, FileClass, TrackerState,
};
pub use engine::{DetectionEngine, DetectionService, EventCallback, ServiceStatus};
pub use watcher::{DirectoryWatcher, WatchEvent};
