//! 下载完成检测核心
//!
//! - `classifier`: 文件名分类
//! - `companion`: 伴随元数据文件解析
//! - `sampler`: 文件大小采样
//! - `tracker`: 单个文件的状态机

pub mod classifier;
pub mod companion;
pub mod error;
pub mod sampler;
pub mod tracker;
pub mod types;

pub use classifier::PatternClassifier;
pub use error::{AccessFailure, DetectError};
pub use sampler::{FsSizeSampler, SizeSampler};
pub use tracker::{CandidateTracker, TrackerSettings, Transition};
pub use types::{
    display_name, format_size, AbandonReason, DetectionEvent, DownloadOutcome, FileClass,
    FileStat, SizeSample, TrackerState,
};
