//! 日志系统配置
//!
//! 支持控制台输出和文件持久化。日志文件按启动时间命名、按大小滚动，
//! 启动时按保留天数和最大文件数清理旧日志

use crate::config::LogConfig;
use chrono::Local;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "download-notifier.";
/// 日志文件名后缀
const LOG_FILE_SUFFIX: &str = ".log";
/// 时间戳格式
const TIMER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 滚动日志写入器（内部状态）
struct RotatingLogInner {
    /// 启动时间戳（格式：YYYY-MM-DD-HHMMSS）
    start_timestamp: String,
    log_dir: PathBuf,
    current_file: Option<File>,
    /// 当前文件序号（0 为基础文件）
    current_index: u32,
    max_file_size: u64,
    current_size: u64,
}

impl RotatingLogInner {
    fn new(log_dir: PathBuf, max_file_size: u64, start_timestamp: String) -> io::Result<Self> {
        let mut inner = Self {
            start_timestamp,
            log_dir,
            current_file: None,
            current_index: 0,
            max_file_size,
            current_size: 0,
        };
        inner.open_current()?;
        Ok(inner)
    }

    /// 日志文件路径：download-notifier.<时间戳>.log / download-notifier.<时间戳>_N.log
    fn file_path(&self, index: u32) -> PathBuf {
        let filename = if index == 0 {
            format!("{}{}{}", LOG_FILE_PREFIX, self.start_timestamp, LOG_FILE_SUFFIX)
        } else {
            format!(
                "{}{}_{}{}",
                LOG_FILE_PREFIX, self.start_timestamp, index, LOG_FILE_SUFFIX
            )
        };
        self.log_dir.join(filename)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let path = self.file_path(self.current_index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        // 同一秒内重启时追加写入，已有内容计入大小
        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current_file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.current_file.take() {
            file.flush()?;
        }
        self.current_index += 1;
        self.open_current()
    }

    fn write_data(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件不滚动，超长单行也要写得进去
        if self.current_size > 0 && self.current_size + buf.len() as u64 > self.max_file_size {
            self.rotate()?;
        }

        match &mut self.current_file {
            Some(file) => {
                let written = file.write(buf)?;
                self.current_size += written as u64;
                Ok(written)
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "日志文件未打开")),
        }
    }

    fn flush_file(&mut self) -> io::Result<()> {
        if let Some(file) = &mut self.current_file {
            file.flush()?;
        }
        Ok(())
    }
}

/// 按大小滚动的日志写入器
///
/// 实现了 Write trait，作为 non_blocking 写入线程的输出目标
#[derive(Clone)]
pub struct RotatingLogWriter {
    inner: Arc<Mutex<RotatingLogInner>>,
}

impl RotatingLogWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let start_timestamp = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        Self::with_timestamp(log_dir, max_file_size, start_timestamp)
    }

    fn with_timestamp(
        log_dir: PathBuf,
        max_file_size: u64,
        start_timestamp: String,
    ) -> io::Result<Self> {
        let inner = RotatingLogInner::new(log_dir, max_file_size, start_timestamp)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// 当前写入的文件路径
    pub fn current_path(&self) -> PathBuf {
        let inner = self.inner.lock();
        inner.file_path(inner.current_index)
    }
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write_data(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush_file()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// 文件输出初始化失败时回退到仅控制台输出，不会阻止程序启动
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(true);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    }

    let writer = fs::create_dir_all(&config.log_dir)
        .and_then(|_| RotatingLogWriter::new(config.log_dir.clone(), config.max_file_size));

    let writer = match writer {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!(
                "初始化日志文件失败: {:?}, 错误: {}，回退到仅控制台输出",
                config.log_dir, e
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .init();
            return LogGuard { _file_guard: None };
        }
    };

    let current = writer.current_path();
    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);

    // 文件输出层（不带 ANSI 颜色）
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 最多文件数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.max_files,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days, config.max_files, &current);
    if removed > 0 {
        info!("已清理 {} 个旧日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 清理旧日志文件，返回删除的文件数
///
/// 超过保留天数的文件删除；剩余文件按修改时间从新到旧保留 `max_files` 个。
/// 当前正在写入的文件不会被删除
fn cleanup_old_logs(log_dir: &Path, retention_days: u32, max_files: usize, current: &Path) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let retention = std::time::Duration::from_secs(retention_days as u64 * 24 * 3600);

    let mut kept: Vec<(PathBuf, SystemTime)> = Vec::new();
    let mut expired: Vec<PathBuf> = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path == current || !is_log_file(&path) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(now);

        let age = now.duration_since(modified).unwrap_or_default();
        if age > retention {
            expired.push(path);
        } else {
            kept.push((path, modified));
        }
    }

    // 当前文件占用一个名额
    kept.sort_by(|a, b| b.1.cmp(&a.1));
    let quota = max_files.saturating_sub(1);
    if kept.len() > quota {
        expired.extend(kept.drain(quota..).map(|(path, _)| path));
    }

    let mut deleted = 0;
    for path in expired {
        match fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                tracing::debug!("已删除旧日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除旧日志文件失败: {:?}, 错误: {}", path, e),
        }
    }
    deleted
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(LOG_FILE_SUFFIX))
        .unwrap_or(false)
}
