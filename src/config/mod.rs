// 配置管理模块

pub mod path_validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

pub use path_validator::{PathValidationResult, PathValidator};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 监控配置
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 最多保留的日志文件数（默认 20 个）
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 10MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_max_files() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            max_files: default_log_max_files(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 监控配置
///
/// 时间参数以秒 / 毫秒为单位保存，使用时通过对应的 `Duration` 访问器读取
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// 监控目录列表
    #[serde(default = "default_monitored_paths")]
    pub monitored_paths: Vec<PathBuf>,
    /// 是否递归监控子目录
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// 最小文件大小（字节），低于该值的文件不通知
    #[serde(default = "default_min_file_size_bytes")]
    pub min_file_size_bytes: u64,
    /// 静默期（秒）：大小连续不变超过该时长视为下载完成
    #[serde(default = "default_quiet_period_secs")]
    pub quiet_period_secs: u64,
    /// 绝对处理超时（秒）
    #[serde(default = "default_absolute_timeout_secs")]
    pub absolute_timeout_secs: u64,
    /// 临时文件扩展名
    #[serde(default = "default_temporary_extensions")]
    pub temporary_extensions: Vec<String>,
    /// 伴随元数据文件扩展名
    #[serde(default = "default_companion_extensions")]
    pub companion_extensions: Vec<String>,
    /// 临时文件名前缀
    #[serde(default = "default_temporary_prefixes")]
    pub temporary_prefixes: Vec<String>,
    /// 临时文件名中间标记（如 `video_downloading.mp4`）
    #[serde(default = "default_temporary_infixes")]
    pub temporary_infixes: Vec<String>,
    /// 是否将隐藏文件（以 . 开头）视为临时文件
    #[serde(default = "default_ignore_hidden")]
    pub ignore_hidden: bool,
    /// 采样周期（毫秒）
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// 单次采样 I/O 超时（毫秒）
    #[serde(default = "default_sample_timeout_ms")]
    pub sample_timeout_ms: u64,
    /// 同一路径修改事件的合并窗口（毫秒）
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    /// 事件队列容量
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// 临时文件占位记录的空闲回收时间（秒）
    #[serde(default = "default_idle_gc_secs")]
    pub idle_gc_secs: u64,
    /// 每个文件保留的大小历史条数
    #[serde(default = "default_size_history_len")]
    pub size_history_len: usize,
    /// 伴随文件最大读取字节数
    #[serde(default = "default_companion_max_bytes")]
    pub companion_max_bytes: u64,
    /// 降级目录重新检查间隔（秒）
    #[serde(default = "default_root_recheck_secs")]
    pub root_recheck_secs: u64,
}

fn default_monitored_paths() -> Vec<PathBuf> {
    vec![dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads"))]
}

fn default_recursive() -> bool {
    true
}

fn default_min_file_size_bytes() -> u64 {
    1024 * 1024 // 1MB
}

fn default_quiet_period_secs() -> u64 {
    5
}

fn default_absolute_timeout_secs() -> u64 {
    300
}

fn default_temporary_extensions() -> Vec<String> {
    [
        "tmp",
        "crdownload",
        "part",
        "download",
        "filepart",
        "idm",
        "idm.tmp",
        "idm.bak",
        "dwnl",
        "inprogress",
        "downloading",
        "temp",
        "partial",
        "resume",
        "unconfirmed",
        "opdownload",
        "!ut",
        "td",
        "crswap",
        "swp",
        "lock",
        "~",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_companion_extensions() -> Vec<String> {
    vec!["meta".to_string(), "info".to_string()]
}

fn default_temporary_prefixes() -> Vec<String> {
    vec![
        "downloading_".to_string(),
        "temp_".to_string(),
        "~".to_string(),
    ]
}

fn default_temporary_infixes() -> Vec<String> {
    vec!["_downloading".to_string()]
}

fn default_ignore_hidden() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    2000
}

fn default_sample_timeout_ms() -> u64 {
    1500
}

fn default_coalesce_window_ms() -> u64 {
    500
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_idle_gc_secs() -> u64 {
    1800
}

fn default_size_history_len() -> usize {
    16
}

fn default_companion_max_bytes() -> u64 {
    64 * 1024
}

fn default_root_recheck_secs() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitored_paths: default_monitored_paths(),
            recursive: default_recursive(),
            min_file_size_bytes: default_min_file_size_bytes(),
            quiet_period_secs: default_quiet_period_secs(),
            absolute_timeout_secs: default_absolute_timeout_secs(),
            temporary_extensions: default_temporary_extensions(),
            companion_extensions: default_companion_extensions(),
            temporary_prefixes: default_temporary_prefixes(),
            temporary_infixes: default_temporary_infixes(),
            ignore_hidden: default_ignore_hidden(),
            tick_interval_ms: default_tick_interval_ms(),
            sample_timeout_ms: default_sample_timeout_ms(),
            coalesce_window_ms: default_coalesce_window_ms(),
            event_queue_capacity: default_event_queue_capacity(),
            idle_gc_secs: default_idle_gc_secs(),
            size_history_len: default_size_history_len(),
            companion_max_bytes: default_companion_max_bytes(),
            root_recheck_secs: default_root_recheck_secs(),
        }
    }
}

impl MonitorConfig {
    /// 验证配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.monitored_paths.is_empty() {
            anyhow::bail!("至少需要配置一个监控目录 (monitored_paths)");
        }
        if self.quiet_period_secs == 0 {
            anyhow::bail!("静默期 quiet_period_secs 必须大于 0");
        }
        if self.absolute_timeout_secs <= self.quiet_period_secs {
            anyhow::bail!(
                "绝对超时 absolute_timeout_secs ({}) 必须大于静默期 quiet_period_secs ({})",
                self.absolute_timeout_secs,
                self.quiet_period_secs
            );
        }
        if self.tick_interval_ms == 0 {
            anyhow::bail!("采样周期 tick_interval_ms 必须大于 0");
        }
        if self.sample_timeout_ms == 0 {
            anyhow::bail!("采样超时 sample_timeout_ms 必须大于 0");
        }
        if self.event_queue_capacity == 0 {
            anyhow::bail!("事件队列容量 event_queue_capacity 必须大于 0");
        }
        if self.size_history_len < 2 {
            anyhow::bail!("大小历史条数 size_history_len 至少为 2");
        }

        if self.sample_timeout_ms >= self.tick_interval_ms {
            tracing::warn!(
                "⚠️ 采样超时 ({}ms) 不小于采样周期 ({}ms)，慢速设备可能导致采样堆积",
                self.sample_timeout_ms,
                self.tick_interval_ms
            );
        }

        tracing::debug!("✓ 监控配置验证通过: {} 个目录", self.monitored_paths.len());
        Ok(())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }

    pub fn absolute_timeout(&self) -> Duration {
        Duration::from_secs(self.absolute_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn idle_gc(&self) -> Duration {
        Duration::from_secs(self.idle_gc_secs)
    }

    pub fn root_recheck(&self) -> Duration {
        Duration::from_secs(self.root_recheck_secs)
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .monitor
            .validate()
            .context("配置文件中的监控参数验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.monitor
            .validate()
            .context("保存配置失败：监控参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    ///
    /// 仅在配置文件不存在时写入默认配置，已有但无效的配置文件不会被覆盖
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if !matches!(fs::try_exists(path).await, Ok(true)) {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {:#}", e);
                    }
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.monitor.min_file_size_bytes, 1024 * 1024);
        assert_eq!(config.monitor.quiet_period_secs, 5);
        assert_eq!(config.monitor.absolute_timeout_secs, 300);
        assert_eq!(config.monitor.temporary_extensions.len(), 22);
        assert_eq!(config.monitor.monitored_paths.len(), 1);
        assert!(config.monitor.validate().is_ok());
        assert_eq!(config.log.level, "info");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.monitor.quiet_period_secs = 9;
        config.monitor.companion_extensions = vec!["meta".to_string()];
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.monitor.quiet_period_secs, 9);
        assert_eq!(loaded.monitor.companion_extensions, vec!["meta".to_string()]);
        assert_eq!(loaded.log.max_files, config.log.max_files);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [monitor]
            monitored_paths = ["/data/downloads"]
            min_file_size_bytes = 0
            "#,
        )
        .unwrap();

        assert_eq!(
            config.monitor.monitored_paths,
            vec![PathBuf::from("/data/downloads")]
        );
        assert_eq!(config.monitor.min_file_size_bytes, 0);
        assert_eq!(config.monitor.tick_interval_ms, 2000);
        assert!(config.monitor.recursive);
        assert!(config.log.enabled);
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();
        assert!(config.validate().is_ok());

        config.quiet_period_secs = 0;
        assert!(config.validate().is_err());

        config.quiet_period_secs = 10;
        config.absolute_timeout_secs = 10;
        assert!(config.validate().is_err());

        config.absolute_timeout_secs = 60;
        config.monitored_paths.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = MonitorConfig::default();
        assert_eq!(config.quiet_period(), Duration::from_secs(5));
        assert_eq!(config.tick_interval(), Duration::from_millis(2000));
        assert_eq!(config.sample_timeout(), Duration::from_millis(1500));
        assert_eq!(config.coalesce_window(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_load_or_default_keeps_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        let path_str = path.to_str().unwrap();

        // 不存在：写入默认配置
        let config = AppConfig::load_or_default(path_str).await;
        assert_eq!(config.monitor.quiet_period_secs, 5);
        assert!(path.exists());

        // 已存在但无效：不覆盖
        tokio::fs::write(&path, "[monitor]\nquiet_period_secs = 0\n")
            .await
            .unwrap();
        let _ = AppConfig::load_or_default(path_str).await;
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("quiet_period_secs = 0"));
    }
}
