use download_notifier_rust::{
    config::{LogConfig, DEFAULT_CONFIG_PATH},
    detector::{display_name, format_size},
    logging, AppConfig, DetectionEvent, DetectionService, EventCallback,
};
use std::sync::Arc;
use tracing::{info, warn};

/// 加载日志配置
///
/// 日志系统初始化之前调用，失败时返回默认配置
async fn load_log_config(config_path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(config_path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

/// 把检测结果写入日志
fn log_event(event: DetectionEvent) {
    match event {
        DetectionEvent::DownloadCompleted { outcome } => {
            info!(
                "📥 下载完成: {} ({}, 用时 {:.1}s)",
                outcome.file_name(),
                format_size(outcome.size),
                outcome.duration_secs
            );
        }
        DetectionEvent::DownloadAbandoned { outcome, reason } => {
            warn!(
                "下载未完成: {} ({}, 原因: {})",
                outcome.file_name(),
                format_size(outcome.size),
                reason.as_str()
            );
        }
        DetectionEvent::RootDegraded { root, reason } => {
            warn!("⚠️ 监控目录不可用: {} ({})", display_name(&root), reason);
        }
        DetectionEvent::RootRecovered { root } => {
            info!("监控目录已恢复: {:?}", root);
        }
        DetectionEvent::StateChanged { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // 先加载日志配置（必须保持 _log_guard 存活）
    let log_config = load_log_config(&config_path).await;
    let _log_guard = logging::init_logging(&log_config);

    info!(
        "Download Notifier v{} 启动中...",
        env!("CARGO_PKG_VERSION")
    );

    let config = AppConfig::load_or_default(&config_path).await;

    let service = DetectionService::new(config.monitor);
    let callback: EventCallback = Arc::new(log_event);
    service.add_event_callback(callback);
    service.start()?;

    tokio::signal::ctrl_c().await?;
    info!("收到 Ctrl+C，开始优雅关闭...");

    service.stop();
    service.join().await;
    info!("应用已安全退出");

    Ok(())
}
