//! 检测服务
//!
//! 单个后台任务持有检测引擎、目录监控器和采样定时器，
//! 通过 `select!` 串行处理文件事件、周期采样和降级目录重新检查

use super::DetectionEngine;
use crate::config::MonitorConfig;
use crate::detector::{DetectionEvent, FsSizeSampler, SizeSampler};
use crate::watcher::{DirectoryWatcher, WatchEvent};
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 事件回调类型
///
/// 回调在后台任务中同步执行，应尽快返回
pub type EventCallback = Arc<dyn Fn(DetectionEvent) + Send + Sync>;

/// 服务状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// 是否正在运行
    pub running: bool,
    /// 未结束的追踪器数量
    pub active_trackers: usize,
    /// 降级的监控目录
    pub degraded_roots: Vec<PathBuf>,
}

/// 检测服务
pub struct DetectionService<S: SizeSampler + 'static = FsSizeSampler> {
    config: MonitorConfig,
    /// 启动时移交给后台任务
    sampler: Mutex<Option<S>>,
    event_callbacks: Arc<RwLock<Vec<EventCallback>>>,
    cancel_token: CancellationToken,
    status_tx: Arc<watch::Sender<ServiceStatus>>,
    status_rx: watch::Receiver<ServiceStatus>,
    handle: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl DetectionService<FsSizeSampler> {
    /// 使用本地文件系统采样器创建服务
    pub fn new(config: MonitorConfig) -> Self {
        let sampler = FsSizeSampler::new(config.sample_timeout());
        Self::with_sampler(config, sampler)
    }
}

impl<S: SizeSampler + 'static> DetectionService<S> {
    pub fn with_sampler(config: MonitorConfig, sampler: S) -> Self {
        let (status_tx, status_rx) = watch::channel(ServiceStatus::default());
        Self {
            config,
            sampler: Mutex::new(Some(sampler)),
            event_callbacks: Arc::new(RwLock::new(Vec::new())),
            cancel_token: CancellationToken::new(),
            status_tx: Arc::new(status_tx),
            status_rx,
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 添加事件回调
    pub fn add_event_callback(&self, callback: EventCallback) {
        self.event_callbacks.write().push(callback);
    }

    /// 启动服务
    ///
    /// 订阅所有监控目录并启动后台任务。不可用的目录以 `RootDegraded` 事件报告，不会导致启动失败
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("检测服务已在运行");
            return Ok(());
        }

        let result = self.spawn_worker();
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    fn spawn_worker(&self) -> Result<()> {
        self.config.validate().context("监控配置无效")?;

        let sampler = self
            .sampler
            .lock()
            .take()
            .context("检测服务已停止，不能再次启动")?;

        let (tx, rx) = mpsc::channel(self.config.event_queue_capacity);
        let watcher = DirectoryWatcher::start(
            &self.config.monitored_paths,
            self.config.recursive,
            self.config.coalesce_window(),
            tx,
        )
        .context("创建文件监控失败")?;

        let engine = DetectionEngine::new(&self.config, sampler);

        let worker = Worker {
            engine,
            watcher,
            rx,
            callbacks: self.event_callbacks.clone(),
            status_tx: self.status_tx.clone(),
            tick_interval: self.config.tick_interval(),
            recheck_interval: self.config.root_recheck(),
        };

        // 启动时已降级的目录
        let degraded: Vec<DetectionEvent> = worker
            .watcher
            .degraded_roots()
            .into_iter()
            .map(|(root, reason)| DetectionEvent::RootDegraded { root, reason })
            .collect();
        worker.publish(degraded);
        worker.publish_status(true);

        info!(
            "检测服务已启动: 监控 {} 个目录, 降级 {} 个, 静默期 {}s, 绝对超时 {}s",
            worker.watcher.watched_roots().len(),
            worker.watcher.degraded_roots().len(),
            self.config.quiet_period_secs,
            self.config.absolute_timeout_secs
        );

        let cancel_token = self.cancel_token.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            worker.run(cancel_token).await;
            running.store(false, Ordering::SeqCst);
        });
        *self.handle.lock() = Some(handle);

        Ok(())
    }

    /// 停止服务
    ///
    /// 后台任务退出时停止目录订阅并丢弃全部追踪器，不产生结果事件
    pub fn stop(&self) {
        self.cancel_token.cancel();
        info!("检测服务停止信号已发送");
    }

    /// 等待后台任务退出
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("检测服务任务异常退出: {}", e);
            }
        }
    }

    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// 当前状态
    pub fn status(&self) -> ServiceStatus {
        self.status_rx.borrow().clone()
    }

    /// 订阅状态变化
    pub fn subscribe_status(&self) -> watch::Receiver<ServiceStatus> {
        self.status_rx.clone()
    }
}

/// 后台任务状态
struct Worker<S: SizeSampler> {
    engine: DetectionEngine<S>,
    watcher: DirectoryWatcher,
    rx: mpsc::Receiver<WatchEvent>,
    callbacks: Arc<RwLock<Vec<EventCallback>>>,
    status_tx: Arc<watch::Sender<ServiceStatus>>,
    tick_interval: Duration,
    recheck_interval: Duration,
}

impl<S: SizeSampler> Worker<S> {
    async fn run(mut self, cancel_token: CancellationToken) {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut recheck = tokio::time::interval(self.recheck_interval);
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval 的第一次触发是立即的，启动时刚检查过
        recheck.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!("检测服务收到停止信号");
                    break;
                }

                Some(event) = self.rx.recv() => {
                    let events = self.engine.handle_event(event, Instant::now()).await;
                    self.dispatch(events);
                }

                _ = tick.tick() => {
                    let now = Instant::now();
                    for event in self.watcher.flush_pending(now) {
                        let events = self.engine.handle_event(event, now).await;
                        self.dispatch(events);
                    }
                    let events = self.engine.tick(now).await;
                    self.dispatch(events);
                }

                _ = recheck.tick() => {
                    let recovered: Vec<DetectionEvent> = self
                        .watcher
                        .recheck_degraded()
                        .into_iter()
                        .map(|root| DetectionEvent::RootRecovered { root })
                        .collect();
                    self.publish(recovered);
                }
            }

            self.publish_status(true);
        }

        let discarded = self.engine.clear();
        info!("检测服务已停止，丢弃 {} 个未完成的追踪记录", discarded);
        self.publish_status(false);
        // self 在此处析构，目录订阅随 watcher 一起停止
    }

    /// 处理引擎产生的事件：根目录丢失时更新监控器记录，然后发布
    fn dispatch(&mut self, events: Vec<DetectionEvent>) {
        for event in &events {
            if let DetectionEvent::RootDegraded { root, reason } = event {
                self.watcher.mark_lost(root, reason);
            }
        }
        self.publish(events);
    }

    fn publish(&self, events: Vec<DetectionEvent>) {
        if events.is_empty() {
            return;
        }

        let callbacks = self.callbacks.read();
        for event in events {
            debug!(
                "发布检测事件: type={}, path={:?}",
                event.event_type_name(),
                event.path()
            );
            for callback in callbacks.iter() {
                callback(event.clone());
            }
        }
    }

    fn publish_status(&self, running: bool) {
        let status = ServiceStatus {
            running,
            active_trackers: if running { self.engine.active_count() } else { 0 },
            degraded_roots: self
                .watcher
                .degraded_roots()
                .into_iter()
                .map(|(root, _)| root)
                .collect(),
        };

        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
