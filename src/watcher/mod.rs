//! 目录监控
//!
//! 订阅操作系统的文件事件，规范化后通过有界队列交给检测服务。
//! notify 回调线程只做转换和转发，不持有任何追踪状态，也从不阻塞：
//! `watch()` 需要同一个 notify 线程应答，回调一旦阻塞在满队列上，
//! 检测服务重新订阅目录时就会互相等待

pub mod coalesce;
pub mod normalize;

pub use coalesce::ModifyCoalescer;
pub use normalize::EventNormalizer;

use crate::config::PathValidator;
use crate::detector::DetectError;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// 溢出缓冲上限，超出后丢弃结构性事件（采样仍会发现文件消失）
const SPILL_LIMIT: usize = 65_536;

/// 规范化后的文件事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// 监控根目录本身被删除或移走
    RootLost(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p)
            | WatchEvent::Modified(p)
            | WatchEvent::Deleted(p)
            | WatchEvent::RootLost(p) => p,
            WatchEvent::Renamed { to, .. } => to,
        }
    }

    /// 修改事件可以在队列满时丢弃，其余事件必须送达
    pub fn is_droppable(&self) -> bool {
        matches!(self, WatchEvent::Modified(_))
    }
}

/// 目录监控器
///
/// 丢弃即停止操作系统订阅
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    normalizer: Arc<Mutex<EventNormalizer>>,
    /// 队列满时暂存的结构性事件，由采样周期取出
    spill: Arc<Mutex<VecDeque<WatchEvent>>>,
    /// 正在监控的根目录（规范化路径）
    watched: Vec<PathBuf>,
    /// 降级的根目录 -> 原因
    degraded: HashMap<PathBuf, String>,
    recursive: bool,
}

impl DirectoryWatcher {
    /// 创建监控器并订阅所有根目录
    ///
    /// 单个根目录不可用只会被标记为降级，不影响其他目录
    pub fn start(
        roots: &[PathBuf],
        recursive: bool,
        coalesce_window: Duration,
        tx: mpsc::Sender<WatchEvent>,
    ) -> notify::Result<Self> {
        let normalizer = Arc::new(Mutex::new(EventNormalizer::new(coalesce_window)));
        let handler_normalizer = normalizer.clone();
        let spill = Arc::new(Mutex::new(VecDeque::new()));
        let handler_spill = spill.clone();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let events = handler_normalizer.lock().normalize(event, Instant::now());
                forward_events(&tx, &handler_spill, events);
            }
            Err(e) => {
                error!("文件监控错误: {}", e);
            }
        })?;

        let mut this = Self {
            watcher,
            normalizer,
            spill,
            watched: Vec::new(),
            degraded: HashMap::new(),
            recursive,
        };

        for root in roots {
            match this.attach(root) {
                Ok(canonical) => info!("开始监控目录: {:?}", canonical),
                Err(e) => {
                    warn!("⚠️ 监控目录不可用，标记为降级: {}", e);
                    this.degraded.insert(root.clone(), root_reason(&e));
                }
            }
        }

        Ok(this)
    }

    fn attach(&mut self, root: &Path) -> Result<PathBuf, DetectError> {
        let canonical = PathValidator::validate_root(root)?;
        if self.watched.contains(&canonical) {
            return Ok(canonical);
        }

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher
            .watch(&canonical, mode)
            .map_err(|e| DetectError::RootUnavailable {
                root: root.to_path_buf(),
                reason: format!("订阅文件事件失败: {}", e),
            })?;

        self.normalizer.lock().add_root(canonical.clone());
        self.watched.push(canonical.clone());
        Ok(canonical)
    }

    /// 正在监控的根目录
    pub fn watched_roots(&self) -> &[PathBuf] {
        &self.watched
    }

    /// 降级的根目录及原因
    pub fn degraded_roots(&self) -> Vec<(PathBuf, String)> {
        let mut roots: Vec<_> = self
            .degraded
            .iter()
            .map(|(root, reason)| (root.clone(), reason.clone()))
            .collect();
        roots.sort();
        roots
    }

    /// 根目录丢失后标记为降级，等待重新检查
    ///
    /// 根目录删除时操作系统已经移除了订阅，这里只更新记录
    pub fn mark_lost(&mut self, root: &Path, reason: &str) {
        self.watched.retain(|r| r != root);
        self.normalizer.lock().remove_root(root);
        self.degraded.insert(root.to_path_buf(), reason.to_string());
    }

    /// 重新检查降级的根目录，返回已恢复的目录
    pub fn recheck_degraded(&mut self) -> Vec<PathBuf> {
        let pending: Vec<PathBuf> = self.degraded.keys().cloned().collect();
        let mut recovered = Vec::new();

        for root in pending {
            match self.attach(&root) {
                Ok(canonical) => {
                    self.degraded.remove(&root);
                    info!("✓ 监控目录已恢复: {:?}", canonical);
                    recovered.push(canonical);
                }
                Err(e) => {
                    debug!("监控目录仍不可用: {}", e);
                    self.degraded.insert(root, root_reason(&e));
                }
            }
        }

        recovered
    }

    /// 取出队列满时暂存的事件，以及超过配对窗口仍未配对的移出事件
    ///
    /// 应在事件队列已排空后调用，暂存事件都晚于队列中的事件
    pub fn flush_pending(&self, now: Instant) -> Vec<WatchEvent> {
        let mut events: Vec<WatchEvent> = self.spill.lock().drain(..).collect();
        if !events.is_empty() {
            debug!("取出 {} 个暂存事件", events.len());
        }
        events.extend(self.normalizer.lock().flush_expired(now));
        events
    }
}

/// 将事件送入队列，从不阻塞
///
/// 修改事件在队列满时丢弃。结构性事件（创建/删除/重命名）在队列满时进入溢出缓冲；
/// 缓冲非空期间后续结构性事件也进入缓冲，保持同一路径的事件顺序
fn forward_events(
    tx: &mpsc::Sender<WatchEvent>,
    spill: &Mutex<VecDeque<WatchEvent>>,
    events: Vec<WatchEvent>,
) {
    let mut spill = spill.lock();
    for event in events {
        if event.is_droppable() {
            if !spill.is_empty() {
                continue;
            }
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    debug!("事件队列已满，丢弃修改事件: {:?}", event.path());
                }
                Err(TrySendError::Closed(_)) => return,
            }
            continue;
        }

        if spill.is_empty() {
            match tx.try_send(event) {
                Ok(()) => continue,
                Err(TrySendError::Full(event)) => spill.push_back(event),
                // 接收端已关闭，服务正在停止
                Err(TrySendError::Closed(_)) => return,
            }
        } else if spill.len() < SPILL_LIMIT {
            spill.push_back(event);
        } else {
            warn!("⚠️ 事件溢出缓冲已满，丢弃事件: {:?}", event.path());
        }
    }
}

fn root_reason(e: &DetectError) -> String {
    match e {
        DetectError::RootUnavailable { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}
