//! 检测引擎
//!
//! 以路径为键维护所有追踪器，处理规范化后的文件事件和周期采样，
//! 产生状态变化和下载结果事件。引擎只由检测服务的后台任务持有，不需要加锁

pub mod service;

pub use service::{DetectionService, EventCallback, ServiceStatus};

use crate::config::MonitorConfig;
use crate::detector::companion;
use crate::detector::{
    display_name, format_size, CandidateTracker, DetectionEvent, FileClass, PatternClassifier,
    SizeSample, SizeSampler, TrackerSettings, TrackerState, Transition,
};
use crate::watcher::WatchEvent;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 检测引擎
pub struct DetectionEngine<S: SizeSampler> {
    sampler: S,
    classifier: PatternClassifier,
    settings: TrackerSettings,
    /// 路径 -> 追踪器
    trackers: HashMap<PathBuf, CandidateTracker>,
    /// 占位记录的空闲回收时间
    idle_gc: Duration,
    companion_max_bytes: u64,
    io_timeout: Duration,
}

impl<S: SizeSampler> DetectionEngine<S> {
    pub fn new(config: &MonitorConfig, sampler: S) -> Self {
        Self {
            sampler,
            classifier: PatternClassifier::from_config(config),
            settings: TrackerSettings::from_config(config),
            trackers: HashMap::new(),
            idle_gc: config.idle_gc(),
            companion_max_bytes: config.companion_max_bytes,
            io_timeout: config.sample_timeout(),
        }
    }

    /// 未结束的追踪器数量（不含临时文件占位记录）
    pub fn active_count(&self) -> usize {
        self.trackers
            .values()
            .filter(|t| !t.state().is_terminal())
            .count()
    }

    /// 全部记录数量（含占位记录）
    pub fn tracked_count(&self) -> usize {
        self.trackers.len()
    }

    pub fn tracker(&self, path: &Path) -> Option<&CandidateTracker> {
        self.trackers.get(path)
    }

    pub fn classifier(&self) -> &PatternClassifier {
        &self.classifier
    }

    /// 丢弃全部追踪器，不产生结果事件
    pub fn clear(&mut self) -> usize {
        let count = self.trackers.len();
        self.trackers.clear();
        if count > 0 {
            info!("已清空 {} 个追踪记录", count);
        }
        count
    }

    // ==================== 事件处理 ====================

    /// 处理一个文件事件
    pub async fn handle_event(&mut self, event: WatchEvent, now: Instant) -> Vec<DetectionEvent> {
        let mut events = Vec::new();
        match event {
            WatchEvent::Created(path) => self.on_created(path, now).await,
            WatchEvent::Modified(path) => self.on_modified(path, now).await,
            WatchEvent::Deleted(path) => self.on_deleted(&path, now, &mut events),
            WatchEvent::Renamed { from, to } => self.on_renamed(from, to, now, &mut events).await,
            WatchEvent::RootLost(root) => self.on_root_lost(root, now, &mut events),
        }
        events
    }

    async fn on_created(&mut self, path: PathBuf, now: Instant) {
        if let Some(tracker) = self.trackers.get_mut(&path) {
            // 伴随文件先到、下载文件后到
            tracker.mark_file_seen(now);
            return;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };

        match self.classifier.classify(name) {
            FileClass::CompanionMetadata => self.apply_companion(&path, now).await,
            FileClass::Temporary => {
                info!("跳过临时文件: {}", display_name(&path));
                let tracker =
                    CandidateTracker::new(path.clone(), FileClass::Temporary, now, &self.settings);
                self.trackers.insert(path, tracker);
            }
            FileClass::Candidate => {
                let mut tracker =
                    CandidateTracker::new(path.clone(), FileClass::Candidate, now, &self.settings);
                self.probe_companions(&mut tracker).await;
                match tracker.expected_size() {
                    Some(size) => info!(
                        "发现新文件: {}，预期大小 {}",
                        display_name(&path),
                        format_size(size)
                    ),
                    None => info!("发现新文件: {}", display_name(&path)),
                }
                self.trackers.insert(path, tracker);
            }
        }
    }

    async fn on_modified(&mut self, path: PathBuf, now: Instant) {
        if let Some(tracker) = self.trackers.get_mut(&path) {
            // 只刷新活跃时间，稳定计时只由采样推进
            tracker.touch(now);
            return;
        }

        let is_companion = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.classifier.classify(name) == FileClass::CompanionMetadata)
            .unwrap_or(false);
        if is_companion {
            self.apply_companion(&path, now).await;
        }
    }

    fn on_deleted(&mut self, path: &Path, now: Instant, events: &mut Vec<DetectionEvent>) {
        let affected: Vec<PathBuf> = self
            .trackers
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();

        for key in affected {
            if let Some(tracker) = self.trackers.get_mut(&key) {
                let transition = tracker.mark_disappeared(now);
                self.record_transition(&key, transition, events);
            }
            self.settle(&key, now, events);
        }
    }

    async fn on_renamed(
        &mut self,
        from: PathBuf,
        to: PathBuf,
        now: Instant,
        events: &mut Vec<DetectionEvent>,
    ) {
        // 目录重命名：目录下的追踪器整体迁移
        let nested: Vec<PathBuf> = self
            .trackers
            .keys()
            .filter(|p| p.starts_with(&from) && p.as_path() != from)
            .cloned()
            .collect();
        let is_directory = !nested.is_empty();
        for old in nested {
            if let Ok(rest) = old.strip_prefix(&from) {
                let new = to.join(rest);
                self.move_tracker(&old, new, now, events).await;
            }
        }

        if self.trackers.contains_key(&from) {
            self.move_tracker(&from, to, now, events).await;
            return;
        }

        if is_directory {
            return;
        }
        // 采样器带 I/O 超时，目录会以 NotAFile 报告
        if let Err(e) = self.sampler.sample(&to).await {
            if e.is_not_a_file() {
                return;
            }
        }

        // 未追踪的源路径，等同于在新位置创建
        self.on_created(to, now).await;
    }

    /// 将追踪器迁移到新路径并重新分类，目标已存在时合并
    async fn move_tracker(
        &mut self,
        from: &Path,
        to: PathBuf,
        now: Instant,
        events: &mut Vec<DetectionEvent>,
    ) {
        let Some(mut tracker) = self.trackers.remove(from) else {
            return;
        };

        let class = to
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.classifier.classify(name))
            .unwrap_or(FileClass::Candidate);

        if class == FileClass::CompanionMetadata {
            debug!("文件被重命名为伴随文件名，停止追踪: {:?} -> {:?}", from, to);
            self.apply_companion(&to, now).await;
            return;
        }

        let transition = tracker.rename(to.clone(), class, now);
        info!(
            "文件重命名: {} -> {}",
            display_name(from),
            display_name(&to)
        );
        self.record_transition(&to, transition, events);

        if class == FileClass::Candidate && tracker.expected_size().is_none() {
            self.probe_companions(&mut tracker).await;
        }

        match self.trackers.get_mut(&to) {
            Some(existing) => {
                debug!("重命名目标已被追踪，合并记录: {:?}", to);
                existing.merge(tracker);
            }
            None => {
                self.trackers.insert(to.clone(), tracker);
            }
        }
        self.settle(&to, now, events);
    }

    fn on_root_lost(&mut self, root: PathBuf, now: Instant, events: &mut Vec<DetectionEvent>) {
        warn!("⚠️ 监控目录丢失: {:?}", root);
        events.push(DetectionEvent::RootDegraded {
            root: root.clone(),
            reason: "监控目录已被删除或移走".to_string(),
        });

        let affected: Vec<PathBuf> = self
            .trackers
            .keys()
            .filter(|p| p.starts_with(&root))
            .cloned()
            .collect();
        for key in affected {
            if let Some(tracker) = self.trackers.get_mut(&key) {
                let transition = tracker.mark_root_lost();
                self.record_transition(&key, transition, events);
            }
            self.settle(&key, now, events);
        }
    }

    // ==================== 周期采样 ====================

    /// 周期采样
    ///
    /// 所有需要采样的文件并发采样，单个文件的 I/O 超时不影响其他文件
    pub async fn tick(&mut self, now: Instant) -> Vec<DetectionEvent> {
        let mut events = Vec::new();

        let paths: Vec<PathBuf> = self
            .trackers
            .iter()
            .filter(|(_, t)| t.needs_sampling())
            .map(|(p, _)| p.clone())
            .collect();

        let results = join_all(paths.iter().map(|p| self.sampler.sample(p))).await;

        for (path, result) in paths.iter().zip(results) {
            let Some(tracker) = self.trackers.get_mut(path) else {
                continue;
            };
            let transition = match result {
                Ok(stat) => tracker.apply_sample(SizeSample::new(stat, now), &self.settings),
                Err(e) => {
                    debug!("采样失败，下次重试: {}", e);
                    tracker.apply_sample_error(&e)
                }
            };
            self.record_transition(path, transition, &mut events);
        }

        let keys: Vec<PathBuf> = self.trackers.keys().cloned().collect();
        for key in keys {
            let Some(tracker) = self.trackers.get_mut(&key) else {
                continue;
            };

            if tracker.is_placeholder() {
                if tracker.is_idle(now, self.idle_gc) {
                    debug!("回收空闲的临时文件记录: {:?}", key);
                    self.trackers.remove(&key);
                }
                continue;
            }

            let transition = tracker.check_timeout(now, &self.settings);
            self.record_transition(&key, transition, &mut events);
            self.settle(&key, now, &mut events);
        }

        events
    }

    // ==================== 内部方法 ====================

    /// 终态（占位记录除外）的追踪器产生结果并移除
    fn settle(&mut self, path: &Path, now: Instant, events: &mut Vec<DetectionEvent>) {
        let done = self
            .trackers
            .get(path)
            .map(|t| t.state().is_terminal() && !t.is_placeholder())
            .unwrap_or(false);
        if !done {
            return;
        }

        let Some(tracker) = self.trackers.remove(path) else {
            return;
        };

        match tracker.outcome(now) {
            Some(event) => {
                log_outcome(&event);
                events.push(event);
            }
            None => {
                if tracker.state() == TrackerState::Ignored && !tracker.is_awaiting_file() {
                    let size = tracker.last_sample().map(|s| s.size).unwrap_or(0);
                    info!(
                        "跳过小文件: {} ({})",
                        display_name(path),
                        format_size(size)
                    );
                }
            }
        }
    }

    fn record_transition(
        &self,
        path: &Path,
        transition: Option<Transition>,
        events: &mut Vec<DetectionEvent>,
    ) {
        let Some(transition) = transition else {
            return;
        };
        debug!(
            "状态变化: {} {} -> {} ({})",
            display_name(path),
            transition.from,
            transition.to,
            transition.detail
        );
        events.push(transition.into_event(path));
    }

    /// 读取伴随文件并把预期大小附加到对应的下载文件
    async fn apply_companion(&mut self, companion_path: &Path, now: Instant) {
        let Some(base) = companion::base_path_for(&self.classifier, companion_path) else {
            return;
        };

        let size = match companion::read_expected_size(
            companion_path,
            self.companion_max_bytes,
            self.io_timeout,
        )
        .await
        {
            Ok(size) => size,
            Err(e) => {
                debug!("伴随文件暂不可用，忽略预期大小: {}", e);
                return;
            }
        };

        if let Some(tracker) = self.trackers.get_mut(&base) {
            info!(
                "伴随文件提供预期大小: {} -> {}",
                display_name(&base),
                format_size(size)
            );
            tracker.set_expected_size(size);
            return;
        }

        // 只有下载文件尚不存在时才等待它出现；已存在却未被追踪的文件
        // 要么已经报告过完成，要么在监控开始前就已存在
        match self.sampler.sample(&base).await {
            Err(e) if e.is_missing() => {
                info!(
                    "伴随文件先于下载文件出现: {} -> {}",
                    display_name(&base),
                    format_size(size)
                );
                let tracker = CandidateTracker::awaiting(base.clone(), size, now, &self.settings);
                self.trackers.insert(base, tracker);
            }
            Ok(_) => debug!("下载文件已存在且不在追踪中，忽略伴随文件: {:?}", companion_path),
            Err(e) => debug!("无法确认下载文件状态，忽略伴随文件: {}", e),
        }
    }

    async fn probe_companions(&self, tracker: &mut CandidateTracker) {
        if let Some((companion_path, size)) = companion::probe_expected_size(
            &self.classifier,
            tracker.path(),
            self.companion_max_bytes,
            self.io_timeout,
        )
        .await
        {
            debug!("找到伴随文件: {:?}", companion_path);
            tracker.set_expected_size(size);
        }
    }
}

fn log_outcome(event: &DetectionEvent) {
    match event {
        DetectionEvent::DownloadCompleted { outcome } => info!(
            "✅ 下载完成: {} ({}, 耗时 {:.1}s{})",
            outcome.file_name(),
            format_size(outcome.size),
            outcome.duration_secs,
            if outcome.matched_expected_size {
                ", 与预期大小一致"
            } else {
                ""
            }
        ),
        DetectionEvent::DownloadAbandoned { outcome, reason } => info!(
            "下载放弃: {} (原因: {})",
            outcome.file_name(),
            reason
        ),
        _ => {}
    }
}
