//! 候选文件追踪器
//!
//! 每个被追踪路径对应一个状态机，根据周期采样判断文件是否下载完成：
//!
//! ```text
//! Pending ──变化──> Growing <──增长── Stabilizing ──静默期满──> Completed
//!    │                 │──不变──────────^    │
//!    └──不变(>0)───────────────────────────-─┘
//! 任意非终态 ──消失──> Abandoned，──超时──> Abandoned / Ignored(低于最小大小)
//! ```
//!
//! 追踪器本身不做 I/O，采样结果和当前时刻都由调用方传入，便于单元测试

use super::error::DetectError;
use super::types::{
    format_size, AbandonReason, DetectionEvent, DownloadOutcome, FileClass, SizeSample,
    TrackerState,
};
use crate::config::MonitorConfig;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// 连续多少次采样发现文件不存在才判定为消失
///
/// 重命名事件可能晚于采样到达，单次缺失不足以判定
const MISSING_SAMPLES_TO_ABANDON: u32 = 2;

/// 预期大小的容差下限（字节）
const EXPECTED_SIZE_TOLERANCE_MIN: u64 = 1024;

/// 追踪参数
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// 静默期：大小连续不变超过该时长视为完成
    pub quiet_period: Duration,
    /// 绝对超时：单个文件的最长追踪时间
    pub absolute_timeout: Duration,
    /// 最小文件大小（字节），低于该值不通知
    pub min_file_size: u64,
    /// 大小历史保留条数
    pub history_len: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl TrackerSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            quiet_period: Duration::from_secs(config.quiet_period_secs),
            absolute_timeout: Duration::from_secs(config.absolute_timeout_secs),
            min_file_size: config.min_file_size_bytes,
            history_len: config.size_history_len.max(2),
        }
    }
}

/// 状态迁移记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: TrackerState,
    pub to: TrackerState,
    pub detail: String,
}

impl Transition {
    /// 转换为活动日志事件
    pub fn into_event(self, path: &Path) -> DetectionEvent {
        DetectionEvent::StateChanged {
            path: path.to_path_buf(),
            from: self.from,
            to: self.to,
            detail: self.detail,
        }
    }
}

/// 候选文件追踪器
#[derive(Debug, Clone)]
pub struct CandidateTracker {
    /// 文件路径（唯一键）
    path: PathBuf,
    /// 文件分类（重命名时重新计算）
    classification: FileClass,
    /// 当前状态
    state: TrackerState,
    /// 首次发现时间
    first_seen_at: Instant,
    /// 绝对超时的计时起点
    deadline_anchor: Instant,
    /// 最近一次收到事件的时间
    last_event_at: Instant,
    /// 最近一次采样
    last_sample: Option<SizeSample>,
    /// 大小历史
    history: VecDeque<SizeSample>,
    history_len: usize,
    /// 伴随文件中的预期大小
    expected_size: Option<u64>,
    /// 稳定计时起点（仅 Stabilizing 状态有值）
    stable_since: Option<Instant>,
    /// 连续采样失败次数
    consecutive_failures: u32,
    /// 连续发现文件不存在的次数
    consecutive_missing: u32,
    /// 由伴随文件创建、尚未见到下载文件本身
    awaiting_file: bool,
    /// 放弃原因
    abandon_reason: Option<AbandonReason>,
    /// 完成时是否与预期大小匹配
    matched_expected: bool,
}

impl CandidateTracker {
    /// 创建追踪器
    ///
    /// 临时文件直接进入 Ignored，作为占位记录保留，等待重命名或删除
    pub fn new(
        path: PathBuf,
        classification: FileClass,
        now: Instant,
        settings: &TrackerSettings,
    ) -> Self {
        let state = match classification {
            FileClass::Candidate => TrackerState::Pending,
            FileClass::Temporary | FileClass::CompanionMetadata => TrackerState::Ignored,
        };

        Self {
            path,
            classification,
            state,
            first_seen_at: now,
            deadline_anchor: now,
            last_event_at: now,
            last_sample: None,
            history: VecDeque::with_capacity(settings.history_len),
            history_len: settings.history_len,
            expected_size: None,
            stable_since: None,
            consecutive_failures: 0,
            consecutive_missing: 0,
            awaiting_file: false,
            abandon_reason: None,
            matched_expected: false,
        }
    }

    /// 由伴随文件创建追踪器（下载文件尚未出现）
    pub fn awaiting(
        path: PathBuf,
        expected_size: u64,
        now: Instant,
        settings: &TrackerSettings,
    ) -> Self {
        let mut tracker = Self::new(path, FileClass::Candidate, now, settings);
        tracker.expected_size = Some(expected_size);
        tracker.awaiting_file = true;
        tracker
    }

    // ==================== 访问器 ====================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn classification(&self) -> FileClass {
        self.classification
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn first_seen_at(&self) -> Instant {
        self.first_seen_at
    }

    pub fn last_sample(&self) -> Option<SizeSample> {
        self.last_sample
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn history_count(&self) -> usize {
        self.history.len()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_awaiting_file(&self) -> bool {
        self.awaiting_file
    }

    pub fn abandon_reason(&self) -> Option<AbandonReason> {
        self.abandon_reason
    }

    /// 是否为临时文件占位记录
    pub fn is_placeholder(&self) -> bool {
        self.state == TrackerState::Ignored && self.classification == FileClass::Temporary
    }

    /// 是否需要周期采样
    pub fn needs_sampling(&self) -> bool {
        !self.state.is_terminal()
    }

    /// 距离最近一次事件是否已超过空闲时长
    pub fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        now.saturating_duration_since(self.last_event_at) >= idle
    }

    /// 平均增长速度（字节/秒），基于历史窗口首尾样本
    pub fn throughput(&self) -> Option<f64> {
        let first = self.history.front()?;
        let last = self.history.back()?;
        let elapsed = last.at.saturating_duration_since(first.at).as_secs_f64();
        if elapsed <= 0.0 || last.size <= first.size {
            return None;
        }
        Some((last.size - first.size) as f64 / elapsed)
    }

    /// 下载进度百分比（需已知预期大小）
    pub fn progress_percent(&self) -> Option<f64> {
        let expected = self.expected_size.filter(|e| *e > 0)?;
        let size = self.last_sample?.size;
        Some(size as f64 / expected as f64 * 100.0)
    }

    // ==================== 事件输入 ====================

    /// 记录一次文件事件（不影响稳定计时）
    pub fn touch(&mut self, now: Instant) {
        self.last_event_at = now;
    }

    /// 下载文件本身出现（伴随文件先到的情况）
    pub fn mark_file_seen(&mut self, now: Instant) {
        self.last_event_at = now;
        if self.awaiting_file {
            self.awaiting_file = false;
            self.first_seen_at = now;
            self.deadline_anchor = now;
        }
    }

    /// 设置预期大小
    pub fn set_expected_size(&mut self, size: u64) {
        if size > 0 {
            self.expected_size = Some(size);
        }
    }

    /// 应用一次成功采样
    pub fn apply_sample(
        &mut self,
        sample: SizeSample,
        settings: &TrackerSettings,
    ) -> Option<Transition> {
        if self.state.is_terminal() {
            return None;
        }

        if self.awaiting_file {
            // 采样成功说明文件已经出现，即使创建事件丢失
            self.mark_file_seen(sample.at);
        }

        self.consecutive_failures = 0;
        self.consecutive_missing = 0;
        let prev = self.last_sample;
        self.record(sample);

        let from = self.state;
        let mut detail = String::new();

        let next = match prev {
            None => TrackerState::Pending,
            Some(prev) if sample.size != prev.size => {
                self.stable_since = None;
                detail = self.growth_detail(prev.size, sample.size);
                TrackerState::Growing
            }
            Some(_) if sample.size == 0 && from == TrackerState::Pending => TrackerState::Pending,
            Some(prev) => {
                let activity = matches!(
                    (prev.modified, sample.modified),
                    (Some(a), Some(b)) if a != b
                );
                match from {
                    TrackerState::Stabilizing => {
                        if activity {
                            // 大小未变但仍有写入，重新计时
                            self.stable_since = Some(sample.at);
                        }
                    }
                    _ => {
                        self.stable_since = Some(if activity { sample.at } else { prev.at });
                        detail = format!("大小保持 {}", format_size(sample.size));
                    }
                }
                TrackerState::Stabilizing
            }
        };

        let completed = self.check_completion(next, sample, settings);
        let to = match completed {
            Some(reason) => {
                detail = reason;
                TrackerState::Completed
            }
            None => next,
        };

        self.transition(from, to, detail)
    }

    /// 应用一次失败采样
    pub fn apply_sample_error(&mut self, error: &DetectError) -> Option<Transition> {
        if self.state.is_terminal() {
            return None;
        }

        self.consecutive_failures += 1;

        if error.is_not_a_file() {
            let from = self.state;
            return self.transition(from, TrackerState::Ignored, "不是普通文件".to_string());
        }

        if !error.is_missing() {
            // 文件被锁定或读取超时，下一轮重试，由绝对超时兜底
            self.consecutive_missing = 0;
            return None;
        }

        if self.awaiting_file {
            // 下载文件尚未出现，属于预期
            return None;
        }

        self.consecutive_missing += 1;
        if self.consecutive_missing < MISSING_SAMPLES_TO_ABANDON {
            return None;
        }

        self.abandon(AbandonReason::Disappeared, "文件在追踪过程中消失".to_string())
    }

    /// 收到删除事件
    ///
    /// 非终态追踪器和临时文件占位记录都会转为 Abandoned
    pub fn mark_disappeared(&mut self, now: Instant) -> Option<Transition> {
        self.last_event_at = now;
        if self.state.is_terminal() && !self.is_placeholder() {
            return None;
        }
        self.abandon(AbandonReason::Disappeared, "文件已被删除".to_string())
    }

    /// 所在监控目录不可用
    pub fn mark_root_lost(&mut self) -> Option<Transition> {
        if self.state.is_terminal() && !self.is_placeholder() {
            return None;
        }
        self.abandon(AbandonReason::RootLost, "监控目录不可用".to_string())
    }

    /// 检查绝对超时
    pub fn check_timeout(&mut self, now: Instant, settings: &TrackerSettings) -> Option<Transition> {
        if self.state.is_terminal() {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.deadline_anchor);
        if elapsed < settings.absolute_timeout {
            return None;
        }

        let from = self.state;

        if self.awaiting_file {
            return self.transition(
                from,
                TrackerState::Ignored,
                "伴随文件对应的下载文件未出现".to_string(),
            );
        }

        match self.last_sample {
            Some(sample) if sample.size < settings.min_file_size => self.transition(
                from,
                TrackerState::Ignored,
                format!(
                    "超时时大小 {} 仍低于最小大小 {}",
                    format_size(sample.size),
                    format_size(settings.min_file_size)
                ),
            ),
            _ => self.abandon(
                AbandonReason::Timeout,
                format!("超过绝对处理超时 {}s", settings.absolute_timeout.as_secs()),
            ),
        }
    }

    // ==================== 重命名与合并 ====================

    /// 重命名：以新路径和新分类继续追踪
    ///
    /// - 新名称为临时文件：无论之前状态如何都进入 Ignored
    /// - 临时文件重命名为正式文件名：重新进入 Pending，绝对超时重新计时
    /// - 非终态候选文件：保留状态和历史
    pub fn rename(
        &mut self,
        to: PathBuf,
        classification: FileClass,
        now: Instant,
    ) -> Option<Transition> {
        let was_placeholder = self.is_placeholder();
        self.path = to;
        self.classification = classification;
        self.last_event_at = now;

        let from = self.state;
        match classification {
            FileClass::Temporary | FileClass::CompanionMetadata => {
                self.stable_since = None;
                if from == TrackerState::Ignored {
                    return None;
                }
                self.transition(from, TrackerState::Ignored, "重命名为临时文件名".to_string())
            }
            FileClass::Candidate if was_placeholder => {
                self.deadline_anchor = now;
                self.last_sample = None;
                self.history.clear();
                self.stable_since = None;
                self.transition(
                    from,
                    TrackerState::Pending,
                    "临时文件重命名为正式文件名".to_string(),
                )
            }
            FileClass::Candidate => None,
        }
    }

    /// 合并同一路径上的另一个追踪器
    ///
    /// 保留较早的首次发现时间和较新的采样
    pub fn merge(&mut self, other: CandidateTracker) {
        let other_is_newer = match (other.last_sample, self.last_sample) {
            (Some(o), Some(s)) => o.at >= s.at,
            (Some(_), None) => true,
            _ => false,
        };

        self.first_seen_at = self.first_seen_at.min(other.first_seen_at);
        self.deadline_anchor = self.deadline_anchor.max(other.deadline_anchor);
        self.last_event_at = self.last_event_at.max(other.last_event_at);
        self.expected_size = self.expected_size.or(other.expected_size);
        self.awaiting_file = self.awaiting_file && other.awaiting_file;

        let mut merged: Vec<SizeSample> = self
            .history
            .drain(..)
            .chain(other.history.iter().copied())
            .collect();
        merged.sort_by_key(|s| s.at);
        let skip = merged.len().saturating_sub(self.history_len);
        self.history = merged.into_iter().skip(skip).collect();

        if other_is_newer {
            self.last_sample = other.last_sample;
            self.state = other.state;
            self.stable_since = other.stable_since;
            self.consecutive_failures = other.consecutive_failures;
            self.consecutive_missing = other.consecutive_missing;
        }
    }

    // ==================== 结果 ====================

    /// 终态结果事件（Completed / Abandoned），其他状态返回 None
    pub fn outcome(&self, now: Instant) -> Option<DetectionEvent> {
        let size = self.last_sample.map(|s| s.size).unwrap_or(0);
        let build = || {
            DownloadOutcome::new(
                self.path.clone(),
                size,
                now.saturating_duration_since(self.first_seen_at),
                self.classification,
                self.expected_size,
                self.matched_expected,
            )
        };

        match self.state {
            TrackerState::Completed => Some(DetectionEvent::DownloadCompleted { outcome: build() }),
            TrackerState::Abandoned => Some(DetectionEvent::DownloadAbandoned {
                outcome: build(),
                reason: self.abandon_reason.unwrap_or(AbandonReason::Disappeared),
            }),
            _ => None,
        }
    }

    // ==================== 内部方法 ====================

    fn record(&mut self, sample: SizeSample) {
        self.last_sample = Some(sample);
        self.history.push_back(sample);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
    }

    /// 判断是否满足完成条件，返回完成说明
    fn check_completion(
        &mut self,
        next: TrackerState,
        sample: SizeSample,
        settings: &TrackerSettings,
    ) -> Option<String> {
        if !matches!(next, TrackerState::Growing | TrackerState::Stabilizing) {
            return None;
        }
        if sample.size == 0 || sample.size < settings.min_file_size {
            return None;
        }

        if self.expected_size == Some(sample.size) {
            self.matched_expected = true;
            return Some(format!("达到预期大小 {}", format_size(sample.size)));
        }

        if next != TrackerState::Stabilizing {
            return None;
        }

        let since = self.stable_since?;
        let stable_for = sample.at.saturating_duration_since(since);
        if stable_for < settings.quiet_period {
            return None;
        }

        self.matched_expected = self
            .expected_size
            .map(|e| within_tolerance(sample.size, e))
            .unwrap_or(false);

        Some(format!(
            "大小 {} 已稳定 {:.1}s",
            format_size(sample.size),
            stable_for.as_secs_f64()
        ))
    }

    fn growth_detail(&self, old: u64, new: u64) -> String {
        let mut detail = if new >= old {
            format!("{} -> {}", format_size(old), format_size(new))
        } else {
            format!("大小缩小 {} -> {}", format_size(old), format_size(new))
        };
        if let Some(speed) = self.throughput() {
            detail.push_str(&format!(", {:.2} KB/s", speed / 1024.0));
        }
        if let Some(progress) = self.progress_percent() {
            detail.push_str(&format!(", {:.1}%", progress));
        }
        detail
    }

    fn abandon(&mut self, reason: AbandonReason, detail: String) -> Option<Transition> {
        let from = self.state;
        self.abandon_reason = Some(reason);
        self.stable_since = None;
        self.transition(from, TrackerState::Abandoned, detail)
    }

    fn transition(
        &mut self,
        from: TrackerState,
        to: TrackerState,
        detail: String,
    ) -> Option<Transition> {
        self.state = to;
        if from == to {
            return None;
        }
        Some(Transition { from, to, detail })
    }
}

/// 大小是否在预期值容差范围内（1KB 或 0.1%，取较大者）
fn within_tolerance(size: u64, expected: u64) -> bool {
    let tolerance = EXPECTED_SIZE_TOLERANCE_MIN.max(expected / 1000);
    size.abs_diff(expected) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::error::AccessFailure;
    use proptest::prelude::*;
    use std::time::SystemTime;

    const MB: u64 = 1024 * 1024;

    fn settings() -> TrackerSettings {
        TrackerSettings {
            quiet_period: Duration::from_secs(5),
            absolute_timeout: Duration::from_secs(300),
            min_file_size: MB,
            history_len: 16,
        }
    }

    fn sample(size: u64, at: Instant) -> SizeSample {
        SizeSample {
            size,
            modified: None,
            at,
        }
    }

    fn candidate(base: Instant) -> CandidateTracker {
        CandidateTracker::new(
            PathBuf::from("/dl/movie.mp4"),
            FileClass::Candidate,
            base,
            &settings(),
        )
    }

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    fn missing() -> DetectError {
        DetectError::not_accessible("/dl/movie.mp4", AccessFailure::Missing)
    }

    /// 依次喂入 (秒, 大小)，返回最终状态
    fn feed(tracker: &mut CandidateTracker, base: Instant, seq: &[(u64, u64)]) -> TrackerState {
        let s = settings();
        for (t, size) in seq {
            tracker.apply_sample(sample(*size, secs(base, *t)), &s);
            if tracker.state().is_terminal() {
                break;
            }
        }
        tracker.state()
    }

    #[test]
    fn test_pending_first_sample() {
        let base = Instant::now();
        let mut t = candidate(base);
        assert_eq!(t.state(), TrackerState::Pending);

        assert!(t.apply_sample(sample(2 * MB, base), &settings()).is_none());
        assert_eq!(t.state(), TrackerState::Pending);
        assert_eq!(t.history_count(), 1);
    }

    #[test]
    fn test_growth_then_quiet_completes() {
        let base = Instant::now();
        let mut t = candidate(base);
        let state = feed(
            &mut t,
            base,
            &[(0, MB), (2, 2 * MB), (4, 3 * MB), (6, 3 * MB), (8, 3 * MB)],
        );
        // 6 秒进入 Stabilizing，计时起点回溯到 4 秒，8 秒时只稳定了 4 秒
        assert_eq!(state, TrackerState::Stabilizing);

        let tr = t.apply_sample(sample(3 * MB, secs(base, 10)), &settings()).unwrap();
        assert_eq!(tr.from, TrackerState::Stabilizing);
        assert_eq!(tr.to, TrackerState::Completed);

        match t.outcome(secs(base, 10)).unwrap() {
            DetectionEvent::DownloadCompleted { outcome } => {
                assert_eq!(outcome.size, 3 * MB);
                assert!(!outcome.matched_expected_size);
                assert_eq!(outcome.duration_secs, 10.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_oscillation_does_not_complete_early() {
        let base = Instant::now();
        let mut t = candidate(base);
        let s = settings();

        feed(&mut t, base, &[(0, MB), (2, 2 * MB), (4, 2 * MB)]);
        assert_eq!(t.state(), TrackerState::Stabilizing);

        // 短暂停顿后继续增长
        t.apply_sample(sample(4 * MB, secs(base, 6)), &s);
        assert_eq!(t.state(), TrackerState::Growing);

        // 8 秒时距离首次停顿已超过静默期，但计时已被重置
        t.apply_sample(sample(4 * MB, secs(base, 8)), &s);
        assert_eq!(t.state(), TrackerState::Stabilizing);
        t.apply_sample(sample(4 * MB, secs(base, 10)), &s);
        assert_eq!(t.state(), TrackerState::Stabilizing);

        t.apply_sample(sample(4 * MB, secs(base, 11)), &s);
        assert_eq!(t.state(), TrackerState::Completed);
        assert_eq!(t.last_sample().unwrap().size, 4 * MB);
    }

    #[test]
    fn test_identical_timestamps_do_not_advance_clock() {
        let base = Instant::now();
        let mut t = candidate(base);
        let s = settings();

        feed(&mut t, base, &[(0, MB), (2, 2 * MB), (4, 2 * MB)]);
        for _ in 0..5 {
            t.apply_sample(sample(2 * MB, secs(base, 4)), &s);
        }
        assert_eq!(t.state(), TrackerState::Stabilizing);
    }

    #[test]
    fn test_mtime_change_restarts_clock() {
        let base = Instant::now();
        let mut t = candidate(base);
        let s = settings();
        let m0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let m1 = m0 + Duration::from_secs(1);

        let with_mtime = |size, at, m| SizeSample {
            size,
            modified: Some(m),
            at,
        };

        t.apply_sample(with_mtime(2 * MB, base, m0), &s);
        t.apply_sample(with_mtime(2 * MB, secs(base, 2), m0), &s);
        assert_eq!(t.state(), TrackerState::Stabilizing);

        // 大小未变但修改时间变化
        t.apply_sample(with_mtime(2 * MB, secs(base, 4), m1), &s);
        t.apply_sample(with_mtime(2 * MB, secs(base, 6), m1), &s);
        assert_eq!(t.state(), TrackerState::Stabilizing);

        t.apply_sample(with_mtime(2 * MB, secs(base, 9), m1), &s);
        assert_eq!(t.state(), TrackerState::Completed);
    }

    #[test]
    fn test_zero_byte_file_stays_pending() {
        let base = Instant::now();
        let mut t = candidate(base);
        feed(&mut t, base, &[(0, 0), (2, 0), (4, 0), (10, 0)]);
        assert_eq!(t.state(), TrackerState::Pending);
    }

    #[test]
    fn test_disappearance_abandons_from_every_state() {
        let s = settings();
        let sequences: [&[(u64, u64)]; 3] = [
            &[(0, MB)],
            &[(0, MB), (2, 2 * MB)],
            &[(0, MB), (2, 2 * MB), (4, 2 * MB)],
        ];
        let expected = [
            TrackerState::Pending,
            TrackerState::Growing,
            TrackerState::Stabilizing,
        ];

        for (seq, state) in sequences.iter().zip(expected) {
            let base = Instant::now();
            let mut t = candidate(base);
            assert_eq!(feed(&mut t, base, seq), state);

            // 单次缺失不判定
            assert!(t.apply_sample_error(&missing()).is_none());
            assert_eq!(t.state(), state);

            let tr = t.apply_sample_error(&missing()).unwrap();
            assert_eq!(tr.to, TrackerState::Abandoned);
            assert_eq!(t.abandon_reason(), Some(AbandonReason::Disappeared));
            assert!(matches!(
                t.outcome(secs(base, 10)),
                Some(DetectionEvent::DownloadAbandoned { .. })
            ));

            // 终态后不再变化
            assert!(t.apply_sample(sample(9 * MB, secs(base, 60)), &s).is_none());
            assert_eq!(t.state(), TrackerState::Abandoned);
        }
    }

    #[test]
    fn test_missing_streak_resets_after_success() {
        let base = Instant::now();
        let mut t = candidate(base);
        let s = settings();

        feed(&mut t, base, &[(0, MB), (2, 2 * MB)]);
        t.apply_sample_error(&missing());
        t.apply_sample(sample(3 * MB, secs(base, 4)), &s);
        assert!(t.apply_sample_error(&missing()).is_none());
        assert_eq!(t.state(), TrackerState::Growing);
    }

    #[test]
    fn test_locked_file_retries_until_timeout() {
        let base = Instant::now();
        let mut t = candidate(base);
        let s = settings();
        let locked = DetectError::not_accessible("/dl/movie.mp4", AccessFailure::PermissionDenied);

        for _ in 0..10 {
            assert!(t.apply_sample_error(&locked).is_none());
        }
        assert_eq!(t.state(), TrackerState::Pending);
        assert_eq!(t.consecutive_failures(), 10);

        let tr = t.check_timeout(secs(base, 300), &s).unwrap();
        assert_eq!(tr.to, TrackerState::Abandoned);
        assert_eq!(t.abandon_reason(), Some(AbandonReason::Timeout));
    }

    #[test]
    fn test_not_a_file_is_ignored() {
        let base = Instant::now();
        let mut t = candidate(base);
        let dir = DetectError::not_accessible("/dl/movie.mp4", AccessFailure::NotAFile);

        let tr = t.apply_sample_error(&dir).unwrap();
        assert_eq!(tr.to, TrackerState::Ignored);
        assert!(t.outcome(secs(base, 1)).is_none());
    }

    #[test]
    fn test_expected_size_short_circuits_quiet_period() {
        let base = Instant::now();
        let mut t = candidate(base);
        t.set_expected_size(104_857_600);
        let s = settings();

        feed(&mut t, base, &[(0, 10 * MB), (1, 50 * MB)]);
        assert_eq!(t.state(), TrackerState::Growing);
        assert!(t.progress_percent().unwrap() > 40.0);

        let tr = t.apply_sample(sample(104_857_600, secs(base, 2)), &s).unwrap();
        assert_eq!(tr.to, TrackerState::Completed);

        match t.outcome(secs(base, 2)).unwrap() {
            DetectionEvent::DownloadCompleted { outcome } => {
                assert!(outcome.matched_expected_size);
                assert_eq!(outcome.expected_size, Some(104_857_600));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_close_expected_size_still_waits_quiet_period() {
        let base = Instant::now();
        let mut t = candidate(base);
        t.set_expected_size(100 * MB);
        let s = settings();
        let close = 100 * MB - 512;

        feed(&mut t, base, &[(0, MB), (2, close), (4, close)]);
        assert_eq!(t.state(), TrackerState::Stabilizing);

        t.apply_sample(sample(close, secs(base, 7)), &s);
        assert_eq!(t.state(), TrackerState::Completed);
        match t.outcome(secs(base, 7)).unwrap() {
            DetectionEvent::DownloadCompleted { outcome } => assert!(outcome.matched_expected_size),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_below_threshold_resolves_ignored() {
        let base = Instant::now();
        let mut t = CandidateTracker::new(
            PathBuf::from("/dl/tiny.txt"),
            FileClass::Candidate,
            base,
            &settings(),
        );
        let s = settings();

        // 远超静默期也不会完成
        for i in 0..100 {
            t.apply_sample(sample(500, secs(base, i * 2)), &s);
            assert_ne!(t.state(), TrackerState::Completed);
        }

        let tr = t.check_timeout(secs(base, 300), &s).unwrap();
        assert_eq!(tr.to, TrackerState::Ignored);
        assert!(t.outcome(secs(base, 300)).is_none());
    }

    #[test]
    fn test_small_file_can_grow_past_threshold() {
        let base = Instant::now();
        let mut t = candidate(base);
        let state = feed(
            &mut t,
            base,
            &[(0, 500), (2, 500), (4, 500), (10, 2 * MB), (12, 2 * MB), (18, 2 * MB)],
        );
        assert_eq!(state, TrackerState::Completed);
    }

    #[test]
    fn test_endless_growth_times_out() {
        let base = Instant::now();
        let mut t = candidate(base);
        let s = settings();

        for i in 0..150u64 {
            t.apply_sample(sample(MB * (i + 1), secs(base, i * 2)), &s);
        }
        assert_eq!(t.state(), TrackerState::Growing);
        assert!(t.throughput().unwrap() > 0.0);

        let tr = t.check_timeout(secs(base, 300), &s).unwrap();
        assert_eq!(tr.to, TrackerState::Abandoned);
        assert_eq!(t.abandon_reason(), Some(AbandonReason::Timeout));
    }

    #[test]
    fn test_temporary_is_ignored_placeholder() {
        let base = Instant::now();
        let s = settings();
        let mut t = CandidateTracker::new(
            PathBuf::from("/dl/report.pdf.part"),
            FileClass::Temporary,
            base,
            &s,
        );
        assert_eq!(t.state(), TrackerState::Ignored);
        assert!(t.is_placeholder());
        assert!(!t.needs_sampling());

        assert!(t.apply_sample(sample(5 * MB, secs(base, 2)), &s).is_none());
        assert!(t.check_timeout(secs(base, 1000), &s).is_none());

        let tr = t.mark_disappeared(secs(base, 2)).unwrap();
        assert_eq!(tr.from, TrackerState::Ignored);
        assert_eq!(tr.to, TrackerState::Abandoned);
        assert!(matches!(
            t.outcome(secs(base, 2)),
            Some(DetectionEvent::DownloadAbandoned {
                reason: AbandonReason::Disappeared,
                ..
            })
        ));
    }

    #[test]
    fn test_rename_to_temporary_ignores_any_state() {
        let base = Instant::now();
        let mut t = candidate(base);
        feed(&mut t, base, &[(0, MB), (2, 2 * MB), (4, 2 * MB)]);

        let tr = t
            .rename(PathBuf::from("/dl/movie.mp4.part"), FileClass::Temporary, secs(base, 5))
            .unwrap();
        assert_eq!(tr.from, TrackerState::Stabilizing);
        assert_eq!(tr.to, TrackerState::Ignored);
        assert!(t
            .apply_sample(sample(2 * MB, secs(base, 60)), &settings())
            .is_none());
    }

    #[test]
    fn test_rename_placeholder_revives_with_new_deadline() {
        let base = Instant::now();
        let s = settings();
        let mut t = CandidateTracker::new(
            PathBuf::from("/dl/movie.mp4.crdownload"),
            FileClass::Temporary,
            base,
            &s,
        );

        // 下载持续了 10 分钟后才重命名
        let renamed_at = secs(base, 600);
        let tr = t
            .rename(PathBuf::from("/dl/movie.mp4"), FileClass::Candidate, renamed_at)
            .unwrap();
        assert_eq!(tr.to, TrackerState::Pending);
        assert_eq!(t.path(), Path::new("/dl/movie.mp4"));
        assert_eq!(t.first_seen_at(), base);
        assert!(t.check_timeout(secs(base, 601), &s).is_none());

        t.apply_sample(sample(500 * MB, secs(base, 602)), &s);
        t.apply_sample(sample(500 * MB, secs(base, 604)), &s);
        t.apply_sample(sample(500 * MB, secs(base, 608)), &s);
        assert_eq!(t.state(), TrackerState::Completed);

        match t.outcome(secs(base, 608)).unwrap() {
            DetectionEvent::DownloadCompleted { outcome } => {
                assert_eq!(outcome.path, PathBuf::from("/dl/movie.mp4"));
                assert_eq!(outcome.size, 500 * MB);
                assert_eq!(outcome.duration_secs, 608.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_merge_keeps_earliest_seen_and_latest_sample() {
        let base = Instant::now();
        let s = settings();

        let mut existing = CandidateTracker::new(
            PathBuf::from("/dl/a.bin"),
            FileClass::Candidate,
            secs(base, 10),
            &s,
        );
        existing.apply_sample(sample(2 * MB, secs(base, 10)), &s);

        let mut incoming = candidate(base);
        incoming.set_expected_size(8 * MB);
        incoming.apply_sample(sample(3 * MB, secs(base, 12)), &s);

        existing.merge(incoming);
        assert_eq!(existing.first_seen_at(), base);
        assert_eq!(existing.last_sample().unwrap().size, 3 * MB);
        assert_eq!(existing.expected_size(), Some(8 * MB));
        assert_eq!(existing.history_count(), 2);
    }

    #[test]
    fn test_awaiting_tracker_lifecycle() {
        let base = Instant::now();
        let s = settings();
        let mut t = CandidateTracker::awaiting(PathBuf::from("/dl/video.mp4"), 100, base, &s);
        assert!(t.is_awaiting_file());

        // 文件尚未出现不算消失
        for _ in 0..5 {
            assert!(t.apply_sample_error(&missing()).is_none());
        }

        let tr = t.check_timeout(secs(base, 300), &s).unwrap();
        assert_eq!(tr.to, TrackerState::Ignored);
        assert!(t.outcome(secs(base, 300)).is_none());
    }

    #[test]
    fn test_tolerance() {
        assert!(within_tolerance(1000, 1500));
        assert!(!within_tolerance(1000, 3000));
        assert!(within_tolerance(100 * MB - 50_000, 100 * MB));
        assert!(!within_tolerance(100 * MB - 200_000, 100 * MB));
    }

    proptest! {
        #[test]
        fn prop_increase_then_hold_completes_with_last_size(
            steps in proptest::collection::vec(1u64..10 * MB, 1..20),
            hold_ticks in 4u64..10,
        ) {
            let base = Instant::now();
            let mut t = candidate(base);
            let s = settings();

            let mut size = MB;
            let mut clock = 0u64;
            t.apply_sample(sample(size, secs(base, clock)), &s);
            for step in &steps {
                clock += 2;
                size += step;
                t.apply_sample(sample(size, secs(base, clock)), &s);
                prop_assert_eq!(t.state(), TrackerState::Growing);
            }

            // 以 2 秒间隔保持不变，至少覆盖 5 秒静默期
            for _ in 0..hold_ticks {
                clock += 2;
                t.apply_sample(sample(size, secs(base, clock)), &s);
                if t.state() == TrackerState::Completed {
                    break;
                }
            }

            prop_assert_eq!(t.state(), TrackerState::Completed);
            prop_assert_eq!(t.last_sample().unwrap().size, size);
        }

        #[test]
        fn prop_short_hold_then_growth_restarts_clock(
            first in MB..50 * MB,
            growth in 1u64..MB,
        ) {
            let base = Instant::now();
            let mut t = candidate(base);
            let s = settings();

            // 保持 4 秒（短于静默期）后继续增长
            t.apply_sample(sample(first, base), &s);
            t.apply_sample(sample(first, secs(base, 2)), &s);
            t.apply_sample(sample(first, secs(base, 4)), &s);
            prop_assert_eq!(t.state(), TrackerState::Stabilizing);
            t.apply_sample(sample(first + growth, secs(base, 6)), &s);
            prop_assert_eq!(t.state(), TrackerState::Growing);

            t.apply_sample(sample(first + growth, secs(base, 8)), &s);
            t.apply_sample(sample(first + growth, secs(base, 10)), &s);
            prop_assert_eq!(t.state(), TrackerState::Stabilizing);
            t.apply_sample(sample(first + growth, secs(base, 12)), &s);
            prop_assert_eq!(t.state(), TrackerState::Completed);
        }
    }
}
