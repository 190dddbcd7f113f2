//! notify 事件规范化
//!
//! 不同平台的后端对同一操作给出的事件序列不同：
//! - Linux inotify: 重命名依次产生 `Name(From)`、`Name(To)`（带相同 cookie）和 `Name(Both)`
//! - macOS FSEvents: 只有 `Name(Any)`，需要根据路径是否存在判断是移入还是移出
//! - Windows: `Name(From)` / `Name(To)` 不带 cookie
//!
//! 这里统一转换为 [`WatchEvent`]，重命名的两半在配对窗口内合并，
//! 超时未配对的移出事件视为删除

use super::coalesce::ModifyCoalescer;
use super::WatchEvent;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// 重命名配对窗口
pub const RENAME_PAIRING_WINDOW: Duration = Duration::from_millis(500);

/// 事件规范化器
#[derive(Debug)]
pub struct EventNormalizer {
    /// 监控根目录（规范化路径）
    roots: Vec<PathBuf>,
    coalescer: ModifyCoalescer,
    /// 按 cookie 等待配对的移出事件
    pending_from: HashMap<usize, (PathBuf, Instant)>,
    /// 不带 cookie 的最近一次移出事件
    unmatched_from: Option<(PathBuf, Instant)>,
    /// 已由 `Name(To)` 发出的重命名，随后的 `Name(Both)` 不再重复发出
    recent_renames: VecDeque<(PathBuf, PathBuf, Instant)>,
    pairing_window: Duration,
}

impl EventNormalizer {
    pub fn new(coalesce_window: Duration) -> Self {
        Self {
            roots: Vec::new(),
            coalescer: ModifyCoalescer::new(coalesce_window),
            pending_from: HashMap::new(),
            unmatched_from: None,
            recent_renames: VecDeque::new(),
            pairing_window: RENAME_PAIRING_WINDOW,
        }
    }

    pub fn add_root(&mut self, root: PathBuf) {
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
    }

    pub fn remove_root(&mut self, root: &Path) {
        self.roots.retain(|r| r != root);
    }

    /// 转换一个 notify 事件
    ///
    /// 先输出已超时的未配对移出事件，保证同一路径的事件顺序
    pub fn normalize(&mut self, event: Event, now: Instant) -> Vec<WatchEvent> {
        let mut out = self.flush_expired(now);
        let tracker = event.tracker();

        match event.kind {
            EventKind::Create(CreateKind::Folder) => {}
            EventKind::Create(_) => {
                for path in event.paths {
                    if !path.is_dir() {
                        out.push(WatchEvent::Created(path));
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.normalize_rename(mode, tracker, event.paths, now, &mut out);
            }
            EventKind::Modify(_) => {
                for path in event.paths {
                    if self.coalescer.should_forward(&path, now) {
                        out.push(WatchEvent::Modified(path));
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    out.push(self.removal(path));
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }

        out
    }

    /// 输出超过配对窗口仍未配对的移出事件（视为删除）
    pub fn flush_expired(&mut self, now: Instant) -> Vec<WatchEvent> {
        let window = self.pairing_window;
        let expired = |at: &Instant| now.saturating_duration_since(*at) >= window;

        let mut gone: Vec<PathBuf> = Vec::new();
        self.pending_from.retain(|_, (path, at)| {
            if expired(&*at) {
                gone.push(path.clone());
                false
            } else {
                true
            }
        });

        if matches!(&self.unmatched_from, Some((_, at)) if expired(at)) {
            if let Some((path, _)) = self.unmatched_from.take() {
                gone.push(path);
            }
        }

        while matches!(self.recent_renames.front(), Some((_, _, at)) if expired(at)) {
            self.recent_renames.pop_front();
        }

        self.coalescer.prune(now);

        gone.into_iter().map(|p| self.removal(p)).collect()
    }

    fn normalize_rename(
        &mut self,
        mode: RenameMode,
        tracker: Option<usize>,
        paths: Vec<PathBuf>,
        now: Instant,
        out: &mut Vec<WatchEvent>,
    ) {
        match mode {
            RenameMode::Both if paths.len() >= 2 => {
                let (from, to) = (paths[0].clone(), paths[1].clone());
                self.pending_from.retain(|_, (p, _)| *p != from);
                if matches!(&self.unmatched_from, Some((p, _)) if *p == from) {
                    self.unmatched_from = None;
                }

                let already_sent = self
                    .recent_renames
                    .iter()
                    .position(|(f, t, _)| *f == from && *t == to);
                match already_sent {
                    Some(idx) => {
                        self.recent_renames.remove(idx);
                    }
                    None => out.push(self.renamed(from, to)),
                }
            }
            RenameMode::From => {
                let Some(path) = paths.into_iter().next() else {
                    return;
                };
                match tracker {
                    Some(cookie) => {
                        self.pending_from.insert(cookie, (path, now));
                    }
                    None => {
                        if let Some((previous, _)) = self.unmatched_from.replace((path, now)) {
                            out.push(self.removal(previous));
                        }
                    }
                }
            }
            RenameMode::To => {
                let Some(to) = paths.into_iter().next() else {
                    return;
                };
                let source = match tracker {
                    Some(cookie) => self.pending_from.remove(&cookie),
                    None => self.unmatched_from.take(),
                };
                match source {
                    Some((from, _)) => {
                        self.recent_renames
                            .push_back((from.clone(), to.clone(), now));
                        out.push(self.renamed(from, to));
                    }
                    None => {
                        // 从监控范围外移入
                        if !to.is_dir() {
                            out.push(WatchEvent::Created(to));
                        }
                    }
                }
            }
            _ => {
                if paths.len() >= 2 {
                    let (from, to) = (paths[0].clone(), paths[1].clone());
                    out.push(self.renamed(from, to));
                    return;
                }
                for path in paths {
                    if path.exists() {
                        if !path.is_dir() {
                            out.push(WatchEvent::Created(path));
                        }
                    } else {
                        out.push(self.removal(path));
                    }
                }
            }
        }
    }

    fn renamed(&mut self, from: PathBuf, to: PathBuf) -> WatchEvent {
        self.coalescer.forget(&from);
        WatchEvent::Renamed { from, to }
    }

    fn removal(&mut self, path: PathBuf) -> WatchEvent {
        self.coalescer.forget(&path);
        if self.roots.contains(&path) {
            WatchEvent::RootLost(path)
        } else {
            WatchEvent::Deleted(path)
        }
    }
}
