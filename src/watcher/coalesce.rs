//! 修改事件合并器
//!
//! 下载过程中同一文件每秒可能产生上百个修改事件，这些事件只用于刷新活跃时间，
//! 按路径做时间节流即可，避免事件风暴塞满队列

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// 按路径的修改事件节流器
///
/// 典型用法：每个修改事件调用 `should_forward()`，返回 true 时才转发
#[derive(Debug)]
pub struct ModifyCoalescer {
    /// 每个路径最近一次转发的时间
    last_forwarded: HashMap<PathBuf, Instant>,
    /// 合并窗口
    window: Duration,
}

impl ModifyCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            last_forwarded: HashMap::new(),
            window,
        }
    }

    /// 检查是否应该转发
    ///
    /// 距离该路径上次转发已超过合并窗口时返回 true 并更新时间戳
    pub fn should_forward(&mut self, path: &Path, now: Instant) -> bool {
        match self.last_forwarded.get_mut(path) {
            Some(last) if now.saturating_duration_since(*last) < self.window => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                self.last_forwarded.insert(path.to_path_buf(), now);
                true
            }
        }
    }

    /// 移除路径记录（文件删除或重命名后调用）
    pub fn forget(&mut self, path: &Path) {
        self.last_forwarded.remove(path);
    }

    /// 清理过期记录，防止长时间运行后内存增长
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_forwarded
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    pub fn len(&self) -> usize {
        self.last_forwarded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_forwarded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalescer_basic() {
        let mut coalescer = ModifyCoalescer::new(Duration::from_millis(100));
        let now = Instant::now();
        let path = Path::new("/dl/movie.mp4");

        // 第一次应该转发
        assert!(coalescer.should_forward(path, now));

        // 窗口内不转发
        assert!(!coalescer.should_forward(path, now + Duration::from_millis(50)));

        // 超过窗口后转发
        assert!(coalescer.should_forward(path, now + Duration::from_millis(120)));
    }

    #[test]
    fn test_paths_are_independent() {
        let mut coalescer = ModifyCoalescer::new(Duration::from_millis(100));
        let now = Instant::now();

        assert!(coalescer.should_forward(Path::new("/dl/a.bin"), now));
        assert!(coalescer.should_forward(Path::new("/dl/b.bin"), now));
        assert!(!coalescer.should_forward(Path::new("/dl/a.bin"), now));
        assert_eq!(coalescer.len(), 2);
    }

    #[test]
    fn test_forget_and_prune() {
        let mut coalescer = ModifyCoalescer::new(Duration::from_millis(100));
        let now = Instant::now();
        let a = Path::new("/dl/a.bin");

        coalescer.should_forward(a, now);
        coalescer.forget(a);
        assert!(coalescer.should_forward(a, now));

        coalescer.should_forward(Path::new("/dl/b.bin"), now + Duration::from_millis(80));
        coalescer.prune(now + Duration::from_millis(150));
        assert_eq!(coalescer.len(), 1);

        coalescer.prune(now + Duration::from_secs(1));
        assert!(coalescer.is_empty());
    }
}
