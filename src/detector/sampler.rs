//! 文件大小采样器
//!
//! 文件系统事件与文件可用性不是原子的：事件触发后文件可能已被删除或被其他程序锁定，
//! 这属于预期情况。采样失败由调用方在下一轮重试

use super::error::{AccessFailure, DetectError};
use super::types::FileStat;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// 大小采样接口
///
/// 追踪器和引擎只依赖该接口，测试中可注入模拟实现
#[async_trait]
pub trait SizeSampler: Send + Sync {
    /// 读取文件当前大小和修改时间
    async fn sample(&self, path: &Path) -> Result<FileStat, DetectError>;
}

/// 基于本地文件系统的采样器
///
/// 每次采样受 I/O 超时限制，慢速设备不会拖住其他文件的检测
#[derive(Debug, Clone)]
pub struct FsSizeSampler {
    io_timeout: Duration,
}

impl FsSizeSampler {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

#[async_trait]
impl SizeSampler for FsSizeSampler {
    async fn sample(&self, path: &Path) -> Result<FileStat, DetectError> {
        let metadata = match tokio::time::timeout(self.io_timeout, tokio::fs::metadata(path)).await
        {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => return Err(DetectError::not_accessible(path, AccessFailure::from(&e))),
            Err(_) => return Err(DetectError::not_accessible(path, AccessFailure::TimedOut)),
        };

        if !metadata.is_file() {
            return Err(DetectError::not_accessible(path, AccessFailure::NotAFile));
        }

        Ok(FileStat {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_sampler_reads_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mp4");
        tokio::fs::write(&path, vec![0u8; 4096]).await.unwrap();

        let sampler = FsSizeSampler::new(Duration::from_secs(1));
        let stat = sampler.sample(&path).await.unwrap();
        assert_eq!(stat.size, 4096);
    }

    #[tokio::test]
    async fn test_fs_sampler_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = FsSizeSampler::new(Duration::from_secs(1));

        let err = sampler.sample(&dir.path().join("gone.bin")).await.unwrap_err();
        assert!(err.is_missing());
    }

    #[tokio::test]
    async fn test_fs_sampler_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = FsSizeSampler::new(Duration::from_secs(1));

        let err = sampler.sample(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            DetectError::NotAccessible {
                kind: AccessFailure::NotAFile,
                ..
            }
        ));
    }
}
