//! 文件名分类器
//!
//! 纯函数：根据文件名（不含目录）判断是临时文件、伴随元数据还是候选文件。
//! 扩展名匹配为大小写不敏感的精确后缀匹配，`report.tmpfile.pdf` 不会被误判为 `.tmp`

use super::types::FileClass;
use crate::config::MonitorConfig;

/// 文件名分类器
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    /// 临时文件后缀（已规范化为 ".xxx" 小写形式）
    temporary_suffixes: Vec<String>,
    /// 伴随文件后缀（已规范化）
    companion_suffixes: Vec<String>,
    /// 临时文件前缀（小写）
    temporary_prefixes: Vec<String>,
    /// 临时文件名中间标记（小写）
    temporary_infixes: Vec<String>,
    /// 是否将隐藏文件视为临时文件
    ignore_hidden: bool,
}

impl PatternClassifier {
    /// 创建分类器
    ///
    /// 扩展名可带或不带前导点，统一规范化为小写
    pub fn new<I, J, K>(
        temporary_extensions: I,
        companion_extensions: J,
        temporary_prefixes: K,
        ignore_hidden: bool,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        J: IntoIterator,
        J::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        Self {
            temporary_suffixes: normalize_suffixes(temporary_extensions),
            companion_suffixes: normalize_suffixes(companion_extensions),
            temporary_prefixes: temporary_prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            temporary_infixes: Vec::new(),
            ignore_hidden,
        }
    }

    /// 设置临时文件名中间标记，文件名包含任一标记即视为临时文件
    pub fn with_infixes<I>(mut self, infixes: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.temporary_infixes = infixes
            .into_iter()
            .map(|i| i.as_ref().trim().to_lowercase())
            .filter(|i| !i.is_empty())
            .collect();
        self
    }

    /// 从监控配置创建分类器
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            &config.temporary_extensions,
            &config.companion_extensions,
            &config.temporary_prefixes,
            config.ignore_hidden,
        )
        .with_infixes(&config.temporary_infixes)
    }

    /// 对文件名分类
    pub fn classify(&self, file_name: &str) -> FileClass {
        if self.companion_base(file_name).is_some() {
            return FileClass::CompanionMetadata;
        }

        if self.is_temporary(file_name) {
            return FileClass::Temporary;
        }

        FileClass::Candidate
    }

    /// 若文件名为伴随文件，返回其对应的下载文件名
    ///
    /// `video.mp4.meta` -> `video.mp4`，隐藏形式 `.video.mp4.info` -> `video.mp4`
    pub fn companion_base<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let lower = file_name.to_lowercase();
        let suffix = self
            .companion_suffixes
            .iter()
            .find(|s| lower.ends_with(s.as_str()))?;

        // 小写化可能改变非 ASCII 字符的字节长度，切分前再核对原名后缀
        let cut = file_name.len().checked_sub(suffix.len())?;
        if !file_name.is_char_boundary(cut) || !file_name[cut..].eq_ignore_ascii_case(suffix) {
            return None;
        }
        let base = &file_name[..cut];
        let base = base.strip_prefix('.').unwrap_or(base);

        if base.is_empty() {
            None
        } else {
            Some(base)
        }
    }

    /// 是否为临时文件
    pub fn is_temporary(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();

        if self
            .temporary_suffixes
            .iter()
            .any(|s| lower.ends_with(s.as_str()))
        {
            return true;
        }

        if self
            .temporary_prefixes
            .iter()
            .any(|p| lower.starts_with(p.as_str()))
        {
            return true;
        }

        if self
            .temporary_infixes
            .iter()
            .any(|i| lower.contains(i.as_str()))
        {
            return true;
        }

        self.ignore_hidden && file_name.starts_with('.')
    }

    /// 伴随文件后缀列表（含前导点）
    pub fn companion_suffixes(&self) -> &[String] {
        &self.companion_suffixes
    }
}

fn normalize_suffixes<I>(extensions: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut suffixes: Vec<String> = extensions
        .into_iter()
        .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e))
        .collect();
    // 长后缀优先，保证 ".idm.tmp" 先于 ".tmp" 命中
    suffixes.sort_by(|a, b| b.len().cmp(&a.len()));
    suffixes.dedup();
    suffixes
}
