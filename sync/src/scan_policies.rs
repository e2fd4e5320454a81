use super::{
    error::{SyncError, SyncResult},
    path::SyncPath,
};
use regex::Regex;

/// 扫描过滤策略
///
/// 目录排除正则命中后整个子树不再进入；文件排除正则可以被
/// 文件包含正则重新收回；还可以按符号链接与修改时间窗口过滤。
/// 需要不同策略的调用方各自构建实例，没有可变的全局状态。
#[derive(Debug, Default)]
pub struct ScanPoliciesManager {
    exclude_dir_regexes: Vec<Regex>,
    exclude_file_regexes: Vec<Regex>,
    include_file_regexes: Vec<Regex>,
    exclude_all_symlinks: bool,
    exclude_modified_before: Option<u64>,
    exclude_modified_after: Option<u64>,
}

impl ScanPoliciesManager {
    /// 创建扫描过滤策略构建器
    #[inline]
    pub fn builder() -> ScanPoliciesManagerBuilder {
        Default::default()
    }

    /// 是否排除整个本地目录
    pub fn should_exclude_local_directory(&self, dir_path: &str) -> bool {
        self.exclude_dir_regexes.iter().any(|regex| regex.is_match(dir_path))
    }

    /// 是否排除指定相对路径的文件
    ///
    /// 命中排除正则但又命中包含正则的文件会被重新收回。
    pub fn should_exclude_relative_path(&self, relative_path: &str) -> bool {
        if !self.exclude_file_regexes.iter().any(|regex| regex.is_match(relative_path)) {
            return false;
        }
        !self.include_file_regexes.iter().any(|regex| regex.is_match(relative_path))
    }

    /// 是否排除一个同步路径
    pub fn should_exclude_path(&self, path: &SyncPath) -> bool {
        if self.should_exclude_relative_path(path.relative_path()) {
            return true;
        }
        let mod_time = path.mod_time_millis();
        if let Some(exclude_modified_before) = self.exclude_modified_before {
            if mod_time < exclude_modified_before {
                return true;
            }
        }
        if let Some(exclude_modified_after) = self.exclude_modified_after {
            if mod_time > exclude_modified_after {
                return true;
            }
        }
        false
    }

    /// 是否排除所有符号链接
    #[inline]
    pub fn exclude_all_symlinks(&self) -> bool {
        self.exclude_all_symlinks
    }
}

/// 扫描过滤策略构建器
#[derive(Debug, Default)]
pub struct ScanPoliciesManagerBuilder {
    exclude_dir_regexes: Vec<String>,
    exclude_file_regexes: Vec<String>,
    include_file_regexes: Vec<String>,
    exclude_all_symlinks: bool,
    exclude_modified_before: Option<u64>,
    exclude_modified_after: Option<u64>,
}

impl ScanPoliciesManagerBuilder {
    /// 添加目录排除正则
    pub fn exclude_dir_regex(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_dir_regexes.push(pattern.into());
        self
    }

    /// 添加文件排除正则
    pub fn exclude_file_regex(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_file_regexes.push(pattern.into());
        self
    }

    /// 添加文件包含正则
    ///
    /// 仅在与排除正则同时使用时有意义。
    pub fn include_file_regex(mut self, pattern: impl Into<String>) -> Self {
        self.include_file_regexes.push(pattern.into());
        self
    }

    /// 排除所有符号链接
    pub fn exclude_all_symlinks(mut self, exclude: bool) -> Self {
        self.exclude_all_symlinks = exclude;
        self
    }

    /// 排除修改时间早于该毫秒时间戳的文件
    pub fn exclude_modified_before(mut self, millis: u64) -> Self {
        self.exclude_modified_before = Some(millis);
        self
    }

    /// 排除修改时间晚于该毫秒时间戳的文件
    pub fn exclude_modified_after(mut self, millis: u64) -> Self {
        self.exclude_modified_after = Some(millis);
        self
    }

    /// 构建扫描过滤策略
    pub fn build(self) -> SyncResult<ScanPoliciesManager> {
        Ok(ScanPoliciesManager {
            exclude_dir_regexes: compile_all(self.exclude_dir_regexes)?,
            exclude_file_regexes: compile_all(self.exclude_file_regexes)?,
            include_file_regexes: compile_all(self.include_file_regexes)?,
            exclude_all_symlinks: self.exclude_all_symlinks,
            exclude_modified_before: self.exclude_modified_before,
            exclude_modified_after: self.exclude_modified_after,
        })
    }
}

fn compile_all(patterns: Vec<String>) -> SyncResult<Vec<Regex>> {
    patterns
        .into_iter()
        .map(|pattern| {
            Regex::new(&pattern).map_err(|err| SyncError::InvalidArgument {
                message: format!("invalid regex {pattern:?}: {err}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(relative_path: &str, mod_time_millis: u64) -> SyncPath {
        SyncPath::Local {
            absolute_path: relative_path.into(),
            relative_path: relative_path.to_owned(),
            mod_time_millis,
            size: 1,
        }
    }

    #[test]
    fn test_exclude_and_include_regexes() -> SyncResult<()> {
        let policies = ScanPoliciesManager::builder()
            .exclude_file_regex(r".*\.log$")
            .include_file_regex(r"^important/.*")
            .build()?;
        assert!(policies.should_exclude_relative_path("debug/a.log"));
        assert!(!policies.should_exclude_relative_path("important/a.log"));
        assert!(!policies.should_exclude_relative_path("a.txt"));
        Ok(())
    }

    #[test]
    fn test_directory_exclusion() -> SyncResult<()> {
        let policies = ScanPoliciesManager::builder().exclude_dir_regex(r"^node_modules$").build()?;
        assert!(policies.should_exclude_local_directory("node_modules"));
        assert!(!policies.should_exclude_local_directory("src"));
        Ok(())
    }

    #[test]
    fn test_mod_time_window() -> SyncResult<()> {
        let policies = ScanPoliciesManager::builder()
            .exclude_modified_before(100)
            .exclude_modified_after(200)
            .build()?;
        assert!(policies.should_exclude_path(&local("a", 99)));
        assert!(!policies.should_exclude_path(&local("a", 100)));
        assert!(!policies.should_exclude_path(&local("a", 200)));
        assert!(policies.should_exclude_path(&local("a", 201)));
        Ok(())
    }
}
