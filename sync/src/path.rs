use b2_apis::FileVersion;
use std::path::PathBuf;

/// 同步路径
///
/// 扫描器输出的一个条目：本地文件，或远端同名版本组成的一组。
/// 两侧都按相对路径的字节序输出。
#[derive(Debug, Clone)]
pub enum SyncPath {
    /// 本地文件
    Local {
        /// 磁盘上的绝对路径
        absolute_path: PathBuf,
        /// 相对同步根的路径，始终以 `/` 分隔
        relative_path: String,
        /// 修改时间，毫秒
        mod_time_millis: u64,
        /// 文件大小
        size: u64,
    },
    /// 远端文件的全部已知版本，新版本在前
    B2 {
        /// 相对同步前缀的路径
        relative_path: String,
        /// 全部版本，新版本在前
        versions: Vec<FileVersion>,
    },
}

impl SyncPath {
    /// 相对路径
    pub fn relative_path(&self) -> &str {
        match self {
            Self::Local { relative_path, .. } | Self::B2 { relative_path, .. } => relative_path,
        }
    }

    /// 最新版本的逻辑修改时间，毫秒
    pub fn mod_time_millis(&self) -> u64 {
        match self {
            Self::Local { mod_time_millis, .. } => *mod_time_millis,
            Self::B2 { versions, .. } => versions.first().map(FileVersion::mod_time_millis).unwrap_or_default(),
        }
    }

    /// 最新版本的大小
    pub fn size(&self) -> u64 {
        match self {
            Self::Local { size, .. } => *size,
            Self::B2 { versions, .. } => versions.first().map(|version| version.content_length).unwrap_or_default(),
        }
    }

    /// 该路径当前是否可见
    ///
    /// 远端最新版本是隐藏标记时不可见。
    pub fn is_visible(&self) -> bool {
        match self {
            Self::Local { .. } => true,
            Self::B2 { versions, .. } => versions
                .first()
                .map(|version| version.action == "upload")
                .unwrap_or(false),
        }
    }

    /// 远端最新版本
    pub fn latest_version(&self) -> Option<&FileVersion> {
        match self {
            Self::Local { .. } => None,
            Self::B2 { versions, .. } => versions.first(),
        }
    }

    /// 远端的全部版本，新版本在前
    pub fn all_versions(&self) -> &[FileVersion] {
        match self {
            Self::Local { .. } => &[],
            Self::B2 { versions, .. } => versions,
        }
    }
}
