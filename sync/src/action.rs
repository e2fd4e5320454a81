use super::error::{SyncError, SyncResult};
use b2_apis::{FileVersion, Session, SRC_LAST_MODIFIED_MILLIS};
use b2_download_manager::{DownloadManager, DownloadOptions};
use b2_upload_manager::{Emerger, EmergeRequest, UploadSource, UploadSourceLocalFile};
use std::{fmt, fs, path::PathBuf, sync::Arc};

/// 同步动作
///
/// 规划阶段产出的一个待执行单元。同一对路径的动作之间没有依赖，
/// 可以乱序执行。
#[derive(Debug)]
pub enum SyncAction {
    /// 把本地文件上传到目标存储空间
    Upload {
        /// 相对路径
        relative_path: String,
        /// 本地绝对路径
        local_path: PathBuf,
        /// 目标对象名
        b2_file_name: String,
        /// 本地修改时间，毫秒
        mod_time_millis: u64,
        /// 本地文件大小
        size: u64,
    },
    /// 把远端对象下载到本地
    Download {
        /// 相对路径
        relative_path: String,
        /// 要下载的版本
        file_version: FileVersion,
        /// 本地绝对路径
        local_path: PathBuf,
    },
    /// 服务端拷贝到目标存储空间
    Copy {
        /// 相对路径
        relative_path: String,
        /// 来源版本
        source_version: FileVersion,
        /// 目标对象名
        dest_b2_file_name: String,
        /// 目标存储空间 ID
        dest_bucket_id: String,
    },
    /// 删除目标端的一个版本
    Delete {
        /// 相对路径
        relative_path: String,
        /// 对象名
        b2_file_name: String,
        /// 版本 ID
        file_id: String,
        /// 备注，如 `(old version)` 或 `(hide marker)`
        note: String,
    },
    /// 在目标端放置隐藏标记
    Hide {
        /// 相对路径
        relative_path: String,
        /// 对象名
        b2_file_name: String,
    },
    /// 删除本地文件
    LocalDelete {
        /// 相对路径
        relative_path: String,
        /// 本地绝对路径
        local_path: PathBuf,
    },
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload { relative_path, .. } => write!(f, "upload {relative_path}"),
            Self::Download { relative_path, .. } => write!(f, "dnload {relative_path}"),
            Self::Copy { relative_path, .. } => write!(f, "copy {relative_path}"),
            Self::Delete {
                relative_path, note, ..
            } => {
                if note.is_empty() {
                    write!(f, "delete {relative_path}")
                } else {
                    write!(f, "delete {relative_path} {note}")
                }
            }
            Self::Hide { relative_path, .. } => write!(f, "hide {relative_path}"),
            Self::LocalDelete { relative_path, .. } => write!(f, "local delete {relative_path}"),
        }
    }
}

/// 动作执行环境
///
/// 按同步方向持有需要的管理器与目标信息。
#[derive(Debug)]
pub(crate) struct SyncEnv {
    pub(crate) emerger: Option<Emerger>,
    pub(crate) download_manager: Option<DownloadManager>,
    pub(crate) dest_session: Option<Arc<Session>>,
    pub(crate) dest_bucket_id: Option<String>,
}

impl SyncEnv {
    fn emerger(&self) -> SyncResult<&Emerger> {
        self.emerger.as_ref().ok_or_else(|| SyncError::InvalidArgument {
            message: "destination is not a bucket".to_owned(),
        })
    }

    fn download_manager(&self) -> SyncResult<&DownloadManager> {
        self.download_manager.as_ref().ok_or_else(|| SyncError::InvalidArgument {
            message: "source is not a bucket".to_owned(),
        })
    }

    fn dest_session(&self) -> SyncResult<&Arc<Session>> {
        self.dest_session.as_ref().ok_or_else(|| SyncError::InvalidArgument {
            message: "destination is not a bucket".to_owned(),
        })
    }

    fn dest_bucket_id(&self) -> SyncResult<&str> {
        self.dest_bucket_id.as_deref().ok_or_else(|| SyncError::InvalidArgument {
            message: "destination is not a bucket".to_owned(),
        })
    }
}

impl SyncAction {
    /// 执行动作
    pub(crate) fn execute(&self, env: &SyncEnv) -> SyncResult<()> {
        match self {
            Self::Upload {
                local_path,
                b2_file_name,
                mod_time_millis,
                size,
                ..
            } => {
                let source = UploadSourceLocalFile::new(local_path)?;
                if source.content_length() != *size {
                    log::warn!("{} changed size while syncing", local_path.display());
                }
                let mut request = EmergeRequest::new(env.dest_bucket_id()?, b2_file_name);
                request
                    .file_info
                    .insert(SRC_LAST_MODIFIED_MILLIS.to_owned(), mod_time_millis.to_string());
                env.emerger()?.upload(Arc::new(source), request)?;
                Ok(())
            }
            Self::Download {
                file_version,
                local_path,
                ..
            } => {
                if let Some(parent) = local_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                env.download_manager()?
                    .download_file_by_id(&file_version.file_id, DownloadOptions::default())?
                    .save_to_path(local_path)?;
                Ok(())
            }
            Self::Copy {
                source_version,
                dest_b2_file_name,
                dest_bucket_id,
                ..
            } => {
                env.dest_session()?.copy_file(
                    &source_version.file_id,
                    dest_b2_file_name,
                    None,
                    b2_apis::MetadataDirective::Copy,
                    None,
                    None,
                    Some(dest_bucket_id),
                    None,
                    None,
                    None,
                    None,
                )?;
                Ok(())
            }
            Self::Delete {
                b2_file_name, file_id, ..
            } => {
                env.dest_session()?.delete_file_version(file_id, b2_file_name)?;
                Ok(())
            }
            Self::Hide { b2_file_name, .. } => {
                env.dest_session()?.hide_file(env.dest_bucket_id()?, b2_file_name)?;
                Ok(())
            }
            Self::LocalDelete { local_path, .. } => {
                fs::remove_file(local_path)?;
                Ok(())
            }
        }
    }
}
