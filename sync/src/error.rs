use b2_apis::http_client::Error as ApiError;
use thiserror::Error as ThisError;

/// 同步错误
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum SyncError {
    /// 目标端的文件比来源端更新
    #[error("destination file is newer: {file_name}")]
    DestFileNewer {
        /// 文件的相对路径
        file_name: String,
    },

    /// 文件名无法参与同步
    #[error("unsyncable file name: {message}: {path}")]
    UnSyncableFilename {
        /// 原因
        message: String,
        /// 出问题的路径
        path: String,
    },

    /// 路径存在但不是目录
    #[error("{path} is not a directory")]
    NotADirectory {
        /// 路径
        path: String,
    },

    /// 无法创建目录
    #[error("unable to create directory {path}")]
    UnableToCreateDirectory {
        /// 路径
        path: String,
    },

    /// 来源目录为空
    #[error("directory {path} is empty. Use --allow-empty-source to sync anyway")]
    EmptyDirectory {
        /// 路径
        path: String,
    },

    /// 不支持的同步组合
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// 描述信息
        message: String,
    },

    /// 部分动作失败，整体同步不完整
    ///
    /// 已经提交的动作都被允许跑完，失败数在此汇总。
    #[error("sync is incomplete: {failures} action(s) failed")]
    IncompleteSync {
        /// 失败的动作数
        failures: usize,
    },

    /// 底层 API 错误
    #[error(transparent)]
    Api(#[from] ApiError),

    /// 本地 IO 错误
    #[error("local io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 同步结果
pub type SyncResult<T> = Result<T, SyncError>;
