use super::{copy_source::CopySource, upload_source::UploadSource};
use b2_apis::{
    http_client::ApiResult,
    utils::hex_sha1_of_stream,
};
use digest::Digest;
use sha1::Sha1;
use std::{io::Read, sync::Arc};

use super::upload_source::io_error;

/// 拼装分片中的一个子片段
#[derive(Debug, Clone)]
pub enum UploadSubpart {
    /// 本地数据源的一个切片
    Local {
        /// 本地数据源
        source: Arc<dyn UploadSource>,
        /// 数据源内的相对偏移
        relative_offset: u64,
        /// 长度
        length: u64,
    },
    /// 远端对象的一个范围，上传前先下载
    Remote {
        /// 远端数据源
        source: CopySource,
        /// 数据源内的相对偏移
        relative_offset: u64,
        /// 长度
        length: u64,
    },
}

impl UploadSubpart {
    /// 子片段长度
    pub fn length(&self) -> u64 {
        match self {
            Self::Local { length, .. } | Self::Remote { length, .. } => *length,
        }
    }

    /// 是否可以在不访问网络的情况下计算内容哈希
    pub fn is_hashable(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

/// 拼装分片
///
/// 规划器输出的一个服务端工作单元：一次上传，一次服务端拷贝，
/// 或若干子片段拼接成的一次上传。
#[derive(Debug, Clone)]
pub enum EmergePartDefinition {
    /// 单一本地数据源的一个连续切片，作为一个分片上传
    Upload {
        /// 本地数据源
        source: Arc<dyn UploadSource>,
        /// 数据源内的相对偏移
        relative_offset: u64,
        /// 长度
        length: u64,
    },
    /// 服务端拷贝的一个范围
    Copy {
        /// 远端数据源
        source: CopySource,
        /// 数据源内的相对偏移
        relative_offset: u64,
        /// 长度
        length: u64,
    },
    /// 多个子片段拼接成的一个分片
    ///
    /// 用于把过小的数据源合并到最小分片大小之上，
    /// 或把过短的远端范围降级为下载后上传。
    Subparts {
        /// 子片段列表，按目标偏移顺序排列
        subparts: Vec<UploadSubpart>,
    },
}

impl EmergePartDefinition {
    /// 分片长度
    pub fn length(&self) -> u64 {
        match self {
            Self::Upload { length, .. } | Self::Copy { length, .. } => *length,
            Self::Subparts { subparts } => subparts.iter().map(UploadSubpart::length).sum(),
        }
    }

    /// 是否可以在不访问网络的情况下计算内容哈希
    pub fn is_hashable(&self) -> bool {
        match self {
            Self::Upload { .. } => true,
            Self::Copy { .. } => false,
            Self::Subparts { subparts } => subparts.iter().all(UploadSubpart::is_hashable),
        }
    }

    /// 计算分片内容的十六进制 SHA-1
    ///
    /// 仅对可本地哈希的分片有值。
    pub fn sha1(&self) -> ApiResult<Option<String>> {
        match self {
            Self::Upload {
                source,
                relative_offset,
                length,
            } => {
                let mut reader = source.open_range(*relative_offset, *length)?;
                Ok(Some(hex_sha1_of_stream(&mut reader, *length).map_err(io_error)?))
            }
            Self::Copy { .. } => Ok(None),
            Self::Subparts { subparts } => {
                if !self.is_hashable() {
                    return Ok(None);
                }
                let mut digest = Sha1::new();
                let mut buf = vec![0u8; 1 << 16];
                for subpart in subparts {
                    let UploadSubpart::Local {
                        source,
                        relative_offset,
                        length,
                    } = subpart
                    else {
                        unreachable!("non-local subpart in hashable part");
                    };
                    let mut reader = source.open_range(*relative_offset, *length)?;
                    loop {
                        let n = reader.read(&mut buf).map_err(io_error)?;
                        if n == 0 {
                            break;
                        }
                        digest.update(&buf[..n]);
                    }
                }
                Ok(Some(hex::encode(digest.finalize())))
            }
        }
    }

    /// 把分片的标识三元组追加到列表中
    ///
    /// 三元组为（数据源整体 SHA-1，相对偏移，长度），是确定性方案 ID 的原料。
    /// 分片不可本地哈希时返回 `Ok(false)`。
    pub fn append_id_triples(&self, triples: &mut Vec<(String, u64, u64)>) -> ApiResult<bool> {
        match self {
            Self::Upload {
                source,
                relative_offset,
                length,
            } => {
                triples.push((source.content_sha1()?, *relative_offset, *length));
                Ok(true)
            }
            Self::Copy { .. } => Ok(false),
            Self::Subparts { subparts } => {
                for subpart in subparts {
                    match subpart {
                        UploadSubpart::Local {
                            source,
                            relative_offset,
                            length,
                        } => triples.push((source.content_sha1()?, *relative_offset, *length)),
                        UploadSubpart::Remote { .. } => return Ok(false),
                    }
                }
                Ok(true)
            }
        }
    }
}
