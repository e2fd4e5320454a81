use super::{copy_source::CopySource, upload_source::UploadSource};
use b2_apis::http_client::{ApiResult, Error};
use std::sync::Arc;

/// 出站数据源
///
/// 要么是本地上传数据源，要么是服务端拷贝数据源。
#[derive(Debug, Clone)]
pub enum OutboundSource {
    /// 本地上传数据源
    Upload(Arc<dyn UploadSource>),
    /// 服务端拷贝数据源
    Copy(CopySource),
}

impl OutboundSource {
    /// 是否为本地上传数据源
    #[inline]
    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Upload(_))
    }

    /// 是否为服务端拷贝数据源
    #[inline]
    pub fn is_copy(&self) -> bool {
        matches!(self, Self::Copy(_))
    }
}

/// 写意图
///
/// 描述一条用户层声明：把数据源的内容放置到目标文件的指定偏移上。
/// 长度必须已知，未知长度的数据源会被拒绝。
#[derive(Debug, Clone)]
pub struct WriteIntent {
    source: OutboundSource,
    destination_offset: u64,
    length: u64,
}

impl WriteIntent {
    /// 创建写意图
    pub fn new(source: OutboundSource, destination_offset: u64) -> ApiResult<Self> {
        let length = match &source {
            OutboundSource::Upload(upload) => upload.content_length(),
            OutboundSource::Copy(copy) => copy.length().ok_or(Error::InvalidArgument {
                message: "Planner cannot support write intents of unknown length".to_owned(),
            })?,
        };
        Ok(Self {
            source,
            destination_offset,
            length,
        })
    }

    /// 以本地上传数据源创建写意图
    #[inline]
    pub fn upload(source: Arc<dyn UploadSource>, destination_offset: u64) -> Self {
        let length = source.content_length();
        Self {
            source: OutboundSource::Upload(source),
            destination_offset,
            length,
        }
    }

    /// 以服务端拷贝数据源创建写意图
    #[inline]
    pub fn copy(source: CopySource, destination_offset: u64) -> ApiResult<Self> {
        Self::new(OutboundSource::Copy(source), destination_offset)
    }

    /// 数据源
    #[inline]
    pub fn source(&self) -> &OutboundSource {
        &self.source
    }

    /// 目标偏移
    #[inline]
    pub fn destination_offset(&self) -> u64 {
        self.destination_offset
    }

    /// 长度
    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// 目标结束偏移，不含
    #[inline]
    pub fn destination_end_offset(&self) -> u64 {
        self.destination_offset + self.length
    }

    /// 是否为本地上传意图
    #[inline]
    pub fn is_upload(&self) -> bool {
        self.source.is_upload()
    }

    /// 是否为服务端拷贝意图
    #[inline]
    pub fn is_copy(&self) -> bool {
        self.source.is_copy()
    }
}
