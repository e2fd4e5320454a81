use super::{copy_source::CopySource, large_file_state::LargeFileUploadState};
use b2_apis::{
    http_client::{ApiResult, Error},
    utils::ProgressListener,
    EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, MetadataDirective, Session,
};
use std::sync::Arc;

/// 拷贝管理器
///
/// 执行服务端拷贝与大文件的分片拷贝，数据不经过本地。
#[derive(Debug)]
pub struct CopyManager {
    session: Arc<Session>,
}

impl CopyManager {
    /// 创建拷贝管理器
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// 获取会话
    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// 服务端拷贝出一个新对象
    ///
    /// 未提供内容类型时沿用源对象元信息（`COPY` 指令），
    /// 提供了内容类型时替换元信息（`REPLACE` 指令）。
    #[allow(clippy::too_many_arguments)]
    pub fn copy_file(
        &self,
        copy_source: &CopySource,
        file_name: &str,
        content_type: Option<&str>,
        file_info: Option<&FileInfo>,
        destination_bucket_id: Option<&str>,
        progress: Arc<dyn ProgressListener>,
        destination_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
    ) -> ApiResult<FileVersion> {
        let metadata_directive = if content_type.is_none() {
            MetadataDirective::Copy
        } else {
            MetadataDirective::Replace
        };
        let length = copy_source.length().ok_or(Error::CopyArgumentsMismatch {
            message: "copy source length must be resolved before copying".to_owned(),
        })?;
        let range = copy_source.range(0, length);
        let version = self.session.copy_file(
            copy_source.file_id(),
            file_name,
            Some(range),
            metadata_directive,
            content_type,
            file_info,
            destination_bucket_id,
            destination_encryption,
            copy_source.encryption(),
            file_retention,
            legal_hold,
        )?;
        progress.report(length);
        Ok(version)
    }

    /// 服务端拷贝出大文件的一个分片
    pub fn copy_part(
        &self,
        large_file_id: &str,
        copy_source: &CopySource,
        relative_offset: u64,
        length: u64,
        part_number: u32,
        large_file_state: &Arc<LargeFileUploadState>,
        destination_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<String> {
        if large_file_state.has_error() {
            return Err(Error::AlreadyFailed {
                message: large_file_state.error_message().unwrap_or_default(),
            });
        }
        let range = copy_source.range(relative_offset, length);
        let part = self.session.copy_part(
            copy_source.file_id(),
            large_file_id,
            part_number,
            Some(range),
            destination_encryption,
            copy_source.encryption(),
        )?;
        large_file_state.update_part_bytes(length);
        Ok(part.content_sha1)
    }
}
