use b2_apis::{
    http_client::{ApiResult, Error},
    ByteRange, EncryptionSetting,
};

/// 服务端拷贝数据源
///
/// 指向服务端已有对象的全部或一个子范围。
#[derive(Debug, Clone, PartialEq)]
pub struct CopySource {
    file_id: String,
    offset: u64,
    length: Option<u64>,
    encryption: Option<EncryptionSetting>,
}

impl CopySource {
    /// 创建服务端拷贝数据源
    ///
    /// 指定了非零 `offset` 却不知道 `length` 的数据源是非法的，
    /// 调用方必须先解析出对象长度。
    pub fn new(
        file_id: impl Into<String>,
        offset: u64,
        length: Option<u64>,
        encryption: Option<EncryptionSetting>,
    ) -> ApiResult<Self> {
        if length.is_none() && offset > 0 {
            return Err(Error::CopyArgumentsMismatch {
                message: "if offset is set, length must be set too".to_owned(),
            });
        }
        Ok(Self {
            file_id: file_id.into(),
            offset,
            length,
            encryption,
        })
    }

    /// 源对象 ID
    #[inline]
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// 源对象内的起始偏移
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 拷贝长度
    #[inline]
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// 源对象的加密描述符
    #[inline]
    pub fn encryption(&self) -> Option<&EncryptionSetting> {
        self.encryption.as_ref()
    }

    /// 以相对偏移换算出源对象内的字节范围
    pub fn range(&self, relative_offset: u64, length: u64) -> ByteRange {
        let start = self.offset + relative_offset;
        ByteRange::new(start, start + length - 1)
    }

    /// 收窄为源对象内的一个子范围
    pub fn narrow(&self, relative_offset: u64, length: u64) -> ApiResult<Self> {
        Self::new(
            self.file_id.to_owned(),
            self.offset + relative_offset,
            Some(length),
            self.encryption.to_owned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_without_length_is_rejected() {
        assert!(CopySource::new("file-id", 1, None, None).is_err());
        assert!(CopySource::new("file-id", 0, None, None).is_ok());
        assert!(CopySource::new("file-id", 5, Some(10), None).is_ok());
    }

    #[test]
    fn test_range_resolution() -> ApiResult<()> {
        let source = CopySource::new("file-id", 100, Some(50), None)?;
        assert_eq!(source.range(10, 20), ByteRange::new(110, 129));
        Ok(())
    }
}
