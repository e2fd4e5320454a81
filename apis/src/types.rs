use b2_account::Allowed;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{collections::BTreeMap, fmt};

/// 文件自定义信息
pub type FileInfo = BTreeMap<String, String>;

/// 加密描述符
///
/// 本 SDK 不解释其内容，仅原样转发给协议层
pub type EncryptionSetting = JsonValue;

/// 对象保留策略描述符，原样转发
pub type FileRetention = JsonValue;

/// 法律保全描述符，原样转发
pub type LegalHold = JsonValue;

/// 文件信息中记录源文件修改时间的键
pub const SRC_LAST_MODIFIED_MILLIS: &str = "src_last_modified_millis";

/// 双闭区间字节范围
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    /// 起始偏移，含
    pub start: u64,
    /// 结束偏移，含
    pub end: u64,
}

impl ByteRange {
    /// 创建双闭区间字节范围
    #[inline]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// 范围覆盖的字节数
    #[inline]
    pub const fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// 以相对偏移计算子范围
    #[inline]
    pub const fn subrange(&self, sub_start: u64, sub_end: u64) -> Self {
        Self::new(self.start + sub_start, self.start + sub_end)
    }

    /// 转换为 `Range` 请求头的值
    #[inline]
    pub fn to_header_value(self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// 服务端拷贝的元信息处理指令
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetadataDirective {
    /// 沿用源对象的元信息，此时不允许提供新的内容类型与文件信息
    Copy,
    /// 替换元信息，此时至少要提供内容类型
    Replace,
}

impl MetadataDirective {
    /// 协议中的字符串表示
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "COPY",
            Self::Replace => "REPLACE",
        }
    }
}

/// 授权结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAuthorization {
    /// 账户 ID
    #[serde(rename = "accountId")]
    pub account_id: String,
    /// 授权令牌
    #[serde(rename = "authorizationToken")]
    pub authorization_token: String,
    /// API 基础地址
    #[serde(rename = "apiUrl")]
    pub api_url: String,
    /// 下载基础地址
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
    /// 服务端建议的分片大小
    #[serde(rename = "recommendedPartSize")]
    pub recommended_part_size: u64,
    /// 服务端允许的最小分片大小
    #[serde(rename = "absoluteMinimumPartSize")]
    pub absolute_minimum_part_size: u64,
    /// 权限描述符
    #[serde(rename = "allowed", default)]
    pub allowed: Allowed,
    /// S3 兼容接口基础地址
    #[serde(rename = "s3ApiUrl", default)]
    pub s3_api_url: String,
}

/// 存储空间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// 账户 ID
    #[serde(rename = "accountId", default)]
    pub account_id: String,
    /// 存储空间 ID
    #[serde(rename = "bucketId")]
    pub bucket_id: String,
    /// 存储空间名称
    #[serde(rename = "bucketName")]
    pub bucket_name: String,
    /// 存储空间类型
    #[serde(rename = "bucketType")]
    pub bucket_type: String,
    /// 存储空间附加信息
    #[serde(rename = "bucketInfo", default)]
    pub bucket_info: JsonValue,
    /// 版本号
    #[serde(rename = "revision", default)]
    pub revision: u64,
    /// 跨账户复制配置，原样转发
    #[serde(rename = "replicationConfiguration", default, skip_serializing_if = "Option::is_none")]
    pub replication_configuration: Option<JsonValue>,
}

/// 文件版本
///
/// 一个名字在存储空间内的一个不可变快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
    /// 文件 ID
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// 文件名
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// 所在存储空间 ID
    #[serde(rename = "bucketId", default)]
    pub bucket_id: Option<String>,
    /// 内容长度
    #[serde(rename = "contentLength", default)]
    pub content_length: u64,
    /// 内容类型
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    /// 内容 SHA-1，可能为字符串 `"none"`
    #[serde(rename = "contentSha1", default)]
    pub content_sha1: Option<String>,
    /// 文件自定义信息
    #[serde(rename = "fileInfo", default)]
    pub file_info: FileInfo,
    /// 版本动作，`upload` 为可见版本，`hide` 为隐藏标记，`start` 为未完成大文件
    #[serde(rename = "action", default = "default_action")]
    pub action: String,
    /// 上传时间戳，毫秒
    #[serde(rename = "uploadTimestamp", default)]
    pub upload_timestamp: u64,
    /// 加密描述符，原样转发
    #[serde(rename = "serverSideEncryption", default, skip_serializing_if = "Option::is_none")]
    pub server_side_encryption: Option<EncryptionSetting>,
    /// 保留策略描述符，原样转发
    #[serde(rename = "fileRetention", default, skip_serializing_if = "Option::is_none")]
    pub file_retention: Option<FileRetention>,
    /// 法律保全描述符，原样转发
    #[serde(rename = "legalHold", default, skip_serializing_if = "Option::is_none")]
    pub legal_hold: Option<LegalHold>,
}

fn default_action() -> String {
    "upload".to_owned()
}

impl FileVersion {
    /// 版本的逻辑修改时间
    ///
    /// 优先使用文件信息中的 `src_last_modified_millis`，否则使用上传时间戳
    pub fn mod_time_millis(&self) -> u64 {
        self.file_info
            .get(SRC_LAST_MODIFIED_MILLIS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(self.upload_timestamp)
    }
}

/// 大文件的一个分片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// 所属大文件 ID
    #[serde(rename = "fileId", default)]
    pub file_id: String,
    /// 分片编号，从 1 开始
    #[serde(rename = "partNumber")]
    pub part_number: u32,
    /// 分片长度
    #[serde(rename = "contentLength")]
    pub content_length: u64,
    /// 分片内容 SHA-1
    #[serde(rename = "contentSha1")]
    pub content_sha1: String,
}

/// 未完成的大文件会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfinishedLargeFile {
    /// 大文件 ID
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// 文件名
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// 所在存储空间 ID
    #[serde(rename = "bucketId", default)]
    pub bucket_id: String,
    /// 内容类型
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    /// 文件自定义信息
    #[serde(rename = "fileInfo", default)]
    pub file_info: FileInfo,
    /// 会话创建时间戳，毫秒
    #[serde(rename = "uploadTimestamp", default)]
    pub upload_timestamp: u64,
    /// 加密描述符，原样转发
    #[serde(rename = "serverSideEncryption", default, skip_serializing_if = "Option::is_none")]
    pub server_side_encryption: Option<EncryptionSetting>,
    /// 保留策略描述符，原样转发
    #[serde(rename = "fileRetention", default, skip_serializing_if = "Option::is_none")]
    pub file_retention: Option<FileRetention>,
    /// 法律保全描述符，原样转发
    #[serde(rename = "legalHold", default, skip_serializing_if = "Option::is_none")]
    pub legal_hold: Option<LegalHold>,
}

/// 已取消的大文件会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledLargeFile {
    /// 大文件 ID
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// 文件名
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// 所在存储空间 ID
    #[serde(rename = "bucketId", default)]
    pub bucket_id: String,
}

/// 已删除的文件版本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedFileVersion {
    /// 文件 ID
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// 文件名
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// 上传地址申请结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadUrlResponse {
    /// 上传地址
    #[serde(rename = "uploadUrl")]
    pub upload_url: String,
    /// 上传令牌
    #[serde(rename = "authorizationToken")]
    pub authorization_token: String,
}

/// 按名称列举文件的一页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFileNamesResponse {
    /// 文件列表
    #[serde(rename = "files")]
    pub files: Vec<FileVersion>,
    /// 下一页起始文件名
    #[serde(rename = "nextFileName", default)]
    pub next_file_name: Option<String>,
}

/// 按版本列举文件的一页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFileVersionsResponse {
    /// 文件版本列表
    #[serde(rename = "files")]
    pub files: Vec<FileVersion>,
    /// 下一页起始文件名
    #[serde(rename = "nextFileName", default)]
    pub next_file_name: Option<String>,
    /// 下一页起始文件 ID
    #[serde(rename = "nextFileId", default)]
    pub next_file_id: Option<String>,
}

/// 列举分片的一页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPartsResponse {
    /// 分片列表
    #[serde(rename = "parts")]
    pub parts: Vec<Part>,
    /// 下一页起始分片编号
    #[serde(rename = "nextPartNumber", default)]
    pub next_part_number: Option<u32>,
}

/// 列举未完成大文件的一页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListUnfinishedLargeFilesResponse {
    /// 未完成大文件列表
    #[serde(rename = "files")]
    pub files: Vec<UnfinishedLargeFile>,
    /// 下一页起始文件 ID
    #[serde(rename = "nextFileId", default)]
    pub next_file_id: Option<String>,
}

/// 下载授权结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadAuthorization {
    /// 存储空间 ID
    #[serde(rename = "bucketId")]
    pub bucket_id: String,
    /// 授权的文件名前缀
    #[serde(rename = "fileNamePrefix")]
    pub file_name_prefix: String,
    /// 下载授权令牌
    #[serde(rename = "authorizationToken")]
    pub authorization_token: String,
}

/// 从下载响应头得到的对象元信息
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadVersion {
    /// 文件 ID
    pub file_id: String,
    /// 文件名
    pub file_name: String,
    /// 本次响应携带的内容长度
    pub content_length: u64,
    /// 内容类型
    pub content_type: Option<String>,
    /// 内容 SHA-1，对象没有校验和时为字符串 `"none"`
    pub content_sha1: String,
    /// 文件自定义信息
    pub file_info: FileInfo,
    /// 上传时间戳，毫秒
    pub upload_timestamp: u64,
    /// 范围请求时响应的 `Content-Range`，`(起点, 终点, 对象总长)`
    pub content_range: Option<(u64, u64, u64)>,
}

impl DownloadVersion {
    /// 版本的逻辑修改时间
    pub fn mod_time_millis(&self) -> u64 {
        self.file_info
            .get(SRC_LAST_MODIFIED_MILLIS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(self.upload_timestamp)
    }

    /// 对象总长度
    ///
    /// 范围请求时取 `Content-Range` 的总长，否则等于内容长度
    pub fn total_size(&self) -> u64 {
        self.content_range
            .map(|(_, _, total)| total)
            .unwrap_or(self.content_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range() {
        let range = ByteRange::new(3, 9);
        assert_eq!(range.size(), 7);
        assert_eq!(range.to_header_value(), "bytes=3-9");
        assert_eq!(range.subrange(2, 6), ByteRange::new(5, 9));
    }

    #[test]
    fn test_file_version_mod_time() {
        let mut version: FileVersion = serde_json::from_value(serde_json::json!({
            "fileId": "id",
            "fileName": "name",
            "uploadTimestamp": 123u64,
        }))
        .unwrap();
        assert_eq!(version.mod_time_millis(), 123);
        version
            .file_info
            .insert(SRC_LAST_MODIFIED_MILLIS.to_owned(), "456".to_owned());
        assert_eq!(version.mod_time_millis(), 456);
        assert_eq!(version.action, "upload");
    }
}
