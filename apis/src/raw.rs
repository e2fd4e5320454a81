use super::types::{
    AccountAuthorization, Bucket, ByteRange, CancelledLargeFile, DeletedFileVersion, DownloadAuthorization,
    DownloadVersion, EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, ListFileNamesResponse,
    ListFileVersionsResponse, ListPartsResponse, ListUnfinishedLargeFilesResponse, MetadataDirective, Part,
    UnfinishedLargeFile, UploadUrlResponse,
};
use b2_http::ResponseBody;
use b2_http_client::{ApiResult, BodyOpener};
use serde_json::Value as JsonValue;
use std::fmt::Debug;

/// `X-Bz-Content-Sha1` 的哨兵值，表示 SHA-1 作为请求体的最后 40 个字节传输
pub const HEX_DIGITS_AT_END: &str = "hex_digits_at_end";

/// 自动推断内容类型的哨兵值
pub const AUTO_CONTENT_TYPE: &str = "b2/x-auto";

/// 协议操作接口
///
/// 每个方法对应一个协议调用，无状态，不做任何重试与授权管理。
/// 真实实现把操作映射为 HTTP 请求，模拟实现在内存中模拟服务端行为。
/// 授权地址与令牌由调用方（通常是会话层）显式传入。
#[allow(clippy::too_many_arguments)]
pub trait RawApi: Debug + Send + Sync {
    /// 授权账户
    fn authorize_account(
        &self,
        realm_url: &str,
        application_key_id: &str,
        application_key: &str,
    ) -> ApiResult<AccountAuthorization>;

    /// 创建存储空间
    fn create_bucket(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_name: &str,
        bucket_type: &str,
    ) -> ApiResult<Bucket>;

    /// 删除存储空间
    fn delete_bucket(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_id: &str,
    ) -> ApiResult<Bucket>;

    /// 更新存储空间
    ///
    /// 跨账户复制配置作为不透明负载原样提交
    fn update_bucket(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_id: &str,
        bucket_type: Option<&str>,
        bucket_info: Option<&JsonValue>,
        replication_configuration: Option<&JsonValue>,
    ) -> ApiResult<Bucket>;

    /// 列举存储空间
    fn list_buckets(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_id: Option<&str>,
        bucket_name: Option<&str>,
    ) -> ApiResult<Vec<Bucket>>;

    /// 申请小文件上传地址
    fn get_upload_url(&self, api_url: &str, account_auth_token: &str, bucket_id: &str) -> ApiResult<UploadUrlResponse>;

    /// 申请大文件分片上传地址
    fn get_upload_part_url(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
    ) -> ApiResult<UploadUrlResponse>;

    /// 上传小文件
    ///
    /// `content_sha1` 可以是 40 位十六进制 SHA-1，
    /// 也可以是哨兵值 [`HEX_DIGITS_AT_END`]，此时请求体的最后 40 字节是 SHA-1，
    /// `content_length` 已经包含这 40 字节。
    fn upload_file(
        &self,
        upload_url: &str,
        upload_auth_token: &str,
        file_name: &str,
        content_length: u64,
        content_type: &str,
        content_sha1: &str,
        file_info: &FileInfo,
        server_side_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
        body: BodyOpener<'_>,
    ) -> ApiResult<FileVersion>;

    /// 上传大文件分片
    fn upload_part(
        &self,
        upload_url: &str,
        upload_auth_token: &str,
        part_number: u32,
        content_length: u64,
        content_sha1: &str,
        server_side_encryption: Option<&EncryptionSetting>,
        body: BodyOpener<'_>,
    ) -> ApiResult<Part>;

    /// 开始大文件会话
    fn start_large_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        file_name: &str,
        content_type: &str,
        file_info: &FileInfo,
        server_side_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
    ) -> ApiResult<UnfinishedLargeFile>;

    /// 结束大文件会话
    ///
    /// `part_sha1_array` 按分片编号顺序排列，服务端据此做确定性的拼装校验
    fn finish_large_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        part_sha1_array: &[String],
    ) -> ApiResult<FileVersion>;

    /// 取消大文件会话
    fn cancel_large_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
    ) -> ApiResult<CancelledLargeFile>;

    /// 列举大文件已上传的分片
    fn list_parts(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        start_part_number: Option<u32>,
        max_part_count: Option<u32>,
    ) -> ApiResult<ListPartsResponse>;

    /// 列举未完成的大文件会话
    fn list_unfinished_large_files(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListUnfinishedLargeFilesResponse>;

    /// 按名称列举文件
    fn list_file_names(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_name: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileNamesResponse>;

    /// 按版本列举文件
    ///
    /// 结果按文件名字节序升序，同名版本按上传时间降序
    fn list_file_versions(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_name: Option<&str>,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileVersionsResponse>;

    /// 获取文件信息
    fn get_file_info(&self, api_url: &str, account_auth_token: &str, file_id: &str) -> ApiResult<FileVersion>;

    /// 删除文件版本
    fn delete_file_version(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        file_name: &str,
    ) -> ApiResult<DeletedFileVersion>;

    /// 隐藏文件
    fn hide_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        file_name: &str,
    ) -> ApiResult<FileVersion>;

    /// 服务端拷贝整个对象或其一个范围
    fn copy_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        source_file_id: &str,
        new_file_name: &str,
        range: Option<ByteRange>,
        metadata_directive: MetadataDirective,
        content_type: Option<&str>,
        file_info: Option<&FileInfo>,
        destination_bucket_id: Option<&str>,
        destination_server_side_encryption: Option<&EncryptionSetting>,
        source_server_side_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
    ) -> ApiResult<FileVersion>;

    /// 服务端拷贝为大文件的一个分片
    fn copy_part(
        &self,
        api_url: &str,
        account_auth_token: &str,
        source_file_id: &str,
        large_file_id: &str,
        part_number: u32,
        range: Option<ByteRange>,
        destination_server_side_encryption: Option<&EncryptionSetting>,
        source_server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<Part>;

    /// 获取下载授权令牌
    fn get_download_authorization(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        file_name_prefix: &str,
        valid_duration_seconds: u64,
    ) -> ApiResult<DownloadAuthorization>;

    /// 按文件 ID 下载
    fn download_file_by_id(
        &self,
        download_url: &str,
        account_auth_token: Option<&str>,
        file_id: &str,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)>;

    /// 按存储空间与文件名下载
    fn download_file_by_name(
        &self,
        download_url: &str,
        account_auth_token: Option<&str>,
        bucket_name: &str,
        file_name: &str,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)>;

    /// 按完整地址下载
    ///
    /// 并行下载器在补齐被截断的范围时直接重放同一个地址
    fn download_file_from_url(
        &self,
        url: &str,
        account_auth_token: Option<&str>,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)>;
}
