use super::{allowed::Allowed, upload_url_pool::UploadUrl};
use b2_http_client::ApiResult;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// 一次授权产生的全部账户状态
///
/// 要么整体存在（已授权），要么整体不存在，不存在时访问任何字段
/// 都会得到 `MissingAccountData` 错误。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    /// 账户 ID
    pub account_id: String,
    /// 授权令牌，短时有效
    pub auth_token: String,
    /// API 基础地址
    pub api_url: String,
    /// 下载基础地址
    pub download_url: String,
    /// 服务端建议的分片大小
    pub recommended_part_size: u64,
    /// 服务端允许的最小分片大小
    pub absolute_minimum_part_size: u64,
    /// 服务端允许的最大分片大小
    #[serde(default = "default_maximum_part_size")]
    pub maximum_part_size: u64,
    /// 应用密钥 ID
    pub application_key_id: String,
    /// 应用密钥，用于授权令牌过期后自动重新授权
    pub application_key: String,
    /// 服务环境标签
    pub realm: String,
    /// S3 兼容接口基础地址
    #[serde(default)]
    pub s3_api_url: String,
    /// 权限描述符
    ///
    /// 兼容历史状态时会被合成为全权限描述符，永远不为空
    #[serde(default)]
    pub allowed: Allowed,
}

impl AuthData {
    /// 创建账户状态构建器
    #[inline]
    pub fn builder() -> AuthDataBuilder {
        AuthDataBuilder::default()
    }
}

/// 账户状态构建器
#[derive(Debug, Default)]
pub struct AuthDataBuilder {
    account_id: String,
    auth_token: String,
    api_url: String,
    download_url: String,
    recommended_part_size: u64,
    absolute_minimum_part_size: u64,
    maximum_part_size: Option<u64>,
    application_key_id: String,
    application_key: String,
    realm: String,
    s3_api_url: String,
    allowed: Option<Allowed>,
}

/// 服务端允许的最大分片大小
pub const DEFAULT_MAXIMUM_PART_SIZE: u64 = 5 * 1000 * 1000 * 1000;

fn default_maximum_part_size() -> u64 {
    DEFAULT_MAXIMUM_PART_SIZE
}

impl AuthDataBuilder {
    /// 设置账户 ID
    #[inline]
    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    /// 设置授权令牌
    #[inline]
    pub fn auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = auth_token.into();
        self
    }

    /// 设置 API 基础地址
    #[inline]
    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// 设置下载基础地址
    #[inline]
    pub fn download_url(mut self, download_url: impl Into<String>) -> Self {
        self.download_url = download_url.into();
        self
    }

    /// 设置服务端建议的分片大小
    #[inline]
    pub fn recommended_part_size(mut self, size: u64) -> Self {
        self.recommended_part_size = size;
        self
    }

    /// 设置服务端允许的最小分片大小
    #[inline]
    pub fn absolute_minimum_part_size(mut self, size: u64) -> Self {
        self.absolute_minimum_part_size = size;
        self
    }

    /// 设置服务端允许的最大分片大小
    #[inline]
    pub fn maximum_part_size(mut self, size: u64) -> Self {
        self.maximum_part_size = Some(size);
        self
    }

    /// 设置应用密钥 ID
    #[inline]
    pub fn application_key_id(mut self, application_key_id: impl Into<String>) -> Self {
        self.application_key_id = application_key_id.into();
        self
    }

    /// 设置应用密钥
    #[inline]
    pub fn application_key(mut self, application_key: impl Into<String>) -> Self {
        self.application_key = application_key.into();
        self
    }

    /// 设置服务环境标签
    #[inline]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// 设置 S3 兼容接口基础地址
    #[inline]
    pub fn s3_api_url(mut self, s3_api_url: impl Into<String>) -> Self {
        self.s3_api_url = s3_api_url.into();
        self
    }

    /// 设置权限描述符
    #[inline]
    pub fn allowed(mut self, allowed: Allowed) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// 构建账户状态
    pub fn build(self) -> AuthData {
        AuthData {
            account_id: self.account_id,
            auth_token: self.auth_token,
            api_url: self.api_url,
            download_url: self.download_url,
            recommended_part_size: self.recommended_part_size,
            absolute_minimum_part_size: self.absolute_minimum_part_size,
            maximum_part_size: self.maximum_part_size.unwrap_or(DEFAULT_MAXIMUM_PART_SIZE),
            application_key_id: self.application_key_id,
            application_key: self.application_key,
            realm: self.realm,
            s3_api_url: self.s3_api_url,
            allowed: self.allowed.unwrap_or_default(),
        }
    }
}

/// 账户状态存储接口
///
/// 所有方法都必须在并发调用下保持安全。上传地址池的取出与放回由会话层调用，
/// 取出的地址在放回前不会再被其他调用方取得。
pub trait AccountInfo: Debug + Send + Sync {
    /// 原子地替换全部授权字段
    ///
    /// 权限描述符非法（如 `bucket_name` 存在而 `bucket_id` 为空）时拒绝整个状态。
    fn set_auth_data(&self, auth_data: AuthData) -> ApiResult<()>;

    /// 清除全部授权字段，用于切换账户
    fn clear(&self) -> ApiResult<()>;

    /// 账户 ID
    fn account_id(&self) -> ApiResult<String>;

    /// 授权令牌
    fn auth_token(&self) -> ApiResult<String>;

    /// API 基础地址
    fn api_url(&self) -> ApiResult<String>;

    /// 下载基础地址
    fn download_url(&self) -> ApiResult<String>;

    /// 服务端建议的分片大小
    fn recommended_part_size(&self) -> ApiResult<u64>;

    /// 服务端允许的最小分片大小
    fn absolute_minimum_part_size(&self) -> ApiResult<u64>;

    /// 服务端允许的最大分片大小
    fn maximum_part_size(&self) -> ApiResult<u64>;

    /// 应用密钥 ID
    fn application_key_id(&self) -> ApiResult<String>;

    /// 应用密钥
    fn application_key(&self) -> ApiResult<String>;

    /// 服务环境标签
    fn realm(&self) -> ApiResult<String>;

    /// S3 兼容接口基础地址
    fn s3_api_url(&self) -> ApiResult<String>;

    /// 权限描述符
    fn allowed(&self) -> ApiResult<Allowed>;

    /// 放回存储空间的上传地址
    fn put_bucket_upload_url(&self, bucket_id: &str, upload_url: UploadUrl);

    /// 取出存储空间的上传地址
    fn take_bucket_upload_url(&self, bucket_id: &str) -> Option<UploadUrl>;

    /// 丢弃存储空间的全部上传地址
    fn clear_bucket_upload_data(&self, bucket_id: &str);

    /// 放回大文件的分片上传地址
    fn put_large_file_upload_url(&self, file_id: &str, upload_url: UploadUrl);

    /// 取出大文件的分片上传地址
    fn take_large_file_upload_url(&self, file_id: &str) -> Option<UploadUrl>;

    /// 丢弃大文件的全部分片上传地址
    fn clear_large_file_upload_urls(&self, file_id: &str);

    /// 记录存储空间名称到 ID 的映射
    fn save_bucket_name(&self, bucket_name: &str, bucket_id: &str) -> ApiResult<()>;

    /// 删除存储空间名称映射
    fn remove_bucket_name(&self, bucket_name: &str) -> ApiResult<()>;

    /// 以名称查询存储空间 ID
    fn bucket_id_by_name(&self, bucket_name: &str) -> ApiResult<Option<String>>;
}
