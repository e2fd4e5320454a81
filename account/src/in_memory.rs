use super::{
    account_info::{AccountInfo, AuthData},
    allowed::Allowed,
    upload_url_pool::{UploadUrl, UploadUrlPool},
};
use assert_impl::assert_impl;
use b2_http_client::{ApiResult, Error};
use std::{
    collections::HashMap,
    sync::RwLock,
};

/// 内存账户状态存储
///
/// 进程内可见，进程退出即消失。
#[derive(Debug, Default)]
pub struct InMemoryAccountInfo {
    auth_data: RwLock<Option<AuthData>>,
    buckets: RwLock<HashMap<String, String>>,
    bucket_pool: UploadUrlPool,
    large_file_pool: UploadUrlPool,
}

impl InMemoryAccountInfo {
    /// 创建内存账户状态存储
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    fn field<T>(&self, key: &str, get: impl FnOnce(&AuthData) -> T) -> ApiResult<T> {
        let guard = self.auth_data.read().unwrap();
        guard.as_ref().map(get).ok_or_else(|| Error::MissingAccountData {
            key: key.to_owned(),
        })
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl AccountInfo for InMemoryAccountInfo {
    fn set_auth_data(&self, auth_data: AuthData) -> ApiResult<()> {
        auth_data.allowed.validate()?;
        *self.auth_data.write().unwrap() = Some(auth_data);
        Ok(())
    }

    fn clear(&self) -> ApiResult<()> {
        *self.auth_data.write().unwrap() = None;
        self.buckets.write().unwrap().clear();
        Ok(())
    }

    fn account_id(&self) -> ApiResult<String> {
        self.field("account_id", |data| data.account_id.to_owned())
    }

    fn auth_token(&self) -> ApiResult<String> {
        self.field("auth_token", |data| data.auth_token.to_owned())
    }

    fn api_url(&self) -> ApiResult<String> {
        self.field("api_url", |data| data.api_url.to_owned())
    }

    fn download_url(&self) -> ApiResult<String> {
        self.field("download_url", |data| data.download_url.to_owned())
    }

    fn recommended_part_size(&self) -> ApiResult<u64> {
        self.field("recommended_part_size", |data| data.recommended_part_size)
    }

    fn absolute_minimum_part_size(&self) -> ApiResult<u64> {
        self.field("absolute_minimum_part_size", |data| data.absolute_minimum_part_size)
    }

    fn maximum_part_size(&self) -> ApiResult<u64> {
        self.field("maximum_part_size", |data| data.maximum_part_size)
    }

    fn application_key_id(&self) -> ApiResult<String> {
        self.field("application_key_id", |data| data.application_key_id.to_owned())
    }

    fn application_key(&self) -> ApiResult<String> {
        self.field("application_key", |data| data.application_key.to_owned())
    }

    fn realm(&self) -> ApiResult<String> {
        self.field("realm", |data| data.realm.to_owned())
    }

    fn s3_api_url(&self) -> ApiResult<String> {
        self.field("s3_api_url", |data| data.s3_api_url.to_owned())
    }

    fn allowed(&self) -> ApiResult<Allowed> {
        self.field("allowed", |data| data.allowed.to_owned())
    }

    fn put_bucket_upload_url(&self, bucket_id: &str, upload_url: UploadUrl) {
        self.bucket_pool.put(bucket_id, upload_url)
    }

    fn take_bucket_upload_url(&self, bucket_id: &str) -> Option<UploadUrl> {
        self.bucket_pool.take(bucket_id)
    }

    fn clear_bucket_upload_data(&self, bucket_id: &str) {
        self.bucket_pool.clear(bucket_id)
    }

    fn put_large_file_upload_url(&self, file_id: &str, upload_url: UploadUrl) {
        self.large_file_pool.put(file_id, upload_url)
    }

    fn take_large_file_upload_url(&self, file_id: &str) -> Option<UploadUrl> {
        self.large_file_pool.take(file_id)
    }

    fn clear_large_file_upload_urls(&self, file_id: &str) {
        self.large_file_pool.clear(file_id)
    }

    fn save_bucket_name(&self, bucket_name: &str, bucket_id: &str) -> ApiResult<()> {
        self.buckets
            .write()
            .unwrap()
            .insert(bucket_name.to_owned(), bucket_id.to_owned());
        Ok(())
    }

    fn remove_bucket_name(&self, bucket_name: &str) -> ApiResult<()> {
        self.buckets.write().unwrap().remove(bucket_name);
        Ok(())
    }

    fn bucket_id_by_name(&self, bucket_name: &str) -> ApiResult<Option<String>> {
        Ok(self.buckets.read().unwrap().get(bucket_name).map(ToOwned::to_owned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_auth_data() -> AuthData {
        AuthData::builder()
            .account_id("account-id")
            .auth_token("auth-token")
            .api_url("https://api.example.com")
            .download_url("https://download.example.com")
            .recommended_part_size(100_000_000)
            .absolute_minimum_part_size(5_000_000)
            .application_key_id("key-id")
            .application_key("key")
            .realm("production")
            .s3_api_url("https://s3.example.com")
            .build()
    }

    #[test]
    fn test_missing_account_data() {
        let info = InMemoryAccountInfo::new();
        match info.account_id() {
            Err(Error::MissingAccountData { key }) => assert_eq!(key, "account_id"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_set_and_get_auth_data() -> ApiResult<()> {
        let info = InMemoryAccountInfo::new();
        info.set_auth_data(sample_auth_data())?;
        assert_eq!(info.account_id()?, "account-id");
        assert_eq!(info.auth_token()?, "auth-token");
        assert_eq!(info.recommended_part_size()?, 100_000_000);
        assert!(info.allowed()?.has_capability("listFiles"));
        info.clear()?;
        assert!(info.account_id().is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_allowed_is_rejected() {
        let info = InMemoryAccountInfo::new();
        let mut auth_data = sample_auth_data();
        auth_data.allowed.bucket_name = Some("bucket".to_owned());
        auth_data.allowed.bucket_id = None;
        assert!(info.set_auth_data(auth_data).is_err());
        assert!(info.account_id().is_err());
    }

    #[test]
    fn test_upload_url_pools_are_separate() {
        let info = InMemoryAccountInfo::new();
        info.put_bucket_upload_url("bucket", UploadUrl::new("url-b", "token-b"));
        info.put_large_file_upload_url("file", UploadUrl::new("url-f", "token-f"));
        assert_eq!(info.take_large_file_upload_url("bucket"), None);
        assert_eq!(
            info.take_bucket_upload_url("bucket"),
            Some(UploadUrl::new("url-b", "token-b"))
        );
        info.clear_large_file_upload_urls("file");
        assert_eq!(info.take_large_file_upload_url("file"), None);
    }
}
