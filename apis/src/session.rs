use super::{
    raw::RawApi,
    types::{
        Bucket, ByteRange, CancelledLargeFile, DeletedFileVersion, DownloadAuthorization, DownloadVersion,
        EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, ListFileNamesResponse,
        ListFileVersionsResponse, ListPartsResponse, ListUnfinishedLargeFilesResponse, MetadataDirective, Part,
        UnfinishedLargeFile,
    },
};
use assert_impl::assert_impl;
use b2_account::{AccountInfo, AuthData, UploadUrl};
use b2_http::ResponseBody;
use b2_http_client::{ApiResult, BodyOpener, Error};
use serde_json::Value as JsonValue;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

/// 会话
///
/// 在协议客户端之上补充授权管理：每次调用前从账户状态取出当前的
/// API 地址与授权令牌；遇到令牌失效时重新授权一次并重放调用；
/// 小文件与分片上传按池化纪律获取与归还上传地址；
/// 未授权错误会被附加应用密钥的权限说明再向上传播。
pub struct Session {
    raw: Arc<dyn RawApi>,
    account_info: Arc<dyn AccountInfo>,
    token_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Session {
    /// 创建会话
    pub fn new(raw: Arc<dyn RawApi>, account_info: Arc<dyn AccountInfo>) -> Self {
        Self {
            raw,
            account_info,
            token_locks: Default::default(),
        }
    }

    /// 获取协议客户端
    #[inline]
    pub fn raw(&self) -> &dyn RawApi {
        self.raw.as_ref()
    }

    /// 获取账户状态存储
    #[inline]
    pub fn account_info(&self) -> &dyn AccountInfo {
        self.account_info.as_ref()
    }

    /// 授权账户并保存授权状态
    pub fn authorize_account(
        &self,
        realm_url: &str,
        application_key_id: &str,
        application_key: &str,
    ) -> ApiResult<()> {
        let auth = self.raw.authorize_account(realm_url, application_key_id, application_key)?;
        self.account_info.set_auth_data(
            AuthData::builder()
                .account_id(auth.account_id)
                .auth_token(auth.authorization_token)
                .api_url(auth.api_url)
                .download_url(auth.download_url)
                .recommended_part_size(auth.recommended_part_size)
                .absolute_minimum_part_size(auth.absolute_minimum_part_size)
                .application_key_id(application_key_id)
                .application_key(application_key)
                .realm(realm_url)
                .s3_api_url(auth.s3_api_url)
                .allowed(auth.allowed)
                .build(),
        )
    }

    /// 使用保存的应用密钥自动重新授权
    ///
    /// 没有保存密钥时返回 `false`。
    pub fn authorize_automatically(&self) -> ApiResult<bool> {
        let (Ok(realm), Ok(key_id), Ok(key)) = (
            self.account_info.realm(),
            self.account_info.application_key_id(),
            self.account_info.application_key(),
        ) else {
            return Ok(false);
        };
        self.authorize_account(&realm, &key_id, &key)?;
        Ok(true)
    }

    fn with_auth<T>(&self, f: impl Fn(&str, &str) -> ApiResult<T>) -> ApiResult<T> {
        self.with_url_and_auth(|| self.account_info.api_url(), f)
    }

    fn with_download_auth<T>(&self, f: impl Fn(&str, &str) -> ApiResult<T>) -> ApiResult<T> {
        self.with_url_and_auth(|| self.account_info.download_url(), f)
    }

    fn with_url_and_auth<T>(
        &self,
        url: impl Fn() -> ApiResult<String>,
        f: impl Fn(&str, &str) -> ApiResult<T>,
    ) -> ApiResult<T> {
        let mut auth_failure_encountered = false;
        loop {
            let current_url = url()?;
            let auth_token = self.account_info.auth_token()?;
            match f(&current_url, &auth_token) {
                Err(Error::InvalidAuthToken { message, code }) if !auth_failure_encountered => {
                    auth_failure_encountered = true;
                    log::debug!("auth token rejected, re-authorizing: {message}");
                    if !self.authorize_automatically()? {
                        return Err(Error::InvalidAuthToken { message, code });
                    }
                }
                Err(err) => return Err(self.enrich_unauthorized(err)),
                Ok(value) => return Ok(value),
            }
        }
    }

    /// 给未授权错误附加应用密钥的权限说明
    fn enrich_unauthorized(&self, err: Error) -> Error {
        match err {
            Error::Unauthorized { message, code } => {
                let message = if message.is_empty() {
                    "unauthorized".to_owned()
                } else {
                    message
                };
                match self.account_info.allowed() {
                    Ok(allowed) => Error::Unauthorized {
                        message: format!("{message} for application key {}", allowed.describe()),
                        code,
                    },
                    Err(_) => Error::Unauthorized { message, code },
                }
            }
            err => err,
        }
    }

    fn token_lock(&self, token: &str) -> Arc<Mutex<()>> {
        self.token_locks
            .lock()
            .unwrap()
            .entry(token.to_owned())
            .or_default()
            .to_owned()
    }

    fn discard_token_lock(&self, token: &str) {
        self.token_locks.lock().unwrap().remove(token);
    }

    fn upload_url_for_bucket(&self, bucket_id: &str) -> ApiResult<UploadUrl> {
        if let Some(upload_url) = self.account_info.take_bucket_upload_url(bucket_id) {
            return Ok(upload_url);
        }
        let response = self.with_auth(|api_url, token| self.raw.get_upload_url(api_url, token, bucket_id))?;
        Ok(UploadUrl::new(response.upload_url, response.authorization_token))
    }

    fn upload_url_for_large_file(&self, file_id: &str) -> ApiResult<UploadUrl> {
        if let Some(upload_url) = self.account_info.take_large_file_upload_url(file_id) {
            return Ok(upload_url);
        }
        let response = self.with_auth(|api_url, token| self.raw.get_upload_part_url(api_url, token, file_id))?;
        Ok(UploadUrl::new(response.upload_url, response.authorization_token))
    }

    /// 上传小文件
    ///
    /// 从池中取出或向服务端申请上传地址；成功后地址放回池中复用，
    /// 失败则丢弃。同一个上传令牌由互斥锁保护，绝不并发使用。
    #[allow(clippy::too_many_arguments)]
    pub fn upload_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_length: u64,
        content_type: &str,
        content_sha1: &str,
        file_info: &FileInfo,
        server_side_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
        body: BodyOpener<'_>,
    ) -> ApiResult<FileVersion> {
        let upload_url = self.upload_url_for_bucket(bucket_id)?;
        let result = {
            let lock = self.token_lock(&upload_url.upload_auth_token);
            let _guard = lock.lock().unwrap();
            self.raw.upload_file(
                &upload_url.upload_url,
                &upload_url.upload_auth_token,
                file_name,
                content_length,
                content_type,
                content_sha1,
                file_info,
                server_side_encryption,
                file_retention,
                legal_hold,
                body,
            )
        };
        match result {
            Ok(version) => {
                self.account_info.put_bucket_upload_url(bucket_id, upload_url);
                Ok(version)
            }
            Err(err) => {
                self.discard_token_lock(&upload_url.upload_auth_token);
                Err(self.enrich_unauthorized(err))
            }
        }
    }

    /// 上传大文件分片
    ///
    /// 上传地址按大文件 ID 池化，纪律与小文件一致。
    pub fn upload_part(
        &self,
        file_id: &str,
        part_number: u32,
        content_length: u64,
        content_sha1: &str,
        server_side_encryption: Option<&EncryptionSetting>,
        body: BodyOpener<'_>,
    ) -> ApiResult<Part> {
        let upload_url = self.upload_url_for_large_file(file_id)?;
        let result = {
            let lock = self.token_lock(&upload_url.upload_auth_token);
            let _guard = lock.lock().unwrap();
            self.raw.upload_part(
                &upload_url.upload_url,
                &upload_url.upload_auth_token,
                part_number,
                content_length,
                content_sha1,
                server_side_encryption,
                body,
            )
        };
        match result {
            Ok(part) => {
                self.account_info.put_large_file_upload_url(file_id, upload_url);
                Ok(part)
            }
            Err(err) => {
                self.discard_token_lock(&upload_url.upload_auth_token);
                Err(self.enrich_unauthorized(err))
            }
        }
    }

    /// 创建存储空间
    pub fn create_bucket(&self, bucket_name: &str, bucket_type: &str) -> ApiResult<Bucket> {
        let account_id = self.account_info.account_id()?;
        let bucket = self.with_auth(|api_url, token| {
            self.raw
                .create_bucket(api_url, token, &account_id, bucket_name, bucket_type)
        })?;
        self.account_info.save_bucket_name(&bucket.bucket_name, &bucket.bucket_id)?;
        Ok(bucket)
    }

    /// 删除存储空间
    pub fn delete_bucket(&self, bucket_id: &str) -> ApiResult<Bucket> {
        let account_id = self.account_info.account_id()?;
        let bucket =
            self.with_auth(|api_url, token| self.raw.delete_bucket(api_url, token, &account_id, bucket_id))?;
        self.account_info.remove_bucket_name(&bucket.bucket_name)?;
        Ok(bucket)
    }

    /// 更新存储空间
    ///
    /// 跨账户复制配置作为不透明负载原样提交
    pub fn update_bucket(
        &self,
        bucket_id: &str,
        bucket_type: Option<&str>,
        bucket_info: Option<&JsonValue>,
        replication_configuration: Option<&JsonValue>,
    ) -> ApiResult<Bucket> {
        let account_id = self.account_info.account_id()?;
        self.with_auth(|api_url, token| {
            self.raw.update_bucket(
                api_url,
                token,
                &account_id,
                bucket_id,
                bucket_type,
                bucket_info,
                replication_configuration,
            )
        })
    }

    /// 列举存储空间
    pub fn list_buckets(&self, bucket_id: Option<&str>, bucket_name: Option<&str>) -> ApiResult<Vec<Bucket>> {
        let account_id = self.account_info.account_id()?;
        self.with_auth(|api_url, token| self.raw.list_buckets(api_url, token, &account_id, bucket_id, bucket_name))
    }

    /// 按名称查询存储空间
    ///
    /// 优先使用账户状态中的名称映射，未命中时向服务端查询并回填映射。
    pub fn get_bucket_by_name(&self, bucket_name: &str) -> ApiResult<Bucket> {
        if let Some(bucket_id) = self.account_info.bucket_id_by_name(bucket_name)? {
            let buckets = self.list_buckets(Some(&bucket_id), None)?;
            if let Some(bucket) = buckets.into_iter().next() {
                return Ok(bucket);
            }
        }
        let buckets = self.list_buckets(None, Some(bucket_name))?;
        let bucket = buckets
            .into_iter()
            .find(|bucket| bucket.bucket_name == bucket_name)
            .ok_or(Error::ResourceNotFound)?;
        self.account_info.save_bucket_name(&bucket.bucket_name, &bucket.bucket_id)?;
        Ok(bucket)
    }

    /// 开始大文件会话
    #[allow(clippy::too_many_arguments)]
    pub fn start_large_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_type: &str,
        file_info: &FileInfo,
        server_side_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
    ) -> ApiResult<UnfinishedLargeFile> {
        self.with_auth(|api_url, token| {
            self.raw.start_large_file(
                api_url,
                token,
                bucket_id,
                file_name,
                content_type,
                file_info,
                server_side_encryption,
                file_retention,
                legal_hold,
            )
        })
    }

    /// 结束大文件会话
    pub fn finish_large_file(&self, file_id: &str, part_sha1_array: &[String]) -> ApiResult<FileVersion> {
        self.with_auth(|api_url, token| self.raw.finish_large_file(api_url, token, file_id, part_sha1_array))
    }

    /// 取消大文件会话
    pub fn cancel_large_file(&self, file_id: &str) -> ApiResult<CancelledLargeFile> {
        self.with_auth(|api_url, token| self.raw.cancel_large_file(api_url, token, file_id))
    }

    /// 列举大文件的一页分片
    pub fn list_parts(
        &self,
        file_id: &str,
        start_part_number: Option<u32>,
        max_part_count: Option<u32>,
    ) -> ApiResult<ListPartsResponse> {
        self.with_auth(|api_url, token| {
            self.raw
                .list_parts(api_url, token, file_id, start_part_number, max_part_count)
        })
    }

    /// 列举大文件的全部分片
    pub fn list_all_parts(&self, file_id: &str) -> ApiResult<Vec<Part>> {
        let mut parts = Vec::new();
        let mut start_part_number = None;
        loop {
            let page = self.list_parts(file_id, start_part_number, None)?;
            parts.extend(page.parts);
            match page.next_part_number {
                Some(next) => start_part_number = Some(next),
                None => return Ok(parts),
            }
        }
    }

    /// 列举一页未完成的大文件会话
    pub fn list_unfinished_large_files(
        &self,
        bucket_id: &str,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListUnfinishedLargeFilesResponse> {
        self.with_auth(|api_url, token| {
            self.raw
                .list_unfinished_large_files(api_url, token, bucket_id, start_file_id, max_file_count, prefix)
        })
    }

    /// 列举全部未完成的大文件会话
    pub fn list_all_unfinished_large_files(
        &self,
        bucket_id: &str,
        prefix: Option<&str>,
    ) -> ApiResult<Vec<UnfinishedLargeFile>> {
        let mut files = Vec::new();
        let mut start_file_id: Option<String> = None;
        loop {
            let page = self.list_unfinished_large_files(bucket_id, start_file_id.as_deref(), None, prefix)?;
            files.extend(page.files);
            match page.next_file_id {
                Some(next) => start_file_id = Some(next),
                None => return Ok(files),
            }
        }
    }

    /// 按名称列举文件
    pub fn list_file_names(
        &self,
        bucket_id: &str,
        start_file_name: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileNamesResponse> {
        self.with_auth(|api_url, token| {
            self.raw
                .list_file_names(api_url, token, bucket_id, start_file_name, max_file_count, prefix)
        })
    }

    /// 按版本列举文件
    pub fn list_file_versions(
        &self,
        bucket_id: &str,
        start_file_name: Option<&str>,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileVersionsResponse> {
        self.with_auth(|api_url, token| {
            self.raw.list_file_versions(
                api_url,
                token,
                bucket_id,
                start_file_name,
                start_file_id,
                max_file_count,
                prefix,
            )
        })
    }

    /// 获取文件信息
    pub fn get_file_info(&self, file_id: &str) -> ApiResult<FileVersion> {
        self.with_auth(|api_url, token| self.raw.get_file_info(api_url, token, file_id))
    }

    /// 删除文件版本
    pub fn delete_file_version(&self, file_id: &str, file_name: &str) -> ApiResult<DeletedFileVersion> {
        self.with_auth(|api_url, token| self.raw.delete_file_version(api_url, token, file_id, file_name))
    }

    /// 隐藏文件
    pub fn hide_file(&self, bucket_id: &str, file_name: &str) -> ApiResult<FileVersion> {
        self.with_auth(|api_url, token| self.raw.hide_file(api_url, token, bucket_id, file_name))
    }

    /// 服务端拷贝整个对象或其一个范围
    #[allow(clippy::too_many_arguments)]
    pub fn copy_file(
        &self,
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
    ) -> ApiResult<FileVersion> {
        self.with_auth(|api_url, token| {
            self.raw.copy_file(
                api_url,
                token,
                source_file_id,
                new_file_name,
                range,
                metadata_directive,
                content_type,
                file_info,
                destination_bucket_id,
                destination_server_side_encryption,
                source_server_side_encryption,
                file_retention,
                legal_hold,
            )
        })
    }

    /// 服务端拷贝为大文件的一个分片
    #[allow(clippy::too_many_arguments)]
    pub fn copy_part(
        &self,
        source_file_id: &str,
        large_file_id: &str,
        part_number: u32,
        range: Option<ByteRange>,
        destination_server_side_encryption: Option<&EncryptionSetting>,
        source_server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<Part> {
        self.with_auth(|api_url, token| {
            self.raw.copy_part(
                api_url,
                token,
                source_file_id,
                large_file_id,
                part_number,
                range,
                destination_server_side_encryption,
                source_server_side_encryption,
            )
        })
    }

    /// 获取下载授权令牌
    pub fn get_download_authorization(
        &self,
        bucket_id: &str,
        file_name_prefix: &str,
        valid_duration_seconds: u64,
    ) -> ApiResult<DownloadAuthorization> {
        self.with_auth(|api_url, token| {
            self.raw
                .get_download_authorization(api_url, token, bucket_id, file_name_prefix, valid_duration_seconds)
        })
    }

    /// 按文件 ID 下载
    pub fn download_file_by_id(
        &self,
        file_id: &str,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        self.with_download_auth(|download_url, token| {
            self.raw
                .download_file_by_id(download_url, Some(token), file_id, range, server_side_encryption)
        })
    }

    /// 按存储空间与文件名下载
    pub fn download_file_by_name(
        &self,
        bucket_name: &str,
        file_name: &str,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        self.with_download_auth(|download_url, token| {
            self.raw.download_file_by_name(
                download_url,
                Some(token),
                bucket_name,
                file_name,
                range,
                server_side_encryption,
            )
        })
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }

    /// 按完整地址下载
    pub fn download_file_from_url(
        &self,
        url: &str,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        self.with_auth(|_, token| {
            self.raw
                .download_file_from_url(url, Some(token), range, server_side_encryption)
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("raw", &self.raw)
            .field("account_info", &self.account_info)
            .finish()
    }
}
