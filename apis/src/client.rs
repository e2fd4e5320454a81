use super::{
    file_name::validate_file_name,
    raw::RawApi,
    types::{
        AccountAuthorization, Bucket, ByteRange, CancelledLargeFile, DeletedFileVersion, DownloadAuthorization,
        DownloadVersion, EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, ListFileNamesResponse,
        ListFileVersionsResponse, ListPartsResponse, ListUnfinishedLargeFilesResponse, MetadataDirective, Part,
        UnfinishedLargeFile, UploadUrlResponse,
    },
};
use b2_http::{
    header::{AUTHORIZATION, CONTENT_TYPE, RANGE},
    HeaderMap, HeaderName, HeaderValue, ResponseBody,
};
use b2_http_client::{
    ApiResult, BodyOpener, Error, HttpClient, TryCount, COPY_REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
use b2_ureq::Client as UreqClient;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::time::Duration;

const API_VERSION_PATH: &str = "b2api/v2";

// 与服务端约定的编码集：除字母数字与 '-' '_' '.' '~' '/' 外全部转义
const FILE_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// 对象名与文件信息值的 URL 编码
pub fn b2_url_encode(value: &str) -> String {
    utf8_percent_encode(value, FILE_NAME_ENCODE_SET).to_string()
}

/// 对象名与文件信息值的 URL 解码
pub fn b2_url_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// 真实协议客户端
///
/// 把每个协议操作映射为一次 HTTP 调用。
/// 所有 JSON 接口都是带授权头的 POST，上传与下载接口分别走独立的地址。
#[derive(Debug, Clone)]
pub struct B2RawClient {
    http: HttpClient,
}

impl B2RawClient {
    /// 基于指定的 HTTP 客户端创建协议客户端
    #[inline]
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// 获取 HTTP 客户端
    #[inline]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    fn call_json<T: DeserializeOwned>(
        &self,
        api_url: &str,
        account_auth_token: &str,
        operation: &str,
        params: JsonValue,
        try_count: TryCount,
        timeout: Duration,
    ) -> ApiResult<T> {
        let url = format!("{}/{API_VERSION_PATH}/{operation}", api_url.trim_end_matches('/'));
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(account_auth_token)?);
        let response = self.http.post_json_return_json(&url, &headers, &params, try_count, timeout)?;
        from_json(response)
    }

    fn download(
        &self,
        url: &str,
        account_auth_token: Option<&str>,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        let mut headers = HeaderMap::new();
        if let Some(token) = account_auth_token {
            headers.insert(AUTHORIZATION, header_value(token)?);
        }
        if let Some(range) = range {
            headers.insert(RANGE, header_value(&range.to_header_value())?);
        }
        add_encryption_headers(&mut headers, server_side_encryption)?;
        let response = self.http.get_content(url, &headers, TryCount::DOWNLOAD)?;
        let (parts, body) = response.into_parts();
        let download_version = download_version_from_headers(&parts.headers)?;
        Ok((download_version, body))
    }
}

impl Default for B2RawClient {
    /// 基于缺省的 Ureq 传输创建协议客户端
    #[inline]
    fn default() -> Self {
        Self::new(HttpClient::new(UreqClient::default()))
    }
}

impl RawApi for B2RawClient {
    fn authorize_account(
        &self,
        realm_url: &str,
        application_key_id: &str,
        application_key: &str,
    ) -> ApiResult<AccountAuthorization> {
        let url = format!(
            "{}/{API_VERSION_PATH}/b2_authorize_account",
            realm_url.trim_end_matches('/')
        );
        let mut headers = HeaderMap::new();
        let basic = base64::encode(format!("{application_key_id}:{application_key}"));
        headers.insert(AUTHORIZATION, header_value(&format!("Basic {basic}"))?);
        let response =
            self.http
                .post_json_return_json(&url, &headers, &json!({}), TryCount::OTHER, DEFAULT_REQUEST_TIMEOUT)?;
        from_json(response)
    }

    fn create_bucket(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_name: &str,
        bucket_type: &str,
    ) -> ApiResult<Bucket> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_create_bucket",
            json!({
                "accountId": account_id,
                "bucketName": bucket_name,
                "bucketType": bucket_type,
            }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn delete_bucket(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_id: &str,
    ) -> ApiResult<Bucket> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_delete_bucket",
            json!({
                "accountId": account_id,
                "bucketId": bucket_id,
            }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn update_bucket(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_id: &str,
        bucket_type: Option<&str>,
        bucket_info: Option<&JsonValue>,
        replication_configuration: Option<&JsonValue>,
    ) -> ApiResult<Bucket> {
        let mut params = JsonMap::new();
        params.insert("accountId".to_owned(), json!(account_id));
        params.insert("bucketId".to_owned(), json!(bucket_id));
        if let Some(bucket_type) = bucket_type {
            params.insert("bucketType".to_owned(), json!(bucket_type));
        }
        if let Some(bucket_info) = bucket_info {
            params.insert("bucketInfo".to_owned(), bucket_info.to_owned());
        }
        if let Some(replication) = replication_configuration {
            params.insert("replicationConfiguration".to_owned(), replication.to_owned());
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_update_bucket",
            JsonValue::Object(params),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn list_buckets(
        &self,
        api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_id: Option<&str>,
        bucket_name: Option<&str>,
    ) -> ApiResult<Vec<Bucket>> {
        let mut params = JsonMap::new();
        params.insert("accountId".to_owned(), json!(account_id));
        if let Some(bucket_id) = bucket_id {
            params.insert("bucketId".to_owned(), json!(bucket_id));
        }
        if let Some(bucket_name) = bucket_name {
            params.insert("bucketName".to_owned(), json!(bucket_name));
        }
        #[derive(serde::Deserialize)]
        struct Buckets {
            buckets: Vec<Bucket>,
        }
        let buckets: Buckets = self.call_json(
            api_url,
            account_auth_token,
            "b2_list_buckets",
            JsonValue::Object(params),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )?;
        Ok(buckets.buckets)
    }

    fn get_upload_url(&self, api_url: &str, account_auth_token: &str, bucket_id: &str) -> ApiResult<UploadUrlResponse> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_get_upload_url",
            json!({ "bucketId": bucket_id }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn get_upload_part_url(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
    ) -> ApiResult<UploadUrlResponse> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_get_upload_part_url",
            json!({ "fileId": file_id }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn upload_file(
        &self,
        upload_url: &str,
        upload_auth_token: &str,
        file_name: &str,
        _content_length: u64,
        content_type: &str,
        content_sha1: &str,
        file_info: &FileInfo,
        server_side_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
        body: BodyOpener<'_>,
    ) -> ApiResult<FileVersion> {
        validate_file_name(file_name)?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(upload_auth_token)?);
        headers.insert(header_name("X-Bz-File-Name")?, header_value(&b2_url_encode(file_name))?);
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        headers.insert(header_name("X-Bz-Content-Sha1")?, header_value(content_sha1)?);
        add_file_info_headers(&mut headers, file_info)?;
        add_encryption_headers(&mut headers, server_side_encryption)?;
        add_file_retention_headers(&mut headers, file_retention)?;
        add_legal_hold_header(&mut headers, legal_hold)?;
        let response = self
            .http
            .post_content_return_json(upload_url, &headers, body, TryCount::DATA)?;
        from_json(response)
    }

    fn upload_part(
        &self,
        upload_url: &str,
        upload_auth_token: &str,
        part_number: u32,
        _content_length: u64,
        content_sha1: &str,
        server_side_encryption: Option<&EncryptionSetting>,
        body: BodyOpener<'_>,
    ) -> ApiResult<Part> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(upload_auth_token)?);
        headers.insert(header_name("X-Bz-Part-Number")?, header_value(&part_number.to_string())?);
        headers.insert(header_name("X-Bz-Content-Sha1")?, header_value(content_sha1)?);
        add_encryption_headers(&mut headers, server_side_encryption)?;
        let response = self
            .http
            .post_content_return_json(upload_url, &headers, body, TryCount::DATA)?;
        from_json(response)
    }

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
    ) -> ApiResult<UnfinishedLargeFile> {
        validate_file_name(file_name)?;
        let mut params = JsonMap::new();
        params.insert("bucketId".to_owned(), json!(bucket_id));
        params.insert("fileName".to_owned(), json!(file_name));
        params.insert("contentType".to_owned(), json!(content_type));
        params.insert("fileInfo".to_owned(), json!(file_info));
        if let Some(encryption) = server_side_encryption {
            params.insert("serverSideEncryption".to_owned(), encryption.to_owned());
        }
        if let Some(file_retention) = file_retention {
            params.insert("fileRetention".to_owned(), file_retention.to_owned());
        }
        if let Some(legal_hold) = legal_hold {
            params.insert("legalHold".to_owned(), legal_hold.to_owned());
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_start_large_file",
            JsonValue::Object(params),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn finish_large_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        part_sha1_array: &[String],
    ) -> ApiResult<FileVersion> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_finish_large_file",
            json!({
                "fileId": file_id,
                "partSha1Array": part_sha1_array,
            }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn cancel_large_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
    ) -> ApiResult<CancelledLargeFile> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_cancel_large_file",
            json!({ "fileId": file_id }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn list_parts(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        start_part_number: Option<u32>,
        max_part_count: Option<u32>,
    ) -> ApiResult<ListPartsResponse> {
        let mut params = JsonMap::new();
        params.insert("fileId".to_owned(), json!(file_id));
        if let Some(start_part_number) = start_part_number {
            params.insert("startPartNumber".to_owned(), json!(start_part_number));
        }
        if let Some(max_part_count) = max_part_count {
            params.insert("maxPartCount".to_owned(), json!(max_part_count));
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_list_parts",
            JsonValue::Object(params),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn list_unfinished_large_files(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListUnfinishedLargeFilesResponse> {
        let mut params = JsonMap::new();
        params.insert("bucketId".to_owned(), json!(bucket_id));
        if let Some(start_file_id) = start_file_id {
            params.insert("startFileId".to_owned(), json!(start_file_id));
        }
        if let Some(max_file_count) = max_file_count {
            params.insert("maxFileCount".to_owned(), json!(max_file_count));
        }
        if let Some(prefix) = prefix {
            params.insert("namePrefix".to_owned(), json!(prefix));
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_list_unfinished_large_files",
            JsonValue::Object(params),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn list_file_names(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_name: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileNamesResponse> {
        let mut params = JsonMap::new();
        params.insert("bucketId".to_owned(), json!(bucket_id));
        if let Some(start_file_name) = start_file_name {
            params.insert("startFileName".to_owned(), json!(start_file_name));
        }
        if let Some(max_file_count) = max_file_count {
            params.insert("maxFileCount".to_owned(), json!(max_file_count));
        }
        if let Some(prefix) = prefix {
            params.insert("prefix".to_owned(), json!(prefix));
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_list_file_names",
            JsonValue::Object(params),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn list_file_versions(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_name: Option<&str>,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileVersionsResponse> {
        let mut params = JsonMap::new();
        params.insert("bucketId".to_owned(), json!(bucket_id));
        if let Some(start_file_name) = start_file_name {
            params.insert("startFileName".to_owned(), json!(start_file_name));
        }
        if let Some(start_file_id) = start_file_id {
            params.insert("startFileId".to_owned(), json!(start_file_id));
        }
        if let Some(max_file_count) = max_file_count {
            params.insert("maxFileCount".to_owned(), json!(max_file_count));
        }
        if let Some(prefix) = prefix {
            params.insert("prefix".to_owned(), json!(prefix));
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_list_file_versions",
            JsonValue::Object(params),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn get_file_info(&self, api_url: &str, account_auth_token: &str, file_id: &str) -> ApiResult<FileVersion> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_get_file_info",
            json!({ "fileId": file_id }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn delete_file_version(
        &self,
        api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        file_name: &str,
    ) -> ApiResult<DeletedFileVersion> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_delete_file_version",
            json!({
                "fileId": file_id,
                "fileName": file_name,
            }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn hide_file(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        file_name: &str,
    ) -> ApiResult<FileVersion> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_hide_file",
            json!({
                "bucketId": bucket_id,
                "fileName": file_name,
            }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

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
    ) -> ApiResult<FileVersion> {
        validate_file_name(new_file_name)?;
        validate_metadata_directive(metadata_directive, content_type, file_info)?;
        let mut params = JsonMap::new();
        params.insert("sourceFileId".to_owned(), json!(source_file_id));
        params.insert("fileName".to_owned(), json!(new_file_name));
        params.insert("metadataDirective".to_owned(), json!(metadata_directive.as_str()));
        if let Some(range) = range {
            params.insert("range".to_owned(), json!(format!("bytes={range}")));
        }
        if let Some(content_type) = content_type {
            params.insert("contentType".to_owned(), json!(content_type));
        }
        if let Some(file_info) = file_info {
            params.insert("fileInfo".to_owned(), json!(file_info));
        }
        if let Some(destination_bucket_id) = destination_bucket_id {
            params.insert("destinationBucketId".to_owned(), json!(destination_bucket_id));
        }
        if let Some(encryption) = destination_server_side_encryption {
            params.insert("destinationServerSideEncryption".to_owned(), encryption.to_owned());
        }
        if let Some(encryption) = source_server_side_encryption {
            params.insert("sourceServerSideEncryption".to_owned(), encryption.to_owned());
        }
        if let Some(file_retention) = file_retention {
            params.insert("fileRetention".to_owned(), file_retention.to_owned());
        }
        if let Some(legal_hold) = legal_hold {
            params.insert("legalHold".to_owned(), legal_hold.to_owned());
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_copy_file",
            JsonValue::Object(params),
            TryCount::DATA,
            COPY_REQUEST_TIMEOUT,
        )
    }

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
    ) -> ApiResult<Part> {
        let mut params = JsonMap::new();
        params.insert("sourceFileId".to_owned(), json!(source_file_id));
        params.insert("largeFileId".to_owned(), json!(large_file_id));
        params.insert("partNumber".to_owned(), json!(part_number));
        if let Some(range) = range {
            params.insert("range".to_owned(), json!(format!("bytes={range}")));
        }
        if let Some(encryption) = destination_server_side_encryption {
            params.insert("destinationServerSideEncryption".to_owned(), encryption.to_owned());
        }
        if let Some(encryption) = source_server_side_encryption {
            params.insert("sourceServerSideEncryption".to_owned(), encryption.to_owned());
        }
        self.call_json(
            api_url,
            account_auth_token,
            "b2_copy_part",
            JsonValue::Object(params),
            TryCount::DATA,
            COPY_REQUEST_TIMEOUT,
        )
    }

    fn get_download_authorization(
        &self,
        api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        file_name_prefix: &str,
        valid_duration_seconds: u64,
    ) -> ApiResult<DownloadAuthorization> {
        self.call_json(
            api_url,
            account_auth_token,
            "b2_get_download_authorization",
            json!({
                "bucketId": bucket_id,
                "fileNamePrefix": file_name_prefix,
                "validDurationInSeconds": valid_duration_seconds,
            }),
            TryCount::OTHER,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn download_file_by_id(
        &self,
        download_url: &str,
        account_auth_token: Option<&str>,
        file_id: &str,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        let url = format!(
            "{}/{API_VERSION_PATH}/b2_download_file_by_id?fileId={}",
            download_url.trim_end_matches('/'),
            b2_url_encode(file_id),
        );
        self.download(&url, account_auth_token, range, server_side_encryption)
    }

    fn download_file_by_name(
        &self,
        download_url: &str,
        account_auth_token: Option<&str>,
        bucket_name: &str,
        file_name: &str,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        let url = format!(
            "{}/file/{bucket_name}/{}",
            download_url.trim_end_matches('/'),
            b2_url_encode(file_name),
        );
        self.download(&url, account_auth_token, range, server_side_encryption)
    }

    fn download_file_from_url(
        &self,
        url: &str,
        account_auth_token: Option<&str>,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        self.download(url, account_auth_token, range, server_side_encryption)
    }
}

/// 校验服务端拷贝的元信息处理指令
///
/// `COPY` 不允许提供新的内容类型与文件信息，`REPLACE` 至少需要内容类型。
pub fn validate_metadata_directive(
    metadata_directive: MetadataDirective,
    content_type: Option<&str>,
    file_info: Option<&FileInfo>,
) -> ApiResult<()> {
    match metadata_directive {
        MetadataDirective::Copy => {
            if content_type.is_some() || file_info.is_some() {
                return Err(Error::InvalidMetadataDirective {
                    message: "content_type and file_info should be None when metadata_directive is COPY".to_owned(),
                });
            }
        }
        MetadataDirective::Replace => {
            if content_type.is_none() {
                return Err(Error::InvalidMetadataDirective {
                    message: "content_type cannot be None when metadata_directive is REPLACE".to_owned(),
                });
            }
        }
    }
    Ok(())
}

fn from_json<T: DeserializeOwned>(value: JsonValue) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|err| Error::InvalidJsonResponse {
        content: err.to_string(),
    })
}

fn header_name(name: &str) -> ApiResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|err| Error::InvalidArgument {
        message: format!("invalid header name {name:?}: {err}"),
    })
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| Error::InvalidArgument {
        message: format!("invalid header value {value:?}: {err}"),
    })
}

fn add_file_info_headers(headers: &mut HeaderMap, file_info: &FileInfo) -> ApiResult<()> {
    for (key, value) in file_info {
        headers.insert(
            header_name(&format!("X-Bz-Info-{key}"))?,
            header_value(&b2_url_encode(value))?,
        );
    }
    Ok(())
}

fn add_encryption_headers(headers: &mut HeaderMap, encryption: Option<&EncryptionSetting>) -> ApiResult<()> {
    let Some(encryption) = encryption else {
        return Ok(());
    };
    match encryption.get("mode").and_then(JsonValue::as_str) {
        Some("SSE-B2") => {
            let algorithm = encryption.get("algorithm").and_then(JsonValue::as_str).unwrap_or("AES256");
            headers.insert(header_name("X-Bz-Server-Side-Encryption")?, header_value(algorithm)?);
        }
        Some("SSE-C") => {
            let algorithm = encryption.get("algorithm").and_then(JsonValue::as_str).unwrap_or("AES256");
            headers.insert(
                header_name("X-Bz-Server-Side-Encryption-Customer-Algorithm")?,
                header_value(algorithm)?,
            );
            if let Some(key) = encryption.get("customerKey").and_then(JsonValue::as_str) {
                headers.insert(
                    header_name("X-Bz-Server-Side-Encryption-Customer-Key")?,
                    header_value(key)?,
                );
            }
            if let Some(key_md5) = encryption.get("customerKeyMd5").and_then(JsonValue::as_str) {
                headers.insert(
                    header_name("X-Bz-Server-Side-Encryption-Customer-Key-Md5")?,
                    header_value(key_md5)?,
                );
            }
        }
        _ => {}
    }
    Ok(())
}

fn add_file_retention_headers(headers: &mut HeaderMap, file_retention: Option<&FileRetention>) -> ApiResult<()> {
    let Some(file_retention) = file_retention else {
        return Ok(());
    };
    if let Some(mode) = file_retention.get("mode").and_then(JsonValue::as_str) {
        headers.insert(header_name("X-Bz-File-Retention-Mode")?, header_value(mode)?);
    }
    if let Some(timestamp) = file_retention.get("retainUntilTimestamp").and_then(JsonValue::as_u64) {
        headers.insert(
            header_name("X-Bz-File-Retain-Until-Timestamp")?,
            header_value(&timestamp.to_string())?,
        );
    }
    Ok(())
}

fn add_legal_hold_header(headers: &mut HeaderMap, legal_hold: Option<&LegalHold>) -> ApiResult<()> {
    let Some(legal_hold) = legal_hold else {
        return Ok(());
    };
    if let Some(value) = legal_hold.as_str() {
        headers.insert(header_name("X-Bz-File-Legal-Hold")?, header_value(value)?);
    }
    Ok(())
}

fn required_header(headers: &HeaderMap, name: &str) -> ApiResult<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .ok_or_else(|| Error::InvalidJsonResponse {
            content: format!("missing response header {name}"),
        })
}

fn download_version_from_headers(headers: &HeaderMap) -> ApiResult<DownloadVersion> {
    let content_length = required_header(headers, "content-length")?
        .parse()
        .map_err(|_| Error::InvalidJsonResponse {
            content: "invalid content-length header".to_owned(),
        })?;
    let mut file_info = FileInfo::new();
    for (name, value) in headers {
        let name = name.as_str();
        if let Some(key) = name.strip_prefix("x-bz-info-") {
            if let Ok(value) = value.to_str() {
                file_info.insert(key.to_owned(), b2_url_decode(value));
            }
        }
    }
    let content_range = headers
        .get("content-range")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range);
    Ok(DownloadVersion {
        file_id: required_header(headers, "x-bz-file-id")?,
        file_name: b2_url_decode(&required_header(headers, "x-bz-file-name")?),
        content_length,
        content_type: headers
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned),
        content_sha1: headers
            .get("x-bz-content-sha1")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("none")
            .to_owned(),
        file_info,
        upload_timestamp: headers
            .get("x-bz-upload-timestamp")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or_default(),
        content_range,
    })
}

fn parse_content_range(value: &str) -> Option<(u64, u64, u64)> {
    let rest = value.strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?, total.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b2_url_encode_round_trip() {
        for name in ["simple.txt", "dir/子目录/文件.log", "with space & symbols!.bin"] {
            assert_eq!(b2_url_decode(&b2_url_encode(name)), name);
        }
        assert_eq!(b2_url_encode("a b/c"), "a%20b/c");
    }

    #[test]
    fn test_metadata_directive_validation() {
        assert!(validate_metadata_directive(MetadataDirective::Copy, None, None).is_ok());
        assert!(validate_metadata_directive(MetadataDirective::Copy, Some("text/plain"), None).is_err());
        assert!(validate_metadata_directive(MetadataDirective::Replace, None, None).is_err());
        assert!(validate_metadata_directive(MetadataDirective::Replace, Some("text/plain"), None).is_ok());
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("bytes 3-9/20"), Some((3, 9, 20)));
        assert_eq!(parse_content_range("bytes 3-9"), None);
        assert_eq!(parse_content_range("unexpected"), None);
    }
}
