use super::{
    client::{b2_url_decode, validate_metadata_directive},
    file_name::validate_file_name,
    raw::{RawApi, HEX_DIGITS_AT_END},
    types::{
        AccountAuthorization, Bucket, ByteRange, CancelledLargeFile, DeletedFileVersion, DownloadAuthorization,
        DownloadVersion, EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, ListFileNamesResponse,
        ListFileVersionsResponse, ListPartsResponse, ListUnfinishedLargeFilesResponse, MetadataDirective, Part,
        UnfinishedLargeFile, UploadUrlResponse,
    },
};
use b2_account::{Allowed, ALL_CAPABILITIES};
use b2_http::ResponseBody;
use b2_http_client::{ApiResult, BodyOpener, Error};
use b2_utils::{hex_sha1_of_bytes, HEX_SHA1_SIZE};
use serde_json::Value as JsonValue;
use std::{
    collections::{BTreeMap, HashMap},
    io::Read,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

const API_URL: &str = "http://api.example.com";
const DOWNLOAD_URL: &str = "http://download.example.com";
const UPLOAD_URL: &str = "http://upload.example.com";
const S3_API_URL: &str = "http://s3.api.example.com";
const REALM: &str = "production";

/// 模拟服务端允许的最小分片大小，远小于真实服务，便于测试
pub const SIMULATOR_MIN_PART_SIZE: u64 = 200;

const MAX_LIST_COUNT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FileKey {
    file_name: String,
    reverse_timestamp: u64,
    file_id: String,
}

impl FileKey {
    fn new(file_name: &str, upload_timestamp: u64, file_id: &str) -> Self {
        Self {
            file_name: file_name.to_owned(),
            reverse_timestamp: u64::MAX - upload_timestamp,
            file_id: file_id.to_owned(),
        }
    }
}

#[derive(Debug)]
struct SimFile {
    version: FileVersion,
    data: Vec<u8>,
}

#[derive(Debug)]
struct SimBucket {
    bucket: Bucket,
    files: BTreeMap<FileKey, SimFile>,
}

#[derive(Debug)]
struct SimPart {
    part: Part,
    data: Vec<u8>,
}

#[derive(Debug)]
struct SimLargeFile {
    info: UnfinishedLargeFile,
    parts: BTreeMap<u32, SimPart>,
}

#[derive(Debug)]
struct SimKey {
    application_key: String,
    account_id: String,
    allowed: Allowed,
}

#[derive(Debug, Clone)]
enum UploadTarget {
    Bucket(String),
    LargeFile(String),
}

#[derive(Debug, Default)]
struct SimState {
    keys: HashMap<String, SimKey>,
    auth_tokens: HashMap<String, String>,
    buckets: BTreeMap<String, SimBucket>,
    large_files: HashMap<String, SimLargeFile>,
    upload_targets: HashMap<String, UploadTarget>,
    clock_millis: u64,
    counter: u64,
}

impl SimState {
    fn next_counter(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        self.clock_millis = now.max(self.clock_millis + 1);
        self.clock_millis
    }

    fn account_for_token(&self, auth_token: &str) -> ApiResult<(&str, &Allowed)> {
        let key_id = self.auth_tokens.get(auth_token).ok_or(Error::InvalidAuthToken {
            message: "Invalid authorization token".to_owned(),
            code: "bad_auth_token".to_owned(),
        })?;
        let key = self.keys.get(key_id).ok_or(Error::InvalidAuthToken {
            message: "Invalid authorization token".to_owned(),
            code: "bad_auth_token".to_owned(),
        })?;
        Ok((key.account_id.as_str(), &key.allowed))
    }

    fn check_capability(&self, auth_token: &str, capability: &str) -> ApiResult<String> {
        let (account_id, allowed) = self.account_for_token(auth_token)?;
        if !allowed.has_capability(capability) {
            return Err(Error::Unauthorized {
                message: String::new(),
                code: "unauthorized".to_owned(),
            });
        }
        Ok(account_id.to_owned())
    }

    fn check_bucket_restriction(&self, auth_token: &str, bucket_id: &str) -> ApiResult<()> {
        let (_, allowed) = self.account_for_token(auth_token)?;
        if let Some(allowed_bucket_id) = &allowed.bucket_id {
            if allowed_bucket_id != bucket_id {
                return Err(Error::Unauthorized {
                    message: String::new(),
                    code: "unauthorized".to_owned(),
                });
            }
        }
        Ok(())
    }

    fn bucket(&self, bucket_id: &str) -> ApiResult<&SimBucket> {
        self.buckets.get(bucket_id).ok_or_else(|| Error::BucketIdNotFound {
            bucket_id: bucket_id.to_owned(),
        })
    }

    fn bucket_mut(&mut self, bucket_id: &str) -> ApiResult<&mut SimBucket> {
        self.buckets.get_mut(bucket_id).ok_or_else(|| Error::BucketIdNotFound {
            bucket_id: bucket_id.to_owned(),
        })
    }

    fn find_file_by_id(&self, file_id: &str) -> ApiResult<(&SimBucket, &SimFile)> {
        for bucket in self.buckets.values() {
            if let Some(file) = bucket.files.values().find(|file| file.version.file_id == file_id) {
                return Ok((bucket, file));
            }
        }
        Err(Error::FileNotPresent {
            file_id_or_name: file_id.to_owned(),
        })
    }

    fn insert_version(&mut self, bucket_id: &str, version: FileVersion, data: Vec<u8>) -> ApiResult<()> {
        let key = FileKey::new(&version.file_name, version.upload_timestamp, &version.file_id);
        self.bucket_mut(bucket_id)?.files.insert(key, SimFile { version, data });
        Ok(())
    }
}

/// 协议模拟实现
///
/// 在内存中模拟服务端行为，供测试在不触网的情况下验证客户端逻辑。
/// 支持注入上传失败与截断下载响应，以演练重试与续传路径。
#[derive(Debug, Default)]
pub struct RawSimulator {
    state: Mutex<SimState>,
    upload_errors: Mutex<Vec<Error>>,
    download_truncation: Mutex<Option<u64>>,
    part_upload_count: AtomicU64,
}

impl RawSimulator {
    /// 创建协议模拟实现
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 注册一个账户，返回账户 ID 与主密钥
    pub fn create_account(&self) -> (String, String) {
        let mut state = self.state.lock().unwrap();
        let index = state.next_counter();
        let account_id = format!("account-{index}");
        let application_key = format!("master-key-{index}");
        state.keys.insert(
            account_id.to_owned(),
            SimKey {
                application_key: application_key.to_owned(),
                account_id: account_id.to_owned(),
                allowed: Allowed::default(),
            },
        );
        (account_id, application_key)
    }

    /// 注册一个受限应用密钥，返回密钥 ID 与密钥
    pub fn create_key(
        &self,
        account_id: &str,
        capabilities: &[&str],
        bucket_id: Option<&str>,
        name_prefix: Option<&str>,
    ) -> (String, String) {
        let mut state = self.state.lock().unwrap();
        let index = state.next_counter();
        let key_id = format!("app-key-id-{index}");
        let application_key = format!("app-key-{index}");
        let bucket_name = bucket_id.and_then(|bucket_id| {
            state
                .buckets
                .get(bucket_id)
                .map(|bucket| bucket.bucket.bucket_name.to_owned())
        });
        state.keys.insert(
            key_id.to_owned(),
            SimKey {
                application_key: application_key.to_owned(),
                account_id: account_id.to_owned(),
                allowed: Allowed {
                    capabilities: capabilities.iter().map(|&capability| capability.to_owned()).collect(),
                    bucket_id: bucket_id.map(ToOwned::to_owned),
                    bucket_name,
                    name_prefix: name_prefix.map(ToOwned::to_owned),
                },
            },
        );
        (key_id, application_key)
    }

    /// 注入若干上传失败
    ///
    /// 随后的每次上传尝试都会取出一个错误返回，直到耗尽。
    pub fn set_upload_errors(&self, errors: Vec<Error>) {
        *self.upload_errors.lock().unwrap() = errors;
    }

    /// 把下一个下载响应的内容截断到指定字节数
    ///
    /// 用于演练下载器对连接中断的补偿逻辑。
    pub fn truncate_next_download(&self, bytes: u64) {
        *self.download_truncation.lock().unwrap() = Some(bytes);
    }

    /// 使一个授权令牌立即失效
    ///
    /// 用于演练会话的自动重新授权。
    pub fn expire_auth_token(&self, auth_token: &str) {
        self.state.lock().unwrap().auth_tokens.remove(auth_token);
    }

    /// 历史上收到的分片上传次数
    pub fn part_upload_count(&self) -> u64 {
        self.part_upload_count.load(AtomicOrdering::SeqCst)
    }

    fn pop_upload_error(&self) -> Option<Error> {
        let mut errors = self.upload_errors.lock().unwrap();
        if errors.is_empty() {
            None
        } else {
            Some(errors.remove(0))
        }
    }

    fn read_body(&self, body: BodyOpener<'_>, content_sha1: &str, content_length: u64) -> ApiResult<(Vec<u8>, String)> {
        let (mut reader, size) = body()?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(|err| Error::ServiceError {
            message: format!("500 internal_error failed to read upload body: {err}"),
        })?;
        if data.len() as u64 != content_length || size != content_length {
            return Err(Error::BadRequest {
                message: format!(
                    "content length mismatch: declared {content_length}, received {}",
                    data.len()
                ),
                code: "bad_request".to_owned(),
            });
        }
        if content_sha1 == HEX_DIGITS_AT_END {
            if data.len() < HEX_SHA1_SIZE {
                return Err(Error::BadRequest {
                    message: "body too short for trailing sha1".to_owned(),
                    code: "bad_request".to_owned(),
                });
            }
            let payload_len = data.len() - HEX_SHA1_SIZE;
            let declared = String::from_utf8_lossy(&data[payload_len..]).into_owned();
            data.truncate(payload_len);
            let actual = hex_sha1_of_bytes(&data);
            if declared != actual {
                return Err(Error::BadRequest {
                    message: format!("sha1 mismatch: declared {declared}, actual {actual}"),
                    code: "bad_request".to_owned(),
                });
            }
            Ok((data, actual))
        } else {
            let actual = hex_sha1_of_bytes(&data);
            if content_sha1 != actual {
                return Err(Error::BadRequest {
                    message: format!("sha1 mismatch: declared {content_sha1}, actual {actual}"),
                    code: "bad_request".to_owned(),
                });
            }
            Ok((data, actual))
        }
    }

    fn upload_target(&self, upload_url: &str, upload_auth_token: &str) -> ApiResult<UploadTarget> {
        let state = self.state.lock().unwrap();
        let target = state
            .upload_targets
            .get(upload_auth_token)
            .ok_or(Error::InvalidAuthToken {
                message: "Invalid upload authorization token".to_owned(),
                code: "bad_auth_token".to_owned(),
            })?;
        let expected_prefix = match target {
            UploadTarget::Bucket(bucket_id) => format!("{UPLOAD_URL}/{bucket_id}/"),
            UploadTarget::LargeFile(file_id) => format!("{UPLOAD_URL}/part/{file_id}/"),
        };
        if !upload_url.starts_with(&expected_prefix) {
            return Err(Error::InvalidAuthToken {
                message: "upload url does not match upload token".to_owned(),
                code: "bad_auth_token".to_owned(),
            });
        }
        Ok(target.to_owned())
    }

    fn serve_download(
        &self,
        file: &SimFile,
        range: Option<ByteRange>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        let version = &file.version;
        let total_size = file.data.len() as u64;
        let (slice, content_range) = match range {
            None => (file.data.to_owned(), None),
            Some(range) => {
                if range.start > range.end || range.end >= total_size {
                    return Err(Error::UnsatisfiableRange);
                }
                (
                    file.data[range.start as usize..=range.end as usize].to_vec(),
                    Some((range.start, range.end, total_size)),
                )
            }
        };
        let mut slice = slice;
        if let Some(truncation) = self.download_truncation.lock().unwrap().take() {
            slice.truncate(truncation as usize);
        }
        let download_version = DownloadVersion {
            file_id: version.file_id.to_owned(),
            file_name: version.file_name.to_owned(),
            content_length: content_range
                .map(|(start, end, _)| end - start + 1)
                .unwrap_or(total_size),
            content_type: version.content_type.to_owned(),
            content_sha1: version.content_sha1.to_owned().unwrap_or_else(|| "none".to_owned()),
            file_info: version.file_info.to_owned(),
            upload_timestamp: version.upload_timestamp,
            content_range,
        };
        Ok((download_version, ResponseBody::from_bytes(slice)))
    }
}

impl RawApi for RawSimulator {
    fn authorize_account(
        &self,
        _realm_url: &str,
        application_key_id: &str,
        application_key: &str,
    ) -> ApiResult<AccountAuthorization> {
        let mut state = self.state.lock().unwrap();
        let key = state.keys.get(application_key_id).ok_or(Error::Unauthorized {
            message: "bad application key id".to_owned(),
            code: "unauthorized".to_owned(),
        })?;
        if key.application_key != application_key {
            return Err(Error::Unauthorized {
                message: "bad application key".to_owned(),
                code: "unauthorized".to_owned(),
            });
        }
        let account_id = key.account_id.to_owned();
        let allowed = key.allowed.to_owned();
        let index = state.next_counter();
        let auth_token = format!("auth-token-{index}");
        state
            .auth_tokens
            .insert(auth_token.to_owned(), application_key_id.to_owned());
        Ok(AccountAuthorization {
            account_id,
            authorization_token: auth_token,
            api_url: API_URL.to_owned(),
            download_url: DOWNLOAD_URL.to_owned(),
            recommended_part_size: SIMULATOR_MIN_PART_SIZE,
            absolute_minimum_part_size: SIMULATOR_MIN_PART_SIZE,
            allowed,
            s3_api_url: S3_API_URL.to_owned(),
        })
    }

    fn create_bucket(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_name: &str,
        bucket_type: &str,
    ) -> ApiResult<Bucket> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeBuckets")?;
        if state
            .buckets
            .values()
            .any(|bucket| bucket.bucket.bucket_name == bucket_name)
        {
            return Err(Error::DuplicateBucketName {
                bucket_name: bucket_name.to_owned(),
            });
        }
        let index = state.next_counter();
        let bucket = Bucket {
            account_id: account_id.to_owned(),
            bucket_id: format!("bucket-{index}"),
            bucket_name: bucket_name.to_owned(),
            bucket_type: bucket_type.to_owned(),
            bucket_info: JsonValue::Object(Default::default()),
            revision: 1,
            replication_configuration: None,
        };
        state.buckets.insert(
            bucket.bucket_id.to_owned(),
            SimBucket {
                bucket: bucket.to_owned(),
                files: Default::default(),
            },
        );
        Ok(bucket)
    }

    fn delete_bucket(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        _account_id: &str,
        bucket_id: &str,
    ) -> ApiResult<Bucket> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "deleteBuckets")?;
        state.bucket(bucket_id)?;
        let bucket = state.buckets.remove(bucket_id).map(|bucket| bucket.bucket).unwrap();
        Ok(bucket)
    }

    fn update_bucket(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        _account_id: &str,
        bucket_id: &str,
        bucket_type: Option<&str>,
        bucket_info: Option<&JsonValue>,
        replication_configuration: Option<&JsonValue>,
    ) -> ApiResult<Bucket> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeBuckets")?;
        let bucket = state.bucket_mut(bucket_id)?;
        if let Some(bucket_type) = bucket_type {
            bucket.bucket.bucket_type = bucket_type.to_owned();
        }
        if let Some(bucket_info) = bucket_info {
            bucket.bucket.bucket_info = bucket_info.to_owned();
        }
        if let Some(replication) = replication_configuration {
            bucket.bucket.replication_configuration = Some(replication.to_owned());
        }
        bucket.bucket.revision += 1;
        Ok(bucket.bucket.to_owned())
    }

    fn list_buckets(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        account_id: &str,
        bucket_id: Option<&str>,
        bucket_name: Option<&str>,
    ) -> ApiResult<Vec<Bucket>> {
        let state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "listBuckets")?;
        Ok(state
            .buckets
            .values()
            .map(|bucket| &bucket.bucket)
            .filter(|bucket| bucket.account_id == account_id)
            .filter(|bucket| bucket_id.map_or(true, |id| bucket.bucket_id == id))
            .filter(|bucket| bucket_name.map_or(true, |name| bucket.bucket_name == name))
            .cloned()
            .collect())
    }

    fn get_upload_url(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
    ) -> ApiResult<UploadUrlResponse> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        state.check_bucket_restriction(account_auth_token, bucket_id)?;
        state.bucket(bucket_id)?;
        let index = state.next_counter();
        let upload_url = format!("{UPLOAD_URL}/{bucket_id}/{index}");
        let token = format!("upload-token-{index}");
        state
            .upload_targets
            .insert(token.to_owned(), UploadTarget::Bucket(bucket_id.to_owned()));
        Ok(UploadUrlResponse {
            upload_url,
            authorization_token: token,
        })
    }

    fn get_upload_part_url(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        file_id: &str,
    ) -> ApiResult<UploadUrlResponse> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        if !state.large_files.contains_key(file_id) {
            return Err(Error::FileNotPresent {
                file_id_or_name: file_id.to_owned(),
            });
        }
        let index = state.next_counter();
        let upload_url = format!("{UPLOAD_URL}/part/{file_id}/{index}");
        let token = format!("part-upload-token-{index}");
        state
            .upload_targets
            .insert(token.to_owned(), UploadTarget::LargeFile(file_id.to_owned()));
        Ok(UploadUrlResponse {
            upload_url,
            authorization_token: token,
        })
    }

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
    ) -> ApiResult<FileVersion> {
        validate_file_name(file_name)?;
        if let Some(err) = self.pop_upload_error() {
            return Err(err);
        }
        let target = self.upload_target(upload_url, upload_auth_token)?;
        let UploadTarget::Bucket(bucket_id) = target else {
            return Err(Error::InvalidAuthToken {
                message: "part upload token used for small file upload".to_owned(),
                code: "bad_auth_token".to_owned(),
            });
        };
        let (data, sha1) = self.read_body(body, content_sha1, content_length)?;
        let mut state = self.state.lock().unwrap();
        let index = state.next_counter();
        let upload_timestamp = state.next_timestamp();
        let version = FileVersion {
            file_id: format!("file-{index:010}"),
            file_name: file_name.to_owned(),
            bucket_id: Some(bucket_id.to_owned()),
            content_length: data.len() as u64,
            content_type: Some(content_type.to_owned()),
            content_sha1: Some(sha1),
            file_info: file_info.to_owned(),
            action: "upload".to_owned(),
            upload_timestamp,
            server_side_encryption: server_side_encryption.map(ToOwned::to_owned),
            file_retention: file_retention.map(ToOwned::to_owned),
            legal_hold: legal_hold.map(ToOwned::to_owned),
        };
        state.insert_version(&bucket_id, version.to_owned(), data)?;
        Ok(version)
    }

    fn upload_part(
        &self,
        upload_url: &str,
        upload_auth_token: &str,
        part_number: u32,
        content_length: u64,
        content_sha1: &str,
        _server_side_encryption: Option<&EncryptionSetting>,
        body: BodyOpener<'_>,
    ) -> ApiResult<Part> {
        self.part_upload_count.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(err) = self.pop_upload_error() {
            return Err(err);
        }
        let target = self.upload_target(upload_url, upload_auth_token)?;
        let UploadTarget::LargeFile(file_id) = target else {
            return Err(Error::InvalidAuthToken {
                message: "small file upload token used for part upload".to_owned(),
                code: "bad_auth_token".to_owned(),
            });
        };
        let (data, sha1) = self.read_body(body, content_sha1, content_length)?;
        let mut state = self.state.lock().unwrap();
        let large_file = state.large_files.get_mut(&file_id).ok_or(Error::FileNotPresent {
            file_id_or_name: file_id.to_owned(),
        })?;
        let part = Part {
            file_id: file_id.to_owned(),
            part_number,
            content_length: data.len() as u64,
            content_sha1: sha1,
        };
        large_file.parts.insert(part_number, SimPart { part: part.to_owned(), data });
        Ok(part)
    }

    fn start_large_file(
        &self,
        _api_url: &str,
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
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        state.check_bucket_restriction(account_auth_token, bucket_id)?;
        state.bucket(bucket_id)?;
        let index = state.next_counter();
        let upload_timestamp = state.next_timestamp();
        let info = UnfinishedLargeFile {
            file_id: format!("large-{index:010}"),
            file_name: file_name.to_owned(),
            bucket_id: bucket_id.to_owned(),
            content_type: Some(content_type.to_owned()),
            file_info: file_info.to_owned(),
            upload_timestamp,
            server_side_encryption: server_side_encryption.map(ToOwned::to_owned),
            file_retention: file_retention.map(ToOwned::to_owned),
            legal_hold: legal_hold.map(ToOwned::to_owned),
        };
        state.large_files.insert(
            info.file_id.to_owned(),
            SimLargeFile {
                info: info.to_owned(),
                parts: Default::default(),
            },
        );
        Ok(info)
    }

    fn finish_large_file(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        part_sha1_array: &[String],
    ) -> ApiResult<FileVersion> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        let large_file = state.large_files.get(file_id).ok_or(Error::FileNotPresent {
            file_id_or_name: file_id.to_owned(),
        })?;
        if large_file.parts.len() != part_sha1_array.len() {
            return Err(Error::MissingPart {
                file_id: file_id.to_owned(),
            });
        }
        let mut data = Vec::new();
        for (index, (part_number, part)) in large_file.parts.iter().enumerate() {
            if *part_number as usize != index + 1 {
                return Err(Error::MissingPart {
                    file_id: file_id.to_owned(),
                });
            }
            if part.part.content_sha1 != part_sha1_array[index] {
                return Err(Error::PartSha1Mismatch {
                    file_id: file_id.to_owned(),
                });
            }
            data.extend_from_slice(&part.data);
        }
        let info = large_file.info.to_owned();
        state.large_files.remove(file_id);
        let upload_timestamp = state.next_timestamp();
        let version = FileVersion {
            file_id: file_id.to_owned(),
            file_name: info.file_name.to_owned(),
            bucket_id: Some(info.bucket_id.to_owned()),
            content_length: data.len() as u64,
            content_type: info.content_type.to_owned(),
            content_sha1: Some("none".to_owned()),
            file_info: info.file_info.to_owned(),
            action: "upload".to_owned(),
            upload_timestamp,
            server_side_encryption: info.server_side_encryption.to_owned(),
            file_retention: info.file_retention.to_owned(),
            legal_hold: info.legal_hold.to_owned(),
        };
        state.insert_version(&info.bucket_id, version.to_owned(), data)?;
        Ok(version)
    }

    fn cancel_large_file(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        file_id: &str,
    ) -> ApiResult<CancelledLargeFile> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        let large_file = state.large_files.remove(file_id).ok_or(Error::FileNotPresent {
            file_id_or_name: file_id.to_owned(),
        })?;
        Ok(CancelledLargeFile {
            file_id: large_file.info.file_id,
            file_name: large_file.info.file_name,
            bucket_id: large_file.info.bucket_id,
        })
    }

    fn list_parts(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        start_part_number: Option<u32>,
        max_part_count: Option<u32>,
    ) -> ApiResult<ListPartsResponse> {
        let state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        let large_file = state.large_files.get(file_id).ok_or(Error::FileNotPresent {
            file_id_or_name: file_id.to_owned(),
        })?;
        let start = start_part_number.unwrap_or(1);
        let limit = max_part_count.unwrap_or(MAX_LIST_COUNT).min(MAX_LIST_COUNT) as usize;
        let mut parts = large_file
            .parts
            .range(start..)
            .map(|(_, part)| part.part.to_owned())
            .take(limit + 1)
            .collect::<Vec<_>>();
        let next_part_number = if parts.len() > limit {
            parts.pop().map(|part| part.part_number)
        } else {
            None
        };
        Ok(ListPartsResponse { parts, next_part_number })
    }

    fn list_unfinished_large_files(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListUnfinishedLargeFilesResponse> {
        let state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "listFiles")?;
        let limit = max_file_count.unwrap_or(MAX_LIST_COUNT).min(MAX_LIST_COUNT) as usize;
        let mut files = state
            .large_files
            .values()
            .filter(|large_file| large_file.info.bucket_id == bucket_id)
            .filter(|large_file| prefix.map_or(true, |prefix| large_file.info.file_name.starts_with(prefix)))
            .map(|large_file| large_file.info.to_owned())
            .collect::<Vec<_>>();
        files.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        if let Some(start_file_id) = start_file_id {
            files.retain(|file| file.file_id.as_str() >= start_file_id);
        }
        let next_file_id = if files.len() > limit {
            files.truncate(limit + 1);
            files.pop().map(|file| file.file_id)
        } else {
            None
        };
        Ok(ListUnfinishedLargeFilesResponse { files, next_file_id })
    }

    fn list_file_names(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_name: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileNamesResponse> {
        let state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "listFiles")?;
        state.check_bucket_restriction(account_auth_token, bucket_id)?;
        let bucket = state.bucket(bucket_id)?;
        let limit = max_file_count.unwrap_or(MAX_LIST_COUNT).min(MAX_LIST_COUNT) as usize;
        let mut files = Vec::new();
        let mut last_name: Option<&str> = None;
        for file in bucket.files.values() {
            let version = &file.version;
            if last_name == Some(version.file_name.as_str()) {
                continue;
            }
            last_name = Some(version.file_name.as_str());
            if let Some(start) = start_file_name {
                if version.file_name.as_str() < start {
                    continue;
                }
            }
            if let Some(prefix) = prefix {
                if !version.file_name.starts_with(prefix) {
                    continue;
                }
            }
            if version.action != "upload" {
                continue;
            }
            files.push(version.to_owned());
            if files.len() > limit {
                break;
            }
        }
        let next_file_name = if files.len() > limit {
            files.pop().map(|version| version.file_name)
        } else {
            None
        };
        Ok(ListFileNamesResponse { files, next_file_name })
    }

    fn list_file_versions(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        start_file_name: Option<&str>,
        start_file_id: Option<&str>,
        max_file_count: Option<u32>,
        prefix: Option<&str>,
    ) -> ApiResult<ListFileVersionsResponse> {
        let state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "listFiles")?;
        state.check_bucket_restriction(account_auth_token, bucket_id)?;
        let bucket = state.bucket(bucket_id)?;
        let limit = max_file_count.unwrap_or(MAX_LIST_COUNT).min(MAX_LIST_COUNT) as usize;
        let mut files = Vec::new();
        for file in bucket.files.values() {
            let version = &file.version;
            if let Some(start) = start_file_name {
                if version.file_name.as_str() < start {
                    continue;
                }
                if version.file_name.as_str() == start {
                    // 同名版本按时间从新到旧排列，ID 随创建递增，
                    // 翻页时跳过 ID 更大（位置更靠前）的版本
                    if let Some(start_id) = start_file_id {
                        if version.file_id.as_str() > start_id {
                            continue;
                        }
                    }
                }
            }
            if let Some(prefix) = prefix {
                if !version.file_name.starts_with(prefix) {
                    continue;
                }
            }
            files.push(version.to_owned());
            if files.len() > limit {
                break;
            }
        }
        let (next_file_name, next_file_id) = if files.len() > limit {
            files
                .pop()
                .map(|version| (Some(version.file_name), Some(version.file_id)))
                .unwrap_or((None, None))
        } else {
            (None, None)
        };
        Ok(ListFileVersionsResponse {
            files,
            next_file_name,
            next_file_id,
        })
    }

    fn get_file_info(&self, _api_url: &str, account_auth_token: &str, file_id: &str) -> ApiResult<FileVersion> {
        let state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "readFiles")?;
        let (_, file) = state.find_file_by_id(file_id)?;
        Ok(file.version.to_owned())
    }

    fn delete_file_version(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        file_id: &str,
        file_name: &str,
    ) -> ApiResult<DeletedFileVersion> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "deleteFiles")?;
        for bucket in state.buckets.values_mut() {
            let key = bucket
                .files
                .iter()
                .find(|(_, file)| file.version.file_id == file_id && file.version.file_name == file_name)
                .map(|(key, _)| key.to_owned());
            if let Some(key) = key {
                bucket.files.remove(&key);
                return Ok(DeletedFileVersion {
                    file_id: file_id.to_owned(),
                    file_name: file_name.to_owned(),
                });
            }
        }
        Err(Error::FileNotPresent {
            file_id_or_name: file_id.to_owned(),
        })
    }

    fn hide_file(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        file_name: &str,
    ) -> ApiResult<FileVersion> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        let bucket = state.bucket(bucket_id)?;
        let latest = bucket
            .files
            .values()
            .find(|file| file.version.file_name == file_name)
            .map(|file| file.version.to_owned());
        match latest {
            None => {
                return Err(Error::FileNotPresent {
                    file_id_or_name: file_name.to_owned(),
                })
            }
            Some(version) if version.action == "hide" => {
                return Err(Error::FileAlreadyHidden {
                    file_name: file_name.to_owned(),
                })
            }
            Some(_) => {}
        }
        let index = state.next_counter();
        let upload_timestamp = state.next_timestamp();
        let version = FileVersion {
            file_id: format!("file-{index:010}"),
            file_name: file_name.to_owned(),
            bucket_id: Some(bucket_id.to_owned()),
            content_length: 0,
            content_type: Some("application/octet-stream".to_owned()),
            content_sha1: Some("none".to_owned()),
            file_info: Default::default(),
            action: "hide".to_owned(),
            upload_timestamp,
            server_side_encryption: None,
            file_retention: None,
            legal_hold: None,
        };
        state.insert_version(bucket_id, version.to_owned(), Vec::new())?;
        Ok(version)
    }

    fn copy_file(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        source_file_id: &str,
        new_file_name: &str,
        range: Option<ByteRange>,
        metadata_directive: MetadataDirective,
        content_type: Option<&str>,
        file_info: Option<&FileInfo>,
        destination_bucket_id: Option<&str>,
        _destination_server_side_encryption: Option<&EncryptionSetting>,
        _source_server_side_encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
    ) -> ApiResult<FileVersion> {
        validate_file_name(new_file_name)?;
        validate_metadata_directive(metadata_directive, content_type, file_info)?;
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        let (source_bucket, source) = state.find_file_by_id(source_file_id)?;
        let data = match range {
            None => source.data.to_owned(),
            Some(range) => {
                if range.start > range.end || range.end >= source.data.len() as u64 {
                    return Err(Error::UnsatisfiableRange);
                }
                source.data[range.start as usize..=range.end as usize].to_vec()
            }
        };
        let (content_type, file_info) = match metadata_directive {
            MetadataDirective::Copy => (source.version.content_type.to_owned(), source.version.file_info.to_owned()),
            MetadataDirective::Replace => (
                content_type.map(ToOwned::to_owned),
                file_info.map(ToOwned::to_owned).unwrap_or_default(),
            ),
        };
        let bucket_id = destination_bucket_id
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| source_bucket.bucket.bucket_id.to_owned());
        let index = state.next_counter();
        let upload_timestamp = state.next_timestamp();
        let version = FileVersion {
            file_id: format!("file-{index:010}"),
            file_name: new_file_name.to_owned(),
            bucket_id: Some(bucket_id.to_owned()),
            content_length: data.len() as u64,
            content_type,
            content_sha1: Some(hex_sha1_of_bytes(&data)),
            file_info,
            action: "upload".to_owned(),
            upload_timestamp,
            server_side_encryption: None,
            file_retention: file_retention.map(ToOwned::to_owned),
            legal_hold: legal_hold.map(ToOwned::to_owned),
        };
        state.insert_version(&bucket_id, version.to_owned(), data)?;
        Ok(version)
    }

    fn copy_part(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        source_file_id: &str,
        large_file_id: &str,
        part_number: u32,
        range: Option<ByteRange>,
        _destination_server_side_encryption: Option<&EncryptionSetting>,
        _source_server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<Part> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "writeFiles")?;
        let (_, source) = state.find_file_by_id(source_file_id)?;
        let data = match range {
            None => source.data.to_owned(),
            Some(range) => {
                if range.start > range.end || range.end >= source.data.len() as u64 {
                    return Err(Error::UnsatisfiableRange);
                }
                source.data[range.start as usize..=range.end as usize].to_vec()
            }
        };
        let large_file = state.large_files.get_mut(large_file_id).ok_or(Error::FileNotPresent {
            file_id_or_name: large_file_id.to_owned(),
        })?;
        let part = Part {
            file_id: large_file_id.to_owned(),
            part_number,
            content_length: data.len() as u64,
            content_sha1: hex_sha1_of_bytes(&data),
        };
        large_file.parts.insert(part_number, SimPart { part: part.to_owned(), data });
        Ok(part)
    }

    fn get_download_authorization(
        &self,
        _api_url: &str,
        account_auth_token: &str,
        bucket_id: &str,
        file_name_prefix: &str,
        _valid_duration_seconds: u64,
    ) -> ApiResult<DownloadAuthorization> {
        let mut state = self.state.lock().unwrap();
        state.check_capability(account_auth_token, "shareFiles")?;
        let index = state.next_counter();
        Ok(DownloadAuthorization {
            bucket_id: bucket_id.to_owned(),
            file_name_prefix: file_name_prefix.to_owned(),
            authorization_token: format!("download-auth-token-{index}"),
        })
    }

    fn download_file_by_id(
        &self,
        _download_url: &str,
        account_auth_token: Option<&str>,
        file_id: &str,
        range: Option<ByteRange>,
        _server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        let state = self.state.lock().unwrap();
        if let Some(token) = account_auth_token {
            state.check_capability(token, "readFiles")?;
        }
        let (_, file) = state.find_file_by_id(file_id)?;
        self.serve_download(file, range)
    }

    fn download_file_by_name(
        &self,
        _download_url: &str,
        account_auth_token: Option<&str>,
        bucket_name: &str,
        file_name: &str,
        range: Option<ByteRange>,
        _server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        let state = self.state.lock().unwrap();
        if let Some(token) = account_auth_token {
            state.check_capability(token, "readFiles")?;
        }
        let bucket = state
            .buckets
            .values()
            .find(|bucket| bucket.bucket.bucket_name == bucket_name)
            .ok_or(Error::ResourceNotFound)?;
        let file = bucket
            .files
            .values()
            .find(|file| file.version.file_name == file_name)
            .ok_or_else(|| Error::FileNotPresent {
                file_id_or_name: file_name.to_owned(),
            })?;
        if file.version.action != "upload" {
            return Err(Error::FileNotPresent {
                file_id_or_name: file_name.to_owned(),
            });
        }
        self.serve_download(file, range)
    }

    fn download_file_from_url(
        &self,
        url: &str,
        account_auth_token: Option<&str>,
        range: Option<ByteRange>,
        server_side_encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<(DownloadVersion, ResponseBody)> {
        if let Some(query) = url.strip_prefix(&format!(
            "{DOWNLOAD_URL}/b2api/v2/b2_download_file_by_id?fileId="
        )) {
            let file_id = b2_url_decode(query);
            return self.download_file_by_id(
                DOWNLOAD_URL,
                account_auth_token,
                &file_id,
                range,
                server_side_encryption,
            );
        }
        if let Some(rest) = url.strip_prefix(&format!("{DOWNLOAD_URL}/file/")) {
            if let Some((bucket_name, file_name)) = rest.split_once('/') {
                return self.download_file_by_name(
                    DOWNLOAD_URL,
                    account_auth_token,
                    bucket_name,
                    &b2_url_decode(file_name),
                    range,
                    server_side_encryption,
                );
            }
        }
        Err(Error::ResourceNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use b2_utils::hex_sha1_of_bytes;
    use std::io::Cursor;

    fn opener(content: &'static [u8]) -> impl Fn() -> ApiResult<(Box<dyn Read + Send>, u64)> + Sync {
        move || {
            let sha1 = hex_sha1_of_bytes(content);
            let mut body = content.to_vec();
            body.extend_from_slice(sha1.as_bytes());
            let size = body.len() as u64;
            Ok((Box::new(Cursor::new(body)) as Box<dyn Read + Send>, size))
        }
    }

    fn authorized(simulator: &RawSimulator) -> (String, String) {
        let (account_id, master_key) = simulator.create_account();
        let auth = simulator.authorize_account(REALM, &account_id, &master_key).unwrap();
        (account_id, auth.authorization_token)
    }

    #[test]
    fn test_upload_and_download_round_trip() -> ApiResult<()> {
        let simulator = RawSimulator::new();
        let (account_id, token) = authorized(&simulator);
        let bucket = simulator.create_bucket(API_URL, &token, &account_id, "bucket", "allPublic")?;
        let upload = simulator.get_upload_url(API_URL, &token, &bucket.bucket_id)?;

        let content = b"hello world";
        let body = opener(content);
        let version = simulator.upload_file(
            &upload.upload_url,
            &upload.authorization_token,
            "file1",
            content.len() as u64 + HEX_SHA1_SIZE as u64,
            "text/plain",
            HEX_DIGITS_AT_END,
            &Default::default(),
            None,
            None,
            None,
            &body,
        )?;
        assert_eq!(
            version.content_sha1.as_deref(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );

        let (download_version, body) =
            simulator.download_file_by_id(DOWNLOAD_URL, Some(&token), &version.file_id, None, None)?;
        assert_eq!(download_version.content_length, content.len() as u64);
        assert_eq!(body.into_bytes().unwrap(), content);
        Ok(())
    }

    #[test]
    fn test_ranged_download_and_unsatisfiable_range() -> ApiResult<()> {
        let simulator = RawSimulator::new();
        let (account_id, token) = authorized(&simulator);
        let bucket = simulator.create_bucket(API_URL, &token, &account_id, "bucket", "allPublic")?;
        let upload = simulator.get_upload_url(API_URL, &token, &bucket.bucket_id)?;
        let content = b"abcdefghijklmnopqrs";
        let version = simulator.upload_file(
            &upload.upload_url,
            &upload.authorization_token,
            "file1",
            content.len() as u64 + HEX_SHA1_SIZE as u64,
            "text/plain",
            HEX_DIGITS_AT_END,
            &Default::default(),
            None,
            None,
            None,
            &opener(content),
        )?;

        let (download_version, body) = simulator.download_file_by_id(
            DOWNLOAD_URL,
            Some(&token),
            &version.file_id,
            Some(ByteRange::new(3, 9)),
            None,
        )?;
        assert_eq!(download_version.content_length, 7);
        assert_eq!(download_version.content_range, Some((3, 9, 19)));
        assert_eq!(body.into_bytes().unwrap(), b"defghij");

        let result = simulator.download_file_by_id(
            DOWNLOAD_URL,
            Some(&token),
            &version.file_id,
            Some(ByteRange::new(0, content.len() as u64)),
            None,
        );
        assert!(matches!(result, Err(Error::UnsatisfiableRange)));
        Ok(())
    }

    #[test]
    fn test_delete_file_version_is_idempotent_in_failure() -> ApiResult<()> {
        let simulator = RawSimulator::new();
        let (account_id, token) = authorized(&simulator);
        let bucket = simulator.create_bucket(API_URL, &token, &account_id, "bucket", "allPublic")?;
        let upload = simulator.get_upload_url(API_URL, &token, &bucket.bucket_id)?;
        let version = simulator.upload_file(
            &upload.upload_url,
            &upload.authorization_token,
            "file1",
            11 + HEX_SHA1_SIZE as u64,
            "text/plain",
            HEX_DIGITS_AT_END,
            &Default::default(),
            None,
            None,
            None,
            &opener(b"hello world"),
        )?;

        simulator.delete_file_version(API_URL, &token, &version.file_id, "file1")?;
        let again = simulator.delete_file_version(API_URL, &token, &version.file_id, "file1");
        assert!(matches!(again, Err(Error::FileNotPresent { .. })));
        Ok(())
    }

    #[test]
    fn test_large_file_assembly_in_part_order() -> ApiResult<()> {
        let simulator = RawSimulator::new();
        let (account_id, token) = authorized(&simulator);
        let bucket = simulator.create_bucket(API_URL, &token, &account_id, "bucket", "allPublic")?;
        let large = simulator.start_large_file(
            API_URL,
            &token,
            &bucket.bucket_id,
            "big",
            "b2/x-auto",
            &Default::default(),
            None,
            None,
            None,
        )?;
        let upload = simulator.get_upload_part_url(API_URL, &token, &large.file_id)?;

        // 乱序上传分片，拼装仍按分片编号顺序
        let second = simulator.upload_part(
            &upload.upload_url,
            &upload.authorization_token,
            2,
            5 + HEX_SHA1_SIZE as u64,
            HEX_DIGITS_AT_END,
            None,
            &opener(b"world"),
        )?;
        let first = simulator.upload_part(
            &upload.upload_url,
            &upload.authorization_token,
            1,
            6 + HEX_SHA1_SIZE as u64,
            HEX_DIGITS_AT_END,
            None,
            &opener(b"hello "),
        )?;

        let version = simulator.finish_large_file(
            API_URL,
            &token,
            &large.file_id,
            &[first.content_sha1, second.content_sha1],
        )?;
        assert_eq!(version.content_length, 11);
        let (_, body) = simulator.download_file_by_id(DOWNLOAD_URL, Some(&token), &version.file_id, None, None)?;
        assert_eq!(body.into_bytes().unwrap(), b"hello world");
        Ok(())
    }

    #[test]
    fn test_hide_and_list_file_names() -> ApiResult<()> {
        let simulator = RawSimulator::new();
        let (account_id, token) = authorized(&simulator);
        let bucket = simulator.create_bucket(API_URL, &token, &account_id, "bucket", "allPublic")?;
        let upload = simulator.get_upload_url(API_URL, &token, &bucket.bucket_id)?;
        simulator.upload_file(
            &upload.upload_url,
            &upload.authorization_token,
            "a.txt",
            11 + HEX_SHA1_SIZE as u64,
            "text/plain",
            HEX_DIGITS_AT_END,
            &Default::default(),
            None,
            None,
            None,
            &opener(b"hello world"),
        )?;
        simulator.hide_file(API_URL, &token, &bucket.bucket_id, "a.txt")?;

        let names = simulator.list_file_names(API_URL, &token, &bucket.bucket_id, None, None, None)?;
        assert!(names.files.is_empty());

        let versions = simulator.list_file_versions(API_URL, &token, &bucket.bucket_id, None, None, None, None)?;
        assert_eq!(versions.files.len(), 2);
        assert_eq!(versions.files[0].action, "hide");
        assert_eq!(versions.files[1].action, "upload");

        let again = simulator.hide_file(API_URL, &token, &bucket.bucket_id, "a.txt");
        assert!(matches!(again, Err(Error::FileAlreadyHidden { .. })));
        Ok(())
    }

    #[test]
    fn test_capability_checks() -> ApiResult<()> {
        let simulator = RawSimulator::new();
        let (account_id, token) = authorized(&simulator);
        let bucket = simulator.create_bucket(API_URL, &token, &account_id, "bucket", "allPublic")?;
        let (key_id, key) = simulator.create_key(&account_id, &["readFiles"], None, None);
        let restricted = simulator.authorize_account(REALM, &key_id, &key)?;
        let result = simulator.list_file_names(
            API_URL,
            &restricted.authorization_token,
            &bucket.bucket_id,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(Error::Unauthorized { .. })));
        Ok(())
    }
}
