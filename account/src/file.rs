use super::{
    account_info::{AccountInfo, AuthData},
    allowed::Allowed,
    upload_url_pool::{UploadUrl, UploadUrlPool},
};
use b2_http_client::{ApiResult, Error};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};

/// 指定账户状态文件路径的环境变量
pub const ACCOUNT_INFO_ENV_VAR: &str = "B2_ACCOUNT_INFO";

const DEFAULT_FILE_NAME: &str = ".b2_account_info";
const SCHEMA_VERSION: u32 = 2;

/// 计算账户状态文件的缺省路径
///
/// 优先级：环境变量 `B2_ACCOUNT_INFO`，已经存在的 `~/.b2_account_info`，
/// `$XDG_CONFIG_HOME/b2/account_info`，最后回落到 `~/.b2_account_info`。
pub fn default_account_info_file() -> PathBuf {
    if let Ok(path) = env::var(ACCOUNT_INFO_ENV_VAR) {
        return PathBuf::from(path);
    }
    let home_file = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_FILE_NAME);
    if home_file.exists() {
        return home_file;
    }
    if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg_config_home).join("b2").join("account_info");
    }
    home_file
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileData {
    version: u32,
    #[serde(default)]
    account: Option<AuthData>,
    #[serde(default)]
    buckets: HashMap<String, String>,
}

/// 持久化到本地文件的账户状态存储
///
/// 授权字段与存储空间名称映射以 JSON 形式写入单个文件。
/// 每次变更都在独占文件锁内完成读改写，并发进程会被串行化，
/// 不会观察到写到一半的状态。文件首次创建时权限为仅属主可读写。
/// 上传地址池只存在于内存中，不会被持久化。
#[derive(Debug)]
pub struct FileAccountInfo {
    path: PathBuf,
    lock_path: PathBuf,
    bucket_pool: UploadUrlPool,
    large_file_pool: UploadUrlPool,
}

impl FileAccountInfo {
    /// 创建指定路径上的账户状态存储
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            bucket_pool: Default::default(),
            large_file_pool: Default::default(),
        }
    }

    /// 创建缺省路径上的账户状态存储
    #[inline]
    pub fn open_default() -> Self {
        Self::new(default_account_info_file())
    }

    /// 账户状态文件路径
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> ApiResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|_| self.corrupt_error())?;
        }
        let file = open_owner_only(&self.lock_path).map_err(|_| self.corrupt_error())?;
        Ok(file)
    }

    fn corrupt_error(&self) -> Error {
        Error::CorruptAccountInfo {
            path: self.path.display().to_string(),
        }
    }

    fn load(&self) -> ApiResult<FileData> {
        if !self.path.exists() {
            return Ok(FileData {
                version: SCHEMA_VERSION,
                ..Default::default()
            });
        }
        let mut content = String::new();
        File::open(&self.path)
            .and_then(|mut file| file.read_to_string(&mut content))
            .map_err(|_| self.corrupt_error())?;
        if content.trim().is_empty() {
            return Ok(FileData {
                version: SCHEMA_VERSION,
                ..Default::default()
            });
        }
        let mut data: FileData = serde_json::from_str(&content).map_err(|_| self.corrupt_error())?;
        upgrade_schema(&mut data);
        Ok(data)
    }

    fn store(&self, data: &FileData) -> ApiResult<()> {
        let serialized = serde_json::to_vec_pretty(data).map_err(|_| self.corrupt_error())?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = open_owner_only(&tmp_path).map_err(|_| self.corrupt_error())?;
            tmp.set_len(0).map_err(|_| self.corrupt_error())?;
            tmp.write_all(&serialized).map_err(|_| self.corrupt_error())?;
            tmp.sync_all().map_err(|_| self.corrupt_error())?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|_| self.corrupt_error())?;
        Ok(())
    }

    fn with_data<T>(&self, f: impl FnOnce(&FileData) -> ApiResult<T>) -> ApiResult<T> {
        let lock = self.lock_file()?;
        lock.lock_shared().map_err(|_| self.corrupt_error())?;
        let result = self.load().and_then(|data| f(&data));
        let _ = lock.unlock();
        result
    }

    fn mutate(&self, f: impl FnOnce(&mut FileData)) -> ApiResult<()> {
        let lock = self.lock_file()?;
        lock.lock_exclusive().map_err(|_| self.corrupt_error())?;
        let result = self.load().and_then(|mut data| {
            f(&mut data);
            data.version = SCHEMA_VERSION;
            self.store(&data)
        });
        let _ = lock.unlock();
        result
    }

    fn field<T>(&self, key: &str, get: impl FnOnce(&AuthData) -> T) -> ApiResult<T> {
        self.with_data(|data| {
            data.account.as_ref().map(get).ok_or_else(|| Error::MissingAccountData {
                key: key.to_owned(),
            })
        })
    }
}

fn upgrade_schema(data: &mut FileData) {
    // 版本 1 没有 allowed 与 s3_api_url 字段，serde 缺省值已经补齐，
    // 这里只需要幂等地抬升版本号
    if data.version < SCHEMA_VERSION {
        data.version = SCHEMA_VERSION;
    }
}

#[cfg(unix)]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).open(path)
}

impl AccountInfo for FileAccountInfo {
    fn set_auth_data(&self, auth_data: AuthData) -> ApiResult<()> {
        auth_data.allowed.validate()?;
        self.mutate(|data| data.account = Some(auth_data))
    }

    fn clear(&self) -> ApiResult<()> {
        self.mutate(|data| {
            data.account = None;
            data.buckets.clear();
        })
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
        self.mutate(|data| {
            data.buckets.insert(bucket_name.to_owned(), bucket_id.to_owned());
        })
    }

    fn remove_bucket_name(&self, bucket_name: &str) -> ApiResult<()> {
        self.mutate(|data| {
            data.buckets.remove(bucket_name);
        })
    }

    fn bucket_id_by_name(&self, bucket_name: &str) -> ApiResult<Option<String>> {
        self.with_data(|data| Ok(data.buckets.get(bucket_name).map(ToOwned::to_owned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

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
    fn test_round_trip_persists_across_instances() -> ApiResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("account_info");
        {
            let info = FileAccountInfo::new(&path);
            info.set_auth_data(sample_auth_data())?;
            info.save_bucket_name("bucket", "bucket-id")?;
        }
        let info = FileAccountInfo::new(&path);
        assert_eq!(info.account_id()?, "account-id");
        assert_eq!(info.bucket_id_by_name("bucket")?, Some("bucket-id".to_owned()));
        assert_eq!(info.bucket_id_by_name("missing")?, None);
        info.clear()?;
        assert!(info.auth_token().is_err());
        assert_eq!(info.bucket_id_by_name("bucket")?, None);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("account_info");
        fs::write(&path, b"{ not json").unwrap();
        let info = FileAccountInfo::new(&path);
        assert!(matches!(info.account_id(), Err(Error::CorruptAccountInfo { .. })));
    }

    #[test]
    fn test_legacy_schema_is_upgraded() -> ApiResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("account_info");
        // 版本 1 的文件没有 allowed 与 s3_api_url 字段
        fs::write(
            &path,
            serde_json::json!({
                "version": 1,
                "account": {
                    "account_id": "account-id",
                    "auth_token": "auth-token",
                    "api_url": "https://api.example.com",
                    "download_url": "https://download.example.com",
                    "recommended_part_size": 100_000_000u64,
                    "absolute_minimum_part_size": 5_000_000u64,
                    "application_key_id": "key-id",
                    "application_key": "key",
                    "realm": "production",
                },
                "buckets": {},
            })
            .to_string(),
        )
        .unwrap();
        let info = FileAccountInfo::new(&path);
        let allowed = info.allowed()?;
        assert!(allowed.has_capability("listFiles"));
        assert_eq!(info.s3_api_url()?, "");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_created_file_is_owner_only() -> ApiResult<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("account_info");
        let info = FileAccountInfo::new(&path);
        info.set_auth_data(sample_auth_data())?;
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }
}
