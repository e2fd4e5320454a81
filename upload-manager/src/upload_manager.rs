use super::{
    hashing::{length_with_hash, StreamWithHash},
    large_file_state::{LargeFileUploadState, PartProgressReporter},
    progress::ReadingStreamWithProgress,
    upload_source::UploadSource,
};
use b2_apis::{
    http_client::{ApiResult, Error},
    utils::{ProgressListener, ProgressScope},
    EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, Session, AUTO_CONTENT_TYPE,
    HEX_DIGITS_AT_END,
};
use once_cell::sync::OnceCell;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    fmt,
    io::Read,
    sync::{Arc, Mutex},
};

/// 单个小文件或分片的最大上传尝试次数
pub const MAX_UPLOAD_ATTEMPTS: usize = 5;

/// 上传管理器
///
/// 执行小文件上传与大文件的分片上传：边读边哈希，按需重试，
/// 每次重试前丢弃可能已失效的上传地址。
/// 线程池在第一次使用前可以配置一次大小，之后不可更改。
pub struct UploadManager {
    session: Arc<Session>,
    thread_pool: OnceCell<Arc<ThreadPool>>,
    max_workers: Mutex<usize>,
}

impl UploadManager {
    /// 创建上传管理器，缺省 10 个工作线程
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            thread_pool: OnceCell::new(),
            max_workers: Mutex::new(10),
        }
    }

    /// 获取会话
    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// 设置工作线程数
    ///
    /// 必须在任何上传开始前调用，线程池创建后再调用会报错。
    pub fn set_thread_pool_size(&self, max_workers: usize) -> ApiResult<()> {
        if self.thread_pool.get().is_some() {
            return Err(Error::InvalidArgument {
                message: "thread pool already created".to_owned(),
            });
        }
        *self.max_workers.lock().unwrap() = max_workers.max(1);
        Ok(())
    }

    /// 获取上传工作线程池，首次调用时创建
    pub fn thread_pool(&self) -> ApiResult<Arc<ThreadPool>> {
        self.thread_pool
            .get_or_try_init(|| {
                let max_workers = *self.max_workers.lock().unwrap();
                ThreadPoolBuilder::new()
                    .num_threads(max_workers)
                    .thread_name(|index| format!("b2.sdk.upload-manager.{index}"))
                    .build()
                    .map(Arc::new)
                    .map_err(|err| Error::InvalidArgument {
                        message: format!("cannot build upload thread pool: {err}"),
                    })
            })
            .map(Arc::clone)
    }

    /// 上传小文件
    ///
    /// 内容以"哈希后置"方式传输，上传完成后把本地算出的 SHA-1
    /// 与服务端返回的校验和比对。可重试的失败最多重试
    /// [`MAX_UPLOAD_ATTEMPTS`] 次，每次重试前丢弃该存储空间的上传地址池。
    #[allow(clippy::too_many_arguments)]
    pub fn upload_small_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_type: Option<&str>,
        file_info: &FileInfo,
        source: Arc<dyn UploadSource>,
        progress: Arc<dyn ProgressListener>,
        encryption: Option<&EncryptionSetting>,
        file_retention: Option<&FileRetention>,
        legal_hold: Option<&LegalHold>,
    ) -> ApiResult<FileVersion> {
        let content_length = source.content_length();
        let scope = ProgressScope::begin(progress.as_ref(), content_length);
        let mut causes = Vec::new();
        for _ in 0..MAX_UPLOAD_ATTEMPTS {
            let computed_sha1 = Arc::new(Mutex::new(None));
            let body_opener = {
                let source = source.to_owned();
                let progress = progress.to_owned();
                let computed_sha1 = computed_sha1.to_owned();
                move || -> ApiResult<(Box<dyn Read + Send>, u64)> {
                    let reader = source.open()?;
                    let reader = ReadingStreamWithProgress::new(reader, progress.to_owned());
                    let reader = StreamWithHash::with_sink(reader, computed_sha1.to_owned());
                    Ok((Box::new(reader), length_with_hash(content_length)))
                }
            };
            let result = self.session.upload_file(
                bucket_id,
                file_name,
                length_with_hash(content_length),
                content_type.unwrap_or(AUTO_CONTENT_TYPE),
                HEX_DIGITS_AT_END,
                file_info,
                encryption,
                file_retention,
                legal_hold,
                &body_opener,
            );
            match result {
                Ok(version) => {
                    check_returned_sha1(&computed_sha1, version.content_sha1.as_deref())?;
                    drop(scope);
                    return Ok(version);
                }
                Err(err) if err.should_retry_upload() => {
                    log::warn!("upload of {file_name} failed, will retry: {err}");
                    causes.push(err);
                    self.session.account_info().clear_bucket_upload_data(bucket_id);
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::MaxRetriesExceeded {
            attempts: MAX_UPLOAD_ATTEMPTS,
            causes,
        })
    }

    /// 上传大文件的一个分片
    ///
    /// 同一大文件的其他分片已经失败时，不再发起网络传输，
    /// 直接以 `AlreadyFailed` 放弃。
    #[allow(clippy::too_many_arguments)]
    pub fn upload_part(
        &self,
        file_id: &str,
        part_number: u32,
        content_length: u64,
        open_part: &(dyn Fn() -> ApiResult<Box<dyn Read + Send>> + Sync),
        large_file_state: &Arc<LargeFileUploadState>,
        encryption: Option<&EncryptionSetting>,
    ) -> ApiResult<String> {
        let reporter: Arc<dyn ProgressListener> = Arc::new(PartProgressReporter::new(large_file_state.to_owned()));
        let mut causes = Vec::new();
        for _ in 0..MAX_UPLOAD_ATTEMPTS {
            if large_file_state.has_error() {
                return Err(Error::AlreadyFailed {
                    message: large_file_state.error_message().unwrap_or_default(),
                });
            }
            let computed_sha1 = Arc::new(Mutex::new(None));
            let body_opener = {
                let reporter = reporter.to_owned();
                let computed_sha1 = computed_sha1.to_owned();
                move || -> ApiResult<(Box<dyn Read + Send>, u64)> {
                    let reader = open_part()?;
                    let reader = ReadingStreamWithProgress::new(reader, reporter.to_owned());
                    let reader = StreamWithHash::with_sink(reader, computed_sha1.to_owned());
                    Ok((Box::new(reader), length_with_hash(content_length)))
                }
            };
            let result = self.session.upload_part(
                file_id,
                part_number,
                length_with_hash(content_length),
                HEX_DIGITS_AT_END,
                encryption,
                &body_opener,
            );
            match result {
                Ok(part) => {
                    check_returned_sha1(&computed_sha1, Some(&part.content_sha1))?;
                    return Ok(part.content_sha1);
                }
                Err(err) if err.should_retry_upload() => {
                    log::warn!("upload of part {part_number} of {file_id} failed, will retry: {err}");
                    causes.push(err);
                    self.session.account_info().clear_large_file_upload_urls(file_id);
                }
                Err(err) => return Err(err),
            }
        }
        let last_message = causes.last().map(ToString::to_string).unwrap_or_default();
        large_file_state.set_error(last_message);
        Err(Error::MaxRetriesExceeded {
            attempts: MAX_UPLOAD_ATTEMPTS,
            causes,
        })
    }
}

fn check_returned_sha1(computed_sha1: &Arc<Mutex<Option<String>>>, returned: Option<&str>) -> ApiResult<()> {
    let computed = computed_sha1.lock().unwrap().to_owned();
    if let (Some(computed), Some(returned)) = (computed, returned) {
        if computed != returned {
            return Err(Error::ChecksumMismatch {
                checksum_type: "sha1",
                expected: computed,
                actual: returned.to_owned(),
            });
        }
    }
    Ok(())
}

impl fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadManager")
            .field("session", &self.session)
            .field("max_workers", &self.max_workers)
            .finish()
    }
}
