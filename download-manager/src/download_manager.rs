use super::downloaded_file::DownloadedFile;
use b2_apis::{
    b2_url_encode,
    http_client::{ApiResult, Error},
    utils::{NopProgressListener, ProgressListener},
    ByteRange, EncryptionSetting, Session,
};
use once_cell::sync::OnceCell;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    fmt,
    sync::{Arc, Mutex},
};

/// 并行下载的缺省最小分段大小
pub const PARALLEL_MIN_PART_SIZE: u64 = 100 * 1024 * 1024;

/// 缺省的最大并发流数量
pub const DEFAULT_MAX_STREAMS: usize = 8;

const DEFAULT_MAX_WORKERS: usize = 8;

/// 一次下载的选项
#[derive(Debug)]
pub struct DownloadOptions {
    /// 请求的字节范围，双闭区间
    pub range: Option<ByteRange>,
    /// 加密描述符，原样转发
    pub encryption: Option<EncryptionSetting>,
    /// 进度监听器
    pub progress: Arc<dyn ProgressListener>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            range: None,
            encryption: None,
            progress: Arc::new(NopProgressListener),
        }
    }
}

/// 下载管理器
///
/// 发出最初的下载请求并校验响应，然后按对象大小与目标能力
/// 在并行下载器与顺序下载器之间选择。
/// 线程池在第一次使用前可以配置一次大小。
pub struct DownloadManager {
    session: Arc<Session>,
    min_part_size: u64,
    max_streams: usize,
    force_chunk_size: Option<u64>,
    check_hash: bool,
    thread_pool: OnceCell<Arc<ThreadPool>>,
    max_workers: Mutex<usize>,
}

impl DownloadManager {
    /// 创建下载管理器
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            min_part_size: PARALLEL_MIN_PART_SIZE,
            max_streams: DEFAULT_MAX_STREAMS,
            force_chunk_size: None,
            check_hash: true,
            thread_pool: OnceCell::new(),
            max_workers: Mutex::new(DEFAULT_MAX_WORKERS),
        }
    }

    /// 获取会话
    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// 设置并行下载的最小分段大小
    #[inline]
    pub fn min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size.max(1);
        self
    }

    /// 设置最大并发流数量
    #[inline]
    pub fn max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    /// 强制使用指定的分块大小
    #[inline]
    pub fn force_chunk_size(mut self, chunk_size: u64) -> Self {
        self.force_chunk_size = Some(chunk_size);
        self
    }

    /// 是否校验下载内容的 SHA-1
    #[inline]
    pub fn check_hash(mut self, check_hash: bool) -> Self {
        self.check_hash = check_hash;
        self
    }

    /// 设置工作线程数
    ///
    /// 必须在任何下载开始前调用，线程池创建后再调用会报错。
    pub fn set_thread_pool_size(&self, max_workers: usize) -> ApiResult<()> {
        if self.thread_pool.get().is_some() {
            return Err(Error::InvalidArgument {
                message: "thread pool already created".to_owned(),
            });
        }
        *self.max_workers.lock().unwrap() = max_workers.max(1);
        Ok(())
    }

    fn thread_pool(&self) -> ApiResult<Arc<ThreadPool>> {
        self.thread_pool
            .get_or_try_init(|| {
                let max_workers = *self.max_workers.lock().unwrap();
                ThreadPoolBuilder::new()
                    .num_threads(max_workers)
                    .thread_name(|index| format!("b2.sdk.download-manager.{index}"))
                    .build()
                    .map(Arc::new)
                    .map_err(|err| Error::InvalidArgument {
                        message: format!("cannot build download thread pool: {err}"),
                    })
            })
            .map(Arc::clone)
    }

    /// 按文件 ID 下载
    pub fn download_file_by_id(&self, file_id: &str, options: DownloadOptions) -> ApiResult<DownloadedFile> {
        let (download_version, body) =
            self.session
                .download_file_by_id(file_id, options.range, options.encryption.as_ref())?;
        let url = format!(
            "{}/b2api/v2/b2_download_file_by_id?fileId={}",
            self.session.account_info().download_url()?.trim_end_matches('/'),
            b2_url_encode(file_id),
        );
        self.downloaded_file(download_version, body, url, options)
    }

    /// 按存储空间与文件名下载
    pub fn download_file_by_name(
        &self,
        bucket_name: &str,
        file_name: &str,
        options: DownloadOptions,
    ) -> ApiResult<DownloadedFile> {
        let (download_version, body) =
            self.session
                .download_file_by_name(bucket_name, file_name, options.range, options.encryption.as_ref())?;
        let url = format!(
            "{}/file/{bucket_name}/{}",
            self.session.account_info().download_url()?.trim_end_matches('/'),
            b2_url_encode(file_name),
        );
        self.downloaded_file(download_version, body, url, options)
    }

    fn downloaded_file(
        &self,
        download_version: b2_apis::DownloadVersion,
        body: b2_apis::http::ResponseBody,
        url: String,
        options: DownloadOptions,
    ) -> ApiResult<DownloadedFile> {
        if let Some(range) = options.range {
            // 服务端必须返回与请求范围等宽的内容
            if download_version.content_length != range.size() {
                return Err(Error::InvalidRange {
                    content_length: download_version.total_size(),
                    range_start: range.start,
                    range_end: range.end,
                });
            }
        }
        Ok(DownloadedFile {
            session: self.session.to_owned(),
            pool: self.thread_pool()?,
            download_version,
            body,
            url,
            requested_range: options.range,
            encryption: options.encryption,
            progress: options.progress,
            min_part_size: self.min_part_size,
            max_streams: self.max_streams,
            force_chunk_size: self.force_chunk_size,
            check_hash: self.check_hash,
        })
    }
}

impl fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManager")
            .field("min_part_size", &self.min_part_size)
            .field("max_streams", &self.max_streams)
            .field("force_chunk_size", &self.force_chunk_size)
            .field("check_hash", &self.check_hash)
            .finish()
    }
}
