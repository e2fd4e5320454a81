use super::downloader::{chunk_size_for, ParallelDownloader, SimpleDownloader};
use b2_apis::{
    http::ResponseBody,
    http_client::{ApiResult, Error},
    utils::{ProgressListener, ProgressScope},
    ByteRange, DownloadVersion, EncryptionSetting, Session,
};
use filetime::FileTime;
use rayon::ThreadPool;
use std::{
    fs::OpenOptions,
    io::{Read, Seek, Write},
    path::Path,
    sync::Arc,
};

/// 已建立响应的下载任务
///
/// 最初那次请求已经确定了对象元信息与内容长度，
/// 数据在调用保存方法后才真正开始落地。
/// 按目标能力与对象大小在并行下载器与顺序下载器之间选择。
#[derive(Debug)]
pub struct DownloadedFile {
    pub(crate) session: Arc<Session>,
    pub(crate) pool: Arc<ThreadPool>,
    pub(crate) download_version: DownloadVersion,
    pub(crate) body: ResponseBody,
    pub(crate) url: String,
    pub(crate) requested_range: Option<ByteRange>,
    pub(crate) encryption: Option<EncryptionSetting>,
    pub(crate) progress: Arc<dyn ProgressListener>,
    pub(crate) min_part_size: u64,
    pub(crate) max_streams: usize,
    pub(crate) force_chunk_size: Option<u64>,
    pub(crate) check_hash: bool,
}

impl DownloadedFile {
    /// 对象元信息
    #[inline]
    pub fn download_version(&self) -> &DownloadVersion {
        &self.download_version
    }

    /// 把内容写入支持随机访问的目标
    ///
    /// 数据从目标当前的读写位置开始写入。目标支持随机写，
    /// 因此对象足够大时采用并行下载。
    pub fn save(self, file: &mut (impl Read + Write + Seek + Send)) -> ApiResult<()> {
        let Self {
            session,
            pool,
            download_version,
            body,
            url,
            requested_range,
            encryption,
            progress,
            min_part_size,
            max_streams,
            force_chunk_size,
            check_hash,
        } = self;
        let content_length = download_version.content_length;
        let scope = ProgressScope::begin(progress.as_ref(), content_length);
        let chunk_size = chunk_size_for(content_length, force_chunk_size);

        let parallel = ParallelDownloader::new(min_part_size, max_streams, chunk_size, check_hash);
        let pool_threads = pool.current_num_threads();
        let (bytes_written, digest) = if content_length > 0 && parallel.is_suitable(content_length, pool_threads) {
            let cloud_range = requested_range.unwrap_or(ByteRange::new(0, content_length - 1));
            let num_streams = parallel.num_streams(content_length, pool_threads);
            parallel.download(
                &session,
                &pool,
                file,
                body,
                &url,
                cloud_range,
                encryption.as_ref(),
                &progress,
                num_streams,
            )?
        } else {
            SimpleDownloader::new(chunk_size, check_hash).download(file, body, progress.to_owned())?
        };
        drop(scope);
        validate(&download_version, requested_range, check_hash, bytes_written, digest)
    }

    /// 把内容顺序写入输出流
    ///
    /// 目标不支持随机写，始终使用顺序下载器。
    pub fn save_to_writer(self, writer: &mut dyn Write) -> ApiResult<()> {
        let Self {
            download_version,
            body,
            requested_range,
            progress,
            force_chunk_size,
            check_hash,
            ..
        } = self;
        let content_length = download_version.content_length;
        let scope = ProgressScope::begin(progress.as_ref(), content_length);
        let chunk_size = chunk_size_for(content_length, force_chunk_size);
        let (bytes_written, digest) =
            SimpleDownloader::new(chunk_size, check_hash).download(writer, body, progress.to_owned())?;
        drop(scope);
        validate(&download_version, requested_range, check_hash, bytes_written, digest)
    }

    /// 把内容保存到文件系统路径
    ///
    /// 已存在的文件会被覆盖。保存成功后，把本地文件的修改时间
    /// 恢复为对象的源修改时间（缺失时用上传时间）。
    pub fn save_to_path(self, path: impl AsRef<Path>) -> ApiResult<()> {
        let mod_time_millis = self.download_version.mod_time_millis();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(|err| Error::InvalidArgument {
                message: format!("cannot open destination file: {err}"),
            })?;
        self.save(&mut file)?;
        drop(file);
        let mtime = FileTime::from_unix_time(
            (mod_time_millis / 1000) as i64,
            ((mod_time_millis % 1000) * 1_000_000) as u32,
        );
        filetime::set_file_mtime(path.as_ref(), mtime).map_err(|err| Error::InvalidArgument {
            message: format!("cannot restore file modification time: {err}"),
        })?;
        Ok(())
    }
}

fn validate(
    download_version: &DownloadVersion,
    requested_range: Option<ByteRange>,
    check_hash: bool,
    bytes_written: u64,
    digest: Option<String>,
) -> ApiResult<()> {
    let expected = match requested_range {
        Some(range) => range.size(),
        None => download_version.content_length,
    };
    if bytes_written != expected {
        return Err(Error::TruncatedOutput {
            bytes_read: bytes_written,
            file_size: expected,
        });
    }
    if requested_range.is_none() && check_hash && download_version.content_sha1 != "none" {
        if let Some(digest) = digest {
            if digest != download_version.content_sha1 {
                return Err(Error::ChecksumMismatch {
                    checksum_type: "sha1",
                    expected: download_version.content_sha1.to_owned(),
                    actual: digest,
                });
            }
        }
    }
    Ok(())
}
