use super::simple::write_error;
use b2_apis::{
    http::ResponseBody,
    http_client::{ApiResult, Error},
    utils::ProgressListener,
    ByteRange, EncryptionSetting, Session,
};
use crossbeam_channel::{bounded, unbounded, Sender};
use digest::Digest;
use rayon::ThreadPool;
use sha1::Sha1;
use std::{
    io::{Read, Seek, SeekFrom, Write},
    sync::{Arc, Mutex},
};

const FINISH_HASHING_BUFFER_SIZE: usize = 1024 * 1024;

/// 每个分段允许的补偿请求次数
pub const MAX_TRIES_PER_PART: usize = 5;

/// 一个待下载的分段
///
/// 同时记录云端范围与本地文件范围，两者长度一致。
#[derive(Debug, Copy, Clone)]
pub(crate) struct PartToDownload {
    pub(crate) cloud_range: ByteRange,
    pub(crate) local_range: ByteRange,
}

/// 把下载范围切成若干连续分段
///
/// 向下取整，较小的分段排在前面。
pub(crate) fn gen_parts(cloud_range: ByteRange, local_range: ByteRange, part_count: usize) -> Vec<PartToDownload> {
    debug_assert_eq!(cloud_range.size(), local_range.size());
    debug_assert!(part_count >= 1 && part_count as u64 <= cloud_range.size());
    let mut parts = Vec::with_capacity(part_count);
    let mut offset = 0u64;
    let mut remaining_size = cloud_range.size();
    for index in 0..part_count {
        let this_part_size = remaining_size / (part_count - index) as u64;
        parts.push(PartToDownload {
            cloud_range: cloud_range.subrange(offset, offset + this_part_size - 1),
            local_range: local_range.subrange(offset, offset + this_part_size - 1),
        });
        offset += this_part_size;
        remaining_size -= this_part_size;
    }
    parts
}

/// 并行下载器
///
/// 把远端范围切成若干分段，由工作线程分别发起范围请求；
/// 所有数据块经有界队列交给唯一的写入线程落盘，
/// 写入线程之外没有任何线程触碰目标文件。
/// 分段提前结束时由该分段的工作线程自行补发范围请求续读。
#[derive(Debug)]
pub struct ParallelDownloader {
    min_part_size: u64,
    max_streams: usize,
    chunk_size: u64,
    check_hash: bool,
}

impl ParallelDownloader {
    /// 创建并行下载器
    pub fn new(min_part_size: u64, max_streams: usize, chunk_size: u64, check_hash: bool) -> Self {
        Self {
            min_part_size,
            max_streams,
            chunk_size,
            check_hash,
        }
    }

    /// 计算并发流数量
    pub fn num_streams(&self, content_length: u64, pool_threads: usize) -> usize {
        let by_size = (content_length / self.min_part_size).min(usize::MAX as u64) as usize;
        by_size.min(self.max_streams).min(pool_threads)
    }

    /// 判断并行下载是否适用
    ///
    /// 需要目标支持随机写，对象长度至少是最小分段的两倍，并且能拆出至少两个流。
    pub fn is_suitable(&self, content_length: u64, pool_threads: usize) -> bool {
        content_length >= 2 * self.min_part_size && self.num_streams(content_length, pool_threads) >= 2
    }

    /// 执行并行下载，返回写入的字节数与整体内容的十六进制 SHA-1
    #[allow(clippy::too_many_arguments)]
    pub fn download<F: Read + Write + Seek + Send>(
        &self,
        session: &Session,
        pool: &ThreadPool,
        file: &mut F,
        initial_body: ResponseBody,
        url: &str,
        cloud_range: ByteRange,
        encryption: Option<&EncryptionSetting>,
        progress: &Arc<dyn ProgressListener>,
        num_streams: usize,
    ) -> ApiResult<(u64, Option<String>)> {
        let content_length = cloud_range.size();
        let start_file_position = file.stream_position().map_err(write_error)?;
        let local_range = ByteRange::new(start_file_position, start_file_position + content_length - 1);
        let parts = gen_parts(cloud_range, local_range, num_streams);
        let first_part = parts[0];

        let hasher = Mutex::new(Sha1::new());
        let chunk_size = self.chunk_size as usize;
        let check_hash = self.check_hash;

        let mut bytes_written = 0u64;
        let mut first_error: Option<Error> = None;
        {
            let (chunk_tx, chunk_rx) = bounded::<(u64, Vec<u8>)>(parts.len() * 2);
            let (error_tx, error_rx) = unbounded::<Error>();
            let hasher = &hasher;
            let mut write_result: Result<(), Error> = Ok(());
            pool.scope(|scope| {
                let mut initial_body = Some(initial_body);
                for (index, part) in parts.iter().copied().enumerate() {
                    let chunk_tx = chunk_tx.to_owned();
                    let error_tx = error_tx.to_owned();
                    if index == 0 {
                        let body = initial_body.take().unwrap();
                        scope.spawn(move |_| {
                            if let Err(err) = download_first_part(
                                body, session, &chunk_tx, hasher, check_hash, part, chunk_size, url, encryption,
                            ) {
                                let _ = error_tx.send(err);
                            }
                        });
                    } else {
                        scope.spawn(move |_| {
                            if let Err(err) =
                                download_non_first_part(session, &chunk_tx, part, chunk_size, url, encryption)
                            {
                                let _ = error_tx.send(err);
                            }
                        });
                    }
                }
                drop(chunk_tx);
                drop(error_tx);

                // 写入线程：唯一触碰目标文件的线程
                while let Ok((offset, data)) = chunk_rx.recv() {
                    if write_result.is_ok() {
                        write_result = file
                            .seek(SeekFrom::Start(offset))
                            .and_then(|_| file.write_all(&data))
                            .map_err(write_error);
                        if write_result.is_ok() {
                            bytes_written += data.len() as u64;
                            progress.report(bytes_written);
                        }
                    }
                }
                first_error = error_rx.try_iter().next();
            });
            write_result?;
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let digest = if check_hash {
            let mut hasher = hasher.into_inner().unwrap();
            finish_hashing(file, &mut hasher, first_part, content_length)?;
            Some(hex::encode(hasher.finalize()))
        } else {
            None
        };
        Ok((bytes_written, digest))
    }
}

/// 首个分段的工作线程
///
/// 复用最初那次请求的响应体，并且是唯一在流式读取期间喂哈希器的线程。
#[allow(clippy::too_many_arguments)]
fn download_first_part(
    mut body: ResponseBody,
    session: &Session,
    chunk_tx: &Sender<(u64, Vec<u8>)>,
    hasher: &Mutex<Sha1>,
    check_hash: bool,
    part: PartToDownload,
    chunk_size: usize,
    url: &str,
    encryption: Option<&EncryptionSetting>,
) -> ApiResult<()> {
    let first_offset = part.local_range.start;
    let actual_part_size = part.local_range.size();
    let mut bytes_read = 0u64;
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                log::warn!("initial download stream broke, will reissue a ranged request: {err}");
                break;
            }
        };
        let remaining = actual_part_size - bytes_read;
        let take = (n as u64).min(remaining) as usize;
        if chunk_tx.send((first_offset + bytes_read, buf[..take].to_vec())).is_err() {
            return Ok(());
        }
        if check_hash {
            hasher.lock().unwrap().update(&buf[..take]);
        }
        bytes_read += take as u64;
        if bytes_read >= actual_part_size {
            break;
        }
    }
    drop(body);

    let mut tries_left = MAX_TRIES_PER_PART - 1;
    while tries_left > 0 && bytes_read < actual_part_size {
        log::debug!(
            "download attempts remaining: {tries_left}, bytes read already: {bytes_read}. Getting a range now."
        );
        let cloud_range = part.cloud_range.subrange(bytes_read, actual_part_size - 1);
        match session.download_file_from_url(url, Some(cloud_range), encryption) {
            Ok((_, mut rescue_body)) => loop {
                let n = match rescue_body.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        log::warn!("ranged download stream broke: {err}");
                        break;
                    }
                };
                if chunk_tx.send((first_offset + bytes_read, buf[..n].to_vec())).is_err() {
                    return Ok(());
                }
                if check_hash {
                    hasher.lock().unwrap().update(&buf[..n]);
                }
                bytes_read += n as u64;
            },
            Err(err) => log::warn!("reissued ranged request failed: {err}"),
        }
        tries_left -= 1;
    }
    Ok(())
}

/// 非首个分段的工作线程
fn download_non_first_part(
    session: &Session,
    chunk_tx: &Sender<(u64, Vec<u8>)>,
    part: PartToDownload,
    chunk_size: usize,
    url: &str,
    encryption: Option<&EncryptionSetting>,
) -> ApiResult<()> {
    let start_offset = part.local_range.start;
    let actual_part_size = part.local_range.size();
    let mut bytes_read = 0u64;
    let mut buf = vec![0u8; chunk_size];
    let mut retries_left = MAX_TRIES_PER_PART;

    while retries_left > 0 && bytes_read < actual_part_size {
        log::debug!(
            "download attempts remaining: {retries_left}, bytes read already: {bytes_read}. Getting a range now."
        );
        let cloud_range = part.cloud_range.subrange(bytes_read, actual_part_size - 1);
        match session.download_file_from_url(url, Some(cloud_range), encryption) {
            Ok((_, mut body)) => loop {
                let n = match body.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        log::warn!("ranged download stream broke: {err}");
                        break;
                    }
                };
                if chunk_tx.send((start_offset + bytes_read, buf[..n].to_vec())).is_err() {
                    return Ok(());
                }
                bytes_read += n as u64;
            },
            Err(err) => {
                if retries_left == 1 {
                    return Err(err);
                }
                log::warn!("ranged download request failed: {err}");
            }
        }
        retries_left -= 1;
    }
    Ok(())
}

/// 哈希器在流式阶段只覆盖了首个分段，从磁盘读回其余内容补齐摘要
fn finish_hashing<F: Read + Seek>(
    file: &mut F,
    hasher: &mut Sha1,
    first_part: PartToDownload,
    content_length: u64,
) -> ApiResult<()> {
    let end_of_first_part = first_part.local_range.end + 1;
    file.seek(SeekFrom::Start(end_of_first_part)).map_err(write_error)?;
    let last_offset = first_part.local_range.start + content_length;
    let mut current_offset = end_of_first_part;
    let mut buf = vec![0u8; FINISH_HASHING_BUFFER_SIZE];
    while current_offset < last_offset {
        let n = file.read(&mut buf).map_err(write_error)?;
        if n == 0 {
            break;
        }
        let take = (n as u64).min(last_offset - current_offset) as usize;
        hasher.update(&buf[..take]);
        current_offset += take as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_parts_smaller_parts_first() {
        let parts = gen_parts(ByteRange::new(0, 18), ByteRange::new(0, 18), 4);
        let sizes = parts.iter().map(|part| part.cloud_range.size()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![4, 5, 5, 5]);
        assert_eq!(sizes.iter().sum::<u64>(), 19);
        assert_eq!(parts[0].cloud_range, ByteRange::new(0, 3));
        assert_eq!(parts[3].cloud_range, ByteRange::new(14, 18));
    }

    #[test]
    fn test_gen_parts_with_offset_local_range() {
        let parts = gen_parts(ByteRange::new(3, 9), ByteRange::new(3, 9), 2);
        assert_eq!(parts[0].cloud_range, ByteRange::new(3, 5));
        assert_eq!(parts[1].cloud_range, ByteRange::new(6, 9));
        assert_eq!(parts[0].local_range, ByteRange::new(3, 5));
    }
}
