#![deny(
    absolute_paths_not_starting_with_crate,
    anonymous_parameters,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    non_ascii_idents,
    indirect_structural_match,
    trivial_numeric_casts,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

//! # b2-download-manager
//!
//! ## B2 下载管理器
//!
//! 发出下载请求并校验长度与 SHA-1。
//! 支持随机写的目标按范围分段并行下载，数据块经有界队列交给唯一的
//! 写入线程落盘；其余情况顺序下载。被截断的分段由范围请求补齐。

mod download_manager;
mod downloaded_file;
mod downloader;

pub use download_manager::{DownloadManager, DownloadOptions, DEFAULT_MAX_STREAMS, PARALLEL_MIN_PART_SIZE};
pub use downloaded_file::DownloadedFile;
pub use downloader::{chunk_size_for, ParallelDownloader, SimpleDownloader, ALIGN_FACTOR, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

pub use b2_apis as apis;

#[cfg(test)]
mod tests {
    use super::*;
    use b2_apis::{
        account::InMemoryAccountInfo,
        http_client::{ApiResult, Error},
        utils::{hex_sha1_of_bytes, ProgressListener},
        Bucket, ByteRange, FileVersion, RawApi, RawSimulator, Session,
    };
    use std::{
        fmt,
        io::{Cursor, Read},
        sync::{Arc, Mutex},
    };

    fn setup() -> (Arc<RawSimulator>, Arc<Session>, Bucket) {
        let simulator = Arc::new(RawSimulator::new());
        let raw: Arc<dyn RawApi> = simulator.to_owned();
        let session = Arc::new(Session::new(raw, Arc::new(InMemoryAccountInfo::new())));
        let (account_id, master_key) = simulator.create_account();
        session.authorize_account("production", &account_id, &master_key).unwrap();
        let bucket = session.create_bucket("bucket", "allPublic").unwrap();
        (simulator, session, bucket)
    }

    fn upload(session: &Session, bucket: &Bucket, file_name: &str, content: &[u8]) -> ApiResult<FileVersion> {
        let sha1 = hex_sha1_of_bytes(content);
        let content = content.to_vec();
        let content_len = content.len() as u64;
        let body_opener = move || -> ApiResult<(Box<dyn Read + Send>, u64)> {
            let size = content.len() as u64;
            Ok((Box::new(Cursor::new(content.to_owned())), size))
        };
        session.upload_file(
            &bucket.bucket_id,
            file_name,
            content_len,
            "text/plain",
            &sha1,
            &Default::default(),
            None,
            None,
            None,
            &body_opener,
        )
    }

    #[derive(Default)]
    struct RecordingProgress {
        reports: Mutex<Vec<u64>>,
    }

    impl fmt::Debug for RecordingProgress {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RecordingProgress").finish()
        }
    }

    impl ProgressListener for RecordingProgress {
        fn begin(&self, _total_bytes: u64) {}

        fn report(&self, bytes_so_far: u64) {
            self.reports.lock().unwrap().push(bytes_so_far);
        }

        fn end(&self) {}
    }

    #[test]
    fn test_parallel_download_of_small_object() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let content = b"abcdefghijklmnopqrs";
        let version = upload(&session, &bucket, "file1", content)?;

        let manager = DownloadManager::new(session.to_owned())
            .min_part_size(2)
            .max_streams(999)
            .force_chunk_size(2);
        let progress = Arc::new(RecordingProgress::default());
        let options = DownloadOptions {
            progress: progress.to_owned(),
            ..Default::default()
        };
        let downloaded = manager.download_file_by_id(&version.file_id, options)?;
        let mut destination = Cursor::new(Vec::new());
        downloaded.save(&mut destination)?;

        assert_eq!(destination.into_inner(), content);
        let reports = progress.reports.lock().unwrap();
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*reports.last().unwrap(), content.len() as u64);
        Ok(())
    }

    #[test]
    fn test_partial_range_download_with_preseeked_destination() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let version = upload(&session, &bucket, "file1", b"abcdefghijklmnopqrs")?;

        let manager = DownloadManager::new(session.to_owned())
            .min_part_size(2)
            .max_streams(999)
            .force_chunk_size(2);
        let options = DownloadOptions {
            range: Some(ByteRange::new(3, 9)),
            ..Default::default()
        };
        let downloaded = manager.download_file_by_id(&version.file_id, options)?;

        let mut destination = Cursor::new(b"12345678901234567890".to_vec());
        destination.set_position(3);
        downloaded.save(&mut destination)?;

        assert_eq!(destination.into_inner(), b"123defghij1234567890");
        Ok(())
    }

    #[test]
    fn test_truncated_response_is_rescued_by_ranged_requests() -> ApiResult<()> {
        let (simulator, session, bucket) = setup();
        let content = (0..=255u8).cycle().take(1000).collect::<Vec<_>>();
        let version = upload(&session, &bucket, "file1", &content)?;

        let manager = DownloadManager::new(session.to_owned())
            .min_part_size(100)
            .max_streams(4)
            .force_chunk_size(64);
        // 最初那次响应只给出一部分内容，其余由范围请求补齐
        simulator.truncate_next_download(50);
        let downloaded = manager.download_file_by_id(&version.file_id, DownloadOptions::default())?;
        let mut destination = Cursor::new(Vec::new());
        downloaded.save(&mut destination)?;

        assert_eq!(destination.into_inner(), content);
        Ok(())
    }

    #[test]
    fn test_simple_download_for_small_objects() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let content = b"tiny content";
        let version = upload(&session, &bucket, "file1", content)?;

        // 缺省配置下对象远小于最小分段，选择顺序下载器
        let manager = DownloadManager::new(session.to_owned());
        let downloaded = manager.download_file_by_id(&version.file_id, DownloadOptions::default())?;
        let mut destination = Vec::new();
        downloaded.save_to_writer(&mut destination)?;
        assert_eq!(destination, content);
        Ok(())
    }

    #[test]
    fn test_full_range_succeeds_and_overflowing_range_fails() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let content = b"abcdefghijklmnopqrs";
        let version = upload(&session, &bucket, "file1", content)?;
        let manager = DownloadManager::new(session.to_owned());

        let options = DownloadOptions {
            range: Some(ByteRange::new(0, content.len() as u64 - 1)),
            ..Default::default()
        };
        let downloaded = manager.download_file_by_id(&version.file_id, options)?;
        let mut destination = Cursor::new(Vec::new());
        downloaded.save(&mut destination)?;
        assert_eq!(destination.into_inner(), content);

        let options = DownloadOptions {
            range: Some(ByteRange::new(0, content.len() as u64)),
            ..Default::default()
        };
        let result = manager.download_file_by_id(&version.file_id, options);
        assert!(matches!(result, Err(Error::UnsatisfiableRange)));
        Ok(())
    }

    #[test]
    fn test_save_to_path_restores_modification_time() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let sha1 = hex_sha1_of_bytes(b"dated content");
        let mut file_info = b2_apis::FileInfo::new();
        file_info.insert(
            b2_apis::SRC_LAST_MODIFIED_MILLIS.to_owned(),
            "1500000000000".to_owned(),
        );
        let body_opener = || -> ApiResult<(Box<dyn Read + Send>, u64)> {
            Ok((Box::new(Cursor::new(b"dated content".to_vec())), 13))
        };
        let version = session.upload_file(
            &bucket.bucket_id,
            "dated",
            13,
            "text/plain",
            &sha1,
            &file_info,
            None,
            None,
            None,
            &body_opener,
        )?;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dated.txt");
        let manager = DownloadManager::new(session.to_owned());
        manager
            .download_file_by_id(&version.file_id, DownloadOptions::default())?
            .save_to_path(&path)?;

        assert_eq!(std::fs::read(&path).unwrap(), b"dated content");
        let mtime = filetime::FileTime::from_last_modification_time(&std::fs::metadata(&path).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_500_000_000);
        Ok(())
    }
}
