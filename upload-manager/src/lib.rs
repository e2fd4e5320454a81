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

//! # b2-upload-manager
//!
//! ## B2 上传管理器
//!
//! 把用户层的上传请求变换为正确的，带重试的，并发的协议操作序列：
//! 写意图经规划器变换为合法的拼装分片，再由执行器驱动小文件上传，
//! 大文件分片上传与服务端拷贝，并在可能时续传未完成的大文件会话。

mod copy_manager;
mod copy_source;
mod emerger;
mod executor;
mod hashing;
mod large_file_state;
mod part_definition;
mod planner;
mod progress;
mod upload_manager;
mod upload_source;
mod write_intent;

pub use copy_manager::CopyManager;
pub use copy_source::CopySource;
pub use emerger::Emerger;
pub use executor::{EmergeExecutor, EmergeRequest, MAX_LARGE_FILE_SIZE, PLAN_ID_FILE_INFO_KEY};
pub use hashing::{length_with_hash, StreamWithHash};
pub use large_file_state::{LargeFileUploadState, PartProgressReporter};
pub use part_definition::{EmergePartDefinition, UploadSubpart};
pub use planner::{EmergePlan, EmergePlanner};
pub use progress::ReadingStreamWithProgress;
pub use upload_manager::{UploadManager, MAX_UPLOAD_ATTEMPTS};
pub use upload_source::{UploadSource, UploadSourceBytes, UploadSourceLocalFile};
pub use write_intent::{OutboundSource, WriteIntent};

pub use b2_apis as apis;

#[cfg(test)]
mod tests {
    use super::*;
    use b2_apis::{
        account::InMemoryAccountInfo,
        http_client::{ApiResult, Error},
        utils::hex_sha1_of_bytes,
        Bucket, RawApi, RawSimulator, Session,
    };
    use std::{io::Read, sync::Arc};

    fn setup() -> (Arc<RawSimulator>, Arc<Session>, Bucket) {
        let simulator = Arc::new(RawSimulator::new());
        let raw: Arc<dyn RawApi> = simulator.to_owned();
        let session = Arc::new(Session::new(raw, Arc::new(InMemoryAccountInfo::new())));
        let (account_id, master_key) = simulator.create_account();
        session.authorize_account("production", &account_id, &master_key).unwrap();
        let bucket = session.create_bucket("bucket", "allPublic").unwrap();
        (simulator, session, bucket)
    }

    fn download_all(session: &Session, file_id: &str) -> ApiResult<Vec<u8>> {
        let (_, mut body) = session.download_file_by_id(file_id, None, None)?;
        let mut data = Vec::new();
        body.read_to_end(&mut data).unwrap();
        Ok(data)
    }

    #[test]
    fn test_small_upload_with_one_retryable_failure_then_success() -> ApiResult<()> {
        let (simulator, session, bucket) = setup();
        simulator.set_upload_errors(vec![Error::ServiceError {
            message: "503 service_unavailable".to_owned(),
        }]);

        let emerger = Emerger::new(session.to_owned());
        let version = emerger.upload(
            Arc::new(UploadSourceBytes::new(b"hello world".to_vec())),
            EmergeRequest::new(&bucket.bucket_id, "file1"),
        )?;

        assert_eq!(
            version.content_sha1.as_deref(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
        assert_eq!(download_all(&session, &version.file_id)?, b"hello world");
        Ok(())
    }

    #[test]
    fn test_fatal_upload_error_is_not_retried() {
        let (simulator, session, bucket) = setup();
        simulator.set_upload_errors(vec![Error::AccessDenied]);

        let emerger = Emerger::new(session);
        let result = emerger.upload(
            Arc::new(UploadSourceBytes::new(b"hello world".to_vec())),
            EmergeRequest::new(&bucket.bucket_id, "file1"),
        );
        assert!(matches!(result, Err(Error::AccessDenied)));
    }

    #[test]
    fn test_large_upload_round_trip() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let mut content = Vec::new();
        for chunk in 0..5u8 {
            content.extend_from_slice(&[b'a' + chunk; 200]);
        }

        let emerger = Emerger::new(session.to_owned());
        let version = emerger.upload(
            Arc::new(UploadSourceBytes::new(content.to_owned())),
            EmergeRequest::new(&bucket.bucket_id, "big-file"),
        )?;

        assert_eq!(version.content_length, 1000);
        assert_eq!(download_all(&session, &version.file_id)?, content);
        Ok(())
    }

    #[test]
    fn test_large_upload_resume_by_plan_id() -> ApiResult<()> {
        let (simulator, session, bucket) = setup();
        let content = [vec![b'A'; 200], vec![b'B'; 200], vec![b'C'; 200]].concat();
        let source = Arc::new(UploadSourceBytes::new(content.to_owned()));

        // 先手动完成前两个分片，模拟一次中断的上传
        let planner = EmergePlanner::from_account_info(session.account_info())?;
        let plan = planner.get_emerge_plan(vec![WriteIntent::upload(source.to_owned(), 0)])?;
        assert_eq!(plan.parts().len(), 3);
        let plan_id = plan.plan_id()?.unwrap();
        let mut file_info = b2_apis::FileInfo::new();
        file_info.insert(PLAN_ID_FILE_INFO_KEY.to_owned(), plan_id);
        let unfinished =
            session.start_large_file(&bucket.bucket_id, "big-file", "b2/x-auto", &file_info, None, None, None)?;
        for (part_number, range) in [(1u32, 0usize..200), (2, 200..400)] {
            let bytes = content[range].to_vec();
            let body_opener = move || -> ApiResult<(Box<dyn Read + Send>, u64)> {
                let reader = StreamWithHash::new(std::io::Cursor::new(bytes.to_owned()));
                Ok((Box::new(reader), length_with_hash(200)))
            };
            session.upload_part(
                &unfinished.file_id,
                part_number,
                length_with_hash(200),
                b2_apis::HEX_DIGITS_AT_END,
                None,
                &body_opener,
            )?;
        }
        let parts_before_resume = simulator.part_upload_count();

        // 以同一数据源重新上传，应该续传同一个会话，只补最后一个分片
        let emerger = Emerger::new(session.to_owned());
        let version = emerger.upload(source, EmergeRequest::new(&bucket.bucket_id, "big-file"))?;

        assert_eq!(version.file_id, unfinished.file_id);
        assert_eq!(simulator.part_upload_count(), parts_before_resume + 1);
        let downloaded = download_all(&session, &version.file_id)?;
        assert_eq!(hex_sha1_of_bytes(&downloaded), hex_sha1_of_bytes(&content));
        assert_eq!(downloaded, content);
        Ok(())
    }

    #[test]
    fn test_explicit_resume_with_different_file_info_is_rejected() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let content = vec![b'x'; 600];
        let source = Arc::new(UploadSourceBytes::new(content));

        let mut other_file_info = b2_apis::FileInfo::new();
        other_file_info.insert("color".to_owned(), "blue".to_owned());
        let unfinished = session.start_large_file(
            &bucket.bucket_id,
            "big-file",
            "b2/x-auto",
            &other_file_info,
            None,
            None,
            None,
        )?;

        let emerger = Emerger::new(session);
        let mut request = EmergeRequest::new(&bucket.bucket_id, "big-file");
        request.continue_large_file_id = Some(unfinished.file_id);
        let result = emerger.upload(source, request);
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
        Ok(())
    }

    #[test]
    fn test_emerge_with_copy_and_upload_intents() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let emerger = Emerger::new(session.to_owned());

        // 先上传一个对象作为拷贝源
        let remote_content = vec![b'r'; 600];
        let remote = emerger.upload(
            Arc::new(UploadSourceBytes::new(remote_content.to_owned())),
            EmergeRequest::new(&bucket.bucket_id, "remote-source"),
        )?;

        let local_content = vec![b'l'; 600];
        let intents = vec![
            WriteIntent::copy(
                CopySource::new(remote.file_id.to_owned(), 0, Some(600), None)?,
                0,
            )?,
            WriteIntent::upload(Arc::new(UploadSourceBytes::new(local_content.to_owned())), 600),
        ];
        let version = emerger.emerge(intents, EmergeRequest::new(&bucket.bucket_id, "merged"))?;

        let downloaded = download_all(&session, &version.file_id)?;
        assert_eq!(downloaded.len(), 1200);
        assert_eq!(&downloaded[..600], remote_content.as_slice());
        assert_eq!(&downloaded[600..], local_content.as_slice());
        Ok(())
    }

    #[test]
    fn test_max_file_size_is_enforced() {
        let (_, session, bucket) = setup();
        let executor = EmergeExecutor::new(
            session.to_owned(),
            Arc::new(UploadManager::new(session.to_owned())),
            Arc::new(CopyManager::new(session)),
        );
        // 以拷贝意图构造超出上限的方案，不需要真实数据
        let planner = EmergePlanner::new(200, 200, 5 * 1000 * 1000 * 1000);
        let intents = vec![WriteIntent::copy(
            CopySource::new("whatever", 0, Some(MAX_LARGE_FILE_SIZE + 1), None).unwrap(),
            0,
        )
        .unwrap()];
        let plan = planner.get_emerge_plan(intents).unwrap();
        let result = executor.execute_emerge_plan(plan, EmergeRequest::new(&bucket.bucket_id, "too-big"));
        assert!(matches!(result, Err(Error::MaxFileSizeExceeded { .. })));
    }

    #[test]
    fn test_cancel_large_file_discards_session() -> ApiResult<()> {
        let (_, session, bucket) = setup();
        let unfinished = session.start_large_file(
            &bucket.bucket_id,
            "doomed",
            "b2/x-auto",
            &Default::default(),
            None,
            None,
            None,
        )?;
        let cancelled = session.cancel_large_file(&unfinished.file_id)?;
        assert_eq!(cancelled.file_id, unfinished.file_id);
        let listed = session.list_all_unfinished_large_files(&bucket.bucket_id, None)?;
        assert!(listed.is_empty());
        Ok(())
    }
}
