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

//! # b2-sync
//!
//! ## B2 文件夹同步器
//!
//! 把本地目录树或远端存储空间前缀枚举为有序的扫描流，
//! 按相对路径归并比较，依照配置的比较，覆盖与保留策略产出动作序列，
//! 并在有界的工作线程池上执行。

mod action;
mod error;
mod folder;
mod path;
mod policy;
mod report;
mod scan_policies;
mod sync;

pub use action::SyncAction;
pub use error::{SyncError, SyncResult};
pub use folder::{zip_folders, B2Folder, B2PathIterator, LocalFolder, LocalPathIterator, SyncFolder, ZipFolders};
pub use path::SyncPath;
pub use policy::{
    make_b2_delete_actions, make_b2_keep_days_actions, should_transfer, CompareVersionMode, KeepOrDeleteMode,
    NewerFileSyncMode, SyncPolicyConfig,
};
pub use report::{NopSyncReporter, SyncReport, SyncReporter};
pub use scan_policies::{ScanPoliciesManager, ScanPoliciesManagerBuilder};
pub use sync::Synchronizer;

pub use b2_apis as apis;

#[cfg(test)]
mod tests {
    use super::*;
    use b2_apis::{
        account::InMemoryAccountInfo,
        http_client::ApiResult,
        utils::hex_sha1_of_bytes,
        Bucket, FileInfo, RawApi, RawSimulator, Session, SRC_LAST_MODIFIED_MILLIS,
    };
    use std::{
        fs,
        io::{Cursor, Read},
        sync::Arc,
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

    fn upload_with_mod_time(
        session: &Session,
        bucket: &Bucket,
        file_name: &str,
        content: &[u8],
        mod_time_millis: u64,
    ) -> ApiResult<()> {
        let sha1 = hex_sha1_of_bytes(content);
        let mut file_info = FileInfo::new();
        file_info.insert(SRC_LAST_MODIFIED_MILLIS.to_owned(), mod_time_millis.to_string());
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
            &file_info,
            None,
            None,
            None,
            &body_opener,
        )?;
        Ok(())
    }

    fn write_local_file(dir: &std::path::Path, name: &str, content: &[u8], mod_time_millis: u64) {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let mtime = filetime::FileTime::from_unix_time(
            (mod_time_millis / 1000) as i64,
            ((mod_time_millis % 1000) * 1_000_000) as u32,
        );
        filetime::set_file_mtime(&path, mtime).unwrap();
    }

    #[test]
    fn test_sync_up_raises_when_dest_is_newer() -> SyncResult<()> {
        let (_, session, bucket) = setup();
        upload_with_mod_time(&session, &bucket, "a.txt", b"remote a", 200_000)?;

        let dir = tempfile::tempdir().unwrap();
        write_local_file(dir.path(), "a.txt", b"local a", 100_000);

        let source = SyncFolder::Local(LocalFolder::new(dir.path()));
        let dest = SyncFolder::B2(B2Folder::new(session, "bucket", "")?);
        let synchronizer = Synchronizer::new().policy_config(SyncPolicyConfig {
            newer_file_mode: NewerFileSyncMode::RaiseError,
            ..Default::default()
        });
        let result = synchronizer.make_folder_sync_actions(&source, &dest, 300_000, &NopSyncReporter);
        assert!(matches!(result, Err(SyncError::DestFileNewer { .. })));
        Ok(())
    }

    #[test]
    fn test_sync_up_with_replace_and_delete() -> SyncResult<()> {
        let (_, session, bucket) = setup();
        upload_with_mod_time(&session, &bucket, "a.txt", b"remote a", 200_000)?;
        upload_with_mod_time(&session, &bucket, "b.txt", b"remote b", 100_000)?;

        let dir = tempfile::tempdir().unwrap();
        write_local_file(dir.path(), "a.txt", b"local a", 100_000);

        let source = SyncFolder::Local(LocalFolder::new(dir.path()));
        let dest = SyncFolder::B2(B2Folder::new(session.to_owned(), "bucket", "")?);
        let synchronizer = Synchronizer::new().policy_config(SyncPolicyConfig {
            newer_file_mode: NewerFileSyncMode::Replace,
            keep_mode: KeepOrDeleteMode::Delete,
            ..Default::default()
        });

        let actions = synchronizer.make_folder_sync_actions(&source, &dest, 300_000, &NopSyncReporter)?;
        let descriptions = actions.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(
            descriptions,
            vec![
                "upload a.txt",
                "delete a.txt (old version)",
                "delete b.txt",
            ]
        );

        let report = SyncReport::new();
        synchronizer.sync_folders(&source, &dest, 300_000, &report)?;
        assert_eq!(report.action_done_count(), 3);
        assert_eq!(report.action_failed_count(), 0);

        let listed = session.list_file_versions(&bucket.bucket_id, None, None, None, None)?;
        assert_eq!(listed.files.len(), 1);
        assert_eq!(listed.files[0].file_name, "a.txt");
        assert_eq!(listed.files[0].mod_time_millis(), 100_000);
        Ok(())
    }

    #[test]
    fn test_sync_down_restores_content_and_mod_time() -> SyncResult<()> {
        let (_, session, bucket) = setup();
        upload_with_mod_time(&session, &bucket, "docs/readme.txt", b"remote content", 1_500_000_000_000)?;
        let _ = bucket;

        let dir = tempfile::tempdir().unwrap();
        let dest_root = dir.path().join("mirror");

        let source = SyncFolder::B2(B2Folder::new(session, "bucket", "")?);
        let dest = SyncFolder::Local(LocalFolder::new(&dest_root));
        let synchronizer = Synchronizer::new();
        synchronizer.sync_folders(&source, &dest, 1_600_000_000_000, &NopSyncReporter)?;

        let downloaded = dest_root.join("docs").join("readme.txt");
        assert_eq!(fs::read(&downloaded).unwrap(), b"remote content");
        let mtime = filetime::FileTime::from_last_modification_time(&fs::metadata(&downloaded).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_500_000_000);
        Ok(())
    }

    #[test]
    fn test_sync_up_new_files_only_transfers_missing() -> SyncResult<()> {
        let (_, session, bucket) = setup();
        upload_with_mod_time(&session, &bucket, "same.txt", b"same content", 100_000)?;

        let dir = tempfile::tempdir().unwrap();
        write_local_file(dir.path(), "same.txt", b"same content", 100_000);
        write_local_file(dir.path(), "new.txt", b"new content", 100_000);

        let source = SyncFolder::Local(LocalFolder::new(dir.path()));
        let dest = SyncFolder::B2(B2Folder::new(session.to_owned(), "bucket", "")?);
        let synchronizer = Synchronizer::new();
        let actions =
            synchronizer.make_folder_sync_actions(&source, &dest, 300_000, &NopSyncReporter)?;
        let descriptions = actions.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(descriptions, vec!["upload new.txt"]);

        synchronizer.sync_folders(&source, &dest, 300_000, &NopSyncReporter)?;
        let names = session.list_file_names(&bucket.bucket_id, None, None, None)?;
        let listed = names
            .files
            .iter()
            .map(|version| version.file_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(listed, vec!["new.txt", "same.txt"]);
        Ok(())
    }

    #[test]
    fn test_empty_source_is_rejected_unless_allowed() -> SyncResult<()> {
        let (_, session, _) = setup();
        let dir = tempfile::tempdir().unwrap();

        let source = SyncFolder::Local(LocalFolder::new(dir.path()));
        let dest = SyncFolder::B2(B2Folder::new(session, "bucket", "")?);
        let synchronizer = Synchronizer::new();
        let result = synchronizer.make_folder_sync_actions(&source, &dest, 300_000, &NopSyncReporter);
        assert!(matches!(result, Err(SyncError::EmptyDirectory { .. })));

        let synchronizer = synchronizer.allow_empty_source(true);
        let actions = synchronizer.make_folder_sync_actions(&source, &dest, 300_000, &NopSyncReporter)?;
        assert!(actions.is_empty());
        Ok(())
    }
}
