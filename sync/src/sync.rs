use super::{
    action::{SyncAction, SyncEnv},
    error::{SyncError, SyncResult},
    folder::{zip_folders, SyncFolder},
    policy::{make_actions_for_pair, SyncPolicyConfig},
    report::SyncReporter,
    scan_policies::ScanPoliciesManager,
};
use b2_download_manager::DownloadManager;
use b2_upload_manager::Emerger;
use crossbeam_channel::bounded;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_SYNC_WORKERS: usize = 10;
const QUEUE_LIMIT_HEADROOM: usize = 1000;

/// 文件夹同步器
///
/// 比较两端的扫描流，按配置的策略产出确定性的动作序列，
/// 再把动作提交到有界的工作线程池执行。
/// 任何动作失败都会使整体同步被标记为不完整，
/// 但已经提交的动作都会被允许跑完。
#[derive(Debug, Default)]
pub struct Synchronizer {
    scan_policies: ScanPoliciesManager,
    policy_config: SyncPolicyConfig,
    max_workers: Option<usize>,
    allow_empty_source: bool,
}

impl Synchronizer {
    /// 创建文件夹同步器，缺省 10 个工作线程
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 设置扫描过滤策略
    #[inline]
    pub fn scan_policies(mut self, scan_policies: ScanPoliciesManager) -> Self {
        self.scan_policies = scan_policies;
        self
    }

    /// 设置同步策略
    #[inline]
    pub fn policy_config(mut self, policy_config: SyncPolicyConfig) -> Self {
        self.policy_config = policy_config;
        self
    }

    /// 设置工作线程数
    #[inline]
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers.max(1));
        self
    }

    /// 允许来源目录为空
    ///
    /// 与删除策略合用时，空的来源目录会清空整个目标端，
    /// 因此缺省拒绝空的本地来源目录。
    #[inline]
    pub fn allow_empty_source(mut self, allow: bool) -> Self {
        self.allow_empty_source = allow;
        self
    }

    /// 比较两端并产出有序的动作序列
    ///
    /// 给定两端的输入，输出是确定性的。
    pub fn make_folder_sync_actions(
        &self,
        source: &SyncFolder,
        dest: &SyncFolder,
        now_millis: u64,
        reporter: &dyn SyncReporter,
    ) -> SyncResult<Vec<SyncAction>> {
        if matches!((source, dest), (SyncFolder::Local(_), SyncFolder::Local(_))) {
            return Err(SyncError::InvalidArgument {
                message: "sync between two local folders is not supported".to_owned(),
            });
        }
        if let SyncFolder::Local(local) = source {
            if self.allow_empty_source {
                local.ensure_present()?;
            } else {
                local.ensure_non_empty()?;
            }
        }
        if let SyncFolder::Local(local) = dest {
            local.ensure_present()?;
        }

        let source_iter = source.all_files(reporter, &self.scan_policies)?;
        let dest_iter = dest.all_files(reporter, &self.scan_policies)?;

        let mut actions = Vec::new();
        for pair in zip_folders(source_iter, dest_iter) {
            let (source_path, dest_path) = pair?;
            reporter.update_compare(1);
            actions.extend(make_actions_for_pair(
                source_path.as_ref(),
                dest_path.as_ref(),
                source,
                dest,
                &self.policy_config,
                now_millis,
            )?);
        }
        Ok(actions)
    }

    /// 执行一次完整同步
    pub fn sync_folders(
        &self,
        source: &SyncFolder,
        dest: &SyncFolder,
        now_millis: u64,
        reporter: &dyn SyncReporter,
    ) -> SyncResult<()> {
        let actions = self.make_folder_sync_actions(source, dest, now_millis, reporter)?;
        let env = make_env(source, dest);

        let max_workers = self.max_workers.unwrap_or(DEFAULT_SYNC_WORKERS);
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|index| format!("b2.sdk.sync.{index}"))
            .build()
            .map_err(|err| SyncError::InvalidArgument {
                message: format!("cannot build sync thread pool: {err}"),
            })?;

        let failures = AtomicUsize::new(0);
        let (ticket_tx, ticket_rx) = bounded::<()>(max_workers + QUEUE_LIMIT_HEADROOM);
        pool.scope(|scope| {
            for action in actions {
                // 待执行动作达到上限时，提交在此阻塞
                let _ = ticket_tx.send(());
                let ticket_rx = ticket_rx.to_owned();
                let env = &env;
                let failures = &failures;
                scope.spawn(move |_| {
                    let description = action.to_string();
                    match action.execute(env) {
                        Ok(()) => reporter.action_done(&description),
                        Err(err) => {
                            failures.fetch_add(1, Ordering::SeqCst);
                            reporter.action_failed(&description, &err.to_string());
                        }
                    }
                    let _ = ticket_rx.try_recv();
                });
            }
        });

        let failures = failures.load(Ordering::SeqCst);
        if failures > 0 {
            return Err(SyncError::IncompleteSync { failures });
        }
        Ok(())
    }
}

fn make_env(source: &SyncFolder, dest: &SyncFolder) -> SyncEnv {
    let download_manager = match source {
        SyncFolder::B2(folder) => Some(DownloadManager::new(folder.session().to_owned())),
        SyncFolder::Local(_) => None,
    };
    let (emerger, dest_session, dest_bucket_id) = match dest {
        SyncFolder::B2(folder) => (
            Some(Emerger::new(folder.session().to_owned())),
            Some(folder.session().to_owned()),
            Some(folder.bucket_id().to_owned()),
        ),
        SyncFolder::Local(_) => (None, None, None),
    };
    SyncEnv {
        emerger,
        download_manager,
        dest_session,
        dest_bucket_id,
    }
}
