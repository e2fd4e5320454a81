use std::{
    fmt::Debug,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

/// 同步过程的汇报接口
///
/// 只接收文字性的通知，绝不吞掉任何错误；
/// 错误仍然沿调用链向上传播。
pub trait SyncReporter: Debug + Send + Sync {
    /// 本地文件不可读或符号链接已失效，条目被跳过
    fn local_access_error(&self, path: &Path);

    /// 符号链接按策略被跳过
    fn symlink_skipped(&self, path: &Path);

    /// 完成了一对路径的比较
    fn update_compare(&self, count: u64);

    /// 一个动作执行成功
    fn action_done(&self, description: &str);

    /// 一个动作执行失败
    fn action_failed(&self, description: &str, error: &str);
}

/// 不做任何汇报的汇报器
#[derive(Debug, Default)]
pub struct NopSyncReporter;

impl SyncReporter for NopSyncReporter {
    fn local_access_error(&self, _path: &Path) {}

    fn symlink_skipped(&self, _path: &Path) {}

    fn update_compare(&self, _count: u64) {}

    fn action_done(&self, _description: &str) {}

    fn action_failed(&self, _description: &str, _error: &str) {}
}

/// 以计数器与日志实现的汇报器
#[derive(Debug, Default)]
pub struct SyncReport {
    access_errors: AtomicU64,
    symlinks_skipped: AtomicU64,
    compares: AtomicU64,
    actions_done: AtomicU64,
    actions_failed: AtomicU64,
}

impl SyncReport {
    /// 创建汇报器
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 访问失败被跳过的条目数
    pub fn access_error_count(&self) -> u64 {
        self.access_errors.load(Ordering::SeqCst)
    }

    /// 被跳过的符号链接数
    pub fn symlink_skipped_count(&self) -> u64 {
        self.symlinks_skipped.load(Ordering::SeqCst)
    }

    /// 已比较的路径对数
    pub fn compare_count(&self) -> u64 {
        self.compares.load(Ordering::SeqCst)
    }

    /// 成功的动作数
    pub fn action_done_count(&self) -> u64 {
        self.actions_done.load(Ordering::SeqCst)
    }

    /// 失败的动作数
    pub fn action_failed_count(&self) -> u64 {
        self.actions_failed.load(Ordering::SeqCst)
    }
}

impl SyncReporter for SyncReport {
    fn local_access_error(&self, path: &Path) {
        self.access_errors.fetch_add(1, Ordering::SeqCst);
        log::warn!("could not access {}, skipping", path.display());
    }

    fn symlink_skipped(&self, path: &Path) {
        self.symlinks_skipped.fetch_add(1, Ordering::SeqCst);
        log::debug!("skipping symlink {}", path.display());
    }

    fn update_compare(&self, count: u64) {
        self.compares.fetch_add(count, Ordering::SeqCst);
    }

    fn action_done(&self, description: &str) {
        self.actions_done.fetch_add(1, Ordering::SeqCst);
        log::info!("{description}");
    }

    fn action_failed(&self, description: &str, error: &str) {
        self.actions_failed.fetch_add(1, Ordering::SeqCst);
        log::warn!("{description} failed: {error}");
    }
}
