use super::{
    copy_manager::CopyManager,
    executor::{EmergeExecutor, EmergeRequest},
    planner::EmergePlanner,
    upload_manager::UploadManager,
    upload_source::UploadSource,
    write_intent::WriteIntent,
};
use b2_apis::{http_client::ApiResult, FileVersion, Session};
use std::sync::Arc;

/// 拼装器
///
/// 把用户层请求（上传一个数据源，或按写意图序列合成一个对象）
/// 变换为规划加执行的完整流程，是本 crate 的统一入口。
#[derive(Debug)]
pub struct Emerger {
    session: Arc<Session>,
    upload_manager: Arc<UploadManager>,
    copy_manager: Arc<CopyManager>,
    executor: EmergeExecutor,
}

impl Emerger {
    /// 创建拼装器
    pub fn new(session: Arc<Session>) -> Self {
        let upload_manager = Arc::new(UploadManager::new(session.to_owned()));
        let copy_manager = Arc::new(CopyManager::new(session.to_owned()));
        let executor = EmergeExecutor::new(session.to_owned(), upload_manager.to_owned(), copy_manager.to_owned());
        Self {
            session,
            upload_manager,
            copy_manager,
            executor,
        }
    }

    /// 获取会话
    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// 获取上传管理器
    #[inline]
    pub fn upload_manager(&self) -> &Arc<UploadManager> {
        &self.upload_manager
    }

    /// 获取拷贝管理器
    #[inline]
    pub fn copy_manager(&self) -> &Arc<CopyManager> {
        &self.copy_manager
    }

    /// 按写意图序列合成一个对象
    ///
    /// 分片大小限制取自账户状态中服务端通告的值。
    pub fn emerge(&self, write_intents: Vec<WriteIntent>, request: EmergeRequest<'_>) -> ApiResult<FileVersion> {
        let planner = EmergePlanner::from_account_info(self.session.account_info())?;
        let plan = planner.get_emerge_plan(write_intents)?;
        self.executor.execute_emerge_plan(plan, request)
    }

    /// 上传一个数据源为新对象
    pub fn upload(&self, source: Arc<dyn UploadSource>, request: EmergeRequest<'_>) -> ApiResult<FileVersion> {
        self.emerge(vec![WriteIntent::upload(source, 0)], request)
    }
}
