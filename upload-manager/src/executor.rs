use super::{
    copy_manager::CopyManager,
    large_file_state::LargeFileUploadState,
    part_definition::{EmergePartDefinition, UploadSubpart},
    planner::EmergePlan,
    upload_manager::UploadManager,
    upload_source::{io_error, UploadSource},
};
use b2_apis::{
    http_client::{ApiResult, Error},
    utils::{hex_sha1_of_stream, NopProgressListener, ProgressListener, ProgressScope},
    EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, Part, Session, UnfinishedLargeFile,
    AUTO_CONTENT_TYPE,
};
use crossbeam_channel::{bounded, unbounded};
use std::{
    collections::BTreeMap,
    io::Read,
    sync::Arc,
};

/// 大文件的最大允许长度
pub const MAX_LARGE_FILE_SIZE: u64 = 10 * 1000 * 1000 * 1000 * 1000;

/// 记录确定性方案 ID 的文件信息键
pub const PLAN_ID_FILE_INFO_KEY: &str = "plan_id";

const LIST_FILES_CAPABILITY: &str = "listFiles";

/// 一次拼装执行的目标与选项
#[derive(Debug)]
pub struct EmergeRequest<'a> {
    /// 目标存储空间 ID
    pub bucket_id: &'a str,
    /// 目标文件名
    pub file_name: &'a str,
    /// 内容类型，缺省为自动推断哨兵值
    pub content_type: Option<&'a str>,
    /// 文件自定义信息
    pub file_info: FileInfo,
    /// 进度监听器
    pub progress: Arc<dyn ProgressListener>,
    /// 显式续传的大文件 ID
    pub continue_large_file_id: Option<String>,
    /// 同时在途分片数的上限，用于限制内存占用
    pub max_queue_size: Option<usize>,
    /// 加密描述符，原样转发
    pub encryption: Option<EncryptionSetting>,
    /// 保留策略描述符，原样转发
    pub file_retention: Option<FileRetention>,
    /// 法律保全描述符，原样转发
    pub legal_hold: Option<LegalHold>,
}

impl<'a> EmergeRequest<'a> {
    /// 以缺省选项创建拼装执行请求
    pub fn new(bucket_id: &'a str, file_name: &'a str) -> Self {
        Self {
            bucket_id,
            file_name,
            content_type: None,
            file_info: Default::default(),
            progress: Arc::new(NopProgressListener),
            continue_large_file_id: None,
            max_queue_size: None,
            encryption: None,
            file_retention: None,
            legal_hold: None,
        }
    }
}

/// 拼装执行器
///
/// 驱动一个拼装方案：单分片方案直接上传或拷贝；
/// 多分片方案先尝试续传已有的大文件会话，然后把未完成的分片
/// 派发到有界的工作线程池，按分片编号顺序收集 SHA-1，最后结束会话。
#[derive(Debug)]
pub struct EmergeExecutor {
    session: Arc<Session>,
    upload_manager: Arc<UploadManager>,
    copy_manager: Arc<CopyManager>,
}

impl EmergeExecutor {
    /// 创建拼装执行器
    pub fn new(session: Arc<Session>, upload_manager: Arc<UploadManager>, copy_manager: Arc<CopyManager>) -> Self {
        Self {
            session,
            upload_manager,
            copy_manager,
        }
    }

    /// 执行拼装方案
    pub fn execute_emerge_plan(&self, plan: EmergePlan, request: EmergeRequest<'_>) -> ApiResult<FileVersion> {
        if plan.is_large_file() {
            self.execute_large_file_plan(plan, request)
        } else {
            if request.continue_large_file_id.is_some() {
                return Err(Error::InvalidArgument {
                    message: "Cannot resume emerging single part plan".to_owned(),
                });
            }
            self.execute_single_part_plan(plan, request)
        }
    }

    fn execute_single_part_plan(&self, plan: EmergePlan, request: EmergeRequest<'_>) -> ApiResult<FileVersion> {
        let part = plan.parts().first().ok_or(Error::InvalidArgument {
            message: "empty emerge plan".to_owned(),
        })?;
        match part {
            EmergePartDefinition::Copy {
                source,
                relative_offset,
                length,
            } => {
                let scope = ProgressScope::begin(request.progress.as_ref(), *length);
                let file_info = if request.content_type.is_some() {
                    Some(&request.file_info)
                } else {
                    None
                };
                let copy_source = source.narrow(*relative_offset, *length)?;
                let version = self.copy_manager.copy_file(
                    &copy_source,
                    request.file_name,
                    request.content_type,
                    file_info,
                    Some(request.bucket_id),
                    request.progress.to_owned(),
                    request.encryption.as_ref(),
                    request.file_retention.as_ref(),
                    request.legal_hold.as_ref(),
                )?;
                drop(scope);
                Ok(version)
            }
            EmergePartDefinition::Upload { .. } | EmergePartDefinition::Subparts { .. } => {
                let source: Arc<dyn UploadSource> =
                    Arc::new(EmergePartSource::new(self.session.to_owned(), part.to_owned()));
                self.upload_manager.upload_small_file(
                    request.bucket_id,
                    request.file_name,
                    request.content_type,
                    &request.file_info,
                    source,
                    request.progress.to_owned(),
                    request.encryption.as_ref(),
                    request.file_retention.as_ref(),
                    request.legal_hold.as_ref(),
                )
            }
        }
    }

    fn execute_large_file_plan(&self, plan: EmergePlan, request: EmergeRequest<'_>) -> ApiResult<FileVersion> {
        let total_length = plan.total_length();
        if total_length > MAX_LARGE_FILE_SIZE {
            return Err(Error::MaxFileSizeExceeded {
                size: total_length,
                max_allowed_size: MAX_LARGE_FILE_SIZE,
            });
        }

        let plan_id = plan.plan_id()?;
        let mut file_info = request.file_info.to_owned();
        if let Some(plan_id) = &plan_id {
            file_info.insert(PLAN_ID_FILE_INFO_KEY.to_owned(), plan_id.to_owned());
        }

        let scope = ProgressScope::begin(request.progress.as_ref(), total_length);

        let (unfinished_file, finished_parts) =
            self.find_unfinished_file_and_parts(&plan, &request, &file_info, plan_id.is_some())?;
        let unfinished_file = match unfinished_file {
            Some(unfinished_file) => {
                log::info!(
                    "resuming large file {} with {} finished parts",
                    unfinished_file.file_id,
                    finished_parts.len()
                );
                unfinished_file
            }
            None => self.session.start_large_file(
                request.bucket_id,
                request.file_name,
                request.content_type.unwrap_or(AUTO_CONTENT_TYPE),
                &file_info,
                request.encryption.as_ref(),
                request.file_retention.as_ref(),
                request.legal_hold.as_ref(),
            )?,
        };
        let file_id = unfinished_file.file_id;

        let part_sha1_array = self.run_parts(&plan, &request, &file_id, finished_parts)?;

        drop(scope);
        self.session.finish_large_file(&file_id, &part_sha1_array)
    }

    fn run_parts(
        &self,
        plan: &EmergePlan,
        request: &EmergeRequest<'_>,
        file_id: &str,
        finished_parts: BTreeMap<u32, Part>,
    ) -> ApiResult<Vec<String>> {
        let pool = self.upload_manager.thread_pool()?;
        let state = Arc::new(LargeFileUploadState::new(request.progress.to_owned()));
        let finished_parts = Arc::new(finished_parts);
        let part_count = plan.parts().len();
        let (result_tx, result_rx) = unbounded::<(u32, ApiResult<String>)>();
        let admission = request.max_queue_size.map(|max_queue_size| bounded::<()>(max_queue_size.max(1)));

        for (index, part) in plan.parts().iter().enumerate() {
            let part_number = (index + 1) as u32;
            if let Some((ticket_tx, _)) = &admission {
                // 在途分片达到上限时，提交线程在此阻塞
                ticket_tx.send(()).map_err(|_| Error::InvalidArgument {
                    message: "admission queue closed".to_owned(),
                })?;
            }
            let task = {
                let session = self.session.to_owned();
                let upload_manager = self.upload_manager.to_owned();
                let copy_manager = self.copy_manager.to_owned();
                let part = part.to_owned();
                let file_id = file_id.to_owned();
                let state = state.to_owned();
                let finished_parts = finished_parts.to_owned();
                let encryption = request.encryption.to_owned();
                let result_tx = result_tx.to_owned();
                let ticket_rx = admission.as_ref().map(|(_, ticket_rx)| ticket_rx.to_owned());
                move || {
                    let result = execute_part(
                        &session,
                        &upload_manager,
                        &copy_manager,
                        &part,
                        part_number,
                        &file_id,
                        &state,
                        &finished_parts,
                        encryption.as_ref(),
                    );
                    if let Some(ticket_rx) = ticket_rx {
                        let _ = ticket_rx.try_recv();
                    }
                    let _ = result_tx.send((part_number, result));
                }
            };
            pool.spawn(task);
        }
        drop(result_tx);

        let mut results = BTreeMap::new();
        for _ in 0..part_count {
            let (part_number, result) = result_rx.recv().map_err(|_| Error::InvalidArgument {
                message: "part workers disappeared without reporting".to_owned(),
            })?;
            results.insert(part_number, result);
        }

        let mut part_sha1_array = Vec::with_capacity(part_count);
        for part_number in 1..=part_count as u32 {
            match results.remove(&part_number) {
                Some(Ok(sha1)) => part_sha1_array.push(sha1),
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(Error::MissingPart {
                        file_id: file_id.to_owned(),
                    })
                }
            }
        }
        Ok(part_sha1_array)
    }

    /// 查找可以续传的大文件会话
    ///
    /// 优先级：显式指定的会话 ID，方案 ID 匹配，按文件名匹配。
    /// 任何一种查找都需要 `listFiles` 权限，没有该权限时静默放弃续传。
    fn find_unfinished_file_and_parts(
        &self,
        plan: &EmergePlan,
        request: &EmergeRequest<'_>,
        file_info: &FileInfo,
        has_plan_id: bool,
    ) -> ApiResult<(Option<UnfinishedLargeFile>, BTreeMap<u32, Part>)> {
        let allowed = self.session.account_info().allowed()?;
        if !allowed.has_capability(LIST_FILES_CAPABILITY) {
            return Ok((None, Default::default()));
        }

        if let Some(continue_large_file_id) = &request.continue_large_file_id {
            return self.resume_explicit(request, file_info, continue_large_file_id);
        }
        if has_plan_id {
            return self.resume_by_plan_id(plan, request, file_info);
        }
        self.resume_by_name(plan, request, file_info)
    }

    fn resume_explicit(
        &self,
        request: &EmergeRequest<'_>,
        file_info: &FileInfo,
        continue_large_file_id: &str,
    ) -> ApiResult<(Option<UnfinishedLargeFile>, BTreeMap<u32, Part>)> {
        let candidates = self
            .session
            .list_all_unfinished_large_files(request.bucket_id, Some(request.file_name))?;
        let unfinished_file = candidates
            .into_iter()
            .find(|candidate| candidate.file_id == continue_large_file_id)
            .ok_or_else(|| Error::FileNotPresent {
                file_id_or_name: continue_large_file_id.to_owned(),
            })?;
        if &unfinished_file.file_info != file_info {
            return Err(Error::InvalidArgument {
                message: "Cannot manually resume unfinished large file with different file_info".to_owned(),
            });
        }
        let finished_parts = self
            .session
            .list_all_parts(continue_large_file_id)?
            .into_iter()
            .map(|part| (part.part_number, part))
            .collect();
        Ok((Some(unfinished_file), finished_parts))
    }

    fn resume_by_plan_id(
        &self,
        plan: &EmergePlan,
        request: &EmergeRequest<'_>,
        file_info: &FileInfo,
    ) -> ApiResult<(Option<UnfinishedLargeFile>, BTreeMap<u32, Part>)> {
        let mut best: Option<(UnfinishedLargeFile, BTreeMap<u32, Part>)> = None;
        for candidate in self
            .session
            .list_all_unfinished_large_files(request.bucket_id, Some(request.file_name))?
        {
            if !candidate_metadata_matches(&candidate, request, file_info) {
                continue;
            }
            let mut finished_parts = BTreeMap::new();
            let mut broken = false;
            for part in self.session.list_all_parts(&candidate.file_id)? {
                let Some(emerge_part) = plan.parts().get(part.part_number as usize - 1) else {
                    // 同一方案 ID 却有更多分片，说明这个会话已经损坏
                    broken = true;
                    break;
                };
                if let Some(sha1) = emerge_part.sha1()? {
                    if sha1 != part.content_sha1 {
                        // 自愈：方案 ID 一致但分片哈希不同，该分片重新上传
                        continue;
                    }
                }
                finished_parts.insert(part.part_number, part);
            }
            if broken {
                continue;
            }
            let is_better = best
                .as_ref()
                .map_or(true, |(_, best_parts)| finished_parts.len() > best_parts.len());
            if is_better {
                best = Some((candidate, finished_parts));
            }
        }
        Ok(match best {
            Some((unfinished_file, finished_parts)) => (Some(unfinished_file), finished_parts),
            None => (None, Default::default()),
        })
    }

    fn resume_by_name(
        &self,
        plan: &EmergePlan,
        request: &EmergeRequest<'_>,
        file_info: &FileInfo,
    ) -> ApiResult<(Option<UnfinishedLargeFile>, BTreeMap<u32, Part>)> {
        if !plan.parts().iter().all(EmergePartDefinition::is_hashable) {
            return Ok((None, Default::default()));
        }
        for candidate in self
            .session
            .list_all_unfinished_large_files(request.bucket_id, Some(request.file_name))?
        {
            if candidate.file_name != request.file_name {
                continue;
            }
            if !candidate_metadata_matches(&candidate, request, file_info) {
                continue;
            }
            let mut finished_parts = BTreeMap::new();
            let mut files_match = true;
            for part in self.session.list_all_parts(&candidate.file_id)? {
                let Some(emerge_part) = plan.parts().get(part.part_number as usize - 1) else {
                    files_match = false;
                    break;
                };
                if emerge_part.length() != part.content_length {
                    files_match = false;
                    break;
                }
                match emerge_part.sha1()? {
                    Some(sha1) if sha1 == part.content_sha1 => {
                        finished_parts.insert(part.part_number, part);
                    }
                    _ => {
                        files_match = false;
                        break;
                    }
                }
            }
            if files_match && !finished_parts.is_empty() {
                return Ok((Some(candidate), finished_parts));
            }
        }
        Ok((None, Default::default()))
    }
}

fn candidate_metadata_matches(
    candidate: &UnfinishedLargeFile,
    request: &EmergeRequest<'_>,
    file_info: &FileInfo,
) -> bool {
    candidate.file_info == *file_info
        && candidate.server_side_encryption == request.encryption
        && candidate.file_retention == request.file_retention
        && candidate.legal_hold == request.legal_hold
}

#[allow(clippy::too_many_arguments)]
fn execute_part(
    session: &Arc<Session>,
    upload_manager: &Arc<UploadManager>,
    copy_manager: &Arc<CopyManager>,
    part: &EmergePartDefinition,
    part_number: u32,
    file_id: &str,
    state: &Arc<LargeFileUploadState>,
    finished_parts: &BTreeMap<u32, Part>,
    encryption: Option<&EncryptionSetting>,
) -> ApiResult<String> {
    if let Some(finished) = finished_parts.get(&part_number) {
        state.update_part_bytes(part.length());
        return Ok(finished.content_sha1.to_owned());
    }
    match part {
        EmergePartDefinition::Copy {
            source,
            relative_offset,
            length,
        } => copy_manager.copy_part(file_id, source, *relative_offset, *length, part_number, state, encryption),
        EmergePartDefinition::Upload { .. } | EmergePartDefinition::Subparts { .. } => {
            let content_length = part.length();
            let part_source = EmergePartSource::new(session.to_owned(), part.to_owned());
            upload_manager.upload_part(
                file_id,
                part_number,
                content_length,
                &|| part_source.open(),
                state,
                encryption,
            )
        }
    }
}

/// 把一个拼装分片适配成本地上传数据源
///
/// 远端子片段在打开时通过会话下载，实现"下载后上传"的降级路径。
#[derive(Debug)]
struct EmergePartSource {
    session: Arc<Session>,
    part: EmergePartDefinition,
}

impl EmergePartSource {
    fn new(session: Arc<Session>, part: EmergePartDefinition) -> Self {
        Self { session, part }
    }

    fn open_subpart(&self, subpart: &UploadSubpart) -> ApiResult<Box<dyn Read + Send>> {
        match subpart {
            UploadSubpart::Local {
                source,
                relative_offset,
                length,
            } => source.open_range(*relative_offset, *length),
            UploadSubpart::Remote {
                source,
                relative_offset,
                length,
            } => {
                let range = source.range(*relative_offset, *length);
                let (_, body) = self
                    .session
                    .download_file_by_id(source.file_id(), Some(range), source.encryption())?;
                Ok(Box::new(body))
            }
        }
    }
}

impl UploadSource for EmergePartSource {
    fn content_length(&self) -> u64 {
        self.part.length()
    }

    fn open(&self) -> ApiResult<Box<dyn Read + Send>> {
        match &self.part {
            EmergePartDefinition::Upload {
                source,
                relative_offset,
                length,
            } => source.open_range(*relative_offset, *length),
            EmergePartDefinition::Subparts { subparts } => {
                let mut reader: Box<dyn Read + Send> = Box::new(std::io::empty());
                for subpart in subparts {
                    reader = Box::new(reader.chain(self.open_subpart(subpart)?));
                }
                Ok(reader)
            }
            EmergePartDefinition::Copy { .. } => Err(Error::InvalidArgument {
                message: "copy part cannot be opened as an upload source".to_owned(),
            }),
        }
    }

    fn content_sha1(&self) -> ApiResult<String> {
        let mut reader = self.open()?;
        hex_sha1_of_stream(&mut reader, self.content_length()).map_err(io_error)
    }
}
