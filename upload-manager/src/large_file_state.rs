use b2_apis::utils::ProgressListener;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

/// 大文件上传的共享状态
///
/// 汇总各分片的进度，并记录首个失败。
/// 尚未开始网络传输的兄弟分片观察到失败标记后直接放弃，避免浪费带宽。
pub struct LargeFileUploadState {
    listener: Arc<dyn ProgressListener>,
    bytes_completed: AtomicU64,
    has_error: AtomicBool,
    error_message: Mutex<Option<String>>,
}

impl LargeFileUploadState {
    /// 创建大文件上传的共享状态
    pub fn new(listener: Arc<dyn ProgressListener>) -> Self {
        Self {
            listener,
            bytes_completed: AtomicU64::new(0),
            has_error: AtomicBool::new(false),
            error_message: Mutex::new(None),
        }
    }

    /// 是否已有分片失败
    #[inline]
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// 记录一次分片失败
    pub fn set_error(&self, message: String) {
        *self.error_message.lock().unwrap() = Some(message);
        self.has_error.store(true, Ordering::SeqCst);
    }

    /// 首个失败的描述信息
    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().unwrap().to_owned()
    }

    /// 累加已完成的字节数并汇报进度
    pub fn update_part_bytes(&self, bytes: u64) {
        let total = self.bytes_completed.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.listener.report(total);
    }
}

impl fmt::Debug for LargeFileUploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeFileUploadState")
            .field("bytes_completed", &self.bytes_completed)
            .field("has_error", &self.has_error)
            .finish()
    }
}

/// 把单个分片的进度折算到大文件整体进度上的监听器
#[derive(Debug)]
pub struct PartProgressReporter {
    state: Arc<LargeFileUploadState>,
    reported: AtomicU64,
}

impl PartProgressReporter {
    /// 创建分片进度监听器
    pub fn new(state: Arc<LargeFileUploadState>) -> Self {
        Self {
            state,
            reported: AtomicU64::new(0),
        }
    }
}

impl ProgressListener for PartProgressReporter {
    fn begin(&self, _total_bytes: u64) {}

    fn report(&self, bytes_so_far: u64) {
        let previous = self.reported.swap(bytes_so_far, Ordering::SeqCst);
        if bytes_so_far > previous {
            self.state.update_part_bytes(bytes_so_far - previous);
        }
    }

    fn end(&self) {}
}
