use std::{fmt::Debug, sync::Arc};

/// 传输进度监听器
///
/// 监听上传或下载任务的进度，由传输引擎在任务的各个阶段主动调用。
///
/// 生命周期为 [`ProgressListener::begin`]，若干次 [`ProgressListener::report`]，
/// 最终无论成败，传输引擎都保证调用 [`ProgressListener::end`]。
pub trait ProgressListener: Debug + Send + Sync {
    /// 任务开始，传入总字节数
    fn begin(&self, total_bytes: u64);

    /// 汇报已完成的字节数
    ///
    /// 传入的是累计值而非增量
    fn report(&self, bytes_so_far: u64);

    /// 任务结束
    fn end(&self);
}

impl<T: ProgressListener + ?Sized> ProgressListener for Arc<T> {
    #[inline]
    fn begin(&self, total_bytes: u64) {
        self.as_ref().begin(total_bytes)
    }

    #[inline]
    fn report(&self, bytes_so_far: u64) {
        self.as_ref().report(bytes_so_far)
    }

    #[inline]
    fn end(&self) {
        self.as_ref().end()
    }
}

/// 不汇报任何进度的监听器
#[derive(Copy, Clone, Debug, Default)]
pub struct NopProgressListener;

impl ProgressListener for NopProgressListener {
    #[inline]
    fn begin(&self, _total_bytes: u64) {}

    #[inline]
    fn report(&self, _bytes_so_far: u64) {}

    #[inline]
    fn end(&self) {}
}

/// 进度监听器作用域
///
/// 在创建时调用 [`ProgressListener::begin`]，在析构时调用 [`ProgressListener::end`]，
/// 确保任何退出路径（成功，失败或提前返回）都能关闭监听器。
#[derive(Debug)]
pub struct ProgressScope<'a> {
    listener: &'a dyn ProgressListener,
}

impl<'a> ProgressScope<'a> {
    /// 开始一个进度作用域
    #[inline]
    pub fn begin(listener: &'a dyn ProgressListener, total_bytes: u64) -> Self {
        listener.begin(total_bytes);
        Self { listener }
    }

    /// 汇报已完成的字节数
    #[inline]
    pub fn report(&self, bytes_so_far: u64) {
        self.listener.report(bytes_so_far)
    }

    /// 获取监听器
    #[inline]
    pub fn listener(&self) -> &'a dyn ProgressListener {
        self.listener
    }
}

impl Drop for ProgressScope<'_> {
    #[inline]
    fn drop(&mut self) {
        self.listener.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressListener for Recorder {
        fn begin(&self, total_bytes: u64) {
            self.events.lock().unwrap().push(format!("begin {total_bytes}"));
        }

        fn report(&self, bytes_so_far: u64) {
            self.events.lock().unwrap().push(format!("report {bytes_so_far}"));
        }

        fn end(&self) {
            self.events.lock().unwrap().push("end".to_owned());
        }
    }

    #[test]
    fn test_progress_scope_always_ends() {
        let recorder = Recorder::default();
        {
            let scope = ProgressScope::begin(&recorder, 10);
            scope.report(5);
        }
        assert_eq!(
            recorder.events.lock().unwrap().as_slice(),
            &["begin 10".to_owned(), "report 5".to_owned(), "end".to_owned()]
        );
    }
}
