use b2_apis::utils::ProgressListener;
use std::{
    io::{Read, Result as IoResult},
    sync::Arc,
};

/// 汇报读取进度的数据流
///
/// 每读出一块数据，就把累计读取量汇报给进度监听器。
#[derive(Debug)]
pub struct ReadingStreamWithProgress<R> {
    inner: R,
    listener: Arc<dyn ProgressListener>,
    bytes_read: u64,
}

impl<R> ReadingStreamWithProgress<R> {
    /// 创建汇报读取进度的数据流
    pub fn new(inner: R, listener: Arc<dyn ProgressListener>) -> Self {
        Self {
            inner,
            listener,
            bytes_read: 0,
        }
    }

    /// 已读取的字节数
    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: Read> Read for ReadingStreamWithProgress<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.bytes_read += n as u64;
            self.listener.report(self.bytes_read);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fmt, sync::Mutex};

    #[derive(Default)]
    struct Recording {
        reports: Mutex<Vec<u64>>,
    }

    impl fmt::Debug for Recording {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Recording").finish()
        }
    }

    impl ProgressListener for Recording {
        fn begin(&self, _total_bytes: u64) {}

        fn report(&self, bytes_so_far: u64) {
            self.reports.lock().unwrap().push(bytes_so_far);
        }

        fn end(&self) {}
    }

    #[test]
    fn test_progress_is_monotonic() -> IoResult<()> {
        let listener = Arc::new(Recording::default());
        let progress: Arc<dyn ProgressListener> = listener.to_owned();
        let mut stream = ReadingStreamWithProgress::new(&b"hello world"[..], progress);
        let mut buf = [0u8; 4];
        while stream.read(&mut buf)? > 0 {}
        let reports = listener.reports.lock().unwrap();
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*reports.last().unwrap(), 11);
        Ok(())
    }
}
