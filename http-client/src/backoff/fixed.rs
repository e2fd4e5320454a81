use super::{Backoff, BackoffOptions};
use std::time::Duration;

/// 固定时长退避时长提供器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// 创建固定时长退避时长提供器
    #[inline]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// 固定时长
    #[inline]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Backoff for FixedBackoff {
    #[inline]
    fn time(&self, _opts: &BackoffOptions<'_>) -> Duration {
        self.delay
    }
}

impl Default for FixedBackoff {
    #[inline]
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
