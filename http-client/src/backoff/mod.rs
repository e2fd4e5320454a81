mod exponential;
mod fixed;
mod limited;
mod randomized;

use super::error::Error;
use auto_impl::auto_impl;
use std::{fmt::Debug, time::Duration};

pub use exponential::ExponentialBackoff;
pub use fixed::FixedBackoff;
pub use limited::LimitedBackoff;
pub use num_rational::Ratio;
pub use randomized::RandomizedBackoff;

/// 重试退避时长获取接口
#[auto_impl(&, &mut, Box, Rc, Arc)]
pub trait Backoff: Debug + Sync + Send {
    /// 获取重试退避时长
    fn time(&self, opts: &BackoffOptions<'_>) -> Duration;
}

/// 获取重试退避时长的选项
#[derive(Debug, Clone)]
pub struct BackoffOptions<'a> {
    error: &'a Error,
    retried: usize,
}

impl<'a> BackoffOptions<'a> {
    /// 创建获取重试退避时长的选项
    #[inline]
    pub fn new(error: &'a Error, retried: usize) -> Self {
        Self { error, retried }
    }

    /// 获取最近一次请求的错误
    #[inline]
    pub fn error(&self) -> &Error {
        self.error
    }

    /// 获取已经重试的次数
    #[inline]
    pub fn retried(&self) -> usize {
        self.retried
    }
}

/// 创建默认的退避策略
///
/// 基准时长 1 秒，每次重试乘以 3/2，封顶 64 秒，封顶后追加最多 1 秒的随机抖动，
/// 避免大量客户端在连接恢复后同时发起请求。
pub fn default_backoff() -> LimitedBackoff<ExponentialBackoff> {
    LimitedBackoff::new_with_jitter(ExponentialBackoff::default(), Duration::from_secs(64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_default_backoff_sequence() {
        let backoff = default_backoff();
        let error = Error::ServiceError {
            message: "503 unavailable".to_owned(),
        };
        let mut previous = Duration::ZERO;
        for retried in 0..9 {
            let delay = backoff.time(&BackoffOptions::new(&error, retried));
            assert!(delay >= previous);
            previous = delay;
        }
        // 1.0 * (3/2)^9 ≈ 38.4s，尚未封顶
        assert!(previous < Duration::from_secs(64));
        let capped = backoff.time(&BackoffOptions::new(&error, 20));
        assert!(capped >= Duration::from_secs(64));
        assert!(capped < Duration::from_secs(65));
    }
}
