use super::{
    backoff::{Backoff, BackoffOptions},
    error::ApiResult,
};
use std::thread::sleep;

/// 重试次数预算
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TryCount(usize);

impl TryCount {
    /// 数据类请求的重试次数预算
    pub const DATA: Self = Self(20);

    /// 下载类请求的重试次数预算
    pub const DOWNLOAD: Self = Self(20);

    /// HEAD 请求的重试次数预算
    pub const HEAD: Self = Self(5);

    /// 其他请求的重试次数预算
    pub const OTHER: Self = Self(5);

    /// 创建重试次数预算，至少为一次
    #[inline]
    pub const fn new(count: usize) -> Self {
        if count == 0 {
            Self(1)
        } else {
            Self(count)
        }
    }

    /// 获取重试次数预算
    #[inline]
    pub const fn get(&self) -> usize {
        self.0
    }
}

/// 带重试地执行操作
///
/// 操作返回不可重试的错误时立刻将其返回。
/// 返回可重试错误时，优先按照服务端指定的 `Retry-After` 等待，
/// 否则按照退避策略等待，然后重试，最多尝试 `try_count` 次。
/// 最后一次尝试的错误会被原样返回。
pub fn retry_call<T>(
    try_count: TryCount,
    backoff: &dyn Backoff,
    mut op: impl FnMut() -> ApiResult<T>,
) -> ApiResult<T> {
    for retried in 0..try_count.get().saturating_sub(1) {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if !err.should_retry_http() => return Err(err),
            Err(err) => {
                let delay = err
                    .retry_after()
                    .unwrap_or_else(|| backoff.time(&BackoffOptions::new(&err, retried)));
                log::debug!("pausing thread for {delay:?} after: {err}");
                sleep(delay);
            }
        }
    }
    op()
}

#[cfg(test)]
mod tests {
    use super::{super::backoff::FixedBackoff, *};
    use crate::error::Error;
    use std::time::Duration;

    fn fast_backoff() -> FixedBackoff {
        FixedBackoff::new(Duration::from_millis(1))
    }

    #[test]
    fn test_retry_call_eventually_succeeds() -> ApiResult<()> {
        let mut attempts = 0;
        let result = retry_call(TryCount::new(5), &fast_backoff(), || {
            attempts += 1;
            if attempts < 3 {
                Err(Error::ServiceError {
                    message: "503 unavailable".to_owned(),
                })
            } else {
                Ok(attempts)
            }
        })?;
        assert_eq!(result, 3);
        assert_eq!(attempts, 3);
        Ok(())
    }

    #[test]
    fn test_retry_call_gives_up_after_budget() {
        let mut attempts = 0;
        let result: ApiResult<()> = retry_call(TryCount::new(4), &fast_backoff(), || {
            attempts += 1;
            Err(Error::ServiceError {
                message: "503 unavailable".to_owned(),
            })
        });
        assert!(matches!(result, Err(Error::ServiceError { .. })));
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_retry_call_propagates_fatal_errors_immediately() {
        let mut attempts = 0;
        let result: ApiResult<()> = retry_call(TryCount::new(10), &fast_backoff(), || {
            attempts += 1;
            Err(Error::AccessDenied)
        });
        assert!(matches!(result, Err(Error::AccessDenied)));
        assert_eq!(attempts, 1);
    }
}
