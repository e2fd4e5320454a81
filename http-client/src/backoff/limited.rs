use super::{Backoff, BackoffOptions};
use rand::{thread_rng, Rng};
use std::time::Duration;

/// 封顶退避时长提供器
///
/// 基于一个退避时长提供器，限制其返回的最大时长。
/// 可以选择在封顶时追加最多一秒的随机抖动，错开各客户端的重试时机。
#[derive(Debug, Clone)]
pub struct LimitedBackoff<P> {
    base_backoff: P,
    max_delay: Duration,
    jitter_past_limit: bool,
}

impl<P> LimitedBackoff<P> {
    /// 创建封顶退避时长提供器
    #[inline]
    pub const fn new(base_backoff: P, max_delay: Duration) -> Self {
        Self {
            base_backoff,
            max_delay,
            jitter_past_limit: false,
        }
    }

    /// 创建封顶后追加随机抖动的退避时长提供器
    #[inline]
    pub const fn new_with_jitter(base_backoff: P, max_delay: Duration) -> Self {
        Self {
            base_backoff,
            max_delay,
            jitter_past_limit: true,
        }
    }

    /// 基础退避时长提供器
    #[inline]
    pub const fn base_backoff(&self) -> &P {
        &self.base_backoff
    }

    /// 最大时长
    #[inline]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl<P: Backoff> Backoff for LimitedBackoff<P> {
    fn time(&self, opts: &BackoffOptions<'_>) -> Duration {
        let duration = self.base_backoff.time(opts);
        if duration <= self.max_delay {
            return duration;
        }
        if self.jitter_past_limit {
            self.max_delay + Duration::from_secs_f64(thread_rng().gen::<f64>())
        } else {
            self.max_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        super::{BackoffOptions, FixedBackoff},
        *,
    };
    use crate::error::Error;

    #[test]
    fn test_limited_backoff() {
        let error = Error::ServiceError {
            message: "test".to_owned(),
        };
        let backoff = LimitedBackoff::new(FixedBackoff::new(Duration::from_secs(100)), Duration::from_secs(64));
        assert_eq!(
            backoff.time(&BackoffOptions::new(&error, 0)),
            Duration::from_secs(64)
        );

        let short = LimitedBackoff::new(FixedBackoff::new(Duration::from_secs(1)), Duration::from_secs(64));
        assert_eq!(short.time(&BackoffOptions::new(&error, 0)), Duration::from_secs(1));

        let jittered = LimitedBackoff::new_with_jitter(FixedBackoff::new(Duration::from_secs(100)), Duration::from_secs(64));
        for _ in 0..100 {
            let delay = jittered.time(&BackoffOptions::new(&error, 0));
            assert!(delay >= Duration::from_secs(64));
            assert!(delay < Duration::from_secs(65));
        }
    }
}
