use super::{Backoff, BackoffOptions, Ratio};
use std::{convert::TryInto, time::Duration};

/// 指数增长退避时长提供器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    growth: Ratio<u8>,
}

impl ExponentialBackoff {
    /// 创建指数增长退避时长提供器
    #[inline]
    pub const fn new(base_delay: Duration, growth: Ratio<u8>) -> Self {
        Self { base_delay, growth }
    }

    /// 基准时长
    #[inline]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// 增长比例
    #[inline]
    pub const fn growth(&self) -> Ratio<u8> {
        self.growth
    }
}

impl Backoff for ExponentialBackoff {
    fn time(&self, opts: &BackoffOptions<'_>) -> Duration {
        let mut numer: u128 = 1;
        let mut denom: u128 = 1;
        for _ in 0..opts.retried() {
            numer = numer.saturating_mul(u128::from(*self.growth.numer()));
            denom = denom.saturating_mul(u128::from(*self.growth.denom()));
        }
        let nanos = self.base_delay.as_nanos().saturating_mul(numer) / denom;
        Duration::from_nanos(nanos.try_into().unwrap_or(u64::MAX))
    }
}

impl Default for ExponentialBackoff {
    #[inline]
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Ratio::new_raw(3, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_exponential_backoff() {
        let backoff = ExponentialBackoff::default();
        let error = Error::ServiceError {
            message: "test".to_owned(),
        };
        assert_eq!(
            backoff.time(&BackoffOptions::new(&error, 0)),
            Duration::from_secs(1)
        );
        assert_eq!(
            backoff.time(&BackoffOptions::new(&error, 1)),
            Duration::from_millis(1500)
        );
        assert_eq!(
            backoff.time(&BackoffOptions::new(&error, 2)),
            Duration::from_millis(2250)
        );
    }
}
