use super::{Backoff, BackoffOptions, Ratio};
use rand::{thread_rng, Rng};
use std::{convert::TryInto, time::Duration};

/// 随机化退避时长提供器
///
/// 基于一个退避时长提供器，将其返回的时长随机化到指定的比例区间内。
#[derive(Debug, Clone)]
pub struct RandomizedBackoff<P> {
    base_backoff: P,
    minification: Ratio<u8>,
    magnification: Ratio<u8>,
}

impl<P> RandomizedBackoff<P> {
    /// 创建随机化退避时长提供器
    #[inline]
    pub const fn new(base_backoff: P, minification: Ratio<u8>, magnification: Ratio<u8>) -> Self {
        Self {
            base_backoff,
            minification,
            magnification,
        }
    }

    /// 基础退避时长提供器
    #[inline]
    pub const fn base_backoff(&self) -> &P {
        &self.base_backoff
    }

    /// 缩小比例
    #[inline]
    pub const fn minification(&self) -> Ratio<u8> {
        self.minification
    }

    /// 放大比例
    #[inline]
    pub const fn magnification(&self) -> Ratio<u8> {
        self.magnification
    }
}

impl<P: Backoff> Backoff for RandomizedBackoff<P> {
    fn time(&self, opts: &BackoffOptions<'_>) -> Duration {
        let duration = self.base_backoff().time(opts);
        let minified: u64 = scale(duration, self.minification());
        let magnified: u64 = scale(duration, self.magnification());

        let randomized = thread_rng().gen_range(minified..magnified.max(minified + 1));
        Duration::from_nanos(randomized)
    }
}

fn scale(duration: Duration, ratio: Ratio<u8>) -> u64 {
    (duration.as_nanos().saturating_mul(u128::from(*ratio.numer())) / u128::from(*ratio.denom()))
        .try_into()
        .unwrap_or(u64::MAX)
}

impl<P: Default> Default for RandomizedBackoff<P> {
    #[inline]
    fn default() -> Self {
        Self::new(P::default(), Ratio::new_raw(1, 2), Ratio::new_raw(3, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        super::{BackoffOptions, FixedBackoff},
        *,
    };
    use crate::error::Error;
    use std::error::Error as StdError;

    #[test]
    fn test_randomized_backoff() -> Result<(), Box<dyn StdError>> {
        let fixed = FixedBackoff::new(Duration::from_secs(1));
        let randomized = RandomizedBackoff::new(fixed, Ratio::new_raw(1, 2), Ratio::new_raw(3, 2));
        let error = Error::ServiceError {
            message: "test".to_owned(),
        };

        for _ in 0..10000 {
            let delay = randomized.time(&BackoffOptions::new(&error, 0));
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(1500));
        }

        Ok(())
    }
}
