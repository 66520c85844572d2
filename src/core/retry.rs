use std::time::Duration;

use crate::config::Config;
use crate::core::error::FailureReason;

/// 调用方的重试策略：执行器本身从不重试，由上层对可重试的失败显式调用 retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64, // 抖动因子，避免多个任务同时重试
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.retry_count,
            base_delay: Duration::from_secs(config.retry_delay),
            max_delay: Duration::from_secs(config.retry_max_delay.max(config.retry_delay)),
            ..Self::default()
        }
    }

    /// attempt 是已经重试过的次数
    pub fn should_retry(&self, reason: &FailureReason, attempt: usize) -> bool {
        attempt < self.max_retries && reason.kind.is_retryable()
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay_secs =
            self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let jitter = delay_secs * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let delay = Duration::from_secs_f64((delay_secs + jitter).max(0.1)); // 最小延迟100ms
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DownloadError;

    #[test]
    fn test_should_retry_only_network() {
        let policy = RetryPolicy::default();
        let network = DownloadError::Timeout.into_failure();
        let auth = DownloadError::AuthRequired("no token".into()).into_failure();
        let integrity = DownloadError::SizeMismatch { expected: 1, actual: 2 }.into_failure();

        assert!(policy.should_retry(&network, 0));
        assert!(policy.should_retry(&network, 2));
        assert!(!policy.should_retry(&network, 3));
        assert!(!policy.should_retry(&auth, 0));
        assert!(!policy.should_retry(&integrity, 0));
    }

    #[test]
    fn test_delay_backoff_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(8), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(100),
            jitter_factor: 0.2,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for(0).as_secs_f64();
            assert!((9.0..=11.0).contains(&delay));
        }
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.retry_count = 0;
        let policy = RetryPolicy::from_config(&config);
        assert!(!policy.should_retry(&DownloadError::Timeout.into_failure(), 0));
        assert_eq!(policy.base_delay, Duration::from_secs(5));
    }
}
