use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed(Duration),

    Exponential {
        base: Duration,
        factor: u32,
        max_delay: Duration,
    },
}

impl BackoffStrategy {
    /// Delay before retry number `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,

            BackoffStrategy::Exponential {
                base,
                factor,
                max_delay,
            } => {
                let exp = factor.saturating_pow(attempt);
                let delay = base.saturating_mul(exp);
                delay.min(*max_delay)
            }
        }
    }
}

/// Retry policy for transport failures. The default never retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            strategy: BackoffStrategy::Fixed(Duration::from_secs(1)),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    pub fn backoff(&self, attempts: u32) -> Duration {
        self.strategy.delay(attempts)
    }
}

#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_retries: u32,
    backoff: Option<Duration>,
    factor: Option<u32>,
    max_delay: Option<Duration>,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff_ms(mut self, ms: u64) -> Self {
        self.backoff = Some(Duration::from_millis(ms));
        self
    }

    /// A factor above 1 switches to exponential backoff.
    pub fn factor(mut self, factor: u32) -> Self {
        self.factor = Some(factor);
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn build(self) -> RetryPolicy {
        let base = self.backoff.unwrap_or(Duration::from_secs(1));
        let strategy = match self.factor {
            Some(factor) if factor > 1 => BackoffStrategy::Exponential {
                base,
                factor,
                max_delay: self.max_delay.unwrap_or(Duration::from_secs(60)),
            },
            _ => BackoffStrategy::Fixed(base),
        };

        RetryPolicy {
            max_retries: self.max_retries,
            strategy,
        }
    }
}
