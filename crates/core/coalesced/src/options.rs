use std::{fmt, sync::Arc, time::Duration};

use crate::{AbortSignal, Backoff, Key};

pub const DEFAULT_MAX_RETRY: u32 = 30;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(3000);
pub const DEFAULT_MIN_RETRY_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Longest a resolved value may stay cached, 7 days
pub const MAX_AGE_LIMIT: Duration = Duration::from_millis(604_800_000);

/// How long a resolved value stays cached
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MaxAge {
    Finite(Duration),
    /// Only an explicit flush evicts the value
    Forever,
}

impl MaxAge {
    /// Interpret a millisecond count: negative is zero, above 7 days is 7
    /// days, infinity never expires.
    pub fn from_millis(millis: f64) -> Self {
        if millis == f64::INFINITY {
            MaxAge::Forever
        } else if millis.is_nan() || millis <= 0.0 {
            MaxAge::Finite(Duration::ZERO)
        } else if millis >= MAX_AGE_LIMIT.as_millis() as f64 {
            MaxAge::Finite(MAX_AGE_LIMIT)
        } else {
            MaxAge::Finite(Duration::from_secs_f64(millis / 1000.0))
        }
    }

    /// Clamp into `[0, 7 days]`
    pub fn clamp(self) -> Self {
        match self {
            MaxAge::Finite(duration) => MaxAge::Finite(duration.min(MAX_AGE_LIMIT)),
            MaxAge::Forever => MaxAge::Forever,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            MaxAge::Finite(duration) => Some(*duration),
            MaxAge::Forever => None,
        }
    }
}

impl Default for MaxAge {
    fn default() -> Self {
        MaxAge::Finite(DEFAULT_MAX_AGE)
    }
}

impl From<Duration> for MaxAge {
    fn from(value: Duration) -> Self {
        MaxAge::Finite(value).clamp()
    }
}

/// Passed to the retry hook
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RetryContext<'a> {
    pub key: &'a Key,
    /// Starts at 1 for the first retry
    pub retry_count: u32,
}

pub type RetryHook<E> = Arc<dyn Fn(&E, RetryContext<'_>) + Send + Sync>;

/// Per call options
pub struct Options<E> {
    pub max_retry: u32,
    pub max_age: MaxAge,
    pub backoff: Backoff,
    pub on_before_retry: Option<RetryHook<E>>,
    pub signal: Option<AbortSignal>,
    /// Call-site collision warnings and read-only cached values
    pub integrity: bool,
}

impl<E> Options<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a configuration section
    pub fn from_settings(settings: &idmp_config::Options) -> Self {
        Self {
            max_retry: settings.max_retry,
            max_age: MaxAge::from_millis(settings.max_age),
            backoff: Backoff::new(
                Duration::from_millis(settings.min_retry_delay),
                Duration::from_millis(settings.max_retry_delay),
            ),
            on_before_retry: None,
            signal: None,
            integrity: settings.integrity_enabled(),
        }
    }

    /// Build from the loaded `Idmp.toml`
    pub async fn configured() -> Self {
        Self::from_settings(&idmp_config::config().await.options)
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn max_age(mut self, max_age: impl Into<MaxAge>) -> Self {
        self.max_age = max_age.into();
        self
    }

    pub fn retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(min, max);
        self
    }

    pub fn on_before_retry(
        mut self,
        hook: impl Fn(&E, RetryContext<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.on_before_retry = Some(Arc::new(hook));
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn integrity(mut self, integrity: bool) -> Self {
        self.integrity = integrity;
        self
    }
}

impl<E> Default for Options<E> {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            max_age: MaxAge::default(),
            backoff: Backoff::default(),
            on_before_retry: None,
            signal: None,
            integrity: cfg!(debug_assertions),
        }
    }
}

impl<E> Clone for Options<E> {
    fn clone(&self) -> Self {
        Self {
            max_retry: self.max_retry,
            max_age: self.max_age,
            backoff: self.backoff,
            on_before_retry: self.on_before_retry.clone(),
            signal: self.signal.clone(),
            integrity: self.integrity,
        }
    }
}

impl<E> fmt::Debug for Options<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("max_retry", &self.max_retry)
            .field("max_age", &self.max_age)
            .field("backoff", &self.backoff)
            .field("on_before_retry", &self.on_before_retry.is_some())
            .field("signal", &self.signal)
            .field("integrity", &self.integrity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{MaxAge, Options, MAX_AGE_LIMIT};

    #[test]
    fn max_age_clamping() {
        assert_eq!(MaxAge::from_millis(-5.0), MaxAge::Finite(Duration::ZERO));
        assert_eq!(MaxAge::from_millis(f64::NEG_INFINITY), MaxAge::Finite(Duration::ZERO));
        assert_eq!(MaxAge::from_millis(1e15), MaxAge::Finite(MAX_AGE_LIMIT));
        assert_eq!(MaxAge::from_millis(f64::INFINITY), MaxAge::Forever);
        assert_eq!(MaxAge::from_millis(250.0), MaxAge::Finite(Duration::from_millis(250)));

        assert_eq!(
            MaxAge::from(Duration::from_secs(60 * 60 * 24 * 30)),
            MaxAge::Finite(MAX_AGE_LIMIT)
        );
    }

    #[test]
    fn defaults() {
        let options = Options::<()>::default();
        assert_eq!(options.max_retry, 30);
        assert_eq!(options.max_age, MaxAge::Finite(Duration::from_millis(3000)));
        assert_eq!(options.backoff.min, Duration::from_millis(50));
        assert_eq!(options.backoff.max, Duration::from_millis(5000));
        assert!(options.signal.is_none());
    }

    #[test]
    fn from_settings() {
        let options = Options::<()>::from_settings(&idmp_config::Options {
            max_retry: 2,
            max_age: f64::INFINITY,
            min_retry_delay: 10,
            max_retry_delay: 20,
            integrity: Some(false),
        });

        assert_eq!(options.max_retry, 2);
        assert_eq!(options.max_age, MaxAge::Forever);
        assert_eq!(options.backoff.delay(3), Duration::from_millis(20));
        assert!(!options.integrity);
    }
}
