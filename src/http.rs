use crate::providers::MAX_PROVIDER_TIMEOUT;
use reqwest::Client;
use std::time::Duration;

/// Ceilings for the one client shared by NER, zero-shot and the rewriters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Hard ceiling per request; never above the largest provider budget.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per provider host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: MAX_PROVIDER_TIMEOUT,
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 4,
        }
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let secs = |key: &str, default: Duration| {
            number(key)
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            timeout: secs("ANALYZER_HTTP_TIMEOUT_SECS", defaults.timeout).min(MAX_PROVIDER_TIMEOUT),
            connect_timeout: secs("ANALYZER_HTTP_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            pool_idle_timeout: secs("ANALYZER_HTTP_POOL_IDLE_SECS", defaults.pool_idle_timeout),
            pool_max_idle_per_host: number("ANALYZER_HTTP_POOL_MAX_IDLE")
                .map(|v| v as usize)
                .unwrap_or(defaults.pool_max_idle_per_host),
        }
    }
}

/// Shared client for every provider; per-call budgets are applied on each request.
pub fn build_client(settings: &HttpSettings) -> Client {
    Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .pool_idle_timeout(settings.pool_idle_timeout)
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .user_agent(concat!("merchant-analyzer/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}
