use std::time::Duration;

use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tempo_core::RetryPolicy;
use tempo_network::DispatchConfig;
use tempo_scheduler::SchedulerConfig;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "tempo.toml";
const ENV_PREFIX: &str = "TEMPO_";

/// Daemon configuration: defaults, then `tempo.toml`, then `TEMPO_*`
/// variables (`TEMPO_SCHEDULER__WORKERS=16`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSection,
    pub dispatch: DispatchSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "tempo.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub workers: usize,
    pub stale_after_ms: u64,
    pub max_store_backoff_ms: u64,
    pub fail_on_non_success: bool,
    pub retry: RetrySection,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 50,
            workers: 32,
            stale_after_ms: 60_000,
            max_store_backoff_ms: 30_000,
            fail_on_non_success: false,
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// 1 keeps the delay fixed.
    pub factor: u32,
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 1_000,
            factor: 2,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub snippet_limit: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            snippet_limit: 1024,
        }
    }
}

impl AppConfig {
    /// Loads `path` (or [`DEFAULT_CONFIG_PATH`]) with `TEMPO_*` overrides.
    /// A missing file is not an error.
    pub fn load(path: Option<&str>) -> Result<Self, figment::Error> {
        Self::from_file(Toml::file(path.unwrap_or(DEFAULT_CONFIG_PATH)))
    }

    fn from_file(file: impl Provider) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let s = &self.scheduler;
        let poll_interval_ms = s.poll_interval_ms.max(1);
        SchedulerConfig {
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size: s.batch_size.max(1),
            workers: s.workers.max(1),
            stale_after: Duration::from_millis(self.stale_after_ms(poll_interval_ms)),
            max_store_backoff: Duration::from_millis(s.max_store_backoff_ms),
            fail_on_non_success: s.fail_on_non_success,
            retry: RetryPolicy::builder()
                .max_retries(s.retry.max_retries)
                .backoff_ms(s.retry.backoff_ms)
                .factor(s.retry.factor)
                .max_delay_ms(s.retry.max_backoff_ms)
                .build(),
        }
    }

    /// A running task is only stale once its dispatch can no longer be in
    /// flight, i.e. past the request timeout plus one poll.
    fn stale_after_ms(&self, poll_interval_ms: u64) -> u64 {
        let floor = self
            .dispatch
            .timeout_ms
            .saturating_add(poll_interval_ms);
        if self.scheduler.stale_after_ms < floor {
            warn!(
                stale_after_ms = self.scheduler.stale_after_ms,
                timeout_ms = self.dispatch.timeout_ms,
                using_ms = floor,
                "scheduler.stale_after_ms must exceed dispatch.timeout_ms, raising it"
            );
            return floor;
        }
        self.scheduler.stale_after_ms
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            timeout: Duration::from_millis(self.dispatch.timeout_ms),
            connect_timeout: Duration::from_millis(self.dispatch.connect_timeout_ms),
            snippet_limit: self.dispatch.snippet_limit,
        }
    }
}
