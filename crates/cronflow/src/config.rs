//! Runtime configuration, loaded from the environment (optionally seeded
//! from a dotenv-style file passed as `--config`).

use std::time::Duration;

use crate::model::schedule::parse_duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub storage_encryption_key: String,
    pub http_address: String,
    pub logging_level: String,
    pub db: DbConfig,
    pub runner: RunnerSettings,
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub name: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub disable_tls: bool,
}

impl DbConfig {
    pub fn url(&self) -> String {
        let sslmode = if self.disable_tls { "disable" } else { "require" };
        format!(
            "postgres://{}:{}@{}/{}?sslmode={}",
            self.user, self.password, self.host, self.name, sslmode
        )
    }
}

#[derive(Clone, Debug)]
pub struct RunnerSettings {
    /// Unique per process; lease rows are stamped with it.
    pub instance_id: String,
    pub interval: Duration,
    pub max_concurrent_jobs: usize,
    pub max_job_lock_time: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            interval: Duration::from_secs(10),
            max_concurrent_jobs: 100,
            max_job_lock_time: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let storage_encryption_key = std::env::var("STORAGE_ENCRYPTION_KEY")
            .map_err(|_| anyhow::anyhow!("STORAGE_ENCRYPTION_KEY is missing"))?;

        let db = DbConfig {
            user: env_or("DB_USER", "postgres"),
            password: env_or("DB_PASSWORD", ""),
            host: env_or("DB_HOST", "localhost:5432"),
            name: env_or("DB_NAME", "scheduler"),
            max_open_conns: env_parsed("DB_MAX_OPEN_CONNS").unwrap_or(10),
            max_idle_conns: env_parsed("DB_MAX_IDLE_CONNS").unwrap_or(0),
            disable_tls: env_bool("DB_DISABLE_TLS").unwrap_or(false),
        };

        let http_address = env_or("HTTP_ADDRESS", "0.0.0.0:8000");
        let logging_level = env_or("OBSERVABILITY_LOGGING_LEVEL", "info");

        let defaults = RunnerSettings::default();
        let runner = RunnerSettings {
            instance_id: env_nonempty("RUNNER_INSTANCE_ID").unwrap_or(defaults.instance_id),
            interval: env_duration("RUNNER_INTERVAL").unwrap_or(defaults.interval),
            max_concurrent_jobs: env_parsed("RUNNER_MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs)
                .clamp(1, 10_000),
            max_job_lock_time: env_duration("RUNNER_MAX_JOB_LOCK_TIME")
                .unwrap_or(defaults.max_job_lock_time),
        };

        Ok(Self {
            storage_encryption_key,
            http_address,
            logging_level,
            db,
            runner,
        })
    }
}

fn default_instance_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("runner-{}", uuid::Uuid::new_v4()))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_or(key: &str, fallback: &str) -> String {
    env_nonempty(key).unwrap_or_else(|| fallback.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_nonempty(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Accepts Go-style durations (`10s`, `1m`, `1h30m`) or a bare number of
/// seconds.
fn env_duration(key: &str) -> Option<Duration> {
    let raw = env_nonempty(key)?;
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    parse_duration(&raw)
}
