use std::{str::FromStr, time::Duration};

use monitor::MonitorConfig;
use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_AUTOML_ENDPOINT: &str = "https://app.datarobot.com/api/v2";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_JOB_RETENTION_HOURS: u64 = 24;

/// Configuración del master, leída una vez del entorno al arrancar.
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub automl_endpoint: String,
    /// Sin token no se pueden crear monitoreos (401)
    pub automl_api_token: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub cleanup_interval: Duration,
    pub job_retention: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            automl_endpoint: DEFAULT_AUTOML_ENDPOINT.to_string(),
            automl_api_token: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            job_retention: Duration::from_secs(DEFAULT_JOB_RETENTION_HOURS * 3600),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectable.
    /// Los valores inválidos caen al default con un warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or(defaults.bind_addr),
            automl_endpoint: non_empty("AUTOML_ENDPOINT").unwrap_or(defaults.automl_endpoint),
            automl_api_token: non_empty("AUTOML_API_TOKEN"),
            poll_interval: Duration::from_secs(parse_or(
                "POLL_INTERVAL_SECS",
                non_empty("POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )),
            request_timeout: Duration::from_secs(parse_or(
                "REQUEST_TIMEOUT_SECS",
                non_empty("REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            cleanup_interval: Duration::from_secs(parse_or(
                "CLEANUP_INTERVAL_SECS",
                non_empty("CLEANUP_INTERVAL_SECS"),
                DEFAULT_CLEANUP_INTERVAL_SECS,
            )),
            job_retention: Duration::from_secs(
                parse_or(
                    "JOB_RETENTION_HOURS",
                    non_empty("JOB_RETENTION_HOURS"),
                    DEFAULT_JOB_RETENTION_HOURS,
                ) * 3600,
            ),
        }
    }

    /// Config del monitor. El token de la request, si viene, tiene prioridad
    /// sobre el configurado. `None` si no hay ninguno.
    pub fn monitor_config(&self, request_token: Option<&str>) -> Option<MonitorConfig> {
        let token = request_token.or(self.automl_api_token.as_deref())?;
        Some(
            MonitorConfig::new(self.automl_endpoint.as_str(), token)
                .with_poll_interval(self.poll_interval)
                .with_request_timeout(self.request_timeout),
        )
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("automl_endpoint", &self.automl_endpoint)
            .field("automl_api_token", &self.automl_api_token.as_ref().map(|_| "***"))
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("job_retention", &self.job_retention)
            .finish()
    }
}

// un intervalo de 0 dejaría loops girando sin pausa
fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => v,
        _ => {
            warn!("valor inválido para {}: {:?}, usando {}", key, raw, default);
            default
        }
    }
}
