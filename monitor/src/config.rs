use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Modelos esperados cuando el proyecto no informa `targetedModelCount`.
pub const DEFAULT_TOTAL_MODELS: u32 = 20;

/// Configuración explícita del monitor. Se construye una vez y se pasa
/// a cada job de monitoreo.
#[derive(Clone)]
pub struct MonitorConfig {
    /// Base de la API, ej: "https://app.datarobot.com/api/v2"
    pub endpoint: String,
    pub api_token: String,
    pub poll_interval: Duration,
    /// Timeout por request, independiente de la duración total del monitoreo
    pub request_timeout: Duration,
    pub default_total_models: u32,
}

impl MonitorConfig {
    pub fn new(endpoint: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_total_models: DEFAULT_TOTAL_MODELS,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

// el token no se imprime en logs
impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("endpoint", &self.endpoint)
            .field("api_token", &"***")
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("default_total_models", &self.default_total_models)
            .finish()
    }
}
