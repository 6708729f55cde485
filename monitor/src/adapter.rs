use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use common::RemoteProgressSnapshot;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::poller::StatusSource;
use crate::stage::{derive_progress, estimate_remaining_seconds_at};

/// Descriptor de proyecto tal como lo devuelve `GET /projects/{id}/`.
/// Sólo se leen los campos que usa el monitor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub autopilot_done: Option<bool>,
    #[serde(default)]
    pub targeted_model_count: Option<u32>,
    /// Fecha de creación ISO-8601
    #[serde(default)]
    pub created: Option<String>,
}

/// Un elemento de `GET /projects/{id}/models/`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Monitor de AutoPilot contra la API REST del proveedor.
///
/// El cliente HTTP se crea en la primera consulta y se libera con `close()`
/// o, si el job se descarta a mitad de camino, al hacer drop del monitor.
pub struct AutoPilotMonitor {
    config: MonitorConfig,
    client: Option<Client>,
}

impl AutoPilotMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn client(&mut self) -> anyhow::Result<&Client> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.config.api_token))?;
                auth.set_sensitive(true);

                let mut headers = HeaderMap::new();
                headers.insert(AUTHORIZATION, auth);
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

                debug!("creando cliente HTTP para {}", self.config.endpoint);
                Client::builder()
                    .default_headers(headers)
                    .timeout(self.config.request_timeout)
                    .build()?
            }
        };
        Ok(&*self.client.insert(client))
    }

    async fn try_fetch(&mut self, project_id: &str) -> anyhow::Result<RemoteProgressSnapshot> {
        let endpoint = self.config.endpoint.clone();
        let default_total = self.config.default_total_models;
        let client = self.client()?;

        let project: ProjectDescriptor = client
            .get(format!("{endpoint}/projects/{project_id}/"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let models: Vec<ModelSummary> = client
            .get(format!("{endpoint}/projects/{project_id}/models/"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(snapshot_from(
            project_id,
            &project,
            &models,
            default_total,
            Utc::now(),
        ))
    }
}

#[async_trait]
impl StatusSource for AutoPilotMonitor {
    async fn fetch_snapshot(&mut self, project_id: &str) -> RemoteProgressSnapshot {
        match self.try_fetch(project_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("error consultando el proyecto {}: {:#}", project_id, e);
                RemoteProgressSnapshot::failed(project_id, format!("{e:#}"))
            }
        }
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            debug!("cliente HTTP del monitor cerrado");
        }
    }
}

impl Drop for AutoPilotMonitor {
    fn drop(&mut self) {
        if self.client.take().is_some() {
            debug!("cliente HTTP del monitor liberado en drop");
        }
    }
}

/// Arma el snapshot a partir de las dos respuestas de la API.
pub fn snapshot_from(
    project_id: &str,
    project: &ProjectDescriptor,
    models: &[ModelSummary],
    default_total: u32,
    now: DateTime<Utc>,
) -> RemoteProgressSnapshot {
    let units_total = project
        .targeted_model_count
        .filter(|n| *n > 0)
        .unwrap_or(default_total);
    let units_completed = models.len() as u32;
    let done = project.autopilot_done.unwrap_or(false);

    let (stage, progress_percent) = derive_progress(
        project.stage.as_deref().unwrap_or_default(),
        done,
        units_completed,
        units_total,
    );

    let started_at = project.created.as_deref().and_then(parse_timestamp);

    RemoteProgressSnapshot {
        resource_id: project_id.to_string(),
        stage,
        progress_percent,
        units_completed,
        units_total,
        current_unit_label: latest_model_type(models),
        estimated_seconds_remaining: estimate_remaining_seconds_at(
            progress_percent,
            started_at,
            now,
        ),
        error_message: None,
    }
}

// sin zona horaria se toma como UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .ok()
}

// las fechas ISO-8601 ordenan bien como strings
fn latest_model_type(models: &[ModelSummary]) -> Option<String> {
    models
        .iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at))
        .map(|m| m.model_type.clone().unwrap_or_else(|| "Unknown".to_string()))
}
