use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type JobId = String;
pub type OwnerId = String;

/// Bolsa libre de metadatos que el llamador adjunta al crear el job.
pub type JobMetadata = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Transiciones válidas de la máquina de estados.
    /// Pending -> Cancelled cubre la cancelación antes de que el wrapper arranque.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub owner_id: OwnerId,
    pub status: JobStatus,

    /// Siempre dentro de [0.0, 1.0]
    pub progress: f64,
    pub message: String,

    /// Sólo con status == Completed
    pub result: Option<Value>,
    /// Sólo con status == Failed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: JobMetadata,
}

impl JobRecord {
    pub(crate) fn new(
        id: JobId,
        job_type: String,
        owner_id: OwnerId,
        metadata: JobMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type,
            owner_id,
            status: JobStatus::Pending,
            progress: 0.0,
            message: String::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// Aplica los campos presentes del update. No valida la transición,
    /// eso lo hace el supervisor antes de llamar.
    pub(crate) fn apply(&mut self, update: JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = clamp_progress(progress);
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
    }
}

/// NaN cuenta como 0.0
pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Cambios parciales sobre un JobRecord. Los campos ausentes no se tocan.
///
/// Desde fuera del crate sólo se pueden reportar progreso y mensaje;
/// status, result y error los escribe únicamente el wrapper del supervisor.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub(crate) status: Option<JobStatus>,
    pub(crate) progress: Option<f64>,
    pub(crate) message: Option<String>,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub(crate) fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub(crate) fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub(crate) fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_progress_recorta_fuera_de_rango() {
        assert_eq!(clamp_progress(1.5), 1.0);
        assert_eq!(clamp_progress(-0.5), 0.0);
        assert_eq!(clamp_progress(0.25), 0.25);
        assert_eq!(clamp_progress(f64::NAN), 0.0);
    }

    #[test]
    fn estados_terminales_no_tienen_salida() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(from.is_terminal());
            for to in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn pending_solo_pasa_a_running_o_cancelled() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn apply_mezcla_solo_campos_presentes() {
        let mut job = JobRecord::new(
            "j1".to_string(),
            "test".to_string(),
            "u1".to_string(),
            JobMetadata::new(),
        );
        job.apply(JobUpdate::new().message("hola"));
        job.apply(JobUpdate::new().progress(2.0));

        assert_eq!(job.message, "hola");
        assert_eq!(job.progress, 1.0);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn status_se_serializa_en_mayusculas() {
        let s = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(s, "\"CANCELLED\"");
    }
}
