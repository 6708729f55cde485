use thiserror::Error;

use crate::job::{JobId, JobStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("job {0} no encontrado")]
    NotFound(JobId),

    #[error("acceso denegado al job {0}")]
    AccessDenied(JobId),

    #[error("el job {job_id} está en estado {status} y no admite la operación")]
    InvalidState { job_id: JobId, status: JobStatus },

    /// Update recibido después de que el job llegó a un estado terminal
    #[error("el job {0} ya terminó, update rechazado")]
    JobFinished(JobId),

    #[error("transición inválida {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("el supervisor se está apagando")]
    ShuttingDown,
}

/// Lo devuelve una unidad de trabajo cuando observa su token de cancelación.
/// El wrapper del supervisor lo traduce a JobStatus::Cancelled.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("job cancelado")]
pub struct JobCancelled;
