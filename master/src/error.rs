use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorResponse, SupervisorError};
use thiserror::Error;

/// Errores de la capa HTTP. Todos salen como `{"detail": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("falta el header {0}")]
    MissingOwner(&'static str),

    #[error("no hay token de AutoML configurado")]
    MissingApiToken,

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Supervisor(e) => match e {
                SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
                SupervisorError::AccessDenied(_) => StatusCode::FORBIDDEN,
                SupervisorError::InvalidState { .. } => StatusCode::BAD_REQUEST,
                SupervisorError::JobFinished(_) | SupervisorError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                SupervisorError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::MissingOwner(_) | ApiError::MissingApiToken => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
