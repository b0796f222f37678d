use salvo::prelude::*;
use thiserror::Error;

use crate::core::webhooks::SignatureError;
use crate::core::SyncError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Parse error: {0}")]
    ParseError(#[from] salvo::http::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP status error: {0}")]
    StatusError(#[from] salvo::http::StatusError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::ParseError(_) | AppError::JsonError(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::StatusError(status_error) => status_error.code,
        }
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        let message = e.to_string();
        match e {
            SyncError::NotFound(_) => AppError::NotFound(message),
            SyncError::Forbidden(_) | SyncError::LimitReached(_) => AppError::Forbidden(message),
            SyncError::InvalidSelection(_)
            | SyncError::InvalidSchedule(_)
            | SyncError::InvalidRequest(_) => AppError::BadRequest(message),
            SyncError::ConflictingOperation(_) | SyncError::Contention(_) => AppError::Conflict(message),
            SyncError::ConnectionTestFailed(_) => AppError::UnprocessableEntity(message),
            SyncError::UpstreamUnavailable(_) => AppError::ServiceUnavailable(message),
            SyncError::Store(_) | SyncError::Sqlx(_) | SyncError::Json(_) => {
                tracing::error!("Internal error: {}", message);
                AppError::InternalServerError(message)
            }
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(e: SignatureError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

#[async_trait]
impl Writer for AppError {
    async fn write(mut self, _req: &mut Request, _depot: &mut Depot, res: &mut Response) {
        res.status_code(self.status_code());
        res.render(Json(serde_json::json!({
            "error": self.to_string()
        })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn domain_errors_map_to_http_statuses() {
        let cases = [
            (SyncError::NotFound(Uuid::new_v4()), StatusCode::NOT_FOUND),
            (SyncError::LimitReached(Uuid::new_v4()), StatusCode::FORBIDDEN),
            (SyncError::InvalidSelection("x".into()), StatusCode::BAD_REQUEST),
            (SyncError::ConflictingOperation("x".into()), StatusCode::CONFLICT),
            (SyncError::ConnectionTestFailed("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SyncError::UpstreamUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (SyncError::Store("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status_code(), status);
        }
    }
}
