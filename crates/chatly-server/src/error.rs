use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatly_core::{BlobError, CoreError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Missing or unknown user")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<BlobError> for ServerError {
    fn from(e: BlobError) -> Self {
        ServerError::Core(CoreError::Blob(e))
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(CoreError::Blob(BlobError::TooLarge { .. })) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServerError::Core(e) => match e.kind() {
                ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            },
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "store unavailable");
            "Service unavailable".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
