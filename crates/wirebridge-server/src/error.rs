use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use wirebridge_core::{BridgeError, ChannelError, ErrorCode};

/// A [`BridgeError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: BridgeError,
}

impl ApiError {
    /// Hide internal failure details unless running in debug mode.
    pub fn redact(mut self, debug: bool) -> Self {
        if !debug && self.error.code == ErrorCode::InternalError {
            tracing::error!("{}", self.error);
            self.error = BridgeError::internal("Internal server error");
        }
        self
    }
}

pub fn status_for(code: &ErrorCode) -> StatusCode {
    match code {
        ErrorCode::UnknownCommand | ErrorCode::ChannelInitError => StatusCode::NOT_FOUND,
        ErrorCode::InternalError | ErrorCode::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        Self {
            status: status_for(&error.code),
            error,
        }
    }
}

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        let status = match err {
            ChannelError::NotFound(_) => StatusCode::NOT_FOUND,
            ChannelError::AlreadyAttached(_) => StatusCode::CONFLICT,
        };
        Self {
            status,
            error: err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
