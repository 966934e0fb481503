use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::{Map, Value};

pub type AppResult<T> = Result<T, AppError>;
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure taxonomy shared by every chat component.
///
/// Nothing here is retried internally; each variant surfaces to the HTTP or
/// WebSocket boundary as-is.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or out-of-contract input.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// No usable credential on the request.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated, but not a member / not allowed.
    #[error("{0}")]
    Authorization(String),

    /// A multi-document invariant did not hold mid-operation.
    #[error("{0}")]
    Consistency(String),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),

    /// WebSocket upgrade or feed subscription failure.
    #[error("{0}")]
    Connection(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        use AppError::*;
        match self {
            Validation(_) => "VALIDATION_FAILED",
            NotFound(_) => "NOT_FOUND",
            Unauthenticated(_) => "UNAUTHENTICATED",
            Authorization(_) => "PERMISSION_DENIED",
            Consistency(_) => "CONSISTENCY",
            Storage(_) => "STORAGE_ERROR",
            Connection(_) => "CONNECTION",
        }
    }

    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            Validation(_) | Connection(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
            Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Authorization(_) => StatusCode::FORBIDDEN,
            Consistency(_) => StatusCode::CONFLICT,
            Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self::Storage(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(sqlx::Error);
apperr_impl!(sqlx::migrate::MigrateError);
apperr_impl!(serde_json::Error);
apperr_impl!(uuid::Error);
apperr_impl!(time::error::ComponentRange);

/// An [`AppError`] on its way out of a handler, with whatever parts of the
/// request the caller should see echoed back.
#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    echo: Map<String, Value>,
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self { error, echo: Map::new() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            tracing::error!(error = %self.error, code = self.error.code(), "request failed");
        } else {
            tracing::debug!(error = %self.error, code = self.error.code(), "request rejected");
        }

        let mut body = self.echo;
        body.insert("code".to_owned(), Value::from(self.error.code()));
        body.insert("err".to_owned(), Value::from(self.error.to_string()));
        (status, Json(Value::Object(body))).into_response()
    }
}

pub trait Echo<T> {
    /// Attach request fields to the error envelope, e.g. `json!({ "rid": rid })`.
    fn echo(self, echo: Value) -> ApiResult<T>;
}

impl<T> Echo<T> for AppResult<T> {
    fn echo(self, echo: Value) -> ApiResult<T> {
        self.map_err(|error| {
            let echo = match echo {
                Value::Object(map) => map,
                other => Map::from_iter([("request".to_owned(), other)]),
            };
            ApiError { error, echo }
        })
    }
}
