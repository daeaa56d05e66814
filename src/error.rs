use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The main error type for tiergate operations.
///
/// A quota denial is *not* an error: it is a normal [`Decision`](crate::Decision)
/// with `allowed == false`. Errors are reserved for deployment bugs
/// (`Configuration`), bad caller input, and infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum TiergateError {
    /// Unknown plan id, unknown resource or capability name, or an invalid catalog.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The persistence collaborator could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[cfg(feature = "seaorm")]
    #[error("Database error: {0}")]
    Database(String),
}

/// Error body returned to HTTP clients.
#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
    error_id: String,
}

impl TiergateError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error means the store could not confirm the operation.
    ///
    /// Callers apply their counter class's [`FailurePolicy`](crate::FailurePolicy)
    /// to these.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Whether the error indicates a deployment or catalog bug.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Convert to an HTTP response.
    ///
    /// Server-side details are only included when `dev_mode` is `true`.
    pub fn into_response_with_mode(self, dev_mode: bool) -> Response {
        let status = self.status_code();
        let error_msg = if dev_mode {
            self.to_string()
        } else {
            self.safe_message()
        };
        let error_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            status = status.as_u16(),
            error_id = %error_id,
            error = %self,
            "Entitlement request failed"
        );

        (
            status,
            Json(ErrorResponse {
                error: error_msg,
                error_id,
            }),
        )
            .into_response()
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) | Self::Internal(_) | Self::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            #[cfg(feature = "seaorm")]
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn safe_message(&self) -> String {
        match self {
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::BadRequest(msg) => format!("Bad request: {}", msg),
            Self::StoreUnavailable(_) => "Service unavailable".to_string(),
            Self::Configuration(_) | Self::Internal(_) | Self::Anyhow(_) => {
                "Internal server error".to_string()
            }
            #[cfg(feature = "seaorm")]
            Self::Database(_) => "Database error".to_string(),
        }
    }
}

impl IntoResponse for TiergateError {
    fn into_response(self) -> Response {
        self.into_response_with_mode(false)
    }
}

/// Result type alias for tiergate operations
pub type Result<T> = std::result::Result<T, TiergateError>;

impl From<serde_json::Error> for TiergateError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            TiergateError::Configuration(format!("Invalid catalog JSON: {}", err))
        } else {
            TiergateError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<tokio::time::error::Elapsed> for TiergateError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TiergateError::StoreUnavailable("store call timed out".to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for TiergateError {
    fn from(err: redis::RedisError) -> Self {
        TiergateError::StoreUnavailable(format!("Redis error: {}", err))
    }
}

#[cfg(feature = "seaorm")]
impl From<sea_orm::DbErr> for TiergateError {
    fn from(err: sea_orm::DbErr) -> Self {
        match &err {
            sea_orm::DbErr::ConnectionAcquire(inner) => {
                TiergateError::StoreUnavailable(format!("Connection error: {}", inner))
            }
            sea_orm::DbErr::Conn(inner) => {
                TiergateError::StoreUnavailable(format!("Connection error: {}", inner))
            }
            sea_orm::DbErr::Query(inner) => {
                TiergateError::Database(format!("Query error: {}", inner))
            }
            sea_orm::DbErr::Exec(inner) => {
                TiergateError::Database(format!("Execution error: {}", inner))
            }
            _ => TiergateError::Database(format!("Database error: {}", err)),
        }
    }
}
