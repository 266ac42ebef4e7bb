use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reelcache_core::error::{ApiError, ErrorEnvelope};
use reelcache_jobs::{DispatchError, EvictionError, LedgerError, QueueError};
use reelcache_scanner::ScanError;
use reelcache_transcoder::ProbeError;

/// Newtype wrapper so we can implement `IntoResponse` in this crate.
#[derive(Debug)]
pub struct AppError(pub ApiError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        }
        let envelope = ErrorEnvelope::from(&self.0);
        (status, Json(envelope)).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<ProbeError> for AppError {
    fn from(e: ProbeError) -> Self {
        Self(ApiError::ProbeFailed(e.to_string()))
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(id) => Self(ApiError::NotFound(format!("job {id} not found"))),
            other => Self(ApiError::Internal(format!("queue error: {other}"))),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        Self(ApiError::Internal(format!("ledger error: {e}")))
    }
}

impl From<EvictionError> for AppError {
    fn from(e: EvictionError) -> Self {
        match e {
            EvictionError::CapacityExceeded { .. } => Self(ApiError::CapacityExceeded(e.to_string())),
            other => Self(ApiError::Internal(format!("eviction error: {other}"))),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotFound(path) => Self(ApiError::NotFound(format!(
                "media file not found: {}",
                path.display()
            ))),
            DispatchError::InvalidPath(p) => Self(ApiError::BadRequest(format!("invalid media path: {p}"))),
            DispatchError::Eviction(e) => e.into(),
            DispatchError::Queue(e) => e.into(),
            DispatchError::Ledger(e) => e.into(),
            DispatchError::Io(e) => Self(ApiError::Internal(format!("io error: {e}"))),
        }
    }
}

impl From<ScanError> for AppError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::RelativePath(_) => Self(ApiError::BadRequest(e.to_string())),
            ScanError::NotADirectory(_) => Self(ApiError::NotFound(e.to_string())),
            ScanError::Db(e) => Self(ApiError::Internal(format!("db error: {e}"))),
            ScanError::Io(e) => Self(ApiError::Internal(format!("io error: {e}"))),
        }
    }
}
