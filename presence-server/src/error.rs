//! Error types for the presence server.

use presence_events::{ConfigError, DeliveryError, RegistryError, SweeperError};
use warp::http::StatusCode;

use crate::headers::HeaderError;

/// Errors from starting or stopping the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {address}: {message}")]
    Bind { address: String, message: String },

    #[error("Failed to create delivery client: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Sweeper shutdown failed: {0}")]
    Sweeper(#[from] SweeperError),

    #[error("Server task failed: {0}")]
    Task(String),
}

/// A request that was refused, with the status it maps to.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<HeaderError> for RequestError {
    fn from(error: HeaderError) -> Self {
        RequestError::BadRequest(error.to_string())
    }
}

impl From<RegistryError> for RequestError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::InvalidInput(_) => RequestError::BadRequest(error.to_string()),
            RegistryError::NotFound(_) => RequestError::PreconditionFailed(error.to_string()),
            RegistryError::Conflict(_) => RequestError::Internal(error.to_string()),
        }
    }
}

impl warp::reject::Reject for RequestError {}
