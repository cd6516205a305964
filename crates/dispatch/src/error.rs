//! Dispatch error types

use common::{DriverId, DriverStatus};
use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by the matching engine
///
/// Offer expiry is not an error; it ends the ride in
/// [`MatchPhase::Expired`](crate::domain::MatchPhase::Expired), published as
/// a [`DispatchEvent::RideMatchResult`](crate::publisher::DispatchEvent::RideMatchResult).
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Input rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Driver has no live, authenticated channel
    #[error("Driver not connected: {0}")]
    NotConnected(DriverId),

    /// Conditional status update lost against the current value
    #[error("Status mismatch for driver {driver_id}: expected {expected}, found {actual}")]
    StatusMismatch {
        driver_id: DriverId,
        expected: DriverStatus,
        actual: DriverStatus,
    },

    /// Driver or ride does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Outbound enqueue failed; the connection has been dropped
    #[error("Send to driver {0} failed")]
    SendFailed(DriverId),

    #[error("Authentication failed for driver {0}")]
    AuthenticationFailed(DriverId),

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DriverNotFound(id) => Self::NotFound(format!("driver {}", id)),
            other => Self::Store(other),
        }
    }
}

impl From<common::Error> for DispatchError {
    fn from(e: common::Error) -> Self {
        match e {
            common::Error::InvalidInput(msg) => Self::Validation(msg),
            common::Error::Serialization(msg) => Self::Internal(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
