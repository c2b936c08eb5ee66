// Error types for every layer of the broker

use thiserror::Error;

use crate::model::{ServiceKind, SlotId};

// Typed outcome of a failed remote call, after retries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("server unavailable after {attempts} attempts: {reason}")]
    ServerUnavailable { attempts: u32, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("blocked: {0}")]
    Blocked(String),

    #[error("unknown service error: {status} - {reason}")]
    UnknownServiceError { status: u16, reason: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    // Only exhausted transient failures end up here; everything else is permanent
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::ServerUnavailable { .. })
    }
}

// A service failure tagged with the service (and slot) it happened on. The
// cause is only reachable through `source()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service}{} request failed", slot_suffix(.slot))]
pub struct ReservationError {
    pub service: ServiceKind,
    pub slot: Option<SlotId>,
    #[source]
    pub source: ServiceError,
}

fn slot_suffix(slot: &Option<SlotId>) -> String {
    slot.as_ref()
        .map(|s| format!(" slot {}", s))
        .unwrap_or_default()
}

impl ReservationError {
    pub fn new(service: ServiceKind, slot: Option<SlotId>, source: ServiceError) -> Self {
        Self {
            service,
            slot,
            source,
        }
    }

    // Someone else holds the slot
    pub fn is_already_taken(&self) -> bool {
        matches!(self.source, ServiceError::SlotUnavailable(_))
    }
}

// A pair release that could not finish
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairReleaseError {
    // Holds are as they were before the call; a released hotel hold was
    // reserved again
    #[error("pair release failed, holds unchanged")]
    Unchanged(#[source] ReservationError),

    // The hotel hold is gone and the band hold is still there
    #[error("pair release failed halfway, hotel hold could not be restored")]
    HalfReleased {
        #[source]
        failure: ReservationError,
        restore_failure: ReservationError,
    },
}

impl PairReleaseError {
    // The release that failed
    pub fn failure(&self) -> &ReservationError {
        match self {
            PairReleaseError::Unchanged(failure)
            | PairReleaseError::HalfReleased { failure, .. } => failure,
        }
    }

    pub fn into_failure(self) -> ReservationError {
        match self {
            PairReleaseError::Unchanged(failure)
            | PairReleaseError::HalfReleased { failure, .. } => failure,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Other(String),
}
