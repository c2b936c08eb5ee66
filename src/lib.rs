// Booking broker: holds a hotel slot and a band slot together, or neither.
//
// Layers, bottom up:
// - rate_limiter / cache: shared per-service state
// - transport / client: one rate-limited, retrying client per service
// - api: typed reservation operations on top of a client
// - coordinator: the two-step booking with compensating rollback
// - broker: the caller-facing surface and background workers

pub mod api;
pub mod broker;
pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod rate_limiter;
pub mod transport;

#[cfg(test)]
mod mock_server;

// Re-export key types for convenience
pub use api::{ReleaseOutcome, ReservationApi};
pub use broker::{BookingBroker, BookingTicket, EarliestBooking, ReleaseSummary, SlotQuery};
pub use cache::{CacheStats, ResponseCache};
pub use client::{ClientStats, Operation, ServiceClient};
pub use config::{Backoff, BackoffKind, BrokerConfig, ReservationOrder, RetryConfig, ServiceConfig};
pub use coordinator::{BookingCoordinator, BookingOutcome, CancelHandle, OrphanedHold};
pub use error::{ClientError, PairReleaseError, ReservationError, ServiceError, TransportError};
pub use model::{AttemptState, ReservationAttempt, ServiceKind, Slot, SlotId, SlotStatus};
pub use rate_limiter::RateLimiter;
pub use transport::{HttpTransport, Method, RawResponse, Transport};

// Route test logs through RUST_LOG; safe to call from every test
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
