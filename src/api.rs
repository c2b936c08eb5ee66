// Typed facade over a `ServiceClient`: slot listings, reserve, release.

use bytes::Bytes;

use crate::{
    client::{Operation, ServiceClient},
    error::{ReservationError, ServiceError},
    model::{ServiceKind, Slot, SlotId, SlotStatus},
};

// How a release call ended; both mean the slot is no longer ours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    AlreadyFree,
}

pub struct ReservationApi {
    client: ServiceClient,
}

impl ReservationApi {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    pub fn service(&self) -> ServiceKind {
        self.client.service()
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    // Slots currently free at the service
    pub async fn list_slots(&self) -> Result<Vec<Slot>, ReservationError> {
        self.list(Operation::ListAvailable, SlotStatus::Available)
            .await
    }

    // Slots currently held by this client
    pub async fn list_held_slots(&self) -> Result<Vec<Slot>, ReservationError> {
        self.list(Operation::ListHeld, SlotStatus::Held).await
    }

    /// Reserves `id`. A `SlotUnavailable` failure means another party
    /// already holds the slot.
    pub async fn reserve_slot(&self, id: &SlotId) -> Result<(), ReservationError> {
        self.client
            .call(&Operation::Reserve(id.clone()))
            .await
            .map(|_| ())
            .map_err(|e| self.error(Some(id), e))
    }

    /// Releases `id`.
    ///
    /// A conflict on release means the slot is not held (anymore), which is
    /// what the caller wanted, so it is reported as `AlreadyFree` instead of
    /// an error.
    pub async fn release_slot(&self, id: &SlotId) -> Result<ReleaseOutcome, ReservationError> {
        match self.client.call(&Operation::Release(id.clone())).await {
            Ok(_) => Ok(ReleaseOutcome::Released),
            Err(ServiceError::SlotUnavailable(reason)) => {
                tracing::debug!(
                    service = %self.service(),
                    slot = %id,
                    %reason,
                    "slot already free"
                );
                Ok(ReleaseOutcome::AlreadyFree)
            }
            Err(e) => Err(self.error(Some(id), e)),
        }
    }

    async fn list(
        &self,
        operation: Operation,
        status: SlotStatus,
    ) -> Result<Vec<Slot>, ReservationError> {
        let body = self
            .client
            .call(&operation)
            .await
            .map_err(|e| self.error(None, e))?;

        let mut slots = decode_slots(&body).map_err(|e| {
            // don't keep serving a body we can't read
            self.client.cache().invalidate_service(self.service().as_str());
            self.error(None, e)
        })?;

        for slot in &mut slots {
            slot.status = status;
        }
        Ok(slots)
    }

    fn error(&self, slot: Option<&SlotId>, source: ServiceError) -> ReservationError {
        ReservationError::new(self.service(), slot.cloned(), source)
    }
}

fn decode_slots(body: &Bytes) -> Result<Vec<Slot>, ServiceError> {
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::MalformedResponse(format!("expected a list of slots: {e}")))
}
