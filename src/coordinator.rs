// Two-service booking as a compensating transaction.
//
// The first service is reserved, then the second. If the second fails the
// first is released again. If that release cannot be confirmed the hold is
// recorded as orphaned and its slot is quarantined until an operator deals
// with it, so later attempts cannot pile on top of an unknown state.
//
// Each attempt claims its (service, slot) pairs for its whole run; another
// attempt naming a claimed slot is refused instead of racing it.

use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    api::{ReleaseOutcome, ReservationApi},
    config::ReservationOrder,
    error::ReservationError,
    model::{AttemptState, ReservationAttempt, ServiceKind, SlotId},
};

// Terminal result of a booking attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    // Both slots are held
    Committed {
        hotel_slot: SlotId,
        band_slot: SlotId,
    },
    // Nothing is held. `rollback` says how the first hold was undone, if
    // one had been made.
    Failed {
        failure: ReservationError,
        rollback: Option<ReleaseOutcome>,
    },
    // The first hold could not be released; needs an operator
    InconsistentState {
        failure: ReservationError,
        rollback_failure: ReservationError,
    },
    // Cancelled before anything was sent
    Cancelled,
    // A target slot still has an unresolved orphaned hold; nothing was sent
    Quarantined { service: ServiceKind, slot: SlotId },
    // Another attempt is working on a target slot; nothing was sent
    SlotBusy { service: ServiceKind, slot: SlotId },
}

impl BookingOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, BookingOutcome::Committed { .. })
    }

    pub fn requires_intervention(&self) -> bool {
        matches!(self, BookingOutcome::InconsistentState { .. })
    }

    // The reservation failure that ended the attempt, if any
    pub fn failure(&self) -> Option<&ReservationError> {
        match self {
            BookingOutcome::Failed { failure, .. }
            | BookingOutcome::InconsistentState { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

const PENDING: u8 = 0;
const DISPATCHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Lets a caller call off an attempt that has not started yet.
///
/// Cancellation only wins while the first reservation has not been sent.
/// After that the attempt always runs to commit or rollback.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicU8>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    // true if the attempt will not send anything
    pub fn cancel(&self) -> bool {
        match self
            .0
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) == CANCELLED
    }

    fn begin_dispatch(&self) -> bool {
        self.0
            .compare_exchange(PENDING, DISPATCHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

// A hold the broker could not undo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedHold {
    pub service: ServiceKind,
    pub slot: SlotId,
    pub attempt_id: u64,
    pub detected_at: DateTime<Utc>,
    pub reason: String,
}

type SlotKey = (ServiceKind, SlotId);

// Claims of one attempt, given back when it ends however it ends
struct SlotClaims<'a> {
    in_flight: &'a DashMap<SlotKey, u64>,
    keys: Vec<SlotKey>,
}

impl Drop for SlotClaims<'_> {
    fn drop(&mut self) {
        for key in &self.keys {
            self.in_flight.remove(key);
        }
    }
}

pub struct BookingCoordinator {
    hotel: Arc<ReservationApi>,
    band: Arc<ReservationApi>,
    order: ReservationOrder,
    next_attempt: AtomicU64,
    // slot -> id of the attempt working on it
    in_flight: DashMap<SlotKey, u64>,
    unresolved: DashMap<SlotKey, OrphanedHold>,
}

impl BookingCoordinator {
    pub fn new(
        hotel: Arc<ReservationApi>,
        band: Arc<ReservationApi>,
        order: ReservationOrder,
    ) -> Self {
        Self {
            hotel,
            band,
            order,
            next_attempt: AtomicU64::new(1),
            in_flight: DashMap::new(),
            unresolved: DashMap::new(),
        }
    }

    pub fn api(&self, service: ServiceKind) -> &Arc<ReservationApi> {
        match service {
            ServiceKind::Hotel => &self.hotel,
            ServiceKind::Band => &self.band,
        }
    }

    pub fn order(&self) -> ReservationOrder {
        self.order
    }

    pub fn new_attempt(&self, hotel_slot: SlotId, band_slot: SlotId) -> ReservationAttempt {
        let id = self.next_attempt.fetch_add(1, Ordering::SeqCst);
        ReservationAttempt::new(id, hotel_slot, band_slot)
    }

    pub async fn book(&self, hotel_slot: SlotId, band_slot: SlotId) -> BookingOutcome {
        let mut attempt = self.new_attempt(hotel_slot, band_slot);
        self.execute(&mut attempt, &CancelHandle::new()).await
    }

    // Run `attempt` to a terminal state, recording each transition on it
    pub async fn execute(
        &self,
        attempt: &mut ReservationAttempt,
        cancel: &CancelHandle,
    ) -> BookingOutcome {
        let span = info_span!(
            "booking",
            attempt = attempt.id,
            hotel_slot = %attempt.hotel_slot,
            band_slot = %attempt.band_slot
        );
        self.run(attempt, cancel).instrument(span).await
    }

    async fn run(&self, attempt: &mut ReservationAttempt, cancel: &CancelHandle) -> BookingOutcome {
        let _claims = match self.claim(attempt) {
            Ok(claims) => claims,
            Err(refusal) => {
                // finished without sending; a late cancel must not succeed
                cancel.begin_dispatch();
                attempt.transition(AttemptState::Failed);
                return refusal;
            }
        };

        if !cancel.begin_dispatch() {
            info!("attempt cancelled before dispatch");
            attempt.transition(AttemptState::Cancelled);
            return BookingOutcome::Cancelled;
        }

        let (first, second) = self.order.sequence();
        let first_slot = attempt.slot_for(first).clone();
        let second_slot = attempt.slot_for(second).clone();

        attempt.transition(AttemptState::ReservingFirst);
        if let Err(failure) = self.api(first).reserve_slot(&first_slot).await {
            info!(
                %failure,
                cause = %failure.source,
                "first reservation failed, nothing to undo"
            );
            attempt.transition(AttemptState::Failed);
            return BookingOutcome::Failed {
                failure,
                rollback: None,
            };
        }
        attempt.transition(AttemptState::FirstReserved);

        attempt.transition(AttemptState::ReservingSecond);
        let failure = match self.api(second).reserve_slot(&second_slot).await {
            Ok(()) => {
                attempt.transition(AttemptState::Committed);
                info!("booking committed");
                return BookingOutcome::Committed {
                    hotel_slot: attempt.hotel_slot.clone(),
                    band_slot: attempt.band_slot.clone(),
                };
            }
            Err(failure) => failure,
        };

        warn!(
            %failure,
            cause = %failure.source,
            service = %first,
            slot = %first_slot,
            "second reservation failed, rolling back"
        );
        attempt.transition(AttemptState::RollingBack);

        match self.api(first).release_slot(&first_slot).await {
            Ok(rollback) => {
                attempt.transition(AttemptState::RolledBack);
                info!(?rollback, "rollback complete");
                BookingOutcome::Failed {
                    failure,
                    rollback: Some(rollback),
                }
            }
            Err(rollback_failure) => {
                attempt.transition(AttemptState::InconsistentState);
                error!(
                    service = %first,
                    slot = %first_slot,
                    cause = %failure.source,
                    rollback_cause = %rollback_failure.source,
                    "ROLLBACK FAILED: slot may still be held and needs manual release"
                );
                self.unresolved.insert(
                    (first, first_slot.clone()),
                    OrphanedHold {
                        service: first,
                        slot: first_slot,
                        attempt_id: attempt.id,
                        detected_at: Utc::now(),
                        reason: rollback_failure.source.to_string(),
                    },
                );
                BookingOutcome::InconsistentState {
                    failure,
                    rollback_failure,
                }
            }
        }
    }

    // Claim both target slots, or refuse if either is claimed or orphaned.
    // The claim comes before the orphan check: an orphan is recorded while
    // its attempt still holds the claim, so it can never slip between them.
    fn claim(&self, attempt: &ReservationAttempt) -> Result<SlotClaims<'_>, BookingOutcome> {
        let mut claims = SlotClaims {
            in_flight: &self.in_flight,
            keys: Vec::with_capacity(2),
        };

        for service in ServiceKind::ALL {
            let slot = attempt.slot_for(service).clone();
            let key = (service, slot.clone());

            let owner = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => Some(*entry.get()),
                Entry::Vacant(entry) => {
                    entry.insert(attempt.id);
                    None
                }
            };
            if let Some(owner) = owner {
                warn!(%service, %slot, owner, "slot is being booked by another attempt");
                return Err(BookingOutcome::SlotBusy { service, slot });
            }
            claims.keys.push(key.clone());

            let orphaned_by = self.unresolved.get(&key).map(|hold| hold.attempt_id);
            if let Some(orphaned_by) = orphaned_by {
                warn!(
                    %service,
                    %slot,
                    orphaned_by,
                    "slot has an unresolved orphaned hold, refusing attempt"
                );
                return Err(BookingOutcome::Quarantined { service, slot });
            }
        }

        Ok(claims)
    }

    // Slots some running attempt is working on
    pub fn in_flight(&self) -> Vec<(ServiceKind, SlotId)> {
        let mut slots: Vec<SlotKey> = self.in_flight.iter().map(|e| e.key().clone()).collect();
        slots.sort();
        slots
    }

    pub fn unresolved_holds(&self) -> Vec<OrphanedHold> {
        let mut holds: Vec<OrphanedHold> = self
            .unresolved
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        holds.sort_by_key(|hold| hold.attempt_id);
        holds
    }

    pub fn is_quarantined(&self, service: ServiceKind, slot: &SlotId) -> bool {
        self.unresolved.contains_key(&(service, slot.clone()))
    }

    /// Tries the compensating release for an orphaned hold again. The
    /// quarantine is lifted once the service confirms the slot is free.
    pub async fn retry_rollback(
        &self,
        service: ServiceKind,
        slot: &SlotId,
    ) -> Result<ReleaseOutcome, ReservationError> {
        let outcome = self.api(service).release_slot(slot).await?;
        if self.unresolved.remove(&(service, slot.clone())).is_some() {
            info!(%service, %slot, ?outcome, "orphaned hold resolved");
        }
        Ok(outcome)
    }

    // Forget an orphaned hold that was cleaned up out of band
    pub fn clear_unresolved(&self, service: ServiceKind, slot: &SlotId) -> Option<OrphanedHold> {
        self.unresolved
            .remove(&(service, slot.clone()))
            .map(|(_, hold)| hold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::ResponseCache, client::ServiceClient, config::RetryConfig,
        error::ServiceError, mock_server::MockReservationServer, rate_limiter::RateLimiter,
        transport::Method,
    };
    use std::time::Duration;

    struct Harness {
        hotel: Arc<MockReservationServer>,
        band: Arc<MockReservationServer>,
        coordinator: BookingCoordinator,
    }

    fn api(service: ServiceKind, server: &Arc<MockReservationServer>) -> Arc<ReservationApi> {
        Arc::new(ReservationApi::new(ServiceClient::new(
            service,
            server.clone(),
            Arc::new(RateLimiter::new(Duration::from_secs(1))),
            Arc::new(ResponseCache::new(Duration::from_secs(60))),
            RetryConfig {
                max_retries: 2,
                delay: Duration::from_millis(200),
                ..Default::default()
            },
        )))
    }

    fn harness(order: ReservationOrder) -> Harness {
        let hotel = Arc::new(MockReservationServer::with_slots(1..=20));
        let band = Arc::new(MockReservationServer::with_slots(1..=20));
        let coordinator = BookingCoordinator::new(
            api(ServiceKind::Hotel, &hotel),
            api(ServiceKind::Band, &band),
            order,
        );
        Harness {
            hotel,
            band,
            coordinator,
        }
    }

    fn held_total(h: &Harness) -> usize {
        h.hotel.held().len() + h.band.held().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_commits_both() {
        let h = harness(ReservationOrder::HotelFirst);
        let mut attempt = h.coordinator.new_attempt(12u32.into(), 7u32.into());

        let outcome = h.coordinator.execute(&mut attempt, &CancelHandle::new()).await;

        assert_eq!(
            outcome,
            BookingOutcome::Committed {
                hotel_slot: 12u32.into(),
                band_slot: 7u32.into()
            }
        );
        assert_eq!(
            attempt.history(),
            &[
                AttemptState::Idle,
                AttemptState::ReservingFirst,
                AttemptState::FirstReserved,
                AttemptState::ReservingSecond,
                AttemptState::Committed
            ]
        );
        assert_eq!(h.hotel.held(), vec![SlotId::from(12u32)]);
        assert_eq!(h.band.held(), vec![SlotId::from(7u32)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_needs_no_compensation() {
        let h = harness(ReservationOrder::HotelFirst);
        h.hotel.take_slot(&12u32.into());

        let outcome = h.coordinator.book(12u32.into(), 7u32.into()).await;

        match outcome {
            BookingOutcome::Failed { failure, rollback } => {
                assert_eq!(failure.service, ServiceKind::Hotel);
                assert!(failure.is_already_taken());
                assert_eq!(rollback, None);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // the band service was never contacted
        assert_eq!(h.band.request_count(), 0);
        assert_eq!(held_total(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_failure_rolls_back_first() {
        let h = harness(ReservationOrder::HotelFirst);
        h.band.take_slot(&7u32.into());
        let mut attempt = h.coordinator.new_attempt(12u32.into(), 7u32.into());

        let outcome = h.coordinator.execute(&mut attempt, &CancelHandle::new()).await;

        match &outcome {
            BookingOutcome::Failed { failure, rollback } => {
                assert_eq!(failure.service, ServiceKind::Band);
                assert!(matches!(failure.source, ServiceError::SlotUnavailable(_)));
                assert_eq!(*rollback, Some(ReleaseOutcome::Released));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(attempt.state(), AttemptState::RolledBack);
        assert!(attempt.history().contains(&AttemptState::RollingBack));
        assert!(!h.hotel.is_held(&12u32.into()));
        assert_eq!(held_total(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_failure_is_inconsistent_and_quarantined() {
        let h = harness(ReservationOrder::HotelFirst);
        h.band.take_slot(&7u32.into());
        h.hotel.fail_always(Method::Delete, 503);

        let outcome = h.coordinator.book(12u32.into(), 7u32.into()).await;

        match &outcome {
            BookingOutcome::InconsistentState {
                failure,
                rollback_failure,
            } => {
                assert_eq!(failure.service, ServiceKind::Band);
                assert_eq!(rollback_failure.service, ServiceKind::Hotel);
                assert!(matches!(
                    rollback_failure.source,
                    ServiceError::ServerUnavailable { attempts: 3, .. }
                ));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(outcome.requires_intervention());
        // release attempted exactly max_retries + 1 times, never more
        let releases = h
            .hotel
            .calls()
            .iter()
            .filter(|(method, _)| *method == Method::Delete)
            .count();
        assert_eq!(releases, 3);

        let holds = h.coordinator.unresolved_holds();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].service, ServiceKind::Hotel);
        assert_eq!(holds[0].slot, SlotId::from(12u32));

        // a new attempt on the same hotel slot is refused without traffic
        let before = h.hotel.request_count();
        let again = h.coordinator.book(12u32.into(), 8u32.into()).await;
        assert_eq!(
            again,
            BookingOutcome::Quarantined {
                service: ServiceKind::Hotel,
                slot: 12u32.into()
            }
        );
        assert_eq!(h.hotel.request_count(), before);

        // other slots are unaffected
        assert!(h.coordinator.book(13u32.into(), 8u32.into()).await.is_committed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rollback_lifts_quarantine() {
        let h = harness(ReservationOrder::HotelFirst);
        h.band.take_slot(&7u32.into());
        h.hotel.fail_always(Method::Delete, 500);

        let outcome = h.coordinator.book(12u32.into(), 7u32.into()).await;
        assert!(outcome.requires_intervention());
        assert!(h.coordinator.is_quarantined(ServiceKind::Hotel, &12u32.into()));

        assert!(h
            .coordinator
            .retry_rollback(ServiceKind::Hotel, &12u32.into())
            .await
            .is_err());
        assert!(h.coordinator.is_quarantined(ServiceKind::Hotel, &12u32.into()));

        h.hotel.recover();
        let released = h
            .coordinator
            .retry_rollback(ServiceKind::Hotel, &12u32.into())
            .await
            .unwrap();
        assert_eq!(released, ReleaseOutcome::Released);
        assert!(h.coordinator.unresolved_holds().is_empty());
        assert_eq!(held_total(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_unresolved() {
        let h = harness(ReservationOrder::HotelFirst);
        h.band.take_slot(&7u32.into());
        h.hotel.fail_always(Method::Delete, 401);

        let outcome = h.coordinator.book(12u32.into(), 7u32.into()).await;
        assert!(outcome.requires_intervention());

        let hold = h
            .coordinator
            .clear_unresolved(ServiceKind::Hotel, &12u32.into())
            .unwrap();
        assert!(hold.reason.contains("unauthorized"));
        assert!(!h.coordinator.is_quarantined(ServiceKind::Hotel, &12u32.into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_already_free_counts_as_rollback() {
        let h = harness(ReservationOrder::HotelFirst);
        h.band.take_slot(&7u32.into());
        // the hotel server lost our hold on its own: release answers 409
        h.hotel.fail_next(Method::Delete, 409, 1);

        let outcome = h.coordinator.book(12u32.into(), 7u32.into()).await;

        assert!(matches!(
            outcome,
            BookingOutcome::Failed {
                rollback: Some(ReleaseOutcome::AlreadyFree),
                ..
            }
        ));
        assert!(h.coordinator.unresolved_holds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_band_first_order() {
        let h = harness(ReservationOrder::BandFirst);
        h.hotel.take_slot(&12u32.into());

        let outcome = h.coordinator.book(12u32.into(), 7u32.into()).await;

        assert_eq!(outcome.failure().map(|f| f.service), Some(ServiceKind::Hotel));
        assert!(!h.band.is_held(&7u32.into()));
        let band_calls = h.band.calls();
        assert_eq!(
            band_calls,
            vec![
                (Method::Post, "reservation/7".to_string()),
                (Method::Delete, "reservation/7".to_string())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_dispatch() {
        let h = harness(ReservationOrder::HotelFirst);
        let cancel = CancelHandle::new();
        assert!(cancel.cancel());
        assert!(cancel.cancel());

        let mut attempt = h.coordinator.new_attempt(1u32.into(), 1u32.into());
        let outcome = h.coordinator.execute(&mut attempt, &cancel).await;

        assert_eq!(outcome, BookingOutcome::Cancelled);
        assert_eq!(attempt.state(), AttemptState::Cancelled);
        assert_eq!(h.hotel.request_count() + h.band.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_dispatch_is_refused() {
        let h = harness(ReservationOrder::HotelFirst);
        let cancel = CancelHandle::new();

        let outcome = h
            .coordinator
            .execute(&mut h.coordinator.new_attempt(2u32.into(), 3u32.into()), &cancel)
            .await;

        assert!(outcome.is_committed());
        assert!(!cancel.cancel());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_attempts_on_same_slot() {
        let h = harness(ReservationOrder::HotelFirst);
        // the next hotel call has to wait for the rate limiter, so the first
        // attempt is still running when the second one starts
        h.coordinator.api(ServiceKind::Hotel).list_slots().await.unwrap();

        let (first, second) = tokio::join!(
            h.coordinator.book(12u32.into(), 7u32.into()),
            h.coordinator.book(12u32.into(), 8u32.into()),
        );

        assert!(first.is_committed());
        assert_eq!(
            second,
            BookingOutcome::SlotBusy {
                service: ServiceKind::Hotel,
                slot: 12u32.into()
            }
        );
        // the refused attempt never reached either service
        assert_eq!(
            h.hotel.calls(),
            vec![
                (Method::Get, "reservation/available".to_string()),
                (Method::Post, "reservation/12".to_string())
            ]
        );
        assert_eq!(h.band.held(), vec![SlotId::from(7u32)]);
        assert!(h.coordinator.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claims_are_held_while_running_and_released_after() {
        let h = Arc::new(harness(ReservationOrder::HotelFirst));
        h.band.take_slot(&7u32.into());

        let running = {
            let h = h.clone();
            tokio::spawn(async move { h.coordinator.book(12u32.into(), 7u32.into()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(
            h.coordinator.in_flight(),
            vec![
                (ServiceKind::Hotel, SlotId::from(12u32)),
                (ServiceKind::Band, SlotId::from(7u32))
            ]
        );

        // a slot named by the running attempt is refused, even on the other
        // service's side of the pair
        assert_eq!(
            h.coordinator.book(13u32.into(), 7u32.into()).await,
            BookingOutcome::SlotBusy {
                service: ServiceKind::Band,
                slot: 7u32.into()
            }
        );

        let outcome = running.await.unwrap();
        assert!(matches!(outcome, BookingOutcome::Failed { .. }));
        assert!(h.coordinator.in_flight().is_empty());
        assert_eq!(held_total(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_attempt_cannot_be_cancelled_later() {
        let h = harness(ReservationOrder::HotelFirst);
        h.band.take_slot(&7u32.into());
        h.hotel.fail_always(Method::Delete, 503);
        let orphaning = h.coordinator.book(12u32.into(), 7u32.into()).await;
        assert!(orphaning.requires_intervention());

        let cancel = CancelHandle::new();
        let mut attempt = h.coordinator.new_attempt(12u32.into(), 9u32.into());
        let outcome = h.coordinator.execute(&mut attempt, &cancel).await;

        assert!(matches!(outcome, BookingOutcome::Quarantined { .. }));
        assert_eq!(attempt.state(), AttemptState::Failed);
        assert!(!cancel.cancel());
        assert!(!cancel.is_cancelled());
        // the orphan stays recorded after its claim is given back
        assert!(h.coordinator.in_flight().is_empty());
        assert!(h.coordinator.is_quarantined(ServiceKind::Hotel, &12u32.into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_atomicity_over_many_attempts() {
        let h = harness(ReservationOrder::HotelFirst);
        h.band.take_slot(&4u32.into());
        h.hotel.take_slot(&6u32.into());
        h.band.set_hold_limit(3);

        let mut committed = 0;
        for id in 1..=8u32 {
            let outcome = h.coordinator.book(id.into(), id.into()).await;
            if outcome.is_committed() {
                committed += 1;
            }
            assert!(!outcome.requires_intervention());
            // each pair is either fully held or not held at all
            assert_eq!(
                h.hotel.is_held(&id.into()),
                h.band.is_held(&id.into()),
                "slot {id}: {outcome:?}"
            );
        }

        assert_eq!(committed, 3);
        assert_eq!(held_total(&h), 6);
    }
}
