// Caller-facing surface: slot queries, bookings, and the housekeeping
// operations (matching slots, bulk release) built on top of them.
//
// Long-running work can be handed to background tasks with `submit_*`;
// each submission delivers exactly one result over a oneshot channel, so
// the caller's own task never blocks on the network.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{
    api::{ReleaseOutcome, ReservationApi},
    cache::ResponseCache,
    client::ServiceClient,
    config::{BrokerConfig, ReservationOrder},
    coordinator::{BookingCoordinator, BookingOutcome, CancelHandle, OrphanedHold},
    error::{ClientError, PairReleaseError, ReservationError},
    model::{ServiceKind, Slot, SlotId},
    rate_limiter::RateLimiter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotQuery {
    Available,
    Held,
}

// Result of a bulk release
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub released: Vec<(ServiceKind, SlotId)>,
    pub failed: Vec<ReservationError>,
}

impl ReleaseSummary {
    fn record(
        &mut self,
        service: ServiceKind,
        slot: SlotId,
        result: Result<ReleaseOutcome, ReservationError>,
    ) {
        match result {
            Ok(_) => self.released.push((service, slot)),
            Err(e) => {
                warn!(error = %e, cause = %e.source, "failed to release slot");
                self.failed.push(e);
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A booking running in the background.
pub struct BookingTicket {
    pub attempt_id: u64,
    cancel: CancelHandle,
    outcome: oneshot::Receiver<BookingOutcome>,
}

impl BookingTicket {
    // See `CancelHandle::cancel`
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub async fn outcome(self) -> Result<BookingOutcome, oneshot::error::RecvError> {
        self.outcome.await
    }
}

pub const EARLIEST_BOOKING_ROUNDS: u32 = 3;
const EARLIEST_BOOKING_PAUSE: Duration = Duration::from_secs(1);

// Result of `BookingBroker::book_earliest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EarliestBooking {
    // A pair at or before the earliest bookable slot was already held
    AlreadyHeld(SlotId),
    Booked(SlotId),
    NoneAvailable,
    // Every round failed; carries the last round's outcome
    GaveUp(BookingOutcome),
}

enum Round {
    Done(EarliestBooking),
    Retry(BookingOutcome),
}

fn ids(slots: Vec<Slot>) -> BTreeSet<SlotId> {
    slots.into_iter().map(|s| s.id).collect()
}

// Holds at one service whose id is not held at the other
fn unmatched(
    held_hotel: &BTreeSet<SlotId>,
    held_band: &BTreeSet<SlotId>,
) -> Vec<(ServiceKind, SlotId)> {
    held_hotel
        .difference(held_band)
        .map(|id| (ServiceKind::Hotel, id.clone()))
        .chain(held_band.difference(held_hotel).map(|id| (ServiceKind::Band, id.clone())))
        .collect()
}

#[derive(Clone)]
pub struct BookingBroker {
    coordinator: Arc<BookingCoordinator>,
}

impl BookingBroker {
    pub fn new(hotel: ReservationApi, band: ReservationApi, order: ReservationOrder) -> Self {
        Self {
            coordinator: Arc::new(BookingCoordinator::new(
                Arc::new(hotel),
                Arc::new(band),
                order,
            )),
        }
    }

    // HTTP-backed broker; each service gets its own rate limiter and cache
    pub fn from_config(config: &BrokerConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let api = |service: ServiceKind| -> Result<ReservationApi, ClientError> {
            let client = ServiceClient::from_config(
                service,
                config,
                Arc::new(RateLimiter::new(config.rate_limit_interval()?)),
                Arc::new(ResponseCache::new(config.cache_ttl()?)),
            )?;
            Ok(ReservationApi::new(client))
        };

        Ok(Self::new(
            api(ServiceKind::Hotel)?,
            api(ServiceKind::Band)?,
            config.order,
        ))
    }

    pub fn coordinator(&self) -> &Arc<BookingCoordinator> {
        &self.coordinator
    }

    pub fn api(&self, service: ServiceKind) -> &Arc<ReservationApi> {
        self.coordinator.api(service)
    }

    pub async fn get_available_slots(
        &self,
        service: ServiceKind,
    ) -> Result<Vec<Slot>, ReservationError> {
        self.api(service).list_slots().await
    }

    pub async fn get_held_slots(
        &self,
        service: ServiceKind,
    ) -> Result<Vec<Slot>, ReservationError> {
        self.api(service).list_held_slots().await
    }

    pub async fn query(
        &self,
        service: ServiceKind,
        query: SlotQuery,
    ) -> Result<Vec<Slot>, ReservationError> {
        match query {
            SlotQuery::Available => self.get_available_slots(service).await,
            SlotQuery::Held => self.get_held_slots(service).await,
        }
    }

    pub async fn book(&self, hotel_slot: SlotId, band_slot: SlotId) -> BookingOutcome {
        self.coordinator.book(hotel_slot, band_slot).await
    }

    // Start a booking on a background task
    pub fn submit_booking(&self, hotel_slot: SlotId, band_slot: SlotId) -> BookingTicket {
        let cancel = CancelHandle::new();
        let mut attempt = self.coordinator.new_attempt(hotel_slot, band_slot);
        let attempt_id = attempt.id;
        let (tx, rx) = oneshot::channel();

        let coordinator = self.coordinator.clone();
        let worker_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = coordinator.execute(&mut attempt, &worker_cancel).await;
            if tx.send(outcome).is_err() {
                // the attempt still ran to completion; only the report is lost
                warn!(attempt = attempt_id, "booking outcome dropped, caller went away");
            }
        });

        BookingTicket {
            attempt_id,
            cancel,
            outcome: rx,
        }
    }

    // Run a slot query on a background task
    pub fn submit_query(
        &self,
        service: ServiceKind,
        query: SlotQuery,
    ) -> oneshot::Receiver<Result<Vec<Slot>, ReservationError>> {
        let (tx, rx) = oneshot::channel();
        let broker = self.clone();

        tokio::spawn(async move {
            let result = broker.query(service, query).await;
            let _ = tx.send(result);
        });

        rx
    }

    /// Slot ids that could be booked as a pair right now, earliest first.
    ///
    /// A slot counts when it is free at both services, or already held at
    /// one and free at the other.
    pub async fn matching_slots(&self, limit: usize) -> Result<Vec<SlotId>, ReservationError> {
        let (free_hotel, free_band, held_hotel, held_band) = futures::try_join!(
            self.get_available_slots(ServiceKind::Hotel),
            self.get_available_slots(ServiceKind::Band),
            self.get_held_slots(ServiceKind::Hotel),
            self.get_held_slots(ServiceKind::Band),
        )?;

        let (free_hotel, free_band) = (ids(free_hotel), ids(free_band));
        let (held_hotel, held_band) = (ids(held_hotel), ids(held_band));

        let mut matching: BTreeSet<SlotId> = free_hotel.intersection(&free_band).cloned().collect();
        matching.extend(held_hotel.intersection(&free_band).cloned());
        matching.extend(held_band.intersection(&free_hotel).cloned());

        Ok(matching.into_iter().take(limit).collect())
    }

    /// Makes sure the earliest bookable pair is held, in up to
    /// `EARLIEST_BOOKING_ROUNDS` rounds.
    ///
    /// A round frees capacity when either service already holds two or more
    /// slots (by releasing holds that are not part of a pair), then picks the
    /// earliest slot from `matching_slots`. An already held pair at or before
    /// that slot ends the search; a later one is released first. A hold
    /// already made at one service is reused, so only the missing side is
    /// reserved. After a successful booking every other hold is released.
    pub async fn book_earliest(&self) -> Result<EarliestBooking, ReservationError> {
        let mut last = None;

        for round in 1..=EARLIEST_BOOKING_ROUNDS {
            match self.earliest_round().await {
                Ok(Round::Done(result)) => return Ok(result),
                Ok(Round::Retry(outcome)) => {
                    warn!(round, ?outcome, "could not book the earliest pair");
                    last = Some(Ok(outcome));
                }
                Err(e) => {
                    warn!(round, error = %e, cause = %e.source, "earliest booking round failed");
                    last = Some(Err(e));
                }
            }

            if round < EARLIEST_BOOKING_ROUNDS {
                tokio::time::sleep(EARLIEST_BOOKING_PAUSE).await;
            }
        }

        match last {
            Some(Ok(outcome)) => Ok(EarliestBooking::GaveUp(outcome)),
            Some(Err(e)) => Err(e),
            None => Ok(EarliestBooking::NoneAvailable),
        }
    }

    async fn earliest_round(&self) -> Result<Round, ReservationError> {
        let (mut held_hotel, mut held_band) = self.held_ids().await?;

        // services cap how many slots one client may hold
        if held_hotel.len() >= 2 || held_band.len() >= 2 {
            info!("releasing unmatched holds to make room");
            let summary = self.release_each(unmatched(&held_hotel, &held_band)).await;
            if !summary.is_clean() {
                warn!(failed = summary.failed.len(), "some unmatched holds were kept");
            }
            (held_hotel, held_band) = self.held_ids().await?;
        }

        let Some(candidate) = self.matching_slots(1).await?.into_iter().next() else {
            info!("no matching slot available");
            return Ok(Round::Done(EarliestBooking::NoneAvailable));
        };

        if let Some(held) = held_hotel.intersection(&held_band).next().cloned() {
            if candidate >= held {
                info!(slot = %held, "already holding the earliest matching pair");
                return Ok(Round::Done(EarliestBooking::AlreadyHeld(held)));
            }
            info!(%held, earlier = %candidate, "found an earlier pair, releasing the held one");
            self.release_pair(&held, &held)
                .await
                .map_err(PairReleaseError::into_failure)?;
        }

        let sides = [(ServiceKind::Hotel, &held_hotel), (ServiceKind::Band, &held_band)];
        let missing: Vec<ServiceKind> = sides
            .into_iter()
            .filter(|(_, held)| !held.contains(&candidate))
            .map(|(service, _)| service)
            .collect();

        let outcome = match missing.as_slice() {
            [_, _] => self.book(candidate.clone(), candidate.clone()).await,
            [service] => {
                info!(%service, slot = %candidate, "other side already held, reserving one side");
                match self.api(*service).reserve_slot(&candidate).await {
                    Ok(()) => BookingOutcome::Committed {
                        hotel_slot: candidate.clone(),
                        band_slot: candidate.clone(),
                    },
                    Err(failure) => BookingOutcome::Failed {
                        failure,
                        rollback: None,
                    },
                }
            }
            _ => return Ok(Round::Done(EarliestBooking::AlreadyHeld(candidate))),
        };

        if !outcome.is_committed() {
            return Ok(Round::Retry(outcome));
        }

        let cleanup = self.release_unmatched().await?;
        if !cleanup.is_clean() {
            warn!(failed = cleanup.failed.len(), "booked, but some other holds were kept");
        }
        info!(slot = %candidate, "earliest matching pair booked");
        Ok(Round::Done(EarliestBooking::Booked(candidate)))
    }

    /// Releases a booked pair, hotel first. Slots that are already free
    /// count as released.
    ///
    /// If the band release fails after the hotel hold was released, the hotel
    /// slot is reserved again so the pair stays whole.
    pub async fn release_pair(
        &self,
        hotel_slot: &SlotId,
        band_slot: &SlotId,
    ) -> Result<(ReleaseOutcome, ReleaseOutcome), PairReleaseError> {
        let hotel_api = self.api(ServiceKind::Hotel);
        let hotel = hotel_api
            .release_slot(hotel_slot)
            .await
            .map_err(PairReleaseError::Unchanged)?;

        let failure = match self.api(ServiceKind::Band).release_slot(band_slot).await {
            Ok(band) => return Ok((hotel, band)),
            Err(failure) => failure,
        };
        if hotel == ReleaseOutcome::AlreadyFree {
            return Err(PairReleaseError::Unchanged(failure));
        }

        warn!(
            %hotel_slot,
            %band_slot,
            cause = %failure.source,
            "band release failed, restoring hotel hold"
        );
        match hotel_api.reserve_slot(hotel_slot).await {
            Ok(()) => Err(PairReleaseError::Unchanged(failure)),
            Err(restore_failure) => {
                error!(
                    %hotel_slot,
                    %band_slot,
                    cause = %restore_failure.source,
                    "RESTORE FAILED: hotel hold released but band hold kept"
                );
                Err(PairReleaseError::HalfReleased {
                    failure,
                    restore_failure,
                })
            }
        }
    }

    // Release everything held at both services, carrying on past failures
    pub async fn release_all(&self) -> Result<ReleaseSummary, ReservationError> {
        let mut summary = ReleaseSummary::default();

        for service in ServiceKind::ALL {
            for slot in self.get_held_slots(service).await? {
                let result = self.api(service).release_slot(&slot.id).await;
                summary.record(service, slot.id, result);
            }
        }

        Ok(summary)
    }

    /// Releases holds that are not part of a pair (same id held at both
    /// services), then every pair except the earliest one.
    pub async fn release_unmatched(&self) -> Result<ReleaseSummary, ReservationError> {
        let (held_hotel, held_band) = self.held_ids().await?;
        let pairs: BTreeSet<SlotId> = held_hotel.intersection(&held_band).cloned().collect();

        let mut doomed = unmatched(&held_hotel, &held_band);
        for id in pairs.iter().skip(1) {
            doomed.push((ServiceKind::Hotel, id.clone()));
            doomed.push((ServiceKind::Band, id.clone()));
        }

        let summary = self.release_each(doomed).await;
        if let Some(kept) = pairs.first() {
            info!(slot = %kept, "kept earliest matching pair");
        }
        Ok(summary)
    }

    async fn held_ids(&self) -> Result<(BTreeSet<SlotId>, BTreeSet<SlotId>), ReservationError> {
        let (hotel, band) = futures::try_join!(
            self.get_held_slots(ServiceKind::Hotel),
            self.get_held_slots(ServiceKind::Band),
        )?;
        Ok((ids(hotel), ids(band)))
    }

    async fn release_each(&self, holds: Vec<(ServiceKind, SlotId)>) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();
        for (service, slot) in holds {
            let result = self.api(service).release_slot(&slot).await;
            summary.record(service, slot, result);
        }
        summary
    }

    pub fn unresolved_holds(&self) -> Vec<OrphanedHold> {
        self.coordinator.unresolved_holds()
    }

    pub async fn retry_rollback(
        &self,
        service: ServiceKind,
        slot: &SlotId,
    ) -> Result<ReleaseOutcome, ReservationError> {
        self.coordinator.retry_rollback(service, slot).await
    }
}
