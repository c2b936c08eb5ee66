// Domain types shared by every layer: which service, which slot, and the
// per-attempt bookkeeping the coordinator keeps while a booking runs.

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// The two remote services a booking spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Hotel,
    Band,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Hotel, ServiceKind::Band];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Hotel => "hotel",
            ServiceKind::Band => "band",
        }
    }

    pub fn other(&self) -> ServiceKind {
        match self {
            ServiceKind::Hotel => ServiceKind::Band,
            ServiceKind::Band => ServiceKind::Hotel,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-scoped slot identifier.
///
/// Remote services hand out either numeric or string ids, so the id is kept
/// in its textual form. Ordering is numeric when both sides are numbers and
/// falls back to plain string ordering otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SlotId(String);

impl SlotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for SlotId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_number(), other.as_number()) {
            // tie-break on the text so "7" and "007" stay distinct
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SlotId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'de> Deserialize<'de> for SlotId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => SlotId(n.to_string()),
            RawId::Text(s) => SlotId(s),
        })
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u32> for SlotId {
    fn from(id: u32) -> Self {
        SlotId(id.to_string())
    }
}

impl From<u64> for SlotId {
    fn from(id: u64) -> Self {
        SlotId(id.to_string())
    }
}

impl From<&str> for SlotId {
    fn from(id: &str) -> Self {
        SlotId(id.to_string())
    }
}

impl From<String> for SlotId {
    fn from(id: String) -> Self {
        SlotId(id)
    }
}

impl FromStr for SlotId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SlotId(s.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    #[default]
    Available,
    Held,
    Booked,
}

// Local view of a slot as last reported by its service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub status: SlotStatus,
}

impl Slot {
    pub fn new(id: impl Into<SlotId>, status: SlotStatus) -> Self {
        Self {
            id: id.into(),
            time: None,
            status,
        }
    }
}

// States an attempt moves through inside the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    ReservingFirst,
    FirstReserved,
    ReservingSecond,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
    InconsistentState,
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Committed
                | AttemptState::RolledBack
                | AttemptState::Failed
                | AttemptState::InconsistentState
                | AttemptState::Cancelled
        )
    }
}

// One request to hold a hotel slot and a band slot together. Lives only
// for as long as the coordinator is working on it.
#[derive(Debug, Clone)]
pub struct ReservationAttempt {
    pub id: u64,
    pub hotel_slot: SlotId,
    pub band_slot: SlotId,
    pub created_at: DateTime<Utc>,
    history: Vec<AttemptState>,
}

impl ReservationAttempt {
    pub fn new(id: u64, hotel_slot: SlotId, band_slot: SlotId) -> Self {
        Self {
            id,
            hotel_slot,
            band_slot,
            created_at: Utc::now(),
            history: vec![AttemptState::Idle],
        }
    }

    pub fn slot_for(&self, service: ServiceKind) -> &SlotId {
        match service {
            ServiceKind::Hotel => &self.hotel_slot,
            ServiceKind::Band => &self.band_slot,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.history
            .last()
            .copied()
            .unwrap_or(AttemptState::Idle)
    }

    pub fn history(&self) -> &[AttemptState] {
        &self.history
    }

    pub(crate) fn transition(&mut self, next: AttemptState) {
        tracing::debug!(attempt = self.id, from = ?self.state(), to = ?next, "attempt transition");
        self.history.push(next);
    }
}
