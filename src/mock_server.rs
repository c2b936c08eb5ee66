// In-memory reservation server for tests. Behaves like the real service
// (available/held listings, reserve, release) and can be told to fail
// requests with a given status, or drop connections, per HTTP method.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use crate::{
    error::TransportError,
    model::{Slot, SlotId, SlotStatus},
    transport::{Method, RawResponse, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    HeldByUs,
    Taken,
}

#[derive(Default)]
struct ServerState {
    slots: BTreeMap<SlotId, SlotState>,
    scripted: HashMap<MethodKey, VecDeque<u16>>,
    always: HashMap<MethodKey, u16>,
    dropped_connections: usize,
    calls: Vec<(Instant, Method, String)>,
    hold_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MethodKey {
    Get,
    Post,
    Delete,
}

impl From<Method> for MethodKey {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => MethodKey::Get,
            Method::Post => MethodKey::Post,
            Method::Delete => MethodKey::Delete,
        }
    }
}

pub struct MockReservationServer {
    state: Mutex<ServerState>,
}

impl MockReservationServer {
    pub fn with_slots(ids: impl IntoIterator<Item = u32>) -> Self {
        let slots = ids
            .into_iter()
            .map(|id| (SlotId::from(id), SlotState::Free))
            .collect();

        Self {
            state: Mutex::new(ServerState {
                slots,
                ..Default::default()
            }),
        }
    }

    // Answer the next `count` requests with `method` using `status`
    pub fn fail_next(&self, method: Method, status: u16, count: usize) {
        let mut state = self.state.lock();
        let queue = state.scripted.entry(method.into()).or_default();
        queue.extend(std::iter::repeat(status).take(count));
    }

    pub fn fail_always(&self, method: Method, status: u16) {
        self.state.lock().always.insert(method.into(), status);
    }

    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.always.clear();
        state.scripted.clear();
    }

    pub fn drop_next_connections(&self, count: usize) {
        self.state.lock().dropped_connections += count;
    }

    pub fn set_hold_limit(&self, limit: usize) {
        self.state.lock().hold_limit = Some(limit);
    }

    // Someone else grabs the slot
    pub fn take_slot(&self, id: &SlotId) {
        self.state.lock().slots.insert(id.clone(), SlotState::Taken);
    }

    pub fn is_held(&self, id: &SlotId) -> bool {
        self.state.lock().slots.get(id) == Some(&SlotState::HeldByUs)
    }

    pub fn held(&self) -> Vec<SlotId> {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|(_, state)| **state == SlotState::HeldByUs)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.state.lock().calls.iter().map(|(at, _, _)| *at).collect()
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|(_, method, path)| (*method, path.clone()))
            .collect()
    }

    fn listing(state: &ServerState, wanted: SlotState, status: SlotStatus) -> RawResponse {
        let slots: Vec<Slot> = state
            .slots
            .iter()
            .filter(|(_, s)| **s == wanted)
            .map(|(id, _)| Slot::new(id.clone(), status))
            .collect();

        RawResponse::new(200, json!(slots).to_string())
    }

    fn message(status: u16, message: &str) -> RawResponse {
        RawResponse::new(status, json!({ "message": message }).to_string())
    }

    fn handle(state: &mut ServerState, method: Method, path: &str) -> RawResponse {
        let slot_id = path.strip_prefix("reservation/").map(SlotId::from);

        match (method, path, slot_id) {
            (Method::Get, "reservation/available", _) => {
                Self::listing(state, SlotState::Free, SlotStatus::Available)
            }
            (Method::Get, "reservation", _) => {
                Self::listing(state, SlotState::HeldByUs, SlotStatus::Held)
            }
            (Method::Post, _, Some(id)) => {
                let held = state
                    .slots
                    .values()
                    .filter(|s| **s == SlotState::HeldByUs)
                    .count();

                match state.slots.get(&id).copied() {
                    None => Self::message(403, "Slot does not exist"),
                    Some(SlotState::Free) => {
                        if state.hold_limit.is_some_and(|limit| held >= limit) {
                            return Self::message(451, "Reservation limit reached");
                        }
                        state.slots.insert(id.clone(), SlotState::HeldByUs);
                        Self::message(200, &format!("Slot {id} reserved"))
                    }
                    Some(_) => Self::message(409, "Slot is already taken"),
                }
            }
            (Method::Delete, _, Some(id)) => match state.slots.get(&id).copied() {
                None => Self::message(403, "Slot does not exist"),
                Some(SlotState::HeldByUs) => {
                    state.slots.insert(id.clone(), SlotState::Free);
                    Self::message(200, &format!("Slot {id} released"))
                }
                Some(_) => Self::message(409, "Slot is not held"),
            },
            _ => Self::message(404, "Not found"),
        }
    }
}

#[async_trait]
impl Transport for MockReservationServer {
    async fn send(&self, method: Method, path: &str) -> Result<RawResponse, TransportError> {
        let mut state = self.state.lock();
        state.calls.push((Instant::now(), method, path.to_string()));

        if state.dropped_connections > 0 {
            state.dropped_connections -= 1;
            return Err(TransportError::Connect("connection reset by peer".to_string()));
        }

        let key = MethodKey::from(method);
        if let Some(status) = state.scripted.get_mut(&key).and_then(|q| q.pop_front()) {
            return Ok(Self::message(status, "scripted failure"));
        }
        if let Some(status) = state.always.get(&key).copied() {
            return Ok(Self::message(status, "scripted failure"));
        }

        Ok(Self::handle(&mut state, method, path))
    }
}
