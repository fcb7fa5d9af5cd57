/// Send-side window of in-flight messages.
///
/// [`SendWindow`] is a fixed table of `capacity` slots. Message `id` lives at
/// position `id % capacity`; a new identifier cannot be issued while its
/// position still holds an unconfirmed message.
///
/// ```text
///   min_id                          max_id   next_id+1
///     │                               │         │
/// ────┼───────────────────────────────┼─────────┼────▶ id space
///     │ <── occupied (maybe sparse) ─▶│         │
/// ```
///
/// `min_id`/`max_id` are the smallest and largest occupied identifiers in
/// wraparound order, both 0 when the window is empty. Every operation takes
/// the single window lock; none performs I/O while holding it.
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::contracts::Message;
use crate::errors::{LinkError, Result};
use crate::seq;
use crate::transport::DeliveryOutcome;

/// Lifecycle of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free
    Empty,

    /// Allocated, not yet accepted by the transport
    Pending,

    /// Accepted by the transport, no final outcome yet
    SentAwaitingResult,

    /// Transport reported a failed delivery; eligible for resend
    Failed,

    /// Delivery confirmed; never downgraded
    Received,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub state: SlotState,
    pub message: Option<Message>,
    pub last_sent_at: Option<Instant>,
}

impl Slot {
    const EMPTY: Slot = Slot {
        state: SlotState::Empty,
        message: None,
        last_sent_at: None,
    };

    fn is_occupied(&self) -> bool {
        self.state != SlotState::Empty
    }

    /// Occupied by exactly `id` (a position can only hold one id at a time,
    /// but reserved-id skipping makes positions discontinuous at the wrap)
    fn holds(&self, id: u32) -> bool {
        self.is_occupied() && self.message.as_ref().is_some_and(|m| m.id == id)
    }

    fn clear(&mut self) {
        *self = Self::EMPTY;
    }
}

/// Point-in-time view of the window counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub capacity: usize,
    pub occupied: usize,
    pub min_id: u32,
    pub max_id: u32,
    pub next_id: u32,
}

#[derive(Debug)]
struct WindowState {
    next_id: u32,
    occupied: usize,
    min_id: u32,
    max_id: u32,
    slots: Vec<Slot>,
}

impl WindowState {
    fn new(capacity: usize, next_id: u32) -> Self {
        Self {
            next_id,
            occupied: 0,
            min_id: 0,
            max_id: 0,
            slots: vec![Slot::EMPTY; capacity],
        }
    }

    fn position(&self, id: u32) -> usize {
        id as usize % self.slots.len()
    }

    fn slot(&self, id: u32) -> &Slot {
        &self.slots[self.position(id)]
    }

    fn slot_mut(&mut self, id: u32) -> &mut Slot {
        let pos = self.position(id);
        &mut self.slots[pos]
    }

    /// `id` is inside the bounds and currently occupies its slot
    fn tracks(&self, id: u32) -> bool {
        self.occupied > 0
            && seq::in_range(id, self.min_id, self.max_id)
            && self.slot(id).holds(id)
    }

    fn rescan_bounds_after(&mut self, released: u32) {
        if released == self.min_id {
            let mut id = released.wrapping_add(1);
            while seq::before_or_eq(id, self.max_id) {
                if self.slot(id).holds(id) {
                    self.min_id = id;
                    break;
                }
                id = id.wrapping_add(1);
            }
        } else if released == self.max_id {
            let mut id = released.wrapping_sub(1);
            while seq::after_or_eq(id, self.min_id) {
                if self.slot(id).holds(id) {
                    self.max_id = id;
                    break;
                }
                id = id.wrapping_sub(1);
            }
        }
    }
}

/// Bounded circular table of in-flight messages
#[derive(Debug)]
pub struct SendWindow {
    inner: Mutex<WindowState>,
}

impl SendWindow {
    /// Create an empty window; the first allocated identifier is 1
    pub fn new(capacity: usize) -> Self {
        Self::starting_after(capacity, 0)
    }

    /// Create an empty window whose first allocation follows `last_id`
    pub(crate) fn starting_after(capacity: usize, last_id: u32) -> Self {
        Self {
            inner: Mutex::new(WindowState::new(capacity.max(1), last_id)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Whether `allocate` would find its slot free right now
    pub fn has_capacity(&self) -> bool {
        let state = self.inner.lock();
        let id = seq::next_id(state.next_id);
        !state.slot(id).is_occupied()
    }

    /// Issue the next identifier and store `payload` under it
    ///
    /// # Errors
    /// - `WindowFull` when the target slot is still occupied; nothing changes
    ///   and the caller retries after a release
    /// - `PayloadTooLarge` when the payload cannot fit in one message
    pub fn allocate(&self, payload: Bytes) -> Result<Message> {
        let mut state = self.inner.lock();

        let id = seq::next_id(state.next_id);
        if state.slot(id).is_occupied() {
            trace!(msg_id = id, occupied = state.occupied, "send window full");
            return Err(LinkError::WindowFull { id });
        }
        let message = Message::new(id, payload)?;

        if state.occupied == 0 {
            state.min_id = id;
            state.max_id = id;
        } else {
            if seq::before(id, state.min_id) {
                state.min_id = id;
            }
            if seq::after(id, state.max_id) {
                state.max_id = id;
            }
        }

        *state.slot_mut(id) = Slot {
            state: SlotState::Pending,
            message: Some(message.clone()),
            last_sent_at: None,
        };
        state.next_id = id;
        state.occupied += 1;

        Ok(message)
    }

    /// Free the slot for a confirmed delivery and hand back its message.
    /// `None` when `id` is not tracked, e.g. a duplicate or a confirmation
    /// from before a reset.
    pub fn release(&self, id: u32) -> Option<Message> {
        let mut state = self.inner.lock();
        if !state.tracks(id) {
            trace!(msg_id = id, "release for untracked id ignored");
            return None;
        }

        let freed = state.slot_mut(id).message.take();
        state.slot_mut(id).clear();
        state.occupied -= 1;

        if state.occupied == 0 {
            state.min_id = 0;
            state.max_id = 0;
        } else {
            state.rescan_bounds_after(id);
        }
        freed
    }

    /// Record a delivery outcome without freeing the slot
    ///
    /// A slot that reached `Received` keeps it: a late or duplicate failure
    /// never downgrades a confirmed delivery.
    pub fn mark_result(&self, id: u32, outcome: DeliveryOutcome) -> bool {
        let mut state = self.inner.lock();
        if !state.tracks(id) {
            return false;
        }
        let slot = state.slot_mut(id);
        if slot.state == SlotState::Received {
            return false;
        }
        slot.state = match outcome {
            DeliveryOutcome::Pending => SlotState::SentAwaitingResult,
            DeliveryOutcome::Failed => SlotState::Failed,
            DeliveryOutcome::Delivered => SlotState::Received,
        };
        true
    }

    /// Record that the transport accepted `id` at `now`
    pub fn mark_sent(&self, id: u32, now: Instant) -> bool {
        let mut state = self.inner.lock();
        if !state.tracks(id) {
            return false;
        }
        let slot = state.slot_mut(id);
        slot.last_sent_at = Some(now);
        if matches!(slot.state, SlotState::Pending | SlotState::Failed) {
            slot.state = SlotState::SentAwaitingResult;
        }
        true
    }

    /// Messages due for a resend, walked upward from `min_id`, at most `limit`
    ///
    /// Due means not yet `Received` and either never sent or last sent at
    /// least `timeout` before `now`.
    pub fn due_for_resend(&self, now: Instant, timeout: Duration, limit: usize) -> Vec<Message> {
        let state = self.inner.lock();
        let mut due = Vec::new();
        if state.occupied == 0 || limit == 0 {
            return due;
        }

        let mut id = state.min_id;
        while seq::before_or_eq(id, state.max_id) && due.len() < limit {
            let slot = state.slot(id);
            if slot.holds(id) && slot.state != SlotState::Received {
                let expired = match slot.last_sent_at {
                    None => true,
                    Some(sent) => now.saturating_duration_since(sent) >= timeout,
                };
                if expired {
                    if let Some(message) = &slot.message {
                        due.push(message.clone());
                    }
                }
            }
            id = id.wrapping_add(1);
        }
        due
    }

    /// Free every slot and restart numbering at 1
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        let dropped = state.occupied;
        state.slots.iter_mut().for_each(Slot::clear);
        state.next_id = 0;
        state.occupied = 0;
        state.min_id = 0;
        state.max_id = 0;
        debug!(dropped, "send window reset");
    }

    pub fn stats(&self) -> WindowStats {
        let state = self.inner.lock();
        WindowStats {
            capacity: state.slots.len(),
            occupied: state.occupied,
            min_id: state.min_id,
            max_id: state.max_id,
            next_id: state.next_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().occupied == 0
    }

    pub fn contains(&self, id: u32) -> bool {
        self.inner.lock().tracks(id)
    }

    pub fn slot_state(&self, id: u32) -> SlotState {
        let state = self.inner.lock();
        if state.tracks(id) {
            state.slot(id).state
        } else {
            SlotState::Empty
        }
    }
}
