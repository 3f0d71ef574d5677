//! In-memory stand-ins for the HAL-side collaborators.
//!
//! Every mock is a cheap handle over shared state, so the harness keeps one
//! clone to script and inspect while the manager owns the boxed other half.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use radiocaps::client::{BlockStatus, DataManager, RadioClient, RequestId, SimCard, SlotData};
use radiocaps::radio::{DataCall, RadioCapability, RadioRequest, RequestOptions, TransportError};

/// A request as the mock HAL received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub slot: usize,
    pub id: RequestId,
    pub request: RadioRequest,
    pub options: RequestOptions,
}

#[derive(Debug, Clone)]
struct Channel {
    status: BlockStatus,
    /// Grant exclusive ownership straight away on `block()`.
    grant: bool,
    blocks: usize,
    unblocks: usize,
}

impl Default for Channel {
    fn default() -> Self {
        Channel {
            status: BlockStatus::None,
            grant: true,
            blocks: 0,
            unblocks: 0,
        }
    }
}

#[derive(Debug, Default)]
struct HalState {
    next_id: u64,
    outstanding: Vec<SentRequest>,
    log: Vec<SentRequest>,
    cancelled: Vec<RequestId>,
    channels: BTreeMap<usize, Channel>,
    send_errors: BTreeMap<usize, TransportError>,
    /// What each slot's modem currently runs; `None` answers queries empty.
    modem: BTreeMap<usize, Option<RadioCapability>>,
}

/// Shared state behind every [`MockRadio`]: one id space and one request log
/// across all slots, so cross-slot ordering is observable.
#[derive(Debug, Clone, Default)]
pub struct MockHal {
    state: Arc<Mutex<HalState>>,
}

impl MockHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client half for `slot`.
    pub fn radio(&self, slot: usize) -> MockRadio {
        self.state
            .lock()
            .unwrap()
            .channels
            .entry(slot)
            .or_default();
        MockRadio {
            slot,
            hal: self.clone(),
        }
    }

    /// Remove and return the outstanding requests `hold` rejects, oldest first.
    pub fn take_outstanding<F>(&self, mut hold: F) -> Vec<SentRequest>
    where
        F: FnMut(&SentRequest) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let (held, taken): (Vec<_>, Vec<_>) =
            state.outstanding.drain(..).partition(|r| hold(r));
        state.outstanding = held;
        taken
    }

    pub fn outstanding(&self) -> Vec<SentRequest> {
        self.state.lock().unwrap().outstanding.clone()
    }

    /// Every request ever sent, in send order.
    pub fn log(&self) -> Vec<SentRequest> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn cancelled(&self) -> Vec<RequestId> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// Whether `block()` on `slot` grants ownership immediately.
    pub fn set_grant(&self, slot: usize, grant: bool) {
        self.state
            .lock()
            .unwrap()
            .channels
            .entry(slot)
            .or_default()
            .grant = grant;
    }

    /// Hand a queued channel over. Returns true if ownership changed.
    pub fn grant(&self, slot: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        let channel = state.channels.entry(slot).or_default();
        if channel.status == BlockStatus::Queued {
            channel.status = BlockStatus::Acquired;
            true
        } else {
            false
        }
    }

    pub fn block_status(&self, slot: usize) -> BlockStatus {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&slot)
            .map_or(BlockStatus::None, |c| c.status)
    }

    pub fn blocks(&self, slot: usize) -> usize {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&slot)
            .map_or(0, |c| c.blocks)
    }

    pub fn unblocks(&self, slot: usize) -> usize {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&slot)
            .map_or(0, |c| c.unblocks)
    }

    /// Make every send on `slot` fail with `error` (or succeed again).
    pub fn set_send_error(&self, slot: usize, error: Option<TransportError>) {
        let mut state = self.state.lock().unwrap();
        match error {
            Some(e) => state.send_errors.insert(slot, e),
            None => state.send_errors.remove(&slot),
        };
    }

    pub fn modem_cap(&self, slot: usize) -> Option<RadioCapability> {
        self.state.lock().unwrap().modem.get(&slot).cloned().flatten()
    }

    pub fn set_modem_cap(&self, slot: usize, cap: Option<RadioCapability>) {
        self.state.lock().unwrap().modem.insert(slot, cap);
    }
}

/// [`RadioClient`] for one slot.
#[derive(Debug, Clone)]
pub struct MockRadio {
    slot: usize,
    hal: MockHal,
}

impl RadioClient for MockRadio {
    fn send_request(
        &mut self,
        request: RadioRequest,
        options: RequestOptions,
    ) -> Result<RequestId, TransportError> {
        let mut state = self.hal.state.lock().unwrap();
        if let Some(e) = state.send_errors.get(&self.slot) {
            return Err(*e);
        }
        state.next_id += 1;
        let sent = SentRequest {
            slot: self.slot,
            id: RequestId(state.next_id),
            request,
            options,
        };
        tracing::trace!(slot = self.slot, id = %sent.id, request = sent.request.name(), "hal <-");
        state.log.push(sent.clone());
        let id = sent.id;
        state.outstanding.push(sent);
        Ok(id)
    }

    fn cancel_request(&mut self, id: RequestId) {
        let mut state = self.hal.state.lock().unwrap();
        state.outstanding.retain(|r| r.id != id);
        state.cancelled.push(id);
    }

    fn block(&mut self) -> BlockStatus {
        let mut state = self.hal.state.lock().unwrap();
        let channel = state.channels.entry(self.slot).or_default();
        channel.blocks += 1;
        channel.status = if channel.grant {
            BlockStatus::Acquired
        } else {
            BlockStatus::Queued
        };
        channel.status
    }

    fn block_status(&self) -> BlockStatus {
        self.hal.block_status(self.slot)
    }

    fn unblock(&mut self) {
        let mut state = self.hal.state.lock().unwrap();
        let channel = state.channels.entry(self.slot).or_default();
        channel.unblocks += 1;
        channel.status = BlockStatus::None;
    }
}

/// [`SlotData`] backed by a shared call list.
#[derive(Debug, Clone, Default)]
pub struct MockSlotData {
    calls: Arc<Mutex<Vec<DataCall>>>,
}

impl MockSlotData {
    pub fn set_calls(&self, calls: Vec<DataCall>) {
        *self.calls.lock().unwrap() = calls;
    }

    pub fn remove_call(&self, cid: i32) {
        self.calls.lock().unwrap().retain(|c| c.cid != cid);
    }

    pub fn calls(&self) -> Vec<DataCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl SlotData for MockSlotData {
    fn active_calls(&self) -> Vec<DataCall> {
        self.calls()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockSim {
    io_active: Arc<Mutex<bool>>,
}

impl MockSim {
    pub fn set_io_active(&self, active: bool) {
        *self.io_active.lock().unwrap() = active;
    }
}

impl SimCard for MockSim {
    fn sim_io_active(&self) -> bool {
        *self.io_active.lock().unwrap()
    }
}

#[derive(Debug)]
struct DataManagerState {
    need_set_data_allowed: bool,
    data_on_asserts: usize,
}

/// [`DataManager`] that counts `assert_data_on` calls.
#[derive(Debug, Clone)]
pub struct MockDataManager {
    state: Arc<Mutex<DataManagerState>>,
}

impl Default for MockDataManager {
    fn default() -> Self {
        MockDataManager {
            state: Arc::new(Mutex::new(DataManagerState {
                need_set_data_allowed: true,
                data_on_asserts: 0,
            })),
        }
    }
}

impl MockDataManager {
    pub fn set_need_set_data_allowed(&self, need: bool) {
        self.state.lock().unwrap().need_set_data_allowed = need;
    }

    pub fn data_on_asserts(&self) -> usize {
        self.state.lock().unwrap().data_on_asserts
    }
}

impl DataManager for MockDataManager {
    fn need_set_data_allowed(&self) -> bool {
        self.state.lock().unwrap().need_set_data_allowed
    }

    fn assert_data_on(&mut self) {
        self.state.lock().unwrap().data_on_asserts += 1;
    }
}
