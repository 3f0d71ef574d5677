//! # Radio Capability Manager
//!
//! Owns every slot, the registry, the request queue and the single
//! transaction. It is a sans-IO, single-threaded state machine: the host
//! feeds it events (responses, indications, radio/SIM state, ownership
//! changes) and calls [`RadioCapsManager::poll`] when
//! [`RadioCapsManager::next_deadline`] expires. Nothing blocks; each entry
//! point runs to completion and returns.
//!
//! ```text
//!   state change ─▶ schedule_check ─▶ poll() ─▶ check ─▶ Registry::decide
//!                                                          │ strictly better
//!                                                          ▼
//!                                                   start_transaction
//! ```
//!
//! Slots join the registry only after their initial capability query
//! succeeds. That query is sent as a blocking request and retried on failure
//! (some modems misbehave when flooded right after boot), except for
//! "not supported" style errors which mean the modem cannot switch at all.

use std::collections::{BTreeMap, HashMap};

use quanta::{Clock, Instant};

use crate::client::{DataManager, RequestId, SlotHandles};
use crate::config::CapsConfig;
use crate::error::CapsError;
use crate::events::{CapsEvent, EventBus, Handler, HandlerId};
use crate::radio::{
    Indication, RadioCapability, RadioRequest, Reply, RequestFailure, RequestOptions, Response,
};
use crate::raf::{AccessModes, Raf};
use crate::registry::{CapabilityRecord, Registry};
use crate::request::{DataRole, RequestHandle, RequestQueue};
use crate::transaction::{TransactionState, TxPhase, TxStage};

/// Lifecycle of a slot's capability support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Initial capability query in flight (or waiting to be retried).
    Checking { attempt: u32 },
    /// In the registry.
    Supported,
    /// The modem cannot switch capabilities.
    Unsupported,
}

/// What an outstanding request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    Check { attempt: u32 },
    Query,
    Tx { tx_id: u32, kind: TxRequest },
}

/// Transaction-scoped request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxRequest {
    Deactivate { cid: i32 },
    DataOff,
    SetCaps { phase: TxPhase },
    Abort,
}

/// Radio/SIM flags, known before the slot joins the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotFlags {
    pub online: bool,
    pub sim_present: bool,
    pub imsi_known: bool,
    pub enabled: bool,
    pub techs: AccessModes,
}

pub(crate) struct Slot {
    pub handles: SlotHandles,
    pub status: SlotStatus,
    pub flags: SlotFlags,
    pub pending: HashMap<RequestId, Pending>,
    /// We hold (or are queued for) exclusive ownership of the channel.
    pub locked: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    /// Run a check on the next poll.
    pub check_idle: bool,
    /// Cooldown after an aborted switch.
    pub check_later: Option<Instant>,
    /// Initial capability query retries.
    pub check_retry: BTreeMap<usize, Instant>,
    /// Deadline for the SIM I/O and channel ownership waits.
    pub tx_wait: Option<Instant>,
}

/// Multi-slot radio capability arbiter.
pub struct RadioCapsManager {
    pub(crate) config: CapsConfig,
    pub(crate) clock: Clock,
    pub(crate) data_manager: Box<dyn DataManager>,
    pub(crate) slots: BTreeMap<usize, Slot>,
    pub(crate) registry: Registry,
    pub(crate) requests: RequestQueue,
    pub(crate) tx: TransactionState,
    pub(crate) events: EventBus,
    pub(crate) timers: Timers,
}

impl RadioCapsManager {
    pub fn new(config: CapsConfig, data_manager: Box<dyn DataManager>) -> Self {
        Self::with_clock(config, data_manager, Clock::new())
    }

    /// Use an explicit clock (e.g. `Clock::mock()` in tests).
    pub fn with_clock(
        config: CapsConfig,
        data_manager: Box<dyn DataManager>,
        clock: Clock,
    ) -> Self {
        let requests = RequestQueue::new(config.role_priority.clone());
        RadioCapsManager {
            config,
            clock,
            data_manager,
            slots: BTreeMap::new(),
            registry: Registry::new(),
            requests,
            tx: TransactionState::new(),
            events: EventBus::new(),
            timers: Timers::default(),
        }
    }

    pub fn config(&self) -> &CapsConfig {
        &self.config
    }

    // ─── Slot lifecycle ─────────────────────────────────────────────────

    /// Register a slot and send its initial capability query.
    pub fn add_slot(&mut self, slot: usize, handles: SlotHandles) -> Result<(), CapsError> {
        if self.slots.contains_key(&slot) {
            return Err(CapsError::DuplicateSlot(slot));
        }
        let cfg = self.config.slot(slot);
        self.slots.insert(
            slot,
            Slot {
                handles,
                status: SlotStatus::Checking { attempt: 0 },
                flags: SlotFlags {
                    online: false,
                    sim_present: false,
                    imsi_known: false,
                    enabled: cfg.enabled,
                    techs: cfg.techs,
                },
                pending: HashMap::new(),
                locked: false,
            },
        );
        tracing::info!(slot, techs = %cfg.techs, "slot added");
        self.send_check(slot, 0);
        Ok(())
    }

    /// Unregister a slot, cancelling anything it has in flight.
    ///
    /// If the slot takes part in a running switch, the switch is failed. Once
    /// set-capability requests have gone out it is rolled back on the
    /// remaining participants; before that it is simply dropped.
    pub fn remove_slot(&mut self, slot: usize) -> Result<(), CapsError> {
        let mut s = self.slots.remove(&slot).ok_or(CapsError::UnknownSlot(slot))?;
        for id in s.pending.keys() {
            s.handles.client.cancel_request(*id);
        }
        if s.locked {
            s.handles.client.unblock();
        }
        self.timers.check_retry.remove(&slot);
        let dropped = self.requests.remove_slot(slot);
        let record = self.registry.remove(slot);
        tracing::info!(slot, dropped_requests = dropped, "slot removed");

        if record.is_some_and(|r| r.tx_id != 0) && self.tx.participants().contains(&slot) {
            tracing::warn!(
                slot,
                tx_id = self.tx.tx_id(),
                stage = %self.tx.stage(),
                "slot removed during capability switch"
            );
            self.tx.drop_participant(slot);
            self.tx.mark_failed();
            match self.tx.stage() {
                TxStage::WaitSimIoQuiet | TxStage::WaitIoLock => self.abandon_transaction(),
                _ => self.maybe_step_done(),
            }
        }

        self.consider_requests();
        self.schedule_check();
        Ok(())
    }

    pub fn set_online(&mut self, slot: usize, online: bool) {
        let Some(s) = self.slots.get_mut(&slot) else {
            tracing::debug!(slot, "online change for unknown slot");
            return;
        };
        if s.flags.online == online {
            return;
        }
        s.flags.online = online;
        let supported = s.status == SlotStatus::Supported;
        tracing::debug!(slot, online, "radio state");
        self.sync_record(slot);
        if online && supported {
            self.send_query(slot);
        }
        self.schedule_check();
    }

    pub fn set_sim_present(&mut self, slot: usize, present: bool) {
        self.update_flags(slot, |f| f.sim_present = present);
    }

    pub fn set_imsi_known(&mut self, slot: usize, known: bool) {
        self.update_flags(slot, |f| f.imsi_known = known);
    }

    pub fn set_enabled(&mut self, slot: usize, enabled: bool) {
        self.update_flags(slot, |f| f.enabled = enabled);
    }

    /// Change the slot's technology preference.
    pub fn set_techs(&mut self, slot: usize, techs: AccessModes) {
        self.update_flags(slot, |f| f.techs = techs);
        self.consider_requests();
    }

    /// The SIM I/O state of `slot` changed.
    pub fn sim_io_changed(&mut self, slot: usize) {
        if self.tx.stage() == TxStage::WaitSimIoQuiet && self.tx.participants().contains(&slot)
        {
            self.check_sim_io();
        }
    }

    /// Ownership of `slot`'s channel changed.
    pub fn channel_owner_changed(&mut self, slot: usize) {
        if self.tx.stage() == TxStage::WaitIoLock && self.tx.participants().contains(&slot) {
            self.check_io_lock();
        }
    }

    // ─── HAL input ──────────────────────────────────────────────────────

    /// Deliver the outcome of a request previously sent on `slot`'s client.
    pub fn handle_response(&mut self, slot: usize, id: RequestId, response: Response) {
        let Some(s) = self.slots.get_mut(&slot) else {
            tracing::debug!(slot, %id, "response for unknown slot");
            return;
        };
        let Some(pending) = s.pending.remove(&id) else {
            tracing::debug!(slot, %id, "unexpected response");
            return;
        };
        match pending {
            Pending::Check { attempt } => self.on_check_response(slot, attempt, response),
            Pending::Query => self.on_query_response(slot, response),
            Pending::Tx { tx_id, kind } => self.on_tx_response(slot, tx_id, kind, response),
        }
    }

    pub fn handle_indication(&mut self, slot: usize, indication: Indication) {
        match indication {
            Indication::RadioCapability(cap) => {
                tracing::debug!(slot, cap = %cap, "capability indication");
                self.update_cap(slot, cap);
            }
        }
    }

    // ─── Requests ───────────────────────────────────────────────────────

    /// Add a standing request for `slot`. Keep the handle to drop it later.
    pub fn add_request(
        &mut self,
        slot: usize,
        modes: AccessModes,
        role: DataRole,
    ) -> RequestHandle {
        let handle = self.requests.add(slot, modes, role);
        self.consider_requests();
        handle
    }

    pub fn remove_request(&mut self, handle: RequestHandle) {
        if self.requests.remove(handle).is_some() {
            self.consider_requests();
        }
    }

    // ─── Timers ─────────────────────────────────────────────────────────

    /// Run whatever is due. Call when [`Self::next_deadline`] passes.
    pub fn poll(&mut self) {
        let now = self.clock.now();

        let due: Vec<usize> = self
            .timers
            .check_retry
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(slot, _)| *slot)
            .collect();
        for slot in due {
            self.timers.check_retry.remove(&slot);
            if let Some(SlotStatus::Checking { attempt }) = self.slots.get(&slot).map(|s| s.status)
            {
                self.send_check(slot, attempt);
            }
        }

        if self.timers.tx_wait.is_some_and(|at| at <= now) {
            self.timers.tx_wait = None;
            if matches!(self.tx.stage(), TxStage::WaitSimIoQuiet | TxStage::WaitIoLock) {
                tracing::warn!(
                    tx_id = self.tx.tx_id(),
                    stage = %self.tx.stage(),
                    "timed out waiting to start capability switch"
                );
                self.tx.mark_failed();
                self.abandon_transaction();
            }
        }

        if self.timers.check_later.is_some_and(|at| at <= now) {
            tracing::debug!("cooldown over");
            self.timers.check_later = None;
            self.timers.check_idle = true;
        }

        if self.timers.check_idle {
            self.timers.check_idle = false;
            self.check();
        }
    }

    /// Earliest instant at which [`Self::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let idle = self.timers.check_idle.then(|| self.clock.now());
        [idle, self.timers.check_later, self.timers.tx_wait]
            .into_iter()
            .flatten()
            .chain(self.timers.check_retry.values().copied())
            .min()
    }

    // ─── Observers ──────────────────────────────────────────────────────

    pub fn subscribe(&mut self, handler: Handler) -> HandlerId {
        self.events.subscribe(handler)
    }

    pub fn add_raf_changed_handler(&mut self, slot: usize, handler: Handler) -> HandlerId {
        self.events.subscribe_raf_changed(slot, handler)
    }

    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        self.events.unsubscribe(id)
    }

    // ─── Introspection ──────────────────────────────────────────────────

    pub fn record(&self, slot: usize) -> Option<&CapabilityRecord> {
        self.registry.get(slot)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn slots(&self) -> Vec<usize> {
        self.slots.keys().copied().collect()
    }

    pub fn slot_status(&self, slot: usize) -> Option<SlotStatus> {
        self.slots.get(&slot).map(|s| s.status)
    }

    pub fn slot_raf(&self, slot: usize) -> Option<Raf> {
        self.registry.get(slot).map(|r| r.cap.raf)
    }

    pub fn is_supported(&self, slot: usize) -> bool {
        self.slot_status(slot) == Some(SlotStatus::Supported)
    }

    pub fn stage(&self) -> TxStage {
        self.tx.stage()
    }

    pub fn tx_id(&self) -> u32 {
        self.tx.tx_id()
    }

    /// A capability switch is in progress.
    pub fn is_busy(&self) -> bool {
        !self.tx.is_idle()
    }

    pub fn tx_failed(&self) -> bool {
        self.tx.failed()
    }

    pub fn requests(&self) -> &RequestQueue {
        &self.requests
    }

    // ─── Internal ───────────────────────────────────────────────────────

    /// Debounced arbitration request, run from the next poll.
    pub(crate) fn schedule_check(&mut self) {
        if self.timers.check_later.is_some() {
            tracing::trace!("check deferred by cooldown");
            return;
        }
        self.timers.check_idle = true;
    }

    pub(crate) fn recheck_later(&mut self) {
        let at = self.clock.now() + self.config.recheck_cooldown;
        tracing::debug!(cooldown = ?self.config.recheck_cooldown, "recheck scheduled");
        self.timers.check_idle = false;
        self.timers.check_later = Some(at);
    }

    fn check(&mut self) {
        if !self.tx.is_idle() {
            tracing::debug!(tx_id = self.tx.tx_id(), "switch in progress, check skipped");
            return;
        }
        if !self.registry.ready() {
            return;
        }
        let Some(decision) = self.registry.decide() else {
            return;
        };
        tracing::debug!(
            best = %crate::permutation::order_str(&decision.order),
            score = decision.score,
            current = decision.current_score,
            "arbitration"
        );
        if decision.is_switch() {
            self.start_transaction(&decision.order);
        }
    }

    fn update_flags<F: FnOnce(&mut SlotFlags)>(&mut self, slot: usize, f: F) {
        let Some(s) = self.slots.get_mut(&slot) else {
            tracing::debug!(slot, "state change for unknown slot");
            return;
        };
        let before = s.flags;
        f(&mut s.flags);
        if s.flags != before {
            self.sync_record(slot);
            self.schedule_check();
        }
    }

    /// Copy slot flags into the registry record, if the slot has one.
    fn sync_record(&mut self, slot: usize) {
        let Some(flags) = self.slots.get(&slot).map(|s| s.flags) else {
            return;
        };
        if let Some(record) = self.registry.get_mut(slot) {
            record.online = flags.online;
            record.sim_present = flags.sim_present;
            record.imsi_known = flags.imsi_known;
            record.enabled = flags.enabled;
            record.techs = flags.techs;
        }
    }

    /// Re-derive every record's `requested_modes` from the active request.
    pub(crate) fn consider_requests(&mut self) {
        let mut changed = false;
        for record in self.registry.records_mut() {
            let modes = self
                .requests
                .requested_modes(record.slot_index, record.techs);
            if record.requested_modes != modes {
                tracing::debug!(
                    slot = record.slot_index,
                    from = %record.requested_modes,
                    to = %modes,
                    "requested modes"
                );
                record.requested_modes = modes;
                changed = true;
            }
        }
        if changed {
            self.schedule_check();
        }
    }

    fn send_check(&mut self, slot: usize, attempt: u32) {
        let options = RequestOptions {
            blocking: true,
            timeout: Some(self.config.check_timeout),
        };
        let Some(s) = self.slots.get_mut(&slot) else {
            return;
        };
        s.status = SlotStatus::Checking { attempt };
        match s
            .handles
            .client
            .send_request(RadioRequest::GetRadioCapability, options)
        {
            Ok(id) => {
                tracing::debug!(slot, attempt, %id, "capability check");
                s.pending.insert(id, Pending::Check { attempt });
            }
            Err(e) => self.retry_check(slot, attempt, e.into()),
        }
    }

    fn on_check_response(&mut self, slot: usize, attempt: u32, response: Response) {
        match response {
            Ok(Reply::Capability(cap)) => self.join_registry(slot, cap),
            Ok(Reply::Empty) => {
                tracing::info!(slot, "no radio capability reported");
                self.mark_unsupported(slot);
            }
            Err(RequestFailure::Radio(e)) if e.is_unsupported() => {
                tracing::info!(slot, error = %e, "capability switching not supported");
                self.mark_unsupported(slot);
            }
            Err(failure) => self.retry_check(slot, attempt, failure),
        }
    }

    fn retry_check(&mut self, slot: usize, attempt: u32, failure: RequestFailure) {
        if attempt >= self.config.check_retry_limit {
            tracing::warn!(slot, attempts = attempt + 1, error = %failure, "capability check failed");
            self.mark_unsupported(slot);
            return;
        }
        let Some(s) = self.slots.get_mut(&slot) else {
            return;
        };
        s.status = SlotStatus::Checking {
            attempt: attempt + 1,
        };
        let at = self.clock.now() + self.config.check_retry_delay;
        tracing::debug!(slot, attempt, error = %failure, "capability check will be retried");
        self.timers.check_retry.insert(slot, at);
    }

    fn mark_unsupported(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(&slot) {
            s.status = SlotStatus::Unsupported;
            self.events.emit(&CapsEvent::CapsUnsupported { slot });
        }
    }

    fn join_registry(&mut self, slot: usize, cap: RadioCapability) {
        let Some(s) = self.slots.get_mut(&slot) else {
            return;
        };
        s.status = SlotStatus::Supported;
        let flags = s.flags;
        tracing::info!(slot, cap = %cap, "radio capability");
        let mut record = CapabilityRecord::new(slot, cap, flags.techs);
        record.online = flags.online;
        record.sim_present = flags.sim_present;
        record.imsi_known = flags.imsi_known;
        record.enabled = flags.enabled;
        self.registry.insert(record);
        self.consider_requests();
        self.schedule_check();
    }

    fn send_query(&mut self, slot: usize) {
        let options = RequestOptions {
            blocking: false,
            timeout: Some(self.config.check_timeout),
        };
        let Some(s) = self.slots.get_mut(&slot) else {
            return;
        };
        match s
            .handles
            .client
            .send_request(RadioRequest::GetRadioCapability, options)
        {
            Ok(id) => {
                s.pending.insert(id, Pending::Query);
            }
            Err(e) => tracing::debug!(slot, error = %e, "capability query not sent"),
        }
    }

    fn on_query_response(&mut self, slot: usize, response: Response) {
        match response {
            Ok(Reply::Capability(cap)) => self.update_cap(slot, cap),
            Ok(Reply::Empty) => {}
            Err(e) => tracing::debug!(slot, error = %e, "capability query failed"),
        }
    }

    /// Apply a capability reported outside of a switch.
    fn update_cap(&mut self, slot: usize, cap: RadioCapability) {
        let tx_id = self.tx.tx_id();
        let busy = !self.tx.is_idle();
        let Some(record) = self.registry.get_mut(slot) else {
            return;
        };
        if busy && record.tx_id == tx_id {
            tracing::debug!(slot, tx_id, "capability report during switch ignored");
            return;
        }
        if record.cap.same_assignment(&cap) {
            return;
        }
        let raf_changed = record.cap.raf != cap.raf;
        record.cap = RadioCapability::new(cap.raf, cap.logical_modem_uuid);
        let raf = record.cap.raf;
        if raf_changed {
            self.events.emit(&CapsEvent::RafChanged { slot, raf });
        }
        self.schedule_check();
    }
}

impl Drop for RadioCapsManager {
    fn drop(&mut self) {
        if !self.tx.is_idle() {
            tracing::error!(
                tx_id = self.tx.tx_id(),
                stage = %self.tx.stage(),
                "radio caps manager dropped during capability switch"
            );
        }
        for s in self.slots.values_mut() {
            for id in s.pending.keys() {
                s.handles.client.cancel_request(*id);
            }
            s.pending.clear();
            if s.locked {
                s.handles.client.unblock();
                s.locked = false;
            }
        }
    }
}

impl std::fmt::Debug for RadioCapsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioCapsManager")
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("tx_id", &self.tx.tx_id())
            .field("stage", &self.tx.stage())
            .finish()
    }
}
