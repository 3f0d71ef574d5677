//! # Scripted harness
//!
//! Wraps a [`RadioCapsManager`] wired to mock collaborators and a mock clock,
//! and plays the HAL: it answers outstanding requests the way a modem would,
//! unless a [`ResponsePolicy`] says to fail or hold them.
//!
//! ```text
//!   settle():  loop {
//!                poll() if a deadline is due
//!                answer every outstanding request not held
//!              } until nothing changes
//! ```
//!
//! Simulated time only moves through [`Harness::advance`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use quanta::{Clock, Mock};
use serde::{Deserialize, Serialize};

use radiocaps::client::SlotHandles;
use radiocaps::config::CapsConfig;
use radiocaps::error::CapsError;
use radiocaps::events::CapsEvent;
use radiocaps::manager::RadioCapsManager;
use radiocaps::radio::{
    CapabilityPhase, CapabilityStatus, RadioCapability, RadioError, RadioRequest, Reply,
    RequestFailure, Response, TransportError,
};
use radiocaps::raf::AccessModes;
use radiocaps::request::{DataRole, RequestHandle};

use crate::mock::{MockDataManager, MockHal, MockSim, MockSlotData, SentRequest};

/// Upper bound on `settle` rounds; a run that needs more is looping.
const MAX_SETTLE_ROUNDS: usize = 10_000;

// ─── Request classification ─────────────────────────────────────────────

/// Request classes a [`ResponsePolicy`] can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    GetCapability,
    Start,
    Apply,
    Finish,
    /// FINISH with status FAIL.
    Abort,
    Deactivate,
    DataOff,
    AllowedTypes,
}

impl RequestKind {
    pub fn of(request: &RadioRequest) -> RequestKind {
        match request {
            RadioRequest::GetRadioCapability => RequestKind::GetCapability,
            RadioRequest::SetRadioCapability(cap) => match (cap.phase, cap.status) {
                (CapabilityPhase::Start, _) => RequestKind::Start,
                (CapabilityPhase::Apply, _) => RequestKind::Apply,
                (_, CapabilityStatus::Fail) => RequestKind::Abort,
                _ => RequestKind::Finish,
            },
            RadioRequest::DeactivateDataCall { .. } => RequestKind::Deactivate,
            RadioRequest::SetDataAllowed(_) => RequestKind::DataOff,
            RadioRequest::SetAllowedNetworkTypes(_) => RequestKind::AllowedTypes,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::GetCapability => "get_capability",
            RequestKind::Start => "start",
            RequestKind::Apply => "apply",
            RequestKind::Finish => "finish",
            RequestKind::Abort => "abort",
            RequestKind::Deactivate => "deactivate",
            RequestKind::DataOff => "data_off",
            RequestKind::AllowedTypes => "allowed_types",
        };
        f.write_str(name)
    }
}

/// Parse a failure name as used in scenario files.
pub fn parse_failure(name: &str) -> Option<RequestFailure> {
    let failure: RequestFailure = match name.to_ascii_lowercase().as_str() {
        "timeout" => TransportError::Timeout.into(),
        "disconnected" => TransportError::Disconnected.into(),
        "malformed" => TransportError::Malformed.into(),
        "radio_not_available" => RadioError::RadioNotAvailable.into(),
        "generic_failure" => RadioError::GenericFailure.into(),
        "request_not_supported" => RadioError::RequestNotSupported.into(),
        "operation_not_allowed" => RadioError::OperationNotAllowed.into(),
        "invalid_arguments" => RadioError::InvalidArguments.into(),
        "internal_err" => RadioError::InternalErr.into(),
        other => RadioError::Other(i32::from_str(other).ok()?).into(),
    };
    Some(failure)
}

// ─── Response policy ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Failure {
    error: RequestFailure,
    /// Remaining failures; `None` fails forever.
    remaining: Option<u32>,
}

/// Which requests the mock HAL fails or sits on.
#[derive(Debug, Clone, Default)]
pub struct ResponsePolicy {
    failures: HashMap<(usize, RequestKind), Failure>,
    holds: Vec<(usize, RequestKind)>,
    /// Set-capability requests answered with status FAIL.
    rejects: Vec<(usize, RequestKind)>,
}

impl ResponsePolicy {
    /// Fail every `kind` request on `slot`.
    pub fn fail(&mut self, slot: usize, kind: RequestKind, error: RequestFailure) {
        self.failures.insert(
            (slot, kind),
            Failure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` `kind` requests on `slot`.
    pub fn fail_times(&mut self, slot: usize, kind: RequestKind, error: RequestFailure, times: u32) {
        self.failures.insert(
            (slot, kind),
            Failure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Leave `kind` requests on `slot` unanswered until released.
    pub fn hold(&mut self, slot: usize, kind: RequestKind) {
        if !self.holds.contains(&(slot, kind)) {
            self.holds.push((slot, kind));
        }
    }

    /// Answer `kind` set-capability requests on `slot` with a capability
    /// carrying status FAIL instead of an error.
    pub fn reject(&mut self, slot: usize, kind: RequestKind) {
        if !self.rejects.contains(&(slot, kind)) {
            self.rejects.push((slot, kind));
        }
    }

    pub fn release(&mut self, slot: usize, kind: RequestKind) {
        self.holds.retain(|h| *h != (slot, kind));
    }

    pub fn clear(&mut self) {
        self.failures.clear();
        self.holds.clear();
        self.rejects.clear();
    }

    pub fn holds(&self, request: &SentRequest) -> bool {
        self.holds
            .contains(&(request.slot, RequestKind::of(&request.request)))
    }

    fn rejects(&self, request: &SentRequest) -> bool {
        self.rejects
            .contains(&(request.slot, RequestKind::of(&request.request)))
    }

    /// Consume one scripted failure for `request`, if any.
    fn take_failure(&mut self, request: &SentRequest) -> Option<RequestFailure> {
        let key = (request.slot, RequestKind::of(&request.request));
        let failure = self.failures.get_mut(&key)?;
        let error = failure.error;
        match failure.remaining {
            None => Some(error),
            Some(n) if n <= 1 => {
                self.failures.remove(&key);
                (n == 1).then_some(error)
            }
            Some(n) => {
                failure.remaining = Some(n - 1);
                Some(error)
            }
        }
    }
}

// ─── Harness ────────────────────────────────────────────────────────────

struct SlotMocks {
    sim: MockSim,
    data: MockSlotData,
}

pub struct Harness {
    manager: RadioCapsManager,
    hal: MockHal,
    slots: BTreeMap<usize, SlotMocks>,
    data_manager: MockDataManager,
    clock: Clock,
    mock_clock: Arc<Mock>,
    policy: ResponsePolicy,
    event_rx: Receiver<CapsEvent>,
    events: Vec<CapsEvent>,
}

impl Harness {
    pub fn new(config: CapsConfig) -> Self {
        let (clock, mock_clock) = Clock::mock();
        let data_manager = MockDataManager::default();
        let mut manager =
            RadioCapsManager::with_clock(config, Box::new(data_manager.clone()), clock.clone());

        let (tx, event_rx): (Sender<CapsEvent>, Receiver<CapsEvent>) =
            crossbeam_channel::unbounded();
        manager.subscribe(Box::new(move |event: &CapsEvent| {
            let _ = tx.send(event.clone());
        }));

        Harness {
            manager,
            hal: MockHal::new(),
            slots: BTreeMap::new(),
            data_manager,
            clock,
            mock_clock,
            policy: ResponsePolicy::default(),
            event_rx,
            events: Vec::new(),
        }
    }

    /// Add a slot whose modem runs `cap` (`None` reports no capability).
    pub fn add_slot(&mut self, slot: usize, cap: Option<RadioCapability>) -> Result<(), CapsError> {
        if self.slots.contains_key(&slot) {
            return Err(CapsError::DuplicateSlot(slot));
        }
        self.hal.set_modem_cap(slot, cap);
        let sim = MockSim::default();
        let data = MockSlotData::default();
        let handles = SlotHandles {
            client: Box::new(self.hal.radio(slot)),
            data: Box::new(data.clone()),
            sim: Box::new(sim.clone()),
        };
        self.manager.add_slot(slot, handles)?;
        self.slots.insert(slot, SlotMocks { sim, data });
        Ok(())
    }

    pub fn remove_slot(&mut self, slot: usize) -> Result<(), CapsError> {
        self.manager.remove_slot(slot)?;
        self.slots.remove(&slot);
        self.collect_events();
        Ok(())
    }

    /// Online, SIM inserted, IMSI known.
    pub fn bring_up(&mut self, slot: usize) {
        self.manager.set_online(slot, true);
        self.manager.set_sim_present(slot, true);
        self.manager.set_imsi_known(slot, true);
    }

    pub fn add_request(&mut self, slot: usize, modes: AccessModes, role: DataRole) -> RequestHandle {
        self.manager.add_request(slot, modes, role)
    }

    pub fn manager(&self) -> &RadioCapsManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut RadioCapsManager {
        &mut self.manager
    }

    pub fn hal(&self) -> &MockHal {
        &self.hal
    }

    pub fn data_manager(&self) -> &MockDataManager {
        &self.data_manager
    }

    pub fn policy_mut(&mut self) -> &mut ResponsePolicy {
        &mut self.policy
    }

    pub fn slot_data(&self, slot: usize) -> Option<&MockSlotData> {
        self.slots.get(&slot).map(|s| &s.data)
    }

    pub fn now(&self) -> quanta::Instant {
        self.clock.now()
    }

    /// Flip SIM I/O on `slot` and tell the manager.
    pub fn set_sim_io(&mut self, slot: usize, active: bool) {
        if let Some(s) = self.slots.get(&slot) {
            s.sim.set_io_active(active);
            self.manager.sim_io_changed(slot);
        }
    }

    /// Hand a queued channel to the manager.
    pub fn grant_channel(&mut self, slot: usize) {
        if self.hal.grant(slot) {
            self.manager.channel_owner_changed(slot);
        }
    }

    /// Move simulated time forward and run whatever fell due.
    pub fn advance(&mut self, by: Duration) {
        self.mock_clock.increment(by);
        self.poll_due();
    }

    /// Poll the manager if a deadline has passed. Returns true if it did.
    pub fn poll_due(&mut self) -> bool {
        let due = self
            .manager
            .next_deadline()
            .is_some_and(|at| at <= self.clock.now());
        if due {
            self.manager.poll();
            self.collect_events();
        }
        due
    }

    /// Answer every outstanding request that is not held, once. Returns the
    /// number of responses delivered.
    pub fn step(&mut self) -> usize {
        let policy = &self.policy;
        let batch = self.hal.take_outstanding(|r| policy.holds(r));
        let n = batch.len();
        for sent in batch {
            self.deliver(sent);
        }
        n
    }

    /// Run until no deadline is due and nothing answerable is outstanding.
    pub fn settle(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_SETTLE_ROUNDS {
            let polled = self.poll_due();
            let answered = self.step();
            delivered += answered;
            if !polled && answered == 0 {
                return delivered;
            }
        }
        tracing::warn!(rounds = MAX_SETTLE_ROUNDS, "settle did not converge");
        delivered
    }

    /// Answer one request with the mock modem's reply (or a scripted one).
    pub fn deliver(&mut self, sent: SentRequest) {
        let response = self.respond(&sent);
        tracing::trace!(slot = sent.slot, id = %sent.id, ok = response.is_ok(), "hal ->");
        self.manager.handle_response(sent.slot, sent.id, response);
        self.collect_events();
    }

    /// Events seen so far, oldest first.
    pub fn events(&mut self) -> &[CapsEvent] {
        self.collect_events();
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<CapsEvent> {
        self.collect_events();
        std::mem::take(&mut self.events)
    }

    fn collect_events(&mut self) {
        self.events.extend(self.event_rx.try_iter());
    }

    fn respond(&mut self, sent: &SentRequest) -> Response {
        if let Some(error) = self.policy.take_failure(sent) {
            return Err(error);
        }
        match &sent.request {
            RadioRequest::GetRadioCapability => Ok(match self.hal.modem_cap(sent.slot) {
                Some(cap) => Reply::Capability(cap),
                None => Reply::Empty,
            }),
            RadioRequest::SetRadioCapability(cap) => {
                let mut reply = cap.clone();
                if self.policy.rejects(sent) {
                    reply.status = CapabilityStatus::Fail;
                } else if cap.phase == CapabilityPhase::Finish {
                    // FINISH commits (or, with FAIL, restores) the assignment.
                    self.hal.set_modem_cap(
                        sent.slot,
                        Some(RadioCapability::new(cap.raf, cap.logical_modem_uuid.clone())),
                    );
                } else {
                    reply.status = CapabilityStatus::Success;
                }
                Ok(Reply::Capability(reply))
            }
            RadioRequest::DeactivateDataCall { cid, .. } => {
                if let Some(s) = self.slots.get(&sent.slot) {
                    s.data.remove_call(*cid);
                }
                Ok(Reply::Empty)
            }
            RadioRequest::SetDataAllowed(_) | RadioRequest::SetAllowedNetworkTypes(_) => {
                Ok(Reply::Empty)
            }
        }
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("manager", &self.manager)
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiocaps::radio::RequestOptions;
    use radiocaps::raf::Raf;
    use radiocaps::client::RequestId;

    fn sent(slot: usize, request: RadioRequest) -> SentRequest {
        SentRequest {
            slot,
            id: RequestId(1),
            request,
            options: RequestOptions::default(),
        }
    }

    #[test]
    fn classifies_phases() {
        let mut cap = RadioCapability::new(Raf::LTE, "m");
        cap.phase = CapabilityPhase::Finish;
        cap.status = CapabilityStatus::Success;
        assert_eq!(
            RequestKind::of(&RadioRequest::SetRadioCapability(cap.clone())),
            RequestKind::Finish
        );
        cap.status = CapabilityStatus::Fail;
        assert_eq!(
            RequestKind::of(&RadioRequest::SetRadioCapability(cap)),
            RequestKind::Abort
        );
        assert_eq!(
            RequestKind::of(&RadioRequest::SetDataAllowed(false)),
            RequestKind::DataOff
        );
    }

    #[test]
    fn fail_times_runs_out() {
        let mut policy = ResponsePolicy::default();
        let req = sent(0, RadioRequest::GetRadioCapability);
        policy.fail_times(0, RequestKind::GetCapability, TransportError::Timeout.into(), 2);
        assert!(policy.take_failure(&req).is_some());
        assert!(policy.take_failure(&req).is_some());
        assert!(policy.take_failure(&req).is_none());
        assert!(policy.take_failure(&sent(1, RadioRequest::GetRadioCapability)).is_none());
    }

    #[test]
    fn parses_failure_names() {
        assert_eq!(
            parse_failure("GENERIC_FAILURE"),
            Some(RadioError::GenericFailure.into())
        );
        assert_eq!(parse_failure("timeout"), Some(TransportError::Timeout.into()));
        assert_eq!(parse_failure("38"), Some(RadioError::Other(38).into()));
        assert_eq!(parse_failure("bogus"), None);
    }
}
