//! # Transaction Coordinator
//!
//! Drives one capability switch across every slot whose assignment changes.
//!
//! ## Steps
//!
//! 1. **WaitSimIoQuiet** until no participant has SIM I/O in flight; some
//!    modems mishandle a capability switch racing a SIM transaction.
//! 2. **WaitIoLock** until every participant channel is exclusively ours.
//! 3. **DeactivatingCalls**: tear down every active data call.
//! 4. **DataOff**: disallow data, unless the data manager applies it
//!    implicitly.
//! 5. **START → APPLY → FINISH** set-capability requests. A phase is issued
//!    only after every request of the previous step has come back.
//! 6. **Aborting**: once anything fails, the step drains and every
//!    participant gets FINISH/FAIL under a fresh transaction id.
//!
//! A switch that fails during steps 1 or 2 has sent nothing yet. It is
//! dropped without the FINISH/FAIL round.
//!
//! Each step's requests are counted per slot in `tx_pending`; the step ends
//! when the total drops to zero, whatever the individual outcomes.

use crate::client::BlockStatus;
use crate::events::CapsEvent;
use crate::manager::{Pending, RadioCapsManager, TxRequest};
use crate::radio::{
    CapabilityStatus, DeactivateReason, RadioCapability, RadioRequest, Reply, RequestOptions,
    Response,
};
use crate::transaction::{PhaseRequest, TxPhase, TxStage, ABORT_REQUEST};

impl RadioCapsManager {
    /// Begin switching to `order` (see [`crate::permutation`]).
    pub(crate) fn start_transaction(&mut self, order: &[usize]) {
        let tx_id = self.tx.next_transaction();
        let caps: Vec<RadioCapability> = self
            .registry
            .records()
            .iter()
            .map(|r| r.cap.clone())
            .collect();

        let mut participants = Vec::new();
        for (record, &src) in self.registry.records_mut().iter_mut().zip(order) {
            record.clear_tx();
            let new_cap = caps[src].clone();
            if !record.cap.same_assignment(&new_cap) {
                tracing::debug!(
                    slot = record.slot_index,
                    from = %record.cap,
                    to = %new_cap,
                    "switch participant"
                );
                record.old_cap = Some(record.cap.clone());
                record.new_cap = Some(new_cap);
                record.tx_id = tx_id;
                participants.push(record.slot_index);
            }
        }

        if participants.is_empty() {
            tracing::warn!(tx_id, "capability switch has no participants, skipped");
            return;
        }

        tracing::info!(
            tx_id,
            order = %crate::permutation::order_str(order),
            participants = ?participants,
            "starting capability switch"
        );
        self.tx.begin(participants);
        self.tx.set_stage(TxStage::WaitSimIoQuiet);
        self.timers.tx_wait = Some(self.clock.now() + self.config.wait_timeout);
        self.check_sim_io();
    }

    pub(crate) fn check_sim_io(&mut self) {
        let busy: Vec<usize> = self
            .tx
            .participants()
            .iter()
            .copied()
            .filter(|slot| {
                self.slots
                    .get(slot)
                    .is_some_and(|s| s.handles.sim.sim_io_active())
            })
            .collect();
        if busy.is_empty() {
            self.lock_io();
        } else {
            tracing::debug!(tx_id = self.tx.tx_id(), slots = ?busy, "waiting for SIM I/O to finish");
        }
    }

    fn lock_io(&mut self) {
        self.tx.set_stage(TxStage::WaitIoLock);
        for slot in self.tx.participants().to_vec() {
            if let Some(s) = self.slots.get_mut(&slot) {
                let status = s.handles.client.block();
                s.locked = true;
                tracing::debug!(slot, ?status, "channel block");
            }
        }
        self.check_io_lock();
    }

    pub(crate) fn check_io_lock(&mut self) {
        let all_owned = self.tx.participants().iter().all(|slot| {
            self.slots.get(slot).is_some_and(|s| {
                s.handles.client.block_status() == BlockStatus::Acquired
            })
        });
        if all_owned {
            self.deactivate_data_calls();
        } else {
            tracing::debug!(tx_id = self.tx.tx_id(), "waiting for channel ownership");
        }
    }

    fn deactivate_data_calls(&mut self) {
        self.timers.tx_wait = None;
        self.tx.set_stage(TxStage::DeactivatingCalls);
        for slot in self.tx.participants().to_vec() {
            let calls = match self.slots.get(&slot) {
                Some(s) => s.handles.data.active_calls(),
                None => continue,
            };
            for call in calls.into_iter().filter(|c| c.active) {
                tracing::debug!(slot, cid = call.cid, "deactivating data call");
                self.submit(
                    slot,
                    TxRequest::Deactivate { cid: call.cid },
                    RadioRequest::DeactivateDataCall {
                        cid: call.cid,
                        reason: DeactivateReason::None,
                    },
                );
            }
        }
        self.maybe_step_done();
    }

    fn data_off(&mut self) {
        self.tx.set_stage(TxStage::DataOff);
        if self.data_manager.need_set_data_allowed() {
            for slot in self.tx.participants().to_vec() {
                self.submit(slot, TxRequest::DataOff, RadioRequest::SetDataAllowed(false));
            }
        }
        self.maybe_step_done();
    }

    fn issue_phase(&mut self, phase: TxPhase) {
        self.tx.set_stage(TxStage::Phase(phase));
        tracing::debug!(tx_id = self.tx.tx_id(), phase = phase.request().name, "phase");
        self.issue_set_caps(phase.request(), TxRequest::SetCaps { phase });
    }

    /// Fail a switch that is still waiting for SIM I/O or channel ownership.
    /// No set-capability request has gone out, so there is nothing to roll
    /// back on the modem side.
    pub(crate) fn abandon_transaction(&mut self) {
        tracing::warn!(
            tx_id = self.tx.tx_id(),
            stage = %self.tx.stage(),
            "capability switch abandoned before any request was sent"
        );
        self.timers.tx_wait = None;
        self.finish_aborted();
    }

    pub(crate) fn abort_transaction(&mut self) {
        let prev = self.tx.tx_id();
        let tx_id = self.tx.retire_for_abort();
        tracing::warn!(prev_tx_id = prev, tx_id, "aborting capability switch");
        for slot in self.tx.participants().to_vec() {
            if let Some(record) = self.registry.get_mut(slot) {
                record.tx_id = tx_id;
            }
        }
        self.timers.tx_wait = None;
        self.tx.set_stage(TxStage::Aborting);
        self.issue_set_caps(ABORT_REQUEST, TxRequest::Abort);
    }

    fn issue_set_caps(&mut self, request: PhaseRequest, kind: TxRequest) {
        let tx_id = self.tx.tx_id();
        for slot in self.tx.participants().to_vec() {
            let Some(record) = self.registry.get(slot) else {
                continue;
            };
            let source = if request.send_new_cap {
                record.new_cap.as_ref()
            } else {
                record.old_cap.as_ref()
            };
            let Some(source) = source else {
                tracing::error!(slot, tx_id, "participant without capability snapshot");
                self.tx.mark_failed();
                continue;
            };
            let cap = RadioCapability {
                session: tx_id,
                phase: request.phase,
                raf: source.raf,
                logical_modem_uuid: source.logical_modem_uuid.clone(),
                status: request.status,
            };
            tracing::debug!(slot, tx_id, phase = request.name, cap = %cap, "setRadioCapability");
            self.submit(slot, kind, RadioRequest::SetRadioCapability(cap));
        }
        self.maybe_step_done();
    }

    /// Send one transaction request. A send error counts as an immediately
    /// completed, failed request.
    fn submit(&mut self, slot: usize, kind: TxRequest, request: RadioRequest) {
        let tx_id = self.tx.tx_id();
        let options = RequestOptions {
            blocking: false,
            timeout: Some(self.config.request_timeout),
        };
        let Some(s) = self.slots.get_mut(&slot) else {
            self.tx.mark_failed();
            return;
        };
        let name = request.name();
        match s.handles.client.send_request(request, options) {
            Ok(id) => {
                s.pending.insert(id, Pending::Tx { tx_id, kind });
                if let Some(record) = self.registry.get_mut(slot) {
                    record.tx_pending += 1;
                }
            }
            Err(e) => {
                tracing::warn!(slot, tx_id, request = name, error = %e, "request not sent");
                self.tx.mark_failed();
            }
        }
    }

    pub(crate) fn on_tx_response(
        &mut self,
        slot: usize,
        tx_id: u32,
        kind: TxRequest,
        response: Response,
    ) {
        if tx_id != self.tx.tx_id() || self.tx.is_idle() {
            tracing::debug!(slot, tx_id, "response for retired transaction");
            return;
        }
        if let Some(record) = self.registry.get_mut(slot) {
            record.tx_pending = record.tx_pending.saturating_sub(1);
        }

        let ok = match (&kind, &response) {
            (_, Err(e)) => {
                tracing::warn!(slot, tx_id, ?kind, error = %e, "transaction request failed");
                false
            }
            (TxRequest::SetCaps { .. }, Ok(Reply::Capability(cap)))
                if cap.status == CapabilityStatus::Fail =>
            {
                tracing::warn!(slot, tx_id, ?kind, "modem reported capability failure");
                false
            }
            _ => true,
        };
        if !ok && kind != TxRequest::Abort {
            self.tx.mark_failed();
        }
        self.maybe_step_done();
    }

    fn pending_total(&self) -> usize {
        self.tx
            .participants()
            .iter()
            .filter_map(|slot| self.registry.get(*slot))
            .map(|r| r.tx_pending)
            .sum()
    }

    /// Advance once the current step has fully drained.
    pub(crate) fn maybe_step_done(&mut self) {
        if self.pending_total() > 0 {
            return;
        }
        let failed = self.tx.failed();
        match self.tx.stage() {
            TxStage::Idle | TxStage::WaitSimIoQuiet | TxStage::WaitIoLock => {}
            TxStage::Aborting => self.finish_aborted(),
            _ if failed => self.abort_transaction(),
            TxStage::DeactivatingCalls => self.data_off(),
            TxStage::DataOff => self.issue_phase(TxPhase::Start),
            TxStage::Phase(phase) => match phase.next() {
                Some(next) => self.issue_phase(next),
                None => self.finish_done(),
            },
        }
    }

    /// FINISH came back clean everywhere: commit and notify.
    fn finish_done(&mut self) {
        let tx_id = self.tx.tx_id();
        let participants = self.tx.participants().to_vec();

        let mut changed = Vec::new();
        for &slot in &participants {
            let Some(record) = self.registry.get_mut(slot) else {
                continue;
            };
            if let Some(new_cap) = record.new_cap.take() {
                let old_raf = record.cap.raf;
                record.cap = RadioCapability::new(new_cap.raf, new_cap.logical_modem_uuid);
                if record.cap.raf != old_raf {
                    changed.push((slot, record.cap.raf));
                }
            }
            record.clear_tx();
        }
        tracing::info!(tx_id, "capability switch done");

        for (slot, raf) in changed {
            self.events.emit(&CapsEvent::RafChanged { slot, raf });
        }
        self.data_manager.assert_data_on();
        self.release_channels(&participants);
        self.tx.finish();
        self.events.emit(&CapsEvent::TxDone { tx_id });
        self.schedule_check();
    }

    /// Every FINISH/FAIL came back: restore and back off.
    fn finish_aborted(&mut self) {
        let tx_id = self.tx.tx_id();
        let participants = self.tx.participants().to_vec();
        for &slot in &participants {
            if let Some(record) = self.registry.get_mut(slot) {
                record.clear_tx();
            }
        }
        tracing::warn!(tx_id, "capability switch aborted");
        self.data_manager.assert_data_on();
        self.release_channels(&participants);
        self.tx.finish();
        self.events.emit(&CapsEvent::TxAborted { tx_id });
        self.recheck_later();
    }

    fn release_channels(&mut self, participants: &[usize]) {
        for slot in participants {
            if let Some(s) = self.slots.get_mut(slot) {
                if s.locked {
                    s.handles.client.unblock();
                    s.locked = false;
                }
            }
        }
    }
}
