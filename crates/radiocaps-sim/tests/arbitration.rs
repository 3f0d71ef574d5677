//! End-to-end capability switches against the mock HAL.
//!
//! Every test drives a real `RadioCapsManager` through the harness: the
//! harness answers requests the way a modem would, and a `ResponsePolicy`
//! injects failures or holds requests back.

use std::time::Duration;

use radiocaps::client::BlockStatus;
use radiocaps::config::CapsConfig;
use radiocaps::events::CapsEvent;
use radiocaps::manager::SlotStatus;
use radiocaps::network::NetworkModeSelector;
use radiocaps::radio::{
    CapabilityPhase, CapabilityStatus, DataCall, Indication, RadioCapability, RadioError,
    RadioRequest, TransportError,
};
use radiocaps::raf::{AccessModes, Raf};
use radiocaps::registry::CapabilityRecord;
use radiocaps::request::DataRole;
use radiocaps::transaction::{TxPhase, TxStage};
use radiocaps_sim::{Harness, RequestKind};

// ─── Helpers ────────────────────────────────────────────────────────────

fn gu() -> RadioCapability {
    RadioCapability::new(AccessModes::up_to(AccessModes::UMTS).to_raf(), "modem0")
}

fn gul() -> RadioCapability {
    RadioCapability::new(AccessModes::up_to(AccessModes::LTE).to_raf(), "modem1")
}

/// Slot 0 on the GSM/UMTS modem, slot 1 on the LTE modem, both usable.
fn two_slots() -> Harness {
    let mut h = Harness::new(CapsConfig::default());
    h.add_slot(0, Some(gu())).unwrap();
    h.add_slot(1, Some(gul())).unwrap();
    h.bring_up(0);
    h.bring_up(1);
    h
}

/// Every set-capability request sent so far, as (slot, capability).
fn set_caps(h: &Harness) -> Vec<(usize, RadioCapability)> {
    h.hal()
        .log()
        .into_iter()
        .filter_map(|sent| match sent.request {
            RadioRequest::SetRadioCapability(cap) => Some((sent.slot, cap)),
            _ => None,
        })
        .collect()
}

fn count(h: &Harness, kind: RequestKind) -> usize {
    h.hal()
        .log()
        .iter()
        .filter(|sent| RequestKind::of(&sent.request) == kind)
        .count()
}

fn raf_changed(h: &mut Harness) -> Vec<(usize, Raf)> {
    h.events()
        .iter()
        .filter_map(|e| match e {
            CapsEvent::RafChanged { slot, raf } => Some((*slot, *raf)),
            _ => None,
        })
        .collect()
}

// ─── Straight swap ──────────────────────────────────────────────────────

#[test]
fn swap_completes_three_phases() {
    let mut h = two_slots();
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    let caps = set_caps(&h);
    let phases: Vec<(usize, CapabilityPhase)> =
        caps.iter().map(|(slot, cap)| (*slot, cap.phase)).collect();
    assert_eq!(
        phases,
        vec![
            (0, CapabilityPhase::Start),
            (1, CapabilityPhase::Start),
            (0, CapabilityPhase::Apply),
            (1, CapabilityPhase::Apply),
            (0, CapabilityPhase::Finish),
            (1, CapabilityPhase::Finish),
        ]
    );
    assert!(caps.iter().all(|(_, cap)| cap.session == 1));

    // START carries the old assignment, APPLY and FINISH the new one.
    let (_, start0) = &caps[0];
    assert!(start0.same_assignment(&gu()));
    assert_eq!(start0.status, CapabilityStatus::None);
    let (_, apply0) = &caps[2];
    assert!(apply0.same_assignment(&gul()));
    let (_, finish1) = &caps[5];
    assert!(finish1.same_assignment(&gu()));
    assert_eq!(finish1.status, CapabilityStatus::Success);

    assert_eq!(
        h.events(),
        &[
            CapsEvent::RafChanged { slot: 0, raf: gul().raf },
            CapsEvent::RafChanged { slot: 1, raf: gu().raf },
            CapsEvent::TxDone { tx_id: 1 },
        ]
    );

    let m = h.manager();
    assert_eq!(m.stage(), TxStage::Idle);
    assert!(!m.is_busy());
    let record = m.record(0).unwrap();
    assert_eq!(record.cap.raf, gul().raf);
    assert_eq!(record.cap.logical_modem_uuid, "modem1");
    assert_eq!(m.slot_raf(1), Some(gu().raf));

    assert_eq!(count(&h, RequestKind::DataOff), 2);
    assert_eq!(h.data_manager().data_on_asserts(), 1);
    for slot in 0..2 {
        assert_eq!(h.hal().blocks(slot), 1);
        assert_eq!(h.hal().unblocks(slot), 1);
        assert_eq!(h.hal().modem_cap(slot), m.record(slot).map(|r| r.cap.clone()));
    }
}

#[test]
fn data_calls_are_torn_down_first() {
    let mut h = two_slots();
    h.slot_data(1).unwrap().set_calls(vec![
        DataCall { cid: 5, active: true },
        DataCall { cid: 6, active: false },
    ]);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    let log = h.hal().log();
    let deactivate = log
        .iter()
        .position(|s| matches!(s.request, RadioRequest::DeactivateDataCall { cid: 5, .. }))
        .unwrap();
    let first_start = log
        .iter()
        .position(|s| RequestKind::of(&s.request) == RequestKind::Start)
        .unwrap();
    assert!(deactivate < first_start);
    assert_eq!(count(&h, RequestKind::Deactivate), 1);
    assert!(h.slot_data(1).unwrap().calls().iter().all(|c| c.cid != 5));
    assert_eq!(h.events().last(), Some(&CapsEvent::TxDone { tx_id: 1 }));
}

#[test]
fn implicit_data_allowed_skips_data_off() {
    let mut h = two_slots();
    h.data_manager().set_need_set_data_allowed(false);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    assert_eq!(count(&h, RequestKind::DataOff), 0);
    assert_eq!(count(&h, RequestKind::Finish), 2);
    assert_eq!(h.events().last(), Some(&CapsEvent::TxDone { tx_id: 1 }));
}

// ─── Failure and rollback ───────────────────────────────────────────────

#[test]
fn apply_failure_aborts_and_rechecks_after_cooldown() {
    let mut h = two_slots();
    h.policy_mut()
        .fail_times(1, RequestKind::Apply, RadioError::GenericFailure.into(), 1);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    let caps = set_caps(&h);
    let aborts: Vec<&RadioCapability> = caps
        .iter()
        .filter(|(_, cap)| cap.status == CapabilityStatus::Fail)
        .map(|(_, cap)| cap)
        .collect();
    assert_eq!(aborts.len(), 2);
    assert!(aborts.iter().all(|cap| cap.session == 2));
    assert!(aborts.iter().all(|cap| cap.phase == CapabilityPhase::Finish));
    assert!(aborts[0].same_assignment(&gu()));
    assert!(aborts[1].same_assignment(&gul()));
    assert_eq!(count(&h, RequestKind::Finish), 0);

    assert_eq!(h.take_events(), vec![CapsEvent::TxAborted { tx_id: 2 }]);
    assert_eq!(h.data_manager().data_on_asserts(), 1);
    assert_eq!(h.manager().slot_raf(0), Some(gu().raf));
    assert_eq!(h.hal().unblocks(0), 1);
    assert_eq!(h.hal().unblocks(1), 1);

    let cooldown = h.manager().config().recheck_cooldown;
    assert_eq!(cooldown, Duration::from_secs(5));
    assert_eq!(h.manager().next_deadline(), Some(h.now() + cooldown));

    // Nothing happens before the cooldown runs out.
    let sent = h.hal().log().len();
    h.advance(Duration::from_secs(4));
    h.settle();
    assert_eq!(h.hal().log().len(), sent);

    h.advance(Duration::from_secs(1));
    h.settle();
    assert_eq!(
        h.take_events(),
        vec![
            CapsEvent::RafChanged { slot: 0, raf: gul().raf },
            CapsEvent::RafChanged { slot: 1, raf: gu().raf },
            CapsEvent::TxDone { tx_id: 3 },
        ]
    );
}

#[test]
fn fail_status_in_apply_reply_aborts() {
    let mut h = two_slots();
    h.policy_mut().reject(1, RequestKind::Apply);
    h.policy_mut().hold(0, RequestKind::Abort);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    assert_eq!(h.manager().stage(), TxStage::Aborting);
    assert_eq!(h.manager().tx_id(), 2);
    assert_eq!(count(&h, RequestKind::Apply), 2);
    assert_eq!(count(&h, RequestKind::Finish), 0);
    assert!(h.events().is_empty());

    h.policy_mut().release(0, RequestKind::Abort);
    h.settle();
    assert_eq!(count(&h, RequestKind::Abort), 2);
    assert!(raf_changed(&mut h).is_empty());
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 2 }]);
    assert_eq!(h.manager().slot_raf(0), Some(gu().raf));
    assert_eq!(h.manager().slot_raf(1), Some(gul().raf));
}

#[test]
fn start_timeout_aborts() {
    let mut h = two_slots();
    // A transport timeout on START is as fatal as a HAL error.
    h.policy_mut()
        .fail_times(0, RequestKind::Start, TransportError::Timeout.into(), 1);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    assert_eq!(count(&h, RequestKind::Apply), 0);
    assert_eq!(count(&h, RequestKind::Abort), 2);
    assert!(raf_changed(&mut h).is_empty());
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 2 }]);
}

#[test]
fn deactivate_failure_aborts_before_start() {
    let mut h = two_slots();
    h.slot_data(1)
        .unwrap()
        .set_calls(vec![DataCall { cid: 5, active: true }]);
    h.policy_mut()
        .fail(1, RequestKind::Deactivate, RadioError::GenericFailure.into());
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    assert_eq!(count(&h, RequestKind::Start), 0);
    assert_eq!(count(&h, RequestKind::DataOff), 0);
    assert_eq!(count(&h, RequestKind::Abort), 2);
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 2 }]);
    assert_eq!(h.data_manager().data_on_asserts(), 1);
}

// ─── Single slot ────────────────────────────────────────────────────────

#[test]
fn single_slot_never_switches() {
    let mut h = Harness::new(CapsConfig::default());
    h.add_slot(0, Some(gu())).unwrap();
    h.bring_up(0);
    let _req = h.add_request(0, AccessModes::NR, DataRole::Mms);
    h.settle();

    let m = h.manager();
    assert_eq!(m.registry().orders(), &[vec![0]]);
    assert_eq!(m.record(0).unwrap().requested_modes, AccessModes::NR);
    assert_eq!(m.stage(), TxStage::Idle);
    assert_eq!(m.tx_id(), 0);
    assert!(set_caps(&h).is_empty());
}

// ─── SIM I/O gate ───────────────────────────────────────────────────────

#[test]
fn waits_for_sim_io_to_go_quiet() {
    let mut h = two_slots();
    h.set_sim_io(1, true);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    assert_eq!(h.manager().stage(), TxStage::WaitSimIoQuiet);
    assert_eq!(h.manager().tx_id(), 1);
    assert!(set_caps(&h).is_empty());
    assert_eq!(count(&h, RequestKind::DataOff), 0);
    assert_eq!(h.hal().blocks(0), 0);
    assert_eq!(h.hal().blocks(1), 0);

    // The other slot going quiet changes nothing.
    h.set_sim_io(0, false);
    h.settle();
    assert_eq!(h.manager().stage(), TxStage::WaitSimIoQuiet);

    h.set_sim_io(1, false);
    h.settle();
    assert_eq!(count(&h, RequestKind::Finish), 2);
    assert_eq!(h.events().last(), Some(&CapsEvent::TxDone { tx_id: 1 }));
}

#[test]
fn stuck_sim_io_times_out_without_touching_the_modem() {
    let mut h = two_slots();
    h.set_sim_io(1, true);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    h.advance(Duration::from_secs(29));
    h.settle();
    assert_eq!(h.manager().stage(), TxStage::WaitSimIoQuiet);

    h.advance(Duration::from_secs(1));
    h.settle();
    // Nothing was started, so nothing is rolled back.
    assert!(set_caps(&h).is_empty());
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 1 }]);
    assert_eq!(h.hal().blocks(1), 0);
    assert_eq!(h.hal().unblocks(1), 0);
    assert_eq!(h.data_manager().data_on_asserts(), 1);
    assert!(!h.manager().is_busy());
    assert!(h.manager().registry().records().iter().all(|r| r.tx_id == 0));

    // Once the SIM is quiet the cooldown recheck goes through.
    h.set_sim_io(1, false);
    h.advance(Duration::from_secs(5));
    h.settle();
    assert_eq!(count(&h, RequestKind::Finish), 2);
    assert_eq!(h.events().last(), Some(&CapsEvent::TxDone { tx_id: 2 }));
}

#[test]
fn channel_wait_times_out_and_releases_locks() {
    let mut h = two_slots();
    h.hal().set_grant(1, false);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();
    assert_eq!(h.manager().stage(), TxStage::WaitIoLock);

    h.advance(Duration::from_secs(30));
    h.settle();
    assert!(set_caps(&h).is_empty());
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 1 }]);
    assert_eq!(h.hal().unblocks(0), 1);
    assert_eq!(h.hal().unblocks(1), 1);
    assert_eq!(h.hal().block_status(0), BlockStatus::None);
    assert_eq!(h.hal().block_status(1), BlockStatus::None);
    assert_eq!(h.manager().stage(), TxStage::Idle);
}

#[test]
fn waits_for_channel_ownership() {
    let mut h = two_slots();
    h.hal().set_grant(1, false);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    assert_eq!(h.manager().stage(), TxStage::WaitIoLock);
    assert_eq!(h.hal().blocks(0), 1);
    assert_eq!(h.hal().blocks(1), 1);
    assert_eq!(count(&h, RequestKind::DataOff), 0);

    h.grant_channel(1);
    h.settle();
    assert_eq!(h.events().last(), Some(&CapsEvent::TxDone { tx_id: 1 }));
    assert_eq!(h.hal().unblocks(1), 1);
}

// ─── Scoring and request priority ───────────────────────────────────────

#[test]
fn best_assignment_already_in_place() {
    let mut h = Harness::new(CapsConfig::default());
    h.add_slot(0, Some(gul())).unwrap();
    h.add_slot(1, Some(gu())).unwrap();
    h.bring_up(0);
    h.bring_up(1);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    assert_eq!(h.manager().tx_id(), 0);
    assert_eq!(h.manager().stage(), TxStage::Idle);
    assert!(set_caps(&h).is_empty());
}

#[test]
fn equal_scores_keep_current_assignment() {
    let mut h = two_slots();
    h.settle();
    let decision = h.manager().registry().decide().unwrap();
    assert_eq!(decision.score, decision.current_score);
    assert!(!decision.is_switch());
    assert_eq!(h.manager().tx_id(), 0);
}

#[test]
fn offline_slot_gives_up_high_tier() {
    let mut h = Harness::new(CapsConfig::default());
    h.add_slot(0, Some(gu())).unwrap();
    h.add_slot(1, Some(gul())).unwrap();
    h.bring_up(0);
    h.settle();

    assert_eq!(raf_changed(&mut h), vec![(0, gul().raf), (1, gu().raf)]);
}

#[test]
fn score_sign_matches_request() {
    let mut record = CapabilityRecord::new(0, gu(), AccessModes::all());
    record.online = true;
    record.sim_present = true;
    record.requested_modes = AccessModes::LTE;
    assert!(record.score(&gu()) < 0);
    assert_eq!(record.score(&gul()), AccessModes::LTE.weight());
}

#[test]
fn mms_request_outranks_internet_in_either_order() {
    for mms_first in [true, false] {
        let mut h = Harness::new(CapsConfig::default());
        h.add_slot(0, Some(gu())).unwrap();
        h.add_slot(1, Some(RadioCapability::new(gu().raf, "modem2")))
            .unwrap();
        h.add_slot(2, Some(gul())).unwrap();
        for slot in 0..3 {
            h.bring_up(slot);
        }
        let handles = if mms_first {
            vec![
                h.add_request(0, AccessModes::LTE, DataRole::Mms),
                h.add_request(1, AccessModes::LTE, DataRole::Internet),
            ]
        } else {
            vec![
                h.add_request(1, AccessModes::LTE, DataRole::Internet),
                h.add_request(0, AccessModes::LTE, DataRole::Mms),
            ]
        };
        assert_eq!(handles.len(), 2);
        h.settle();

        let m = h.manager();
        assert_eq!(m.record(0).unwrap().requested_modes, AccessModes::LTE);
        assert!(m.record(1).unwrap().requested_modes.is_empty());
        assert_eq!(m.slot_raf(0), Some(gul().raf), "mms_first={mms_first}");
    }
}

#[test]
fn removing_request_hands_priority_back() {
    let mut h = two_slots();
    let mms = h.add_request(1, AccessModes::LTE, DataRole::Mms);
    let _internet = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();
    assert_eq!(h.manager().tx_id(), 0, "slot 1 already holds LTE");

    h.manager_mut().remove_request(mms);
    h.settle();
    assert_eq!(h.manager().slot_raf(0), Some(gul().raf));
    assert_eq!(h.events().last(), Some(&CapsEvent::TxDone { tx_id: 1 }));
}

// ─── Slot lifecycle ─────────────────────────────────────────────────────

#[test]
fn removing_participant_mid_switch_rolls_back() {
    let mut h = two_slots();
    h.policy_mut().hold(1, RequestKind::Apply);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();
    assert_eq!(h.manager().stage(), TxStage::Phase(TxPhase::Apply));
    let held = h.hal().outstanding();
    assert_eq!(held.len(), 1);

    h.remove_slot(1).unwrap();
    h.settle();

    assert!(h.hal().cancelled().contains(&held[0].id));
    assert_eq!(h.hal().unblocks(1), 1);
    assert_eq!(h.hal().unblocks(0), 1);
    let aborts: Vec<usize> = set_caps(&h)
        .into_iter()
        .filter(|(_, cap)| cap.status == CapabilityStatus::Fail)
        .map(|(slot, _)| slot)
        .collect();
    assert_eq!(aborts, vec![0]);
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 2 }]);
    assert_eq!(h.manager().slot_raf(0), Some(gu().raf));
    assert_eq!(h.manager().slots(), vec![0]);
}

#[test]
fn removing_participant_during_sim_io_wait_drops_switch() {
    let mut h = two_slots();
    h.set_sim_io(1, true);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();
    assert_eq!(h.manager().stage(), TxStage::WaitSimIoQuiet);

    h.remove_slot(1).unwrap();
    h.settle();

    assert!(set_caps(&h).is_empty());
    assert_eq!(h.hal().blocks(0), 0);
    assert_eq!(h.hal().block_status(0), BlockStatus::None);
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 1 }]);
    assert_eq!(h.manager().stage(), TxStage::Idle);
    assert_eq!(h.manager().record(0).unwrap().tx_id, 0);
    assert_eq!(h.manager().next_deadline(), Some(h.now() + Duration::from_secs(5)));
}

#[test]
fn removing_participant_during_channel_wait_unblocks_the_rest() {
    let mut h = two_slots();
    h.hal().set_grant(1, false);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();
    assert_eq!(h.manager().stage(), TxStage::WaitIoLock);
    assert_eq!(h.hal().block_status(0), BlockStatus::Acquired);

    h.remove_slot(1).unwrap();
    h.settle();

    assert!(set_caps(&h).is_empty());
    assert_eq!(count(&h, RequestKind::DataOff), 0);
    assert_eq!(h.hal().unblocks(0), 1);
    assert_eq!(h.hal().unblocks(1), 1);
    assert_eq!(h.hal().block_status(0), BlockStatus::None);
    assert_eq!(h.events(), &[CapsEvent::TxAborted { tx_id: 1 }]);
    assert_eq!(h.manager().stage(), TxStage::Idle);
    assert_eq!(h.data_manager().data_on_asserts(), 1);
}

#[test]
fn indication_for_participant_ignored_during_switch() {
    let mut h = two_slots();
    h.policy_mut().hold(1, RequestKind::Apply);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();

    let nr = RadioCapability::new(Raf::NR, "modem1");
    h.manager_mut()
        .handle_indication(1, Indication::RadioCapability(nr));
    assert!(raf_changed(&mut h).is_empty());

    h.policy_mut().release(1, RequestKind::Apply);
    h.settle();
    assert_eq!(h.manager().slot_raf(1), Some(gu().raf));
}

#[test]
fn indication_updates_idle_slot() {
    let mut h = two_slots();
    h.settle();
    let nr = RadioCapability::new(Raf::NR | Raf::LTE, "modem1");
    h.manager_mut()
        .handle_indication(1, Indication::RadioCapability(nr.clone()));
    assert_eq!(raf_changed(&mut h), vec![(1, nr.raf)]);

    // Same assignment again is not a change.
    h.manager_mut()
        .handle_indication(1, Indication::RadioCapability(nr));
    assert_eq!(raf_changed(&mut h).len(), 1);
}

#[test]
fn coming_online_requeries_capability() {
    let mut h = two_slots();
    h.settle();
    h.manager_mut().set_online(1, false);
    let nr = RadioCapability::new(Raf::NR, "modem1");
    h.hal().set_modem_cap(1, Some(nr.clone()));
    h.manager_mut().set_online(1, true);
    h.settle();

    let queries = h
        .hal()
        .log()
        .into_iter()
        .filter(|s| s.slot == 1 && s.request == RadioRequest::GetRadioCapability)
        .collect::<Vec<_>>();
    assert_eq!(queries.len(), 2);
    assert!(queries[0].options.blocking, "initial check blocks");
    assert!(!queries[1].options.blocking);
    assert_eq!(h.manager().slot_raf(1), Some(nr.raf));
}

#[test]
fn check_retried_after_transient_error() {
    let mut h = Harness::new(CapsConfig::default());
    h.policy_mut()
        .fail_times(0, RequestKind::GetCapability, TransportError::Timeout.into(), 1);
    h.add_slot(0, Some(gu())).unwrap();
    h.settle();
    assert_eq!(
        h.manager().slot_status(0),
        Some(SlotStatus::Checking { attempt: 1 })
    );

    h.advance(Duration::from_secs(1));
    h.settle();
    assert!(h.manager().is_supported(0));
    assert_eq!(count(&h, RequestKind::GetCapability), 2);
    assert!(h.manager().record(0).is_some());
}

#[test]
fn not_supported_is_terminal() {
    for error in [RadioError::RequestNotSupported, RadioError::OperationNotAllowed] {
        let mut h = Harness::new(CapsConfig::default());
        h.policy_mut()
            .fail(0, RequestKind::GetCapability, error.into());
        h.add_slot(0, Some(gu())).unwrap();
        h.settle();

        assert_eq!(h.manager().slot_status(0), Some(SlotStatus::Unsupported));
        assert_eq!(h.events(), &[CapsEvent::CapsUnsupported { slot: 0 }]);
        assert_eq!(h.manager().next_deadline(), None);
        assert!(h.manager().record(0).is_none());
    }
}

#[test]
fn retry_budget_runs_out() {
    let config = CapsConfig {
        check_retry_limit: 2,
        ..CapsConfig::default()
    };
    let mut h = Harness::new(config);
    h.policy_mut()
        .fail(0, RequestKind::GetCapability, RadioError::GenericFailure.into());
    h.add_slot(0, Some(gu())).unwrap();
    h.settle();
    for _ in 0..2 {
        h.advance(Duration::from_secs(1));
        h.settle();
    }

    assert_eq!(count(&h, RequestKind::GetCapability), 3);
    assert_eq!(h.manager().slot_status(0), Some(SlotStatus::Unsupported));
    assert_eq!(h.events(), &[CapsEvent::CapsUnsupported { slot: 0 }]);
}

#[test]
fn empty_capability_reply_is_unsupported() {
    let mut h = Harness::new(CapsConfig::default());
    h.add_slot(0, None).unwrap();
    h.settle();
    assert_eq!(h.manager().slot_status(0), Some(SlotStatus::Unsupported));
}

#[test]
fn duplicate_slot_rejected() {
    let mut h = two_slots();
    assert!(h.add_slot(1, Some(gu())).is_err());
    assert!(h.remove_slot(7).is_err());
}

#[test]
fn dropping_manager_mid_switch_releases_channels() {
    let mut h = two_slots();
    h.policy_mut().hold(0, RequestKind::Start);
    let _req = h.add_request(0, AccessModes::LTE, DataRole::Internet);
    h.settle();
    assert!(h.manager().is_busy());

    let hal = h.hal().clone();
    let held = hal.outstanding();
    drop(h);
    assert_eq!(hal.unblocks(0), 1);
    assert_eq!(hal.unblocks(1), 1);
    assert!(held.iter().all(|s| hal.cancelled().contains(&s.id)));
}

// ─── Network mode selection ─────────────────────────────────────────────

#[test]
fn selector_drives_request_and_allowed_types() {
    let mut h = two_slots();
    let gul_modes = AccessModes::up_to(AccessModes::LTE);
    let mut sel = NetworkModeSelector::new(0, gul_modes);
    sel.set_data_role(h.manager_mut(), DataRole::Internet, AccessModes::empty());
    assert_eq!(h.manager().requests().len(), 1);
    h.settle();

    let events = h.take_events();
    let allowed: Vec<Raf> = events
        .iter()
        .filter_map(|e| match e {
            CapsEvent::RafChanged { slot: 0, raf } => sel.on_raf_changed(*raf),
            _ => None,
        })
        .collect();
    assert_eq!(allowed, vec![gul().raf]);
    assert_eq!(sel.preferred_modes(), gul_modes);

    sel.set_data_role(h.manager_mut(), DataRole::None, AccessModes::empty());
    assert!(h.manager().requests().is_empty());
    h.settle();
    assert!(!h.manager().is_busy());
}
