//! # Capability Registry & Scorer
//!
//! One [`CapabilityRecord`] per slot, ordered by slot index, plus the
//! fitness function that decides which slot should hold which capability.
//!
//! ## Scoring
//!
//! For slot `s` paired with candidate capability `cap`:
//!
//! | Slot state                     | Score                                  |
//! |--------------------------------|----------------------------------------|
//! | offline or no SIM              | `-access_mode(cap)`                    |
//! | requested modes covered by cap | `+requested_modes`                     |
//! | requested modes not covered    | `-requested_modes`                     |
//! | no request                     | `0`                                    |
//!
//! Unusable slots are penalised for sitting on high tiers, slots that asked
//! for more are penalised for not getting it. An assignment's score is the
//! sum over all slots.

use crate::permutation::{best_index, permutations};
use crate::radio::RadioCapability;
use crate::raf::AccessModes;

/// Arbitration state of one slot.
#[derive(Debug, Clone)]
pub struct CapabilityRecord {
    pub slot_index: usize,
    /// Capability currently granted to this slot.
    pub cap: RadioCapability,
    /// What the owning network-mode logic wants (empty = no preference).
    pub requested_modes: AccessModes,
    /// Slot-local technology preference; masks `requested_modes`.
    pub techs: AccessModes,
    pub enabled: bool,
    pub online: bool,
    pub sim_present: bool,
    pub imsi_known: bool,
    /// Snapshot taken when a transaction starts.
    pub old_cap: Option<RadioCapability>,
    /// Capability this slot is switching to.
    pub new_cap: Option<RadioCapability>,
    /// Transaction this slot belongs to (0 = none).
    pub tx_id: u32,
    /// Outstanding requests for this slot within the current step.
    pub tx_pending: usize,
}

impl CapabilityRecord {
    pub fn new(slot_index: usize, cap: RadioCapability, techs: AccessModes) -> Self {
        CapabilityRecord {
            slot_index,
            cap,
            requested_modes: AccessModes::empty(),
            techs,
            enabled: true,
            online: false,
            sim_present: false,
            imsi_known: false,
            old_cap: None,
            new_cap: None,
            tx_id: 0,
            tx_pending: 0,
        }
    }

    /// Online with a SIM inserted.
    pub fn usable(&self) -> bool {
        self.online && self.sim_present
    }

    /// Fitness of this slot holding `cap`.
    pub fn score(&self, cap: &RadioCapability) -> i64 {
        if !self.usable() {
            -cap.raf.access_mode().weight()
        } else if !self.requested_modes.is_empty() {
            if cap.raf.access_modes().covers(self.requested_modes) {
                self.requested_modes.weight()
            } else {
                -self.requested_modes.weight()
            }
        } else {
            0
        }
    }

    /// Forget transaction bookkeeping.
    pub fn clear_tx(&mut self) {
        self.old_cap = None;
        self.new_cap = None;
        self.tx_id = 0;
        self.tx_pending = 0;
    }
}

/// Outcome of one arbitration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Index into the permutation list; 0 is the current assignment.
    pub index: usize,
    pub order: Vec<usize>,
    pub score: i64,
    pub current_score: i64,
}

impl Decision {
    /// A strictly better assignment than the current one exists.
    pub fn is_switch(&self) -> bool {
        self.index > 0
    }
}

/// Every registered slot, sorted by slot index.
#[derive(Debug, Default)]
pub struct Registry {
    records: Vec<CapabilityRecord>,
    orders: Vec<Vec<usize>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a record, keeping slot order.
    pub fn insert(&mut self, record: CapabilityRecord) {
        match self
            .records
            .binary_search_by_key(&record.slot_index, |r| r.slot_index)
        {
            Ok(pos) => self.records[pos] = record,
            Err(pos) => {
                self.records.insert(pos, record);
                self.orders = permutations(self.records.len());
            }
        }
    }

    pub fn remove(&mut self, slot: usize) -> Option<CapabilityRecord> {
        let pos = self.position(slot)?;
        let record = self.records.remove(pos);
        self.orders = permutations(self.records.len());
        Some(record)
    }

    pub fn position(&self, slot: usize) -> Option<usize> {
        self.records
            .binary_search_by_key(&slot, |r| r.slot_index)
            .ok()
    }

    pub fn get(&self, slot: usize) -> Option<&CapabilityRecord> {
        self.position(slot).map(|pos| &self.records[pos])
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut CapabilityRecord> {
        let pos = self.position(slot)?;
        Some(&mut self.records[pos])
    }

    pub fn records(&self) -> &[CapabilityRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [CapabilityRecord] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cached permutation list for the current membership.
    pub fn orders(&self) -> &[Vec<usize>] {
        &self.orders
    }

    /// Total fitness of handing `records[order[i]].cap` to `records[i]`.
    pub fn score_order(&self, order: &[usize]) -> i64 {
        self.records
            .iter()
            .zip(order)
            .map(|(record, &src)| record.score(&self.records[src].cap))
            .sum()
    }

    /// Whether the registry holds enough fresh data to arbitrate.
    ///
    /// Every enabled online slot must have reported a capability, and every
    /// slot with a SIM must know its IMSI.
    pub fn ready(&self) -> bool {
        if self.records.is_empty() {
            return false;
        }
        for r in &self.records {
            if r.enabled && r.online && r.cap.raf.is_empty() {
                tracing::debug!(slot = r.slot_index, "no capability report yet");
                return false;
            }
            if r.sim_present && !r.imsi_known {
                tracing::debug!(slot = r.slot_index, "waiting for imsi");
                return false;
            }
        }
        true
    }

    /// Score every permutation and pick the best (identity on ties).
    pub fn decide(&self) -> Option<Decision> {
        let (index, score) = best_index(&self.orders, |order| {
            let s = self.score_order(order);
            tracing::trace!(order = ?order, score = s, "candidate");
            s
        })?;
        Some(Decision {
            index,
            order: self.orders[index].clone(),
            score,
            current_score: self.orders.first().map_or(0, |o| self.score_order(o)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raf::Raf;

    fn lte_cap() -> RadioCapability {
        RadioCapability::new(AccessModes::up_to(AccessModes::LTE).to_raf(), "modem0")
    }

    fn gsm_cap() -> RadioCapability {
        RadioCapability::new(Raf::GSM_FAMILY, "modem1")
    }

    fn ready_record(slot: usize, cap: RadioCapability) -> CapabilityRecord {
        let mut r = CapabilityRecord::new(slot, cap, AccessModes::all());
        r.online = true;
        r.sim_present = true;
        r.imsi_known = true;
        r
    }

    #[test]
    fn score_sign_for_lte_request() {
        let mut r = ready_record(0, gsm_cap());
        r.requested_modes = AccessModes::LTE;
        assert!(r.score(&gsm_cap()) < 0);
        assert_eq!(r.score(&lte_cap()), AccessModes::LTE.weight());
        let nr = RadioCapability::new(Raf::NR | Raf::LTE, "modem2");
        assert_eq!(r.score(&nr), AccessModes::LTE.weight());
    }

    #[test]
    fn unusable_slot_penalised_by_tier() {
        let mut r = ready_record(0, gsm_cap());
        r.online = false;
        assert_eq!(r.score(&lte_cap()), -AccessModes::LTE.weight());
        assert_eq!(r.score(&gsm_cap()), -AccessModes::GSM.weight());
        r.online = true;
        r.sim_present = false;
        assert_eq!(r.score(&lte_cap()), -AccessModes::LTE.weight());
    }

    #[test]
    fn no_preference_scores_zero() {
        let r = ready_record(0, gsm_cap());
        assert_eq!(r.score(&lte_cap()), 0);
        assert_eq!(r.score(&gsm_cap()), 0);
    }

    #[test]
    fn registry_keeps_slot_order() {
        let mut reg = Registry::new();
        reg.insert(ready_record(2, gsm_cap()));
        reg.insert(ready_record(0, lte_cap()));
        reg.insert(ready_record(1, gsm_cap()));
        let slots: Vec<_> = reg.records().iter().map(|r| r.slot_index).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(reg.orders().len(), 6);
        reg.remove(1);
        assert_eq!(reg.orders().len(), 2);
    }

    #[test]
    fn decide_proposes_swap() {
        let mut reg = Registry::new();
        let mut wants_lte = ready_record(0, gsm_cap());
        wants_lte.requested_modes = AccessModes::up_to(AccessModes::LTE);
        reg.insert(wants_lte);
        reg.insert(ready_record(1, lte_cap()));
        let decision = reg.decide().unwrap();
        assert!(decision.is_switch());
        assert_eq!(decision.order, vec![1, 0]);
        assert!(decision.score > decision.current_score);
    }

    #[test]
    fn decide_is_stable_when_already_best() {
        let mut reg = Registry::new();
        let mut wants_lte = ready_record(0, lte_cap());
        wants_lte.requested_modes = AccessModes::up_to(AccessModes::LTE);
        reg.insert(wants_lte);
        reg.insert(ready_record(1, gsm_cap()));
        let first = reg.decide().unwrap();
        let second = reg.decide().unwrap();
        assert_eq!(first, second);
        assert!(!first.is_switch());
    }

    #[test]
    fn ready_requires_reports_and_imsi() {
        let mut reg = Registry::new();
        assert!(!reg.ready());
        let mut r = ready_record(0, RadioCapability::default());
        reg.insert(r.clone());
        assert!(!reg.ready(), "online slot without a RAF report");
        r.enabled = false;
        reg.insert(r.clone());
        assert!(reg.ready(), "disabled slots are not waited for");
        r.cap = gsm_cap();
        r.imsi_known = false;
        reg.insert(r);
        assert!(!reg.ready(), "SIM present but IMSI unknown");
    }
}
