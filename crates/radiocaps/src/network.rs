//! # Network Mode Selection
//!
//! The per-slot consumer of arbitration. It turns the slot's data role into
//! a standing capability request, and turns the RAF the slot ends up with
//! into the allowed-network-types bitmap the host should push to the modem.
//!
//! ```text
//!   data role ──▶ set_data_role ──▶ add/remove CapabilityRequest
//!   RafChanged ──▶ on_raf_changed ──▶ Some(allowed RAF) ──▶ host sends
//!                                                      SetAllowedNetworkTypes
//! ```

use crate::manager::RadioCapsManager;
use crate::raf::{AccessModes, Raf};
use crate::request::{DataRole, RequestHandle};

pub struct NetworkModeSelector {
    slot: usize,
    /// Technologies the user allows on this slot.
    techs: AccessModes,
    role: DataRole,
    /// Highest tier the data-role owner wants; empty means no cap.
    max_mode: AccessModes,
    request: Option<(RequestHandle, AccessModes, DataRole)>,
    raf: Raf,
    allowed: Option<Raf>,
}

impl NetworkModeSelector {
    pub fn new(slot: usize, techs: AccessModes) -> Self {
        NetworkModeSelector {
            slot,
            techs,
            role: DataRole::None,
            max_mode: AccessModes::empty(),
            request: None,
            raf: Raf::empty(),
            allowed: None,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn role(&self) -> DataRole {
        self.role
    }

    /// Modes the slot would like under its current role, if it wants any.
    pub fn desired_request(&self) -> Option<(AccessModes, DataRole)> {
        if self.role == DataRole::None {
            return None;
        }
        let modes = self.techs & AccessModes::up_to(self.max_mode);
        (!modes.is_empty()).then_some((modes, self.role))
    }

    /// Modes the slot should actually use given what it was granted.
    pub fn preferred_modes(&self) -> AccessModes {
        self.techs & AccessModes::up_to(self.max_mode) & self.raf.access_modes()
    }

    pub fn set_data_role(
        &mut self,
        manager: &mut RadioCapsManager,
        role: DataRole,
        max_mode: AccessModes,
    ) {
        self.role = role;
        self.max_mode = max_mode;
        tracing::debug!(slot = self.slot, %role, max = %max_mode, "data role");
        self.sync_request(manager);
    }

    pub fn set_techs(&mut self, manager: &mut RadioCapsManager, techs: AccessModes) {
        self.techs = techs;
        self.sync_request(manager);
    }

    /// Record the slot's new RAF. Returns the allowed-network-types bitmap to
    /// push when it differs from the last one.
    pub fn on_raf_changed(&mut self, raf: Raf) -> Option<Raf> {
        self.raf = raf;
        self.refresh_allowed()
    }

    /// Drop the standing request, if any.
    pub fn release(&mut self, manager: &mut RadioCapsManager) {
        if let Some((handle, _, _)) = self.request.take() {
            manager.remove_request(handle);
        }
    }

    fn sync_request(&mut self, manager: &mut RadioCapsManager) {
        let desired = self.desired_request();
        let current = self.request.as_ref().map(|(_, m, r)| (*m, *r));
        if desired == current {
            return;
        }
        self.release(manager);
        if let Some((modes, role)) = desired {
            let handle = manager.add_request(self.slot, modes, role);
            self.request = Some((handle, modes, role));
        }
    }

    fn refresh_allowed(&mut self) -> Option<Raf> {
        if self.raf.is_empty() {
            return None;
        }
        let modes = self.preferred_modes();
        let allowed = if modes.is_empty() {
            // Nothing in common: fall back to whatever the modem can do.
            self.raf
        } else {
            modes.to_raf() & self.raf
        };
        if self.allowed == Some(allowed) {
            return None;
        }
        tracing::debug!(slot = self.slot, allowed = %allowed, "allowed network types");
        self.allowed = Some(allowed);
        Some(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gul_raf() -> Raf {
        AccessModes::up_to(AccessModes::LTE).to_raf()
    }

    #[test]
    fn no_request_without_role() {
        let sel = NetworkModeSelector::new(0, AccessModes::all());
        assert_eq!(sel.desired_request(), None);
    }

    #[test]
    fn request_limited_by_techs_and_max_mode() {
        let gul = AccessModes::GSM | AccessModes::UMTS | AccessModes::LTE;
        let mut sel = NetworkModeSelector::new(0, gul);
        sel.role = DataRole::Internet;
        assert_eq!(
            sel.desired_request(),
            Some((AccessModes::up_to(AccessModes::LTE), DataRole::Internet))
        );
        sel.max_mode = AccessModes::UMTS;
        assert_eq!(
            sel.desired_request(),
            Some((AccessModes::GSM | AccessModes::UMTS, DataRole::Internet))
        );
        sel.techs = AccessModes::NR;
        assert_eq!(sel.desired_request(), None);
    }

    #[test]
    fn allowed_types_follow_raf() {
        let mut sel = NetworkModeSelector::new(1, AccessModes::all());
        assert_eq!(sel.on_raf_changed(Raf::empty()), None);
        let allowed = sel.on_raf_changed(Raf::GSM_FAMILY).unwrap();
        assert_eq!(allowed.access_modes(), AccessModes::GSM);
        assert_eq!(sel.on_raf_changed(Raf::GSM_FAMILY), None, "unchanged");
        let allowed = sel.on_raf_changed(gul_raf()).unwrap();
        assert_eq!(allowed.access_modes(), AccessModes::up_to(AccessModes::LTE));
    }

    #[test]
    fn allowed_types_capped_by_max_mode() {
        let mut sel = NetworkModeSelector::new(0, AccessModes::all());
        sel.max_mode = AccessModes::UMTS;
        let allowed = sel.on_raf_changed(gul_raf()).unwrap();
        assert_eq!(allowed.access_modes(), AccessModes::GSM | AccessModes::UMTS);
        assert!(!allowed.intersects(Raf::LTE_FAMILY));
    }

    #[test]
    fn no_overlap_falls_back_to_raf() {
        let mut sel = NetworkModeSelector::new(0, AccessModes::NR);
        assert_eq!(sel.on_raf_changed(Raf::GSM_FAMILY), Some(Raf::GSM_FAMILY));
    }
}
