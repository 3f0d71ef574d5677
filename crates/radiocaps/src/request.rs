//! # Request Queue
//!
//! Standing asks from data-role owners: "slot X needs at least mode M for
//! role R". Only the highest-priority request is honoured on each pass;
//! every other slot resolves to "no preference".

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::raf::AccessModes;

/// Data role a request is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataRole {
    None,
    Mms,
    Internet,
}

impl fmt::Display for DataRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRole::None => write!(f, "none"),
            DataRole::Mms => write!(f, "mms"),
            DataRole::Internet => write!(f, "internet"),
        }
    }
}

/// Error returned for an unknown role name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data role {0:?}")]
pub struct UnknownDataRole(pub String);

impl FromStr for DataRole {
    type Err = UnknownDataRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DataRole::None),
            "mms" => Ok(DataRole::Mms),
            "internet" => Ok(DataRole::Internet),
            other => Err(UnknownDataRole(other.to_string())),
        }
    }
}

/// Ordered role ranking. Earlier roles win; unlisted roles rank last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePriority {
    order: Vec<DataRole>,
}

impl RolePriority {
    pub fn new(order: Vec<DataRole>) -> Self {
        RolePriority { order }
    }

    pub fn rank(&self, role: DataRole) -> usize {
        self.order
            .iter()
            .position(|r| *r == role)
            .unwrap_or(self.order.len())
    }

    pub fn roles(&self) -> &[DataRole] {
        &self.order
    }
}

impl Default for RolePriority {
    /// MMS ahead of everything else.
    fn default() -> Self {
        RolePriority::new(vec![DataRole::Mms, DataRole::Internet, DataRole::None])
    }
}

/// Caller-held token for a standing request.
///
/// Not `Clone`: removing a request consumes its handle.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub(crate) u64);

impl RequestHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A standing capability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub id: u64,
    pub slot: usize,
    pub modes: AccessModes,
    pub role: DataRole,
}

/// Outstanding requests, kept sorted by role priority (stable).
#[derive(Debug, Default)]
pub struct RequestQueue {
    priority: RolePriority,
    requests: Vec<CapabilityRequest>,
    next_id: u64,
}

impl RequestQueue {
    pub fn new(priority: RolePriority) -> Self {
        RequestQueue {
            priority,
            requests: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add(&mut self, slot: usize, modes: AccessModes, role: DataRole) -> RequestHandle {
        self.next_id += 1;
        let req = CapabilityRequest {
            id: self.next_id,
            slot,
            modes,
            role,
        };
        tracing::debug!(slot, %modes, %role, id = req.id, "capability request added");
        self.requests.push(req);
        let priority = &self.priority;
        self.requests.sort_by_key(|r| priority.rank(r.role));
        RequestHandle(req.id)
    }

    /// Remove a request. Returns it if it was still queued.
    pub fn remove(&mut self, handle: RequestHandle) -> Option<CapabilityRequest> {
        let pos = self.requests.iter().position(|r| r.id == handle.0)?;
        let req = self.requests.remove(pos);
        tracing::debug!(slot = req.slot, id = req.id, "capability request removed");
        Some(req)
    }

    /// Drop every request targeting `slot`.
    pub fn remove_slot(&mut self, slot: usize) -> usize {
        let before = self.requests.len();
        self.requests.retain(|r| r.slot != slot);
        before - self.requests.len()
    }

    /// The request that drives `requested_modes` right now.
    pub fn active(&self) -> Option<&CapabilityRequest> {
        self.requests.first()
    }

    /// Resolved requested modes for `slot` under the active request,
    /// masked by the slot's own preference.
    pub fn requested_modes(&self, slot: usize, techs: AccessModes) -> AccessModes {
        match self.active() {
            Some(req) if req.slot == slot => req.modes & techs,
            _ => AccessModes::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityRequest> {
        self.requests.iter()
    }
}
