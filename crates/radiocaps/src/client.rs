//! # Collaborators
//!
//! The arbitration core never talks to a HAL directly. The host hands it one
//! [`SlotHandles`] per slot and a single [`DataManager`], and reports
//! everything that happens on the other side (responses, indications,
//! ownership changes, SIM I/O changes) back through
//! [`RadioCapsManager`](crate::manager::RadioCapsManager) entry points.

use std::fmt;

use crate::radio::{DataCall, RadioRequest, RequestOptions, TransportError};

/// Identifies an outstanding request on one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Exclusive-ownership state of a radio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Not blocked by us.
    None,
    /// We asked for exclusive ownership; another owner still holds it.
    Queued,
    /// We own the channel; nothing else interleaves.
    Acquired,
}

/// Request/response channel to one slot's radio HAL.
pub trait RadioClient {
    /// Queue a request. The response comes back later through
    /// `RadioCapsManager::handle_response` with the returned id.
    fn send_request(
        &mut self,
        request: RadioRequest,
        options: RequestOptions,
    ) -> Result<RequestId, TransportError>;

    /// Drop an outstanding request. No response is delivered for it.
    fn cancel_request(&mut self, id: RequestId);

    /// Ask for exclusive ownership of the channel.
    fn block(&mut self) -> BlockStatus;

    /// Current ownership state.
    fn block_status(&self) -> BlockStatus;

    /// Release exclusive ownership.
    fn unblock(&mut self);
}

/// Data-call view of one slot.
pub trait SlotData {
    fn active_calls(&self) -> Vec<DataCall>;
}

/// SIM card of one slot.
pub trait SimCard {
    /// True while a SIM I/O transaction is in flight.
    fn sim_io_active(&self) -> bool;
}

/// Manager-wide cellular data policy.
pub trait DataManager {
    /// Whether data must be explicitly disallowed before a capability switch
    /// (false when the modem applies "data allowed" implicitly on connect).
    fn need_set_data_allowed(&self) -> bool;

    /// Re-assert that data is allowed on the data-role slot.
    fn assert_data_on(&mut self);
}

/// Per-slot collaborators handed to the manager when a slot is added.
pub struct SlotHandles {
    pub client: Box<dyn RadioClient>,
    pub data: Box<dyn SlotData>,
    pub sim: Box<dyn SimCard>,
}

impl fmt::Debug for SlotHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotHandles")
            .field("block_status", &self.client.block_status())
            .field("sim_io_active", &self.sim.sim_io_active())
            .finish()
    }
}
