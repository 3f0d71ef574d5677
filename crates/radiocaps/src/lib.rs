//! Multi-slot radio capability arbitration.
//!
//! On a multi-SIM device the modem hardware usually lets only one slot run
//! the high tiers (LTE/NR) at a time. This crate decides which slot gets
//! which radio access families and carries out the switch through the radio
//! HAL:
//!
//! - **Registry & scorer** ([`registry`]): one record per slot, a fitness
//!   score for any candidate assignment
//! - **Permutation search** ([`permutation`]): every slot-to-capability
//!   assignment, identity first
//! - **Request queue** ([`request`]): standing "slot X needs mode M for role
//!   R" asks, MMS first by default
//! - **Capability switch**: the transaction state lives in [`transaction`];
//!   [`manager`] drives it through START / APPLY / FINISH with data
//!   teardown, channel locking and abort
//! - **Network mode selection** ([`network`]): the per-slot consumer
//!
//! Everything is driven from one thread by a host reactor through
//! [`manager::RadioCapsManager`].

pub mod client;
pub mod config;
mod coordinator;
pub mod error;
pub mod events;
pub mod manager;
pub mod network;
pub mod permutation;
pub mod radio;
pub mod raf;
pub mod registry;
pub mod request;
pub mod transaction;

pub use client::{BlockStatus, DataManager, RadioClient, RequestId, SimCard, SlotData, SlotHandles};
pub use config::CapsConfig;
pub use error::{CapsError, ConfigError};
pub use events::{CapsEvent, HandlerId};
pub use manager::{RadioCapsManager, SlotStatus};
pub use raf::{AccessModes, Raf};
pub use request::{DataRole, RequestHandle};
pub use transaction::{TxPhase, TxStage};
