//! # Transaction State
//!
//! The singleton bookkeeping for a capability switch. The coordinator walks
//! it through:
//!
//! ```text
//!   Idle ─▶ WaitSimIoQuiet ─▶ WaitIoLock ─▶ DeactivatingCalls ─▶ DataOff
//!                                                                  │
//!   Idle ◀── Phase(Finish) ◀── Phase(Apply) ◀── Phase(Start) ◀─────┘
//!     ▲
//!     └── Aborting ◀── (any step, once `failed` is set)
//! ```

use std::fmt;

use crate::radio::{CapabilityPhase, CapabilityStatus};

/// The three HAL phases of a successful switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxPhase {
    Start,
    Apply,
    Finish,
}

impl TxPhase {
    pub const ALL: [TxPhase; 3] = [TxPhase::Start, TxPhase::Apply, TxPhase::Finish];

    pub fn index(self) -> usize {
        match self {
            TxPhase::Start => 0,
            TxPhase::Apply => 1,
            TxPhase::Finish => 2,
        }
    }

    pub fn next(self) -> Option<TxPhase> {
        TxPhase::ALL.get(self.index() + 1).copied()
    }

    pub fn request(self) -> PhaseRequest {
        match self {
            TxPhase::Start => PhaseRequest {
                name: "START",
                phase: CapabilityPhase::Start,
                status: CapabilityStatus::None,
                send_new_cap: false,
            },
            TxPhase::Apply => PhaseRequest {
                name: "APPLY",
                phase: CapabilityPhase::Apply,
                status: CapabilityStatus::None,
                send_new_cap: true,
            },
            TxPhase::Finish => PhaseRequest {
                name: "FINISH",
                phase: CapabilityPhase::Finish,
                status: CapabilityStatus::Success,
                send_new_cap: true,
            },
        }
    }
}

/// What a set-capability request carries for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRequest {
    pub name: &'static str,
    pub phase: CapabilityPhase,
    pub status: CapabilityStatus,
    /// Send the capability being switched to rather than the old one.
    pub send_new_cap: bool,
}

/// Rollback request issued to every participant of a failed switch.
pub const ABORT_REQUEST: PhaseRequest = PhaseRequest {
    name: "ABORT",
    phase: CapabilityPhase::Finish,
    status: CapabilityStatus::Fail,
    send_new_cap: false,
};

/// Where the coordinator is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TxStage {
    #[default]
    Idle,
    WaitSimIoQuiet,
    WaitIoLock,
    DeactivatingCalls,
    DataOff,
    Phase(TxPhase),
    Aborting,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStage::Idle => write!(f, "idle"),
            TxStage::WaitSimIoQuiet => write!(f, "wait-sim-io"),
            TxStage::WaitIoLock => write!(f, "wait-io-lock"),
            TxStage::DeactivatingCalls => write!(f, "deactivating-calls"),
            TxStage::DataOff => write!(f, "data-off"),
            TxStage::Phase(p) => write!(f, "{}", p.request().name),
            TxStage::Aborting => write!(f, "aborting"),
        }
    }
}

/// Singleton transaction bookkeeping.
#[derive(Debug, Default)]
pub struct TransactionState {
    tx_id: u32,
    stage: TxStage,
    failed: bool,
    /// Slot indices taking part in the current transaction.
    participants: Vec<usize>,
}

impl TransactionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_id(&self) -> u32 {
        self.tx_id
    }

    pub fn stage(&self) -> TxStage {
        self.stage
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn is_idle(&self) -> bool {
        self.stage == TxStage::Idle
    }

    /// -1 outside the HAL phases, 0/1/2 for START/APPLY/FINISH.
    pub fn phase_index(&self) -> i32 {
        match self.stage {
            TxStage::Phase(p) => p.index() as i32,
            _ => -1,
        }
    }

    pub fn participants(&self) -> &[usize] {
        &self.participants
    }

    /// Allocate a fresh transaction id (never 0) and reset the failure flag.
    pub fn next_transaction(&mut self) -> u32 {
        self.tx_id = next_id(self.tx_id);
        self.failed = false;
        self.tx_id
    }

    /// Retire the current id for an abort; participants keep their slots.
    pub fn retire_for_abort(&mut self) -> u32 {
        self.tx_id = next_id(self.tx_id);
        self.tx_id
    }

    pub fn begin(&mut self, participants: Vec<usize>) {
        self.participants = participants;
    }

    pub fn set_stage(&mut self, stage: TxStage) {
        tracing::debug!(tx_id = self.tx_id, from = %self.stage, to = %stage, "tx stage");
        self.stage = stage;
    }

    /// Sticky failure flag.
    pub fn mark_failed(&mut self) {
        if !self.failed {
            tracing::debug!(tx_id = self.tx_id, "transaction failed");
        }
        self.failed = true;
    }

    pub fn drop_participant(&mut self, slot: usize) {
        self.participants.retain(|&s| s != slot);
    }

    /// Return to idle; the id counter is kept.
    pub fn finish(&mut self) -> Vec<usize> {
        self.stage = TxStage::Idle;
        self.failed = false;
        std::mem::take(&mut self.participants)
    }
}

fn next_id(id: u32) -> u32 {
    match id.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}
