//! HAL-facing data types: radio capabilities, requests, replies and errors.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::raf::Raf;

/// Phase tag carried by a set-capability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum CapabilityPhase {
    #[default]
    Configured = 0,
    Start = 1,
    Apply = 2,
    UnsolRsp = 3,
    Finish = 4,
}

/// Status carried by a set-capability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum CapabilityStatus {
    #[default]
    None = 0,
    Success = 1,
    Fail = 2,
}

/// A logical modem's radio capability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RadioCapability {
    /// Transaction id the capability was exchanged under (0 outside a switch).
    pub session: u32,
    pub phase: CapabilityPhase,
    pub raf: Raf,
    pub logical_modem_uuid: String,
    pub status: CapabilityStatus,
}

impl RadioCapability {
    /// A configured capability, as reported by `GetRadioCapability`.
    pub fn new(raf: Raf, logical_modem_uuid: impl Into<String>) -> Self {
        RadioCapability {
            raf,
            logical_modem_uuid: logical_modem_uuid.into(),
            ..Default::default()
        }
    }

    /// Whether two capabilities describe the same hardware assignment.
    pub fn same_assignment(&self, other: &RadioCapability) -> bool {
        self.raf == other.raf && self.logical_modem_uuid == other.logical_modem_uuid
    }
}

impl fmt::Display for RadioCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.raf, self.logical_modem_uuid)
    }
}

/// An active (or failed) data call on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCall {
    pub cid: i32,
    /// False if the call is in a failed state and needs no teardown.
    pub active: bool,
}

/// Reason code for `DeactivateDataCall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivateReason {
    None,
    RadioShutdown,
    PdpReset,
}

/// A request the arbitration core sends through a [`crate::client::RadioClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioRequest {
    GetRadioCapability,
    SetRadioCapability(RadioCapability),
    DeactivateDataCall { cid: i32, reason: DeactivateReason },
    SetDataAllowed(bool),
    SetAllowedNetworkTypes(Raf),
}

impl RadioRequest {
    /// Short opcode name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RadioRequest::GetRadioCapability => "getRadioCapability",
            RadioRequest::SetRadioCapability(_) => "setRadioCapability",
            RadioRequest::DeactivateDataCall { .. } => "deactivateDataCall",
            RadioRequest::SetDataAllowed(_) => "setDataAllowed",
            RadioRequest::SetAllowedNetworkTypes(_) => "setAllowedNetworkTypesBitmap",
        }
    }
}

/// Per-request transport options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestOptions {
    /// No other request on the channel may interleave with this one.
    pub blocking: bool,
    /// Transport-level timeout. `None` uses the client's default.
    pub timeout: Option<Duration>,
}

/// Successful reply payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Empty,
    Capability(RadioCapability),
}

/// HAL error code carried in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RadioError {
    #[error("RADIO_NOT_AVAILABLE")]
    RadioNotAvailable,
    #[error("GENERIC_FAILURE")]
    GenericFailure,
    #[error("REQUEST_NOT_SUPPORTED")]
    RequestNotSupported,
    #[error("OPERATION_NOT_ALLOWED")]
    OperationNotAllowed,
    #[error("INVALID_ARGUMENTS")]
    InvalidArguments,
    #[error("INTERNAL_ERR")]
    InternalErr,
    #[error("error {0}")]
    Other(i32),
}

impl RadioError {
    /// Errors meaning "this modem cannot switch capabilities at all".
    pub fn is_unsupported(self) -> bool {
        matches!(
            self,
            RadioError::RequestNotSupported | RadioError::OperationNotAllowed
        )
    }
}

/// RPC-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("radio service disconnected")]
    Disconnected,
    #[error("malformed reply")]
    Malformed,
    #[error("request cancelled")]
    Cancelled,
}

/// Why a request did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestFailure {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("radio: {0}")]
    Radio(#[from] RadioError),
}

/// Outcome of one request, as delivered back to the manager.
pub type Response = Result<Reply, RequestFailure>;

/// Unsolicited notifications relevant to arbitration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    /// The modem reported a (possibly changed) radio capability.
    RadioCapability(RadioCapability),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_errors_are_terminal() {
        assert!(RadioError::RequestNotSupported.is_unsupported());
        assert!(RadioError::OperationNotAllowed.is_unsupported());
        assert!(!RadioError::GenericFailure.is_unsupported());
        assert!(!RadioError::Other(42).is_unsupported());
    }

    #[test]
    fn same_assignment_ignores_transaction_fields() {
        let a = RadioCapability::new(Raf::LTE, "modem0");
        let b = RadioCapability {
            session: 7,
            phase: CapabilityPhase::Finish,
            status: CapabilityStatus::Success,
            ..a.clone()
        };
        assert!(a.same_assignment(&b));
        assert!(!a.same_assignment(&RadioCapability::new(Raf::GSM, "modem0")));
    }

    #[test]
    fn failure_display() {
        let f: RequestFailure = TransportError::Timeout.into();
        assert_eq!(f.to_string(), "transport: request timed out");
        let f: RequestFailure = RadioError::GenericFailure.into();
        assert_eq!(f.to_string(), "radio: GENERIC_FAILURE");
    }
}
