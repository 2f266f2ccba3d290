use std::fmt::{Display, Formatter};
use std::io;

/// The classification of a single probe attempt. There is exactly one outcome per attempt.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProbeOutcome {
    Success,
    Timeout,
    /// The target (or a router on the way) answered with 'destination unreachable'
    HostUnreachable,
    HostNotFound,
    InvalidChecksum,
    InvalidSize,
    InvalidResponseId,
    InvalidResponseType,
    TransportError(TransportError),
}

/// The coarse categories probe outcomes fall into. The liveness monitor treats all
///  non-success categories as a miss, but logs [OutcomeCategory::Transport] more prominently
///  since it usually points at the local environment rather than the network.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OutcomeCategory {
    Success,
    Resolution,
    Protocol,
    Unreachable,
    Timeout,
    Transport,
}

impl ProbeOutcome {
    pub fn transport(operation: &'static str, error: io::Error) -> ProbeOutcome {
        ProbeOutcome::TransportError(TransportError::new(operation, &error))
    }

    pub fn is_success(&self) -> bool {
        *self == ProbeOutcome::Success
    }

    pub fn category(&self) -> OutcomeCategory {
        match self {
            ProbeOutcome::Success => OutcomeCategory::Success,
            ProbeOutcome::Timeout => OutcomeCategory::Timeout,
            ProbeOutcome::HostUnreachable => OutcomeCategory::Unreachable,
            ProbeOutcome::HostNotFound => OutcomeCategory::Resolution,
            ProbeOutcome::InvalidChecksum |
            ProbeOutcome::InvalidSize |
            ProbeOutcome::InvalidResponseId |
            ProbeOutcome::InvalidResponseType => OutcomeCategory::Protocol,
            ProbeOutcome::TransportError(_) => OutcomeCategory::Transport,
        }
    }
}

impl Display for ProbeOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Success => write!(f, "Success"),
            ProbeOutcome::Timeout => write!(f, "Timed out"),
            ProbeOutcome::HostUnreachable => write!(f, "Host is unreachable"),
            ProbeOutcome::HostNotFound => write!(f, "Host not found"),
            ProbeOutcome::InvalidChecksum => write!(f, "Invalid checksum"),
            ProbeOutcome::InvalidSize => write!(f, "Invalid size of reply packet"),
            ProbeOutcome::InvalidResponseId => write!(f, "Invalid ID in response"),
            ProbeOutcome::InvalidResponseType => write!(f, "Invalid response"),
            ProbeOutcome::TransportError(e) => write!(f, "{}", e),
        }
    }
}

/// A failed socket or resolver operation. The OS error is captured at the failing call and
///  stored as a value, so nothing that runs afterwards can overwrite what is reported.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransportError {
    pub operation: &'static str,
    pub kind: io::ErrorKind,
    pub raw_os_error: Option<i32>,
    pub message: String,
}
impl TransportError {
    pub fn new(operation: &'static str, error: &io::Error) -> TransportError {
        TransportError {
            operation,
            kind: error.kind(),
            raw_os_error: error.raw_os_error(),
            message: error.to_string(),
        }
    }

    /// Raw sockets need CAP_NET_RAW (or root) - this is a deployment problem rather than a
    ///  network problem, so it is worth telling apart in log output
    pub fn is_permission_denied(&self) -> bool {
        self.kind == io::ErrorKind::PermissionDenied
    }
}
impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}
