use std::time::Duration;

use topicrpc_core::CodecError;

use crate::traits::BrokerError;

/// Why a gateway call produced no response.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The service is not in the topology. No broker I/O was attempted.
    #[error("unknown service {0}")]
    UnknownService(String),
    /// No matching reply arrived before the deadline.
    #[error("no reply from {service} within {timeout:?}")]
    Timeout { service: String, timeout: Duration },
    /// Publishing, opening a broker handle, or the reply reader failed.
    #[error("broker transport failure: {0}")]
    Transport(#[from] BrokerError),
    /// A message could not be encoded or decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] CodecError),
}

impl CallError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::UnknownService(_) => "unknown_service",
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
            Self::MalformedMessage(_) => "malformed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_convert_to_transport() {
        let err: CallError = BrokerError::Closed.into();
        assert!(matches!(err, CallError::Transport(BrokerError::Closed)));
        assert_eq!(err.outcome(), "transport");
    }

    #[test]
    fn timeout_message_names_service() {
        let err = CallError::Timeout {
            service: "patients".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "no reply from patients within 30s");
    }
}
