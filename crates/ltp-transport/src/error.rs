use ltp_wire::ProtocolError;

/// Errors surfaced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// `true` for failures worth retrying with backoff (the transient
    /// network class: refused, reset, timed out).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Closed | TransportError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_not_transient() {
        let err = TransportError::Protocol(ProtocolError::invalid_format("bad magic"));
        assert!(!err.is_transient());
        assert!(TransportError::Closed.is_transient());
        assert!(TransportError::Timeout(std::time::Duration::from_secs(5)).is_transient());
    }
}
