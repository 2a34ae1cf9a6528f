//! Error taxonomy shared by every link.

use std::sync::Arc;
use thiserror::Error;

/// Errors that can terminate a producer-consumer link or fail an operation
/// against one.
///
/// The type is `Clone` because a terminal error must be surfaced through more
/// than one channel at once: the error event delivered to the subscriber, the
/// sticky state raised from later `transfer_to` calls, and every pending
/// delivery handle. Foreign causes ride behind `Arc` so cloning never loses
/// their identity.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A subscriber requested zero demand. Demand must be positive; the link
    /// is terminated with this error rather than silently ignoring the call.
    #[error("requested demand must be positive")]
    InvalidDemand,

    /// An iterator-backed publisher produced an absent element mid-sequence.
    #[error("iterator returned an absent element")]
    AbsentElement,

    /// A second subscriber attempted to attach to a single-subscriber
    /// publisher.
    #[error("only one subscriber may be attached at a time")]
    AlreadySubscribed,

    /// A producer-side call arrived after the link already accepted a
    /// terminal signal.
    #[error("stream already received a terminal signal")]
    Terminated,

    /// The subscription was cancelled. Distinct from data errors so callers
    /// can tell a consumer-initiated teardown from an upstream failure.
    #[error("subscription has been cancelled")]
    Cancelled,

    /// A failure supplied by the upstream producer, forwarded with its
    /// identity intact.
    #[error("upstream failure: {0}")]
    Upstream(Arc<dyn std::error::Error + Send + Sync>),

    /// An I/O failure raised while draining a blocking byte source.
    #[error("I/O failure while draining source: {0}")]
    Io(Arc<std::io::Error>),
}

impl FlowError {
    /// Wraps an arbitrary upstream failure.
    pub fn upstream(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Upstream(Arc::new(source))
    }

    /// Wraps an I/O failure from a blocking source.
    pub fn io(source: std::io::Error) -> Self {
        Self::Io(Arc::new(source))
    }

    /// Returns `true` if this error models consumer-initiated cancellation.
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this error was caused by a contract violation on the
    /// link rather than by failing data.
    #[inline]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDemand | Self::AbsentElement | Self::AlreadySubscribed | Self::Terminated
        )
    }
}

impl From<FlowError> for std::io::Error {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Io(source) => {
                std::io::Error::new(source.kind(), FlowError::Io(source))
            }
            other => std::io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(FlowError::Cancelled.is_cancellation());
        assert!(!FlowError::Terminated.is_cancellation());
        assert!(FlowError::InvalidDemand.is_protocol_violation());
        assert!(!FlowError::Cancelled.is_protocol_violation());
    }

    #[test]
    fn io_conversion_preserves_kind() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = FlowError::io(source);
        let io: std::io::Error = err.into();
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn upstream_keeps_message() {
        let err = FlowError::upstream(std::fmt::Error);
        assert!(err.to_string().contains("upstream failure"));
    }
}
