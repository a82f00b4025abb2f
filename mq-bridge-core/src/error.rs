//! Error types for the bridge.

use mq_bridge_common::MessageError;
use thiserror::Error;

/// Boxed source error carried by resource and delivery failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used across the bridge
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised by connectors, the bridge server and the translation protocol
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Malformed or contradictory configuration, fatal for the affected connector
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A backend the connector needs is not configured or not connected
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend rejected a connect, open or subscribe call
    #[error("resource error: {message}")]
    Resource {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A bus payload could not be decoded as a bridge message
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] MessageError),

    /// Writing a single message to the sink failed
    #[error("delivery error: {message}")]
    Delivery {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// One or more connectors failed during a server start
    #[error("{failed} of {total} connectors failed to start: {summary}")]
    StartFailed {
        failed: usize,
        total: usize,
        summary: String,
    },
}

impl ConnectorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a backend-unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a resource error without an underlying cause
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a resource error wrapping the backend's error
    pub fn resource_with_source(
        msg: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Resource {
            message: msg.into(),
            source: Some(source.into()),
        }
    }

    /// Create a delivery error without an underlying cause
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a delivery error wrapping the backend's error
    pub fn delivery_with_source(
        msg: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Delivery {
            message: msg.into(),
            source: Some(source.into()),
        }
    }

    /// Whether the reconnection supervisor should retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Resource { .. } | Self::StartFailed { .. }
        )
    }

    /// Whether the error concerns a single message and must stay in the handler
    pub fn is_per_message(&self) -> bool {
        matches!(self, Self::MalformedMessage(_) | Self::Delivery { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_classification() {
        assert!(ConnectorError::unavailable("nats").is_retryable());
        assert!(ConnectorError::resource("open failed").is_retryable());
        assert!(!ConnectorError::config("bad type").is_retryable());

        let malformed: ConnectorError = MessageError::Decode("eof".into()).into();
        assert!(malformed.is_per_message());
        assert!(!malformed.is_retryable());
        assert!(ConnectorError::delivery("put failed").is_per_message());
    }

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectorError::resource_with_source("connect to QM1", io);

        assert_eq!(err.to_string(), "resource error: connect to QM1");
        assert_eq!(err.source().unwrap().to_string(), "refused");
    }
}
