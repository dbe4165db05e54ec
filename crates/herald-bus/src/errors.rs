//! Bus error types.

use thiserror::Error;

/// Errors raised by a [`PubSubBus`](crate::PubSubBus).
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has not been connected (or was disconnected).
    #[error("bus is not connected")]
    NotConnected,
    /// Redis connection or command failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Backend-specific failure.
    #[error("bus backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(BusError::NotConnected.to_string(), "bus is not connected");
        assert_eq!(
            BusError::Backend("boom".into()).to_string(),
            "bus backend error: boom"
        );
    }

    #[test]
    fn from_redis_error() {
        let err: BusError = redis::RedisError::from((redis::ErrorKind::IoError, "refused")).into();
        assert!(matches!(err, BusError::Redis(_)));
        assert!(err.to_string().contains("refused"));
    }
}
