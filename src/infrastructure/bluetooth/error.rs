//! BLE error taxonomy.
//!
//! Transport failures keep the adapter's numeric error code so callers (most
//! importantly the status poller) can classify them. Everything else is a
//! structured protocol or usage error.

use thiserror::Error;

/// Numeric transport error codes reported by the adapter.
///
/// The values mirror the peripheral platform's error space so the
/// fatal-classification allowlist stays configurable as plain numbers.
pub mod codes {
    /// The device's GATT service table could not be accessed.
    pub const NO_SERVICE: i32 = 10004;
    /// The logical connection to the device is gone.
    pub const NO_CONNECTION: i32 = 10006;
    /// The device did not respond to a request.
    pub const NO_RESPONSE: i32 = 10012;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    /// Native adapter failure carrying the platform error code.
    #[error("transport failure (code {code}): {message}")]
    Transport { code: i32, message: String },

    /// No correlated value notification arrived within the read deadline.
    #[error("timed out waiting for characteristic value")]
    ReadTimeout,

    #[error("service {0} not found on device")]
    ServiceNotFound(String),

    #[error("characteristic {0} not found in service")]
    CharacteristicNotFound(String),

    /// The characteristic supports neither notify nor indicate. Callers are
    /// expected to fall back to polling.
    #[error("characteristic {0} does not support notify or indicate")]
    NotifyUnsupported(String),

    #[error("unsupported integer width: {0} bytes")]
    UnsupportedWidth(usize),

    /// Another operation of the same class is still in flight.
    #[error("{0} already in progress")]
    AlreadyInProgress(&'static str),

    #[error("no device connected")]
    NotConnected,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl BleError {
    /// Native transport code, if this error carries one.
    pub fn code(&self) -> Option<i32> {
        match self {
            BleError::Transport { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Human-readable message for terminal, user-facing reporting.
    pub fn user_message(&self) -> String {
        match self.code() {
            Some(codes::NO_SERVICE) => "Device service access failed".to_string(),
            Some(codes::NO_CONNECTION) => "Device connection lost".to_string(),
            Some(codes::NO_RESPONSE) => "Device not responding".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_exposes_code() {
        let err = BleError::Transport {
            code: codes::NO_CONNECTION,
            message: "gone".to_string(),
        };
        assert_eq!(err.code(), Some(10006));
        assert_eq!(err.user_message(), "Device connection lost");
    }

    #[test]
    fn protocol_errors_have_no_code() {
        assert_eq!(BleError::ReadTimeout.code(), None);
        assert_eq!(BleError::ServiceNotFound("abc".into()).code(), None);
    }

    #[test]
    fn unknown_codes_fall_back_to_display() {
        let err = BleError::Transport {
            code: 1,
            message: "boom".to_string(),
        };
        assert_eq!(err.user_message(), "transport failure (code 1): boom");
    }
}
