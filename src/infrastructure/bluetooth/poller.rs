//! Periodic status polling with failure classification.
//!
//! While the session is connected, the poll task fetches the status
//! characteristic once immediately and then at a fixed interval. Errors are
//! classified by their transport code: codes on the fatal allowlist mean the
//! peripheral is unreachable and force the session back to disconnected;
//! everything else is logged and retried on the next tick.

use crate::domain::models::ConnectionState;
use crate::infrastructure::bluetooth::error::{codes, BleError};
use crate::infrastructure::bluetooth::service::SessionInner;
use std::collections::HashSet;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Decides which poll failures end the connection.
///
/// The default allowlist covers service-access failure, link loss and
/// no-response. It is intentionally injectable: the set is incomplete by
/// nature and deployments extend it through settings rather than code.
#[derive(Debug, Clone)]
pub struct FatalCodePolicy {
    codes: HashSet<i32>,
}

impl FatalCodePolicy {
    pub fn new(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Whether this error means the peripheral is unreachable.
    pub fn is_fatal(&self, error: &BleError) -> bool {
        error.code().is_some_and(|code| self.codes.contains(&code))
    }
}

impl Default for FatalCodePolicy {
    fn default() -> Self {
        Self::new([codes::NO_SERVICE, codes::NO_CONNECTION, codes::NO_RESPONSE])
    }
}

/// Body of the poll task. Holds only a weak session reference so a dropped
/// session ends the loop on its own.
pub(crate) async fn poll_loop(session: Weak<SessionInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // A slow fetch must not cause a burst of catch-up ticks afterwards.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick fires immediately: one fetch right after connecting.
        ticker.tick().await;

        let Some(inner) = session.upgrade() else {
            break;
        };
        if inner.connection_state() != ConnectionState::Connected {
            debug!("session left Connected, poll loop ending");
            break;
        }
        let Some(device_id) = inner.connected_device_id() else {
            break;
        };

        match inner.fetch_status(&device_id).await {
            Ok(status) => {
                debug!(state = %status.state_name, "status poll ok");
                inner.publish_status(status);
            }
            Err(err) if inner.fatal_policy().is_fatal(&err) => {
                error!(device_id, error = %err, "fatal poll failure, forcing disconnect");
                inner.force_disconnect(&err.user_message());
                break;
            }
            Err(err) => {
                warn!(device_id, error = %err, "status poll failed, retrying next tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_covers_documented_codes() {
        let policy = FatalCodePolicy::default();
        for code in [10004, 10006, 10012] {
            let err = BleError::Transport {
                code,
                message: String::new(),
            };
            assert!(policy.is_fatal(&err), "code {code} should be fatal");
        }
    }

    #[test]
    fn codeless_errors_are_transient() {
        let policy = FatalCodePolicy::default();
        assert!(!policy.is_fatal(&BleError::ReadTimeout));
        assert!(!policy.is_fatal(&BleError::ServiceNotFound("svc".into())));
        assert!(!policy.is_fatal(&BleError::Transport {
            code: 10002,
            message: String::new(),
        }));
    }

    #[test]
    fn policy_is_injectable() {
        let policy = FatalCodePolicy::new([1, 2]);
        assert!(policy.is_fatal(&BleError::Transport {
            code: 1,
            message: String::new(),
        }));
        assert!(!policy.is_fatal(&BleError::Transport {
            code: 10006,
            message: String::new(),
        }));
    }
}
