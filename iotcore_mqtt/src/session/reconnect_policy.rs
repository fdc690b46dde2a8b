// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reconnect policies for a [`crate::session::Session`].

use std::time::Duration;

use rand::Rng;

use crate::error::ConnectErrorKind;

/// Reason a previously-established connection was lost.
#[derive(Debug)]
pub enum ConnectionLossReason {
    /// The broker sent a DISCONNECT packet.
    DisconnectByServer(String),
    /// The underlying transport reported an I/O error.
    Transport(String),
    /// The broker violated the MQTT 5 protocol.
    ProtocolError(String),
}

/// Decides whether, and after how long, the connection state machine
/// (component J) should retry connecting.
pub trait ReconnectPolicy: Send {
    /// The delay before the next attempt after a failed CONNECT, or `None`
    /// to give up.
    fn connect_failure_reconnect_delay(
        &self,
        prev_attempts: u32,
        error: &ConnectErrorKind,
    ) -> Option<Duration>;

    /// The delay before reconnecting after a previously-established
    /// connection was lost, or `None` to give up.
    fn connection_loss_reconnect_delay(&self, reason: &ConnectionLossReason) -> Option<Duration>;
}

/// Exponential backoff with jitter, unbounded by default.
///
/// Delays range from `2^7`ms up to `max_wait`, then have a `0.90..=1.0`
/// jitter multiplier applied so that many clients reconnecting at once do
/// not all retry in lockstep.
#[derive(Clone)]
pub struct ExponentialBackoffWithJitter {
    /// The longest possible time to wait between reconnect attempts.
    pub max_wait: Duration,
    /// The max number of reconnect attempts before giving up, or `None` for unlimited.
    pub max_reconnect_attempts: Option<u32>,
}

impl ExponentialBackoffWithJitter {
    const MIN_EXPONENT: u32 = 7;
    const BASE_DELAY_MS: u64 = 2;

    fn should_reconnect(&self, prev_attempts: u32) -> bool {
        match self.max_reconnect_attempts {
            Some(max_attempts) => prev_attempts < max_attempts,
            None => true,
        }
    }

    fn calculate_delay(&self, prev_attempts: u32) -> Duration {
        let exponent = prev_attempts.saturating_add(Self::MIN_EXPONENT);
        let interval =
            Duration::from_millis(Self::BASE_DELAY_MS.saturating_pow(exponent)).min(self.max_wait);

        let jitter_multiplier = rand::thread_rng().gen_range(0.90..=1.0);
        interval.mul_f64(jitter_multiplier)
    }
}

impl Default for ExponentialBackoffWithJitter {
    /// Indefinite reconnect, with a max wait time of 60 seconds.
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(60),
            max_reconnect_attempts: None,
        }
    }
}

impl ReconnectPolicy for ExponentialBackoffWithJitter {
    fn connect_failure_reconnect_delay(
        &self,
        prev_attempts: u32,
        _error: &ConnectErrorKind,
    ) -> Option<Duration> {
        if self.should_reconnect(prev_attempts) {
            Some(self.calculate_delay(prev_attempts))
        } else {
            None
        }
    }

    fn connection_loss_reconnect_delay(&self, _reason: &ConnectionLossReason) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_bounded_by_max_wait() {
        let policy = ExponentialBackoffWithJitter {
            max_wait: Duration::from_millis(500),
            max_reconnect_attempts: None,
        };
        for attempt in 0..20 {
            let delay = policy.calculate_delay(attempt);
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = ExponentialBackoffWithJitter {
            max_wait: Duration::from_secs(1),
            max_reconnect_attempts: Some(3),
        };
        assert!(policy
            .connect_failure_reconnect_delay(2, &ConnectErrorKind::Timeout)
            .is_some());
        assert!(policy
            .connect_failure_reconnect_delay(3, &ConnectErrorKind::Timeout)
            .is_none());
    }
}
