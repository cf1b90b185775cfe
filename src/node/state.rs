//! Connection state of a node's transport channel.
//!
//! ```text
//! Idle --open--> Connecting --ok--> Ready
//!                Connecting --err--> TransientFailure
//! Ready --transient error--> TransientFailure --ok--> Ready
//! any --close--> Shutdown   (terminal)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
    Shutdown = 4,
}

impl ConnectionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of `as_u8`; unknown values map to `Shutdown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            3 => ConnectionState::TransientFailure,
            _ => ConnectionState::Shutdown,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Shutdown
    }

    /// Whether the channel may move from `self` to `next`.
    ///
    /// Besides the edges drawn above, a channel may drop back to `Idle` or
    /// start reconnecting from `TransientFailure`, as channels that
    /// reconnect lazily do.
    pub fn allows(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Shutdown, _) => false,
            (_, Shutdown) => true,
            (Idle, Connecting) => true,
            // Lazy channels connect on first use.
            (Idle, Ready) | (Idle, TransientFailure) => true,
            (Connecting, Ready) | (Connecting, TransientFailure) => true,
            (Ready, TransientFailure) | (Ready, Idle) => true,
            (TransientFailure, Ready) | (TransientFailure, Connecting) => true,
            (TransientFailure, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::TransientFailure => "transient_failure",
            ConnectionState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    const ALL: [ConnectionState; 5] = [Idle, Connecting, Ready, TransientFailure, Shutdown];

    #[test]
    fn test_u8_round_trip() {
        for state in ALL {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_shutdown_is_terminal() {
        assert!(Shutdown.is_terminal());
        for next in ALL {
            assert_eq!(Shutdown.allows(next), next == Shutdown);
        }
        for state in ALL {
            assert!(state.allows(Shutdown));
        }
    }

    #[test]
    fn test_transition_table() {
        assert!(Idle.allows(Connecting));
        assert!(Connecting.allows(Ready));
        assert!(Connecting.allows(TransientFailure));
        assert!(Ready.allows(TransientFailure));
        assert!(TransientFailure.allows(Ready));

        assert!(!Ready.allows(Connecting));
        assert!(!Connecting.allows(Idle));
    }
}
