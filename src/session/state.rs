use std::fmt;

/// Connectivity of the single logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not connected and not trying to be. Also the state after an explicit disconnect.
    #[default]
    Disconnected,
    Connecting,
    /// A new device asked to be linked; waiting for the operator.
    AwaitingPairApproval,
    /// Socket open, app state still syncing. Presence has not been sent.
    ConnectedSyncing,
    ConnectedAvailable,
    /// Connection lost unexpectedly; the retry loop owns the session.
    Reconnecting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingPairApproval => "awaiting_pair_approval",
            Self::ConnectedSyncing => "connected_syncing",
            Self::ConnectedAvailable => "connected_available",
            Self::Reconnecting => "reconnecting",
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedSyncing | Self::ConnectedAvailable)
    }

    /// An unexpected disconnect from this state starts the retry loop.
    pub fn should_reconnect(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Reconnecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_sockets_count_as_connected() {
        assert!(SessionState::ConnectedSyncing.is_connected());
        assert!(SessionState::ConnectedAvailable.is_connected());
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::AwaitingPairApproval,
            SessionState::Reconnecting,
        ] {
            assert!(!state.is_connected(), "{state}");
        }
    }

    #[test]
    fn manual_disconnect_and_active_retry_suppress_reconnect() {
        assert!(!SessionState::Disconnected.should_reconnect());
        assert!(!SessionState::Reconnecting.should_reconnect());
        assert!(SessionState::Connecting.should_reconnect());
        assert!(SessionState::ConnectedAvailable.should_reconnect());
    }
}
