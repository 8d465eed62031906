//! The connection-level state machine (C10). Distinct from the low-level
//! fragmentation tracking in `read.rs`: this tracks where the *connection*
//! is in the close handshake, not where a single message is in reassembly.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake is still in progress; no data frames may be exchanged yet.
    Connecting,
    /// Normal operation; either side may send data or control frames.
    Open,
    /// This side has sent a Close frame and is waiting for the peer's Close.
    CloseSent,
    /// The peer's Close frame has been received; a Close reply is pending.
    CloseReceived,
    /// Both sides have exchanged Close frames; the connection ended cleanly.
    Closed,
    /// The connection ended due to a protocol violation, I/O error, or
    /// timeout, without a clean close handshake.
    Aborted,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Aborted)
    }

    pub fn can_send_data(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// This side just sent a Close frame.
    pub fn on_close_sent(self) -> Self {
        match self {
            ConnectionState::CloseReceived => ConnectionState::Closed,
            _ => ConnectionState::CloseSent,
        }
    }

    /// A Close frame just arrived from the peer.
    pub fn on_close_received(self) -> Self {
        match self {
            ConnectionState::CloseSent => ConnectionState::Closed,
            _ => ConnectionState::CloseReceived,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simultaneous_close_reaches_closed() {
        let mut state = ConnectionState::Open;
        state = state.on_close_sent();
        assert_eq!(state, ConnectionState::CloseSent);
        state = state.on_close_received();
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn peer_initiated_close_then_reply_reaches_closed() {
        let mut state = ConnectionState::Open;
        state = state.on_close_received();
        assert_eq!(state, ConnectionState::CloseReceived);
        state = state.on_close_sent();
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn only_open_permits_sending_data() {
        assert!(ConnectionState::Open.can_send_data());
        assert!(!ConnectionState::CloseSent.can_send_data());
        assert!(!ConnectionState::Connecting.can_send_data());
    }

    #[test]
    fn closed_and_aborted_are_terminal() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Aborted.is_terminal());
        assert!(!ConnectionState::Open.is_terminal());
    }
}
