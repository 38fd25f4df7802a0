//! Transport-free connection policy for the signaling client.
//!
//! [`SignalingMachine`] decides what to do on every socket event and returns
//! [`Action`]s for the driver to carry out. Keeping it free of I/O lets the
//! reconnect rules be tested without a server.

use std::time::Duration;

use tandem_core::net::messages::CloseCode;
use tandem_core::net::protocol::{MAX_RECONNECT_DELAY, RECONNECT_STEP, reconnect_delay};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A reconnect attempt is scheduled.
    Reconnecting,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    StartPing,
    StopPing,
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Fire the caller's reconnect callback.
    NotifyReconnected,
    Close(CloseCode),
}

#[derive(Debug, Clone)]
pub struct SignalingMachine {
    state: ConnectionState,
    /// Consecutive failed attempts since the last successful open.
    attempts: u32,
    has_connected_once: bool,
    step: Duration,
    cap: Duration,
}

impl Default for SignalingMachine {
    fn default() -> Self {
        Self::new(RECONNECT_STEP, MAX_RECONNECT_DELAY)
    }
}

impl SignalingMachine {
    pub fn new(step: Duration, cap: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            has_connected_once: false,
            step,
            cap,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn connect(&mut self) -> Result<Vec<Action>, ClientError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        self.state = ConnectionState::Connecting;
        Ok(vec![Action::Open])
    }

    pub fn on_open(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            // Torn down while the socket was opening
            return vec![Action::Close(CloseCode::GoingAway)];
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        let mut actions = vec![Action::StartPing];
        if self.has_connected_once {
            actions.push(Action::NotifyReconnected);
        }
        self.has_connected_once = true;
        actions
    }

    /// The server closed the channel, with `code` if a close frame carried one.
    pub fn on_close(&mut self, code: Option<u16>) -> Vec<Action> {
        let terminal = code
            .and_then(CloseCode::from_u16)
            .is_some_and(CloseCode::is_terminal);
        self.on_drop(terminal)
    }

    /// Opening failed or the transport broke.
    pub fn on_error(&mut self) -> Vec<Action> {
        self.on_drop(false)
    }

    fn on_drop(&mut self, terminal: bool) -> Vec<Action> {
        let mut actions = Vec::new();
        match self.state {
            // Already handled, or a reconnect is already scheduled
            ConnectionState::Disconnected | ConnectionState::Reconnecting => return actions,
            ConnectionState::Connected => actions.push(Action::StopPing),
            ConnectionState::Connecting => {},
        }

        if terminal {
            self.state = ConnectionState::Disconnected;
            return actions;
        }
        let delay = reconnect_delay(self.attempts, self.step, self.cap);
        self.attempts = self.attempts.saturating_add(1);
        self.state = ConnectionState::Reconnecting;
        actions.push(Action::ScheduleReconnect(delay));
        actions
    }

    /// The reconnect delay elapsed.
    pub fn on_reconnect_due(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Reconnecting {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![Action::Open]
    }

    /// Caller teardown: close with `GOING_AWAY` and stay disconnected.
    pub fn close(&mut self) -> Vec<Action> {
        let actions = match self.state {
            ConnectionState::Disconnected => Vec::new(),
            ConnectionState::Connecting => vec![Action::Close(CloseCode::GoingAway)],
            ConnectionState::Connected => {
                vec![Action::StopPing, Action::Close(CloseCode::GoingAway)]
            },
            ConnectionState::Reconnecting => vec![Action::CancelReconnect],
        };
        self.state = ConnectionState::Disconnected;
        actions
    }
}
