//! Broker session state machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Subscribed ──► Running ──► Stopped
//!                      │              │             │             │
//!                      └──────────────┴─────────────┴─────────────┴──► Failed
//! ```
//!
//! [`step`] is a pure function of the current state and one [`SessionEvent`].
//! It returns the next state together with the [`Effect`]s the caller has to
//! perform, so the whole lifecycle can be exercised without a broker.

use super::message_manager::InboundMessage;
use std::fmt;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    /// Subscription is live, messages flow until the run window closes
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The client started opening the transport
    ConnectIssued,
    /// CONNACK reason code, 0 means accepted
    ConnAck(u8),
    /// Granted QoS, `None` when the broker refused the subscription
    SubAck(Option<u8>),
    /// The worker finished handling the SUBACK and opened the message window
    WindowOpened,
    Message(InboundMessage),
    TransportError(String),
    /// The run window closed
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    ReportConnected,
    Subscribe,
    ReportRejected { code: u8, reason: &'static str },
    ReportSubscribed { qos: u8 },
    /// Feed [`SessionEvent::WindowOpened`] back into the machine
    OpenWindow,
    ReportSubscribeRefused,
    Deliver(InboundMessage),
    ReportTransportFailure(String),
}

/// Human readable text for a CONNACK reason code.
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "Connection accepted",
        1 => "Connection refused - incorrect protocol version",
        2 => "Connection refused - invalid client identifier",
        3 => "Connection refused - server unavailable",
        4 => "Connection refused - bad username or password",
        5 => "Connection refused - not authorised",
        _ => "Unknown Error",
    }
}

pub fn step(state: SessionState, event: SessionEvent) -> (SessionState, Vec<Effect>) {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        // Failed only ends the process flow, nothing brings it back
        (S::Failed, _) => (S::Failed, Vec::new()),
        (S::Stopped, _) => (S::Stopped, Vec::new()),

        (_, E::Shutdown) => (S::Stopped, Vec::new()),

        (S::Disconnected, E::ConnectIssued) => (S::Connecting, Vec::new()),

        (S::Connecting | S::Disconnected, E::ConnAck(0)) => {
            (S::Connected, vec![Effect::ReportConnected, Effect::Subscribe])
        }
        (S::Connecting | S::Disconnected, E::ConnAck(code)) => (
            S::Failed,
            vec![Effect::ReportRejected {
                code,
                reason: connack_reason(code),
            }],
        ),

        (S::Connected, E::SubAck(Some(qos))) => {
            (S::Subscribed, vec![Effect::ReportSubscribed { qos }, Effect::OpenWindow])
        }
        (S::Connected, E::SubAck(None)) => (S::Failed, vec![Effect::ReportSubscribeRefused]),

        (S::Subscribed, E::WindowOpened) => (S::Running, Vec::new()),

        (S::Connected, E::Message(msg)) => (S::Connected, vec![Effect::Deliver(msg)]),
        (S::Subscribed | S::Running, E::Message(msg)) => (S::Running, vec![Effect::Deliver(msg)]),

        (_, E::TransportError(reason)) => {
            (S::Failed, vec![Effect::ReportTransportFailure(reason)])
        }

        // Duplicate acks and out of order notifications change nothing
        (state, _) => (state, Vec::new()),
    }
}
