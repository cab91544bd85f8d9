//! Supplier connector state machine.
//!
//! The transition table is a pure function of `(state, pending_disconnect,
//! event)`; the driver in `connector.rs` executes the returned actions.
//!
//! ## States
//!
//! | State | Meaning | Timer |
//! |-------|---------|-------|
//! | **NO_SERVICE** | supplier declined or cancelled service | - |
//! | **DISCONNECTED** | no confirmed status (startup default) | - |
//! | **REQUEST** | service request in flight | 20s |
//! | **CONNECTED** | service accepted and queue subscribed | - |
//! | **REFUSE** | cancel request in flight | 10s |
//! | **QUEUE_PENDING** | queue subscription in flight | 10s |
//! | **CLOSED** | destroyed, terminal | - |
//!
//! Only CONNECTED, DISCONNECTED and NO_SERVICE are ever persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Marker a supplier puts at the front of a positive reply.
pub const ACCEPTED_MARKER: &str = "accepted";

/// Negotiation state of one supplier relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorState {
    NoService,
    Disconnected,
    Request,
    Connected,
    Refuse,
    QueuePending,
    Closed,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::NoService => "NO_SERVICE",
            ConnectorState::Disconnected => "DISCONNECTED",
            ConnectorState::Request => "REQUEST",
            ConnectorState::Connected => "CONNECTED",
            ConnectorState::Refuse => "REFUSE",
            ConnectorState::QueuePending => "QUEUE_PENDING",
            ConnectorState::Closed => "CLOSED",
        }
    }

    /// Coarse label surfaced to observers and persisted, if any.
    pub fn label(&self) -> Option<CoarseLabel> {
        match self {
            ConnectorState::Connected => Some(CoarseLabel::Connected),
            ConnectorState::Disconnected => Some(CoarseLabel::Disconnected),
            ConnectorState::NoService => Some(CoarseLabel::NoService),
            _ => None,
        }
    }

    /// State to resume from, given the persisted label.
    pub fn from_persisted(label: Option<&str>) -> Self {
        match label.and_then(|l| l.parse::<CoarseLabel>().ok()) {
            Some(CoarseLabel::Connected) => ConnectorState::Connected,
            Some(CoarseLabel::NoService) => ConnectorState::NoService,
            _ => ConnectorState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-valued connectivity summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoarseLabel {
    Connected,
    Disconnected,
    NoService,
}

impl CoarseLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoarseLabel::Connected => "CONNECTED",
            CoarseLabel::Disconnected => "DISCONNECTED",
            CoarseLabel::NoService => "NO_SERVICE",
        }
    }
}

impl fmt::Display for CoarseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoarseLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "CONNECTED" => Ok(CoarseLabel::Connected),
            "DISCONNECTED" => Ok(CoarseLabel::Disconnected),
            "NO_SERVICE" => Ok(CoarseLabel::NoService),
            other => Err(format!("unknown label: {}", other)),
        }
    }
}

/// Positive or negative acknowledgement payload from the supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAck {
    /// Request this ack answers; `None` for unsolicited acks
    pub request_id: Option<Uuid>,
    pub payload: String,
}

impl ServiceAck {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            request_id: None,
            payload: payload.into(),
        }
    }

    /// `isServiceAccepted`: the payload starts with the accepted marker.
    pub fn is_service_accepted(&self) -> bool {
        self.payload.starts_with(ACCEPTED_MARKER)
    }

    /// `isServiceCancelled`: an ack to a cancel request confirming the
    /// supplier previously had the service.
    pub fn is_service_cancelled(&self) -> bool {
        self.payload.starts_with(ACCEPTED_MARKER)
    }
}

/// Inputs of the connector state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    Connect,
    Disconnect,
    Ack(ServiceAck),
    Fail,
    Timer10s,
    Timer20s,
    Shutdown,
    Close,
}

impl ConnectorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectorEvent::Connect => "connect",
            ConnectorEvent::Disconnect => "disconnect",
            ConnectorEvent::Ack(_) => "ack",
            ConnectorEvent::Fail => "fail",
            ConnectorEvent::Timer10s => "timer-10s",
            ConnectorEvent::Timer20s => "timer-20s",
            ConnectorEvent::Shutdown => "shutdown",
            ConnectorEvent::Close => "close",
        }
    }
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorAction {
    RequestService,
    CancelService,
    RequestQueue,
    CancelQueue,
    CleanRequest,
    Report(CoarseLabel),
    Destroy,
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: ConnectorState,
    pub pending_disconnect: bool,
    pub actions: Vec<ConnectorAction>,
}

impl Transition {
    fn to(to: ConnectorState, pending_disconnect: bool, actions: Vec<ConnectorAction>) -> Self {
        Self {
            to,
            pending_disconnect,
            actions,
        }
    }
}

/// Apply one event to the connector state machine.
///
/// Combinations not listed leave the state and flag unchanged.
pub fn transition(state: ConnectorState, pending_disconnect: bool, event: &ConnectorEvent) -> Transition {
    use ConnectorAction::*;
    use ConnectorEvent as E;
    use ConnectorState as S;

    let pd = pending_disconnect;
    let accepted = |e: &ConnectorEvent| matches!(e, E::Ack(ack) if ack.is_service_accepted());

    match (state, event) {
        (S::NoService, E::Connect) => Transition::to(S::Request, false, vec![RequestService]),
        (S::NoService, e) if accepted(e) => {
            Transition::to(S::Connected, pd, vec![Report(CoarseLabel::Connected)])
        }
        (S::NoService, E::Disconnect) => {
            Transition::to(S::NoService, pd, vec![Report(CoarseLabel::NoService)])
        }
        (S::NoService, E::Shutdown) => Transition::to(S::Closed, pd, vec![Destroy]),

        (S::Disconnected, E::Connect) => Transition::to(S::Request, false, vec![RequestService]),
        (S::Disconnected, e) if accepted(e) => {
            Transition::to(S::Connected, pd, vec![Report(CoarseLabel::Connected)])
        }
        (S::Disconnected, E::Disconnect) => Transition::to(S::Refuse, pd, vec![CancelService]),
        (S::Disconnected, E::Fail) => {
            Transition::to(S::NoService, pd, vec![Report(CoarseLabel::NoService)])
        }
        (S::Disconnected, E::Shutdown) => Transition::to(S::Closed, pd, vec![Destroy]),

        (S::Request, E::Disconnect) => Transition::to(S::Request, true, vec![]),
        (S::Request, E::Shutdown) => Transition::to(S::Closed, pd, vec![Destroy]),
        (S::Request, e) if pd && accepted(e) => Transition::to(S::Refuse, pd, vec![CancelService]),
        (S::Request, E::Timer20s) => Transition::to(
            S::Disconnected,
            pd,
            vec![CleanRequest, Report(CoarseLabel::Disconnected)],
        ),
        (S::Request, E::Fail) => {
            Transition::to(S::NoService, pd, vec![Report(CoarseLabel::NoService)])
        }
        (S::Request, E::Ack(ack)) if !pd && !ack.is_service_accepted() => {
            Transition::to(S::NoService, pd, vec![Report(CoarseLabel::NoService)])
        }
        (S::Request, e) if !pd && accepted(e) => {
            Transition::to(S::QueuePending, pd, vec![RequestQueue])
        }

        (S::Connected, E::Close) => Transition::to(S::Closed, pd, vec![Destroy]),
        (S::Connected, E::Disconnect) => Transition::to(S::Refuse, pd, vec![CancelService]),
        (S::Connected, E::Fail | E::Connect) => {
            Transition::to(S::Request, false, vec![RequestService])
        }

        (S::Refuse, E::Shutdown) => Transition::to(S::Closed, pd, vec![CleanRequest, Destroy]),
        (S::Refuse, E::Timer10s | E::Fail) => Transition::to(
            S::NoService,
            pd,
            vec![CleanRequest, Report(CoarseLabel::NoService)],
        ),
        (S::Refuse, E::Ack(ack)) if ack.is_service_cancelled() => Transition::to(
            S::NoService,
            pd,
            vec![CleanRequest, Report(CoarseLabel::NoService)],
        ),

        (S::QueuePending, E::Disconnect) => Transition::to(S::QueuePending, true, vec![]),
        (S::QueuePending, E::Ack(_) | E::Fail | E::Timer10s) if pd => {
            Transition::to(S::Refuse, pd, vec![CancelQueue, CancelService])
        }
        (S::QueuePending, E::Close) => Transition::to(S::Closed, pd, vec![Destroy]),
        (S::QueuePending, E::Ack(_) | E::Fail | E::Timer10s) => {
            Transition::to(S::Connected, pd, vec![Report(CoarseLabel::Connected)])
        }

        (state, _) => Transition::to(state, pd, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectorAction::*;
    use ConnectorState as S;

    fn ack(payload: &str) -> ConnectorEvent {
        ConnectorEvent::Ack(ServiceAck::new(payload))
    }

    #[test]
    fn test_persisted_label_restores_state() {
        assert_eq!(ConnectorState::from_persisted(Some("CONNECTED")), S::Connected);
        assert_eq!(ConnectorState::from_persisted(Some("NO_SERVICE")), S::NoService);
        assert_eq!(ConnectorState::from_persisted(Some("DISCONNECTED")), S::Disconnected);
        assert_eq!(ConnectorState::from_persisted(Some("REQUEST")), S::Disconnected);
        assert_eq!(ConnectorState::from_persisted(Some("garbage")), S::Disconnected);
        assert_eq!(ConnectorState::from_persisted(None), S::Disconnected);
    }

    #[test]
    fn test_only_coarse_states_have_labels() {
        assert_eq!(S::Connected.label(), Some(CoarseLabel::Connected));
        assert_eq!(S::Request.label(), None);
        assert_eq!(S::QueuePending.label(), None);
        assert_eq!(S::Closed.label(), None);
    }

    #[test]
    fn test_request_accepted_goes_to_queue_pending() {
        let t = transition(S::Request, false, &ack("accepted:ok"));
        assert_eq!(t.to, S::QueuePending);
        assert_eq!(t.actions, vec![RequestQueue]);
    }

    #[test]
    fn test_request_accepted_with_pending_disconnect_refuses() {
        let t = transition(S::Request, true, &ack("accepted"));
        assert_eq!(t.to, S::Refuse);
        assert_eq!(t.actions, vec![CancelService]);
    }

    #[test]
    fn test_request_rejected_goes_to_no_service() {
        let t = transition(S::Request, false, &ack("denied: storage full"));
        assert_eq!(t.to, S::NoService);
        assert_eq!(t.actions, vec![Report(CoarseLabel::NoService)]);
    }

    #[test]
    fn test_request_rejected_with_pending_disconnect_is_ignored() {
        let t = transition(S::Request, true, &ack("denied"));
        assert_eq!(t.to, S::Request);
        assert!(t.actions.is_empty());
        assert!(t.pending_disconnect);
    }

    #[test]
    fn test_request_disconnect_sets_flag_only() {
        let t = transition(S::Request, false, &ConnectorEvent::Disconnect);
        assert_eq!(t.to, S::Request);
        assert!(t.pending_disconnect);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_request_timeout_disconnects() {
        let t = transition(S::Request, false, &ConnectorEvent::Timer20s);
        assert_eq!(t.to, S::Disconnected);
        assert_eq!(t.actions, vec![CleanRequest, Report(CoarseLabel::Disconnected)]);
    }

    #[test]
    fn test_connect_clears_pending_disconnect() {
        let t = transition(S::NoService, true, &ConnectorEvent::Connect);
        assert_eq!(t.to, S::Request);
        assert!(!t.pending_disconnect);
        assert_eq!(t.actions, vec![RequestService]);
    }

    #[test]
    fn test_queue_pending_outcomes() {
        for event in [ack("whatever"), ConnectorEvent::Fail, ConnectorEvent::Timer10s] {
            let t = transition(S::QueuePending, false, &event);
            assert_eq!(t.to, S::Connected);
            assert_eq!(t.actions, vec![Report(CoarseLabel::Connected)]);

            let t = transition(S::QueuePending, true, &event);
            assert_eq!(t.to, S::Refuse);
            assert_eq!(t.actions, vec![CancelQueue, CancelService]);
        }
    }

    #[test]
    fn test_refuse_ends_in_no_service() {
        for event in [ack("accepted"), ConnectorEvent::Fail, ConnectorEvent::Timer10s] {
            let t = transition(S::Refuse, false, &event);
            assert_eq!(t.to, S::NoService);
            assert_eq!(t.actions, vec![CleanRequest, Report(CoarseLabel::NoService)]);
        }
        // an ack that does not confirm the cancel is ignored
        let t = transition(S::Refuse, false, &ack("unknown service"));
        assert_eq!(t.to, S::Refuse);
    }

    #[test]
    fn test_shutdown_and_close_reach_closed() {
        assert_eq!(transition(S::NoService, false, &ConnectorEvent::Shutdown).to, S::Closed);
        assert_eq!(transition(S::Disconnected, false, &ConnectorEvent::Shutdown).to, S::Closed);
        assert_eq!(transition(S::Request, false, &ConnectorEvent::Shutdown).to, S::Closed);
        assert_eq!(
            transition(S::Refuse, false, &ConnectorEvent::Shutdown).actions,
            vec![CleanRequest, Destroy]
        );
        assert_eq!(transition(S::Connected, false, &ConnectorEvent::Close).to, S::Closed);
        assert_eq!(transition(S::QueuePending, false, &ConnectorEvent::Close).to, S::Closed);

        // shutdown is not listed for CONNECTED, close is not listed for REQUEST
        assert_eq!(transition(S::Connected, false, &ConnectorEvent::Shutdown).to, S::Connected);
        assert_eq!(transition(S::Request, false, &ConnectorEvent::Close).to, S::Request);
    }

    #[test]
    fn test_closed_is_terminal() {
        for event in [
            ConnectorEvent::Connect,
            ConnectorEvent::Disconnect,
            ack("accepted"),
            ConnectorEvent::Fail,
            ConnectorEvent::Timer10s,
            ConnectorEvent::Timer20s,
            ConnectorEvent::Shutdown,
            ConnectorEvent::Close,
        ] {
            let t = transition(S::Closed, false, &event);
            assert_eq!(t.to, S::Closed);
            assert!(t.actions.is_empty());
        }
    }
}
