//! Property-based tests for the connector transition table
//!
//! Tests for:
//! - CLOSED is terminal
//! - Reported labels match the state reached
//! - Destroy happens exactly on entering CLOSED
//! - Service requests always start without a pending disconnect

use super::state::{
    transition, CoarseLabel, ConnectorAction, ConnectorEvent, ConnectorState, ServiceAck,
};
use proptest::prelude::*;

fn any_state() -> impl Strategy<Value = ConnectorState> {
    prop_oneof![
        Just(ConnectorState::NoService),
        Just(ConnectorState::Disconnected),
        Just(ConnectorState::Request),
        Just(ConnectorState::Connected),
        Just(ConnectorState::Refuse),
        Just(ConnectorState::QueuePending),
        Just(ConnectorState::Closed),
    ]
}

fn any_event() -> impl Strategy<Value = ConnectorEvent> {
    prop_oneof![
        Just(ConnectorEvent::Connect),
        Just(ConnectorEvent::Disconnect),
        Just(ConnectorEvent::Ack(ServiceAck::new("accepted"))),
        Just(ConnectorEvent::Ack(ServiceAck::new("accepted:quota ok"))),
        Just(ConnectorEvent::Ack(ServiceAck::new("denied"))),
        Just(ConnectorEvent::Fail),
        Just(ConnectorEvent::Timer10s),
        Just(ConnectorEvent::Timer20s),
        Just(ConnectorEvent::Shutdown),
        Just(ConnectorEvent::Close),
    ]
}

proptest! {
    /// Property: once CLOSED, no event moves the connector or acts
    #[test]
    fn closed_is_absorbing(
        start in any_state(),
        events in prop::collection::vec(any_event(), 0..40),
    ) {
        let mut state = start;
        let mut pd = false;
        let mut closed = start == ConnectorState::Closed;
        for event in &events {
            let t = transition(state, pd, event);
            if closed {
                prop_assert_eq!(t.to, ConnectorState::Closed);
                prop_assert!(t.actions.is_empty());
            }
            state = t.to;
            pd = t.pending_disconnect;
            closed |= state == ConnectorState::Closed;
        }
    }

    /// Property: every Report carries the label of the state reached
    #[test]
    fn reports_match_target_label(
        state in any_state(),
        pd in any::<bool>(),
        event in any_event(),
    ) {
        let t = transition(state, pd, &event);
        for action in &t.actions {
            if let ConnectorAction::Report(label) = action {
                prop_assert_eq!(t.to.label(), Some(*label));
            }
        }
    }

    /// Property: Destroy is emitted exactly when entering CLOSED
    #[test]
    fn destroy_iff_entering_closed(
        state in any_state(),
        pd in any::<bool>(),
        event in any_event(),
    ) {
        let t = transition(state, pd, &event);
        let destroys = t.actions.contains(&ConnectorAction::Destroy);
        let entering = state != ConnectorState::Closed && t.to == ConnectorState::Closed;
        prop_assert_eq!(destroys, entering);
    }

    /// Property: a service request is never sent with a disconnect pending
    #[test]
    fn request_clears_pending_disconnect(
        state in any_state(),
        pd in any::<bool>(),
        event in any_event(),
    ) {
        let t = transition(state, pd, &event);
        if t.actions.contains(&ConnectorAction::RequestService) {
            prop_assert!(!t.pending_disconnect);
            prop_assert_eq!(t.to, ConnectorState::Request);
        }
    }

    /// Property: a transition that keeps the state reports at most NO_SERVICE
    #[test]
    fn self_loops_are_quiet(
        state in any_state(),
        pd in any::<bool>(),
        event in any_event(),
    ) {
        let t = transition(state, pd, &event);
        if t.to == state {
            for action in &t.actions {
                prop_assert_eq!(*action, ConnectorAction::Report(CoarseLabel::NoService));
            }
        }
    }
}
