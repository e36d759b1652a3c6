//! Table-driven state machine dispatch
//!
//! A machine maps every `(state, event)` pair to a [`Transition`]: up to two
//! actions and the next state. [`dispatch`] runs the actions in order, stops
//! at the first ignore action, and only then commits the next state, so an
//! action that looks at the machine's state sees the state the event arrived
//! in.
//!
//! The lookup is a `match` over both enums, which makes a missing row a
//! compile error instead of a runtime surprise.

/// Result of a table lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S, A> {
    /// Actions to run, in order; the ignore action ends the list early
    pub actions: [A; 2],
    /// State committed after the actions ran
    pub next: S,
}

impl<S, A> Transition<S, A> {
    /// Create a transition
    #[must_use]
    pub const fn new(first: A, second: A, next: S) -> Self {
        Self { actions: [first, second], next }
    }
}

/// A state machine driven by [`dispatch`]
///
/// `C` is whatever the actions need from the outside world for one event.
pub trait StateMachine<C> {
    /// Machine state
    type State: Copy + PartialEq;
    /// Table column
    type Event: Copy;
    /// Action identifier
    type Action: Copy + PartialEq;
    /// Data carried by the event
    type Payload;

    /// The action that terminates an action list
    const IGNORE: Self::Action;

    /// Current state
    fn state(&self) -> Self::State;

    /// Commit a new state
    fn set_state(&mut self, state: Self::State);

    /// Table lookup
    fn transition(state: Self::State, event: Self::Event) -> Transition<Self::State, Self::Action>;

    /// Run one action
    fn execute(&mut self, action: Self::Action, payload: &Self::Payload, ctx: &mut C);
}

/// Deliver one event to a machine, returning the state it ends up in
///
/// Must not be called from inside [`StateMachine::execute`]; follow-up events
/// go through a queue drained by the caller.
pub fn dispatch<C, M: StateMachine<C>>(
    machine: &mut M,
    event: M::Event,
    payload: &M::Payload,
    ctx: &mut C,
) -> M::State {
    let transition = M::transition(machine.state(), event);
    for action in transition.actions {
        if action == M::IGNORE {
            break;
        }
        machine.execute(action, payload, ctx);
    }
    machine.set_state(transition.next);
    transition.next
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Door {
        Closed,
        Open,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Push {
        Open,
        Close,
        Knock,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Ignore,
        Unlock,
        Swing,
        Latch,
    }

    struct DoorMachine {
        state: Door,
    }

    impl StateMachine<Vec<(Step, Door)>> for DoorMachine {
        type State = Door;
        type Event = Push;
        type Action = Step;
        type Payload = ();

        const IGNORE: Step = Step::Ignore;

        fn state(&self) -> Door {
            self.state
        }

        fn set_state(&mut self, state: Door) {
            self.state = state;
        }

        fn transition(state: Door, event: Push) -> Transition<Door, Step> {
            match (state, event) {
                (Door::Closed, Push::Open) => Transition::new(Step::Unlock, Step::Swing, Door::Open),
                (Door::Open, Push::Close) => Transition::new(Step::Latch, Step::Ignore, Door::Closed),
                // An ignore in first position must stop the second action too
                (Door::Open, Push::Knock) => Transition::new(Step::Ignore, Step::Latch, Door::Open),
                (state, _) => Transition::new(Step::Ignore, Step::Ignore, state),
            }
        }

        fn execute(&mut self, action: Step, _payload: &(), log: &mut Vec<(Step, Door)>) {
            log.push((action, self.state));
        }
    }

    #[test]
    fn test_actions_run_in_order_before_state_commit() {
        let mut machine = DoorMachine { state: Door::Closed };
        let mut log = Vec::new();

        let next = dispatch(&mut machine, Push::Open, &(), &mut log);

        assert_eq!(next, Door::Open);
        assert_eq!(machine.state, Door::Open);
        assert_eq!(log, [(Step::Unlock, Door::Closed), (Step::Swing, Door::Closed)]);
    }

    #[test]
    fn test_ignore_terminates_action_list() {
        let mut machine = DoorMachine { state: Door::Open };
        let mut log = Vec::new();

        dispatch(&mut machine, Push::Knock, &(), &mut log);
        assert!(log.is_empty());

        dispatch(&mut machine, Push::Close, &(), &mut log);
        assert_eq!(log, [(Step::Latch, Door::Open)]);
        assert_eq!(machine.state, Door::Closed);
    }

    #[test]
    fn test_unlisted_pair_keeps_state() {
        let mut machine = DoorMachine { state: Door::Closed };
        let mut log = Vec::new();

        assert_eq!(dispatch(&mut machine, Push::Close, &(), &mut log), Door::Closed);
        assert!(log.is_empty());
    }
}
