//! Decide/evolve state machines.

/// Something with an identity and a count of applied transitions.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far.
    fn version(&self) -> u64;
}

/// A state machine split into a pure decision and a state update.
///
/// `handle` looks at the current state and a command and says what happened
/// (zero or more events) without touching state. `apply` folds one event into
/// the state. Neither performs IO: store calls, receipt validation and
/// persistence happen around the aggregate.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Must bump `version()` by one.
    fn apply(&mut self, event: &Self::Event);

    /// An empty vector accepts the command without a transition.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Handle `command`, then apply the resulting events in order.
///
/// A rejected command leaves the aggregate untouched.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for event in &events {
        aggregate.apply(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Toggle {
        on: bool,
        version: u64,
    }

    impl AggregateRoot for Toggle {
        type Id = u8;

        fn id(&self) -> &u8 {
            &0
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    impl Aggregate for Toggle {
        type Command = bool;
        type Event = bool;
        type Error = &'static str;

        fn apply(&mut self, event: &bool) {
            self.on = *event;
            self.version += 1;
        }

        fn handle(&self, turn_on: &bool) -> Result<Vec<bool>, &'static str> {
            match (self.on, *turn_on) {
                (true, true) => Err("already on"),
                (false, false) => Ok(Vec::new()),
                (_, wanted) => Ok(vec![wanted]),
            }
        }
    }

    #[test]
    fn execute_applies_accepted_events() {
        let mut toggle = Toggle::default();
        assert_eq!(execute(&mut toggle, &true), Ok(vec![true]));
        assert!(toggle.on);
        assert_eq!(toggle.version(), 1);
    }

    #[test]
    fn rejected_and_empty_commands_change_nothing() {
        let mut toggle = Toggle::default();
        assert_eq!(execute(&mut toggle, &false), Ok(vec![]));
        assert_eq!(toggle.version(), 0);

        execute(&mut toggle, &true).unwrap();
        assert_eq!(execute(&mut toggle, &true), Err("already on"));
        assert_eq!(toggle.version(), 1);
    }
}
