//! Channel and socket lifecycle.

use serde::Serialize;

/// Lifecycle of a channel or socket session.
///
/// ```text
/// Created -> Initializing -> Open -> Closing -> Closed
///                 \             \        \
///                  `-------------`--------`--> Failed
/// ```
///
/// `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Initializing,
    Open,
    Closing,
    Closed,
    Failed,
}

impl Lifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Closed | Lifecycle::Failed)
    }

    pub fn can_transition_to(self, next: Lifecycle) -> bool {
        use Lifecycle::*;
        matches!(
            (self, next),
            (Created, Initializing | Closing | Failed)
                | (Initializing, Open | Closing | Failed)
                | (Open, Closing | Failed)
                | (Closing, Closed | Failed)
        )
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: Lifecycle) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Lifecycle::*;

    #[test]
    fn happy_path() {
        let mut state = Created;
        for next in [Initializing, Open, Closing, Closed] {
            assert!(state.advance(next), "{state:?} -> {next:?}");
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn terminal_states_do_not_move() {
        for terminal in [Closed, Failed] {
            for next in [Created, Initializing, Open, Closing, Closed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn no_skipping_or_reopening() {
        assert!(!Created.can_transition_to(Open));
        assert!(!Open.can_transition_to(Initializing));
        assert!(!Closing.can_transition_to(Open));
        let mut state = Open;
        assert!(!state.advance(Closed));
        assert_eq!(state, Open);
    }
}
