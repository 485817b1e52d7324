use std::fmt;

pub const CONNECTED_TEXT: &str = "Connected to a stranger.";
pub const PARTNER_DISCONNECTED_TEXT: &str =
    "Your partner disconnected. Searching for a new partner...";
pub const PARTNER_SKIPPED_TEXT: &str = "Your partner skipped. Searching for a new partner...";
pub const TRANSPORT_ERROR_TEXT: &str = "Could not connect to the matching service.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchState {
    #[default]
    Searching,
    Matched,
    PartnerLeft,
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchState::Searching => "searching",
            MatchState::Matched => "matched",
            MatchState::PartnerLeft => "partner_left",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEvent {
    Matched,
    PartnerDisconnected,
    PartnerSkipped,
    LocalSkip,
    LocalStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerExit {
    Disconnected,
    Skipped,
}

impl PartnerExit {
    pub fn status_text(self) -> &'static str {
        match self {
            PartnerExit::Disconnected => PARTNER_DISCONNECTED_TEXT,
            PartnerExit::Skipped => PARTNER_SKIPPED_TEXT,
        }
    }
}

/// Effect of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Searching -> Matched.
    Connected,
    /// Matched -> PartnerLeft.
    PartnerLeft(PartnerExit),
    /// Local skip; back to Searching from anywhere.
    Reset,
    Stopped,
    /// No transition is defined for this state/event pair.
    Ignored,
}

/// Searching / Matched / PartnerLeft plus a terminal stopped flag.
#[derive(Debug, Clone, Default)]
pub struct MatchStateMachine {
    state: MatchState,
    stopped: bool,
}

impl MatchStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn is_matched(&self) -> bool {
        self.state == MatchState::Matched
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn apply(&mut self, event: MatchEvent) -> Transition {
        if self.stopped {
            tracing::debug!(target = "session", ?event, "event after stop ignored");
            return Transition::Ignored;
        }
        let transition = match (self.state, event) {
            (_, MatchEvent::LocalStop) => {
                self.stopped = true;
                Transition::Stopped
            }
            (_, MatchEvent::LocalSkip) => {
                self.state = MatchState::Searching;
                Transition::Reset
            }
            (MatchState::Searching, MatchEvent::Matched) => {
                self.state = MatchState::Matched;
                Transition::Connected
            }
            (MatchState::Matched, MatchEvent::PartnerDisconnected) => {
                self.state = MatchState::PartnerLeft;
                Transition::PartnerLeft(PartnerExit::Disconnected)
            }
            (MatchState::Matched, MatchEvent::PartnerSkipped) => {
                self.state = MatchState::PartnerLeft;
                Transition::PartnerLeft(PartnerExit::Skipped)
            }
            (state, event) => {
                tracing::debug!(target = "session", %state, ?event, "no transition; ignoring");
                Transition::Ignored
            }
        };
        if transition != Transition::Ignored {
            tracing::debug!(target = "session", state = %self.state, ?event, "match state changed");
        }
        transition
    }

    /// PartnerLeft -> Searching once a new cycle is underway. Returns whether it moved.
    pub fn resume_search(&mut self) -> bool {
        if self.stopped || self.state != MatchState::PartnerLeft {
            return false;
        }
        self.state = MatchState::Searching;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_transitions() {
        let mut machine = MatchStateMachine::new();
        assert_eq!(machine.apply(MatchEvent::Matched), Transition::Connected);
        assert!(machine.is_matched());
        assert_eq!(
            machine.apply(MatchEvent::PartnerSkipped),
            Transition::PartnerLeft(PartnerExit::Skipped)
        );
        assert_eq!(machine.state(), MatchState::PartnerLeft);
        assert!(machine.resume_search());
        assert!(!machine.resume_search());
        assert_eq!(machine.apply(MatchEvent::Matched), Transition::Connected);
        assert_eq!(machine.apply(MatchEvent::LocalSkip), Transition::Reset);
        assert_eq!(machine.state(), MatchState::Searching);
    }

    #[test]
    fn undefined_pairs_are_no_ops() {
        let mut machine = MatchStateMachine::new();
        assert_eq!(
            machine.apply(MatchEvent::PartnerDisconnected),
            Transition::Ignored
        );
        assert_eq!(machine.state(), MatchState::Searching);
        machine.apply(MatchEvent::Matched);
        assert_eq!(machine.apply(MatchEvent::Matched), Transition::Ignored);
        machine.apply(MatchEvent::PartnerDisconnected);
        assert_eq!(machine.apply(MatchEvent::Matched), Transition::Ignored);
        assert_eq!(machine.state(), MatchState::PartnerLeft);
    }

    #[test]
    fn stop_is_terminal() {
        let mut machine = MatchStateMachine::new();
        machine.apply(MatchEvent::Matched);
        assert_eq!(machine.apply(MatchEvent::LocalStop), Transition::Stopped);
        assert!(machine.is_stopped());
        assert_eq!(machine.apply(MatchEvent::LocalSkip), Transition::Ignored);
        assert_eq!(machine.apply(MatchEvent::LocalStop), Transition::Ignored);
        assert!(!machine.resume_search());
        assert_eq!(machine.state(), MatchState::Matched);
    }

    // Every server-event sequence up to length 6, with the session resuming
    // search after each partner loss: Matched holds exactly when the last
    // transition-causing event was `matched`.
    #[test]
    fn matched_iff_last_effective_event_was_matched() {
        const EVENTS: [MatchEvent; 3] = [
            MatchEvent::Matched,
            MatchEvent::PartnerDisconnected,
            MatchEvent::PartnerSkipped,
        ];
        for len in 0..=6u32 {
            for mut code in 0..EVENTS.len().pow(len) {
                let mut machine = MatchStateMachine::new();
                let mut last_effective = None;
                for _ in 0..len {
                    let event = EVENTS[code % EVENTS.len()];
                    code /= EVENTS.len();
                    if machine.apply(event) != Transition::Ignored {
                        last_effective = Some(event);
                    }
                    machine.resume_search();
                }
                assert_eq!(
                    machine.is_matched(),
                    last_effective == Some(MatchEvent::Matched)
                );
            }
        }
    }
}
