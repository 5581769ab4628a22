//! Coarse state machine of one diagnostic run

use serde::Serialize;
use statig::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    #[default]
    NotStarted,
    EnvironmentCollected,
    LivenessChecked,
    OfferingStart,
    Started,
    Aborted,
    ChecksRunning,
    Reported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    EnvironmentCollected,
    LivenessChecked { running: bool },
    OfferStart,
    StackStarted,
    Abort { reason: String },
    ChecksStarted,
    Reported { exit_code: i32 },
}

#[derive(Debug, Default)]
pub struct DiagnosticRun {
    phase: RunPhase,
    stack_running: bool,
    auto_started: bool,
    abort_reason: Option<String>,
}

impl DiagnosticRun {
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&mut self, phase: RunPhase, next: State) -> Outcome<State> {
        tracing::debug!(from = ?self.phase, to = ?phase, "diagnostic run advanced");
        self.phase = phase;
        Transition(next)
    }

    fn ignore(&self, event: &RunEvent) -> Outcome<State> {
        tracing::debug!(phase = ?self.phase, ?event, "event ignored in this phase");
        Handled
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn stack_running(&self) -> bool {
        self.stack_running
    }

    pub fn auto_started(&self) -> bool {
        self.auto_started
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }
}

#[state_machine(initial = "State::not_started()")]
impl DiagnosticRun {
    #[state]
    fn not_started(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::EnvironmentCollected => self.advance(RunPhase::EnvironmentCollected, State::environment_collected()),
            _ => self.ignore(event),
        }
    }

    #[state]
    fn environment_collected(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::LivenessChecked { running } => {
                self.stack_running = *running;
                self.advance(RunPhase::LivenessChecked, State::liveness_checked())
            }
            _ => self.ignore(event),
        }
    }

    #[state]
    fn liveness_checked(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::OfferStart if !self.stack_running => self.advance(RunPhase::OfferingStart, State::offering_start()),
            RunEvent::ChecksStarted => self.advance(RunPhase::ChecksRunning, State::checks_running()),
            RunEvent::Abort { reason } => {
                self.abort_reason = Some(reason.clone());
                self.advance(RunPhase::Aborted, State::aborted())
            }
            _ => self.ignore(event),
        }
    }

    #[state]
    fn offering_start(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::StackStarted => {
                self.stack_running = true;
                self.auto_started = true;
                self.advance(RunPhase::Started, State::started())
            }
            RunEvent::Abort { reason } => {
                self.abort_reason = Some(reason.clone());
                self.advance(RunPhase::Aborted, State::aborted())
            }
            _ => self.ignore(event),
        }
    }

    #[state]
    fn started(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::ChecksStarted => self.advance(RunPhase::ChecksRunning, State::checks_running()),
            _ => self.ignore(event),
        }
    }

    #[state]
    fn aborted(&mut self, event: &RunEvent) -> Outcome<State> {
        self.ignore(event)
    }

    #[state]
    fn checks_running(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::Reported { exit_code } => {
                tracing::info!(exit_code, "diagnostic run reported");
                self.advance(RunPhase::Reported, State::reported())
            }
            _ => self.ignore(event),
        }
    }

    #[state]
    fn reported(&mut self, event: &RunEvent) -> Outcome<State> {
        self.ignore(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stack_goes_straight_to_checks() {
        let mut sm = DiagnosticRun::new().state_machine();
        sm.handle(&RunEvent::EnvironmentCollected);
        sm.handle(&RunEvent::LivenessChecked { running: true });
        sm.handle(&RunEvent::OfferStart);
        assert_eq!(sm.inner().phase(), RunPhase::LivenessChecked);

        sm.handle(&RunEvent::ChecksStarted);
        sm.handle(&RunEvent::Reported { exit_code: 0 });
        assert_eq!(sm.inner().phase(), RunPhase::Reported);
        assert!(!sm.inner().auto_started());
    }

    #[test]
    fn test_accepted_offer_starts_the_stack() {
        let mut sm = DiagnosticRun::new().state_machine();
        sm.handle(&RunEvent::EnvironmentCollected);
        sm.handle(&RunEvent::LivenessChecked { running: false });
        sm.handle(&RunEvent::OfferStart);
        assert_eq!(sm.inner().phase(), RunPhase::OfferingStart);

        sm.handle(&RunEvent::StackStarted);
        assert_eq!(sm.inner().phase(), RunPhase::Started);
        assert!(sm.inner().stack_running());
        assert!(sm.inner().auto_started());

        sm.handle(&RunEvent::ChecksStarted);
        assert_eq!(sm.inner().phase(), RunPhase::ChecksRunning);
    }

    #[test]
    fn test_declined_offer_is_terminal() {
        let mut sm = DiagnosticRun::new().state_machine();
        sm.handle(&RunEvent::EnvironmentCollected);
        sm.handle(&RunEvent::LivenessChecked { running: false });
        sm.handle(&RunEvent::OfferStart);
        sm.handle(&RunEvent::Abort {
            reason: "cancelled".to_string(),
        });
        sm.handle(&RunEvent::ChecksStarted);

        assert_eq!(sm.inner().phase(), RunPhase::Aborted);
        assert_eq!(sm.inner().abort_reason(), Some("cancelled"));
    }

    #[test]
    fn test_out_of_order_events_are_ignored() {
        let mut sm = DiagnosticRun::new().state_machine();
        sm.handle(&RunEvent::ChecksStarted);
        sm.handle(&RunEvent::Reported { exit_code: 3 });
        assert_eq!(sm.inner().phase(), RunPhase::NotStarted);
    }
}
