//! Epoch/reposition state machine
//!
//! Pure state core: [`SessionRuntime::apply`] consumes decoded events in
//! arrival order and returns the side effects the controller must execute.
//! The runtime itself never touches audio, the event bus, or the engine
//! process, which keeps every transition unit-testable.

use cq_common::config::SessionConfig;
use cq_common::events::{NextEpoch, SessionEvent};
use serde::Serialize;

/// Session phase.
///
/// `Sequencing`, `Epoch` and `Repositioning` are the running sub-phases;
/// `Complete`, `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Sequencing,
    Epoch,
    Repositioning,
    Complete,
    Stopped,
    Failed,
}

impl SessionPhase {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionPhase::Sequencing | SessionPhase::Epoch | SessionPhase::Repositioning
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Complete | SessionPhase::Stopped | SessionPhase::Failed
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Sequencing => write!(f, "sequencing"),
            SessionPhase::Epoch => write!(f, "epoch"),
            SessionPhase::Repositioning => write!(f, "repositioning"),
            SessionPhase::Complete => write!(f, "complete"),
            SessionPhase::Stopped => write!(f, "stopped"),
            SessionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// The most recently seen `epoch_start`, retained until superseded.
#[derive(Debug, Clone)]
pub struct EpochContext {
    pub sequence: String,
    pub index: u32,
    pub label: String,
    pub instruction: String,
    pub seconds: u32,
    pub locations: Vec<String>,
    pub next_epoch: Option<NextEpoch>,
}

impl EpochContext {
    /// Composite epoch identity used for bandpower keying and warn de-dup
    pub fn identity(&self) -> String {
        format!("{}-{}-{}", self.sequence, self.index, self.label)
    }
}

/// Side effects a transition demands from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Play the start-of-task cue for `label`
    StartCue { label: String },

    /// Play the pre-notification cue for the upcoming `label`
    LookaheadCue { label: String },

    /// A new epoch began: re-key (clear) the bandpower series
    EnterEpoch { epoch_key: String },

    /// New session: discard all prior live state
    ResetSession,

    /// Manual reposition gate opened for `location`; block further
    /// reposition commands until it clears
    GateOpened { location: String },

    /// Pending-ready gate cleared for `location`
    GateCleared { location: String },

    /// Session reached a terminal phase
    Terminal {
        phase: SessionPhase,
        message: Option<String>,
    },
}

/// Outcome of a gate check for an outbound "ready" command.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyCheck {
    Accepted,
    Rejected(String),
}

/// Owned aggregate of all live session state: phase, epoch context and the
/// manual-reposition gate. One instance per session, held by the controller.
#[derive(Debug)]
pub struct SessionRuntime {
    phase: SessionPhase,
    epoch: Option<EpochContext>,
    /// Location a manual reposition is gated on, if any
    pending_ready: Option<String>,
    /// Whether the ready command for the open gate was already issued
    ready_sent: bool,
    /// Label of the last start-of-task cue, to suppress repeats across
    /// same-label epochs (dual-channel captures in simultaneous mode)
    last_cued_label: Option<String>,
    /// Epoch identity already given its lookahead warning
    lookahead_warned: Option<String>,
    cue_lead_seconds: u32,
}

impl SessionRuntime {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            phase: SessionPhase::Idle,
            epoch: None,
            pending_ready: None,
            ready_sent: false,
            last_cued_label: None,
            lookahead_warned: None,
            cue_lead_seconds: config.cue_lead_seconds,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn epoch(&self) -> Option<&EpochContext> {
        self.epoch.as_ref()
    }

    pub fn pending_ready(&self) -> Option<&str> {
        self.pending_ready.as_deref()
    }

    /// Apply one decoded event, in arrival order, and return the side
    /// effects it demands.
    ///
    /// Terminal phases absorb every event except `session_start`: a late
    /// `session_complete` after a local stop is a no-op, not an error.
    pub fn apply(&mut self, event: &SessionEvent) -> Vec<SessionAction> {
        if self.phase.is_terminal() && !matches!(event, SessionEvent::SessionStart { .. }) {
            return Vec::new();
        }

        match event {
            SessionEvent::SessionStart { .. } => self.on_session_start(),
            SessionEvent::SequenceStart { .. } | SessionEvent::EpochComplete { .. } => {
                if self.phase.is_running() {
                    self.phase = SessionPhase::Sequencing;
                }
                Vec::new()
            }
            SessionEvent::EpochStart {
                sequence,
                index,
                label,
                instruction,
                seconds,
                locations,
                next_epoch,
            } => self.on_epoch_start(EpochContext {
                sequence: sequence.clone(),
                index: *index,
                label: label.clone(),
                instruction: instruction.clone(),
                seconds: *seconds,
                locations: locations.clone(),
                next_epoch: next_epoch.clone(),
            }),
            SessionEvent::EpochTick {
                seconds_remaining, ..
            } => self.on_epoch_tick(*seconds_remaining),
            SessionEvent::RepositionStart {
                next_location,
                mode,
                ..
            } => self.on_reposition_start(next_location, mode),
            SessionEvent::RepositionComplete { next_location, .. }
            | SessionEvent::RepositionInputEof { next_location } => {
                self.on_reposition_end(next_location)
            }
            SessionEvent::SessionComplete { .. } => self.on_terminal(SessionPhase::Complete, None),
            SessionEvent::SessionStopped => self.on_terminal(SessionPhase::Stopped, None),
            SessionEvent::Error { message } => {
                self.on_terminal(SessionPhase::Failed, Some(message.clone()))
            }
            // board_ready, sequence_complete, board_stopped, reposition_tick,
            // reposition_waiting, bandpower, analysis_complete, log, unknown:
            // no phase transition here
            _ => Vec::new(),
        }
    }

    /// Local stop: transition to Stopped without waiting for the engine's
    /// own terminal event.
    pub fn force_stop(&mut self) -> Vec<SessionAction> {
        if self.phase.is_terminal() {
            return Vec::new();
        }
        self.on_terminal(SessionPhase::Stopped, None)
    }

    /// Engine died without reaching a terminal event.
    pub fn force_fail(&mut self, message: String) -> Vec<SessionAction> {
        if self.phase.is_terminal() {
            return Vec::new();
        }
        self.on_terminal(SessionPhase::Failed, Some(message))
    }

    /// Gate check for an outbound "ready" command.
    ///
    /// Accepted only while a pending-ready gate is open for exactly
    /// `location` and no ready was already issued for it. Rejection is a
    /// reportable failure, never a crash.
    pub fn check_ready(&mut self, location: &str) -> ReadyCheck {
        if !self.phase.is_running() {
            return ReadyCheck::Rejected("no active session".to_string());
        }
        match self.pending_ready.as_deref() {
            None => ReadyCheck::Rejected("no reposition in progress".to_string()),
            Some(pending) if pending != location => ReadyCheck::Rejected(format!(
                "reposition is waiting on {pending}, not {location}"
            )),
            Some(_) if self.ready_sent => {
                ReadyCheck::Rejected(format!("ready already sent for {location}"))
            }
            Some(_) => {
                self.ready_sent = true;
                ReadyCheck::Accepted
            }
        }
    }

    /// The accepted ready command never reached the engine; re-arm the gate
    /// so the operator can retry.
    pub fn ready_send_failed(&mut self) {
        self.ready_sent = false;
    }

    fn on_session_start(&mut self) -> Vec<SessionAction> {
        self.phase = SessionPhase::Sequencing;
        self.epoch = None;
        self.pending_ready = None;
        self.ready_sent = false;
        self.last_cued_label = None;
        self.lookahead_warned = None;
        vec![SessionAction::ResetSession]
    }

    fn on_epoch_start(&mut self, context: EpochContext) -> Vec<SessionAction> {
        self.phase = SessionPhase::Epoch;
        self.lookahead_warned = None;

        let mut actions = vec![SessionAction::EnterEpoch {
            epoch_key: context.identity(),
        }];

        // Label repeats (e.g. across locations in simultaneous mode) must
        // not re-trigger the audio cue.
        if self.last_cued_label.as_deref() != Some(context.label.as_str()) {
            actions.push(SessionAction::StartCue {
                label: context.label.clone(),
            });
            self.last_cued_label = Some(context.label.clone());
        }

        self.epoch = Some(context);
        actions
    }

    fn on_epoch_tick(&mut self, seconds_remaining: u32) -> Vec<SessionAction> {
        if self.phase != SessionPhase::Epoch {
            return Vec::new();
        }
        // Exact match on the remaining-seconds value, not <=, so irregular
        // tick intervals cannot double-fire. A cadence that skips the exact
        // value misses the warning entirely; that behavior is kept.
        if seconds_remaining != self.cue_lead_seconds {
            return Vec::new();
        }

        let Some(epoch) = self.epoch.as_ref() else {
            return Vec::new();
        };
        let Some(next) = epoch.next_epoch.as_ref() else {
            return Vec::new();
        };
        if next.label == epoch.label {
            return Vec::new();
        }

        let identity = epoch.identity();
        if self.lookahead_warned.as_deref() == Some(identity.as_str()) {
            return Vec::new();
        }
        self.lookahead_warned = Some(identity);

        vec![SessionAction::LookaheadCue {
            label: next.label.clone(),
        }]
    }

    fn on_reposition_start(&mut self, next_location: &str, mode: &str) -> Vec<SessionAction> {
        self.phase = SessionPhase::Repositioning;
        if mode == "manual" {
            self.pending_ready = Some(next_location.to_string());
            self.ready_sent = false;
            vec![SessionAction::GateOpened {
                location: next_location.to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    fn on_reposition_end(&mut self, next_location: &str) -> Vec<SessionAction> {
        self.phase = SessionPhase::Sequencing;
        self.ready_sent = false;
        if self.pending_ready.take().is_some() {
            vec![SessionAction::GateCleared {
                location: next_location.to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    fn on_terminal(
        &mut self,
        phase: SessionPhase,
        message: Option<String>,
    ) -> Vec<SessionAction> {
        self.phase = phase;
        self.ready_sent = false;
        let mut actions = Vec::new();
        if let Some(location) = self.pending_ready.take() {
            actions.push(SessionAction::GateCleared { location });
        }
        actions.push(SessionAction::Terminal { phase, message });
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_common::events::{decode_line, LogStream};

    fn runtime() -> SessionRuntime {
        SessionRuntime::new(&SessionConfig::default())
    }

    fn started() -> SessionRuntime {
        let mut rt = runtime();
        rt.apply(&SessionEvent::SessionStart {
            mode: "sequential".to_string(),
        });
        rt
    }

    fn epoch_start(sequence: &str, index: u32, label: &str, next: Option<&str>) -> SessionEvent {
        SessionEvent::EpochStart {
            sequence: sequence.to_string(),
            index,
            label: label.to_string(),
            instruction: String::new(),
            seconds: 15,
            locations: vec!["Cz".to_string()],
            next_epoch: next.map(|l| NextEpoch {
                label: l.to_string(),
                instruction: None,
            }),
        }
    }

    fn tick(seconds_remaining: u32) -> SessionEvent {
        SessionEvent::EpochTick {
            sequence: "Cz".to_string(),
            index: 1,
            label: "EO".to_string(),
            seconds_remaining,
        }
    }

    #[test]
    fn test_session_start_resets_state() {
        let mut rt = runtime();
        let actions = rt.apply(&SessionEvent::SessionStart {
            mode: "sequential".to_string(),
        });
        assert_eq!(rt.phase(), SessionPhase::Sequencing);
        assert_eq!(actions, vec![SessionAction::ResetSession]);
    }

    #[test]
    fn test_epoch_start_cues_once_per_label() {
        let mut rt = started();

        let first = rt.apply(&epoch_start("MASTER", 1, "EO", None));
        assert!(first.contains(&SessionAction::StartCue {
            label: "EO".to_string()
        }));

        // Same label again (dual-channel capture): no second cue
        let second = rt.apply(&epoch_start("MASTER", 1, "EO", None));
        assert!(!second
            .iter()
            .any(|a| matches!(a, SessionAction::StartCue { .. })));

        // Different label cues again
        let third = rt.apply(&epoch_start("MASTER", 2, "EC", None));
        assert!(third.contains(&SessionAction::StartCue {
            label: "EC".to_string()
        }));
    }

    #[test]
    fn test_epoch_start_rekeys_bandpower() {
        let mut rt = started();
        let actions = rt.apply(&epoch_start("Cz", 3, "EC", None));
        assert!(actions.contains(&SessionAction::EnterEpoch {
            epoch_key: "Cz-3-EC".to_string()
        }));
    }

    #[test]
    fn test_lookahead_fires_exactly_once_at_lead() {
        let mut rt = started();
        rt.apply(&epoch_start("Cz", 4, "EO", Some("READ")));

        assert!(rt.apply(&tick(5)).is_empty());
        let fired = rt.apply(&tick(3));
        assert_eq!(
            fired,
            vec![SessionAction::LookaheadCue {
                label: "READ".to_string()
            }]
        );
        // A repeated tick at the same remaining value must not re-fire
        assert!(rt.apply(&tick(3)).is_empty());
        assert!(rt.apply(&tick(2)).is_empty());
    }

    #[test]
    fn test_lookahead_suppressed_for_same_label() {
        let mut rt = started();
        rt.apply(&epoch_start("Cz", 1, "EO", Some("EO")));
        assert!(rt.apply(&tick(3)).is_empty());
    }

    #[test]
    fn test_lookahead_skipped_when_cadence_misses_exact_value() {
        // Known edge: a 2s tick cadence with lead 3 never matches exactly,
        // so the warning never fires. Characterized, not fixed.
        let mut rt = started();
        rt.apply(&epoch_start("Cz", 1, "EO", Some("READ")));
        for remaining in [6, 4, 2, 0] {
            assert!(rt.apply(&tick(remaining)).is_empty());
        }
    }

    #[test]
    fn test_lookahead_rearms_on_new_epoch() {
        let mut rt = started();
        rt.apply(&epoch_start("Cz", 4, "EO", Some("READ")));
        assert_eq!(rt.apply(&tick(3)).len(), 1);

        rt.apply(&epoch_start("Cz", 5, "READ", Some("OMNI")));
        assert_eq!(rt.apply(&tick(3)).len(), 1);
    }

    #[test]
    fn test_manual_reposition_gate_lifecycle() {
        let mut rt = started();
        let opened = rt.apply(&SessionEvent::RepositionStart {
            next_location: "Fz".to_string(),
            mode: "manual".to_string(),
            seconds: None,
            message: None,
        });
        assert_eq!(rt.phase(), SessionPhase::Repositioning);
        assert_eq!(
            opened,
            vec![SessionAction::GateOpened {
                location: "Fz".to_string()
            }]
        );
        assert_eq!(rt.pending_ready(), Some("Fz"));

        assert_eq!(rt.check_ready("Fz"), ReadyCheck::Accepted);
        // One outbound command per gate: a second ready is rejected
        assert!(matches!(rt.check_ready("Fz"), ReadyCheck::Rejected(_)));

        let cleared = rt.apply(&SessionEvent::RepositionComplete {
            next_location: "Fz".to_string(),
            mode: Some("manual".to_string()),
        });
        assert_eq!(rt.phase(), SessionPhase::Sequencing);
        assert_eq!(
            cleared,
            vec![SessionAction::GateCleared {
                location: "Fz".to_string()
            }]
        );
        assert_eq!(rt.pending_ready(), None);
    }

    #[test]
    fn test_timer_reposition_sets_no_gate() {
        let mut rt = started();
        let actions = rt.apply(&SessionEvent::RepositionStart {
            next_location: "Cz".to_string(),
            mode: "timer".to_string(),
            seconds: Some(20),
            message: None,
        });
        assert!(actions.is_empty());
        assert_eq!(rt.pending_ready(), None);
    }

    #[test]
    fn test_ready_rejected_without_gate() {
        let mut rt = started();
        assert!(matches!(rt.check_ready("Fz"), ReadyCheck::Rejected(_)));
        // State unchanged
        assert_eq!(rt.phase(), SessionPhase::Sequencing);
        assert_eq!(rt.pending_ready(), None);
    }

    #[test]
    fn test_ready_rejected_for_wrong_location() {
        let mut rt = started();
        rt.apply(&SessionEvent::RepositionStart {
            next_location: "Fz".to_string(),
            mode: "manual".to_string(),
            seconds: None,
            message: None,
        });
        assert!(matches!(rt.check_ready("F3"), ReadyCheck::Rejected(_)));
        // Gate still open for the right location
        assert_eq!(rt.check_ready("Fz"), ReadyCheck::Accepted);
    }

    #[test]
    fn test_input_eof_clears_gate_like_complete() {
        let mut rt = started();
        rt.apply(&SessionEvent::RepositionStart {
            next_location: "F4".to_string(),
            mode: "manual".to_string(),
            seconds: None,
            message: None,
        });
        let actions = rt.apply(&SessionEvent::RepositionInputEof {
            next_location: "F4".to_string(),
        });
        assert_eq!(
            actions,
            vec![SessionAction::GateCleared {
                location: "F4".to_string()
            }]
        );
        assert_eq!(rt.phase(), SessionPhase::Sequencing);
    }

    #[test]
    fn test_terminal_clears_gate_unconditionally() {
        let mut rt = started();
        rt.apply(&SessionEvent::RepositionStart {
            next_location: "Fz".to_string(),
            mode: "manual".to_string(),
            seconds: None,
            message: None,
        });
        let actions = rt.apply(&SessionEvent::Error {
            message: "board fault".to_string(),
        });
        assert_eq!(rt.phase(), SessionPhase::Failed);
        assert!(actions.contains(&SessionAction::GateCleared {
            location: "Fz".to_string()
        }));
        assert!(actions.iter().any(|a| matches!(
            a,
            SessionAction::Terminal {
                phase: SessionPhase::Failed,
                ..
            }
        )));
    }

    #[test]
    fn test_stop_then_late_complete_is_noop() {
        let mut rt = started();
        rt.force_stop();
        assert_eq!(rt.phase(), SessionPhase::Stopped);

        // The engine's own terminal event still arrives; must not
        // double-transition
        let actions = rt.apply(&SessionEvent::SessionComplete {
            output_path: "/tmp/result.json".to_string(),
        });
        assert!(actions.is_empty());
        assert_eq!(rt.phase(), SessionPhase::Stopped);

        // And ready actions stay disabled
        assert!(matches!(rt.check_ready("Fz"), ReadyCheck::Rejected(_)));
    }

    #[test]
    fn test_decoded_wire_events_drive_transitions() {
        let mut rt = runtime();
        let lines = [
            r#"{"event":"session_start","mode":"sequential"}"#,
            r#"{"event":"board_ready","sampling_rate":250.0}"#,
            r#"{"event":"sequence_start","sequence":"O1","locations":["O1"],"total_epochs":4}"#,
            r#"{"event":"epoch_start","sequence":"O1","index":1,"label":"EO","instruction":"Eyes open.","seconds":15,"locations":["O1"]}"#,
        ];
        for line in lines {
            rt.apply(&decode_line(line, LogStream::Stdout));
        }
        assert_eq!(rt.phase(), SessionPhase::Epoch);
        assert_eq!(rt.epoch().map(|e| e.identity()), Some("O1-1-EO".to_string()));
    }
}
