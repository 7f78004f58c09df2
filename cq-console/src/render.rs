//! Render instructions for the presentation layer
//!
//! The controller emits these over the event bus; any frontend (console
//! printer, widget toolkit, remote UI) can draw them. Payloads are plain
//! serializable data: text lines, progress counters, table-readiness
//! notices. Numeric series and metric table rows are pulled from the
//! controller's read surface at redraw time rather than pushed per sample.

use crate::session::SessionPhase;
use cq_common::events::LogStream;
use serde::Serialize;

/// One rendering instruction for the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum UiEvent {
    /// Session phase changed
    PhaseChanged {
        phase: SessionPhase,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Free-text status line (instructions, engine messages)
    StatusLine {
        text: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A recording epoch began
    EpochStarted {
        sequence: String,
        index: u32,
        label: String,
        instruction: String,
        seconds: u32,
        locations: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Countdown within the current epoch
    EpochProgress {
        label: String,
        seconds_remaining: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Reposition pause began; `gated` means the UI must offer a Ready
    /// control for `next_location` and block further reposition commands
    RepositionStarted {
        next_location: String,
        gated: bool,
        message: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Countdown during a timer-mode reposition pause
    RepositionProgress {
        next_location: String,
        seconds_remaining: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Reposition finished; the Ready control (if any) must be withdrawn
    RepositionEnded {
        next_location: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An audible/visual cue fired (visual part always renders, even when
    /// audio degraded to silence)
    CueFired {
        label: String,
        lookahead: bool,
        tone_hz: f32,
        beeps: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// New bandpower samples were appended for `locations`; redraw charts
    /// from the controller's series surface
    BandpowerUpdated {
        locations: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A normalized metric table is available on the read surface
    MetricsReady {
        provenance: String,
        in_range: usize,
        out_of_range: usize,
        missing: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Raw engine output line (either channel), post-decode
    LogLine {
        stream: LogStream,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session reached a terminal phase
    SessionEnded {
        phase: SessionPhase,
        message: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl UiEvent {
    /// Event type as string for filtering and display
    pub fn event_type(&self) -> &'static str {
        match self {
            UiEvent::PhaseChanged { .. } => "PhaseChanged",
            UiEvent::StatusLine { .. } => "StatusLine",
            UiEvent::EpochStarted { .. } => "EpochStarted",
            UiEvent::EpochProgress { .. } => "EpochProgress",
            UiEvent::RepositionStarted { .. } => "RepositionStarted",
            UiEvent::RepositionProgress { .. } => "RepositionProgress",
            UiEvent::RepositionEnded { .. } => "RepositionEnded",
            UiEvent::CueFired { .. } => "CueFired",
            UiEvent::BandpowerUpdated { .. } => "BandpowerUpdated",
            UiEvent::MetricsReady { .. } => "MetricsReady",
            UiEvent::LogLine { .. } => "LogLine",
            UiEvent::SessionEnded { .. } => "SessionEnded",
        }
    }
}
