//! Event types for the CQ session pipeline
//!
//! The external engine emits one JSON object per line on its stdout; every
//! line decodes to exactly one [`SessionEvent`]. Variants mirror the engine's
//! event vocabulary; lines that do not parse become `Log` events and
//! well-formed objects with an unrecognized tag become `Unknown` events, so
//! no engine output is ever dropped.

mod decode;

pub use decode::decode_line;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Which of the engine's output channels a raw line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Lookahead summary of the epoch that follows the current one.
///
/// Optional on the wire; all lookahead cue logic must tolerate absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextEpoch {
    pub label: String,
    #[serde(default)]
    pub instruction: Option<String>,
}

/// Events received from the external acquisition/analysis engine.
///
/// Arrives in strict temporal order over one logical stream. Payload fields
/// match the engine's emissions; extra fields on the wire are ignored rather
/// than rejected, since the event vocabulary grows over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session accepted; acquisition is being prepared
    SessionStart { mode: String },

    /// Acquisition hardware is streaming
    BoardReady {
        sampling_rate: f64,
        #[serde(default)]
        eeg_channels: Option<Vec<u32>>,
    },

    /// A recording sequence (one site, or the master simultaneous run) begins
    SequenceStart {
        sequence: String,
        locations: Vec<String>,
        total_epochs: u32,
    },

    /// All epochs of a sequence captured
    SequenceComplete { sequence: String },

    /// A timed recording epoch begins
    EpochStart {
        sequence: String,
        index: u32,
        label: String,
        instruction: String,
        seconds: u32,
        locations: Vec<String>,
        #[serde(default)]
        next_epoch: Option<NextEpoch>,
    },

    /// One-second countdown within the current epoch
    EpochTick {
        sequence: String,
        index: u32,
        label: String,
        seconds_remaining: u32,
    },

    /// Current epoch fully captured
    EpochComplete {
        sequence: String,
        index: u32,
        label: String,
        #[serde(default)]
        captured_locations: Vec<String>,
    },

    /// Electrode must be moved before the next sequence
    RepositionStart {
        next_location: String,
        mode: String,
        #[serde(default)]
        seconds: Option<u32>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Countdown during a timer-mode reposition pause
    RepositionTick {
        seconds_remaining: u32,
        next_location: String,
    },

    /// Engine is blocked waiting for the operator's ready confirmation
    RepositionWaiting {
        next_location: String,
        #[serde(default)]
        message: Option<String>,
    },

    /// Engine stdin reached EOF while waiting; it gives up the gate
    RepositionInputEof { next_location: String },

    /// Reposition pause over; recording resumes
    RepositionComplete {
        next_location: String,
        #[serde(default)]
        mode: Option<String>,
    },

    /// Live spectral power sample for the current epoch
    Bandpower {
        sequence: String,
        index: u32,
        label: String,
        #[serde(default)]
        seconds_elapsed: Option<u32>,
        #[serde(default)]
        seconds_remaining: Option<u32>,
        #[serde(default)]
        window_seconds: Option<f64>,
        /// location -> band name -> amplitude
        features: HashMap<String, HashMap<String, f64>>,
    },

    /// Acquisition hardware released
    BoardStopped,

    /// Clinical metric derivation finished
    AnalysisComplete {
        #[serde(default)]
        metrics: Option<u32>,
        #[serde(default)]
        out_of_range: Option<u32>,
    },

    /// Session finished; result artifact written
    SessionComplete { output_path: String },

    /// Session terminated on request
    SessionStopped,

    /// Engine-reported failure
    Error { message: String },

    /// Raw line from the engine that is not structured event data
    Log { stream: LogStream, message: String },

    /// Well-formed object with an unrecognized event tag; preserved as-is
    #[serde(skip)]
    Unknown {
        event: String,
        payload: serde_json::Value,
    },
}

impl SessionEvent {
    /// Get event type as string for filtering and display
    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::SessionStart { .. } => "session_start",
            SessionEvent::BoardReady { .. } => "board_ready",
            SessionEvent::SequenceStart { .. } => "sequence_start",
            SessionEvent::SequenceComplete { .. } => "sequence_complete",
            SessionEvent::EpochStart { .. } => "epoch_start",
            SessionEvent::EpochTick { .. } => "epoch_tick",
            SessionEvent::EpochComplete { .. } => "epoch_complete",
            SessionEvent::RepositionStart { .. } => "reposition_start",
            SessionEvent::RepositionTick { .. } => "reposition_tick",
            SessionEvent::RepositionWaiting { .. } => "reposition_waiting",
            SessionEvent::RepositionInputEof { .. } => "reposition_input_eof",
            SessionEvent::RepositionComplete { .. } => "reposition_complete",
            SessionEvent::Bandpower { .. } => "bandpower",
            SessionEvent::BoardStopped => "board_stopped",
            SessionEvent::AnalysisComplete { .. } => "analysis_complete",
            SessionEvent::SessionComplete { .. } => "session_complete",
            SessionEvent::SessionStopped => "session_stopped",
            SessionEvent::Error { .. } => "error",
            SessionEvent::Log { .. } => "log",
            SessionEvent::Unknown { event, .. } => event,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Broadcast bus for one-to-many event distribution.
///
/// Thin wrapper over `tokio::sync::broadcast`: non-blocking publish, multiple
/// concurrent subscribers, automatic cleanup when subscribers drop. The
/// receiver returned by [`subscribe`](EventBus::subscribe) doubles as the
/// unsubscribe handle; dropping it detaches the subscriber.
#[derive(Clone)]
pub struct EventBus<T: Clone> {
    tx: broadcast::Sender<T>,
    capacity: usize,
}

impl<T: Clone> EventBus<T> {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Err` if no subscriber is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: T) -> Result<usize, broadcast::error::SendError<T>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening.
    ///
    /// Used for high-rate telemetry where a missed event is acceptable.
    pub fn emit_lossy(&self, event: T) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
