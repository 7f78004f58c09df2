//! Session controller
//!
//! Owns the full lifecycle of one guided recording session: launches the
//! engine, pumps its event stream through the state machine and bandpower
//! aggregator in strict arrival order, executes the side effects those
//! components demand (cues, gate notices, resets), and exposes the read
//! surface the presentation layer redraws from.

use crate::cues::{lookahead_pattern, pattern_for, CuePlayer};
use crate::engine::EngineHandle;
use crate::error::Result;
use crate::render::UiEvent;
use crate::session::bandpower::{Band, BandState};
use crate::session::runtime::{ReadyCheck, SessionAction, SessionPhase, SessionRuntime};
use cq_common::config::SessionConfig;
use cq_common::events::{EventBus, SessionEvent};
use cq_common::metrics::{
    normalize_text, MetricFilter, MetricRecord, NormalizedResult, ResultProvenance, ResultSummary,
};
use cq_common::Error as CommonError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Synchronous acceptance/rejection of an outbound command.
#[derive(Debug, Clone)]
pub struct CommandReply {
    pub ok: bool,
    pub message: Option<String>,
}

impl CommandReply {
    fn accepted() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Outcome of a stop request.
#[derive(Debug, Clone)]
pub struct StopReply {
    pub stopped: bool,
    pub reason: Option<String>,
}

/// Orchestrator for one session at a time.
///
/// All live state (phase, epoch context, band series, pending gate) is owned
/// here and discarded at the next session start; there are no ambient
/// globals. Render reads are safe at any time, including before the first
/// sample arrives.
pub struct SessionController {
    config: SessionConfig,
    bus: EventBus<UiEvent>,
    cues: CuePlayer,
    runtime: Mutex<SessionRuntime>,
    bands: RwLock<BandState>,
    results: RwLock<Option<(NormalizedResult, ResultProvenance)>>,
    engine: Mutex<Option<EngineHandle>>,
}

impl SessionController {
    pub fn new(config: SessionConfig, cues: CuePlayer) -> Arc<Self> {
        let runtime = SessionRuntime::new(&config);
        let bands = BandState::new(&config.locations);
        Arc::new(Self {
            config,
            bus: EventBus::new(256),
            cues,
            runtime: Mutex::new(runtime),
            bands: RwLock::new(bands),
            results: RwLock::new(None),
            engine: Mutex::new(None),
        })
    }

    /// Subscribe to render instructions. Dropping the receiver unsubscribes;
    /// correctness never depends on it, since the controller self-gates on
    /// phase.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<UiEvent> {
        self.bus.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.runtime.lock().await.phase()
    }

    /// Start a session. Fails fast with `SessionAlreadyActive` while one is
    /// live; sessions are never queued.
    pub async fn start(self: &Arc<Self>) -> Result<Uuid> {
        let session_id = Uuid::new_v4();
        {
            let mut engine_slot = self.engine.lock().await;
            if engine_slot.is_some() || self.runtime.lock().await.phase().is_running() {
                return Err(CommonError::SessionAlreadyActive.into());
            }

            let (handle, rx) = EngineHandle::spawn(&self.config, session_id)?;
            *engine_slot = Some(handle);

            // Fresh runtime per session; the session_start event resets the
            // rest of the live state
            *self.runtime.lock().await = SessionRuntime::new(&self.config);

            let controller = Arc::clone(self);
            tokio::spawn(async move { controller.pump(rx).await });
        }

        info!(%session_id, mode = %self.config.mode, "session starting");
        self.emit(UiEvent::StatusLine {
            text: format!("Starting {} session {session_id}", self.config.mode),
            timestamp: chrono::Utc::now(),
        });
        Ok(session_id)
    }

    /// Issue the operator's ready confirmation for `location`.
    ///
    /// Gate-checked: rejected (not thrown) when no reposition is pending,
    /// when the pending location differs, when a ready was already sent, or
    /// when no engine is running.
    pub async fn ready(&self, location: &str) -> CommandReply {
        let check = self.runtime.lock().await.check_ready(location);
        if let ReadyCheck::Rejected(reason) = check {
            return CommandReply::rejected(reason);
        }

        let mut engine_slot = self.engine.lock().await;
        let Some(engine) = engine_slot.as_mut() else {
            self.runtime.lock().await.ready_send_failed();
            return CommandReply::rejected("engine is not running");
        };
        if let Err(e) = engine.send_ready(location).await {
            warn!(location, error = %e, "ready command failed");
            drop(engine_slot);
            self.runtime.lock().await.ready_send_failed();
            return CommandReply::rejected(format!("command channel error: {e}"));
        }

        self.emit(UiEvent::StatusLine {
            text: format!("Ready confirmed for {location}"),
            timestamp: chrono::Utc::now(),
        });
        CommandReply::accepted()
    }

    /// Stop the session: request engine termination and transition locally
    /// to Stopped without waiting for a final event. A late terminal event
    /// from the engine is tolerated as a no-op.
    pub async fn stop(&self) -> StopReply {
        let running = {
            let runtime = self.runtime.lock().await;
            runtime.phase().is_running()
        };
        let mut engine_slot = self.engine.lock().await;
        if !running && engine_slot.is_none() {
            return StopReply {
                stopped: false,
                reason: Some("no active session".to_string()),
            };
        }
        if let Some(engine) = engine_slot.as_mut() {
            engine.kill();
        }
        drop(engine_slot);

        let actions = self.runtime.lock().await.force_stop();
        self.execute(actions).await;
        info!("session stop requested");
        StopReply {
            stopped: true,
            reason: None,
        }
    }

    /// Load a result document from storage through the same normalizer,
    /// tagged as imported rather than live. Failure leaves any previously
    /// loaded metrics untouched.
    pub async fn load_result_file(&self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let normalized = normalize_text(&text)?;
        self.store_results(normalized, ResultProvenance::ImportedFile(path.to_path_buf()))
            .await;
        Ok(())
    }

    // ========================================
    // Render read surface
    // ========================================

    /// Full sample series for one (location, band) pair; empty before any
    /// sample arrives.
    pub async fn band_series(&self, location: &str, band: Band) -> Vec<f64> {
        self.bands.read().await.series(location, band).to_vec()
    }

    /// Latest value per charted band for one location.
    pub async fn latest_bands(&self, location: &str) -> Vec<(Band, f64)> {
        self.bands.read().await.latest(location)
    }

    /// Canonical metric table rows under `filter`. Filtering never touches
    /// the stored list.
    pub async fn metric_rows(&self, filter: MetricFilter) -> Vec<MetricRecord> {
        match self.results.read().await.as_ref() {
            Some((normalized, _)) => filter
                .apply(&normalized.metrics)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Summary over the full unfiltered metric set.
    pub async fn summary(&self) -> Option<ResultSummary> {
        self.results
            .read()
            .await
            .as_ref()
            .map(|(normalized, _)| normalized.summary.clone())
    }

    pub async fn provenance(&self) -> Option<ResultProvenance> {
        self.results
            .read()
            .await
            .as_ref()
            .map(|(_, provenance)| provenance.clone())
    }

    // ========================================
    // Event pipeline
    // ========================================

    /// Drain the engine's event stream in arrival order, then reap the
    /// process and resolve the session outcome.
    async fn pump(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<SessionEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }

        // Output channels closed: the engine exited
        let status = {
            let mut engine_slot = self.engine.lock().await;
            let status = match engine_slot.as_mut() {
                Some(engine) => engine.wait().await.ok(),
                None => None,
            };
            if let Some(engine) = engine_slot.take() {
                engine.cleanup();
            }
            status
        };

        let terminal = self.runtime.lock().await.phase().is_terminal();
        if !terminal {
            let message = match status {
                Some(status) if !status.success() => {
                    format!("engine terminated abnormally ({status})")
                }
                _ => "engine exited without completing the session".to_string(),
            };
            warn!(%message, "session failed");
            let actions = self.runtime.lock().await.force_fail(message);
            self.execute(actions).await;
        }
    }

    /// Process one decoded event: aggregate bandpower, run the state
    /// machine, execute its actions, then emit the per-event render
    /// instructions. Handlers never block on I/O; cue playback and redraws
    /// are fire-and-forget.
    pub async fn handle_event(&self, event: SessionEvent) {
        let now = chrono::Utc::now();

        if matches!(event, SessionEvent::Bandpower { .. }) {
            let touched = self.bands.write().await.on_bandpower(&event);
            if !touched.is_empty() {
                self.bus.emit_lossy(UiEvent::BandpowerUpdated {
                    locations: touched,
                    timestamp: now,
                });
            }
        }

        let (actions, phase_change) = {
            let mut runtime = self.runtime.lock().await;
            let before = runtime.phase();
            let actions = runtime.apply(&event);
            let after = runtime.phase();
            (actions, (before != after).then_some(after))
        };
        self.execute(actions).await;
        if let Some(phase) = phase_change {
            self.emit(UiEvent::PhaseChanged {
                phase,
                timestamp: now,
            });
        }

        match event {
            SessionEvent::SessionStart { mode } => {
                self.emit(UiEvent::StatusLine {
                    text: format!("Session started ({mode} mode)"),
                    timestamp: now,
                });
            }
            SessionEvent::BoardReady { sampling_rate, .. } => {
                self.emit(UiEvent::StatusLine {
                    text: format!("Board ready at {sampling_rate} Hz"),
                    timestamp: now,
                });
            }
            SessionEvent::SequenceStart {
                sequence,
                total_epochs,
                ..
            } => {
                self.emit(UiEvent::StatusLine {
                    text: format!("Sequence {sequence}: {total_epochs} epochs"),
                    timestamp: now,
                });
            }
            SessionEvent::EpochStart {
                sequence,
                index,
                label,
                instruction,
                seconds,
                locations,
                ..
            } => {
                self.emit(UiEvent::EpochStarted {
                    sequence,
                    index,
                    label,
                    instruction,
                    seconds,
                    locations,
                    timestamp: now,
                });
            }
            SessionEvent::EpochTick {
                label,
                seconds_remaining,
                ..
            } => {
                self.bus.emit_lossy(UiEvent::EpochProgress {
                    label,
                    seconds_remaining,
                    timestamp: now,
                });
            }
            SessionEvent::RepositionStart {
                next_location,
                mode,
                message,
                ..
            } => {
                self.emit(UiEvent::RepositionStarted {
                    next_location,
                    gated: mode == "manual",
                    message,
                    timestamp: now,
                });
            }
            SessionEvent::RepositionTick {
                next_location,
                seconds_remaining,
            } => {
                self.bus.emit_lossy(UiEvent::RepositionProgress {
                    next_location,
                    seconds_remaining,
                    timestamp: now,
                });
            }
            SessionEvent::RepositionWaiting {
                next_location,
                message,
            } => {
                self.emit(UiEvent::StatusLine {
                    text: message
                        .unwrap_or_else(|| format!("Waiting for ready at {next_location}")),
                    timestamp: now,
                });
            }
            SessionEvent::AnalysisComplete {
                metrics,
                out_of_range,
            } => {
                self.emit(UiEvent::StatusLine {
                    text: format!(
                        "Analysis complete: {} metrics, {} out of range",
                        metrics.map_or_else(|| "?".to_string(), |n| n.to_string()),
                        out_of_range.map_or_else(|| "?".to_string(), |n| n.to_string()),
                    ),
                    timestamp: now,
                });
            }
            SessionEvent::SessionComplete { output_path } => {
                // A late completion after a local stop is a no-op; only a
                // runtime that accepted the transition gets its artifact read
                if self.runtime.lock().await.phase() == SessionPhase::Complete {
                    self.finish_with_artifact(&output_path).await;
                }
            }
            SessionEvent::Log { stream, message } => {
                self.bus.emit_lossy(UiEvent::LogLine {
                    stream,
                    message,
                    timestamp: now,
                });
            }
            SessionEvent::Unknown { event, payload } => {
                // Vocabulary growth: surface unrecognized events verbatim
                self.bus.emit_lossy(UiEvent::LogLine {
                    stream: cq_common::events::LogStream::Stdout,
                    message: format!("unrecognized event {event}: {payload}"),
                    timestamp: now,
                });
            }
            _ => {}
        }
    }

    /// Execute the side effects the state machine demanded.
    async fn execute(&self, actions: Vec<SessionAction>) {
        let now = chrono::Utc::now();
        for action in actions {
            match action {
                SessionAction::StartCue { label } => {
                    let pattern = pattern_for(&label);
                    self.cues.play(pattern);
                    self.emit(UiEvent::CueFired {
                        label,
                        lookahead: false,
                        tone_hz: pattern.tone_hz,
                        beeps: pattern.beeps,
                        timestamp: now,
                    });
                }
                SessionAction::LookaheadCue { label } => {
                    let pattern = lookahead_pattern(&label);
                    self.cues.play(pattern);
                    self.emit(UiEvent::CueFired {
                        label,
                        lookahead: true,
                        tone_hz: pattern.tone_hz,
                        beeps: pattern.beeps,
                        timestamp: now,
                    });
                }
                SessionAction::EnterEpoch { epoch_key } => {
                    self.bands.write().await.reset(&epoch_key);
                }
                SessionAction::ResetSession => {
                    self.bands.write().await.reset("");
                    *self.results.write().await = None;
                }
                SessionAction::GateOpened { .. } => {
                    // The RepositionStarted render event carries the gate
                }
                SessionAction::GateCleared { location } => {
                    self.emit(UiEvent::RepositionEnded {
                        next_location: location,
                        timestamp: now,
                    });
                }
                SessionAction::Terminal { phase, message } => {
                    if let Some(message) = &message {
                        self.emit(UiEvent::StatusLine {
                            text: format!("Session failed: {message}"),
                            timestamp: now,
                        });
                    }
                    self.emit(UiEvent::SessionEnded {
                        phase,
                        message,
                        timestamp: now,
                    });
                }
            }
        }
    }

    /// Read, normalize and publish the result artifact named by the
    /// engine's final event.
    async fn finish_with_artifact(&self, output_path: &str) {
        match std::fs::read_to_string(output_path)
            .map_err(|e| {
                CommonError::EngineFailure(format!("no result artifact at {output_path}: {e}"))
            })
            .and_then(|text| normalize_text(&text))
        {
            Ok(normalized) => {
                self.store_results(normalized, ResultProvenance::LiveSession)
                    .await;
            }
            Err(e) => {
                warn!(output_path, error = %e, "result artifact unusable");
                self.emit(UiEvent::StatusLine {
                    text: format!("Result processing failed: {e}"),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    async fn store_results(&self, normalized: NormalizedResult, provenance: ResultProvenance) {
        let event = UiEvent::MetricsReady {
            provenance: provenance.to_string(),
            in_range: normalized.summary.in_range,
            out_of_range: normalized.summary.out_of_range,
            missing: normalized.summary.missing,
            timestamp: chrono::Utc::now(),
        };
        *self.results.write().await = Some((normalized, provenance));
        self.emit(event);
    }

    fn emit(&self, event: UiEvent) {
        self.bus.emit_lossy(event);
    }
}
