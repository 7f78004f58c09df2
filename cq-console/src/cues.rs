//! Audible cue scheduling
//!
//! Maps task labels to fixed tone patterns and plays them on a dedicated
//! audio thread so the event pipeline never blocks on playback. Audio is
//! best-effort: no output device, a failed stream build, or a cues-disabled
//! configuration all degrade silently to visual-only cueing.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Beep length within a pattern
const BEEP_MS: u64 = 180;
/// Spacing between beep starts
const REPEAT_MS: u64 = 250;
/// Output amplitude (full scale is unpleasant on headphones)
const AMPLITUDE: f32 = 0.2;

/// Audible pattern for one cue: a tone frequency and a repeat count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CuePattern {
    pub tone_hz: f32,
    pub beeps: u32,
}

/// Fixed, total mapping from task label to cue pattern.
///
/// Unrecognized labels get the default single tone, so a growing task
/// vocabulary still produces an audible cue.
pub fn pattern_for(label: &str) -> CuePattern {
    let (tone_hz, beeps) = match label {
        "EO" => (880.0, 1),
        "EC" | "FRONTAL_EC" => (523.0, 2),
        "READ" => (659.0, 2),
        "COUNT" => (659.0, 3),
        "OMNI" => (784.0, 2),
        "TEST" => (740.0, 1),
        "HARMONIC" => (784.0, 3),
        _ => (880.0, 1),
    };
    CuePattern { tone_hz, beeps }
}

/// Pre-notification variant of a pattern: same shape, one octave down.
pub fn lookahead_pattern(label: &str) -> CuePattern {
    let base = pattern_for(label);
    CuePattern {
        tone_hz: base.tone_hz / 2.0,
        beeps: base.beeps,
    }
}

/// Shared tone generator state read by the audio callback.
struct ToneState {
    freq: f32,
    remaining_samples: usize,
    phase: f32,
}

/// Non-blocking cue player.
///
/// Playback requests are handed to a dedicated thread owning the cpal
/// stream; if that thread never came up (no device, cues disabled) requests
/// are dropped without error.
pub struct CuePlayer {
    tx: Option<mpsc::Sender<CuePattern>>,
}

impl CuePlayer {
    /// Start the audio thread. With `enabled == false` no device is opened
    /// and every play request is a no-op.
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            debug!("audible cues disabled by configuration");
            return Self { tx: None };
        }

        let (tx, rx) = mpsc::channel::<CuePattern>();
        std::thread::Builder::new()
            .name("cue-audio".to_string())
            .spawn(move || {
                if let Err(reason) = run_audio_thread(rx) {
                    warn!(reason = %reason, "cue audio unavailable, degrading to visual-only");
                }
            })
            .ok();

        Self { tx: Some(tx) }
    }

    /// Player that never produces audio (tests, headless runs).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Schedule a pattern. Returns immediately; playback happens on the
    /// audio thread at fixed offsets from cue start.
    pub fn play(&self, pattern: CuePattern) {
        if let Some(tx) = &self.tx {
            // A dead audio thread means silent degradation, not an error
            let _ = tx.send(pattern);
        }
    }
}

/// Audio thread body: open the default output device, then serve playback
/// requests until the player is dropped.
fn run_audio_thread(rx: mpsc::Receiver<CuePattern>) -> Result<(), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no default output device".to_string())?;

    let supported = device
        .default_output_config()
        .map_err(|e| format!("no output config: {e}"))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(format!(
            "unsupported sample format {:?}",
            supported.sample_format()
        ));
    }
    let config: StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    let tone = Arc::new(Mutex::new(ToneState {
        freq: 0.0,
        remaining_samples: 0,
        phase: 0.0,
    }));
    let callback_tone = Arc::clone(&tone);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let mut state = match callback_tone.lock() {
                    Ok(state) => state,
                    Err(_) => return,
                };
                for frame in data.chunks_mut(channels) {
                    let sample = if state.remaining_samples > 0 {
                        let value =
                            (state.phase * std::f32::consts::TAU).sin() * AMPLITUDE;
                        state.phase = (state.phase + state.freq / sample_rate as f32).fract();
                        state.remaining_samples -= 1;
                        value
                    } else {
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| warn!(error = %err, "cue stream error"),
            None,
        )
        .map_err(|e| format!("failed to build output stream: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("failed to start output stream: {e}"))?;

    debug!(sample_rate, channels, "cue audio stream running");

    // Serve requests until every sender is gone. Blocking here is fine:
    // this thread exists so the event pipeline never waits on playback.
    while let Ok(pattern) = rx.recv() {
        for _ in 0..pattern.beeps {
            if let Ok(mut state) = tone.lock() {
                state.freq = pattern.tone_hz;
                state.phase = 0.0;
                state.remaining_samples =
                    (sample_rate as u64 * BEEP_MS / 1000) as usize;
            }
            std::thread::sleep(Duration::from_millis(REPEAT_MS));
        }
    }
    Ok(())
}
