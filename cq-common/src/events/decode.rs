//! Line decoder for the engine event stream
//!
//! Every line yields exactly one event. Observability is a hard requirement:
//! malformed lines are demoted to `Log`, never discarded, and recognized tags
//! with payloads we cannot type also fall back to `Log` rather than failing
//! the pipeline.

use super::{LogStream, SessionEvent};
use tracing::debug;

/// Decode one raw line from the engine into a [`SessionEvent`].
///
/// - Not a JSON object, or no `event` tag → `Log { stream, message: raw }`
/// - Recognized tag with a well-typed payload → that variant
/// - Recognized tag with a mistyped payload → `Log` (decode stays non-fatal)
/// - Unrecognized tag → `Unknown { event, payload }` (vocabulary growth)
pub fn decode_line(raw: &str, stream: LogStream) -> SessionEvent {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return SessionEvent::Log {
            stream,
            message: String::new(),
        };
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            return SessionEvent::Log {
                stream,
                message: raw.to_string(),
            }
        }
    };

    let tag = match value.get("event").and_then(|t| t.as_str()) {
        Some(tag) => tag.to_string(),
        None => {
            return SessionEvent::Log {
                stream,
                message: raw.to_string(),
            }
        }
    };

    match serde_json::from_value::<SessionEvent>(value.clone()) {
        Ok(event) => event,
        Err(err) if known_tag(&tag) => {
            // Recognized vocabulary but a payload shape we cannot type.
            debug!(tag = %tag, error = %err, "event payload failed typed decode");
            SessionEvent::Log {
                stream,
                message: raw.to_string(),
            }
        }
        Err(_) => SessionEvent::Unknown {
            event: tag,
            payload: value,
        },
    }
}

fn known_tag(tag: &str) -> bool {
    matches!(
        tag,
        "session_start"
            | "board_ready"
            | "sequence_start"
            | "sequence_complete"
            | "epoch_start"
            | "epoch_tick"
            | "epoch_complete"
            | "reposition_start"
            | "reposition_tick"
            | "reposition_waiting"
            | "reposition_input_eof"
            | "reposition_complete"
            | "bandpower"
            | "board_stopped"
            | "analysis_complete"
            | "session_complete"
            | "session_stopped"
            | "error"
            | "log"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_becomes_log() {
        let event = decode_line("Traceback (most recent call last):", LogStream::Stderr);
        match event {
            SessionEvent::Log { stream, message } => {
                assert_eq!(stream, LogStream::Stderr);
                assert_eq!(message, "Traceback (most recent call last):");
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_json_without_tag_becomes_log() {
        let event = decode_line(r#"{"progress": 42}"#, LogStream::Stdout);
        assert!(matches!(event, SessionEvent::Log { .. }));
    }

    #[test]
    fn test_json_array_becomes_log() {
        let event = decode_line(r#"[1, 2, 3]"#, LogStream::Stdout);
        assert!(matches!(event, SessionEvent::Log { .. }));
    }

    #[test]
    fn test_unknown_tag_preserved() {
        let event = decode_line(
            r#"{"event":"impedance_check","location":"Cz","ohms":4200}"#,
            LogStream::Stdout,
        );
        match event {
            SessionEvent::Unknown { event, payload } => {
                assert_eq!(event, "impedance_check");
                assert_eq!(payload["ohms"], 4200);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_known_tag_with_bad_payload_degrades_to_log() {
        // seconds_remaining as a string is a payload we refuse to type
        let raw = r#"{"event":"epoch_tick","sequence":"Cz","index":1,"label":"EO","seconds_remaining":"soon"}"#;
        let event = decode_line(raw, LogStream::Stdout);
        match event {
            SessionEvent::Log { message, .. } => assert_eq!(message, raw),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_well_formed_event_decodes() {
        let event = decode_line(
            r#"{"event":"reposition_start","next_location":"Fz","mode":"manual","seconds":null,"message":"Move active electrode to Fz, then press Ready in the app."}"#,
            LogStream::Stdout,
        );
        match event {
            SessionEvent::RepositionStart {
                next_location,
                mode,
                seconds,
                ..
            } => {
                assert_eq!(next_location, "Fz");
                assert_eq!(mode, "manual");
                assert!(seconds.is_none());
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }
}
