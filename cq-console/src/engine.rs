//! External engine process control
//!
//! Launches the acquisition/analysis engine with piped stdio, forwards every
//! output line through the event decoder into one ordered channel, and
//! carries the newline-delimited command protocol back over stdin. The
//! engine owns all sampling and spectral math; this module only moves bytes.

use crate::error::{Error, Result};
use cq_common::config::SessionConfig;
use cq_common::events::{decode_line, LogStream, SessionEvent};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Event channel depth; the engine paces emissions at roughly one per
/// second per kind, so this never fills in practice.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One outbound command line, serialized as a single JSON object.
#[derive(Debug, Serialize)]
pub struct EngineCommand<'a> {
    pub command: &'a str,
    pub next_location: &'a str,
}

/// Handle to a running engine process.
pub struct EngineHandle {
    child: Child,
    stdin: ChildStdin,
    /// Where the engine was told to write the result artifact
    pub output_path: PathBuf,
    config_path: PathBuf,
}

impl EngineHandle {
    /// Spawn the engine for one session.
    ///
    /// Writes the engine's config document next to the designated result
    /// artifact, launches `program args… --config <path> --output <path>`,
    /// and starts line readers on both output channels. Every line arrives
    /// on the returned receiver as a decoded [`SessionEvent`], stdout and
    /// stderr distinguished by the decoder's stream tag.
    pub fn spawn(
        config: &SessionConfig,
        session_id: Uuid,
    ) -> Result<(EngineHandle, mpsc::Receiver<SessionEvent>)> {
        let dir = config
            .engine
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let config_path = dir.join(format!("cq_session_{session_id}.config.json"));
        let output_path = dir.join(format!("cq_session_{session_id}.result.json"));

        let document = config.engine_document();
        std::fs::write(
            &config_path,
            serde_json::to_vec_pretty(&document).map_err(cq_common::Error::from)?,
        )?;

        let mut child = Command::new(&config.engine.program)
            .args(&config.engine.args)
            .arg("--config")
            .arg(&config_path)
            .arg("--output")
            .arg(&output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Spawn(format!(
                    "failed to launch {}: {e}",
                    config.engine.program
                ))
            })?;

        info!(
            program = %config.engine.program,
            config = %config_path.display(),
            output = %output_path.display(),
            "engine launched"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("engine stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("engine stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("engine stderr not piped".to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let stdout_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = decode_line(&line, LogStream::Stdout);
                if stdout_tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("engine stdout closed");
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = decode_line(&line, LogStream::Stderr);
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("engine stderr closed");
        });

        Ok((
            EngineHandle {
                child,
                stdin,
                output_path,
                config_path,
            },
            rx,
        ))
    }

    /// Send one ready confirmation over the command channel.
    pub async fn send_ready(&mut self, next_location: &str) -> Result<()> {
        let command = EngineCommand {
            command: "ready",
            next_location,
        };
        let mut line = serde_json::to_string(&command).map_err(cq_common::Error::from)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        debug!(next_location, "ready command sent");
        Ok(())
    }

    /// Wait for the engine process to exit.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Request termination without waiting for a final event.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already-exited children are fine; anything else is just noise
            debug!(error = %e, "engine kill request");
        }
    }

    /// Read and parse the result artifact the engine wrote.
    ///
    /// Non-finite numeric literals are normalized to `null` before parsing.
    /// A missing or unreadable artifact is an [`cq_common::Error::EngineFailure`].
    pub fn read_result(&self) -> Result<serde_json::Value> {
        let text = std::fs::read_to_string(&self.output_path).map_err(|e| {
            cq_common::Error::EngineFailure(format!(
                "no result artifact at {}: {e}",
                self.output_path.display()
            ))
        })?;
        let value = serde_json::from_str(&cq_common::metrics::sanitize_json_text(&text))
            .map_err(|e| {
                cq_common::Error::EngineFailure(format!("unparseable result artifact: {e}"))
            })?;
        Ok(value)
    }

    /// Best-effort cleanup of the generated config document.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_file(&self.config_path) {
            warn!(path = %self.config_path.display(), error = %e, "config cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let command = EngineCommand {
            command: "ready",
            next_location: "Fz",
        };
        let line = serde_json::to_string(&command).expect("serialize");
        assert_eq!(line, r#"{"command":"ready","next_location":"Fz"}"#);
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let mut config = SessionConfig::default();
        config.engine.program = "/nonexistent/engine-binary".to_string();
        let dir = tempfile::tempdir().expect("tempdir");
        config.engine.output_dir = Some(dir.path().to_path_buf());

        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let _guard = runtime.enter();
        let result = EngineHandle::spawn(&config, Uuid::new_v4());
        assert!(matches!(result, Err(Error::Spawn(_))));
    }
}
