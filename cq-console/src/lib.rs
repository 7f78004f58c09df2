//! # CQ Session Console (cq-console)
//!
//! Guided multi-stage recording session driver.
//!
//! **Purpose:** Launch the external acquisition/analysis engine, consume its
//! live event stream, walk the operator through recording epochs and
//! electrode-repositioning pauses with audio/visual cues, chart live
//! spectral telemetry, and normalize the final result artifact into
//! range-compliance findings.
//!
//! **Architecture:** Single ordered event pipeline feeding a pure state
//! machine and a per-epoch bandpower buffer; render instructions broadcast
//! to any presentation layer.

pub mod cues;
pub mod engine;
pub mod error;
pub mod render;
pub mod session;

pub use error::{Error, Result};
pub use render::UiEvent;
pub use session::SessionController;
