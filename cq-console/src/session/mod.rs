//! Session subsystem: state machine, live aggregation, orchestration

pub mod bandpower;
pub mod controller;
pub mod runtime;

pub use bandpower::{Band, BandState, CHART_BANDS};
pub use controller::{CommandReply, SessionController, StopReply};
pub use runtime::{EpochContext, ReadyCheck, SessionAction, SessionPhase, SessionRuntime};
