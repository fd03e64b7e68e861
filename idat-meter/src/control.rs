//! Remote multiplier control
//!
//! The broker delivers messages on [`CONTROL_TOPIC`] from its own task while
//! the publish loop reads the factor on every cycle. Both sides share a
//! [`ControlState`] handle; nothing else crosses the task boundary.
//!
//! Protocol (text payload, whitespace trimmed):
//! - `1` → boost mode, values are multiplied by 10
//! - any other integer → normal mode, factor 1
//! - anything else → rejected, the current factor is kept

use std::num::IntErrorKind;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Topic carrying the remote multiplier command.
pub const CONTROL_TOPIC: &str = "idat/control/multiplicador";

/// Operating mode selected by the control topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Boost,
}

impl Mode {
    /// Multiplication factor applied to every published value.
    pub fn factor(self) -> u8 {
        match self {
            Mode::Normal => 1,
            Mode::Boost => 10,
        }
    }

    fn from_factor(factor: u8) -> Self {
        if factor == Mode::Boost.factor() {
            Mode::Boost
        } else {
            Mode::Normal
        }
    }
}

/// Shared multiplication factor.
///
/// Cloning hands out another handle to the same scalar. Writes are
/// last-writer-wins with no queuing; a reader sees either the previous or the
/// new factor, never anything outside `{1, 10}`.
#[derive(Debug, Clone)]
pub struct ControlState {
    factor: Arc<AtomicU8>,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            factor: Arc::new(AtomicU8::new(Mode::Normal.factor())),
        }
    }

    pub fn read(&self) -> u8 {
        self.factor.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> Mode {
        Mode::from_factor(self.read())
    }

    pub fn write(&self, mode: Mode) {
        self.factor.store(mode.factor(), Ordering::Release);
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejected control payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("control payload is not valid UTF-8")]
    NotUtf8,

    #[error("invalid control payload {0:?}, expected '1' or '0'")]
    NotAnInteger(String),
}

/// Decode a control payload into the mode it selects.
///
/// Integers too large for `i64` are still integers and select normal mode.
pub fn parse_control(payload: &[u8]) -> Result<Mode, ControlError> {
    let text = std::str::from_utf8(payload).map_err(|_| ControlError::NotUtf8)?;
    let trimmed = text.trim();

    match trimmed.parse::<i64>() {
        Ok(1) => Ok(Mode::Boost),
        Ok(_) => Ok(Mode::Normal),
        Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
            Ok(Mode::Normal)
        }
        Err(_) => Err(ControlError::NotAnInteger(trimmed.to_string())),
    }
}

/// Callbacks invoked by the broker client from its network task.
pub trait MessageHandler: Send + Sync + 'static {
    /// Called on every successful (re)connection. Returns the topics to subscribe to.
    fn on_connected(&self) -> Vec<String>;

    /// Called for every message received on a subscribed topic.
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Applies control messages to a [`ControlState`].
#[derive(Debug, Clone)]
pub struct ControlListener {
    state: ControlState,
}

impl ControlListener {
    pub fn new(state: ControlState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Validate a payload and, if it parses, switch mode.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<Mode, ControlError> {
        let mode = parse_control(payload)?;
        self.state.write(mode);

        let factor = mode.factor();
        match mode {
            Mode::Boost => info!(factor, "🔥 ALARM! Control received: multiplier set to x10"),
            Mode::Normal => info!(factor, "🟢 Control received: multiplier set to x1 (normal)"),
        }

        Ok(mode)
    }
}

impl MessageHandler for ControlListener {
    fn on_connected(&self) -> Vec<String> {
        self.state.write(Mode::Normal);
        debug!("Multiplier reset to x1 after connection");
        vec![CONTROL_TOPIC.to_string()]
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        if topic != CONTROL_TOPIC {
            debug!("Ignoring message on unexpected topic: {}", topic);
            return;
        }

        if let Err(e) = self.handle_payload(payload) {
            warn!(factor = self.state.read(), "❌ {}", e);
        }
    }
}
