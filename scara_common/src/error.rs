//! Shared error types.
//!
//! Two styles coexist deliberately: `ConfigError` is hand-written because its
//! variants carry formatted diagnostic strings that benefit from precise
//! control over `Display`; `BusError` is `thiserror`-derived because its
//! variants are simple and request/response-shaped. Both implement
//! `std::error::Error` either way.

use thiserror::Error;

/// Errors raised while loading or validating machine configuration (§10.3).
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(String),
    /// The file did not parse as valid TOML.
    Parse(String),
    /// The file parsed but failed a validation rule.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Validation(e) => write!(f, "config validation error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised by the bus abstraction layer (§4.2).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus bring-up failed on interface {iface}: {reason}")]
    BringUp { iface: String, reason: String },
    #[error("SDO write to slave {slave} index {index:#06x}:{subindex:#04x} failed")]
    SdoWrite {
        slave: u16,
        index: u16,
        subindex: u8,
    },
    #[error("working counter {actual} below expected {expected}")]
    WorkingCounterShortfall { actual: i32, expected: i32 },
    #[error("slave {slave} did not reach requested state within timeout")]
    StateTimeout { slave: u16 },
}

/// Errors raised while decoding an inbound façade command (§4.10). Always
/// local: a decode failure is logged and the command dropped, it never
/// reaches the Motion FSM.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("malformed payload for command {command}: {reason}")]
    MalformedPayload { command: String, reason: String },
}
