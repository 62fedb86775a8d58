//! Port transport layer.
//!
//! The session engine talks to hardware through the [`Transport`]
//! capability trait so it can be driven against a fake port in tests. The
//! only real implementation is [`SerialTransport`] over a physical or
//! virtual serial device.

mod serial;

pub use serial::{list_ports, SerialTransport, OPEN_TIMEOUT_MS};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity: {other}")),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Odd => write!(f, "ODD"),
            Self::Even => write!(f, "EVEN"),
        }
    }
}

/// Wire-level line parameters applied to an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Baud rate, must be positive
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1-2)
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
}

/// Informational line-state signals.
///
/// These are observed and reported, never escalated: a debugging tool has
/// to survive line noise without dropping the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    /// Break condition on the line
    Break,
    /// Receive buffer overrun
    Overrun,
    /// Framing error
    FramingError,
    /// Parity error
    ParityError,
    /// Carrier detect changed
    CarrierDetect,
    /// Clear-to-send changed
    ClearToSend,
    /// Data-set-ready changed
    DataSetReady,
    /// Ring indicator changed
    RingIndicator,
    /// Output buffer drained
    OutputBufferEmpty,
}

impl fmt::Display for LineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Break => "break",
            Self::Overrun => "overrun",
            Self::FramingError => "framing error",
            Self::ParityError => "parity error",
            Self::CarrierDetect => "carrier detect",
            Self::ClearToSend => "clear to send",
            Self::DataSetReady => "data set ready",
            Self::RingIndicator => "ring indicator",
            Self::OutputBufferEmpty => "output buffer empty",
        };
        write!(f, "{label}")
    }
}

/// Transport error types
#[derive(Debug, Error)]
pub enum TransportError {
    /// The named port does not exist
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// The port is claimed by another process
    #[error("port busy: {0}")]
    PortBusy(String),

    /// Access to the port was denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The device rejected the line settings
    #[error("invalid line settings: {0}")]
    InvalidSettings(String),

    /// Device-level failure
    #[error("device error: {0}")]
    Device(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The port handle has been released
    #[error("port is not open")]
    NotOpen,
}

/// Capability interface over an open port.
///
/// Implementations use interior mutability: reads belong to the listener,
/// writes are serialized above this layer by the session's writer lock, so
/// the per-call locking here only protects the handle itself.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Re-apply line parameters on the live handle without reopening.
    fn reconfigure(&self, settings: &LineSettings) -> Result<(), TransportError>;

    /// Number of inbound bytes currently buffered.
    fn bytes_to_read(&self) -> Result<u32, TransportError>;

    /// Read a single buffered inbound byte.
    fn read_byte(&self) -> Result<u8, TransportError>;

    /// Write a full buffer to the port.
    async fn write_all(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Drain line-state changes observed since the last poll.
    fn poll_line_events(&self) -> Vec<LineEvent>;

    /// Release the output side, the input side and the port handle, in
    /// that order. Best-effort and idempotent: failures are logged, never
    /// returned, so teardown always completes.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_from_str() {
        assert_eq!("none".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("ODD".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!("e".parse::<Parity>().unwrap(), Parity::Even);
        assert!("mark".parse::<Parity>().is_err());
    }

    #[test]
    fn test_line_event_labels() {
        assert_eq!(LineEvent::ParityError.to_string(), "parity error");
        assert_eq!(LineEvent::Break.to_string(), "break");
    }
}
