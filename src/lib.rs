//! # Portscope
//!
//! A serial-line terminal/debugger library. Portscope opens a physical or
//! virtual serial port with configurable line parameters, streams inbound
//! bytes to the presentation layer as decoded events, and streams outbound
//! bytes from user input or a file, optionally on a repeating timer.
//!
//! ## Example
//!
//! ```rust,no_run
//! use portscope::{PortConfig, SerialSession, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = SerialSession::new();
//!     session.open(PortConfig::new("/dev/ttyUSB0", 9600)).await?;
//!
//!     let mut rx = session.subscribe();
//!     session.send("AT\n", false).await?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let SessionEvent::InboundByte(byte) = event {
//!             println!("received: {byte:#04X}");
//!         }
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::config::AppConfig;
pub use crate::core::codec::{self, EncodingError, TextEncoding};
pub use crate::core::session::{
    AutoSendHandle, ConfigError, OpenError, PortConfig, SendError, SerialSession, SessionEvent,
    SessionState,
};
pub use crate::core::transport::{
    list_ports, LineEvent, LineSettings, Parity, SerialTransport, Transport, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
