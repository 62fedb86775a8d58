//! Core module containing the serial session engine
//!
//! This module provides:
//! - Transport layer abstracting the physical port behind a capability trait
//! - Session engine with state machine, auto-send jobs and the inbound listener
//! - Line codec for text/hex encoding and decoding

pub mod codec;
pub mod session;
pub mod transport;
