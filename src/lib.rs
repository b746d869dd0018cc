//! # obd_link_adapter
//!
//! A multi-protocol OBD-II diagnostic adapter link layer.
//!
//! This crate implements the firmware-side half of an ELM327-dialect
//! diagnostic adapter: it accepts a hex-encoded OBD request from a host UART
//! link and drives it out over one of several vehicle bus protocols --
//! ISO 9141-2, ISO 14230-4 (KWP2000) slow/fast init, SAE J1850 VPW/PWM,
//! ISO 15765-4 (CAN 11-bit/29-bit), and SAE J1939 -- then collects and
//! reformats the ECU's response back into ASCII hex for the host.
//!
//! The MCU driver layer (UART bit-banging, CAN controller access, GPIO,
//! timers, LEDs) is not implemented here: [`driver`] only specifies the
//! trait contracts a host integration must provide. Likewise the AT command
//! parser that turns host text into [`config::ConfigParam`] reads/writes is
//! out of scope; only the [`config::ConfigStore`] it talks to lives here.
//!
//! Entry point for a host integration is [`dispatcher::ObdProfile`], which
//! owns the currently selected [`protocols::ProtocolAdapter`] and translates
//! its status codes into the reply lines a host expects.

#![deny(missing_docs)]

pub mod can_frame;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod ecumsg;
pub mod hex;
pub mod history;
pub mod j1939;
pub mod protocols;
pub mod status;
pub mod timeout;

use std::fmt;

/// Result type used throughout the crate.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Top-level error type for adapter operations.
///
/// Mirrors the status-code design of the original firmware: most
/// protocol-level failures are not exceptional control flow, they are
/// [`status::ReplyStatus`] values returned by adapter methods.
/// `AdapterError` is reserved for failures that cannot be expressed as a
/// reply status -- malformed configuration, a driver contract violation, or
/// a framing invariant break.
#[derive(Debug)]
pub enum AdapterError {
    /// A header/checksum framing invariant was violated (buffer too short to
    /// strip a header, or to append one without overflow).
    Framing(ecumsg::HeaderError),
    /// A checksum failed to verify outside the usual
    /// [`status::ReplyStatus::ChksError`] reply path.
    Checksum(ecumsg::ChecksumError),
    /// A configuration property was read with the wrong accessor for its
    /// storage class (e.g. `get_int` on a boolean property id).
    WrongPropertyClass(config::ConfigParam),
    /// The underlying bus driver reported a failure.
    Driver(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Framing(e) => write!(f, "framing error: {e}"),
            AdapterError::Checksum(e) => write!(f, "checksum error: {e}"),
            AdapterError::WrongPropertyClass(p) => {
                write!(f, "property {p:?} accessed with the wrong storage class")
            }
            AdapterError::Driver(msg) => write!(f, "driver error: {msg}"),
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdapterError::Framing(e) => Some(e),
            AdapterError::Checksum(e) => Some(e),
            AdapterError::WrongPropertyClass(_) | AdapterError::Driver(_) => None,
        }
    }
}

impl From<ecumsg::HeaderError> for AdapterError {
    fn from(e: ecumsg::HeaderError) -> Self {
        AdapterError::Framing(e)
    }
}

impl From<ecumsg::ChecksumError> for AdapterError {
    fn from(e: ecumsg::ChecksumError) -> Self {
        AdapterError::Checksum(e)
    }
}
