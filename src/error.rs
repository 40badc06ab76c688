//! # Modbus2Chain Error Handling
//!
//! Two outcome channels are used throughout the crate:
//!
//! - [`ModbusError`] covers everything a caller has to react to: transport
//!   failures (I/O, timeouts, CRC mismatches, unexpected unit ids), local
//!   precondition violations raised before any byte is written, register
//!   address errors and configuration problems. Exception replies received by
//!   a master are reported as [`ModbusError::Exception`].
//! - [`ProtocolException`] is the slave-side outcome of parsing or dispatching
//!   a request. It always carries the function code and the exception code so
//!   the transport can turn it into a well-formed exception frame. It is never
//!   propagated out of the slave loop.
//!
//! ## Error Classification
//!
//! ```rust
//! use modbus2chain::ModbusError;
//!
//! fn classify_error(error: &ModbusError) {
//!     if error.is_transport_error() {
//!         println!("Network/transport issue: {}", error);
//!     } else if error.is_protocol_error() {
//!         println!("Modbus protocol issue: {}", error);
//!     } else {
//!         println!("Other issue: {}", error);
//!     }
//! }
//! ```
//!
//! ## Retry Logic
//!
//! The library never retries on its own. Callers decide:
//!
//! ```rust
//! use modbus2chain::{ModbusError, ModbusResult};
//! use tokio::time::{sleep, Duration};
//!
//! async fn read_with_retry<F, Fut>(operation: F, max_retries: usize) -> ModbusResult<Vec<u16>>
//! where
//!     F: Fn() -> Fut,
//!     Fut: std::future::Future<Output = ModbusResult<Vec<u16>>>,
//! {
//!     let mut attempt = 0;
//!     loop {
//!         match operation().await {
//!             Ok(result) => return Ok(result),
//!             Err(error) if error.is_recoverable() && attempt < max_retries => {
//!                 attempt += 1;
//!                 sleep(Duration::from_millis(100 * attempt as u64)).await;
//!             }
//!             Err(error) => return Err(error),
//!         }
//!     }
//! }
//! ```

use thiserror::Error;

use crate::protocol::{ExceptionCode, EXCEPTION_BIT};

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus error types
///
/// Each variant carries enough context to diagnose the failure without
/// access to the raw frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors (network, serial)
    ///
    /// # Examples
    /// - TCP connection reset by peer
    /// - Serial port unplugged
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or binding failures
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An operation exceeded its configured timeout
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// General protocol violations in a received frame
    ///
    /// # Examples
    /// - Protocol id other than 0 in an MBAP header
    /// - Echoed function code does not match the request
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Function code not supported by this implementation
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Register address or range not configured in the store
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Invalid data value
    ///
    /// Raised for local precondition violations before any I/O takes place.
    ///
    /// # Examples
    /// - Reading 126 holding registers (max 125)
    /// - Coil value other than 0x0000 or 0xFF00
    /// - Empty value list for a multi-write
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// CRC validation failure on an RTU frame
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Modbus exception response returned by the peer
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Server Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Server Device Busy
    /// - 0x08: Memory Parity Error
    /// - 0x0A: Gateway Path Unavailable
    /// - 0x0B: Gateway Target Device Failed to Respond
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Frame structure errors (truncated or oversized frames)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Response came from a different unit than the one addressed
    #[error("Unexpected unit id: expected={expected}, actual={actual}")]
    UnexpectedUnit { expected: u8, actual: u8 },

    /// MBAP transaction id does not echo the one sent
    #[error("Transaction id mismatch: expected={expected}, actual={actual}")]
    TransactionMismatch { expected: u16, actual: u16 },

    /// Configuration errors
    ///
    /// # Examples
    /// - Malformed register definition file
    /// - Initial value that does not fit 16 bits
    /// - Write callback attached to a read-only table
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid address error
    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a CRC mismatch error
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// The function code is stored without the exception bit. Unknown
    /// exception codes keep their raw value and get a generic message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modbus2chain::ModbusError;
    ///
    /// let err = ModbusError::exception(0x83, 0x02);
    /// assert!(matches!(err, ModbusError::Exception { function: 0x03, code: 0x02, .. }));
    /// ```
    pub fn exception(function: u8, code: u8) -> Self {
        let message = ExceptionCode::from_u8(code)
            .map(|exception| exception.name())
            .unwrap_or("Unknown Exception")
            .to_string();

        Self::Exception {
            function: function & !EXCEPTION_BIT,
            code,
            message,
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create an unexpected unit error
    pub fn unexpected_unit(expected: u8, actual: u8) -> Self {
        Self::UnexpectedUnit { expected, actual }
    }

    /// Create a transaction mismatch error
    pub fn transaction_mismatch(expected: u16, actual: u16) -> Self {
        Self::TransactionMismatch { expected, actual }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modbus2chain::ModbusError;
    ///
    /// let timeout_error = ModbusError::timeout("read operation", 5000);
    /// assert!(timeout_error.is_recoverable());
    ///
    /// let invalid_function = ModbusError::invalid_function(0x99);
    /// assert!(!invalid_function.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::CrcMismatch { .. } => true,
            Self::Exception { code, .. } => {
                // Acknowledge, Busy
                matches!(code, 0x05 | 0x06)
            }
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    ///
    /// Covers the failures a master caller sees when the exchange itself
    /// went wrong, as opposed to the peer refusing the request.
    ///
    /// ```rust
    /// use modbus2chain::ModbusError;
    ///
    /// assert!(ModbusError::crc_mismatch(0x1234, 0x4321).is_transport_error());
    /// assert!(!ModbusError::exception(0x03, 0x02).is_transport_error());
    /// ```
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::CrcMismatch { .. }
                | Self::UnexpectedUnit { .. }
                | Self::TransactionMismatch { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
        )
    }
}

/// A request the slave cannot serve, expressed as the exception frame it
/// answers with.
///
/// Produced by the request parser and the dispatcher. The slave loop turns
/// every one of these into `[function_code | 0x80, code]` on the wire.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("protocol exception: function=0x{function_code:02X}, {code}")]
pub struct ProtocolException {
    /// Function code of the offending request (without the exception bit)
    pub function_code: u8,
    /// Reason reported to the master
    pub code: ExceptionCode,
}

impl ProtocolException {
    pub fn new(function_code: u8, code: ExceptionCode) -> Self {
        Self { function_code, code }
    }

    pub fn illegal_function(function_code: u8) -> Self {
        Self::new(function_code, ExceptionCode::IllegalFunction)
    }

    pub fn illegal_data_address(function_code: u8) -> Self {
        Self::new(function_code, ExceptionCode::IllegalDataAddress)
    }

    pub fn illegal_data_value(function_code: u8) -> Self {
        Self::new(function_code, ExceptionCode::IllegalDataValue)
    }

    /// Exception PDU for this outcome
    pub fn to_pdu(&self) -> Vec<u8> {
        crate::pdu::exception_response(self.function_code, self.code)
    }
}

impl From<ProtocolException> for ModbusError {
    fn from(err: ProtocolException) -> Self {
        Self::exception(err.function_code, err.code.to_u8())
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// The duration is unknown at this point; call sites that know it build
/// the error with [`ModbusError::timeout`] instead.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serial port errors
impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::connection(format!("Serial port error: {}", err))
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}
