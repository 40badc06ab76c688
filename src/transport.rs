//! # Modbus Transport Layer
//!
//! Transports move PDUs between peers and own everything that differs
//! between Modbus TCP and Modbus RTU: MBAP headers or address/CRC framing,
//! timing, connection lifecycle. Master and slave logic is written once
//! against the two traits below.
//!
//! ## Supported Transports
//!
//! ### Modbus TCP (`TcpTransport`, `TcpSlaveTransport`)
//! - MBAP header with wrapping transaction id counter
//! - Master: one connection per session, opened and closed by the caller
//! - Slave: one listener and at most one live client connection
//!
//! ### Modbus RTU (`RtuTransport`)
//! - Serial port communication (RS-232, RS-485), or any async byte stream
//! - CRC-16 validation, inter-frame delay derived from the baud rate
//! - Optional direction-control pin for half-duplex line drivers
//!
//! ## Transport Statistics
//!
//! ```rust,no_run
//! # use modbus2chain::transport::{MasterTransport, TransportStats};
//! # fn example(transport: &impl MasterTransport) {
//! let stats = transport.get_stats();
//!
//! println!("Requests sent: {}", stats.requests_sent);
//! println!("Responses received: {}", stats.responses_received);
//! println!("Errors: {}", stats.errors);
//! println!("Timeouts: {}", stats.timeouts);
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{ModbusResult, ProtocolException};
use crate::protocol::SlaveId;

/// Format raw bytes as hex string for packet logging
pub(crate) fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction and format
pub(crate) fn log_packet(direction: &str, data: &[u8], protocol: &str, slave_id: Option<u8>) {
    let hex_string = format_hex_packet(data);
    match slave_id {
        Some(id) => info!("[MODBUS-{}] {} slave:{} {}", protocol, direction, id, hex_string),
        None => info!("[MODBUS-{}] {} {}", protocol, direction, hex_string),
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub requests_received: u64,
    pub responses_sent: u64,
    pub frames_dropped: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Transport used by a master: one request PDU out, one response PDU back
///
/// Implementations validate the framing of the reply (CRC, transaction id,
/// unit id) and raise [`crate::ModbusError::Exception`] when the peer
/// answered with an exception. No retries are attempted.
#[async_trait]
pub trait MasterTransport: Send {
    /// Send `pdu` to `unit_id` and wait for the response PDU
    async fn send_receive(&mut self, unit_id: SlaveId, pdu: &[u8]) -> ModbusResult<Vec<u8>>;

    /// Whether the underlying connection or port is open
    fn is_connected(&self) -> bool;

    /// Close the underlying connection or port
    async fn close(&mut self) -> ModbusResult<()>;

    /// Communication statistics
    fn get_stats(&self) -> TransportStats;
}

/// Addressing of a received request, echoed back in its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub unit_id: SlaveId,
    /// MBAP transaction id; `None` on serial lines
    pub transaction_id: Option<u16>,
}

/// A framed request as handed to the slave loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub header: FrameHeader,
    pub pdu: Vec<u8>,
}

/// Transport used by a slave
#[async_trait]
pub trait SlaveTransport: Send {
    /// Wait up to `timeout` for the next request addressed to this slave
    ///
    /// Returns `Ok(None)` when nothing valid arrived in time. Frames for
    /// other units, corrupted frames and broken client connections are
    /// discarded here and never reach the caller.
    async fn get_request(&mut self, timeout: Duration) -> ModbusResult<Option<RequestFrame>>;

    /// Send a response PDU for the request identified by `header`
    async fn send_response(&mut self, header: FrameHeader, pdu: &[u8]) -> ModbusResult<()>;

    /// Send the exception frame for a rejected request
    async fn send_exception(
        &mut self,
        header: FrameHeader,
        exception: &ProtocolException,
    ) -> ModbusResult<()> {
        self.send_response(header, &exception.to_pdu()).await
    }

    /// Communication statistics
    fn get_stats(&self) -> TransportStats;
}
