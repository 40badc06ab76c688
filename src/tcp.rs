//! Modbus TCP transport: MBAP framing for both roles.
//!
//! ```text
//! | transaction id (2) | protocol id (2) = 0 | length (2) | unit id (1) | PDU |
//! ```
//!
//! `length` counts the unit id plus the PDU. All fields are big-endian.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::{TcpMasterConfig, TcpSlaveConfig};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu;
use crate::protocol::SlaveId;
use crate::transport::{
    log_packet, FrameHeader, MasterTransport, RequestFrame, SlaveTransport, TransportStats,
};

/// MBAP header including the unit id
pub const MBAP_HEADER_SIZE: usize = 7;

/// Largest PDU a Modbus ADU may carry
pub const MAX_PDU_SIZE: usize = 253;

/// Largest Modbus TCP ADU
pub const MAX_TCP_FRAME_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;

/// Decoded MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: SlaveId,
}

impl MbapHeader {
    /// Header for a PDU of `pdu_len` bytes
    pub fn new(transaction_id: u16, unit_id: SlaveId, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Parse the first [`MBAP_HEADER_SIZE`] bytes of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MBAP_HEADER_SIZE {
            return None;
        }
        Some(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }

    /// PDU length announced by the header
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    fn has_valid_length(&self) -> bool {
        (2..=MAX_PDU_SIZE + 1).contains(&(self.length as usize))
    }
}

/// Build a complete TCP ADU
pub fn encode_adu(transaction_id: u16, unit_id: SlaveId, pdu: &[u8]) -> Vec<u8> {
    let header = MbapHeader::new(transaction_id, unit_id, pdu.len());
    let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + pdu.len());
    frame.extend_from_slice(&header.transaction_id.to_be_bytes());
    frame.extend_from_slice(&header.protocol_id.to_be_bytes());
    frame.extend_from_slice(&header.length.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// Modbus TCP master transport
///
/// Holds one connection for the lifetime of a session. A connection lost
/// to a timeout is reopened on the next request.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    config: TcpMasterConfig,
    transaction_id: u16,
    stats: TransportStats,
}

impl TcpTransport {
    /// Connect to the slave at `config.address`
    pub async fn connect(config: TcpMasterConfig) -> ModbusResult<Self> {
        let stream = Self::open(&config).await?;
        info!("connected to Modbus TCP slave {}", config.address);

        Ok(Self {
            stream: Some(stream),
            config,
            transaction_id: 0,
            stats: TransportStats::default(),
        })
    }

    async fn open(config: &TcpMasterConfig) -> ModbusResult<TcpStream> {
        let stream = timeout(config.timeout, TcpStream::connect(config.address))
            .await
            .map_err(|_| ModbusError::timeout("connect", config.timeout.as_millis() as u64))?
            .map_err(|e| ModbusError::connection(format!("Failed to connect to {}: {}", config.address, e)))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    pub fn address(&self) -> SocketAddr {
        self.config.address
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.config.packet_logging = enabled;
    }

    /// Transaction id the next request will carry
    pub fn next_transaction_id(&self) -> u16 {
        self.transaction_id
    }

    fn take_transaction_id(&mut self) -> u16 {
        let id = self.transaction_id;
        self.transaction_id = id.wrapping_add(1);
        id
    }

    /// Write `frame` and read back one complete ADU
    async fn exchange(stream: &mut TcpStream, frame: &[u8]) -> ModbusResult<Vec<u8>> {
        stream.write_all(frame).await?;

        let mut response = vec![0u8; MBAP_HEADER_SIZE];
        stream.read_exact(&mut response).await?;

        let header = MbapHeader::parse(&response)
            .ok_or_else(|| ModbusError::frame("Incomplete MBAP header"))?;
        if !header.has_valid_length() {
            return Err(ModbusError::frame(format!("Invalid MBAP length {}", header.length)));
        }

        response.resize(MBAP_HEADER_SIZE + header.pdu_len(), 0);
        stream.read_exact(&mut response[MBAP_HEADER_SIZE..]).await?;
        Ok(response)
    }

    fn validate_response(
        &self,
        transaction_id: u16,
        unit_id: SlaveId,
        response: &[u8],
    ) -> ModbusResult<Vec<u8>> {
        let header = MbapHeader::parse(response)
            .ok_or_else(|| ModbusError::frame("Incomplete MBAP header"))?;

        if header.transaction_id != transaction_id {
            return Err(ModbusError::transaction_mismatch(transaction_id, header.transaction_id));
        }
        if header.protocol_id != 0 {
            return Err(ModbusError::protocol(format!(
                "Invalid protocol id {}",
                header.protocol_id
            )));
        }
        if header.unit_id != unit_id {
            return Err(ModbusError::unexpected_unit(unit_id, header.unit_id));
        }

        let response_pdu = response[MBAP_HEADER_SIZE..].to_vec();
        pdu::check_exception(&response_pdu)?;
        Ok(response_pdu)
    }
}

#[async_trait]
impl MasterTransport for TcpTransport {
    async fn send_receive(&mut self, unit_id: SlaveId, request: &[u8]) -> ModbusResult<Vec<u8>> {
        if request.is_empty() || request.len() > MAX_PDU_SIZE {
            return Err(ModbusError::frame(format!(
                "PDU of {} bytes does not fit an MBAP frame",
                request.len()
            )));
        }
        if self.stream.is_none() {
            self.stream = Some(Self::open(&self.config).await?);
        }

        let transaction_id = self.take_transaction_id();
        let frame = encode_adu(transaction_id, unit_id, request);
        if self.config.packet_logging {
            log_packet("send", &frame, "TCP", Some(unit_id));
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Not connected"))?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let response = match timeout(self.config.timeout, Self::exchange(stream, &frame)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.stream = None;
                return Err(e);
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                self.stream = None;
                return Err(ModbusError::timeout(
                    "read response",
                    self.config.timeout.as_millis() as u64,
                ));
            }
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += response.len() as u64;
        if self.config.packet_logging {
            log_packet("receive", &response, "TCP", Some(unit_id));
        }

        self.validate_response(transaction_id, unit_id, &response)
            .map_err(|e| {
                self.stats.errors += 1;
                // a reply to some other request is still in flight on this stream
                if !matches!(e, ModbusError::Exception { .. }) {
                    self.stream = None;
                }
                e
            })
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("closed connection to {}", self.config.address);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

struct ClientConnection {
    stream: TcpStream,
    peer: SocketAddr,
    rx: Vec<u8>,
}

enum Buffered {
    Incomplete,
    Frame(MbapHeader, Vec<u8>),
    Invalid(String),
}

impl ClientConnection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            rx: Vec::with_capacity(MAX_TCP_FRAME_SIZE),
        }
    }

    fn next_frame(&mut self) -> Buffered {
        let header = match MbapHeader::parse(&self.rx) {
            Some(header) => header,
            None => return Buffered::Incomplete,
        };
        if header.protocol_id != 0 {
            return Buffered::Invalid(format!("protocol id {}", header.protocol_id));
        }
        if !header.has_valid_length() {
            return Buffered::Invalid(format!("MBAP length {}", header.length));
        }

        let total = MBAP_HEADER_SIZE + header.pdu_len();
        if self.rx.len() < total {
            return Buffered::Incomplete;
        }
        let pdu = self.rx[MBAP_HEADER_SIZE..total].to_vec();
        self.rx.drain(..total);
        Buffered::Frame(header, pdu)
    }
}

/// Modbus TCP slave transport
///
/// Serves one client at a time. A newly accepted connection replaces the
/// current one.
pub struct TcpSlaveTransport {
    listener: Option<TcpListener>,
    client: Option<ClientConnection>,
    config: TcpSlaveConfig,
    stats: TransportStats,
}

impl TcpSlaveTransport {
    /// Bind the listener on `config.bind_address`
    pub async fn bind(config: TcpSlaveConfig) -> ModbusResult<Self> {
        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to bind {}: {}", config.bind_address, e)))?;
        info!("Modbus TCP slave listening on {}", listener.local_addr()?);

        Ok(Self {
            listener: Some(listener),
            client: None,
            config,
            stats: TransportStats::default(),
        })
    }

    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Address of the connected client, if any
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.client.as_ref().map(|c| c.peer)
    }

    /// Drop the client connection and the listener
    pub fn unbind(&mut self) {
        self.drop_client();
        if self.listener.take().is_some() {
            info!("Modbus TCP slave unbound");
        }
    }

    fn accepts_unit(&self, unit_id: SlaveId) -> bool {
        match &self.config.unit_ids {
            Some(units) => units.contains(&unit_id),
            None => true,
        }
    }

    fn drop_client(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("dropping client {}", client.peer);
        }
    }

    async fn accept(&mut self, wait: Duration) -> ModbusResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| ModbusError::connection("TCP slave is not bound"))?;

        // a zero wait still picks up a connection that is already pending
        if let Ok(accepted) = timeout(wait, listener.accept()).await {
            let (stream, peer) = accepted?;
            stream.set_nodelay(true)?;
            if let Some(old) = self.client.replace(ClientConnection::new(stream, peer)) {
                info!("client {} replaced by {}", old.peer, peer);
            } else {
                info!("client {} connected", peer);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SlaveTransport for TcpSlaveTransport {
    async fn get_request(&mut self, wait: Duration) -> ModbusResult<Option<RequestFrame>> {
        let accept_wait = if self.client.is_none() { wait } else { Duration::ZERO };
        self.accept(accept_wait).await?;

        let deadline = Instant::now() + self.config.client_read_timeout;
        let mut chunk = [0u8; MAX_TCP_FRAME_SIZE];

        loop {
            let client = match self.client.as_mut() {
                Some(client) => client,
                None => return Ok(None),
            };

            match client.next_frame() {
                Buffered::Frame(header, request) => {
                    self.stats.requests_received += 1;
                    if self.config.packet_logging {
                        let frame = encode_adu(header.transaction_id, header.unit_id, &request);
                        log_packet("receive", &frame, "TCP", Some(header.unit_id));
                    }
                    if !self.accepts_unit(header.unit_id) {
                        debug!("ignoring request for unit {}", header.unit_id);
                        self.stats.frames_dropped += 1;
                        return Ok(None);
                    }
                    return Ok(Some(RequestFrame {
                        header: FrameHeader {
                            unit_id: header.unit_id,
                            transaction_id: Some(header.transaction_id),
                        },
                        pdu: request,
                    }));
                }
                Buffered::Invalid(reason) => {
                    warn!("closing client {}: invalid frame ({})", client.peer, reason);
                    self.stats.errors += 1;
                    self.drop_client();
                    return Ok(None);
                }
                Buffered::Incomplete => {}
            }

            match timeout_at(deadline, client.stream.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    info!("client {} disconnected", client.peer);
                    self.drop_client();
                    return Ok(None);
                }
                Ok(Ok(n)) => {
                    client.rx.extend_from_slice(&chunk[..n]);
                    self.stats.bytes_received += n as u64;
                }
                Ok(Err(e)) => {
                    warn!("read from client {} failed: {}", client.peer, e);
                    self.stats.errors += 1;
                    self.drop_client();
                    return Ok(None);
                }
            }
        }
    }

    async fn send_response(&mut self, header: FrameHeader, response: &[u8]) -> ModbusResult<()> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| ModbusError::connection("No client connected"))?;

        let frame = encode_adu(header.transaction_id.unwrap_or(0), header.unit_id, response);
        if self.config.packet_logging {
            log_packet("send", &frame, "TCP", Some(header.unit_id));
        }

        if let Err(e) = client.stream.write_all(&frame).await {
            self.stats.errors += 1;
            self.drop_client();
            return Err(ModbusError::io(format!("Failed to send response: {}", e)));
        }
        self.stats.responses_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave_config() -> TcpSlaveConfig {
        TcpSlaveConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..TcpSlaveConfig::default()
        }
    }

    #[test]
    fn test_encode_adu() {
        let frame = encode_adu(0x0102, 1, &[0x03, 0x00, 0x5D, 0x00, 0x01]);
        assert_eq!(
            frame,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x5D, 0x00, 0x01]
        );

        let header = MbapHeader::parse(&frame).unwrap();
        assert_eq!(header.transaction_id, 0x0102);
        assert_eq!(header.pdu_len(), 5);
        assert!(header.has_valid_length());
    }

    #[tokio::test]
    async fn test_master_slave_round_trip() {
        let mut slave = TcpSlaveTransport::bind(slave_config()).await.unwrap();
        assert!(slave.is_bound());
        let address = slave.local_addr().unwrap();

        let master_task = tokio::spawn(async move {
            let mut master = TcpTransport::connect(TcpMasterConfig {
                address,
                ..TcpMasterConfig::default()
            })
            .await
            .unwrap();
            assert_eq!(master.next_transaction_id(), 0);
            let response = master.send_receive(1, &[0x03, 0x00, 0x5D, 0x00, 0x01]).await;
            assert_eq!(master.next_transaction_id(), 1);
            response
        });

        let request = loop {
            if let Some(request) = slave.get_request(Duration::from_secs(1)).await.unwrap() {
                break request;
            }
        };
        assert_eq!(request.header.unit_id, 1);
        assert_eq!(request.header.transaction_id, Some(0));
        assert_eq!(request.pdu, vec![0x03, 0x00, 0x5D, 0x00, 0x01]);

        slave
            .send_response(request.header, &[0x03, 0x02, 0x00, 0x14])
            .await
            .unwrap();

        let response = master_task.await.unwrap().unwrap();
        assert_eq!(response, vec![0x03, 0x02, 0x00, 0x14]);
        assert_eq!(slave.get_stats().responses_sent, 1);
    }

    #[tokio::test]
    async fn test_master_raises_exception_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            socket
                .write_all(&encode_adu(0, 1, &[0x83, 0x02]))
                .await
                .unwrap();
        });

        let mut master = TcpTransport::connect(TcpMasterConfig {
            address,
            ..TcpMasterConfig::default()
        })
        .await
        .unwrap();

        let err = master.send_receive(1, &[0x03, 0x00, 0x00, 0x00, 0x01]).await.unwrap_err();
        assert_eq!(err, ModbusError::exception(0x83, 0x02));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_master_rejects_wrong_transaction_and_unit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut request = [0u8; 12];
            for (transaction_id, unit_id) in [(9, 1), (1, 4)] {
                let (mut socket, _) = listener.accept().await.unwrap();
                socket.read_exact(&mut request).await.unwrap();
                socket
                    .write_all(&encode_adu(transaction_id, unit_id, &[0x06, 0x00, 0x01, 0x00, 0x02]))
                    .await
                    .unwrap();
            }
        });

        let mut master = TcpTransport::connect(TcpMasterConfig {
            address,
            ..TcpMasterConfig::default()
        })
        .await
        .unwrap();

        let request = [0x06, 0x00, 0x01, 0x00, 0x02];
        assert_eq!(
            master.send_receive(1, &request).await.unwrap_err(),
            ModbusError::transaction_mismatch(0, 9)
        );
        assert!(!master.is_connected());

        // reconnects for the next request
        assert_eq!(
            master.send_receive(1, &request).await.unwrap_err(),
            ModbusError::unexpected_unit(1, 4)
        );
        assert!(!master.is_connected());
        assert_eq!(master.get_stats().errors, 2);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_exception_response_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            for transaction_id in 0..2 {
                socket.read_exact(&mut request).await.unwrap();
                socket
                    .write_all(&encode_adu(transaction_id, 1, &[0x83, 0x02]))
                    .await
                    .unwrap();
            }
        });

        let mut master = TcpTransport::connect(TcpMasterConfig {
            address,
            ..TcpMasterConfig::default()
        })
        .await
        .unwrap();

        for _ in 0..2 {
            let err = master.send_receive(1, &[0x03, 0x01, 0xF4, 0x00, 0x01]).await.unwrap_err();
            assert_eq!(err, ModbusError::exception(0x83, 0x02));
            assert!(master.is_connected());
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_id_wraps() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        // echo every request back under its own transaction id
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut request = [0u8; 12];
            for _ in 0..2 {
                socket.read_exact(&mut request).await.unwrap();
                let header = MbapHeader::parse(&request).unwrap();
                seen.push(header.transaction_id);
                socket
                    .write_all(&encode_adu(header.transaction_id, header.unit_id, &request[7..]))
                    .await
                    .unwrap();
            }
            seen
        });

        let mut master = TcpTransport::connect(TcpMasterConfig {
            address,
            ..TcpMasterConfig::default()
        })
        .await
        .unwrap();
        master.transaction_id = u16::MAX;

        let request = [0x06, 0x00, 0x5D, 0x00, 0x19];
        assert_eq!(master.send_receive(1, &request).await.unwrap(), request.to_vec());
        assert_eq!(master.next_transaction_id(), 0);
        assert_eq!(master.send_receive(1, &request).await.unwrap(), request.to_vec());
        assert_eq!(master.next_transaction_id(), 1);

        assert_eq!(server.await.unwrap(), vec![u16::MAX, 0]);
    }

    #[tokio::test]
    async fn test_oversized_pdu_rejected_before_sending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let mut master = TcpTransport::connect(TcpMasterConfig {
            address,
            ..TcpMasterConfig::default()
        })
        .await
        .unwrap();

        let pdu = vec![0x10; MAX_PDU_SIZE + 1];
        let err = master.send_receive(1, &pdu).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
        assert_eq!(master.next_transaction_id(), 0);
        assert_eq!(master.get_stats().requests_sent, 0);
        assert!(master.is_connected());
    }

    #[tokio::test]
    async fn test_master_timeout_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(socket);
        });

        let mut master = TcpTransport::connect(TcpMasterConfig {
            address,
            timeout: Duration::from_millis(50),
            packet_logging: false,
        })
        .await
        .unwrap();

        let err = master.send_receive(1, &[0x03, 0x00, 0x00, 0x00, 0x01]).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert!(!master.is_connected());
        assert_eq!(master.get_stats().timeouts, 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_slave_ignores_foreign_units_and_drops_bad_protocol() {
        let mut slave = TcpSlaveTransport::bind(TcpSlaveConfig {
            unit_ids: Some(vec![1]),
            ..slave_config()
        })
        .await
        .unwrap();
        let address = slave.local_addr().unwrap();

        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(&encode_adu(3, 2, &[0x03, 0x00, 0x00, 0x00, 0x01])).await.unwrap();

        assert_eq!(slave.get_request(Duration::from_secs(1)).await.unwrap(), None);
        assert!(slave.peer_addr().is_some());
        assert_eq!(slave.get_stats().frames_dropped, 1);

        let mut bad = encode_adu(4, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        bad[3] = 0x01;
        client.write_all(&bad).await.unwrap();

        assert_eq!(slave.get_request(Duration::from_secs(1)).await.unwrap(), None);
        assert!(slave.peer_addr().is_none());
    }

    #[tokio::test]
    async fn test_slave_reassembles_split_frame() {
        let mut slave = TcpSlaveTransport::bind(TcpSlaveConfig {
            client_read_timeout: Duration::from_millis(100),
            ..slave_config()
        })
        .await
        .unwrap();
        let mut client = TcpStream::connect(slave.local_addr().unwrap()).await.unwrap();

        let frame = encode_adu(0x1234, 1, &[0x01, 0x00, 0x13, 0x00, 0x25]);
        client.write_all(&frame[..4]).await.unwrap();
        assert_eq!(slave.get_request(Duration::from_secs(1)).await.unwrap(), None);
        assert!(slave.peer_addr().is_some());

        client.write_all(&frame[4..]).await.unwrap();
        let request = slave.get_request(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(request.header.transaction_id, Some(0x1234));
        assert_eq!(request.pdu, vec![0x01, 0x00, 0x13, 0x00, 0x25]);
    }

    #[tokio::test]
    async fn test_new_client_replaces_previous_one() {
        let mut slave = TcpSlaveTransport::bind(TcpSlaveConfig {
            client_read_timeout: Duration::from_millis(50),
            ..slave_config()
        })
        .await
        .unwrap();
        let address = slave.local_addr().unwrap();

        let mut first = TcpStream::connect(address).await.unwrap();
        assert_eq!(slave.get_request(Duration::from_secs(1)).await.unwrap(), None);
        assert_eq!(slave.peer_addr(), Some(first.local_addr().unwrap()));

        let mut second = TcpStream::connect(address).await.unwrap();
        second.write_all(&encode_adu(7, 1, &[0x03, 0x00, 0x5D, 0x00, 0x01])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let request = slave.get_request(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(request.header.transaction_id, Some(7));
        assert_eq!(slave.peer_addr(), Some(second.local_addr().unwrap()));

        // the replaced connection is closed
        let mut buffer = [0u8; 8];
        let read = timeout(Duration::from_secs(1), first.read(&mut buffer)).await.unwrap();
        assert_eq!(read.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_slave_times_out_without_client() {
        let mut slave = TcpSlaveTransport::bind(slave_config()).await.unwrap();
        let request = slave.get_request(Duration::from_millis(20)).await.unwrap();
        assert!(request.is_none());

        slave.unbind();
        assert!(!slave.is_bound());
        assert!(slave.get_request(Duration::from_millis(20)).await.is_err());
    }
}
