//! Modbus RTU transport: `address | PDU | CRC16 (LE)` over a serial line.
//!
//! Frames are delimited by silence. The inter-frame delay is derived from
//! the line settings, see [`RtuConfig::inter_frame_delay`]. The transport
//! is generic over the byte stream so anything implementing tokio's
//! `AsyncRead + AsyncWrite` can stand in for the serial port.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_serial::SerialStream;

use crate::config::RtuConfig;
use crate::crc16;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{SlaveId, EXCEPTION_BIT};
use crate::transport::{
    log_packet, FrameHeader, MasterTransport, RequestFrame, SlaveTransport, TransportStats,
};

/// Largest RTU frame: address, 253 byte PDU, CRC
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Shortest request frame a slave accepts
pub const MIN_REQUEST_FRAME_SIZE: usize = 8;

/// Settling time between asserting the driver and the first byte
const DRIVER_SETTLE_TIME: Duration = Duration::from_micros(200);

/// Transmit-enable line of a half-duplex (RS-485) driver
pub trait DirectionPin: Send {
    fn set_transmit(&mut self, transmit: bool) -> io::Result<()>;
}

impl<F> DirectionPin for F
where
    F: FnMut(bool) -> io::Result<()> + Send,
{
    fn set_transmit(&mut self, transmit: bool) -> io::Result<()> {
        self(transmit)
    }
}

/// Build an RTU frame: unit address, PDU, CRC
pub fn encode_frame(unit_id: SlaveId, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    crc16::append_crc(&mut frame);
    frame
}

/// Whether `frame` already holds a complete response
fn response_complete(frame: &[u8]) -> bool {
    match frame {
        [_, function, ..] if function & EXCEPTION_BIT != 0 => frame.len() >= 5,
        [_, 0x01..=0x04, byte_count, ..] => frame.len() >= 3 + *byte_count as usize + 2,
        _ => frame.len() >= 8,
    }
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

/// Modbus RTU transport for either role
pub struct RtuTransport<S = SerialStream> {
    port: Option<S>,
    config: RtuConfig,
    char_time: Duration,
    inter_frame_delay: Duration,
    direction_pin: Option<Box<dyn DirectionPin>>,
    unit_address: Option<SlaveId>,
    stats: TransportStats,
}

impl RtuTransport<SerialStream> {
    /// Open the serial port named in `config`
    pub fn open(config: RtuConfig) -> ModbusResult<Self> {
        config.validate()?;
        let builder = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(data_bits(config.data_bits))
            .stop_bits(stop_bits(config.stop_bits))
            .parity(config.parity.into());

        let port = SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!("Failed to open serial port {}: {}", config.port, e))
        })?;
        info!("opened {} at {} baud", config.port, config.baud_rate);

        Self::from_stream(port, config)
    }
}

impl<S> RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Use an already open stream with the timing of `config`
    pub fn from_stream(stream: S, config: RtuConfig) -> ModbusResult<Self> {
        config.validate()?;
        let char_time = config.char_time();
        let inter_frame_delay = config.inter_frame_delay();
        debug!(
            "RTU timing: char {} us, inter-frame {} us",
            char_time.as_micros(),
            inter_frame_delay.as_micros()
        );

        Ok(Self {
            port: Some(stream),
            config,
            char_time,
            inter_frame_delay,
            direction_pin: None,
            unit_address: None,
            stats: TransportStats::default(),
        })
    }

    /// Drive `pin` high while transmitting
    pub fn with_direction_pin<P: DirectionPin + 'static>(mut self, pin: P) -> Self {
        self.direction_pin = Some(Box::new(pin));
        self
    }

    /// Only accept requests addressed to `unit_id` (slave role)
    pub fn with_unit_address(mut self, unit_id: SlaveId) -> Self {
        self.unit_address = Some(unit_id);
        self
    }

    pub fn unit_address(&self) -> Option<SlaveId> {
        self.unit_address
    }

    pub fn char_time(&self) -> Duration {
        self.char_time
    }

    pub fn inter_frame_delay(&self) -> Duration {
        self.inter_frame_delay
    }

    /// Default wait for the first byte of a request
    pub fn read_timeout(&self) -> Duration {
        self.config
            .read_timeout
            .unwrap_or(self.inter_frame_delay * 2)
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.config.packet_logging = enabled;
    }

    /// Counters for both roles
    pub fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }

    fn port_mut(&mut self) -> ModbusResult<&mut S> {
        self.port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Serial port not open"))
    }

    fn set_transmit(&mut self, transmit: bool) -> ModbusResult<()> {
        if let Some(pin) = self.direction_pin.as_mut() {
            pin.set_transmit(transmit)?;
        }
        Ok(())
    }

    async fn send_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        self.set_transmit(true)?;
        sleep(DRIVER_SETTLE_TIME).await;

        let port = self.port_mut()?;
        let written = async {
            port.write_all(frame).await?;
            port.flush().await
        }
        .await;

        // let the last character leave the shift register before releasing the line
        sleep(self.char_time).await;
        self.set_transmit(false)?;

        if let Err(e) = written {
            self.stats.errors += 1;
            return Err(e.into());
        }
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    /// Throw away whatever is already waiting in the receive buffer
    async fn discard_input(&mut self) -> ModbusResult<()> {
        let mut chunk = [0u8; MAX_RTU_FRAME_SIZE];
        let port = self.port_mut()?;
        let mut discarded = 0;
        while let Ok(read) = timeout(Duration::ZERO, port.read(&mut chunk)).await {
            match read? {
                0 => break,
                n => discarded += n,
            }
        }
        if discarded > 0 {
            debug!("discarded {} stale bytes", discarded);
        }
        Ok(())
    }

    async fn read_response(&mut self) -> ModbusResult<Vec<u8>> {
        let delay = self.inter_frame_delay;
        let polls = self.config.max_poll_iterations;
        let mut chunk = [0u8; MAX_RTU_FRAME_SIZE];
        let mut response = Vec::new();

        let port = self.port_mut()?;
        for _ in 0..polls {
            match timeout(delay, port.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(ModbusError::connection("Serial stream closed")),
                Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {}
            }
            if response_complete(&response) {
                break;
            }
        }
        Ok(response)
    }

    /// Collect one frame: wait for the first byte until `deadline`, then
    /// read until the line stays silent for the inter-frame delay
    async fn read_request_frame(&mut self, deadline: Instant) -> ModbusResult<Option<Vec<u8>>> {
        let delay = self.inter_frame_delay;
        let mut chunk = [0u8; MAX_RTU_FRAME_SIZE];
        let port = self.port_mut()?;

        let first = match timeout_at(deadline, port.read(&mut chunk)).await {
            Err(_) => return Ok(None),
            Ok(Ok(0)) => return Err(ModbusError::connection("Serial stream closed")),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
        };
        let mut frame = chunk[..first].to_vec();

        // a line that never goes silent is cut into oversized frames
        while frame.len() <= MAX_RTU_FRAME_SIZE {
            match timeout(delay, port.read(&mut chunk)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => frame.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        Ok(Some(frame))
    }

    /// Validate a received request frame, `None` when it must be ignored
    fn accept_request(&mut self, frame: &[u8]) -> Option<RequestFrame> {
        if frame.len() < MIN_REQUEST_FRAME_SIZE || frame.len() > MAX_RTU_FRAME_SIZE {
            debug!("dropping {} byte frame", frame.len());
            return None;
        }

        let unit_id = frame[0];
        if let Some(address) = self.unit_address {
            if unit_id != address {
                debug!("ignoring frame for unit {}", unit_id);
                return None;
            }
        }

        if let Err(e) = crc16::check_crc(frame) {
            warn!("dropping request frame: {}", e);
            self.stats.errors += 1;
            return None;
        }

        Some(RequestFrame {
            header: FrameHeader {
                unit_id,
                transaction_id: None,
            },
            pdu: frame[1..frame.len() - crc16::CRC_LENGTH].to_vec(),
        })
    }
}

#[async_trait]
impl<S> MasterTransport for RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_receive(&mut self, unit_id: SlaveId, pdu: &[u8]) -> ModbusResult<Vec<u8>> {
        if pdu.is_empty() || pdu.len() > MAX_RTU_FRAME_SIZE - 3 {
            return Err(ModbusError::frame(format!(
                "PDU of {} bytes does not fit an RTU frame",
                pdu.len()
            )));
        }
        self.discard_input().await?;

        let frame = encode_frame(unit_id, pdu);
        if self.config.packet_logging {
            log_packet("send", &frame, "RTU", Some(unit_id));
        }
        self.send_frame(&frame).await?;
        self.stats.requests_sent += 1;

        let response = self.read_response().await.map_err(|e| {
            self.stats.errors += 1;
            e
        })?;

        if response.is_empty() {
            self.stats.timeouts += 1;
            self.stats.errors += 1;
            let waited = self.inter_frame_delay * self.config.max_poll_iterations;
            return Err(ModbusError::timeout("read response", waited.as_millis() as u64));
        }

        self.stats.bytes_received += response.len() as u64;
        if self.config.packet_logging {
            log_packet("receive", &response, "RTU", Some(unit_id));
        }

        let validated = crc16::check_crc(&response)
            .and_then(|_| {
                if response[0] != unit_id {
                    Err(ModbusError::unexpected_unit(unit_id, response[0]))
                } else {
                    Ok(())
                }
            })
            .and_then(|_| {
                let pdu = &response[1..response.len() - crc16::CRC_LENGTH];
                crate::pdu::check_exception(pdu).map(|_| pdu.to_vec())
            });

        match validated {
            Ok(pdu) => {
                self.stats.responses_received += 1;
                Ok(pdu)
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if self.port.take().is_some() {
            debug!("closed {}", self.config.port);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[async_trait]
impl<S> SlaveTransport for RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn get_request(&mut self, wait: Duration) -> ModbusResult<Option<RequestFrame>> {
        let deadline = Instant::now() + wait;

        while Instant::now() < deadline {
            let frame = match self.read_request_frame(deadline).await? {
                Some(frame) => frame,
                None => break,
            };
            self.stats.bytes_received += frame.len() as u64;
            if self.config.packet_logging {
                log_packet("receive", &frame, "RTU", frame.first().copied());
            }

            match self.accept_request(&frame) {
                Some(request) => {
                    self.stats.requests_received += 1;
                    return Ok(Some(request));
                }
                None => self.stats.frames_dropped += 1,
            }
        }
        Ok(None)
    }

    async fn send_response(&mut self, header: FrameHeader, pdu: &[u8]) -> ModbusResult<()> {
        let frame = encode_frame(header.unit_id, pdu);
        if self.config.packet_logging {
            log_packet("send", &frame, "RTU", Some(header.unit_id));
        }
        self.send_frame(&frame).await?;
        self.stats.responses_sent += 1;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, DuplexStream};

    fn fast_config() -> RtuConfig {
        RtuConfig {
            baud_rate: 115200,
            max_poll_iterations: 20,
            ..RtuConfig::default()
        }
    }

    fn transport(stream: DuplexStream) -> RtuTransport<DuplexStream> {
        RtuTransport::from_stream(stream, fast_config()).unwrap()
    }

    #[test]
    fn test_encode_frame() {
        assert_eq!(
            encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
        );
    }

    #[test]
    fn test_response_complete() {
        assert!(!response_complete(&[]));
        assert!(!response_complete(&[0x01, 0x83, 0x02, 0xC0]));
        assert!(response_complete(&[0x01, 0x83, 0x02, 0xC0, 0xF1]));
        assert!(!response_complete(&[0x01, 0x03, 0x02, 0x00, 0x14, 0xB8]));
        assert!(response_complete(&[0x01, 0x03, 0x02, 0x00, 0x14, 0xB8, 0x4B]));
        assert!(!response_complete(&[0x01, 0x06, 0x00, 0x5D, 0x00, 0x19, 0x00]));
        assert!(response_complete(&[0x01, 0x06, 0x00, 0x5D, 0x00, 0x19, 0x00, 0x00]));
    }

    #[test]
    fn test_default_timing() {
        let (a, _b) = duplex(64);
        let rtu = RtuTransport::from_stream(a, RtuConfig::default()).unwrap();
        assert_eq!(rtu.char_time(), Duration::from_micros(1145));
        assert_eq!(rtu.inter_frame_delay(), Duration::from_micros(4007));
        assert_eq!(rtu.read_timeout(), Duration::from_micros(8014));
    }

    #[tokio::test]
    async fn test_master_reads_register() {
        let (a, mut b) = duplex(256);
        let mut master = transport(a);

        let peer = tokio::spawn(async move {
            let mut request = [0u8; 8];
            b.read_exact(&mut request).await.unwrap();
            assert_eq!(request.to_vec(), encode_frame(1, &[0x03, 0x00, 0x5D, 0x00, 0x01]));
            b.write_all(&encode_frame(1, &[0x03, 0x02, 0x00, 0x14])).await.unwrap();
            b
        });

        let response = master.send_receive(1, &[0x03, 0x00, 0x5D, 0x00, 0x01]).await.unwrap();
        assert_eq!(response, vec![0x03, 0x02, 0x00, 0x14]);

        let stats = master.get_stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_master_validates_response_frame() {
        let (a, mut b) = duplex(256);
        let mut master = transport(a);

        let peer = tokio::spawn(async move {
            let mut request = [0u8; 8];

            b.read_exact(&mut request).await.unwrap();
            b.write_all(&encode_frame(1, &[0x83, 0x02])).await.unwrap();

            b.read_exact(&mut request).await.unwrap();
            b.write_all(&encode_frame(2, &[0x03, 0x02, 0x00, 0x14])).await.unwrap();

            b.read_exact(&mut request).await.unwrap();
            let mut corrupted = encode_frame(1, &[0x03, 0x02, 0x00, 0x14]);
            corrupted[4] ^= 0x01;
            b.write_all(&corrupted).await.unwrap();
            b
        });

        let request = [0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(
            master.send_receive(1, &request).await.unwrap_err(),
            ModbusError::exception(0x83, 0x02)
        );
        assert_eq!(
            master.send_receive(1, &request).await.unwrap_err(),
            ModbusError::unexpected_unit(1, 2)
        );
        assert!(matches!(
            master.send_receive(1, &request).await.unwrap_err(),
            ModbusError::CrcMismatch { .. }
        ));
        assert_eq!(master.get_stats().errors, 3);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_master_times_out_on_silent_line() {
        let (a, mut b) = duplex(256);
        let mut master = transport(a);

        let err = master.send_receive(1, &[0x03, 0x00, 0x00, 0x00, 0x01]).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert_eq!(master.get_stats().timeouts, 1);

        let mut request = [0u8; 8];
        b.read_exact(&mut request).await.unwrap();
    }

    #[tokio::test]
    async fn test_master_discards_stale_input() {
        let (a, mut b) = duplex(256);
        let mut master = transport(a);
        b.write_all(&[0xAA, 0xBB, 0xCC]).await.unwrap();

        let peer = tokio::spawn(async move {
            let mut request = [0u8; 8];
            b.read_exact(&mut request).await.unwrap();
            b.write_all(&encode_frame(1, &[0x06, 0x00, 0x5D, 0x00, 0x19])).await.unwrap();
            b
        });

        let response = master.send_receive(1, &[0x06, 0x00, 0x5D, 0x00, 0x19]).await.unwrap();
        assert_eq!(response, vec![0x06, 0x00, 0x5D, 0x00, 0x19]);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_direction_pin_toggles_around_transmit() {
        let (a, mut b) = duplex(256);
        let levels = Arc::new(Mutex::new(Vec::new()));
        let sink = levels.clone();

        let mut slave = transport(a).with_direction_pin(move |transmit: bool| -> io::Result<()> {
            sink.lock().unwrap().push(transmit);
            Ok(())
        });

        let header = FrameHeader {
            unit_id: 1,
            transaction_id: None,
        };
        slave.send_response(header, &[0x06, 0x00, 0x01, 0x00, 0x02]).await.unwrap();

        let mut frame = [0u8; 8];
        b.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame.to_vec(), encode_frame(1, &[0x06, 0x00, 0x01, 0x00, 0x02]));
        assert_eq!(*levels.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_slave_filters_frames() {
        let (a, mut b) = duplex(256);
        let mut slave = transport(a).with_unit_address(1);
        let wait = Duration::from_millis(50);

        // other unit
        b.write_all(&encode_frame(2, &[0x03, 0x00, 0x00, 0x00, 0x01])).await.unwrap();
        assert_eq!(slave.get_request(wait).await.unwrap(), None);

        // corrupted
        let mut corrupted = encode_frame(1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        corrupted[3] = 0x7F;
        b.write_all(&corrupted).await.unwrap();
        assert_eq!(slave.get_request(wait).await.unwrap(), None);

        // too short
        b.write_all(&[0x01, 0x03, 0x00]).await.unwrap();
        assert_eq!(slave.get_request(wait).await.unwrap(), None);
        assert_eq!(slave.get_stats().frames_dropped, 3);

        b.write_all(&encode_frame(1, &[0x03, 0x00, 0x5D, 0x00, 0x01])).await.unwrap();
        let request = slave.get_request(wait).await.unwrap().unwrap();
        assert_eq!(request.header, FrameHeader { unit_id: 1, transaction_id: None });
        assert_eq!(request.pdu, vec![0x03, 0x00, 0x5D, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_scripted_master_exchange() {
        let request = encode_frame(0x11, &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(&request[6..], &[0x76, 0x87]);

        let response = encode_frame(0x11, &[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]);
        let line = tokio_test::io::Builder::new().write(&request).read(&response).build();

        let mut master = RtuTransport::from_stream(line, fast_config()).unwrap();
        let pdu = master.send_receive(0x11, &[0x03, 0x00, 0x6B, 0x00, 0x03]).await.unwrap();
        assert_eq!(pdu, vec![0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]);
    }

    #[tokio::test]
    async fn test_scripted_slave_exchange() {
        let request = encode_frame(1, &[0x06, 0x00, 0x5D, 0x00, 0x19]);
        let line = tokio_test::io::Builder::new().read(&request).write(&request).build();

        let mut slave = RtuTransport::from_stream(line, fast_config())
            .unwrap()
            .with_unit_address(1);
        let frame = slave.get_request(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(frame.pdu, vec![0x06, 0x00, 0x5D, 0x00, 0x19]);
        slave.send_response(frame.header, &frame.pdu).await.unwrap();
    }

    #[tokio::test]
    async fn test_master_rejects_oversized_pdu() {
        let (a, _b) = duplex(512);
        let mut master = transport(a);

        let err = master.send_receive(1, &[0x10; 254]).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
        assert_eq!(master.get_stats().requests_sent, 0);
        assert_eq!(master.get_stats().bytes_sent, 0);
    }

    #[tokio::test]
    async fn test_stats_shared_by_both_roles() {
        let (a, mut b) = duplex(256);
        let mut rtu = transport(a).with_unit_address(1);

        b.write_all(&encode_frame(2, &[0x03, 0x00, 0x00, 0x00, 0x01])).await.unwrap();
        assert_eq!(rtu.get_request(Duration::from_millis(20)).await.unwrap(), None);

        let stats = rtu.get_stats();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats, MasterTransport::get_stats(&rtu));
        assert_eq!(stats, SlaveTransport::get_stats(&rtu));
    }

    #[tokio::test]
    async fn test_slave_returns_at_deadline_on_busy_line() {
        let (a, mut b) = duplex(64);
        let mut slave = transport(a).with_unit_address(1);

        // back-to-back traffic for another unit, the line never goes quiet
        let chatter = tokio::spawn(async move {
            let frame = encode_frame(2, &[0x03, 0x00, 0x00, 0x00, 0x01]);
            while b.write_all(&frame).await.is_ok() {}
        });

        let request = timeout(Duration::from_secs(2), slave.get_request(Duration::from_millis(30)))
            .await
            .expect("get_request overran its deadline")
            .unwrap();
        assert_eq!(request, None);
        assert!(slave.get_stats().frames_dropped >= 1);

        chatter.abort();
    }

    #[tokio::test]
    async fn test_slave_times_out_quietly() {
        let (a, _b) = duplex(256);
        let mut slave = transport(a).with_unit_address(1);
        assert_eq!(slave.get_request(Duration::from_millis(10)).await.unwrap(), None);
    }
}
