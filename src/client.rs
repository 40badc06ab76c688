//! High-level Modbus master
//!
//! Modbus TCP and RTU share the same application layer (PDU) and differ
//! only in transport encapsulation:
//! - TCP: MBAP Header + PDU
//! - RTU: Slave ID + PDU + CRC
//!
//! [`ModbusMaster`] builds and decodes PDUs once and delegates framing to
//! any [`MasterTransport`].
//!
//! ```rust,no_run
//! use modbus2chain::{ModbusMaster, ModbusResult, TcpMasterConfig};
//!
//! # async fn example() -> ModbusResult<()> {
//! let config = TcpMasterConfig {
//!     address: "192.168.178.69:502".parse().unwrap(),
//!     ..TcpMasterConfig::default()
//! };
//! let mut master = ModbusMaster::connect_tcp(config).await?;
//!
//! let values = master.read_holding_registers(10, 93, 1).await?;
//! let acknowledged = master.write_single_register(10, 93, 44).await?;
//! master.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{RtuConfig, TcpMasterConfig};
use crate::error::ModbusResult;
use crate::logging::CallbackLogger;
use crate::pdu;
use crate::protocol::{data_utils, ModbusFunction, SlaveId, COIL_OFF, COIL_ON};
use crate::rtu::RtuTransport;
use crate::tcp::TcpTransport;
use crate::transport::{MasterTransport, TransportStats};

/// Modbus master over any transport
pub struct ModbusMaster<T: MasterTransport> {
    transport: T,
    logger: Option<CallbackLogger>,
}

impl ModbusMaster<TcpTransport> {
    /// Connect a TCP master session
    pub async fn connect_tcp(config: TcpMasterConfig) -> ModbusResult<Self> {
        Ok(Self::new(TcpTransport::connect(config).await?))
    }
}

impl ModbusMaster<RtuTransport> {
    /// Open an RTU master on a serial port
    pub fn open_rtu(config: RtuConfig) -> ModbusResult<Self> {
        Ok(Self::new(RtuTransport::open(config)?))
    }
}

impl<T: MasterTransport> ModbusMaster<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            logger: None,
        }
    }

    /// Master reporting every request and response to `logger`
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        Self {
            transport,
            logger: Some(logger),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    pub fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    /// Send a raw request PDU and return the response PDU
    pub async fn execute(&mut self, slave_id: SlaveId, request: &[u8]) -> ModbusResult<Vec<u8>> {
        if let Some(ref logger) = self.logger {
            logger.log_request(slave_id, request);
        }

        let result = self.transport.send_receive(slave_id, request).await;

        if let Some(ref logger) = self.logger {
            match &result {
                Ok(response) => logger.log_response(slave_id, response),
                Err(e) => logger.error(&format!("Modbus request to slave {} failed: {}", slave_id, e)),
            }
        }
        result
    }

    async fn read_bits(
        &mut self,
        slave_id: SlaveId,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        let request = pdu::read_request(function, address, quantity)?;
        let response = self.execute(slave_id, &request).await?;
        pdu::decode_bits_response(&response, function, quantity)
    }

    async fn read_words(
        &mut self,
        slave_id: SlaveId,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let request = pdu::read_request(function, address, quantity)?;
        let response = self.execute(slave_id, &request).await?;
        pdu::decode_registers_response(&response, function, quantity)
    }

    /// Read coils (function code 0x01)
    pub async fn read_coils(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadCoils, address, quantity).await
    }

    /// Read discrete inputs (function code 0x02)
    pub async fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadDiscreteInputs, address, quantity)
            .await
    }

    /// Read holding registers (function code 0x03)
    pub async fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_words(slave_id, ModbusFunction::ReadHoldingRegisters, address, quantity)
            .await
    }

    /// Read holding registers as two's complement values
    pub async fn read_holding_registers_signed(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<i16>> {
        let registers = self.read_holding_registers(slave_id, address, quantity).await?;
        Ok(data_utils::registers_to_signed(&registers))
    }

    /// Read input registers (function code 0x04)
    pub async fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_words(slave_id, ModbusFunction::ReadInputRegisters, address, quantity)
            .await
    }

    /// Read input registers as two's complement values
    pub async fn read_input_registers_signed(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<i16>> {
        let registers = self.read_input_registers(slave_id, address, quantity).await?;
        Ok(data_utils::registers_to_signed(&registers))
    }

    /// Write single coil (function code 0x05)
    ///
    /// Returns whether the slave echoed the request.
    pub async fn write_single_coil(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<bool> {
        let raw = if value { COIL_ON } else { COIL_OFF };
        let request = pdu::write_single_coil(address, raw)?;
        let response = self.execute(slave_id, &request).await?;
        Ok(pdu::validate_write_response(
            &response,
            ModbusFunction::WriteSingleCoil,
            address,
            raw,
        ))
    }

    /// Write single register (function code 0x06)
    pub async fn write_single_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> ModbusResult<bool> {
        let request = pdu::write_single_register(address, value);
        let response = self.execute(slave_id, &request).await?;
        Ok(pdu::validate_write_response(
            &response,
            ModbusFunction::WriteSingleRegister,
            address,
            value,
        ))
    }

    pub async fn write_single_register_signed(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: i16,
    ) -> ModbusResult<bool> {
        self.write_single_register(slave_id, address, value as u16).await
    }

    /// Write multiple coils (function code 0x0F)
    pub async fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<bool> {
        let request = pdu::write_multiple_coils(address, values)?;
        let response = self.execute(slave_id, &request).await?;
        Ok(pdu::validate_write_response(
            &response,
            ModbusFunction::WriteMultipleCoils,
            address,
            values.len() as u16,
        ))
    }

    /// Write multiple registers (function code 0x10)
    pub async fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<bool> {
        let request = pdu::write_multiple_registers(address, values)?;
        let response = self.execute(slave_id, &request).await?;
        Ok(pdu::validate_write_response(
            &response,
            ModbusFunction::WriteMultipleRegisters,
            address,
            values.len() as u16,
        ))
    }

    pub async fn write_multiple_registers_signed(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[i16],
    ) -> ModbusResult<bool> {
        let registers = data_utils::signed_to_registers(values);
        self.write_multiple_registers(slave_id, address, &registers).await
    }
}
