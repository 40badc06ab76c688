/// Modbus protocol definitions and data structures
///
/// This module contains the function and exception code enumerations, the
/// per-function quantity limits and the byte-level data conversion helpers
/// shared by the codec, the parser and the register store.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier
pub type SlaveId = u8;

/// Maximum coils / discrete inputs per read request
pub const MAX_READ_BITS: u16 = 2000;

/// Maximum holding / input registers per read request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils per write-multiple request
pub const MAX_WRITE_COILS: u16 = 1968;

/// Maximum registers per write-multiple request
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Wire value of a coil switched on
pub const COIL_ON: u16 = 0xFF00;

/// Wire value of a coil switched off
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the function code of an exception response
pub const EXCEPTION_BIT: u8 = 0x80;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    pub fn name(self) -> &'static str {
        match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }

    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(self,
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }

    /// Largest quantity a request for this function may carry
    pub fn max_quantity(self) -> u16 {
        match self {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => MAX_READ_BITS,
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => MAX_READ_REGISTERS,
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 1,
            ModbusFunction::WriteMultipleCoils => MAX_WRITE_COILS,
            ModbusFunction::WriteMultipleRegisters => MAX_WRITE_REGISTERS,
        }
    }

    /// Whether a quantity is inside `[1, max_quantity]`
    pub fn accepts_quantity(self, quantity: u16) -> bool {
        (1..=self.max_quantity()).contains(&quantity)
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Function code as found on the wire
///
/// Unknown codes are kept verbatim so the dispatcher can answer them with
/// an Illegal Function exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    Supported(ModbusFunction),
    Unsupported(u8),
}

impl FunctionCode {
    pub fn to_u8(self) -> u8 {
        match self {
            FunctionCode::Supported(function) => function.to_u8(),
            FunctionCode::Unsupported(code) => code,
        }
    }

    pub fn function(self) -> Option<ModbusFunction> {
        match self {
            FunctionCode::Supported(function) => Some(function),
            FunctionCode::Unsupported(_) => None,
        }
    }
}

impl From<u8> for FunctionCode {
    fn from(code: u8) -> Self {
        ModbusFunction::from_u8(code)
            .map(FunctionCode::Supported)
            .unwrap_or(FunctionCode::Unsupported(code))
    }
}

impl From<ModbusFunction> for FunctionCode {
    fn from(function: ModbusFunction) -> Self {
        FunctionCode::Supported(function)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionCode::Supported(function) => write!(f, "{}", function),
            FunctionCode::Unsupported(code) => write!(f, "Unsupported (0x{:02X})", code),
        }
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Convert from u8 to ExceptionCode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::ServerDeviceBusy),
            0x08 => Some(ExceptionCode::MemoryParityError),
            0x0A => Some(ExceptionCode::GatewayPathUnavailable),
            0x0B => Some(ExceptionCode::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Short name
    pub fn name(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::ServerDeviceBusy => "Server Device Busy",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => "Gateway Target Device Failed to Respond",
        }
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "The function code received in the query is not an allowable action for the server",
            ExceptionCode::IllegalDataAddress => "The data address received in the query is not an allowable address for the server",
            ExceptionCode::IllegalDataValue => "A value contained in the query data field is not an allowable value for server",
            ExceptionCode::ServerDeviceFailure => "An unrecoverable error occurred while the server was attempting to perform the requested action",
            ExceptionCode::Acknowledge => "The server has accepted the request and is processing it, but a long duration of time will be required to do so",
            ExceptionCode::ServerDeviceBusy => "The server is engaged in processing a long-duration program command",
            ExceptionCode::MemoryParityError => "The server attempted to read record file, but detected a parity error in the memory",
            ExceptionCode::GatewayPathUnavailable => "Gateway was unable to allocate an internal communication path",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => "No response was obtained from the target device",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception 0x{:02X} ({})", self.to_u8(), self.name())
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::invalid_data("Byte array length must be even"));
        }

        Ok(bytes
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Reinterpret unsigned register values as two's complement
    pub fn registers_to_signed(registers: &[u16]) -> Vec<i16> {
        registers.iter().map(|&value| value as i16).collect()
    }

    /// Reinterpret signed values as raw register values
    pub fn signed_to_registers(values: &[i16]) -> Vec<u16> {
        values.iter().map(|&value| value as u16).collect()
    }

    /// Pack boolean values into bytes, LSB first within each byte
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];

        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }

        bytes
    }

    /// Unpack bytes into boolean values, LSB first within each byte
    ///
    /// Missing trailing bytes read as `false`.
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        (0..bit_count)
            .map(|i| {
                bytes
                    .get(i / 8)
                    .map(|byte| byte & (1 << (i % 8)) != 0)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Number of bytes needed to carry `bit_count` packed bits
    pub fn packed_len(bit_count: usize) -> usize {
        (bit_count + 7) / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03).unwrap(), ModbusFunction::ReadHoldingRegisters);
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);

        assert!(ModbusFunction::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_function_code_keeps_unknown_values() {
        assert_eq!(FunctionCode::from(0x10), FunctionCode::Supported(ModbusFunction::WriteMultipleRegisters));
        assert_eq!(FunctionCode::from(0x2B), FunctionCode::Unsupported(0x2B));
        assert_eq!(FunctionCode::from(0x2B).to_u8(), 0x2B);
        assert_eq!(FunctionCode::from(0x2B).function(), None);
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(ExceptionCode::from_u8(0x02).unwrap(), ExceptionCode::IllegalDataAddress);
        assert_eq!(ExceptionCode::IllegalDataAddress.to_u8(), 0x02);
        assert_eq!(ExceptionCode::from_u8(0x0B), Some(ExceptionCode::GatewayTargetDeviceFailedToRespond));
        assert_eq!(ExceptionCode::from_u8(0x07), None);
    }

    #[test]
    fn test_quantity_limits() {
        assert!(ModbusFunction::ReadCoils.accepts_quantity(1));
        assert!(ModbusFunction::ReadCoils.accepts_quantity(2000));
        assert!(!ModbusFunction::ReadCoils.accepts_quantity(0));
        assert!(!ModbusFunction::ReadCoils.accepts_quantity(2001));
        assert!(ModbusFunction::ReadHoldingRegisters.accepts_quantity(125));
        assert!(!ModbusFunction::ReadHoldingRegisters.accepts_quantity(126));
        assert!(ModbusFunction::WriteMultipleCoils.accepts_quantity(1968));
        assert!(!ModbusFunction::WriteMultipleCoils.accepts_quantity(1969));
        assert!(!ModbusFunction::WriteMultipleRegisters.accepts_quantity(124));
    }

    #[test]
    fn test_data_utils() {
        let registers = vec![0x1234, 0x5678];
        let bytes = data_utils::registers_to_bytes(&registers);
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);

        let back_to_registers = data_utils::bytes_to_registers(&bytes).unwrap();
        assert_eq!(back_to_registers, registers);
        assert!(data_utils::bytes_to_registers(&[0x01]).is_err());

        assert_eq!(data_utils::registers_to_signed(&[0xFFFF, 0x0014]), vec![-1, 20]);
        assert_eq!(data_utils::signed_to_registers(&[-2, 25]), vec![0xFFFE, 25]);
    }

    #[test]
    fn test_bit_packing_is_lsb_first() {
        let bits = vec![true, false, true, true, false, false, false, false, true];
        let packed = data_utils::pack_bits(&bits);
        assert_eq!(packed, vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(data_utils::unpack_bits(&packed, bits.len()), bits);
    }

    #[test]
    fn test_bit_packing_roundtrip_lengths() {
        for len in [1usize, 7, 8, 9, 15, 16, 17, 1968, 2000] {
            let bits: Vec<bool> = (0..len).map(|i| i % 3 == 0 || i % 7 == 1).collect();
            let packed = data_utils::pack_bits(&bits);
            assert_eq!(packed.len(), data_utils::packed_len(len));
            assert_eq!(data_utils::unpack_bits(&packed, len), bits);
        }
    }
}
