//! Request parser and validator.
//!
//! Turns an address- and CRC-stripped (or MBAP-stripped) PDU into a typed,
//! range-checked [`Request`]. Every rejection is a [`ProtocolException`], so
//! the caller can always answer with a well-formed exception frame.

use crate::error::ProtocolException;
use crate::protocol::{data_utils, FunctionCode, ModbusFunction, SlaveId, COIL_OFF, COIL_ON};

/// A decoded, validated request
///
/// Only constructed through [`Request::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    unit_address: SlaveId,
    function_code: FunctionCode,
    register_address: u16,
    quantity: Option<u16>,
    data: Vec<u8>,
}

fn read_u16(pdu: &[u8], offset: usize) -> Option<u16> {
    pdu.get(offset..offset + 2)
        .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
}

impl Request {
    /// Parse a request PDU addressed to `unit_address`
    ///
    /// Unknown function codes are accepted without interpretation; the
    /// dispatcher answers them with Illegal Function.
    ///
    /// ```rust
    /// use modbus2chain::{ExceptionCode, Request};
    ///
    /// let request = Request::parse(1, &[0x03, 0x00, 0x5D, 0x00, 0x01]).unwrap();
    /// assert_eq!(request.register_address(), 93);
    /// assert_eq!(request.quantity(), Some(1));
    ///
    /// let rejected = Request::parse(1, &[0x03, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
    /// assert_eq!(rejected.code, ExceptionCode::IllegalDataValue);
    /// ```
    pub fn parse(unit_address: SlaveId, pdu: &[u8]) -> Result<Self, ProtocolException> {
        let code = *pdu
            .first()
            .ok_or_else(|| ProtocolException::illegal_function(0))?;

        let function = match FunctionCode::from(code) {
            FunctionCode::Supported(function) => function,
            FunctionCode::Unsupported(code) => {
                return Ok(Self {
                    unit_address,
                    function_code: FunctionCode::Unsupported(code),
                    register_address: read_u16(pdu, 1).unwrap_or(0),
                    quantity: None,
                    data: pdu[1..].to_vec(),
                });
            }
        };

        let malformed = || ProtocolException::illegal_data_value(code);
        let register_address = read_u16(pdu, 1).ok_or_else(malformed)?;

        let (quantity, data) = match function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters => {
                let quantity = read_u16(pdu, 3).ok_or_else(malformed)?;
                if !function.accepts_quantity(quantity) {
                    return Err(malformed());
                }
                (Some(quantity), Vec::new())
            }
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                let value = read_u16(pdu, 3).ok_or_else(malformed)?;
                if function == ModbusFunction::WriteSingleCoil && value != COIL_ON && value != COIL_OFF {
                    return Err(malformed());
                }
                (None, pdu[3..5].to_vec())
            }
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                let quantity = read_u16(pdu, 3).ok_or_else(malformed)?;
                let byte_count = *pdu.get(5).ok_or_else(malformed)? as usize;
                if !function.accepts_quantity(quantity) {
                    return Err(malformed());
                }

                let payload = &pdu[6..];
                let expected = match function {
                    ModbusFunction::WriteMultipleCoils => data_utils::packed_len(quantity as usize),
                    _ => quantity as usize * 2,
                };
                if byte_count != payload.len() || byte_count != expected {
                    return Err(malformed());
                }
                (Some(quantity), payload.to_vec())
            }
        };

        Ok(Self {
            unit_address,
            function_code: FunctionCode::Supported(function),
            register_address,
            quantity,
            data,
        })
    }

    pub fn unit_address(&self) -> SlaveId {
        self.unit_address
    }

    pub fn function_code(&self) -> FunctionCode {
        self.function_code
    }

    /// Supported function, `None` for codes this implementation does not know
    pub fn function(&self) -> Option<ModbusFunction> {
        self.function_code.function()
    }

    pub fn register_address(&self) -> u16 {
        self.register_address
    }

    /// Quantity for reads and multi writes, `None` for single writes
    pub fn quantity(&self) -> Option<u16> {
        self.quantity
    }

    /// Raw payload: the 2-byte value of a single write or the packed
    /// values of a multi write
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of registers the request touches
    pub fn register_count(&self) -> u16 {
        self.quantity.unwrap_or(1)
    }

    /// Raw 16-bit value of a single write
    pub fn single_value(&self) -> Option<u16> {
        match self.function()? {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => read_u16(&self.data, 0),
            _ => None,
        }
    }

    /// Coil values carried by a coil write
    pub fn coil_values(&self) -> Vec<bool> {
        match self.function() {
            Some(ModbusFunction::WriteSingleCoil) => vec![self.single_value() == Some(COIL_ON)],
            Some(ModbusFunction::WriteMultipleCoils) => {
                data_utils::unpack_bits(&self.data, self.register_count() as usize)
            }
            _ => Vec::new(),
        }
    }

    /// Register values carried by a register write
    pub fn register_values(&self) -> Vec<u16> {
        match self.function() {
            Some(ModbusFunction::WriteSingleRegister) => self.single_value().into_iter().collect(),
            Some(ModbusFunction::WriteMultipleRegisters) => {
                data_utils::bytes_to_registers(&self.data).unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }
}
