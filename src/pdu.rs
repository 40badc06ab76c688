//! PDU codec: pure encode/decode of Modbus Protocol Data Units.
//!
//! A PDU is the function code followed by its function-specific payload,
//! independent of the RTU or TCP framing around it. Request builders reject
//! out-of-range arguments with [`ModbusError::InvalidData`] before anything
//! touches the wire.

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{
    data_utils, ExceptionCode, ModbusFunction, COIL_OFF, COIL_ON, EXCEPTION_BIT,
};

fn check_quantity(function: ModbusFunction, quantity: usize) -> ModbusResult<u16> {
    match u16::try_from(quantity) {
        Ok(quantity) if function.accepts_quantity(quantity) => Ok(quantity),
        _ => Err(ModbusError::invalid_data(format!(
            "{}: quantity {} outside 1..={}",
            function,
            quantity,
            function.max_quantity()
        ))),
    }
}

/// Build a read request PDU (function codes 0x01-0x04)
///
/// ```rust
/// use modbus2chain::pdu;
/// use modbus2chain::ModbusFunction;
///
/// let request = pdu::read_request(ModbusFunction::ReadHoldingRegisters, 93, 1).unwrap();
/// assert_eq!(request, vec![0x03, 0x00, 0x5D, 0x00, 0x01]);
/// ```
pub fn read_request(function: ModbusFunction, start: u16, quantity: u16) -> ModbusResult<Vec<u8>> {
    if !function.is_read_function() {
        return Err(ModbusError::invalid_function(function.to_u8()));
    }
    let quantity = check_quantity(function, quantity as usize)?;

    let mut pdu = Vec::with_capacity(5);
    pdu.push(function.to_u8());
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    Ok(pdu)
}

pub fn read_coils(start: u16, quantity: u16) -> ModbusResult<Vec<u8>> {
    read_request(ModbusFunction::ReadCoils, start, quantity)
}

pub fn read_discrete_inputs(start: u16, quantity: u16) -> ModbusResult<Vec<u8>> {
    read_request(ModbusFunction::ReadDiscreteInputs, start, quantity)
}

pub fn read_holding_registers(start: u16, quantity: u16) -> ModbusResult<Vec<u8>> {
    read_request(ModbusFunction::ReadHoldingRegisters, start, quantity)
}

pub fn read_input_registers(start: u16, quantity: u16) -> ModbusResult<Vec<u8>> {
    read_request(ModbusFunction::ReadInputRegisters, start, quantity)
}

/// Build a write-single-coil request
///
/// `value` is the raw wire value and must be 0x0000 or 0xFF00.
pub fn write_single_coil(address: u16, value: u16) -> ModbusResult<Vec<u8>> {
    if value != COIL_ON && value != COIL_OFF {
        return Err(ModbusError::invalid_data(format!(
            "Illegal coil value 0x{:04X}, expected 0x0000 or 0xFF00",
            value
        )));
    }
    Ok(write_single(ModbusFunction::WriteSingleCoil, address, value))
}

/// Build a write-single-register request
///
/// Signed values are written by their two's complement bit pattern.
pub fn write_single_register(address: u16, value: u16) -> Vec<u8> {
    write_single(ModbusFunction::WriteSingleRegister, address, value)
}

fn write_single(function: ModbusFunction, address: u16, value: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(function.to_u8());
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&value.to_be_bytes());
    pdu
}

/// Build a write-multiple-coils request, bits packed LSB first
pub fn write_multiple_coils(start: u16, values: &[bool]) -> ModbusResult<Vec<u8>> {
    let quantity = check_quantity(ModbusFunction::WriteMultipleCoils, values.len())?;
    let payload = data_utils::pack_bits(values);
    Ok(write_multiple(ModbusFunction::WriteMultipleCoils, start, quantity, &payload))
}

/// Build a write-multiple-registers request, values big-endian
pub fn write_multiple_registers(start: u16, values: &[u16]) -> ModbusResult<Vec<u8>> {
    let quantity = check_quantity(ModbusFunction::WriteMultipleRegisters, values.len())?;
    let payload = data_utils::registers_to_bytes(values);
    Ok(write_multiple(ModbusFunction::WriteMultipleRegisters, start, quantity, &payload))
}

fn write_multiple(function: ModbusFunction, start: u16, quantity: u16, payload: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(6 + payload.len());
    pdu.push(function.to_u8());
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    // bounded by MAX_WRITE_COILS / MAX_WRITE_REGISTERS, always fits a byte
    pdu.push(payload.len() as u8);
    pdu.extend_from_slice(payload);
    pdu
}

/// Response to a bit read: function code, byte count, packed bits
pub fn read_bits_response(function: ModbusFunction, values: &[bool]) -> Vec<u8> {
    let packed = data_utils::pack_bits(values);
    let mut pdu = Vec::with_capacity(2 + packed.len());
    pdu.push(function.to_u8());
    pdu.push(packed.len() as u8);
    pdu.extend_from_slice(&packed);
    pdu
}

/// Response to a register read: function code, byte count, big-endian values
pub fn read_registers_response(function: ModbusFunction, values: &[u16]) -> Vec<u8> {
    let bytes = data_utils::registers_to_bytes(values);
    let mut pdu = Vec::with_capacity(2 + bytes.len());
    pdu.push(function.to_u8());
    pdu.push(bytes.len() as u8);
    pdu.extend_from_slice(&bytes);
    pdu
}

/// Echo acknowledgement of a single write (address and written value)
pub fn write_single_response(function: ModbusFunction, address: u16, value: u16) -> Vec<u8> {
    write_single(function, address, value)
}

/// Echo acknowledgement of a multi write (start address and quantity)
pub fn write_multiple_response(function: ModbusFunction, start: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(function.to_u8());
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu
}

/// Exception PDU: `function_code | 0x80` followed by the exception code
pub fn exception_response(function_code: u8, code: ExceptionCode) -> Vec<u8> {
    vec![function_code | EXCEPTION_BIT, code.to_u8()]
}

/// Raise the embedded exception if `response` carries the exception bit
pub fn check_exception(response: &[u8]) -> ModbusResult<()> {
    match response {
        [] => Err(ModbusError::frame("Empty response PDU")),
        [function, code, ..] if function & EXCEPTION_BIT != 0 => {
            Err(ModbusError::exception(*function, *code))
        }
        [function] if function & EXCEPTION_BIT != 0 => {
            Err(ModbusError::frame("Exception response without exception code"))
        }
        _ => Ok(()),
    }
}

fn check_function(response: &[u8], function: ModbusFunction) -> ModbusResult<()> {
    check_exception(response)?;
    if response[0] != function.to_u8() {
        return Err(ModbusError::protocol(format!(
            "Response function 0x{:02X} does not match request 0x{:02X}",
            response[0],
            function.to_u8()
        )));
    }
    Ok(())
}

fn counted_payload(response: &[u8], expected_bytes: usize) -> ModbusResult<&[u8]> {
    let byte_count = *response
        .get(1)
        .ok_or_else(|| ModbusError::frame("Response missing byte count"))? as usize;

    if byte_count != expected_bytes || response.len() != 2 + byte_count {
        return Err(ModbusError::frame(format!(
            "Expected {} data bytes, got byte count {} in {} byte PDU",
            expected_bytes,
            byte_count,
            response.len()
        )));
    }
    Ok(&response[2..])
}

/// Decode the response to a coil / discrete input read
pub fn decode_bits_response(
    response: &[u8],
    function: ModbusFunction,
    quantity: u16,
) -> ModbusResult<Vec<bool>> {
    check_function(response, function)?;
    let payload = counted_payload(response, data_utils::packed_len(quantity as usize))?;
    Ok(data_utils::unpack_bits(payload, quantity as usize))
}

/// Decode the response to a holding / input register read
pub fn decode_registers_response(
    response: &[u8],
    function: ModbusFunction,
    quantity: u16,
) -> ModbusResult<Vec<u16>> {
    check_function(response, function)?;
    let payload = counted_payload(response, quantity as usize * 2)?;
    data_utils::bytes_to_registers(payload)
}

fn normalize_coil(value: u16) -> u16 {
    if value != COIL_OFF {
        COIL_ON
    } else {
        COIL_OFF
    }
}

/// Check the echo returned for a write request
///
/// For single writes `value` is the written value, for multi writes it is
/// the quantity. Coil values are normalised first, so a requested `1`
/// matches an echoed `0xFF00`.
///
/// ```rust
/// use modbus2chain::pdu::validate_write_response;
/// use modbus2chain::ModbusFunction;
///
/// let echo = [0x05, 0x00, 0x10, 0xFF, 0x00];
/// assert!(validate_write_response(&echo, ModbusFunction::WriteSingleCoil, 0x10, 1));
/// ```
pub fn validate_write_response(
    response: &[u8],
    function: ModbusFunction,
    address: u16,
    value: u16,
) -> bool {
    if response.len() != 5 || response[0] != function.to_u8() {
        return false;
    }

    let echoed_address = u16::from_be_bytes([response[1], response[2]]);
    let echoed_value = u16::from_be_bytes([response[3], response[4]]);

    match function {
        ModbusFunction::WriteSingleCoil => {
            echoed_address == address && normalize_coil(echoed_value) == normalize_coil(value)
        }
        ModbusFunction::WriteSingleRegister
        | ModbusFunction::WriteMultipleCoils
        | ModbusFunction::WriteMultipleRegisters => {
            echoed_address == address && echoed_value == value
        }
        _ => false,
    }
}
