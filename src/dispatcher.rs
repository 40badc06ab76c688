//! Request dispatcher: resolves a validated [`Request`] against the
//! [`RegisterStore`] and produces the response PDU.
//!
//! Per request the flow is `RECEIVED -> VALIDATED -> READ | WRITE | REJECTED
//! -> RESPONDED`. Parsing covers the first two steps; [`dispatch`] covers the
//! rest and returns either the response PDU or the [`ProtocolException`] to
//! answer with.

use log::debug;

use crate::error::ProtocolException;
use crate::pdu;
use crate::protocol::{ExceptionCode, FunctionCode, ModbusFunction};
use crate::register_store::{RegisterStore, RegisterTable, RegisterValues};
use crate::request::Request;

/// Where a request goes after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Read(RegisterTable),
    Write(RegisterTable),
    Reject(ExceptionCode),
}

/// Map a function code onto the table it addresses
pub fn route(function_code: FunctionCode) -> Route {
    match function_code {
        FunctionCode::Supported(function) => match function {
            ModbusFunction::ReadCoils => Route::Read(RegisterTable::Coil),
            ModbusFunction::ReadDiscreteInputs => Route::Read(RegisterTable::DiscreteInput),
            ModbusFunction::ReadHoldingRegisters => Route::Read(RegisterTable::HoldingRegister),
            ModbusFunction::ReadInputRegisters => Route::Read(RegisterTable::InputRegister),
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteMultipleCoils => {
                Route::Write(RegisterTable::Coil)
            }
            ModbusFunction::WriteSingleRegister | ModbusFunction::WriteMultipleRegisters => {
                Route::Write(RegisterTable::HoldingRegister)
            }
        },
        FunctionCode::Unsupported(_) => Route::Reject(ExceptionCode::IllegalFunction),
    }
}

/// Serve one request against the store
///
/// Read callbacks run before the response values are assembled, so they
/// may refresh the store. Write callbacks run after the values are
/// committed and the change log is updated.
pub fn dispatch(store: &mut RegisterStore, request: &Request) -> Result<Vec<u8>, ProtocolException> {
    let code = request.function_code().to_u8();
    let route = route(request.function_code());
    debug!(
        "unit {} {} @{} validated -> {:?}",
        request.unit_address(),
        request.function_code(),
        request.register_address(),
        route
    );

    match (route, request.function()) {
        (Route::Read(table), Some(function)) => read(store, request, function, table),
        (Route::Write(table), Some(function)) => write(store, request, function, table),
        (Route::Reject(exception), _) => Err(ProtocolException::new(code, exception)),
        (_, None) => Err(ProtocolException::illegal_function(code)),
    }
}

fn read(
    store: &mut RegisterStore,
    request: &Request,
    function: ModbusFunction,
    table: RegisterTable,
) -> Result<Vec<u8>, ProtocolException> {
    let start = request.register_address();
    let count = request.register_count();
    let not_found = || ProtocolException::illegal_data_address(function.to_u8());

    let values = store.read_range(table, start, count).ok_or_else(not_found)?;

    if let Some(callback) = store.on_get_callback(table, start) {
        callback(store, table, start, &values);
    }

    // the callback may have refreshed the values
    let values = store.read_range(table, start, count).ok_or_else(not_found)?;
    Ok(match values {
        RegisterValues::Bits(bits) => pdu::read_bits_response(function, &bits),
        RegisterValues::Words(words) => pdu::read_registers_response(function, &words),
    })
}

fn write(
    store: &mut RegisterStore,
    request: &Request,
    function: ModbusFunction,
    table: RegisterTable,
) -> Result<Vec<u8>, ProtocolException> {
    let start = request.register_address();
    let values = match table {
        RegisterTable::Coil => RegisterValues::Bits(request.coil_values()),
        RegisterTable::HoldingRegister => RegisterValues::Words(request.register_values()),
        RegisterTable::DiscreteInput | RegisterTable::InputRegister => {
            return Err(ProtocolException::illegal_function(function.to_u8()));
        }
    };

    store
        .apply_write(table, start, &values)
        .map_err(|exception| ProtocolException::new(function.to_u8(), exception))?;

    if let Some(callback) = store.on_set_callback(table, start) {
        callback(store, table, start, &values);
    }

    Ok(match request.single_value() {
        Some(value) => pdu::write_single_response(function, start, value),
        None => pdu::write_multiple_response(function, start, request.register_count()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::COIL_ON;
    use crate::register_store::RegisterCallbacks;
    use std::sync::{Arc, Mutex};

    fn serve(store: &mut RegisterStore, pdu: &[u8]) -> Vec<u8> {
        match Request::parse(1, pdu) {
            Ok(request) => dispatch(store, &request).unwrap_or_else(|exc| exc.to_pdu()),
            Err(exc) => exc.to_pdu(),
        }
    }

    #[test]
    fn test_route_table() {
        assert_eq!(route(FunctionCode::from(0x02)), Route::Read(RegisterTable::DiscreteInput));
        assert_eq!(route(FunctionCode::from(0x0F)), Route::Write(RegisterTable::Coil));
        assert_eq!(route(FunctionCode::from(0x06)), Route::Write(RegisterTable::HoldingRegister));
        assert_eq!(route(FunctionCode::from(0x08)), Route::Reject(ExceptionCode::IllegalFunction));
    }

    #[test]
    fn test_read_holding_register() {
        let mut store = RegisterStore::new();
        store.add_hreg(93, 20, RegisterCallbacks::none());

        let response = serve(&mut store, &pdu::read_holding_registers(93, 1).unwrap());
        assert_eq!(response, vec![0x03, 0x02, 0x00, 0x14]);
    }

    #[test]
    fn test_unconfigured_address_then_configured() {
        let mut store = RegisterStore::new();
        let request = pdu::read_input_registers(5, 2).unwrap();

        assert_eq!(serve(&mut store, &request), vec![0x84, 0x02]);

        store.set_iregs(5, &[1, 2]);
        assert_eq!(serve(&mut store, &request), vec![0x04, 0x04, 0x00, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn test_partial_range_rejected() {
        let mut store = RegisterStore::new();
        store.set_coils(0, &[true; 8]);
        assert_eq!(serve(&mut store, &pdu::read_coils(0, 9).unwrap()), vec![0x81, 0x02]);
        assert_eq!(serve(&mut store, &pdu::read_coils(0, 8).unwrap()), vec![0x01, 0x01, 0xFF]);
    }

    #[test]
    fn test_write_to_read_only_address_rejected() {
        let mut store = RegisterStore::new();
        store.set_ist(5, false);
        store.set_ireg(6, 0);

        assert_eq!(serve(&mut store, &pdu::write_single_coil(5, COIL_ON).unwrap()), vec![0x85, 0x02]);
        assert_eq!(serve(&mut store, &pdu::write_single_register(6, 1)), vec![0x86, 0x02]);
        assert!(!store.get_ist(5).unwrap());
    }

    #[test]
    fn test_unknown_function() {
        let mut store = RegisterStore::new();
        assert_eq!(serve(&mut store, &[0x07]), vec![0x87, 0x01]);
        assert_eq!(serve(&mut store, &[0x2B, 0x0E, 0x01, 0x00]), vec![0xAB, 0x01]);
    }

    #[test]
    fn test_write_single_coil_updates_change_log() {
        let mut store = RegisterStore::new();
        store.add_coil(0x00AC, false, RegisterCallbacks::none());

        let request = pdu::write_single_coil(0x00AC, COIL_ON).unwrap();
        assert_eq!(serve(&mut store, &request), request);
        assert!(store.get_coil(0x00AC).unwrap());
        assert!(store.changed_coils()[&0x00AC].value);
    }

    #[test]
    fn test_write_multiple_registers_echo() {
        let mut store = RegisterStore::new();
        store.set_hregs(1, &[0, 0]);

        let response = serve(&mut store, &pdu::write_multiple_registers(1, &[0x000A, 0x0102]).unwrap());
        assert_eq!(response, vec![0x10, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(store.get_hreg(2).unwrap(), 0x0102);
        assert_eq!(store.changed_hregs().len(), 2);
    }

    #[test]
    fn test_write_multiple_coils() {
        let mut store = RegisterStore::new();
        store.set_coils(19, &[false; 10]);

        let bits = [true, false, true, true, false, false, true, true, true, false];
        let response = serve(&mut store, &pdu::write_multiple_coils(19, &bits).unwrap());
        assert_eq!(response, vec![0x0F, 0x00, 0x13, 0x00, 0x0A]);
        assert_eq!(
            store.read_range(RegisterTable::Coil, 19, 10),
            Some(RegisterValues::Bits(bits.to_vec()))
        );
    }

    #[test]
    fn test_get_callback_refreshes_value_before_response() {
        let mut store = RegisterStore::new();
        store.add_ireg(
            1,
            0,
            RegisterCallbacks::none().on_get(|store, table, address, _| {
                assert_eq!(table, RegisterTable::InputRegister);
                store.set_ireg(address, 215);
            }),
        );

        let response = serve(&mut store, &pdu::read_input_registers(1, 1).unwrap());
        assert_eq!(response, vec![0x04, 0x02, 0x00, 0xD7]);
    }

    #[test]
    fn test_set_callback_sees_committed_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut store = RegisterStore::new();
        store.add_hreg(
            93,
            20,
            RegisterCallbacks::none().on_set(move |store, table, address, values| {
                let committed = store.get_hreg(address).unwrap();
                sink.lock().unwrap().push((table, address, values.clone(), committed));
            }),
        );

        serve(&mut store, &pdu::write_single_register(93, 25));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(RegisterTable::HoldingRegister, 93, RegisterValues::Words(vec![25]), 25)]
        );
    }
}
