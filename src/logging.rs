//! Callback based request/response logging for the master.
//!
//! Independent of the `log` facade used inside the crate: applications
//! hand a [`CallbackLogger`] to [`crate::ModbusMaster::with_logger`] and
//! receive one line per request and response, raw, interpreted or both.

use std::sync::Arc;

use crate::protocol::{data_utils, ExceptionCode, FunctionCode, ModbusFunction, COIL_ON, EXCEPTION_BIT};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Logging mode for packet display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw packet data only
    Raw,
    /// Show interpreted packet data with field descriptions
    Interpreted,
    /// Show both raw and interpreted data
    Both,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Logger printing timestamped lines to stdout/stderr
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => {
                    eprintln!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
                LogLevel::Info | LogLevel::Debug => {
                    println!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Logger forwarding into the `log` facade under the `modbus` target
    pub fn log_facade(min_level: LogLevel) -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let level = match level {
                LogLevel::Error => log::Level::Error,
                LogLevel::Warn => log::Level::Warn,
                LogLevel::Info => log::Level::Info,
                LogLevel::Debug => log::Level::Debug,
            };
            log::log!(target: "modbus", level, "{}", message);
        });
        Self::new(Some(callback), min_level)
    }

    /// Logger that outputs nothing
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log packet data with hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }
        let message = format!("{} packet ({} bytes): {}", direction, data.len(), hex::encode_upper(data));
        self.log(level, &message);
    }

    /// Log an outgoing request PDU
    pub fn log_request(&self, unit_id: u8, pdu: &[u8]) {
        self.log_pdu("Request ->", unit_id, pdu, interpret_request);
    }

    /// Log a response PDU
    pub fn log_response(&self, unit_id: u8, pdu: &[u8]) {
        self.log_pdu("Response <-", unit_id, pdu, interpret_response);
    }

    fn log_pdu(&self, direction: &str, unit_id: u8, pdu: &[u8], interpret: fn(&[u8]) -> String) {
        if !self.should_log(LogLevel::Info) {
            return;
        }

        let raw = || format!("Modbus {} Raw: {}", direction, hex::encode_upper(pdu));
        let interpreted = || {
            let code = pdu.first().copied().unwrap_or(0);
            format!(
                "Modbus {} Slave: {}, Function: {} (0x{:02X}), {}",
                direction,
                unit_id,
                function_name(code),
                code,
                interpret(pdu)
            )
        };

        match self.mode {
            LoggingMode::Raw => self.info(&raw()),
            LoggingMode::Interpreted => self.info(&interpreted()),
            LoggingMode::Both => {
                self.info(&interpreted());
                self.debug(&raw());
            }
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

fn function_name(code: u8) -> String {
    match FunctionCode::from(code & !EXCEPTION_BIT) {
        FunctionCode::Supported(function) if code & EXCEPTION_BIT != 0 => {
            format!("{} Exception", function.name())
        }
        FunctionCode::Supported(function) => function.name().to_string(),
        FunctionCode::Unsupported(_) => "Unknown Function".to_string(),
    }
}

fn word(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn interpret_request(pdu: &[u8]) -> String {
    let (address, second) = match (word(pdu, 1), word(pdu, 3)) {
        (Some(address), Some(second)) => (address, second),
        _ => return format!("Data: {}", hex::encode(pdu)),
    };

    match FunctionCode::from(pdu[0]).function() {
        Some(ModbusFunction::WriteSingleCoil) => format!(
            "Address: {}, Value: 0x{:04X} ({})",
            address,
            second,
            if second == COIL_ON { "ON" } else { "OFF" }
        ),
        Some(ModbusFunction::WriteSingleRegister) => {
            format!("Address: {}, Value: {} (0x{:04X})", address, second, second)
        }
        Some(_) => format!("Address: {}, Quantity: {}", address, second),
        None => format!("Data: {}", hex::encode(&pdu[1..])),
    }
}

fn interpret_response(pdu: &[u8]) -> String {
    let code = match pdu.first() {
        Some(code) => *code,
        None => return "No data".to_string(),
    };
    let data = &pdu[1..];

    if code & EXCEPTION_BIT != 0 {
        return match data.first().copied().and_then(ExceptionCode::from_u8) {
            Some(exception) => format!("Exception: {}", exception.name()),
            None => format!("Data: {}", hex::encode(data)),
        };
    }

    match (FunctionCode::from(code).function(), data) {
        (Some(ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs), [byte_count, bits @ ..]) => {
            let coils = data_utils::unpack_bits(bits, bits.len() * 8);
            format!("Byte count: {}, Coils: {:?}", byte_count, &coils[..coils.len().min(16)])
        }
        (
            Some(ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters),
            [byte_count, words @ ..],
        ) => match data_utils::bytes_to_registers(words) {
            Ok(registers) => format!(
                "Byte count: {}, Registers: {:?}",
                byte_count,
                &registers[..registers.len().min(8)]
            ),
            Err(_) => format!("Data: {}", hex::encode(data)),
        },
        (Some(_), _) => interpret_request(pdu),
        (None, _) => format!("Data: {}", hex::encode(data)),
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}
