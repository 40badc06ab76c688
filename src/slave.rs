//! Modbus slave: register store plus the request loop.
//!
//! The application calls [`ModbusSlave::process`] repeatedly. Each call
//! waits briefly for one request, serves it from the [`RegisterStore`] and
//! sends the response or exception frame.
//!
//! ```rust,no_run
//! use modbus2chain::{ModbusSlave, ModbusResult, TcpSlaveConfig};
//!
//! # async fn example() -> ModbusResult<()> {
//! let mut slave = ModbusSlave::bind_tcp(TcpSlaveConfig::default()).await?;
//! slave.store_mut().set_hreg(93, 20);
//!
//! loop {
//!     slave.process().await?;
//!     for (address, change) in slave.store_mut().take_changed_hregs() {
//!         println!("HREG {} -> {} at {}", address, change.value, change.timestamp);
//!     }
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::config::{CallbackRegistry, RegisterDefinitions, RtuConfig, TcpSlaveConfig};
use crate::dispatcher::dispatch;
use crate::error::ModbusResult;
use crate::protocol::SlaveId;
use crate::register_store::{ChangeEntry, ChangedRegisters, RegisterStore};
use crate::request::Request;
use crate::rtu::RtuTransport;
use crate::tcp::TcpSlaveTransport;
use crate::transport::{SlaveTransport, TransportStats};

/// How long one `process` call waits for a request by default
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Modbus slave over any transport
pub struct ModbusSlave<T: SlaveTransport> {
    transport: T,
    store: RegisterStore,
    poll_timeout: Duration,
}

impl ModbusSlave<TcpSlaveTransport> {
    /// Bind a TCP slave
    pub async fn bind_tcp(config: TcpSlaveConfig) -> ModbusResult<Self> {
        Ok(Self::new(TcpSlaveTransport::bind(config).await?))
    }
}

impl ModbusSlave<RtuTransport> {
    /// Open an RTU slave answering `unit_address`
    pub fn open_rtu(config: RtuConfig, unit_address: SlaveId) -> ModbusResult<Self> {
        let transport = RtuTransport::open(config)?.with_unit_address(unit_address);
        let poll_timeout = transport.read_timeout();
        Ok(Self::new(transport).with_poll_timeout(poll_timeout))
    }
}

impl<T: SlaveTransport> ModbusSlave<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            store: RegisterStore::new(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Load register definitions into the store
    pub fn setup_registers(
        &mut self,
        definitions: &RegisterDefinitions,
        callbacks: &CallbackRegistry,
        use_default_values: bool,
    ) -> ModbusResult<()> {
        definitions.apply(&mut self.store, callbacks, use_default_values)
    }

    /// Serve at most one request
    ///
    /// Returns `Ok(false)` when no request arrived within the poll timeout.
    /// Requests the store cannot serve are answered with an exception and
    /// still count as served.
    pub async fn process(&mut self) -> ModbusResult<bool> {
        let frame = match self.transport.get_request(self.poll_timeout).await? {
            Some(frame) => frame,
            None => return Ok(false),
        };

        let outcome = Request::parse(frame.header.unit_id, &frame.pdu)
            .and_then(|request| dispatch(&mut self.store, &request));

        match outcome {
            Ok(response) => {
                debug!("unit {} served {} byte response", frame.header.unit_id, response.len());
                self.transport.send_response(frame.header, &response).await?;
            }
            Err(exception) => {
                warn!(
                    "unit {} rejected function 0x{:02X}: {}",
                    frame.header.unit_id, exception.function_code, exception.code
                );
                self.transport.send_exception(frame.header, &exception).await?;
            }
        }
        Ok(true)
    }

    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RegisterStore {
        &mut self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    pub fn get_coil(&self, address: u16) -> ModbusResult<bool> {
        self.store.get_coil(address)
    }

    pub fn set_coil(&mut self, address: u16, value: bool) {
        self.store.set_coil(address, value)
    }

    pub fn get_ist(&self, address: u16) -> ModbusResult<bool> {
        self.store.get_ist(address)
    }

    pub fn set_ist(&mut self, address: u16, value: bool) {
        self.store.set_ist(address, value)
    }

    pub fn get_hreg(&self, address: u16) -> ModbusResult<u16> {
        self.store.get_hreg(address)
    }

    pub fn set_hreg(&mut self, address: u16, value: u16) {
        self.store.set_hreg(address, value)
    }

    pub fn get_ireg(&self, address: u16) -> ModbusResult<u16> {
        self.store.get_ireg(address)
    }

    pub fn set_ireg(&mut self, address: u16, value: u16) {
        self.store.set_ireg(address, value)
    }

    /// Coils written by masters since they were last removed
    pub fn changed_coils(&self) -> &HashMap<u16, ChangeEntry<bool>> {
        self.store.changed_coils()
    }

    /// Holding registers written by masters since they were last removed
    pub fn changed_hregs(&self) -> &HashMap<u16, ChangeEntry<u16>> {
        self.store.changed_hregs()
    }

    pub fn changed_registers(&self) -> ChangedRegisters {
        self.store.changed_registers()
    }

    pub fn remove_changed_coil(&mut self, address: u16, timestamp: DateTime<Utc>) -> bool {
        self.store.remove_changed_coil(address, timestamp)
    }

    pub fn remove_changed_hreg(&mut self, address: u16, timestamp: DateTime<Utc>) -> bool {
        self.store.remove_changed_hreg(address, timestamp)
    }
}
