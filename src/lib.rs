//! # modbus2chain - Modbus RTU/TCP master and slave core
//!
//! Async Modbus implementation for field gateways: a master that queries
//! remote devices and a slave that exposes a local register store, over
//! Modbus TCP or Modbus RTU (serial).
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! Any other function code is answered with Illegal Function.
//!
//! ## Quick Start
//!
//! ### Master
//!
//! ```rust,no_run
//! use modbus2chain::{ModbusMaster, ModbusResult, TcpMasterConfig};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = TcpMasterConfig {
//!         address: "127.0.0.1:502".parse().unwrap(),
//!         ..TcpMasterConfig::default()
//!     };
//!     let mut master = ModbusMaster::connect_tcp(config).await?;
//!
//!     let values = master.read_holding_registers(1, 93, 1).await?;
//!     println!("HREG 93: {:?}", values);
//!
//!     master.write_single_register(1, 93, 25).await?;
//!     master.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Slave
//!
//! ```rust,no_run
//! use modbus2chain::{CallbackRegistry, ModbusSlave, RegisterDefinitions, TcpSlaveConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let definitions = RegisterDefinitions::from_yaml_str(
//!         "HREGS:\n  EXAMPLE_HREG:\n    register: 93\n    val: 19\n",
//!     )?;
//!
//!     let mut slave = ModbusSlave::bind_tcp(TcpSlaveConfig::default()).await?;
//!     slave.setup_registers(&definitions, &CallbackRegistry::new(), false)?;
//!
//!     loop {
//!         slave.process().await?;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Application   │    │   Application   │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │  ModbusMaster   │    │   ModbusSlave   │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   PDU codec     │    │ Request parser, │
//! │                 │    │ dispatcher,     │
//! │                 │    │ register store  │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Transport     │◄──►│   Transport     │
//! │   (TCP / RTU)   │    │   (TCP / RTU)   │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Function codes, exception codes and data conversion
pub mod protocol;

/// CRC-16/MODBUS for RTU frames
pub mod crc16;

/// PDU builders and decoders
pub mod pdu;

/// Slave-side request parsing and validation
pub mod request;

/// Addressable register tables with callbacks and change log
pub mod register_store;

pub mod dispatcher;

/// Register definitions and transport settings
pub mod config;

/// Transport traits shared by TCP and RTU
pub mod transport;

pub mod tcp;

pub mod rtu;

/// Modbus master
pub mod client;

/// Modbus slave
pub mod slave;

/// Callback logging for master traffic
pub mod logging;

// Re-export main types for convenience
pub use client::ModbusMaster;
pub use config::{
    CallbackRegistry, Parity, RegisterDefinition, RegisterDefinitions, RtuConfig, TcpMasterConfig,
    TcpSlaveConfig,
};
pub use error::{ModbusError, ModbusResult, ProtocolException};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};
pub use protocol::{ExceptionCode, FunctionCode, ModbusFunction, SlaveId};
pub use register_store::{
    ChangeEntry, ChangedRegisters, RegisterCallbacks, RegisterStore, RegisterTable, RegisterValues,
};
pub use request::Request;
pub use rtu::{DirectionPin, RtuTransport};
pub use slave::ModbusSlave;
pub use tcp::{TcpSlaveTransport, TcpTransport};
pub use transport::{FrameHeader, MasterTransport, RequestFrame, SlaveTransport, TransportStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("modbus2chain v{} - Modbus RTU/TCP master and slave", VERSION)
}
