//! Configuration for transports and register tables.
//!
//! Register definitions follow the table-name / register-name layout:
//!
//! ```yaml
//! HREGS:
//!   EXAMPLE_HREG:
//!     register: 93
//!     len: 1
//!     val: 19
//! COILS:
//!   RESET_CALIBRATION:
//!     register: 123
//!     val: false
//! ```
//!
//! Callbacks cannot be expressed in a file and are attached by register name
//! through a [`CallbackRegistry`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::register_store::{RegisterCallbacks, RegisterStore, RegisterTable, RegisterValues};

/// Default Modbus TCP port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default master response timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout on an established slave client connection
pub const DEFAULT_CLIENT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Default number of receive polls on a serial master
pub const DEFAULT_MAX_POLL_ITERATIONS: u32 = 120;

/// A single scalar initial value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
}

impl ScalarValue {
    fn to_bit(self) -> bool {
        match self {
            ScalarValue::Bool(value) => value,
            ScalarValue::Int(value) => value != 0,
        }
    }

    fn to_word(self, name: &str) -> ModbusResult<u16> {
        match self {
            ScalarValue::Bool(value) => Ok(value as u16),
            ScalarValue::Int(value) if (0..=u16::MAX as i64).contains(&value) => Ok(value as u16),
            ScalarValue::Int(value) if (i16::MIN as i64..0).contains(&value) => Ok(value as i16 as u16),
            ScalarValue::Int(value) => Err(ModbusError::configuration(format!(
                "{}: value {} does not fit 16 bits",
                name, value
            ))),
        }
    }
}

/// Initial value of a register definition: one value repeated over `len`
/// addresses, or one value per address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialValue {
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
}

/// One named register block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    /// First address of the block
    pub register: u16,
    /// Number of consecutive addresses sharing a scalar value; a list
    /// value covers one address per element instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u16>,
    /// Initial value; table default when absent
    #[serde(default)]
    pub val: Option<InitialValue>,
}

impl RegisterDefinition {
    /// Number of addresses the block covers
    pub fn block_len(&self) -> usize {
        match &self.val {
            Some(InitialValue::List(values)) => values.len(),
            _ => self.len.unwrap_or(1).max(1) as usize,
        }
    }

    fn scalars(&self, use_default_values: bool) -> Vec<ScalarValue> {
        let len = self.block_len();
        match (&self.val, use_default_values) {
            (Some(InitialValue::List(values)), false) => values.clone(),
            (Some(InitialValue::Scalar(value)), false) => vec![*value; len],
            _ => vec![ScalarValue::Int(0); len],
        }
    }

    /// Values for a bit table
    pub fn bit_values(&self, use_default_values: bool) -> Vec<bool> {
        self.scalars(use_default_values).into_iter().map(ScalarValue::to_bit).collect()
    }

    /// Values for a word table
    pub fn word_values(&self, name: &str, use_default_values: bool) -> ModbusResult<Vec<u16>> {
        self.scalars(use_default_values)
            .into_iter()
            .map(|value| value.to_word(name))
            .collect()
    }
}

/// Register definitions grouped by table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDefinitions {
    #[serde(rename = "COILS", default)]
    pub coils: BTreeMap<String, RegisterDefinition>,
    #[serde(rename = "HREGS", default)]
    pub hregs: BTreeMap<String, RegisterDefinition>,
    #[serde(rename = "ISTS", default)]
    pub ists: BTreeMap<String, RegisterDefinition>,
    #[serde(rename = "IREGS", default)]
    pub iregs: BTreeMap<String, RegisterDefinition>,
}

impl RegisterDefinitions {
    pub fn from_yaml_str(text: &str) -> ModbusResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> ModbusResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Err(ModbusError::configuration(format!(
                "Unsupported register file format: {}",
                path.display()
            ))),
        }
    }

    pub fn table(&self, table: RegisterTable) -> &BTreeMap<String, RegisterDefinition> {
        match table {
            RegisterTable::Coil => &self.coils,
            RegisterTable::DiscreteInput => &self.ists,
            RegisterTable::HoldingRegister => &self.hregs,
            RegisterTable::InputRegister => &self.iregs,
        }
    }

    /// Populate `store` with every defined register
    ///
    /// With `use_default_values` the `val` fields are ignored and every
    /// register starts at `false` / `0`.
    pub fn apply(
        &self,
        store: &mut RegisterStore,
        callbacks: &CallbackRegistry,
        use_default_values: bool,
    ) -> ModbusResult<()> {
        for table in RegisterTable::ALL {
            for (name, definition) in self.table(table) {
                let attached = callbacks.get(table, name);
                if !table.is_writable() && attached.on_set.is_some() {
                    return Err(ModbusError::configuration(format!(
                        "{}: write callback on read-only table {}",
                        name,
                        table.config_key()
                    )));
                }

                if let (Some(InitialValue::List(values)), Some(len)) = (&definition.val, definition.len) {
                    if len as usize != values.len() {
                        warn!(
                            "{}: len {} ignored, value list covers {} registers",
                            name,
                            len,
                            values.len()
                        );
                    }
                }

                let values = match table {
                    RegisterTable::Coil | RegisterTable::DiscreteInput => {
                        RegisterValues::Bits(definition.bit_values(use_default_values))
                    }
                    RegisterTable::HoldingRegister | RegisterTable::InputRegister => {
                        RegisterValues::Words(definition.word_values(name, use_default_values)?)
                    }
                };
                add_block(store, table, name, definition.register, values, attached)?;
            }
        }
        Ok(())
    }
}

fn add_block(
    store: &mut RegisterStore,
    table: RegisterTable,
    name: &str,
    start: u16,
    values: RegisterValues,
    callbacks: RegisterCallbacks,
) -> ModbusResult<()> {
    if start as usize + values.len() > u16::MAX as usize + 1 {
        return Err(ModbusError::configuration(format!(
            "{}: block at {} with {} registers exceeds the address space",
            name,
            start,
            values.len()
        )));
    }

    match values {
        RegisterValues::Bits(bits) => {
            for (address, value) in (start..=u16::MAX).zip(bits) {
                match table {
                    RegisterTable::Coil => store.add_coil(address, value, callbacks.clone()),
                    _ => store.add_ist(address, value, callbacks.clone()),
                }
            }
        }
        RegisterValues::Words(words) => {
            for (address, value) in (start..=u16::MAX).zip(words) {
                match table {
                    RegisterTable::HoldingRegister => store.add_hreg(address, value, callbacks.clone()),
                    _ => store.add_ireg(address, value, callbacks.clone()),
                }
            }
        }
    }
    Ok(())
}

/// Callbacks keyed by table and register name
#[derive(Debug, Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<(RegisterTable, String), RegisterCallbacks>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a write callback to the named register
    pub fn on_set<F>(mut self, table: RegisterTable, name: &str, callback: F) -> Self
    where
        F: Fn(&mut RegisterStore, RegisterTable, u16, &RegisterValues) + Send + Sync + 'static,
    {
        let entry = self.callbacks.entry((table, name.to_string())).or_default();
        *entry = std::mem::take(entry).on_set(callback);
        self
    }

    /// Attach a read callback to the named register
    pub fn on_get<F>(mut self, table: RegisterTable, name: &str, callback: F) -> Self
    where
        F: Fn(&mut RegisterStore, RegisterTable, u16, &RegisterValues) + Send + Sync + 'static,
    {
        let entry = self.callbacks.entry((table, name.to_string())).or_default();
        *entry = std::mem::take(entry).on_get(callback);
        self
    }

    pub fn get(&self, table: RegisterTable, name: &str) -> RegisterCallbacks {
        self.callbacks
            .get(&(table, name.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Modbus TCP master settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpMasterConfig {
    pub address: SocketAddr,
    pub timeout: Duration,
    pub packet_logging: bool,
}

impl Default for TcpMasterConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_TCP_PORT)),
            timeout: DEFAULT_TIMEOUT,
            packet_logging: false,
        }
    }
}

/// Modbus TCP slave settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSlaveConfig {
    pub bind_address: SocketAddr,
    pub client_read_timeout: Duration,
    /// Units answered on this listener; `None` answers every unit id
    pub unit_ids: Option<Vec<u8>>,
    pub packet_logging: bool,
}

impl Default for TcpSlaveConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT)),
            client_read_timeout: DEFAULT_CLIENT_READ_TIMEOUT,
            unit_ids: None,
            packet_logging: false,
        }
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Modbus RTU settings shared by master and slave
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Overall wait for the first byte of a request (slave role);
    /// twice the inter-frame delay when `None`
    pub read_timeout: Option<Duration>,
    /// Receive polls before a master gives up on a response
    pub max_poll_iterations: u32,
    pub packet_logging: bool,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            read_timeout: None,
            max_poll_iterations: DEFAULT_MAX_POLL_ITERATIONS,
            packet_logging: false,
        }
    }
}

impl RtuConfig {
    /// Duration of one character on the line
    pub fn char_time(&self) -> Duration {
        let bits = (self.data_bits as u64) + (self.stop_bits as u64) + 2;
        Duration::from_micros(1_000_000 * bits / self.baud_rate.max(1) as u64)
    }

    /// Silent interval that delimits frames: 3.5 character times up to
    /// 19200 baud, a fixed 1750 µs above
    pub fn inter_frame_delay(&self) -> Duration {
        if self.baud_rate <= 19200 {
            Duration::from_micros(self.char_time().as_micros() as u64 * 3500 / 1000)
        } else {
            Duration::from_micros(1750)
        }
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("baud_rate must be positive"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ModbusError::configuration(format!("unsupported data_bits {}", self.data_bits)));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ModbusError::configuration(format!("unsupported stop_bits {}", self.stop_bits)));
        }
        if self.max_poll_iterations == 0 {
            return Err(ModbusError::configuration("max_poll_iterations must be at least 1"));
        }
        Ok(())
    }
}
