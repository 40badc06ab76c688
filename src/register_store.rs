/// Register storage for slave applications
///
/// Four typed tables (coils, discrete inputs, holding registers, input
/// registers) keyed by address, optional per-register callbacks and a change
/// log for the two writable tables.
///
/// The store is owned by exactly one logical executor: the slave loop calling
/// `process()` and the callbacks it runs. Callbacks receive `&mut
/// RegisterStore` and may update values before a response is assembled.
/// Hosts that need access from several threads must funnel every call
/// through that single owner.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ExceptionCode;

/// Register table kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterTable {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterTable {
    pub const ALL: [RegisterTable; 4] = [
        RegisterTable::Coil,
        RegisterTable::DiscreteInput,
        RegisterTable::HoldingRegister,
        RegisterTable::InputRegister,
    ];

    /// Only coils and holding registers accept external writes
    pub fn is_writable(self) -> bool {
        matches!(self, RegisterTable::Coil | RegisterTable::HoldingRegister)
    }

    /// Key of this table in register definition files
    pub fn config_key(self) -> &'static str {
        match self {
            RegisterTable::Coil => "COILS",
            RegisterTable::DiscreteInput => "ISTS",
            RegisterTable::HoldingRegister => "HREGS",
            RegisterTable::InputRegister => "IREGS",
        }
    }
}

impl fmt::Display for RegisterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterTable::Coil => "COIL",
            RegisterTable::DiscreteInput => "DISCRETE_INPUT",
            RegisterTable::HoldingRegister => "HOLDING_REGISTER",
            RegisterTable::InputRegister => "INPUT_REGISTER",
        };
        f.write_str(name)
    }
}

/// Values handed to callbacks and moved between store and codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RegisterValues {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl RegisterValues {
    pub fn len(&self) -> usize {
        match self {
            RegisterValues::Bits(bits) => bits.len(),
            RegisterValues::Words(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callback invoked with `(store, table, address, values)`
///
/// Read callbacks run before the response is assembled, write callbacks
/// after the new values are committed. Return values are not consulted.
pub type RegisterCallback =
    Arc<dyn Fn(&mut RegisterStore, RegisterTable, u16, &RegisterValues) + Send + Sync>;

/// Optional read and write callbacks of a register
#[derive(Clone, Default)]
pub struct RegisterCallbacks {
    pub on_set: Option<RegisterCallback>,
    pub on_get: Option<RegisterCallback>,
}

impl RegisterCallbacks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_set<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut RegisterStore, RegisterTable, u16, &RegisterValues) + Send + Sync + 'static,
    {
        self.on_set = Some(Arc::new(callback));
        self
    }

    pub fn on_get<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut RegisterStore, RegisterTable, u16, &RegisterValues) + Send + Sync + 'static,
    {
        self.on_get = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for RegisterCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterCallbacks")
            .field("on_set", &self.on_set.is_some())
            .field("on_get", &self.on_get.is_some())
            .finish()
    }
}

/// One addressable register
#[derive(Debug, Clone)]
pub struct Register<V> {
    pub value: V,
    pub callbacks: RegisterCallbacks,
}

/// Last externally written value of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEntry<V> {
    pub value: V,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of both change logs, ordered by address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangedRegisters {
    pub coils: BTreeMap<u16, ChangeEntry<bool>>,
    pub hregs: BTreeMap<u16, ChangeEntry<u16>>,
}

#[derive(Debug, Clone)]
struct Table<V> {
    registers: HashMap<u16, Register<V>>,
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self { registers: HashMap::new() }
    }
}

fn addresses(start: u16, count: u16) -> Option<std::ops::Range<u32>> {
    let end = start as u32 + count as u32;
    (end <= u16::MAX as u32 + 1).then(|| start as u32..end)
}

impl<V: Copy> Table<V> {
    fn insert(&mut self, address: u16, value: V, callbacks: RegisterCallbacks) {
        self.registers.insert(address, Register { value, callbacks });
    }

    /// Update a value, creating the register if needed and keeping callbacks
    fn set(&mut self, address: u16, value: V) {
        self.registers
            .entry(address)
            .and_modify(|register| register.value = value)
            .or_insert_with(|| Register { value, callbacks: RegisterCallbacks::none() });
    }

    fn get(&self, address: u16) -> Option<V> {
        self.registers.get(&address).map(|register| register.value)
    }

    fn remove(&mut self, address: u16) -> Option<V> {
        self.registers.remove(&address).map(|register| register.value)
    }

    fn addresses(&self) -> Vec<u16> {
        let mut addresses: Vec<u16> = self.registers.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Values of `[start, start + count)`, `None` if any address is missing
    fn range(&self, start: u16, count: u16) -> Option<Vec<V>> {
        addresses(start, count)?
            .map(|address| self.get(address as u16))
            .collect()
    }

    fn contains_range(&self, start: u16, count: u16) -> bool {
        match addresses(start, count) {
            Some(mut range) => range.all(|address| self.registers.contains_key(&(address as u16))),
            None => false,
        }
    }

    fn callbacks(&self, address: u16) -> Option<&RegisterCallbacks> {
        self.registers.get(&address).map(|register| &register.callbacks)
    }
}

/// Register store with change tracking
///
/// # Examples
///
/// ```rust
/// use modbus2chain::register_store::{RegisterCallbacks, RegisterStore};
///
/// let mut store = RegisterStore::new();
/// store.add_hreg(93, 20, RegisterCallbacks::none());
/// assert_eq!(store.get_hreg(93).unwrap(), 20);
///
/// store.set_hreg(93, 25);
/// assert_eq!(store.get_hreg(93).unwrap(), 25);
/// assert!(store.get_hreg(94).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RegisterStore {
    coils: Table<bool>,
    ists: Table<bool>,
    hregs: Table<u16>,
    iregs: Table<u16>,
    changed_coils: HashMap<u16, ChangeEntry<bool>>,
    changed_hregs: HashMap<u16, ChangeEntry<u16>>,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Coils

    pub fn add_coil(&mut self, address: u16, value: bool, callbacks: RegisterCallbacks) {
        self.coils.insert(address, value, callbacks);
    }

    pub fn set_coil(&mut self, address: u16, value: bool) {
        self.coils.set(address, value);
    }

    /// Set consecutive coils starting at `start`
    pub fn set_coils(&mut self, start: u16, values: &[bool]) {
        for (address, &value) in (start..=u16::MAX).zip(values) {
            self.coils.set(address, value);
        }
    }

    pub fn get_coil(&self, address: u16) -> ModbusResult<bool> {
        self.coils.get(address).ok_or_else(|| ModbusError::invalid_address(address, 1))
    }

    pub fn remove_coil(&mut self, address: u16) -> Option<bool> {
        self.coils.remove(address)
    }

    /// Configured coil addresses, ascending
    pub fn coils(&self) -> Vec<u16> {
        self.coils.addresses()
    }

    // Discrete inputs

    pub fn add_ist(&mut self, address: u16, value: bool, callbacks: RegisterCallbacks) {
        self.ists.insert(address, value, callbacks);
    }

    pub fn set_ist(&mut self, address: u16, value: bool) {
        self.ists.set(address, value);
    }

    pub fn set_ists(&mut self, start: u16, values: &[bool]) {
        for (address, &value) in (start..=u16::MAX).zip(values) {
            self.ists.set(address, value);
        }
    }

    pub fn get_ist(&self, address: u16) -> ModbusResult<bool> {
        self.ists.get(address).ok_or_else(|| ModbusError::invalid_address(address, 1))
    }

    pub fn remove_ist(&mut self, address: u16) -> Option<bool> {
        self.ists.remove(address)
    }

    pub fn ists(&self) -> Vec<u16> {
        self.ists.addresses()
    }

    // Holding registers

    pub fn add_hreg(&mut self, address: u16, value: u16, callbacks: RegisterCallbacks) {
        self.hregs.insert(address, value, callbacks);
    }

    pub fn set_hreg(&mut self, address: u16, value: u16) {
        self.hregs.set(address, value);
    }

    pub fn set_hreg_signed(&mut self, address: u16, value: i16) {
        self.hregs.set(address, value as u16);
    }

    pub fn set_hregs(&mut self, start: u16, values: &[u16]) {
        for (address, &value) in (start..=u16::MAX).zip(values) {
            self.hregs.set(address, value);
        }
    }

    pub fn get_hreg(&self, address: u16) -> ModbusResult<u16> {
        self.hregs.get(address).ok_or_else(|| ModbusError::invalid_address(address, 1))
    }

    pub fn get_hreg_signed(&self, address: u16) -> ModbusResult<i16> {
        self.get_hreg(address).map(|value| value as i16)
    }

    pub fn remove_hreg(&mut self, address: u16) -> Option<u16> {
        self.hregs.remove(address)
    }

    pub fn hregs(&self) -> Vec<u16> {
        self.hregs.addresses()
    }

    // Input registers

    pub fn add_ireg(&mut self, address: u16, value: u16, callbacks: RegisterCallbacks) {
        self.iregs.insert(address, value, callbacks);
    }

    pub fn set_ireg(&mut self, address: u16, value: u16) {
        self.iregs.set(address, value);
    }

    pub fn set_ireg_signed(&mut self, address: u16, value: i16) {
        self.iregs.set(address, value as u16);
    }

    pub fn set_iregs(&mut self, start: u16, values: &[u16]) {
        for (address, &value) in (start..=u16::MAX).zip(values) {
            self.iregs.set(address, value);
        }
    }

    pub fn get_ireg(&self, address: u16) -> ModbusResult<u16> {
        self.iregs.get(address).ok_or_else(|| ModbusError::invalid_address(address, 1))
    }

    pub fn get_ireg_signed(&self, address: u16) -> ModbusResult<i16> {
        self.get_ireg(address).map(|value| value as i16)
    }

    pub fn remove_ireg(&mut self, address: u16) -> Option<u16> {
        self.iregs.remove(address)
    }

    pub fn iregs(&self) -> Vec<u16> {
        self.iregs.addresses()
    }

    // Table-generic access used by the dispatcher

    /// Whether every address of `[start, start + count)` exists in `table`
    pub fn contains_range(&self, table: RegisterTable, start: u16, count: u16) -> bool {
        match table {
            RegisterTable::Coil => self.coils.contains_range(start, count),
            RegisterTable::DiscreteInput => self.ists.contains_range(start, count),
            RegisterTable::HoldingRegister => self.hregs.contains_range(start, count),
            RegisterTable::InputRegister => self.iregs.contains_range(start, count),
        }
    }

    /// Values of `[start, start + count)`, `None` if any address is missing
    pub fn read_range(&self, table: RegisterTable, start: u16, count: u16) -> Option<RegisterValues> {
        match table {
            RegisterTable::Coil => self.coils.range(start, count).map(RegisterValues::Bits),
            RegisterTable::DiscreteInput => self.ists.range(start, count).map(RegisterValues::Bits),
            RegisterTable::HoldingRegister => self.hregs.range(start, count).map(RegisterValues::Words),
            RegisterTable::InputRegister => self.iregs.range(start, count).map(RegisterValues::Words),
        }
    }

    fn callbacks(&self, table: RegisterTable, address: u16) -> Option<&RegisterCallbacks> {
        match table {
            RegisterTable::Coil => self.coils.callbacks(address),
            RegisterTable::DiscreteInput => self.ists.callbacks(address),
            RegisterTable::HoldingRegister => self.hregs.callbacks(address),
            RegisterTable::InputRegister => self.iregs.callbacks(address),
        }
    }

    /// Read callback attached to `address`
    pub fn on_get_callback(&self, table: RegisterTable, address: u16) -> Option<RegisterCallback> {
        self.callbacks(table, address)?.on_get.clone()
    }

    /// Write callback attached to `address`; always `None` for read-only tables
    pub fn on_set_callback(&self, table: RegisterTable, address: u16) -> Option<RegisterCallback> {
        if !table.is_writable() {
            return None;
        }
        self.callbacks(table, address)?.on_set.clone()
    }

    /// Commit an external write and record it in the change log
    ///
    /// All-or-nothing: if any target address is missing, nothing is
    /// written and Illegal Data Address is returned. Read-only tables and
    /// mismatched value kinds are Illegal Function.
    pub fn apply_write(
        &mut self,
        table: RegisterTable,
        start: u16,
        values: &RegisterValues,
    ) -> Result<(), ExceptionCode> {
        let count = u16::try_from(values.len()).map_err(|_| ExceptionCode::IllegalDataValue)?;
        if !self.contains_range(table, start, count) {
            return Err(ExceptionCode::IllegalDataAddress);
        }

        let timestamp = Utc::now();
        match (table, values) {
            (RegisterTable::Coil, RegisterValues::Bits(bits)) => {
                for (address, &value) in (start..=u16::MAX).zip(bits) {
                    self.coils.set(address, value);
                    self.changed_coils.insert(address, ChangeEntry { value, timestamp });
                }
            }
            (RegisterTable::HoldingRegister, RegisterValues::Words(words)) => {
                for (address, &value) in (start..=u16::MAX).zip(words) {
                    self.hregs.set(address, value);
                    self.changed_hregs.insert(address, ChangeEntry { value, timestamp });
                }
            }
            _ => return Err(ExceptionCode::IllegalFunction),
        }
        Ok(())
    }

    // Change log

    /// Coils written by a master since their entry was last removed
    pub fn changed_coils(&self) -> &HashMap<u16, ChangeEntry<bool>> {
        &self.changed_coils
    }

    /// Holding registers written by a master since their entry was last removed
    pub fn changed_hregs(&self) -> &HashMap<u16, ChangeEntry<u16>> {
        &self.changed_hregs
    }

    /// Snapshot of both change logs
    pub fn changed_registers(&self) -> ChangedRegisters {
        ChangedRegisters {
            coils: self.changed_coils.iter().map(|(&a, &e)| (a, e)).collect(),
            hregs: self.changed_hregs.iter().map(|(&a, &e)| (a, e)).collect(),
        }
    }

    /// Remove a coil change entry if its timestamp still matches
    pub fn remove_changed_coil(&mut self, address: u16, timestamp: DateTime<Utc>) -> bool {
        remove_if_unchanged(&mut self.changed_coils, address, timestamp)
    }

    /// Remove a holding register change entry if its timestamp still matches
    pub fn remove_changed_hreg(&mut self, address: u16, timestamp: DateTime<Utc>) -> bool {
        remove_if_unchanged(&mut self.changed_hregs, address, timestamp)
    }

    /// Compare-and-remove on either writable table
    pub fn remove_changed_register(
        &mut self,
        table: RegisterTable,
        address: u16,
        timestamp: DateTime<Utc>,
    ) -> bool {
        match table {
            RegisterTable::Coil => self.remove_changed_coil(address, timestamp),
            RegisterTable::HoldingRegister => self.remove_changed_hreg(address, timestamp),
            RegisterTable::DiscreteInput | RegisterTable::InputRegister => false,
        }
    }

    /// Drain the coil change log
    pub fn take_changed_coils(&mut self) -> BTreeMap<u16, ChangeEntry<bool>> {
        let snapshot: BTreeMap<_, _> = self.changed_coils.iter().map(|(&a, &e)| (a, e)).collect();
        for (&address, entry) in &snapshot {
            self.remove_changed_coil(address, entry.timestamp);
        }
        snapshot
    }

    /// Drain the holding register change log
    pub fn take_changed_hregs(&mut self) -> BTreeMap<u16, ChangeEntry<u16>> {
        let snapshot: BTreeMap<_, _> = self.changed_hregs.iter().map(|(&a, &e)| (a, e)).collect();
        for (&address, entry) in &snapshot {
            self.remove_changed_hreg(address, entry.timestamp);
        }
        snapshot
    }
}

fn remove_if_unchanged<V>(
    log: &mut HashMap<u16, ChangeEntry<V>>,
    address: u16,
    timestamp: DateTime<Utc>,
) -> bool {
    match log.get(&address) {
        Some(entry) if entry.timestamp == timestamp => {
            log.remove(&address);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_register_store_basic_operations() {
        let mut store = RegisterStore::new();
        store.add_coil(0, false, RegisterCallbacks::none());
        store.add_ist(0, true, RegisterCallbacks::none());
        store.add_hreg(0, 0x1234, RegisterCallbacks::none());
        store.add_ireg(0, 0xFFFF, RegisterCallbacks::none());

        assert!(!store.get_coil(0).unwrap());
        assert!(store.get_ist(0).unwrap());
        assert_eq!(store.get_hreg(0).unwrap(), 0x1234);
        assert_eq!(store.get_ireg_signed(0).unwrap(), -1);

        store.set_hreg_signed(0, -2);
        assert_eq!(store.get_hreg(0).unwrap(), 0xFFFE);

        assert_eq!(store.remove_coil(0), Some(false));
        assert!(matches!(store.get_coil(0), Err(ModbusError::InvalidAddress { start: 0, count: 1 })));
    }

    #[test]
    fn test_set_creates_and_keeps_callbacks() {
        let mut store = RegisterStore::new();
        store.add_hreg(10, 1, RegisterCallbacks::none().on_get(|_, _, _, _| {}));
        store.set_hreg(10, 2);
        assert!(store.on_get_callback(RegisterTable::HoldingRegister, 10).is_some());

        store.set_hregs(11, &[3, 4]);
        assert_eq!(store.hregs(), vec![10, 11, 12]);
        assert_eq!(store.get_hreg(12).unwrap(), 4);
    }

    #[test]
    fn test_read_range_requires_every_address() {
        let mut store = RegisterStore::new();
        store.set_coils(5, &[true, false, true]);

        assert_eq!(
            store.read_range(RegisterTable::Coil, 5, 3),
            Some(RegisterValues::Bits(vec![true, false, true]))
        );
        assert_eq!(store.read_range(RegisterTable::Coil, 5, 4), None);
        assert_eq!(store.read_range(RegisterTable::DiscreteInput, 5, 1), None);

        store.set_hreg(u16::MAX, 7);
        assert_eq!(store.read_range(RegisterTable::HoldingRegister, u16::MAX, 1), Some(RegisterValues::Words(vec![7])));
        assert_eq!(store.read_range(RegisterTable::HoldingRegister, u16::MAX, 2), None);
    }

    #[test]
    fn test_apply_write_is_all_or_nothing() {
        let mut store = RegisterStore::new();
        store.set_hregs(0, &[1, 2]);

        let result = store.apply_write(RegisterTable::HoldingRegister, 0, &RegisterValues::Words(vec![9, 9, 9]));
        assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));
        assert_eq!(store.get_hreg(0).unwrap(), 1);
        assert!(store.changed_hregs().is_empty());

        store.apply_write(RegisterTable::HoldingRegister, 0, &RegisterValues::Words(vec![5, 6])).unwrap();
        assert_eq!(store.get_hreg(1).unwrap(), 6);
        assert_eq!(store.changed_hregs()[&1].value, 6);
    }

    #[test]
    fn test_read_only_tables_reject_writes() {
        let mut store = RegisterStore::new();
        store.set_ist(0, false);
        store.set_ireg(0, 0);

        assert_eq!(
            store.apply_write(RegisterTable::DiscreteInput, 0, &RegisterValues::Bits(vec![true])),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            store.apply_write(RegisterTable::InputRegister, 0, &RegisterValues::Words(vec![1])),
            Err(ExceptionCode::IllegalFunction)
        );
        assert!(store.on_set_callback(RegisterTable::InputRegister, 0).is_none());
    }

    #[test]
    fn test_change_log_compare_and_remove() {
        let mut store = RegisterStore::new();
        store.set_coil(3, false);
        store.apply_write(RegisterTable::Coil, 3, &RegisterValues::Bits(vec![true])).unwrap();

        let entry = store.changed_coils()[&3];
        assert!(entry.value);

        let stale = entry.timestamp - Duration::milliseconds(1);
        assert!(!store.remove_changed_coil(3, stale));
        assert!(!store.remove_changed_register(RegisterTable::DiscreteInput, 3, entry.timestamp));
        assert!(store.remove_changed_register(RegisterTable::Coil, 3, entry.timestamp));
        assert!(store.changed_coils().is_empty());
    }

    #[test]
    fn test_take_changed_drains_log() {
        let mut store = RegisterStore::new();
        store.set_hregs(93, &[20, 21]);
        store.apply_write(RegisterTable::HoldingRegister, 93, &RegisterValues::Words(vec![25, 26])).unwrap();

        let changed = store.take_changed_hregs();
        assert_eq!(changed.keys().copied().collect::<Vec<_>>(), vec![93, 94]);
        assert_eq!(changed[&93].value, 25);
        assert!(store.changed_hregs().is_empty());
        assert!(store.take_changed_coils().is_empty());
    }
}
