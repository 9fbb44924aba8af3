//! Register object
//!
//! Binds one item descriptor to the shared connection for a single read or
//! write and translates raw payloads according to the item's data format.

use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::error::{ModbusError, Result};
use crate::items::{DataFormat, ModbusItem, RegisterClass};

/// Temperature raw value meaning "no sensor"
pub const TEMPERATURE_NO_SENSOR: i32 = -32768;
/// Temperature raw value reported as zero / unused
pub const TEMPERATURE_UNUSED: i32 = 32768;
/// Temperature raw value for a broken sensor
pub const TEMPERATURE_BROKEN: i32 = -32767;
/// Value reported for a broken temperature sensor
pub const BROKEN_SENSOR_VALUE: i32 = -999;
/// Percentage raw value meaning "not available"
pub const PERCENTAGE_INVALID: i32 = 65535;

/// Outcome of a register read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// Decoded value, item is valid
    Value(i32),
    /// Register reported a sentinel or does not exist; item becomes invalid
    Invalid,
    /// No connection or transport failure; validity unchanged
    Unavailable,
}

impl Reading {
    pub fn value(&self) -> Option<i32> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Invalid | Reading::Unavailable => None,
        }
    }
}

/// Live state of one point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointState {
    pub value: Option<i32>,
    pub is_invalid: bool,
}

impl PointState {
    pub fn apply(&mut self, reading: Reading) {
        match reading {
            Reading::Value(v) => {
                self.value = Some(v);
                self.is_invalid = false;
            },
            Reading::Invalid => {
                self.value = None;
                self.is_invalid = true;
            },
            Reading::Unavailable => self.value = None,
        }
    }
}

/// Translate a raw register value by data format
pub fn decode(format: DataFormat, raw: i32) -> Reading {
    match format {
        DataFormat::Temperature => match raw {
            TEMPERATURE_NO_SENSOR | TEMPERATURE_UNUSED => Reading::Invalid,
            TEMPERATURE_BROKEN => Reading::Value(BROKEN_SENSOR_VALUE),
            v if v > TEMPERATURE_UNUSED => Reading::Value(v - 65536),
            v => Reading::Value(v),
        },
        DataFormat::Percentage => match raw {
            PERCENTAGE_INVALID => Reading::Invalid,
            v => Reading::Value(v),
        },
        DataFormat::Status | DataFormat::Number | DataFormat::Unknown => Reading::Value(raw),
    }
}

/// Encode a value for transmission by data format
pub fn encode(format: DataFormat, value: i32) -> Result<u16> {
    let wire = match format {
        DataFormat::Temperature if value < 0 => value + 65536,
        _ => value,
    };
    u16::try_from(wire).map_err(|_| {
        ModbusError::invalid_data(format!(
            "Value {} out of register range for {:?}",
            value, format
        ))
    })
}

/// One item bound to the shared connection
pub struct RegisterObject<'a> {
    manager: &'a ConnectionManager,
    item: &'a ModbusItem,
    suppress_warning: bool,
}

impl<'a> RegisterObject<'a> {
    pub fn new(manager: &'a ConnectionManager, item: &'a ModbusItem) -> Self {
        Self {
            manager,
            item,
            suppress_warning: false,
        }
    }

    /// Silence the "not connected" warning, used for availability checks
    pub fn suppress_warning(mut self, suppress: bool) -> Self {
        self.suppress_warning = suppress;
        self
    }

    pub fn item(&self) -> &ModbusItem {
        self.item
    }

    /// Read and decode the register; never fails
    pub async fn read(&self) -> Reading {
        let item = self.item;
        let transport = match self.manager.handle() {
            Some(t) if t.is_connected() => t,
            _ => {
                if !self.suppress_warning {
                    warn!("Not connected, skip read: {}", item.id);
                }
                return Reading::Unavailable;
            },
        };

        let unit_id = self.manager.unit_id();
        let result = match item.kind.register_class() {
            RegisterClass::Input => {
                transport
                    .read_input_registers(unit_id, item.address, 1)
                    .await
            },
            RegisterClass::Holding => {
                transport
                    .read_holding_registers(unit_id, item.address, 1)
                    .await
            },
        };

        match result {
            Ok(registers) => match registers.first() {
                Some(&raw) => {
                    let reading = decode(item.format, i32::from(raw));
                    debug!("Read {}@{}: raw={} -> {:?}", item.id, item.address, raw, reading);
                    reading
                },
                None => {
                    warn!("Empty response: {}@{}", item.id, item.address);
                    Reading::Unavailable
                },
            },
            Err(e) if e.is_illegal_address() => {
                debug!("Illegal address, marking invalid: {}@{}", item.id, item.address);
                Reading::Invalid
            },
            Err(e) => {
                warn!("Read failed: {}@{} - {}", item.id, item.address, e);
                Reading::Unavailable
            },
        }
    }

    /// Encode and write a value; read-only kinds are a no-op
    pub async fn write(&self, value: i32) -> Result<()> {
        let item = self.item;
        if !item.kind.is_writable() {
            debug!("Read-only, skip write: {}", item.id);
            return Ok(());
        }

        let transport = match self.manager.handle() {
            Some(t) if t.is_connected() => t,
            _ => {
                warn!("Not connected, skip write: {}", item.id);
                return Err(ModbusError::NotConnected);
            },
        };

        let wire = encode(item.format, value)?;
        match transport
            .write_single_register(self.manager.unit_id(), item.address, wire)
            .await
        {
            Ok(()) => {
                debug!("Write {}@{}: {} (wire {})", item.id, item.address, value, wire);
                Ok(())
            },
            Err(e) => {
                warn!("Write failed: {}@{} - {}", item.id, item.address, e);
                Err(e)
            },
        }
    }
}
