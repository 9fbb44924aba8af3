//! Item registry
//!
//! Immutable descriptors of every point the heat pump exposes, loaded once
//! from the catalog. Live values are kept elsewhere, keyed by identifier.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, Result};

/// How a raw register value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Number,
    /// Signed tenths of a degree with sentinel values
    Temperature,
    Percentage,
    /// Code resolved through the item's status table
    Status,
    Unknown,
}

/// Access kind of a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Sensor,
    /// Sensor whose displayed value is derived through a formula
    SensorCalc,
    Number,
    NumberRo,
    Select,
}

/// Modbus register class used to read a point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    /// FC04
    Input,
    /// FC03 / FC06
    Holding,
}

impl PointKind {
    pub fn register_class(self) -> RegisterClass {
        match self {
            PointKind::Sensor | PointKind::SensorCalc => RegisterClass::Input,
            PointKind::Number | PointKind::NumberRo | PointKind::Select => RegisterClass::Holding,
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(self, PointKind::Number | PointKind::Select)
    }
}

/// Logical sub-device owning a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubDevice {
    System,
    HeatPump,
    HotWater,
    HeatingCircuit1,
    HeatingCircuit2,
    HeatingCircuit3,
    HeatingCircuit4,
    HeatingCircuit5,
    SecondGenerator,
    Statistics,
    InputsOutputs,
    Unknown,
}

impl SubDevice {
    /// Optional heating circuit number, `None` for always-present sub-devices
    pub fn optional_circuit(self) -> Option<u8> {
        match self {
            SubDevice::HeatingCircuit2 => Some(2),
            SubDevice::HeatingCircuit3 => Some(3),
            SubDevice::HeatingCircuit4 => Some(4),
            SubDevice::HeatingCircuit5 => Some(5),
            _ => None,
        }
    }
}

impl fmt::Display for SubDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubDevice::System => "System",
            SubDevice::HeatPump => "Heat pump",
            SubDevice::HotWater => "Hot water",
            SubDevice::HeatingCircuit1 => "Heating circuit",
            SubDevice::HeatingCircuit2 => "Heating circuit 2",
            SubDevice::HeatingCircuit3 => "Heating circuit 3",
            SubDevice::HeatingCircuit4 => "Heating circuit 4",
            SubDevice::HeatingCircuit5 => "Heating circuit 5",
            SubDevice::SecondGenerator => "Second heat generator",
            SubDevice::Statistics => "Statistics",
            SubDevice::InputsOutputs => "Inputs/outputs",
            SubDevice::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// One entry of a status table (code, label, translation key, description)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusItem {
    pub number: i32,
    pub text: String,
    #[serde(default)]
    pub translation_key: String,
    #[serde(default)]
    pub description: String,
}

impl StatusItem {
    pub fn new(number: i32, text: impl Into<String>, translation_key: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            translation_key: translation_key.into(),
            description: String::new(),
        }
    }
}

fn default_divider() -> u32 {
    1
}

fn default_precision() -> u32 {
    2
}

/// Optional per-item parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemParams {
    pub unit: Option<String>,
    #[serde(default = "default_divider")]
    pub divider: u32,
    pub step: Option<f64>,
    #[serde(default = "default_precision")]
    pub precision: u32,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Identifier of the item whose value is the lower bound
    pub dynamic_min: Option<String>,
    /// Identifier of the item whose value is the upper bound
    pub dynamic_max: Option<String>,
    /// Formula for calculated sensors
    pub calculation: Option<String>,
    pub val_1: Option<String>,
    pub val_2: Option<String>,
    pub val_3: Option<String>,
    pub val_4: Option<String>,
    pub val_5: Option<String>,
    pub val_6: Option<String>,
    pub val_7: Option<String>,
    pub val_8: Option<String>,
}

impl Default for ItemParams {
    fn default() -> Self {
        Self {
            unit: None,
            divider: default_divider(),
            step: None,
            precision: default_precision(),
            min: None,
            max: None,
            dynamic_min: None,
            dynamic_max: None,
            calculation: None,
            val_1: None,
            val_2: None,
            val_3: None,
            val_4: None,
            val_5: None,
            val_6: None,
            val_7: None,
            val_8: None,
        }
    }
}

impl ItemParams {
    /// Formula variable bindings `val_1..val_8` as (index, identifier)
    pub fn formula_refs(&self) -> impl Iterator<Item = (usize, &str)> {
        [
            &self.val_1,
            &self.val_2,
            &self.val_3,
            &self.val_4,
            &self.val_5,
            &self.val_6,
            &self.val_7,
            &self.val_8,
        ]
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| v.as_deref().map(|id| (i + 1, id)))
    }

    /// Divider as float, zero treated as one
    pub fn divider_f64(&self) -> f64 {
        if self.divider == 0 {
            1.0
        } else {
            f64::from(self.divider)
        }
    }
}

/// Descriptor of a single register point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusItem {
    pub address: u16,
    /// Stable identifier, unique across the registry
    pub id: String,
    pub name: String,
    pub format: DataFormat,
    pub kind: PointKind,
    pub device: SubDevice,
    #[serde(default)]
    pub params: ItemParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<StatusItem>,
}

impl ModbusItem {
    pub fn new(
        address: u16,
        id: impl Into<String>,
        format: DataFormat,
        kind: PointKind,
        device: SubDevice,
    ) -> Self {
        let id = id.into();
        Self {
            address,
            name: id.clone(),
            id,
            format,
            kind,
            device,
            params: ItemParams::default(),
            status: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: ItemParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_status(mut self, status: Vec<StatusItem>) -> Self {
        self.status = status;
        self
    }

    fn status_by_number(&self, number: i32) -> Option<&StatusItem> {
        self.status.iter().find(|s| s.number == number)
    }

    pub fn text_for(&self, number: i32) -> Option<&str> {
        self.status_by_number(number).map(|s| s.text.as_str())
    }

    pub fn number_for_text(&self, text: &str) -> Option<i32> {
        self.status.iter().find(|s| s.text == text).map(|s| s.number)
    }

    pub fn translation_key_for(&self, number: i32) -> Option<&str> {
        self.status_by_number(number)
            .map(|s| s.translation_key.as_str())
    }

    pub fn number_for_translation_key(&self, key: &str) -> Option<i32> {
        self.status
            .iter()
            .find(|s| s.translation_key == key)
            .map(|s| s.number)
    }
}

/// Ordered arena of item descriptors with an identifier index
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    items: Vec<ModbusItem>,
    index: HashMap<String, usize>,
}

impl ItemRegistry {
    /// Build a registry, rejecting duplicate identifiers
    pub fn new(items: Vec<ModbusItem>) -> Result<Self> {
        let mut index = HashMap::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if item.id.is_empty() {
                return Err(ModbusError::config(format!(
                    "Item at address {} has an empty identifier",
                    item.address
                )));
            }
            if index.insert(item.id.clone(), i).is_some() {
                return Err(ModbusError::config(format!(
                    "Duplicate item identifier: {}",
                    item.id
                )));
            }
        }
        Ok(Self { items, index })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModbusItem> {
        self.items.get(index)
    }

    pub fn by_id(&self, id: &str) -> Option<&ModbusItem> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Items in registry order
    pub fn iter(&self) -> impl Iterator<Item = &ModbusItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[ModbusItem] {
        &self.items
    }
}
