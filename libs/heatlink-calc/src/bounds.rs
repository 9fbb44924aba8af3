//! Min/max bounds of writable points
//!
//! Static bounds come from the item params. A `dynamic_min`/`dynamic_max`
//! reference replaces them with another item's current value.

use heatlink_modbus::ModbusItem;
use serde::Serialize;

/// Resolved bounds in display units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    /// Resolve bounds, looking up dynamic references by identifier
    ///
    /// `lookup` returns the referenced item's raw value. A reference without
    /// a value keeps the static bound.
    pub fn resolve<F>(item: &ModbusItem, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<i32>,
    {
        let params = &item.params;
        let divider = params.divider_f64();
        let dynamic = |reference: &Option<String>| {
            reference
                .as_deref()
                .and_then(&lookup)
                .map(|raw| f64::from(raw) / divider)
        };

        Self {
            min: dynamic(&params.dynamic_min).or(params.min),
            max: dynamic(&params.dynamic_max).or(params.max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}
