//! Calculated sensors
//!
//! Holds the compiled formula of every calculated sensor and evaluates it
//! against the latest point values.

use std::collections::HashMap;
use std::sync::Arc;

use heatlink_modbus::{ModbusItem, PointKind};
use tracing::{debug, warn};

use crate::formula::{round_to, Formula, FormulaInputs, PowerMap};

pub struct Calculator {
    formulas: HashMap<String, Formula>,
    power: Option<Arc<dyn PowerMap>>,
}

impl Calculator {
    /// Compile the formulas of all calculated sensors
    ///
    /// Items whose formula does not parse are logged and yield no value.
    pub fn new<'a, I>(items: I, power: Option<Arc<dyn PowerMap>>) -> Self
    where
        I: IntoIterator<Item = &'a ModbusItem>,
    {
        let mut formulas = HashMap::new();
        for item in items {
            if item.kind != PointKind::SensorCalc {
                continue;
            }
            let Some(source) = item.params.calculation.as_deref() else {
                debug!("No formula: {}", item.id);
                continue;
            };
            match Formula::compile(source) {
                Ok(formula) => {
                    if formula.uses_power() && power.is_none() {
                        warn!("No power map for {}, formula yields no value", item.id);
                    }
                    formulas.insert(item.id.clone(), formula);
                },
                Err(e) => warn!("Syntax error in {}: {}", item.id, e),
            }
        }
        Self { formulas, power }
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    pub fn formula(&self, id: &str) -> Option<&Formula> {
        self.formulas.get(id)
    }

    /// Calculated value of an item, rounded to its precision
    ///
    /// `lookup` returns the raw value of a referenced item.
    pub fn value<F>(&self, item: &ModbusItem, raw: Option<i32>, lookup: F) -> Option<f64>
    where
        F: Fn(&str) -> Option<i32>,
    {
        let formula = self.formulas.get(&item.id)?;
        let raw = raw?;

        let mut inputs = FormulaInputs::new(f64::from(raw) / item.params.divider_f64())
            .with_power(self.power.clone());
        for (index, reference) in item.params.formula_refs() {
            inputs = inputs.bind(index, lookup(reference).map(f64::from));
        }

        match formula.evaluate(&inputs) {
            Ok(value) => Some(round_to(value, item.params.precision)),
            Err(e) => {
                warn!("Calculation failed for {}: {}", item.id, e);
                None
            },
        }
    }
}
