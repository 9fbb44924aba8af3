//! Point rendering for consumers
//!
//! Combines raw point values with presentation and calculated sensors.

use heatlink_calc::{present, Bounds, Calculator, Presented};
use heatlink_modbus::{ItemRegistry, ModbusItem, PointKind};
use serde::Serialize;

use crate::coordinator::Snapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointView {
    pub id: String,
    pub name: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub value: Option<Presented>,
    /// Only set for writable points
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

/// Render one point against the given values
pub fn render_point(item: &ModbusItem, calculator: &Calculator, values: &Snapshot) -> PointView {
    let lookup = |id: &str| values.get(id).copied().flatten();
    let raw = lookup(&item.id);

    let value = match item.kind {
        PointKind::SensorCalc => calculator.value(item, raw, lookup).map(Presented::Number),
        _ => present(item, raw),
    };
    let bounds = item
        .kind
        .is_writable()
        .then(|| Bounds::resolve(item, lookup));

    PointView {
        id: item.id.clone(),
        name: item.name.clone(),
        device: item.device.to_string(),
        unit: item.params.unit.clone(),
        value,
        bounds,
    }
}

/// Render the points present in `values`, in registry order
pub fn render(
    registry: &ItemRegistry,
    calculator: &Calculator,
    values: &Snapshot,
) -> Vec<PointView> {
    registry
        .iter()
        .filter(|item| values.contains_key(&item.id))
        .map(|item| render_point(item, calculator, values))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use heatlink_modbus::{DataFormat, ItemParams, StatusItem, SubDevice};

    fn registry() -> ItemRegistry {
        ItemRegistry::new(vec![
            ModbusItem::new(
                30001,
                "outside_temperature",
                DataFormat::Temperature,
                PointKind::Sensor,
                SubDevice::System,
            )
            .with_params(ItemParams {
                unit: Some("°C".into()),
                divider: 10,
                ..ItemParams::default()
            }),
            ModbusItem::new(
                30006,
                "operating_mode",
                DataFormat::Status,
                PointKind::Sensor,
                SubDevice::HeatPump,
            )
            .with_status(vec![StatusItem::new(2, "Heizen", "heating")]),
            ModbusItem::new(
                30009,
                "compressor_rating",
                DataFormat::Percentage,
                PointKind::SensorCalc,
                SubDevice::HeatPump,
            )
            .with_params(ItemParams {
                calculation: Some("val_0 * 2".into()),
                ..ItemParams::default()
            }),
            ModbusItem::new(
                41103,
                "room_setpoint",
                DataFormat::Temperature,
                PointKind::Number,
                SubDevice::HeatingCircuit1,
            )
            .with_params(ItemParams {
                divider: 10,
                min: Some(15.0),
                max: Some(30.0),
                dynamic_min: Some("outside_temperature".into()),
                ..ItemParams::default()
            }),
        ])
        .unwrap()
    }

    #[test]
    fn test_render_values() {
        let registry = registry();
        let calculator = Calculator::new(registry.iter(), None);
        let values: Snapshot = [
            ("outside_temperature".to_string(), Some(185)),
            ("operating_mode".to_string(), Some(2)),
            ("compressor_rating".to_string(), Some(21)),
            ("room_setpoint".to_string(), Some(215)),
        ]
        .into_iter()
        .collect();

        let views = render(&registry, &calculator, &values);
        assert_eq!(views.len(), 4);
        assert_eq!(views[0].value, Some(Presented::Number(18.5)));
        assert_eq!(views[0].unit.as_deref(), Some("°C"));
        assert!(views[0].bounds.is_none());
        assert_eq!(views[1].value, Some(Presented::Label("heating".into())));
        assert_eq!(views[2].value, Some(Presented::Number(42.0)));
        assert_eq!(views[3].value, Some(Presented::Number(21.5)));
        assert_eq!(
            views[3].bounds,
            Some(Bounds {
                min: Some(18.5),
                max: Some(30.0)
            })
        );
    }

    #[test]
    fn test_render_skips_absent_keys() {
        let registry = registry();
        let calculator = Calculator::new(registry.iter(), None);
        let values: Snapshot = [("operating_mode".to_string(), None)].into_iter().collect();

        let views = render(&registry, &calculator, &values);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].value, None);
    }
}
