//! Item catalog loading
//!
//! The catalog is a YAML document with an `items` list of descriptors:
//!
//! ```yaml
//! items:
//!   - address: 30001
//!     id: outside_temperature
//!     name: Aussentemperatur
//!     format: temperature
//!     kind: sensor
//!     device: system
//!     params: { unit: "°C", divider: 10, precision: 1 }
//! ```

use std::path::Path;

use heatlink_modbus::{ItemRegistry, ModbusItem};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, ServiceError};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: Vec<ModbusItem>,
}

/// Parse a catalog document
pub fn parse_catalog(content: &str) -> Result<ItemRegistry> {
    let file: CatalogFile = serde_yaml::from_str(content)
        .map_err(|e| ServiceError::catalog(format!("Invalid catalog: {}", e)))?;

    let registry =
        ItemRegistry::new(file.items).map_err(|e| ServiceError::catalog(e.to_string()))?;
    check_references(&registry)?;
    Ok(registry)
}

/// Load a catalog file
pub fn load_catalog(path: &Path) -> Result<ItemRegistry> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ServiceError::catalog(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let registry = parse_catalog(&content)?;
    debug!("Catalog: {} items from {}", registry.len(), path.display());
    Ok(registry)
}

/// Every identifier referenced from params must exist in the registry
fn check_references(registry: &ItemRegistry) -> Result<()> {
    for item in registry.iter() {
        let params = &item.params;
        let references = params
            .formula_refs()
            .map(|(_, id)| id)
            .chain(params.dynamic_min.as_deref())
            .chain(params.dynamic_max.as_deref());

        for reference in references {
            if registry.by_id(reference).is_none() {
                return Err(ServiceError::catalog(format!(
                    "{} references unknown item {}",
                    item.id, reference
                )));
            }
        }
    }
    Ok(())
}
