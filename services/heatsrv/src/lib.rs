//! heatsrv - heat pump polling service
//!
//! Keeps one Modbus TCP connection to the heat pump controller, polls the
//! item catalog on a fixed interval and publishes each cycle's values.
//!
//! # Modules
//!
//! - `config` - figment-based configuration (file + `HEATSRV_` env)
//! - `catalog` - YAML item catalog loading
//! - `coordinator` - poll cycle, point state table, snapshot publication
//! - `view` - presentation of point values for consumers
//! - `cli` - command line entry points
//! - `logging` / `shutdown` - process plumbing

pub mod catalog;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod shutdown;
pub mod view;

pub use catalog::{load_catalog, parse_catalog};
pub use config::ServiceConfig;
pub use coordinator::{Coordinator, Snapshot};
pub use error::{Result, ServiceError};
pub use view::{render, render_point, PointView};
