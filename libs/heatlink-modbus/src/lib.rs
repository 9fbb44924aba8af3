//! Heat pump Modbus link
//!
//! Protocol and transport layer for polling a heat pump controller over
//! Modbus TCP.
//!
//! # Architecture
//!
//! - `connection` - `ModbusTransport` trait, TCP transport, and the
//!   `ConnectionManager` owning reconnect/backoff policy
//! - `register` - per-item read/write with value validation
//! - `items` - immutable item descriptors and the `ItemRegistry`
//! - `pdu` / `transport` - wire subset (FC03, FC04, FC06 over MBAP)
//! - `simulator` - in-memory device for tests (`simulator` feature)

pub mod connection;
pub mod constants;
pub mod error;
pub mod items;
pub mod pdu;
pub mod register;
#[cfg(feature = "simulator")]
pub mod simulator;
pub mod transport;

pub use connection::{
    backoff_for, ConnectionManager, ConnectionParams, ConnectionStats, ModbusTransport,
    TcpTransport,
};
pub use error::{ModbusError, Result};
pub use items::{
    DataFormat, ItemParams, ItemRegistry, ModbusItem, PointKind, RegisterClass, StatusItem,
    SubDevice,
};
pub use register::{decode, encode, PointState, Reading, RegisterObject};
#[cfg(feature = "simulator")]
pub use simulator::ModbusSimulator;
