//! Heat pump value calculation
//!
//! - Presentation of decoded register values (divider scaling, status labels)
//!   and the inverse translation of user input for writes
//! - Min/max bounds including dynamic references to other points
//! - Restricted formula evaluation for calculated sensors (`val_0..val_8`,
//!   `power(x, y)`)

pub mod bounds;
pub mod calculator;
pub mod error;
pub mod formula;
pub mod present;

pub use bounds::Bounds;
pub use calculator::Calculator;
pub use error::{CalcError, Result};
pub use formula::{round_to, Formula, FormulaInputs, PowerMap};
pub use present::{encode_input, present, Presented};
