//! Value presentation
//!
//! Turns decoded register values into what consumers display, and user input
//! back into register values for writes.

use std::fmt;

use heatlink_modbus::{DataFormat, ModbusItem};
use serde::Serialize;

use crate::error::{CalcError, Result};

/// Displayable value of a point
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Presented {
    Number(f64),
    /// Translation key of a status code
    Label(String),
}

impl fmt::Display for Presented {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presented::Number(v) => write!(f, "{}", v),
            Presented::Label(s) => f.write_str(s),
        }
    }
}

/// Label used for codes missing from the status table
pub fn unknown_label(number: i32) -> String {
    format!("unknown <{}>", number)
}

/// Display value for a decoded register value
pub fn present(item: &ModbusItem, value: Option<i32>) -> Option<Presented> {
    let raw = value?;
    match item.format {
        DataFormat::Status => Some(Presented::Label(
            item.translation_key_for(raw)
                .map(str::to_string)
                .unwrap_or_else(|| unknown_label(raw)),
        )),
        _ => Some(Presented::Number(
            f64::from(raw) / item.params.divider_f64(),
        )),
    }
}

/// Register value for user input, the inverse of [`present`]
///
/// Status items take a translation key (or the status text); numeric items a
/// number that is multiplied by the divider and truncated.
pub fn encode_input(item: &ModbusItem, input: &str) -> Result<i32> {
    let input = input.trim();
    match item.format {
        DataFormat::Status => item
            .number_for_translation_key(input)
            .or_else(|| item.number_for_text(input))
            .or_else(|| input.parse::<i32>().ok().filter(|n| item.text_for(*n).is_some()))
            .ok_or_else(|| {
                CalcError::invalid_input(format!("'{}' is not an option of {}", input, item.id))
            }),
        _ => {
            let number: f64 = input.parse().map_err(|_| {
                CalcError::invalid_input(format!("'{}' is not a number for {}", input, item.id))
            })?;
            let scaled = (number * item.params.divider_f64()).trunc();
            if !scaled.is_finite() || scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX)
            {
                return Err(CalcError::invalid_input(format!(
                    "'{}' out of range for {}",
                    input, item.id
                )));
            }
            Ok(scaled as i32)
        },
    }
}
