//! Restricted formula evaluator for calculated sensors
//!
//! A formula sees only:
//! - `val_0` - the point's own value (raw / divider)
//! - `val_1` .. `val_8` - raw values of the items bound in the params
//! - `power(x, y)` - characteristic map lookup, when a map is supplied
//!
//! Arithmetic, comparison and logic follow evalexpr semantics.

use std::sync::Arc;

use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value,
};

use crate::error::{CalcError, Result};

/// Name of the characteristic map function inside formulas
pub const POWER_FUNCTION: &str = "power";

/// Number of `val_N` bindings besides `val_0`
pub const MAX_BOUND_VALUES: usize = 8;

/// Characteristic map of the heat pump (output power over two inputs)
pub trait PowerMap: Send + Sync {
    fn map(&self, x: f64, y: f64) -> f64;
}

/// Values a formula is evaluated with
#[derive(Clone, Default)]
pub struct FormulaInputs {
    pub val_0: f64,
    /// `val_1..val_8`, `None` when the bound item has no value
    pub bound: [Option<f64>; MAX_BOUND_VALUES],
    pub power: Option<Arc<dyn PowerMap>>,
}

impl FormulaInputs {
    pub fn new(val_0: f64) -> Self {
        Self {
            val_0,
            ..Self::default()
        }
    }

    /// Bind `val_<index>` (1-based)
    pub fn bind(mut self, index: usize, value: Option<f64>) -> Self {
        if let Some(slot) = index.checked_sub(1).and_then(|i| self.bound.get_mut(i)) {
            *slot = value;
        }
        self
    }

    pub fn with_power(mut self, power: Option<Arc<dyn PowerMap>>) -> Self {
        self.power = power;
        self
    }
}

/// Compiled formula
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    tree: Node,
}

impl Formula {
    /// Parse once, evaluate many times
    pub fn compile(source: &str) -> Result<Self> {
        let tree = evalexpr::build_operator_tree(source)
            .map_err(|e| CalcError::expression(format!("Failed to parse '{}': {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            tree,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn uses_power(&self) -> bool {
        self.tree
            .iter_function_identifiers()
            .any(|id| id == POWER_FUNCTION)
    }

    pub fn evaluate(&self, inputs: &FormulaInputs) -> Result<f64> {
        let mut context = HashMapContext::new();

        set_variable(&mut context, "val_0", inputs.val_0)?;
        for (i, value) in inputs.bound.iter().enumerate() {
            if let Some(v) = value {
                set_variable(&mut context, &format!("val_{}", i + 1), *v)?;
            }
        }

        if let Some(power) = inputs.power.clone() {
            context
                .set_function(
                    POWER_FUNCTION.to_string(),
                    Function::new(move |args| {
                        let tuple = args.as_fixed_len_tuple(2)?;
                        let x = to_f64(&tuple[0])?;
                        let y = to_f64(&tuple[1])?;
                        Ok(Value::Float(power.map(x, y)))
                    }),
                )
                .map_err(|e| CalcError::function(format!("Failed to register power: {}", e)))?;
        }

        let value = self
            .tree
            .eval_with_context(&context)
            .map_err(|e| self.map_eval_error(e))?;

        let result = value_to_f64(value, &self.source)?;
        if !result.is_finite() {
            return Err(CalcError::expression(format!(
                "Non-finite result for '{}'",
                self.source
            )));
        }
        Ok(result)
    }

    fn map_eval_error(&self, err: EvalexprError) -> CalcError {
        match err {
            EvalexprError::VariableIdentifierNotFound(name) => CalcError::variable_not_found(name),
            EvalexprError::FunctionIdentifierNotFound(name) => {
                CalcError::function(format!("Unknown function '{}' in '{}'", name, self.source))
            },
            other => CalcError::expression(format!(
                "Failed to evaluate '{}': {}",
                self.source, other
            )),
        }
    }
}

fn set_variable(context: &mut HashMapContext, name: &str, value: f64) -> Result<()> {
    context
        .set_value(name.to_string(), Value::Float(value))
        .map_err(|e| CalcError::expression(format!("Failed to set variable {}: {}", name, e)))
}

fn to_f64(value: &Value) -> std::result::Result<f64, EvalexprError> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        _ => Err(EvalexprError::expected_number(value.clone())),
    }
}

fn value_to_f64(value: Value, formula: &str) -> Result<f64> {
    match value {
        Value::Float(f) => Ok(f),
        Value::Int(i) => Ok(i as f64),
        Value::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
        _ => Err(CalcError::expression(format!(
            "Expression did not evaluate to a number: {}",
            formula
        ))),
    }
}

/// Round to a number of decimal places
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(15) as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    struct LinearMap;

    impl PowerMap for LinearMap {
        fn map(&self, x: f64, y: f64) -> f64 {
            x * 100.0 + y
        }
    }

    #[test]
    fn test_own_value() {
        let formula = Formula::compile("val_0 * 2").unwrap();
        assert_eq!(formula.evaluate(&FormulaInputs::new(21.5)).unwrap(), 43.0);
    }

    #[test]
    fn test_bound_values() {
        let formula = Formula::compile("(val_1 - val_2) / 10").unwrap();
        let inputs = FormulaInputs::new(0.0)
            .bind(1, Some(350.0))
            .bind(2, Some(300.0));
        assert_eq!(formula.evaluate(&inputs).unwrap(), 5.0);
    }

    #[test]
    fn test_missing_bound_value() {
        let formula = Formula::compile("val_0 + val_3").unwrap();
        let err = formula.evaluate(&FormulaInputs::new(1.0)).unwrap_err();
        assert_eq!(err, CalcError::VariableNotFound("val_3".into()));
    }

    #[test]
    fn test_out_of_range_binding_ignored() {
        let inputs = FormulaInputs::new(0.0).bind(0, Some(1.0)).bind(9, Some(1.0));
        assert!(inputs.bound.iter().all(Option::is_none));
    }

    #[test]
    fn test_division_by_zero_is_error() {
        let formula = Formula::compile("val_0 / val_1").unwrap();
        let inputs = FormulaInputs::new(5.0).bind(1, Some(0.0));
        assert!(formula.evaluate(&inputs).is_err());

        let formula = Formula::compile("1 / 0").unwrap();
        assert!(formula.evaluate(&FormulaInputs::new(0.0)).is_err());
    }

    #[test]
    fn test_power_requires_map() {
        let formula = Formula::compile("power(val_1, val_0)").unwrap();
        assert!(formula.uses_power());

        let inputs = FormulaInputs::new(35.0).bind(1, Some(2.0));
        assert!(matches!(
            formula.evaluate(&inputs),
            Err(CalcError::Function(_))
        ));

        let inputs = inputs.with_power(Some(Arc::new(LinearMap)));
        assert_eq!(formula.evaluate(&inputs).unwrap(), 235.0);
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            Formula::compile("val_0 * (2"),
            Err(CalcError::Expression(_))
        ));
    }

    #[test]
    fn test_non_numeric_result() {
        let formula = Formula::compile("\"text\"").unwrap();
        assert!(formula.evaluate(&FormulaInputs::new(0.0)).is_err());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.235, 0), 1.0);
        assert_eq!(round_to(-24.66, 1), -24.7);
    }
}
