//! Content filter expressions.
//!
//! A filter restricts which samples a specific reader receives. The dialect
//! is the SQL-like subset commonly passed to content-filtered topic creation,
//! e.g. `"degrees > %0 or degrees < %1"` with positional parameters supplied
//! separately:
//!
//! ```text
//! expression ::= expression OR expression
//!              | expression AND expression
//!              | NOT expression
//!              | '(' expression ')'
//!              | operand op operand
//! op         ::= '>' | '<' | '>=' | '<=' | '=' | '<>' | '!='
//! operand    ::= field_name | %digit+ | literal
//! ```
//!
//! Evaluation is side-effect-free and deterministic per sample. Parameters
//! may be replaced at runtime without re-parsing the expression.

mod evaluator;
mod parser;

pub use parser::{Expression, Operand, RelOp};

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::dynamic::DynamicData;
use crate::error::Error;

/// Errors from filter parsing or evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
  Parse { reason: String },
  UnknownField { field: String },
  ParameterOutOfRange { index: usize },
  TypeMismatch { reason: String },
}

impl fmt::Display for FilterError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FilterError::Parse { reason } => write!(f, "filter parse error: {}", reason),
      FilterError::UnknownField { field } => write!(f, "filter references unknown field \"{}\"", field),
      FilterError::ParameterOutOfRange { index } => {
        write!(f, "filter parameter %{} not supplied", index)
      }
      FilterError::TypeMismatch { reason } => write!(f, "filter type mismatch: {}", reason),
    }
  }
}

impl From<FilterError> for Error {
  fn from(e: FilterError) -> Error {
    Error::BadParameter {
      reason: e.to_string(),
    }
  }
}

/// A parsed, parameterizable content filter.
///
/// Cloning is cheap; clones share the expression and the parameter list, so
/// `set_parameters` on any clone affects subsequent evaluations everywhere —
/// the behavior content-filtered topics need.
#[derive(Clone)]
pub struct ContentFilter {
  expression_str: String,
  expression: Arc<Expression>,
  parameters: Arc<RwLock<Vec<String>>>,
}

impl ContentFilter {
  /// Parse a filter expression with no parameters.
  pub fn new(expression: &str) -> Result<ContentFilter, FilterError> {
    Self::with_parameters(expression, &[])
  }

  /// Parse a filter expression and supply its initial positional parameters.
  pub fn with_parameters(expression: &str, parameters: &[&str]) -> Result<ContentFilter, FilterError> {
    let parsed = parser::parse(expression)?;
    Ok(ContentFilter {
      expression_str: expression.to_string(),
      expression: Arc::new(parsed),
      parameters: Arc::new(RwLock::new(
        parameters.iter().map(|p| p.to_string()).collect(),
      )),
    })
  }

  pub fn expression(&self) -> &str {
    &self.expression_str
  }

  /// Replace the positional parameters. Takes effect on the next evaluation.
  pub fn set_parameters(&self, parameters: &[&str]) {
    if let Ok(mut guard) = self.parameters.write() {
      *guard = parameters.iter().map(|p| p.to_string()).collect();
    }
  }

  /// Evaluate this filter against one sample.
  pub fn matches(&self, data: &DynamicData) -> Result<bool, FilterError> {
    let params = self.parameters.read().map_err(|_| FilterError::TypeMismatch {
      reason: "parameter lock poisoned".to_string(),
    })?;
    evaluator::evaluate(&self.expression, data, &params)
  }
}

impl fmt::Debug for ContentFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ContentFilter({:?})", self.expression_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temperature(degrees: i32) -> DynamicData {
    let mut d = DynamicData::new("Temperature");
    d.set("sensor_id", "s1").set("degrees", degrees);
    d
  }

  #[test]
  fn out_of_range_predicate() {
    let filter = ContentFilter::with_parameters("degrees > %0 or degrees < %1", &["32", "30"])
      .unwrap();
    assert!(filter.matches(&temperature(35)).unwrap());
    assert!(filter.matches(&temperature(29)).unwrap());
    assert!(!filter.matches(&temperature(31)).unwrap());
  }

  #[test]
  fn parameters_can_change_at_runtime() {
    let filter = ContentFilter::with_parameters("degrees > %0", &["100"]).unwrap();
    assert!(!filter.matches(&temperature(50)).unwrap());
    filter.set_parameters(&["40"]);
    assert!(filter.matches(&temperature(50)).unwrap());
  }

  #[test]
  fn clones_share_parameters() {
    let filter = ContentFilter::with_parameters("degrees > %0", &["100"]).unwrap();
    let clone = filter.clone();
    filter.set_parameters(&["10"]);
    assert!(clone.matches(&temperature(50)).unwrap());
  }

  #[test]
  fn string_equality_and_logic() {
    let filter = ContentFilter::new("sensor_id = 's1' and not (degrees = 0)").unwrap();
    assert!(filter.matches(&temperature(3)).unwrap());
    assert!(!filter.matches(&temperature(0)).unwrap());
  }

  #[test]
  fn missing_parameter_is_an_error() {
    let filter = ContentFilter::new("degrees > %0").unwrap();
    assert_eq!(
      filter.matches(&temperature(1)),
      Err(FilterError::ParameterOutOfRange { index: 0 })
    );
  }

  #[test]
  fn unknown_field_is_an_error() {
    let filter = ContentFilter::new("pressure > 3").unwrap();
    assert!(matches!(
      filter.matches(&temperature(1)),
      Err(FilterError::UnknownField { .. })
    ));
  }
}
