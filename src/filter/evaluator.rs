//! Filter expression evaluation against dynamic sample data.

use std::cmp::Ordering;

use super::parser::{Expression, Operand, RelOp};
use super::FilterError;
use crate::dynamic::{DynamicData, FieldValue};

pub(super) fn evaluate(
  expression: &Expression,
  data: &DynamicData,
  params: &[String],
) -> Result<bool, FilterError> {
  match expression {
    Expression::Compare { left, op, right } => {
      let l = resolve(left, data, params)?;
      let r = resolve(right, data, params)?;
      let ordering = compare(&l, &r)?;
      Ok(match op {
        RelOp::Gt => ordering == Ordering::Greater,
        RelOp::Lt => ordering == Ordering::Less,
        RelOp::Ge => ordering != Ordering::Less,
        RelOp::Le => ordering != Ordering::Greater,
        RelOp::Eq => ordering == Ordering::Equal,
        RelOp::Ne => ordering != Ordering::Equal,
      })
    }
    Expression::And(left, right) => {
      // short-circuit
      if !evaluate(left, data, params)? {
        return Ok(false);
      }
      evaluate(right, data, params)
    }
    Expression::Or(left, right) => {
      if evaluate(left, data, params)? {
        return Ok(true);
      }
      evaluate(right, data, params)
    }
    Expression::Not(inner) => Ok(!evaluate(inner, data, params)?),
  }
}

fn resolve(
  operand: &Operand,
  data: &DynamicData,
  params: &[String],
) -> Result<FieldValue, FilterError> {
  match operand {
    Operand::Field(name) => match data.get(name) {
      Some(value) => Ok(value.clone()),
      None => Err(FilterError::UnknownField {
        field: name.clone(),
      }),
    },
    Operand::Parameter(index) => {
      let raw = params.get(*index).ok_or(FilterError::ParameterOutOfRange {
        index: *index,
      })?;
      Ok(parse_parameter(raw))
    }
    Operand::Integer(i) => Ok(FieldValue::Int64(*i)),
    Operand::Float(x) => Ok(FieldValue::Float64(*x)),
    Operand::Text(s) => Ok(FieldValue::Text(s.clone())),
    Operand::Boolean(b) => Ok(FieldValue::Boolean(*b)),
  }
}

// Parameters arrive as strings (the convention of filter APIs and XML QoS
// profiles). Interpret numerically when possible, then boolean, then text.
fn parse_parameter(raw: &str) -> FieldValue {
  if let Ok(i) = raw.parse::<i64>() {
    return FieldValue::Int64(i);
  }
  if let Ok(x) = raw.parse::<f64>() {
    return FieldValue::Float64(x);
  }
  if raw.eq_ignore_ascii_case("true") {
    return FieldValue::Boolean(true);
  }
  if raw.eq_ignore_ascii_case("false") {
    return FieldValue::Boolean(false);
  }
  FieldValue::Text(raw.to_string())
}

// Cross-width numeric comparison: any two numeric values compare through
// i128 when both are integral, through f64 otherwise. Text compares to text,
// boolean to boolean; anything else is a type mismatch.
fn compare(left: &FieldValue, right: &FieldValue) -> Result<Ordering, FilterError> {
  use FieldValue::*;

  fn as_int(v: &FieldValue) -> Option<i128> {
    match v {
      Int32(i) => Some(*i as i128),
      UInt32(u) => Some(*u as i128),
      Int64(i) => Some(*i as i128),
      _ => None,
    }
  }

  fn as_float(v: &FieldValue) -> Option<f64> {
    match v {
      Int32(i) => Some(*i as f64),
      UInt32(u) => Some(*u as f64),
      Int64(i) => Some(*i as f64),
      Float64(x) => Some(*x),
      _ => None,
    }
  }

  match (left, right) {
    (Text(a), Text(b)) => Ok(a.cmp(b)),
    (Boolean(a), Boolean(b)) => Ok(a.cmp(b)),
    _ => {
      if let (Some(a), Some(b)) = (as_int(left), as_int(right)) {
        return Ok(a.cmp(&b));
      }
      match (as_float(left), as_float(right)) {
        (Some(a), Some(b)) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
        _ => Err(FilterError::TypeMismatch {
          reason: format!("cannot compare {:?} with {:?}", left, right),
        }),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::super::parser::parse;
  use super::*;

  fn sample() -> DynamicData {
    let mut d = DynamicData::new("ChocolateLotState");
    d.set("lot_id", 12u32)
      .set("station", "TEMPERING_CONTROLLER")
      .set("temperature", 30.5f64)
      .set("done", false);
    d
  }

  fn eval(expr: &str, params: &[&str]) -> Result<bool, FilterError> {
    let e = parse(expr).unwrap();
    let p: Vec<String> = params.iter().map(|s| s.to_string()).collect();
    evaluate(&e, &sample(), &p)
  }

  #[test]
  fn numeric_comparisons_cross_widths() {
    // u32 field against i64 literal
    assert_eq!(eval("lot_id >= 12", &[]), Ok(true));
    assert_eq!(eval("lot_id < 12", &[]), Ok(false));
    // f64 field against integer literal
    assert_eq!(eval("temperature > 30", &[]), Ok(true));
    // integer field against float parameter
    assert_eq!(eval("lot_id < %0", &["12.5"]), Ok(true));
  }

  #[test]
  fn text_and_boolean_comparisons() {
    assert_eq!(eval("station = 'TEMPERING_CONTROLLER'", &[]), Ok(true));
    assert_eq!(eval("station <> 'INVALID_CONTROLLER'", &[]), Ok(true));
    assert_eq!(eval("done = FALSE", &[]), Ok(true));
  }

  #[test]
  fn type_mismatch_reported() {
    assert!(matches!(
      eval("station > 3", &[]),
      Err(FilterError::TypeMismatch { .. })
    ));
  }

  #[test]
  fn short_circuit_skips_bad_right_side() {
    // right side references an unknown field but is never evaluated
    assert_eq!(eval("lot_id = 12 or nonexistent = 1", &[]), Ok(true));
    assert_eq!(eval("lot_id = 99 and nonexistent = 1", &[]), Ok(false));
  }
}
