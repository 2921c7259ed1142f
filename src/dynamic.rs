//! Dynamically typed sample data.
//!
//! Samples are records of named, tagged field values, validated against a
//! [`TypeDescriptor`](crate::typedesc::TypeDescriptor) when they enter a
//! writer. This replaces reflective set-value-by-name APIs with a checked
//! tagged variant: a field write cannot silently change a field's type.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::typedesc::FieldType;

/// A single field value of a dynamic sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FieldValue {
  Boolean(bool),
  Int32(i32),
  UInt32(u32),
  Int64(i64),
  Float64(f64),
  Text(String),
}

impl FieldValue {
  /// Does this value inhabit the given declared field type?
  pub fn matches(&self, field_type: FieldType) -> bool {
    matches!(
      (self, field_type),
      (FieldValue::Boolean(_), FieldType::Boolean)
        | (FieldValue::Int32(_), FieldType::Int32)
        | (FieldValue::UInt32(_), FieldType::UInt32)
        | (FieldValue::Int64(_), FieldType::Int64)
        | (FieldValue::Float64(_), FieldType::Float64)
        | (FieldValue::Text(_), FieldType::Text)
    )
  }

  fn variant_rank(&self) -> u8 {
    match self {
      FieldValue::Boolean(_) => 0,
      FieldValue::Int32(_) => 1,
      FieldValue::UInt32(_) => 2,
      FieldValue::Int64(_) => 3,
      FieldValue::Float64(_) => 4,
      FieldValue::Text(_) => 5,
    }
  }

  // Append a self-delimiting encoding of this value. Used for instance handle
  // hashing, so it must be deterministic and injective per value.
  fn encode_to(&self, buf: &mut Vec<u8>) {
    buf.push(self.variant_rank());
    match self {
      FieldValue::Boolean(b) => buf.push(*b as u8),
      FieldValue::Int32(i) => buf.write_i32::<LittleEndian>(*i).unwrap_or(()),
      FieldValue::UInt32(u) => buf.write_u32::<LittleEndian>(*u).unwrap_or(()),
      FieldValue::Int64(i) => buf.write_i64::<LittleEndian>(*i).unwrap_or(()),
      FieldValue::Float64(x) => buf.write_u64::<LittleEndian>(x.to_bits()).unwrap_or(()),
      FieldValue::Text(s) => {
        buf
          .write_u32::<LittleEndian>(s.len() as u32)
          .unwrap_or(());
        buf.extend_from_slice(s.as_bytes());
      }
    }
  }
}

// Eq/Ord/Hash are needed so key projections can serve as map keys.
// Float64 compares and hashes by bit pattern: key fields are not allowed to
// be floats (see TypeDescriptor validation), so the bit-pattern total order
// never surfaces in instance identity.
impl PartialEq for FieldValue {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for FieldValue {}

impl Ord for FieldValue {
  fn cmp(&self, other: &Self) -> Ordering {
    use FieldValue::*;
    match (self, other) {
      (Boolean(a), Boolean(b)) => a.cmp(b),
      (Int32(a), Int32(b)) => a.cmp(b),
      (UInt32(a), UInt32(b)) => a.cmp(b),
      (Int64(a), Int64(b)) => a.cmp(b),
      (Float64(a), Float64(b)) => a.to_bits().cmp(&b.to_bits()),
      (Text(a), Text(b)) => a.cmp(b),
      (a, b) => a.variant_rank().cmp(&b.variant_rank()),
    }
  }
}

impl PartialOrd for FieldValue {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Hash for FieldValue {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.variant_rank().hash(state);
    match self {
      FieldValue::Boolean(b) => b.hash(state),
      FieldValue::Int32(i) => i.hash(state),
      FieldValue::UInt32(u) => u.hash(state),
      FieldValue::Int64(i) => i.hash(state),
      FieldValue::Float64(x) => x.to_bits().hash(state),
      FieldValue::Text(s) => s.hash(state),
    }
  }
}

impl fmt::Display for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldValue::Boolean(b) => write!(f, "{}", b),
      FieldValue::Int32(i) => write!(f, "{}", i),
      FieldValue::UInt32(u) => write!(f, "{}", u),
      FieldValue::Int64(i) => write!(f, "{}", i),
      FieldValue::Float64(x) => write!(f, "{}", x),
      FieldValue::Text(s) => write!(f, "{}", s),
    }
  }
}

impl From<bool> for FieldValue {
  fn from(v: bool) -> FieldValue {
    FieldValue::Boolean(v)
  }
}
impl From<i32> for FieldValue {
  fn from(v: i32) -> FieldValue {
    FieldValue::Int32(v)
  }
}
impl From<u32> for FieldValue {
  fn from(v: u32) -> FieldValue {
    FieldValue::UInt32(v)
  }
}
impl From<i64> for FieldValue {
  fn from(v: i64) -> FieldValue {
    FieldValue::Int64(v)
  }
}
impl From<f64> for FieldValue {
  fn from(v: f64) -> FieldValue {
    FieldValue::Float64(v)
  }
}
impl From<&str> for FieldValue {
  fn from(v: &str) -> FieldValue {
    FieldValue::Text(v.to_string())
  }
}
impl From<String> for FieldValue {
  fn from(v: String) -> FieldValue {
    FieldValue::Text(v)
  }
}

/// A dynamically typed data sample: named field values under a type name.
///
/// Field writes are unchecked until the sample reaches a
/// [`DataWriter`](crate::writer::DataWriter), which validates the whole
/// record against the topic's descriptor in one pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicData {
  type_name: String,
  fields: BTreeMap<String, FieldValue>,
}

impl DynamicData {
  pub fn new(type_name: &str) -> DynamicData {
    DynamicData {
      type_name: type_name.to_string(),
      fields: BTreeMap::new(),
    }
  }

  pub fn type_name(&self) -> &str {
    &self.type_name
  }

  /// Set a field value. Returns `&mut self` so calls can be chained.
  pub fn set<V: Into<FieldValue>>(&mut self, field: &str, value: V) -> &mut DynamicData {
    self.fields.insert(field.to_string(), value.into());
    self
  }

  pub fn get(&self, field: &str) -> Option<&FieldValue> {
    self.fields.get(field)
  }

  pub fn get_i32(&self, field: &str) -> Option<i32> {
    match self.fields.get(field) {
      Some(FieldValue::Int32(i)) => Some(*i),
      _ => None,
    }
  }

  pub fn get_u32(&self, field: &str) -> Option<u32> {
    match self.fields.get(field) {
      Some(FieldValue::UInt32(u)) => Some(*u),
      _ => None,
    }
  }

  pub fn get_i64(&self, field: &str) -> Option<i64> {
    match self.fields.get(field) {
      Some(FieldValue::Int64(i)) => Some(*i),
      _ => None,
    }
  }

  pub fn get_f64(&self, field: &str) -> Option<f64> {
    match self.fields.get(field) {
      Some(FieldValue::Float64(x)) => Some(*x),
      _ => None,
    }
  }

  pub fn get_bool(&self, field: &str) -> Option<bool> {
    match self.fields.get(field) {
      Some(FieldValue::Boolean(b)) => Some(*b),
      _ => None,
    }
  }

  pub fn get_text(&self, field: &str) -> Option<&str> {
    match self.fields.get(field) {
      Some(FieldValue::Text(s)) => Some(s.as_str()),
      _ => None,
    }
  }

  pub fn field_count(&self) -> usize {
    self.fields.len()
  }

  pub(crate) fn field_names(&self) -> impl Iterator<Item = &String> {
    self.fields.keys()
  }
}

/// Projection of a sample onto its descriptor's key fields, in descriptor
/// order. Two samples on the same topic belong to the same instance iff their
/// key values are equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyValue(pub(crate) Vec<(String, FieldValue)>);

impl KeyValue {
  pub fn fields(&self) -> &[(String, FieldValue)] {
    &self.0
  }

  pub fn get(&self, field: &str) -> Option<&FieldValue> {
    self
      .0
      .iter()
      .find(|(name, _)| name == field)
      .map(|(_, v)| v)
  }

  /// Deterministic instance identity for this key value.
  pub fn instance_handle(&self) -> InstanceHandle {
    let mut buf = Vec::with_capacity(16);
    for (name, value) in &self.0 {
      buf
        .write_u32::<LittleEndian>(name.len() as u32)
        .unwrap_or(());
      buf.extend_from_slice(name.as_bytes());
      value.encode_to(&mut buf);
    }
    InstanceHandle::from_key_bytes(&buf)
  }
}

impl fmt::Display for KeyValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use itertools::Itertools;
    write!(
      f,
      "[{}]",
      self
        .0
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .join(", ")
    )
  }
}

/// Opaque identifier of an instance within one topic.
///
/// The handle is an md5 digest of the key value's byte encoding, so it is
/// stable for the lifetime of the instance and identical again if the same
/// key is written after a dispose (resurrection keeps the handle).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceHandle(u128);

impl InstanceHandle {
  pub const NIL: InstanceHandle = InstanceHandle(0);

  fn from_key_bytes(bytes: &[u8]) -> InstanceHandle {
    let digest = md5::compute(bytes);
    InstanceHandle(u128::from_le_bytes(digest.0))
  }
}

impl fmt::Display for InstanceHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:032x}", self.0)
  }
}
