//! Sample type descriptions and the type/key registry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::dynamic::{DynamicData, KeyValue};
use crate::error::{Error, Result};

/// Declared type of a single sample field.
///
/// Enumerated types of an external type definition (e.g. station or status
/// kinds) are carried as `Text` or `Int32` ordinals; the core does not model
/// enumeration constants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
  Boolean,
  Int32,
  UInt32,
  Int64,
  Float64,
  Text,
}

/// One field of a [`TypeDescriptor`]: name, declared type, key membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
  pub name: String,
  pub field_type: FieldType,
  pub is_key: bool,
}

/// Describes a sample schema: an ordered list of fields, some of which are
/// designated key fields.
///
/// Key fields determine instance identity and are immutable for the lifetime
/// of an instance. A descriptor with no key fields describes a keyless topic:
/// all of its samples belong to one instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
  type_name: String,
  fields: Vec<FieldSpec>,
}

impl TypeDescriptor {
  pub fn builder(type_name: &str) -> TypeDescriptorBuilder {
    TypeDescriptorBuilder {
      type_name: type_name.to_string(),
      fields: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.type_name
  }

  pub fn fields(&self) -> &[FieldSpec] {
    &self.fields
  }

  pub fn field(&self, name: &str) -> Option<&FieldSpec> {
    self.fields.iter().find(|f| f.name == name)
  }

  pub fn is_keyed(&self) -> bool {
    self.fields.iter().any(|f| f.is_key)
  }

  pub fn key_fields(&self) -> impl Iterator<Item = &FieldSpec> {
    self.fields.iter().filter(|f| f.is_key)
  }

  /// Validate a descriptor assembled from external configuration.
  ///
  /// A well-formed descriptor has at least one field, unique field names, and
  /// no floating-point key fields (floats make unreliable instance identity).
  pub fn validate(&self) -> Result<()> {
    if self.fields.is_empty() {
      return Error::schema(&format!("type \"{}\" has no fields", self.type_name));
    }
    if self.fields.iter().map(|f| &f.name).unique().count() != self.fields.len() {
      return Error::schema(&format!(
        "type \"{}\" has duplicate field names",
        self.type_name
      ));
    }
    for f in &self.fields {
      if f.is_key && f.field_type == FieldType::Float64 {
        return Error::schema(&format!(
          "key field \"{}\" of type \"{}\" may not be Float64",
          f.name, self.type_name
        ));
      }
    }
    Ok(())
  }

  /// Check a whole sample against this descriptor.
  ///
  /// Every declared field must be present with a value of the declared type,
  /// and the sample may not carry fields the descriptor does not declare.
  pub fn check_sample(&self, data: &DynamicData) -> Result<()> {
    if data.type_name() != self.type_name {
      return Error::schema(&format!(
        "sample of type \"{}\" written to a topic of type \"{}\"",
        data.type_name(),
        self.type_name
      ));
    }
    for f in &self.fields {
      match data.get(&f.name) {
        None => {
          return Error::schema(&format!(
            "sample is missing field \"{}\" of type \"{}\"",
            f.name, self.type_name
          ));
        }
        Some(value) => {
          if !value.matches(f.field_type) {
            return Error::schema(&format!(
              "field \"{}\" has value {:?}, expected {:?}",
              f.name, value, f.field_type
            ));
          }
        }
      }
    }
    if data.field_count() != self.fields.len() {
      let unknown = data
        .field_names()
        .filter(|n| self.field(n.as_str()).is_none())
        .join(", ");
      return Error::schema(&format!(
        "sample carries fields not in type \"{}\": {}",
        self.type_name, unknown
      ));
    }
    Ok(())
  }

  /// Project a sample onto this descriptor's key fields.
  ///
  /// The projection of a keyless descriptor is the empty key: every sample
  /// maps to the same instance.
  pub fn key_of(&self, data: &DynamicData) -> Result<KeyValue> {
    let mut key = Vec::new();
    for f in self.key_fields() {
      match data.get(&f.name) {
        Some(value) if value.matches(f.field_type) => {
          key.push((f.name.clone(), value.clone()));
        }
        Some(value) => {
          return Error::schema(&format!(
            "key field \"{}\" has value {:?}, expected {:?}",
            f.name, value, f.field_type
          ));
        }
        None => {
          return Error::schema(&format!("sample is missing key field \"{}\"", f.name));
        }
      }
    }
    Ok(KeyValue(key))
  }
}

/// Builder for [`TypeDescriptor`]
pub struct TypeDescriptorBuilder {
  type_name: String,
  fields: Vec<FieldSpec>,
}

impl TypeDescriptorBuilder {
  #[must_use]
  pub fn field(mut self, name: &str, field_type: FieldType) -> Self {
    self.fields.push(FieldSpec {
      name: name.to_string(),
      field_type,
      is_key: false,
    });
    self
  }

  #[must_use]
  pub fn key_field(mut self, name: &str, field_type: FieldType) -> Self {
    self.fields.push(FieldSpec {
      name: name.to_string(),
      field_type,
      is_key: true,
    });
    self
  }

  pub fn build(self) -> Result<TypeDescriptor> {
    let descriptor = TypeDescriptor {
      type_name: self.type_name,
      fields: self.fields,
    };
    descriptor.validate()?;
    Ok(descriptor)
  }
}

/// Identifier handed out by [`TypeRegistry::register`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(usize);

/// Registry of sample types known to a domain participant.
///
/// Type descriptors arrive from an external configuration loader as already
/// structured values; the registry performs no parsing, only bookkeeping and
/// key extraction.
pub struct TypeRegistry {
  inner: Mutex<RegistryInner>,
}

struct RegistryInner {
  by_id: Vec<Arc<TypeDescriptor>>,
  by_name: BTreeMap<String, TypeId>,
}

impl TypeRegistry {
  pub fn new() -> TypeRegistry {
    TypeRegistry {
      inner: Mutex::new(RegistryInner {
        by_id: Vec::new(),
        by_name: BTreeMap::new(),
      }),
    }
  }

  /// Register a descriptor. Re-registering an identical descriptor returns
  /// the existing id; the same name with a different shape is an error.
  pub fn register(&self, descriptor: TypeDescriptor) -> Result<TypeId> {
    descriptor.validate()?;
    let mut inner = self.inner.lock()?;
    if let Some(id) = inner.by_name.get(descriptor.name()) {
      let existing = &inner.by_id[id.0];
      if **existing == descriptor {
        return Ok(*id);
      }
      return Error::schema(&format!(
        "type \"{}\" is already registered with a different shape",
        descriptor.name()
      ));
    }
    let id = TypeId(inner.by_id.len());
    debug!("Registering type \"{}\" as {:?}", descriptor.name(), id);
    inner.by_name.insert(descriptor.name().to_string(), id);
    inner.by_id.push(Arc::new(descriptor));
    Ok(id)
  }

  pub fn get(&self, id: TypeId) -> Option<Arc<TypeDescriptor>> {
    self.inner.lock().ok()?.by_id.get(id.0).cloned()
  }

  pub fn lookup(&self, type_name: &str) -> Option<Arc<TypeDescriptor>> {
    let inner = self.inner.lock().ok()?;
    let id = inner.by_name.get(type_name)?;
    inner.by_id.get(id.0).cloned()
  }

  /// Extract the instance key of a sample according to a registered type.
  pub fn extract_key(&self, data: &DynamicData, id: TypeId) -> Result<KeyValue> {
    let descriptor = match self.get(id) {
      Some(d) => d,
      None => return Error::precondition_not_met("extract_key: unknown TypeId"),
    };
    descriptor.key_of(data)
  }

  pub fn compare_keys(&self, a: &KeyValue, b: &KeyValue) -> bool {
    a == b
  }
}

impl Default for TypeRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lot_state_type() -> TypeDescriptor {
    TypeDescriptor::builder("ChocolateLotState")
      .key_field("lot_id", FieldType::UInt32)
      .field("station", FieldType::Text)
      .field("lot_status", FieldType::Text)
      .build()
      .unwrap()
  }

  #[test]
  fn builder_rejects_empty_and_duplicates() {
    assert!(TypeDescriptor::builder("Empty").build().is_err());
    assert!(TypeDescriptor::builder("Dup")
      .field("a", FieldType::Int32)
      .field("a", FieldType::Text)
      .build()
      .is_err());
    assert!(TypeDescriptor::builder("FloatKey")
      .key_field("x", FieldType::Float64)
      .build()
      .is_err());
  }

  #[test]
  fn check_sample_catches_missing_extra_and_mistyped_fields() {
    let desc = lot_state_type();

    let mut ok = DynamicData::new("ChocolateLotState");
    ok.set("lot_id", 7u32)
      .set("station", "TEMPERING_CONTROLLER")
      .set("lot_status", "PROCESSING");
    assert!(desc.check_sample(&ok).is_ok());

    let mut missing = DynamicData::new("ChocolateLotState");
    missing.set("lot_id", 7u32).set("station", "X");
    assert!(desc.check_sample(&missing).is_err());

    let mut extra = ok.clone();
    extra.set("bogus", 1i32);
    assert!(desc.check_sample(&extra).is_err());

    let mut mistyped = ok.clone();
    mistyped.set("lot_id", "seven");
    assert!(desc.check_sample(&mistyped).is_err());
  }

  #[test]
  fn key_projection_follows_descriptor() {
    let desc = lot_state_type();
    let mut data = DynamicData::new("ChocolateLotState");
    data
      .set("lot_id", 42u32)
      .set("station", "COCOA_BUTTER_CONTROLLER")
      .set("lot_status", "WAITING");

    let key = desc.key_of(&data).unwrap();
    assert_eq!(key.fields().len(), 1);
    assert_eq!(key.get("lot_id"), data.get("lot_id"));
  }

  #[test]
  fn registry_enforces_name_shape_agreement() {
    let registry = TypeRegistry::new();
    let id = registry.register(lot_state_type()).unwrap();
    // identical re-registration is fine and returns the same id
    assert_eq!(registry.register(lot_state_type()).unwrap(), id);

    let different = TypeDescriptor::builder("ChocolateLotState")
      .key_field("lot_id", FieldType::Int64)
      .build()
      .unwrap();
    assert!(registry.register(different).is_err());
  }

  #[test]
  fn registry_extracts_keys() {
    let registry = TypeRegistry::new();
    let id = registry.register(lot_state_type()).unwrap();

    let mut a = DynamicData::new("ChocolateLotState");
    a.set("lot_id", 1u32).set("station", "s").set("lot_status", "w");
    let mut b = DynamicData::new("ChocolateLotState");
    b.set("lot_id", 1u32).set("station", "t").set("lot_status", "p");

    let ka = registry.extract_key(&a, id).unwrap();
    let kb = registry.extract_key(&b, id).unwrap();
    assert!(registry.compare_keys(&ka, &kb));
  }
}
