use crate::dynamic::{DynamicData, KeyValue};
use crate::sampleinfo::SampleInfo;

/// The payload of one delivered sample.
///
/// This replaces the `valid_data` flag of the DDS spec: when there is no
/// valid data, the application cannot accidentally read any. A `Dispose`
/// carries only the instance's key fields, which is all a not-alive
/// notification represents.
#[derive(Clone, PartialEq, Debug)]
pub enum Sample {
  Value(DynamicData),
  Dispose(KeyValue),
}

impl Sample {
  pub fn value(&self) -> Option<&DynamicData> {
    match self {
      Sample::Value(d) => Some(d),
      Sample::Dispose(_) => None,
    }
  }

  pub fn into_value(self) -> Option<DynamicData> {
    match self {
      Sample::Value(d) => Some(d),
      Sample::Dispose(_) => None,
    }
  }

  pub fn is_valid_data(&self) -> bool {
    matches!(self, Sample::Value(_))
  }
}

/// A data sample and its associated [metadata](`SampleInfo`) received from a
/// topic.
#[derive(Clone, PartialEq, Debug)]
pub struct DataSample {
  pub(crate) sample_info: SampleInfo,
  pub(crate) value: Sample,
}

impl DataSample {
  pub(crate) fn new(sample_info: SampleInfo, value: Sample) -> Self {
    Self { sample_info, value }
  }

  pub fn value(&self) -> &Sample {
    &self.value
  }

  pub fn into_value(self) -> Sample {
    self.value
  }

  pub fn sample_info(&self) -> &SampleInfo {
    &self.sample_info
  }
}
