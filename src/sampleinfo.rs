use std::time::SystemTime;

use enumflags2::BitFlags;

use crate::dynamic::InstanceHandle;
use crate::participant::EndpointId;

/// DDS spec 2.2.2.5.4
/// "Read" indicates whether or not the corresponding data sample has already
/// been read.
#[derive(BitFlags, Debug, Copy, Clone, PartialEq)]
#[repr(u32)] // IDL defines these as "unsigned long", so u32
pub enum SampleState {
  Read = 0b0001,
  NotRead = 0b0010,
}

impl SampleState {
  /// Set that contains all possible states
  pub fn any() -> BitFlags<Self> {
    BitFlags::<Self>::all()
  }
}

/// DDS spec 2.2.2.5.1.8
#[derive(BitFlags, Debug, Copy, Clone, PartialEq)]
#[repr(u32)]
pub enum ViewState {
  /// Indicates that either this is the first time that the DataReader has
  /// ever accessed samples of that instance, or else the instance has been
  /// reborn (become not-alive and then alive again) since the last access.
  New = 0b0001,
  /// Indicates that the DataReader has already accessed samples of the same
  /// instance and that the instance has not been reborn since.
  NotNew = 0b0010,
}

impl ViewState {
  /// Set that contains all possible states
  pub fn any() -> BitFlags<Self> {
    BitFlags::<Self>::all()
  }
}

#[derive(BitFlags, Debug, Copy, Clone, PartialEq)]
#[repr(u32)]
pub enum InstanceState {
  Alive = 0b0001,
  /// A DataWriter has actively disposed this instance
  NotAliveDisposed = 0b0010,
  /// There are no writers alive.
  NotAliveNoWriters = 0b0100,
}

impl InstanceState {
  /// Set that contains all possible states
  pub fn any() -> BitFlags<Self> {
    BitFlags::<Self>::all()
  }
  /// Set that contains both not_alive states.
  pub fn not_alive() -> BitFlags<Self> {
    InstanceState::NotAliveDisposed | InstanceState::NotAliveNoWriters
  }
}

/// DDS SampleInfo
///
/// Metadata attached to every sample a reader hands out. The generation
/// counts are snapshots of the reader's per-instance counters at the time the
/// sample was delivered; they increase each time the instance transitions
/// from a not-alive state back to alive.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInfo {
  pub(crate) sample_state: SampleState,
  pub(crate) view_state: ViewState,
  pub(crate) instance_state: InstanceState,
  pub(crate) disposed_generation_count: i32,
  pub(crate) no_writers_generation_count: i32,
  pub(crate) instance_handle: InstanceHandle,
  pub(crate) publication_handle: EndpointId,
  pub(crate) source_timestamp: SystemTime,
}

impl SampleInfo {
  pub fn sample_state(&self) -> SampleState {
    self.sample_state
  }

  pub fn view_state(&self) -> ViewState {
    self.view_state
  }

  pub fn instance_state(&self) -> InstanceState {
    self.instance_state
  }

  pub fn disposed_generation_count(&self) -> i32 {
    self.disposed_generation_count
  }

  pub fn no_writers_generation_count(&self) -> i32 {
    self.no_writers_generation_count
  }

  pub fn instance_handle(&self) -> InstanceHandle {
    self.instance_handle
  }

  /// Identifies the DataWriter that produced this sample or notification.
  pub fn publication_handle(&self) -> EndpointId {
    self.publication_handle
  }

  pub fn source_timestamp(&self) -> SystemTime {
    self.source_timestamp
  }
}
