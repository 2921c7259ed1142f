//! Keyed instance lifecycle tracking on the writer side.
//!
//! Each DataWriter owns one [`InstanceTracker`]. The tracker decides, for
//! every writer operation, whether a lifecycle transition happened, and a
//! transition into a not-alive state produces exactly one delivery-eligible
//! notification. Readers keep their own per-instance records and arbitrate
//! "no more writers" across all matched writers; the tracker only reports
//! what this one writer did.

use std::collections::BTreeMap;
use std::time::SystemTime;

use log::debug;

use crate::dynamic::{DynamicData, InstanceHandle, KeyValue};
use crate::participant::EndpointId;

/// What kind of change a writer publishes for an instance.
///
/// Mirrors the change kinds of a DDS history cache: a valid-data write, an
/// explicit disposal, or the end of this writer's registration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
  Alive,
  NotAliveDisposed,
  NotAliveUnregistered,
}

/// One unit of delivery from a writer to a matched reader.
#[derive(Clone, Debug)]
pub(crate) struct DeliveredChange {
  pub kind: ChangeKind,
  pub writer: EndpointId,
  pub handle: InstanceHandle,
  pub key: KeyValue,
  /// Present iff `kind == Alive`.
  pub data: Option<DynamicData>,
  pub source_timestamp: SystemTime,
}

/// State of one instance as this writer knows it.
pub(crate) struct Instance {
  pub handle: InstanceHandle,
  pub key: KeyValue,
  pub kind: ChangeKind,
  /// Retained samples for durability replay to late-joining readers,
  /// newest last. Bounded by the writer's History QoS.
  pub retained: Vec<DynamicData>,
}

/// Outcome of a tracker operation: did a lifecycle transition occur?
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Transition {
  /// First write for an unseen key; the instance was created.
  Created,
  /// Write on an existing alive instance; no lifecycle change.
  Updated,
  /// Write on a not-alive instance; it is alive again, same handle.
  Resurrected,
  /// Alive -> NotAliveDisposed or Alive -> NotAliveUnregistered.
  /// Exactly one notification must be delivered.
  ToNotAlive,
  /// Dispose/unregister on an instance already in a not-alive state.
  /// No notification is generated.
  NoChange,
}

pub(crate) struct InstanceTracker {
  instances: BTreeMap<InstanceHandle, Instance>,
  retain_depth: usize,
}

impl InstanceTracker {
  /// `retain_depth` bounds per-instance sample retention for durability
  /// replay; writers with volatile durability pass 1 so `lookup` and dispose
  /// bookkeeping still work.
  pub fn new(retain_depth: usize) -> InstanceTracker {
    InstanceTracker {
      instances: BTreeMap::new(),
      retain_depth: retain_depth.max(1),
    }
  }

  pub fn record_write(&mut self, key: KeyValue, data: DynamicData) -> (InstanceHandle, Transition) {
    let handle = key.instance_handle();
    match self.instances.get_mut(&handle) {
      None => {
        debug!("new instance {} for key {}", handle, key);
        self.instances.insert(
          handle,
          Instance {
            handle,
            key,
            kind: ChangeKind::Alive,
            retained: vec![data],
          },
        );
        (handle, Transition::Created)
      }
      Some(instance) => {
        let transition = if instance.kind == ChangeKind::Alive {
          Transition::Updated
        } else {
          debug!("instance {} resurrected", handle);
          Transition::Resurrected
        };
        instance.kind = ChangeKind::Alive;
        instance.retained.push(data);
        let excess = instance.retained.len().saturating_sub(self.retain_depth);
        instance.retained.drain(0..excess);
        (handle, transition)
      }
    }
  }

  pub fn record_dispose(&mut self, handle: InstanceHandle) -> Option<(&Instance, Transition)> {
    let instance = self.instances.get_mut(&handle)?;
    let transition = match instance.kind {
      ChangeKind::Alive => {
        instance.kind = ChangeKind::NotAliveDisposed;
        Transition::ToNotAlive
      }
      _ => Transition::NoChange,
    };
    Some((&*instance, transition))
  }

  pub fn record_unregister(&mut self, handle: InstanceHandle) -> Option<(&Instance, Transition)> {
    let instance = self.instances.get_mut(&handle)?;
    let transition = match instance.kind {
      ChangeKind::Alive => {
        instance.kind = ChangeKind::NotAliveUnregistered;
        Transition::ToNotAlive
      }
      _ => Transition::NoChange,
    };
    Some((&*instance, transition))
  }

  pub fn get(&self, handle: InstanceHandle) -> Option<&Instance> {
    self.instances.get(&handle)
  }

  pub fn lookup(&self, key: &KeyValue) -> Option<InstanceHandle> {
    let handle = key.instance_handle();
    self.instances.get(&handle).map(|i| i.handle)
  }

  /// Handles of instances this writer currently has alive. Used when the
  /// writer goes away and must unregister everything it still holds.
  pub fn alive_handles(&self) -> Vec<InstanceHandle> {
    self
      .instances
      .values()
      .filter(|i| i.kind == ChangeKind::Alive)
      .map(|i| i.handle)
      .collect()
  }

  /// Alive instances with their retained samples, for durability replay.
  pub fn alive_instances(&self) -> impl Iterator<Item = &Instance> {
    self
      .instances
      .values()
      .filter(|i| i.kind == ChangeKind::Alive)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dynamic::FieldValue;

  fn key(id: u32) -> KeyValue {
    KeyValue(vec![("lot_id".to_string(), FieldValue::UInt32(id))])
  }

  fn data(id: u32) -> DynamicData {
    let mut d = DynamicData::new("ChocolateLotState");
    d.set("lot_id", id);
    d
  }

  #[test]
  fn lifecycle_walk() {
    let mut tracker = InstanceTracker::new(1);

    let (handle, t) = tracker.record_write(key(1), data(1));
    assert_eq!(t, Transition::Created);

    let (handle2, t) = tracker.record_write(key(1), data(1));
    assert_eq!(handle, handle2);
    assert_eq!(t, Transition::Updated);

    let (_, t) = tracker.record_dispose(handle).unwrap();
    assert_eq!(t, Transition::ToNotAlive);

    // second dispose is not a transition and must not notify again
    let (_, t) = tracker.record_dispose(handle).unwrap();
    assert_eq!(t, Transition::NoChange);

    // a write brings the key back with the same handle
    let (handle3, t) = tracker.record_write(key(1), data(1));
    assert_eq!(handle, handle3);
    assert_eq!(t, Transition::Resurrected);
  }

  #[test]
  fn unregister_only_transitions_from_alive() {
    let mut tracker = InstanceTracker::new(1);
    let (handle, _) = tracker.record_write(key(2), data(2));

    let (_, t) = tracker.record_dispose(handle).unwrap();
    assert_eq!(t, Transition::ToNotAlive);
    let (_, t) = tracker.record_unregister(handle).unwrap();
    assert_eq!(t, Transition::NoChange);
  }

  #[test]
  fn unknown_handle_is_none() {
    let mut tracker = InstanceTracker::new(1);
    assert!(tracker.record_dispose(key(9).instance_handle()).is_none());
    assert!(tracker.lookup(&key(9)).is_none());
  }

  #[test]
  fn retention_is_bounded() {
    let mut tracker = InstanceTracker::new(2);
    for n in 0..5u32 {
      let mut d = data(7);
      d.set("station", format!("s{}", n));
      tracker.record_write(key(7), d);
    }
    let handle = tracker.lookup(&key(7)).unwrap();
    let retained = &tracker.get(handle).unwrap().retained;
    assert_eq!(retained.len(), 2);
    assert_eq!(retained[1].get_text("station"), Some("s4"));
  }

  #[test]
  fn alive_handles_skips_not_alive() {
    let mut tracker = InstanceTracker::new(1);
    let (h1, _) = tracker.record_write(key(1), data(1));
    let (h2, _) = tracker.record_write(key(2), data(2));
    let _ = tracker.record_dispose(h1);
    assert_eq!(tracker.alive_handles(), vec![h2]);
  }
}
