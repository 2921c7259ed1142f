//! Publication engine: sample validation, instance identity, and delivery to
//! matched readers.

use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

#[allow(unused_imports)]
use log::{debug, error, trace, warn};

use crate::condition::{StatusCondition, StatusKind};
use crate::dynamic::{DynamicData, InstanceHandle};
use crate::error::{Error, Result};
use crate::instances::{ChangeKind, DeliveredChange, InstanceTracker, Transition};
use crate::participant::EndpointId;
use crate::qos::{policy::History, HasQoSPolicy, QosPolicies};
use crate::reader::ReaderCore;
use crate::statusevents::{CountWithChange, DataWriterStatus, StatusEvent, StatusSink};
use crate::topic::Topic;

struct MatchedReader {
  id: EndpointId,
  core: Weak<ReaderCore>,
}

pub(crate) struct WriterCore {
  id: EndpointId,
  topic: Topic,
  qos: QosPolicies,
  tracker: Mutex<InstanceTracker>,
  // Non-owning: a dropped reader unmatches itself by ceasing to upgrade.
  matched: Mutex<Vec<MatchedReader>>,
  status_condition: Arc<StatusCondition>,
  sink: Arc<dyn StatusSink>,
  match_counts: Mutex<(i32, i32)>, // (total ever, current)
  incompatible_qos_count: Mutex<i32>,
}

impl WriterCore {
  pub fn new(
    id: EndpointId,
    topic: Topic,
    qos: QosPolicies,
    sink: Arc<dyn StatusSink>,
  ) -> Arc<WriterCore> {
    let retain_depth = match qos.history() {
      Some(History::KeepAll) => std::usize::MAX,
      Some(History::KeepLast { depth }) => depth.max(1) as usize,
      None => 1,
    };
    Arc::new(WriterCore {
      id,
      topic,
      qos,
      tracker: Mutex::new(InstanceTracker::new(retain_depth)),
      matched: Mutex::new(Vec::new()),
      status_condition: StatusCondition::new(),
      sink,
      match_counts: Mutex::new((0, 0)),
      incompatible_qos_count: Mutex::new(0),
    })
  }

  pub fn id(&self) -> EndpointId {
    self.id
  }

  pub fn status_condition(&self) -> &Arc<StatusCondition> {
    &self.status_condition
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos
  }

  pub fn topic(&self) -> &Topic {
    &self.topic
  }

  fn deliver_to_matched(&self, change: DeliveredChange) {
    let mut matched = match self.matched.lock() {
      Ok(m) => m,
      Err(e) => {
        error!("writer {}: matched lock poisoned: {}", self.id, e);
        return;
      }
    };
    matched.retain(|reader| match reader.core.upgrade() {
      Some(core) => {
        core.deliver(change.clone());
        true
      }
      None => false,
    });
  }

  // write and write_to_instance share this: validation happens before any
  // state is touched, so a failed write is all-or-nothing.
  fn write_internal(
    &self,
    data: DynamicData,
    required_handle: Option<InstanceHandle>,
  ) -> Result<InstanceHandle> {
    let descriptor = self.topic.descriptor();
    descriptor.check_sample(&data)?;
    let key = descriptor.key_of(&data)?;

    if let Some(required) = required_handle {
      if key.instance_handle() != required {
        return Error::schema("key fields of a registered instance may not be modified");
      }
    }

    // The tracker lock is held across delivery: it is what serializes
    // concurrent writes on one writer, so per-instance FIFO order reaches
    // the readers intact.
    let mut tracker = self.tracker.lock()?;
    if let Some(required) = required_handle {
      if tracker.get(required).is_none() {
        return Error::precondition_not_met("write: unknown instance handle");
      }
    }
    let (handle, transition) = tracker.record_write(key.clone(), data.clone());
    trace!(
      "writer {}: sample written, instance {} ({:?})",
      self.id,
      handle,
      transition
    );
    if transition == Transition::Resurrected {
      debug!("writer {}: instance {} is alive again", self.id, handle);
    }

    self.deliver_to_matched(DeliveredChange {
      kind: ChangeKind::Alive,
      writer: self.id,
      handle,
      key,
      data: Some(data),
      source_timestamp: SystemTime::now(),
    });
    Ok(handle)
  }

  pub fn write(&self, data: DynamicData) -> Result<InstanceHandle> {
    self.write_internal(data, None)
  }

  pub fn write_to_instance(&self, handle: InstanceHandle, data: DynamicData) -> Result<()> {
    self.write_internal(data, Some(handle)).map(|_| ())
  }

  pub fn dispose_instance(&self, handle: InstanceHandle) -> Result<()> {
    let mut tracker = self.tracker.lock()?;
    let change = match tracker.record_dispose(handle) {
      None => return Error::precondition_not_met("dispose: unknown instance handle"),
      Some((_, Transition::NoChange)) => None,
      Some((instance, _)) => Some(DeliveredChange {
        kind: ChangeKind::NotAliveDisposed,
        writer: self.id,
        handle,
        key: instance.key.clone(),
        data: None,
        source_timestamp: SystemTime::now(),
      }),
    };
    if let Some(change) = change {
      debug!("writer {}: disposing instance {}", self.id, handle);
      self.deliver_to_matched(change);
    }
    Ok(())
  }

  pub fn unregister_instance(&self, handle: InstanceHandle) -> Result<()> {
    let mut tracker = self.tracker.lock()?;
    let change = match tracker.record_unregister(handle) {
      None => return Error::precondition_not_met("unregister: unknown instance handle"),
      Some((_, Transition::NoChange)) => None,
      Some((instance, _)) => Some(DeliveredChange {
        kind: ChangeKind::NotAliveUnregistered,
        writer: self.id,
        handle,
        key: instance.key.clone(),
        data: None,
        source_timestamp: SystemTime::now(),
      }),
    };
    if let Some(change) = change {
      debug!("writer {}: unregistering instance {}", self.id, handle);
      self.deliver_to_matched(change);
    }
    Ok(())
  }

  pub fn lookup_instance(&self, data: &DynamicData) -> Result<Option<InstanceHandle>> {
    let key = self.topic.descriptor().key_of(data)?;
    let tracker = self.tracker.lock()?;
    Ok(tracker.lookup(&key))
  }

  // ---------------------------------------------------------------
  // matching bookkeeping, driven by the participant

  pub fn reader_matched(&self, reader: &Arc<ReaderCore>) {
    if let Ok(mut matched) = self.matched.lock() {
      matched.push(MatchedReader {
        id: reader.id(),
        core: Arc::downgrade(reader),
      });
    }
    let (total, current) = {
      match self.match_counts.lock() {
        Ok(mut counts) => {
          counts.0 += 1;
          counts.1 += 1;
          *counts
        }
        Err(_) => return,
      }
    };
    debug!("writer {}: matched reader {}", self.id, reader.id());
    self
      .status_condition
      .set_status(StatusKind::PublicationMatched, true);
    self.sink.post(StatusEvent::Writer {
      endpoint: self.id,
      status: DataWriterStatus::PublicationMatched {
        total: CountWithChange::new(total, 1),
        current: CountWithChange::new(current, 1),
      },
    });

    // Durability replay: a transient-local pair hands the late-joining
    // reader the writer's retained history.
    if self.qos.is_transient_local() && reader.qos().is_transient_local() {
      let replays: Vec<DeliveredChange> = {
        match self.tracker.lock() {
          Ok(tracker) => tracker
            .alive_instances()
            .flat_map(|instance| {
              instance.retained.iter().map(move |data| DeliveredChange {
                kind: ChangeKind::Alive,
                writer: self.id,
                handle: instance.handle,
                key: instance.key.clone(),
                data: Some(data.clone()),
                source_timestamp: SystemTime::now(),
              })
            })
            .collect(),
          Err(_) => Vec::new(),
        }
      };
      debug!(
        "writer {}: replaying {} retained sample(s) to reader {}",
        self.id,
        replays.len(),
        reader.id()
      );
      for change in replays {
        reader.deliver(change);
      }
    }
  }

  pub fn report_incompatible_qos(&self, policy: crate::qos::QosPolicyId) {
    let count = match self.incompatible_qos_count.lock() {
      Ok(mut c) => {
        *c += 1;
        *c
      }
      Err(_) => return,
    };
    self
      .status_condition
      .set_status(StatusKind::OfferedIncompatibleQos, true);
    self.sink.post(StatusEvent::Writer {
      endpoint: self.id,
      status: DataWriterStatus::OfferedIncompatibleQos {
        count: CountWithChange::new(count, 1),
        last_policy_id: policy,
      },
    });
  }
}

impl Drop for WriterCore {
  // The writer is going away: everything it still has alive loses this
  // writer's registration, and matched readers are told the match ended.
  fn drop(&mut self) {
    let handles = match self.tracker.lock() {
      Ok(tracker) => tracker.alive_handles(),
      Err(_) => Vec::new(),
    };
    for handle in handles {
      if let Err(e) = self.unregister_instance(handle) {
        warn!(
          "writer {}: unregister of instance {} on drop failed: {}",
          self.id, handle, e
        );
      }
    }
    if let Ok(matched) = self.matched.lock() {
      for reader in matched.iter() {
        if let Some(core) = reader.core.upgrade() {
          core.writer_unmatched(self.id);
        }
      }
    }
  }
}

/// DataWriter: the application-facing publication endpoint.
///
/// All methods take `&self` and are safe to call from any thread; clones
/// share the same underlying writer.
#[derive(Clone)]
pub struct DataWriter {
  pub(crate) core: Arc<WriterCore>,
}

impl DataWriter {
  pub fn id(&self) -> EndpointId {
    self.core.id()
  }

  pub fn topic(&self) -> &Topic {
    self.core.topic()
  }

  /// The writer's status condition, for WaitSet attachment.
  pub fn status_condition(&self) -> Arc<StatusCondition> {
    Arc::clone(self.core.status_condition())
  }

  /// Write one sample.
  ///
  /// The sample is validated against the topic's type descriptor before any
  /// state changes; a [`Error::Schema`] failure delivers nothing. A write
  /// for an unseen key creates the instance; a write for a key in a
  /// not-alive state makes it alive again (same handle).
  pub fn write(&self, data: DynamicData) -> Result<InstanceHandle> {
    self.core.write(data)
  }

  /// Write a sample to an instance registered earlier.
  ///
  /// The sample's key fields must equal the instance's key: key fields are
  /// immutable for the lifetime of an instance, and a mismatch fails with
  /// [`Error::Schema`] without delivering anything.
  pub fn write_to_instance(&self, handle: InstanceHandle, data: DynamicData) -> Result<()> {
    self.core.write_to_instance(handle, data)
  }

  /// Dispose an instance: matched readers receive exactly one not-alive
  /// notification carrying the key fields. Disposing an already-disposed
  /// instance is a no-op.
  ///
  /// Dispose notifications are delivered regardless of content filters,
  /// unless the reader's topic opted into
  /// [`DisposeFilterPolicy::ApplyToKey`](crate::topic::DisposeFilterPolicy).
  pub fn dispose_instance(&self, handle: InstanceHandle) -> Result<()> {
    self.core.dispose_instance(handle)
  }

  /// Withdraw this writer's registration of an instance. When the last
  /// registered writer of an instance unregisters, matched readers see the
  /// instance transition to not-alive-no-writers.
  pub fn unregister_instance(&self, handle: InstanceHandle) -> Result<()> {
    self.core.unregister_instance(handle)
  }

  /// Find the instance a sample's key refers to, if this writer has
  /// registered it.
  pub fn lookup_instance(&self, data: &DynamicData) -> Result<Option<InstanceHandle>> {
    self.core.lookup_instance(data)
  }
}

impl HasQoSPolicy for DataWriter {
  fn qos(&self) -> QosPolicies {
    self.core.qos().clone()
  }
}
