//! Subscription engine: per-reader sample buffering, instance records, and
//! the take/read accessors.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

#[allow(unused_imports)]
use log::{debug, error, trace, warn};

use crate::condition::{StatusCondition, StatusKind};
use crate::datasample::{DataSample, Sample};
use crate::dynamic::{DynamicData, InstanceHandle};
use crate::error::Result;
use crate::filter::ContentFilter;
use crate::instances::{ChangeKind, DeliveredChange};
use crate::participant::EndpointId;
use crate::qos::{policy::History, HasQoSPolicy, QosPolicies};
use crate::readcondition::ReadCondition;
use crate::sampleinfo::{InstanceState, SampleInfo, SampleState, ViewState};
use crate::statusevents::{CountWithChange, DataReaderStatus, StatusEvent, StatusSink};
use crate::topic::{DisposeFilterPolicy, Topic};

// One buffered sample or not-alive notification, in arrival order.
struct QueueEntry {
  sample_state: SampleState,
  handle: InstanceHandle,
  writer: EndpointId,
  value: Sample,
  // Instance state and generation counts are snapshotted at delivery, so a
  // later resurrection does not rewrite what an already-buffered
  // notification means.
  instance_state: InstanceState,
  disposed_generation_count: i32,
  no_writers_generation_count: i32,
  source_timestamp: std::time::SystemTime,
}

// Per-instance record this reader maintains.
struct ReaderInstance {
  state: InstanceState,
  view: ViewState,
  disposed_generation_count: i32,
  no_writers_generation_count: i32,
  // Writers currently registering this instance, as seen by this reader.
  // NotAliveNoWriters is declared when the last one goes away.
  writers: BTreeSet<EndpointId>,
}

impl ReaderInstance {
  fn new() -> ReaderInstance {
    ReaderInstance {
      state: InstanceState::Alive,
      view: ViewState::New,
      disposed_generation_count: 0,
      no_writers_generation_count: 0,
      writers: BTreeSet::new(),
    }
  }
}

struct ReaderState {
  entries: VecDeque<QueueEntry>,
  instances: BTreeMap<InstanceHandle, ReaderInstance>,
}

pub(crate) struct ReaderCore {
  id: EndpointId,
  topic: Topic,
  qos: QosPolicies,
  filter: Option<(ContentFilter, DisposeFilterPolicy)>,
  state: Mutex<ReaderState>,
  status_condition: Arc<StatusCondition>,
  sink: Arc<dyn StatusSink>,
  match_counts: Mutex<(i32, i32)>, // (total ever, current)
  incompatible_qos_count: Mutex<i32>,
}

impl ReaderCore {
  pub fn new(
    id: EndpointId,
    topic: Topic,
    qos: QosPolicies,
    filter: Option<(ContentFilter, DisposeFilterPolicy)>,
    sink: Arc<dyn StatusSink>,
  ) -> Arc<ReaderCore> {
    Arc::new(ReaderCore {
      id,
      topic,
      qos,
      filter,
      state: Mutex::new(ReaderState {
        entries: VecDeque::new(),
        instances: BTreeMap::new(),
      }),
      status_condition: StatusCondition::new(),
      sink,
      match_counts: Mutex::new((0, 0)),
      incompatible_qos_count: Mutex::new(0),
    })
  }

  pub fn id(&self) -> EndpointId {
    self.id
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos
  }

  pub fn status_condition(&self) -> &Arc<StatusCondition> {
    &self.status_condition
  }

  fn history_depth(&self) -> Option<usize> {
    match self.qos.history() {
      Some(History::KeepAll) => None,
      Some(History::KeepLast { depth }) => Some(depth.max(1) as usize),
      // keep-last-1 is the DDS default history
      None => Some(1),
    }
  }

  // ---------------------------------------------------------------
  // delivery path (runs on whichever thread called the writer)

  pub fn deliver(&self, change: DeliveredChange) {
    match change.kind {
      ChangeKind::Alive => self.deliver_data(change),
      ChangeKind::NotAliveDisposed => self.deliver_dispose(change),
      ChangeKind::NotAliveUnregistered => self.deliver_unregister(change),
    }
  }

  fn deliver_data(&self, change: DeliveredChange) {
    let data = match change.data {
      Some(d) => d,
      None => {
        error!("reader {}: alive change without data", self.id);
        return;
      }
    };

    if let Some((filter, _)) = &self.filter {
      match filter.matches(&data) {
        Ok(true) => {}
        Ok(false) => {
          trace!("reader {}: sample filtered out", self.id);
          return;
        }
        Err(e) => {
          // An unevaluable predicate cannot admit the sample.
          warn!("reader {}: filter evaluation failed: {}", self.id, e);
          return;
        }
      }
    }

    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(e) => {
        error!("reader {}: state lock poisoned: {}", self.id, e);
        return;
      }
    };

    let instance = state
      .instances
      .entry(change.handle)
      .or_insert_with(ReaderInstance::new);
    if instance.state != InstanceState::Alive {
      // resurrection: the instance is New again and a generation begins
      match instance.state {
        InstanceState::NotAliveDisposed => instance.disposed_generation_count += 1,
        InstanceState::NotAliveNoWriters => instance.no_writers_generation_count += 1,
        InstanceState::Alive => {}
      }
      instance.state = InstanceState::Alive;
      instance.view = ViewState::New;
    }
    instance.writers.insert(change.writer);
    let disposed_generation_count = instance.disposed_generation_count;
    let no_writers_generation_count = instance.no_writers_generation_count;

    state.entries.push_back(QueueEntry {
      sample_state: SampleState::NotRead,
      handle: change.handle,
      writer: change.writer,
      value: Sample::Value(data),
      instance_state: InstanceState::Alive,
      disposed_generation_count,
      no_writers_generation_count,
      source_timestamp: change.source_timestamp,
    });

    // History bounds retained valid-data samples per (instance, writer).
    // Not-alive notifications do not count against the depth.
    if let Some(depth) = self.history_depth() {
      let (handle, writer) = (change.handle, change.writer);
      let valid_count = state
        .entries
        .iter()
        .filter(|e| e.handle == handle && e.writer == writer && e.value.is_valid_data())
        .count();
      if valid_count > depth {
        if let Some(oldest) = state
          .entries
          .iter()
          .position(|e| e.handle == handle && e.writer == writer && e.value.is_valid_data())
        {
          state.entries.remove(oldest);
        }
      }
    }

    drop(state);
    self
      .status_condition
      .set_status(StatusKind::DataAvailable, true);
  }

  fn deliver_dispose(&self, change: DeliveredChange) {
    if let Some((filter, DisposeFilterPolicy::ApplyToKey)) = &self.filter {
      // Evaluate against the key fields only. Errors fail open: the
      // expression may reference fields a disposal does not carry.
      let mut key_only = DynamicData::new(self.topic.type_name());
      for (name, value) in change.key.fields() {
        key_only.set(name, value.clone());
      }
      if let Ok(false) = filter.matches(&key_only) {
        trace!("reader {}: dispose filtered out by key predicate", self.id);
        return;
      }
    }

    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(_) => return,
    };

    let instance = state
      .instances
      .entry(change.handle)
      .or_insert_with(ReaderInstance::new);
    if instance.state != InstanceState::Alive {
      // already not alive; a transition did not happen here
      return;
    }
    instance.state = InstanceState::NotAliveDisposed;
    let disposed_generation_count = instance.disposed_generation_count;
    let no_writers_generation_count = instance.no_writers_generation_count;

    debug!("reader {}: instance {} disposed", self.id, change.handle);
    state.entries.push_back(QueueEntry {
      sample_state: SampleState::NotRead,
      handle: change.handle,
      writer: change.writer,
      value: Sample::Dispose(change.key),
      instance_state: InstanceState::NotAliveDisposed,
      disposed_generation_count,
      no_writers_generation_count,
      source_timestamp: change.source_timestamp,
    });

    drop(state);
    self
      .status_condition
      .set_status(StatusKind::DataAvailable, true);
  }

  fn deliver_unregister(&self, change: DeliveredChange) {
    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(_) => return,
    };

    let instance = match state.instances.get_mut(&change.handle) {
      Some(i) => i,
      None => return, // never seen here, nothing to revoke
    };
    instance.writers.remove(&change.writer);
    if instance.state != InstanceState::Alive || !instance.writers.is_empty() {
      return; // other writers still register the instance
    }
    instance.state = InstanceState::NotAliveNoWriters;
    let disposed_generation_count = instance.disposed_generation_count;
    let no_writers_generation_count = instance.no_writers_generation_count;

    debug!(
      "reader {}: instance {} has no more writers",
      self.id, change.handle
    );
    state.entries.push_back(QueueEntry {
      sample_state: SampleState::NotRead,
      handle: change.handle,
      writer: change.writer,
      value: Sample::Dispose(change.key),
      instance_state: InstanceState::NotAliveNoWriters,
      disposed_generation_count,
      no_writers_generation_count,
      source_timestamp: change.source_timestamp,
    });

    drop(state);
    self
      .status_condition
      .set_status(StatusKind::DataAvailable, true);
  }

  // ---------------------------------------------------------------
  // consumption path

  fn select(
    state: &ReaderState,
    max_samples: usize,
    read_condition: ReadCondition,
  ) -> Vec<usize> {
    let mut selected = Vec::new();
    for (index, entry) in state.entries.iter().enumerate() {
      if selected.len() >= max_samples {
        break;
      }
      let view = state
        .instances
        .get(&entry.handle)
        .map(|i| i.view)
        .unwrap_or(ViewState::New);
      if read_condition.sample_state_mask().contains(entry.sample_state)
        && read_condition.view_state_mask().contains(view)
        && read_condition
          .instance_state_mask()
          .contains(entry.instance_state)
      {
        selected.push(index);
      }
    }
    selected
  }

  fn to_data_sample(state: &ReaderState, entry: &QueueEntry) -> DataSample {
    let view = state
      .instances
      .get(&entry.handle)
      .map(|i| i.view)
      .unwrap_or(ViewState::New);
    DataSample::new(
      SampleInfo {
        sample_state: entry.sample_state,
        view_state: view,
        instance_state: entry.instance_state,
        disposed_generation_count: entry.disposed_generation_count,
        no_writers_generation_count: entry.no_writers_generation_count,
        instance_handle: entry.handle,
        publication_handle: entry.writer,
        source_timestamp: entry.source_timestamp,
      },
      entry.value.clone(),
    )
  }

  pub fn take(&self, max_samples: usize, read_condition: ReadCondition) -> Result<Vec<DataSample>> {
    let mut state = self.state.lock()?;
    let selected = Self::select(&state, max_samples, read_condition);
    trace!("take selected count = {}", selected.len());

    let mut result = Vec::with_capacity(selected.len());
    let mut accessed: BTreeSet<InstanceHandle> = BTreeSet::new();
    let mut not_alive_taken: BTreeSet<InstanceHandle> = BTreeSet::new();

    // indices are ascending, so remove from the back to keep them valid
    for index in selected.iter().rev() {
      if let Some(entry) = state.entries.remove(*index) {
        accessed.insert(entry.handle);
        if entry.instance_state != InstanceState::Alive {
          not_alive_taken.insert(entry.handle);
        }
        result.push(entry);
      }
    }
    result.reverse();
    let result: Vec<DataSample> = result
      .iter()
      .map(|entry| Self::to_data_sample(&state, entry))
      .collect();

    self.after_access(&mut state, &accessed, &not_alive_taken);
    let any_not_read = state
      .entries
      .iter()
      .any(|e| e.sample_state == SampleState::NotRead);
    drop(state);
    self
      .status_condition
      .set_status(StatusKind::DataAvailable, any_not_read);
    Ok(result)
  }

  pub fn read(&self, max_samples: usize, read_condition: ReadCondition) -> Result<Vec<DataSample>> {
    let mut state = self.state.lock()?;
    let selected = Self::select(&state, max_samples, read_condition);

    let mut result = Vec::with_capacity(selected.len());
    let mut accessed: BTreeSet<InstanceHandle> = BTreeSet::new();
    for index in &selected {
      let sample = Self::to_data_sample(&state, &state.entries[*index]);
      accessed.insert(state.entries[*index].handle);
      result.push(sample);
    }
    for index in &selected {
      state.entries[*index].sample_state = SampleState::Read;
    }

    // read() does not consume, so not-alive notifications stay pending and
    // no instance record is purged here
    self.after_access(&mut state, &accessed, &BTreeSet::new());
    let any_not_read = state
      .entries
      .iter()
      .any(|e| e.sample_state == SampleState::NotRead);
    drop(state);
    self
      .status_condition
      .set_status(StatusKind::DataAvailable, any_not_read);
    Ok(result)
  }

  // Post-access bookkeeping: accessed instances are no longer New, and an
  // instance whose not-alive notification has been consumed is purged once
  // nothing else references it.
  fn after_access(
    &self,
    state: &mut ReaderState,
    accessed: &BTreeSet<InstanceHandle>,
    not_alive_taken: &BTreeSet<InstanceHandle>,
  ) {
    for handle in accessed {
      if let Some(instance) = state.instances.get_mut(handle) {
        instance.view = ViewState::NotNew;
      }
    }
    for handle in not_alive_taken {
      let still_referenced = state.entries.iter().any(|e| e.handle == *handle);
      let not_alive_now = state
        .instances
        .get(handle)
        .map(|i| i.state != InstanceState::Alive)
        .unwrap_or(false);
      if !still_referenced && not_alive_now {
        trace!("reader {}: purging instance {}", self.id, handle);
        state.instances.remove(handle);
      }
    }
  }

  // ---------------------------------------------------------------
  // matching bookkeeping, driven by the participant

  pub fn writer_matched(&self, writer: EndpointId) {
    let (total, current) = {
      let mut counts = match self.match_counts.lock() {
        Ok(c) => c,
        Err(_) => return,
      };
      counts.0 += 1;
      counts.1 += 1;
      *counts
    };
    debug!("reader {}: matched writer {}", self.id, writer);
    self
      .status_condition
      .set_status(StatusKind::SubscriptionMatched, true);
    self.sink.post(StatusEvent::Reader {
      endpoint: self.id,
      status: DataReaderStatus::SubscriptionMatched {
        total: CountWithChange::new(total, 1),
        current: CountWithChange::new(current, 1),
      },
    });
  }

  pub fn writer_unmatched(&self, writer: EndpointId) {
    let (total, current) = {
      let mut counts = match self.match_counts.lock() {
        Ok(c) => c,
        Err(_) => return,
      };
      counts.1 -= 1;
      *counts
    };
    debug!("reader {}: unmatched writer {}", self.id, writer);
    self.sink.post(StatusEvent::Reader {
      endpoint: self.id,
      status: DataReaderStatus::SubscriptionMatched {
        total: CountWithChange::new(total, 0),
        current: CountWithChange::new(current, -1),
      },
    });
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
      .set_status(StatusKind::RequestedIncompatibleQos, true);
    self.sink.post(StatusEvent::Reader {
      endpoint: self.id,
      status: DataReaderStatus::RequestedIncompatibleQos {
        count: CountWithChange::new(count, 1),
        last_policy_id: policy,
      },
    });
  }
}

/// DataReader: the application-facing subscription endpoint.
///
/// Reader methods take `&self`; the sample queue is mutated by the delivery
/// path and drained by the consumer under one internal lock, so a reader may
/// be shared (cloned) across threads, and condition handlers can capture a
/// clone.
#[derive(Clone)]
pub struct DataReader {
  pub(crate) core: Arc<ReaderCore>,
}

impl DataReader {
  pub fn id(&self) -> EndpointId {
    self.core.id()
  }

  pub fn topic(&self) -> &Topic {
    &self.core.topic
  }

  /// The reader's status condition, for WaitSet attachment.
  pub fn status_condition(&self) -> Arc<StatusCondition> {
    Arc::clone(self.core.status_condition())
  }

  /// Remove and return buffered samples, up to `max_samples`, selected by
  /// `read_condition`, in arrival order.
  ///
  /// Samples of one instance from one writer appear in write order. The
  /// DATA_AVAILABLE status resets when the queue has no unread samples left.
  pub fn take(&self, max_samples: usize, read_condition: ReadCondition) -> Result<Vec<DataSample>> {
    self.core.take(max_samples, read_condition)
  }

  /// Take everything currently buffered.
  pub fn take_all(&self) -> Result<Vec<DataSample>> {
    self.core.take(std::usize::MAX, ReadCondition::any())
  }

  /// Takes next unread sample, if any.
  pub fn take_next_sample(&self) -> Result<Option<DataSample>> {
    let mut ds = self.core.take(1, ReadCondition::not_read())?;
    Ok(ds.pop())
  }

  /// Access buffered samples without consuming them. Returned samples are
  /// marked read but stay available to later `read` or `take` calls.
  pub fn read(&self, max_samples: usize, read_condition: ReadCondition) -> Result<Vec<DataSample>> {
    self.core.read(max_samples, read_condition)
  }
}

impl HasQoSPolicy for DataReader {
  fn qos(&self) -> QosPolicies {
    self.core.qos.clone()
  }
}
