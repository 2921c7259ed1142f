//
// Describe the communication status changes as events.
//
// These implement a mechanism equivalent to what is described in
// Section 2.2.4 Listeners, Conditions, and Wait-sets of the DDS
// specification v1.4, with delivery through an injected sink instead of
// listener callbacks per entity.

use std::sync::Mutex;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::participant::EndpointId;
use crate::qos::QosPolicyId;

/// Status events concerning a DataReader.
#[derive(Debug, Clone)]
pub enum DataReaderStatus {
  /// This DataReader has requested a QoS policy that is incompatible with
  /// what is offered by a discovered DataWriter. The pair does not match.
  RequestedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
  },
  /// The DataReader has found a DataWriter that matches the Topic and has
  /// compatible QoS, or has ceased to be matched with a DataWriter that was
  /// previously considered to be matched.
  SubscriptionMatched {
    total: CountWithChange,
    current: CountWithChange,
  },
  /// A matched writer has stopped writing; instances it solely registered
  /// have transitioned to not-alive-no-writers.
  LivelinessChanged {
    alive_total: CountWithChange,
    not_alive_total: CountWithChange,
  },
}

/// Status events concerning a DataWriter.
#[derive(Debug, Clone)]
pub enum DataWriterStatus {
  /// A discovered DataReader wants this Topic but with a QoS request this
  /// writer's offer cannot satisfy. The pair does not match.
  OfferedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
  },
  PublicationMatched {
    total: CountWithChange,
    current: CountWithChange,
  },
}

/// A status event paired with the endpoint it concerns.
#[derive(Debug, Clone)]
pub enum StatusEvent {
  Reader {
    endpoint: EndpointId,
    status: DataReaderStatus,
  },
  Writer {
    endpoint: EndpointId,
    status: DataWriterStatus,
  },
}

/// Sink for status events.
///
/// The engines emit structured events; formatting and routing are the sink's
/// responsibility. The default sink logs through the `log` facade.
pub trait StatusSink: Send + Sync {
  fn post(&self, event: StatusEvent);
}

/// Default sink: format events into the log.
pub struct LogSink;

impl StatusSink for LogSink {
  fn post(&self, event: StatusEvent) {
    match &event {
      StatusEvent::Reader { endpoint, status } => match status {
        DataReaderStatus::RequestedIncompatibleQos { last_policy_id, .. } => warn!(
          "Reader {} requested QoS incompatible with an offer: {:?}",
          endpoint, last_policy_id
        ),
        other => debug!("Reader {} status: {:?}", endpoint, other),
      },
      StatusEvent::Writer { endpoint, status } => match status {
        DataWriterStatus::OfferedIncompatibleQos { last_policy_id, .. } => warn!(
          "Writer {} offer rejected by a requested QoS: {:?}",
          endpoint, last_policy_id
        ),
        other => debug!("Writer {} status: {:?}", endpoint, other),
      },
    }
  }
}

/// Test/diagnostic sink that retains every event.
pub struct CollectingSink {
  events: Mutex<Vec<StatusEvent>>,
}

impl CollectingSink {
  pub fn new() -> CollectingSink {
    CollectingSink {
      events: Mutex::new(Vec::new()),
    }
  }

  pub fn drain(&self) -> Vec<StatusEvent> {
    match self.events.lock() {
      Ok(mut events) => events.drain(..).collect(),
      Err(_) => Vec::new(),
    }
  }
}

impl Default for CollectingSink {
  fn default() -> Self {
    Self::new()
  }
}

impl StatusSink for CollectingSink {
  fn post(&self, event: StatusEvent) {
    if let Ok(mut events) = self.events.lock() {
      events.push(event);
    }
  }
}

/// Helper to contain same count actions across statuses
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CountWithChange {
  // The platform specific model defines these as "long", i.e. 32-bit signed.
  count: i32,
  count_change: i32,
}

impl CountWithChange {
  pub(crate) fn new(count: i32, count_change: i32) -> CountWithChange {
    CountWithChange {
      count,
      count_change,
    }
  }

  pub fn count(&self) -> i32 {
    self.count
  }

  pub fn count_change(&self) -> i32 {
    self.count_change
  }
}
