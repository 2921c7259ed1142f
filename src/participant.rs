//! DomainParticipant: topic catalog, type registry, endpoint creation, and
//! the in-process matching bus.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

#[allow(unused_imports)]
use log::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::filter::ContentFilter;
use crate::pubsub::{Publisher, Subscriber};
use crate::qos::QosPolicies;
use crate::reader::{DataReader, ReaderCore};
use crate::statusevents::{LogSink, StatusSink};
use crate::topic::{ContentFilteredTopic, DisposeFilterPolicy, Topic};
use crate::typedesc::{TypeDescriptor, TypeRegistry};
use crate::writer::{DataWriter, WriterCore};

/// Unique identity of a reader or writer endpoint within the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(Uuid);

impl EndpointId {
  pub(crate) fn new() -> EndpointId {
    EndpointId(Uuid::new_v4())
  }
}

impl fmt::Display for EndpointId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // the first Uuid group is enough to tell endpoints apart in logs
    let s = self.0.to_simple().to_string();
    write!(f, "{}", &s[..8.min(s.len())])
  }
}

/// The root object of one data-distribution domain within a process.
///
/// A participant owns the topic catalog and the type registry, creates
/// publishers and subscribers, and matches writers to readers: same topic,
/// compatible QoS. In a full networked DDS this matching is fed by a
/// discovery protocol; here the participant itself is that seam, and QoS
/// incompatibilities surface as status events rather than errors.
#[derive(Clone)]
pub struct DomainParticipant {
  inner: Arc<DomainInner>,
}

struct DomainInner {
  domain_id: u16,
  registry: TypeRegistry,
  sink: Arc<dyn StatusSink>,
  topics: Mutex<BTreeMap<String, Topic>>,
  filtered_topics: Mutex<BTreeMap<String, ContentFilteredTopic>>,
  writers: Mutex<Vec<(String, Weak<WriterCore>)>>,
  readers: Mutex<Vec<(String, Weak<ReaderCore>)>>,
}

impl DomainParticipant {
  pub fn new(domain_id: u16) -> DomainParticipant {
    Self::with_sink(domain_id, Arc::new(LogSink))
  }

  /// Create a participant with a custom status-event sink.
  pub fn with_sink(domain_id: u16, sink: Arc<dyn StatusSink>) -> DomainParticipant {
    info!("New DomainParticipant in domain {}", domain_id);
    DomainParticipant {
      inner: Arc::new(DomainInner {
        domain_id,
        registry: TypeRegistry::new(),
        sink,
        topics: Mutex::new(BTreeMap::new()),
        filtered_topics: Mutex::new(BTreeMap::new()),
        writers: Mutex::new(Vec::new()),
        readers: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn domain_id(&self) -> u16 {
    self.inner.domain_id
  }

  pub fn type_registry(&self) -> &TypeRegistry {
    &self.inner.registry
  }

  /// Create (or look up) a topic.
  ///
  /// Re-creating a topic under the same name succeeds only if the type
  /// descriptor is identical; otherwise the call fails with
  /// [`Error::DuplicateTopic`] and no state is changed. The first creation
  /// fixes the topic's QoS.
  pub fn create_topic(
    &self,
    name: &str,
    descriptor: TypeDescriptor,
    qos: &QosPolicies,
  ) -> Result<Topic> {
    descriptor.validate()?;
    {
      let filtered = self.inner.filtered_topics.lock()?;
      if filtered.contains_key(name) {
        return Err(Error::DuplicateTopic {
          name: name.to_string(),
        });
      }
    }
    let mut topics = self.inner.topics.lock()?;
    if let Some(existing) = topics.get(name) {
      if existing.same_shape(&descriptor) {
        return Ok(existing.clone());
      }
      return Err(Error::DuplicateTopic {
        name: name.to_string(),
      });
    }

    self.inner.registry.register(descriptor.clone())?;
    let arc_descriptor = match self.inner.registry.lookup(descriptor.name()) {
      Some(d) => d,
      None => return crate::log_and_err_internal!("registered type disappeared from registry"),
    };
    debug!("Creating topic \"{}\" of type \"{}\"", name, descriptor.name());
    let topic = Topic::new(name, arc_descriptor, qos.clone());
    topics.insert(name.to_string(), topic.clone());
    Ok(topic)
  }

  /// Create a content-filtered view over an existing topic, with dispose
  /// notifications bypassing the filter (the default policy).
  pub fn create_content_filtered_topic(
    &self,
    name: &str,
    related_topic: &Topic,
    expression: &str,
    parameters: &[&str],
  ) -> Result<ContentFilteredTopic> {
    self.create_content_filtered_topic_with_policy(
      name,
      related_topic,
      expression,
      parameters,
      DisposeFilterPolicy::DeliverAll,
    )
  }

  pub fn create_content_filtered_topic_with_policy(
    &self,
    name: &str,
    related_topic: &Topic,
    expression: &str,
    parameters: &[&str],
    dispose_policy: DisposeFilterPolicy,
  ) -> Result<ContentFilteredTopic> {
    let filter = ContentFilter::with_parameters(expression, parameters)?;
    {
      let topics = self.inner.topics.lock()?;
      if topics.contains_key(name) {
        return Err(Error::DuplicateTopic {
          name: name.to_string(),
        });
      }
    }
    let mut filtered = self.inner.filtered_topics.lock()?;
    if filtered.contains_key(name) {
      return Err(Error::DuplicateTopic {
        name: name.to_string(),
      });
    }
    debug!(
      "Creating content-filtered topic \"{}\" over \"{}\": {}",
      name,
      related_topic.name(),
      expression
    );
    let cft = ContentFilteredTopic::new(name, related_topic.clone(), filter, dispose_policy);
    filtered.insert(name.to_string(), cft.clone());
    Ok(cft)
  }

  pub fn create_publisher(&self, qos: &QosPolicies) -> Result<Publisher> {
    Ok(Publisher::new(self.clone(), qos.clone()))
  }

  pub fn create_subscriber(&self, qos: &QosPolicies) -> Result<Subscriber> {
    Ok(Subscriber::new(self.clone(), qos.clone()))
  }

  // ---------------------------------------------------------------
  // endpoint creation and matching

  pub(crate) fn new_writer(&self, topic: &Topic, qos: QosPolicies) -> Result<DataWriter> {
    let core = WriterCore::new(
      EndpointId::new(),
      topic.clone(),
      qos,
      Arc::clone(&self.inner.sink),
    );
    {
      let mut writers = self.inner.writers.lock()?;
      writers.retain(|(_, weak)| weak.upgrade().is_some());
      writers.push((topic.name().to_string(), Arc::downgrade(&core)));
    }

    for reader in self.live_readers(topic.name())? {
      match core.qos().compliance_failure_wrt(reader.qos()) {
        None => {
          reader.writer_matched(core.id());
          core.reader_matched(&reader);
        }
        Some(policy) => {
          warn!(
            "writer {} and reader {} on \"{}\" have incompatible QoS: {:?}",
            core.id(),
            reader.id(),
            topic.name(),
            policy
          );
          core.report_incompatible_qos(policy);
          reader.report_incompatible_qos(policy);
        }
      }
    }
    Ok(DataWriter { core })
  }

  pub(crate) fn new_reader(
    &self,
    topic: &Topic,
    filter: Option<(ContentFilter, DisposeFilterPolicy)>,
    qos: QosPolicies,
  ) -> Result<DataReader> {
    let core = ReaderCore::new(
      EndpointId::new(),
      topic.clone(),
      qos,
      filter,
      Arc::clone(&self.inner.sink),
    );
    {
      let mut readers = self.inner.readers.lock()?;
      readers.retain(|(_, weak)| weak.upgrade().is_some());
      readers.push((topic.name().to_string(), Arc::downgrade(&core)));
    }

    for writer in self.live_writers(topic.name())? {
      match writer.qos().compliance_failure_wrt(core.qos()) {
        None => {
          core.writer_matched(writer.id());
          // reader_matched also replays retained history when the pair is
          // transient-local
          writer.reader_matched(&core);
        }
        Some(policy) => {
          warn!(
            "writer {} and reader {} on \"{}\" have incompatible QoS: {:?}",
            writer.id(),
            core.id(),
            topic.name(),
            policy
          );
          writer.report_incompatible_qos(policy);
          core.report_incompatible_qos(policy);
        }
      }
    }
    Ok(DataReader { core })
  }

  fn live_readers(&self, topic_name: &str) -> Result<Vec<Arc<ReaderCore>>> {
    let readers = self.inner.readers.lock()?;
    Ok(
      readers
        .iter()
        .filter(|(name, _)| name == topic_name)
        .filter_map(|(_, weak)| weak.upgrade())
        .collect(),
    )
  }

  fn live_writers(&self, topic_name: &str) -> Result<Vec<Arc<WriterCore>>> {
    let writers = self.inner.writers.lock()?;
    Ok(
      writers
        .iter()
        .filter(|(name, _)| name == topic_name)
        .filter_map(|(_, weak)| weak.upgrade())
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::typedesc::FieldType;

  fn temperature_type() -> TypeDescriptor {
    TypeDescriptor::builder("Temperature")
      .key_field("sensor_id", FieldType::Text)
      .field("degrees", FieldType::Int32)
      .build()
      .unwrap()
  }

  #[test]
  fn topic_recreation_needs_identical_shape() {
    let dp = DomainParticipant::new(0);
    let qos = QosPolicies::qos_none();
    let topic = dp
      .create_topic("ChocolateTemperature", temperature_type(), &qos)
      .unwrap();
    assert_eq!(topic.type_name(), "Temperature");

    // identical re-creation returns the existing topic
    assert!(dp
      .create_topic("ChocolateTemperature", temperature_type(), &qos)
      .is_ok());

    let different = TypeDescriptor::builder("Temperature")
      .key_field("sensor_id", FieldType::Text)
      .field("degrees", FieldType::Float64)
      .build()
      .unwrap();
    match dp.create_topic("ChocolateTemperature", different, &qos) {
      Err(Error::DuplicateTopic { name }) => assert_eq!(name, "ChocolateTemperature"),
      other => panic!("expected DuplicateTopic, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn filtered_topic_names_share_the_namespace() {
    let dp = DomainParticipant::new(0);
    let qos = QosPolicies::qos_none();
    let topic = dp
      .create_topic("ChocolateTemperature", temperature_type(), &qos)
      .unwrap();

    dp.create_content_filtered_topic("FilteredTemperature", &topic, "degrees > 32", &[])
      .unwrap();

    // both directions of the clash are rejected
    assert!(dp
      .create_content_filtered_topic("ChocolateTemperature", &topic, "degrees > 0", &[])
      .is_err());
    assert!(dp
      .create_topic("FilteredTemperature", temperature_type(), &qos)
      .is_err());
  }

  #[test]
  fn bad_filter_expression_fails_creation() {
    let dp = DomainParticipant::new(0);
    let qos = QosPolicies::qos_none();
    let topic = dp
      .create_topic("ChocolateTemperature", temperature_type(), &qos)
      .unwrap();
    assert!(matches!(
      dp.create_content_filtered_topic("Broken", &topic, "degrees >", &[]),
      Err(Error::BadParameter { .. })
    ));
  }
}
