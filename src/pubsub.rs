use crate::error::Result;
use crate::participant::DomainParticipant;
use crate::qos::{HasQoSPolicy, QosPolicies};
use crate::reader::DataReader;
use crate::topic::{ContentFilteredTopic, Topic};
use crate::writer::DataWriter;

/// A Publisher groups DataWriters and supplies their default QoS.
///
/// The effective QoS of a writer is the topic's QoS, overridden by the
/// publisher's, overridden by any per-writer policies.
#[derive(Clone)]
pub struct Publisher {
  participant: DomainParticipant,
  qos: QosPolicies,
}

impl Publisher {
  pub(crate) fn new(participant: DomainParticipant, qos: QosPolicies) -> Publisher {
    Publisher { participant, qos }
  }

  pub fn create_datawriter(&self, topic: &Topic, qos: Option<QosPolicies>) -> Result<DataWriter> {
    let effective = topic
      .qos()
      .modify_by(&self.qos)
      .modify_by(&qos.unwrap_or_default());
    self.participant.new_writer(topic, effective)
  }
}

impl HasQoSPolicy for Publisher {
  fn qos(&self) -> QosPolicies {
    self.qos.clone()
  }
}

/// A Subscriber groups DataReaders and supplies their default QoS.
#[derive(Clone)]
pub struct Subscriber {
  participant: DomainParticipant,
  qos: QosPolicies,
}

impl Subscriber {
  pub(crate) fn new(participant: DomainParticipant, qos: QosPolicies) -> Subscriber {
    Subscriber { participant, qos }
  }

  pub fn create_datareader(&self, topic: &Topic, qos: Option<QosPolicies>) -> Result<DataReader> {
    let effective = topic
      .qos()
      .modify_by(&self.qos)
      .modify_by(&qos.unwrap_or_default());
    self.participant.new_reader(topic, None, effective)
  }

  /// Create a reader over a content-filtered view of a topic. The reader
  /// receives only samples the filter admits.
  pub fn create_datareader_filtered(
    &self,
    filtered_topic: &ContentFilteredTopic,
    qos: Option<QosPolicies>,
  ) -> Result<DataReader> {
    let topic = filtered_topic.related_topic();
    let effective = topic
      .qos()
      .modify_by(&self.qos)
      .modify_by(&qos.unwrap_or_default());
    self.participant.new_reader(
      topic,
      Some((
        filtered_topic.filter().clone(),
        filtered_topic.dispose_policy(),
      )),
      effective,
    )
  }
}

impl HasQoSPolicy for Subscriber {
  fn qos(&self) -> QosPolicies {
    self.qos.clone()
  }
}
