use std::sync::Arc;

use crate::filter::ContentFilter;
use crate::qos::{HasQoSPolicy, QosPolicies};
use crate::typedesc::TypeDescriptor;

/// A named, typed channel of data distribution. Immutable after creation.
///
/// Topics are created through
/// [`DomainParticipant::create_topic`](crate::participant::DomainParticipant::create_topic),
/// which enforces name/type agreement across the domain.
#[derive(Clone)]
pub struct Topic {
  inner: Arc<TopicInner>,
}

struct TopicInner {
  name: String,
  descriptor: Arc<TypeDescriptor>,
  qos: QosPolicies,
}

impl Topic {
  pub(crate) fn new(name: &str, descriptor: Arc<TypeDescriptor>, qos: QosPolicies) -> Topic {
    Topic {
      inner: Arc::new(TopicInner {
        name: name.to_string(),
        descriptor,
        qos,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn type_name(&self) -> &str {
    self.inner.descriptor.name()
  }

  pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
    &self.inner.descriptor
  }

  pub(crate) fn same_shape(&self, descriptor: &TypeDescriptor) -> bool {
    *self.inner.descriptor.as_ref() == *descriptor
  }
}

impl HasQoSPolicy for Topic {
  fn qos(&self) -> QosPolicies {
    self.inner.qos.clone()
  }
}

/// Whether dispose notifications pass through a content filter.
///
/// A dispose notification carries no representative payload beyond the key
/// fields, so value-based predicates cannot be evaluated against it in full.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DisposeFilterPolicy {
  /// Deliver dispose notifications to every matched reader; the filter is
  /// bypassed. This is the default.
  DeliverAll,
  /// Evaluate the filter against the key fields only. If the expression
  /// references non-key fields the evaluation fails and the notification is
  /// delivered anyway (fail open: losing a data sample is recoverable,
  /// losing a disposal is not).
  ApplyToKey,
}

impl Default for DisposeFilterPolicy {
  fn default() -> Self {
    DisposeFilterPolicy::DeliverAll
  }
}

/// A filtered view over a base topic: readers created from it receive only
/// samples matching the filter predicate.
#[derive(Clone)]
pub struct ContentFilteredTopic {
  inner: Arc<CftInner>,
}

struct CftInner {
  name: String,
  related_topic: Topic,
  filter: ContentFilter,
  dispose_policy: DisposeFilterPolicy,
}

impl ContentFilteredTopic {
  pub(crate) fn new(
    name: &str,
    related_topic: Topic,
    filter: ContentFilter,
    dispose_policy: DisposeFilterPolicy,
  ) -> ContentFilteredTopic {
    ContentFilteredTopic {
      inner: Arc::new(CftInner {
        name: name.to_string(),
        related_topic,
        filter,
        dispose_policy,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn related_topic(&self) -> &Topic {
    &self.inner.related_topic
  }

  pub fn filter(&self) -> &ContentFilter {
    &self.inner.filter
  }

  pub fn dispose_policy(&self) -> DisposeFilterPolicy {
    self.inner.dispose_policy
  }
}
