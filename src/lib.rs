//! minidds is a minimal, in-process data-distribution core in the shape of
//! DDS: typed topics, keyed instances with a lifecycle, QoS-governed
//! writer/reader matching, content-filtered subscriptions, and a
//! condition/wait-set dispatch loop.
//!
//! There is no network transport or discovery protocol here: a
//! [`DomainParticipant`] matches the writers and readers created within one
//! process, and delivery is a function call from the writing thread into the
//! matched readers' buffers.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use minidds::{
//!   Condition, DomainParticipant, DynamicData, FieldType, QosPolicies, TypeDescriptor, WaitSet,
//! };
//!
//! let dp = DomainParticipant::new(0);
//! let qos = QosPolicies::qos_none();
//!
//! let descriptor = TypeDescriptor::builder("Temperature")
//!   .key_field("sensor_id", FieldType::Text)
//!   .field("degrees", FieldType::Int32)
//!   .build()
//!   .unwrap();
//! let topic = dp.create_topic("ChocolateTemperature", descriptor, &qos).unwrap();
//!
//! let publisher = dp.create_publisher(&qos).unwrap();
//! let subscriber = dp.create_subscriber(&qos).unwrap();
//! let writer = publisher.create_datawriter(&topic, None).unwrap();
//! let reader = subscriber.create_datareader(&topic, None).unwrap();
//!
//! // wake on arriving data
//! let mut waitset = WaitSet::new();
//! let condition = reader.status_condition();
//! {
//!   let reader = reader.clone();
//!   condition.set_handler(Box::new(move || {
//!     for _sample in reader.take_all().unwrap() {
//!       // process sample
//!     }
//!   }));
//! }
//! waitset.attach_condition(&condition).unwrap();
//!
//! let mut sample = DynamicData::new("Temperature");
//! sample.set("sensor_id", "sensor-1").set("degrees", 31i32);
//! writer.write(sample).unwrap();
//!
//! let dispatched = waitset.dispatch(Duration::from_secs(4)).unwrap();
//! assert_eq!(dispatched, 1);
//! ```

#[macro_use]
pub mod error;

pub mod condition;
pub mod datasample;
pub mod dynamic;
pub mod filter;
pub mod instances;
pub mod participant;
pub mod pubsub;
pub mod qos;
pub mod readcondition;
pub mod reader;
pub mod sampleinfo;
pub mod statusevents;
pub mod topic;
pub mod typedesc;
pub mod waitset;
pub mod writer;

pub use condition::{Condition, GuardCondition, StatusCondition, StatusKind};
pub use datasample::{DataSample, Sample};
pub use dynamic::{DynamicData, FieldValue, InstanceHandle, KeyValue};
pub use error::{Error, Result};
pub use filter::ContentFilter;
pub use participant::{DomainParticipant, EndpointId};
pub use pubsub::{Publisher, Subscriber};
pub use qos::{policy, QosPolicies, QosPolicyBuilder, QosPolicyId};
pub use readcondition::ReadCondition;
pub use reader::DataReader;
pub use sampleinfo::{InstanceState, SampleInfo, SampleState, ViewState};
pub use statusevents::{
  CollectingSink, DataReaderStatus, DataWriterStatus, LogSink, StatusEvent, StatusSink,
};
pub use topic::{ContentFilteredTopic, DisposeFilterPolicy, Topic};
pub use typedesc::{FieldType, TypeDescriptor, TypeRegistry};
pub use waitset::WaitSet;
pub use writer::DataWriter;
