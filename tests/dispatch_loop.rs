//! The consumer-loop shape of a monitoring application: a background thread
//! publishes, the main thread blocks in WaitSet::dispatch, and condition
//! handlers drain the readers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use minidds::policy::History;
use minidds::{
  Condition, DomainParticipant, DynamicData, FieldType, GuardCondition, QosPolicies,
  TypeDescriptor, WaitSet,
};

fn temperature_type() -> TypeDescriptor {
  TypeDescriptor::builder("Temperature")
    .key_field("sensor_id", FieldType::Text)
    .field("degrees", FieldType::Int32)
    .build()
    .unwrap()
}

fn temperature(sensor: &str, degrees: i32) -> DynamicData {
  let mut data = DynamicData::new("Temperature");
  data.set("sensor_id", sensor).set("degrees", degrees);
  data
}

fn keep_all() -> QosPolicies {
  QosPolicies::builder().history(History::KeepAll).build()
}

#[test]
fn background_publisher_drives_the_dispatch_loop() {
  let dp = DomainParticipant::new(0);
  let qos = keep_all();
  let topic = dp.create_topic("ChocolateTemperature", temperature_type(), &qos).unwrap();
  let writer = dp
    .create_publisher(&qos)
    .unwrap()
    .create_datawriter(&topic, None)
    .unwrap();
  let reader = dp
    .create_subscriber(&qos)
    .unwrap()
    .create_datareader(&topic, None)
    .unwrap();

  const SAMPLES: usize = 20;

  let received = Arc::new(AtomicUsize::new(0));
  let condition = reader.status_condition();
  {
    let reader = reader.clone();
    let received = Arc::clone(&received);
    condition.set_handler(Box::new(move || {
      let samples = reader.take_all().unwrap();
      received.fetch_add(samples.len(), Ordering::SeqCst);
    }));
  }

  let mut waitset = WaitSet::new();
  waitset.attach_condition(&condition).unwrap();

  // the publishing side runs on its own thread, as a sensor would
  let publisher_task = thread::spawn(move || {
    for n in 0..SAMPLES {
      writer.write(temperature("sensor-1", 30 + (n % 3) as i32)).unwrap();
      thread::sleep(Duration::from_millis(2));
    }
  });

  let deadline = Instant::now() + Duration::from_secs(30);
  while received.load(Ordering::SeqCst) < SAMPLES {
    assert!(Instant::now() < deadline, "dispatch loop starved");
    waitset.dispatch(Duration::from_millis(250)).unwrap();
  }
  publisher_task.join().unwrap();

  assert_eq!(received.load(Ordering::SeqCst), SAMPLES);
}

#[test]
fn data_available_resets_once_the_queue_is_drained() {
  let dp = DomainParticipant::new(0);
  let qos = keep_all();
  let topic = dp.create_topic("ChocolateTemperature", temperature_type(), &qos).unwrap();
  let writer = dp
    .create_publisher(&qos)
    .unwrap()
    .create_datawriter(&topic, None)
    .unwrap();
  let reader = dp
    .create_subscriber(&qos)
    .unwrap()
    .create_datareader(&topic, None)
    .unwrap();

  let condition = reader.status_condition();
  writer.write(temperature("s1", 31)).unwrap();
  assert!(condition.is_triggered());

  reader.take_all().unwrap();
  assert!(!condition.is_triggered());

  // with nothing buffered, dispatch times out quietly
  let mut waitset = WaitSet::new();
  waitset.attach_condition(&condition).unwrap();
  let started = Instant::now();
  let dispatched = waitset.dispatch(Duration::from_millis(100)).unwrap();
  assert_eq!(dispatched, 0);
  assert!(started.elapsed() >= Duration::from_millis(80));
}

#[test]
fn handlers_run_once_per_dispatch_even_with_multiple_conditions() {
  let dp = DomainParticipant::new(0);
  let qos = keep_all();
  let topic = dp.create_topic("ChocolateTemperature", temperature_type(), &qos).unwrap();
  let writer = dp
    .create_publisher(&qos)
    .unwrap()
    .create_datawriter(&topic, None)
    .unwrap();
  let subscriber = dp.create_subscriber(&qos).unwrap();
  let reader_a = subscriber.create_datareader(&topic, None).unwrap();
  let reader_b = subscriber.create_datareader(&topic, None).unwrap();

  let a_runs = Arc::new(AtomicUsize::new(0));
  let b_runs = Arc::new(AtomicUsize::new(0));

  let condition_a = reader_a.status_condition();
  {
    let reader = reader_a.clone();
    let runs = Arc::clone(&a_runs);
    condition_a.set_handler(Box::new(move || {
      runs.fetch_add(1, Ordering::SeqCst);
      reader.take_all().unwrap();
    }));
  }
  let condition_b = reader_b.status_condition();
  {
    let reader = reader_b.clone();
    let runs = Arc::clone(&b_runs);
    condition_b.set_handler(Box::new(move || {
      runs.fetch_add(1, Ordering::SeqCst);
      reader.take_all().unwrap();
    }));
  }

  let mut waitset = WaitSet::new();
  waitset.attach_condition(&condition_a).unwrap();
  waitset.attach_condition(&condition_b).unwrap();

  writer.write(temperature("s1", 31)).unwrap();

  let dispatched = waitset.dispatch(Duration::from_secs(4)).unwrap();
  assert_eq!(dispatched, 2);
  assert_eq!(a_runs.load(Ordering::SeqCst), 1);
  assert_eq!(b_runs.load(Ordering::SeqCst), 1);

  // both queues drained: the next dispatch has nothing to do
  assert_eq!(waitset.dispatch(Duration::from_millis(50)).unwrap(), 0);
}

#[test]
fn guard_condition_works_as_a_shutdown_token() {
  let dp = DomainParticipant::new(0);
  let qos = keep_all();
  let topic = dp.create_topic("ChocolateTemperature", temperature_type(), &qos).unwrap();
  let reader = dp
    .create_subscriber(&qos)
    .unwrap()
    .create_datareader(&topic, None)
    .unwrap();

  let shutdown = GuardCondition::new();
  let condition = reader.status_condition();

  let mut waitset = WaitSet::new();
  waitset.attach_condition(&condition).unwrap();
  waitset.attach_condition(&shutdown).unwrap();

  let remote = Arc::clone(&shutdown);
  let signaller = thread::spawn(move || {
    thread::sleep(Duration::from_millis(50));
    remote.set_trigger_value(true);
  });

  // the consumer loop: dispatch until the shutdown guard trips
  let started = Instant::now();
  loop {
    waitset.dispatch(Duration::from_millis(500)).unwrap();
    if shutdown.is_triggered() {
      break;
    }
    assert!(started.elapsed() < Duration::from_secs(30), "never woke up");
  }
  signaller.join().unwrap();

  // shutdown latency is bounded by roughly one dispatch timeout
  assert!(started.elapsed() < Duration::from_secs(5));
}
