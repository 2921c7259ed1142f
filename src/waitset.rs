//! WaitSet: the cooperative rendezvous between the delivery path and the
//! consuming path.
//!
//! A consumer attaches the conditions it cares about, then loops on
//! [`dispatch`](WaitSet::dispatch); writers running on other threads flip
//! condition triggers, which wakes the dispatch call.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::condition::{Condition, WaitSetSignal};
use crate::error::{Error, Result};

/// Blocks a consumer until an attached condition triggers, then runs the
/// triggered conditions' handlers.
///
/// The WaitSet holds only non-owning references: dropping a reader (and with
/// it the reader's status condition) silently detaches it here.
pub struct WaitSet {
  signal: Arc<WaitSetSignal>,
  attached: Vec<Weak<dyn Condition>>,
}

impl WaitSet {
  pub fn new() -> WaitSet {
    WaitSet {
      signal: Arc::new(WaitSetSignal::new()),
      attached: Vec::new(),
    }
  }

  /// Attach a condition. Attaching the same condition twice is an error.
  pub fn attach_condition<C: Condition + 'static>(&mut self, condition: &Arc<C>) -> Result<()> {
    self.prune();
    let id = condition.condition_id();
    if self
      .attached
      .iter()
      .filter_map(|weak| weak.upgrade())
      .any(|c| c.condition_id() == id)
    {
      return Error::bad_parameter("condition is already attached to this WaitSet");
    }
    condition.add_signal(&self.signal);
    let as_dyn: Arc<dyn Condition> = condition.clone();
    self.attached.push(Arc::downgrade(&as_dyn));
    Ok(())
  }

  /// Detach a previously attached condition.
  pub fn detach_condition<C: Condition + 'static>(&mut self, condition: &Arc<C>) -> Result<()> {
    let id = condition.condition_id();
    let before = self.attached.len();
    self.attached.retain(|weak| match weak.upgrade() {
      Some(c) => c.condition_id() != id,
      None => false,
    });
    if self.attached.len() == before {
      return Error::precondition_not_met("condition is not attached to this WaitSet");
    }
    Ok(())
  }

  /// Number of currently attached (live) conditions.
  pub fn len(&self) -> usize {
    self
      .attached
      .iter()
      .filter(|weak| weak.upgrade().is_some())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Block until at least one attached condition is triggered or `timeout`
  /// elapses.
  ///
  /// On wakeup, invokes the handler of every currently-triggered condition,
  /// each exactly once per dispatch call, and returns how many handlers ran.
  /// A timeout is not an error: the return value is `Ok(0)`. If a condition
  /// is already triggered on entry, its handler runs without blocking.
  ///
  /// Calling dispatch with no conditions attached fails with
  /// [`Error::NoConditions`] rather than sleeping on a wait nothing can wake.
  pub fn dispatch(&mut self, timeout: Duration) -> Result<usize> {
    self.prune();
    if self.attached.is_empty() {
      return Err(Error::NoConditions);
    }
    trace!("dispatch: waiting up to {:?}", timeout);

    let deadline = Instant::now() + timeout;
    loop {
      let triggered: Vec<Arc<dyn Condition>> = self
        .attached
        .iter()
        .filter_map(|weak| weak.upgrade())
        .filter(|c| c.is_triggered())
        .collect();

      if !triggered.is_empty() {
        debug!("dispatch: {} condition(s) triggered", triggered.len());
        for condition in &triggered {
          condition.invoke_handler();
        }
        return Ok(triggered.len());
      }

      if Instant::now() >= deadline {
        trace!("dispatch: timeout");
        return Ok(0);
      }
      self.signal.wait_until(deadline);
    }
  }

  fn prune(&mut self) {
    self.attached.retain(|weak| weak.upgrade().is_some());
  }
}

impl Default for WaitSet {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;

  use super::*;
  use crate::condition::GuardCondition;

  #[test]
  fn dispatch_with_no_conditions_fails_fast() {
    let mut ws = WaitSet::new();
    let started = Instant::now();
    match ws.dispatch(Duration::from_secs(10)) {
      Err(Error::NoConditions) => {}
      other => panic!("expected NoConditions, got {:?}", other.map(|_| ())),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
  }

  #[test]
  fn duplicate_attach_is_rejected() {
    let mut ws = WaitSet::new();
    let guard = GuardCondition::new();
    assert!(ws.attach_condition(&guard).is_ok());
    assert!(ws.attach_condition(&guard).is_err());
    assert_eq!(ws.len(), 1);
  }

  #[test]
  fn detach_unknown_is_an_error() {
    let mut ws = WaitSet::new();
    let guard = GuardCondition::new();
    assert!(ws.detach_condition(&guard).is_err());
  }

  #[test]
  fn timeout_returns_zero_handlers_within_bound() {
    let mut ws = WaitSet::new();
    let guard = GuardCondition::new();
    ws.attach_condition(&guard).unwrap();

    let started = Instant::now();
    let n = ws.dispatch(Duration::from_millis(100)).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(n, 0);
    assert!(elapsed >= Duration::from_millis(80));
    assert!(elapsed < Duration::from_secs(5));
  }

  #[test]
  fn already_triggered_condition_dispatches_without_blocking() {
    let mut ws = WaitSet::new();
    let guard = GuardCondition::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_handler = Arc::clone(&calls);
    guard.set_handler(Box::new(move || {
      calls_in_handler.fetch_add(1, Ordering::SeqCst);
    }));
    guard.set_trigger_value(true);

    ws.attach_condition(&guard).unwrap();

    let started = Instant::now();
    let n = ws.dispatch(Duration::from_secs(30)).unwrap();
    assert_eq!(n, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
  }

  #[test]
  fn cross_thread_trigger_wakes_dispatch() {
    let mut ws = WaitSet::new();
    let guard = GuardCondition::new();
    ws.attach_condition(&guard).unwrap();

    let remote = Arc::clone(&guard);
    let poker = thread::spawn(move || {
      thread::sleep(Duration::from_millis(50));
      remote.set_trigger_value(true);
    });

    let started = Instant::now();
    let n = ws.dispatch(Duration::from_secs(30)).unwrap();
    poker.join().unwrap();

    assert_eq!(n, 1);
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[test]
  fn dropping_a_condition_detaches_it() {
    let mut ws = WaitSet::new();
    let guard = GuardCondition::new();
    ws.attach_condition(&guard).unwrap();
    drop(guard);
    assert!(ws.is_empty());
    assert!(matches!(
      ws.dispatch(Duration::from_millis(1)),
      Err(Error::NoConditions)
    ));
  }
}
