//! Conditions: boolean-valued trigger objects observed by a
//! [`WaitSet`](crate::waitset::WaitSet).
//!
//! A reader or writer exclusively owns its [`StatusCondition`]; wait-sets
//! hold only non-owning references. Each condition carries at most one
//! handler, registered explicitly, which the owning wait-set invokes from
//! `dispatch` when the condition is triggered.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Instant;

use enumflags2::BitFlags;
use log::trace;

/// Communication statuses a [`StatusCondition`] can watch.
#[derive(BitFlags, Debug, Copy, Clone, PartialEq)]
#[repr(u32)]
pub enum StatusKind {
  /// The reader has buffered samples waiting to be taken.
  DataAvailable = 0b0000_0001,
  RequestedIncompatibleQos = 0b0000_0010,
  OfferedIncompatibleQos = 0b0000_0100,
  SubscriptionMatched = 0b0000_1000,
  PublicationMatched = 0b0001_0000,
  LivelinessChanged = 0b0010_0000,
}

impl StatusKind {
  pub fn any() -> BitFlags<Self> {
    BitFlags::<Self>::all()
  }
}

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
  NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handler invoked from `WaitSet::dispatch` when the condition is triggered.
pub type Handler = Box<dyn FnMut() + Send>;

/// The wakeup channel between conditions and a blocked `dispatch` call.
///
/// One signal per WaitSet; conditions poke it when their trigger value flips
/// to true.
pub(crate) struct WaitSetSignal {
  poked: Mutex<bool>,
  wakeup: Condvar,
}

impl WaitSetSignal {
  pub fn new() -> WaitSetSignal {
    WaitSetSignal {
      poked: Mutex::new(false),
      wakeup: Condvar::new(),
    }
  }

  pub fn notify(&self) {
    if let Ok(mut poked) = self.poked.lock() {
      *poked = true;
      self.wakeup.notify_all();
    }
  }

  /// Block until poked or the deadline passes. Consumes the poke.
  pub fn wait_until(&self, deadline: Instant) {
    let mut poked = match self.poked.lock() {
      Ok(g) => g,
      Err(_) => return,
    };
    while !*poked {
      let now = Instant::now();
      if now >= deadline {
        break;
      }
      let (guard, _timeout) = match self.wakeup.wait_timeout(poked, deadline - now) {
        Ok(r) => r,
        Err(_) => return,
      };
      poked = guard;
    }
    *poked = false;
  }
}

// Handler slot and signal registrations, shared by both condition kinds.
struct ConditionPlumbing {
  handler: Mutex<Option<Handler>>,
  signals: Mutex<Vec<Weak<WaitSetSignal>>>,
}

impl ConditionPlumbing {
  fn new() -> ConditionPlumbing {
    ConditionPlumbing {
      handler: Mutex::new(None),
      signals: Mutex::new(Vec::new()),
    }
  }

  fn notify_signals(&self) {
    if let Ok(mut signals) = self.signals.lock() {
      signals.retain(|weak| match weak.upgrade() {
        Some(signal) => {
          signal.notify();
          true
        }
        None => false, // wait-set is gone, drop the registration
      });
    }
  }
}

/// A boolean-valued object observed by a WaitSet.
pub trait Condition: Send + Sync {
  fn is_triggered(&self) -> bool;

  /// Unique id, used for attach/detach bookkeeping.
  fn condition_id(&self) -> u64;

  /// Register the single handler invoked on dispatch. Replaces any previous
  /// handler.
  fn set_handler(&self, handler: Handler);

  #[doc(hidden)]
  fn invoke_handler(&self);

  #[doc(hidden)]
  fn add_signal(&self, signal: &Arc<WaitSetSignal>);
}

/// Condition tied to the communication statuses of one reader or writer.
///
/// The trigger value is true when any enabled status is currently active.
/// Only `DataAvailable` is enabled initially: it is the one status the
/// engine clears by itself (when the queue drains). The sticky statuses
/// (matches, QoS incompatibilities) stay active until acknowledged with
/// [`clear_status`](StatusCondition::clear_status), so enabling them without
/// an acknowledging handler turns `dispatch` into a busy loop.
pub struct StatusCondition {
  id: u64,
  enabled: Mutex<BitFlags<StatusKind>>,
  active: Mutex<BitFlags<StatusKind>>,
  plumbing: ConditionPlumbing,
}

impl StatusCondition {
  pub(crate) fn new() -> Arc<StatusCondition> {
    Arc::new(StatusCondition {
      id: next_id(),
      enabled: Mutex::new(StatusKind::DataAvailable.into()),
      active: Mutex::new(BitFlags::empty()),
      plumbing: ConditionPlumbing::new(),
    })
  }

  /// Acknowledge a sticky status, deactivating it until it occurs again.
  pub fn clear_status(&self, kind: StatusKind) {
    self.set_status(kind, false);
  }

  pub fn set_enabled_statuses(&self, mask: BitFlags<StatusKind>) {
    if let Ok(mut enabled) = self.enabled.lock() {
      *enabled = mask;
    }
  }

  pub fn enabled_statuses(&self) -> BitFlags<StatusKind> {
    self
      .enabled
      .lock()
      .map(|e| *e)
      .unwrap_or_else(|_| BitFlags::empty())
  }

  pub fn active_statuses(&self) -> BitFlags<StatusKind> {
    self
      .active
      .lock()
      .map(|a| *a)
      .unwrap_or_else(|_| BitFlags::empty())
  }

  // Entity-side status maintenance. Flipping the trigger from false to true
  // wakes any wait-set this condition is attached to.
  pub(crate) fn set_status(&self, kind: StatusKind, on: bool) {
    let was_triggered = self.is_triggered();
    if let Ok(mut active) = self.active.lock() {
      if on {
        *active = *active | BitFlags::from(kind);
      } else {
        *active = *active & !BitFlags::from(kind);
      }
    }
    let now_triggered = self.is_triggered();
    if !was_triggered && now_triggered {
      trace!("StatusCondition {} triggered by {:?}", self.id, kind);
      self.plumbing.notify_signals();
    }
  }
}

impl Condition for StatusCondition {
  fn is_triggered(&self) -> bool {
    let enabled = match self.enabled.lock() {
      Ok(e) => *e,
      Err(_) => return false,
    };
    let active = match self.active.lock() {
      Ok(a) => *a,
      Err(_) => return false,
    };
    !(enabled & active).is_empty()
  }

  fn condition_id(&self) -> u64 {
    self.id
  }

  fn set_handler(&self, handler: Handler) {
    if let Ok(mut slot) = self.plumbing.handler.lock() {
      *slot = Some(handler);
    }
  }

  fn invoke_handler(&self) {
    if let Ok(mut slot) = self.plumbing.handler.lock() {
      if let Some(handler) = slot.as_mut() {
        handler();
      }
    }
  }

  fn add_signal(&self, signal: &Arc<WaitSetSignal>) {
    if let Ok(mut signals) = self.plumbing.signals.lock() {
      signals.push(Arc::downgrade(signal));
    }
    // attaching an already-triggered condition must wake the wait-set
    if self.is_triggered() {
      signal.notify();
    }
  }
}

/// Manually triggered condition.
///
/// Useful as an application-controlled wakeup, in particular as the shutdown
/// flag a consumer loop checks between `dispatch` calls.
pub struct GuardCondition {
  id: u64,
  trigger: AtomicBool,
  plumbing: ConditionPlumbing,
}

impl GuardCondition {
  pub fn new() -> Arc<GuardCondition> {
    Arc::new(GuardCondition {
      id: next_id(),
      trigger: AtomicBool::new(false),
      plumbing: ConditionPlumbing::new(),
    })
  }

  pub fn set_trigger_value(&self, value: bool) {
    let before = self.trigger.swap(value, Ordering::SeqCst);
    if value && !before {
      self.plumbing.notify_signals();
    }
  }
}

impl Condition for GuardCondition {
  fn is_triggered(&self) -> bool {
    self.trigger.load(Ordering::SeqCst)
  }

  fn condition_id(&self) -> u64 {
    self.id
  }

  fn set_handler(&self, handler: Handler) {
    if let Ok(mut slot) = self.plumbing.handler.lock() {
      *slot = Some(handler);
    }
  }

  fn invoke_handler(&self) {
    if let Ok(mut slot) = self.plumbing.handler.lock() {
      if let Some(handler) = slot.as_mut() {
        handler();
      }
    }
  }

  fn add_signal(&self, signal: &Arc<WaitSetSignal>) {
    if let Ok(mut signals) = self.plumbing.signals.lock() {
      signals.push(Arc::downgrade(signal));
    }
    if self.is_triggered() {
      signal.notify();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_condition_triggers_on_enabled_statuses_only() {
    let condition = StatusCondition::new();
    condition.set_enabled_statuses(StatusKind::DataAvailable.into());

    condition.set_status(StatusKind::SubscriptionMatched, true);
    assert!(!condition.is_triggered());

    condition.set_status(StatusKind::DataAvailable, true);
    assert!(condition.is_triggered());

    condition.set_status(StatusKind::DataAvailable, false);
    assert!(!condition.is_triggered());
  }

  #[test]
  fn guard_condition_flips() {
    let guard = GuardCondition::new();
    assert!(!guard.is_triggered());
    guard.set_trigger_value(true);
    assert!(guard.is_triggered());
    guard.set_trigger_value(false);
    assert!(!guard.is_triggered());
  }

  #[test]
  fn handler_replacement_keeps_one_handler() {
    use std::sync::atomic::AtomicI32;

    let guard = GuardCondition::new();
    let calls = Arc::new(AtomicI32::new(0));

    let c1 = Arc::clone(&calls);
    guard.set_handler(Box::new(move || {
      c1.fetch_add(1, Ordering::SeqCst);
    }));
    let c2 = Arc::clone(&calls);
    guard.set_handler(Box::new(move || {
      c2.fetch_add(10, Ordering::SeqCst);
    }));

    guard.invoke_handler();
    assert_eq!(calls.load(Ordering::SeqCst), 10);
  }
}
