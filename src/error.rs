use std::result;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// This is a specialized Result, similar to std::io::Result
pub type Result<T> = result::Result<T, Error>;

/// Error cases local to a single engine operation.
///
/// Failed operations leave instance and queue state unchanged; no error here
/// is fatal to the engine as a whole. QoS incompatibility between endpoints is
/// deliberately *not* an `Error`: it surfaces asynchronously as a
/// [`DataReaderStatus::RequestedIncompatibleQos`](crate::statusevents::DataReaderStatus)
/// / [`DataWriterStatus::OfferedIncompatibleQos`](crate::statusevents::DataWriterStatus)
/// event, and the affected pair simply does not match.
#[derive(Debug)]
pub enum Error {
  /// A sample does not conform to its topic's type descriptor, or an update
  /// attempts to change the key fields of an existing instance.
  Schema { reason: String },
  /// A topic name is already registered with a different type descriptor.
  DuplicateTopic { name: String },
  /// Illegal parameter value, e.g. an unparseable filter expression.
  BadParameter { reason: String },
  /// A pre-condition for the operation was not met.
  PreconditionNotMet { precondition: String },
  /// `WaitSet::dispatch` was called with no conditions attached.
  /// Returned instead of blocking forever on a wait that nothing can wake.
  NoConditions,
  /// Synchronization with another thread failed because the [other thread
  /// has exited while holding a lock.](https://doc.rust-lang.org/std/sync/struct.PoisonError.html)
  LockPoisoned,
  /// Something that should not go wrong went wrong anyway.
  /// This is usually a bug in minidds.
  Internal { reason: String },
}

impl Error {
  pub fn schema<T>(reason: &str) -> Result<T> {
    Err(Error::Schema {
      reason: reason.to_string(),
    })
  }

  pub fn bad_parameter<T>(reason: &str) -> Result<T> {
    Err(Error::BadParameter {
      reason: reason.to_string(),
    })
  }

  pub fn precondition_not_met<T>(precondition: &str) -> Result<T> {
    Err(Error::PreconditionNotMet {
      precondition: precondition.to_string(),
    })
  }
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_and_err_internal {
  ($($arg:tt)*) => (
      { log::error!($($arg)*);
        Err( $crate::error::Error::Internal{ reason: format!($($arg)*) } )
      }
    )
}

impl<T> From<std::sync::PoisonError<T>> for Error {
  fn from(_e: std::sync::PoisonError<T>) -> Error {
    Error::LockPoisoned
  }
}

impl std::fmt::Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::Schema { reason } => write!(f, "schema violation: {}", reason),
      Error::DuplicateTopic { name } => {
        write!(f, "topic \"{}\" already exists with a different type", name)
      }
      Error::BadParameter { reason } => write!(f, "bad parameter: {}", reason),
      Error::PreconditionNotMet { precondition } => {
        write!(f, "precondition not met: {}", precondition)
      }
      Error::NoConditions => write!(f, "dispatch on a WaitSet with no attached conditions"),
      Error::LockPoisoned => write!(f, "lock poisoned"),
      Error::Internal { reason } => write!(f, "internal error: {}", reason),
    }
  }
}

impl std::error::Error for Error {}
