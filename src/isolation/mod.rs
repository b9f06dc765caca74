//! Isolated execution units.
//!
//! [`IsolatedUnitProcessor`] runs every input in its own unit, a context that
//! shares no mutable memory with the caller or with other units, and
//! collects the results in input order. Each unit hands exactly one result
//! back; that handoff is the only data exchanged.
//!
//! Two kinds of unit exist, selected by [`IsolationMode`]:
//!
//! - **Process** (unix): a forked child with a private copy-on-write address
//!   space. The result crosses a socket pair as JSON. A child that dies
//!   before reporting is recorded as [`TaskErrorKind::Crashed`].
//! - **Thread**: a dedicated thread that owns its input. Isolation comes
//!   from ownership: the input moves into the unit and the task is shared
//!   immutably.
//!
//! Failures are reported per slot. A failing, panicking, crashed or
//! timed-out unit only affects its own slot.
//!
//! [`IsolationMode`]: crate::config::IsolationMode
//! [`TaskErrorKind::Crashed`]: crate::job::TaskErrorKind::Crashed

pub mod processor;
#[cfg(unix)]
mod process;
mod unit;

pub use processor::IsolatedUnitProcessor;
