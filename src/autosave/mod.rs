//! Autosave for clinic forms.
//!
//! Guarantees dirty form content reaches an external save operation under
//! three triggers: a fixed-period timer, an explicit user action, and an
//! unload notification from the host.
//!
//! ## Architecture
//!
//! ```text
//! form view ──edits──▶ AutosaveController ──snapshot──▶ SaveSink
//!                          ▲        ▲
//!             Scheduler ───┘        └─── LifecycleSignal
//!                    (AutosaveSession wires both)
//! ```
//!
//! ## Rules
//! - Fixed cadence: check every period, save only if dirty (no debounce)
//! - One save in flight at a time; extra requests coalesce
//! - Snapshot isolation: the sink sees the Draft as of the save's start
//! - A failed save keeps the Draft and the dirty flag for the next trigger
//! - Unload flush is best-effort, never awaited by the host

pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod types;

pub use controller::AutosaveController;
pub use error::{LifecycleError, SaveError};
pub use lifecycle::{LifecycleSignal, Registration, ShutdownSignal, UnloadHook};
pub use scheduler::{ManualScheduler, Scheduler, TickCallback, TimerHandle, TokioScheduler};
pub use session::{AutosaveSession, SessionError};
pub use sink::{FnSink, SaveSink, StoreSink};
pub use types::*;
