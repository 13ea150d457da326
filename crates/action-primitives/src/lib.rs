//! Action executor and DOM stability gate.
//!
//! The executor resolves a planned action's handle against the current
//! element index and drives the matching primitive on the live session. The
//! gate waits for the page to settle before the next index is built.

pub mod errors;
mod primitives;
pub mod types;
mod waiting;

pub use errors::{ActionError, ActionErrorKind, ErrorClass};
pub use primitives::{ActionExecutor, ExecutorConfig};
pub use types::{
    ActionFingerprint, ActionKind, ActionRequest, ActionResult, ActionStatus, SelectTarget,
};
pub use waiting::{StabilityGate, StabilityResult};
