//! Browser control channel used by the decision loop.
//!
//! The loop never talks to a browser directly. Everything goes through the
//! [`BrowserSession`] trait, which mirrors the primitives a driver exposes
//! (navigate, click, type, scroll, extract, tabs) plus the two read paths the
//! loop depends on: a raw page snapshot and an activity probe.

pub mod errors;
pub mod memory;
pub mod model;
mod session;

pub use errors::SessionError;
pub use model::{ActivitySample, Bounds, ClickOutcome, PageSnapshot, RawNode, TabTarget};
pub use session::BrowserSession;

pub use qapilot_core_types::{NodeId, SessionId, TabId};
