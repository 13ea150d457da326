//! Post-action verification
//!
//! This crate judges the outcome of one step:
//! - ExpectSpec rule model (all/any/deny conditions)
//! - URL, title and page-text signals read from a fresh element index
//! - Evidence collection for the step record

pub mod conditions;
pub mod errors;
pub mod evidence;
pub mod types;
pub mod validator;

pub use conditions::Condition;
pub use errors::GateError;
pub use evidence::collect_evidence;
pub use types::{Evidence, EvidenceType, ExpectSpec, PageReading, Verdict, VerificationOutcome};
pub use validator::Verifier;
