//! Element Index Builder.
//!
//! Turns a raw page tree into a flat, generation-stamped mapping from small
//! integer handles to element descriptors. Descriptors carry synthetic hints
//! from an ordered annotator pipeline and a freshness flag for elements that
//! were not present in the previous generation.

pub mod annotators;
mod builder;
pub mod errors;
pub mod model;
pub mod render;

pub use annotators::{Annotator, AnnotatorPipeline, Neighborhood};
pub use builder::{IndexBuilder, IndexConfig};
pub use errors::PerceiverError;
pub use model::{Annotation, ElementAttributes, ElementDescriptor, ElementIndex};
pub use render::IndexRenderer;
