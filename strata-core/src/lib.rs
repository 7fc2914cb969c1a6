//! Strata Core
//!
//! Core library for declaring infrastructure as a tree of constructs whose
//! attributes may reference values that only exist after apply. The
//! synthesizer orders those constructs by their references and emits a
//! configuration document for an external apply engine.

pub mod graph;
pub mod resource;
pub mod schema;
pub mod synth;
pub mod tree;
pub mod value;
