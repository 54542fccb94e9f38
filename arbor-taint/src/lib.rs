//! # arbor-taint: Information-flow control lattice
//!
//! Tracks trust properties of values as they flow through agent
//! computations, LLM calls in particular. A [`Taint`] bundles:
//!
//! - **level** — how trustworthy the producer was (`trusted` → `hostile`)
//! - **sensitivity** — how damaging disclosure would be (`public` → `restricted`)
//! - **confidence** — how well the content has been corroborated
//! - **sanitizations** — which cleaning passes the value has survived
//!
//! Everything here is a pure function over immutable values; there is no
//! registry and no interior mutability. Combining values always moves
//! toward the pessimistic corner of the lattice, and the serialized form
//! decodes fail-closed: unknown enum strings collapse to the most
//! restrictive member.

#![warn(missing_docs)]

pub mod codec;
pub mod lattice;

pub use codec::{from_map, to_map};
pub use lattice::{
    for_llm_output, propagate, Confidence, ReductionMethod, Sanitizations, Sensitivity, Taint,
    TaintError, TaintLevel, UseContext, UseDecision,
};

/// Result type for taint operations
pub type Result<T> = std::result::Result<T, TaintError>;
