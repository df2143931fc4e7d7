//! Speculation IR: instruction graph, splice primitives, printing, and verification.

mod data;
mod graph;
pub mod passes;
mod pretty;
mod verify;

pub use data::*;
pub use graph::{Graph, GraphCheckpoint};
pub use pretty::format_graph;
pub use verify::{VerifyError, verify_graph};
