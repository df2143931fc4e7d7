//! Optimisation passes over the speculation IR.

pub mod devirt;
pub mod report;
pub mod speculation;
