#![deny(clippy::all, clippy::pedantic, clippy::perf, clippy::suspicious)] // Catch correctness + perf + suspicious patterns early.
#![deny(clippy::unwrap_used, clippy::expect_used)]

//! Speculative devirtualization for the Chic mid-level IR.
//!
//! The [`Devirtualization`] pass predicts receiver types of virtual and interface calls,
//! guards imprecise predictions with a runtime type check, and rewrites the calls into
//! direct calls. [`SpeculationDriver`] is the reference driver that prices each site and
//! commits guard plus rewrite as one transaction.

pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod mir;
pub mod profile;

pub use config::{CostTable, DevirtConfig, DriverThresholds};
pub use error::{DevirtError, Error, Result};
pub use mir::passes::devirt::{
    Candidates, Devirtualization, InvariantViolation, MispredictRate, Prediction, RecoveryPolicy,
    SiteState,
};
pub use mir::passes::report::{PassReport, PassSummary, SiteDecision, SiteOutcome};
pub use mir::passes::speculation::{Speculation, SpeculationDriver, SpeculationPass};
pub use profile::{NoProfile, ProfileQuery, ProfileSource};
