use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::metadata::{MethodIndex, TypeId};
use crate::mir::InstrId;

/// Unified error type for configuration, reporting, and pass bookkeeping.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Config {
        message: String,
    },
    Internal {
        message: String,
        backtrace: Option<Backtrace>,
    },
}

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Construct a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Construct a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: capture_backtrace(),
        }
    }

    /// Return the captured backtrace, if any.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Error::Internal { backtrace, .. } => backtrace.as_ref(),
            _ => None,
        }
    }
}

fn capture_backtrace() -> Option<Backtrace> {
    if cfg!(debug_assertions) {
        Some(Backtrace::force_capture())
    } else {
        None
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Config { message } => write!(f, "configuration error: {message}"),
            Error::Internal { message, .. } => write!(f, "internal error: {message}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Config { .. } | Error::Internal { .. } => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}

/// Reason a single call site was excluded from, or aborted during, speculation.
///
/// These never escape the pass as compilation failures: the affected site keeps its
/// original polymorphic call and the pass moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevirtError {
    /// The instruction is not a virtual or interface invoke, or is an intrinsic.
    NotCandidate { site: InstrId },
    /// Neither static analysis nor profile data produced a prediction.
    NoPrediction { site: InstrId },
    /// The declared target could not be resolved in the caller's reference table.
    UnresolvedTarget { index: MethodIndex },
    /// The predicted type cannot be named from the caller's reference table.
    NotRepresentable { ty: TypeId },
    /// The predicted type has no override for the declared target.
    MissingOverride { method: String, ty: TypeId },
    /// The actual dispatch target cannot be named from the caller's reference table.
    TargetNotNameable { method: String },
    /// The metadata handshake could not be acquired.
    MetadataUnavailable,
    /// A type handle was dereferenced after the handle scope was released.
    HandleReleased,
    /// The requested state change is not legal for the site.
    InvalidTransition { site: InstrId, from: String, to: String },
    /// The IR does not have the shape the pass expects.
    MalformedIr { message: String },
}

impl DevirtError {
    /// Short machine-friendly label used in decision records and trace events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DevirtError::NotCandidate { .. } => "not-candidate",
            DevirtError::NoPrediction { .. } => "no-prediction",
            DevirtError::UnresolvedTarget { .. } => "unresolved-target",
            DevirtError::NotRepresentable { .. } => "not-representable",
            DevirtError::MissingOverride { .. } => "missing-override",
            DevirtError::TargetNotNameable { .. } => "target-not-nameable",
            DevirtError::MetadataUnavailable => "metadata-unavailable",
            DevirtError::HandleReleased => "handle-released",
            DevirtError::InvalidTransition { .. } => "invalid-transition",
            DevirtError::MalformedIr { .. } => "malformed-ir",
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        DevirtError::MalformedIr {
            message: message.into(),
        }
    }
}

impl fmt::Display for DevirtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevirtError::NotCandidate { site } => {
                write!(f, "{site} is not a virtual or interface call")
            }
            DevirtError::NoPrediction { site } => write!(f, "no prediction available for {site}"),
            DevirtError::UnresolvedTarget { index } => {
                write!(f, "declared target {index} is unresolved")
            }
            DevirtError::NotRepresentable { ty } => {
                write!(f, "type {ty} is not in the caller's reference table")
            }
            DevirtError::MissingOverride { method, ty } => {
                write!(f, "type {ty} has no override of `{method}`")
            }
            DevirtError::TargetNotNameable { method } => {
                write!(f, "target `{method}` is not in the caller's reference table")
            }
            DevirtError::MetadataUnavailable => f.write_str("metadata handshake unavailable"),
            DevirtError::HandleReleased => f.write_str("type handle used after release"),
            DevirtError::InvalidTransition { site, from, to } => {
                write!(f, "{site}: illegal state change {from} -> {to}")
            }
            DevirtError::MalformedIr { message } => write!(f, "malformed IR: {message}"),
        }
    }
}

impl StdError for DevirtError {}
