use serde::Serialize;

use super::{Devirtualization, Prediction};
use crate::error::DevirtError;
use crate::metadata::MetadataAccess;
use crate::mir::InstrId;

/// How execution recovers when a guarded prediction turns out wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPolicy {
    /// Precise prediction; the speculation cannot fail.
    NotNeeded,
    /// Fall back to the interpreter.
    Deopt,
    /// Compile a specialized body per candidate, each behind its own type check.
    CodeVersioning,
}

impl RecoveryPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryPolicy::NotNeeded => "not-needed",
            RecoveryPolicy::Deopt => "deopt",
            RecoveryPolicy::CodeVersioning => "code-versioning",
        }
    }
}

impl std::fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<M: MetadataAccess> Devirtualization<'_, M> {
    /// A single observed type is cheap to deoptimize from; several observed types keep
    /// the generic dispatch around as a second code version.
    ///
    /// # Errors
    ///
    /// Fails when `site` has no recorded prediction.
    pub fn recovery_policy(&self, site: InstrId) -> Result<RecoveryPolicy, DevirtError> {
        let policy = match self.recorded(site)? {
            Prediction::Precise(_) => RecoveryPolicy::NotNeeded,
            Prediction::Imprecise(candidates) if candidates.count() == 1 => RecoveryPolicy::Deopt,
            Prediction::Imprecise(_) => RecoveryPolicy::CodeVersioning,
        };
        Ok(policy)
    }
}
