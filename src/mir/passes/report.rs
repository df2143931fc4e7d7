//! Per-site decisions from a speculation run, plus the optional JSON-line sink.
//!
//! Setting `DEVIRT_PASS_REPORT_OUT` to a file path appends one snapshot per run.

use serde::Serialize;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::devirt::{MispredictRate, RecoveryPolicy, SiteState};
use crate::logging::LOG_TARGET;
use crate::mir::InstrId;

const REPORT_ENV: &str = "DEVIRT_PASS_REPORT_OUT";

/// What happened to one call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum SiteOutcome {
    /// No prediction could be made.
    Excluded,
    /// Predicted, but the guard would cost too much for what it saves.
    Declined,
    Specialized { guarded: bool },
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteDecision {
    pub site: InstrId,
    pub pc: u32,
    pub outcome: SiteOutcome,
    /// Site state once the driver is done with it.
    pub state: SiteState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mispredict: Option<MispredictRate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryPolicy>,
}

impl SiteDecision {
    #[must_use]
    pub fn excluded(site: InstrId, pc: u32) -> Self {
        Self {
            site,
            pc,
            outcome: SiteOutcome::Excluded,
            state: SiteState::Excluded,
            cost: None,
            profit: None,
            mispredict: None,
            recovery: None,
        }
    }
}

/// Totals over a [`PassReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub considered: usize,
    pub excluded: usize,
    pub declined: usize,
    pub specialized: usize,
    pub guarded: usize,
    pub aborted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub pass: &'static str,
    /// The pass declined to run on this graph at all.
    pub gated: bool,
    pub decisions: Vec<SiteDecision>,
}

impl PassReport {
    #[must_use]
    pub fn new(pass: &'static str) -> Self {
        Self {
            pass,
            gated: false,
            decisions: Vec::new(),
        }
    }

    #[must_use]
    pub fn decision(&self, site: InstrId) -> Option<&SiteDecision> {
        self.decisions.iter().find(|decision| decision.site == site)
    }

    #[must_use]
    pub fn summary(&self) -> PassSummary {
        let mut summary = PassSummary {
            considered: self.decisions.len(),
            ..PassSummary::default()
        };
        for decision in &self.decisions {
            match decision.outcome {
                SiteOutcome::Excluded => summary.excluded += 1,
                SiteOutcome::Declined => summary.declined += 1,
                SiteOutcome::Specialized { guarded } => {
                    summary.specialized += 1;
                    if guarded {
                        summary.guarded += 1;
                    }
                }
                SiteOutcome::Aborted { .. } => summary.aborted += 1,
            }
        }
        summary
    }
}

/// Append `report` to the file named by `DEVIRT_PASS_REPORT_OUT`, when set.
pub fn record_pass_report(report: &PassReport) {
    let path = match env::var(REPORT_ENV) {
        Ok(value) if !value.is_empty() => value,
        _ => return,
    };
    if let Err(err) = append_report(Path::new(&path), report) {
        tracing::warn!(
            target: LOG_TARGET,
            stage = "report",
            path = %path,
            error = %err,
            "failed to write pass report snapshot"
        );
    }
}

/// Append one JSON line describing `report` to `path`, creating parent directories.
///
/// # Errors
///
/// Propagates filesystem and serialization failures.
pub fn append_report(path: &Path, report: &PassReport) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let snapshot = ReportSnapshot {
        profile: build_profile(),
        target: format!("{}-{}", env::consts::OS, env::consts::ARCH),
        summary: report.summary(),
        report,
    };
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, &snapshot)?;
    file.write_all(b"\n")?;
    Ok(())
}

#[derive(Serialize)]
struct ReportSnapshot<'a> {
    profile: &'static str,
    target: String,
    summary: PassSummary,
    report: &'a PassReport,
}

const fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}
