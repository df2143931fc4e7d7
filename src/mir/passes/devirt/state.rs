use std::fmt;

use serde::Serialize;

/// Lifecycle of one call site within a pass run.
///
/// ```text
/// Unknown -> Excluded
/// Unknown -> Precise -> Specialized | Aborted
/// Unknown -> Imprecise(k) -> GuardInserted -> Specialized | Aborted
/// Imprecise(k) -> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteState {
    Unknown,
    Excluded,
    Precise,
    Imprecise(usize),
    GuardInserted,
    Specialized,
    Aborted,
}

impl SiteState {
    #[must_use]
    pub fn can_transition_to(self, next: SiteState) -> bool {
        matches!(
            (self, next),
            (
                SiteState::Unknown,
                SiteState::Excluded | SiteState::Precise | SiteState::Imprecise(_)
            ) | (
                SiteState::Precise,
                SiteState::Specialized | SiteState::Aborted
            ) | (
                SiteState::Imprecise(_),
                SiteState::GuardInserted | SiteState::Aborted
            ) | (
                SiteState::GuardInserted,
                SiteState::Specialized | SiteState::Aborted
            )
        )
    }

    /// Terminal states accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SiteState::Excluded | SiteState::Specialized | SiteState::Aborted
        )
    }
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteState::Unknown => f.write_str("unknown"),
            SiteState::Excluded => f.write_str("excluded"),
            SiteState::Precise => f.write_str("precise"),
            SiteState::Imprecise(count) => write!(f, "imprecise({count})"),
            SiteState::GuardInserted => f.write_str("guard-inserted"),
            SiteState::Specialized => f.write_str("specialized"),
            SiteState::Aborted => f.write_str("aborted"),
        }
    }
}
