//! Pipeline lifecycle and resource enums.

use serde::{Deserialize, Serialize};

/// Lifecycle of one pipeline run.
///
/// ```text
/// NotStarted -> Extracting -> Transforming -> Loading -> Completed
///      \____________\______________\____________\-----> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    NotStarted,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl PipelineState {
    /// Whether the run has finished, successfully or not.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only state a successful step may move to.
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Extracting),
            Self::Extracting => Some(Self::Transforming),
            Self::Transforming => Some(Self::Loading),
            Self::Loading => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Failed {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not_started",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Paginated collections exposed by the source catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Users,
    Carts,
}

impl Resource {
    /// URL path segment, which is also the envelope key holding the records.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Carts => "carts",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}
