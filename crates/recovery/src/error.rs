use thiserror::Error;

use crate::node::LevelId;

/// Errors raised while navigating the recovery level tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// The referenced level does not exist in the tree.
    #[error("unknown level {0}")]
    UnknownLevel(LevelId),

    /// Advancement was requested from a level that has not completed.
    #[error("level {0} has not completed its target")]
    NotCompleted(LevelId),

    /// The level already spawned its child layer.
    #[error("level {0} already escalated")]
    AlreadyEscalated(LevelId),

    /// The level is completed and accepts no further trades.
    #[error("level {0} is completed")]
    Completed(LevelId),

    /// A level identifier string could not be parsed.
    #[error("invalid level id '{0}'")]
    InvalidLevelId(String),
}
