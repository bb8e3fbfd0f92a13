use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::events::AccountSnapshot;

/// Commands accepted by an account actor.
#[derive(Debug)]
pub enum AccountCommand {
    /// Begin accepting entry signals.
    Start,
    /// Stop accepting entry signals; any in-flight pair is allowed to
    /// settle, then the level hierarchy is reset back to the root.
    Stop,
    /// Entry trigger from the signal source. The hedged pair is
    /// direction-neutral, so the trigger carries no payload.
    Signal,
    /// Request a point-in-time snapshot of the account.
    GetSnapshot(oneshot::Sender<AccountSnapshot>),
    /// Terminate the actor.
    Shutdown,
}

/// Lifecycle state of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountState {
    /// Not accepting entry signals.
    Stopped,
    /// Accepting entry signals.
    Running,
    /// The session profit target was hit; no further entries this session.
    TargetReached,
}
