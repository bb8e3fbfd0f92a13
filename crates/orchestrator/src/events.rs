use chrono::{DateTime, Utc};
use hedgebot_execution::TradeCompleted;
use hedgebot_recovery::LevelId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::commands::AccountState;

/// Notifications broadcast by an account actor.
///
/// Subscribers are read-only observers (display, tests); nothing they do
/// feeds back into trading decisions. `level` is `None` when the event
/// concerns the root campaign rather than a hierarchy node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AccountEvent {
    /// A hedged pair fully resolved and its net result was booked.
    TradeSettled {
        outcome: TradeCompleted,
        level: Option<LevelId>,
    },
    /// The active campaign moved from one level to another
    /// (`None` = the root campaign on either side).
    LevelTransition {
        from: Option<LevelId>,
        to: Option<LevelId>,
    },
    /// A campaign reached its profit target.
    TakeProfitReached {
        level: Option<LevelId>,
        total_profit: Decimal,
    },
    /// A campaign's open deficit crossed its drawdown ceiling.
    MaxDrawdownExceeded {
        level: Option<LevelId>,
        amount_to_recover: Decimal,
    },
    /// A campaign entered (`true`) or left (`false`) recovery mode.
    RecoveryModeChanged { level: Option<LevelId>, entered: bool },
    /// The account's session-wide profit target was hit.
    SessionTargetReached { total_profit: Decimal },
    /// A non-fatal fault the actor absorbed and kept running through.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Point-in-time view of one account, published through a watch channel
/// after every state change.
///
/// The campaign fields describe the currently active campaign: the active
/// hierarchy node when a recovery tree exists, the root campaign otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub state: AccountState,
    pub active_level_id: Option<LevelId>,
    pub stake: Decimal,
    pub dynamic_stake: Decimal,
    pub total_profit: Decimal,
    pub is_recovery_mode: bool,
    pub amount_to_recover: Decimal,
    pub in_flight: bool,
    pub online: bool,
}
