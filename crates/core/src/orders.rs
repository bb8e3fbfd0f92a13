use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the hedged pair a contract covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContractSide {
    /// Wins if the symbol settles above the (lowered) barrier.
    Higher,
    /// Wins if the symbol settles below the (raised) barrier.
    Lower,
}

impl ContractSide {
    /// Signed barrier offset for this side given the configured distance.
    #[must_use]
    pub fn signed_offset(self, barrier_offset: Decimal) -> Decimal {
        match self {
            Self::Higher => -barrier_offset,
            Self::Lower => barrier_offset,
        }
    }
}

/// One leg of a hedged pair, ready for submission to the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Ledger-allocated, per-account request id.
    pub request_id: u64,
    pub symbol: String,
    pub side: ContractSide,
    pub stake: Decimal,
    /// Signed distance of the barrier from spot.
    pub barrier_offset: Decimal,
    pub duration_ticks: u32,
    pub timestamp: DateTime<Utc>,
}

/// Asynchronous notifications from the trading venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VenueEvent {
    /// The venue accepted an order and opened a contract for it.
    OrderAck {
        request_id: u64,
        contract_id: String,
        /// Estimated gross return if the contract wins.
        payout: Decimal,
    },
    /// The venue refused to place an order.
    OrderRejected { request_id: u64, reason: String },
    /// A contract settled (fully when `is_closing`, partially otherwise).
    Settlement {
        contract_id: String,
        /// Net realized amount for this leg: positive on a win, negative on a loss.
        amount: Decimal,
        is_closing: bool,
    },
    /// Transport connectivity changed.
    ConnectionChanged { online: bool },
}
