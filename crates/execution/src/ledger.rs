//! Tracks the one hedged pair an account may have in flight and matches
//! asynchronous acks, rejections, and settlements back to its legs. The
//! two legs settle independently and in any order; the ledger produces a
//! single net outcome exactly once, when no leg remains outstanding.

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;

use hedgebot_core::orders::{ContractSide, OrderRequest};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A hedged pair is already in flight; entry signals are serialized.
    #[error("a hedged pair is already in flight")]
    PairPending,
}

/// Net result of one completed hedged pair.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TradeCompleted {
    /// Sum of the legs' realized amounts.
    pub profit: Decimal,
    /// Stake per leg at submission.
    pub stake: Decimal,
    /// True when at least one leg failed to place.
    pub failed: bool,
    /// Acked payout estimates minus total staked: the net result had the
    /// pair settled inside the corridor. Negative until both legs ack.
    pub estimated_net_win: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegStatus {
    AwaitingAck,
    Open,
    Closed,
    Failed,
}

#[derive(Debug, Clone)]
struct Leg {
    request_id: u64,
    side: ContractSide,
    contract_id: Option<String>,
    payout: Option<Decimal>,
    status: LegStatus,
}

#[derive(Debug, Clone)]
struct PendingPair {
    stake: Decimal,
    legs: [Leg; 2],
    settled: Decimal,
    failed: bool,
}

impl PendingPair {
    fn leg_by_request(&mut self, request_id: u64) -> Option<&mut Leg> {
        self.legs.iter_mut().find(|leg| leg.request_id == request_id)
    }

    fn leg_by_contract(&mut self, contract_id: &str) -> Option<&mut Leg> {
        self.legs
            .iter_mut()
            .find(|leg| leg.contract_id.as_deref() == Some(contract_id))
    }

    fn outstanding(&self) -> bool {
        self.legs
            .iter()
            .any(|leg| matches!(leg.status, LegStatus::AwaitingAck | LegStatus::Open))
    }

    fn estimated_net_win(&self) -> Decimal {
        let payouts: Decimal = self.legs.iter().filter_map(|leg| leg.payout).sum();
        payouts - self.stake * Decimal::TWO
    }
}

/// Per-account order ledger. All mutation happens on the owning account
/// actor's task, so submission and settlement cannot race.
#[derive(Debug)]
pub struct TradeLedger {
    account_id: String,
    next_request_id: u64,
    pending: Option<PendingPair>,
}

impl TradeLedger {
    #[must_use]
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            next_request_id: 0,
            pending: None,
        }
    }

    /// Opens a hedged pair: one `Higher` leg below spot and one `Lower`
    /// leg above it, each staked with `stake`. Returns the two requests
    /// for fire-and-forget submission.
    ///
    /// # Errors
    ///
    /// `PairPending` while a pair is already in flight.
    pub fn submit(
        &mut self,
        stake: Decimal,
        barrier_offset: Decimal,
        symbol: &str,
        duration_ticks: u32,
    ) -> Result<[OrderRequest; 2], LedgerError> {
        if self.pending.is_some() {
            return Err(LedgerError::PairPending);
        }

        let timestamp = Utc::now();
        let requests = [ContractSide::Higher, ContractSide::Lower].map(|side| {
            self.next_request_id += 1;
            OrderRequest {
                request_id: self.next_request_id,
                symbol: symbol.to_string(),
                side,
                stake,
                barrier_offset: side.signed_offset(barrier_offset),
                duration_ticks,
                timestamp,
            }
        });
        let legs = requests.clone().map(|request| Leg {
            request_id: request.request_id,
            side: request.side,
            contract_id: None,
            payout: None,
            status: LegStatus::AwaitingAck,
        });
        self.pending = Some(PendingPair {
            stake,
            legs,
            settled: Decimal::ZERO,
            failed: false,
        });

        tracing::info!(
            account = %self.account_id,
            higher = requests[0].request_id,
            lower = requests[1].request_id,
            stake = %stake,
            "submitting hedged pair"
        );
        Ok(requests)
    }

    /// Binds an acknowledged contract to its leg.
    pub fn on_ack(&mut self, request_id: u64, contract_id: &str, payout: Decimal) {
        let Some(pair) = self.pending.as_mut() else {
            tracing::warn!(account = %self.account_id, request_id, "ack with no pair in flight; dropped");
            return;
        };
        let Some(leg) = pair.leg_by_request(request_id) else {
            tracing::warn!(account = %self.account_id, request_id, "ack for an unknown leg; dropped");
            return;
        };
        if leg.status != LegStatus::AwaitingAck {
            tracing::warn!(account = %self.account_id, request_id, "duplicate ack; dropped");
            return;
        }
        leg.contract_id = Some(contract_id.to_string());
        leg.payout = Some(payout);
        leg.status = LegStatus::Open;
        tracing::debug!(
            account = %self.account_id,
            request_id,
            contract_id,
            side = ?leg.side,
            payout = %payout,
            "leg acknowledged"
        );
    }

    /// Marks a leg as failed to place; the pair fails with it. Completion
    /// still waits for any other leg that did go out.
    pub fn on_order_rejected(&mut self, request_id: u64, reason: &str) -> Option<TradeCompleted> {
        let Some(pair) = self.pending.as_mut() else {
            tracing::warn!(account = %self.account_id, request_id, "rejection with no pair in flight; dropped");
            return None;
        };
        let Some(leg) = pair.leg_by_request(request_id) else {
            tracing::warn!(account = %self.account_id, request_id, "rejection for an unknown leg; dropped");
            return None;
        };
        tracing::warn!(account = %self.account_id, request_id, reason, "leg failed to place");
        leg.status = LegStatus::Failed;
        pair.failed = true;
        self.try_complete()
    }

    /// Applies a settlement to the leg holding `contract_id`. Settlements
    /// for contracts this ledger never opened are dropped untouched.
    pub fn on_settlement(
        &mut self,
        contract_id: &str,
        amount: Decimal,
        is_closing: bool,
    ) -> Option<TradeCompleted> {
        let Some(pair) = self.pending.as_mut() else {
            tracing::warn!(account = %self.account_id, contract_id, "settlement with no pair in flight; dropped");
            return None;
        };
        let Some(leg) = pair.leg_by_contract(contract_id) else {
            tracing::warn!(account = %self.account_id, contract_id, "settlement for an unknown contract; dropped");
            return None;
        };
        if leg.status != LegStatus::Open {
            tracing::warn!(account = %self.account_id, contract_id, "settlement on a closed leg; dropped");
            return None;
        }
        if is_closing {
            leg.status = LegStatus::Closed;
        }
        pair.settled += amount;
        tracing::debug!(
            account = %self.account_id,
            contract_id,
            amount = %amount,
            is_closing,
            "leg settlement"
        );
        self.try_complete()
    }

    /// True while a pair is in flight; the actor gates entry signals on it.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.pending.is_some()
    }

    fn try_complete(&mut self) -> Option<TradeCompleted> {
        if self.pending.as_ref().map_or(true, PendingPair::outstanding) {
            return None;
        }
        let pair = self.pending.take()?;
        let completed = TradeCompleted {
            profit: pair.settled,
            stake: pair.stake,
            failed: pair.failed,
            estimated_net_win: pair.estimated_net_win(),
        };
        tracing::info!(
            account = %self.account_id,
            profit = %completed.profit,
            failed = completed.failed,
            "hedged pair completed"
        );
        Some(completed)
    }
}
