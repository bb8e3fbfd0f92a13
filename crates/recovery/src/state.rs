//! Martingale sizing and recovery-mode transitions for a single campaign.
//!
//! A `RecoveryState` tracks one campaign's running profit, its outstanding
//! deficit while recovering, and the stake the next hedged pair should use.
//! It is owned by exactly one level node (or by the account's root campaign)
//! and is mutated only through [`RecoveryState::process`], which returns the
//! events a trade raised instead of notifying subscribers — callers decide
//! what to do with them.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Stake never sizes below this while a campaign is in recovery.
const MIN_RECOVERY_STAKE: Decimal = dec!(0.35);

/// A recovery balance closer to zero than this counts as break-even once
/// the bounded attempt budget is spent.
const BREAK_EVEN_EPSILON: Decimal = dec!(0.01);

/// Events raised by processing one trade outcome, in the order they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignEvent {
    /// Cumulative profit met the campaign target; the campaign is done.
    TakeProfitReached {
        total_profit: Decimal,
        target: Decimal,
    },
    /// The outstanding deficit exceeded the configured ceiling. Escalation
    /// into child levels is the navigator's decision, not this state's.
    MaxDrawdownExceeded {
        amount_to_recover: Decimal,
        max_drawdown: Decimal,
    },
    /// Recovery mode was entered (`entered`) or exited.
    RecoveryStateChanged { entered: bool },
    /// Always last for a trade that did not end the campaign.
    TradeProcessed {
        outcome: Decimal,
        total_profit: Decimal,
        is_recovery_mode: bool,
        dynamic_stake: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct RecoveryState {
    stake: Decimal,
    dynamic_stake: Decimal,
    previous_profit: Decimal,
    is_recovery_mode: bool,
    amount_to_recover: Decimal,
    recovery_results: Vec<Decimal>,
    total_profit: Decimal,
    take_profit_target: Decimal,
    max_drawdown: Decimal,
    martingale_level: u32,
    current_martingale_level: u32,
    recovery_attempts: u32,
    attempts_left: u32,
    barrier_override: Option<Decimal>,
}

impl RecoveryState {
    #[must_use]
    pub fn new(
        stake: Decimal,
        take_profit_target: Decimal,
        max_drawdown: Decimal,
        martingale_level: u32,
        recovery_attempts: u32,
    ) -> Self {
        Self {
            stake,
            dynamic_stake: stake,
            previous_profit: Decimal::ZERO,
            is_recovery_mode: false,
            amount_to_recover: Decimal::ZERO,
            recovery_results: Vec::new(),
            total_profit: Decimal::ZERO,
            take_profit_target,
            max_drawdown,
            martingale_level: martingale_level.max(1),
            current_martingale_level: 1,
            recovery_attempts,
            attempts_left: recovery_attempts,
            barrier_override: None,
        }
    }

    /// Applies one completed hedged-pair outcome to the campaign.
    ///
    /// `estimate` is a fallback reference profit, used only while no positive
    /// outcome has been observed yet. Returns the events this trade raised;
    /// when the campaign target is reached the event list contains only
    /// [`CampaignEvent::TakeProfitReached`] and no further state changes.
    pub fn process(&mut self, outcome: Decimal, estimate: Decimal) -> Vec<CampaignEvent> {
        let mut events = Vec::new();

        self.total_profit += outcome;

        if self.total_profit >= self.take_profit_target {
            events.push(CampaignEvent::TakeProfitReached {
                total_profit: self.total_profit,
                target: self.take_profit_target,
            });
            return events;
        }

        if !self.is_recovery_mode && outcome > Decimal::ZERO {
            self.previous_profit = outcome;
        }
        // Only a positive estimate may stand in; the reference profit is
        // never allowed to go to zero or below.
        if self.previous_profit == Decimal::ZERO && estimate > Decimal::ZERO {
            self.previous_profit = estimate;
        }

        if outcome < Decimal::ZERO {
            self.on_loss(outcome, &mut events);
        } else if self.is_recovery_mode {
            self.on_recovery_gain(outcome, &mut events);
        } else {
            self.barrier_override = None;
        }

        events.push(CampaignEvent::TradeProcessed {
            outcome,
            total_profit: self.total_profit,
            is_recovery_mode: self.is_recovery_mode,
            dynamic_stake: self.dynamic_stake,
        });
        events
    }

    fn on_loss(&mut self, outcome: Decimal, events: &mut Vec<CampaignEvent>) {
        self.recovery_results.push(outcome);

        if self.is_recovery_mode {
            self.amount_to_recover = -self.results_sum() + self.previous_profit;
        } else {
            self.amount_to_recover = outcome.abs() + self.previous_profit;
            self.is_recovery_mode = true;
            self.attempts_left = self.recovery_attempts;
            events.push(CampaignEvent::RecoveryStateChanged { entered: true });
        }

        if self.amount_to_recover > self.max_drawdown {
            events.push(CampaignEvent::MaxDrawdownExceeded {
                amount_to_recover: self.amount_to_recover,
                max_drawdown: self.max_drawdown,
            });
        }

        self.current_martingale_level = self.compute_martingale_level();
        self.update_dynamic_stake();
    }

    fn on_recovery_gain(&mut self, outcome: Decimal, events: &mut Vec<CampaignEvent>) {
        self.recovery_results.push(outcome);
        self.attempts_left = self.attempts_left.saturating_sub(1);

        let sum = self.results_sum();
        let recovered =
            sum >= Decimal::ZERO || (self.attempts_left == 0 && sum.abs() < BREAK_EVEN_EPSILON);

        if recovered {
            self.exit_recovery();
            events.push(CampaignEvent::RecoveryStateChanged { entered: false });
        } else {
            self.amount_to_recover = -sum;
        }
    }

    fn exit_recovery(&mut self) {
        self.is_recovery_mode = false;
        self.recovery_results.clear();
        self.amount_to_recover = Decimal::ZERO;
        self.current_martingale_level = 1;
        self.dynamic_stake = self.stake;
    }

    fn results_sum(&self) -> Decimal {
        self.recovery_results.iter().copied().sum()
    }

    /// Walks the martingale thresholds in increasing order; the first unmet
    /// threshold stops the walk.
    fn compute_martingale_level(&self) -> u32 {
        let mut level = 1;
        for candidate in 2..=self.martingale_level {
            let threshold = self.max_drawdown * Decimal::from(candidate - 1)
                / Decimal::from(self.martingale_level);
            if self.amount_to_recover >= threshold {
                level = candidate;
            } else {
                break;
            }
        }
        level
    }

    fn update_dynamic_stake(&mut self) {
        if self.previous_profit <= Decimal::ZERO {
            tracing::warn!(
                amount_to_recover = %self.amount_to_recover,
                "no positive reference profit; holding stake at {}",
                self.dynamic_stake
            );
            return;
        }

        // The stake factor cancels algebraically but stays: live sizing is
        // calibrated against this exact expression, martingale divisor last.
        let multiplier = self.amount_to_recover * self.stake / self.previous_profit;
        let mut next = (self.stake * multiplier
            / self.stake
            / Decimal::from(self.current_martingale_level))
        .round_dp(2);

        if self.is_recovery_mode && next < MIN_RECOVERY_STAKE {
            next = MIN_RECOVERY_STAKE;
        }
        self.dynamic_stake = next;
    }

    /// Re-arms the campaign for a reduced target after its children already
    /// recovered the bulk of the deficit: the target becomes `remaining`,
    /// profit counts from zero again, and any in-progress recovery is
    /// dropped.
    pub fn retarget(&mut self, remaining: Decimal) {
        self.take_profit_target = remaining;
        self.total_profit = Decimal::ZERO;
        self.exit_recovery();
    }

    /// Deterministically drops any in-progress recovery without emitting
    /// events. Used when a session stops mid-campaign; `total_profit` is
    /// preserved.
    pub fn clear_recovery(&mut self) {
        self.exit_recovery();
    }

    /// Applies a temporary barrier override for the recovery phase. Cleared
    /// automatically by the first non-loss outcome outside recovery.
    pub fn set_barrier_override(&mut self, barrier_offset: Decimal) {
        self.barrier_override = Some(barrier_offset);
    }

    pub fn clear_barrier_override(&mut self) {
        self.barrier_override = None;
    }

    /// Stake the next hedged pair should use.
    #[must_use]
    pub fn current_stake(&self) -> Decimal {
        if self.is_recovery_mode {
            self.dynamic_stake
        } else {
            self.stake
        }
    }

    #[must_use]
    pub const fn stake(&self) -> Decimal {
        self.stake
    }

    #[must_use]
    pub const fn dynamic_stake(&self) -> Decimal {
        self.dynamic_stake
    }

    #[must_use]
    pub const fn previous_profit(&self) -> Decimal {
        self.previous_profit
    }

    #[must_use]
    pub const fn is_recovery_mode(&self) -> bool {
        self.is_recovery_mode
    }

    #[must_use]
    pub const fn amount_to_recover(&self) -> Decimal {
        self.amount_to_recover
    }

    #[must_use]
    pub fn recovery_results(&self) -> &[Decimal] {
        &self.recovery_results
    }

    #[must_use]
    pub const fn total_profit(&self) -> Decimal {
        self.total_profit
    }

    #[must_use]
    pub const fn take_profit_target(&self) -> Decimal {
        self.take_profit_target
    }

    #[must_use]
    pub const fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    #[must_use]
    pub const fn current_martingale_level(&self) -> u32 {
        self.current_martingale_level
    }

    #[must_use]
    pub const fn barrier_override(&self) -> Option<Decimal> {
        self.barrier_override
    }
}
