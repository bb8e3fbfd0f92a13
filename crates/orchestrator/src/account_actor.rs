//! The per-account actor: one task owning one venue connection, one trade
//! ledger and one recovery hierarchy.
//!
//! All trading state is actor-local; the outside world talks to it through
//! commands and observes it through broadcast events and watch snapshots.
//! Entry signals are serialized here: a signal that arrives while a hedged
//! pair is still pending, while the account is stopped or while the venue
//! is offline is dropped, never queued.

use anyhow::Result;
use hedgebot_core::config::{
    AccountConfig, AppConfig, HierarchyConfig, OrderConfig, PhaseParams,
};
use hedgebot_core::orders::VenueEvent;
use hedgebot_core::traits::TradingVenue;
use hedgebot_execution::{TradeCompleted, TradeLedger};
use hedgebot_recovery::{CampaignEvent, LevelId, Navigation, RecoveryError, RecoveryState, RecoveryTree};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch};

use crate::commands::{AccountCommand, AccountState};
use crate::events::{AccountEvent, AccountSnapshot};

pub struct AccountActor<V> {
    account: AccountConfig,
    order: OrderConfig,
    phase1: PhaseParams,
    phase2: PhaseParams,
    hierarchy: HierarchyConfig,
    venue: V,
    command_rx: mpsc::Receiver<AccountCommand>,
    event_tx: broadcast::Sender<AccountEvent>,
    snapshot_tx: watch::Sender<AccountSnapshot>,
    state: AccountState,
    online: bool,
    ledger: TradeLedger,
    root: RecoveryState,
    tree: Option<RecoveryTree>,
}

impl<V: TradingVenue> AccountActor<V> {
    pub fn new(
        account: AccountConfig,
        config: &AppConfig,
        venue: V,
        command_rx: mpsc::Receiver<AccountCommand>,
        event_tx: broadcast::Sender<AccountEvent>,
        snapshot_tx: watch::Sender<AccountSnapshot>,
    ) -> Self {
        let root = RecoveryState::new(
            config.order.base_stake,
            account.profit_target,
            config.phase1.max_drawdown,
            config.phase1.martingale_level,
            config.order.recovery_attempts,
        );
        let ledger = TradeLedger::new(account.account_id.clone());
        Self {
            order: config.order.clone(),
            phase1: config.phase1.clone(),
            phase2: config.phase2.clone(),
            hierarchy: config.hierarchy.clone(),
            account,
            venue,
            command_rx,
            event_tx,
            snapshot_tx,
            state: AccountState::Stopped,
            online: true,
            ledger,
            root,
            tree: None,
        }
    }

    /// Runs the actor until shutdown, the command channel closing, or the
    /// venue stream ending.
    ///
    /// Commands win ties against venue events so that a `Stop` issued while
    /// settlements are queued takes effect before they are booked.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(account = %self.account.account_id, "account actor started");
        self.publish_snapshot();

        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        tracing::info!(account = %self.account.account_id, "command channel closed");
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                    self.publish_snapshot();
                }
                event = self.venue.next_event() => {
                    match event {
                        Ok(Some(event)) => {
                            self.handle_venue_event(event);
                            self.publish_snapshot();
                        }
                        Ok(None) => {
                            tracing::warn!(account = %self.account.account_id, "venue event stream ended");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(account = %self.account.account_id, error = %e, "venue transport error");
                            self.emit_error(format!("venue transport error: {e}"));
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(account = %self.account.account_id, "account actor stopped");
        Ok(())
    }

    /// Returns `false` when the actor should terminate.
    async fn handle_command(&mut self, command: AccountCommand) -> bool {
        match command {
            AccountCommand::Start => self.handle_start(),
            AccountCommand::Stop => self.handle_stop(),
            AccountCommand::Signal => self.handle_signal().await,
            AccountCommand::GetSnapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            AccountCommand::Shutdown => {
                tracing::info!(account = %self.account.account_id, "shutdown requested");
                return false;
            }
        }
        true
    }

    fn handle_start(&mut self) {
        match self.state {
            AccountState::Running => {
                tracing::warn!(account = %self.account.account_id, "start ignored: already running");
            }
            AccountState::Stopped => {
                self.state = AccountState::Running;
                tracing::info!(account = %self.account.account_id, "account started");
            }
            AccountState::TargetReached => {
                // A fresh session: the completed campaign's profit does not
                // carry over into the new target.
                self.root = self.fresh_root_campaign();
                self.tree = None;
                self.state = AccountState::Running;
                tracing::info!(account = %self.account.account_id, "new session started");
            }
        }
    }

    fn handle_stop(&mut self) {
        self.state = AccountState::Stopped;
        let in_flight = self.ledger.in_flight();
        tracing::info!(account = %self.account.account_id, in_flight, "account stopping");
        if !in_flight {
            self.reset_to_root();
        }
        // With a pair still open the reset happens once it resolves.
    }

    async fn handle_signal(&mut self) {
        if self.state != AccountState::Running {
            tracing::debug!(account = %self.account.account_id, state = ?self.state, "signal ignored: not running");
            return;
        }
        if !self.online {
            tracing::debug!(account = %self.account.account_id, "signal ignored: venue offline");
            return;
        }
        if self.ledger.in_flight() {
            tracing::debug!(account = %self.account.account_id, "signal ignored: hedged pair pending");
            return;
        }
        self.submit_pair().await;
    }

    /// Opens a hedged pair sized from the currently active campaign.
    async fn submit_pair(&mut self) {
        let (stake, barrier_offset) = self.entry_parameters();
        let requests = match self.ledger.submit(
            stake,
            barrier_offset,
            &self.order.symbol,
            self.order.duration_ticks,
        ) {
            Ok(requests) => requests,
            Err(e) => {
                tracing::warn!(account = %self.account.account_id, error = %e, "entry rejected");
                return;
            }
        };

        for request in requests {
            let request_id = request.request_id;
            if let Err(e) = self.venue.submit_order(request).await {
                tracing::error!(
                    account = %self.account.account_id,
                    request_id,
                    error = %e,
                    "order submission failed"
                );
                self.emit_error(format!("order submission failed: {e}"));
                if let Some(completed) = self.ledger.on_order_rejected(request_id, "submission failed") {
                    self.handle_trade_completed(completed);
                }
            }
        }
    }

    /// Stake and barrier offset for the next entry, read fresh from the
    /// active campaign: the active tree node when a hierarchy exists, the
    /// root campaign otherwise.
    fn entry_parameters(&self) -> (Decimal, Decimal) {
        match self.tree.as_ref().and_then(RecoveryTree::active_node) {
            Some(node) => (
                node.state.current_stake(),
                node.state
                    .barrier_override()
                    .unwrap_or(node.params.barrier_offset),
            ),
            None => (
                self.root.current_stake(),
                self.root
                    .barrier_override()
                    .unwrap_or(self.phase1.barrier_offset),
            ),
        }
    }

    fn handle_venue_event(&mut self, event: VenueEvent) {
        match event {
            VenueEvent::OrderAck {
                request_id,
                contract_id,
                payout,
            } => {
                self.ledger.on_ack(request_id, &contract_id, payout);
            }
            VenueEvent::OrderRejected { request_id, reason } => {
                if let Some(completed) = self.ledger.on_order_rejected(request_id, &reason) {
                    self.handle_trade_completed(completed);
                }
            }
            VenueEvent::Settlement {
                contract_id,
                amount,
                is_closing,
            } => {
                if let Some(completed) = self.ledger.on_settlement(&contract_id, amount, is_closing)
                {
                    self.handle_trade_completed(completed);
                }
            }
            VenueEvent::ConnectionChanged { online } => {
                self.online = online;
                tracing::info!(account = %self.account.account_id, online, "venue connection changed");
            }
        }
    }

    /// Books a fully resolved pair into the active campaign and acts on the
    /// events it raised. Faults here are absorbed and surfaced as log lines
    /// and `Error` events; the actor keeps running.
    fn handle_trade_completed(&mut self, completed: TradeCompleted) {
        let level = self.active_level();
        self.emit(AccountEvent::TradeSettled {
            outcome: completed.clone(),
            level: level.clone(),
        });

        if self.state == AccountState::Stopped {
            // Book the result so ledger and campaign stay consistent, skip
            // navigation, then honor the pending stop.
            if let Some(id) = &level {
                if let Some(tree) = self.tree.as_mut() {
                    if let Err(e) =
                        tree.process_trade(id, completed.profit, completed.estimated_net_win)
                    {
                        tracing::warn!(account = %self.account.account_id, level = %id, error = %e, "result dropped during stop");
                    }
                }
            } else {
                let _ = self
                    .root
                    .process(completed.profit, completed.estimated_net_win);
            }
            self.reset_to_root();
            return;
        }

        if let Some(id) = level {
            let events = match self.tree.as_mut().map(|tree| {
                tree.process_trade(&id, completed.profit, completed.estimated_net_win)
            }) {
                Some(Ok(events)) => events,
                Some(Err(e)) => {
                    tracing::error!(account = %self.account.account_id, level = %id, error = %e, "trade result rejected");
                    self.emit_error(format!("trade result rejected at level {id}: {e}"));
                    return;
                }
                None => return,
            };
            self.apply_node_events(&id, events);
        } else {
            let events = self
                .root
                .process(completed.profit, completed.estimated_net_win);
            self.apply_root_events(events);
        }
    }

    fn apply_root_events(&mut self, events: Vec<CampaignEvent>) {
        for event in events {
            match event {
                CampaignEvent::TakeProfitReached { total_profit, .. } => {
                    self.emit(AccountEvent::TakeProfitReached {
                        level: None,
                        total_profit,
                    });
                    self.emit(AccountEvent::SessionTargetReached { total_profit });
                    self.state = AccountState::TargetReached;
                    tracing::info!(
                        account = %self.account.account_id,
                        total_profit = %total_profit,
                        "session profit target reached"
                    );
                }
                CampaignEvent::MaxDrawdownExceeded {
                    amount_to_recover, ..
                } => {
                    self.emit(AccountEvent::MaxDrawdownExceeded {
                        level: None,
                        amount_to_recover,
                    });
                    self.escalate_root(amount_to_recover);
                }
                CampaignEvent::RecoveryStateChanged { entered } => {
                    self.emit(AccountEvent::RecoveryModeChanged {
                        level: None,
                        entered,
                    });
                    if entered {
                        self.root.set_barrier_override(self.phase2.barrier_offset);
                    } else {
                        self.root.clear_barrier_override();
                    }
                }
                CampaignEvent::TradeProcessed { .. } => {}
            }
        }
    }

    fn apply_node_events(&mut self, level: &LevelId, events: Vec<CampaignEvent>) {
        for event in events {
            match event {
                CampaignEvent::TakeProfitReached { total_profit, .. } => {
                    self.emit(AccountEvent::TakeProfitReached {
                        level: Some(level.clone()),
                        total_profit,
                    });
                    if let Err(e) = self.advance_completed(level) {
                        tracing::error!(account = %self.account.account_id, level = %level, error = %e, "navigation rejected");
                        self.emit_error(format!("navigation rejected at level {level}: {e}"));
                    }
                }
                CampaignEvent::MaxDrawdownExceeded {
                    amount_to_recover, ..
                } => {
                    self.emit(AccountEvent::MaxDrawdownExceeded {
                        level: Some(level.clone()),
                        amount_to_recover,
                    });
                    if let Err(e) = self.escalate_node(level, amount_to_recover) {
                        tracing::error!(account = %self.account.account_id, level = %level, error = %e, "escalation rejected");
                        self.emit_error(format!("escalation rejected at level {level}: {e}"));
                    }
                }
                CampaignEvent::RecoveryStateChanged { entered } => {
                    self.emit(AccountEvent::RecoveryModeChanged {
                        level: Some(level.clone()),
                        entered,
                    });
                    self.set_active_barrier_override(entered);
                }
                CampaignEvent::TradeProcessed { .. } => {}
            }
        }
    }

    /// Marks `level` done and moves the active pointer per the navigation
    /// rules; an `Exited` climb discards the hierarchy and restores root
    /// trading.
    fn advance_completed(&mut self, level: &LevelId) -> Result<(), RecoveryError> {
        let Some(tree) = self.tree.as_mut() else {
            return Ok(());
        };
        tree.mark_completed(level)?;
        let nav = tree.advance(level)?;
        match nav {
            Navigation::Activated(to) => {
                self.emit(AccountEvent::LevelTransition {
                    from: Some(level.clone()),
                    to: Some(to),
                });
            }
            Navigation::Exited => {
                self.tree = None;
                self.root.clear_recovery();
                self.root.clear_barrier_override();
                self.emit(AccountEvent::LevelTransition {
                    from: Some(level.clone()),
                    to: None,
                });
                tracing::info!(account = %self.account.account_id, "recovery hierarchy finished; root trading restored");
            }
        }
        Ok(())
    }

    /// Subdivides a node's breached deficit into a child layer. A node that
    /// already has children keeps absorbing its own drawdown instead.
    fn escalate_node(&mut self, level: &LevelId, amount: Decimal) -> Result<(), RecoveryError> {
        let Some(tree) = self.tree.as_mut() else {
            return Ok(());
        };
        if !tree.node(level)?.children.is_empty() {
            tracing::debug!(account = %self.account.account_id, level = %level, "level already escalated; deficit stays put");
            return Ok(());
        }
        if let Some(to) = tree.escalate(level, amount)? {
            self.emit(AccountEvent::LevelTransition {
                from: Some(level.clone()),
                to: Some(to),
            });
        }
        Ok(())
    }

    /// First escalation out of the root campaign: builds the hierarchy and
    /// hands the deficit to its first leaf.
    fn escalate_root(&mut self, amount: Decimal) {
        if self.tree.is_some() {
            // Root trades only while no hierarchy exists; nothing to do.
            return;
        }
        let mut tree = RecoveryTree::new(self.hierarchy.clone(), self.order.recovery_attempts);
        match tree.begin(amount, &self.phase2) {
            Ok(first) => {
                tracing::info!(
                    account = %self.account.account_id,
                    level = %first,
                    amount = %amount,
                    "escalating into the recovery hierarchy"
                );
                self.emit(AccountEvent::LevelTransition {
                    from: None,
                    to: Some(first),
                });
                self.tree = Some(tree);
            }
            Err(e) => {
                tracing::error!(account = %self.account.account_id, error = %e, "failed to open the recovery hierarchy");
                self.emit_error(format!("failed to open the recovery hierarchy: {e}"));
            }
        }
    }

    fn set_active_barrier_override(&mut self, entered: bool) {
        let offset = self.phase2.barrier_offset;
        if let Some(node) = self.tree.as_mut().and_then(RecoveryTree::active_node_mut) {
            if entered {
                node.state.set_barrier_override(offset);
            } else {
                node.state.clear_barrier_override();
            }
        }
    }

    /// Discards the hierarchy and restores the root campaign's normal
    /// trading parameters. Session profit is preserved.
    fn reset_to_root(&mut self) {
        let from = self.active_level();
        self.tree = None;
        self.root.clear_recovery();
        self.root.clear_barrier_override();
        if from.is_some() {
            self.emit(AccountEvent::LevelTransition { from, to: None });
        }
        tracing::info!(account = %self.account.account_id, "hierarchy reset; root campaign restored");
    }

    fn active_level(&self) -> Option<LevelId> {
        self.tree.as_ref().and_then(|tree| tree.active().cloned())
    }

    fn fresh_root_campaign(&self) -> RecoveryState {
        RecoveryState::new(
            self.order.base_stake,
            self.account.profit_target,
            self.phase1.max_drawdown,
            self.phase1.martingale_level,
            self.order.recovery_attempts,
        )
    }

    fn snapshot(&self) -> AccountSnapshot {
        let (active_level_id, campaign) = match self.tree.as_ref().and_then(RecoveryTree::active_node)
        {
            Some(node) => (Some(node.id.clone()), &node.state),
            None => (None, &self.root),
        };
        AccountSnapshot {
            account_id: self.account.account_id.clone(),
            state: self.state,
            active_level_id,
            stake: campaign.stake(),
            dynamic_stake: campaign.dynamic_stake(),
            total_profit: campaign.total_profit(),
            is_recovery_mode: campaign.is_recovery_mode(),
            amount_to_recover: campaign.amount_to_recover(),
            in_flight: self.ledger.in_flight(),
            online: self.online,
        }
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send(self.snapshot());
    }

    fn emit(&self, event: AccountEvent) {
        // Nobody listening is fine; events are observability, not control.
        let _ = self.event_tx.send(event);
    }

    fn emit_error(&self, message: String) {
        self.emit(AccountEvent::Error {
            message,
            timestamp: chrono::Utc::now(),
        });
    }
}
