//! Deterministic venue: every order acks immediately with a synthetic
//! contract id, and each completed pair settles according to a scripted
//! outcome pattern. A session with the same script replays identically.

use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use hedgebot_core::orders::{ContractSide, OrderRequest, VenueEvent};
use hedgebot_core::traits::TradingVenue;

/// Scripted outcome for one hedged pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// Price stays inside the corridor: both legs win at the payout ratio.
    Win,
    /// Price breaks out above the corridor: the higher leg wins, the lower
    /// leg loses its stake.
    Loss,
    /// The second leg is rejected and the first settles as a loss.
    Fail,
}

fn parse_script(script: &str) -> Result<Vec<PairOutcome>> {
    if script.is_empty() {
        anyhow::bail!("outcome script must not be empty");
    }
    script
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'W' => Ok(PairOutcome::Win),
            'L' => Ok(PairOutcome::Loss),
            'F' => Ok(PairOutcome::Fail),
            other => anyhow::bail!("outcome script: unsupported character '{other}'"),
        })
        .collect()
}

/// Clonable handle that injects out-of-band events (connection drops,
/// stray settlements) into a running venue.
#[derive(Debug, Clone)]
pub struct SimControl {
    tx: mpsc::UnboundedSender<VenueEvent>,
}

impl SimControl {
    pub fn set_online(&self, online: bool) {
        let _ = self.tx.send(VenueEvent::ConnectionChanged { online });
    }

    pub fn inject(&self, event: VenueEvent) {
        let _ = self.tx.send(event);
    }
}

/// Simulated trading venue. Pairs legs in submission order: the outcome
/// script is consumed once per completed pair, repeating when exhausted.
pub struct SimVenue {
    payout_ratio: Decimal,
    script: Vec<PairOutcome>,
    cursor: usize,
    first_leg: Option<OrderRequest>,
    next_contract: u64,
    queue: VecDeque<VenueEvent>,
    control_tx: mpsc::UnboundedSender<VenueEvent>,
    control_rx: mpsc::UnboundedReceiver<VenueEvent>,
}

impl SimVenue {
    /// # Errors
    ///
    /// Rejects an empty script or one with characters outside `W`/`L`/`F`.
    pub fn new(script: &str, payout_ratio: Decimal) -> Result<Self> {
        let script = parse_script(script)?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Ok(Self {
            payout_ratio,
            script,
            cursor: 0,
            first_leg: None,
            next_contract: 0,
            queue: VecDeque::new(),
            control_tx,
            control_rx,
        })
    }

    #[must_use]
    pub fn control(&self) -> SimControl {
        SimControl {
            tx: self.control_tx.clone(),
        }
    }

    fn next_outcome(&mut self) -> PairOutcome {
        // Script is non-empty by construction.
        let outcome = self.script[self.cursor % self.script.len()];
        self.cursor += 1;
        outcome
    }

    fn ack(&mut self, leg: &OrderRequest) -> (String, Decimal) {
        self.next_contract += 1;
        let contract_id = format!("SIM-{}", self.next_contract);
        let payout = (leg.stake * self.payout_ratio).round_dp(2);
        self.queue.push_back(VenueEvent::OrderAck {
            request_id: leg.request_id,
            contract_id: contract_id.clone(),
            payout,
        });
        (contract_id, payout)
    }

    fn settle_pair(&mut self, first: OrderRequest, second: OrderRequest) {
        let outcome = self.next_outcome();
        tracing::debug!(?outcome, first = first.request_id, second = second.request_id, "settling scripted pair");
        match outcome {
            PairOutcome::Win => {
                let (first_contract, first_payout) = self.ack(&first);
                let (second_contract, second_payout) = self.ack(&second);
                self.queue.push_back(VenueEvent::Settlement {
                    contract_id: first_contract,
                    amount: first_payout - first.stake,
                    is_closing: true,
                });
                self.queue.push_back(VenueEvent::Settlement {
                    contract_id: second_contract,
                    amount: second_payout - second.stake,
                    is_closing: true,
                });
            }
            PairOutcome::Loss => {
                let (first_contract, first_payout) = self.ack(&first);
                let (second_contract, second_payout) = self.ack(&second);
                let legs = [
                    (&first, first_contract, first_payout),
                    (&second, second_contract, second_payout),
                ];
                for (leg, contract_id, payout) in legs {
                    let amount = match leg.side {
                        ContractSide::Higher => payout - leg.stake,
                        ContractSide::Lower => -leg.stake,
                    };
                    self.queue.push_back(VenueEvent::Settlement {
                        contract_id,
                        amount,
                        is_closing: true,
                    });
                }
            }
            PairOutcome::Fail => {
                let (contract_id, _) = self.ack(&first);
                self.queue.push_back(VenueEvent::OrderRejected {
                    request_id: second.request_id,
                    reason: "simulated placement failure".to_string(),
                });
                self.queue.push_back(VenueEvent::Settlement {
                    contract_id,
                    amount: -first.stake,
                    is_closing: true,
                });
            }
        }
    }
}

#[async_trait]
impl TradingVenue for SimVenue {
    async fn submit_order(&mut self, order: OrderRequest) -> Result<()> {
        match self.first_leg.take() {
            None => self.first_leg = Some(order),
            Some(first) => self.settle_pair(first, order),
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<VenueEvent>> {
        if let Some(event) = self.queue.pop_front() {
            return Ok(Some(event));
        }
        // Pends until a control handle injects something; the sender held
        // by the venue itself keeps the channel open.
        Ok(self.control_rx.recv().await)
    }
}
