use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub accounts: Vec<AccountConfig>,
    pub order: OrderConfig,
    /// Parameters for normal (non-recovery) trading.
    pub phase1: PhaseParams,
    /// Parameters applied once a campaign enters recovery.
    pub phase2: PhaseParams,
    pub hierarchy: HierarchyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub token: String,
    pub account_id: String,
    /// Session-level profit target; trading stops once the root campaign reaches it.
    pub profit_target: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    pub symbol: String,
    pub duration_ticks: u32,
    /// Stake per leg of the hedged pair outside recovery.
    pub base_stake: Decimal,
    /// Break-even attempts allowed before a near-zero recovery balance exits.
    #[serde(default = "default_recovery_attempts")]
    pub recovery_attempts: u32,
}

const fn default_recovery_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseParams {
    /// Signed distance of each leg's barrier from spot.
    pub barrier_offset: Decimal,
    pub martingale_level: u32,
    pub max_drawdown: Decimal,
}

/// Configuration for the multi-layer recovery hierarchy.
///
/// `layers` maps a layer number (1 = the first generation below the top
/// node) to per-layer overrides. Missing layers fall back to the parent
/// node's parameters and the workspace-wide defaults here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub levels_per_layer: u32,
    pub max_depth: u32,
    /// Seed stake for layer-1 levels; deeper layers inherit from their parent.
    pub layer_one_stake: Decimal,
    #[serde(default)]
    pub layers: BTreeMap<u32, LayerOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerOverride {
    pub levels_per_layer: Option<u32>,
    pub initial_stake: Option<Decimal>,
    pub martingale_level: Option<u32>,
    pub max_drawdown: Option<Decimal>,
    pub barrier_offset: Option<Decimal>,
}

impl HierarchyConfig {
    /// Returns the per-layer override for `layer`, if one is configured.
    #[must_use]
    pub fn override_for(&self, layer: u32) -> Option<&LayerOverride> {
        self.layers.get(&layer)
    }

    /// Number of sibling levels a layer subdivides into.
    #[must_use]
    pub fn levels_for_layer(&self, layer: u32) -> u32 {
        self.layers
            .get(&layer)
            .and_then(|o| o.levels_per_layer)
            .unwrap_or(self.levels_per_layer)
    }
}

impl AppConfig {
    /// Validates the loaded configuration before a session starts.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            anyhow::bail!("at least one account must be configured");
        }
        for account in &self.accounts {
            if account.account_id.is_empty() {
                anyhow::bail!("account_id must not be empty");
            }
            if account.token.is_empty() {
                anyhow::bail!("account {}: token must not be empty", account.account_id);
            }
            if account.profit_target <= Decimal::ZERO {
                anyhow::bail!(
                    "account {}: profit_target must be positive",
                    account.account_id
                );
            }
        }
        if self.order.base_stake <= Decimal::ZERO {
            anyhow::bail!("order.base_stake must be positive");
        }
        if self.order.duration_ticks == 0 {
            anyhow::bail!("order.duration_ticks must be at least 1");
        }
        if self.order.recovery_attempts == 0 {
            anyhow::bail!("order.recovery_attempts must be at least 1");
        }
        for (name, phase) in [("phase1", &self.phase1), ("phase2", &self.phase2)] {
            if phase.martingale_level == 0 {
                anyhow::bail!("{name}.martingale_level must be at least 1");
            }
            if phase.max_drawdown <= Decimal::ZERO {
                anyhow::bail!("{name}.max_drawdown must be positive");
            }
        }
        if self.hierarchy.levels_per_layer == 0 {
            anyhow::bail!("hierarchy.levels_per_layer must be at least 1");
        }
        if self.hierarchy.max_depth == 0 {
            anyhow::bail!("hierarchy.max_depth must be at least 1");
        }
        if self.hierarchy.layer_one_stake <= Decimal::ZERO {
            anyhow::bail!("hierarchy.layer_one_stake must be positive");
        }
        for (layer, layer_override) in &self.hierarchy.layers {
            if layer_override.levels_per_layer == Some(0) {
                anyhow::bail!("hierarchy.layers.{layer}: levels_per_layer must be at least 1");
            }
            if layer_override.martingale_level == Some(0) {
                anyhow::bail!("hierarchy.layers.{layer}: martingale_level must be at least 1");
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            accounts: vec![AccountConfig {
                token: "demo-token".to_string(),
                account_id: "VRTC0001".to_string(),
                profit_target: dec!(25),
            }],
            order: OrderConfig {
                symbol: "R_100".to_string(),
                duration_ticks: 5,
                base_stake: dec!(1),
                recovery_attempts: 5,
            },
            phase1: PhaseParams {
                barrier_offset: dec!(0.15),
                martingale_level: 2,
                max_drawdown: dec!(15),
            },
            phase2: PhaseParams {
                barrier_offset: dec!(0.35),
                martingale_level: 3,
                max_drawdown: dec!(20),
            },
            hierarchy: HierarchyConfig {
                levels_per_layer: 2,
                max_depth: 3,
                layer_one_stake: dec!(0.35),
                layers: BTreeMap::new(),
            },
        }
    }
}
