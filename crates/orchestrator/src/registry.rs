use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use hedgebot_core::config::{AccountConfig, AppConfig};
use hedgebot_core::traits::TradingVenue;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch, RwLock};

use crate::account_actor::AccountActor;
use crate::account_handle::AccountHandle;
use crate::commands::AccountState;
use crate::events::AccountSnapshot;

/// Tracks every spawned account actor by account id.
pub struct AccountRegistry {
    accounts: Arc<RwLock<HashMap<String, AccountHandle>>>,
}

impl AccountRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawns an actor trading `account` on `venue` and registers its
    /// handle under the account id.
    pub async fn spawn_account<V>(
        &self,
        config: &AppConfig,
        account: AccountConfig,
        venue: V,
    ) -> AccountHandle
    where
        V: TradingVenue + 'static,
    {
        let account_id = account.account_id.clone();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(256);
        let initial = AccountSnapshot {
            account_id: account_id.clone(),
            state: AccountState::Stopped,
            active_level_id: None,
            stake: config.order.base_stake,
            dynamic_stake: config.order.base_stake,
            total_profit: Decimal::ZERO,
            is_recovery_mode: false,
            amount_to_recover: Decimal::ZERO,
            in_flight: false,
            online: true,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let actor = AccountActor::new(
            account,
            config,
            venue,
            command_rx,
            event_tx.clone(),
            snapshot_tx,
        );
        let handle = AccountHandle::new(command_tx, event_tx, snapshot_rx);

        let spawned_id = account_id.clone();
        tokio::spawn(async move {
            if let Err(e) = actor.run().await {
                tracing::error!(account = %spawned_id, error = %e, "account actor failed");
            }
        });

        self.accounts
            .write()
            .await
            .insert(account_id, handle.clone());
        handle
    }

    pub async fn get(&self, account_id: &str) -> Option<AccountHandle> {
        self.accounts.read().await.get(account_id).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        self.accounts.read().await.keys().cloned().collect()
    }

    /// Deregisters an account and asks its actor to shut down.
    ///
    /// # Errors
    ///
    /// Fails if the actor already terminated on its own.
    pub async fn remove(&self, account_id: &str) -> Result<()> {
        let handle = self.accounts.write().await.remove(account_id);
        if let Some(handle) = handle {
            handle.shutdown().await?;
        }
        Ok(())
    }

    /// Shuts down every account actor and clears the registry. Actors that
    /// already terminated are logged, not treated as failures.
    pub async fn shutdown_all(&self) {
        let handles: Vec<(String, AccountHandle)> =
            self.accounts.write().await.drain().collect();
        for (account_id, handle) in handles {
            if let Err(e) = handle.shutdown().await {
                tracing::warn!(account = %account_id, error = %e, "shutdown delivery failed");
            }
        }
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}
