use anyhow::Result;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::commands::AccountCommand;
use crate::events::{AccountEvent, AccountSnapshot};

/// Cloneable handle to a running account actor.
#[derive(Clone)]
pub struct AccountHandle {
    tx: mpsc::Sender<AccountCommand>,
    event_tx: broadcast::Sender<AccountEvent>,
    snapshot_rx: watch::Receiver<AccountSnapshot>,
}

impl AccountHandle {
    #[must_use]
    pub fn new(
        tx: mpsc::Sender<AccountCommand>,
        event_tx: broadcast::Sender<AccountEvent>,
        snapshot_rx: watch::Receiver<AccountSnapshot>,
    ) -> Self {
        Self {
            tx,
            event_tx,
            snapshot_rx,
        }
    }

    /// Starts accepting entry signals.
    ///
    /// # Errors
    ///
    /// Fails if the account actor has terminated.
    pub async fn start(&self) -> Result<()> {
        self.tx.send(AccountCommand::Start).await?;
        Ok(())
    }

    /// Stops the account; an open pair settles first, then the hierarchy
    /// resets to root.
    ///
    /// # Errors
    ///
    /// Fails if the account actor has terminated.
    pub async fn stop(&self) -> Result<()> {
        self.tx.send(AccountCommand::Stop).await?;
        Ok(())
    }

    /// Delivers an entry signal. The actor decides whether to act on it.
    ///
    /// # Errors
    ///
    /// Fails if the account actor has terminated.
    pub async fn signal(&self) -> Result<()> {
        self.tx.send(AccountCommand::Signal).await?;
        Ok(())
    }

    /// Terminates the account actor.
    ///
    /// # Errors
    ///
    /// Fails if the account actor has already terminated.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(AccountCommand::Shutdown).await?;
        Ok(())
    }

    /// Requests a point-in-time snapshot straight from the actor, ordered
    /// after every command sent before it.
    ///
    /// # Errors
    ///
    /// Fails if the account actor has terminated.
    pub async fn get_snapshot(&self) -> Result<AccountSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(AccountCommand::GetSnapshot(reply_tx)).await?;
        Ok(reply_rx.await?)
    }

    /// Subscribes to the actor's broadcast events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<AccountEvent> {
        self.event_tx.subscribe()
    }

    /// Last published snapshot, without a round trip to the actor.
    #[must_use]
    pub fn latest_snapshot(&self) -> AccountSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch receiver for awaiting snapshot changes.
    #[must_use]
    pub fn snapshot_updates(&self) -> watch::Receiver<AccountSnapshot> {
        self.snapshot_rx.clone()
    }
}
