//! Per-account trading actors and the registry that supervises them.
//!
//! Each account runs as one task owning its venue connection, hedged-pair
//! ledger and recovery hierarchy. Callers hold an [`AccountHandle`] to send
//! commands, subscribe to [`AccountEvent`] broadcasts, or read the latest
//! [`AccountSnapshot`] from a watch channel.

pub mod account_actor;
pub mod account_handle;
pub mod commands;
pub mod events;
pub mod registry;

pub use account_actor::AccountActor;
pub use account_handle::AccountHandle;
pub use commands::{AccountCommand, AccountState};
pub use events::{AccountEvent, AccountSnapshot};
pub use registry::AccountRegistry;
