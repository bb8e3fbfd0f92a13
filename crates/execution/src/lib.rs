pub mod ledger;

pub use ledger::{LedgerError, TradeCompleted, TradeLedger};
