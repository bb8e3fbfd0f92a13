pub mod config;
pub mod config_loader;
pub mod orders;
pub mod traits;

pub use config::{
    AccountConfig, AppConfig, HierarchyConfig, LayerOverride, OrderConfig, PhaseParams,
};
pub use config_loader::ConfigLoader;
pub use orders::{ContractSide, OrderRequest, VenueEvent};
pub use traits::TradingVenue;
