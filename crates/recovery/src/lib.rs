pub mod error;
pub mod node;
pub mod state;
pub mod tree;

pub use error::RecoveryError;
pub use node::{LevelId, LevelNode, LevelParams};
pub use state::{CampaignEvent, RecoveryState};
pub use tree::{Navigation, RecoveryTree};
