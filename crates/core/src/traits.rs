use crate::orders::{OrderRequest, VenueEvent};
use anyhow::Result;
use async_trait::async_trait;

/// Transport collaborator that places orders and streams settlement events.
///
/// Submission is fire-and-forget: acks, rejections, and settlements all
/// arrive later through `next_event`. `next_event` returning `Ok(None)`
/// means the venue's stream has ended for good.
#[async_trait]
pub trait TradingVenue: Send + Sync {
    async fn submit_order(&mut self, order: OrderRequest) -> Result<()>;
    async fn next_event(&mut self) -> Result<Option<VenueEvent>>;
}
