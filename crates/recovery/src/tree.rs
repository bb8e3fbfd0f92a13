//! The recovery tree: an arena of level nodes and the navigation rules
//! that move the single active pointer between them.
//!
//! A tree is built on the first escalation out of the root campaign and
//! discarded wholesale once navigation exits back to root. Nodes own their
//! campaign state; parent/child links are ids into the arena, so no two
//! nodes can ever share a `RecoveryState`.

use std::collections::BTreeMap;

use hedgebot_core::config::{HierarchyConfig, PhaseParams};
use rust_decimal::Decimal;

use crate::error::RecoveryError;
use crate::node::{LevelId, LevelNode, LevelParams};
use crate::state::CampaignEvent;

/// Where navigation landed after advancing from a completed level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// A sibling or parent level became active.
    Activated(LevelId),
    /// Climbing reached the virtual root: the hierarchy is finished and
    /// the account returns to root-campaign trading.
    Exited,
}

#[derive(Debug, Clone)]
pub struct RecoveryTree {
    hierarchy: HierarchyConfig,
    recovery_attempts: u32,
    nodes: BTreeMap<LevelId, LevelNode>,
    active: Option<LevelId>,
}

impl RecoveryTree {
    #[must_use]
    pub fn new(hierarchy: HierarchyConfig, recovery_attempts: u32) -> Self {
        Self {
            hierarchy,
            recovery_attempts,
            nodes: BTreeMap::new(),
            active: None,
        }
    }

    /// Builds the hierarchy for an escalated root deficit: the top node
    /// `"1"` records the full `amount` (its stake seeds from the layer-one
    /// stake, everything else from the recovery-phase `seed`), then
    /// immediately subdivides into its first child. Returns the activated
    /// level.
    ///
    /// # Errors
    ///
    /// `AlreadyEscalated` if the tree was already built.
    pub fn begin(&mut self, amount: Decimal, seed: &PhaseParams) -> Result<LevelId, RecoveryError> {
        let top_id = LevelId::top();
        if self.nodes.contains_key(&top_id) {
            return Err(RecoveryError::AlreadyEscalated(top_id));
        }

        let params = LevelParams {
            amount_to_recover: amount,
            initial_stake: self.hierarchy.layer_one_stake,
            martingale_level: seed.martingale_level,
            max_drawdown: seed.max_drawdown,
            barrier_offset: seed.barrier_offset,
        };
        let top = LevelNode::new(top_id.clone(), params, 1, self.recovery_attempts);
        self.nodes.insert(top_id.clone(), top);

        match self.escalate(&top_id, amount)? {
            Some(child) => Ok(child),
            // Unreachable with a validated config (max_depth >= 1); the
            // top node itself carries the campaign if it ever happens.
            None => {
                self.active = Some(top_id.clone());
                Ok(top_id)
            }
        }
    }

    /// Subdivides `from`'s deficit into a child layer and activates the
    /// first child. At the depth cap this is a logged no-op returning
    /// `None`: the node keeps accumulating drawdown with no children.
    ///
    /// # Errors
    ///
    /// `UnknownLevel` if `from` was never created; `AlreadyEscalated` if it
    /// has children — a node escalates at most once.
    pub fn escalate(
        &mut self,
        from: &LevelId,
        amount: Decimal,
    ) -> Result<Option<LevelId>, RecoveryError> {
        let node = self
            .nodes
            .get(from)
            .ok_or_else(|| RecoveryError::UnknownLevel(from.clone()))?;
        if !node.children.is_empty() {
            return Err(RecoveryError::AlreadyEscalated(from.clone()));
        }
        if from.layer() >= self.hierarchy.max_depth {
            tracing::info!(level = %from, amount = %amount, "depth cap reached; level keeps its drawdown");
            return Ok(None);
        }

        let child_layer = from.layer() + 1;
        if self.hierarchy.override_for(child_layer).is_none() {
            tracing::warn!(layer = child_layer, "no per-layer override configured; children inherit the parent level's parameters");
        }
        let levels = self.hierarchy.levels_for_layer(child_layer);
        let share = (amount / Decimal::from(levels)).round_dp(2);
        let params = self.resolve_child_params(node, child_layer, share);
        let child_id = from.child(1);
        tracing::info!(
            from = %from,
            child = %child_id,
            levels,
            share = %share,
            "escalating deficit into a child layer"
        );

        let child = LevelNode::new(child_id.clone(), params, levels, self.recovery_attempts);
        self.nodes.insert(child_id.clone(), child);
        if let Some(parent) = self.nodes.get_mut(from) {
            parent.children.push(child_id.clone());
        }
        self.active = Some(child_id.clone());
        Ok(Some(child_id))
    }

    /// Moves on from a completed level: to the lazily created next sibling
    /// while the layer has one, otherwise up to the parent.
    ///
    /// # Errors
    ///
    /// `UnknownLevel` if `from` was never created; `NotCompleted` if its
    /// target has not been met — navigation never moves off a live level.
    pub fn advance(&mut self, from: &LevelId) -> Result<Navigation, RecoveryError> {
        let node = self
            .nodes
            .get(from)
            .ok_or_else(|| RecoveryError::UnknownLevel(from.clone()))?;
        if !node.completed {
            return Err(RecoveryError::NotCompleted(from.clone()));
        }

        if from.index() < node.levels_in_layer {
            let params = node.params.clone();
            let levels = node.levels_in_layer;
            let sibling_id = from.next_sibling();
            // Sibling k+1 exists only once k completed.
            if !self.nodes.contains_key(&sibling_id) {
                let sibling =
                    LevelNode::new(sibling_id.clone(), params, levels, self.recovery_attempts);
                self.nodes.insert(sibling_id.clone(), sibling);
                if let Some(parent_id) = sibling_id.parent() {
                    if let Some(parent) = self.nodes.get_mut(&parent_id) {
                        parent.children.push(sibling_id.clone());
                    }
                }
            }
            tracing::info!(from = %from, to = %sibling_id, "advancing to the next sibling level");
            self.active = Some(sibling_id.clone());
            return Ok(Navigation::Activated(sibling_id));
        }

        self.climb(from)
    }

    /// Climbs from an exhausted sibling row to its parent. The parent is
    /// skipped entirely when its descendants already covered its target.
    fn climb(&mut self, from: &LevelId) -> Result<Navigation, RecoveryError> {
        let parent_id = match from.parent() {
            Some(id) if !id.is_root() => id,
            _ => {
                tracing::info!(from = %from, "hierarchy complete; returning to root trading");
                self.active = None;
                return Ok(Navigation::Exited);
            }
        };

        let children_profit = self.descendants_profit(&parent_id)?;
        let parent = self
            .nodes
            .get_mut(&parent_id)
            .ok_or_else(|| RecoveryError::UnknownLevel(parent_id.clone()))?;
        let remaining =
            parent.params.amount_to_recover - (parent.state.total_profit() + children_profit);

        if remaining <= Decimal::ZERO {
            tracing::info!(
                parent = %parent_id,
                excess = %(-remaining),
                "descendants covered the parent target; skipping it"
            );
            parent.completed = true;
            return self.advance(&parent_id);
        }

        tracing::info!(parent = %parent_id, remaining = %remaining, "climbing to parent for the remaining target");
        parent.state.retarget(remaining);
        self.active = Some(parent_id.clone());
        Ok(Navigation::Activated(parent_id))
    }

    /// Recursive profit sum over every descendant of `id` (not `id` itself).
    fn descendants_profit(&self, id: &LevelId) -> Result<Decimal, RecoveryError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| RecoveryError::UnknownLevel(id.clone()))?;
        let mut total = Decimal::ZERO;
        let mut pending: Vec<LevelId> = node.children.clone();
        while let Some(child_id) = pending.pop() {
            let child = self
                .nodes
                .get(&child_id)
                .ok_or_else(|| RecoveryError::UnknownLevel(child_id.clone()))?;
            total += child.state.total_profit();
            pending.extend(child.children.iter().cloned());
        }
        Ok(total)
    }

    /// Routes one trade outcome to the level's campaign.
    ///
    /// # Errors
    ///
    /// `UnknownLevel` for an id that was never created; `Completed` if the
    /// level already met its target — completed levels accept no trades.
    pub fn process_trade(
        &mut self,
        id: &LevelId,
        outcome: Decimal,
        estimate: Decimal,
    ) -> Result<Vec<CampaignEvent>, RecoveryError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RecoveryError::UnknownLevel(id.clone()))?;
        if node.completed {
            return Err(RecoveryError::Completed(id.clone()));
        }
        Ok(node.state.process(outcome, estimate))
    }

    /// # Errors
    ///
    /// `UnknownLevel` for an id that was never created.
    pub fn mark_completed(&mut self, id: &LevelId) -> Result<(), RecoveryError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RecoveryError::UnknownLevel(id.clone()))?;
        node.completed = true;
        Ok(())
    }

    #[must_use]
    pub fn active(&self) -> Option<&LevelId> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn active_node(&self) -> Option<&LevelNode> {
        self.active.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn active_node_mut(&mut self) -> Option<&mut LevelNode> {
        let id = self.active.clone()?;
        self.nodes.get_mut(&id)
    }

    /// # Errors
    ///
    /// `UnknownLevel` for an id that was never created — never a silent
    /// fallback to another node.
    pub fn node(&self, id: &LevelId) -> Result<&LevelNode, RecoveryError> {
        self.nodes
            .get(id)
            .ok_or_else(|| RecoveryError::UnknownLevel(id.clone()))
    }

    /// All created nodes in id order (parents before children).
    pub fn nodes(&self) -> impl Iterator<Item = &LevelNode> {
        self.nodes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn resolve_child_params(
        &self,
        parent: &LevelNode,
        child_layer: u32,
        share: Decimal,
    ) -> LevelParams {
        let overrides = self.hierarchy.override_for(child_layer);
        LevelParams {
            amount_to_recover: share,
            initial_stake: overrides
                .and_then(|o| o.initial_stake)
                .unwrap_or(parent.params.initial_stake),
            martingale_level: overrides
                .and_then(|o| o.martingale_level)
                .unwrap_or(parent.params.martingale_level),
            max_drawdown: overrides
                .and_then(|o| o.max_drawdown)
                .unwrap_or(parent.params.max_drawdown),
            barrier_offset: overrides
                .and_then(|o| o.barrier_offset)
                .unwrap_or(parent.params.barrier_offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hedgebot_core::config::LayerOverride;
    use rust_decimal_macros::dec;

    fn id(s: &str) -> LevelId {
        s.parse().unwrap()
    }

    fn hierarchy(levels_per_layer: u32, max_depth: u32) -> HierarchyConfig {
        HierarchyConfig {
            levels_per_layer,
            max_depth,
            layer_one_stake: dec!(0.35),
            layers: BTreeMap::new(),
        }
    }

    fn seed() -> PhaseParams {
        PhaseParams {
            barrier_offset: dec!(0.35),
            martingale_level: 3,
            max_drawdown: dec!(20),
        }
    }

    fn tree(levels_per_layer: u32, max_depth: u32) -> RecoveryTree {
        RecoveryTree::new(hierarchy(levels_per_layer, max_depth), 5)
    }

    /// Wins the level's exact remaining target and advances off it.
    fn complete_level(tree: &mut RecoveryTree, level: &LevelId, outcome: Decimal) -> Navigation {
        let events = tree.process_trade(level, outcome, Decimal::ZERO).unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, CampaignEvent::TakeProfitReached { .. })),
            "outcome {outcome} did not complete {level}"
        );
        tree.mark_completed(level).unwrap();
        tree.advance(level).unwrap()
    }

    #[test]
    fn escalated_amount_splits_evenly_across_the_first_layer() {
        let mut tree = tree(2, 3);
        let first = tree.begin(dec!(160), &seed()).unwrap();

        assert_eq!(first, id("1.1"));
        assert_eq!(tree.active(), Some(&id("1.1")));

        let top = tree.node(&LevelId::top()).unwrap();
        assert_eq!(top.params.amount_to_recover, dec!(160));
        assert_eq!(top.children, vec![id("1.1")]);

        let child = tree.node(&id("1.1")).unwrap();
        assert_eq!(child.params.amount_to_recover, dec!(80));
        assert_eq!(child.state.take_profit_target(), dec!(80));
        assert_eq!(child.state.stake(), dec!(0.35));
    }

    #[test]
    fn shares_round_to_cents() {
        let mut tree = tree(3, 3);
        tree.begin(dec!(100), &seed()).unwrap();

        let child = tree.node(&id("1.1")).unwrap();
        assert_eq!(child.params.amount_to_recover, dec!(33.33));
    }

    #[test]
    fn siblings_are_created_lazily_in_order() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();

        assert!(matches!(
            tree.node(&id("1.2")),
            Err(RecoveryError::UnknownLevel(_))
        ));

        let nav = complete_level(&mut tree, &id("1.1"), dec!(80));
        assert_eq!(nav, Navigation::Activated(id("1.2")));
        assert_eq!(tree.active(), Some(&id("1.2")));

        let top = tree.node(&LevelId::top()).unwrap();
        assert_eq!(top.children, vec![id("1.1"), id("1.2")]);
    }

    #[test]
    fn lazily_created_sibling_gets_a_fresh_campaign() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();
        complete_level(&mut tree, &id("1.1"), dec!(80));

        let sibling = tree.node(&id("1.2")).unwrap();
        assert_eq!(sibling.params, tree.node(&id("1.1")).unwrap().params);
        assert_eq!(sibling.state.total_profit(), Decimal::ZERO);
        assert_eq!(sibling.state.take_profit_target(), dec!(80));
        assert!(!sibling.completed);
    }

    #[test]
    fn each_node_owns_its_own_campaign_state() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();
        complete_level(&mut tree, &id("1.1"), dec!(80));
        tree.escalate(&id("1.2"), dec!(20)).unwrap();

        assert!(!tree.is_empty());
        assert_eq!(tree.len(), 4);

        let nodes: Vec<&LevelNode> = tree.nodes().collect();
        for (i, a) in nodes.iter().enumerate() {
            for b in nodes.iter().skip(i + 1) {
                assert!(
                    !std::ptr::eq(&a.state, &b.state),
                    "{} and {} share one campaign state",
                    a.id,
                    b.id
                );
            }
        }
    }

    #[test]
    fn advance_from_an_incomplete_level_is_rejected() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();

        assert!(matches!(
            tree.advance(&id("1.1")),
            Err(RecoveryError::NotCompleted(_))
        ));
        assert_eq!(tree.active(), Some(&id("1.1")));
    }

    #[test]
    fn navigation_from_an_unknown_level_is_an_error_not_a_root_fallback() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();

        assert!(matches!(
            tree.advance(&id("4.4")),
            Err(RecoveryError::UnknownLevel(_))
        ));
        assert_eq!(tree.active(), Some(&id("1.1")));
    }

    #[test]
    fn a_node_escalates_at_most_once() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();

        assert!(matches!(
            tree.escalate(&LevelId::top(), dec!(160)),
            Err(RecoveryError::AlreadyEscalated(_))
        ));
        assert!(matches!(
            tree.begin(dec!(160), &seed()),
            Err(RecoveryError::AlreadyEscalated(_))
        ));
    }

    #[test]
    fn depth_cap_leaves_the_level_childless() {
        let mut tree = tree(2, 1);
        tree.begin(dec!(160), &seed()).unwrap();

        // "1.1" sits at layer 1 == max_depth, so its deficit stays put.
        let escalated = tree.escalate(&id("1.1"), dec!(40)).unwrap();

        assert_eq!(escalated, None);
        assert!(tree.node(&id("1.1")).unwrap().children.is_empty());
        assert_eq!(tree.active(), Some(&id("1.1")));
    }

    #[test]
    fn completed_levels_accept_no_trades() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();
        complete_level(&mut tree, &id("1.1"), dec!(80));

        assert!(matches!(
            tree.process_trade(&id("1.1"), dec!(5), Decimal::ZERO),
            Err(RecoveryError::Completed(_))
        ));
    }

    #[test]
    fn exhausted_layer_with_excess_profit_exits_to_root() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();

        complete_level(&mut tree, &id("1.1"), dec!(80));
        let nav = complete_level(&mut tree, &id("1.2"), dec!(85));

        // Children profit 165 >= 160, so the top node completes untraded
        // and the climb continues out of the hierarchy.
        assert_eq!(nav, Navigation::Exited);
        assert!(tree.node(&LevelId::top()).unwrap().completed);
        assert_eq!(tree.active(), None);
    }

    #[test]
    fn rounding_shortfall_reactivates_the_parent_for_the_difference() {
        let mut tree = tree(3, 3);
        tree.begin(dec!(100), &seed()).unwrap();

        complete_level(&mut tree, &id("1.1"), dec!(33.33));
        complete_level(&mut tree, &id("1.2"), dec!(33.33));
        let nav = complete_level(&mut tree, &id("1.3"), dec!(33.33));

        // 3 * 33.33 leaves 0.01 of the original 100 unrecovered.
        assert_eq!(nav, Navigation::Activated(LevelId::top()));
        let top = tree.node(&LevelId::top()).unwrap();
        assert_eq!(top.state.take_profit_target(), dec!(0.01));
        assert_eq!(top.state.total_profit(), Decimal::ZERO);

        // Winning the remainder finishes the whole hierarchy.
        let nav = complete_level(&mut tree, &LevelId::top(), dec!(0.01));
        assert_eq!(nav, Navigation::Exited);
    }

    #[test]
    fn climb_retargets_a_parent_that_traded_at_a_loss() {
        let mut tree = tree(2, 2);
        tree.begin(dec!(160), &seed()).unwrap();

        // "1.1" loses 12, breaching its 2-martingale drawdown of 20 once
        // the reference margin is added.
        let events = tree.process_trade(&id("1.1"), dec!(-12), dec!(10)).unwrap();
        let amount = events
            .iter()
            .find_map(|e| match e {
                CampaignEvent::MaxDrawdownExceeded {
                    amount_to_recover, ..
                } => Some(*amount_to_recover),
                _ => None,
            })
            .expect("drawdown breach");
        assert_eq!(amount, dec!(22));

        let first_child = tree.escalate(&id("1.1"), amount).unwrap();
        assert_eq!(first_child, Some(id("1.1.1")));

        complete_level(&mut tree, &id("1.1.1"), dec!(11));
        let nav = complete_level(&mut tree, &id("1.1.2"), dec!(12));

        // Children recovered 23 against "1.1"'s own -12; its original
        // target of 80 still has 80 - (23 - 12) = 69 outstanding.
        assert_eq!(nav, Navigation::Activated(id("1.1")));
        let parent = tree.node(&id("1.1")).unwrap();
        assert_eq!(parent.state.take_profit_target(), dec!(69));
        assert_eq!(parent.state.total_profit(), Decimal::ZERO);
        assert!(!parent.state.is_recovery_mode());
    }

    #[test]
    fn layer_overrides_shape_child_creation() {
        let mut config = hierarchy(2, 2);
        config.layers.insert(
            2,
            LayerOverride {
                levels_per_layer: Some(3),
                initial_stake: Some(dec!(1)),
                ..LayerOverride::default()
            },
        );
        let mut tree = RecoveryTree::new(config, 5);
        tree.begin(dec!(160), &seed()).unwrap();

        tree.process_trade(&id("1.1"), dec!(-12), dec!(10)).unwrap();
        tree.escalate(&id("1.1"), dec!(22)).unwrap();

        let grandchild = tree.node(&id("1.1.1")).unwrap();
        assert_eq!(grandchild.levels_in_layer, 3);
        assert_eq!(grandchild.params.amount_to_recover, dec!(7.33));
        assert_eq!(grandchild.params.initial_stake, dec!(1));
        // Unset fields inherit from the parent level.
        assert_eq!(grandchild.params.martingale_level, 3);
        assert_eq!(grandchild.params.max_drawdown, dec!(20));
    }

    #[test]
    fn deeper_layers_inherit_the_parent_stake_without_overrides() {
        let mut tree = tree(2, 3);
        tree.begin(dec!(160), &seed()).unwrap();
        tree.process_trade(&id("1.1"), dec!(-12), dec!(10)).unwrap();
        tree.escalate(&id("1.1"), dec!(22)).unwrap();

        let grandchild = tree.node(&id("1.1.1")).unwrap();
        assert_eq!(grandchild.params.initial_stake, dec!(0.35));
        assert_eq!(grandchild.params.barrier_offset, dec!(0.35));
    }
}
