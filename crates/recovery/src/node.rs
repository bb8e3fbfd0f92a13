//! Level identity and the tree node that owns one campaign.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RecoveryError;
use crate::state::RecoveryState;

/// Identifies one level in the recovery hierarchy by its dot-separated
/// path, e.g. `"1.2.1"`: segment count is depth, the last segment is the
/// sibling index. The virtual root is `"0"`; the hierarchy's top node is
/// `"1"`. Ordering is numeric segment-by-segment, so a parent sorts before
/// its children.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LevelId(Vec<u32>);

impl LevelId {
    /// The virtual root, `"0"`. Not tradable; climbing past the top node
    /// ends here.
    #[must_use]
    pub fn root() -> Self {
        Self(vec![0])
    }

    /// The hierarchy's top node, `"1"`, which carries the full escalated
    /// amount.
    #[must_use]
    pub fn top() -> Self {
        Self(vec![1])
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == [0]
    }

    /// Number of path segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Layer number: depth minus one. The virtual root and the top node
    /// are both layer 0; the top node's children are layer 1.
    #[must_use]
    pub fn layer(&self) -> u32 {
        self.0.len().saturating_sub(1) as u32
    }

    /// Sibling index (the last path segment).
    #[must_use]
    pub fn index(&self) -> u32 {
        self.0.last().copied().unwrap_or(0)
    }

    /// Parent id; `None` for the virtual root. The top node's parent is
    /// the virtual root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else if self.0.len() == 1 {
            Some(Self::root())
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Child id with sibling index `index`. The virtual root's children
    /// are the single-segment ids, so `root().child(1)` is the top node.
    #[must_use]
    pub fn child(&self, index: u32) -> Self {
        if self.is_root() {
            Self(vec![index])
        } else {
            let mut segments = self.0.clone();
            segments.push(index);
            Self(segments)
        }
    }

    /// Id of the next sibling (last segment incremented).
    #[must_use]
    pub fn next_sibling(&self) -> Self {
        let mut segments = self.0.clone();
        if let Some(last) = segments.last_mut() {
            *last += 1;
        }
        Self(segments)
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut segments = self.0.iter();
        if let Some(first) = segments.next() {
            write!(f, "{first}")?;
            for segment in segments {
                write!(f, ".{segment}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for LevelId {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| RecoveryError::InvalidLevelId(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }
}

impl Serialize for LevelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LevelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Resolved trading parameters for one level. Optional per-layer overrides
/// have already been folded in by the time a node is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelParams {
    /// The share of the escalated deficit this level must win back; also
    /// the take-profit target of the level's campaign.
    pub amount_to_recover: Decimal,
    pub initial_stake: Decimal,
    pub martingale_level: u32,
    pub max_drawdown: Decimal,
    pub barrier_offset: Decimal,
}

/// One node of the recovery tree. Owns exactly one [`RecoveryState`];
/// parent and children are id links into the tree's arena, never shared
/// state.
#[derive(Debug, Clone)]
pub struct LevelNode {
    pub id: LevelId,
    pub params: LevelParams,
    pub state: RecoveryState,
    pub parent: Option<LevelId>,
    /// Creation order is sibling order.
    pub children: Vec<LevelId>,
    /// How many siblings this node's layer subdivides into, resolved at
    /// creation time.
    pub levels_in_layer: u32,
    pub completed: bool,
}

impl LevelNode {
    #[must_use]
    pub fn new(id: LevelId, params: LevelParams, levels_in_layer: u32, recovery_attempts: u32) -> Self {
        let state = RecoveryState::new(
            params.initial_stake,
            params.amount_to_recover,
            params.max_drawdown,
            params.martingale_level,
            recovery_attempts,
        );
        let parent = id.parent();
        Self {
            id,
            params,
            state,
            parent,
            children: Vec::new(),
            levels_in_layer,
            completed: false,
        }
    }
}
