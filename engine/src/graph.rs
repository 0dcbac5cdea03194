//! Referral graph snapshot
//!
//! Read-only view of the `referrer_id` edges plus the per-user fields rank evaluation needs.
//! Every traversal uses an explicit stack or queue, a depth bound and a visited set, so
//! corrupted edges surface as [`GraphError::Cycle`] instead of looping.

use crate::error::LedgerError;
use crate::ledger::Ledger;
use comp_model::rank::tenure_days;
use comp_model::{Rank, User, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("referral cycle detected at {at}")]
    Cycle { at: UserId },
    #[error("{0} is not in the referral graph")]
    Missing(UserId),
}

#[derive(Debug, Clone)]
struct Node {
    referrer: Option<UserId>,
    rank: Rank,
    first_investment: Option<u64>,
    children: Vec<UserId>,
}

/// Users ordered for bottom-up processing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BottomUp {
    /// Deepest users first
    pub users: Vec<UserId>,
    /// Users whose upline never reaches a root
    pub cyclic: Vec<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferralGraph {
    nodes: HashMap<UserId, Node>,
}

impl ReferralGraph {
    pub fn from_users<'a>(users: impl IntoIterator<Item = &'a User>) -> Self {
        let mut nodes: HashMap<UserId, Node> = users
            .into_iter()
            .map(|u| {
                (
                    u.id,
                    Node {
                        referrer: u.referrer_id,
                        rank: u.rank,
                        first_investment: u.first_investment,
                        children: Vec::new(),
                    },
                )
            })
            .collect();

        let edges: Vec<(UserId, UserId)> = nodes
            .iter()
            .filter_map(|(id, node)| node.referrer.map(|r| (r, *id)))
            .collect();
        for (parent, child) in edges {
            if let Some(node) = nodes.get_mut(&parent) {
                node.children.push(child);
            }
        }
        for node in nodes.values_mut() {
            node.children.sort_unstable();
        }
        Self { nodes }
    }

    /// Snapshot of the whole population
    pub async fn load(ledger: &dyn Ledger) -> Result<Self, LedgerError> {
        let users = ledger.list_users().await?;
        Ok(Self::from_users(&users))
    }

    /// Snapshot of `root` and its downline down to `max_depth` levels
    pub async fn load_downline(
        ledger: &dyn Ledger,
        root: UserId,
        max_depth: u16,
    ) -> Result<Self, LedgerError> {
        let mut users = vec![ledger.get_user(root).await?];
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([(root, 0u16)]);

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for child in ledger.find_downline(id).await? {
                if seen.insert(child.id) {
                    queue.push_back((child.id, depth + 1));
                    users.push(child);
                }
            }
        }
        Ok(Self::from_users(&users))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn rank(&self, id: UserId) -> Option<Rank> {
        self.nodes.get(&id).map(|n| n.rank)
    }

    /// Record a promotion so later evaluations in the same pass see it
    pub fn set_rank(&mut self, id: UserId, rank: Rank) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.rank = node.rank.max(rank);
        }
    }

    pub fn children(&self, id: UserId) -> &[UserId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Days since each direct referral's first investment
    pub fn referral_tenures(&self, id: UserId, now: u64) -> Vec<Option<u32>> {
        self.children(id)
            .iter()
            .map(|c| {
                let first = self.nodes.get(c).and_then(|n| n.first_investment);
                tenure_days(first, now)
            })
            .collect()
    }

    /// Upline of `id`, nearest first, at most `max_depth` entries
    pub fn ancestors(&self, id: UserId, max_depth: u16) -> Result<Vec<UserId>, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::Missing(id))?;
        let mut visited = HashSet::from([id]);
        let mut upline = Vec::new();
        let mut current = node.referrer;

        while let Some(ancestor) = current {
            if upline.len() >= usize::from(max_depth) {
                break;
            }
            if !visited.insert(ancestor) {
                return Err(GraphError::Cycle { at: ancestor });
            }
            upline.push(ancestor);
            current = self.nodes.get(&ancestor).and_then(|n| n.referrer);
        }
        Ok(upline)
    }

    /// Whether `start` or any descendant within `max_depth` levels holds `min_rank`
    ///
    /// `visited` is shared across calls from one evaluation, so a member reachable from two
    /// legs is a cycle.
    fn subtree_contains(
        &self,
        start: UserId,
        min_rank: Rank,
        max_depth: u16,
        visited: &mut HashSet<UserId>,
    ) -> Result<bool, GraphError> {
        let mut stack = vec![(start, 0u16)];
        while let Some((id, depth)) = stack.pop() {
            if !visited.insert(id) {
                return Err(GraphError::Cycle { at: id });
            }
            let node = self.nodes.get(&id).ok_or(GraphError::Missing(id))?;
            if node.rank >= min_rank {
                return Ok(true);
            }
            if depth < max_depth {
                stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
            }
        }
        Ok(false)
    }

    /// Count direct legs of `id` whose subtree holds `min_rank`, stopping at `need`
    pub fn count_qualifying_legs(
        &self,
        id: UserId,
        min_rank: Rank,
        need: u32,
        max_depth: u16,
    ) -> Result<u32, GraphError> {
        if !self.contains(id) {
            return Err(GraphError::Missing(id));
        }
        let mut visited = HashSet::from([id]);
        let mut legs = 0u32;
        for child in self.children(id) {
            if legs >= need {
                break;
            }
            if self.subtree_contains(*child, min_rank, max_depth, &mut visited)? {
                legs += 1;
            }
        }
        Ok(legs)
    }

    /// Every user ordered deepest first; users stuck in a cycle are reported apart
    pub fn bottom_up_order(&self) -> BottomUp {
        let mut depth: HashMap<UserId, u32> = HashMap::with_capacity(self.nodes.len());
        let mut queue: VecDeque<UserId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.referrer.map_or(true, |r| !self.nodes.contains_key(&r)))
            .map(|(id, _)| *id)
            .collect();
        for root in &queue {
            depth.insert(*root, 0);
        }

        while let Some(id) = queue.pop_front() {
            let d = depth.get(&id).copied().unwrap_or(0);
            for child in self.children(id) {
                if !depth.contains_key(child) {
                    depth.insert(*child, d + 1);
                    queue.push_back(*child);
                }
            }
        }

        let mut users: Vec<(u32, UserId)> = depth.iter().map(|(id, d)| (*d, *id)).collect();
        users.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut cyclic: Vec<UserId> = self
            .nodes
            .keys()
            .filter(|id| !depth.contains_key(id))
            .copied()
            .collect();
        cyclic.sort_unstable();

        BottomUp {
            users: users.into_iter().map(|(_, id)| id).collect(),
            cyclic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::memory::MemoryLedger;

    fn user(id: u64, referrer: Option<u64>, rank: Rank) -> User {
        let mut u = User::new(UserId(id), 0);
        u.referrer_id = referrer.map(UserId);
        u.rank = rank;
        u
    }

    /// 1 -> {2, 3}, 2 -> {4}, 4 -> {5}
    fn chain() -> ReferralGraph {
        ReferralGraph::from_users(&[
            user(1, None, Rank::Regular),
            user(2, Some(1), Rank::Regular),
            user(3, Some(1), Rank::Regular),
            user(4, Some(2), Rank::Regular),
            user(5, Some(4), Rank::TmcPlus),
        ])
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let g = chain();
        assert_eq!(
            g.ancestors(UserId(5), 50).unwrap(),
            vec![UserId(4), UserId(2), UserId(1)]
        );
        assert_eq!(g.ancestors(UserId(5), 2).unwrap(), vec![UserId(4), UserId(2)]);
        assert!(g.ancestors(UserId(1), 50).unwrap().is_empty());
        assert_eq!(g.ancestors(UserId(9), 50), Err(GraphError::Missing(UserId(9))));
    }

    #[test]
    fn test_ancestor_cycle_detected() {
        let g = ReferralGraph::from_users(&[
            user(1, Some(3), Rank::Regular),
            user(2, Some(1), Rank::Regular),
            user(3, Some(2), Rank::Regular),
        ]);
        assert!(matches!(g.ancestors(UserId(1), 50), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_qualifying_legs_search_depth() {
        let g = chain();
        // The PLUS member sits two levels under leg 2
        assert_eq!(g.count_qualifying_legs(UserId(1), Rank::TmcPlus, 4, 50).unwrap(), 1);
        assert_eq!(g.count_qualifying_legs(UserId(1), Rank::TmcPlus, 4, 1).unwrap(), 0);
        assert_eq!(g.count_qualifying_legs(UserId(1), Rank::TmcPro, 4, 50).unwrap(), 0);
    }

    #[test]
    fn test_qualifying_legs_stop_at_requirement() {
        let mut users = vec![user(1, None, Rank::TmcPlus)];
        users.extend((2..=13).map(|id| user(id, Some(1), Rank::TmcPlus)));
        let g = ReferralGraph::from_users(&users);
        assert_eq!(g.count_qualifying_legs(UserId(1), Rank::TmcPlus, 4, 50).unwrap(), 4);
    }

    #[test]
    fn test_set_rank_visible_to_upline() {
        let mut g = chain();
        assert_eq!(g.count_qualifying_legs(UserId(1), Rank::TmcPro, 4, 50).unwrap(), 0);
        g.set_rank(UserId(3), Rank::TmcPro);
        assert_eq!(g.count_qualifying_legs(UserId(1), Rank::TmcPro, 4, 50).unwrap(), 1);
        // Never lowered
        g.set_rank(UserId(3), Rank::Regular);
        assert_eq!(g.rank(UserId(3)), Some(Rank::TmcPro));
    }

    #[test]
    fn test_bottom_up_order() {
        let order = chain().bottom_up_order();
        assert_eq!(
            order.users,
            vec![UserId(5), UserId(4), UserId(2), UserId(3), UserId(1)]
        );
        assert!(order.cyclic.is_empty());
    }

    #[test]
    fn test_bottom_up_isolates_cycles() {
        let g = ReferralGraph::from_users(&[
            user(1, None, Rank::Regular),
            user(2, Some(1), Rank::Regular),
            user(7, Some(8), Rank::Regular),
            user(8, Some(7), Rank::Regular),
            user(9, Some(8), Rank::Regular),
        ]);
        let order = g.bottom_up_order();
        assert_eq!(order.users, vec![UserId(2), UserId(1)]);
        assert_eq!(order.cyclic, vec![UserId(7), UserId(8), UserId(9)]);
    }

    #[test]
    fn test_referral_tenures() {
        let mut a = user(2, Some(1), Rank::Regular);
        a.first_investment = Some(0);
        let b = user(3, Some(1), Rank::Regular);
        let g = ReferralGraph::from_users(&[user(1, None, Rank::Regular), a, b]);
        assert_eq!(g.referral_tenures(UserId(1), 86_400 * 4), vec![Some(4), None]);
    }

    #[tokio::test]
    async fn test_load_downline_is_bounded() {
        let ledger = MemoryLedger::new();
        ledger.create_user(user(1, None, Rank::Regular)).await.unwrap();
        for id in 2..=6 {
            ledger
                .create_user(user(id, Some(id - 1), Rank::Regular))
                .await
                .unwrap();
        }
        ledger.create_user(user(10, None, Rank::Regular)).await.unwrap();

        let g = ReferralGraph::load_downline(&ledger, UserId(2), 2).await.unwrap();
        assert_eq!(g.len(), 3);
        assert!(g.contains(UserId(4)));
        assert!(!g.contains(UserId(5)));
        assert!(!g.contains(UserId(1)));

        let full = ReferralGraph::load(&ledger).await.unwrap();
        assert_eq!(full.len(), 7);
    }
}
