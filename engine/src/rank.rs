//! Rank evaluator
//!
//! Climbs one tier at a time from the user's current rank while each step's criteria hold.
//! Regular -> TMC PLUS is the staged window check from [`comp_model::rank::plus_step`];
//! every tier above counts qualifying legs in the [`ReferralGraph`].

use crate::graph::{GraphError, ReferralGraph};
use comp_model::rank::{plus_step, tenure_days, Advisory, RankCriteria};
use comp_model::{Rank, User};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankDecision {
    pub from: Rank,
    pub to: Rank,
    /// TMC PLUS windows met after evaluation
    pub plus_progress: u8,
    /// Why the user stopped where they did
    pub advisory: Option<Advisory>,
}

impl RankDecision {
    pub fn promoted(&self) -> bool {
        self.to > self.from
    }

    /// Anything to persist for `user`
    pub fn changes(&self, user: &User) -> bool {
        self.to != user.rank || self.plus_progress != user.plus_progress
    }
}

pub struct RankEvaluator<'a> {
    criteria: &'a RankCriteria,
}

impl<'a> RankEvaluator<'a> {
    pub fn new(criteria: &'a RankCriteria) -> Self {
        Self { criteria }
    }

    pub fn evaluate(&self, user: &User, graph: &ReferralGraph, now: u64) -> Result<RankDecision, GraphError> {
        let mut decision = RankDecision {
            from: user.rank,
            to: user.rank,
            plus_progress: user.plus_progress,
            advisory: None,
        };

        if user.rank.next().is_none() {
            decision.advisory = Some(Advisory::TopRank);
            return Ok(decision);
        }
        if graph.children(user.id).is_empty() {
            decision.advisory = Some(Advisory::NoDirectConnections);
            return Ok(decision);
        }

        while let Some(target) = decision.to.next() {
            if target == Rank::TmcPlus {
                let outcome = plus_step(
                    decision.plus_progress,
                    tenure_days(user.first_investment, now),
                    &graph.referral_tenures(user.id, now),
                    &self.criteria.plus_windows,
                );
                decision.plus_progress = outcome.progress;
                if !outcome.qualified {
                    decision.advisory = outcome.advisory;
                    break;
                }
            } else {
                let (Some(need), Some(holding)) =
                    (self.criteria.legs_required(target), target.previous())
                else {
                    break;
                };
                let have =
                    graph.count_qualifying_legs(user.id, holding, need, self.criteria.max_depth)?;
                if have < need {
                    decision.advisory = Some(Advisory::InsufficientLegs { target, have, need });
                    break;
                }
            }
            decision.to = target;
        }

        if decision.to.next().is_none() {
            decision.advisory = Some(Advisory::TopRank);
        }
        Ok(decision)
    }
}
