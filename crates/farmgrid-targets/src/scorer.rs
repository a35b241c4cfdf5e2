//! Target scoring for selection decisions.
//!
//! Each candidate is classified first (`HasRoot`, `CanBeRooted`,
//! `Unreachable`); reachable ones are then scored at their simulated
//! prepared state using a product of:
//! - **Yield**: money stolen per batch, times hack chance
//! - **Rate**: divided by the batch's wall-clock span
//! - **Size**: a logarithmic bonus on `money_max`
//! - **Fit**: the share of one batch the current pool could hold

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use farm_core::{BatchConfig, ScriptCosts, TargetSnapshot, formulas};
use farmgrid_pool::WorkerPool;

use crate::estimate::{BatchThreads, batch_threads};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    HasRoot,
    /// Capability suffices; root is one `gain_root` away.
    CanBeRooted,
    Unreachable,
}

/// Player capability and tuning needed to score targets.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub player_level: f64,
    pub root_credentials: u32,
    pub batch: BatchConfig,
    pub scripts: ScriptCosts,
}

/// Ranked candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTarget {
    pub name: String,
    pub readiness: Readiness,
    /// Higher = farmed first.
    pub score: f64,
    /// Thread estimate at the prepared state.
    pub threads: BatchThreads,
    pub batch_ram: f64,
    pub batch_time: Duration,
    pub chance: f64,
    pub yield_per_batch: f64,
}

pub fn classify(target: &TargetSnapshot, player_level: f64, root_credentials: u32) -> Readiness {
    if target.required_level > player_level {
        return Readiness::Unreachable;
    }
    if target.has_root {
        Readiness::HasRoot
    } else if target.required_ports <= root_credentials {
        Readiness::CanBeRooted
    } else {
        Readiness::Unreachable
    }
}

/// Score one target, or `None` if it should not be farmed at all.
pub fn score_target(
    target: &TargetSnapshot,
    ctx: &ScoringContext,
    pool: &WorkerPool,
) -> Option<ScoredTarget> {
    let readiness = classify(target, ctx.player_level, ctx.root_credentials);
    if readiness == Readiness::Unreachable || target.money_max <= 0.0 {
        return None;
    }

    let prepared = target.prepared(ctx.player_level);
    let level = ctx.player_level;
    let hack_fraction = formulas::hack_fraction(level, prepared.required_level, prepared.security);
    let chance = formulas::hack_chance(level, prepared.required_level, prepared.security);

    let threads = batch_threads(
        hack_fraction,
        ctx.batch.steal_fraction,
        ctx.batch.grow_margin,
        |multiplier| formulas::growth_threads(prepared.security, prepared.growth, multiplier, 1),
    )?;

    let batch_ram = threads.ram(&ctx.scripts);
    let batch_time = prepared.durations.weaken + ctx.batch.spacing() * 3;
    let yield_per_batch = prepared.money_max * threads.stolen_fraction;

    let ram_fit = if batch_ram > 0.0 {
        (pool.total_free_ram() / batch_ram).min(1.0)
    } else {
        1.0
    };

    let secs = batch_time.as_secs_f64().max(f64::EPSILON);
    let size_bonus = (std::f64::consts::E + prepared.money_max).ln();
    let score = yield_per_batch * chance / secs * size_bonus * ram_fit;

    Some(ScoredTarget {
        name: target.name.clone(),
        readiness,
        score,
        threads,
        batch_ram,
        batch_time,
        chance,
        yield_per_batch,
    })
}

/// Score all targets and return a sorted list (best first).
pub fn rank_targets(
    targets: &[TargetSnapshot],
    ctx: &ScoringContext,
    pool: &WorkerPool,
) -> Vec<ScoredTarget> {
    let mut scored: Vec<ScoredTarget> = targets
        .iter()
        .filter_map(|t| score_target(t, ctx, pool))
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    debug!(
        candidates = targets.len(),
        ranked = scored.len(),
        best = scored.first().map(|s| s.name.as_str()).unwrap_or("-"),
        "targets ranked"
    );
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::{OperationDurations, WorkerNode};
    use farmgrid_pool::RamReserve;

    fn make_target(name: &str, money_max: f64) -> TargetSnapshot {
        TargetSnapshot {
            name: name.to_string(),
            money_max,
            money: money_max,
            security: 10.0,
            min_security: 10.0,
            required_level: 50.0,
            required_ports: 0,
            growth: 40.0,
            has_root: true,
            durations: OperationDurations {
                hack: Duration::from_secs(30),
                grow: Duration::from_secs(96),
                weaken: Duration::from_secs(120),
            },
        }
    }

    fn ctx() -> ScoringContext {
        ScoringContext {
            player_level: 200.0,
            root_credentials: 2,
            batch: BatchConfig::default(),
            scripts: ScriptCosts::default(),
        }
    }

    fn big_pool() -> WorkerPool {
        WorkerPool::from_nodes(
            vec![WorkerNode {
                name: "home".to_string(),
                ram_max: 1_000_000.0,
                ram_used: 0.0,
                cores: 1,
                has_root: true,
                purchased: false,
            }],
            &RamReserve::none(),
        )
    }

    #[test]
    fn classify_covers_all_cases() {
        let mut t = make_target("a", 1e6);
        assert_eq!(classify(&t, 200.0, 0), Readiness::HasRoot);

        t.has_root = false;
        t.required_ports = 2;
        assert_eq!(classify(&t, 200.0, 2), Readiness::CanBeRooted);
        assert_eq!(classify(&t, 200.0, 1), Readiness::Unreachable);

        t.has_root = true;
        t.required_level = 300.0;
        assert_eq!(classify(&t, 200.0, 5), Readiness::Unreachable);
    }

    #[test]
    fn unreachable_and_moneyless_targets_are_excluded() {
        let mut locked = make_target("locked", 1e6);
        locked.has_root = false;
        locked.required_ports = 5;
        let empty = make_target("empty", 0.0);
        let ranked = rank_targets(&[locked, empty, make_target("ok", 1e6)], &ctx(), &big_pool());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].name, "ok");
    }

    #[test]
    fn score_ignores_live_state() {
        let prepped = make_target("a", 1e7);
        let mut drained = prepped.clone();
        drained.money = 1_000.0;
        drained.security = 60.0;
        drained.durations.weaken = Duration::from_secs(10_000);

        let a = score_target(&prepped, &ctx(), &big_pool()).unwrap();
        let b = score_target(&drained, &ctx(), &big_pool()).unwrap();
        assert_eq!(a.score, b.score);
        assert_eq!(a.threads, b.threads);
    }

    #[test]
    fn score_is_monotonic_in_money_max() {
        let pool = big_pool();
        let mut last = 0.0;
        for money_max in [1e3, 1e5, 1e6, 2e6, 1e8, 1e10] {
            let s = score_target(&make_target("a", money_max), &ctx(), &pool).unwrap();
            assert!(s.score >= last, "score fell at money_max={money_max}");
            last = s.score;
        }
    }

    #[test]
    fn shorter_batches_score_higher() {
        // Lower minimum security shortens every duration.
        let pool = big_pool();
        let slow = make_target("slow", 1e6);
        let mut fast = slow.clone();
        fast.min_security = 5.0;
        fast.security = 5.0;
        let s_slow = score_target(&slow, &ctx(), &pool).unwrap();
        let s_fast = score_target(&fast, &ctx(), &pool).unwrap();
        assert!(s_fast.batch_time < s_slow.batch_time);
        assert!(s_fast.score > s_slow.score);
    }

    #[test]
    fn small_pool_reduces_score() {
        let target = make_target("a", 1e6);
        let tiny = WorkerPool::from_nodes(
            vec![WorkerNode {
                name: "home".to_string(),
                ram_max: 8.0,
                ram_used: 0.0,
                cores: 1,
                has_root: true,
                purchased: false,
            }],
            &RamReserve::none(),
        );
        let full = score_target(&target, &ctx(), &big_pool()).unwrap();
        let cramped = score_target(&target, &ctx(), &tiny).unwrap();
        assert!(cramped.score < full.score);
    }

    #[test]
    fn rank_returns_sorted() {
        let ranked = rank_targets(
            &[make_target("mid", 1e6), make_target("big", 1e9), make_target("small", 1e3)],
            &ctx(),
            &big_pool(),
        );
        let order: Vec<&str> = ranked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["big", "mid", "small"]);
    }
}
