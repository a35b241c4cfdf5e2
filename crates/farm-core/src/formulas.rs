//! Hack/grow/weaken model.
//!
//! Used to score targets at their simulated prepared state, and as the
//! default for the live analysis queries on [`crate::Environment`].

use std::time::Duration;

/// Security added per hack thread that lands.
pub const HACK_SECURITY_PER_THREAD: f64 = 0.002;
/// Security added per grow thread that lands.
pub const GROW_SECURITY_PER_THREAD: f64 = 0.004;
/// Security removed per weaken thread that lands.
pub const WEAKEN_SECURITY_PER_THREAD: f64 = 0.05;

const GROW_TIME_FACTOR: f64 = 3.2;
const WEAKEN_TIME_FACTOR: f64 = 4.0;

const BASE_GROWTH_RATE: f64 = 1.03;
const MAX_GROWTH_RATE: f64 = 1.0035;
const HACK_BALANCE: f64 = 240.0;

/// Extra effect per additional core on the node a thread runs on.
pub fn core_bonus(cores: u32) -> f64 {
    1.0 + f64::from(cores.saturating_sub(1)) / 16.0
}

/// Probability that one hack attempt succeeds.
pub fn hack_chance(level: f64, required_level: f64, security: f64) -> f64 {
    if level <= 0.0 {
        return 0.0;
    }
    let skill_mult = 1.75 * level;
    let skill_chance = (skill_mult - required_level) / skill_mult;
    let difficulty = (100.0 - security) / 100.0;
    (skill_chance * difficulty).clamp(0.0, 1.0)
}

/// Fraction of current money one hack thread steals on success.
pub fn hack_fraction(level: f64, required_level: f64, security: f64) -> f64 {
    if level <= 0.0 {
        return 0.0;
    }
    let difficulty = (100.0 - security) / 100.0;
    let skill = (level - (required_level - 1.0)) / level;
    (difficulty * skill / HACK_BALANCE).clamp(0.0, 1.0)
}

/// Hack duration; grow and weaken are fixed multiples of it.
pub fn hack_time(level: f64, required_level: f64, security: f64) -> Duration {
    let skill_factor = 2.5 * required_level * security + 500.0;
    let secs = 5.0 * skill_factor / (level.max(0.0) + 50.0);
    Duration::from_secs_f64(secs.max(0.0))
}

pub fn grow_time(level: f64, required_level: f64, security: f64) -> Duration {
    hack_time(level, required_level, security).mul_f64(GROW_TIME_FACTOR)
}

pub fn weaken_time(level: f64, required_level: f64, security: f64) -> Duration {
    hack_time(level, required_level, security).mul_f64(WEAKEN_TIME_FACTOR)
}

fn adjusted_growth_rate(security: f64) -> f64 {
    if security <= 0.0 {
        return MAX_GROWTH_RATE;
    }
    (1.0 + (BASE_GROWTH_RATE - 1.0) / security).min(MAX_GROWTH_RATE)
}

/// Money multiplier produced by `threads` grow threads.
pub fn grow_multiplier(security: f64, growth: f64, threads: f64, cores: u32) -> f64 {
    if threads <= 0.0 || growth <= 0.0 {
        return 1.0;
    }
    let exponent = threads * (growth / 100.0) * core_bonus(cores);
    adjusted_growth_rate(security).powf(exponent)
}

/// Fractional grow threads needed to multiply money by `multiplier`.
pub fn growth_threads(security: f64, growth: f64, multiplier: f64, cores: u32) -> f64 {
    if multiplier <= 1.0 || growth <= 0.0 {
        return 0.0;
    }
    let per_thread = adjusted_growth_rate(security).ln() * (growth / 100.0) * core_bonus(cores);
    multiplier.ln() / per_thread
}

/// Weaken threads that remove at least `security` points.
pub fn weaken_threads_for(security: f64) -> u32 {
    if security <= 0.0 {
        return 0;
    }
    // Round before ceil so 10 / 0.05 does not become 201.
    let exact = security / WEAKEN_SECURITY_PER_THREAD;
    let rounded = (exact * 1e9).round() / 1e9;
    rounded.ceil() as u32
}
