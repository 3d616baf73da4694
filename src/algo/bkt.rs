//! Bayesian Knowledge Tracing
//!
//! Hidden-Markov estimate of P(skill learned). Each answer is treated as
//! evidence (posterior through guess/slip), followed by one learning
//! opportunity at rate P(T).

use chrono::{DateTime, Utc};

use crate::config::{BktParams, MasteryThresholds};
use crate::error::{EngineError, EngineResult};
use crate::types::{MasteryRecord, MASTERY_CEILING, MASTERY_FLOOR};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BktStep {
    /// P(L | evidence) before the learning transition.
    pub posterior: f64,
    pub mastery: f64,
    pub velocity: f64,
    /// The evidence denominator was zero and the prior was kept.
    pub degenerate: bool,
}

pub fn clamp_mastery(p: f64) -> f64 {
    p.clamp(MASTERY_FLOOR, MASTERY_CEILING)
}

pub fn posterior(p: f64, params: &BktParams, is_correct: bool) -> (f64, bool) {
    let (numerator, denominator) = if is_correct {
        let n = p * (1.0 - params.slip);
        (n, n + (1.0 - p) * params.guess)
    } else {
        let n = p * params.slip;
        (n, n + (1.0 - p) * (1.0 - params.guess))
    };

    if denominator > 0.0 {
        (numerator / denominator, false)
    } else {
        (p, true)
    }
}

pub fn bkt_step(p: f64, params: &BktParams, is_correct: bool) -> BktStep {
    let (posterior, degenerate) = posterior(p, params, is_correct);
    let learned = posterior + (1.0 - posterior) * params.learn_rate;
    let mastery = clamp_mastery(learned);

    BktStep {
        posterior,
        mastery,
        velocity: mastery - p,
        degenerate,
    }
}

pub fn is_plateau(total_attempts: u32, velocity: f64, thresholds: &MasteryThresholds) -> bool {
    total_attempts >= thresholds.plateau_min_attempts
        && velocity.abs() < thresholds.plateau_max_velocity
}

/// Outcome of applying one answer to a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasteryTransition {
    pub before: f64,
    pub after: f64,
    pub velocity: f64,
    pub mastery_achieved: bool,
    pub plateau_entered: bool,
    pub degenerate: bool,
}

/// Applies one answer in place. The caller owns persistence and versioning.
pub fn apply_answer(
    record: &mut MasteryRecord,
    is_correct: bool,
    thresholds: &MasteryThresholds,
    now: DateTime<Utc>,
) -> MasteryTransition {
    let before = record.mastery_probability;
    let step = bkt_step(before, &record.params(), is_correct);

    record.total_attempts += 1;
    if is_correct {
        record.correct_attempts += 1;
    }

    let was_plateau = record.plateau_flag;
    record.mastery_probability = step.mastery;
    record.learning_velocity = step.velocity;
    record.plateau_flag = is_plateau(record.total_attempts, step.velocity, thresholds);
    record.last_practiced_at = Some(now);
    record.updated_at = now;

    MasteryTransition {
        before,
        after: step.mastery,
        velocity: step.velocity,
        mastery_achieved: step.mastery >= thresholds.achieved && before < thresholds.achieved,
        plateau_entered: record.plateau_flag && !was_plateau,
        degenerate: step.degenerate,
    }
}

/// Initial mastery from diagnostic accuracy with the guessing floor removed.
pub fn diagnostic_prior(correct: u32, total: u32, guess_correction: f64) -> EngineResult<f64> {
    if total == 0 {
        return Err(EngineError::validation("diagnostic total must be positive"));
    }
    if correct > total {
        return Err(EngineError::validation(format!(
            "diagnostic correct count {correct} exceeds total {total}"
        )));
    }
    if !(0.0..1.0).contains(&guess_correction) {
        return Err(EngineError::validation("guess correction must be in [0, 1)"));
    }

    let accuracy = correct as f64 / total as f64;
    Ok(clamp_mastery(
        (accuracy - guess_correction) / (1.0 - guess_correction),
    ))
}
