//! Adaptive exam math: module drafting, stage-two branching and scaled scores.

use std::collections::{HashMap, HashSet};

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use crate::config::{DifficultyMix, ExamConfig};
use crate::types::{Category, Difficulty, ModuleDifficulty, Question};

pub const MIN_SCALED: u32 = 200;
pub const MAX_SCALED: u32 = 800;

/// Picks the stage-two difficulty from the stage-one fraction correct.
pub fn select_branch(raw_score: u32, question_count: u32, config: &ExamConfig) -> ModuleDifficulty {
    if question_count == 0 {
        return ModuleDifficulty::Balanced;
    }
    let fraction = raw_score as f64 / question_count as f64;
    if fraction >= config.hard_branch_threshold {
        ModuleDifficulty::Hard
    } else if fraction >= config.balanced_branch_threshold {
        ModuleDifficulty::Balanced
    } else {
        ModuleDifficulty::Easy
    }
}

/// Linear 200-800 scale rounded to the nearest 10.
pub fn scaled_score(raw_score: u32, total_questions: u32) -> u32 {
    if raw_score == 0 || total_questions == 0 {
        return MIN_SCALED;
    }
    let fraction = raw_score as f64 / total_questions as f64;
    let scaled = ((fraction * 600.0 + 200.0) / 10.0).round() * 10.0;
    (scaled as u32).clamp(MIN_SCALED, MAX_SCALED)
}

#[derive(Debug, Clone, Default)]
pub struct ModuleDraft {
    pub question_ids: Vec<String>,
    /// Questions missing from the requested size after every fallback.
    pub shortfall: usize,
    /// Questions taken from outside their category/difficulty cell.
    pub backfilled: usize,
}

/// Drafts one module from a section's question pool.
///
/// Each category gets `floor(size * weight / 100)` questions, split across
/// difficulties by `mix` (floored). Short cells are filled first from the rest
/// of the category, then from anything unused in the section. Questions in
/// `exclude` are never drawn. The result is shuffled and capped at `size`.
pub fn draft_module<R: Rng + ?Sized>(
    pool: &[Question],
    categories: &[&Category],
    mix: &DifficultyMix,
    size: usize,
    exclude: &HashSet<String>,
    rng: &mut R,
) -> ModuleDraft {
    let available: Vec<&Question> = pool.iter().filter(|q| !exclude.contains(&q.id)).collect();

    let mut cells: HashMap<(&str, Difficulty), Vec<&Question>> = HashMap::new();
    for &question in &available {
        cells
            .entry((question.category_id.as_str(), question.difficulty))
            .or_default()
            .push(question);
    }

    let mut chosen: Vec<&Question> = Vec::with_capacity(size);
    let mut chosen_ids: HashSet<&str> = HashSet::new();
    let mut backfilled = 0;

    for category in categories {
        let target = (size as f64 * category.weight_in_section / 100.0).floor() as usize;
        if target == 0 {
            continue;
        }

        let before = chosen.len();
        for difficulty in Difficulty::ALL {
            let wanted = (target as f64 * mix.share(difficulty)).floor() as usize;
            let Some(cell) = cells.get(&(category.id.as_str(), difficulty)) else {
                continue;
            };
            for &question in cell.choose_multiple(rng, wanted.min(cell.len())) {
                chosen_ids.insert(question.id.as_str());
                chosen.push(question);
            }
        }

        let missing = target.saturating_sub(chosen.len() - before);
        if missing > 0 {
            let rest: Vec<&Question> = available
                .iter()
                .filter(|q| q.category_id == category.id && !chosen_ids.contains(q.id.as_str()))
                .copied()
                .collect();
            for &question in rest.choose_multiple(rng, missing.min(rest.len())) {
                chosen_ids.insert(question.id.as_str());
                chosen.push(question);
                backfilled += 1;
            }
        }
    }

    backfilled += backfill(&available, &mut chosen, &chosen_ids, size, rng);
    finish(chosen, size, backfilled, rng)
}

/// Drafts `size` questions by difficulty alone, ignoring categories.
///
/// Each level gets `floor(size * share)`; the rounding gap and short levels
/// are filled from any other unused question in `pool`.
pub fn draft_by_difficulty<R: Rng + ?Sized>(
    pool: &[Question],
    mix: &DifficultyMix,
    size: usize,
    exclude: &HashSet<String>,
    rng: &mut R,
) -> ModuleDraft {
    let available: Vec<&Question> = pool.iter().filter(|q| !exclude.contains(&q.id)).collect();
    let mut chosen: Vec<&Question> = Vec::with_capacity(size);
    let mut chosen_ids: HashSet<&str> = HashSet::new();

    for difficulty in Difficulty::ALL {
        let wanted = (size as f64 * mix.share(difficulty)).floor() as usize;
        let level: Vec<&Question> = available
            .iter()
            .filter(|q| q.difficulty == difficulty)
            .copied()
            .collect();
        for &question in level.choose_multiple(rng, wanted.min(level.len())) {
            chosen_ids.insert(question.id.as_str());
            chosen.push(question);
        }
    }

    let backfilled = backfill(&available, &mut chosen, &chosen_ids, size, rng);
    finish(chosen, size, backfilled, rng)
}

/// Tops `chosen` up to `size` from unpicked questions; returns how many were added.
fn backfill<'a, R: Rng + ?Sized>(
    available: &[&'a Question],
    chosen: &mut Vec<&'a Question>,
    chosen_ids: &HashSet<&str>,
    size: usize,
    rng: &mut R,
) -> usize {
    if chosen.len() >= size {
        return 0;
    }
    let rest: Vec<&Question> = available
        .iter()
        .filter(|q| !chosen_ids.contains(q.id.as_str()))
        .copied()
        .collect();
    let missing = size - chosen.len();
    let before = chosen.len();
    chosen.extend(rest.choose_multiple(rng, missing.min(rest.len())).copied());
    chosen.len() - before
}

fn finish<R: Rng + ?Sized>(mut chosen: Vec<&Question>, size: usize, backfilled: usize, rng: &mut R) -> ModuleDraft {
    chosen.shuffle(rng);
    chosen.truncate(size);
    ModuleDraft {
        shortfall: size - chosen.len(),
        question_ids: chosen.into_iter().map(|q| q.id.clone()).collect(),
        backfilled,
    }
}
