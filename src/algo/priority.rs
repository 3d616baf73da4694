//! Skill prioritization.
//!
//! Two modes share the mastery gap (1 - mastery) as the urgency signal:
//! - recommendation: gap × skill weight × forgetting factor, for "what next"
//! - batch allocation: category weight × gap, for multi-day planning where
//!   recency is deliberately ignored

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{Catalog, FocusSkill, Section, TopicPriority};

/// Mastery assumed for skills without a record.
pub const DEFAULT_MASTERY: f64 = 0.25;

/// `ln(d + 1) + 1`: 1.0 when practiced today, ~3.07 after a week.
pub fn forgetting_factor(days_since_study: i64) -> f64 {
    ((days_since_study.max(0) as f64) + 1.0).ln() + 1.0
}

pub fn mastery_gap(mastery: f64) -> f64 {
    1.0 - mastery
}

/// Input row for recommendation mode.
#[derive(Debug, Clone)]
pub struct SkillState {
    pub skill_id: String,
    pub mastery: f64,
    pub base_weight: f64,
    pub days_since_study: i64,
}

pub fn topic_priority(state: &SkillState) -> TopicPriority {
    let gap = mastery_gap(state.mastery);
    let forgetting = forgetting_factor(state.days_since_study);

    TopicPriority {
        skill_id: state.skill_id.clone(),
        priority_score: gap * state.base_weight * forgetting,
        mastery: state.mastery,
        mastery_gap: gap,
        base_weight: state.base_weight,
        forgetting_factor: forgetting,
        days_since_study: state.days_since_study,
    }
}

/// Highest priority first; ties go to lower mastery, then staler skills.
pub fn rank_topics(states: &[SkillState]) -> Vec<TopicPriority> {
    let mut priorities: Vec<TopicPriority> = states.iter().map(topic_priority).collect();
    priorities.sort_by(compare_topics);
    priorities
}

fn compare_topics(a: &TopicPriority, b: &TopicPriority) -> Ordering {
    b.priority_score
        .total_cmp(&a.priority_score)
        .then_with(|| a.mastery.total_cmp(&b.mastery))
        .then_with(|| b.days_since_study.cmp(&a.days_since_study))
        .then_with(|| a.skill_id.cmp(&b.skill_id))
}

/// Batch-mode focus set: top `limit` skills by category weight × gap, any section.
pub fn focus_skills(
    catalog: &Catalog,
    mastery: &HashMap<String, f64>,
    limit: usize,
) -> Vec<FocusSkill> {
    let mut ranked: Vec<FocusSkill> = catalog
        .skills()
        .iter()
        .filter_map(|skill| {
            let category = catalog.category(&skill.category_id)?;
            let weight = category.weight_in_section / 100.0;
            let current = mastery.get(&skill.id).copied().unwrap_or(DEFAULT_MASTERY);
            Some(FocusSkill {
                skill_id: skill.id.clone(),
                section: category.section,
                priority: weight * mastery_gap(current),
                mastery: current,
                weight,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.skill_id.cmp(&b.skill_id))
    });
    ranked.truncate(limit);
    ranked
}

/// One skill's share of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillDemand {
    pub skill_id: String,
    pub section: Section,
    pub count: u32,
}

/// Converts focus priorities into integer question counts summing to `total`.
///
/// Floors the proportional shares, then hands out the rounding remainder one
/// question at a time starting from the highest priority skill. Falls back to
/// an even split when every priority is zero. Output keeps the focus order and
/// omits skills left at zero.
pub fn allocate_questions(focus: &[FocusSkill], total: u32) -> Vec<SkillDemand> {
    if focus.is_empty() || total == 0 {
        return Vec::new();
    }

    let priority_sum: f64 = focus.iter().map(|f| f.priority.max(0.0)).sum();
    let mut counts: Vec<u32> = if priority_sum > 0.0 {
        focus
            .iter()
            .map(|f| (total as f64 * f.priority.max(0.0) / priority_sum).floor() as u32)
            .collect()
    } else {
        vec![total / focus.len() as u32; focus.len()]
    };

    let assigned: u32 = counts.iter().sum();
    let remainder = total.saturating_sub(assigned);
    for i in 0..remainder as usize {
        counts[i % focus.len()] += 1;
    }

    focus
        .iter()
        .zip(counts)
        .filter(|(_, count)| *count > 0)
        .map(|(f, count)| SkillDemand {
            skill_id: f.skill_id.clone(),
            section: f.section,
            count,
        })
        .collect()
}
