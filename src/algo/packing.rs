//! Session packing.
//!
//! Turns per-skill question demand into capped, single-section practice
//! sessions. Each skill is spread across every session of its section so
//! practice is spaced over days instead of massed into one sitting.

use chrono::{Duration, NaiveDate};

use crate::algo::priority::SkillDemand;
use crate::types::Section;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillSlot {
    pub skill_id: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedSession {
    pub section: Section,
    pub slots: Vec<SkillSlot>,
}

impl PackedSession {
    pub fn total(&self) -> u32 {
        self.slots.iter().map(|s| s.count).sum()
    }

    pub fn count_for(&self, skill_id: &str) -> u32 {
        self.slots
            .iter()
            .filter(|s| s.skill_id == skill_id)
            .map(|s| s.count)
            .sum()
    }
}

/// Spreads every skill evenly over `num_sessions`; each skill's `count % n`
/// extra questions go to the leading sessions, or with `rotate` start where
/// the previous skill's extras stopped.
fn spread(
    demands: &[(String, u32)],
    section: Section,
    num_sessions: usize,
    rotate: bool,
) -> Vec<PackedSession> {
    let mut sessions: Vec<PackedSession> = (0..num_sessions)
        .map(|_| PackedSession {
            section,
            slots: Vec::new(),
        })
        .collect();

    let mut cursor = 0usize;
    for (skill_id, count) in demands {
        let base = count / num_sessions as u32;
        let remainder = (count % num_sessions as u32) as usize;
        for (idx, session) in sessions.iter_mut().enumerate() {
            let offset = (idx + num_sessions - cursor) % num_sessions;
            let share = base + u32::from(offset < remainder);
            if share > 0 {
                session.slots.push(SkillSlot {
                    skill_id: skill_id.clone(),
                    count: share,
                });
            }
        }
        if rotate {
            cursor = (cursor + remainder) % num_sessions;
        }
    }

    sessions
}

/// Packs one section's demand.
///
/// Grows the session count until no session exceeds `max_per_session`, drops
/// empty sessions, then, if `target_sessions` is set and exceeded, folds every
/// session from `target - 1` onward into a single final session. Folding sums
/// per-skill counts and never drops a question, so the folded session may run
/// over the cap.
///
/// Many small skills can pile their extras onto the leading session past any
/// session count. Then the extras are rotated instead, which keeps session
/// loads within one question of each other.
pub fn pack_section(
    demands: &[(String, u32)],
    section: Section,
    max_per_session: u32,
    target_sessions: Option<usize>,
) -> Vec<PackedSession> {
    let max_per_session = max_per_session.max(1);
    let demands: Vec<(String, u32)> = demands
        .iter()
        .filter(|(_, count)| *count > 0)
        .cloned()
        .collect();
    let total: u32 = demands.iter().map(|(_, count)| count).sum();
    if total == 0 {
        return Vec::new();
    }

    let initial = total.div_ceil(max_per_session).max(1) as usize;
    let mut num_sessions = initial;
    let mut sessions = spread(&demands, section, num_sessions, false);

    // More sessions than questions cannot lower the per-session load further.
    while sessions.iter().any(|s| s.total() > max_per_session) && num_sessions < total as usize {
        num_sessions += 1;
        sessions = spread(&demands, section, num_sessions, false);
    }
    if sessions.iter().any(|s| s.total() > max_per_session) {
        tracing::debug!(
            section = section.as_str(),
            skills = demands.len(),
            max_per_session,
            "leading sessions overloaded, rotating extras"
        );
        sessions = spread(&demands, section, initial, true);
    }

    sessions.retain(|s| !s.slots.is_empty());

    match target_sessions {
        Some(target) if target > 0 && sessions.len() > target => {
            tracing::debug!(
                section = section.as_str(),
                from = sessions.len(),
                to = target,
                "merging overflow sessions"
            );
            let merged = merge_tail(sessions, target);
            if let Some(last) = merged.last().filter(|s| s.total() > max_per_session) {
                tracing::warn!(
                    section = section.as_str(),
                    questions = last.total(),
                    max_per_session,
                    "merged session runs over the cap"
                );
            }
            merged
        }
        _ => sessions,
    }
}

fn merge_tail(mut sessions: Vec<PackedSession>, target: usize) -> Vec<PackedSession> {
    let overflow = sessions.split_off(target - 1);
    let section = overflow[0].section;
    let mut last = PackedSession {
        section,
        slots: Vec::new(),
    };

    for session in overflow {
        for slot in session.slots {
            match last.slots.iter_mut().find(|s| s.skill_id == slot.skill_id) {
                Some(existing) => existing.count += slot.count,
                None => last.slots.push(slot),
            }
        }
    }

    sessions.push(last);
    sessions
}

/// Splits a plan-level session target across sections by question volume.
///
/// Each non-empty section keeps at least one session; rounding overshoot is
/// taken from the larger side first.
pub fn split_target(math_questions: u32, rw_questions: u32, target: usize) -> (usize, usize) {
    let total = math_questions + rw_questions;
    if total == 0 || target == 0 {
        return (0, 0);
    }

    let share = |questions: u32| -> usize {
        if questions == 0 {
            0
        } else {
            ((target as f64 * questions as f64 / total as f64) as usize).max(1)
        }
    };

    let mut math = share(math_questions);
    let mut rw = share(rw_questions);
    while math + rw > target {
        if math > rw && math > 1 {
            math -= 1;
        } else if rw > 1 {
            rw -= 1;
        } else {
            break;
        }
    }
    (math, rw)
}

/// Round-robin merge that starts with the longer list (`first` on ties).
pub fn interleave<T>(first: Vec<T>, second: Vec<T>) -> Vec<T> {
    let (lead, follow) = if first.len() >= second.len() {
        (first, second)
    } else {
        (second, first)
    };

    let mut out = Vec::with_capacity(lead.len() + follow.len());
    let mut follow = follow.into_iter();
    for item in lead {
        out.push(item);
        if let Some(next) = follow.next() {
            out.push(next);
        }
    }
    out.extend(follow);
    out
}

/// Packs a whole batch: pure sessions per section, interleaved math-first on ties.
pub fn pack_sessions(
    demands: &[SkillDemand],
    max_per_session: u32,
    target_sessions: Option<usize>,
) -> Vec<PackedSession> {
    let by_section = |section: Section| -> Vec<(String, u32)> {
        demands
            .iter()
            .filter(|d| d.section == section && d.count > 0)
            .map(|d| (d.skill_id.clone(), d.count))
            .collect()
    };
    let math = by_section(Section::Math);
    let rw = by_section(Section::ReadingWriting);

    let (math_target, rw_target) = match target_sessions {
        Some(target) => {
            let math_total = math.iter().map(|(_, c)| c).sum();
            let rw_total = rw.iter().map(|(_, c)| c).sum();
            let (m, r) = split_target(math_total, rw_total, target);
            (Some(m), Some(r))
        }
        None => (None, None),
    };

    let math_sessions = pack_section(&math, Section::Math, max_per_session, math_target);
    let rw_sessions = pack_section(&rw, Section::ReadingWriting, max_per_session, rw_target);
    tracing::debug!(
        math = math_sessions.len(),
        reading_writing = rw_sessions.len(),
        "packed sessions"
    );

    interleave(math_sessions, rw_sessions)
}

/// Calendar dates for `count` sessions spread evenly over `total_days`,
/// starting the day after `anchor`.
pub fn schedule_dates(count: usize, anchor: NaiveDate, total_days: u32) -> Vec<NaiveDate> {
    let total_days = total_days.max(1) as usize;
    (0..count)
        .map(|i| {
            let day_index = i * total_days / count + 1;
            anchor + Duration::days(day_index as i64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn demand(id: &str, count: u32) -> (String, u32) {
        (id.to_string(), count)
    }

    #[test]
    fn forty_seven_and_three_pack_into_three_sessions() {
        let sessions = pack_section(
            &[demand("a", 47), demand("b", 3)],
            Section::Math,
            25,
            None,
        );

        assert_eq!(sessions.len(), 3);
        let a: Vec<u32> = sessions.iter().map(|s| s.count_for("a")).collect();
        let b: Vec<u32> = sessions.iter().map(|s| s.count_for("b")).collect();
        assert_eq!(a, vec![16, 16, 15]);
        assert_eq!(b, vec![1, 1, 1]);
        assert!(sessions.iter().all(|s| s.total() <= 25));
    }

    #[test]
    fn small_skill_lands_only_in_leading_sessions() {
        let sessions = pack_section(&[demand("a", 60), demand("b", 2)], Section::Math, 25, None);
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[2].count_for("b"), 0);
        assert_eq!(sessions.iter().map(|s| s.count_for("b")).sum::<u32>(), 2);
    }

    #[test]
    fn target_merges_overflow_without_losing_questions() {
        let sessions = pack_section(&[demand("a", 100), demand("b", 20)], Section::Math, 25, Some(2));
        assert_eq!(sessions.len(), 2);
        let total: u32 = sessions.iter().map(PackedSession::total).sum();
        assert_eq!(total, 120);
        assert_eq!(sessions.iter().map(|s| s.count_for("a")).sum::<u32>(), 100);
        assert_eq!(sessions[1].slots.len(), 2);
    }

    #[test]
    fn folded_session_carries_overflow_past_cap() {
        // Five sessions of 24 fold into 24 + 96.
        let sessions = pack_section(&[demand("a", 100), demand("b", 20)], Section::Math, 25, Some(2));
        assert_eq!(sessions[0].total(), 24);
        assert_eq!(sessions[1].total(), 96);
        assert_eq!(sessions[1].count_for("a"), 80);
        assert_eq!(sessions[1].count_for("b"), 16);
    }

    #[test]
    fn many_single_question_skills_stay_under_cap() {
        let demands: Vec<(String, u32)> = (0..60).map(|i| demand(&format!("s{i}"), 1)).collect();
        let sessions = pack_section(&demands, Section::ReadingWriting, 25, None);

        assert_eq!(sessions.len(), 3);
        assert!(sessions.iter().all(|s| s.total() == 20));
        for (idx, _) in demands.iter().enumerate() {
            let id = format!("s{idx}");
            assert_eq!(sessions.iter().map(|s| s.count_for(&id)).sum::<u32>(), 1);
        }

        let mixed = [demand("big", 30), demand("x", 1), demand("y", 1)]
            .into_iter()
            .chain((0..26).map(|i| demand(&format!("t{i}"), 1)))
            .collect::<Vec<_>>();
        let sessions = pack_section(&mixed, Section::Math, 25, None);
        let total: u32 = sessions.iter().map(PackedSession::total).sum();
        assert_eq!(total, 58);
        assert!(sessions.iter().all(|s| s.total() <= 25));
    }

    #[test]
    fn target_of_one_collapses_everything() {
        let sessions = pack_section(&[demand("a", 40)], Section::ReadingWriting, 25, Some(1));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].total(), 40);
    }

    #[test]
    fn empty_demand_yields_no_sessions() {
        assert!(pack_section(&[demand("a", 0)], Section::Math, 25, None).is_empty());
        assert!(pack_sessions(&[], 25, Some(14)).is_empty());
    }

    #[test]
    fn interleave_starts_with_longer_list() {
        assert_eq!(interleave(vec![1, 3], vec![2, 4, 6, 8]), vec![2, 1, 4, 3, 6, 8]);
        assert_eq!(interleave(vec![1, 3], vec![2, 4]), vec![1, 2, 3, 4]);
        assert_eq!(interleave(Vec::<i32>::new(), vec![5]), vec![5]);
    }

    #[test]
    fn target_split_follows_volume() {
        assert_eq!(split_target(250, 100, 14), (10, 4));
        assert_eq!(split_target(349, 1, 14), (13, 1));
        assert_eq!(split_target(0, 80, 14), (0, 14));
        // Both sections keep their floor of one even past the target.
        assert_eq!(split_target(10, 10, 1), (1, 1));
    }

    #[test]
    fn dates_spread_from_day_after_anchor() {
        let anchor = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let dates = schedule_dates(7, anchor, 14);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2026, 5, 2).unwrap());
        assert_eq!(dates[1], NaiveDate::from_ymd_opt(2026, 5, 4).unwrap());
        assert_eq!(dates[6], NaiveDate::from_ymd_opt(2026, 5, 14).unwrap());

        let crowded = schedule_dates(4, anchor, 2);
        assert_eq!(crowded[0], crowded[1]);
        assert_eq!(crowded[3], NaiveDate::from_ymd_opt(2026, 5, 3).unwrap());
    }

    fn arb_demands() -> impl Strategy<Value = Vec<SkillDemand>> {
        prop::collection::vec((any::<bool>(), 0u32..120), 1..10).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (math, count))| SkillDemand {
                    skill_id: format!("skill-{i}"),
                    section: if math { Section::Math } else { Section::ReadingWriting },
                    count,
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn packing_conserves_questions(demands in arb_demands(), target in proptest::option::of(1usize..20)) {
            let sessions = pack_sessions(&demands, 25, target);
            let mut packed: HashMap<String, u32> = HashMap::new();
            for session in &sessions {
                for slot in &session.slots {
                    *packed.entry(slot.skill_id.clone()).or_default() += slot.count;
                }
            }
            for d in demands.iter().filter(|d| d.count > 0) {
                prop_assert_eq!(packed.get(&d.skill_id).copied().unwrap_or(0), d.count);
            }
        }

        #[test]
        fn targeted_section_folds_only_the_tail(
            counts in prop::collection::vec(0u32..120, 1..40),
            target in 1usize..8,
        ) {
            let demands: Vec<(String, u32)> = counts
                .iter()
                .enumerate()
                .map(|(i, &count)| (format!("skill-{i}"), count))
                .collect();
            let total: u32 = counts.iter().sum();
            let free = pack_section(&demands, Section::Math, 25, None);
            let sessions = pack_section(&demands, Section::Math, 25, Some(target));

            prop_assert_eq!(sessions.iter().map(PackedSession::total).sum::<u32>(), total);
            prop_assert!(sessions.len() <= target);
            prop_assert!(sessions.iter().all(|s| s.section == Section::Math && s.total() > 0));
            if free.len() > target {
                prop_assert_eq!(sessions.len(), target);
                let (last, kept) = sessions.split_last().unwrap();
                prop_assert_eq!(kept, &free[..target - 1]);
                prop_assert!(kept.iter().all(|s| s.total() <= 25));
                let kept_total: u32 = kept.iter().map(PackedSession::total).sum();
                prop_assert_eq!(last.total(), total - kept_total);
            } else {
                prop_assert_eq!(&sessions, &free);
            }
        }

        #[test]
        fn sessions_are_pure_and_capped(demands in arb_demands()) {
            let sections: HashMap<String, Section> = demands
                .iter()
                .map(|d| (d.skill_id.clone(), d.section))
                .collect();
            for session in pack_sessions(&demands, 25, None) {
                prop_assert!(session.total() <= 25);
                prop_assert!(session.total() > 0);
                for slot in &session.slots {
                    prop_assert_eq!(sections[&slot.skill_id], session.section);
                }
            }
        }
    }
}
