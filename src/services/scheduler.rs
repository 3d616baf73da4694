use std::collections::HashMap;
use std::sync::Arc;

use crate::algo::priority::{
    allocate_questions, focus_skills, rank_topics, SkillDemand, SkillState, DEFAULT_MASTERY,
};
use crate::clock::Clock;
use crate::db::MasteryStore;
use crate::error::EngineResult;
use crate::types::{Catalog, FocusSkill, MasteryRecord, Section, TopicPriority};

/// Read-only view over mastery that answers "what should this learner study".
pub struct SchedulerService<S> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
}

impl<S: MasteryStore> SchedulerService<S> {
    pub fn new(store: Arc<S>, catalog: Arc<Catalog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            catalog,
            clock,
        }
    }

    async fn skill_states(&self, learner_id: &str, section: Option<Section>) -> EngineResult<Vec<SkillState>> {
        let records: HashMap<String, MasteryRecord> = self
            .store
            .list_mastery(learner_id)
            .await?
            .into_iter()
            .map(|r| (r.skill_id.clone(), r))
            .collect();
        let now = self.clock.now();

        Ok(self
            .catalog
            .skills()
            .iter()
            .filter(|skill| section.map_or(true, |s| self.catalog.section_of(&skill.id) == Some(s)))
            .map(|skill| {
                let record = records.get(&skill.id);
                SkillState {
                    skill_id: skill.id.clone(),
                    mastery: record.map_or(DEFAULT_MASTERY, |r| r.mastery_probability),
                    base_weight: skill.weight_in_category,
                    days_since_study: record.map_or(0, |r| r.days_since_practiced(now)),
                }
            })
            .collect())
    }

    /// Ranked recommendations across the whole catalog.
    pub async fn recommend(&self, learner_id: &str, limit: usize) -> EngineResult<Vec<TopicPriority>> {
        let mut ranked = rank_topics(&self.skill_states(learner_id, None).await?);
        ranked.truncate(limit);
        Ok(ranked)
    }

    pub async fn recommend_in_section(
        &self,
        learner_id: &str,
        section: Section,
        limit: usize,
    ) -> EngineResult<Vec<TopicPriority>> {
        let mut ranked = rank_topics(&self.skill_states(learner_id, Some(section)).await?);
        ranked.truncate(limit);
        Ok(ranked)
    }

    pub async fn next_skill(&self, learner_id: &str) -> EngineResult<Option<TopicPriority>> {
        Ok(self.recommend(learner_id, 1).await?.into_iter().next())
    }

    /// Batch-mode focus set: category weight × gap, top `count`.
    pub async fn focus_skills(&self, learner_id: &str, count: usize) -> EngineResult<Vec<FocusSkill>> {
        let mastery: HashMap<String, f64> = self
            .store
            .list_mastery(learner_id)
            .await?
            .into_iter()
            .map(|r| (r.skill_id, r.mastery_probability))
            .collect();
        let focus = focus_skills(&self.catalog, &mastery, count);
        tracing::debug!(
            learner_id = %learner_id,
            focus = ?focus.iter().map(|f| f.skill_id.as_str()).collect::<Vec<_>>(),
            "selected focus skills"
        );
        Ok(focus)
    }

    pub fn allocate(&self, focus: &[FocusSkill], total_questions: u32) -> Vec<SkillDemand> {
        allocate_questions(focus, total_questions)
    }
}
