//! Study plans: rolling batches of packed, dated practice sessions.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::algo::answer;
use crate::algo::packing::{pack_sessions, schedule_dates, PackedSession};
use crate::clock::Clock;
use crate::config::PackingConfig;
use crate::db::{MasteryStore, PlanStore, QuestionRepository};
use crate::error::{EngineError, EngineResult};
use crate::services::mastery::{MasteryService, MasteryUpdate};
use crate::services::scheduler::SchedulerService;
use crate::types::{
    AnswerEvent, Difficulty, PracticeSession, Question, QuestionStatus, ScoreTargets,
    SessionQuestion, SessionStatus, StudyPlan,
};

/// Longest span one batch may schedule.
pub const MAX_BATCH_DAYS: u32 = 366;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlanInput {
    /// Defaults to today.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    pub test_date: NaiveDate,
    #[serde(default)]
    pub scores: ScoreTargets,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub plan: StudyPlan,
    pub sessions_created: usize,
    pub focus_skill_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnswerOutcome {
    pub is_correct: bool,
    pub correct_answer: Vec<String>,
    pub mastery: MasteryUpdate,
}

pub struct PlanService<S, Q> {
    store: Arc<S>,
    questions: Arc<Q>,
    mastery: Arc<MasteryService<S>>,
    scheduler: Arc<SchedulerService<S>>,
    clock: Arc<dyn Clock>,
    config: PackingConfig,
    rng: Mutex<StdRng>,
}

impl<S, Q> PlanService<S, Q>
where
    S: MasteryStore + PlanStore,
    Q: QuestionRepository,
{
    pub fn new(
        store: Arc<S>,
        questions: Arc<Q>,
        mastery: Arc<MasteryService<S>>,
        scheduler: Arc<SchedulerService<S>>,
        clock: Arc<dyn Clock>,
        config: PackingConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            questions,
            mastery,
            scheduler,
            clock,
            config,
            rng: Mutex::new(rng),
        }
    }

    async fn load_owned(&self, plan_id: &str, learner_id: &str) -> EngineResult<StudyPlan> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| EngineError::not_found("study plan", plan_id))?;
        plan.ensure_owner(learner_id)?;
        Ok(plan)
    }

    /// Creates a plan with its first batch and deactivates the learner's other plans.
    pub async fn generate_plan(&self, learner_id: &str, input: StudyPlanInput) -> EngineResult<StudyPlan> {
        let now = self.clock.now();
        let start_date = input.start_date.unwrap_or_else(|| now.date_naive());
        if input.test_date <= start_date {
            return Err(EngineError::validation(format!(
                "test date {} must be after start date {start_date}",
                input.test_date
            )));
        }

        let mut plan = StudyPlan {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            start_date,
            test_date: input.test_date,
            scores: input.scores,
            is_active: true,
            sessions: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let days = (plan.total_days() as u32)
            .min(self.config.batch_days)
            .min(MAX_BATCH_DAYS);
        let (sessions, focus) = self.build_batch(&plan, learner_id, days).await?;
        plan.sessions = sessions;

        let plan = self.store.replace_active_plan(plan).await?;
        tracing::info!(
            learner_id = %learner_id,
            plan_id = %plan.id,
            total_days = plan.total_days(),
            sessions = plan.sessions.len(),
            focus = focus.len(),
            "study plan created"
        );
        Ok(plan)
    }

    /// Appends the next `days` worth of sessions after the last scheduled one.
    pub async fn generate_next_batch(
        &self,
        plan_id: &str,
        learner_id: &str,
        days: u32,
    ) -> EngineResult<BatchOutcome> {
        if days == 0 || days > MAX_BATCH_DAYS {
            return Err(EngineError::validation(format!(
                "batch must cover 1-{MAX_BATCH_DAYS} days, got {days}"
            )));
        }
        let mut plan = self.load_owned(plan_id, learner_id).await?;
        let expected = plan.version;

        let (sessions, focus) = self.build_batch(&plan, learner_id, days).await?;
        let created = sessions.len();
        plan.sessions.extend(sessions);
        plan.updated_at = self.clock.now();

        let plan = self.store.save_plan(plan, expected).await?;
        tracing::info!(
            plan_id = %plan.id,
            sessions_created = created,
            days,
            "generated next batch"
        );
        Ok(BatchOutcome {
            plan,
            sessions_created: created,
            focus_skill_ids: focus,
        })
    }

    async fn build_batch(
        &self,
        plan: &StudyPlan,
        learner_id: &str,
        days: u32,
    ) -> EngineResult<(Vec<PracticeSession>, Vec<String>)> {
        let focus = self
            .scheduler
            .focus_skills(learner_id, self.config.focus_skill_count)
            .await?;
        if focus.is_empty() {
            tracing::warn!(plan_id = %plan.id, "catalog has no skills, batch is empty");
            return Ok((Vec::new(), Vec::new()));
        }

        let demands = self
            .scheduler
            .allocate(&focus, self.config.max_per_session.saturating_mul(days));
        let packed = pack_sessions(&demands, self.config.max_per_session, Some(days as usize));
        let anchor = plan.last_scheduled_date().unwrap_or(plan.start_date);
        let dates = schedule_dates(packed.len(), anchor, days);

        let mut used: HashSet<String> = plan
            .sessions
            .iter()
            .flat_map(|s| s.questions.iter().map(|q| q.question_id.clone()))
            .collect();

        let mut sessions = Vec::with_capacity(packed.len());
        for (packed_session, date) in packed.iter().zip(dates) {
            let questions = self.fill_session(packed_session, &mut used).await?;
            if questions.is_empty() {
                tracing::warn!(plan_id = %plan.id, %date, "no questions available, session skipped");
                continue;
            }
            sessions.push(PracticeSession {
                id: Uuid::new_v4().to_string(),
                session_number: (plan.sessions.len() + sessions.len() + 1) as u32,
                section: packed_session.section,
                scheduled_date: date,
                status: SessionStatus::Pending,
                questions,
                started_at: None,
                completed_at: None,
            });
        }

        Ok((sessions, focus.into_iter().map(|f| f.skill_id).collect()))
    }

    async fn fill_session(
        &self,
        packed: &PackedSession,
        used: &mut HashSet<String>,
    ) -> EngineResult<Vec<SessionQuestion>> {
        let mut slots = Vec::with_capacity(packed.total() as usize);
        for slot in &packed.slots {
            let pool = self.questions.find_by_skill(&slot.skill_id).await?;
            let picked = {
                let mut rng = self.rng.lock();
                pick_questions(&pool, slot.count as usize, used, &mut *rng)
            };
            if picked.len() < slot.count as usize {
                tracing::warn!(
                    skill_id = %slot.skill_id,
                    wanted = slot.count,
                    available = picked.len(),
                    "question shortfall for skill"
                );
            }
            for question in picked {
                used.insert(question.id.clone());
                slots.push(SessionQuestion {
                    id: Uuid::new_v4().to_string(),
                    skill_id: slot.skill_id.clone(),
                    question_id: question.id.clone(),
                    display_order: slots.len() as u32 + 1,
                    status: QuestionStatus::NotStarted,
                    user_answer: None,
                    is_correct: None,
                    answered_at: None,
                });
            }
        }
        Ok(slots)
    }

    pub async fn get_plan(&self, plan_id: &str, learner_id: &str) -> EngineResult<StudyPlan> {
        self.load_owned(plan_id, learner_id).await
    }

    pub async fn active_plan(&self, learner_id: &str) -> EngineResult<Option<StudyPlan>> {
        Ok(self
            .store
            .list_plans(learner_id)
            .await?
            .into_iter()
            .find(|p| p.is_active))
    }

    pub async fn start_session(
        &self,
        plan_id: &str,
        session_id: &str,
        learner_id: &str,
    ) -> EngineResult<PracticeSession> {
        let mut plan = self.load_owned(plan_id, learner_id).await?;
        let expected = plan.version;
        let now = self.clock.now();

        let session = plan.session_mut(session_id)?;
        session.status.transition_to(SessionStatus::InProgress)?;
        session.started_at = Some(now);
        let started = session.clone();
        plan.updated_at = now;

        self.store.save_plan(plan, expected).await?;
        tracing::debug!(plan_id = %plan_id, session_id = %session_id, "session started");
        Ok(started)
    }

    /// Grades one slot, records the answer on the plan and feeds the outcome to mastery.
    pub async fn submit_session_answer(
        &self,
        plan_id: &str,
        session_id: &str,
        session_question_id: &str,
        learner_id: &str,
        user_answer: Vec<String>,
    ) -> EngineResult<SessionAnswerOutcome> {
        let mut plan = self.load_owned(plan_id, learner_id).await?;
        let expected = plan.version;
        let now = self.clock.now();

        let session = plan.session_mut(session_id)?;
        if session.status != SessionStatus::InProgress {
            return Err(EngineError::validation(format!(
                "session {session_id} is {}, not in progress",
                session.status.as_str()
            )));
        }
        let slot = session
            .questions
            .iter_mut()
            .find(|q| q.id == session_question_id)
            .ok_or_else(|| EngineError::not_found("session question", session_question_id))?;
        if slot.status == QuestionStatus::Answered {
            return Err(EngineError::validation(format!(
                "session question {session_question_id} already answered"
            )));
        }

        let question = self
            .questions
            .get(&slot.question_id)
            .await?
            .ok_or_else(|| EngineError::not_found("question", slot.question_id.clone()))?;
        let is_correct = answer::is_correct(
            &user_answer,
            &question.correct_answer,
            &question.acceptable_answers,
        );

        slot.status = QuestionStatus::Answered;
        slot.user_answer = Some(user_answer);
        slot.is_correct = Some(is_correct);
        slot.answered_at = Some(now);
        let skill_id = slot.skill_id.clone();
        plan.updated_at = now;

        let saved = self.store.save_plan(plan, expected).await?;
        let mastery = match self
            .mastery
            .update(AnswerEvent::new(learner_id, skill_id, is_correct))
            .await
        {
            Ok(update) => update,
            Err(err) => {
                self.reopen_slot(saved, session_id, session_question_id).await;
                return Err(err);
            }
        };

        Ok(SessionAnswerOutcome {
            is_correct,
            correct_answer: question.correct_answer,
            mastery,
        })
    }

    /// Clears a slot's answer after its mastery update failed, so the caller
    /// can resubmit.
    async fn reopen_slot(&self, mut plan: StudyPlan, session_id: &str, session_question_id: &str) {
        let expected = plan.version;
        let Ok(session) = plan.session_mut(session_id) else {
            return;
        };
        if let Some(slot) = session.questions.iter_mut().find(|q| q.id == session_question_id) {
            slot.status = QuestionStatus::NotStarted;
            slot.user_answer = None;
            slot.is_correct = None;
            slot.answered_at = None;
        }
        if let Err(err) = self.store.save_plan(plan, expected).await {
            tracing::error!(
                session_id = %session_id,
                session_question_id = %session_question_id,
                error = %err,
                "failed to reopen session question after mastery error"
            );
        }
    }

    pub async fn complete_session(
        &self,
        plan_id: &str,
        session_id: &str,
        learner_id: &str,
    ) -> EngineResult<PracticeSession> {
        let mut plan = self.load_owned(plan_id, learner_id).await?;
        let expected = plan.version;
        let now = self.clock.now();

        let session = plan.session_mut(session_id)?;
        session.status.transition_to(SessionStatus::Completed)?;
        session.completed_at = Some(now);
        let completed = session.clone();
        plan.updated_at = now;

        self.store.save_plan(plan, expected).await?;
        tracing::info!(
            plan_id = %plan_id,
            session_id = %session_id,
            answered = completed.answered_count(),
            total = completed.questions.len(),
            "session completed"
        );
        Ok(completed)
    }
}

/// Draws `count` questions for one skill: balanced thirds E/M/H with the
/// remainder going to the easier levels, then any unused question of the
/// skill, then already-used ones once fresh supply runs out.
fn pick_questions<'a, R: rand::Rng + ?Sized>(
    pool: &'a [Question],
    count: usize,
    used: &HashSet<String>,
    rng: &mut R,
) -> Vec<&'a Question> {
    let per_level = count / 3;
    let remainder = count % 3;
    let mut picked: Vec<&Question> = Vec::with_capacity(count);
    let mut taken: HashSet<&str> = HashSet::new();

    for (idx, difficulty) in Difficulty::ALL.into_iter().enumerate() {
        let wanted = per_level + usize::from(idx < remainder);
        let fresh: Vec<&Question> = pool
            .iter()
            .filter(|q| q.difficulty == difficulty && !used.contains(&q.id))
            .collect();
        for &question in fresh.choose_multiple(rng, wanted.min(fresh.len())) {
            taken.insert(question.id.as_str());
            picked.push(question);
        }
    }

    for allow_used in [false, true] {
        if picked.len() >= count {
            break;
        }
        let rest: Vec<&Question> = pool
            .iter()
            .filter(|q| !taken.contains(q.id.as_str()) && (allow_used || !used.contains(&q.id)))
            .collect();
        let missing = count - picked.len();
        for &question in rest.choose_multiple(rng, missing.min(rest.len())) {
            taken.insert(question.id.as_str());
            picked.push(question);
        }
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Section;
    use rand::SeedableRng;

    fn question(id: &str, difficulty: Difficulty) -> Question {
        Question {
            id: id.to_string(),
            skill_id: "s".into(),
            category_id: "c".into(),
            section: Section::Math,
            difficulty,
            correct_answer: vec!["A".into()],
            acceptable_answers: Vec::new(),
        }
    }

    fn pool() -> Vec<Question> {
        let mut pool = Vec::new();
        for difficulty in Difficulty::ALL {
            for n in 0..4 {
                pool.push(question(&format!("{}{n}", difficulty.as_str()), difficulty));
            }
        }
        pool
    }

    #[test]
    fn picks_balanced_thirds_with_easier_remainder() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(1);
        let picked = pick_questions(&pool, 8, &HashSet::new(), &mut rng);
        let count = |d| picked.iter().filter(|q| q.difficulty == d).count();
        assert_eq!(count(Difficulty::Easy), 3);
        assert_eq!(count(Difficulty::Medium), 3);
        assert_eq!(count(Difficulty::Hard), 2);
    }

    #[test]
    fn prefers_fresh_questions_then_reuses() {
        let pool = pool();
        let used: HashSet<String> = pool.iter().take(10).map(|q| q.id.clone()).collect();
        let mut rng = StdRng::seed_from_u64(2);

        let picked = pick_questions(&pool, 2, &used, &mut rng);
        assert_eq!(picked.len(), 2);
        assert!(picked.iter().all(|q| !used.contains(&q.id)));

        let picked = pick_questions(&pool, 12, &used, &mut rng);
        assert_eq!(picked.len(), 12);
        let unique: HashSet<&str> = picked.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn empty_pool_contributes_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(pick_questions(&[], 5, &HashSet::new(), &mut rng).is_empty());
    }
}
