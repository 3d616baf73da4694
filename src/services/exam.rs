//! Adaptive two-stage mock exams.
//!
//! Stage one of each section is drafted at creation with the balanced mix.
//! Completing it drafts stage two at a difficulty picked from the stage-one
//! score. Completing the last module scales and totals the section scores.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::algo::answer;
use crate::algo::scoring::{draft_module, scaled_score, select_branch};
use crate::clock::Clock;
use crate::config::ExamConfig;
use crate::db::{ExamStore, QuestionRepository};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    Catalog, ExamModule, ExamQuestion, ExamScores, ExamStatus, MockExam, ModuleDifficulty,
    ModuleKind, ModuleStatus, Section,
};

pub struct ExamEngine<S, Q> {
    store: Arc<S>,
    questions: Arc<Q>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    config: ExamConfig,
    rng: Mutex<StdRng>,
}

impl<S, Q> ExamEngine<S, Q>
where
    S: ExamStore,
    Q: QuestionRepository,
{
    pub fn new(
        store: Arc<S>,
        questions: Arc<Q>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        config: ExamConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            questions,
            catalog,
            clock,
            config,
            rng: Mutex::new(rng),
        }
    }

    async fn load_owned(&self, exam_id: &str, learner_id: &str) -> EngineResult<MockExam> {
        let exam = self
            .store
            .get_exam(exam_id)
            .await?
            .ok_or_else(|| EngineError::not_found("mock exam", exam_id))?;
        exam.ensure_owner(learner_id)?;
        Ok(exam)
    }

    fn ensure_open(exam: &MockExam) -> EngineResult<()> {
        if exam.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                entity: "mock exam",
                from: exam.status.as_str(),
                to: ExamStatus::InProgress.as_str(),
            });
        }
        Ok(())
    }

    /// Fills `module` from its section's pool, skipping anything already in the exam.
    async fn generate(
        &self,
        module: &mut ExamModule,
        level: ModuleDifficulty,
        exclude: &HashSet<String>,
    ) -> EngineResult<()> {
        let section = module.kind.section();
        let pool = self.questions.find_by_section(section).await?;
        if pool.is_empty() {
            return Err(EngineError::InsufficientSupply { section });
        }

        let categories: Vec<_> = self.catalog.categories_in(section).collect();
        let mix = self.config.mix_for(level);
        let size = self.config.module_size as usize;
        let draft = {
            let mut rng = self.rng.lock();
            draft_module(&pool, &categories, &mix, size, exclude, &mut *rng)
        };

        if draft.shortfall > 0 || draft.backfilled > 0 {
            tracing::warn!(
                module = module.kind.as_str(),
                shortfall = draft.shortfall,
                backfilled = draft.backfilled,
                "module drafted with thin supply"
            );
        }

        module.difficulty = Some(level);
        module.questions = draft
            .question_ids
            .into_iter()
            .enumerate()
            .map(|(idx, question_id)| ExamQuestion {
                question_id,
                display_order: idx as u32 + 1,
                user_answer: None,
                is_correct: None,
                answered_at: None,
            })
            .collect();
        Ok(())
    }

    pub async fn create_exam(&self, learner_id: &str) -> EngineResult<MockExam> {
        let now = self.clock.now();
        let mut modules: Vec<ExamModule> = ModuleKind::ORDER
            .into_iter()
            .map(|kind| ExamModule {
                id: Uuid::new_v4().to_string(),
                kind,
                status: ModuleStatus::NotStarted,
                difficulty: None,
                questions: Vec::new(),
                raw_score: None,
                time_limit_minutes: self.config.time_limit_minutes,
                started_at: None,
                completed_at: None,
            })
            .collect();

        let mut used = HashSet::new();
        for module in modules.iter_mut().filter(|m| m.kind.number() == 1) {
            self.generate(module, ModuleDifficulty::Balanced, &used).await?;
            used.extend(module.questions.iter().map(|q| q.question_id.clone()));
        }

        let exam = MockExam {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            status: ExamStatus::NotStarted,
            modules,
            scores: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            version: 0,
        };
        let exam = self.store.insert_exam(exam).await?;
        tracing::info!(learner_id = %learner_id, exam_id = %exam.id, "mock exam created");
        Ok(exam)
    }

    pub async fn get_exam(&self, exam_id: &str, learner_id: &str) -> EngineResult<MockExam> {
        self.load_owned(exam_id, learner_id).await
    }

    pub async fn start_module(
        &self,
        exam_id: &str,
        learner_id: &str,
        kind: ModuleKind,
    ) -> EngineResult<MockExam> {
        let mut exam = self.load_owned(exam_id, learner_id).await?;
        Self::ensure_open(&exam)?;
        let expected = exam.version;
        let now = self.clock.now();

        let module = exam.module_mut(kind)?;
        if !module.is_generated() {
            return Err(EngineError::validation(format!(
                "{} has not been generated yet",
                kind.as_str()
            )));
        }
        module.status.transition_to(ModuleStatus::InProgress)?;
        module.started_at = Some(now);

        if exam.status == ExamStatus::NotStarted {
            exam.status = ExamStatus::InProgress;
            exam.started_at = Some(now);
        }

        let exam = self.store.save_exam(exam, expected).await?;
        tracing::debug!(exam_id = %exam_id, module = kind.as_str(), "module started");
        Ok(exam)
    }

    /// Grades and records one answer; answers may be changed until the module completes.
    pub async fn submit_answer(
        &self,
        exam_id: &str,
        learner_id: &str,
        kind: ModuleKind,
        question_id: &str,
        user_answer: Vec<String>,
    ) -> EngineResult<bool> {
        let mut exam = self.load_owned(exam_id, learner_id).await?;
        Self::ensure_open(&exam)?;
        let expected = exam.version;
        let now = self.clock.now();

        let module = exam.module_mut(kind)?;
        if module.status != ModuleStatus::InProgress {
            return Err(EngineError::validation(format!(
                "{} is {}, not in progress",
                kind.as_str(),
                module.status.as_str()
            )));
        }
        let slot = module
            .questions
            .iter_mut()
            .find(|q| q.question_id == question_id)
            .ok_or_else(|| EngineError::not_found("exam question", question_id))?;

        let question = self
            .questions
            .get(question_id)
            .await?
            .ok_or_else(|| EngineError::not_found("question", question_id))?;
        let is_correct = answer::is_correct(
            &user_answer,
            &question.correct_answer,
            &question.acceptable_answers,
        );

        slot.user_answer = Some(user_answer);
        slot.is_correct = Some(is_correct);
        slot.answered_at = Some(now);

        self.store.save_exam(exam, expected).await?;
        Ok(is_correct)
    }

    /// Scores the module, drafts its adaptive follow-up, and finalizes the
    /// exam when every module is done.
    pub async fn complete_module(
        &self,
        exam_id: &str,
        learner_id: &str,
        kind: ModuleKind,
    ) -> EngineResult<MockExam> {
        let mut exam = self.load_owned(exam_id, learner_id).await?;
        Self::ensure_open(&exam)?;
        let expected = exam.version;
        let now = self.clock.now();

        let module = exam.module_mut(kind)?;
        module.status.transition_to(ModuleStatus::Completed)?;
        let raw = module
            .questions
            .iter()
            .filter(|q| q.is_correct == Some(true))
            .count() as u32;
        let module_size = module.questions.len() as u32;
        module.raw_score = Some(raw);
        module.completed_at = Some(now);
        tracing::info!(
            exam_id = %exam_id,
            module = kind.as_str(),
            raw,
            out_of = module_size,
            "module completed"
        );

        if let Some(next) = kind.next_stage() {
            let level = select_branch(raw, module_size, &self.config);
            let used: HashSet<String> = exam.used_question_ids().map(str::to_string).collect();
            let mut next_module = exam.module(next)?.clone();
            self.generate(&mut next_module, level, &used).await?;
            *exam.module_mut(next)? = next_module;
            tracing::info!(exam_id = %exam_id, module = next.as_str(), ?level, "adaptive module drafted");
        }

        if exam.all_completed() {
            let scores = Self::final_scores(&exam);
            exam.scores = Some(scores);
            exam.status = ExamStatus::Completed;
            exam.completed_at = Some(now);
            tracing::info!(
                exam_id = %exam_id,
                math = scores.math,
                reading_writing = scores.reading_writing,
                total = scores.total,
                "mock exam finished"
            );
        }

        self.store.save_exam(exam, expected).await
    }

    fn final_scores(exam: &MockExam) -> ExamScores {
        let section_score = |section: Section| {
            let (raw, total) = exam
                .modules
                .iter()
                .filter(|m| m.kind.section() == section)
                .fold((0u32, 0u32), |(raw, total), m| {
                    (raw + m.raw_score.unwrap_or(0), total + m.questions.len() as u32)
                });
            scaled_score(raw, total)
        };
        let math = section_score(Section::Math);
        let reading_writing = section_score(Section::ReadingWriting);
        ExamScores {
            math,
            reading_writing,
            total: math + reading_writing,
        }
    }

    pub async fn abandon_exam(&self, exam_id: &str, learner_id: &str) -> EngineResult<MockExam> {
        let mut exam = self.load_owned(exam_id, learner_id).await?;
        if exam.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                entity: "mock exam",
                from: exam.status.as_str(),
                to: ExamStatus::Abandoned.as_str(),
            });
        }
        let expected = exam.version;
        exam.status = ExamStatus::Abandoned;
        let exam = self.store.save_exam(exam, expected).await?;
        tracing::info!(exam_id = %exam_id, "mock exam abandoned");
        Ok(exam)
    }
}
