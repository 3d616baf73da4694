//! Baseline diagnostics: a short difficulty-balanced test per section whose
//! per-skill accuracy seeds mastery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use serde::Serialize;
use uuid::Uuid;

use crate::algo::answer;
use crate::algo::scoring::draft_by_difficulty;
use crate::clock::Clock;
use crate::config::DiagnosticConfig;
use crate::db::{DiagnosticStore, MasteryStore, QuestionRepository};
use crate::error::{EngineError, EngineResult};
use crate::services::mastery::{DiagnosticResult, MasteryService};
use crate::types::{
    Catalog, DiagnosticQuestion, DiagnosticStatus, DiagnosticSummary, DiagnosticTest,
    MasteryRecord, Question, Section,
};

/// Reading/writing is delivered first.
const SECTION_ORDER: [Section; 2] = [Section::ReadingWriting, Section::Math];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticAnswerOutcome {
    pub is_correct: bool,
    pub correct_answer: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticCompletion {
    pub test: DiagnosticTest,
    pub results: Vec<DiagnosticResult>,
    pub records: Vec<MasteryRecord>,
}

pub struct DiagnosticService<S, Q> {
    store: Arc<S>,
    questions: Arc<Q>,
    mastery: Arc<MasteryService<S>>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    config: DiagnosticConfig,
    rng: Mutex<StdRng>,
}

impl<S, Q> DiagnosticService<S, Q>
where
    S: DiagnosticStore + MasteryStore,
    Q: QuestionRepository,
{
    pub fn new(
        store: Arc<S>,
        questions: Arc<Q>,
        mastery: Arc<MasteryService<S>>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        config: DiagnosticConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            questions,
            mastery,
            catalog,
            clock,
            config,
            rng: Mutex::new(rng),
        }
    }

    async fn load_owned(&self, test_id: &str, learner_id: &str) -> EngineResult<DiagnosticTest> {
        let test = self
            .store
            .get_diagnostic(test_id)
            .await?
            .ok_or_else(|| EngineError::not_found("diagnostic test", test_id))?;
        test.ensure_owner(learner_id)?;
        Ok(test)
    }

    pub async fn create_diagnostic(&self, learner_id: &str) -> EngineResult<DiagnosticTest> {
        let size = self.config.questions_per_section as usize;
        let mut questions = Vec::with_capacity(size * SECTION_ORDER.len());

        for section in SECTION_ORDER {
            let pool = self.questions.find_by_section(section).await?;
            if pool.is_empty() {
                return Err(EngineError::InsufficientSupply { section });
            }
            let draft = {
                let mut rng = self.rng.lock();
                draft_by_difficulty(&pool, &self.config.mix, size, &HashSet::new(), &mut *rng)
            };
            if draft.shortfall > 0 {
                tracing::warn!(
                    section = section.as_str(),
                    shortfall = draft.shortfall,
                    "diagnostic section drafted short"
                );
            }

            let by_id: HashMap<&str, &Question> =
                pool.iter().map(|q| (q.id.as_str(), q)).collect();
            for question_id in draft.question_ids {
                let Some(question) = by_id.get(question_id.as_str()) else {
                    continue;
                };
                questions.push(DiagnosticQuestion {
                    skill_id: question.skill_id.clone(),
                    section,
                    display_order: questions.len() as u32 + 1,
                    question_id,
                    user_answer: None,
                    is_correct: None,
                    marked_for_review: false,
                    answered_at: None,
                });
            }
        }

        let test = DiagnosticTest {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            status: DiagnosticStatus::NotStarted,
            questions,
            summary: None,
            created_at: self.clock.now(),
            started_at: None,
            completed_at: None,
            version: 0,
        };
        let test = self.store.insert_diagnostic(test).await?;
        tracing::info!(
            learner_id = %learner_id,
            test_id = %test.id,
            questions = test.questions.len(),
            "diagnostic test created"
        );
        Ok(test)
    }

    pub async fn get_diagnostic(&self, test_id: &str, learner_id: &str) -> EngineResult<DiagnosticTest> {
        self.load_owned(test_id, learner_id).await
    }

    pub async fn start_diagnostic(&self, test_id: &str, learner_id: &str) -> EngineResult<DiagnosticTest> {
        let mut test = self.load_owned(test_id, learner_id).await?;
        let expected = test.version;
        test.status.transition_to(DiagnosticStatus::InProgress)?;
        test.started_at = Some(self.clock.now());
        self.store.save_diagnostic(test, expected).await
    }

    /// Grades and records one answer. Answers may be changed until completion.
    pub async fn submit_answer(
        &self,
        test_id: &str,
        learner_id: &str,
        question_id: &str,
        user_answer: Vec<String>,
        marked_for_review: bool,
    ) -> EngineResult<DiagnosticAnswerOutcome> {
        let mut test = self.load_owned(test_id, learner_id).await?;
        if test.status != DiagnosticStatus::InProgress {
            return Err(EngineError::validation(format!(
                "diagnostic test {test_id} is {}, not in progress",
                test.status.as_str()
            )));
        }
        let expected = test.version;
        let now = self.clock.now();

        let slot = test.question_mut(question_id)?;
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
        slot.marked_for_review = marked_for_review;
        slot.answered_at = Some(now);

        self.store.save_diagnostic(test, expected).await?;
        Ok(DiagnosticAnswerOutcome {
            is_correct,
            correct_answer: question.correct_answer,
        })
    }

    /// Tallies per-skill accuracy, seeds mastery from it, and closes the test.
    ///
    /// Unanswered questions count as incorrect. Seeding runs before the test is
    /// saved, so a failed save can be retried and reseeds the same values.
    pub async fn complete_diagnostic(
        &self,
        test_id: &str,
        learner_id: &str,
    ) -> EngineResult<DiagnosticCompletion> {
        let mut test = self.load_owned(test_id, learner_id).await?;
        let expected = test.version;
        test.status.transition_to(DiagnosticStatus::Completed)?;

        let results = tally_by_skill(&test.questions, &self.catalog);
        let records = self
            .mastery
            .seed_from_diagnostic_results(learner_id, &results)
            .await?;

        let correct_in = |section: Section| {
            test.questions
                .iter()
                .filter(|q| q.section == section && q.is_correct == Some(true))
                .count() as u32
        };
        let math_correct = correct_in(Section::Math);
        let reading_writing_correct = correct_in(Section::ReadingWriting);
        test.summary = Some(DiagnosticSummary {
            total_correct: math_correct + reading_writing_correct,
            math_correct,
            reading_writing_correct,
            skills_assessed: results.len() as u32,
        });
        test.completed_at = Some(self.clock.now());

        let test = self.store.save_diagnostic(test, expected).await?;
        tracing::info!(
            learner_id = %learner_id,
            test_id = %test_id,
            math_correct,
            reading_writing_correct,
            skills = results.len(),
            "diagnostic test completed"
        );
        Ok(DiagnosticCompletion {
            test,
            results,
            records,
        })
    }
}

/// Correct and total counts per skill, in first-seen order. Skills missing
/// from the catalog are skipped.
fn tally_by_skill(questions: &[DiagnosticQuestion], catalog: &Catalog) -> Vec<DiagnosticResult> {
    let mut results: Vec<DiagnosticResult> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for question in questions {
        if catalog.skill(&question.skill_id).is_none() {
            tracing::warn!(skill_id = %question.skill_id, "diagnostic question for unknown skill ignored");
            continue;
        }
        let idx = *index.entry(question.skill_id.as_str()).or_insert_with(|| {
            results.push(DiagnosticResult {
                skill_id: question.skill_id.clone(),
                correct: 0,
                total: 0,
            });
            results.len() - 1
        });
        results[idx].total += 1;
        if question.is_correct == Some(true) {
            results[idx].correct += 1;
        }
    }

    results
}
