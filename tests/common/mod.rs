#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use prep_engine::db::{
    DiagnosticStore, ExamStore, MasteryStore, MemoryStore, PlanStore, QuestionBank,
};
use prep_engine::types::{
    Catalog, Category, DiagnosticTest, Difficulty, LearningEvent, MasteryRecord, MockExam,
    Question, Section, Skill, StudyPlan,
};
use prep_engine::{Engine, EngineConfig, EngineError, EngineResult, ManualClock};

pub const LEARNER: &str = "learner-1";
pub const OTHER_LEARNER: &str = "learner-2";

/// Two categories per section, two skills per category.
pub fn catalog() -> Arc<Catalog> {
    let mut categories = Vec::new();
    let mut skills = Vec::new();
    for (section, prefix, names) in [
        (Section::Math, "m", ["alg", "geo"]),
        (Section::ReadingWriting, "r", ["craft", "info"]),
    ] {
        for name in names {
            let category_id = format!("{prefix}-{name}");
            categories.push(Category {
                id: category_id.clone(),
                name: name.to_string(),
                section,
                weight_in_section: 50.0,
            });
            for n in 1..=2 {
                skills.push(Skill {
                    id: format!("{category_id}-{n}"),
                    name: format!("{name} {n}"),
                    category_id: category_id.clone(),
                    weight_in_category: 0.5,
                });
            }
        }
    }
    Arc::new(Catalog::new(categories, skills).expect("valid catalog"))
}

/// `per_difficulty` questions of each level for every catalog skill; every
/// keyed answer is "A".
pub fn question_bank(catalog: &Catalog, per_difficulty: usize) -> Arc<QuestionBank> {
    let bank = QuestionBank::default();
    for skill in catalog.skills() {
        let category = catalog.category(&skill.category_id).expect("category");
        for difficulty in Difficulty::ALL {
            for n in 0..per_difficulty {
                bank.add(Question {
                    id: format!("{}-{}-{n}", skill.id, difficulty.as_str()),
                    skill_id: skill.id.clone(),
                    category_id: category.id.clone(),
                    section: category.section,
                    difficulty,
                    correct_answer: vec!["A".to_string()],
                    acceptable_answers: Vec::new(),
                });
            }
        }
    }
    Arc::new(bank)
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    ))
}

pub fn seeded_config() -> EngineConfig {
    EngineConfig {
        rng_seed: Some(20260301),
        ..EngineConfig::default()
    }
}

pub fn build_engine<S>(store: Arc<S>, per_difficulty: usize) -> (Engine<S, QuestionBank>, Arc<QuestionBank>, Arc<ManualClock>)
where
    S: MasteryStore + PlanStore + ExamStore + DiagnosticStore,
{
    let config = seeded_config();
    let _ = prep_engine::logging::init_tracing(&config.logging);

    let catalog = catalog();
    let bank = question_bank(&catalog, per_difficulty);
    let clock = clock();
    let engine = Engine::new(
        &config,
        catalog,
        store,
        Arc::clone(&bank),
        clock.clone(),
    );
    (engine, bank, clock)
}

pub fn answer(text: &str) -> Vec<String> {
    vec![text.to_string()]
}

/// Memory store whose next mastery commit or plan replacement can be made to
/// fail once with a retryable conflict.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_next_commit: AtomicBool,
    fail_next_replace_plan: AtomicBool,
}

impl FlakyStore {
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_replace_plan(&self) {
        self.fail_next_replace_plan.store(true, Ordering::SeqCst);
    }
}

impl MasteryStore for FlakyStore {
    async fn get_mastery(&self, learner_id: &str, skill_id: &str) -> EngineResult<Option<MasteryRecord>> {
        self.inner.get_mastery(learner_id, skill_id).await
    }

    async fn list_mastery(&self, learner_id: &str) -> EngineResult<Vec<MasteryRecord>> {
        self.inner.list_mastery(learner_id).await
    }

    async fn create_mastery_if_absent(&self, record: MasteryRecord) -> EngineResult<MasteryRecord> {
        self.inner.create_mastery_if_absent(record).await
    }

    async fn commit_mastery(
        &self,
        record: MasteryRecord,
        expected_version: u64,
        events: Vec<LearningEvent>,
    ) -> EngineResult<MasteryRecord> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(EngineError::conflict("mastery record", &record.skill_id));
        }
        self.inner.commit_mastery(record, expected_version, events).await
    }

    async fn list_events(&self, learner_id: &str, skill_id: Option<&str>) -> EngineResult<Vec<LearningEvent>> {
        self.inner.list_events(learner_id, skill_id).await
    }
}

impl PlanStore for FlakyStore {
    async fn insert_plan(&self, plan: StudyPlan) -> EngineResult<StudyPlan> {
        self.inner.insert_plan(plan).await
    }

    async fn replace_active_plan(&self, plan: StudyPlan) -> EngineResult<StudyPlan> {
        if self.fail_next_replace_plan.swap(false, Ordering::SeqCst) {
            return Err(EngineError::conflict("study plan", &plan.id));
        }
        self.inner.replace_active_plan(plan).await
    }

    async fn get_plan(&self, plan_id: &str) -> EngineResult<Option<StudyPlan>> {
        self.inner.get_plan(plan_id).await
    }

    async fn list_plans(&self, learner_id: &str) -> EngineResult<Vec<StudyPlan>> {
        self.inner.list_plans(learner_id).await
    }

    async fn save_plan(&self, plan: StudyPlan, expected_version: u64) -> EngineResult<StudyPlan> {
        self.inner.save_plan(plan, expected_version).await
    }
}

impl ExamStore for FlakyStore {
    async fn insert_exam(&self, exam: MockExam) -> EngineResult<MockExam> {
        self.inner.insert_exam(exam).await
    }

    async fn get_exam(&self, exam_id: &str) -> EngineResult<Option<MockExam>> {
        self.inner.get_exam(exam_id).await
    }

    async fn save_exam(&self, exam: MockExam, expected_version: u64) -> EngineResult<MockExam> {
        self.inner.save_exam(exam, expected_version).await
    }
}

impl DiagnosticStore for FlakyStore {
    async fn insert_diagnostic(&self, test: DiagnosticTest) -> EngineResult<DiagnosticTest> {
        self.inner.insert_diagnostic(test).await
    }

    async fn get_diagnostic(&self, test_id: &str) -> EngineResult<Option<DiagnosticTest>> {
        self.inner.get_diagnostic(test_id).await
    }

    async fn save_diagnostic(&self, test: DiagnosticTest, expected_version: u64) -> EngineResult<DiagnosticTest> {
        self.inner.save_diagnostic(test, expected_version).await
    }
}
