//! Storage seams.
//!
//! The engine talks to persistence only through these traits. Every write that
//! replaces an existing aggregate carries the version the caller read, and the
//! store rejects it with `ConcurrencyConflict` when someone else got there first.

pub mod memory;
pub mod sqlite;
pub mod sqlite_schema;

use std::future::Future;

use crate::error::EngineResult;
use crate::types::{
    DiagnosticTest, LearningEvent, MasteryRecord, MockExam, Question, Section, StudyPlan,
};

pub use memory::{MemoryStore, QuestionBank};
pub use sqlite::SqliteStore;

pub trait QuestionRepository: Send + Sync {
    fn find_by_skill(&self, skill_id: &str)
        -> impl Future<Output = EngineResult<Vec<Question>>> + Send;

    fn find_by_section(
        &self,
        section: Section,
    ) -> impl Future<Output = EngineResult<Vec<Question>>> + Send;

    fn get(&self, question_id: &str) -> impl Future<Output = EngineResult<Option<Question>>> + Send;
}

pub trait MasteryStore: Send + Sync {
    fn get_mastery(
        &self,
        learner_id: &str,
        skill_id: &str,
    ) -> impl Future<Output = EngineResult<Option<MasteryRecord>>> + Send;

    fn list_mastery(
        &self,
        learner_id: &str,
    ) -> impl Future<Output = EngineResult<Vec<MasteryRecord>>> + Send;

    /// Inserts `record` unless one exists for the key; returns whichever is stored.
    fn create_mastery_if_absent(
        &self,
        record: MasteryRecord,
    ) -> impl Future<Output = EngineResult<MasteryRecord>> + Send;

    /// Writes `record` and appends `events` atomically when the stored version
    /// equals `expected_version`. The stored record gets `expected_version + 1`.
    /// `expected_version == 0` with no stored record inserts.
    fn commit_mastery(
        &self,
        record: MasteryRecord,
        expected_version: u64,
        events: Vec<LearningEvent>,
    ) -> impl Future<Output = EngineResult<MasteryRecord>> + Send;

    fn list_events(
        &self,
        learner_id: &str,
        skill_id: Option<&str>,
    ) -> impl Future<Output = EngineResult<Vec<LearningEvent>>> + Send;
}

pub trait PlanStore: Send + Sync {
    fn insert_plan(&self, plan: StudyPlan) -> impl Future<Output = EngineResult<StudyPlan>> + Send;

    /// Inserts `plan` as the learner's only active plan, deactivating any
    /// other active plan in the same atomic write.
    fn replace_active_plan(
        &self,
        plan: StudyPlan,
    ) -> impl Future<Output = EngineResult<StudyPlan>> + Send;

    fn get_plan(&self, plan_id: &str) -> impl Future<Output = EngineResult<Option<StudyPlan>>> + Send;

    fn list_plans(&self, learner_id: &str)
        -> impl Future<Output = EngineResult<Vec<StudyPlan>>> + Send;

    fn save_plan(
        &self,
        plan: StudyPlan,
        expected_version: u64,
    ) -> impl Future<Output = EngineResult<StudyPlan>> + Send;
}

pub trait ExamStore: Send + Sync {
    fn insert_exam(&self, exam: MockExam) -> impl Future<Output = EngineResult<MockExam>> + Send;

    fn get_exam(&self, exam_id: &str) -> impl Future<Output = EngineResult<Option<MockExam>>> + Send;

    fn save_exam(
        &self,
        exam: MockExam,
        expected_version: u64,
    ) -> impl Future<Output = EngineResult<MockExam>> + Send;
}

pub trait DiagnosticStore: Send + Sync {
    fn insert_diagnostic(
        &self,
        test: DiagnosticTest,
    ) -> impl Future<Output = EngineResult<DiagnosticTest>> + Send;

    fn get_diagnostic(
        &self,
        test_id: &str,
    ) -> impl Future<Output = EngineResult<Option<DiagnosticTest>>> + Send;

    fn save_diagnostic(
        &self,
        test: DiagnosticTest,
        expected_version: u64,
    ) -> impl Future<Output = EngineResult<DiagnosticTest>> + Send;
}
