//! In-process adapters backed by `parking_lot` locks.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::db::{DiagnosticStore, ExamStore, MasteryStore, PlanStore, QuestionRepository};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    DiagnosticTest, LearningEvent, MasteryRecord, MockExam, Question, Section, StudyPlan,
};

type MasteryKey = (String, String);

#[derive(Debug, Default)]
struct MemoryState {
    mastery: HashMap<MasteryKey, MasteryRecord>,
    events: Vec<LearningEvent>,
    plans: HashMap<String, StudyPlan>,
    exams: HashMap<String, MockExam>,
    diagnostics: HashMap<String, DiagnosticTest>,
}

/// Mastery, plan, exam and diagnostic storage for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }
}

fn key(learner_id: &str, skill_id: &str) -> MasteryKey {
    (learner_id.to_string(), skill_id.to_string())
}

impl MasteryStore for MemoryStore {
    async fn get_mastery(&self, learner_id: &str, skill_id: &str) -> EngineResult<Option<MasteryRecord>> {
        Ok(self.state.read().mastery.get(&key(learner_id, skill_id)).cloned())
    }

    async fn list_mastery(&self, learner_id: &str) -> EngineResult<Vec<MasteryRecord>> {
        let state = self.state.read();
        let mut records: Vec<MasteryRecord> = state
            .mastery
            .values()
            .filter(|r| r.learner_id == learner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        Ok(records)
    }

    async fn create_mastery_if_absent(&self, mut record: MasteryRecord) -> EngineResult<MasteryRecord> {
        let mut state = self.state.write();
        let stored = state
            .mastery
            .entry(key(&record.learner_id, &record.skill_id))
            .or_insert_with(|| {
                record.version = 1;
                record
            });
        Ok(stored.clone())
    }

    async fn commit_mastery(
        &self,
        mut record: MasteryRecord,
        expected_version: u64,
        events: Vec<LearningEvent>,
    ) -> EngineResult<MasteryRecord> {
        let mut state = self.state.write();
        let map_key = key(&record.learner_id, &record.skill_id);
        let current = state.mastery.get(&map_key).map_or(0, |r| r.version);
        if current != expected_version {
            return Err(EngineError::conflict(
                "mastery record",
                format!("{}/{}", record.learner_id, record.skill_id),
            ));
        }

        record.version = expected_version + 1;
        state.mastery.insert(map_key, record.clone());
        state.events.extend(events);
        Ok(record)
    }

    async fn list_events(&self, learner_id: &str, skill_id: Option<&str>) -> EngineResult<Vec<LearningEvent>> {
        let state = self.state.read();
        Ok(state
            .events
            .iter()
            .filter(|e| e.learner_id == learner_id)
            .filter(|e| skill_id.map_or(true, |s| e.skill_id == s))
            .cloned()
            .collect())
    }
}

impl PlanStore for MemoryStore {
    async fn insert_plan(&self, mut plan: StudyPlan) -> EngineResult<StudyPlan> {
        let mut state = self.state.write();
        if state.plans.contains_key(&plan.id) {
            return Err(EngineError::Storage(format!("study plan {} already exists", plan.id)));
        }
        plan.version = 1;
        state.plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    async fn replace_active_plan(&self, mut plan: StudyPlan) -> EngineResult<StudyPlan> {
        let mut state = self.state.write();
        if state.plans.contains_key(&plan.id) {
            return Err(EngineError::Storage(format!("study plan {} already exists", plan.id)));
        }
        for other in state
            .plans
            .values_mut()
            .filter(|p| p.learner_id == plan.learner_id && p.is_active)
        {
            other.is_active = false;
            other.updated_at = plan.created_at;
            other.version += 1;
        }
        plan.is_active = true;
        plan.version = 1;
        state.plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: &str) -> EngineResult<Option<StudyPlan>> {
        Ok(self.state.read().plans.get(plan_id).cloned())
    }

    async fn list_plans(&self, learner_id: &str) -> EngineResult<Vec<StudyPlan>> {
        let state = self.state.read();
        let mut plans: Vec<StudyPlan> = state
            .plans
            .values()
            .filter(|p| p.learner_id == learner_id)
            .cloned()
            .collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn save_plan(&self, mut plan: StudyPlan, expected_version: u64) -> EngineResult<StudyPlan> {
        let mut state = self.state.write();
        let Some(current) = state.plans.get(&plan.id) else {
            return Err(EngineError::not_found("study plan", plan.id));
        };
        if current.version != expected_version {
            return Err(EngineError::conflict("study plan", plan.id));
        }
        plan.version = expected_version + 1;
        state.plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }
}

impl ExamStore for MemoryStore {
    async fn insert_exam(&self, mut exam: MockExam) -> EngineResult<MockExam> {
        let mut state = self.state.write();
        if state.exams.contains_key(&exam.id) {
            return Err(EngineError::Storage(format!("mock exam {} already exists", exam.id)));
        }
        exam.version = 1;
        state.exams.insert(exam.id.clone(), exam.clone());
        Ok(exam)
    }

    async fn get_exam(&self, exam_id: &str) -> EngineResult<Option<MockExam>> {
        Ok(self.state.read().exams.get(exam_id).cloned())
    }

    async fn save_exam(&self, mut exam: MockExam, expected_version: u64) -> EngineResult<MockExam> {
        let mut state = self.state.write();
        let Some(current) = state.exams.get(&exam.id) else {
            return Err(EngineError::not_found("mock exam", exam.id));
        };
        if current.version != expected_version {
            return Err(EngineError::conflict("mock exam", exam.id));
        }
        exam.version = expected_version + 1;
        state.exams.insert(exam.id.clone(), exam.clone());
        Ok(exam)
    }
}

/// Question supply held in memory, loadable from a JSON array.
#[derive(Debug, Default)]
pub struct QuestionBank {
    questions: RwLock<Vec<Question>>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions: RwLock::new(questions),
        }
    }

    pub fn from_json(raw: &str) -> EngineResult<Self> {
        let questions: Vec<Question> = serde_json::from_str(raw)?;
        Ok(Self::new(questions))
    }

    pub fn add(&self, question: Question) {
        self.questions.write().push(question);
    }

    pub fn len(&self) -> usize {
        self.questions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.read().is_empty()
    }
}

impl QuestionRepository for QuestionBank {
    async fn find_by_skill(&self, skill_id: &str) -> EngineResult<Vec<Question>> {
        Ok(self
            .questions
            .read()
            .iter()
            .filter(|q| q.skill_id == skill_id)
            .cloned()
            .collect())
    }

    async fn find_by_section(&self, section: Section) -> EngineResult<Vec<Question>> {
        Ok(self
            .questions
            .read()
            .iter()
            .filter(|q| q.section == section)
            .cloned()
            .collect())
    }

    async fn get(&self, question_id: &str) -> EngineResult<Option<Question>> {
        Ok(self.questions.read().iter().find(|q| q.id == question_id).cloned())
    }
}


impl DiagnosticStore for MemoryStore {
    async fn insert_diagnostic(&self, mut test: DiagnosticTest) -> EngineResult<DiagnosticTest> {
        let mut state = self.state.write();
        if state.diagnostics.contains_key(&test.id) {
            return Err(EngineError::Storage(format!("diagnostic test {} already exists", test.id)));
        }
        test.version = 1;
        state.diagnostics.insert(test.id.clone(), test.clone());
        Ok(test)
    }

    async fn get_diagnostic(&self, test_id: &str) -> EngineResult<Option<DiagnosticTest>> {
        Ok(self.state.read().diagnostics.get(test_id).cloned())
    }

    async fn save_diagnostic(&self, mut test: DiagnosticTest, expected_version: u64) -> EngineResult<DiagnosticTest> {
        let mut state = self.state.write();
        let Some(current) = state.diagnostics.get(&test.id) else {
            return Err(EngineError::not_found("diagnostic test", test.id));
        };
        if current.version != expected_version {
            return Err(EngineError::conflict("diagnostic test", test.id));
        }
        test.version = expected_version + 1;
        state.diagnostics.insert(test.id.clone(), test.clone());
        Ok(test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BktParams;
    use chrono::Utc;

    #[tokio::test]
    async fn stale_mastery_commit_is_rejected() {
        let store = MemoryStore::new();
        let created = store
            .create_mastery_if_absent(MasteryRecord::new("l1", "s1", &BktParams::default(), Utc::now()))
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let mut first = created.clone();
        first.total_attempts = 1;
        let committed = store.commit_mastery(first, 1, Vec::new()).await.unwrap();
        assert_eq!(committed.version, 2);

        let err = store.commit_mastery(created, 1, Vec::new()).await.unwrap_err();
        assert!(err.is_retryable());
        let stored = store.get_mastery("l1", "s1").await.unwrap().unwrap();
        assert_eq!(stored.total_attempts, 1);
    }

    #[tokio::test]
    async fn create_if_absent_never_overwrites() {
        let store = MemoryStore::new();
        let mut seeded = MasteryRecord::new("l1", "s1", &BktParams::default(), Utc::now());
        seeded.mastery_probability = 0.7;
        store.create_mastery_if_absent(seeded).await.unwrap();

        let again = store
            .create_mastery_if_absent(MasteryRecord::new("l1", "s1", &BktParams::default(), Utc::now()))
            .await
            .unwrap();
        assert!((again.mastery_probability - 0.7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn question_bank_filters_by_skill_and_section() {
        let bank = QuestionBank::from_json(
            r#"[
                {"id": "q1", "skillId": "s1", "categoryId": "c1", "section": "math", "difficulty": "E", "correctAnswer": ["A"]},
                {"id": "q2", "skillId": "s2", "categoryId": "c2", "section": "reading_writing", "difficulty": "H", "correctAnswer": ["B"], "acceptableAnswers": ["b"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(bank.find_by_skill("s1").await.unwrap().len(), 1);
        assert_eq!(bank.find_by_section(Section::ReadingWriting).await.unwrap()[0].id, "q2");
        assert!(bank.get("missing").await.unwrap().is_none());
    }

    fn plan(id: &str, learner_id: &str) -> StudyPlan {
        let now = Utc::now();
        StudyPlan {
            id: id.to_string(),
            learner_id: learner_id.to_string(),
            start_date: now.date_naive(),
            test_date: now.date_naive() + chrono::Duration::days(30),
            scores: Default::default(),
            is_active: true,
            sessions: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[tokio::test]
    async fn replacing_active_plan_deactivates_only_that_learner() {
        let store = MemoryStore::new();
        store.replace_active_plan(plan("p1", "l1")).await.unwrap();
        store.replace_active_plan(plan("other", "l2")).await.unwrap();

        let replaced = store.replace_active_plan(plan("p2", "l1")).await.unwrap();
        assert!(replaced.is_active);
        assert_eq!(replaced.version, 1);

        let old = store.get_plan("p1").await.unwrap().unwrap();
        assert!(!old.is_active);
        assert_eq!(old.version, 2);
        assert!(store.get_plan("other").await.unwrap().unwrap().is_active);

        let err = store.replace_active_plan(plan("p2", "l1")).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(store.get_plan("p2").await.unwrap().unwrap().is_active);
    }
}
