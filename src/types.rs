use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BktParams;
use crate::error::{EngineError, EngineResult};

pub const MASTERY_FLOOR: f64 = 0.01;
pub const MASTERY_CEILING: f64 = 0.99;

const WEIGHT_TOLERANCE: f64 = 1e-6;

// ============================================================================
// Reference data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Math,
    ReadingWriting,
}

impl Section {
    pub const ALL: [Section; 2] = [Section::Math, Section::ReadingWriting];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::ReadingWriting => "reading_writing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    #[serde(rename = "E")]
    Easy,
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "H")]
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "E",
            Self::Medium => "M",
            Self::Hard => "H",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub section: Section,
    /// Share of the section, 0-100.
    pub weight_in_section: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub category_id: String,
    /// Share of the parent category, 0-1.
    pub weight_in_category: f64,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    categories: Vec<Category>,
    skills: Vec<Skill>,
}

/// Immutable skill/category reference data with id lookups.
#[derive(Debug, Clone)]
pub struct Catalog {
    categories: Vec<Category>,
    skills: Vec<Skill>,
    category_index: HashMap<String, usize>,
    skill_index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>, skills: Vec<Skill>) -> EngineResult<Self> {
        let mut category_index = HashMap::with_capacity(categories.len());
        for (idx, category) in categories.iter().enumerate() {
            if !(0.0..=100.0).contains(&category.weight_in_section) {
                return Err(EngineError::validation(format!(
                    "category {} weight {} outside 0-100",
                    category.id, category.weight_in_section
                )));
            }
            if category_index.insert(category.id.clone(), idx).is_some() {
                return Err(EngineError::validation(format!(
                    "duplicate category id {}",
                    category.id
                )));
            }
        }

        for section in Section::ALL {
            let total: f64 = categories
                .iter()
                .filter(|c| c.section == section)
                .map(|c| c.weight_in_section)
                .sum();
            if total > 100.0 + WEIGHT_TOLERANCE {
                return Err(EngineError::validation(format!(
                    "{} category weights sum to {total}, above 100",
                    section.as_str()
                )));
            }
        }

        let mut skill_index = HashMap::with_capacity(skills.len());
        for (idx, skill) in skills.iter().enumerate() {
            if !category_index.contains_key(&skill.category_id) {
                return Err(EngineError::not_found("category", skill.category_id.clone()));
            }
            if !(0.0..=1.0).contains(&skill.weight_in_category) {
                return Err(EngineError::validation(format!(
                    "skill {} weight {} outside 0-1",
                    skill.id, skill.weight_in_category
                )));
            }
            if skill_index.insert(skill.id.clone(), idx).is_some() {
                return Err(EngineError::validation(format!("duplicate skill id {}", skill.id)));
            }
        }

        for category in &categories {
            let total: f64 = skills
                .iter()
                .filter(|s| s.category_id == category.id)
                .map(|s| s.weight_in_category)
                .sum();
            if total > 1.0 + WEIGHT_TOLERANCE {
                return Err(EngineError::validation(format!(
                    "skill weights in category {} sum to {total}, above 1",
                    category.id
                )));
            }
        }

        Ok(Self {
            categories,
            skills,
            category_index,
            skill_index,
        })
    }

    pub fn from_json(raw: &str) -> EngineResult<Self> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Self::new(file.categories, file.skills)
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn skill(&self, skill_id: &str) -> Option<&Skill> {
        self.skill_index.get(skill_id).map(|&idx| &self.skills[idx])
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.category_index
            .get(category_id)
            .map(|&idx| &self.categories[idx])
    }

    pub fn category_of(&self, skill_id: &str) -> Option<&Category> {
        self.skill(skill_id)
            .and_then(|skill| self.category(&skill.category_id))
    }

    pub fn section_of(&self, skill_id: &str) -> Option<Section> {
        self.category_of(skill_id).map(|category| category.section)
    }

    pub fn categories_in(&self, section: Section) -> impl Iterator<Item = &Category> {
        self.categories
            .iter()
            .filter(move |category| category.section == section)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub skill_id: String,
    pub category_id: String,
    pub section: Section,
    pub difficulty: Difficulty,
    pub correct_answer: Vec<String>,
    #[serde(default)]
    pub acceptable_answers: Vec<String>,
}

// ============================================================================
// Mastery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub learner_id: String,
    pub skill_id: String,
    pub mastery_probability: f64,
    pub prior_knowledge: f64,
    pub learn_rate: f64,
    pub guess_probability: f64,
    pub slip_probability: f64,
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub learning_velocity: f64,
    pub plateau_flag: bool,
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed write; stores reject stale writers.
    pub version: u64,
}

impl MasteryRecord {
    pub fn new(learner_id: &str, skill_id: &str, params: &BktParams, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            skill_id: skill_id.to_string(),
            mastery_probability: params.prior,
            prior_knowledge: params.prior,
            learn_rate: params.learn_rate,
            guess_probability: params.guess,
            slip_probability: params.slip,
            total_attempts: 0,
            correct_attempts: 0,
            learning_velocity: 0.0,
            plateau_flag: false,
            last_practiced_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn params(&self) -> BktParams {
        BktParams {
            prior: self.prior_knowledge,
            learn_rate: self.learn_rate,
            guess: self.guess_probability,
            slip: self.slip_probability,
        }
    }

    /// Whole days since the last attempt, counting from creation if never practiced.
    pub fn days_since_practiced(&self, now: DateTime<Utc>) -> i64 {
        let since = self.last_practiced_at.unwrap_or(self.created_at);
        (now - since).num_days().max(0)
    }

    pub fn accuracy(&self) -> Option<f64> {
        if self.total_attempts == 0 {
            return None;
        }
        Some(self.correct_attempts as f64 / self.total_attempts as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEvent {
    pub learner_id: String,
    pub skill_id: String,
    pub is_correct: bool,
    #[serde(default)]
    pub elapsed_seconds: Option<u32>,
    /// Self-reported confidence, 1-5.
    #[serde(default)]
    pub confidence: Option<u8>,
}

impl AnswerEvent {
    pub fn new(learner_id: impl Into<String>, skill_id: impl Into<String>, is_correct: bool) -> Self {
        Self {
            learner_id: learner_id.into(),
            skill_id: skill_id.into(),
            is_correct,
            elapsed_seconds: None,
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningEventKind {
    MasteryUpdated,
    MasteryAchieved,
    PlateauDetected,
    DiagnosticSeeded,
}

impl LearningEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MasteryUpdated => "mastery_updated",
            Self::MasteryAchieved => "mastery_achieved",
            Self::PlateauDetected => "plateau_detected",
            Self::DiagnosticSeeded => "diagnostic_seeded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "mastery_updated" => Some(Self::MasteryUpdated),
            "mastery_achieved" => Some(Self::MasteryAchieved),
            "plateau_detected" => Some(Self::PlateauDetected),
            "diagnostic_seeded" => Some(Self::DiagnosticSeeded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    pub id: String,
    pub learner_id: String,
    pub skill_id: String,
    pub kind: LearningEventKind,
    pub mastery_before: f64,
    pub mastery_after: f64,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl LearningEvent {
    pub fn new(
        record: &MasteryRecord,
        kind: LearningEventKind,
        mastery_before: f64,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: record.learner_id.clone(),
            skill_id: record.skill_id.clone(),
            kind,
            mastery_before,
            mastery_after: record.mastery_probability,
            payload,
            occurred_at,
        }
    }
}

// ============================================================================
// Scheduling
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicPriority {
    pub skill_id: String,
    pub priority_score: f64,
    pub mastery: f64,
    pub mastery_gap: f64,
    pub base_weight: f64,
    pub forgetting_factor: f64,
    pub days_since_study: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSkill {
    pub skill_id: String,
    pub section: Section,
    pub priority: f64,
    pub mastery: f64,
    /// Category weight as a 0-1 fraction of the section.
    pub weight: f64,
}

// ============================================================================
// Study plans
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn can_transition_to(self, target: SessionStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::InProgress) | (Self::InProgress, Self::Completed)
        )
    }

    pub fn transition_to(&mut self, target: SessionStatus) -> EngineResult<()> {
        if !self.can_transition_to(target) {
            return Err(EngineError::InvalidTransition {
                entity: "practice session",
                from: self.as_str(),
                to: target.as_str(),
            });
        }
        *self = target;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    NotStarted,
    Answered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuestion {
    pub id: String,
    pub skill_id: String,
    pub question_id: String,
    pub display_order: u32,
    pub status: QuestionStatus,
    pub user_answer: Option<Vec<String>>,
    pub is_correct: Option<bool>,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub id: String,
    pub session_number: u32,
    pub section: Section,
    pub scheduled_date: NaiveDate,
    pub status: SessionStatus,
    pub questions: Vec<SessionQuestion>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PracticeSession {
    pub fn answered_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| q.status == QuestionStatus::Answered)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTargets {
    pub current_math: u32,
    pub target_math: u32,
    pub current_reading_writing: u32,
    pub target_reading_writing: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlan {
    pub id: String,
    pub learner_id: String,
    pub start_date: NaiveDate,
    pub test_date: NaiveDate,
    pub scores: ScoreTargets,
    pub is_active: bool,
    pub sessions: Vec<PracticeSession>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl StudyPlan {
    pub fn ensure_owner(&self, learner_id: &str) -> EngineResult<()> {
        if self.learner_id != learner_id {
            return Err(EngineError::ownership("study plan", self.id.clone()));
        }
        Ok(())
    }

    pub fn total_days(&self) -> i64 {
        (self.test_date - self.start_date).num_days()
    }

    pub fn last_scheduled_date(&self) -> Option<NaiveDate> {
        self.sessions.iter().map(|s| s.scheduled_date).max()
    }

    pub fn session_mut(&mut self, session_id: &str) -> EngineResult<&mut PracticeSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| EngineError::not_found("practice session", session_id))
    }
}

// ============================================================================
// Mock exams
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    #[serde(rename = "rw_module_1")]
    ReadingWriting1,
    #[serde(rename = "rw_module_2")]
    ReadingWriting2,
    #[serde(rename = "math_module_1")]
    Math1,
    #[serde(rename = "math_module_2")]
    Math2,
}

impl ModuleKind {
    /// Delivery order of a full-length exam.
    pub const ORDER: [ModuleKind; 4] = [
        ModuleKind::ReadingWriting1,
        ModuleKind::ReadingWriting2,
        ModuleKind::Math1,
        ModuleKind::Math2,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadingWriting1 => "rw_module_1",
            Self::ReadingWriting2 => "rw_module_2",
            Self::Math1 => "math_module_1",
            Self::Math2 => "math_module_2",
        }
    }

    pub const fn section(self) -> Section {
        match self {
            Self::ReadingWriting1 | Self::ReadingWriting2 => Section::ReadingWriting,
            Self::Math1 | Self::Math2 => Section::Math,
        }
    }

    pub const fn number(self) -> u8 {
        match self {
            Self::ReadingWriting1 | Self::Math1 => 1,
            Self::ReadingWriting2 | Self::Math2 => 2,
        }
    }

    /// The adaptive second stage fed by this module, if any.
    pub const fn next_stage(self) -> Option<ModuleKind> {
        match self {
            Self::ReadingWriting1 => Some(Self::ReadingWriting2),
            Self::Math1 => Some(Self::Math2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ModuleStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn transition_to(&mut self, target: ModuleStatus) -> EngineResult<()> {
        let allowed = matches!(
            (*self, target),
            (Self::NotStarted, Self::InProgress) | (Self::InProgress, Self::Completed)
        );
        if !allowed {
            return Err(EngineError::InvalidTransition {
                entity: "exam module",
                from: self.as_str(),
                to: target.as_str(),
            });
        }
        *self = target;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    NotStarted,
    InProgress,
    Completed,
    Abandoned,
}

impl ExamStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

/// Difficulty level a module was generated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleDifficulty {
    Easy,
    Balanced,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuestion {
    pub question_id: String,
    pub display_order: u32,
    pub user_answer: Option<Vec<String>>,
    pub is_correct: Option<bool>,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamModule {
    pub id: String,
    pub kind: ModuleKind,
    pub status: ModuleStatus,
    /// `None` until the module's questions are generated.
    pub difficulty: Option<ModuleDifficulty>,
    pub questions: Vec<ExamQuestion>,
    pub raw_score: Option<u32>,
    pub time_limit_minutes: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExamModule {
    pub fn is_generated(&self) -> bool {
        self.difficulty.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamScores {
    pub math: u32,
    pub reading_writing: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockExam {
    pub id: String,
    pub learner_id: String,
    pub status: ExamStatus,
    pub modules: Vec<ExamModule>,
    pub scores: Option<ExamScores>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl MockExam {
    pub fn ensure_owner(&self, learner_id: &str) -> EngineResult<()> {
        if self.learner_id != learner_id {
            return Err(EngineError::ownership("mock exam", self.id.clone()));
        }
        Ok(())
    }

    pub fn module(&self, kind: ModuleKind) -> EngineResult<&ExamModule> {
        self.modules
            .iter()
            .find(|m| m.kind == kind)
            .ok_or_else(|| EngineError::not_found("exam module", kind.as_str()))
    }

    pub fn module_mut(&mut self, kind: ModuleKind) -> EngineResult<&mut ExamModule> {
        self.modules
            .iter_mut()
            .find(|m| m.kind == kind)
            .ok_or_else(|| EngineError::not_found("exam module", kind.as_str()))
    }

    pub fn all_completed(&self) -> bool {
        self.modules
            .iter()
            .all(|m| m.status == ModuleStatus::Completed)
    }

    pub fn used_question_ids(&self) -> impl Iterator<Item = &str> {
        self.modules
            .iter()
            .flat_map(|m| m.questions.iter().map(|q| q.question_id.as_str()))
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl DiagnosticStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn transition_to(&mut self, target: DiagnosticStatus) -> EngineResult<()> {
        let allowed = matches!(
            (*self, target),
            (Self::NotStarted, Self::InProgress) | (Self::InProgress, Self::Completed)
        );
        if !allowed {
            return Err(EngineError::InvalidTransition {
                entity: "diagnostic test",
                from: self.as_str(),
                to: target.as_str(),
            });
        }
        *self = target;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticQuestion {
    pub question_id: String,
    pub skill_id: String,
    pub section: Section,
    pub display_order: u32,
    pub user_answer: Option<Vec<String>>,
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub marked_for_review: bool,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSummary {
    pub total_correct: u32,
    pub math_correct: u32,
    pub reading_writing_correct: u32,
    pub skills_assessed: u32,
}

/// Baseline test whose per-skill accuracy seeds mastery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticTest {
    pub id: String,
    pub learner_id: String,
    pub status: DiagnosticStatus,
    /// Reading/writing first, then math.
    pub questions: Vec<DiagnosticQuestion>,
    pub summary: Option<DiagnosticSummary>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl DiagnosticTest {
    pub fn ensure_owner(&self, learner_id: &str) -> EngineResult<()> {
        if self.learner_id != learner_id {
            return Err(EngineError::ownership("diagnostic test", self.id.clone()));
        }
        Ok(())
    }

    pub fn question_mut(&mut self, question_id: &str) -> EngineResult<&mut DiagnosticQuestion> {
        self.questions
            .iter_mut()
            .find(|q| q.question_id == question_id)
            .ok_or_else(|| EngineError::not_found("diagnostic question", question_id))
    }

    pub fn section_count(&self, section: Section) -> usize {
        self.questions.iter().filter(|q| q.section == section).count()
    }
}
