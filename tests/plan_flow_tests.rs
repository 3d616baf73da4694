mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use common::{answer, build_engine, FlakyStore, LEARNER, OTHER_LEARNER};
use prep_engine::db::{MemoryStore, PlanStore};
use prep_engine::services::plan::MAX_BATCH_DAYS;
use prep_engine::services::StudyPlanInput;
use prep_engine::types::{QuestionStatus, ScoreTargets, Section, SessionStatus};
use prep_engine::EngineError;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn input() -> StudyPlanInput {
    StudyPlanInput {
        start_date: Some(date(2026, 3, 1)),
        test_date: date(2026, 5, 1),
        scores: ScoreTargets {
            current_math: 520,
            target_math: 650,
            current_reading_writing: 540,
            target_reading_writing: 640,
        },
    }
}

// ============================================================================
// Plan generation
// ============================================================================

#[tokio::test]
async fn test_first_batch_packs_full_question_budget() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 10);

    let plan = engine
        .plans
        .generate_plan(LEARNER, input())
        .await
        .expect("plan generated");

    // 14 days x 25 questions across 8 equally weighted skills.
    let total: usize = plan.sessions.iter().map(|s| s.questions.len()).sum();
    assert_eq!(total, 350);
    assert_eq!(plan.sessions.len(), 13);
    assert!(plan.is_active);

    let math = plan.sessions.iter().filter(|s| s.section == Section::Math).count();
    assert_eq!(math, 7);

    for (idx, session) in plan.sessions.iter().enumerate() {
        assert_eq!(session.session_number as usize, idx + 1);
        assert_eq!(session.status, SessionStatus::Pending);
        assert!(session.scheduled_date > date(2026, 3, 1));
        assert!(session.scheduled_date <= date(2026, 3, 15));
        let prefix = match session.section {
            Section::Math => "m-",
            Section::ReadingWriting => "r-",
        };
        assert!(session.questions.iter().all(|q| q.skill_id.starts_with(prefix)));
        let orders: Vec<u32> = session.questions.iter().map(|q| q.display_order).collect();
        assert_eq!(orders, (1..=session.questions.len() as u32).collect::<Vec<_>>());
    }

    // Longer (math) list leads the interleave.
    assert_eq!(plan.sessions[0].section, Section::Math);
    assert_eq!(plan.sessions[1].section, Section::ReadingWriting);
}

#[tokio::test]
async fn test_per_skill_counts_follow_allocation() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 10);
    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();

    let mut per_skill: HashMap<String, usize> = HashMap::new();
    for question in plan.sessions.iter().flat_map(|s| s.questions.iter()) {
        *per_skill.entry(question.skill_id.clone()).or_default() += 1;
    }
    assert_eq!(per_skill.len(), 8);
    assert_eq!(per_skill["m-alg-1"], 44);
    assert_eq!(per_skill["r-info-2"], 43);
}

#[tokio::test]
async fn test_test_date_must_follow_start() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 2);
    let mut bad = input();
    bad.test_date = date(2026, 3, 1);

    let err = engine.plans.generate_plan(LEARNER, bad).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_new_plan_deactivates_previous() {
    let store = Arc::new(MemoryStore::new());
    let (engine, _, _) = build_engine(Arc::clone(&store), 4);

    let first = engine.plans.generate_plan(LEARNER, input()).await.unwrap();
    let second = engine.plans.generate_plan(LEARNER, input()).await.unwrap();

    let first = store.get_plan(&first.id).await.unwrap().unwrap();
    assert!(!first.is_active);
    let active = engine.plans.active_plan(LEARNER).await.unwrap().unwrap();
    assert_eq!(active.id, second.id);
}

#[tokio::test]
async fn test_failed_plan_replacement_keeps_previous_active() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _, _) = build_engine(Arc::clone(&store), 4);

    let first = engine.plans.generate_plan(LEARNER, input()).await.unwrap();
    store.fail_next_replace_plan();

    let err = engine.plans.generate_plan(LEARNER, input()).await.unwrap_err();
    assert!(err.is_retryable());

    let active = engine
        .plans
        .active_plan(LEARNER)
        .await
        .unwrap()
        .expect("previous plan still active");
    assert_eq!(active.id, first.id);
    assert_eq!(active.version, first.version);
    assert_eq!(store.list_plans(LEARNER).await.unwrap().len(), 1);

    let retried = engine.plans.generate_plan(LEARNER, input()).await.expect("retry succeeds");
    let first = store.get_plan(&first.id).await.unwrap().unwrap();
    assert!(!first.is_active);
    assert_eq!(engine.plans.active_plan(LEARNER).await.unwrap().unwrap().id, retried.id);
}

#[tokio::test]
async fn test_next_batch_rejects_out_of_range_days() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 2);
    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();

    for days in [0, MAX_BATCH_DAYS + 1, u32::MAX] {
        let err = engine
            .plans
            .generate_next_batch(&plan.id, LEARNER, days)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "days = {days}");
    }

    let stored = engine.plans.get_plan(&plan.id, LEARNER).await.unwrap();
    assert_eq!(stored.version, plan.version);
    assert_eq!(stored.sessions.len(), plan.sessions.len());
}

#[tokio::test]
async fn test_next_batch_schedules_after_last_session() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 10);
    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();
    let last = plan.last_scheduled_date().unwrap();

    let outcome = engine
        .plans
        .generate_next_batch(&plan.id, LEARNER, 7)
        .await
        .expect("next batch");

    assert!(outcome.sessions_created > 0);
    assert_eq!(outcome.focus_skill_ids.len(), 8);
    let added = &outcome.plan.sessions[plan.sessions.len()..];
    assert_eq!(added.len(), outcome.sessions_created);
    assert!(added.iter().all(|s| s.scheduled_date > last));
    assert_eq!(added[0].session_number as usize, plan.sessions.len() + 1);
    let total: usize = added.iter().map(|s| s.questions.len()).sum();
    assert_eq!(total, 175);
}

#[tokio::test]
async fn test_next_batch_rejects_foreign_plan() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 2);
    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();

    let err = engine
        .plans
        .generate_next_batch(&plan.id, OTHER_LEARNER, 7)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OwnershipViolation { .. }));

    let err = engine
        .plans
        .generate_next_batch("missing", LEARNER, 7)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_session_answers_feed_mastery() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 10);
    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();
    let session = &plan.sessions[0];
    let slot = &session.questions[0];

    let err = engine
        .plans
        .submit_session_answer(&plan.id, &session.id, &slot.id, LEARNER, answer("A"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    engine
        .plans
        .start_session(&plan.id, &session.id, LEARNER)
        .await
        .expect("session started");

    let outcome = engine
        .plans
        .submit_session_answer(&plan.id, &session.id, &slot.id, LEARNER, answer(" a "))
        .await
        .expect("answer accepted");
    assert!(outcome.is_correct);
    assert_eq!(outcome.mastery.total_attempts, 1);
    assert!(outcome.mastery.after > outcome.mastery.before);

    let record = engine
        .mastery
        .get(LEARNER, &slot.skill_id)
        .await
        .unwrap()
        .expect("record created on first answer");
    assert_eq!(record.correct_attempts, 1);

    let err = engine
        .plans
        .submit_session_answer(&plan.id, &session.id, &slot.id, LEARNER, answer("A"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let wrong_slot = &session.questions[1];
    let outcome = engine
        .plans
        .submit_session_answer(&plan.id, &session.id, &wrong_slot.id, LEARNER, answer("C"))
        .await
        .unwrap();
    assert!(!outcome.is_correct);

    let completed = engine
        .plans
        .complete_session(&plan.id, &session.id, LEARNER)
        .await
        .unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    assert_eq!(completed.answered_count(), 2);

    let err = engine
        .plans
        .start_session(&plan.id, &session.id, LEARNER)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_failed_mastery_commit_reopens_session_question() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _, _) = build_engine(Arc::clone(&store), 4);
    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();
    let session = &plan.sessions[0];
    let slot = &session.questions[0];
    engine
        .plans
        .start_session(&plan.id, &session.id, LEARNER)
        .await
        .unwrap();

    store.fail_next_commit();
    let err = engine
        .plans
        .submit_session_answer(&plan.id, &session.id, &slot.id, LEARNER, answer("A"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let stored = store.get_plan(&plan.id).await.unwrap().unwrap();
    let reopened = &stored.sessions[0].questions[0];
    assert_eq!(reopened.status, QuestionStatus::NotStarted);
    assert!(reopened.user_answer.is_none());
    assert!(reopened.is_correct.is_none());
    assert!(engine.mastery.get(LEARNER, &slot.skill_id).await.unwrap().is_none());

    let outcome = engine
        .plans
        .submit_session_answer(&plan.id, &session.id, &slot.id, LEARNER, answer("A"))
        .await
        .expect("retry accepted");
    assert!(outcome.is_correct);
    assert_eq!(outcome.mastery.total_attempts, 1);

    let record = engine
        .mastery
        .get(LEARNER, &slot.skill_id)
        .await
        .unwrap()
        .expect("record written on retry");
    assert_eq!(record.total_attempts, 1);
    let stored = store.get_plan(&plan.id).await.unwrap().unwrap();
    assert_eq!(stored.sessions[0].questions[0].status, QuestionStatus::Answered);
}

#[tokio::test]
async fn test_stale_plan_save_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let (engine, _, _) = build_engine(Arc::clone(&store), 2);
    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();

    engine
        .plans
        .start_session(&plan.id, &plan.sessions[0].id, LEARNER)
        .await
        .unwrap();

    let err = store.save_plan(plan.clone(), plan.version).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_low_mastery_skill_gets_more_questions() {
    let (engine, _, _) = build_engine(Arc::new(MemoryStore::new()), 10);
    engine
        .mastery
        .initialize_from_diagnostic(LEARNER, "m-alg-1", 10, 10)
        .await
        .unwrap();

    let plan = engine.plans.generate_plan(LEARNER, input()).await.unwrap();
    let count = |skill: &str| {
        plan.sessions
            .iter()
            .flat_map(|s| s.questions.iter())
            .filter(|q| q.skill_id == skill)
            .count()
    };
    assert!(count("m-alg-1") < count("m-alg-2"));
}
