use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::db::sqlite_schema::{split_sql_statements, SCHEMA_VERSION, SQLITE_SCHEMA_SQL};
use crate::db::{DiagnosticStore, ExamStore, MasteryStore, PlanStore};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    DiagnosticTest, LearningEvent, LearningEventKind, MasteryRecord, MockExam, StudyPlan,
};

/// SQLite-backed mastery, plan, exam and diagnostic storage.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        Self::connect(&format!("sqlite:{}?mode=rwc", path.display())).await
    }

    pub async fn connect(url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> EngineResult<()> {
        for statement in split_sql_statements(SQLITE_SCHEMA_SQL) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        sqlx::query(
            r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
        )
        .bind(SCHEMA_VERSION)
        .execute(&self.pool)
        .await?;
        tracing::debug!(version = SCHEMA_VERSION, "sqlite schema ready");
        Ok(())
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> EngineResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| EngineError::Storage(format!("timestamp {ms} out of range")))
}

fn map_mastery_row(row: &SqliteRow) -> EngineResult<MasteryRecord> {
    let last_practiced: Option<i64> = row.try_get("lastPracticedAt")?;
    Ok(MasteryRecord {
        learner_id: row.try_get("learnerId")?,
        skill_id: row.try_get("skillId")?,
        mastery_probability: row.try_get("masteryProbability")?,
        prior_knowledge: row.try_get("priorKnowledge")?,
        learn_rate: row.try_get("learnRate")?,
        guess_probability: row.try_get("guessProbability")?,
        slip_probability: row.try_get("slipProbability")?,
        total_attempts: row.try_get::<i64, _>("totalAttempts")? as u32,
        correct_attempts: row.try_get::<i64, _>("correctAttempts")? as u32,
        learning_velocity: row.try_get("learningVelocity")?,
        plateau_flag: row.try_get("plateauFlag")?,
        last_practiced_at: last_practiced.map(from_millis).transpose()?,
        created_at: from_millis(row.try_get("createdAt")?)?,
        updated_at: from_millis(row.try_get("updatedAt")?)?,
        version: row.try_get::<i64, _>("version")? as u64,
    })
}

fn map_event_row(row: &SqliteRow) -> EngineResult<LearningEvent> {
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    Ok(LearningEvent {
        id: row.try_get("id")?,
        learner_id: row.try_get("learnerId")?,
        skill_id: row.try_get("skillId")?,
        kind: LearningEventKind::parse(&kind)
            .ok_or_else(|| EngineError::Storage(format!("unknown learning event kind {kind}")))?,
        mastery_before: row.try_get("masteryBefore")?,
        mastery_after: row.try_get("masteryAfter")?,
        payload: serde_json::from_str(&payload)?,
        occurred_at: from_millis(row.try_get("occurredAt")?)?,
    })
}

fn mastery_key(record: &MasteryRecord) -> String {
    format!("{}/{}", record.learner_id, record.skill_id)
}

impl MasteryStore for SqliteStore {
    async fn get_mastery(&self, learner_id: &str, skill_id: &str) -> EngineResult<Option<MasteryRecord>> {
        let row = sqlx::query(
            r#"SELECT * FROM "mastery_records" WHERE "learnerId" = ? AND "skillId" = ? LIMIT 1"#,
        )
        .bind(learner_id)
        .bind(skill_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_mastery_row).transpose()
    }

    async fn list_mastery(&self, learner_id: &str) -> EngineResult<Vec<MasteryRecord>> {
        let rows = sqlx::query(
            r#"SELECT * FROM "mastery_records" WHERE "learnerId" = ? ORDER BY "skillId""#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_mastery_row).collect()
    }

    async fn create_mastery_if_absent(&self, record: MasteryRecord) -> EngineResult<MasteryRecord> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO "mastery_records" (
                "learnerId", "skillId", "masteryProbability", "priorKnowledge", "learnRate",
                "guessProbability", "slipProbability", "totalAttempts", "correctAttempts",
                "learningVelocity", "plateauFlag", "lastPracticedAt", "createdAt", "updatedAt", "version"
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&record.learner_id)
        .bind(&record.skill_id)
        .bind(record.mastery_probability)
        .bind(record.prior_knowledge)
        .bind(record.learn_rate)
        .bind(record.guess_probability)
        .bind(record.slip_probability)
        .bind(record.total_attempts as i64)
        .bind(record.correct_attempts as i64)
        .bind(record.learning_velocity)
        .bind(record.plateau_flag)
        .bind(record.last_practiced_at.map(to_millis))
        .bind(to_millis(record.created_at))
        .bind(to_millis(record.updated_at))
        .execute(&self.pool)
        .await?;

        self.get_mastery(&record.learner_id, &record.skill_id)
            .await?
            .ok_or_else(|| EngineError::not_found("mastery record", mastery_key(&record)))
    }

    async fn commit_mastery(
        &self,
        mut record: MasteryRecord,
        expected_version: u64,
        events: Vec<LearningEvent>,
    ) -> EngineResult<MasteryRecord> {
        let next_version = expected_version + 1;
        let mut tx = self.pool.begin().await?;

        let result = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO "mastery_records" (
                    "learnerId", "skillId", "masteryProbability", "priorKnowledge", "learnRate",
                    "guessProbability", "slipProbability", "totalAttempts", "correctAttempts",
                    "learningVelocity", "plateauFlag", "lastPracticedAt", "createdAt", "updatedAt", "version"
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.learner_id)
            .bind(&record.skill_id)
            .bind(record.mastery_probability)
            .bind(record.prior_knowledge)
            .bind(record.learn_rate)
            .bind(record.guess_probability)
            .bind(record.slip_probability)
            .bind(record.total_attempts as i64)
            .bind(record.correct_attempts as i64)
            .bind(record.learning_velocity)
            .bind(record.plateau_flag)
            .bind(record.last_practiced_at.map(to_millis))
            .bind(to_millis(record.created_at))
            .bind(to_millis(record.updated_at))
            .bind(next_version as i64)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE "mastery_records" SET
                    "masteryProbability" = ?, "priorKnowledge" = ?, "learnRate" = ?,
                    "guessProbability" = ?, "slipProbability" = ?, "totalAttempts" = ?,
                    "correctAttempts" = ?, "learningVelocity" = ?, "plateauFlag" = ?,
                    "lastPracticedAt" = ?, "updatedAt" = ?, "version" = ?
                WHERE "learnerId" = ? AND "skillId" = ? AND "version" = ?
                "#,
            )
            .bind(record.mastery_probability)
            .bind(record.prior_knowledge)
            .bind(record.learn_rate)
            .bind(record.guess_probability)
            .bind(record.slip_probability)
            .bind(record.total_attempts as i64)
            .bind(record.correct_attempts as i64)
            .bind(record.learning_velocity)
            .bind(record.plateau_flag)
            .bind(record.last_practiced_at.map(to_millis))
            .bind(to_millis(record.updated_at))
            .bind(next_version as i64)
            .bind(&record.learner_id)
            .bind(&record.skill_id)
            .bind(expected_version as i64)
            .execute(&mut *tx)
            .await?
        };

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(EngineError::conflict("mastery record", mastery_key(&record)));
        }

        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO "learning_events" (
                    "id", "learnerId", "skillId", "kind", "masteryBefore", "masteryAfter", "payload", "occurredAt"
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.id)
            .bind(&event.learner_id)
            .bind(&event.skill_id)
            .bind(event.kind.as_str())
            .bind(event.mastery_before)
            .bind(event.mastery_after)
            .bind(serde_json::to_string(&event.payload)?)
            .bind(to_millis(event.occurred_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        record.version = next_version;
        Ok(record)
    }

    async fn list_events(&self, learner_id: &str, skill_id: Option<&str>) -> EngineResult<Vec<LearningEvent>> {
        let rows = match skill_id {
            Some(skill_id) => {
                sqlx::query(
                    r#"SELECT * FROM "learning_events" WHERE "learnerId" = ? AND "skillId" = ? ORDER BY "occurredAt", rowid"#,
                )
                .bind(learner_id)
                .bind(skill_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"SELECT * FROM "learning_events" WHERE "learnerId" = ? ORDER BY "occurredAt", rowid"#,
                )
                .bind(learner_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(map_event_row).collect()
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(row: &SqliteRow) -> EngineResult<T> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

impl PlanStore for SqliteStore {
    async fn insert_plan(&self, mut plan: StudyPlan) -> EngineResult<StudyPlan> {
        plan.version = 1;
        sqlx::query(
            r#"
            INSERT INTO "study_plans" ("id", "learnerId", "isActive", "body", "version", "createdAt", "updatedAt")
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.learner_id)
        .bind(plan.is_active)
        .bind(serde_json::to_string(&plan)?)
        .bind(plan.version as i64)
        .bind(to_millis(plan.created_at))
        .bind(to_millis(plan.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(plan)
    }

    async fn replace_active_plan(&self, mut plan: StudyPlan) -> EngineResult<StudyPlan> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"SELECT "body" FROM "study_plans" WHERE "learnerId" = ? AND "isActive" = 1"#,
        )
        .bind(&plan.learner_id)
        .fetch_all(&mut *tx)
        .await?;
        for row in &rows {
            let mut other: StudyPlan = decode_body(row)?;
            let expected_version = other.version;
            other.is_active = false;
            other.updated_at = plan.created_at;
            other.version = expected_version + 1;
            let result = sqlx::query(
                r#"
                UPDATE "study_plans" SET "isActive" = 0, "body" = ?, "version" = ?, "updatedAt" = ?
                WHERE "id" = ? AND "version" = ?
                "#,
            )
            .bind(serde_json::to_string(&other)?)
            .bind(other.version as i64)
            .bind(to_millis(other.updated_at))
            .bind(&other.id)
            .bind(expected_version as i64)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(EngineError::conflict("study plan", other.id));
            }
        }

        plan.is_active = true;
        plan.version = 1;
        sqlx::query(
            r#"
            INSERT INTO "study_plans" ("id", "learnerId", "isActive", "body", "version", "createdAt", "updatedAt")
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.learner_id)
        .bind(plan.is_active)
        .bind(serde_json::to_string(&plan)?)
        .bind(plan.version as i64)
        .bind(to_millis(plan.created_at))
        .bind(to_millis(plan.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(
            learner_id = %plan.learner_id,
            plan_id = %plan.id,
            deactivated = rows.len(),
            "active plan replaced"
        );
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: &str) -> EngineResult<Option<StudyPlan>> {
        let row = sqlx::query(r#"SELECT "body" FROM "study_plans" WHERE "id" = ?"#)
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_body).transpose()
    }

    async fn list_plans(&self, learner_id: &str) -> EngineResult<Vec<StudyPlan>> {
        let rows = sqlx::query(
            r#"SELECT "body" FROM "study_plans" WHERE "learnerId" = ? ORDER BY "createdAt" DESC"#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_body).collect()
    }

    async fn save_plan(&self, mut plan: StudyPlan, expected_version: u64) -> EngineResult<StudyPlan> {
        plan.version = expected_version + 1;
        let result = sqlx::query(
            r#"
            UPDATE "study_plans" SET "isActive" = ?, "body" = ?, "version" = ?, "updatedAt" = ?
            WHERE "id" = ? AND "version" = ?
            "#,
        )
        .bind(plan.is_active)
        .bind(serde_json::to_string(&plan)?)
        .bind(plan.version as i64)
        .bind(to_millis(plan.updated_at))
        .bind(&plan.id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_plan(&plan.id).await? {
                Some(_) => Err(EngineError::conflict("study plan", plan.id)),
                None => Err(EngineError::not_found("study plan", plan.id)),
            };
        }
        Ok(plan)
    }
}

impl ExamStore for SqliteStore {
    async fn insert_exam(&self, mut exam: MockExam) -> EngineResult<MockExam> {
        exam.version = 1;
        sqlx::query(
            r#"
            INSERT INTO "mock_exams" ("id", "learnerId", "status", "body", "version", "createdAt")
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&exam.id)
        .bind(&exam.learner_id)
        .bind(exam.status.as_str())
        .bind(serde_json::to_string(&exam)?)
        .bind(exam.version as i64)
        .bind(to_millis(exam.created_at))
        .execute(&self.pool)
        .await?;
        Ok(exam)
    }

    async fn get_exam(&self, exam_id: &str) -> EngineResult<Option<MockExam>> {
        let row = sqlx::query(r#"SELECT "body" FROM "mock_exams" WHERE "id" = ?"#)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_body).transpose()
    }

    async fn save_exam(&self, mut exam: MockExam, expected_version: u64) -> EngineResult<MockExam> {
        exam.version = expected_version + 1;
        let result = sqlx::query(
            r#"
            UPDATE "mock_exams" SET "status" = ?, "body" = ?, "version" = ?
            WHERE "id" = ? AND "version" = ?
            "#,
        )
        .bind(exam.status.as_str())
        .bind(serde_json::to_string(&exam)?)
        .bind(exam.version as i64)
        .bind(&exam.id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_exam(&exam.id).await? {
                Some(_) => Err(EngineError::conflict("mock exam", exam.id)),
                None => Err(EngineError::not_found("mock exam", exam.id)),
            };
        }
        Ok(exam)
    }
}

impl DiagnosticStore for SqliteStore {
    async fn insert_diagnostic(&self, mut test: DiagnosticTest) -> EngineResult<DiagnosticTest> {
        test.version = 1;
        sqlx::query(
            r#"
            INSERT INTO "diagnostic_tests" ("id", "learnerId", "status", "body", "version", "createdAt")
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&test.id)
        .bind(&test.learner_id)
        .bind(test.status.as_str())
        .bind(serde_json::to_string(&test)?)
        .bind(test.version as i64)
        .bind(to_millis(test.created_at))
        .execute(&self.pool)
        .await?;
        Ok(test)
    }

    async fn get_diagnostic(&self, test_id: &str) -> EngineResult<Option<DiagnosticTest>> {
        let row = sqlx::query(r#"SELECT "body" FROM "diagnostic_tests" WHERE "id" = ?"#)
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_body).transpose()
    }

    async fn save_diagnostic(&self, mut test: DiagnosticTest, expected_version: u64) -> EngineResult<DiagnosticTest> {
        test.version = expected_version + 1;
        let result = sqlx::query(
            r#"
            UPDATE "diagnostic_tests" SET "status" = ?, "body" = ?, "version" = ?
            WHERE "id" = ? AND "version" = ?
            "#,
        )
        .bind(test.status.as_str())
        .bind(serde_json::to_string(&test)?)
        .bind(test.version as i64)
        .bind(&test.id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_diagnostic(&test.id).await? {
                Some(_) => Err(EngineError::conflict("diagnostic test", test.id)),
                None => Err(EngineError::not_found("diagnostic test", test.id)),
            };
        }
        Ok(test)
    }
}
