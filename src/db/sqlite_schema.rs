pub const SCHEMA_VERSION: &str = "2";

pub const SQLITE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "_db_metadata" (
    "key" TEXT PRIMARY KEY,
    "value" TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS "mastery_records" (
    "learnerId" TEXT NOT NULL,
    "skillId" TEXT NOT NULL,
    "masteryProbability" REAL NOT NULL,
    "priorKnowledge" REAL NOT NULL,
    "learnRate" REAL NOT NULL,
    "guessProbability" REAL NOT NULL,
    "slipProbability" REAL NOT NULL,
    "totalAttempts" INTEGER NOT NULL DEFAULT 0,
    "correctAttempts" INTEGER NOT NULL DEFAULT 0,
    "learningVelocity" REAL NOT NULL DEFAULT 0,
    "plateauFlag" INTEGER NOT NULL DEFAULT 0,
    "lastPracticedAt" INTEGER,
    "createdAt" INTEGER NOT NULL,
    "updatedAt" INTEGER NOT NULL,
    "version" INTEGER NOT NULL,
    PRIMARY KEY ("learnerId", "skillId")
);

CREATE TABLE IF NOT EXISTS "learning_events" (
    "id" TEXT PRIMARY KEY,
    "learnerId" TEXT NOT NULL,
    "skillId" TEXT NOT NULL,
    "kind" TEXT NOT NULL,
    "masteryBefore" REAL NOT NULL,
    "masteryAfter" REAL NOT NULL,
    "payload" TEXT NOT NULL DEFAULT '{}',
    "occurredAt" INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS "idx_learning_events_learner"
    ON "learning_events" ("learnerId", "skillId", "occurredAt");

-- Plans and exams are stored whole, and the version column guards concurrent saves.
CREATE TABLE IF NOT EXISTS "study_plans" (
    "id" TEXT PRIMARY KEY,
    "learnerId" TEXT NOT NULL,
    "isActive" INTEGER NOT NULL,
    "body" TEXT NOT NULL,
    "version" INTEGER NOT NULL,
    "createdAt" INTEGER NOT NULL,
    "updatedAt" INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS "idx_study_plans_learner" ON "study_plans" ("learnerId");

CREATE TABLE IF NOT EXISTS "mock_exams" (
    "id" TEXT PRIMARY KEY,
    "learnerId" TEXT NOT NULL,
    "status" TEXT NOT NULL,
    "body" TEXT NOT NULL,
    "version" INTEGER NOT NULL,
    "createdAt" INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS "diagnostic_tests" (
    "id" TEXT PRIMARY KEY,
    "learnerId" TEXT NOT NULL,
    "status" TEXT NOT NULL,
    "body" TEXT NOT NULL,
    "version" INTEGER NOT NULL,
    "createdAt" INTEGER NOT NULL
);
"#;

/// Splits a script on `;` outside quoted literals and drops `--` comment lines.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    let push = |raw: &str, out: &mut Vec<String>| {
        let cleaned = raw
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    };

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ';' if !in_single_quote && !in_double_quote => {
                push(&current, &mut statements);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    push(&current, &mut statements);

    statements
}
