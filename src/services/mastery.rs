//! Per-(learner, skill) mastery tracking.
//!
//! Updates for one key are serialized in-process through a keyed async mutex;
//! across processes the store's version check turns lost updates into
//! `ConcurrencyConflict` errors for the caller to retry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::algo::bkt::{apply_answer, diagnostic_prior};
use crate::clock::Clock;
use crate::config::{BktParams, DiagnosticConfig, MasteryThresholds};
use crate::db::MasteryStore;
use crate::error::{EngineError, EngineResult};
use crate::types::{AnswerEvent, Catalog, LearningEvent, LearningEventKind, MasteryRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryUpdate {
    pub skill_id: String,
    pub before: f64,
    pub after: f64,
    pub velocity: f64,
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub plateau: bool,
    pub mastery_achieved: bool,
}

/// One skill's tally from a completed diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub skill_id: String,
    pub correct: u32,
    pub total: u32,
}

type LockKey = (String, String);

#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn handle(&self, learner_id: &str, skill_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock();
        // Drop handles nobody is waiting on so the table tracks live keys only.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry((learner_id.to_string(), skill_id.to_string()))
                .or_default(),
        )
    }
}

pub struct MasteryService<S> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    params: BktParams,
    thresholds: MasteryThresholds,
    diagnostic: DiagnosticConfig,
    locks: KeyedLocks,
}

impl<S: MasteryStore> MasteryService<S> {
    pub fn new(
        store: Arc<S>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        params: BktParams,
        thresholds: MasteryThresholds,
        diagnostic: DiagnosticConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            params,
            thresholds,
            diagnostic,
            locks: KeyedLocks::default(),
        }
    }

    fn ensure_skill(&self, skill_id: &str) -> EngineResult<()> {
        if self.catalog.skill(skill_id).is_none() {
            return Err(EngineError::not_found("skill", skill_id));
        }
        Ok(())
    }

    /// Applies one answer and commits the record with its learning events.
    pub async fn update(&self, event: AnswerEvent) -> EngineResult<MasteryUpdate> {
        self.ensure_skill(&event.skill_id)?;
        if let Some(confidence) = event.confidence {
            if !(1..=5).contains(&confidence) {
                return Err(EngineError::validation(format!(
                    "confidence {confidence} outside 1-5"
                )));
            }
        }

        let lock = self.locks.handle(&event.learner_id, &event.skill_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut record = match self
            .store
            .get_mastery(&event.learner_id, &event.skill_id)
            .await?
        {
            Some(record) => record,
            None => MasteryRecord::new(&event.learner_id, &event.skill_id, &self.params, now),
        };
        let expected_version = record.version;

        let transition = apply_answer(&mut record, event.is_correct, &self.thresholds, now);
        if transition.degenerate {
            tracing::warn!(
                learner_id = %event.learner_id,
                skill_id = %event.skill_id,
                mastery = transition.before,
                "bkt evidence denominator was zero, kept prior"
            );
        }

        let mut events = vec![LearningEvent::new(
            &record,
            LearningEventKind::MasteryUpdated,
            transition.before,
            json!({
                "isCorrect": event.is_correct,
                "velocity": transition.velocity,
                "elapsedSeconds": event.elapsed_seconds,
                "confidence": event.confidence,
            }),
            now,
        )];
        if transition.mastery_achieved {
            events.push(LearningEvent::new(
                &record,
                LearningEventKind::MasteryAchieved,
                transition.before,
                json!({ "threshold": self.thresholds.achieved }),
                now,
            ));
        }
        if transition.plateau_entered {
            events.push(LearningEvent::new(
                &record,
                LearningEventKind::PlateauDetected,
                transition.before,
                json!({
                    "totalAttempts": record.total_attempts,
                    "velocity": transition.velocity,
                }),
                now,
            ));
        }

        let record = self
            .store
            .commit_mastery(record, expected_version, events)
            .await?;

        tracing::debug!(
            learner_id = %record.learner_id,
            skill_id = %record.skill_id,
            before = transition.before,
            after = transition.after,
            attempts = record.total_attempts,
            "mastery updated"
        );
        if transition.mastery_achieved {
            tracing::info!(learner_id = %record.learner_id, skill_id = %record.skill_id, "mastery achieved");
        }

        Ok(MasteryUpdate {
            skill_id: record.skill_id,
            before: transition.before,
            after: transition.after,
            velocity: transition.velocity,
            total_attempts: record.total_attempts,
            correct_attempts: record.correct_attempts,
            plateau: record.plateau_flag,
            mastery_achieved: transition.mastery_achieved,
        })
    }

    /// Returns the stored record, creating one with default parameters if absent.
    pub async fn initialize(&self, learner_id: &str, skill_id: &str) -> EngineResult<MasteryRecord> {
        self.ensure_skill(skill_id)?;
        let record = MasteryRecord::new(learner_id, skill_id, &self.params, self.clock.now());
        self.store.create_mastery_if_absent(record).await
    }

    /// Seeds mastery and prior from diagnostic accuracy, guessing removed.
    pub async fn initialize_from_diagnostic(
        &self,
        learner_id: &str,
        skill_id: &str,
        correct: u32,
        total: u32,
    ) -> EngineResult<MasteryRecord> {
        self.ensure_skill(skill_id)?;
        let adjusted = diagnostic_prior(correct, total, self.diagnostic.guess_correction)?;

        let lock = self.locks.handle(learner_id, skill_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut record = match self.store.get_mastery(learner_id, skill_id).await? {
            Some(record) => record,
            None => MasteryRecord::new(learner_id, skill_id, &self.params, now),
        };
        let expected_version = record.version;
        let before = record.mastery_probability;

        record.mastery_probability = adjusted;
        record.prior_knowledge = adjusted;
        record.updated_at = now;

        let event = LearningEvent::new(
            &record,
            LearningEventKind::DiagnosticSeeded,
            before,
            json!({ "correct": correct, "total": total }),
            now,
        );
        let record = self
            .store
            .commit_mastery(record, expected_version, vec![event])
            .await?;

        tracing::info!(
            learner_id = %learner_id,
            skill_id = %skill_id,
            correct,
            total,
            mastery = adjusted,
            "mastery seeded from diagnostic"
        );
        Ok(record)
    }

    /// Seeds every diagnosed skill, then creates default records for the rest
    /// of the catalog.
    pub async fn seed_from_diagnostic_results(
        &self,
        learner_id: &str,
        results: &[DiagnosticResult],
    ) -> EngineResult<Vec<MasteryRecord>> {
        let mut records = Vec::with_capacity(self.catalog.skills().len());
        let mut covered = HashSet::new();

        for result in results.iter().filter(|r| r.total > 0) {
            let record = self
                .initialize_from_diagnostic(learner_id, &result.skill_id, result.correct, result.total)
                .await?;
            covered.insert(result.skill_id.clone());
            records.push(record);
        }

        for skill in self.catalog.skills() {
            if !covered.contains(&skill.id) {
                records.push(self.initialize(learner_id, &skill.id).await?);
            }
        }

        tracing::info!(
            learner_id = %learner_id,
            diagnosed = covered.len(),
            total = records.len(),
            "diagnostic seeding complete"
        );
        Ok(records)
    }

    pub async fn get(&self, learner_id: &str, skill_id: &str) -> EngineResult<Option<MasteryRecord>> {
        self.store.get_mastery(learner_id, skill_id).await
    }

    /// All records for a learner, weakest first.
    pub async fn all_for_learner(&self, learner_id: &str) -> EngineResult<Vec<MasteryRecord>> {
        let mut records = self.store.list_mastery(learner_id).await?;
        records.sort_by(|a, b| {
            a.mastery_probability
                .total_cmp(&b.mastery_probability)
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });
        Ok(records)
    }

    pub async fn mastery_lookup(&self, learner_id: &str) -> EngineResult<HashMap<String, f64>> {
        Ok(self
            .store
            .list_mastery(learner_id)
            .await?
            .into_iter()
            .map(|r| (r.skill_id, r.mastery_probability))
            .collect())
    }

    pub async fn events(&self, learner_id: &str, skill_id: Option<&str>) -> EngineResult<Vec<LearningEvent>> {
        self.store.list_events(learner_id, skill_id).await
    }
}
