pub mod diagnostic;
pub mod exam;
pub mod mastery;
pub mod plan;
pub mod scheduler;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::{DiagnosticStore, ExamStore, MasteryStore, PlanStore, QuestionRepository};
use crate::types::Catalog;

pub use diagnostic::{DiagnosticAnswerOutcome, DiagnosticCompletion, DiagnosticService};
pub use exam::ExamEngine;
pub use mastery::{DiagnosticResult, MasteryService, MasteryUpdate};
pub use plan::{BatchOutcome, PlanService, SessionAnswerOutcome, StudyPlanInput};
pub use scheduler::SchedulerService;

/// Every component wired over one store, question source and clock.
pub struct Engine<S, Q> {
    pub mastery: Arc<MasteryService<S>>,
    pub scheduler: Arc<SchedulerService<S>>,
    pub plans: PlanService<S, Q>,
    pub exams: ExamEngine<S, Q>,
    pub diagnostics: DiagnosticService<S, Q>,
}

impl<S, Q> Engine<S, Q>
where
    S: MasteryStore + PlanStore + ExamStore + DiagnosticStore,
    Q: QuestionRepository,
{
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<Catalog>,
        store: Arc<S>,
        questions: Arc<Q>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rng = |stream: u64| match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_os_rng(),
        };

        let mastery = Arc::new(MasteryService::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&clock),
            config.bkt,
            config.mastery.clone(),
            config.diagnostic.clone(),
        ));
        let scheduler = Arc::new(SchedulerService::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&clock),
        ));
        let plans = PlanService::new(
            Arc::clone(&store),
            Arc::clone(&questions),
            Arc::clone(&mastery),
            Arc::clone(&scheduler),
            Arc::clone(&clock),
            config.packing.clone(),
            rng(0),
        );
        let exams = ExamEngine::new(
            Arc::clone(&store),
            Arc::clone(&questions),
            Arc::clone(&catalog),
            Arc::clone(&clock),
            config.exam.clone(),
            rng(1),
        );
        let diagnostics = DiagnosticService::new(
            store,
            questions,
            Arc::clone(&mastery),
            catalog,
            clock,
            config.diagnostic.clone(),
            rng(2),
        );

        tracing::debug!(seeded = config.rng_seed.is_some(), "engine assembled");
        Self {
            mastery,
            scheduler,
            plans,
            exams,
            diagnostics,
        }
    }
}
