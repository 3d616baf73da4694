use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Difficulty, ModuleDifficulty};

/// Four-parameter Bayesian Knowledge Tracing defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BktParams {
    /// P(L0)
    pub prior: f64,
    /// P(T)
    pub learn_rate: f64,
    /// P(G)
    pub guess: f64,
    /// P(S)
    pub slip: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            prior: 0.25,
            learn_rate: 0.10,
            guess: 0.25,
            slip: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryThresholds {
    pub achieved: f64,
    pub plateau_min_attempts: u32,
    pub plateau_max_velocity: f64,
}

impl Default for MasteryThresholds {
    fn default() -> Self {
        Self {
            achieved: 0.95,
            plateau_min_attempts: 10,
            plateau_max_velocity: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticConfig {
    /// Expected accuracy from pure guessing, removed from observed accuracy.
    pub guess_correction: f64,
    pub questions_per_section: u32,
    pub mix: DifficultyMix,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            guess_correction: 0.25,
            questions_per_section: 20,
            mix: DifficultyMix::BALANCED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingConfig {
    pub max_per_session: u32,
    pub focus_skill_count: usize,
    pub batch_days: u32,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            max_per_session: 25,
            focus_skill_count: 8,
            batch_days: 14,
        }
    }
}

/// Share of a module drawn from each difficulty level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyMix {
    pub easy: f64,
    pub medium: f64,
    pub hard: f64,
}

impl DifficultyMix {
    pub const EASY_WEIGHTED: Self = Self {
        easy: 0.50,
        medium: 0.35,
        hard: 0.15,
    };
    pub const BALANCED: Self = Self {
        easy: 0.33,
        medium: 0.34,
        hard: 0.33,
    };
    pub const HARD_WEIGHTED: Self = Self {
        easy: 0.15,
        medium: 0.35,
        hard: 0.50,
    };

    pub fn share(&self, difficulty: Difficulty) -> f64 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamConfig {
    pub module_size: u32,
    pub time_limit_minutes: u32,
    pub hard_branch_threshold: f64,
    pub balanced_branch_threshold: f64,
    pub easy_mix: DifficultyMix,
    pub balanced_mix: DifficultyMix,
    pub hard_mix: DifficultyMix,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            module_size: 27,
            time_limit_minutes: 32,
            hard_branch_threshold: 0.70,
            balanced_branch_threshold: 0.40,
            easy_mix: DifficultyMix::EASY_WEIGHTED,
            balanced_mix: DifficultyMix::BALANCED,
            hard_mix: DifficultyMix::HARD_WEIGHTED,
        }
    }
}

impl ExamConfig {
    pub fn mix_for(&self, level: ModuleDifficulty) -> DifficultyMix {
        match level {
            ModuleDifficulty::Easy => self.easy_mix,
            ModuleDifficulty::Balanced => self.balanced_mix,
            ModuleDifficulty::Hard => self.hard_mix,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub bkt: BktParams,
    pub mastery: MasteryThresholds,
    pub diagnostic: DiagnosticConfig,
    pub packing: PackingConfig,
    pub exam: ExamConfig,
    /// Fixed seed for question sampling; `None` draws from the OS.
    pub rng_seed: Option<u64>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `prep_engine=debug`.
    pub level: String,
    /// Daily rolling `engine.log` files are written here when set.
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bkt: BktParams::default(),
            mastery: MasteryThresholds::default(),
            diagnostic: DiagnosticConfig::default(),
            packing: PackingConfig::default(),
            exam: ExamConfig::default(),
            rng_seed: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads `.env` if present, then applies environment overrides.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_from_env("PREP_BKT_PRIOR", &mut config.bkt.prior);
        override_from_env("PREP_BKT_LEARN_RATE", &mut config.bkt.learn_rate);
        override_from_env("PREP_BKT_GUESS", &mut config.bkt.guess);
        override_from_env("PREP_BKT_SLIP", &mut config.bkt.slip);
        override_from_env("PREP_MASTERY_THRESHOLD", &mut config.mastery.achieved);
        override_from_env(
            "PREP_PLATEAU_MIN_ATTEMPTS",
            &mut config.mastery.plateau_min_attempts,
        );
        override_from_env(
            "PREP_PLATEAU_MAX_VELOCITY",
            &mut config.mastery.plateau_max_velocity,
        );
        override_from_env(
            "PREP_DIAGNOSTIC_GUESS_CORRECTION",
            &mut config.diagnostic.guess_correction,
        );
        override_from_env(
            "PREP_DIAGNOSTIC_QUESTIONS",
            &mut config.diagnostic.questions_per_section,
        );
        override_from_env("PREP_MAX_PER_SESSION", &mut config.packing.max_per_session);
        override_from_env("PREP_FOCUS_SKILLS", &mut config.packing.focus_skill_count);
        override_from_env("PREP_BATCH_DAYS", &mut config.packing.batch_days);
        override_from_env("PREP_EXAM_MODULE_SIZE", &mut config.exam.module_size);
        override_from_env(
            "PREP_EXAM_HARD_THRESHOLD",
            &mut config.exam.hard_branch_threshold,
        );
        override_from_env(
            "PREP_EXAM_BALANCED_THRESHOLD",
            &mut config.exam.balanced_branch_threshold,
        );

        config.rng_seed = std::env::var("PREP_RNG_SEED")
            .ok()
            .and_then(|value| value.parse::<u64>().ok());
        if let Ok(level) = std::env::var("RUST_LOG") {
            config.logging.level = level;
        }
        config.logging.file_dir = std::env::var("PREP_LOG_DIR").ok().map(PathBuf::from);

        config
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Some(value) = std::env::var(key).ok().and_then(|raw| raw.parse::<T>().ok()) {
        *slot = value;
    }
}
