//! Pure algorithms. No I/O, no clocks, randomness injected by the caller.

pub mod answer;
pub mod bkt;
pub mod packing;
pub mod priority;
pub mod scoring;

pub use bkt::{apply_answer, bkt_step, diagnostic_prior, MasteryTransition};
pub use packing::{pack_sessions, schedule_dates, PackedSession, SkillSlot};
pub use priority::{allocate_questions, focus_skills, rank_topics, SkillDemand, SkillState};
pub use scoring::{draft_module, scaled_score, select_branch, ModuleDraft};
