//! Adaptive mastery tracking and study scheduling for test prep.
//!
//! - [`algo`]: pure BKT, prioritization, session packing and exam scoring
//! - [`services`]: mastery, scheduling, plan, exam and diagnostic components over async stores
//! - [`db`]: storage traits with in-memory and SQLite adapters

pub mod algo;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod services;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use services::Engine;
