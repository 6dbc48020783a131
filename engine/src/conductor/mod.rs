//! Conductor System
//!
//! The per-query loop: context assembly, generation, evaluation, reflection,
//! curation and the orchestrator that sequences them.

pub mod cancel;
pub mod context;
pub mod curator;
pub mod evaluator;
pub mod generator;
pub mod orchestrator;
pub mod reflector;
pub mod sql;
pub mod stage;

pub use cancel::CancellationToken;
pub use context::{ContextBuilder, ContextChain, ContextEntry, ContextSlot};
pub use curator::{CuratedBatch, CurationPlan, Curator};
pub use evaluator::{Evaluator, ScoreCard};
pub use generator::{Generation, Generator};
pub use orchestrator::{Orchestrator, RunResult};
pub use reflector::{ErrorCategory, Insight, ReflectionInput, Reflector};
pub use stage::{IllegalTransition, Stage, StageTrail};
