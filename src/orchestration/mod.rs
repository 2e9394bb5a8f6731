pub mod orchestrator;

pub use orchestrator::{stage_plan, Orchestrator, Stage};
