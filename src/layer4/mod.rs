// Layer 4 - Pipeline
// Composes the layers: a synchronous engine step function and the async loop driving it

pub mod engine;
pub mod heartbeat;
pub mod runner;

pub use engine::{EngineStats, SignalEngine, StepOutput};
pub use heartbeat::Heartbeat;
pub use runner::{run_live, PipelineRunner, RunSummary};
