pub mod context;
pub mod controller;
pub mod extract;
pub mod pipeline;
pub mod scheduler;
pub mod spawner;
pub mod task;

// Re-export common types
pub use context::{ContextFactory, ExecutionContext, RunSummary};
pub use controller::{JobRunner, RunOutcome};
pub use pipeline::{ListingPipeline, PipelineFactory};
pub use scheduler::{JobScheduler, ProcessDetails, StartedJob, StopOutcome, DEFAULT_LOG_LIMIT};
pub use spawner::{CommandSpawner, JobSpawner};
pub use task::JobDescriptor;
