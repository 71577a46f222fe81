//! Workflow engine
//!
//! A run is an ordered list of stage descriptors executed one after another:
//! clean -> compare -> risk-brief -> translate. Each stage reads prior
//! artefacts, calls the model through a bounded retry, validates the reply and
//! hands back a payload the engine persists before the next stage starts.

mod engine;
pub mod markdown;
mod retry;
pub mod stage;
pub mod stages;

pub use engine::{CancelToken, WorkflowEngine};
pub use retry::{RetryExhausted, RetryPolicy};
pub use stage::{StageContext, StageDescriptor, StageHandler};
pub use stages::default_stages;
