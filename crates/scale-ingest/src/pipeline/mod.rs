pub mod error;
pub mod orchestrator;
pub mod outcome;

pub use error::PipelineError;
pub use orchestrator::{IngestionOrchestrator, OrchestratorSettings, NO_VALID_RECORDS};
pub use outcome::{decide_destination, AttachmentReport, AttemptOutcome, BundleReport};
