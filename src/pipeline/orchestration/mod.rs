pub mod orchestrator;
pub mod state;

pub use orchestrator::PipelineOrchestrator;
pub use state::{
    AnchorEntry, AnchorPhase, AnchorSnapshot, ClassificationCompletion, ClassificationRequest,
    FailureReason, RequestState,
};
