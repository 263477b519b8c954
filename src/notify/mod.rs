pub mod integration;
pub mod log;
pub mod pipeline;

pub use integration::{Cancellation, Integration, IntegrationSpec, Outcome, SendContext};
pub use log::{NotifyLog, NotifyLogEntry};
pub use pipeline::{run_pipeline, FlushInput, FlushOutcome, PipelineDeps};
