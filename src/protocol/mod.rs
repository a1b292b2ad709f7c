mod pipeline;
pub mod tasks;

pub use pipeline::{pipeline_for, run_pipeline, ProtocolTrigger};
