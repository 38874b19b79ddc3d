pub mod ragflow;

pub use ragflow::{RagflowClient, RelayOutcome, default_model, ragflow_endpoint};
