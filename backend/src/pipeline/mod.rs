pub mod cancel;
pub mod error;
pub mod orchestrator;
