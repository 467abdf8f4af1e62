pub mod api;
pub mod cli;
pub mod errors;
pub mod model;
mod orchestrator;
pub mod storage;
mod text_summary;
pub mod tracker;
