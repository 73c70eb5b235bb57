pub mod capture_engine;
pub mod pipeline;
