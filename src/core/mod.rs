pub mod assembler;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod model;
pub mod planner;
pub mod progress;
pub mod sink;
