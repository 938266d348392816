pub mod config;
pub mod engine;
pub mod events;
pub mod history;
pub mod memory;
pub mod protocol;
pub mod topology;
pub mod workload;

pub mod run_wrapper;

pub mod error;
