pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gitops;
pub mod identifier;
pub mod orchestrator;
pub mod renderer;
pub mod repo_map;
pub mod secrets;
