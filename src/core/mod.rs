// src/core/mod.rs

pub mod config_loader;
pub mod discovery;
pub mod env;
pub mod features;
pub mod paths;
pub mod resolver;
pub mod retry;
pub mod telemetry;
pub mod version;
